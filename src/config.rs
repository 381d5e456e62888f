//! Configuration types for sessions.

use crate::protocol::{ReadCache, Tag};
use crate::{Result, SockqlError};
use std::time::Duration;

/// Default idle window before an unused connection is closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Default SigV4 service name for WebSocket APIs.
pub const DEFAULT_SERVICE: &str = "execute-api";

/// Which column of each row must hold a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TimeColumn {
    /// The first column of the row
    #[default]
    First,
    /// A column with this name
    Named(String),
    /// No column is parsed as time
    Disabled,
}

/// How the signed connection request is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SigningMode {
    /// `Authorization`, `X-Amz-Date`, `X-Amz-Security-Token` handshake headers
    #[default]
    Headers,
    /// A presigned URL; for transports that cannot set handshake headers
    QueryString,
}

/// Configuration for a [`QuerySession`](crate::QuerySession).
///
/// Use the builder pattern for ergonomic configuration:
///
/// ```
/// use std::time::Duration;
/// use sockql::Config;
///
/// let config = Config::new("wss://abc123.execute-api.eu-west-1.amazonaws.com/prod")
///     .with_region("eu-west-1")
///     .with_user_pool_id("eu-west-1_AbCdEf")
///     .with_client_id("client123")
///     .with_identity_pool_id("eu-west-1:0000-1111")
///     .with_idle_timeout(Duration::from_secs(120))
///     .with_tag("CostCenter", "930");
///
/// assert_eq!(
///     config.identity_provider_name(),
///     "cognito-idp.eu-west-1.amazonaws.com/eu-west-1_AbCdEf"
/// );
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Base WebSocket URL of the query service
    pub endpoint: String,

    /// Region for signing and for the identity services
    pub region: String,

    /// SigV4 service name (default: "execute-api")
    pub service: String,

    /// Cognito user pool id
    pub user_pool_id: String,

    /// Cognito user pool app client id
    pub client_id: String,

    /// Cognito identity pool id
    pub identity_pool_id: String,

    /// Custom identity service endpoint (for local testing)
    pub provider_endpoint: Option<String>,

    /// Connection idle window; zero means [`DEFAULT_IDLE_TIMEOUT`]
    pub idle_timeout: Duration,

    /// Cache policy sent with each query (default: NONE)
    pub read_cache: ReadCache,

    /// Billing/attribution tags sent with each query
    pub tags: Vec<Tag>,

    /// Column that must parse as a timestamp (default: first)
    pub time_column: TimeColumn,

    /// How the connect request is signed (default: headers)
    pub signing_mode: SigningMode,

    /// Inbound frame buffer size
    pub channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            region: "eu-west-1".to_string(),
            service: DEFAULT_SERVICE.to_string(),
            user_pool_id: String::new(),
            client_id: String::new(),
            identity_pool_id: String::new(),
            provider_endpoint: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            read_cache: ReadCache::NoCache,
            tags: Vec::new(),
            time_column: TimeColumn::First,
            signing_mode: SigningMode::Headers,
            channel_capacity: 64,
        }
    }
}

impl Config {
    /// Creates a configuration for the service at `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Loads configuration from `SOCKQL_*` environment variables on top of
    /// the defaults.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `SOCKQL_ENDPOINT` | `endpoint` |
    /// | `SOCKQL_REGION` | `region` |
    /// | `SOCKQL_USER_POOL_ID` | `user_pool_id` |
    /// | `SOCKQL_CLIENT_ID` | `client_id` |
    /// | `SOCKQL_IDENTITY_POOL_ID` | `identity_pool_id` |
    /// | `SOCKQL_IDLE_TIMEOUT_SECS` | `idle_timeout` |
    ///
    /// # Errors
    ///
    /// Returns [`SockqlError::InvalidConfig`] if the idle timeout is not a
    /// number.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        if let Some(v) = var("SOCKQL_ENDPOINT") {
            config.endpoint = v;
        }
        if let Some(v) = var("SOCKQL_REGION") {
            config.region = v;
        }
        if let Some(v) = var("SOCKQL_USER_POOL_ID") {
            config.user_pool_id = v;
        }
        if let Some(v) = var("SOCKQL_CLIENT_ID") {
            config.client_id = v;
        }
        if let Some(v) = var("SOCKQL_IDENTITY_POOL_ID") {
            config.identity_pool_id = v;
        }
        if let Some(v) = var("SOCKQL_IDLE_TIMEOUT_SECS") {
            let secs: u64 = v.parse().map_err(|_| {
                SockqlError::InvalidConfig(format!("SOCKQL_IDLE_TIMEOUT_SECS is not a number: {}", v))
            })?;
            config.idle_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    pub fn with_user_pool_id(mut self, id: impl Into<String>) -> Self {
        self.user_pool_id = id.into();
        self
    }

    pub fn with_client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = id.into();
        self
    }

    pub fn with_identity_pool_id(mut self, id: impl Into<String>) -> Self {
        self.identity_pool_id = id.into();
        self
    }

    /// Points the identity services at a custom endpoint.
    pub fn with_provider_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.provider_endpoint = Some(endpoint.into());
        self
    }

    /// Sets the idle window. A zero duration selects the default.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_read_cache(mut self, read_cache: ReadCache) -> Self {
        self.read_cache = read_cache;
        self
    }

    /// Adds a billing/attribution tag.
    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(Tag::new(name, value));
        self
    }

    pub fn with_time_column(mut self, column: TimeColumn) -> Self {
        self.time_column = column;
        self
    }

    pub fn with_signing_mode(mut self, mode: SigningMode) -> Self {
        self.signing_mode = mode;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// The idle window actually applied to connections.
    pub fn effective_idle_timeout(&self) -> Duration {
        if self.idle_timeout.is_zero() {
            DEFAULT_IDLE_TIMEOUT
        } else {
            self.idle_timeout
        }
    }

    /// Login provider key for the federated identity exchange,
    /// `cognito-idp.<region>.amazonaws.com/<user pool id>`.
    pub fn identity_provider_name(&self) -> String {
        format!("cognito-idp.{}.amazonaws.com/{}", self.region, self.user_pool_id)
    }

    /// Checks the fields every session needs.
    ///
    /// # Errors
    ///
    /// Returns [`SockqlError::InvalidConfig`] naming the first problem.
    pub fn validate(&self) -> Result<()> {
        crate::validation::validate_endpoint(&self.endpoint)
            .map_err(|e| SockqlError::InvalidConfig(e.to_string()))?;

        if self.region.is_empty() {
            return Err(SockqlError::InvalidConfig("region is required".to_string()));
        }
        if self.service.is_empty() {
            return Err(SockqlError::InvalidConfig("service is required".to_string()));
        }
        if self.channel_capacity == 0 {
            return Err(SockqlError::InvalidConfig(
                "channel_capacity must be at least 1".to_string(),
            ));
        }
        for tag in &self.tags {
            crate::validation::validate_tag(tag)
                .map_err(|e| SockqlError::InvalidConfig(e.to_string()))?;
        }
        Ok(())
    }
}
