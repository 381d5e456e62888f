//! Query sessions.
//!
//! A [`QuerySession`] ties the credential chain, the signer and the
//! connection together. Each query reuses the open socket when there is one;
//! otherwise it obtains a valid token, trades it for temporary credentials,
//! signs a fresh connect request and dials. The streamed answer is read until
//! the sub-batch countdown runs out and returned as one ordered result.
//!
//! Nothing here retries. A failed query leaves the session usable: the next
//! call reconnects if the socket is gone.

use crate::broker::CredentialBroker;
use crate::config::{Config, SigningMode};
use crate::connection::{CloseReason, ConnectTarget, ConnectionManager, Inbound, InterruptHandle};
use crate::protocol::{Countdown, QueryRequest, ReadCache, ResponseBatch, Tag};
use crate::row::{classify_columns, Column, RawRow, Row};
use crate::signer::{RequestSigner, DEFAULT_PRESIGN_EXPIRY};
use crate::validation::{validate_endpoint, validate_request_id, validate_sql, validate_tag};
use crate::{Result, SockqlError};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

/// Per-query overrides. Unset fields fall back to the session [`Config`].
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Correlation id; a UUID v4 is generated when unset
    pub request_id: Option<String>,
    pub read_cache: Option<ReadCache>,
    pub tags: Option<Vec<Tag>>,
    /// Fires to abandon the query; the socket is closed and
    /// [`SockqlError::Cancelled`] returned
    pub cancel: Option<CancellationToken>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_read_cache(mut self, read_cache: ReadCache) -> Self {
        self.read_cache = Some(read_cache);
        self
    }

    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Rows of one query, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub request_id: String,
    /// Decided from the first row; empty when there are no rows
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
    /// Response messages consumed
    pub batches: usize,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Outcome of [`QuerySession::check_health`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    pub ok: bool,
    pub message: String,
}

impl HealthStatus {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// One caller's authenticated query channel.
///
/// A session runs one query at a time (`query` takes `&mut self`). For
/// concurrent queries, create several sessions; they share nothing.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use sockql::providers::mock::MockProvider;
/// use sockql::{Config, CredentialBroker, LoginCredentials, QuerySession};
///
/// #[tokio::main]
/// async fn main() -> sockql::Result<()> {
///     let provider = MockProvider::new().with_user("alice", "s3cret");
///     let broker = CredentialBroker::new(Arc::new(provider))
///         .with_login(LoginCredentials::new("alice", "s3cret"));
///
///     let config = Config::new("ws://127.0.0.1:9000/prod");
///     let mut session = QuerySession::new(config, broker)?;
///
///     let result = session.query("SELECT * FROM taxi_locations LIMIT 10").await?;
///     for row in &result.rows {
///         println!("{:?}", row.get("time"));
///     }
///     Ok(())
/// }
/// ```
pub struct QuerySession {
    config: Config,
    endpoint: Url,
    broker: CredentialBroker,
    signer: RequestSigner,
    connection: ConnectionManager,
}

impl QuerySession {
    /// Creates a session. No I/O happens until the first query.
    ///
    /// # Errors
    ///
    /// Returns [`SockqlError::InvalidConfig`] if `config` does not validate.
    pub fn new(config: Config, broker: CredentialBroker) -> Result<Self> {
        config.validate()?;
        let endpoint = validate_endpoint(&config.endpoint)
            .map_err(|e| SockqlError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            signer: RequestSigner::from_config(&config),
            connection: ConnectionManager::from_config(&config),
            endpoint,
            broker,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn broker(&self) -> &CredentialBroker {
        &self.broker
    }

    pub fn broker_mut(&mut self) -> &mut CredentialBroker {
        &mut self.broker
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Handle that closes this session's socket from another task.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.connection.interrupt_handle()
    }

    /// Closes the socket on Ctrl-C; an in-flight query then fails with
    /// [`SockqlError::TransportError`].
    pub fn watch_ctrl_c(&self) {
        self.connection.watch_ctrl_c();
    }

    /// Runs `sql` with the session defaults.
    pub async fn query(&mut self, sql: &str) -> Result<QueryResult> {
        self.query_with(sql, QueryOptions::default()).await
    }

    /// Runs `sql` and collects every sub-batch of the answer.
    ///
    /// # Errors
    ///
    /// - [`SockqlError::InvalidInput`] for empty SQL or a bad tag/request id
    /// - [`SockqlError::AuthFailed`] / [`SockqlError::ConnectFailed`] while
    ///   (re)connecting
    /// - [`SockqlError::TransportError`] if the send fails or the socket is
    ///   closed locally (idle timer, interrupt) mid-stream
    /// - [`SockqlError::IncompleteStream`] if the remote end goes away before
    ///   the terminal message
    /// - [`SockqlError::ProtocolError`] for an undecodable message
    /// - [`SockqlError::RemoteError`] if the service rejects the query
    /// - [`SockqlError::TimeParseError`] if any time column value is bad;
    ///   no rows are returned in that case
    /// - [`SockqlError::Cancelled`] if the cancel token fires
    pub async fn query_with(&mut self, sql: &str, options: QueryOptions) -> Result<QueryResult> {
        validate_sql(sql)?;

        let request_id = options
            .request_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        validate_request_id(&request_id)?;

        let tags = options.tags.unwrap_or_else(|| self.config.tags.clone());
        for tag in &tags {
            validate_tag(tag)?;
        }

        let payload = QueryRequest::new(sql, request_id.as_str())
            .with_read_cache(options.read_cache.unwrap_or(self.config.read_cache))
            .with_tags(tags)
            .to_json()?;

        let cancel = options.cancel.unwrap_or_default();
        if cancel.is_cancelled() {
            return Err(SockqlError::Cancelled);
        }

        self.ensure_connected().await?;

        if let Err(e) = self.connection.send(payload).await {
            self.connection.close().await;
            return Err(match e {
                SockqlError::NotConnected => {
                    SockqlError::TransportError("connection went stale before send".to_string())
                }
                other => other,
            });
        }
        info!(request_id = %request_id, "Query sent");

        let (raw_rows, batches) = self.read_response(&request_id, &cancel).await?;

        let rows = raw_rows
            .into_iter()
            .map(|raw| Row::from_raw(raw, &self.config.time_column))
            .collect::<Result<Vec<_>>>()?;
        let columns = classify_columns(&rows, &self.config.time_column);

        info!(request_id = %request_id, batches, rows = rows.len(), "Query complete");
        Ok(QueryResult {
            request_id,
            columns,
            rows,
            batches,
        })
    }

    /// Reads messages until the countdown ends. Rows are kept in arrival
    /// order across messages.
    async fn read_response(
        &self,
        request_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(Vec<RawRow>, usize)> {
        let mut countdown = Countdown::new();
        let mut rows = Vec::new();

        loop {
            let inbound = tokio::select! {
                _ = cancel.cancelled() => None,
                inbound = self.connection.recv() => Some(inbound),
            };

            let frame = match inbound {
                None => {
                    info!(request_id, "Query cancelled");
                    self.connection.close().await;
                    return Err(SockqlError::Cancelled);
                }
                Some(Inbound::Message(frame)) => frame,
                Some(Inbound::Closed(reason)) => {
                    return Err(closed_mid_stream(reason, &countdown));
                }
            };

            let batch = match ResponseBatch::decode(&frame) {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(request_id, error = %e, "Dropping connection after undecodable message");
                    // later frames of this answer must not reach the next query
                    self.connection.close().await;
                    return Err(e);
                }
            };

            // leftovers of an earlier answer; an empty id is accepted
            if !batch.request_id.is_empty() && batch.request_id != request_id {
                warn!(request_id, got = %batch.request_id, "Skipping message for another request");
                continue;
            }

            if batch.is_error() {
                self.connection.close().await;
                return Err(SockqlError::RemoteError {
                    request_id: request_id.to_string(),
                    message: batch
                        .message
                        .unwrap_or_else(|| "no message from service".to_string()),
                });
            }

            let done = countdown.observe(batch.total_sub_batches);
            debug!(
                request_id,
                sub_batch = batch.sub_batch_serial,
                total_sub_batches = batch.total_sub_batches,
                rows = batch.data.len(),
                "Batch received"
            );
            rows.extend(batch.data);

            if done {
                return Ok((rows, countdown.received()));
            }
        }
    }

    async fn ensure_connected(&mut self) -> Result<()> {
        if self.connection.is_open() {
            return Ok(());
        }

        let token = self.broker.ensure_valid().await?;
        let creds = self.broker.exchange_for_temporary_credentials(&token).await?;

        let now = Utc::now();
        let target: ConnectTarget = match self.config.signing_mode {
            SigningMode::Headers => self
                .signer
                .sign(&creds, &self.endpoint, "GET", now)
                .map(ConnectTarget::from),
            SigningMode::QueryString => self
                .signer
                .presign(&creds, &self.endpoint, now, DEFAULT_PRESIGN_EXPIRY)
                .map(ConnectTarget::from),
        }
        .map_err(|e| SockqlError::connect_failed(self.endpoint.as_str(), e))?;

        self.connection.connect(target).await
    }

    /// Checks that login details are present and that they yield a token.
    /// No socket is opened.
    pub async fn check_health(&mut self) -> HealthStatus {
        let login = self.broker.login();
        if login.username.is_empty() {
            return HealthStatus::failed("username is missing");
        }
        if login.password.is_empty() {
            return HealthStatus::failed("password is missing");
        }

        match self.broker.ensure_valid().await {
            Ok(_) => HealthStatus::ok("authenticated"),
            Err(e) => HealthStatus::failed(e.to_string()),
        }
    }

    /// Closes the socket and forgets the held token.
    pub async fn close(&mut self) {
        self.connection.close().await;
        self.broker.clear();
    }
}

impl std::fmt::Debug for QuerySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySession")
            .field("endpoint", &self.endpoint.as_str())
            .field("broker", &self.broker)
            .field("connection", &self.connection)
            .finish()
    }
}

/// Maps a close during the read loop. A locally closed socket (idle timer,
/// interrupt) is a transport error; the remote going away early is an
/// incomplete stream.
fn closed_mid_stream(reason: CloseReason, countdown: &Countdown) -> SockqlError {
    if reason.is_local() {
        warn!(%reason, "Connection closed locally during query");
        return SockqlError::TransportError(format!("connection {} during query", reason));
    }

    warn!(%reason, received = countdown.received(), "Stream ended before terminal message");
    SockqlError::IncompleteStream {
        received: countdown.received(),
        remaining: countdown.remaining().unwrap_or(0),
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::providers::mock::MockProvider;
    use crate::LoginCredentials;
    use std::sync::Arc;

    fn session_with(login: LoginCredentials) -> QuerySession {
        let provider = MockProvider::new().with_user("alice", "s3cret");
        let broker = CredentialBroker::new(Arc::new(provider)).with_login(login);
        QuerySession::new(Config::new("ws://127.0.0.1:9/prod"), broker).unwrap()
    }

    #[test]
    fn test_new_rejects_bad_endpoint() {
        let broker = CredentialBroker::new(Arc::new(MockProvider::new()));
        let err = QuerySession::new(Config::new("http://example.com"), broker).unwrap_err();
        assert!(matches!(err, SockqlError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_empty_sql_rejected_before_io() {
        let mut session = session_with(LoginCredentials::new("alice", "s3cret"));
        let err = session.query("  ").await.unwrap_err();
        assert!(matches!(err, SockqlError::InvalidInput(_)));
        assert!(session.broker().current_token().is_none());
    }

    #[tokio::test]
    async fn test_pre_cancelled_query() {
        let mut session = session_with(LoginCredentials::new("alice", "s3cret"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = session
            .query_with("SELECT 1", QueryOptions::new().with_cancel(cancel))
            .await
            .unwrap_err();
        assert!(matches!(err, SockqlError::Cancelled));
    }

    #[tokio::test]
    async fn test_bad_credentials_surface_as_auth_failed() {
        let mut session = session_with(LoginCredentials::new("alice", "wrong"));
        let err = session.query("SELECT 1").await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::AuthFailed);
    }

    #[tokio::test]
    async fn test_check_health() {
        let mut session = session_with(LoginCredentials::new("alice", ""));
        let status = session.check_health().await;
        assert!(!status.ok);
        assert_eq!(status.message, "password is missing");

        let mut session = session_with(LoginCredentials::new("alice", "s3cret"));
        let status = session.check_health().await;
        assert!(status.ok, "{}", status.message);
        assert!(!session.connection().is_open());
        assert!(session.broker().current_token().is_some());

        session.close().await;
        assert!(session.broker().current_token().is_none());
    }

    #[test]
    fn test_close_reason_mapping() {
        let mut countdown = Countdown::new();
        countdown.observe(2);

        let err = closed_mid_stream(CloseReason::Interrupted, &countdown);
        assert!(matches!(err, SockqlError::TransportError(_)));

        let err = closed_mid_stream(CloseReason::Remote, &countdown);
        assert!(matches!(
            err,
            SockqlError::IncompleteStream { received: 1, remaining: 2 }
        ));
    }
}
