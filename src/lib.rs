//! Sockql - SQL over an authenticated WebSocket.
//!
//! Sockql runs SQL against a query service that sits behind a SigV4-signed
//! WebSocket API and streams its answers back in sub-batches. It owns the
//! whole client path: user-pool login and token refresh, federated exchange
//! for temporary credentials, request signing, one persistent connection
//! with an idle timer, and reassembly of the streamed result.
//!
//! # Features
//!
//! - **Token lifecycle**: reuse, refresh, or full login, decided per query
//! - **Signed connects**: SigV4 headers or a presigned URL
//! - **Persistent connection**: reused across queries, closed after idle
//! - **Ordered results**: sub-batches concatenated in arrival order
//! - **Typed rows**: time column parsed, column kinds classified once
//! - **Error Context**: one error type with a flat [`ErrorKind`]
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use sockql::providers::mock::MockProvider;
//! use sockql::{Config, CredentialBroker, LoginCredentials, QuerySession};
//!
//! #[tokio::main]
//! async fn main() -> sockql::Result<()> {
//!     let config = Config::from_env()?.with_tag("CostCenter", "930");
//!
//!     // swap in providers::cognito::CognitoProvider::from_config(&config)
//!     let provider = MockProvider::new().with_user("alice@example.com", "hunter2");
//!     let broker = CredentialBroker::new(Arc::new(provider))
//!         .with_login(LoginCredentials::new("alice@example.com", "hunter2"));
//!
//!     let mut session = QuerySession::new(config, broker)?;
//!     session.watch_ctrl_c();
//!
//!     let result = session
//!         .query("SELECT * FROM parquet_scan('s3://boilingdata-demo/demo.parquet') LIMIT 20")
//!         .await?;
//!     println!("{} rows in {} batches", result.len(), result.batches);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Identity Providers
//!
//! | Provider | Feature Flag | Notes |
//! |----------|-------------|-------|
//! | Mock | `mock` (default) | In-memory, call counters, error injection |
//! | Cognito | `cognito` | AWS SDK user pool + identity pool |
//!
//! ```toml
//! [dependencies]
//! sockql = { version = "0.1", features = ["cognito"] }
//! ```

pub mod broker;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod provider;
pub mod providers;
pub mod row;
pub mod session;
pub mod signer;
pub mod timeparse;
pub mod token;
pub mod validation;

pub use broker::CredentialBroker;
pub use config::{Config, SigningMode, TimeColumn};
pub use connection::{CloseReason, ConnectionManager, ConnectionState, InterruptHandle};
pub use error::{AuthError, ErrorKind, Result, SockqlError};
pub use protocol::{ReadCache, Tag};
pub use provider::{ChallengeResponder, IdentityProvider};
pub use row::{Cell, Column, Row, ValueKind};
pub use session::{HealthStatus, QueryOptions, QueryResult, QuerySession};
pub use signer::{RequestSigner, SignedHeader, SignedUrl};
pub use token::{AuthChallenge, IdentityToken, LoginCredentials, TemporaryCredentials};
