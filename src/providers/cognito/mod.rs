//! AWS Cognito identity provider.
//!
//! This provider talks to a Cognito user pool (password and refresh-token
//! login, challenge answers) and a Cognito identity pool (federated identity
//! id and temporary credentials) through the official AWS SDK.
//!
//! # Requirements
//!
//! - A user pool app client with `USER_PASSWORD_AUTH` enabled
//! - An identity pool that trusts the user pool as a login provider
//!
//! None of these calls need AWS credentials of their own; the SDK is
//! configured without a credentials provider.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sockql::providers::cognito::CognitoProvider;
//! use sockql::{Config, CredentialBroker};
//!
//! #[tokio::main]
//! async fn main() -> sockql::Result<()> {
//!     let config = Config::from_env()?;
//!     let provider = CognitoProvider::from_config(&config).await?;
//!
//!     let mut broker = CredentialBroker::new(Arc::new(provider));
//!     let token = broker.authenticate("alice@example.com", "hunter2").await?;
//!     let creds = broker.exchange_for_temporary_credentials(&token).await?;
//!     println!("access key: {}", creds.access_key_id);
//!     Ok(())
//! }
//! ```

mod provider;

pub use provider::CognitoProvider;
