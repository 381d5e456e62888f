//! Live tests against a deployed query endpoint behind Cognito.
//!
//! These tests need a user pool, an identity pool, and an API Gateway
//! WebSocket endpoint that accepts the pool's federated identities.
//!
//! Run with:
//!   export SOCKQL_ENDPOINT=wss://abc123.execute-api.us-east-1.amazonaws.com/prod
//!   export SOCKQL_REGION=us-east-1
//!   export SOCKQL_USER_POOL_ID=us-east-1_XXXXXXXXX
//!   export SOCKQL_CLIENT_ID=...
//!   export SOCKQL_IDENTITY_POOL_ID=us-east-1:...
//!   export SOCKQL_USERNAME=... SOCKQL_PASSWORD=...
//!   cargo test --test integration_cognito --features cognito -- --ignored

#![cfg(feature = "cognito")]

use sockql::providers::cognito::CognitoProvider;
use sockql::{Config, CredentialBroker, LoginCredentials, QuerySession, SockqlError};
use std::sync::Arc;

fn login_from_env() -> LoginCredentials {
    LoginCredentials::new(
        std::env::var("SOCKQL_USERNAME").unwrap_or_default(),
        std::env::var("SOCKQL_PASSWORD").unwrap_or_default(),
    )
}

async fn setup_session() -> QuerySession {
    let config = Config::from_env().expect("Failed to read config");
    let provider = CognitoProvider::from_config(&config)
        .await
        .expect("Failed to create provider");
    let broker = CredentialBroker::new(Arc::new(provider)).with_login(login_from_env());
    QuerySession::new(config, broker).expect("Failed to create session")
}

#[tokio::test]
#[ignore] // Run only against a live deployment
async fn test_cognito_health() {
    let mut session = setup_session().await;
    let health = session.check_health().await;
    assert!(health.ok, "health check failed: {}", health.message);
}

#[tokio::test]
#[ignore]
async fn test_cognito_exchange() {
    let mut session = setup_session().await;

    let token = session
        .broker_mut()
        .ensure_valid()
        .await
        .expect("Failed to log in");
    assert!(!token.is_expired());

    let creds = session
        .broker()
        .exchange_for_temporary_credentials(&token)
        .await
        .expect("Failed to exchange token");
    assert!(creds.access_key_id.starts_with("ASIA"));
    assert!(!creds.session_token.is_empty());
}

#[tokio::test]
#[ignore]
async fn test_cognito_query() {
    let mut session = setup_session().await;
    let sql = std::env::var("SOCKQL_TEST_SQL").unwrap_or_else(|_| "SELECT 1".to_string());

    let result = session.query(&sql).await.expect("Query failed");
    assert!(result.batches >= 1);
    assert!(session.connection().is_open());

    session.close().await;
    assert!(!session.connection().is_open());
}

#[tokio::test]
#[ignore]
async fn test_cognito_wrong_password() {
    let config = Config::from_env().expect("Failed to read config");
    let provider = CognitoProvider::from_config(&config)
        .await
        .expect("Failed to create provider");
    let mut broker = CredentialBroker::new(Arc::new(provider));

    let username = login_from_env().username;
    let result = broker.authenticate(&username, "definitely-not-the-password").await;
    assert!(matches!(result, Err(SockqlError::AuthFailed(_))));
    assert!(broker.current_token().is_none());
}
