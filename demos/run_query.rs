//! Run one SQL statement against a live endpoint and print the rows.
//!
//! Run with: cargo run --example run_query --features cognito -- "SELECT 1"
//!
//! Environment variables:
//! - SOCKQL_ENDPOINT: wss:// URL of the query endpoint
//! - SOCKQL_REGION: AWS region of the endpoint and pools
//! - SOCKQL_USER_POOL_ID, SOCKQL_CLIENT_ID: user pool login
//! - SOCKQL_IDENTITY_POOL_ID: identity pool for temporary credentials
//! - SOCKQL_USERNAME, SOCKQL_PASSWORD: login details
//!
//! Ctrl-C closes the socket and aborts the query.

use anyhow::{bail, Context};
use sockql::providers::cognito::CognitoProvider;
use sockql::{Config, CredentialBroker, LoginCredentials, QuerySession};
use std::env;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sockql=info")),
        )
        .init();

    let Some(sql) = env::args().nth(1) else {
        bail!("usage: run_query <SQL>");
    };

    let config = Config::from_env().context("reading SOCKQL_* configuration")?;
    let provider = CognitoProvider::from_config(&config)
        .await
        .context("setting up the Cognito clients")?;
    let login = LoginCredentials::new(
        env::var("SOCKQL_USERNAME").unwrap_or_default(),
        env::var("SOCKQL_PASSWORD").unwrap_or_default(),
    );
    let broker = CredentialBroker::new(Arc::new(provider)).with_login(login);

    let mut session = QuerySession::new(config, broker).context("creating the session")?;
    session.watch_ctrl_c();

    let health = session.check_health().await;
    if !health.ok {
        eprintln!("Health check failed: {}", health.message);
        std::process::exit(1);
    }

    match session.query(&sql).await {
        Ok(result) => {
            for column in &result.columns {
                eprintln!("{:<24} {:?}", column.name, column.kind);
            }
            for row in &result.rows {
                println!("{}", serde_json::to_string(row)?);
            }
            eprintln!(
                "{} row(s) in {} message(s), request {}",
                result.len(),
                result.batches,
                result.request_id
            );
        }
        Err(e) => {
            eprintln!("Query failed ({:?}): {}", e.kind(), e);
            if e.is_retryable() {
                eprintln!("The error is transient; running the query again may succeed");
            }
            session.close().await;
            std::process::exit(2);
        }
    }

    session.close().await;
    Ok(())
}
