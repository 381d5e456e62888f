//! Credential chain and signing walkthrough with the mock provider.
//!
//! Nothing here talks to AWS. The final query is pointed at a local port
//! with nothing listening, to show how connect failures surface.
//!
//! Run with: cargo run --example mock_session
//! Verbose:  RUST_LOG=sockql=debug cargo run --example mock_session

use chrono::Utc;
use sockql::providers::mock::MockProvider;
use sockql::{
    Config, CredentialBroker, ErrorKind, LoginCredentials, QuerySession, RequestSigner,
    SignedHeader,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use url::Url;

#[tokio::main]
async fn main() -> sockql::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Mock Session Example ===\n");

    let provider = Arc::new(MockProvider::new().with_user("alice", "hunter2"));
    let mut broker = CredentialBroker::new(provider.clone());

    println!("1. Logging in:");
    let token = broker.authenticate("alice", "hunter2").await?;
    println!("   ✓ Token valid until {}", token.expires_at());

    println!("\n2. Exchanging for temporary credentials:");
    let creds = broker.exchange_for_temporary_credentials(&token).await?;
    println!("   ✓ Access key: {}", creds.access_key_id);

    println!("\n3. Signing the WebSocket handshake:");
    let endpoint = Url::parse("wss://abc123.execute-api.us-east-1.amazonaws.com/prod")
        .map_err(|e| sockql::SockqlError::InvalidConfig(e.to_string()))?;
    let signer = RequestSigner::new("us-east-1", "execute-api");
    let signed = signer.sign(&creds, &endpoint, "GET", Utc::now())?;
    for (name, _) in signed.headers() {
        println!("   • {}", name);
    }
    println!("   Signature: {}", signed.signature().unwrap_or_default());

    println!("\n4. Moving the signature into the query string:");
    let url = signed.to_signed_url()?;
    println!("   {}...", &url.as_str()[..url.as_str().len().min(120)]);
    let parsed = SignedHeader::from_signed_url(url.as_str())?;
    println!("   ✓ Parsed back, signature matches: {}", parsed.signature() == signed.signature());

    println!("\n5. Query against an unreachable endpoint:");
    let config = Config::new("ws://127.0.0.1:9/prod");
    let broker = CredentialBroker::new(provider.clone())
        .with_login(LoginCredentials::new("alice", "hunter2"));
    let mut session = QuerySession::new(config, broker)?;

    let health = session.check_health().await;
    println!("   Health: ok={} ({})", health.ok, health.message);

    match session.query("SELECT 1").await {
        Ok(result) => println!("   Unexpected success: {} rows", result.len()),
        Err(e) if e.kind() == ErrorKind::ConnectFailed => {
            println!("   ✓ Connect failed (expected): {}", e);
            println!("   → Retryable: {}", e.is_retryable());
        }
        Err(e) => println!("   Unexpected error: {}", e),
    }

    println!("\nProvider calls: auth={} get_id={} credentials={}",
        provider.auth_calls(),
        provider.get_id_calls(),
        provider.credentials_calls(),
    );

    println!("\n=== Example Complete ===");
    Ok(())
}
