//! Mock identity provider for testing.
//!
//! This provider mints tokens and credentials in memory, counts every call,
//! and supports error injection to simulate provider failures.

use crate::error::AuthError;
use crate::provider::{AuthResult, IdentityProvider};
use crate::token::{AuthChallenge, AuthOutcome, IdentityToken, LoginCredentials, TemporaryCredentials};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

const ID_TOKEN_PREFIX: &str = "mock-id-token-";

/// Mock identity provider.
///
/// # Example
///
/// ```
/// use sockql::providers::mock::MockProvider;
/// use sockql::{IdentityProvider, LoginCredentials};
///
/// #[tokio::main]
/// async fn main() {
///     let mut provider = MockProvider::new().with_user("alice", "hunter2");
///     provider.get_id_error = Some("pool unavailable".to_string());
///
///     let login = LoginCredentials::new("alice", "hunter2");
///     assert!(provider.initiate_auth(&login).await.is_ok());
///     assert!(provider.get_id("mock-id-token-1").await.is_err());
///     assert_eq!(provider.auth_calls(), 1);
/// }
/// ```
pub struct MockProvider {
    users: HashMap<String, String>,
    expires_in: i64,
    challenge: Option<(AuthChallenge, String)>,
    minted: AtomicUsize,

    auth_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    challenge_calls: AtomicUsize,
    get_id_calls: AtomicUsize,
    credentials_calls: AtomicUsize,

    /// Error message to return from `initiate_auth()`
    pub auth_error: Option<String>,
    /// Error message to return from `refresh()`
    pub refresh_error: Option<String>,
    /// Error message to return from `get_id()`
    pub get_id_error: Option<String>,
    /// Error message to return from `get_credentials_for_identity()`
    pub credentials_error: Option<String>,
}

impl MockProvider {
    /// Creates a provider with no users and one-hour tokens.
    pub fn new() -> Self {
        Self {
            users: HashMap::new(),
            expires_in: 3600,
            challenge: None,
            minted: AtomicUsize::new(0),
            auth_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            challenge_calls: AtomicUsize::new(0),
            get_id_calls: AtomicUsize::new(0),
            credentials_calls: AtomicUsize::new(0),
            auth_error: None,
            refresh_error: None,
            get_id_error: None,
            credentials_error: None,
        }
    }

    /// Registers a username/password pair.
    pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(username.into(), password.into());
        self
    }

    /// Sets the lifetime, in seconds, of minted tokens.
    pub fn with_expires_in(mut self, expires_in: i64) -> Self {
        self.expires_in = expires_in;
        self
    }

    /// Issues `challenge` on every password login; `answer` completes it.
    pub fn with_challenge(mut self, challenge: AuthChallenge, answer: impl Into<String>) -> Self {
        self.challenge = Some((challenge, answer.into()));
        self
    }

    pub fn auth_calls(&self) -> usize {
        self.auth_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn challenge_calls(&self) -> usize {
        self.challenge_calls.load(Ordering::SeqCst)
    }

    pub fn get_id_calls(&self) -> usize {
        self.get_id_calls.load(Ordering::SeqCst)
    }

    pub fn credentials_calls(&self) -> usize {
        self.credentials_calls.load(Ordering::SeqCst)
    }

    fn mint(&self, with_refresh: bool) -> IdentityToken {
        let n = self.minted.fetch_add(1, Ordering::SeqCst) + 1;
        let refresh = with_refresh.then(|| format!("mock-refresh-{}", n));
        IdentityToken::new(format!("{}{}", ID_TOKEN_PREFIX, n), refresh, self.expires_in)
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn initiate_auth(&self, login: &LoginCredentials) -> AuthResult<AuthOutcome> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ref err) = self.auth_error {
            return Err(AuthError::provider("initiate_auth", err));
        }

        match self.users.get(&login.username) {
            Some(password) if *password == login.password => {}
            _ => return Err(AuthError::InvalidCredentials),
        }

        if let Some((ref challenge, _)) = self.challenge {
            return Ok(AuthOutcome::Challenge(challenge.clone()));
        }
        Ok(AuthOutcome::Token(self.mint(true)))
    }

    async fn refresh(&self, refresh_token: &str) -> AuthResult<AuthOutcome> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ref err) = self.refresh_error {
            return Err(AuthError::provider("refresh", err));
        }
        if refresh_token.is_empty() {
            return Err(AuthError::provider("refresh", "Invalid Refresh Token"));
        }
        Ok(AuthOutcome::Token(self.mint(false)))
    }

    async fn respond_to_challenge(
        &self,
        challenge: &AuthChallenge,
        _username: &str,
        answer: &str,
    ) -> AuthResult<AuthOutcome> {
        self.challenge_calls.fetch_add(1, Ordering::SeqCst);
        match self.challenge {
            Some((ref expected, ref code)) if expected == challenge && code == answer => {
                Ok(AuthOutcome::Token(self.mint(true)))
            }
            Some(_) => Err(AuthError::provider("respond_to_challenge", "CodeMismatchException")),
            None => Err(AuthError::provider("respond_to_challenge", "no challenge pending")),
        }
    }

    async fn get_id(&self, id_token: &str) -> AuthResult<String> {
        let n = self.get_id_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(ref err) = self.get_id_error {
            return Err(AuthError::federation("get_id", err));
        }
        if !id_token.starts_with(ID_TOKEN_PREFIX) {
            return Err(AuthError::federation("get_id", "NotAuthorizedException: Invalid login token"));
        }
        Ok(format!("mock-region:identity-{}", n))
    }

    async fn get_credentials_for_identity(
        &self,
        identity_id: &str,
        _id_token: &str,
    ) -> AuthResult<TemporaryCredentials> {
        let n = self.credentials_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(ref err) = self.credentials_error {
            return Err(AuthError::federation("get_credentials", err));
        }
        if identity_id.is_empty() {
            return Err(AuthError::MissingField("identity_id"));
        }

        // Session tokens in the wild carry '/', '+' and '='; keep them here
        // so signing and URL encoding see realistic input.
        let mut creds = TemporaryCredentials::new(
            format!("ASIAMOCK{:08}", n),
            "mockSecretKey/with+reserved=chars",
            format!("IQoJb3JpZ2luX2VjE/mock+session=={}", n),
        );
        creds.expiration = Some(Utc::now() + Duration::hours(1));
        Ok(creds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_login_and_refresh() {
        let provider = MockProvider::new().with_user("alice", "pw").with_expires_in(60);

        let outcome = provider
            .initiate_auth(&LoginCredentials::new("alice", "pw"))
            .await
            .unwrap();
        let AuthOutcome::Token(token) = outcome else {
            panic!("expected token");
        };
        assert_eq!(token.expires_in, 60);
        assert!(token.refresh_token.is_some());

        let AuthOutcome::Token(refreshed) = provider.refresh("mock-refresh-1").await.unwrap() else {
            panic!("expected token");
        };
        assert_ne!(refreshed.id_token, token.id_token);
        assert!(refreshed.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let provider = MockProvider::new();
        let result = provider
            .initiate_auth(&LoginCredentials::new("mallory", "pw"))
            .await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_error_injection() {
        let mut provider = MockProvider::new().with_user("alice", "pw");
        provider.credentials_error = Some("throttled".to_string());

        let result = provider.get_credentials_for_identity("id-1", "mock-id-token-1").await;
        assert!(result.is_err());
        assert_eq!(provider.credentials_calls(), 1);
    }

    #[tokio::test]
    async fn test_foreign_token_rejected_by_get_id() {
        let provider = MockProvider::new();
        assert!(provider.get_id("not-a-mock-token").await.is_err());
        assert!(provider.get_id("mock-id-token-7").await.is_ok());
    }
}
