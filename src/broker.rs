//! Identity token lifecycle and federated credential exchange.

use crate::error::AuthError;
use crate::provider::{ChallengeResponder, IdentityProvider};
use crate::token::{AuthOutcome, IdentityToken, LoginCredentials, TemporaryCredentials};
use crate::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Upper bound on challenge round-trips for one login.
const MAX_CHALLENGE_ROUNDS: usize = 3;

/// Owns one user's trust chain: password, identity token, refresh.
///
/// A broker holds at most one token. It is never shared between sessions;
/// two sessions for two users means two brokers.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use sockql::providers::mock::MockProvider;
/// use sockql::CredentialBroker;
///
/// #[tokio::main]
/// async fn main() -> sockql::Result<()> {
///     let provider = Arc::new(MockProvider::new().with_user("alice", "hunter2"));
///     let mut broker = CredentialBroker::new(provider);
///
///     let token = broker.authenticate("alice", "hunter2").await?;
///     let same = broker.ensure_valid().await?;
///     assert_eq!(token, same);
///     Ok(())
/// }
/// ```
pub struct CredentialBroker {
    provider: Arc<dyn IdentityProvider>,
    login: LoginCredentials,
    token: Option<IdentityToken>,
    responder: Option<Arc<dyn ChallengeResponder>>,
}

impl CredentialBroker {
    /// Creates a broker with no credentials and no token.
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            provider,
            login: LoginCredentials::default(),
            token: None,
            responder: None,
        }
    }

    /// Sets the username/password used for full authentication.
    pub fn with_login(mut self, login: LoginCredentials) -> Self {
        self.login = login;
        self
    }

    /// Installs an interactive challenge responder.
    pub fn with_responder(mut self, responder: Arc<dyn ChallengeResponder>) -> Self {
        self.responder = Some(responder);
        self
    }

    /// Seeds the broker with an existing token.
    pub fn with_token(mut self, token: IdentityToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Replaces the stored username/password. The held token is kept.
    pub fn set_login(&mut self, login: LoginCredentials) {
        self.login = login;
    }

    /// Returns the stored login.
    pub fn login(&self) -> &LoginCredentials {
        &self.login
    }

    /// Returns the provider name.
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Returns the held token, if any, without validating it.
    pub fn current_token(&self) -> Option<&IdentityToken> {
        self.token.as_ref()
    }

    /// Drops the held token. The next call to [`ensure_valid`](Self::ensure_valid)
    /// performs a full login.
    pub fn clear(&mut self) {
        self.token = None;
    }

    /// Exchanges `username`/`password` for a fresh identity token.
    ///
    /// The pair is remembered so later [`ensure_valid`](Self::ensure_valid)
    /// calls can log in again after a failed refresh.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] wrapped in [`SockqlError::AuthFailed`](crate::SockqlError::AuthFailed);
    /// the held token is cleared on any failure.
    pub async fn authenticate(&mut self, username: &str, password: &str) -> Result<IdentityToken> {
        self.login = LoginCredentials::new(username, password);
        self.token = None;
        self.login_with_password().await
    }

    /// Returns a token that is not past its expiry.
    ///
    /// 1. Held and unexpired: returned as-is, no provider call.
    /// 2. Held but expired: refreshed with the refresh token.
    /// 3. None held: full username/password login.
    ///
    /// A failure in (2) or (3) clears the held token, so a failed refresh is
    /// followed by a full login on the next call rather than another refresh.
    pub async fn ensure_valid(&mut self) -> Result<IdentityToken> {
        let now = Utc::now();
        match self.token.as_ref() {
            Some(token) if !token.is_expired_at(now) => Ok(token.clone()),
            Some(token) => {
                info!(expired_at = %token.expires_at(), "Token expired, getting token with refresh token");
                let refresh_token = token.refresh_token.clone();
                self.refresh_with(refresh_token).await
            }
            None => self.login_with_password().await,
        }
    }

    /// Runs the two-step federated exchange for `token`.
    ///
    /// No retries: the first failure is returned. The credentials are not
    /// cached; every call hits the provider twice.
    pub async fn exchange_for_temporary_credentials(
        &self,
        token: &IdentityToken,
    ) -> Result<TemporaryCredentials> {
        let identity_id = self.provider.get_id(&token.id_token).await?;
        debug!(identity_id = %identity_id, "Resolved federated identity");

        let credentials = self
            .provider
            .get_credentials_for_identity(&identity_id, &token.id_token)
            .await?;
        Ok(credentials)
    }

    async fn refresh_with(&mut self, refresh_token: Option<String>) -> Result<IdentityToken> {
        let Some(refresh_token) = refresh_token else {
            self.token = None;
            return Err(AuthError::MissingField("refresh_token").into());
        };

        let outcome = match self.provider.refresh(&refresh_token).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                self.token = None;
                return Err(e.into());
            }
        };

        match self.settle(outcome).await {
            Ok(mut token) => {
                if token.refresh_token.is_none() {
                    token.refresh_token = Some(refresh_token);
                }
                self.token = Some(token.clone());
                Ok(token)
            }
            Err(e) => {
                self.token = None;
                Err(e.into())
            }
        }
    }

    async fn login_with_password(&mut self) -> Result<IdentityToken> {
        if !self.login.is_complete() {
            self.token = None;
            return Err(AuthError::InvalidCredentials.into());
        }

        info!(username = %self.login.username, provider = self.provider.name(), "Logging in");
        let result = match self.provider.initiate_auth(&self.login).await {
            Ok(outcome) => self.settle(outcome).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(token) => {
                info!("Authentication successful");
                self.token = Some(token.clone());
                Ok(token)
            }
            Err(e) => {
                warn!(error = %e, "Authentication failed");
                self.token = None;
                Err(e.into())
            }
        }
    }

    /// Turns a provider outcome into a token, answering challenges if a
    /// responder is installed.
    async fn settle(&self, mut outcome: AuthOutcome) -> std::result::Result<IdentityToken, AuthError> {
        for _ in 0..MAX_CHALLENGE_ROUNDS {
            let challenge = match outcome {
                AuthOutcome::Token(token) => return Ok(token),
                AuthOutcome::Challenge(challenge) => challenge,
            };

            let Some(responder) = self.responder.as_ref() else {
                return Err(AuthError::ChallengeNotHandled(challenge));
            };

            info!(challenge = %challenge, "Answering authentication challenge");
            let answer = responder.answer(&challenge).await?;
            outcome = self
                .provider
                .respond_to_challenge(&challenge, &self.login.username, &answer)
                .await?;
        }

        match outcome {
            AuthOutcome::Token(token) => Ok(token),
            AuthOutcome::Challenge(challenge) => Err(AuthError::ChallengeNotHandled(challenge)),
        }
    }
}

impl std::fmt::Debug for CredentialBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBroker")
            .field("provider", &self.provider.name())
            .field("login", &self.login)
            .field("token", &self.token)
            .field("has_responder", &self.responder.is_some())
            .finish()
    }
}
