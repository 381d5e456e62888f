//! Identity provider trait definition.
//!
//! This module defines the [`IdentityProvider`] trait that the credential
//! broker talks to, and the [`ChallengeResponder`] trait for the interactive
//! collaborator that answers MFA and password-change challenges.

use crate::error::AuthError;
use crate::token::{AuthChallenge, AuthOutcome, LoginCredentials, TemporaryCredentials};
use async_trait::async_trait;

/// Result type for provider calls.
pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// IdentityProvider represents the remote trust services.
///
/// One implementation covers both halves of the chain: the user pool that
/// turns a password into an identity token, and the federated identity pool
/// that turns an identity token into temporary signing credentials.
///
/// All implementations must be `Send + Sync`; a provider may be shared by
/// several sessions even though each session keeps its own token.
///
/// # Implementations
///
/// - **SDK-based**: AWS Cognito (`cognito` feature)
/// - **Testing**: Mock provider with error injection (`mock` feature)
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Returns the provider name (e.g., "cognito", "mock").
    fn name(&self) -> &str;

    // ========================================================================
    // User pool
    // ========================================================================

    /// Exchanges a username/password for an identity token.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidCredentials`]: the provider rejected the pair
    /// - [`AuthError::Provider`]: transport or service failure
    async fn initiate_auth(&self, login: &LoginCredentials) -> AuthResult<AuthOutcome>;

    /// Exchanges a refresh token for a new identity token.
    ///
    /// Providers may omit the refresh token in the result; the broker then
    /// carries the old one forward.
    async fn refresh(&self, refresh_token: &str) -> AuthResult<AuthOutcome>;

    /// Answers a challenge issued by [`initiate_auth`](Self::initiate_auth).
    async fn respond_to_challenge(
        &self,
        challenge: &AuthChallenge,
        username: &str,
        answer: &str,
    ) -> AuthResult<AuthOutcome>;

    // ========================================================================
    // Federated identity
    // ========================================================================

    /// Resolves the federated identity id for an identity token.
    async fn get_id(&self, id_token: &str) -> AuthResult<String>;

    /// Redeems an identity id plus identity token for temporary credentials.
    async fn get_credentials_for_identity(
        &self,
        identity_id: &str,
        id_token: &str,
    ) -> AuthResult<TemporaryCredentials>;
}

/// Interactive collaborator that can answer authentication challenges.
///
/// Hosts that can prompt a user (a terminal, a UI) install one on the
/// [`CredentialBroker`](crate::CredentialBroker). Non-interactive hosts leave
/// it out and get [`AuthError::ChallengeNotHandled`] instead of a hang.
#[async_trait]
pub trait ChallengeResponder: Send + Sync {
    /// Returns the code or new password for `challenge`.
    async fn answer(&self, challenge: &AuthChallenge) -> AuthResult<String>;
}
