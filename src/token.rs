//! Credential data carried along the trust chain.
//!
//! An [`IdentityToken`] proves who the user is; [`TemporaryCredentials`] are
//! what the signer actually uses. Neither type is ever partially mutated: a
//! refresh produces a whole new token.

use chrono::{DateTime, Duration, Utc};
use std::fmt;

/// Bearer token issued by the identity provider.
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityToken {
    /// The opaque bearer string (a JWT for Cognito)
    pub id_token: String,
    /// Token used to obtain a replacement without the password
    pub refresh_token: Option<String>,
    /// Lifetime in seconds as reported by the provider
    pub expires_in: i64,
    /// When this token was obtained
    pub issued_at: DateTime<Utc>,
}

impl IdentityToken {
    /// Creates a token issued now.
    pub fn new(id_token: impl Into<String>, refresh_token: Option<String>, expires_in: i64) -> Self {
        Self::issued_at(id_token, refresh_token, expires_in, Utc::now())
    }

    /// Creates a token with an explicit issue time.
    pub fn issued_at(
        id_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in: i64,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id_token: id_token.into(),
            refresh_token,
            expires_in,
            issued_at,
        }
    }

    /// Returns `issued_at + expires_in`. An `expires_in` that does not fit
    /// the calendar yields the earliest representable instant, so the token
    /// reads as expired.
    pub fn expires_at(&self) -> DateTime<Utc> {
        Duration::try_seconds(self.expires_in)
            .and_then(|lifetime| self.issued_at.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// A token is valid until `now` passes its expiry. No safety margin.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

impl fmt::Debug for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityToken")
            .field("id_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Short-lived signing credentials scoped to a federated identity.
#[derive(Clone, PartialEq, Eq)]
pub struct TemporaryCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    /// Provider-reported expiry, if any
    pub expiration: Option<DateTime<Utc>>,
}

impl TemporaryCredentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: session_token.into(),
            expiration: None,
        }
    }
}

impl fmt::Debug for TemporaryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemporaryCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Username/password pair handed to the broker by the host.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
}

impl LoginCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Both fields are non-empty.
    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Challenge issued by the identity provider instead of a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthChallenge {
    /// SMS one-time code
    SmsMfa { session: String },
    /// TOTP authenticator code
    SoftwareTokenMfa { session: String },
    /// First login with a temporary password
    NewPasswordRequired { session: String },
    /// Anything else the provider may send
    Other { name: String, session: String },
}

impl AuthChallenge {
    /// Provider session string to echo back with the answer.
    pub fn session(&self) -> &str {
        match self {
            Self::SmsMfa { session }
            | Self::SoftwareTokenMfa { session }
            | Self::NewPasswordRequired { session }
            | Self::Other { session, .. } => session,
        }
    }

    /// Provider name of the challenge.
    pub fn name(&self) -> &str {
        match self {
            Self::SmsMfa { .. } => "SMS_MFA",
            Self::SoftwareTokenMfa { .. } => "SOFTWARE_TOKEN_MFA",
            Self::NewPasswordRequired { .. } => "NEW_PASSWORD_REQUIRED",
            Self::Other { name, .. } => name,
        }
    }

    /// Key under which the provider expects the answer.
    pub fn response_key(&self) -> &str {
        match self {
            Self::SmsMfa { .. } => "SMS_MFA_CODE",
            Self::SoftwareTokenMfa { .. } => "SOFTWARE_TOKEN_MFA_CODE",
            Self::NewPasswordRequired { .. } => "NEW_PASSWORD",
            Self::Other { .. } => "ANSWER",
        }
    }
}

impl fmt::Display for AuthChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the provider returned for an authentication attempt.
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    Token(IdentityToken),
    Challenge(AuthChallenge),
}
