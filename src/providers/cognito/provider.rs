//! Cognito provider implementation.

use crate::error::AuthError;
use crate::provider::{AuthResult, IdentityProvider};
use crate::token::{AuthChallenge, AuthOutcome, IdentityToken, LoginCredentials, TemporaryCredentials};
use crate::{Config, Result, SockqlError};
use async_trait::async_trait;
use aws_sdk_cognitoidentity::Client as IdentityClient;
use aws_sdk_cognitoidentityprovider::types::{
    AuthFlowType, AuthenticationResultType, ChallengeNameType,
};
use aws_sdk_cognitoidentityprovider::Client as UserPoolClient;
use tracing::debug;

/// Cognito user pool + identity pool provider.
pub struct CognitoProvider {
    user_pool: UserPoolClient,
    identity: IdentityClient,
    client_id: String,
    identity_pool_id: String,
    login_provider: String,
}

impl CognitoProvider {
    /// Creates SDK clients for the region and pools named in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`SockqlError::InvalidConfig`] if the client id or identity
    /// pool id is missing.
    pub async fn from_config(config: &Config) -> Result<Self> {
        if config.client_id.is_empty() || config.identity_pool_id.is_empty() {
            return Err(SockqlError::InvalidConfig(
                "client_id and identity_pool_id are required for cognito".to_string(),
            ));
        }

        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .no_credentials();

        // Use custom endpoint if provided (for local testing)
        if let Some(ref endpoint) = config.provider_endpoint {
            config_loader = config_loader.endpoint_url(endpoint);
        }

        let sdk_config = config_loader.load().await;

        Ok(Self {
            user_pool: UserPoolClient::new(&sdk_config),
            identity: IdentityClient::new(&sdk_config),
            client_id: config.client_id.clone(),
            identity_pool_id: config.identity_pool_id.clone(),
            login_provider: config.identity_provider_name(),
        })
    }

    /// Maps an SDK auth response to a token or a challenge.
    fn outcome(
        result: Option<&AuthenticationResultType>,
        challenge: Option<&ChallengeNameType>,
        session: Option<&str>,
    ) -> AuthResult<AuthOutcome> {
        if let Some(result) = result {
            let id_token = result.id_token().ok_or(AuthError::MissingField("id_token"))?;
            return Ok(AuthOutcome::Token(IdentityToken::new(
                id_token,
                result.refresh_token().map(str::to_string),
                i64::from(result.expires_in()),
            )));
        }

        let Some(name) = challenge else {
            return Err(AuthError::MissingField("authentication_result"));
        };
        let session = session.unwrap_or_default().to_string();

        Ok(AuthOutcome::Challenge(match name {
            ChallengeNameType::SmsMfa => AuthChallenge::SmsMfa { session },
            ChallengeNameType::SoftwareTokenMfa => AuthChallenge::SoftwareTokenMfa { session },
            ChallengeNameType::NewPasswordRequired => AuthChallenge::NewPasswordRequired { session },
            other => AuthChallenge::Other {
                name: other.as_str().to_string(),
                session,
            },
        }))
    }
}

/// Renders an SDK error with its full context chain.
fn sdk_message<E: std::error::Error>(err: &E) -> String {
    aws_sdk_cognitoidentityprovider::error::DisplayErrorContext(err).to_string()
}

#[async_trait]
impl IdentityProvider for CognitoProvider {
    fn name(&self) -> &str {
        "cognito"
    }

    async fn initiate_auth(&self, login: &LoginCredentials) -> AuthResult<AuthOutcome> {
        let response = self
            .user_pool
            .initiate_auth()
            .auth_flow(AuthFlowType::UserPasswordAuth)
            .client_id(&self.client_id)
            .auth_parameters("USERNAME", &login.username)
            .auth_parameters("PASSWORD", &login.password)
            .send()
            .await
            .map_err(|e| {
                let message = sdk_message(&e);
                if message.contains("NotAuthorizedException")
                    || message.contains("UserNotFoundException")
                {
                    AuthError::InvalidCredentials
                } else {
                    AuthError::provider("initiate_auth", message)
                }
            })?;

        Self::outcome(
            response.authentication_result(),
            response.challenge_name(),
            response.session(),
        )
    }

    async fn refresh(&self, refresh_token: &str) -> AuthResult<AuthOutcome> {
        let response = self
            .user_pool
            .initiate_auth()
            .auth_flow(AuthFlowType::RefreshTokenAuth)
            .client_id(&self.client_id)
            .auth_parameters("REFRESH_TOKEN", refresh_token)
            .send()
            .await
            .map_err(|e| AuthError::provider("refresh", sdk_message(&e)))?;

        Self::outcome(
            response.authentication_result(),
            response.challenge_name(),
            response.session(),
        )
    }

    async fn respond_to_challenge(
        &self,
        challenge: &AuthChallenge,
        username: &str,
        answer: &str,
    ) -> AuthResult<AuthOutcome> {
        let response = self
            .user_pool
            .respond_to_auth_challenge()
            .challenge_name(ChallengeNameType::from(challenge.name()))
            .client_id(&self.client_id)
            .session(challenge.session())
            .challenge_responses("USERNAME", username)
            .challenge_responses(challenge.response_key(), answer)
            .send()
            .await
            .map_err(|e| AuthError::provider("respond_to_challenge", sdk_message(&e)))?;

        Self::outcome(
            response.authentication_result(),
            response.challenge_name(),
            response.session(),
        )
    }

    async fn get_id(&self, id_token: &str) -> AuthResult<String> {
        let response = self
            .identity
            .get_id()
            .identity_pool_id(&self.identity_pool_id)
            .logins(&self.login_provider, id_token)
            .send()
            .await
            .map_err(|e| AuthError::federation("get_id", sdk_message(&e)))?;

        let identity_id = response
            .identity_id()
            .ok_or(AuthError::MissingField("identity_id"))?;
        debug!(identity_id, "Cognito identity resolved");
        Ok(identity_id.to_string())
    }

    async fn get_credentials_for_identity(
        &self,
        identity_id: &str,
        id_token: &str,
    ) -> AuthResult<TemporaryCredentials> {
        let response = self
            .identity
            .get_credentials_for_identity()
            .identity_id(identity_id)
            .logins(&self.login_provider, id_token)
            .send()
            .await
            .map_err(|e| AuthError::federation("get_credentials", sdk_message(&e)))?;

        let credentials = response
            .credentials()
            .ok_or(AuthError::MissingField("credentials"))?;

        let mut creds = TemporaryCredentials::new(
            credentials
                .access_key_id()
                .ok_or(AuthError::MissingField("access_key_id"))?,
            credentials
                .secret_key()
                .ok_or(AuthError::MissingField("secret_key"))?,
            credentials
                .session_token()
                .ok_or(AuthError::MissingField("session_token"))?,
        );
        creds.expiration = credentials
            .expiration()
            .and_then(|d| chrono::DateTime::from_timestamp(d.secs(), d.subsec_nanos()));
        Ok(creds)
    }
}
