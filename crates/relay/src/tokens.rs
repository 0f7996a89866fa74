use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{info, warn};

use prcard_core::oauth::{OAuthToken, TokenError};
use prcard_db::repositories::TokenRepository;

/// Fresh credentials returned by the git host's token endpoint.
#[derive(Debug)]
pub struct RefreshedToken {
    pub access_token: SecretString,
    /// Hosts may rotate the refresh token; `None` keeps the current one.
    pub refresh_token: Option<SecretString>,
    pub expires_in_secs: i64,
}

#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &SecretString) -> Result<RefreshedToken, TokenError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: i64,
}

/// `grant_type=refresh_token` against the Bitbucket token endpoint, authenticated with the
/// OAuth consumer's key and secret.
pub struct BitbucketOAuthClient {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: SecretString,
}

impl BitbucketOAuthClient {
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: SecretString,
        timeout: StdDuration,
    ) -> Result<Self, TokenError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| TokenError::Refresh(error.to_string()))?;
        Ok(Self {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret,
        })
    }
}

#[async_trait]
impl TokenRefresher for BitbucketOAuthClient {
    async fn refresh(&self, refresh_token: &SecretString) -> Result<RefreshedToken, TokenError> {
        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.expose_secret()),
            ])
            .send()
            .await
            .map_err(|error| TokenError::Refresh(format!("token request failed: {error}")))?;

        if !response.status().is_success() {
            return Err(TokenError::Refresh(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|error| {
            TokenError::Refresh(format!("failed to decode token response: {error}"))
        })?;
        if token.access_token.is_empty() {
            return Err(TokenError::Refresh("token endpoint returned empty access token".into()));
        }

        Ok(RefreshedToken {
            access_token: token.access_token.into(),
            refresh_token: token.refresh_token.filter(|value| !value.is_empty()).map(Into::into),
            expires_in_secs: token.expires_in,
        })
    }
}

/// Hands out git-host bearer tokens per chat team, refreshing them shortly before expiry.
#[derive(Clone)]
pub struct AccessTokens {
    tokens: Arc<dyn TokenRepository>,
    refresher: Arc<dyn TokenRefresher>,
}

impl AccessTokens {
    pub fn new(tokens: Arc<dyn TokenRepository>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self { tokens, refresher }
    }

    pub async fn bearer_for(
        &self,
        team_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SecretString, TokenError> {
        let token = self
            .tokens
            .find(team_id)
            .await
            .map_err(|error| TokenError::Storage(error.to_string()))?
            .ok_or_else(|| TokenError::NotConnected { team_id: team_id.to_string() })?;

        if !token.needs_refresh(now) {
            return Ok(token.access_token);
        }

        let refreshed = match self.refresher.refresh(&token.refresh_token).await {
            Ok(refreshed) => refreshed,
            Err(error) => {
                warn!(
                    event_name = "relay.oauth.refresh_failed",
                    team_id,
                    error = %error,
                    "git-host token refresh failed"
                );
                return Err(error);
            }
        };

        let renewed = OAuthToken {
            team_id: token.team_id,
            workspace: token.workspace,
            access_token: refreshed.access_token,
            refresh_token: refreshed.refresh_token.unwrap_or(token.refresh_token),
            expires_at: now + Duration::seconds(refreshed.expires_in_secs),
        };
        let access_token = renewed.access_token.clone();
        self.tokens
            .save(renewed)
            .await
            .map_err(|error| TokenError::Storage(error.to_string()))?;

        info!(event_name = "relay.oauth.refreshed", team_id, "git-host token refreshed");
        Ok(access_token)
    }
}
