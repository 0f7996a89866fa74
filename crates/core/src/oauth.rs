use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;
use thiserror::Error;

/// Tokens are refreshed when they expire within this many seconds.
pub const REFRESH_LEAD_SECS: i64 = 300;

/// Git-host OAuth credentials stored per chat team.
#[derive(Clone, Debug)]
pub struct OAuthToken {
    pub team_id: String,
    pub workspace: String,
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    pub expires_at: DateTime<Utc>,
}

impl OAuthToken {
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now < Duration::seconds(REFRESH_LEAD_SECS)
    }
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("no git-host connection recorded for team `{team_id}`")]
    NotConnected { team_id: String },
    #[error("token refresh failed: {0}")]
    Refresh(String),
    #[error("token storage failed: {0}")]
    Storage(String),
}

impl TokenError {
    pub fn user_message(&self) -> String {
        match self {
            Self::NotConnected { .. } => {
                "Bitbucket is not connected for this workspace yet. Connect it and try again."
                    .to_string()
            }
            Self::Refresh(_) => {
                "Your Bitbucket session expired and could not be renewed. Please reconnect Bitbucket."
                    .to_string()
            }
            Self::Storage(_) => {
                "Bitbucket credentials are temporarily unavailable. Please retry shortly."
                    .to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{OAuthToken, TokenError};

    fn token_expiring_in(seconds: i64) -> OAuthToken {
        OAuthToken {
            team_id: "T1".to_string(),
            workspace: "acme".to_string(),
            access_token: "access".to_string().into(),
            refresh_token: "refresh".to_string().into(),
            expires_at: Utc::now() + Duration::seconds(seconds),
        }
    }

    #[test]
    fn refresh_is_needed_inside_the_lead_window() {
        let now = Utc::now();
        assert!(token_expiring_in(120).needs_refresh(now));
        assert!(token_expiring_in(-60).needs_refresh(now));
        assert!(!token_expiring_in(3600).needs_refresh(now));
    }

    #[test]
    fn refresh_failure_has_reconnect_message() {
        let error = TokenError::Refresh("invalid_grant".to_string());
        assert!(error.user_message().contains("reconnect"));
        assert!(!error.user_message().contains("invalid_grant"));
    }
}
