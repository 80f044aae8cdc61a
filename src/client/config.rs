use serde::{Deserialize, Serialize};
use url::Url;

use crate::client::supervisor::BackoffConfig;
use crate::error::{ClientError, ClientResult};
use crate::history::HistoryConfig;
use crate::vault::AuthMode;

/// How the client authenticates against the telephony platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AuthConfig {
    /// Exchange a long-lived assertion (e.g. a JWT credential grant) for a
    /// short-lived access/refresh token pair that the supervisor rotates
    JwtAssertion { assertion: String },
    /// Use a pre-issued access token directly; no refresh is possible and the
    /// session ends when the token expires
    PreIssuedToken {
        access_token: String,
        expires_in_secs: u64,
    },
}

impl AuthConfig {
    /// The credential lifecycle mode this configuration implies
    pub fn mode(&self) -> AuthMode {
        match self {
            AuthConfig::JwtAssertion { .. } => AuthMode::TokenExchange,
            AuthConfig::PreIssuedToken { .. } => AuthMode::PreIssuedAssertion,
        }
    }
}

/// Configuration for the softphone client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoneConfig {
    /// Telephony platform endpoint
    pub server: Url,
    /// Application client id registered with the platform
    pub client_id: String,
    /// Authentication mode and material
    pub auth: AuthConfig,
    /// Caller id appended after the platform-assigned numbers when not
    /// already present
    pub fallback_caller_id: Option<String>,
    /// User agent string
    pub user_agent: String,
    /// Safety buffer before token expiry; stored credentials inside the
    /// buffer are treated as absent
    pub expiry_buffer_secs: u64,
    /// Fixed interval between credential refresh attempts
    pub token_refresh_interval_secs: u64,
    /// Interval of the display-refresh ticker (expiry countdown re-render
    /// only, never a source of truth for connection or call state)
    pub display_refresh_interval_secs: u64,
    /// Maximum retained operator notices
    pub max_notices: usize,
    /// Backoff for transport-loss recovery
    pub reconnect_backoff: BackoffConfig,
    /// Call history cache settings
    pub history: HistoryConfig,
}

impl PhoneConfig {
    /// Create a configuration with defaults for the given platform identity
    pub fn new(server: Url, client_id: String, auth: AuthConfig) -> Self {
        Self {
            server,
            client_id,
            auth,
            fallback_caller_id: None,
            user_agent: concat!("webphone-core/", env!("CARGO_PKG_VERSION")).to_string(),
            expiry_buffer_secs: 300,
            token_refresh_interval_secs: 1800,
            display_refresh_interval_secs: 60,
            max_notices: 32,
            reconnect_backoff: BackoffConfig::default(),
            history: HistoryConfig::default(),
        }
    }

    /// Set the fallback caller id
    pub fn with_fallback_caller_id(mut self, number: impl Into<String>) -> Self {
        self.fallback_caller_id = Some(number.into());
        self
    }

    /// Set the user agent string
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the credential refresh interval
    pub fn with_token_refresh_interval_secs(mut self, secs: u64) -> Self {
        self.token_refresh_interval_secs = secs;
        self
    }

    /// Set the reconnect backoff parameters
    pub fn with_reconnect_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    /// Set the call history cache parameters
    pub fn with_history(mut self, history: HistoryConfig) -> Self {
        self.history = history;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> ClientResult<()> {
        if self.client_id.is_empty() {
            return Err(ClientError::InvalidConfiguration {
                field: "client_id".to_string(),
                reason: "cannot be empty".to_string(),
            });
        }
        match &self.auth {
            AuthConfig::JwtAssertion { assertion } if assertion.is_empty() => {
                Err(ClientError::InvalidConfiguration {
                    field: "auth.assertion".to_string(),
                    reason: "cannot be empty".to_string(),
                })
            }
            AuthConfig::PreIssuedToken { access_token, .. } if access_token.is_empty() => {
                Err(ClientError::InvalidConfiguration {
                    field: "auth.access_token".to_string(),
                    reason: "cannot be empty".to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

impl Default for PhoneConfig {
    fn default() -> Self {
        Self::new(
            "https://platform.example.com".parse().unwrap(),
            "webphone".to_string(),
            AuthConfig::JwtAssertion {
                assertion: String::new(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_rejects_empty_material() {
        let config = PhoneConfig::default();
        assert!(config.validate().is_err());

        let config = PhoneConfig::new(
            "https://platform.example.com".parse().unwrap(),
            "app-1".to_string(),
            AuthConfig::JwtAssertion {
                assertion: "jwt".to_string(),
            },
        );
        assert!(config.validate().is_ok());
        assert_eq!(config.auth.mode(), AuthMode::TokenExchange);
    }
}
