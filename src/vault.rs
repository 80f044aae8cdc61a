//! Credential vault for the softphone client
//!
//! Durable storage of telephony platform credentials and the cached transport
//! registration artifact, surviving process restarts. The whole credential
//! record is persisted under a single key as one JSON document, so a record is
//! either wholly present or wholly absent; callers never observe a partial
//! token/expiry pair.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};
use crate::provider::{Clock, ExtensionInfo, KeyValueStore, TransportRegistration};

const CREDENTIALS_KEY: &str = "webphone.credentials";
const TRANSPORT_KEY: &str = "webphone.transport";

/// How the session was authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMode {
    /// Assertion was exchanged for a short-lived token pair; the supervisor
    /// rotates the pair periodically using the refresh token
    TokenExchange,
    /// A pre-issued token was supplied directly; no refresh is possible
    PreIssuedAssertion,
}

/// A phone number usable as outbound caller id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    /// E.164 phone number
    pub number: String,
    /// Optional label (e.g. "Main")
    pub label: Option<String>,
}

/// Durable record of an authenticated telephony session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Bearer access token
    pub access_token: String,
    /// Refresh token, present only in [`AuthMode::TokenExchange`]
    pub refresh_token: Option<String>,
    /// Absolute access token expiry
    pub expires_at: DateTime<Utc>,
    /// How the session was authenticated
    pub auth_mode: AuthMode,
    /// Extension identity on the platform
    pub extension: ExtensionInfo,
    /// Usable caller identities, default first
    pub caller_ids: Vec<CallerIdentity>,
    /// Registered transport device identifier, once provisioned
    pub device_id: Option<String>,
}

/// Durable storage for the credential record and transport artifact
///
/// A loaded record whose expiry lies inside the safety buffer is treated as
/// absent and proactively cleared, so callers only ever see credentials that
/// are actually usable.
pub struct CredentialVault {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    expiry_buffer: Duration,
}

impl CredentialVault {
    /// Create a vault over the given store with the given expiry safety buffer
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, expiry_buffer: Duration) -> Self {
        Self {
            store,
            clock,
            expiry_buffer,
        }
    }

    /// Load the stored credential record
    ///
    /// Returns `None` when nothing usable is stored: missing, corrupt, or
    /// expiring within the safety buffer. Corrupt and stale records are
    /// cleared as a side effect.
    pub async fn load(&self) -> ClientResult<Option<CredentialRecord>> {
        let raw = self
            .store
            .get(CREDENTIALS_KEY)
            .await
            .map_err(|e| ClientError::storage_failed(e.to_string()))?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let record: CredentialRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "stored credential record is corrupt, clearing");
                self.clear().await?;
                return Ok(None);
            }
        };

        if record.expires_at - self.clock.now() < self.expiry_buffer {
            debug!(expires_at = %record.expires_at, "stored credentials expired or expiring, clearing");
            self.clear().await?;
            return Ok(None);
        }

        Ok(Some(record))
    }

    /// Persist the credential record
    pub async fn save(&self, record: &CredentialRecord) -> ClientResult<()> {
        let raw = serde_json::to_string(record)
            .map_err(|e| ClientError::internal_error(format!("credential encode failed: {}", e)))?;
        self.store
            .set(CREDENTIALS_KEY, &raw)
            .await
            .map_err(|e| ClientError::storage_failed(e.to_string()))
    }

    /// Remove the credential record and the cached transport artifact
    pub async fn clear(&self) -> ClientResult<()> {
        self.store
            .remove(CREDENTIALS_KEY)
            .await
            .map_err(|e| ClientError::storage_failed(e.to_string()))?;
        self.clear_transport().await
    }

    /// Load the cached transport registration artifact
    pub async fn load_transport(&self) -> ClientResult<Option<TransportRegistration>> {
        let raw = self
            .store
            .get(TRANSPORT_KEY)
            .await
            .map_err(|e| ClientError::storage_failed(e.to_string()))?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(registration) => Ok(Some(registration)),
            Err(e) => {
                warn!(error = %e, "cached transport registration is corrupt, clearing");
                self.clear_transport().await?;
                Ok(None)
            }
        }
    }

    /// Cache the transport registration artifact
    pub async fn save_transport(&self, registration: &TransportRegistration) -> ClientResult<()> {
        let raw = serde_json::to_string(registration)
            .map_err(|e| ClientError::internal_error(format!("registration encode failed: {}", e)))?;
        self.store
            .set(TRANSPORT_KEY, &raw)
            .await
            .map_err(|e| ClientError::storage_failed(e.to_string()))
    }

    /// Remove only the cached transport registration artifact
    pub async fn clear_transport(&self) -> ClientResult<()> {
        self.store
            .remove(TRANSPORT_KEY)
            .await
            .map_err(|e| ClientError::storage_failed(e.to_string()))
    }
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault")
            .field("expiry_buffer", &self.expiry_buffer)
            .finish()
    }
}
