//! Error types and handling for the webphone-core library
//!
//! This module defines all error types that can occur during softphone
//! operations and provides classification helpers used by the recovery
//! machinery.
//!
//! # Error Categories
//!
//! Errors are categorized to drive recovery strategies:
//!
//! - **Authentication Errors** - invalid assertions, exhausted session quotas,
//!   failed token refreshes; these force a full credential teardown
//! - **Transport Errors** - provisioning or signaling-channel failures,
//!   usually recoverable by the reconnection supervisor
//! - **Call Errors** - unknown calls, illegal state transitions, failed
//!   control operations; absorbed per-operation and reported as notices
//! - **History Errors** - call-log fetch failures; degrade silently through
//!   fallback strategies and never become hard failures
//! - **Storage Errors** - durable key/value store failures
//! - **Configuration Errors** - invalid settings, not recoverable without
//!   fixing the configuration

use thiserror::Error;
use uuid::Uuid;

use crate::call::CallState;

/// Result type alias for webphone-core operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Comprehensive error types for softphone client operations
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// Authentication related errors
    #[error("Authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    #[error("Session quota exceeded: {reason}. Wait a few minutes before reconnecting")]
    SessionQuotaExceeded { reason: String },

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Token refresh failed: {reason}")]
    TokenRefreshFailed { reason: String },

    /// Transport related errors
    #[error("Transport provisioning failed: {reason}")]
    TransportProvisioningFailed { reason: String },

    #[error("Transport failed: {reason}")]
    TransportFailed { reason: String },

    #[error("Not connected to the telephony platform")]
    NotConnected,

    /// Call related errors
    #[error("Call not found: {call_id}")]
    CallNotFound { call_id: Uuid },

    #[error("Invalid call state for call {call_id}: current state is {current_state:?}")]
    InvalidCallState {
        call_id: Uuid,
        current_state: CallState,
    },

    #[error("Call control operation '{operation}' failed: {reason}")]
    CallControlFailed { operation: String, reason: String },

    #[error("Call setup failed: {reason}")]
    CallSetupFailed { reason: String },

    /// Call history errors
    #[error("Call history fetch failed: {reason}")]
    HistoryFetchFailed { reason: String },

    #[error("Recording unavailable: {recording_id}")]
    RecordingUnavailable { recording_id: String },

    /// Durable store errors
    #[error("Storage operation failed: {reason}")]
    StorageFailed { reason: String },

    /// Configuration errors
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },

    #[error("Missing required configuration: {field}")]
    MissingConfiguration { field: String },

    /// Generic errors
    #[error("Network error: {reason}")]
    NetworkError { reason: String },

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl ClientError {
    /// Create an authentication failed error
    pub fn authentication_failed(reason: impl Into<String>) -> Self {
        Self::AuthenticationFailed { reason: reason.into() }
    }

    /// Create a session quota error
    pub fn session_quota_exceeded(reason: impl Into<String>) -> Self {
        Self::SessionQuotaExceeded { reason: reason.into() }
    }

    /// Create a transport provisioning error
    pub fn transport_provisioning_failed(reason: impl Into<String>) -> Self {
        Self::TransportProvisioningFailed { reason: reason.into() }
    }

    /// Create a transport error
    pub fn transport_failed(reason: impl Into<String>) -> Self {
        Self::TransportFailed { reason: reason.into() }
    }

    /// Create a call control error
    pub fn call_control_failed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CallControlFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a call history fetch error
    pub fn history_fetch_failed(reason: impl Into<String>) -> Self {
        Self::HistoryFetchFailed { reason: reason.into() }
    }

    /// Create a storage error
    pub fn storage_failed(reason: impl Into<String>) -> Self {
        Self::StorageFailed { reason: reason.into() }
    }

    /// Create a network error
    pub fn network_error(reason: impl Into<String>) -> Self {
        Self::NetworkError { reason: reason.into() }
    }

    /// Create an internal error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError { message: message.into() }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors are absorbed at the component boundary and reported
    /// through the notice channel; unrecoverable errors force a disconnect or
    /// a full credential teardown.
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Recoverable errors
            ClientError::NetworkError { .. }
            | ClientError::TransportFailed { .. }
            | ClientError::CallControlFailed { .. }
            | ClientError::CallSetupFailed { .. }
            | ClientError::HistoryFetchFailed { .. }
            | ClientError::RecordingUnavailable { .. }
            | ClientError::StorageFailed { .. } => true,

            // Non-recoverable errors
            ClientError::AuthenticationFailed { .. }
            | ClientError::SessionQuotaExceeded { .. }
            | ClientError::TokenRefreshFailed { .. }
            | ClientError::InvalidConfiguration { .. }
            | ClientError::MissingConfiguration { .. } => false,

            // Context-dependent errors
            _ => false,
        }
    }

    /// Check if error indicates an authentication issue
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            ClientError::AuthenticationFailed { .. }
                | ClientError::SessionQuotaExceeded { .. }
                | ClientError::NotLoggedIn
                | ClientError::TokenRefreshFailed { .. }
        )
    }

    /// Check if error is call-related
    pub fn is_call_error(&self) -> bool {
        matches!(
            self,
            ClientError::CallNotFound { .. }
                | ClientError::InvalidCallState { .. }
                | ClientError::CallControlFailed { .. }
                | ClientError::CallSetupFailed { .. }
        )
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            ClientError::AuthenticationFailed { .. }
            | ClientError::SessionQuotaExceeded { .. }
            | ClientError::NotLoggedIn
            | ClientError::TokenRefreshFailed { .. } => "authentication",

            ClientError::TransportProvisioningFailed { .. }
            | ClientError::TransportFailed { .. }
            | ClientError::NotConnected => "transport",

            ClientError::CallNotFound { .. }
            | ClientError::InvalidCallState { .. }
            | ClientError::CallControlFailed { .. }
            | ClientError::CallSetupFailed { .. } => "call",

            ClientError::HistoryFetchFailed { .. }
            | ClientError::RecordingUnavailable { .. } => "history",

            ClientError::StorageFailed { .. } => "storage",

            ClientError::InvalidConfiguration { .. }
            | ClientError::MissingConfiguration { .. } => "configuration",

            ClientError::NetworkError { .. }
            | ClientError::InternalError { .. } => "system",
        }
    }
}
