//! Boundary traits for the external collaborators of webphone-core
//!
//! The telephony platform REST API, the signaling transport, the durable
//! key/value store, and the wall clock are all opaque collaborators. They are
//! expressed here as async traits the composed manager is generic over at
//! construction time, so tests instantiate isolated managers with in-memory
//! fakes instead of sharing process-wide state.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{ClientError, ClientResult};

// ===== AUTHENTICATION / IDENTITY =====

/// Access and refresh token pair returned by a token exchange
#[derive(Debug, Clone)]
pub struct TokenBundle {
    /// Bearer access token
    pub access_token: String,
    /// Refresh token, present only for session modes that rotate tokens
    pub refresh_token: Option<String>,
    /// Access token lifetime in seconds
    pub expires_in_secs: u64,
}

/// Extension (account user) identity on the telephony platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionInfo {
    /// Platform-assigned extension identifier
    pub id: String,
    /// Display name of the extension owner
    pub name: Option<String>,
    /// Dialable extension number
    pub extension_number: Option<String>,
}

/// A phone number the extension may present as outbound caller id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoneNumberInfo {
    /// E.164 phone number
    pub number: String,
    /// Whether this is the extension's primary number
    pub primary: bool,
    /// Whether the platform allows this number as outbound caller id
    pub caller_id_capable: bool,
    /// Optional label (e.g. "Main", "Support line")
    pub label: Option<String>,
}

// ===== TRANSPORT PROVISIONING =====

/// Signaling transport credentials provisioned by the platform
///
/// Cached alongside the credential record for diagnostics and revocation, but
/// never reused to establish a transport: a fresh registration is always
/// requested to avoid provider-side duplicate-registration errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportRegistration {
    /// Signaling endpoint to connect to
    pub outbound_proxy: String,
    /// Transport username
    pub transport_user: String,
    /// Transport password
    pub transport_password: String,
    /// Separate authorization id, when the platform issues one
    pub authorization_id: Option<String>,
    /// Platform-registered device identifier
    pub device_id: String,
    /// Registration lifetime in seconds, when the platform reports one
    pub expires_secs: Option<u64>,
}

// ===== CALL LOG =====

/// Query parameters for one call-log page
#[derive(Debug, Clone)]
pub struct CallLogQuery {
    /// 1-based page number
    pub page: u32,
    /// Records per page
    pub per_page: u32,
    /// Earliest call start time to include
    pub date_from: DateTime<Utc>,
    /// Request the detailed record view (the primary strategy) or the
    /// reduced view (the fallback strategy)
    pub detailed: bool,
}

/// One page of raw call-log records as returned by the platform
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCallLogPage {
    /// Raw records, newest first
    #[serde(default)]
    pub records: Vec<RawCallLogRecord>,
    /// Paging arithmetic, when the platform reports it
    pub paging: Option<RawPaging>,
}

/// Paging block of a call-log response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPaging {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub total_elements: Option<u64>,
}

/// A raw, duck-typed call-log record
///
/// Every field is optional; normalization into the canonical
/// [`crate::history::CallHistoryRecord`] shape happens at the boundary with
/// explicit defaulting.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCallLogRecord {
    pub id: Option<String>,
    pub session_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    /// Duration in seconds
    pub duration: Option<u64>,
    /// "Inbound" or "Outbound"
    pub direction: Option<String>,
    /// Outcome code, e.g. "Completed", "Missed", "Voicemail"
    pub result: Option<String>,
    pub from: Option<RawCallParty>,
    pub to: Option<RawCallParty>,
    /// Transport medium, e.g. "VoIP", "PSTN"
    pub transport: Option<String>,
    pub recording: Option<RawRecordingInfo>,
    pub billing: Option<RawBillingInfo>,
}

/// Raw endpoint identity inside a call-log record
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCallParty {
    pub phone_number: Option<String>,
    pub extension_number: Option<String>,
    pub name: Option<String>,
    pub location: Option<String>,
}

/// Raw recording descriptor inside a call-log record
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecordingInfo {
    pub id: String,
    pub content_uri: Option<String>,
}

/// Raw billing figures inside a call-log record
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBillingInfo {
    pub cost_included: Option<f64>,
    pub cost_purchased: Option<f64>,
}

// ===== PLATFORM API =====

/// REST surface of the telephony platform consumed by the client
///
/// Implementations own the HTTP plumbing; methods that act on behalf of a
/// session take the bearer access token explicitly so the trait itself stays
/// stateless. Implementations map provider quota conditions to
/// [`ClientError::SessionQuotaExceeded`] so the client can surface the
/// distinct wait-and-retry message.
#[async_trait]
pub trait TelephonyApi: Send + Sync {
    /// Exchange a long-lived assertion for an access (+ optional refresh) token
    async fn exchange_assertion(&self, assertion: &str) -> ClientResult<TokenBundle>;

    /// Exchange a refresh token for a new access/refresh pair
    async fn refresh_token(&self, refresh_token: &str) -> ClientResult<TokenBundle>;

    /// Fetch the authenticated extension's identity
    async fn fetch_extension(&self, access_token: &str) -> ClientResult<ExtensionInfo>;

    /// List phone numbers assigned to the extension
    async fn list_phone_numbers(&self, access_token: &str) -> ClientResult<Vec<PhoneNumberInfo>>;

    /// Provision fresh signaling transport credentials
    async fn provision_transport(&self, access_token: &str) -> ClientResult<TransportRegistration>;

    /// Revoke a previously provisioned transport registration
    async fn revoke_transport(&self, access_token: &str, device_id: &str) -> ClientResult<()>;

    /// Fetch one page of the call log
    async fn fetch_call_log(
        &self,
        access_token: &str,
        query: &CallLogQuery,
    ) -> ClientResult<RawCallLogPage>;

    /// Fetch recording content (binary, bearer-authenticated)
    async fn fetch_recording(&self, access_token: &str, recording_id: &str)
        -> ClientResult<Vec<u8>>;
}

// ===== SIGNALING TRANSPORT =====

/// Events pushed by the signaling transport
///
/// Per-call events carry the transport-assigned call identifier; `Closed`
/// reports the underlying socket closing and is what the reconnection
/// supervisor listens for.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A new inbound call was delivered
    IncomingCall {
        transport_id: String,
        from_number: String,
        display_name: Option<String>,
    },
    /// An outbound call is ringing at the remote party
    CallRinging { transport_id: String },
    /// The remote party answered, or the platform confirmed our answer
    CallAnswered { transport_id: String },
    /// The call ended normally
    CallEnded { transport_id: String },
    /// The call failed
    CallFailed { transport_id: String, reason: String },
    /// The platform put the call on hold
    CallHeld { transport_id: String },
    /// The platform resumed the call from hold
    CallUnheld { transport_id: String },
    /// The underlying transport socket closed
    Closed,
}

/// Signaling client abstraction over the softphone transport
///
/// One instance per established transport; per-call operations are keyed by
/// the transport-assigned call identifier.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Start the signaling channel
    async fn start(&self) -> ClientResult<()>;

    /// Tear the signaling channel down
    async fn dispose(&self) -> ClientResult<()>;

    /// Place an outbound call, returning the transport call identifier
    async fn place_call(&self, number: &str, caller_id: Option<&str>) -> ClientResult<String>;

    /// Answer an inbound call
    async fn answer(&self, transport_id: &str) -> ClientResult<()>;

    /// Decline an inbound call
    async fn decline(&self, transport_id: &str) -> ClientResult<()>;

    /// Hang up a call
    async fn hangup(&self, transport_id: &str) -> ClientResult<()>;

    /// Put a call on hold
    async fn hold(&self, transport_id: &str) -> ClientResult<()>;

    /// Resume a call from hold
    async fn unhold(&self, transport_id: &str) -> ClientResult<()>;

    /// Mute or unmute the microphone for a call
    async fn set_muted(&self, transport_id: &str, muted: bool) -> ClientResult<()>;

    /// Send DTMF digits on a call
    async fn send_dtmf(&self, transport_id: &str, digits: &str) -> ClientResult<()>;

    /// Switch the audio input device for a call
    async fn set_input_device(&self, transport_id: &str, device_id: &str) -> ClientResult<()>;

    /// Switch the audio output device for a call
    async fn set_output_device(&self, transport_id: &str, device_id: &str) -> ClientResult<()>;

    /// Start or stop recording a call
    async fn set_recording(&self, transport_id: &str, recording: bool) -> ClientResult<()>;

    /// Re-invite a call after a transport restart
    async fn reinvite(&self, transport_id: &str) -> ClientResult<()>;
}

/// Factory producing signaling transports from provisioned registrations
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Create a transport for the given registration, returning the transport
    /// handle and the event stream it will push into
    async fn create(
        &self,
        registration: &TransportRegistration,
    ) -> ClientResult<(
        Arc<dyn SignalingTransport>,
        mpsc::UnboundedReceiver<TransportEvent>,
    )>;
}

/// Shared slot holding the currently established transport
///
/// Call sessions resolve the live transport through this slot so a transport
/// restarted by the reconnection supervisor is picked up without rebuilding
/// the sessions.
pub struct TransportSlot {
    current: RwLock<Option<Arc<dyn SignalingTransport>>>,
}

impl TransportSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
        }
    }

    /// Install a transport
    pub fn set(&self, transport: Arc<dyn SignalingTransport>) {
        *self.current.write().unwrap() = Some(transport);
    }

    /// Remove the transport, returning it for disposal
    pub fn take(&self) -> Option<Arc<dyn SignalingTransport>> {
        self.current.write().unwrap().take()
    }

    /// Resolve the live transport, failing when disconnected
    pub fn get(&self) -> ClientResult<Arc<dyn SignalingTransport>> {
        self.current
            .read()
            .unwrap()
            .clone()
            .ok_or(ClientError::NotConnected)
    }

    /// Whether a transport is currently installed
    pub fn is_set(&self) -> bool {
        self.current.read().unwrap().is_some()
    }
}

impl Default for TransportSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TransportSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSlot")
            .field("connected", &self.is_set())
            .finish()
    }
}

// ===== DURABLE STORE / CLOCK =====

/// Durable key/value store used by the credential vault
///
/// Host stores have heterogeneous error types, so the boundary reports plain
/// `anyhow` errors; the vault maps them into [`ClientError::StorageFailed`].
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Write a value
    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;

    /// Remove a value
    async fn remove(&self, key: &str) -> anyhow::Result<()>;
}

/// Injectable wall clock
pub trait Clock: Send + Sync {
    /// Current time
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Read access to the current bearer token
///
/// Implemented by the connection store so components like the call history
/// cache can authenticate platform calls without owning credential state.
pub trait AccessTokenSource: Send + Sync {
    /// Current access token, if logged in
    fn access_token(&self) -> Option<String>;
}
