//! webphone-core: softphone session coordination layer
//!
//! This crate provides the stateful core of a softphone client for a hosted
//! telephony platform: authentication and credential persistence, signaling
//! transport lifecycle, per-call state machines with the full control surface
//! (hold, mute, DTMF, device switching, recording), an authoritative registry
//! of active calls, supervised reconnection with exponential backoff, and a
//! gracefully degrading call history cache.
//!
//! ## Layering
//! ```text
//! UI / admin views -> PhoneManager -> {CredentialVault, TransportSession,
//!                                      ActiveCallRegistry, Supervisor,
//!                                      CallHistoryCache}
//!                                   -> {TelephonyApi, SignalingTransport,
//!                                      KeyValueStore} (injected)
//! ```
//!
//! The platform REST API, the signaling transport, and the durable store are
//! opaque collaborators expressed as traits in [`provider`]; views observe the
//! store through [`PhoneManager::subscribe`](client::PhoneManager::subscribe)
//! and re-read plain state snapshots after each notification.

pub mod call;
pub mod client;
pub mod error;
pub mod events;
pub mod history;
pub mod provider;
pub mod registry;
pub mod session;
pub mod vault;

// Public API exports
pub use call::{CallDirection, CallId, CallSnapshot, CallState};
pub use client::{
    AuthConfig, Backoff, BackoffConfig, ConnectionState, PhoneBuilder, PhoneConfig, PhoneManager,
};
pub use error::{ClientError, ClientResult};
pub use events::{Notice, NoticeSeverity, Notifier, SubscriptionId};
pub use history::{CallHistoryRecord, HistoryConfig, HistorySource, HistoryStats};
pub use provider::{
    AccessTokenSource, Clock, KeyValueStore, SignalingTransport, SystemClock, TelephonyApi,
    TransportEvent, TransportFactory, TransportRegistration,
};
pub use registry::ActiveCallRegistry;
pub use session::{CallSession, RemoteCallEvent};
pub use vault::{AuthMode, CallerIdentity, CredentialRecord, CredentialVault};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
