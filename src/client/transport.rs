//! Transport session management
//!
//! Owns the authenticated connection to the telephony platform: the
//! connection state machine, the authentication exchange, caller-identity
//! assembly, transport provisioning and startup, and the routing of
//! transport-pushed events into call sessions.

use std::sync::atomic::Ordering;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};
use crate::provider::{
    AccessTokenSource, PhoneNumberInfo, TokenBundle, TransportEvent,
};
use crate::session::{CallSession, RemoteCallEvent};
use crate::vault::{AuthMode, CallerIdentity, CredentialRecord};

use super::config::AuthConfig;

/// Connection state of the transport session
///
/// `Disconnected -> Connecting -> Connected`, back to `Disconnected` on
/// failure or teardown. Only one connect attempt is ever in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport established
    Disconnected,
    /// A connect attempt is in flight
    Connecting,
    /// Authenticated with a live transport
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
        }
    }
}

/// Outcome of an attempt to start connecting
pub(crate) enum ConnectAttempt {
    /// The state moved to `Connecting`; the caller owns the attempt
    Started,
    /// Another connect is already in flight
    InProgress,
    /// Already connected
    AlreadyConnected,
}

struct ConnectionInner {
    state: ConnectionState,
    credentials: Option<CredentialRecord>,
}

/// Shared connection state: the state machine plus the in-memory credential
/// record. "Logged in" means a valid unexpired credential; "connected" means
/// logged in with a live transport. Connected is what gates actions.
pub struct ConnectionStore {
    inner: RwLock<ConnectionInner>,
}

impl ConnectionStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(ConnectionInner {
                state: ConnectionState::Disconnected,
                credentials: None,
            }),
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.inner.read().unwrap().state
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.inner.write().unwrap().state = state;
    }

    /// Atomically move `Disconnected -> Connecting`, collapsing duplicate
    /// connect attempts
    pub(crate) fn begin_connect(&self) -> ConnectAttempt {
        let mut inner = self.inner.write().unwrap();
        match inner.state {
            ConnectionState::Connected => ConnectAttempt::AlreadyConnected,
            ConnectionState::Connecting => ConnectAttempt::InProgress,
            ConnectionState::Disconnected => {
                inner.state = ConnectionState::Connecting;
                ConnectAttempt::Started
            }
        }
    }

    /// Whether a live transport is established
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// In-memory credential record
    pub fn credentials(&self) -> Option<CredentialRecord> {
        self.inner.read().unwrap().credentials.clone()
    }

    pub(crate) fn set_credentials(&self, credentials: Option<CredentialRecord>) {
        self.inner.write().unwrap().credentials = credentials;
    }

    /// Whether a valid unexpired credential is held
    pub fn is_logged_in(&self, now: DateTime<Utc>) -> bool {
        self.inner
            .read()
            .unwrap()
            .credentials
            .as_ref()
            .map(|record| record.expires_at > now)
            .unwrap_or(false)
    }

    /// Access token expiry, for countdown displays
    pub fn token_expires_at(&self) -> Option<DateTime<Utc>> {
        self.inner
            .read()
            .unwrap()
            .credentials
            .as_ref()
            .map(|record| record.expires_at)
    }
}

impl AccessTokenSource for ConnectionStore {
    fn access_token(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap()
            .credentials
            .as_ref()
            .map(|record| record.access_token.clone())
    }
}

impl std::fmt::Debug for ConnectionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read().unwrap();
        f.debug_struct("ConnectionStore")
            .field("state", &inner.state)
            .field("logged_in", &inner.credentials.is_some())
            .finish()
    }
}

/// Assemble the usable caller identities in presentation order: the primary
/// number first, then secondary numbers with caller-id capability, then the
/// configured fallback when not already present. The first entry is the
/// default outbound caller id.
pub(crate) fn assemble_caller_ids(
    numbers: &[PhoneNumberInfo],
    fallback: Option<&str>,
) -> Vec<CallerIdentity> {
    let mut caller_ids = Vec::new();

    for number in numbers.iter().filter(|n| n.primary) {
        caller_ids.push(CallerIdentity {
            number: number.number.clone(),
            label: number.label.clone(),
        });
    }
    for number in numbers.iter().filter(|n| !n.primary && n.caller_id_capable) {
        if !caller_ids.iter().any(|c| c.number == number.number) {
            caller_ids.push(CallerIdentity {
                number: number.number.clone(),
                label: number.label.clone(),
            });
        }
    }
    if let Some(fallback) = fallback {
        if !caller_ids.iter().any(|c| c.number == fallback) {
            caller_ids.push(CallerIdentity {
                number: fallback.to_string(),
                label: Some("Fallback".to_string()),
            });
        }
    }
    caller_ids
}

/// Transport session operations for PhoneManager
impl super::manager::PhoneManager {
    /// Perform a full authentication exchange and identity fetch
    pub(crate) async fn authenticate(&self) -> ClientResult<CredentialRecord> {
        info!("authenticating with the telephony platform");

        let (bundle, auth_mode) = match &self.config.auth {
            AuthConfig::JwtAssertion { assertion } => {
                let bundle = self.api.exchange_assertion(assertion).await?;
                (bundle, AuthMode::TokenExchange)
            }
            AuthConfig::PreIssuedToken {
                access_token,
                expires_in_secs,
            } => (
                TokenBundle {
                    access_token: access_token.clone(),
                    refresh_token: None,
                    expires_in_secs: *expires_in_secs,
                },
                AuthMode::PreIssuedAssertion,
            ),
        };

        let extension = self.api.fetch_extension(&bundle.access_token).await?;
        let numbers = self.api.list_phone_numbers(&bundle.access_token).await?;
        let caller_ids =
            assemble_caller_ids(&numbers, self.config.fallback_caller_id.as_deref());

        info!(
            extension_id = %extension.id,
            caller_ids = caller_ids.len(),
            "authenticated"
        );

        Ok(CredentialRecord {
            access_token: bundle.access_token,
            refresh_token: bundle.refresh_token,
            expires_at: self.clock.now() + chrono::Duration::seconds(bundle.expires_in_secs as i64),
            auth_mode,
            extension,
            caller_ids,
            device_id: None,
        })
    }

    /// Provision fresh transport credentials, build and start the transport,
    /// and begin routing its events
    ///
    /// A fresh registration is always requested rather than reusing the
    /// cached artifact, avoiding provider-side duplicate-registration errors
    /// after unclean shutdowns.
    pub(crate) async fn establish_transport(
        &self,
        record: &mut CredentialRecord,
    ) -> ClientResult<()> {
        let registration = self
            .api
            .provision_transport(&record.access_token)
            .await
            .map_err(|e| {
                if e.is_auth_error() {
                    e
                } else {
                    ClientError::transport_provisioning_failed(e.to_string())
                }
            })?;

        let (transport, events) = self.factory.create(&registration).await?;
        transport.start().await.map_err(|e| {
            ClientError::transport_failed(format!("transport start failed: {}", e))
        })?;

        self.transport.set(transport);
        record.device_id = Some(registration.device_id.clone());
        self.vault.save_transport(&registration).await?;
        self.spawn_event_loop(events);

        info!(device_id = %registration.device_id, "signaling transport established");
        Ok(())
    }

    /// Route transport events into call sessions until the channel closes
    pub(crate) fn spawn_event_loop(&self, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        let weak = self.downgrade();
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                let closed = matches!(event, TransportEvent::Closed);
                manager.handle_transport_event(event).await;
                if closed {
                    break;
                }
            }
            debug!("transport event loop ended");
        });
        if let Some(old) = self.tasks.events.lock().unwrap().replace(handle) {
            old.abort();
        }
    }

    pub(crate) async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::IncomingCall {
                transport_id,
                from_number,
                display_name,
            } => {
                let session = CallSession::inbound(
                    transport_id,
                    from_number,
                    display_name,
                    self.session_context(),
                );
                info!(
                    call_id = %session.id(),
                    remote = %session.remote_number(),
                    "inbound call delivered"
                );
                self.registry.add(session);
            }
            TransportEvent::CallRinging { transport_id } => {
                self.apply_call_event(&transport_id, RemoteCallEvent::Ringing);
            }
            TransportEvent::CallAnswered { transport_id } => {
                self.apply_call_event(&transport_id, RemoteCallEvent::Answered);
            }
            TransportEvent::CallEnded { transport_id } => {
                self.apply_call_event(&transport_id, RemoteCallEvent::Ended);
            }
            TransportEvent::CallFailed { transport_id, reason } => {
                self.apply_call_event(&transport_id, RemoteCallEvent::Failed { reason });
            }
            TransportEvent::CallHeld { transport_id } => {
                self.apply_call_event(&transport_id, RemoteCallEvent::Held);
            }
            TransportEvent::CallUnheld { transport_id } => {
                self.apply_call_event(&transport_id, RemoteCallEvent::Unheld);
            }
            TransportEvent::Closed => {
                warn!("transport socket closed");
                self.transport.take();
                self.connection.set_state(ConnectionState::Disconnected);
                self.notifier.notify();
                if self.should_be_connected.load(Ordering::SeqCst) {
                    self.trigger_reconnect("transport closed");
                }
            }
        }
    }

    fn apply_call_event(&self, transport_id: &str, event: RemoteCallEvent) {
        match self.registry.get_by_transport_id(transport_id) {
            Some(session) => session.apply_remote(event),
            None => debug!(transport_id, ?event, "event for unknown call ignored"),
        }
    }
}
