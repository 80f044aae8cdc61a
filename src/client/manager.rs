//! The composed softphone store
//!
//! `PhoneManager` composes the credential vault, transport session, active
//! call registry, reconnection supervisor, and call history cache behind one
//! observable surface. UI collaborators issue commands here and subscribe for
//! change notifications; all externally observable mutation routes through
//! the notifier so subscribed views stay consistent without polling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::call::{CallId, CallSnapshot};
use crate::error::{ClientError, ClientResult};
use crate::events::{Notice, NoticeBoard, NoticeSeverity, Notifier, SubscriptionId};
use crate::history::{CallHistoryCache, CallHistoryRecord, HistoryStats};
use crate::provider::{
    AccessTokenSource, Clock, KeyValueStore, TelephonyApi, TransportFactory, TransportSlot,
};
use crate::registry::ActiveCallRegistry;
use crate::session::{AfterCallHook, CallSession, SessionContext};
use crate::vault::{CallerIdentity, CredentialVault};

use super::config::PhoneConfig;
use super::transport::{ConnectAttempt, ConnectionState, ConnectionStore};

pub(crate) struct BackgroundTasks {
    pub(crate) refresh: Mutex<Option<JoinHandle<()>>>,
    pub(crate) ticker: Mutex<Option<JoinHandle<()>>>,
    pub(crate) events: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundTasks {
    fn new() -> Self {
        Self {
            refresh: Mutex::new(None),
            ticker: Mutex::new(None),
            events: Mutex::new(None),
        }
    }

    fn abort_all(&self) {
        for slot in [&self.refresh, &self.ticker, &self.events] {
            if let Some(handle) = slot.lock().unwrap().take() {
                handle.abort();
            }
        }
    }
}

/// Softphone session store with injected collaborators
///
/// Constructed through [`crate::client::PhoneBuilder`]; every instance is
/// isolated, so tests build as many as they need with in-memory fakes.
pub struct PhoneManager {
    pub(crate) config: PhoneConfig,
    pub(crate) api: Arc<dyn TelephonyApi>,
    pub(crate) factory: Arc<dyn TransportFactory>,
    pub(crate) vault: CredentialVault,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) connection: Arc<ConnectionStore>,
    pub(crate) transport: Arc<TransportSlot>,
    pub(crate) registry: Arc<ActiveCallRegistry>,
    pub(crate) history: Arc<CallHistoryCache>,
    pub(crate) notifier: Arc<Notifier>,
    pub(crate) notices: Arc<NoticeBoard>,
    pub(crate) should_be_connected: AtomicBool,
    pub(crate) reconnecting: AtomicBool,
    pub(crate) tasks: BackgroundTasks,
    self_ref: OnceLock<Weak<PhoneManager>>,
}

impl PhoneManager {
    pub(crate) fn new(
        config: PhoneConfig,
        api: Arc<dyn TelephonyApi>,
        factory: Arc<dyn TransportFactory>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let notifier = Arc::new(Notifier::new());
        let notices = Arc::new(NoticeBoard::new(config.max_notices, notifier.clone()));
        let connection = Arc::new(ConnectionStore::new());
        let vault = CredentialVault::new(
            store,
            clock.clone(),
            chrono::Duration::seconds(config.expiry_buffer_secs as i64),
        );
        let registry = Arc::new(ActiveCallRegistry::new(notifier.clone()));
        let tokens: Arc<dyn AccessTokenSource> = connection.clone();
        let history = Arc::new(CallHistoryCache::new(
            api.clone(),
            tokens,
            clock.clone(),
            notifier.clone(),
            notices.clone(),
            config.history.clone(),
        ));

        let manager = Arc::new(Self {
            config,
            api,
            factory,
            vault,
            clock,
            connection,
            transport: Arc::new(TransportSlot::new()),
            registry,
            history,
            notifier,
            notices,
            should_be_connected: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
            tasks: BackgroundTasks::new(),
            self_ref: OnceLock::new(),
        });
        let _ = manager.self_ref.set(Arc::downgrade(&manager));
        manager
    }

    pub(crate) fn upgrade(&self) -> Option<Arc<PhoneManager>> {
        self.self_ref.get().and_then(Weak::upgrade)
    }

    /// Weak handle for background tasks, so a loop never keeps the manager
    /// alive on its own
    pub(crate) fn downgrade(&self) -> Weak<PhoneManager> {
        self.self_ref.get().cloned().unwrap_or_else(Weak::new)
    }

    // ===== CONNECTION COMMANDS =====

    /// Establish the telephony session: authenticate (or reuse stored
    /// credentials), provision and start the signaling transport, and arm
    /// the supervisor
    ///
    /// Idempotent: calling while connected or while another connect is in
    /// flight is a no-op.
    pub async fn connect(&self) -> ClientResult<()> {
        match self.connection.begin_connect() {
            ConnectAttempt::AlreadyConnected => {
                info!("connect requested but already connected");
                return Ok(());
            }
            ConnectAttempt::InProgress => {
                info!("connect requested while another attempt is in flight");
                return Ok(());
            }
            ConnectAttempt::Started => {}
        }
        self.notifier.notify();

        match self.connect_inner().await {
            Ok(()) => {
                self.connection.set_state(ConnectionState::Connected);
                self.should_be_connected.store(true, Ordering::SeqCst);
                self.arm_supervisor();
                info!("connected to the telephony platform");
                self.notifier.notify();
                Ok(())
            }
            Err(e) => {
                error!(error = %e, category = e.category(), "connect failed");
                self.connection.set_state(ConnectionState::Disconnected);
                if e.is_auth_error() {
                    // Unusable credentials must not survive the failure
                    let _ = self.vault.clear().await;
                    self.connection.set_credentials(None);
                }
                self.notices.push(
                    NoticeSeverity::Error,
                    format!("Connection failed: {}", e),
                    self.clock.now(),
                );
                self.notifier.notify();
                Err(e)
            }
        }
    }

    async fn connect_inner(&self) -> ClientResult<()> {
        let (mut record, reused) = match self.vault.load().await? {
            Some(record) => {
                info!("reusing stored credentials");
                (record, true)
            }
            None => (self.authenticate().await?, false),
        };
        self.connection.set_credentials(Some(record.clone()));

        match self.establish_transport(&mut record).await {
            Ok(()) => {}
            Err(e) if reused && e.is_auth_error() => {
                warn!(error = %e, "stored credentials rejected, re-authenticating");
                self.vault.clear().await?;
                record = self.authenticate().await?;
                self.connection.set_credentials(Some(record.clone()));
                self.establish_transport(&mut record).await?;
            }
            Err(e) => return Err(e),
        }

        self.vault.save(&record).await?;
        self.connection.set_credentials(Some(record));
        Ok(())
    }

    /// Tear the session down: end active calls best-effort, dispose the
    /// transport, revoke the provisioned registration, and clear the cached
    /// transport artifact. Stored credentials are preserved; use
    /// [`PhoneManager::logout`] to purge them.
    pub async fn disconnect(&self) -> ClientResult<()> {
        info!("disconnecting from the telephony platform");
        self.should_be_connected.store(false, Ordering::SeqCst);
        self.tasks.abort_all();

        // End active calls; failures are logged, never propagated
        let sessions = self.registry.sessions();
        if !sessions.is_empty() {
            let results =
                futures::future::join_all(sessions.iter().map(|session| session.hangup())).await;
            for (session, result) in sessions.iter().zip(results) {
                if let Err(e) = result {
                    warn!(
                        call_id = %session.id(),
                        error = %e,
                        "hangup during disconnect failed"
                    );
                }
            }
        }

        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.dispose().await {
                warn!(error = %e, "transport dispose failed");
            }
        }

        // Best-effort revocation of the provisioned registration
        if let Ok(Some(registration)) = self.vault.load_transport().await {
            if let Some(token) = self.connection.access_token() {
                if let Err(e) = self
                    .api
                    .revoke_transport(&token, &registration.device_id)
                    .await
                {
                    warn!(
                        device_id = %registration.device_id,
                        error = %e,
                        "transport revocation failed"
                    );
                }
            }
        }
        let _ = self.vault.clear_transport().await;

        self.connection.set_state(ConnectionState::Disconnected);
        self.notifier.notify();
        Ok(())
    }

    /// Disconnect and purge stored credentials and accumulated history
    pub async fn logout(&self) -> ClientResult<()> {
        self.disconnect().await?;
        self.vault.clear().await?;
        self.connection.set_credentials(None);
        self.history.clear();
        info!("logged out");
        self.notifier.notify();
        Ok(())
    }

    /// Report that the host regained network connectivity, prompting the
    /// supervisor to re-establish a dropped transport
    pub fn notify_network_online(&self) {
        if self.should_be_connected.load(Ordering::SeqCst) && !self.connection.is_connected() {
            info!("network connectivity regained");
            self.trigger_reconnect("network online");
        }
    }

    // ===== CALL COMMANDS =====

    /// Place an outbound call
    ///
    /// The default caller id is the first assembled caller identity. Returns
    /// the session handle; further control goes through the session.
    pub async fn make_call(
        &self,
        number: impl Into<String>,
        display_name: Option<String>,
    ) -> ClientResult<Arc<CallSession>> {
        let number = number.into();
        if !self.connection.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let caller_id = self.default_caller_id();
        let transport = self.transport.get()?;
        let transport_id = transport
            .place_call(&number, caller_id.as_deref())
            .await
            .map_err(|e| {
                warn!(number = %number, error = %e, "outbound call placement failed");
                self.notices.push(
                    NoticeSeverity::Error,
                    format!("Call to {} failed: {}", number, e),
                    self.clock.now(),
                );
                ClientError::CallSetupFailed {
                    reason: e.to_string(),
                }
            })?;

        let session =
            CallSession::outbound(transport_id, number, display_name, self.session_context());
        info!(
            call_id = %session.id(),
            remote = %session.remote_number(),
            "outbound call placed"
        );
        self.registry.add(session.clone());
        Ok(session)
    }

    /// Look up an active call session
    pub fn call(&self, call_id: &CallId) -> Option<Arc<CallSession>> {
        self.registry.get(call_id)
    }

    pub(crate) fn session_context(&self) -> SessionContext {
        let history = self.history.clone();
        let tokens: Arc<dyn AccessTokenSource> = self.connection.clone();
        let delay = Duration::from_millis(self.config.history.post_call_refresh_delay_ms);
        let after_call: AfterCallHook = Arc::new(move || {
            let history = history.clone();
            let tokens = tokens.clone();
            tokio::spawn(async move {
                // Give provider-side history indexing time to catch up
                tokio::time::sleep(delay).await;
                if tokens.access_token().is_some() {
                    let _ = history.load(true).await;
                }
            });
        });

        SessionContext {
            transport: self.transport.clone(),
            clock: self.clock.clone(),
            notifier: self.notifier.clone(),
            notices: Some(self.notices.clone()),
            registry: self.registry.clone(),
            after_call,
        }
    }

    fn default_caller_id(&self) -> Option<String> {
        self.connection
            .credentials()
            .and_then(|record| record.caller_ids.first().map(|c| c.number.clone()))
    }

    // ===== CALL HISTORY COMMANDS =====

    /// Load call history; with `reset`, restart from page 1
    pub async fn load_call_history(&self, reset: bool) -> ClientResult<()> {
        self.history.load(reset).await
    }

    /// Fetch the next history page, a no-op when exhausted
    pub async fn load_more_call_history(&self) -> ClientResult<()> {
        self.history.load_more().await
    }

    /// Discard accumulated history and reload
    pub async fn refresh_call_history(&self) -> ClientResult<()> {
        self.history.refresh().await
    }

    /// Download recording content for a history record
    pub async fn download_recording(&self, recording_id: &str) -> ClientResult<Vec<u8>> {
        self.history.download_recording(recording_id).await
    }

    // ===== STATE SNAPSHOTS =====

    /// Whether a valid unexpired credential is held
    pub fn is_logged_in(&self) -> bool {
        self.connection.is_logged_in(self.clock.now())
    }

    /// Whether the signaling transport is live; this is what gates actions
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Access token expiry, for countdown displays
    pub fn token_expires_at(&self) -> Option<DateTime<Utc>> {
        self.connection.token_expires_at()
    }

    /// Caller identities usable for outbound calls, default first
    pub fn caller_ids(&self) -> Vec<CallerIdentity> {
        self.connection
            .credentials()
            .map(|record| record.caller_ids)
            .unwrap_or_default()
    }

    /// Snapshots of the currently active calls
    pub fn active_calls(&self) -> Vec<CallSnapshot> {
        self.registry.snapshots()
    }

    /// Accumulated call history records
    pub fn call_history(&self) -> Vec<CallHistoryRecord> {
        self.history.records()
    }

    /// Whether more history pages remain
    pub fn call_history_has_more(&self) -> bool {
        self.history.has_more()
    }

    /// Whether the history cache holds synthetic fallback data
    pub fn call_history_degraded(&self) -> bool {
        self.history.is_degraded()
    }

    /// History records involving the given number
    pub fn call_history_for_number(&self, number: &str) -> Vec<CallHistoryRecord> {
        self.history.records_for_number(number)
    }

    /// Aggregate counts over the accumulated history
    pub fn call_stats(&self) -> HistoryStats {
        self.history.stats()
    }

    /// Recent operator notices, oldest first
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.snapshot()
    }

    // ===== OBSERVATION =====

    /// Register a change listener; it is invoked with no arguments and should
    /// re-read state through the getters
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.notifier.subscribe(listener)
    }

    /// Remove a change listener
    pub fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }
}

impl std::fmt::Debug for PhoneManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhoneManager")
            .field("state", &self.connection.state())
            .field("active_calls", &self.registry.len())
            .finish()
    }
}

impl Drop for PhoneManager {
    fn drop(&mut self) {
        self.tasks.abort_all();
    }
}
