//! Active call registry
//!
//! The authoritative in-memory set of currently active call sessions.
//! Membership changes are idempotent by call identity and notify subscribers
//! synchronously, so views never observe an active call outside the registry.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::call::{CallId, CallSnapshot, CallState};
use crate::events::Notifier;
use crate::session::CallSession;

/// Registry of non-terminal call sessions, indexed by call id and by the
/// transport-assigned identifier
pub struct ActiveCallRegistry {
    calls: DashMap<CallId, Arc<CallSession>>,
    transport_index: DashMap<String, CallId>,
    notifier: Arc<Notifier>,
}

impl ActiveCallRegistry {
    /// Create an empty registry
    pub fn new(notifier: Arc<Notifier>) -> Self {
        Self {
            calls: DashMap::new(),
            transport_index: DashMap::new(),
            notifier,
        }
    }

    /// Add a session; a no-op if its identity is already present.
    ///
    /// Returns whether membership actually changed. Subscribers are notified
    /// synchronously on change.
    pub fn add(&self, session: Arc<CallSession>) -> bool {
        if self.calls.contains_key(&session.id()) {
            return false;
        }
        self.transport_index
            .insert(session.transport_id().to_string(), session.id());
        self.calls.insert(session.id(), session.clone());
        debug!(call_id = %session.id(), "call added to registry");
        self.notifier.notify();
        true
    }

    /// Remove a session by identity; a no-op if absent.
    ///
    /// Returns whether membership actually changed. Subscribers are notified
    /// synchronously on change.
    pub fn remove(&self, call_id: &CallId) -> bool {
        let Some((_, session)) = self.calls.remove(call_id) else {
            return false;
        };
        self.transport_index.remove(session.transport_id());
        debug!(call_id = %call_id, "call removed from registry");
        self.notifier.notify();
        true
    }

    /// Look up a session by call id
    pub fn get(&self, call_id: &CallId) -> Option<Arc<CallSession>> {
        self.calls.get(call_id).map(|entry| entry.value().clone())
    }

    /// Look up a session by its transport-assigned identifier
    pub fn get_by_transport_id(&self, transport_id: &str) -> Option<Arc<CallSession>> {
        let call_id = *self.transport_index.get(transport_id)?.value();
        self.get(&call_id)
    }

    /// Number of active sessions
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Whether no sessions are active
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// All active sessions
    pub fn sessions(&self) -> Vec<Arc<CallSession>> {
        self.calls.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Snapshots of all active sessions
    pub fn snapshots(&self) -> Vec<CallSnapshot> {
        self.calls.iter().map(|entry| entry.value().snapshot()).collect()
    }

    /// Sessions currently in the answered state, used by the reconnection
    /// supervisor to re-invite calls after a transport restart
    pub fn answered_sessions(&self) -> Vec<Arc<CallSession>> {
        self.calls
            .iter()
            .filter(|entry| entry.value().state() == CallState::Answered)
            .map(|entry| entry.value().clone())
            .collect()
    }
}

impl std::fmt::Debug for ActiveCallRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveCallRegistry")
            .field("active", &self.len())
            .finish()
    }
}
