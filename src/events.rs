//! Change notification for webphone-core
//!
//! The store exposes a deliberately small observer surface: listeners are
//! registered with [`Notifier::subscribe`], invoked with no arguments whenever
//! observable state changes, and are expected to re-read current state through
//! the public getters. This keeps the store decoupled from any particular UI
//! binding mechanism.
//!
//! Operator-facing transient messages (the toast/alert channel) are carried by
//! the [`NoticeBoard`], a bounded queue of [`Notice`] values that pushes a
//! listener notification on every insert.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Identifier returned by [`Notifier::subscribe`], used to unsubscribe
pub type SubscriptionId = Uuid;

type Listener = Arc<dyn Fn() + Send + Sync>;

/// Listener registry for state-change notifications
///
/// Notification is synchronous with the triggering mutation: by the time the
/// mutating operation returns, every subscriber has observed the change.
pub struct Notifier {
    listeners: RwLock<Vec<(SubscriptionId, Listener)>>,
}

impl Notifier {
    /// Create a new notifier with no subscribers
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register a listener, returning the id needed to unsubscribe
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        let listener: Listener = Arc::new(listener);
        self.listeners.write().unwrap().push((id, listener));
        id
    }

    /// Remove a listener; returns false if the id was not subscribed
    pub fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        let mut listeners = self.listeners.write().unwrap();
        if let Some(pos) = listeners.iter().position(|(sub_id, _)| sub_id == id) {
            listeners.remove(pos);
            true
        } else {
            false
        }
    }

    /// Invoke every registered listener
    ///
    /// The listener list is cloned before delivery so a listener may
    /// subscribe or unsubscribe without deadlocking.
    pub fn notify(&self) {
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener();
        }
    }

    /// Number of active subscriptions
    pub fn subscription_count(&self) -> usize {
        self.listeners.read().unwrap().len()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

/// Severity of an operator-facing notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeSeverity {
    /// Informational message
    Info,
    /// Something degraded but the client keeps working
    Warning,
    /// An operation failed and was absorbed
    Error,
}

/// A transient operator-facing message
#[derive(Debug, Clone)]
pub struct Notice {
    /// Message severity
    pub severity: NoticeSeverity,
    /// Human-readable message text
    pub message: String,
    /// When the notice was raised
    pub timestamp: DateTime<Utc>,
}

/// Bounded queue of recent notices
///
/// Oldest entries are evicted once the capacity is reached. Every push
/// notifies subscribers so views can surface the message immediately.
pub struct NoticeBoard {
    entries: RwLock<VecDeque<Notice>>,
    capacity: usize,
    notifier: Arc<Notifier>,
}

impl NoticeBoard {
    /// Create a board that keeps at most `capacity` notices
    pub fn new(capacity: usize, notifier: Arc<Notifier>) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            notifier,
        }
    }

    /// Append a notice, evicting the oldest entry when full
    pub fn push(&self, severity: NoticeSeverity, message: impl Into<String>, now: DateTime<Utc>) {
        let notice = Notice {
            severity,
            message: message.into(),
            timestamp: now,
        };
        {
            let mut entries = self.entries.write().unwrap();
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(notice);
        }
        self.notifier.notify();
    }

    /// Current notices, oldest first
    pub fn snapshot(&self) -> Vec<Notice> {
        self.entries.read().unwrap().iter().cloned().collect()
    }

    /// Drop all notices
    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
        self.notifier.notify();
    }
}

impl std::fmt::Debug for NoticeBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoticeBoard")
            .field("entries", &self.entries.read().unwrap().len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn subscribe_notify_unsubscribe() {
        let notifier = Notifier::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_clone = hits.clone();
        let id = notifier.subscribe(move || {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        notifier.notify();
        notifier.notify();
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        assert!(notifier.unsubscribe(&id));
        notifier.notify();
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        // Unknown ids are rejected
        assert!(!notifier.unsubscribe(&Uuid::new_v4()));
    }

    #[test]
    fn notice_board_bounds_and_notifies() {
        let notifier = Arc::new(Notifier::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        notifier.subscribe(move || {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        let board = NoticeBoard::new(2, notifier);
        let now = Utc::now();
        board.push(NoticeSeverity::Info, "one", now);
        board.push(NoticeSeverity::Warning, "two", now);
        board.push(NoticeSeverity::Error, "three", now);

        let notices = board.snapshot();
        assert_eq!(notices.len(), 2);
        assert_eq!(notices[0].message, "two");
        assert_eq!(notices[1].message, "three");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
