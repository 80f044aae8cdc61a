//! Reconnection and credential refresh supervision
//!
//! Two independent concerns keep a session alive across token expiry and
//! transport drops:
//!
//! 1. **Credential refresh** - a fixed-interval task that, for session modes
//!    issuing short-lived tokens, exchanges the refresh token for a new pair
//!    and re-persists it. A failed refresh is fatal for the current session:
//!    the client is force-disconnected and the operator warned.
//! 2. **Transport-loss recovery** - armed against the transport socket
//!    closing unexpectedly and against the host reporting regained network
//!    connectivity. Attempts restart the transport with exponential backoff
//!    while the session should still be connected, and re-invite calls that
//!    were answered when the transport dropped.

use std::sync::atomic::Ordering;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::client::transport::ConnectionState;
use crate::error::{ClientError, ClientResult};
use crate::events::NoticeSeverity;
use crate::vault::AuthMode;

/// Configuration for exponential backoff
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Initial delay before the first retry
    pub initial_delay: Duration,
    /// Ceiling for the delay between retries
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each retry
    pub multiplier: f64,
    /// Whether to perturb the actual sleeps with jitter
    pub use_jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            use_jitter: false,
        }
    }
}

/// Exponential backoff delay sequence
///
/// The base sequence is non-decreasing and capped at the configured ceiling.
/// Jitter, when enabled, perturbs only the actual sleep via [`Backoff::jittered`],
/// never the tracked sequence.
pub struct Backoff {
    config: BackoffConfig,
    next: Duration,
}

impl Backoff {
    /// Start a fresh sequence
    pub fn new(config: BackoffConfig) -> Self {
        let next = config.initial_delay;
        Self { config, next }
    }

    /// Base delay for the next attempt, advancing the sequence
    pub fn next_delay(&mut self) -> Duration {
        let current = self.next;
        let scaled_ms = current.as_millis() as f64 * self.config.multiplier;
        self.next = Duration::from_millis(scaled_ms as u64).min(self.config.max_delay);
        current
    }

    /// Apply jitter (plus or minus 10 percent) to a base delay when enabled
    pub fn jittered(&self, base: Duration) -> Duration {
        if !self.config.use_jitter {
            return base;
        }
        let jitter = (rand::random::<f64>() - 0.5) * 0.2;
        Duration::from_millis((base.as_millis() as f64 * (1.0 + jitter)) as u64)
    }
}

/// Supervision task management for PhoneManager
impl super::manager::PhoneManager {
    /// Arm the background supervision appropriate for the current session:
    /// the credential refresh loop (token-exchange sessions only) and the
    /// display-refresh ticker
    pub(crate) fn arm_supervisor(&self) {
        self.spawn_refresh_task();
        self.spawn_display_ticker();
    }

    fn spawn_refresh_task(&self) {
        let needs_refresh = self
            .connection
            .credentials()
            .map(|record| {
                record.auth_mode == AuthMode::TokenExchange && record.refresh_token.is_some()
            })
            .unwrap_or(false);
        if !needs_refresh {
            debug!("credential refresh not armed for this session mode");
            return;
        }
        let weak = self.downgrade();

        let interval = Duration::from_secs(self.config.token_refresh_interval_secs);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                if !manager.connection.is_connected() {
                    continue;
                }
                match manager.refresh_credentials().await {
                    Ok(()) => debug!("credentials refreshed"),
                    Err(e) => {
                        error!(error = %e, "credential refresh failed, forcing disconnect");
                        manager.notices.push(
                            NoticeSeverity::Warning,
                            "Telephony session expired; please reconnect",
                            manager.clock.now(),
                        );
                        // Disconnect aborts this task; run it detached
                        let detached = manager.clone();
                        tokio::spawn(async move {
                            let _ = detached.disconnect().await;
                        });
                        break;
                    }
                }
            }
        });
        if let Some(old) = self.tasks.refresh.lock().unwrap().replace(handle) {
            old.abort();
        }
    }

    /// Exchange the refresh token for a new access/refresh pair and re-persist
    pub(crate) async fn refresh_credentials(&self) -> ClientResult<()> {
        let Some(mut record) = self.connection.credentials() else {
            return Err(ClientError::NotLoggedIn);
        };
        let Some(refresh_token) = record.refresh_token.clone() else {
            return Ok(());
        };

        let bundle = self
            .api
            .refresh_token(&refresh_token)
            .await
            .map_err(|e| ClientError::TokenRefreshFailed {
                reason: e.to_string(),
            })?;

        record.access_token = bundle.access_token;
        // Keep the previous refresh token when the platform does not rotate it
        record.refresh_token = bundle.refresh_token.or(Some(refresh_token));
        record.expires_at =
            self.clock.now() + chrono::Duration::seconds(bundle.expires_in_secs as i64);

        self.vault.save(&record).await?;
        self.connection.set_credentials(Some(record));
        self.notifier.notify();
        Ok(())
    }

    /// Display fallback only: periodically re-notifies subscribers so expiry
    /// countdowns re-render without becoming a second source of truth
    fn spawn_display_ticker(&self) {
        let weak = self.downgrade();
        let interval = Duration::from_secs(self.config.display_refresh_interval_secs);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                manager.notifier.notify();
            }
        });
        if let Some(old) = self.tasks.ticker.lock().unwrap().replace(handle) {
            old.abort();
        }
    }

    /// Kick off transport-loss recovery; collapses concurrent triggers
    pub(crate) fn trigger_reconnect(&self, reason: &str) {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            debug!(reason, "reconnect already in progress");
            return;
        }
        let Some(manager) = self.upgrade() else {
            self.reconnecting.store(false, Ordering::SeqCst);
            return;
        };
        info!(reason, "scheduling transport reconnect");
        tokio::spawn(async move {
            manager.reconnect_loop().await;
            manager.reconnecting.store(false, Ordering::SeqCst);
        });
    }

    async fn reconnect_loop(&self) {
        let mut backoff = Backoff::new(self.config.reconnect_backoff.clone());
        while self.should_be_connected.load(Ordering::SeqCst) {
            let delay = backoff.next_delay();
            info!(delay_ms = delay.as_millis() as u64, "waiting before reconnect attempt");
            tokio::time::sleep(backoff.jittered(delay)).await;
            if !self.should_be_connected.load(Ordering::SeqCst) {
                break;
            }
            match self.reestablish().await {
                Ok(()) => {
                    info!("transport reconnected");
                    self.notices.push(
                        NoticeSeverity::Info,
                        "Reconnected to the telephony platform",
                        self.clock.now(),
                    );
                    // Bring answered calls back over the fresh transport
                    for session in self.registry.answered_sessions() {
                        if let Err(e) = session.reinvite().await {
                            warn!(
                                call_id = %session.id(),
                                error = %e,
                                "re-invite after reconnect failed"
                            );
                        }
                    }
                    return;
                }
                Err(e) => {
                    warn!(error = %e, category = e.category(), "reconnect attempt failed");
                }
            }
        }
        debug!("reconnect loop stopped");
    }

    /// Reprovision and restart the transport using the current credentials
    pub(crate) async fn reestablish(&self) -> ClientResult<()> {
        let Some(mut record) = self.connection.credentials() else {
            return Err(ClientError::NotLoggedIn);
        };
        self.connection.set_state(ConnectionState::Connecting);
        self.notifier.notify();

        match self.establish_transport(&mut record).await {
            Ok(()) => {
                self.vault.save(&record).await?;
                self.connection.set_credentials(Some(record));
                self.connection.set_state(ConnectionState::Connected);
                self.notifier.notify();
                Ok(())
            }
            Err(e) => {
                self.connection.set_state(ConnectionState::Disconnected);
                self.notifier.notify();
                Err(e)
            }
        }
    }
}
