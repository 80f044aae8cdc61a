//! Per-call session state machine
//!
//! One [`CallSession`] wraps each call attempt, inbound or outbound. Control
//! operations invoke the underlying transport primitive first and mutate local
//! state only on success; provider-pushed events are the authoritative source
//! of truth and may re-assert state over optimistic local updates. Transitions
//! are monotonic: once a session reaches `Ended` or `Failed` nothing moves it
//! again, and its duration is frozen.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::call::{CallDirection, CallId, CallSnapshot, CallState};
use crate::error::{ClientError, ClientResult};
use crate::events::{NoticeBoard, NoticeSeverity, Notifier};
use crate::provider::{Clock, TransportSlot};
use crate::registry::ActiveCallRegistry;

/// Hook invoked after every terminal transition, used by the composed store
/// to schedule the debounced call-history refresh
pub type AfterCallHook = Arc<dyn Fn() + Send + Sync>;

/// Shared collaborators a session needs to operate
#[derive(Clone)]
pub struct SessionContext {
    /// Slot resolving the currently live signaling transport
    pub transport: Arc<TransportSlot>,
    /// Wall clock
    pub clock: Arc<dyn Clock>,
    /// Listener notification channel
    pub notifier: Arc<Notifier>,
    /// Operator notice channel, when wired
    pub notices: Option<Arc<NoticeBoard>>,
    /// Registry owning this session until it terminates
    pub registry: Arc<ActiveCallRegistry>,
    /// Invoked once per terminal transition
    pub after_call: AfterCallHook,
}

/// Provider-pushed event for a single call
///
/// These always win over optimistic local updates; applying one to a session
/// already in a terminal state is a no-op.
#[derive(Debug, Clone)]
pub enum RemoteCallEvent {
    /// The call is ringing at the remote party
    Ringing,
    /// The call was answered
    Answered,
    /// The call ended normally
    Ended,
    /// The call failed
    Failed { reason: String },
    /// The call was put on hold
    Held,
    /// The call was resumed from hold
    Unheld,
}

struct SessionInner {
    state: CallState,
    start_time: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    duration_secs: u64,
    was_answered: bool,
    muted: bool,
    recording: bool,
    input_device: Option<String>,
    output_device: Option<String>,
}

/// A single call attempt and its control surface
pub struct CallSession {
    id: CallId,
    transport_id: String,
    direction: CallDirection,
    remote_number: String,
    display_name: Option<String>,
    created_at: DateTime<Utc>,
    context: SessionContext,
    inner: RwLock<SessionInner>,
}

impl CallSession {
    /// Create a session for an outbound call attempt
    pub fn outbound(
        transport_id: String,
        remote_number: String,
        display_name: Option<String>,
        context: SessionContext,
    ) -> Arc<Self> {
        Self::new(
            transport_id,
            CallDirection::Outbound,
            remote_number,
            display_name,
            CallState::Init,
            None,
            context,
        )
    }

    /// Create a session for a freshly delivered inbound call
    ///
    /// Inbound delivery stamps the start time; answering re-stamps it.
    pub fn inbound(
        transport_id: String,
        remote_number: String,
        display_name: Option<String>,
        context: SessionContext,
    ) -> Arc<Self> {
        let now = context.clock.now();
        Self::new(
            transport_id,
            CallDirection::Inbound,
            remote_number,
            display_name,
            CallState::Ringing,
            Some(now),
            context,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        transport_id: String,
        direction: CallDirection,
        remote_number: String,
        display_name: Option<String>,
        state: CallState,
        start_time: Option<DateTime<Utc>>,
        context: SessionContext,
    ) -> Arc<Self> {
        let created_at = context.clock.now();
        Arc::new(Self {
            id: Uuid::new_v4(),
            transport_id,
            direction,
            remote_number,
            display_name,
            created_at,
            context,
            inner: RwLock::new(SessionInner {
                state,
                start_time,
                ended_at: None,
                duration_secs: 0,
                was_answered: false,
                muted: false,
                recording: false,
                input_device: None,
                output_device: None,
            }),
        })
    }

    /// Unique call identifier
    pub fn id(&self) -> CallId {
        self.id
    }

    /// Transport-assigned call identifier
    pub fn transport_id(&self) -> &str {
        &self.transport_id
    }

    /// Direction of the call
    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    /// Remote party number
    pub fn remote_number(&self) -> &str {
        &self.remote_number
    }

    /// Current state
    pub fn state(&self) -> CallState {
        self.inner.read().unwrap().state
    }

    /// Point-in-time snapshot for subscribers
    pub fn snapshot(&self) -> CallSnapshot {
        let inner = self.inner.read().unwrap();
        CallSnapshot {
            call_id: self.id,
            transport_id: self.transport_id.clone(),
            direction: self.direction,
            remote_number: self.remote_number.clone(),
            display_name: self.display_name.clone(),
            state: inner.state,
            created_at: self.created_at,
            start_time: inner.start_time,
            ended_at: inner.ended_at,
            duration_secs: inner.duration_secs,
            muted: inner.muted,
            recording: inner.recording,
            input_device: inner.input_device.clone(),
            output_device: inner.output_device.clone(),
        }
    }

    // ===== CONTROL OPERATIONS =====

    /// Answer an inbound ringing call
    pub async fn answer(&self) -> ClientResult<()> {
        if self.direction != CallDirection::Inbound {
            return Err(ClientError::call_control_failed(
                "answer",
                "only inbound calls can be answered",
            ));
        }
        self.require_state("answer", &[CallState::Ringing])?;

        let transport = self.context.transport.get()?;
        transport
            .answer(&self.transport_id)
            .await
            .map_err(|e| self.control_failure("answer", e))?;

        {
            let mut inner = self.inner.write().unwrap();
            inner.state = CallState::Answered;
            inner.start_time = Some(self.context.clock.now());
            inner.was_answered = true;
        }
        info!(call_id = %self.id, "call answered");
        self.context.notifier.notify();
        Ok(())
    }

    /// Decline an inbound ringing call
    pub async fn decline(&self) -> ClientResult<()> {
        if self.direction != CallDirection::Inbound {
            return Err(ClientError::call_control_failed(
                "decline",
                "only inbound calls can be declined",
            ));
        }
        self.require_state("decline", &[CallState::Ringing])?;

        let transport = self.context.transport.get()?;
        transport
            .decline(&self.transport_id)
            .await
            .map_err(|e| self.control_failure("decline", e))?;

        info!(call_id = %self.id, "call declined");
        self.finish(CallState::Ended);
        Ok(())
    }

    /// Hang up the call
    pub async fn hangup(&self) -> ClientResult<()> {
        self.require_in_progress("hangup")?;

        let transport = self.context.transport.get()?;
        transport
            .hangup(&self.transport_id)
            .await
            .map_err(|e| self.control_failure("hangup", e))?;

        info!(call_id = %self.id, "call hung up");
        self.finish(CallState::Ended);
        Ok(())
    }

    /// Put the call on hold
    pub async fn hold(&self) -> ClientResult<()> {
        self.require_state("hold", &[CallState::Answered])?;

        let transport = self.context.transport.get()?;
        transport
            .hold(&self.transport_id)
            .await
            .map_err(|e| self.control_failure("hold", e))?;

        self.inner.write().unwrap().state = CallState::OnHold;
        info!(call_id = %self.id, "call placed on hold");
        self.context.notifier.notify();
        Ok(())
    }

    /// Resume the call from hold
    pub async fn unhold(&self) -> ClientResult<()> {
        self.require_state("unhold", &[CallState::OnHold])?;

        let transport = self.context.transport.get()?;
        transport
            .unhold(&self.transport_id)
            .await
            .map_err(|e| self.control_failure("unhold", e))?;

        self.inner.write().unwrap().state = CallState::Answered;
        info!(call_id = %self.id, "call resumed from hold");
        self.context.notifier.notify();
        Ok(())
    }

    /// Mute the microphone
    pub async fn mute(&self) -> ClientResult<()> {
        self.set_muted(true).await
    }

    /// Unmute the microphone
    pub async fn unmute(&self) -> ClientResult<()> {
        self.set_muted(false).await
    }

    async fn set_muted(&self, muted: bool) -> ClientResult<()> {
        let operation = if muted { "mute" } else { "unmute" };
        self.require_state(operation, &[CallState::Answered, CallState::OnHold])?;

        let transport = self.context.transport.get()?;
        transport
            .set_muted(&self.transport_id, muted)
            .await
            .map_err(|e| self.control_failure(operation, e))?;

        self.inner.write().unwrap().muted = muted;
        debug!(call_id = %self.id, muted, "microphone mute changed");
        self.context.notifier.notify();
        Ok(())
    }

    /// Send DTMF digits
    ///
    /// Digits are validated before touching the transport; valid characters
    /// are `0-9`, `A-D` (either case), `*` and `#`.
    pub async fn send_dtmf(&self, digits: &str) -> ClientResult<()> {
        self.require_state("dtmf", &[CallState::Answered])?;

        if digits.is_empty() {
            return Err(ClientError::InvalidConfiguration {
                field: "dtmf_digits".to_string(),
                reason: "DTMF digits cannot be empty".to_string(),
            });
        }
        for ch in digits.chars() {
            if !matches!(ch, '0'..='9' | 'A'..='D' | 'a'..='d' | '*' | '#') {
                return Err(ClientError::InvalidConfiguration {
                    field: "dtmf_digits".to_string(),
                    reason: format!("Invalid DTMF character: {}", ch),
                });
            }
        }

        let transport = self.context.transport.get()?;
        transport
            .send_dtmf(&self.transport_id, digits)
            .await
            .map_err(|e| self.control_failure("dtmf", e))?;

        info!(call_id = %self.id, digits, "sent DTMF");
        self.context.notifier.notify();
        Ok(())
    }

    /// Switch the audio input device
    pub async fn change_input_device(&self, device_id: &str) -> ClientResult<()> {
        self.require_state("change_input_device", &[CallState::Answered, CallState::OnHold])?;

        let transport = self.context.transport.get()?;
        transport
            .set_input_device(&self.transport_id, device_id)
            .await
            .map_err(|e| self.control_failure("change_input_device", e))?;

        self.inner.write().unwrap().input_device = Some(device_id.to_string());
        debug!(call_id = %self.id, device_id, "input device changed");
        self.context.notifier.notify();
        Ok(())
    }

    /// Switch the audio output device
    pub async fn change_output_device(&self, device_id: &str) -> ClientResult<()> {
        self.require_state("change_output_device", &[CallState::Answered, CallState::OnHold])?;

        let transport = self.context.transport.get()?;
        transport
            .set_output_device(&self.transport_id, device_id)
            .await
            .map_err(|e| self.control_failure("change_output_device", e))?;

        self.inner.write().unwrap().output_device = Some(device_id.to_string());
        debug!(call_id = %self.id, device_id, "output device changed");
        self.context.notifier.notify();
        Ok(())
    }

    /// Start recording the call
    pub async fn start_recording(&self) -> ClientResult<()> {
        self.set_recording(true).await
    }

    /// Stop recording the call
    pub async fn stop_recording(&self) -> ClientResult<()> {
        self.set_recording(false).await
    }

    async fn set_recording(&self, recording: bool) -> ClientResult<()> {
        let operation = if recording { "start_recording" } else { "stop_recording" };
        self.require_state(operation, &[CallState::Answered, CallState::OnHold])?;

        let transport = self.context.transport.get()?;
        transport
            .set_recording(&self.transport_id, recording)
            .await
            .map_err(|e| self.control_failure(operation, e))?;

        self.inner.write().unwrap().recording = recording;
        info!(call_id = %self.id, recording, "recording state changed");
        self.context.notifier.notify();
        Ok(())
    }

    /// Re-invite the call over a restarted transport, best-effort
    pub(crate) async fn reinvite(&self) -> ClientResult<()> {
        let transport = self.context.transport.get()?;
        transport
            .reinvite(&self.transport_id)
            .await
            .map_err(|e| self.control_failure("reinvite", e))
    }

    // ===== PROVIDER EVENTS =====

    /// Apply a provider-pushed event
    ///
    /// The provider is authoritative: the event re-asserts state even when a
    /// local optimistic update already moved it. Events against a terminal
    /// session are no-ops.
    pub fn apply_remote(&self, event: RemoteCallEvent) {
        let changed = match event {
            RemoteCallEvent::Ringing => {
                let mut inner = self.inner.write().unwrap();
                if inner.state == CallState::Init {
                    inner.state = CallState::Ringing;
                    true
                } else {
                    false
                }
            }
            RemoteCallEvent::Answered => {
                let mut inner = self.inner.write().unwrap();
                if inner.state.is_terminal() {
                    false
                } else {
                    let now = self.context.clock.now();
                    if inner.start_time.is_none() {
                        inner.start_time = Some(now);
                    }
                    inner.was_answered = true;
                    let changed = inner.state != CallState::Answered;
                    inner.state = CallState::Answered;
                    changed
                }
            }
            RemoteCallEvent::Held => {
                let mut inner = self.inner.write().unwrap();
                if inner.state.is_terminal() || inner.state == CallState::OnHold {
                    false
                } else {
                    inner.state = CallState::OnHold;
                    true
                }
            }
            RemoteCallEvent::Unheld => {
                let mut inner = self.inner.write().unwrap();
                if inner.state == CallState::OnHold {
                    inner.state = CallState::Answered;
                    true
                } else {
                    false
                }
            }
            RemoteCallEvent::Ended => {
                debug!(call_id = %self.id, "provider reported call ended");
                return self.finish_and_forget(CallState::Ended);
            }
            RemoteCallEvent::Failed { reason } => {
                warn!(call_id = %self.id, reason = %reason, "provider reported call failure");
                if let Some(notices) = &self.context.notices {
                    notices.push(
                        NoticeSeverity::Warning,
                        format!("Call with {} failed: {}", self.remote_number, reason),
                        self.context.clock.now(),
                    );
                }
                return self.finish_and_forget(CallState::Failed);
            }
        };

        if changed {
            debug!(call_id = %self.id, state = %self.state(), "provider event applied");
            self.context.notifier.notify();
        }
    }

    fn finish_and_forget(&self, final_state: CallState) {
        self.finish(final_state);
    }

    /// Drive the session into a terminal state
    ///
    /// Idempotent: the second of two racing terminal transitions (e.g. a local
    /// hangup and a provider `Ended`) is a no-op. Stamps the end time, freezes
    /// the duration, removes the session from the registry (which notifies
    /// subscribers synchronously), and fires the after-call hook.
    fn finish(&self, final_state: CallState) -> bool {
        {
            let mut inner = self.inner.write().unwrap();
            if inner.state.is_terminal() {
                return false;
            }
            let now = self.context.clock.now();
            inner.state = final_state;
            inner.ended_at = Some(now);
            inner.duration_secs = if inner.was_answered {
                inner
                    .start_time
                    .map(|start| (now - start).num_seconds().max(0) as u64)
                    .unwrap_or(0)
            } else {
                0
            };
        }
        info!(call_id = %self.id, state = %final_state, "call reached terminal state");

        if !self.context.registry.remove(&self.id) {
            // Not in the registry (already detached); still tell subscribers
            self.context.notifier.notify();
        }
        (self.context.after_call)();
        true
    }

    // ===== GUARDS =====

    fn require_in_progress(&self, operation: &str) -> ClientResult<()> {
        let state = self.state();
        if state.is_terminal() {
            debug!(call_id = %self.id, operation, %state, "operation rejected in terminal state");
            return Err(ClientError::InvalidCallState {
                call_id: self.id,
                current_state: state,
            });
        }
        Ok(())
    }

    fn require_state(&self, operation: &str, allowed: &[CallState]) -> ClientResult<()> {
        let state = self.state();
        if !allowed.contains(&state) {
            debug!(call_id = %self.id, operation, %state, "operation rejected in current state");
            return Err(ClientError::InvalidCallState {
                call_id: self.id,
                current_state: state,
            });
        }
        Ok(())
    }

    fn control_failure(&self, operation: &str, error: ClientError) -> ClientError {
        warn!(
            call_id = %self.id,
            operation,
            error = %error,
            category = error.category(),
            "call control operation failed"
        );
        if let Some(notices) = &self.context.notices {
            notices.push(
                NoticeSeverity::Error,
                format!("Call operation '{}' failed: {}", operation, error),
                self.context.clock.now(),
            );
        }
        ClientError::call_control_failed(operation, error.to_string())
    }
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("id", &self.id)
            .field("transport_id", &self.transport_id)
            .field("direction", &self.direction)
            .field("remote_number", &self.remote_number)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct MockTransport {
        fail: AtomicBool,
        ops: Mutex<Vec<String>>,
    }

    impl MockTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                fail: AtomicBool::new(false),
                ops: Mutex::new(Vec::new()),
            })
        }

        fn record(&self, op: &str) -> ClientResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ClientError::transport_failed("injected failure"));
            }
            self.ops.lock().unwrap().push(op.to_string());
            Ok(())
        }

        fn ops(&self) -> Vec<String> {
            self.ops.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl crate::provider::SignalingTransport for MockTransport {
        async fn start(&self) -> ClientResult<()> {
            self.record("start")
        }
        async fn dispose(&self) -> ClientResult<()> {
            self.record("dispose")
        }
        async fn place_call(&self, _number: &str, _caller_id: Option<&str>) -> ClientResult<String> {
            self.record("place_call")?;
            Ok("tp-out".to_string())
        }
        async fn answer(&self, _id: &str) -> ClientResult<()> {
            self.record("answer")
        }
        async fn decline(&self, _id: &str) -> ClientResult<()> {
            self.record("decline")
        }
        async fn hangup(&self, _id: &str) -> ClientResult<()> {
            self.record("hangup")
        }
        async fn hold(&self, _id: &str) -> ClientResult<()> {
            self.record("hold")
        }
        async fn unhold(&self, _id: &str) -> ClientResult<()> {
            self.record("unhold")
        }
        async fn set_muted(&self, _id: &str, muted: bool) -> ClientResult<()> {
            self.record(if muted { "mute" } else { "unmute" })
        }
        async fn send_dtmf(&self, _id: &str, _digits: &str) -> ClientResult<()> {
            self.record("dtmf")
        }
        async fn set_input_device(&self, _id: &str, _device: &str) -> ClientResult<()> {
            self.record("input_device")
        }
        async fn set_output_device(&self, _id: &str, _device: &str) -> ClientResult<()> {
            self.record("output_device")
        }
        async fn set_recording(&self, _id: &str, recording: bool) -> ClientResult<()> {
            self.record(if recording { "record_on" } else { "record_off" })
        }
        async fn reinvite(&self, _id: &str) -> ClientResult<()> {
            self.record("reinvite")
        }
    }

    struct StepClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl StepClock {
        fn new(start: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(start),
            })
        }

        fn advance(&self, secs: i64) {
            let mut now = self.now.lock().unwrap();
            *now += chrono::Duration::seconds(secs);
        }
    }

    impl Clock for StepClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }
    }

    struct Fixture {
        transport: Arc<MockTransport>,
        clock: Arc<StepClock>,
        registry: Arc<ActiveCallRegistry>,
        context: SessionContext,
        after_calls: Arc<AtomicUsize>,
    }

    fn fixture() -> Fixture {
        let notifier = Arc::new(Notifier::new());
        let transport = MockTransport::new();
        let slot = Arc::new(TransportSlot::new());
        slot.set(transport.clone());
        let clock = StepClock::new(Utc::now());
        let registry = Arc::new(ActiveCallRegistry::new(notifier.clone()));
        let after_calls = Arc::new(AtomicUsize::new(0));
        let after_clone = after_calls.clone();
        let context = SessionContext {
            transport: slot,
            clock: clock.clone(),
            notifier,
            notices: None,
            registry: registry.clone(),
            after_call: Arc::new(move || {
                after_clone.fetch_add(1, Ordering::SeqCst);
            }),
        };
        Fixture {
            transport,
            clock,
            registry,
            context,
            after_calls,
        }
    }

    #[tokio::test]
    async fn inbound_answer_stamps_start_time() {
        let f = fixture();
        let session = CallSession::inbound(
            "tp-1".to_string(),
            "+15550111".to_string(),
            Some("Alice".to_string()),
            f.context.clone(),
        );
        f.registry.add(session.clone());

        assert_eq!(session.state(), CallState::Ringing);
        assert!(session.snapshot().start_time.is_some());

        f.clock.advance(5);
        session.answer().await.unwrap();

        let snap = session.snapshot();
        assert_eq!(snap.state, CallState::Answered);
        assert_eq!(snap.start_time, Some(f.clock.now()));
        assert_eq!(f.transport.ops(), vec!["answer"]);
    }

    #[tokio::test]
    async fn hangup_freezes_duration_and_leaves_registry() {
        let f = fixture();
        let session = CallSession::inbound(
            "tp-1".to_string(),
            "+15550111".to_string(),
            None,
            f.context.clone(),
        );
        f.registry.add(session.clone());

        session.answer().await.unwrap();
        f.clock.advance(42);
        session.hangup().await.unwrap();

        let snap = session.snapshot();
        assert_eq!(snap.state, CallState::Ended);
        assert_eq!(snap.duration_secs, 42);
        assert!(f.registry.is_empty());
        assert_eq!(f.after_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn declined_call_has_zero_duration() {
        let f = fixture();
        let session = CallSession::inbound(
            "tp-1".to_string(),
            "+15550111".to_string(),
            None,
            f.context.clone(),
        );
        f.registry.add(session.clone());

        f.clock.advance(10);
        session.decline().await.unwrap();

        let snap = session.snapshot();
        assert_eq!(snap.state, CallState::Ended);
        assert_eq!(snap.duration_secs, 0);
    }

    #[tokio::test]
    async fn terminal_state_absorbs_everything() {
        let f = fixture();
        let session = CallSession::inbound(
            "tp-1".to_string(),
            "+15550111".to_string(),
            None,
            f.context.clone(),
        );
        f.registry.add(session.clone());

        session.answer().await.unwrap();
        f.clock.advance(7);
        session.hangup().await.unwrap();
        let ended_at = session.snapshot().ended_at;

        // Racing provider event is a no-op
        f.clock.advance(100);
        session.apply_remote(RemoteCallEvent::Ended);
        session.apply_remote(RemoteCallEvent::Answered);

        let snap = session.snapshot();
        assert_eq!(snap.state, CallState::Ended);
        assert_eq!(snap.ended_at, ended_at);
        assert_eq!(snap.duration_secs, 7);
        assert_eq!(f.after_calls.load(Ordering::SeqCst), 1);

        // Further control operations are rejected
        let err = session.hold().await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidCallState { .. }));
    }

    #[tokio::test]
    async fn control_failure_leaves_state_unchanged() {
        let f = fixture();
        let session = CallSession::inbound(
            "tp-1".to_string(),
            "+15550111".to_string(),
            None,
            f.context.clone(),
        );
        f.registry.add(session.clone());
        session.answer().await.unwrap();

        f.transport.fail.store(true, Ordering::SeqCst);
        let err = session.hold().await.unwrap_err();
        assert!(matches!(err, ClientError::CallControlFailed { .. }));
        assert_eq!(session.state(), CallState::Answered);

        f.transport.fail.store(false, Ordering::SeqCst);
        session.hold().await.unwrap();
        assert_eq!(session.state(), CallState::OnHold);
    }

    #[tokio::test]
    async fn dtmf_validation_rejects_before_transport() {
        let f = fixture();
        let session = CallSession::inbound(
            "tp-1".to_string(),
            "+15550111".to_string(),
            None,
            f.context.clone(),
        );
        f.registry.add(session.clone());
        session.answer().await.unwrap();

        assert!(session.send_dtmf("12!").await.is_err());
        assert!(session.send_dtmf("").await.is_err());
        assert!(!f.transport.ops().contains(&"dtmf".to_string()));

        session.send_dtmf("123#*A").await.unwrap();
        assert!(f.transport.ops().contains(&"dtmf".to_string()));
    }

    #[tokio::test]
    async fn provider_events_are_authoritative() {
        let f = fixture();
        let session = CallSession::outbound(
            "tp-2".to_string(),
            "+15550222".to_string(),
            None,
            f.context.clone(),
        );
        f.registry.add(session.clone());
        assert_eq!(session.state(), CallState::Init);

        session.apply_remote(RemoteCallEvent::Ringing);
        assert_eq!(session.state(), CallState::Ringing);

        session.apply_remote(RemoteCallEvent::Answered);
        let snap = session.snapshot();
        assert_eq!(snap.state, CallState::Answered);
        assert!(snap.start_time.is_some());

        session.apply_remote(RemoteCallEvent::Held);
        assert_eq!(session.state(), CallState::OnHold);
        session.apply_remote(RemoteCallEvent::Unheld);
        assert_eq!(session.state(), CallState::Answered);

        f.clock.advance(3);
        session.apply_remote(RemoteCallEvent::Failed {
            reason: "486 Busy Here".to_string(),
        });
        let snap = session.snapshot();
        assert_eq!(snap.state, CallState::Failed);
        assert_eq!(snap.duration_secs, 3);
        assert!(f.registry.is_empty());
    }

    #[tokio::test]
    async fn mute_and_devices_track_flags() {
        let f = fixture();
        let session = CallSession::inbound(
            "tp-1".to_string(),
            "+15550111".to_string(),
            None,
            f.context.clone(),
        );
        f.registry.add(session.clone());
        session.answer().await.unwrap();

        session.mute().await.unwrap();
        assert!(session.snapshot().muted);
        session.unmute().await.unwrap();
        assert!(!session.snapshot().muted);

        session.change_input_device("mic-2").await.unwrap();
        session.change_output_device("spk-3").await.unwrap();
        session.start_recording().await.unwrap();

        let snap = session.snapshot();
        assert_eq!(snap.input_device.as_deref(), Some("mic-2"));
        assert_eq!(snap.output_device.as_deref(), Some("spk-3"));
        assert!(snap.recording);
    }
}
