//! Call types for the softphone client
//!
//! This module provides the call state machine vocabulary and the snapshot
//! structures handed to subscribers. The live per-call object lives in
//! [`crate::session`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a call
pub type CallId = Uuid;

/// Current state of a call
///
/// Transitions are monotonic along
/// `Init -> Ringing -> Answered <-> OnHold -> Ended`, with `Failed` reachable
/// from any non-terminal state. `Ended` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    /// Call attempt created, nothing confirmed by the platform yet
    Init,
    /// Ringing at the remote party, or an inbound call awaiting a decision
    Ringing,
    /// Call is established and media is flowing
    Answered,
    /// Call is established but parked on hold
    OnHold,
    /// Call completed normally
    Ended,
    /// Call failed to establish or was torn down by the platform
    Failed,
}

impl CallState {
    /// Check if the call has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended | CallState::Failed)
    }

    /// Check if the call is still in progress
    pub fn is_in_progress(&self) -> bool {
        !self.is_terminal()
    }

    /// Check if the call is established (answered or on hold)
    pub fn is_established(&self) -> bool {
        matches!(self, CallState::Answered | CallState::OnHold)
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallState::Init => write!(f, "Init"),
            CallState::Ringing => write!(f, "Ringing"),
            CallState::Answered => write!(f, "Answered"),
            CallState::OnHold => write!(f, "OnHold"),
            CallState::Ended => write!(f, "Ended"),
            CallState::Failed => write!(f, "Failed"),
        }
    }
}

/// Direction of a call (from the client's perspective)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallDirection {
    /// Outbound call (client initiated)
    Outbound,
    /// Inbound call (received from the platform)
    Inbound,
}

/// Point-in-time view of a call session
///
/// Subscribers re-read these snapshots after each notification; they are plain
/// values with no live binding to the underlying session.
#[derive(Debug, Clone)]
pub struct CallSnapshot {
    /// Unique call identifier
    pub call_id: CallId,
    /// Transport-level identifier assigned by the signaling layer
    pub transport_id: String,
    /// Direction of the call
    pub direction: CallDirection,
    /// Remote party number
    pub remote_number: String,
    /// Display name of the remote party (if resolved)
    pub display_name: Option<String>,
    /// Current state of the call
    pub state: CallState,
    /// When the call attempt was created
    pub created_at: DateTime<Utc>,
    /// When the call started (inbound delivery, re-stamped on answer)
    pub start_time: Option<DateTime<Utc>>,
    /// When the call reached a terminal state
    pub ended_at: Option<DateTime<Utc>>,
    /// Call duration in whole seconds, zero if never answered
    pub duration_secs: u64,
    /// Whether the microphone is muted
    pub muted: bool,
    /// Whether recording is active
    pub recording: bool,
    /// Selected audio input device (if changed from default)
    pub input_device: Option<String>,
    /// Selected audio output device (if changed from default)
    pub output_device: Option<String>,
}

impl CallSnapshot {
    /// Whether the call is currently on hold
    pub fn on_hold(&self) -> bool {
        self.state == CallState::OnHold
    }
}
