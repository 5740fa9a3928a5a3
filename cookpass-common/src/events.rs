//! Event types for the cookpass session event system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Why a cooker was excluded from a processing session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisableReason {
    /// The dependency graph needs more passes than the source allows
    PassBudgetExceeded {
        /// Passes the full schedule would need
        required: usize,
        /// Passes the source (or configuration) allows
        allowed: usize,
    },
}

impl fmt::Display for DisableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisableReason::PassBudgetExceeded { required, allowed } => write!(
                f,
                "pass budget exceeded ({} passes required, {} allowed)",
                required, allowed
            ),
        }
    }
}

/// Session lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// A processing session started scheduling
    SessionStarted {
        session_id: Uuid,
        cooker_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Scheduling finished; `pass_count` passes will execute
    ScheduleComputed {
        session_id: Uuid,
        pass_count: usize,
        disabled_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A cooker will not run in this session
    CookerDisabled {
        session_id: Uuid,
        cooker: String,
        reason: DisableReason,
        timestamp: DateTime<Utc>,
    },

    /// A pass activated its cookers and is about to read the source
    PassStarted {
        session_id: Uuid,
        pass: usize,
        total_passes: usize,
        cookers: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// A pass finished and its cookers published their output
    PassCompleted {
        session_id: Uuid,
        pass: usize,
        total_passes: usize,
        elements_delivered: u64,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// All scheduled passes ran to completion
    SessionCompleted {
        session_id: Uuid,
        passes_executed: usize,
        timestamp: DateTime<Utc>,
    },

    /// Cancellation stopped the session
    SessionCancelled {
        session_id: Uuid,
        pass: Option<usize>,
        timestamp: DateTime<Utc>,
    },

    /// A configuration fault, hook failure or reader fault stopped the session
    SessionFailed {
        session_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl SessionEvent {
    /// Session the event belongs to
    pub fn session_id(&self) -> Uuid {
        match self {
            SessionEvent::SessionStarted { session_id, .. }
            | SessionEvent::ScheduleComputed { session_id, .. }
            | SessionEvent::CookerDisabled { session_id, .. }
            | SessionEvent::PassStarted { session_id, .. }
            | SessionEvent::PassCompleted { session_id, .. }
            | SessionEvent::SessionCompleted { session_id, .. }
            | SessionEvent::SessionCancelled { session_id, .. }
            | SessionEvent::SessionFailed { session_id, .. } => *session_id,
        }
    }

    /// Short event name for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::SessionStarted { .. } => "SessionStarted",
            SessionEvent::ScheduleComputed { .. } => "ScheduleComputed",
            SessionEvent::CookerDisabled { .. } => "CookerDisabled",
            SessionEvent::PassStarted { .. } => "PassStarted",
            SessionEvent::PassCompleted { .. } => "PassCompleted",
            SessionEvent::SessionCompleted { .. } => "SessionCompleted",
            SessionEvent::SessionCancelled { .. } => "SessionCancelled",
            SessionEvent::SessionFailed { .. } => "SessionFailed",
        }
    }
}

/// Broadcast bus for session events
///
/// Cloning the bus shares the underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero (see `tokio::sync::broadcast::channel`).
    ///
    /// # Examples
    ///
    /// ```
    /// use cookpass_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
