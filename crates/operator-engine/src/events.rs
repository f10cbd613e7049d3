//! Event types for streaming engine state changes
//!
//! The engine publishes every externally visible mutation and every run
//! lifecycle transition to a single [`EventSink`]. Consumers (GUI panels,
//! schedulers, loggers) fan events out on their side; the engine does not
//! track individual observers.

use serde::{Deserialize, Serialize};

use crate::driver::BreakpointSite;

/// Trait for sending engine events
///
/// This abstracts over the transport mechanism (UI channel, mpsc, etc.)
/// allowing the engine to be used in different contexts.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be delivered (e.g., channel
    /// closed). The engine ignores delivery failures.
    fn send(&self, event: EngineEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    /// A run started
    #[serde(rename_all = "camelCase")]
    ProcessStarted { execution_id: String },

    /// A run completed successfully
    #[serde(rename_all = "camelCase")]
    ProcessCompleted { execution_id: String },

    /// A run was stopped on request
    #[serde(rename_all = "camelCase")]
    ProcessStopped { execution_id: String },

    /// A run failed with a domain error
    #[serde(rename_all = "camelCase")]
    ProcessFailed {
        execution_id: String,
        operator: String,
        error: String,
    },

    /// The driver suspended on a pause request
    #[serde(rename_all = "camelCase")]
    ProcessPaused { execution_id: String },

    /// The driver resumed after a pause or breakpoint
    #[serde(rename_all = "camelCase")]
    ProcessResumed { execution_id: String },

    /// An operator began executing
    #[serde(rename_all = "camelCase")]
    OperatorStarted {
        operator: String,
        execution_id: String,
    },

    /// An operator finished executing
    #[serde(rename_all = "camelCase")]
    OperatorCompleted {
        operator: String,
        execution_id: String,
        apply_count: u64,
    },

    /// An operator was skipped (disabled, or clean in only-dirty mode)
    #[serde(rename_all = "camelCase")]
    OperatorSkipped {
        operator: String,
        execution_id: String,
    },

    /// The driver suspended on a breakpoint
    #[serde(rename_all = "camelCase")]
    BreakpointReached {
        operator: String,
        execution_id: String,
        site: BreakpointSite,
    },

    /// An operator was renamed
    #[serde(rename_all = "camelCase")]
    OperatorRenamed { from: String, to: String },

    /// An operator was enabled or disabled
    #[serde(rename_all = "camelCase")]
    EnabledChanged { operator: String, enabled: bool },

    /// A breakpoint flag was set or cleared
    #[serde(rename_all = "camelCase")]
    BreakpointChanged {
        operator: String,
        site: BreakpointSite,
        set: bool,
    },

    /// An operator's dirty flag changed
    #[serde(rename_all = "camelCase")]
    DirtyChanged { operator: String, dirty: bool },
}

/// A no-op event sink that discards all events
///
/// Useful for testing or when events aren't needed.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: EngineEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: std::sync::Mutex<Vec<EngineEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: EngineEvent) -> Result<(), EventError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_event_sink() {
        let sink = VecEventSink::new();

        sink.send(EngineEvent::DirtyChanged {
            operator: "filter".to_string(),
            dirty: true,
        })
        .unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 1);

        match &events[0] {
            EngineEvent::DirtyChanged { operator, dirty } => {
                assert_eq!(operator, "filter");
                assert!(dirty);
            }
            _ => panic!("Expected DirtyChanged event"),
        }
    }

    #[test]
    fn test_null_event_sink() {
        let sink = NullEventSink;
        // Should not panic
        sink.send(EngineEvent::ProcessStarted {
            execution_id: "exec-1".to_string(),
        })
        .unwrap();
    }
}
