//! Bounded temporal event log.
//!
//! Backs the `recent` and `within` condition operators. The log is bounded
//! both by entry count and by age; both limits are enforced on every push,
//! so memory stays flat no matter how chatty the sensor layer is.
//!
//! Timestamps are readings of the same injected monotonic clock the engine
//! uses. The buffer assumes pushes arrive in timestamp order; callers
//! mixing clock sources get undefined expiry behavior.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::context::ContextMap;

/// Maximum age of a buffered event: 24 hours.
pub const MAX_EVENT_AGE_MS: i64 = 24 * 60 * 60 * 1000;

/// Default capacity of the event buffer.
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// A timestamped context event pushed by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextEvent {
    pub event_type: String,
    /// Monotonic timestamp of the event, in milliseconds.
    pub timestamp_ms: i64,
    /// Context snapshot captured alongside the event.
    #[serde(default)]
    pub context: ContextMap,
}

impl ContextEvent {
    /// Build an event with an empty context snapshot.
    pub fn new(event_type: impl Into<String>, timestamp_ms: i64) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp_ms,
            context: ContextMap::new(),
        }
    }
}

/// Thread-safe bounded log of recent context events.
pub struct EventBuffer {
    clock: Arc<dyn Clock>,
    max_size: usize,
    events: Mutex<VecDeque<ContextEvent>>,
}

impl EventBuffer {
    /// Create a buffer holding at most `max_size` events.
    pub fn new(clock: Arc<dyn Clock>, max_size: usize) -> Self {
        Self {
            clock,
            max_size: max_size.max(1),
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Append an event, expiring aged entries and evicting the oldest if
    /// the buffer is full.
    pub fn push(&self, event: ContextEvent) {
        let cutoff = self.clock.now_ms() - MAX_EVENT_AGE_MS;
        let mut events = self.events.lock();
        while events.front().is_some_and(|e| e.timestamp_ms < cutoff) {
            events.pop_front();
        }
        if events.len() >= self.max_size {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Whether an event of `event_type` occurred within the last
    /// `within_ms` milliseconds.
    pub fn has_recent(&self, event_type: &str, within_ms: i64) -> bool {
        let cutoff = self.clock.now_ms() - within_ms;
        let events = self.events.lock();
        for event in events.iter().rev() {
            if event.timestamp_ms < cutoff {
                break;
            }
            if event.event_type == event_type {
                return true;
            }
        }
        false
    }

    /// Whether an event of type `first` preceded the newest event of type
    /// `second`, both within the last `within_ms` milliseconds.
    pub fn has_sequence(&self, first: &str, second: &str, within_ms: i64) -> bool {
        let cutoff = self.clock.now_ms() - within_ms;
        let events = self.events.lock();

        let mut second_at = None;
        for event in events.iter().rev() {
            if event.timestamp_ms < cutoff {
                break;
            }
            if event.event_type == second {
                second_at = Some(event.timestamp_ms);
                break;
            }
        }
        let Some(second_at) = second_at else {
            return false;
        };

        events
            .iter()
            .rev()
            .take_while(|e| e.timestamp_ms >= cutoff)
            .any(|e| e.event_type == first && e.timestamp_ms < second_at)
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether the buffer holds no events.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn buffer(start_ms: i64, max_size: usize) -> (Arc<ManualClock>, EventBuffer) {
        let clock = Arc::new(ManualClock::new(start_ms));
        let buf = EventBuffer::new(clock.clone(), max_size);
        (clock, buf)
    }

    #[test]
    fn test_capacity_bound_evicts_oldest() {
        let (_, buf) = buffer(0, 3);
        for i in 0..5 {
            buf.push(ContextEvent::new(format!("e{i}"), i));
        }
        assert_eq!(buf.len(), 3);
        assert!(!buf.has_recent("e0", 1_000));
        assert!(!buf.has_recent("e1", 1_000));
        assert!(buf.has_recent("e4", 1_000));
    }

    #[test]
    fn test_age_bound_expires_on_push() {
        let (clock, buf) = buffer(0, 10);
        buf.push(ContextEvent::new("old", 0));
        clock.set(MAX_EVENT_AGE_MS + 1);
        buf.push(ContextEvent::new("fresh", MAX_EVENT_AGE_MS + 1));
        assert_eq!(buf.len(), 1);
        assert!(buf.has_recent("fresh", 1_000));
    }

    #[test]
    fn test_has_recent_respects_window() {
        let (clock, buf) = buffer(0, 10);
        buf.push(ContextEvent::new("geofence_enter", 1_000));
        clock.set(5_000);
        assert!(buf.has_recent("geofence_enter", 5_000));
        assert!(!buf.has_recent("geofence_enter", 3_000));
        assert!(!buf.has_recent("geofence_exit", 5_000));
    }

    #[test]
    fn test_has_sequence_requires_order() {
        let (clock, buf) = buffer(0, 10);
        buf.push(ContextEvent::new("geofence_enter", 1_000));
        buf.push(ContextEvent::new("app_open", 2_000));
        clock.set(3_000);
        assert!(buf.has_sequence("geofence_enter", "app_open", 5_000));
        // The reverse order never happened.
        assert!(!buf.has_sequence("app_open", "geofence_enter", 5_000));
    }

    #[test]
    fn test_has_sequence_window_expiry() {
        let (clock, buf) = buffer(0, 10);
        buf.push(ContextEvent::new("geofence_enter", 1_000));
        buf.push(ContextEvent::new("app_open", 2_000));
        clock.set(7_000);
        // window cutoff is 2000: the opening event has aged out
        assert!(!buf.has_sequence("geofence_enter", "app_open", 5_000));
    }

    #[test]
    fn test_sequence_uses_newest_second_event() {
        let (clock, buf) = buffer(0, 10);
        buf.push(ContextEvent::new("app_open", 500));
        buf.push(ContextEvent::new("geofence_enter", 1_000));
        buf.push(ContextEvent::new("app_open", 2_000));
        clock.set(2_500);
        // Newest app_open is at 2000, after geofence_enter at 1000.
        assert!(buf.has_sequence("geofence_enter", "app_open", 5_000));
    }

    #[test]
    fn test_event_json_shape() {
        let mut event = ContextEvent::new("app_open", 42);
        event
            .context
            .insert("motionState".to_string(), "walking".to_string());
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""eventType":"app_open""#));
        assert!(json.contains(r#""timestampMs":42"#));
        let back: ContextEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type, "app_open");
    }
}
