//! Monitor output surface
//!
//! The UI / alerting layer is an external collaborator. It receives distance
//! updates, merged posture updates, alert actions and non-fatal errors
//! through [`MonitorListener`].

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::alert::AlertAction;
use crate::types::{Distance, FrameTimestamp, IssueSet};

/// Callbacks for the UI / alerting layer.
///
/// Callbacks run inside the monitor's critical section, in frame-timestamp
/// order. They must not call back into the monitor.
pub trait MonitorListener: Send + Sync {
    /// Distance estimate for one face-stream frame
    fn on_distance_update(&self, timestamp: FrameTimestamp, distance: Distance);

    /// Merged issue set for one completed round (empty set means no issues)
    fn on_posture_update(&self, timestamp: FrameTimestamp, issues: &IssueSet);

    /// Overlay or notification instruction from the alert policy
    fn on_alert(&self, action: &AlertAction);

    /// Detector setup or per-frame failure; monitoring continues
    fn on_error(&self, message: &str, code: i32);
}

/// One observable monitor output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    Distance {
        timestamp: FrameTimestamp,
        distance_cm: Distance,
    },
    Posture {
        timestamp: FrameTimestamp,
        issues: IssueSet,
    },
    Alert {
        #[serde(flatten)]
        action: AlertAction,
    },
    Error {
        message: String,
        code: i32,
    },
}

/// Listener that records events for later draining
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Mutex<Vec<MonitorEvent>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take all recorded events, oldest first
    pub fn drain(&self) -> Vec<MonitorEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    fn push(&self, event: MonitorEvent) {
        self.events.lock().push(event);
    }
}

impl MonitorListener for EventQueue {
    fn on_distance_update(&self, timestamp: FrameTimestamp, distance: Distance) {
        self.push(MonitorEvent::Distance {
            timestamp,
            distance_cm: distance,
        });
    }

    fn on_posture_update(&self, timestamp: FrameTimestamp, issues: &IssueSet) {
        self.push(MonitorEvent::Posture {
            timestamp,
            issues: issues.clone(),
        });
    }

    fn on_alert(&self, action: &AlertAction) {
        self.push(MonitorEvent::Alert {
            action: action.clone(),
        });
    }

    fn on_error(&self, message: &str, code: i32) {
        self.push(MonitorEvent::Error {
            message: message.to_string(),
            code,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PostureIssue;

    #[test]
    fn test_event_queue_drains_in_order() {
        let queue = EventQueue::new();
        queue.on_distance_update(FrameTimestamp(1), Distance::Measured(50.0));
        queue.on_posture_update(FrameTimestamp(1), &IssueSet::from([PostureIssue::HeadTilt]));
        queue.on_error("face detection failed", 4);

        let events = queue.drain();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], MonitorEvent::Distance { .. }));
        assert!(matches!(events[2], MonitorEvent::Error { code: 4, .. }));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_event_json_shape() {
        let event = MonitorEvent::Alert {
            action: AlertAction::HideOverlay { fade_ms: 300 },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "alert");
        assert_eq!(value["action"], "hide_overlay");
        assert_eq!(value["fade_ms"], 300);

        let event = MonitorEvent::Distance {
            timestamp: FrameTimestamp(7),
            distance_cm: Distance::Indeterminate,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["timestamp"], 7);
        assert!(value["distance_cm"].is_null());
    }
}
