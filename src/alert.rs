//! Alert policy
//!
//! Two independent policies drive the user-facing state:
//! - proximity: show the dimming overlay (with a one-shot high-priority
//!   notification) while the viewer is too close, hide it once they back off
//! - posture: notify once per rising edge of each issue in the merged set

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AlertConfig;
use crate::types::{Distance, FrameTimestamp, IssueSet, PostureIssue};

pub const PROXIMITY_TITLE: &str = "Too close";
pub const PROXIMITY_BODY: &str =
    "Keep a comfortable distance from the screen to protect your eyes.";
pub const POSTURE_TITLE: &str = "Posture reminder";

/// Overlay visibility
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayState {
    #[default]
    Hidden,
    Shown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Default,
    High,
}

/// What a notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "issue", rename_all = "snake_case")]
pub enum NotificationKind {
    Proximity,
    Posture(PostureIssue),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub priority: NotificationPriority,
}

impl Notification {
    fn proximity() -> Self {
        Self {
            kind: NotificationKind::Proximity,
            title: PROXIMITY_TITLE.to_string(),
            body: PROXIMITY_BODY.to_string(),
            priority: NotificationPriority::High,
        }
    }

    fn posture(issue: PostureIssue) -> Self {
        Self {
            kind: NotificationKind::Posture(issue),
            title: POSTURE_TITLE.to_string(),
            body: issue.message().to_string(),
            priority: NotificationPriority::Default,
        }
    }
}

/// Instruction for the external overlay / notification collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AlertAction {
    ShowOverlay { opacity: f64, fade_ms: u64 },
    HideOverlay { fade_ms: u64 },
    Notify(Notification),
}

/// Threshold / edge-trigger state machine owning the alert state
#[derive(Debug, Clone)]
pub struct AlertPolicy {
    config: AlertConfig,
    overlay: OverlayState,
    indeterminate_since: Option<FrameTimestamp>,
    last_proximity_notice: Option<FrameTimestamp>,
    previous_issues: IssueSet,
    last_posture_notice: HashMap<PostureIssue, FrameTimestamp>,
}

impl AlertPolicy {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            overlay: OverlayState::Hidden,
            indeterminate_since: None,
            last_proximity_notice: None,
            previous_issues: IssueSet::new(),
            last_posture_notice: HashMap::new(),
        }
    }

    pub fn overlay(&self) -> OverlayState {
        self.overlay
    }

    /// Issues seen in the most recent merged round
    pub fn previous_issues(&self) -> &IssueSet {
        &self.previous_issues
    }

    /// Apply a distance reading from the face stream
    pub fn on_distance(&mut self, at: FrameTimestamp, distance: Distance) -> Vec<AlertAction> {
        let mut actions = Vec::new();

        match distance {
            Distance::Measured(cm) if cm < self.config.distance_threshold_cm => {
                self.indeterminate_since = None;
                if self.overlay == OverlayState::Hidden {
                    debug!(cm, "viewer too close, showing overlay");
                    self.overlay = OverlayState::Shown;
                    actions.push(self.show_overlay());
                    let cooldown_ms = self.config.proximity_cooldown_ms;
                    if self.cooled_down(self.last_proximity_notice, at, cooldown_ms) {
                        self.last_proximity_notice = Some(at);
                        actions.push(AlertAction::Notify(Notification::proximity()));
                    }
                }
            }
            Distance::Measured(cm) => {
                self.indeterminate_since = None;
                if self.overlay == OverlayState::Shown {
                    debug!(cm, "viewer backed off, hiding overlay");
                    actions.extend(self.hide_overlay());
                }
            }
            Distance::Indeterminate => {
                let Some(dwell_ms) = self.config.indeterminate_dwell_ms else {
                    return actions;
                };
                if self.overlay == OverlayState::Hidden {
                    self.indeterminate_since = None;
                    return actions;
                }
                let since = *self.indeterminate_since.get_or_insert(at);
                if at.millis_since(since) >= dwell_ms {
                    debug!(dwell_ms, "no face for dwell period, hiding overlay");
                    actions.extend(self.hide_overlay());
                }
            }
        }

        actions
    }

    /// Apply the merged issue set of a completed round
    pub fn on_posture(&mut self, at: FrameTimestamp, issues: &IssueSet) -> Vec<AlertAction> {
        let mut actions = Vec::new();

        for issue in issues.raised_since(&self.previous_issues).iter() {
            let last = self.last_posture_notice.get(&issue).copied();
            if self.cooled_down(last, at, self.config.posture_cooldown_ms) {
                self.last_posture_notice.insert(issue, at);
                actions.push(AlertAction::Notify(Notification::posture(issue)));
            } else {
                debug!(%issue, "posture notification suppressed by cooldown");
            }
        }

        self.previous_issues = issues.clone();
        actions
    }

    /// Return to `Hidden` with no remembered issues (session start/stop).
    ///
    /// Emits a hide action if the overlay was shown.
    pub fn reset(&mut self) -> Vec<AlertAction> {
        let actions = self.hide_overlay().into_iter().collect();
        *self = Self::new(self.config.clone());
        actions
    }

    fn show_overlay(&self) -> AlertAction {
        AlertAction::ShowOverlay {
            opacity: self.config.overlay_opacity,
            fade_ms: self.config.overlay_fade_ms,
        }
    }

    fn hide_overlay(&mut self) -> Option<AlertAction> {
        self.indeterminate_since = None;
        if self.overlay == OverlayState::Hidden {
            return None;
        }
        self.overlay = OverlayState::Hidden;
        Some(AlertAction::HideOverlay {
            fade_ms: self.config.overlay_fade_ms,
        })
    }

    fn cooled_down(
        &self,
        last: Option<FrameTimestamp>,
        at: FrameTimestamp,
        cooldown_ms: u64,
    ) -> bool {
        last.map_or(true, |last| at.millis_since(last) >= cooldown_ms)
    }
}
