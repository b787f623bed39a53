//! Body pose classifier

use tracing::debug;

use super::{line_angle_degrees, IssueClassifier};
use crate::config::{LandmarkIndices, PostureThresholds};
use crate::types::{IssueSet, LandmarkSet, PostureIssue, StreamKind};

/// Detects hunching and lying down from body pose landmarks
#[derive(Debug, Clone)]
pub struct PoseClassifier {
    hunch_threshold: f64,
    lying_threshold_degrees: f64,
    left_shoulder: usize,
    right_shoulder: usize,
    left_hip: usize,
}

impl PoseClassifier {
    pub fn new(thresholds: &PostureThresholds, indices: &LandmarkIndices) -> Self {
        Self {
            hunch_threshold: thresholds.hunch,
            lying_threshold_degrees: thresholds.lying_degrees,
            left_shoulder: indices.left_shoulder,
            right_shoulder: indices.right_shoulder,
            left_hip: indices.left_hip,
        }
    }
}

impl Default for PoseClassifier {
    fn default() -> Self {
        Self::new(&PostureThresholds::default(), &LandmarkIndices::default())
    }
}

impl IssueClassifier for PoseClassifier {
    fn stream(&self) -> StreamKind {
        StreamKind::Pose
    }

    fn classify(&self, landmarks: Option<&LandmarkSet>) -> IssueSet {
        let mut issues = IssueSet::new();
        let Some(landmarks) = landmarks.filter(|set| !set.is_empty()) else {
            return issues;
        };

        let (Some(left_shoulder), Some(right_shoulder), Some(left_hip)) = (
            landmarks.get(self.left_shoulder),
            landmarks.get(self.right_shoulder),
            landmarks.get(self.left_hip),
        ) else {
            debug!(points = landmarks.len(), "pose landmark set too short, skipping");
            return issues;
        };

        // Same-side pair; y grows downward.
        if left_shoulder.y - left_hip.y > self.hunch_threshold {
            issues.insert(PostureIssue::Hunchback);
        }

        let shoulder_angle = line_angle_degrees(left_shoulder, right_shoulder);
        if shoulder_angle.abs() > self.lying_threshold_degrees {
            issues.insert(PostureIssue::LyingDown);
        }

        issues
    }
}
