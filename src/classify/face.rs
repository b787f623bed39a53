//! Face classifier

use tracing::debug;

use super::{line_angle_degrees, IssueClassifier};
use crate::config::{LandmarkIndices, PostureThresholds};
use crate::types::{IssueSet, LandmarkSet, PostureIssue, StreamKind};

/// Detects head tilt and sideways glances from face landmarks
#[derive(Debug, Clone)]
pub struct FaceClassifier {
    tilt_threshold_degrees: f64,
    glance_min_x: f64,
    glance_max_x: f64,
    left_eye: usize,
    right_eye: usize,
    nose_tip: usize,
}

impl FaceClassifier {
    pub fn new(thresholds: &PostureThresholds, indices: &LandmarkIndices) -> Self {
        Self {
            tilt_threshold_degrees: thresholds.tilt_degrees,
            glance_min_x: thresholds.glance_min_x,
            glance_max_x: thresholds.glance_max_x,
            left_eye: indices.left_eye,
            right_eye: indices.right_eye,
            nose_tip: indices.nose_tip,
        }
    }
}

impl Default for FaceClassifier {
    fn default() -> Self {
        Self::new(&PostureThresholds::default(), &LandmarkIndices::default())
    }
}

impl IssueClassifier for FaceClassifier {
    fn stream(&self) -> StreamKind {
        StreamKind::Face
    }

    fn classify(&self, landmarks: Option<&LandmarkSet>) -> IssueSet {
        let mut issues = IssueSet::new();
        let Some(landmarks) = landmarks.filter(|set| !set.is_empty()) else {
            return issues;
        };

        let (Some(left_eye), Some(right_eye), Some(nose)) = (
            landmarks.get(self.left_eye),
            landmarks.get(self.right_eye),
            landmarks.get(self.nose_tip),
        ) else {
            debug!(points = landmarks.len(), "face landmark set too short, skipping");
            return issues;
        };

        let eye_angle = line_angle_degrees(left_eye, right_eye);
        if eye_angle.abs() > self.tilt_threshold_degrees {
            issues.insert(PostureIssue::HeadTilt);
        }

        if nose.x < self.glance_min_x || nose.x > self.glance_max_x {
            issues.insert(PostureIssue::SidewaysGlance);
        }

        issues
    }
}
