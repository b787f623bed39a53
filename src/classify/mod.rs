//! Landmark geometry classifiers
//!
//! Each classifier maps one detector's landmark set to the posture issues it
//! can see. Pose and face classifiers consume disjoint landmark sets and run
//! on separate streams; an absent or empty set yields no issues.

mod face;
mod pose;

pub use face::FaceClassifier;
pub use pose::PoseClassifier;

use crate::types::{IssueSet, LandmarkPoint, LandmarkSet, StreamKind};

/// Trait for landmark-to-issue classifiers
pub trait IssueClassifier {
    /// Stream whose landmarks this classifier consumes
    fn stream(&self) -> StreamKind;

    /// Classify one detector result (`None` when nothing was detected)
    fn classify(&self, landmarks: Option<&LandmarkSet>) -> IssueSet;
}

/// Angle of the line from `from` to `to` relative to horizontal, in degrees.
///
/// The result is folded into [-90, 90] so the line's direction does not
/// matter (mirrored frames classify the same). Coincident points give 0.
pub(crate) fn line_angle_degrees(from: &LandmarkPoint, to: &LandmarkPoint) -> f64 {
    let dx = to.x - from.x;
    let dy = to.y - from.y;
    if dx == 0.0 && dy == 0.0 {
        return 0.0;
    }

    let angle = dy.atan2(dx).to_degrees();
    if angle > 90.0 {
        angle - 180.0
    } else if angle < -90.0 {
        angle + 180.0
    } else {
        angle
    }
}
