//! Core data types
//!
//! This module defines the values that flow from the external landmark
//! detectors through classification and aggregation to the alert policy.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Capture timestamp of a frame in milliseconds.
///
/// Unique per captured frame and monotonically increasing within a session.
/// Both detector streams echo the timestamp they were submitted with, which
/// is what pairs their results into one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameTimestamp(pub i64);

impl FrameTimestamp {
    /// Wall-clock timestamp for a freshly captured frame
    pub fn now() -> Self {
        FrameTimestamp(chrono::Utc::now().timestamp_millis())
    }

    pub fn millis(self) -> i64 {
        self.0
    }

    /// Milliseconds elapsed since `earlier` (zero if `earlier` is newer)
    pub fn millis_since(self, earlier: FrameTimestamp) -> u64 {
        self.0.saturating_sub(earlier.0).max(0) as u64
    }
}

impl fmt::Display for FrameTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// The two independently scheduled detector streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Body pose landmarks
    Pose,
    /// Face landmarks (and the face box used for distance)
    Face,
}

impl StreamKind {
    pub const ALL: [StreamKind; 2] = [StreamKind::Pose, StreamKind::Face];

    /// The stream this one is paired with in a round
    pub fn other(self) -> StreamKind {
        match self {
            StreamKind::Pose => StreamKind::Face,
            StreamKind::Face => StreamKind::Pose,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            StreamKind::Pose => 0,
            StreamKind::Face => 1,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Pose => f.write_str("pose"),
            StreamKind::Face => f.write_str("face"),
        }
    }
}

/// Normalized landmark coordinate in [0, 1] image space (y grows downward)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LandmarkPoint {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
}

impl LandmarkPoint {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y, z: None }
    }
}

/// Ordered landmarks from one detector invocation.
///
/// Indexing follows the detector's fixed scheme (e.g. pose index 11 is the
/// left shoulder). Never mutated after construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LandmarkSet(Vec<LandmarkPoint>);

impl LandmarkSet {
    pub fn new(points: Vec<LandmarkPoint>) -> Self {
        Self(points)
    }

    pub fn get(&self, index: usize) -> Option<&LandmarkPoint> {
        self.0.get(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn points(&self) -> &[LandmarkPoint] {
        &self.0
    }
}

impl From<Vec<LandmarkPoint>> for LandmarkSet {
    fn from(points: Vec<LandmarkPoint>) -> Self {
        Self(points)
    }
}

/// Bounding box of one detected face, in pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub width_px: f64,
    pub height_px: f64,
}

impl FaceBox {
    pub const fn with_height(height_px: f64) -> Self {
        Self {
            width_px: height_px,
            height_px,
        }
    }
}

/// Posture problems recognized by the landmark classifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostureIssue {
    Hunchback,
    HeadTilt,
    LyingDown,
    SidewaysGlance,
}

impl PostureIssue {
    pub const ALL: [PostureIssue; 4] = [
        PostureIssue::Hunchback,
        PostureIssue::HeadTilt,
        PostureIssue::LyingDown,
        PostureIssue::SidewaysGlance,
    ];

    /// User-facing notification message
    pub fn message(self) -> &'static str {
        match self {
            PostureIssue::Hunchback => "Hunched posture detected, please sit up straight",
            PostureIssue::HeadTilt => "Head tilt detected, please keep your head level",
            PostureIssue::LyingDown => "Lying down detected, please sit up while using your phone",
            PostureIssue::SidewaysGlance => {
                "Sideways glance detected, please face the screen directly"
            }
        }
    }
}

impl fmt::Display for PostureIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PostureIssue::Hunchback => "HUNCHBACK",
            PostureIssue::HeadTilt => "HEAD_TILT",
            PostureIssue::LyingDown => "LYING_DOWN",
            PostureIssue::SidewaysGlance => "SIDEWAYS_GLANCE",
        };
        f.write_str(name)
    }
}

/// Set of posture issues; the unit of classifier output and of merging
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueSet(BTreeSet<PostureIssue>);

impl IssueSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, issue: PostureIssue) -> bool {
        self.0.insert(issue)
    }

    pub fn contains(&self, issue: PostureIssue) -> bool {
        self.0.contains(&issue)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = PostureIssue> + '_ {
        self.0.iter().copied()
    }

    /// Union of both sets; commutative and associative
    pub fn union(&self, other: &IssueSet) -> IssueSet {
        IssueSet(self.0.union(&other.0).copied().collect())
    }

    /// Issues present here but absent from `previous` (rising edges)
    pub fn raised_since(&self, previous: &IssueSet) -> IssueSet {
        IssueSet(self.0.difference(&previous.0).copied().collect())
    }
}

impl FromIterator<PostureIssue> for IssueSet {
    fn from_iter<I: IntoIterator<Item = PostureIssue>>(iter: I) -> Self {
        IssueSet(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[PostureIssue; N]> for IssueSet {
    fn from(issues: [PostureIssue; N]) -> Self {
        issues.into_iter().collect()
    }
}

impl IntoIterator for IssueSet {
    type Item = PostureIssue;
    type IntoIter = std::collections::btree_set::IntoIter<PostureIssue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Estimated viewing distance.
///
/// Serialized as a number of centimeters, or `null` when indeterminate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "Option<f64>", into = "Option<f64>")]
pub enum Distance {
    /// Distance in centimeters
    Measured(f64),
    /// No face detected, degenerate detection, or detector failure
    Indeterminate,
}

impl Distance {
    pub fn centimeters(self) -> Option<f64> {
        match self {
            Distance::Measured(cm) => Some(cm),
            Distance::Indeterminate => None,
        }
    }

    pub fn is_indeterminate(self) -> bool {
        matches!(self, Distance::Indeterminate)
    }
}

impl From<Option<f64>> for Distance {
    fn from(value: Option<f64>) -> Self {
        match value {
            Some(cm) if cm.is_finite() => Distance::Measured(cm),
            _ => Distance::Indeterminate,
        }
    }
}

impl From<Distance> for Option<f64> {
    fn from(distance: Distance) -> Self {
        distance.centimeters()
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Distance::Measured(cm) => write!(f, "{cm:.1}cm"),
            Distance::Indeterminate => f.write_str("indeterminate"),
        }
    }
}
