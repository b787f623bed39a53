//! Monitor orchestration
//!
//! [`PostureMonitor`] is the public entry point detector callbacks talk to.
//! It wires the pipeline:
//!
//! 1. DistanceEstimator - face box to viewing distance (face stream)
//! 2. Pose / Face classifiers - landmarks to issue sets (outside the lock)
//! 3. RoundAggregator - pairs both streams by frame timestamp
//! 4. AlertPolicy - overlay and notification decisions
//! 5. MonitorListener - delivery to the UI layer
//!
//! Steps 3-5 run inside a single critical section, so completions arriving
//! concurrently from both detector threads resolve to exactly one emission
//! and listeners observe rounds in timestamp order.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::aggregator::{
    AggregatorStats, ContributionOutcome, MergedRound, OpenOutcome, RoundAggregator,
};
use crate::alert::{AlertAction, AlertPolicy, OverlayState};
use crate::classify::{FaceClassifier, IssueClassifier, PoseClassifier};
use crate::config::MonitorConfig;
use crate::distance::DistanceEstimator;
use crate::error::MonitorError;
use crate::events::MonitorListener;
use crate::types::{Distance, FaceBox, FrameTimestamp, IssueSet, LandmarkSet, StreamKind};

/// Face-stream output for one frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    /// Face mesh of the first detected face, if any
    #[serde(default)]
    pub landmarks: Option<LandmarkSet>,
    /// Bounding boxes of detected faces, in detector order
    #[serde(default)]
    pub faces: Vec<FaceBox>,
    /// Height of the analyzed image in pixels
    pub image_height_px: u32,
}

/// Counters for one monitoring session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStats {
    #[serde(flatten)]
    pub rounds: AggregatorStats,
    pub frames_rejected: u64,
    pub distance_updates: u64,
    pub stale_distances: u64,
    pub detector_errors: u64,
    pub late_after_stop: u64,
}

struct MonitorCore {
    running: bool,
    aggregator: RoundAggregator,
    alerts: AlertPolicy,
    last_distance_at: Option<FrameTimestamp>,
    stats: MonitorStats,
}

/// Thread-safe fusion core shared by both detector callbacks
pub struct PostureMonitor {
    config: MonitorConfig,
    estimator: DistanceEstimator,
    pose: PoseClassifier,
    face: FaceClassifier,
    listener: Arc<dyn MonitorListener>,
    core: Mutex<MonitorCore>,
}

impl PostureMonitor {
    /// Create a stopped monitor; call [`PostureMonitor::start`] before submitting frames.
    pub fn new(
        config: MonitorConfig,
        listener: Arc<dyn MonitorListener>,
    ) -> Result<Self, MonitorError> {
        config.validate()?;
        let estimator = DistanceEstimator::new(config.camera.clone())?;
        let pose = PoseClassifier::new(&config.thresholds, &config.landmarks);
        let face = FaceClassifier::new(&config.thresholds, &config.landmarks);
        let alerts = AlertPolicy::new(config.alerts.clone());

        Ok(Self {
            config,
            estimator,
            pose,
            face,
            listener,
            core: Mutex::new(MonitorCore {
                running: false,
                aggregator: RoundAggregator::new(),
                alerts,
                last_distance_at: None,
                stats: MonitorStats::default(),
            }),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn estimator(&self) -> &DistanceEstimator {
        &self.estimator
    }

    pub fn is_running(&self) -> bool {
        self.core.lock().running
    }

    pub fn overlay(&self) -> OverlayState {
        self.core.lock().alerts.overlay()
    }

    pub fn stats(&self) -> MonitorStats {
        let core = self.core.lock();
        MonitorStats {
            rounds: core.aggregator.stats(),
            ..core.stats
        }
    }

    /// Start a monitoring session with fresh round and alert state.
    ///
    /// Both streams start out available; report a missing detector again
    /// with [`stream_unavailable`](Self::stream_unavailable).
    pub fn start(&self) {
        let mut core = self.core.lock();
        core.aggregator.restart();
        let actions = core.alerts.reset();
        self.deliver_alerts(&actions);
        core.last_distance_at = None;
        core.stats = MonitorStats::default();
        core.running = true;
        info!("monitoring started");
    }

    /// Stop the session; later detector callbacks are ignored
    pub fn stop(&self) {
        let mut core = self.core.lock();
        if !core.running {
            return;
        }
        core.running = false;
        core.aggregator.close();
        let actions = core.alerts.reset();
        self.deliver_alerts(&actions);
        info!(stats = ?core.aggregator.stats(), "monitoring stopped");
    }

    /// Open a round for a frame submitted to the detectors.
    ///
    /// Returns `false` when no round was opened (stopped, timestamp not
    /// increasing, or no detector available).
    pub fn submit_frame(&self, timestamp: FrameTimestamp) -> bool {
        let mut core = self.core.lock();
        if !core.running {
            return false;
        }
        match core.aggregator.open_round(timestamp) {
            OpenOutcome::Opened { abandoned } => {
                if let Some(abandoned) = abandoned {
                    debug!(%abandoned, %timestamp, "detector still busy, round superseded");
                }
                true
            }
            outcome => {
                core.stats.frames_rejected += 1;
                debug!(%timestamp, ?outcome, "frame not opened");
                false
            }
        }
    }

    /// Pose detector completion for the frame at `timestamp`
    pub fn pose_result(&self, timestamp: FrameTimestamp, landmarks: Option<&LandmarkSet>) {
        let issues = self.pose.classify(landmarks);
        self.contribute(StreamKind::Pose, timestamp, issues);
    }

    /// Face detector completion for the frame at `timestamp`
    pub fn face_result(&self, timestamp: FrameTimestamp, detection: &FaceDetection) {
        let distance = self
            .estimator
            .estimate_faces(detection.image_height_px, &detection.faces);
        let issues = self.face.classify(detection.landmarks.as_ref());

        let mut core = self.core.lock();
        self.apply_distance(&mut core, timestamp, distance);
        self.apply_contribution(&mut core, StreamKind::Face, timestamp, issues);
    }

    /// Distance reading from a separately scheduled face-box detector
    pub fn distance_result(&self, timestamp: FrameTimestamp, distance: Distance) {
        let mut core = self.core.lock();
        self.apply_distance(&mut core, timestamp, distance);
    }

    /// A detector failed on one frame.
    ///
    /// The failure is reported and the stream contributes an empty issue set
    /// so the round still closes; a failed face frame also reports an
    /// indeterminate distance.
    pub fn detector_failed(
        &self,
        stream: StreamKind,
        timestamp: FrameTimestamp,
        err: &MonitorError,
    ) {
        error!(%stream, %timestamp, error = %err, "detection failed");
        let mut core = self.core.lock();
        if !core.running {
            core.stats.late_after_stop += 1;
            return;
        }
        core.stats.detector_errors += 1;
        self.listener.on_error(&err.to_string(), err.code());

        if stream == StreamKind::Face {
            self.apply_distance(&mut core, timestamp, Distance::Indeterminate);
        }
        self.apply_contribution(&mut core, stream, timestamp, IssueSet::new());
    }

    /// A detector could not be set up or went away; continue on the other stream
    pub fn stream_unavailable(&self, stream: StreamKind, err: &MonitorError) {
        warn!(%stream, error = %err, "detector unavailable");
        let mut core = self.core.lock();
        core.stats.detector_errors += 1;
        self.listener.on_error(&err.to_string(), err.code());
        if let Some(round) = core.aggregator.mark_unavailable(stream) {
            self.emit_round(&mut core, round);
        }
    }

    /// A previously unavailable detector is back
    pub fn stream_available(&self, stream: StreamKind) {
        info!(%stream, "detector available");
        self.core.lock().aggregator.mark_available(stream);
    }

    pub fn is_stream_available(&self, stream: StreamKind) -> bool {
        self.core.lock().aggregator.is_available(stream)
    }

    fn contribute(&self, stream: StreamKind, timestamp: FrameTimestamp, issues: IssueSet) {
        let mut core = self.core.lock();
        self.apply_contribution(&mut core, stream, timestamp, issues);
    }

    fn apply_contribution(
        &self,
        core: &mut MonitorCore,
        stream: StreamKind,
        timestamp: FrameTimestamp,
        issues: IssueSet,
    ) {
        if !core.running {
            core.stats.late_after_stop += 1;
            return;
        }
        match core.aggregator.contribute(stream, timestamp, issues) {
            ContributionOutcome::Completed(round) => self.emit_round(core, round),
            ContributionOutcome::Stale => {
                warn!(%stream, %timestamp, "late contribution discarded");
            }
            _ => {}
        }
    }

    fn apply_distance(
        &self,
        core: &mut MonitorCore,
        timestamp: FrameTimestamp,
        distance: Distance,
    ) {
        if !core.running {
            core.stats.late_after_stop += 1;
            return;
        }
        if core.last_distance_at.is_some_and(|last| timestamp < last) {
            core.stats.stale_distances += 1;
            debug!(%timestamp, "stale distance reading discarded");
            return;
        }
        core.last_distance_at = Some(timestamp);
        core.stats.distance_updates += 1;

        self.listener.on_distance_update(timestamp, distance);
        let actions = core.alerts.on_distance(timestamp, distance);
        self.deliver_alerts(&actions);
    }

    fn emit_round(&self, core: &mut MonitorCore, round: MergedRound) {
        self.listener.on_posture_update(round.timestamp, &round.issues);
        let actions = core.alerts.on_posture(round.timestamp, &round.issues);
        self.deliver_alerts(&actions);
    }

    fn deliver_alerts(&self, actions: &[AlertAction]) {
        for action in actions {
            self.listener.on_alert(action);
        }
    }
}
