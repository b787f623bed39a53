//! End-to-end flows through the public API

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use posture_watch::alert::NotificationKind;
use posture_watch::types::{FaceBox, LandmarkPoint};
use posture_watch::{
    AlertAction, Distance, FaceDetection, FaceDetector, Frame, FrameTimestamp, IssueSet,
    LandmarkSet, MonitorConfig, MonitorError, MonitorEvent, MonitorListener, MonitoringSession,
    OverlayState, PoseDetector, PostureIssue, PostureMonitor, RecordedEvent, StreamKind,
};

/// Listener that keeps only what a notification UI would show
#[derive(Default)]
struct NotificationLog {
    notified: Mutex<Vec<NotificationKind>>,
    errors: Mutex<Vec<i32>>,
}

impl MonitorListener for NotificationLog {
    fn on_distance_update(&self, _timestamp: FrameTimestamp, _distance: Distance) {}

    fn on_posture_update(&self, _timestamp: FrameTimestamp, _issues: &IssueSet) {}

    fn on_alert(&self, action: &AlertAction) {
        if let AlertAction::Notify(notification) = action {
            self.notified.lock().push(notification.kind);
        }
    }

    fn on_error(&self, _message: &str, code: i32) {
        self.errors.lock().push(code);
    }
}

fn pose(hunched: bool) -> LandmarkSet {
    let mut points = vec![LandmarkPoint::new(0.5, 0.5); 33];
    points[11] = LandmarkPoint::new(0.40, if hunched { 0.65 } else { 0.40 });
    points[12] = LandmarkPoint::new(0.60, if hunched { 0.65 } else { 0.40 });
    points[23] = LandmarkPoint::new(0.42, 0.50);
    LandmarkSet::new(points)
}

fn far_face() -> FaceDetection {
    FaceDetection {
        landmarks: None,
        faces: vec![FaceBox::with_height(200.0)],
        image_height_px: 1080,
    }
}

#[test]
fn hunchback_notifies_on_rising_edges_only() {
    let log = Arc::new(NotificationLog::default());
    let monitor = PostureMonitor::new(MonitorConfig::default(), log.clone()).unwrap();
    monitor.start();

    // rounds 1..=6: hunched, hunched, hunched, upright, hunched, hunched
    for (i, hunched) in [true, true, true, false, true, true].into_iter().enumerate() {
        let t = FrameTimestamp(i as i64 * 33);
        assert!(monitor.submit_frame(t));
        monitor.face_result(t, &far_face());
        monitor.pose_result(t, Some(&pose(hunched)));
    }

    assert_eq!(
        *log.notified.lock(),
        vec![
            NotificationKind::Posture(PostureIssue::Hunchback),
            NotificationKind::Posture(PostureIssue::Hunchback),
        ]
    );
    assert_eq!(monitor.overlay(), OverlayState::Hidden);
    assert_eq!(monitor.stats().rounds.rounds_completed, 6);
}

#[test]
fn config_file_drives_thresholds() {
    let path = std::env::temp_dir().join(format!("posture-watch-{}.json", std::process::id()));
    let mut config = MonitorConfig::default();
    config.alerts.distance_threshold_cm = 80.0;
    config.save(&path).unwrap();

    let loaded = MonitorConfig::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(loaded, config);

    let log = Arc::new(NotificationLog::default());
    let monitor = PostureMonitor::new(loaded, log.clone()).unwrap();
    monitor.start();
    // ~74.7 cm: fine at 30 cm, too close at 80 cm
    let estimate = monitor.estimator().estimate(1920, 400.0);
    monitor.distance_result(FrameTimestamp(1), estimate);

    assert_eq!(*log.notified.lock(), vec![NotificationKind::Proximity]);
    assert_eq!(monitor.overlay(), OverlayState::Shown);
}

#[test]
fn replay_matches_live_monitor() {
    let recording: Vec<RecordedEvent> = (0..4)
        .flat_map(|i| {
            let timestamp = FrameTimestamp(i * 33);
            [
                RecordedEvent::Frame { timestamp },
                RecordedEvent::Pose {
                    timestamp,
                    landmarks: Some(pose(i % 2 == 0)),
                },
                RecordedEvent::Face {
                    timestamp,
                    detection: far_face(),
                },
            ]
        })
        .collect();

    let ndjson: String = recording
        .iter()
        .map(|e| serde_json::to_string(e).unwrap() + "\n")
        .collect();
    let parsed = posture_watch::replay::parse_ndjson(&ndjson).unwrap();
    assert_eq!(parsed, recording);

    let report = posture_watch::replay(MonitorConfig::default(), &parsed).unwrap();
    let rounds: Vec<IssueSet> = report
        .events
        .iter()
        .filter_map(|e| match e {
            MonitorEvent::Posture { issues, .. } => Some(issues.clone()),
            _ => None,
        })
        .collect();
    let hunched = IssueSet::from([PostureIssue::Hunchback]);
    assert_eq!(rounds, vec![hunched.clone(), IssueSet::new(), hunched, IssueSet::new()]);
    assert_eq!(report.stats.rounds.rounds_opened, 4);
}

struct UprightPose;

impl PoseDetector for UprightPose {
    fn detect(&self, _frame: &Frame) -> Result<Option<LandmarkSet>, MonitorError> {
        Ok(Some(pose(false)))
    }
}

struct FlakyFace;

impl FaceDetector for FlakyFace {
    fn detect(&self, frame: &Frame) -> Result<FaceDetection, MonitorError> {
        if frame.timestamp.millis() % 2 == 0 {
            Ok(far_face())
        } else {
            Err(MonitorError::DetectionFailed {
                stream: StreamKind::Face,
                reason: "inference timeout".to_string(),
            })
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn session_survives_detector_failures() {
    let log = Arc::new(NotificationLog::default());
    let monitor = Arc::new(PostureMonitor::new(MonitorConfig::default(), log.clone()).unwrap());
    let session = MonitoringSession::start(
        monitor.clone(),
        Ok(Arc::new(UprightPose)),
        Ok(Arc::new(FlakyFace)),
    );

    for ms in 1..=6 {
        session
            .submit_frame(Frame::new(FrameTimestamp(ms), 4, 4, Arc::from(vec![0u8; 16])))
            .unwrap();
        // let both detectors finish before the next frame
        for _ in 0..100 {
            if !session.is_busy() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    let stats = session.stop().await;
    assert_eq!(stats.frames_dropped, 0);
    assert_eq!(stats.monitor.rounds.rounds_completed, 6);
    assert_eq!(stats.monitor.detector_errors, 3);
    assert_eq!(*log.errors.lock(), vec![4, 4, 4]);
    assert!(!monitor.is_running());
}
