//! Async monitoring session
//!
//! Runs the pose and face detectors as two independent tokio tasks, each fed
//! from a single-frame slot. A frame submitted while either detector is still
//! working on the previous one is dropped instead of queued, so every opened
//! round can complete. Detector calls are blocking inference and run on the
//! blocking pool.
//!
//! Stopping or dropping the session cancels both tasks and stops the monitor,
//! which fences off any inference result that completes after teardown.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Instrument};
use uuid::Uuid;

use crate::error::MonitorError;
use crate::monitor::{FaceDetection, MonitorStats, PostureMonitor};
use crate::types::{FrameTimestamp, LandmarkSet, StreamKind};

/// Camera frame handed to the detectors.
///
/// Pixel data is opaque to this crate; color conversion and rotation are
/// done by the frame source.
#[derive(Debug, Clone)]
pub struct Frame {
    pub timestamp: FrameTimestamp,
    pub width: u32,
    pub height: u32,
    pub pixels: Arc<[u8]>,
}

impl Frame {
    pub fn new(timestamp: FrameTimestamp, width: u32, height: u32, pixels: Arc<[u8]>) -> Self {
        Self {
            timestamp,
            width,
            height,
            pixels,
        }
    }
}

/// Body pose landmark detector (blocking)
pub trait PoseDetector: Send + Sync + 'static {
    /// Landmarks of the first detected body, `None` if no body is visible
    fn detect(&self, frame: &Frame) -> Result<Option<LandmarkSet>, MonitorError>;
}

/// Face landmark / face box detector (blocking)
pub trait FaceDetector: Send + Sync + 'static {
    fn detect(&self, frame: &Frame) -> Result<FaceDetection, MonitorError>;
}

/// Result of detector setup handed to [`MonitoringSession::start`]
pub type DetectorSetup<D> = Result<Arc<D>, MonitorError>;

/// Session counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub frames_submitted: u64,
    pub frames_dropped: u64,
    #[serde(flatten)]
    pub monitor: MonitorStats,
}

/// Single-frame mailbox for one detector.
///
/// The slot is busy from `put` until the worker calls `finish`, i.e. while
/// the frame is pending or being detected.
#[derive(Default)]
struct LatestSlot {
    frame: Mutex<Option<Frame>>,
    busy: AtomicBool,
    notify: Notify,
}

impl LatestSlot {
    fn put(&self, frame: Frame) {
        self.busy.store(true, Ordering::Release);
        *self.frame.lock() = Some(frame);
        self.notify.notify_one();
    }

    fn take(&self) -> Option<Frame> {
        self.frame.lock().take()
    }

    fn finish(&self) {
        self.busy.store(false, Ordering::Release);
    }

    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// A running monitoring session
pub struct MonitoringSession {
    id: Uuid,
    monitor: Arc<PostureMonitor>,
    cancel: CancellationToken,
    slots: [Option<Arc<LatestSlot>>; 2],
    // serializes the busy check with opening the round
    submit_gate: Mutex<()>,
    tasks: Vec<JoinHandle<()>>,
    frames_submitted: AtomicU64,
    frames_dropped: AtomicU64,
}

impl MonitoringSession {
    /// Start monitoring with the given detector setups.
    ///
    /// A detector whose setup failed is reported through `on_error` and the
    /// session runs on the other stream alone. Must be called from within a
    /// tokio runtime.
    pub fn start(
        monitor: Arc<PostureMonitor>,
        pose: DetectorSetup<dyn PoseDetector>,
        face: DetectorSetup<dyn FaceDetector>,
    ) -> Self {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        monitor.start();
        info!(session = %id, "monitoring session started");

        let mut slots: [Option<Arc<LatestSlot>>; 2] = [None, None];
        let mut tasks = Vec::new();

        match pose {
            Ok(detector) => {
                let slot = Arc::new(LatestSlot::default());
                monitor.stream_available(StreamKind::Pose);
                tasks.push(spawn_worker(
                    id,
                    StreamKind::Pose,
                    slot.clone(),
                    cancel.clone(),
                    monitor.clone(),
                    move |monitor, frame| match detector.detect(&frame) {
                        Ok(landmarks) => {
                            monitor.pose_result(frame.timestamp, landmarks.as_ref())
                        }
                        Err(err) => {
                            monitor.detector_failed(StreamKind::Pose, frame.timestamp, &err)
                        }
                    },
                ));
                slots[StreamKind::Pose.index()] = Some(slot);
            }
            Err(err) => monitor.stream_unavailable(StreamKind::Pose, &err),
        }

        match face {
            Ok(detector) => {
                let slot = Arc::new(LatestSlot::default());
                monitor.stream_available(StreamKind::Face);
                tasks.push(spawn_worker(
                    id,
                    StreamKind::Face,
                    slot.clone(),
                    cancel.clone(),
                    monitor.clone(),
                    move |monitor, frame| match detector.detect(&frame) {
                        Ok(detection) => monitor.face_result(frame.timestamp, &detection),
                        Err(err) => {
                            monitor.detector_failed(StreamKind::Face, frame.timestamp, &err)
                        }
                    },
                ));
                slots[StreamKind::Face.index()] = Some(slot);
            }
            Err(err) => monitor.stream_unavailable(StreamKind::Face, &err),
        }

        Self {
            id,
            monitor,
            cancel,
            slots,
            submit_gate: Mutex::new(()),
            tasks,
            frames_submitted: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn monitor(&self) -> &Arc<PostureMonitor> {
        &self.monitor
    }

    /// Submit a captured frame to both detectors.
    ///
    /// If any running detector has not finished the previous frame, the frame
    /// is dropped and no round is opened. Otherwise the aggregation round for
    /// the frame's timestamp is opened and the frame goes to every detector.
    pub fn submit_frame(&self, frame: Frame) -> Result<(), MonitorError> {
        if self.cancel.is_cancelled() {
            return Err(MonitorError::SessionStopped);
        }
        self.frames_submitted.fetch_add(1, Ordering::Relaxed);

        let _gate = self.submit_gate.lock();
        if self.is_busy() {
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            debug!(
                session = %self.id,
                timestamp = %frame.timestamp,
                "detector busy, frame dropped"
            );
            return Ok(());
        }
        if !self.monitor.submit_frame(frame.timestamp) {
            debug!(session = %self.id, timestamp = %frame.timestamp, "frame rejected");
            return Ok(());
        }

        for slot in self.slots.iter().flatten() {
            slot.put(frame.clone());
        }
        Ok(())
    }

    /// True while any detector is still working on the last accepted frame
    pub fn is_busy(&self) -> bool {
        self.slots.iter().flatten().any(|slot| slot.is_busy())
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            frames_submitted: self.frames_submitted.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            monitor: self.monitor.stats(),
        }
    }

    /// Stop the session and wait for both detector tasks to exit
    pub async fn stop(mut self) -> SessionStats {
        self.cancel.cancel();
        self.monitor.stop();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(err) = task.await {
                error!(session = %self.id, error = %err, "detector task failed");
            }
        }
        let stats = self.stats();
        info!(session = %self.id, ?stats, "monitoring session stopped");
        stats
    }
}

impl Drop for MonitoringSession {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.monitor.stop();
    }
}

fn spawn_worker<F>(
    session: Uuid,
    stream: StreamKind,
    slot: Arc<LatestSlot>,
    cancel: CancellationToken,
    monitor: Arc<PostureMonitor>,
    run: F,
) -> JoinHandle<()>
where
    F: Fn(&PostureMonitor, Frame) + Send + Sync + 'static,
{
    let run = Arc::new(run);
    let span = tracing::info_span!("detector", %session, %stream);

    tokio::spawn(
        async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = slot.notify.notified() => {}
                }

                let Some(frame) = slot.take() else {
                    continue;
                };

                let timestamp = frame.timestamp;
                let run = run.clone();
                let worker_monitor = monitor.clone();
                let worker_cancel = cancel.clone();
                let result = tokio::task::spawn_blocking(move || {
                    if !worker_cancel.is_cancelled() {
                        run(&*worker_monitor, frame);
                    }
                })
                .await;

                if let Err(err) = result {
                    let err = MonitorError::detection_failed(stream, err.to_string());
                    monitor.detector_failed(stream, timestamp, &err);
                }
                slot.finish();
            }
            debug!("detector task exiting");
        }
        .instrument(span),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::events::{EventQueue, MonitorEvent};
    use crate::types::{FaceBox, IssueSet};
    use std::time::Duration;

    struct FixedPose {
        delay: Duration,
    }

    impl PoseDetector for FixedPose {
        fn detect(&self, _frame: &Frame) -> Result<Option<LandmarkSet>, MonitorError> {
            std::thread::sleep(self.delay);
            Ok(None)
        }
    }

    struct FixedFace;

    impl FaceDetector for FixedFace {
        fn detect(&self, frame: &Frame) -> Result<FaceDetection, MonitorError> {
            Ok(FaceDetection {
                landmarks: None,
                faces: vec![FaceBox::with_height(200.0)],
                image_height_px: frame.height,
            })
        }
    }

    fn frame(ms: i64) -> Frame {
        Frame::new(FrameTimestamp(ms), 4, 4, Arc::from(vec![0u8; 16]))
    }

    fn setup() -> (Arc<PostureMonitor>, Arc<EventQueue>) {
        let queue = Arc::new(EventQueue::new());
        let monitor =
            Arc::new(PostureMonitor::new(MonitorConfig::default(), queue.clone()).unwrap());
        (monitor, queue)
    }

    fn posture_count(events: &[MonitorEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, MonitorEvent::Posture { .. }))
            .count()
    }

    async fn wait_for_rounds(monitor: &PostureMonitor, rounds: u64) {
        for _ in 0..200 {
            if monitor.stats().rounds.rounds_completed >= rounds {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[test]
    fn test_slot_busy_until_finished() {
        let slot = LatestSlot::default();
        assert!(!slot.is_busy());

        slot.put(frame(1));
        assert!(slot.is_busy());
        assert_eq!(slot.take().map(|f| f.timestamp), Some(FrameTimestamp(1)));
        assert!(slot.take().is_none());
        // taken but still being detected
        assert!(slot.is_busy());

        slot.finish();
        assert!(!slot.is_busy());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_session_completes_rounds() {
        let (monitor, queue) = setup();
        let session = MonitoringSession::start(
            monitor.clone(),
            Ok(Arc::new(FixedPose {
                delay: Duration::ZERO,
            })),
            Ok(Arc::new(FixedFace)),
        );

        session.submit_frame(frame(1)).unwrap();
        wait_for_rounds(&monitor, 1).await;

        let stats = session.stop().await;
        assert_eq!(stats.frames_submitted, 1);
        assert_eq!(stats.monitor.rounds.rounds_completed, 1);

        let events = queue.drain();
        assert_eq!(posture_count(&events), 1);
        assert!(events.iter().any(|e| matches!(
            e,
            MonitorEvent::Posture { issues, .. } if *issues == IssueSet::new()
        )));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_setup_runs_single_stream() {
        let (monitor, queue) = setup();
        let session = MonitoringSession::start(
            monitor.clone(),
            Err(MonitorError::detector_unavailable(
                StreamKind::Pose,
                "pose model asset missing",
            )),
            Ok(Arc::new(FixedFace)),
        );

        session.submit_frame(frame(1)).unwrap();
        wait_for_rounds(&monitor, 1).await;
        session.stop().await;

        let events = queue.drain();
        assert!(matches!(events[0], MonitorEvent::Error { code: 3, .. }));
        assert_eq!(posture_count(&events), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_detector_never_emits_out_of_order() {
        let (monitor, queue) = setup();
        let session = MonitoringSession::start(
            monitor.clone(),
            Ok(Arc::new(FixedPose {
                delay: Duration::from_millis(20),
            })),
            Ok(Arc::new(FixedFace)),
        );

        for ms in 1..=10 {
            session.submit_frame(frame(ms)).unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        let stats = session.stop().await;

        assert_eq!(stats.frames_submitted, 10);
        assert!(stats.frames_dropped > 0);
        assert!(stats.monitor.rounds.rounds_completed > 0);
        assert_eq!(stats.monitor.rounds.stale_discarded, 0);

        let rounds: Vec<FrameTimestamp> = queue
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                MonitorEvent::Posture { timestamp, .. } => Some(timestamp),
                _ => None,
            })
            .collect();
        assert!(rounds.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(rounds.len() as u64, stats.monitor.rounds.rounds_completed);
        assert_eq!(
            stats.monitor.rounds.rounds_opened,
            stats.monitor.rounds.rounds_completed + stats.monitor.rounds.rounds_abandoned
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_rounds_complete_at_camera_rate_with_slow_detector() {
        let (monitor, queue) = setup();
        let session = MonitoringSession::start(
            monitor.clone(),
            Ok(Arc::new(FixedPose {
                delay: Duration::from_millis(50),
            })),
            Ok(Arc::new(FixedFace)),
        );

        // ~30 fps camera against a detector that needs 50 ms per frame
        for i in 0..30 {
            session.submit_frame(frame(1 + i * 33)).unwrap();
            tokio::time::sleep(Duration::from_millis(33)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        let stats = session.stop().await;

        let rounds = stats.monitor.rounds;
        assert_eq!(stats.frames_submitted, 30);
        assert!(stats.frames_dropped > 0);
        assert!(rounds.rounds_completed >= 5, "{rounds:?}");
        assert_eq!(rounds.rounds_opened, 30 - stats.frames_dropped);
        assert_eq!(rounds.stale_discarded, 0);
        assert_eq!(posture_count(&queue.drain()) as u64, rounds.rounds_completed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropped_session_ignores_inflight_result() {
        let (monitor, queue) = setup();
        let session = MonitoringSession::start(
            monitor.clone(),
            Ok(Arc::new(FixedPose {
                delay: Duration::from_millis(100),
            })),
            Ok(Arc::new(FixedFace)),
        );

        session.submit_frame(frame(1)).unwrap();
        // face finishes, pose is still mid-detection
        tokio::time::sleep(Duration::from_millis(30)).await;
        drop(session);
        assert!(!monitor.is_running());
        queue.drain();

        tokio::time::sleep(Duration::from_millis(200)).await;
        let stats = monitor.stats();
        assert_eq!(stats.late_after_stop, 1);
        assert_eq!(stats.rounds.rounds_completed, 0);
        assert_eq!(posture_count(&queue.drain()), 0);
    }

    #[tokio::test]
    async fn test_submit_after_stop_fails() {
        let (monitor, _queue) = setup();
        let session = MonitoringSession::start(
            monitor.clone(),
            Ok(Arc::new(FixedPose {
                delay: Duration::ZERO,
            })),
            Ok(Arc::new(FixedFace)),
        );
        session.cancel.cancel();
        assert!(matches!(
            session.submit_frame(frame(1)),
            Err(MonitorError::SessionStopped)
        ));
        session.stop().await;
        assert!(!monitor.is_running());
    }
}
