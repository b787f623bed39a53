//! Recorded detector output and offline replay
//!
//! A recording is a newline-delimited JSON log of what the camera pipeline
//! and the detectors produced during a session. Replaying it through a
//! [`PostureMonitor`] reproduces the distance updates, merged posture rounds
//! and alert actions deterministically, which makes threshold tuning
//! possible without a camera.
//!
//! ```text
//! {"type":"frame","timestamp":1000}
//! {"type":"pose","timestamp":1000,"landmarks":[{"x":0.4,"y":0.65}, ...]}
//! {"type":"face","timestamp":1000,"faces":[{"width_px":180,"height_px":220}],"image_height_px":1920}
//! {"type":"detector_error","stream":"face","timestamp":1033,"message":"inference timeout"}
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::events::{EventQueue, MonitorEvent};
use crate::monitor::{FaceDetection, MonitorStats, PostureMonitor};
use crate::types::{Distance, FrameTimestamp, LandmarkSet, StreamKind};

/// One entry of a recorded session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordedEvent {
    /// A frame was captured and handed to both detectors
    Frame { timestamp: FrameTimestamp },

    /// Pose detector output for a frame; `null` landmarks means no body
    Pose {
        timestamp: FrameTimestamp,
        #[serde(default)]
        landmarks: Option<LandmarkSet>,
    },

    /// Face detector output for a frame
    Face {
        timestamp: FrameTimestamp,
        #[serde(flatten)]
        detection: FaceDetection,
    },

    /// Distance reading from a separately scheduled face-box detector
    Distance {
        timestamp: FrameTimestamp,
        distance_cm: Distance,
    },

    /// A detector failed on one frame
    DetectorError {
        stream: StreamKind,
        timestamp: FrameTimestamp,
        message: String,
    },

    /// A detector could not be set up
    StreamUnavailable { stream: StreamKind, message: String },
}

impl RecordedEvent {
    /// Frame timestamp the event refers to, if any
    pub fn timestamp(&self) -> Option<FrameTimestamp> {
        match self {
            RecordedEvent::Frame { timestamp }
            | RecordedEvent::Pose { timestamp, .. }
            | RecordedEvent::Face { timestamp, .. }
            | RecordedEvent::Distance { timestamp, .. }
            | RecordedEvent::DetectorError { timestamp, .. } => Some(*timestamp),
            RecordedEvent::StreamUnavailable { .. } => None,
        }
    }
}

/// Parse a newline-delimited recording; blank lines are skipped
pub fn parse_ndjson(ndjson: &str) -> Result<Vec<RecordedEvent>, MonitorError> {
    let mut events = Vec::new();
    for (line_num, line) in ndjson.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<RecordedEvent>(trimmed) {
            Ok(event) => events.push(event),
            Err(e) => {
                return Err(MonitorError::ParseError(format!(
                    "Failed to parse line {}: {}",
                    line_num + 1,
                    e
                )));
            }
        }
    }
    Ok(events)
}

/// Parse a recording stored as a JSON array
pub fn parse_array(json: &str) -> Result<Vec<RecordedEvent>, MonitorError> {
    Ok(serde_json::from_str(json)?)
}

/// Outcome of replaying a whole recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub events: Vec<MonitorEvent>,
    pub stats: MonitorStats,
}

/// Incremental replay driver.
///
/// Owns a started monitor wired to an [`EventQueue`]; every applied
/// recording entry returns the monitor events it caused.
pub struct Replayer {
    monitor: PostureMonitor,
    queue: Arc<EventQueue>,
}

impl Replayer {
    pub fn new(config: MonitorConfig) -> Result<Self, MonitorError> {
        let queue = Arc::new(EventQueue::new());
        let monitor = PostureMonitor::new(config, queue.clone())?;
        monitor.start();
        Ok(Self { monitor, queue })
    }

    pub fn monitor(&self) -> &PostureMonitor {
        &self.monitor
    }

    /// Feed one recorded entry to the monitor
    pub fn apply(&self, event: &RecordedEvent) -> Vec<MonitorEvent> {
        match event {
            RecordedEvent::Frame { timestamp } => {
                if !self.monitor.submit_frame(*timestamp) {
                    debug!(%timestamp, "recorded frame not opened");
                }
            }
            RecordedEvent::Pose {
                timestamp,
                landmarks,
            } => self.monitor.pose_result(*timestamp, landmarks.as_ref()),
            RecordedEvent::Face {
                timestamp,
                detection,
            } => self.monitor.face_result(*timestamp, detection),
            RecordedEvent::Distance {
                timestamp,
                distance_cm,
            } => self.monitor.distance_result(*timestamp, *distance_cm),
            RecordedEvent::DetectorError {
                stream,
                timestamp,
                message,
            } => self.monitor.detector_failed(
                *stream,
                *timestamp,
                &MonitorError::detection_failed(*stream, message.as_str()),
            ),
            RecordedEvent::StreamUnavailable { stream, message } => self.monitor.stream_unavailable(
                *stream,
                &MonitorError::detector_unavailable(*stream, message.as_str()),
            ),
        }
        self.queue.drain()
    }

    /// Stop the monitor; returns the events emitted by teardown and the final counters
    pub fn finish(self) -> (Vec<MonitorEvent>, MonitorStats) {
        self.monitor.stop();
        (self.queue.drain(), self.monitor.stats())
    }
}

/// Replay a complete recording with the given configuration
pub fn replay(
    config: MonitorConfig,
    events: &[RecordedEvent],
) -> Result<ReplayReport, MonitorError> {
    let replayer = Replayer::new(config)?;
    let mut emitted = Vec::new();
    for event in events {
        emitted.extend(replayer.apply(event));
    }
    let (tail, stats) = replayer.finish();
    emitted.extend(tail);
    Ok(ReplayReport {
        events: emitted,
        stats,
    })
}
