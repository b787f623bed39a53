//! Posture Watch - On-device posture and viewing-distance monitoring core
//!
//! Posture Watch fuses the output of two independent camera detectors into
//! user-facing state: pinhole distance estimation → landmark geometry
//! classification → per-frame round aggregation → alert policy.
//!
//! ## Modules
//!
//! - **Fusion core**: [`PostureMonitor`] takes detector completions from any
//!   thread and emits distance updates, merged posture rounds and alert actions
//! - **Session**: [`MonitoringSession`] runs blocking detectors as async tasks
//!   and drops frames that arrive while a detector is busy
//! - **Replay**: Re-run recorded detector output offline

pub mod aggregator;
pub mod alert;
pub mod classify;
pub mod config;
pub mod distance;
pub mod error;
pub mod events;
pub mod monitor;
pub mod replay;
pub mod session;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use aggregator::{MergedRound, RoundAggregator};
pub use alert::{AlertAction, AlertPolicy, OverlayState};
pub use config::{AlertConfig, CameraIntrinsics, MonitorConfig, PostureThresholds};
pub use distance::DistanceEstimator;
pub use error::MonitorError;
pub use events::{EventQueue, MonitorEvent, MonitorListener};
pub use monitor::{FaceDetection, PostureMonitor};
pub use replay::{replay, RecordedEvent, Replayer};
pub use session::{FaceDetector, Frame, MonitoringSession, PoseDetector};
pub use types::{Distance, FrameTimestamp, IssueSet, LandmarkSet, PostureIssue, StreamKind};

/// Library version reported by the CLI and the C ABI
pub const WATCH_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name used in diagnostic reports
pub const PRODUCER_NAME: &str = "posture-watch";
