//! Monitor configuration
//!
//! Every threshold and calibration constant used by the estimator, the
//! classifiers and the alert policy lives here so hosts can override them.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::MonitorError;

/// Average real-world face width in millimeters
pub const DEFAULT_REAL_FACE_WIDTH_MM: f64 = 140.0;

/// Viewing distance below which the overlay is shown
pub const DEFAULT_DISTANCE_THRESHOLD_CM: f64 = 30.0;

/// Physical camera parameters used by the pinhole distance model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraIntrinsics {
    /// Lens focal length in millimeters
    pub focal_length_mm: f64,
    /// Physical sensor height in millimeters
    pub sensor_height_mm: f64,
    /// Reference real-world face width in millimeters
    pub real_face_width_mm: f64,
}

impl Default for CameraIntrinsics {
    fn default() -> Self {
        Self {
            focal_length_mm: 4.0,
            sensor_height_mm: 3.6,
            real_face_width_mm: DEFAULT_REAL_FACE_WIDTH_MM,
        }
    }
}

impl CameraIntrinsics {
    /// Resolve intrinsics from the characteristics a camera stack reports.
    ///
    /// The first advertised focal length is used. Both a focal length and a
    /// sensor size (width, height) are required for distance estimation.
    pub fn from_characteristics(
        focal_lengths_mm: &[f64],
        sensor_size_mm: Option<(f64, f64)>,
    ) -> Result<Self, MonitorError> {
        let focal_length_mm = *focal_lengths_mm.first().ok_or_else(|| {
            MonitorError::IntrinsicsUnavailable(
                "focal lengths are empty; cannot estimate distance".to_string(),
            )
        })?;
        let (_, sensor_height_mm) = sensor_size_mm.ok_or_else(|| {
            MonitorError::IntrinsicsUnavailable(
                "sensor size is required for distance estimation".to_string(),
            )
        })?;

        let intrinsics = Self {
            focal_length_mm,
            sensor_height_mm,
            ..Self::default()
        };
        intrinsics.validate()?;
        Ok(intrinsics)
    }

    pub fn validate(&self) -> Result<(), MonitorError> {
        for (name, value) in [
            ("focal_length_mm", self.focal_length_mm),
            ("sensor_height_mm", self.sensor_height_mm),
            ("real_face_width_mm", self.real_face_width_mm),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(MonitorError::IntrinsicsUnavailable(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Geometric thresholds for the landmark classifiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostureThresholds {
    /// Shoulder-below-hip margin in normalized image height
    pub hunch: f64,
    /// Eye-line angle from horizontal, degrees
    pub tilt_degrees: f64,
    /// Shoulder-line angle from horizontal, degrees
    pub lying_degrees: f64,
    /// Nose x below this counts as a sideways glance
    pub glance_min_x: f64,
    /// Nose x above this counts as a sideways glance
    pub glance_max_x: f64,
}

impl Default for PostureThresholds {
    fn default() -> Self {
        Self {
            hunch: 0.10,
            tilt_degrees: 15.0,
            lying_degrees: 45.0,
            glance_min_x: 0.25,
            glance_max_x: 0.75,
        }
    }
}

impl PostureThresholds {
    pub fn validate(&self) -> Result<(), MonitorError> {
        if !self.hunch.is_finite() {
            return Err(invalid("hunch threshold must be finite"));
        }
        for (name, degrees) in [
            ("tilt_degrees", self.tilt_degrees),
            ("lying_degrees", self.lying_degrees),
        ] {
            if !(0.0..=90.0).contains(&degrees) {
                return Err(invalid(format!("{name} must be within [0, 90], got {degrees}")));
            }
        }
        if !(0.0..=1.0).contains(&self.glance_min_x) || !(0.0..=1.0).contains(&self.glance_max_x) {
            return Err(invalid("glance bounds must be within [0, 1]"));
        }
        if self.glance_min_x >= self.glance_max_x {
            return Err(invalid(format!(
                "glance_min_x ({}) must be below glance_max_x ({})",
                self.glance_min_x, self.glance_max_x
            )));
        }
        Ok(())
    }
}

/// Indices into the detectors' landmark schemes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LandmarkIndices {
    pub left_shoulder: usize,
    pub right_shoulder: usize,
    pub left_hip: usize,
    pub left_eye: usize,
    pub right_eye: usize,
    pub nose_tip: usize,
}

impl Default for LandmarkIndices {
    fn default() -> Self {
        Self {
            left_shoulder: 11,
            right_shoulder: 12,
            left_hip: 23,
            left_eye: 33,
            right_eye: 263,
            nose_tip: 1,
        }
    }
}

/// Overlay and notification behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Show the overlay when the viewer is closer than this
    pub distance_threshold_cm: f64,
    /// How long an unbroken run of indeterminate readings must last before a
    /// shown overlay is hidden. `None` keeps the overlay state unchanged for
    /// as long as no face is seen.
    pub indeterminate_dwell_ms: Option<u64>,
    /// Minimum gap between two proximity notifications
    pub proximity_cooldown_ms: u64,
    /// Minimum gap between two notifications for the same posture issue
    pub posture_cooldown_ms: u64,
    /// Target overlay opacity (0-1)
    pub overlay_opacity: f64,
    /// Overlay fade duration
    pub overlay_fade_ms: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            distance_threshold_cm: DEFAULT_DISTANCE_THRESHOLD_CM,
            indeterminate_dwell_ms: None,
            proximity_cooldown_ms: 0,
            posture_cooldown_ms: 0,
            overlay_opacity: 0.7,
            overlay_fade_ms: 300,
        }
    }
}

impl AlertConfig {
    pub fn validate(&self) -> Result<(), MonitorError> {
        if !(self.distance_threshold_cm.is_finite() && self.distance_threshold_cm > 0.0) {
            return Err(invalid("distance_threshold_cm must be positive"));
        }
        if !(0.0..=1.0).contains(&self.overlay_opacity) {
            return Err(invalid("overlay_opacity must be within [0, 1]"));
        }
        Ok(())
    }
}

/// Complete monitor configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub camera: CameraIntrinsics,
    pub thresholds: PostureThresholds,
    pub landmarks: LandmarkIndices,
    pub alerts: AlertConfig,
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), MonitorError> {
        self.camera.validate()?;
        self.thresholds.validate()?;
        self.alerts.validate()
    }

    /// Parse and validate a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, MonitorError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to pretty-printed JSON
    pub fn to_json(&self) -> Result<String, MonitorError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> Result<Self, MonitorError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn save(&self, path: &Path) -> Result<(), MonitorError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> MonitorError {
    MonitorError::InvalidConfig(reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.thresholds.hunch, 0.10);
        assert_eq!(config.thresholds.tilt_degrees, 15.0);
        assert_eq!(config.thresholds.lying_degrees, 45.0);
        assert_eq!(config.alerts.distance_threshold_cm, 30.0);
        assert_eq!(config.camera.real_face_width_mm, 140.0);
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config = MonitorConfig::from_json(
            r#"{"thresholds": {"tilt_degrees": 20.0}, "alerts": {"indeterminate_dwell_ms": 1500}}"#,
        )
        .unwrap();

        assert_eq!(config.thresholds.tilt_degrees, 20.0);
        assert_eq!(config.thresholds.hunch, 0.10);
        assert_eq!(config.alerts.indeterminate_dwell_ms, Some(1500));
        assert_eq!(config.landmarks, LandmarkIndices::default());
    }

    #[test]
    fn test_json_roundtrip() {
        let mut config = MonitorConfig::default();
        config.alerts.proximity_cooldown_ms = 10_000;
        config.camera.focal_length_mm = 3.2;

        let json = config.to_json().unwrap();
        assert_eq!(MonitorConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_inverted_glance_bounds_rejected() {
        let result = MonitorConfig::from_json(
            r#"{"thresholds": {"glance_min_x": 0.8, "glance_max_x": 0.2}}"#,
        );
        assert!(matches!(result, Err(MonitorError::InvalidConfig(_))));
    }

    #[test]
    fn test_non_positive_intrinsics_rejected() {
        let result = MonitorConfig::from_json(r#"{"camera": {"sensor_height_mm": 0.0}}"#);
        assert!(matches!(result, Err(MonitorError::IntrinsicsUnavailable(_))));
    }

    #[test]
    fn test_intrinsics_from_characteristics_uses_first_focal_length() {
        let intrinsics =
            CameraIntrinsics::from_characteristics(&[2.8, 4.2], Some((4.8, 3.6))).unwrap();
        assert_eq!(intrinsics.focal_length_mm, 2.8);
        assert_eq!(intrinsics.sensor_height_mm, 3.6);
    }

    #[test]
    fn test_intrinsics_require_focal_length_and_sensor_size() {
        assert!(CameraIntrinsics::from_characteristics(&[], Some((4.8, 3.6))).is_err());
        assert!(CameraIntrinsics::from_characteristics(&[4.0], None).is_err());
    }
}
