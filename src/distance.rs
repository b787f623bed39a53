//! Viewing distance estimation
//!
//! Pinhole camera model: a face of known real-world width that spans
//! `face_box_height_px` of an `image_height_px` tall image sits at
//!
//! ```text
//! distance_mm = focal_mm * face_width_mm * image_height_px
//!             / (face_box_height_px * sensor_height_mm)
//! ```

use tracing::trace;

use crate::config::CameraIntrinsics;
use crate::error::MonitorError;
use crate::types::{Distance, FaceBox};

/// Distance estimator bound to one camera's intrinsics
#[derive(Debug, Clone)]
pub struct DistanceEstimator {
    intrinsics: CameraIntrinsics,
}

impl DistanceEstimator {
    pub fn new(intrinsics: CameraIntrinsics) -> Result<Self, MonitorError> {
        intrinsics.validate()?;
        Ok(Self { intrinsics })
    }

    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    /// Estimate distance in centimeters from a face box height.
    ///
    /// Degenerate inputs (non-positive box or image height, non-finite
    /// values) yield [`Distance::Indeterminate`].
    pub fn estimate(&self, image_height_px: u32, face_box_height_px: f64) -> Distance {
        if image_height_px == 0 || !face_box_height_px.is_finite() || face_box_height_px <= 0.0 {
            trace!(image_height_px, face_box_height_px, "degenerate face box");
            return Distance::Indeterminate;
        }

        let c = &self.intrinsics;
        let distance_mm = c.focal_length_mm * c.real_face_width_mm * f64::from(image_height_px)
            / (face_box_height_px * c.sensor_height_mm);

        if distance_mm.is_finite() {
            Distance::Measured(distance_mm / 10.0)
        } else {
            Distance::Indeterminate
        }
    }

    /// Estimate distance from a detector's face list; the first face wins.
    pub fn estimate_faces(&self, image_height_px: u32, faces: &[FaceBox]) -> Distance {
        match faces.first() {
            Some(face) => self.estimate(image_height_px, face.height_px),
            None => Distance::Indeterminate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn estimator() -> DistanceEstimator {
        DistanceEstimator::new(CameraIntrinsics {
            focal_length_mm: 4.0,
            sensor_height_mm: 3.6,
            real_face_width_mm: 140.0,
        })
        .unwrap()
    }

    #[test]
    fn test_reference_scenario() {
        let distance = estimator().estimate(1920, 400.0);

        let expected = 4.0 * 140.0 * 1920.0 / (400.0 * 3.6) / 10.0;
        let cm = distance.centimeters().unwrap();
        assert!((cm - expected).abs() < 1e-9);
        assert!((cm - 74.6667).abs() < 1e-3);
    }

    #[test]
    fn test_zero_box_is_indeterminate() {
        assert!(estimator().estimate(1920, 0.0).is_indeterminate());
        assert!(estimator().estimate(1920, -12.0).is_indeterminate());
        assert!(estimator().estimate(1920, f64::NAN).is_indeterminate());
        assert!(estimator().estimate(0, 400.0).is_indeterminate());
    }

    #[test]
    fn test_no_faces_is_indeterminate() {
        assert!(estimator().estimate_faces(1080, &[]).is_indeterminate());
    }

    #[test]
    fn test_first_face_is_used() {
        let faces = [FaceBox::with_height(500.0), FaceBox::with_height(100.0)];
        assert_eq!(
            estimator().estimate_faces(1080, &faces),
            estimator().estimate(1080, 500.0)
        );
    }

    #[test]
    fn test_invalid_intrinsics_rejected() {
        let result = DistanceEstimator::new(CameraIntrinsics {
            focal_length_mm: 0.0,
            ..CameraIntrinsics::default()
        });
        assert!(result.is_err());
    }

    proptest! {
        #[test]
        fn prop_larger_box_means_closer(
            image_height in 240u32..4096,
            smaller in 1.0f64..2000.0,
            delta in 0.5f64..2000.0,
        ) {
            let estimator = estimator();
            let far = estimator.estimate(image_height, smaller).centimeters().unwrap();
            let near = estimator.estimate(image_height, smaller + delta).centimeters().unwrap();
            prop_assert!(far > near);
        }

        #[test]
        fn prop_estimate_is_finite_or_indeterminate(
            image_height in 0u32..4096,
            box_height in -10.0f64..4096.0,
        ) {
            match estimator().estimate(image_height, box_height) {
                Distance::Measured(cm) => prop_assert!(cm.is_finite() && cm > 0.0),
                Distance::Indeterminate => prop_assert!(image_height == 0 || box_height <= 0.0),
            }
        }
    }
}
