use nalgebra as na;
use serde::Deserialize;
use thiserror::Error;

/// Four ordered image-space corners of a detected fiducial marker,
/// together with the width of the image they were detected in.
#[derive(Debug, Clone)]
pub struct QuadDetection {
    pub corners: [na::Point2<f32>; 4],
    pub image_width: f32,
}

impl QuadDetection {
    /// Mean length of the three consecutive marker edges in pixels.
    fn apparent_width(&self) -> f32 {
        (0..3)
            .map(|i| na::distance(&self.corners[i], &self.corners[i + 1]))
            .sum::<f32>()
            / 3.0
    }
}

#[derive(Error, Debug)]
pub enum EstimatorError {
    #[error("degenerate marker geometry, apparent width {0} px")]
    DegenerateQuad(f32),
}

/// Known marker geometry used for monocular ranging.
#[derive(Deserialize, Debug, Clone)]
pub struct MarkerCalibration {
    /// apparent marker width in pixels when observed at the reference distance
    pub known_width: f32,
    /// distance in meters at which the marker spans `known_width` pixels
    pub reference_distance: f32,
}

/// Distance and lateral offset of the marker relative to the camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetEstimate {
    /// estimated distance to the marker in meters
    pub distance: f32,
    /// marker center offset from the image center in pixels, positive to the right
    pub lateral_offset: f32,
}

const MIN_APPARENT_WIDTH: f32 = 1e-3;

/// Triangulate distance and lateral offset from a detected quad.
///
/// Quads whose corners (nearly) coincide produce no usable width and are
/// rejected instead of yielding an infinite distance.
pub fn estimate(
    quad: &QuadDetection,
    calibration: &MarkerCalibration,
) -> Result<TargetEstimate, EstimatorError> {
    let apparent_width = quad.apparent_width();
    if !apparent_width.is_finite() || apparent_width < MIN_APPARENT_WIDTH {
        return Err(EstimatorError::DegenerateQuad(apparent_width));
    }
    let distance = calibration.reference_distance * calibration.known_width / apparent_width;
    let center = quad.corners.iter().map(|point| point.x).sum::<f32>() / 4.0;
    let lateral_offset = center - quad.image_width / 2.0;
    Ok(TargetEstimate {
        distance,
        lateral_offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn square(center_x: f32, center_y: f32, side: f32, image_width: f32) -> QuadDetection {
        let half = side / 2.0;
        QuadDetection {
            corners: [
                na::Point2::new(center_x - half, center_y - half),
                na::Point2::new(center_x + half, center_y - half),
                na::Point2::new(center_x + half, center_y + half),
                na::Point2::new(center_x - half, center_y + half),
            ],
            image_width,
        }
    }

    fn calibration() -> MarkerCalibration {
        MarkerCalibration {
            known_width: 100.0,
            reference_distance: 0.4,
        }
    }

    #[test]
    fn distance_at_calibration_width_is_reference_distance() {
        let quad = square(200.0, 200.0, 100.0, 400.0);
        let estimate = estimate(&quad, &calibration()).unwrap();
        assert_relative_eq!(estimate.distance, 0.4);
    }

    #[test]
    fn distance_decreases_as_apparent_width_grows() {
        let calibration = calibration();
        let far = estimate(&square(200.0, 200.0, 50.0, 400.0), &calibration).unwrap();
        let mid = estimate(&square(200.0, 200.0, 100.0, 400.0), &calibration).unwrap();
        let near = estimate(&square(200.0, 200.0, 200.0, 400.0), &calibration).unwrap();
        assert!(far.distance > mid.distance);
        assert!(mid.distance > near.distance);
    }

    #[test]
    fn centered_marker_has_zero_offset() {
        let quad = square(200.0, 100.0, 80.0, 400.0);
        let estimate = estimate(&quad, &calibration()).unwrap();
        assert_relative_eq!(estimate.lateral_offset, 0.0);
    }

    #[test]
    fn offset_sign_follows_marker_side() {
        let calibration = calibration();
        let right = estimate(&square(300.0, 100.0, 80.0, 400.0), &calibration).unwrap();
        let left = estimate(&square(100.0, 100.0, 80.0, 400.0), &calibration).unwrap();
        assert_relative_eq!(right.lateral_offset, 100.0);
        assert_relative_eq!(left.lateral_offset, -100.0);
    }

    #[test]
    fn coincident_corners_are_rejected() {
        let quad = square(200.0, 200.0, 0.0, 400.0);
        let result = estimate(&quad, &calibration());
        assert!(matches!(result, Err(EstimatorError::DegenerateQuad(_))));
    }
}
