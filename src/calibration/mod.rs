//! Sensor calibration: magnetometer hard/soft-iron fitting, correction
//! helpers and offline gain tuning
//!
//! Correction convention: `corrected = K · (raw + b)`, where `K` is the
//! symmetric soft-iron matrix and `b` the hard-iron offset (the negated
//! centre of the raw-measurement ellipsoid).

mod ellipsoid;
mod gain;

pub use ellipsoid::{EllipsoidFitSettings, fit_magnetometer, fit_magnetometer_fast};
pub use gain::{SampleBatch, tune_madgwick_beta, tune_mahony_kp};

use nalgebra::{Matrix3, Quaternion, Vector3};

use crate::error::Result;
use crate::quaternion::QuaternionExt;

/// Fitted magnetometer correction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MagnetometerCalibration {
    /// Symmetric soft-iron matrix `K`
    pub soft_iron: Matrix3<f32>,
    /// Hard-iron offset `b`
    pub hard_iron: Vector3<f32>,
}

impl Default for MagnetometerCalibration {
    fn default() -> Self {
        Self {
            soft_iron: Matrix3::identity(),
            hard_iron: Vector3::zeros(),
        }
    }
}

impl MagnetometerCalibration {
    /// Correct one raw magnetometer reading
    pub fn apply(&self, raw: &Vector3<f32>) -> Vector3<f32> {
        correct_vector(raw, &self.soft_iron, &self.hard_iron)
    }
}

/// De-bias a scalar reading: `(value + bias) · scale`
///
/// # Example
/// ```
/// use attitude_fusion::calibration::correct_scalar;
///
/// assert_eq!(correct_scalar(9.0, 0.5, 1.0), 5.0);
/// ```
pub fn correct_scalar(value: f32, scale: f32, bias: f32) -> f32 {
    (value + bias) * scale
}

/// De-bias a vector reading: `K · (raw + b)`
///
/// # Example
/// ```
/// use nalgebra::{Matrix3, Vector3};
/// use attitude_fusion::calibration::correct_vector;
///
/// let raw = Vector3::new(100.0, 200.0, 300.0);
/// let soft_iron = Matrix3::identity();
/// let hard_iron = Vector3::new(-10.0, -20.0, -30.0);
///
/// let corrected = correct_vector(&raw, &soft_iron, &hard_iron);
/// assert_eq!(corrected, Vector3::new(90.0, 180.0, 270.0));
/// ```
pub fn correct_vector(
    raw: &Vector3<f32>,
    soft_iron: &Matrix3<f32>,
    hard_iron: &Vector3<f32>,
) -> Vector3<f32> {
    soft_iron * (raw + hard_iron)
}

/// Rotate a vector by a 3×3 matrix
pub fn rotate_by_matrix(v: &Vector3<f32>, rotation: &Matrix3<f32>) -> Vector3<f32> {
    rotation * v
}

/// Rotate a vector by `angle` radians about `axis`
pub fn rotate_by_axis_angle(v: &Vector3<f32>, axis: &Vector3<f32>, angle: f32) -> Result<Vector3<f32>> {
    let q = Quaternion::from_axis_angle(axis, angle)?;
    Ok(q.rotate_vector(v))
}
