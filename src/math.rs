//! Mathematical utilities and nalgebra extensions shared by the filters

use nalgebra::Vector3;

/// Angle conversion factors
pub const DEG_TO_RAD: f32 = core::f32::consts::PI / 180.0;
pub const RAD_TO_DEG: f32 = 180.0 / core::f32::consts::PI;

/// Magnitude below which a vector or quaternion is treated as zero
pub const NORM_EPSILON: f32 = 1e-6;

/// Sensor-vector helpers on `Vector3<f32>`
pub trait Vector3Ext {
    /// Unit vector, or zero when the input has no usable direction
    fn safe_normalize(&self) -> Vector3<f32>;

    /// Unit direction of the vector, or `None` when its magnitude is below [`NORM_EPSILON`]
    fn direction(&self) -> Option<Vector3<f32>>;

    /// Component-wise degrees to radians
    fn deg_to_rad(&self) -> Vector3<f32>;

    /// Component-wise radians to degrees
    fn rad_to_deg(&self) -> Vector3<f32>;
}

impl Vector3Ext for Vector3<f32> {
    fn safe_normalize(&self) -> Vector3<f32> {
        self.direction().unwrap_or_else(Vector3::zeros)
    }

    fn direction(&self) -> Option<Vector3<f32>> {
        self.try_normalize(NORM_EPSILON)
    }

    fn deg_to_rad(&self) -> Vector3<f32> {
        *self * DEG_TO_RAD
    }

    fn rad_to_deg(&self) -> Vector3<f32> {
        *self * RAD_TO_DEG
    }
}

/// Unit direction of an optional sensor reading.
///
/// Absent and near-zero readings collapse to `None`; both mean "modality
/// unavailable this sample".
pub(crate) fn reference(reading: Option<Vector3<f32>>) -> Option<Vector3<f32>> {
    reading.and_then(|v| v.direction())
}
