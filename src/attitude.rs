//! Attitude and heading directly from accelerometer and magnetometer readings
//!
//! The earth frame is North-West-Up: the accelerometer of a level device at
//! rest reads `[0, 0, 1]` and the horizontal magnetic field points along +X.
//! These helpers provide the reference attitude used for gain tuning, the
//! triad orientation shared by SAAM and the Kalman bootstrap, and the
//! tilt/heading delta-quaternions used by AQUA and the complementary filter.

// Float methods for no_std; shadowed by std's inherent ones in tests
#[allow(unused_imports)]
use nalgebra::{ComplexField, RealField};
use nalgebra::{Matrix3, Quaternion, Rotation3, UnitQuaternion, Vector3};

use crate::error::{FusionError, Result};
use crate::math::{NORM_EPSILON, RAD_TO_DEG, Vector3Ext};
use crate::quaternion::QuaternionExt;

/// Roll, pitch and yaw in degrees
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Attitude {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

impl Attitude {
    /// Attitude of an orientation quaternion
    pub fn from_quaternion(q: &Quaternion<f32>) -> Result<Self> {
        let euler = q.to_euler_degrees()?;
        Ok(Self {
            roll: euler.x,
            pitch: euler.y,
            yaw: euler.z,
        })
    }
}

/// Roll and pitch from a single accelerometer reading (yaw is zero)
///
/// # Example
/// ```
/// use nalgebra::Vector3;
/// use attitude_fusion::attitude::attitude_from_accelerometer;
///
/// let att = attitude_from_accelerometer(&Vector3::new(0.0, 0.0, 1.0)).unwrap();
/// assert!(att.roll.abs() < 1e-6 && att.pitch.abs() < 1e-6);
/// ```
pub fn attitude_from_accelerometer(accelerometer: &Vector3<f32>) -> Result<Attitude> {
    if accelerometer.direction().is_none() {
        return Err(FusionError::DegenerateVector);
    }
    let (ax, ay, az) = (accelerometer.x, accelerometer.y, accelerometer.z);
    let roll = ay.atan2(az);
    let pitch = (-ax).atan2((ay * ay + az * az).sqrt());

    Ok(Attitude {
        roll: roll * RAD_TO_DEG,
        pitch: pitch * RAD_TO_DEG,
        yaw: 0.0,
    })
}

/// Full attitude from accelerometer and magnetometer (tilt-compensated yaw)
pub fn attitude_from_accel_mag(
    accelerometer: &Vector3<f32>,
    magnetometer: &Vector3<f32>,
) -> Result<Attitude> {
    let q = triad(accelerometer, magnetometer)?;
    Attitude::from_quaternion(&q)
}

/// Angle in degrees between two accelerometer readings
pub fn accelerometer_angle(a: &Vector3<f32>, b: &Vector3<f32>) -> Result<f32> {
    let a = a.direction().ok_or(FusionError::DegenerateVector)?;
    let b = b.direction().ok_or(FusionError::DegenerateVector)?;
    Ok(a.dot(&b).clamp(-1.0, 1.0).acos() * RAD_TO_DEG)
}

/// Orientation from the accelerometer/magnetometer triad
///
/// Builds the earth axes in body coordinates (up from the accelerometer,
/// west from up × magnetic field, north from west × up) and converts the
/// resulting rotation matrix into a quaternion.
pub fn triad(accelerometer: &Vector3<f32>, magnetometer: &Vector3<f32>) -> Result<Quaternion<f32>> {
    let up = accelerometer.direction().ok_or(FusionError::MissingReference)?;
    let field = magnetometer.direction().ok_or(FusionError::MissingReference)?;
    // Field parallel to gravity has no horizontal component
    let west = up.cross(&field).direction().ok_or(FusionError::DegenerateVector)?;
    let north = west.cross(&up);

    let matrix = Matrix3::from_rows(&[north.transpose(), west.transpose(), up.transpose()]);
    let rotation = Rotation3::from_matrix_unchecked(matrix);
    Ok(UnitQuaternion::from_rotation_matrix(&rotation).into_inner())
}

/// Tilt-compensated magnetic heading in degrees (-180° to +180°, 0° = North)
///
/// # Example
/// ```
/// use nalgebra::Vector3;
/// use attitude_fusion::attitude::magnetic_heading;
///
/// let accel = Vector3::new(0.0, 0.0, 1.0); // Level device
/// let mag = Vector3::new(1.0, 0.0, 0.0);   // Pointing North
/// let heading = magnetic_heading(&accel, &mag);
/// assert!(heading.abs() < 1.0);
/// ```
pub fn magnetic_heading(accelerometer: &Vector3<f32>, magnetometer: &Vector3<f32>) -> f32 {
    let west = accelerometer.cross(magnetometer).safe_normalize();
    let north = west.cross(accelerometer).safe_normalize();

    west.x.atan2(north.x) * RAD_TO_DEG
}

/// Heading relative to geographic north given the local declination in degrees
pub fn geographic_heading(
    accelerometer: &Vector3<f32>,
    magnetometer: &Vector3<f32>,
    declination: f32,
) -> f32 {
    wrap_degrees(magnetic_heading(accelerometer, magnetometer) + declination)
}

/// Degrees, minutes and seconds to decimal degrees; the sign of `degrees`
/// applies to the whole angle
pub fn dms_to_degrees(degrees: f32, minutes: f32, seconds: f32) -> f32 {
    let magnitude = degrees.abs() + minutes / 60.0 + seconds / 3600.0;
    if degrees.is_sign_negative() {
        -magnitude
    } else {
        magnitude
    }
}

/// Earth-frame correction that rotates the predicted gravity direction onto +Z
///
/// `q` is the current estimate and `up` the normalised accelerometer
/// reading. The correction has no component about the vertical axis.
pub(crate) fn gravity_delta(q: &Quaternion<f32>, up: &Vector3<f32>) -> Quaternion<f32> {
    let g = q.rotate_vector(up);
    if g.z < -1.0 + NORM_EPSILON {
        // Upside down: any horizontal axis works, pick X
        return Quaternion::new(0.0, 1.0, 0.0, 0.0);
    }
    let w = ((g.z + 1.0) * 0.5).sqrt();
    Quaternion::new(w, g.y / (2.0 * w), -g.x / (2.0 * w), 0.0)
}

/// Earth-frame correction about the vertical axis that turns the horizontal
/// projection of the field onto +X (north)
///
/// Returns `None` when the field is (nearly) vertical.
pub(crate) fn heading_delta(q: &Quaternion<f32>, field: &Vector3<f32>) -> Option<Quaternion<f32>> {
    let l = q.rotate_vector(field);
    let gamma = l.x * l.x + l.y * l.y;
    if gamma < NORM_EPSILON {
        return None;
    }
    let beta = gamma + l.x * gamma.sqrt();
    if beta < NORM_EPSILON * NORM_EPSILON {
        // Field points due south: half turn about Z
        return Some(Quaternion::new(0.0, 0.0, 0.0, 1.0));
    }
    Some(Quaternion::new(
        (beta / (2.0 * gamma)).sqrt(),
        0.0,
        0.0,
        -l.y / (2.0 * beta).sqrt(),
    ))
}

/// Wrap an angle in degrees into `(-180, 180]`
pub(crate) fn wrap_degrees(angle: f32) -> f32 {
    let wrapped = angle % 360.0;
    if wrapped > 180.0 {
        wrapped - 360.0
    } else if wrapped <= -180.0 {
        wrapped + 360.0
    } else {
        wrapped
    }
}
