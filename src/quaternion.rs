//! Quaternion algebra used by the fusion filters
//!
//! Orientation estimates are plain [`Quaternion<f32>`] values so that a
//! caller-owned estimate can be checked for degeneracy before every step.
//! Multiplication, conjugation, `exp`, `ln` and `powf` come straight from
//! nalgebra; this module adds the checked operations the filters rely on.
//!
//! Both naming conventions are available on the same value: `q.w, q.i, q.j,
//! q.k` and `q.coords.w, q.coords.x, q.coords.y, q.coords.z`.

// Float methods for no_std; shadowed by std's inherent ones in tests
#[allow(unused_imports)]
use nalgebra::ComplexField;
use nalgebra::{Matrix3, Quaternion, Rotation3, Unit, UnitQuaternion, Vector3};

use crate::error::{FusionError, Result};
use crate::math::{NORM_EPSILON, RAD_TO_DEG, Vector3Ext};

/// Dot products below `-1 + ANTIPODAL_EPSILON` are treated as antipodal
const ANTIPODAL_EPSILON: f32 = 1e-6;

/// Extension trait for the quaternion operations of the fusion engine
pub trait QuaternionExt: Sized {
    /// Scale to unit magnitude, or return the zero quaternion when the
    /// magnitude is numerically zero
    fn to_unit(&self) -> Self;

    /// Normalise into a [`UnitQuaternion`], failing on zero magnitude
    fn try_unit(&self) -> Result<UnitQuaternion<f32>>;

    /// Whether the magnitude is within `tolerance` of one
    fn is_unit(&self, tolerance: f32) -> bool;

    /// Inverse, failing on zero magnitude
    fn inverse_checked(&self) -> Result<Self>;

    /// Rotation taking `self` to `other`: `self⁻¹ ⊗ other`
    fn diff(&self, other: &Self) -> Result<Self>;

    /// Rotate a vector: `q ⊗ (0, v) ⊗ q*`
    fn rotate_vector(&self, v: &Vector3<f32>) -> Vector3<f32>;

    /// First-order integration of an angular velocity (rad/s) over `dt`
    /// seconds using `q̇ = ½ q ⊗ ω`, renormalised
    fn integrate(&self, angular_velocity: &Vector3<f32>, dt: f32) -> Self;

    /// Integrate the angular velocity `I⁻¹ L` produced by angular momentum
    /// `L` acting on a body with inertia tensor `I`
    fn integrate_momentum(
        &self,
        angular_momentum: &Vector3<f32>,
        inertia: &Matrix3<f32>,
        dt: f32,
    ) -> Result<Self>;

    /// Spherical linear interpolation
    ///
    /// `t` must lie in `[0, 1]`. Interpolation between antipodal
    /// quaternions is undefined and fails instead of flipping one operand.
    fn slerp_checked(&self, other: &Self, t: f32) -> Result<Self>;

    /// Linear interpolation followed by renormalisation, along the shorter arc
    fn lerp_shortest(&self, other: &Self, t: f32) -> Result<Self>;

    /// Rotation matrix of the normalised quaternion
    fn to_rotation_matrix(&self) -> Result<Matrix3<f32>>;

    /// Quaternion of the rotation closest to `matrix`
    fn from_rotation_matrix(matrix: &Matrix3<f32>) -> Self;

    /// Euler angles (roll, pitch, yaw) in radians
    fn to_euler(&self) -> Result<Vector3<f32>>;

    /// Euler angles (roll, pitch, yaw) in degrees
    fn to_euler_degrees(&self) -> Result<Vector3<f32>>;

    /// Quaternion from Euler angles in radians
    fn from_euler(roll: f32, pitch: f32, yaw: f32) -> Self;

    /// Rotation axis and angle in radians; the identity yields a zero axis
    fn to_axis_angle(&self) -> Result<(Vector3<f32>, f32)>;

    /// Quaternion rotating by `angle` radians about `axis`
    fn from_axis_angle(axis: &Vector3<f32>, angle: f32) -> Result<Self>;
}

impl QuaternionExt for Quaternion<f32> {
    fn to_unit(&self) -> Self {
        let norm = self.norm();
        if norm < NORM_EPSILON {
            Quaternion::new(0.0, 0.0, 0.0, 0.0)
        } else {
            *self * (1.0 / norm)
        }
    }

    fn try_unit(&self) -> Result<UnitQuaternion<f32>> {
        if self.norm() < NORM_EPSILON {
            return Err(FusionError::DegenerateQuaternion);
        }
        Ok(UnitQuaternion::new_normalize(*self))
    }

    fn is_unit(&self, tolerance: f32) -> bool {
        (self.norm() - 1.0).abs() <= tolerance
    }

    fn inverse_checked(&self) -> Result<Self> {
        if self.norm() < NORM_EPSILON {
            return Err(FusionError::DegenerateQuaternion);
        }
        self.try_inverse().ok_or(FusionError::DegenerateQuaternion)
    }

    fn diff(&self, other: &Self) -> Result<Self> {
        Ok(self.inverse_checked()? * other)
    }

    fn rotate_vector(&self, v: &Vector3<f32>) -> Vector3<f32> {
        let rotated = self * Quaternion::from_imag(*v) * self.conjugate();
        rotated.imag()
    }

    fn integrate(&self, angular_velocity: &Vector3<f32>, dt: f32) -> Self {
        let derivative = self * Quaternion::from_imag(*angular_velocity);
        (self + derivative * (0.5 * dt)).to_unit()
    }

    fn integrate_momentum(
        &self,
        angular_momentum: &Vector3<f32>,
        inertia: &Matrix3<f32>,
        dt: f32,
    ) -> Result<Self> {
        let inverse = inertia.try_inverse().ok_or(FusionError::SingularMatrix)?;
        Ok(self.integrate(&(inverse * angular_momentum), dt))
    }

    fn slerp_checked(&self, other: &Self, t: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&t) {
            return Err(FusionError::InterpolationOutOfRange);
        }
        let qa = self.try_unit()?.into_inner();
        let qb = other.try_unit()?.into_inner();

        let dot = qa.dot(&qb);
        if dot < -1.0 + ANTIPODAL_EPSILON {
            return Err(FusionError::AntipodalInterpolation);
        }

        let phi = dot.min(1.0).acos();
        let sin_phi = phi.sin();
        if sin_phi < NORM_EPSILON {
            // Operands coincide; the spherical weights are 0/0
            return Ok((qa * (1.0 - t) + qb * t).to_unit());
        }

        let wa = ((1.0 - t) * phi).sin() / sin_phi;
        let wb = (t * phi).sin() / sin_phi;
        Ok(qa * wa + qb * wb)
    }

    fn lerp_shortest(&self, other: &Self, t: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&t) {
            return Err(FusionError::InterpolationOutOfRange);
        }
        let qa = self.try_unit()?.into_inner();
        let mut qb = other.try_unit()?.into_inner();
        if qa.dot(&qb) < 0.0 {
            qb = -qb;
        }
        Ok((qa * (1.0 - t) + qb * t).to_unit())
    }

    fn to_rotation_matrix(&self) -> Result<Matrix3<f32>> {
        Ok(self.try_unit()?.to_rotation_matrix().into_inner())
    }

    fn from_rotation_matrix(matrix: &Matrix3<f32>) -> Self {
        let rotation = Rotation3::from_matrix(matrix);
        UnitQuaternion::from_rotation_matrix(&rotation).into_inner()
    }

    fn to_euler(&self) -> Result<Vector3<f32>> {
        let (roll, pitch, yaw) = self.try_unit()?.euler_angles();
        Ok(Vector3::new(roll, pitch, yaw))
    }

    fn to_euler_degrees(&self) -> Result<Vector3<f32>> {
        Ok(self.to_euler()? * RAD_TO_DEG)
    }

    fn from_euler(roll: f32, pitch: f32, yaw: f32) -> Self {
        UnitQuaternion::from_euler_angles(roll, pitch, yaw).into_inner()
    }

    fn to_axis_angle(&self) -> Result<(Vector3<f32>, f32)> {
        match self.try_unit()?.axis_angle() {
            Some((axis, angle)) => Ok((axis.into_inner(), angle)),
            None => Ok((Vector3::zeros(), 0.0)),
        }
    }

    fn from_axis_angle(axis: &Vector3<f32>, angle: f32) -> Result<Self> {
        let axis = axis.direction().ok_or(FusionError::DegenerateVector)?;
        Ok(UnitQuaternion::from_axis_angle(&Unit::new_unchecked(axis), angle).into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::f32::consts::{FRAC_PI_2, FRAC_PI_4};

    const EPSILON: f32 = 1e-6;

    fn assert_quat_eq(a: &Quaternion<f32>, b: &Quaternion<f32>, epsilon: f32) {
        assert!(
            (a.coords - b.coords).amax() <= epsilon,
            "quaternions differ: {:?} vs {:?}",
            a,
            b
        );
    }

    #[test]
    fn test_to_unit() {
        let q = Quaternion::new(1.0f32, 2.0, -3.0, 4.0).to_unit();
        assert!(q.is_unit(EPSILON));

        let zero = Quaternion::new(0.0f32, 0.0, 0.0, 0.0).to_unit();
        assert_eq!(zero, Quaternion::new(0.0, 0.0, 0.0, 0.0));
        assert_eq!(
            Quaternion::new(0.0f32, 1e-9, 0.0, 0.0).try_unit(),
            Err(FusionError::DegenerateQuaternion)
        );
    }

    #[test]
    fn test_diff_recovers_relative_rotation() {
        let qa = Quaternion::from_euler(0.1, -0.2, 0.3);
        let step = Quaternion::from_axis_angle(&Vector3::z(), 0.25).unwrap();
        let qb = qa * step;
        let d = qa.diff(&qb).unwrap();
        assert_quat_eq(&d, &step, 1e-5);
        assert!(Quaternion::new(0.0f32, 0.0, 0.0, 0.0).diff(&qb).is_err());
    }

    #[test]
    fn test_rotate_vector() {
        let q = Quaternion::from_axis_angle(&Vector3::z(), FRAC_PI_2).unwrap();
        let v = q.rotate_vector(&Vector3::x());
        assert!((v - Vector3::y()).amax() < EPSILON);
    }

    #[test]
    fn test_slerp_endpoints() {
        let qa = Quaternion::from_euler(0.3, 0.1, -0.4);
        let qb = Quaternion::from_euler(-0.2, 0.5, 1.0);
        assert_quat_eq(&qa.slerp_checked(&qb, 0.0).unwrap(), &qa, EPSILON);
        assert_quat_eq(&qa.slerp_checked(&qb, 1.0).unwrap(), &qb, EPSILON);
    }

    #[test]
    fn test_slerp_midpoint() {
        let qa = Quaternion::identity();
        let qb = Quaternion::from_axis_angle(&Vector3::z(), FRAC_PI_2).unwrap();
        let mid = qa.slerp_checked(&qb, 0.5).unwrap();
        let expected = Quaternion::from_axis_angle(&Vector3::z(), FRAC_PI_4).unwrap();
        assert_quat_eq(&mid, &expected, EPSILON);
        assert!(mid.is_unit(EPSILON));
    }

    #[test]
    fn test_slerp_rejects_out_of_range() {
        let qa = Quaternion::identity();
        let qb = Quaternion::from_euler(0.0, 0.0, 1.0);
        assert_eq!(qa.slerp_checked(&qb, -0.1), Err(FusionError::InterpolationOutOfRange));
        assert_eq!(qa.slerp_checked(&qb, 1.1), Err(FusionError::InterpolationOutOfRange));
    }

    #[test]
    fn test_slerp_rejects_antipodal() {
        let qa = Quaternion::from_euler(0.2, 0.1, 0.3);
        assert_eq!(qa.slerp_checked(&-qa, 0.5), Err(FusionError::AntipodalInterpolation));
    }

    #[test]
    fn test_slerp_identical_operands() {
        let qa = Quaternion::from_euler(0.2, 0.1, 0.3);
        assert_quat_eq(&qa.slerp_checked(&qa, 0.3).unwrap(), &qa, EPSILON);
    }

    #[test]
    fn test_lerp_takes_shorter_arc() {
        let qa = Quaternion::from_euler(0.2, 0.1, 0.3);
        let result = qa.lerp_shortest(&-qa, 0.5).unwrap();
        assert!(result.is_unit(EPSILON));
        assert_quat_eq(&result, &qa, EPSILON);
        assert!(qa.lerp_shortest(&qa, 2.0).is_err());
    }

    #[test]
    fn test_rotation_matrix_round_trip() {
        let q = Quaternion::from_euler(0.4, -0.3, 2.0);
        let m = q.to_rotation_matrix().unwrap();
        let back = Quaternion::from_rotation_matrix(&m);
        // q and -q describe the same rotation
        let back = if back.dot(&q) < 0.0 { -back } else { back };
        assert_quat_eq(&back, &q, 1e-5);
    }

    #[test]
    fn test_euler_round_trip() {
        let q = Quaternion::from_euler(0.5, -0.25, 1.5);
        let e = q.to_euler().unwrap();
        assert!((e - Vector3::new(0.5, -0.25, 1.5)).amax() < 1e-5);
        let deg = q.to_euler_degrees().unwrap();
        assert!((deg.z - 1.5 * RAD_TO_DEG).abs() < 1e-3);
    }

    #[test]
    fn test_axis_angle() {
        let q = Quaternion::from_axis_angle(&Vector3::new(0.0, 2.0, 0.0), 0.75).unwrap();
        let (axis, angle) = q.to_axis_angle().unwrap();
        assert!((axis - Vector3::y()).amax() < 1e-5);
        assert!((angle - 0.75).abs() < 1e-5);

        let (axis, angle) = Quaternion::<f32>::identity().to_axis_angle().unwrap();
        assert_eq!(axis, Vector3::zeros());
        assert_eq!(angle, 0.0);

        assert_eq!(
            Quaternion::from_axis_angle(&Vector3::zeros(), 1.0),
            Err(FusionError::DegenerateVector)
        );
    }

    #[test]
    fn test_integrate_constant_rate() {
        let mut q = Quaternion::identity();
        let rate = Vector3::new(0.0, 0.0, FRAC_PI_2);
        for _ in 0..1000 {
            q = q.integrate(&rate, 0.001);
        }
        let (axis, angle) = q.to_axis_angle().unwrap();
        assert!((axis - Vector3::z()).amax() < 1e-4);
        assert!((angle - FRAC_PI_2).abs() < 1e-3);
        assert!(q.is_unit(EPSILON));
    }

    #[test]
    fn test_integrate_momentum() {
        let q = Quaternion::identity();
        let inertia = Matrix3::from_diagonal(&Vector3::new(2.0, 2.0, 2.0));
        let from_momentum = q
            .integrate_momentum(&Vector3::new(0.2, 0.0, 0.0), &inertia, 0.01)
            .unwrap();
        let from_rate = q.integrate(&Vector3::new(0.1, 0.0, 0.0), 0.01);
        assert_quat_eq(&from_momentum, &from_rate, EPSILON);

        assert_eq!(
            q.integrate_momentum(&Vector3::x(), &Matrix3::zeros(), 0.01),
            Err(FusionError::SingularMatrix)
        );
    }
}
