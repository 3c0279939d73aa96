//! Extended Kalman filter on the orientation quaternion
//!
//! The state is the quaternion `(w, x, y, z)` with a 4×4 covariance. The
//! gyroscope drives the prediction; the normalised accelerometer and
//! magnetometer readings form the measurement, compared against the gravity
//! and magnetic references rotated into the body frame.

use nalgebra::{Matrix3x4, Matrix4, Matrix4x3, Quaternion, SMatrix, SVector, Vector3, Vector4};

use crate::attitude::triad;
use crate::error::Result;
use crate::filter::{
    Filter, check_frequency, expected_gravity, magnetic_reference, prior, sample_period,
};
use crate::math::reference;
use crate::quaternion::QuaternionExt;
use crate::types::{KalmanSettings, Sample};

/// Extended Kalman filter over the orientation quaternion with a 4×4 covariance
#[derive(Debug, Clone)]
pub struct Kalman {
    settings: KalmanSettings,
    covariance: Matrix4<f32>,
    initialised: bool,
    frequency: Option<f32>,
}

impl Default for Kalman {
    fn default() -> Self {
        Self::new(KalmanSettings::default())
    }
}

impl Kalman {
    pub fn new(settings: KalmanSettings) -> Self {
        Self {
            settings,
            covariance: Matrix4::identity(),
            initialised: false,
            frequency: None,
        }
    }

    pub fn settings(&self) -> &KalmanSettings {
        &self.settings
    }

    /// State covariance, ordered `(w, x, y, z)`
    pub fn covariance(&self) -> &Matrix4<f32> {
        &self.covariance
    }

    /// Whether the first sample after [`Filter::init`] has been consumed
    pub fn is_initialised(&self) -> bool {
        self.initialised
    }

    /// Propagate state and covariance through one gyroscope step
    fn predict(&mut self, state: &Vector4<f32>, rate: &Vector3<f32>, dt: f32) -> Vector4<f32> {
        let (w, x, y, z) = (state[0], state[1], state[2], state[3]);
        let (gx, gy, gz) = (rate.x, rate.y, rate.z);

        #[rustfmt::skip]
        let omega = Matrix4::new(
            0.0, -gx, -gy, -gz,
            gx,  0.0,  gz, -gy,
            gy,  -gz, 0.0,  gx,
            gz,   gy, -gx, 0.0,
        );
        let transition = Matrix4::identity() + omega * (0.5 * dt);

        #[rustfmt::skip]
        let xi = Matrix4x3::new(
            -x, -y, -z,
             w, -z,  y,
             z,  w, -x,
            -y,  x,  w,
        );
        let half_dt = 0.5 * dt;
        let process_noise = xi * xi.transpose() * (self.settings.var_g * half_dt * half_dt);

        self.covariance = transition * self.covariance * transition.transpose() + process_noise;
        normalized(transition * state)
    }

    /// Measurement update; skipped when the innovation covariance is singular
    fn correct<const M: usize>(
        &mut self,
        state: &Vector4<f32>,
        measured: &SVector<f32, M>,
        predicted: &SVector<f32, M>,
        jacobian: &SMatrix<f32, M, 4>,
        noise: &SVector<f32, M>,
    ) -> Vector4<f32> {
        let pht = self.covariance * jacobian.transpose();
        let innovation_covariance = jacobian * pht + SMatrix::<f32, M, M>::from_diagonal(noise);

        let Some(inverse) = innovation_covariance.try_inverse() else {
            log::trace!("kalman: singular innovation covariance, update skipped");
            return *state;
        };

        let gain = pht * inverse;
        self.covariance = (Matrix4::identity() - gain * jacobian) * self.covariance;
        normalized(state + gain * (measured - predicted))
    }
}

impl Filter for Kalman {
    fn init(&mut self, frequency: f32) -> Result<()> {
        self.settings.validate()?;
        self.frequency = Some(check_frequency(frequency)?);
        self.covariance = Matrix4::identity();
        self.initialised = false;
        log::debug!(
            "kalman: {} Hz, var_g {}, var_a {}, var_m {}",
            frequency,
            self.settings.var_g,
            self.settings.var_a,
            self.settings.var_m
        );
        Ok(())
    }

    fn feed(&mut self, sample: &Sample, orientation: &mut Quaternion<f32>) -> Result<()> {
        let dt = sample_period(self.frequency)?;
        let q = prior(orientation)?;

        let accel = reference(sample.accelerometer);
        let mag = reference(sample.magnetometer);

        if !self.initialised {
            self.initialised = true;
            self.covariance = Matrix4::identity();
            if let (Some(a), Some(m)) = (accel, mag) {
                if let Ok(start) = triad(&a, &m) {
                    log::debug!("kalman: bootstrapped from accelerometer and magnetometer");
                    *orientation = start;
                    return Ok(());
                }
            }
        }

        let state = to_state(&q);
        let state = self.predict(&state, &sample.angular_rate(), dt);
        let predicted = from_state(&state);

        let state = match (accel, mag) {
            (Some(a), Some(m)) => {
                let b = magnetic_reference(&predicted, &m, sample.inclination);
                let measured = SVector::<f32, 6>::new(a.x, a.y, a.z, m.x, m.y, m.z);
                let (h, jacobian) = marg_model(&predicted, &b);
                let (var_a, var_m) = (self.settings.var_a, self.settings.var_m);
                let noise = SVector::<f32, 6>::new(var_a, var_a, var_a, var_m, var_m, var_m);
                self.correct(&state, &measured, &h, &jacobian, &noise)
            }
            (Some(a), None) => {
                let (h, jacobian) = gravity_model(&predicted);
                let noise = Vector3::repeat(self.settings.var_a);
                self.correct(&state, &a, &h, &jacobian, &noise)
            }
            (None, _) => state,
        };

        *orientation = from_state(&state);
        Ok(())
    }

    fn frequency(&self) -> Option<f32> {
        self.frequency
    }
}

fn to_state(q: &Quaternion<f32>) -> Vector4<f32> {
    Vector4::new(q.w, q.i, q.j, q.k)
}

fn from_state(state: &Vector4<f32>) -> Quaternion<f32> {
    Quaternion::new(state[0], state[1], state[2], state[3])
}

fn normalized(state: Vector4<f32>) -> Vector4<f32> {
    to_state(&from_state(&state).to_unit())
}

/// Expected accelerometer reading and its Jacobian
fn gravity_model(q: &Quaternion<f32>) -> (Vector3<f32>, Matrix3x4<f32>) {
    let (w, x, y, z) = (q.w, q.i, q.j, q.k);

    #[rustfmt::skip]
    let jacobian = Matrix3x4::new(
        -2.0 * y, 2.0 * z, -2.0 * w, 2.0 * x,
         2.0 * x, 2.0 * w,  2.0 * z, 2.0 * y,
         2.0 * w, -2.0 * x, -2.0 * y, 2.0 * z,
    );

    (expected_gravity(q), jacobian)
}

/// Expected accelerometer and magnetometer readings and their 6×4 Jacobian
fn marg_model(q: &Quaternion<f32>, b: &Vector3<f32>) -> (SVector<f32, 6>, SMatrix<f32, 6, 4>) {
    let (w, x, y, z) = (q.w, q.i, q.j, q.k);
    let (bx, bz) = (b.x, b.z);
    let (g, jg) = gravity_model(q);

    let field = Vector3::new(
        bx * (w * w + x * x - y * y - z * z) + 2.0 * bz * (x * z - w * y),
        2.0 * bx * (x * y - w * z) + 2.0 * bz * (y * z + w * x),
        2.0 * bx * (x * z + w * y) + bz * (w * w - x * x - y * y + z * z),
    );

    #[rustfmt::skip]
    let jm = Matrix3x4::new(
        2.0 * (bx * w - bz * y), 2.0 * (bx * x + bz * z), 2.0 * (-bx * y - bz * w), 2.0 * (-bx * z + bz * x),
        2.0 * (-bx * z + bz * x), 2.0 * (bx * y + bz * w), 2.0 * (bx * x + bz * z), 2.0 * (-bx * w + bz * y),
        2.0 * (bx * y + bz * w), 2.0 * (bx * z - bz * x), 2.0 * (bx * w - bz * y), 2.0 * (bx * x + bz * z),
    );

    let mut h = SVector::<f32, 6>::zeros();
    h.fixed_rows_mut::<3>(0).copy_from(&g);
    h.fixed_rows_mut::<3>(3).copy_from(&field);

    let mut jacobian = SMatrix::<f32, 6, 4>::zeros();
    jacobian.fixed_view_mut::<3, 4>(0, 0).copy_from(&jg);
    jacobian.fixed_view_mut::<3, 4>(3, 0).copy_from(&jm);

    (h, jacobian)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FusionError;

    fn ready() -> Kalman {
        let mut filter = Kalman::default();
        filter.init(100.0).unwrap();
        filter
    }

    #[test]
    fn test_bootstrap_from_triad() {
        let mut filter = ready();
        let target = Quaternion::from_euler(0.1, -0.3, 0.8);
        let accel = target.conjugate().rotate_vector(&Vector3::z());
        let mag = target.conjugate().rotate_vector(&Vector3::new(0.6, 0.0, -0.8));
        let mut q = Quaternion::identity();

        assert!(!filter.is_initialised());
        filter.feed(&Sample::new(Vector3::zeros(), accel, mag), &mut q).unwrap();
        assert!(filter.is_initialised());
        let q = if q.dot(&target) < 0.0 { -q } else { q };
        assert!((q.coords - target.coords).amax() < 1e-5);
        assert_eq!(*filter.covariance(), Matrix4::identity());
    }

    #[test]
    fn test_reinit_resets_bootstrap() {
        let mut filter = ready();
        let mut q = Quaternion::identity();
        filter.feed(&Sample::gyro(Vector3::zeros()), &mut q).unwrap();
        assert!(filter.is_initialised());
        filter.init(200.0).unwrap();
        assert!(!filter.is_initialised());
    }

    #[test]
    fn test_field_model_matches_rotation() {
        let q = Quaternion::from_euler(0.4, 0.3, -0.6);
        let b = Vector3::new(0.6, 0.0, -0.8);
        let (h, _) = marg_model(&q, &b);
        let direct = q.conjugate().rotate_vector(&b);
        assert!((h.fixed_rows::<3>(3) - direct).amax() < 1e-6);
    }

    #[test]
    fn test_jacobian_matches_finite_difference() {
        let q = Quaternion::new(0.8, 0.3, -0.2, 0.4);
        let b = Vector3::new(0.5, 0.0, -0.7);
        let (_, jacobian) = marg_model(&q, &b);
        let h = 1e-3;
        for (col, idx) in [3usize, 0, 1, 2].into_iter().enumerate() {
            let mut plus = q;
            let mut minus = q;
            plus.coords[idx] += h;
            minus.coords[idx] -= h;
            let numeric = (marg_model(&plus, &b).0 - marg_model(&minus, &b).0) / (2.0 * h);
            assert!(
                (numeric - jacobian.column(col)).amax() < 1e-2,
                "column {} differs",
                col
            );
        }
    }

    #[test]
    fn test_converges_from_wrong_tilt() {
        let mut filter = ready();
        let target = Quaternion::from_euler(0.3, 0.2, 0.0);
        let accel = target.conjugate().rotate_vector(&Vector3::z());
        let mut q = Quaternion::identity();
        for _ in 0..500 {
            filter.feed(&Sample::imu(Vector3::zeros(), accel), &mut q).unwrap();
        }
        assert!((expected_gravity(&q) - accel).amax() < 1e-3);
        assert!(q.is_unit(1e-6));
    }

    #[test]
    fn test_gyro_only_predicts() {
        let mut filter = ready();
        let rate = Vector3::new(0.0, 0.0, 0.5);
        let mut q = Quaternion::identity();
        filter.feed(&Sample::gyro(rate), &mut q).unwrap();
        let expected = Quaternion::<f32>::identity().integrate(&rate, 0.01);
        assert!((q.coords - expected.coords).amax() < 1e-6);
        assert!(filter.covariance()[(0, 0)] > 1.0 - 1e-6);
    }

    #[test]
    fn test_rejects_zero_prior() {
        let mut filter = ready();
        let mut q = Quaternion::new(0.0, 0.0, 0.0, 0.0);
        assert_eq!(
            filter.feed(&Sample::gyro(Vector3::zeros()), &mut q),
            Err(FusionError::DegenerateQuaternion)
        );
    }
}
