//! Madgwick gradient-descent orientation filter
//!
//! Each step integrates the gyroscope through `q̇ = ½ q ⊗ ω` and subtracts a
//! `beta`-scaled, unit-length gradient of the discrepancy between the
//! earth-frame references rotated into the body frame and the measured
//! directions. Without a magnetometer only the gravity objective is used;
//! without an accelerometer the step is pure integration.

use nalgebra::{Matrix3x4, Matrix6x4, Quaternion, Vector3, Vector4, Vector6};

use crate::error::Result;
use crate::filter::{Filter, check_frequency, magnetic_reference, prior, sample_period};
use crate::math::{NORM_EPSILON, reference};
use crate::quaternion::QuaternionExt;
use crate::types::{MadgwickSettings, Sample};

/// Gradient-descent filter with a single gain `beta`
#[derive(Debug, Clone, Default)]
pub struct Madgwick {
    settings: MadgwickSettings,
    frequency: Option<f32>,
}

impl Madgwick {
    pub fn new(settings: MadgwickSettings) -> Self {
        Self {
            settings,
            frequency: None,
        }
    }

    pub fn settings(&self) -> &MadgwickSettings {
        &self.settings
    }

    /// Unit gradient of the objective, `None` when no reference is usable or
    /// the gradient vanishes
    fn gradient(&self, q: &Quaternion<f32>, sample: &Sample) -> Option<Vector4<f32>> {
        let accel = reference(sample.accelerometer)?;

        let step = match reference(sample.magnetometer) {
            Some(mag) => {
                let b = magnetic_reference(q, &mag, sample.inclination);
                let (f, j) = marg_objective(q, &accel, &mag, &b);
                j.transpose() * f
            }
            None => {
                log::trace!("madgwick: magnetometer unavailable, gravity-only step");
                let (f, j) = gravity_objective(q, &accel);
                j.transpose() * f
            }
        };

        step.try_normalize(NORM_EPSILON)
    }
}

impl Filter for Madgwick {
    fn init(&mut self, frequency: f32) -> Result<()> {
        self.settings.validate()?;
        self.frequency = Some(check_frequency(frequency)?);
        log::debug!("madgwick: {} Hz, beta {}", frequency, self.settings.beta);
        Ok(())
    }

    fn feed(&mut self, sample: &Sample, orientation: &mut Quaternion<f32>) -> Result<()> {
        let dt = sample_period(self.frequency)?;
        let q = prior(orientation)?;

        let mut q_dot = q * Quaternion::from_imag(sample.angular_rate()) * 0.5;
        if let Some(step) = self.gradient(&q, sample) {
            q_dot -= Quaternion::new(step[0], step[1], step[2], step[3]) * self.settings.beta;
        }

        *orientation = (q + q_dot * dt).to_unit();
        Ok(())
    }

    fn frequency(&self) -> Option<f32> {
        self.frequency
    }
}

/// Gravity objective `f_g` and its Jacobian with respect to `(w, x, y, z)`
fn gravity_objective(q: &Quaternion<f32>, accel: &Vector3<f32>) -> (Vector3<f32>, Matrix3x4<f32>) {
    let (w, x, y, z) = (q.w, q.i, q.j, q.k);

    let f = Vector3::new(
        2.0 * (x * z - w * y) - accel.x,
        2.0 * (w * x + y * z) - accel.y,
        2.0 * (0.5 - x * x - y * y) - accel.z,
    );

    #[rustfmt::skip]
    let j = Matrix3x4::new(
        -2.0 * y, 2.0 * z, -2.0 * w, 2.0 * x,
         2.0 * x, 2.0 * w,  2.0 * z, 2.0 * y,
         0.0,    -4.0 * x, -4.0 * y, 0.0,
    );

    (f, j)
}

/// Combined gravity and magnetic objective with its 6×4 Jacobian
fn marg_objective(
    q: &Quaternion<f32>,
    accel: &Vector3<f32>,
    mag: &Vector3<f32>,
    b: &Vector3<f32>,
) -> (Vector6<f32>, Matrix6x4<f32>) {
    let (w, x, y, z) = (q.w, q.i, q.j, q.k);
    let (bx, bz) = (b.x, b.z);
    let (fg, jg) = gravity_objective(q, accel);

    let f = Vector6::new(
        fg.x,
        fg.y,
        fg.z,
        2.0 * bx * (0.5 - y * y - z * z) + 2.0 * bz * (x * z - w * y) - mag.x,
        2.0 * bx * (x * y - w * z) + 2.0 * bz * (w * x + y * z) - mag.y,
        2.0 * bx * (w * y + x * z) + 2.0 * bz * (0.5 - x * x - y * y) - mag.z,
    );

    let mut j = Matrix6x4::zeros();
    j.fixed_view_mut::<3, 4>(0, 0).copy_from(&jg);

    #[rustfmt::skip]
    let jb = Matrix3x4::new(
        -2.0 * bz * y,
        2.0 * bz * z,
        -4.0 * bx * y - 2.0 * bz * w,
        -4.0 * bx * z + 2.0 * bz * x,

        -2.0 * bx * z + 2.0 * bz * x,
        2.0 * bx * y + 2.0 * bz * w,
        2.0 * bx * x + 2.0 * bz * z,
        -2.0 * bx * w + 2.0 * bz * y,

        2.0 * bx * y,
        2.0 * bx * z - 4.0 * bz * x,
        2.0 * bx * w - 4.0 * bz * y,
        2.0 * bx * x,
    );
    j.fixed_view_mut::<3, 4>(3, 0).copy_from(&jb);

    (f, j)
}
