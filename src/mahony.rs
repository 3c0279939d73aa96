//! Mahony proportional-integral complementary filter

use nalgebra::{Quaternion, Vector3};

use crate::error::Result;
use crate::filter::{
    Filter, check_frequency, expected_gravity, magnetic_reference, prior, sample_period,
};
use crate::math::reference;
use crate::quaternion::QuaternionExt;
use crate::types::{MahonySettings, Sample};

/// Feeds the cross product between measured and predicted reference
/// directions back into the angular rate
///
/// The integral term persists across samples and is clamped component-wise
/// to `±integral_limit`. It is cleared by [`Filter::init`] and
/// [`Mahony::reset_integral`].
#[derive(Debug, Clone, Default)]
pub struct Mahony {
    settings: MahonySettings,
    integral: Vector3<f32>,
    frequency: Option<f32>,
}

impl Mahony {
    pub fn new(settings: MahonySettings) -> Self {
        Self {
            settings,
            integral: Vector3::zeros(),
            frequency: None,
        }
    }

    pub fn settings(&self) -> &MahonySettings {
        &self.settings
    }

    /// Accumulated integral feedback
    pub fn integral(&self) -> Vector3<f32> {
        self.integral
    }

    pub fn reset_integral(&mut self) {
        self.integral = Vector3::zeros();
    }

    /// Orientation error, `None` without a usable accelerometer
    fn error(q: &Quaternion<f32>, sample: &Sample) -> Option<Vector3<f32>> {
        let accel = reference(sample.accelerometer)?;
        let mut error = accel.cross(&expected_gravity(q));

        if let Some(mag) = reference(sample.magnetometer) {
            let b = magnetic_reference(q, &mag, sample.inclination);
            let predicted = q.conjugate().rotate_vector(&b);
            error += mag.cross(&predicted);
        } else {
            log::trace!("mahony: magnetometer unavailable, gravity-only feedback");
        }

        Some(error)
    }
}

impl Filter for Mahony {
    fn init(&mut self, frequency: f32) -> Result<()> {
        self.settings.validate()?;
        self.frequency = Some(check_frequency(frequency)?);
        self.reset_integral();
        log::debug!(
            "mahony: {} Hz, kp {}, ki {}",
            frequency,
            self.settings.kp,
            self.settings.ki
        );
        Ok(())
    }

    fn feed(&mut self, sample: &Sample, orientation: &mut Quaternion<f32>) -> Result<()> {
        let dt = sample_period(self.frequency)?;
        let q = prior(orientation)?;

        let mut rate = sample.angular_rate();
        if let Some(error) = Self::error(&q, sample) {
            let limit = self.settings.integral_limit;
            self.integral = (self.integral + error * dt).map(|e| e.clamp(-limit, limit));
            rate += error * self.settings.kp + self.integral * self.settings.ki;
        }

        *orientation = q.integrate(&rate, dt);
        Ok(())
    }

    fn frequency(&self) -> Option<f32> {
        self.frequency
    }
}
