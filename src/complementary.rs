//! Complementary filter: linear blend of gyroscope integration and an
//! accelerometer/magnetometer orientation

use nalgebra::Quaternion;

use crate::attitude::{gravity_delta, heading_delta, triad};
use crate::error::{FusionError, Result};
use crate::filter::{Filter, check_frequency, prior, sample_period};
use crate::math::reference;
use crate::quaternion::QuaternionExt;
use crate::types::{ComplementarySettings, Sample};

/// Blends `alpha · q_gyro + (1 - alpha) · q_ref` along the shorter arc
///
/// `q_ref` is the triad orientation when both references are usable. With
/// a single reference it is the gyroscope estimate with that reference's
/// full correction applied (tilt or heading), and with none the output is
/// pure integration.
#[derive(Debug, Clone, Default)]
pub struct Complementary {
    settings: ComplementarySettings,
    frequency: Option<f32>,
}

impl Complementary {
    pub fn new(settings: ComplementarySettings) -> Self {
        Self {
            settings,
            frequency: None,
        }
    }

    pub fn settings(&self) -> &ComplementarySettings {
        &self.settings
    }
}

impl Filter for Complementary {
    fn init(&mut self, frequency: f32) -> Result<()> {
        self.settings.validate()?;
        self.frequency = Some(check_frequency(frequency)?);
        log::debug!("complementary: {} Hz, alpha {}", frequency, self.settings.alpha);
        Ok(())
    }

    fn feed(&mut self, sample: &Sample, orientation: &mut Quaternion<f32>) -> Result<()> {
        let dt = sample_period(self.frequency)?;
        let q_gyro = prior(orientation)?.integrate(&sample.angular_rate(), dt);

        let q_ref = reference_orientation(&q_gyro, sample)?;
        *orientation = q_gyro.lerp_shortest(&q_ref, 1.0 - self.settings.alpha)?;
        Ok(())
    }

    fn frequency(&self) -> Option<f32> {
        self.frequency
    }
}

fn reference_orientation(q_gyro: &Quaternion<f32>, sample: &Sample) -> Result<Quaternion<f32>> {
    let accel = reference(sample.accelerometer);
    let mag = reference(sample.magnetometer);

    if let (Some(a), Some(m)) = (accel, mag) {
        match triad(&a, &m) {
            Ok(q) => return Ok(q),
            Err(FusionError::DegenerateVector) => {
                log::trace!("complementary: field parallel to gravity, tilt-only reference");
            }
            Err(e) => return Err(e),
        }
    }

    let reference = match (accel, mag) {
        (Some(up), _) => gravity_delta(q_gyro, &up) * q_gyro,
        (None, Some(field)) => match heading_delta(q_gyro, &field) {
            Some(delta) => delta * q_gyro,
            None => *q_gyro,
        },
        (None, None) => *q_gyro,
    };
    Ok(reference.to_unit())
}
