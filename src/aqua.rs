//! AQUA: adaptive quaternion filter
//!
//! The gyroscope prediction is corrected in two decoupled stages. The
//! accelerometer stage applies an earth-frame tilt correction with no yaw
//! component; the magnetometer stage then applies a rotation about the
//! vertical axis only, so magnetic disturbances never leak into roll and
//! pitch. Each correction is attenuated toward the identity by its gain,
//! using LERP when the correction is small (scalar part above the
//! threshold) and SLERP otherwise.

use nalgebra::Quaternion;

use crate::attitude::{gravity_delta, heading_delta};
use crate::error::Result;
use crate::filter::{Filter, check_frequency, prior, sample_period};
use crate::math::reference;
use crate::quaternion::QuaternionExt;
use crate::types::{AquaSettings, Sample};

/// Accelerometer magnitude error (in g) up to which the full gain applies
const ADAPTIVE_LOWER: f32 = 0.1;
/// Accelerometer magnitude error (in g) at and beyond which the gain is zero
const ADAPTIVE_UPPER: f32 = 0.2;

/// Gyroscope integration corrected by attenuated accelerometer and
/// magnetometer delta quaternions
#[derive(Debug, Clone, Default)]
pub struct Aqua {
    settings: AquaSettings,
    frequency: Option<f32>,
}

impl Aqua {
    pub fn new(settings: AquaSettings) -> Self {
        Self {
            settings,
            frequency: None,
        }
    }

    pub fn settings(&self) -> &AquaSettings {
        &self.settings
    }

    /// Accelerometer gain after the optional magnitude-based attenuation
    fn accelerometer_gain(&self, sample: &Sample) -> f32 {
        let alpha = self.settings.alpha;
        if !self.settings.adaptive {
            return alpha;
        }
        let magnitude = sample.accelerometer.map_or(0.0, |a| a.norm());
        alpha * adaptive_factor((magnitude - 1.0).abs())
    }
}

impl Filter for Aqua {
    fn init(&mut self, frequency: f32) -> Result<()> {
        self.settings.validate()?;
        self.frequency = Some(check_frequency(frequency)?);
        log::debug!(
            "aqua: {} Hz, alpha {}, beta {}, adaptive {}",
            frequency,
            self.settings.alpha,
            self.settings.beta,
            self.settings.adaptive
        );
        Ok(())
    }

    fn feed(&mut self, sample: &Sample, orientation: &mut Quaternion<f32>) -> Result<()> {
        let dt = sample_period(self.frequency)?;
        let mut q = prior(orientation)?.integrate(&sample.angular_rate(), dt);

        if let Some(up) = reference(sample.accelerometer) {
            let delta = gravity_delta(&q, &up);
            let delta = attenuate(&delta, self.accelerometer_gain(sample), self.settings.e_a)?;
            q = (delta * q).to_unit();
        }

        if let Some(field) = reference(sample.magnetometer) {
            match heading_delta(&q, &field) {
                Some(delta) => {
                    let delta = attenuate(&delta, self.settings.beta, self.settings.e_m)?;
                    q = (delta * q).to_unit();
                }
                None => log::trace!("aqua: vertical magnetic field, heading correction skipped"),
            }
        }

        *orientation = q;
        Ok(())
    }

    fn frequency(&self) -> Option<f32> {
        self.frequency
    }
}

/// Scale a correction quaternion toward the identity by `gain`
fn attenuate(delta: &Quaternion<f32>, gain: f32, threshold: f32) -> Result<Quaternion<f32>> {
    let identity = Quaternion::identity();
    if delta.w > threshold {
        identity.lerp_shortest(delta, gain)
    } else {
        identity.slerp_checked(delta, gain)
    }
}

/// Gain factor for an accelerometer magnitude error `error` in g
fn adaptive_factor(error: f32) -> f32 {
    if error <= ADAPTIVE_LOWER {
        1.0
    } else if error < ADAPTIVE_UPPER {
        (ADAPTIVE_UPPER - error) / (ADAPTIVE_UPPER - ADAPTIVE_LOWER)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FusionError;
    use crate::filter::expected_gravity;
    use nalgebra::Vector3;

    fn ready(settings: AquaSettings) -> Aqua {
        let mut filter = Aqua::new(settings);
        filter.init(100.0).unwrap();
        filter
    }

    #[test]
    fn test_adaptive_factor() {
        assert_eq!(adaptive_factor(0.0), 1.0);
        assert_eq!(adaptive_factor(0.1), 1.0);
        assert!((adaptive_factor(0.15) - 0.5).abs() < 1e-5);
        assert_eq!(adaptive_factor(0.2), 0.0);
        assert_eq!(adaptive_factor(3.0), 0.0);
    }

    #[test]
    fn test_attenuate_endpoints() {
        let delta = Quaternion::from_euler(0.3, -0.2, 0.0);
        let none = attenuate(&delta, 0.0, 0.9).unwrap();
        assert!((none.coords - Quaternion::identity().coords).amax() < 1e-6);
        let full = attenuate(&delta, 1.0, 0.9).unwrap();
        assert!((full.coords - delta.coords).amax() < 1e-6);
        // Below the threshold SLERP is used
        let full = attenuate(&delta, 1.0, 1.0).unwrap();
        assert!((full.coords - delta.coords).amax() < 1e-6);
    }

    #[test]
    fn test_full_gain_levels_in_one_step() {
        let mut filter = ready(AquaSettings {
            alpha: 1.0,
            ..Default::default()
        });
        let target = Quaternion::from_euler(0.5, 0.2, 0.0);
        let accel = target.conjugate().rotate_vector(&Vector3::z());
        let mut q = Quaternion::identity();
        filter.feed(&Sample::imu(Vector3::zeros(), accel), &mut q).unwrap();
        assert!((expected_gravity(&q) - accel).amax() < 1e-5);
    }

    #[test]
    fn test_magnetometer_does_not_tilt() {
        let mut filter = ready(AquaSettings::default());
        let mut q = Quaternion::identity();
        // Level device, field pointing east-ish and down
        let sample = Sample::new(
            Vector3::zeros(),
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.3, -0.4, -0.8),
        );
        for _ in 0..200 {
            filter.feed(&sample, &mut q).unwrap();
        }
        let gravity = expected_gravity(&q);
        assert!((gravity - Vector3::z()).amax() < 1e-5, "gravity {:?}", gravity);
        let heading = q.rotate_vector(&Vector3::new(0.3, -0.4, -0.8));
        assert!(heading.y.abs() < 1e-4, "heading {:?}", heading);
    }

    #[test]
    fn test_adaptive_ignores_strong_acceleration() {
        let mut filter = ready(AquaSettings {
            adaptive: true,
            ..Default::default()
        });
        let mut q = Quaternion::identity();
        // 1.5 g: far from free gravity, correction fully suppressed
        filter
            .feed(&Sample::imu(Vector3::zeros(), Vector3::new(1.5, 0.0, 0.0)), &mut q)
            .unwrap();
        assert!((q.coords - Quaternion::identity().coords).amax() < 1e-6);
    }

    #[test]
    fn test_gyro_only_integrates() {
        let mut filter = ready(AquaSettings::default());
        let mut q = Quaternion::identity();
        let rate = Vector3::new(0.0, 0.0, 1.0);
        filter.feed(&Sample::gyro(rate), &mut q).unwrap();
        let expected = Quaternion::<f32>::identity().integrate(&rate, 0.01);
        assert!((q.coords - expected.coords).amax() < 1e-7);
    }

    #[test]
    fn test_rejects_zero_prior() {
        let mut filter = ready(AquaSettings::default());
        let mut q = Quaternion::new(0.0, 0.0, 0.0, 0.0);
        assert_eq!(
            filter.feed(&Sample::gyro(Vector3::zeros()), &mut q),
            Err(FusionError::DegenerateQuaternion)
        );
    }
}
