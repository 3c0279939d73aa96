//! Super-fast attitude from accelerometer and magnetometer
//!
//! Closed form and memoryless: the estimate is rebuilt from the
//! accelerometer/magnetometer triad on every sample. The gyroscope and the
//! incoming orientation are ignored.

use nalgebra::Quaternion;

use crate::attitude::triad;
use crate::error::{FusionError, Result};
use crate::filter::{Filter, check_frequency};
use crate::types::Sample;

/// Closed-form attitude from accelerometer and magnetometer; keeps no state
#[derive(Debug, Clone, Default)]
pub struct Saam {
    frequency: Option<f32>,
}

impl Saam {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Filter for Saam {
    fn init(&mut self, frequency: f32) -> Result<()> {
        self.frequency = Some(check_frequency(frequency)?);
        log::debug!("saam: {} Hz", frequency);
        Ok(())
    }

    fn feed(&mut self, sample: &Sample, orientation: &mut Quaternion<f32>) -> Result<()> {
        if self.frequency.is_none() {
            return Err(FusionError::NotInitialised);
        }
        let (Some(accel), Some(mag)) = (sample.accelerometer, sample.magnetometer) else {
            return Err(FusionError::MissingReference);
        };

        *orientation = triad(&accel, &mag)?;
        Ok(())
    }

    fn frequency(&self) -> Option<f32> {
        self.frequency
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quaternion::QuaternionExt;
    use nalgebra::Vector3;

    #[test]
    fn test_requires_both_references() {
        let mut filter = Saam::new();
        filter.init(10.0).unwrap();
        let mut q = Quaternion::identity();

        let imu = Sample::imu(Vector3::zeros(), Vector3::z());
        assert_eq!(filter.feed(&imu, &mut q), Err(FusionError::MissingReference));

        let zero_mag = Sample::new(Vector3::zeros(), Vector3::z(), Vector3::zeros());
        assert_eq!(filter.feed(&zero_mag, &mut q), Err(FusionError::MissingReference));
        assert_eq!(q, Quaternion::identity());
    }

    #[test]
    fn test_ignores_gyroscope_and_prior() {
        let mut filter = Saam::new();
        filter.init(10.0).unwrap();

        let target = Quaternion::from_euler(0.2, -0.1, 1.3);
        let accel = target.conjugate().rotate_vector(&Vector3::z());
        let mag = target.conjugate().rotate_vector(&Vector3::new(0.4, 0.0, -0.9));

        let mut still = Quaternion::new(0.0, 0.0, 0.0, 0.0);
        let mut spinning = Quaternion::from_euler(1.0, 1.0, 1.0);
        filter.feed(&Sample::new(Vector3::zeros(), accel, mag), &mut still).unwrap();
        filter
            .feed(&Sample::new(Vector3::new(3.0, -2.0, 1.0), accel, mag), &mut spinning)
            .unwrap();

        assert_eq!(still, spinning);
        let still = if still.dot(&target) < 0.0 { -still } else { still };
        assert!((still.coords - target.coords).amax() < 1e-5);
        assert!(still.is_unit(1e-6));
    }
}
