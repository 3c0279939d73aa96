//! Offline filter gain tuning by grid search
//!
//! Every candidate gain in `[0, 1)` at a resolution of 0.001 is evaluated by
//! running a fresh filter from the identity over the whole batch and
//! comparing its roll and pitch with the accelerometer-only attitude. That is
//! a thousand full passes over the batch: call it from a calibration step,
//! never from the sampling loop.

// Float methods for no_std; shadowed by std's inherent ones in tests
#[allow(unused_imports)]
use nalgebra::ComplexField;
use nalgebra::{Quaternion, Vector3};

use crate::attitude::{Attitude, attitude_from_accelerometer, wrap_degrees};
use crate::error::{FusionError, Result};
use crate::filter::{Filter, check_frequency};
use crate::madgwick::Madgwick;
use crate::mahony::Mahony;
use crate::types::{MadgwickSettings, MahonySettings, Sample};

const CANDIDATES: usize = 1000;
const RESOLUTION: f32 = 0.001;

/// Logged sensor batch with one row per sample in every slice
#[derive(Debug, Clone, Copy)]
pub struct SampleBatch<'a> {
    gyroscope: &'a [Vector3<f32>],
    accelerometer: &'a [Vector3<f32>],
    magnetometer: Option<&'a [Vector3<f32>]>,
    inclination: Option<f32>,
}

impl<'a> SampleBatch<'a> {
    pub fn new(
        gyroscope: &'a [Vector3<f32>],
        accelerometer: &'a [Vector3<f32>],
        magnetometer: Option<&'a [Vector3<f32>]>,
    ) -> Result<Self> {
        if gyroscope.is_empty() {
            return Err(FusionError::InsufficientSamples);
        }
        let rows = gyroscope.len();
        if accelerometer.len() != rows || magnetometer.is_some_and(|m| m.len() != rows) {
            return Err(FusionError::SampleCountMismatch);
        }
        Ok(Self {
            gyroscope,
            accelerometer,
            magnetometer,
            inclination: None,
        })
    }

    /// Magnetic inclination in degrees applied to every sample
    pub fn with_inclination(mut self, inclination: f32) -> Self {
        self.inclination = Some(inclination);
        self
    }

    pub fn len(&self) -> usize {
        self.gyroscope.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gyroscope.is_empty()
    }

    fn sample(&self, index: usize) -> Sample {
        Sample {
            gyroscope: Some(self.gyroscope[index]),
            accelerometer: Some(self.accelerometer[index]),
            magnetometer: self.magnetometer.map(|m| m[index]),
            inclination: self.inclination,
        }
    }
}

/// Madgwick `beta` minimising the roll/pitch error over the batch
///
/// Ties resolve to the smallest candidate.
pub fn tune_madgwick_beta(batch: &SampleBatch<'_>, frequency: f32) -> Result<f32> {
    check_frequency(frequency)?;
    let beta = grid_search(batch, frequency, |beta| {
        Madgwick::new(MadgwickSettings { beta })
    })?;
    log::debug!("madgwick beta tuned to {}", beta);
    Ok(beta)
}

/// Mahony `kp` minimising the roll/pitch error over the batch, with the
/// remaining settings at their defaults
pub fn tune_mahony_kp(batch: &SampleBatch<'_>, frequency: f32) -> Result<f32> {
    check_frequency(frequency)?;
    let kp = grid_search(batch, frequency, |kp| {
        Mahony::new(MahonySettings {
            kp,
            ..Default::default()
        })
    })?;
    log::debug!("mahony kp tuned to {}", kp);
    Ok(kp)
}

fn grid_search<F, B>(batch: &SampleBatch<'_>, frequency: f32, build: B) -> Result<f32>
where
    F: Filter,
    B: Fn(f32) -> F,
{
    let mut best_gain = 0.0;
    let mut best_error = f32::INFINITY;

    for i in 0..CANDIDATES {
        let gain = i as f32 * RESOLUTION;
        let mut filter = build(gain);
        filter.init(frequency)?;

        let error = attitude_error(&mut filter, batch)?;
        if error < best_error {
            best_gain = gain;
            best_error = error;
        }
    }

    Ok(best_gain)
}

/// RMS roll/pitch difference (degrees) between the filter and the
/// accelerometer-only attitude
fn attitude_error<F: Filter>(filter: &mut F, batch: &SampleBatch<'_>) -> Result<f32> {
    let mut orientation = Quaternion::identity();
    let mut total = 0.0;
    let mut count = 0usize;

    for index in 0..batch.len() {
        filter.feed(&batch.sample(index), &mut orientation)?;

        // Samples without a usable gravity direction carry no reference
        let Ok(reference) = attitude_from_accelerometer(&batch.accelerometer[index]) else {
            continue;
        };
        let estimate = Attitude::from_quaternion(&orientation)?;
        let roll = wrap_degrees(estimate.roll - reference.roll);
        let pitch = wrap_degrees(estimate.pitch - reference.pitch);
        total += roll * roll + pitch * pitch;
        count += 1;
    }

    if count == 0 {
        return Ok(0.0);
    }
    Ok((total / count as f32).sqrt())
}
