//! Uniform driver contract implemented by every fusion algorithm
//!
//! A filter starts uninitialised; [`Filter::init`] stores the sample
//! frequency and validates the settings, after which [`Filter::feed`] is
//! called once per sample. All state lives in the filter value and in the
//! caller-owned orientation quaternion, so independent instances never
//! interfere with each other.

// Float methods for no_std; shadowed by std's inherent ones in tests
#[allow(unused_imports)]
use nalgebra::ComplexField;
use nalgebra::{Quaternion, Vector3};

use crate::error::{FusionError, Result};
use crate::math::DEG_TO_RAD;
use crate::quaternion::QuaternionExt;
use crate::types::Sample;

/// Fusion algorithm driven by an external sampling loop
pub trait Filter {
    /// Configure the sample frequency in Hz and reset any persistent state
    fn init(&mut self, frequency: f32) -> Result<()>;

    /// Advance the orientation estimate by one sample
    ///
    /// Bounded and non-blocking; reads and mutates only `self` and
    /// `orientation`.
    fn feed(&mut self, sample: &Sample, orientation: &mut Quaternion<f32>) -> Result<()>;

    /// Configured sample frequency, `None` until [`Filter::init`] succeeds
    fn frequency(&self) -> Option<f32>;
}

pub(crate) fn check_frequency(frequency: f32) -> Result<f32> {
    if frequency.is_finite() && frequency > 0.0 {
        Ok(frequency)
    } else {
        Err(FusionError::InvalidFrequency)
    }
}

/// Sample period of an initialised filter
pub(crate) fn sample_period(frequency: Option<f32>) -> Result<f32> {
    frequency
        .map(|f| 1.0 / f)
        .ok_or(FusionError::NotInitialised)
}

/// Normalised copy of the incoming estimate
pub(crate) fn prior(orientation: &Quaternion<f32>) -> Result<Quaternion<f32>> {
    Ok(orientation.try_unit()?.into_inner())
}

/// Earth-frame magnetic reference `[bx, 0, bz]`
///
/// Built from the inclination (degrees, positive below the horizon) when
/// given, otherwise from the measured field rotated into the earth frame by
/// the current estimate.
pub(crate) fn magnetic_reference(
    q: &Quaternion<f32>,
    field: &Vector3<f32>,
    inclination: Option<f32>,
) -> Vector3<f32> {
    match inclination {
        Some(degrees) => {
            let (sin, cos) = (degrees * DEG_TO_RAD).sin_cos();
            Vector3::new(cos, 0.0, -sin)
        }
        None => {
            let h = q.rotate_vector(field);
            Vector3::new((h.x * h.x + h.y * h.y).sqrt(), 0.0, h.z)
        }
    }
}

/// Direction of gravity in the body frame predicted by `q`
pub(crate) fn expected_gravity(q: &Quaternion<f32>) -> Vector3<f32> {
    let (w, x, y, z) = (q.w, q.i, q.j, q.k);
    Vector3::new(
        2.0 * (x * z - w * y),
        2.0 * (w * x + y * z),
        w * w - x * x - y * y + z * z,
    )
}
