//! Core types: per-sample sensor input and per-algorithm settings

use nalgebra::Vector3;

use crate::error::{FusionError, Result};

/// One step's worth of sensor data
///
/// Every modality is optional. An absent gyroscope is integrated as zero
/// angular rate; an absent (or all-zero) accelerometer or magnetometer
/// selects the filter's reduced-information update.
///
/// # Example
/// ```
/// use nalgebra::Vector3;
/// use attitude_fusion::Sample;
///
/// let sample = Sample::new(
///     Vector3::new(0.01, -0.02, 0.0),  // rad/s
///     Vector3::new(0.0, 0.0, 1.0),     // g
///     Vector3::new(22.0, 0.0, -40.0),  // µT
/// )
/// .with_inclination(61.0);
/// assert_eq!(sample.inclination, Some(61.0));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Sample {
    /// Angular velocity in radians per second
    pub gyroscope: Option<Vector3<f32>>,
    /// Specific force; only the direction is used by most filters
    pub accelerometer: Option<Vector3<f32>>,
    /// Magnetic field; only the direction is used
    pub magnetometer: Option<Vector3<f32>>,
    /// Local magnetic inclination (dip angle) in degrees
    ///
    /// When present, the earth-frame magnetic reference is built from it
    /// instead of from the current orientation estimate.
    pub inclination: Option<f32>,
}

impl Sample {
    /// Full MARG sample (gyroscope, accelerometer, magnetometer)
    pub fn new(
        gyroscope: Vector3<f32>,
        accelerometer: Vector3<f32>,
        magnetometer: Vector3<f32>,
    ) -> Self {
        Self {
            gyroscope: Some(gyroscope),
            accelerometer: Some(accelerometer),
            magnetometer: Some(magnetometer),
            inclination: None,
        }
    }

    /// IMU sample without magnetometer
    pub fn imu(gyroscope: Vector3<f32>, accelerometer: Vector3<f32>) -> Self {
        Self {
            gyroscope: Some(gyroscope),
            accelerometer: Some(accelerometer),
            ..Default::default()
        }
    }

    /// Gyroscope-only sample
    pub fn gyro(gyroscope: Vector3<f32>) -> Self {
        Self {
            gyroscope: Some(gyroscope),
            ..Default::default()
        }
    }

    /// Attach a known magnetic inclination in degrees
    pub fn with_inclination(mut self, inclination: f32) -> Self {
        self.inclination = Some(inclination);
        self
    }

    /// Angular velocity, zero when the gyroscope is absent
    pub fn angular_rate(&self) -> Vector3<f32> {
        self.gyroscope.unwrap_or_else(Vector3::zeros)
    }
}

/// Madgwick gradient-descent filter settings
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MadgwickSettings {
    /// Gradient-descent step gain (rad/s), must be non-negative
    pub beta: f32,
}

impl Default for MadgwickSettings {
    fn default() -> Self {
        Self { beta: 0.174 }
    }
}

impl MadgwickSettings {
    pub(crate) fn validate(&self) -> Result<()> {
        non_negative(self.beta, "beta")
    }
}

/// Mahony proportional-integral filter settings
///
/// # Example
/// ```
/// use attitude_fusion::MahonySettings;
///
/// let settings = MahonySettings {
///     kp: 1.0,
///     ..Default::default()
/// };
/// assert_eq!(settings.ki, 0.02);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MahonySettings {
    /// Proportional gain
    pub kp: f32,
    /// Integral gain
    pub ki: f32,
    /// Component-wise bound on the integral feedback (anti-windup)
    pub integral_limit: f32,
}

impl Default for MahonySettings {
    fn default() -> Self {
        Self {
            kp: 0.5,
            ki: 0.02,
            integral_limit: 0.1,
        }
    }
}

impl MahonySettings {
    pub(crate) fn validate(&self) -> Result<()> {
        non_negative(self.kp, "kp")?;
        non_negative(self.ki, "ki")?;
        non_negative(self.integral_limit, "integral_limit")
    }
}

/// AQUA (adaptive quaternion) filter settings
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AquaSettings {
    /// Accelerometer correction gain in `[0, 1]`
    pub alpha: f32,
    /// Magnetometer correction gain in `[0, 1]`
    pub beta: f32,
    /// Accelerometer interpolation threshold in `[0, 1]`
    ///
    /// Corrections whose scalar part exceeds it are attenuated with LERP,
    /// larger corrections with SLERP.
    pub e_a: f32,
    /// Magnetometer interpolation threshold in `[0, 1]`
    pub e_m: f32,
    /// Attenuate `alpha` when the accelerometer magnitude departs from 1 g
    pub adaptive: bool,
}

impl Default for AquaSettings {
    fn default() -> Self {
        Self {
            alpha: 0.7,
            beta: 0.7,
            e_a: 0.9,
            e_m: 0.9,
            adaptive: false,
        }
    }
}

impl AquaSettings {
    pub(crate) fn validate(&self) -> Result<()> {
        unit_interval(self.alpha, "alpha")?;
        unit_interval(self.beta, "beta")?;
        unit_interval(self.e_a, "e_a")?;
        unit_interval(self.e_m, "e_m")
    }
}

/// Complementary filter settings
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ComplementarySettings {
    /// Weight of the gyroscope estimate in `[0, 1]`; `1.0` is pure integration
    pub alpha: f32,
}

impl Default for ComplementarySettings {
    fn default() -> Self {
        Self { alpha: 0.7 }
    }
}

impl ComplementarySettings {
    pub(crate) fn validate(&self) -> Result<()> {
        unit_interval(self.alpha, "alpha")
    }
}

/// Extended Kalman filter noise settings
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KalmanSettings {
    /// Gyroscope noise variance, scales the process noise
    pub var_g: f32,
    /// Accelerometer noise variance (normalised units)
    pub var_a: f32,
    /// Magnetometer noise variance (normalised units)
    pub var_m: f32,
}

impl Default for KalmanSettings {
    fn default() -> Self {
        Self {
            var_g: 1e-4,
            var_a: 1e-2,
            var_m: 1e-2,
        }
    }
}

impl KalmanSettings {
    pub(crate) fn validate(&self) -> Result<()> {
        non_negative(self.var_g, "var_g")?;
        positive(self.var_a, "var_a")?;
        positive(self.var_m, "var_m")
    }
}

fn non_negative(value: f32, name: &'static str) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(FusionError::InvalidParameter(name))
    }
}

fn positive(value: f32, name: &'static str) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(FusionError::InvalidParameter(name))
    }
}

fn unit_interval(value: f32, name: &'static str) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(FusionError::InvalidParameter(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_constructors() {
        let g = Vector3::new(0.1, 0.2, 0.3);
        let a = Vector3::new(0.0, 0.0, 1.0);
        let imu = Sample::imu(g, a);
        assert_eq!(imu.magnetometer, None);
        assert_eq!(imu.angular_rate(), g);
        assert_eq!(Sample::default().angular_rate(), Vector3::zeros());
    }

    #[test]
    fn test_settings_validation() {
        assert!(MadgwickSettings::default().validate().is_ok());
        assert_eq!(
            MadgwickSettings { beta: -0.1 }.validate(),
            Err(FusionError::InvalidParameter("beta"))
        );

        let mahony = MahonySettings {
            ki: -1.0,
            ..Default::default()
        };
        assert_eq!(mahony.validate(), Err(FusionError::InvalidParameter("ki")));

        let aqua = AquaSettings {
            e_m: 1.5,
            ..Default::default()
        };
        assert_eq!(aqua.validate(), Err(FusionError::InvalidParameter("e_m")));

        assert!(ComplementarySettings { alpha: f32::NAN }.validate().is_err());

        let kalman = KalmanSettings {
            var_a: 0.0,
            ..Default::default()
        };
        assert_eq!(kalman.validate(), Err(FusionError::InvalidParameter("var_a")));
    }
}
