#![no_std]

//! Attitude fusion - orientation estimation from inertial and magnetic sensors
//!
//! Six interchangeable algorithms estimate the body-to-earth orientation of a
//! device as a unit quaternion from gyroscope, accelerometer and magnetometer
//! samples. Every algorithm implements [`Filter`]: configure it, call
//! [`Filter::init`] with the sampling frequency, then [`Filter::feed`] it one
//! [`Sample`] at a time together with the current orientation estimate.
//!
//! # Features
//!
//! - Gradient-descent ([`Madgwick`]) and proportional-integral ([`Mahony`]) filters
//! - Closed-form accelerometer/magnetometer attitude ([`Saam`])
//! - Algebraic quaternion filter with adaptive gain ([`Aqua`])
//! - Quaternion-interpolating complementary filter ([`Complementary`])
//! - Extended Kalman filter over the quaternion state ([`Kalman`])
//! - Magnetometer hard/soft-iron fitting and gain tuning in [`calibration`]
//! - `#![no_std]` and allocation-free for embedded targets
//!
//! Frames follow the NWU convention: x north, y west, z up. Gyroscope rates are
//! in rad/s; accelerometer and magnetometer readings may use any unit since
//! only their directions are used.
//!
//! # Quick Start
//!
//! ```rust
//! use nalgebra::{Quaternion, Vector3};
//! use attitude_fusion::{Driver, Madgwick, MadgwickSettings, QuaternionExt, Sample};
//!
//! let mut driver = Driver::new(Madgwick::new(MadgwickSettings { beta: 0.1 }));
//! driver.init(100.0).unwrap();
//!
//! let mut orientation = Quaternion::identity();
//! let sample = Sample::new(
//!     Vector3::new(0.01, -0.02, 0.0),  // rad/s
//!     Vector3::new(0.0, 0.0, 1.0),     // g
//!     Vector3::new(20.0, 0.0, -40.0),  // µT
//! );
//! driver.feed(&sample, &mut orientation).unwrap();
//!
//! // Roll, pitch and yaw in degrees
//! let euler = orientation.to_euler_degrees().unwrap();
//! assert!(euler.x.abs() < 1.0 && euler.y.abs() < 1.0);
//! ```

pub mod attitude;
pub mod calibration;
mod driver;
mod error;
mod filter;
mod math;
pub mod quaternion;
mod types;

mod aqua;
mod complementary;
mod kalman;
mod madgwick;
mod mahony;
mod saam;

pub use aqua::Aqua;
pub use attitude::Attitude;
pub use calibration::MagnetometerCalibration;
pub use complementary::Complementary;
pub use driver::{AnyFilter, Driver, ErrorHook};
pub use error::{FusionError, Result};
pub use filter::Filter;
pub use kalman::Kalman;
pub use madgwick::Madgwick;
pub use mahony::Mahony;
pub use math::{DEG_TO_RAD, NORM_EPSILON, RAD_TO_DEG, Vector3Ext};
pub use quaternion::QuaternionExt;
pub use saam::Saam;
pub use types::*;
