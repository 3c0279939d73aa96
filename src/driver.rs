//! Filter driver with a pluggable fault sink, and run-time algorithm
//! selection

use nalgebra::Quaternion;

use crate::aqua::Aqua;
use crate::complementary::Complementary;
use crate::error::{FusionError, Result};
use crate::filter::Filter;
use crate::kalman::Kalman;
use crate::madgwick::Madgwick;
use crate::mahony::Mahony;
use crate::saam::Saam;
use crate::types::Sample;

/// Fault sink invoked with every error before it is returned to the caller
pub type ErrorHook = fn(&FusionError);

fn log_error(error: &FusionError) {
    log::error!("fusion error: {}", error);
}

/// Drives a [`Filter`] and reports its failures through an [`ErrorHook`]
///
/// # Example
/// ```
/// use nalgebra::{Quaternion, Vector3};
/// use attitude_fusion::{Driver, Madgwick, MadgwickSettings, Sample};
///
/// let mut driver = Driver::new(Madgwick::new(MadgwickSettings::default()));
/// driver.init(100.0).unwrap();
///
/// let mut orientation = Quaternion::identity();
/// let sample = Sample::imu(Vector3::new(0.0, 0.0, 0.1), Vector3::new(0.0, 0.0, 1.0));
/// driver.feed(&sample, &mut orientation).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct Driver<F> {
    filter: F,
    on_error: ErrorHook,
}

impl<F: Filter> Driver<F> {
    /// Wrap a filter; errors are logged at `error` level
    pub fn new(filter: F) -> Self {
        Self::with_error_hook(filter, log_error)
    }

    pub fn with_error_hook(filter: F, on_error: ErrorHook) -> Self {
        Self { filter, on_error }
    }

    pub fn init(&mut self, frequency: f32) -> Result<()> {
        let result = self.filter.init(frequency);
        self.report(result)
    }

    pub fn feed(&mut self, sample: &Sample, orientation: &mut Quaternion<f32>) -> Result<()> {
        let result = self.filter.feed(sample, orientation);
        self.report(result)
    }

    pub fn filter(&self) -> &F {
        &self.filter
    }

    pub fn filter_mut(&mut self) -> &mut F {
        &mut self.filter
    }

    pub fn into_inner(self) -> F {
        self.filter
    }

    fn report(&self, result: Result<()>) -> Result<()> {
        if let Err(error) = &result {
            (self.on_error)(error);
        }
        result
    }
}

/// Any of the fusion algorithms, selected at run time
#[derive(Debug, Clone)]
pub enum AnyFilter {
    Madgwick(Madgwick),
    Mahony(Mahony),
    Saam(Saam),
    Aqua(Aqua),
    Complementary(Complementary),
    Kalman(Kalman),
}

impl Filter for AnyFilter {
    fn init(&mut self, frequency: f32) -> Result<()> {
        match self {
            AnyFilter::Madgwick(f) => f.init(frequency),
            AnyFilter::Mahony(f) => f.init(frequency),
            AnyFilter::Saam(f) => f.init(frequency),
            AnyFilter::Aqua(f) => f.init(frequency),
            AnyFilter::Complementary(f) => f.init(frequency),
            AnyFilter::Kalman(f) => f.init(frequency),
        }
    }

    fn feed(&mut self, sample: &Sample, orientation: &mut Quaternion<f32>) -> Result<()> {
        match self {
            AnyFilter::Madgwick(f) => f.feed(sample, orientation),
            AnyFilter::Mahony(f) => f.feed(sample, orientation),
            AnyFilter::Saam(f) => f.feed(sample, orientation),
            AnyFilter::Aqua(f) => f.feed(sample, orientation),
            AnyFilter::Complementary(f) => f.feed(sample, orientation),
            AnyFilter::Kalman(f) => f.feed(sample, orientation),
        }
    }

    fn frequency(&self) -> Option<f32> {
        match self {
            AnyFilter::Madgwick(f) => f.frequency(),
            AnyFilter::Mahony(f) => f.frequency(),
            AnyFilter::Saam(f) => f.frequency(),
            AnyFilter::Aqua(f) => f.frequency(),
            AnyFilter::Complementary(f) => f.frequency(),
            AnyFilter::Kalman(f) => f.frequency(),
        }
    }
}

macro_rules! impl_from_filter {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for AnyFilter {
                fn from(filter: $variant) -> Self {
                    AnyFilter::$variant(filter)
                }
            }
        )*
    };
}

impl_from_filter!(Madgwick, Mahony, Saam, Aqua, Complementary, Kalman);
