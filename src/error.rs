//! Error type shared by the filters, the quaternion algebra and the calibration routines

/// Result alias used throughout the crate
pub type Result<T> = core::result::Result<T, FusionError>;

/// Invalid-argument conditions reported by the engine
///
/// Numerically degenerate but recoverable inputs (a missing magnetometer,
/// an all-zero accelerometer) are not errors: each filter falls back to a
/// reduced-information update instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FusionError {
    /// Sample frequency was zero, negative or not finite
    #[error("sample frequency must be positive and finite")]
    InvalidFrequency,
    /// A configuration value is outside its documented range
    #[error("parameter `{0}` is out of range")]
    InvalidParameter(&'static str),
    /// `feed` was called before `init`
    #[error("filter has not been initialised")]
    NotInitialised,
    /// Quaternion magnitude is numerically zero and cannot be normalised
    #[error("quaternion has zero magnitude")]
    DegenerateQuaternion,
    /// A reference sensor required by the algorithm is absent or near zero
    #[error("accelerometer and magnetometer are both required")]
    MissingReference,
    /// A direction vector (rotation axis, reference field) has zero magnitude
    #[error("vector has zero magnitude")]
    DegenerateVector,
    /// Interpolation parameter outside `[0, 1]`
    #[error("interpolation parameter must lie in [0, 1]")]
    InterpolationOutOfRange,
    /// SLERP between (nearly) opposite quaternions is undefined
    #[error("cannot interpolate between antipodal quaternions")]
    AntipodalInterpolation,
    /// Sample batches passed to a calibration routine differ in length
    #[error("sample batches have different lengths")]
    SampleCountMismatch,
    /// Too few samples for the requested fit
    #[error("not enough samples")]
    InsufficientSamples,
    /// The fitted quadric is not a positive-definite ellipsoid
    #[error("samples do not describe an ellipsoid")]
    NotAnEllipsoid,
    /// A matrix that must be inverted is singular
    #[error("matrix is singular")]
    SingularMatrix,
}
