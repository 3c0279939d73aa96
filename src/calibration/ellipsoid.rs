//! Magnetometer hard/soft-iron ellipsoid fits
//!
//! Both fits accept raw `f32` samples and solve in `f64`. They are batch
//! operations meant for a calibration step, not for the sampling loop.

// Float methods for no_std; shadowed by std's inherent ones in tests
#[allow(unused_imports)]
use nalgebra::ComplexField;
use nalgebra::{Matrix3, SMatrix, SVector, Vector3};

use super::MagnetometerCalibration;
use crate::error::{FusionError, Result};

/// Geomagnetic field magnitude (µT) assumed when none is supplied
const DEFAULT_FIELD: f64 = 50.0;

/// Unknowns of the general ellipsoid: six soft-iron terms and three offsets
const MIN_SAMPLES: usize = 9;

const COST_TOLERANCE: f64 = 1e-12;
const STEP_TOLERANCE: f64 = 1e-10;
const DIAGONAL_FLOOR: f64 = 1e-12;
const NORM_FLOOR: f64 = 1e-9;
const RANK_TOLERANCE: f64 = 1e-9;

/// Levenberg–Marquardt fit settings
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EllipsoidFitSettings {
    /// Initial damping factor λ
    pub lambda: f32,
    /// Damping adaptation factor μ (`λ /= μ` after an improving step,
    /// `λ *= μ` otherwise); must be at least 1
    pub mu: f32,
    /// Known local field magnitude; the sphere-fit radius is used when `None`
    pub expected_field: Option<f32>,
    /// Iteration cap for each of the two phases
    pub max_iterations: usize,
}

impl Default for EllipsoidFitSettings {
    fn default() -> Self {
        Self {
            lambda: 1.0,
            mu: 10.0,
            expected_field: None,
            max_iterations: 200,
        }
    }
}

impl EllipsoidFitSettings {
    fn validate(&self) -> Result<()> {
        if !(self.lambda.is_finite() && self.lambda > 0.0) {
            return Err(FusionError::InvalidParameter("lambda"));
        }
        if !(self.mu.is_finite() && self.mu >= 1.0) {
            return Err(FusionError::InvalidParameter("mu"));
        }
        if let Some(field) = self.expected_field {
            if !(field.is_finite() && field > 0.0) {
                return Err(FusionError::InvalidParameter("expected_field"));
            }
        }
        if self.max_iterations == 0 {
            return Err(FusionError::InvalidParameter("max_iterations"));
        }
        Ok(())
    }
}

/// Two-phase Levenberg–Marquardt ellipsoid fit
///
/// Phase one fits a sphere (offset and radius). Phase two refines a
/// symmetric soft-iron matrix and the offset, seeded with the identity and
/// the sphere offset, so that `|K · (m + b)|` matches the expected field
/// magnitude (or the sphere radius).
pub fn fit_magnetometer(
    samples: &[Vector3<f32>],
    settings: &EllipsoidFitSettings,
) -> Result<MagnetometerCalibration> {
    settings.validate()?;
    if samples.len() < MIN_SAMPLES {
        return Err(FusionError::InsufficientSamples);
    }

    let count = samples.len() as f64;
    let mean = samples
        .iter()
        .fold(Vector3::<f64>::zeros(), |acc, m| acc + m.cast::<f64>())
        / count;
    let radius = samples
        .iter()
        .map(|m| (m.cast::<f64>() - mean).norm())
        .sum::<f64>()
        / count;
    if radius < NORM_FLOOR {
        return Err(FusionError::NotAnEllipsoid);
    }

    let start = SVector::<f64, 4>::new(-mean.x, -mean.y, -mean.z, radius);
    let sphere = levenberg_marquardt(start, samples, settings, sphere_residual);
    let (normal, _, _) = normal_equations(&sphere, samples, &sphere_residual);
    if !full_rank(&normal) {
        return Err(FusionError::NotAnEllipsoid);
    }
    let radius = settings.expected_field.map_or(sphere[3], f64::from);
    log::debug!(
        "sphere fit: offset [{}, {}, {}], radius {}",
        sphere[0],
        sphere[1],
        sphere[2],
        sphere[3]
    );

    #[rustfmt::skip]
    let start = SVector::<f64, 9>::from_column_slice(&[
        1.0, 1.0, 1.0,
        0.0, 0.0, 0.0,
        sphere[0], sphere[1], sphere[2],
    ]);
    let ellipsoid = levenberg_marquardt(start, samples, settings, |p, m| {
        ellipsoid_residual(p, m, radius)
    });

    let matrix = soft_iron(&ellipsoid);
    if matrix.cholesky().is_none() {
        return Err(FusionError::NotAnEllipsoid);
    }

    let offset = Vector3::new(ellipsoid[6], ellipsoid[7], ellipsoid[8]);
    Ok(MagnetometerCalibration {
        soft_iron: matrix.cast::<f32>(),
        hard_iron: offset.cast::<f32>(),
    })
}

/// Closed-form ellipsoid fit
///
/// Solves the quadric `xᵀ M x + 2 vᵀ x = 1` by ordinary least squares,
/// normalises it around its centre and takes `K = field · √M̂` (symmetric
/// square root). `expected_field` defaults to 50 µT.
///
/// # Example
/// ```
/// use nalgebra::Vector3;
/// use attitude_fusion::calibration::fit_magnetometer_fast;
///
/// // Sphere of radius 40 centred on (5, -3, 8)
/// let samples: Vec<Vector3<f32>> = (0..60)
///     .map(|i| {
///         let theta = i as f32 * 0.37;
///         let phi = i as f32 * 0.11;
///         Vector3::new(
///             5.0 + 40.0 * phi.cos() * theta.cos(),
///             -3.0 + 40.0 * phi.cos() * theta.sin(),
///             8.0 + 40.0 * phi.sin(),
///         )
///     })
///     .collect();
///
/// let calibration = fit_magnetometer_fast(&samples, Some(40.0)).unwrap();
/// assert!((calibration.hard_iron - Vector3::new(-5.0, 3.0, -8.0)).amax() < 1e-2);
/// ```
pub fn fit_magnetometer_fast(
    samples: &[Vector3<f32>],
    expected_field: Option<f32>,
) -> Result<MagnetometerCalibration> {
    let field = match expected_field {
        None => DEFAULT_FIELD,
        Some(field) if field.is_finite() && field > 0.0 => f64::from(field),
        Some(_) => return Err(FusionError::InvalidParameter("expected_field")),
    };
    if samples.len() < MIN_SAMPLES {
        return Err(FusionError::InsufficientSamples);
    }

    // Work on unit-scale data to keep the normal equations well conditioned
    let scale = samples.iter().map(|m| m.cast::<f64>().norm()).sum::<f64>() / samples.len() as f64;
    if scale < NORM_FLOOR {
        return Err(FusionError::NotAnEllipsoid);
    }

    let mut normal = SMatrix::<f64, 9, 9>::zeros();
    let mut rhs = SVector::<f64, 9>::zeros();
    for m in samples {
        let u = m.cast::<f64>() / scale;
        #[rustfmt::skip]
        let row = SVector::<f64, 9>::from_column_slice(&[
            u.x * u.x, u.y * u.y, u.z * u.z,
            2.0 * u.x * u.y, 2.0 * u.x * u.z, 2.0 * u.y * u.z,
            2.0 * u.x, 2.0 * u.y, 2.0 * u.z,
        ]);
        normal += row * row.transpose();
        rhs += row;
    }
    let theta = normal
        .cholesky()
        .ok_or(FusionError::SingularMatrix)?
        .solve(&rhs);

    let quadric = soft_iron(&theta);
    let linear = Vector3::new(theta[6], theta[7], theta[8]);
    let centre = -(quadric.try_inverse().ok_or(FusionError::NotAnEllipsoid)? * linear);
    let level = 1.0 + centre.dot(&(quadric * centre));
    if level <= 0.0 {
        return Err(FusionError::NotAnEllipsoid);
    }
    let shape = quadric / level;

    // Positive definite, otherwise the quadric is not an ellipsoid
    if shape.cholesky().is_none() {
        return Err(FusionError::NotAnEllipsoid);
    }
    let root = symmetric_sqrt(&shape).ok_or(FusionError::NotAnEllipsoid)?;

    let matrix = root * (field / scale);
    let hard_iron = -centre * scale;
    log::debug!(
        "fast ellipsoid fit: offset [{}, {}, {}]",
        hard_iron.x,
        hard_iron.y,
        hard_iron.z
    );

    Ok(MagnetometerCalibration {
        soft_iron: matrix.cast::<f32>(),
        hard_iron: hard_iron.cast::<f32>(),
    })
}

/// Symmetric matrix from `(k11, k22, k33, k12, k13, k23, ..)`
fn soft_iron(params: &SVector<f64, 9>) -> Matrix3<f64> {
    Matrix3::new(
        params[0], params[3], params[4], params[3], params[1], params[5], params[4], params[5],
        params[2],
    )
}

fn symmetric_sqrt(matrix: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let eigen = matrix.symmetric_eigen();
    if eigen.eigenvalues.iter().any(|&value| value <= 0.0) {
        return None;
    }
    let roots = eigen.eigenvalues.map(|value| value.sqrt());
    let vectors = eigen.eigenvectors;
    Some(vectors * Matrix3::from_diagonal(&roots) * vectors.transpose())
}

/// Samples that leave a direction of the sphere fit unconstrained give a
/// near-zero eigenvalue in its normal matrix
fn full_rank(normal: &SMatrix<f64, 4, 4>) -> bool {
    let eigenvalues = normal.symmetric_eigenvalues();
    let largest = eigenvalues.amax();
    largest > 0.0 && eigenvalues.min() > RANK_TOLERANCE * largest
}

/// Residual `|m + b| - R` and its gradient over `(b, R)`
fn sphere_residual(params: &SVector<f64, 4>, m: &Vector3<f64>) -> (f64, SVector<f64, 4>) {
    let d = m + Vector3::new(params[0], params[1], params[2]);
    let n = d.norm().max(NORM_FLOOR);
    let jacobian = SVector::<f64, 4>::new(d.x / n, d.y / n, d.z / n, -1.0);
    (n - params[3], jacobian)
}

/// Residual `|K (m + b)| - R` and its gradient over `(k11, k22, k33, k12,
/// k13, k23, b)`
fn ellipsoid_residual(
    params: &SVector<f64, 9>,
    m: &Vector3<f64>,
    radius: f64,
) -> (f64, SVector<f64, 9>) {
    let k = soft_iron(params);
    let d = m + Vector3::new(params[6], params[7], params[8]);
    let u = k * d;
    let n = u.norm().max(NORM_FLOOR);
    let offset = k * u / n;

    #[rustfmt::skip]
    let jacobian = SVector::<f64, 9>::from_column_slice(&[
        u.x * d.x / n,
        u.y * d.y / n,
        u.z * d.z / n,
        (u.x * d.y + u.y * d.x) / n,
        (u.x * d.z + u.z * d.x) / n,
        (u.y * d.z + u.z * d.y) / n,
        offset.x, offset.y, offset.z,
    ]);
    (n - radius, jacobian)
}

/// Damped Gauss–Newton minimisation of the summed squared residuals
fn levenberg_marquardt<const P: usize, F>(
    mut params: SVector<f64, P>,
    samples: &[Vector3<f32>],
    settings: &EllipsoidFitSettings,
    residual: F,
) -> SVector<f64, P>
where
    F: Fn(&SVector<f64, P>, &Vector3<f64>) -> (f64, SVector<f64, P>),
{
    let mu = f64::from(settings.mu);
    let mut lambda = f64::from(settings.lambda);
    let (mut normal, mut gradient, mut cost) = normal_equations(&params, samples, &residual);

    for iteration in 0..settings.max_iterations {
        let mut damped = normal;
        for i in 0..P {
            damped[(i, i)] += lambda * normal[(i, i)].max(DIAGONAL_FLOOR);
        }
        let Some(cholesky) = damped.cholesky() else {
            lambda *= mu;
            continue;
        };
        let step = cholesky.solve(&-gradient);
        let candidate = params + step;
        let converged_step = step.norm() <= STEP_TOLERANCE * (candidate.norm() + STEP_TOLERANCE);

        let (next_normal, next_gradient, next_cost) = normal_equations(&candidate, samples, &residual);
        if next_cost < cost {
            let improvement = cost - next_cost;
            params = candidate;
            normal = next_normal;
            gradient = next_gradient;
            cost = next_cost;
            lambda /= mu;
            if improvement <= COST_TOLERANCE * cost || converged_step {
                log::debug!("ellipsoid fit converged after {} iterations, cost {}", iteration + 1, cost);
                return params;
            }
        } else {
            lambda *= mu;
            if converged_step {
                return params;
            }
        }
    }

    log::warn!(
        "ellipsoid fit stopped at the iteration cap ({}), cost {}",
        settings.max_iterations,
        cost
    );
    params
}

fn normal_equations<const P: usize, F>(
    params: &SVector<f64, P>,
    samples: &[Vector3<f32>],
    residual: &F,
) -> (SMatrix<f64, P, P>, SVector<f64, P>, f64)
where
    F: Fn(&SVector<f64, P>, &Vector3<f64>) -> (f64, SVector<f64, P>),
{
    let mut normal = SMatrix::<f64, P, P>::zeros();
    let mut gradient = SVector::<f64, P>::zeros();
    let mut cost = 0.0;
    for m in samples {
        let (r, j) = residual(params, &m.cast::<f64>());
        normal += j * j.transpose();
        gradient += j * r;
        cost += r * r;
    }
    (normal, gradient, cost)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sphere(radius: f32, centre: Vector3<f32>) -> [Vector3<f32>; 64] {
        let mut samples = [Vector3::zeros(); 64];
        for (i, sample) in samples.iter_mut().enumerate() {
            let theta = i as f32 * 0.37;
            let phi = i as f32 * 0.11 - 1.2;
            *sample = centre
                + Vector3::new(
                    phi.cos() * theta.cos(),
                    phi.cos() * theta.sin(),
                    phi.sin(),
                ) * radius;
        }
        samples
    }

    #[test]
    fn test_rejects_bad_settings() {
        let samples = sphere(40.0, Vector3::zeros());
        let settings = EllipsoidFitSettings {
            mu: 0.5,
            ..Default::default()
        };
        assert_eq!(
            fit_magnetometer(&samples, &settings),
            Err(FusionError::InvalidParameter("mu"))
        );
        assert_eq!(
            fit_magnetometer_fast(&samples, Some(-1.0)),
            Err(FusionError::InvalidParameter("expected_field"))
        );
    }

    #[test]
    fn test_rejects_short_batches() {
        let samples = sphere(40.0, Vector3::zeros());
        assert_eq!(
            fit_magnetometer(&samples[..8], &EllipsoidFitSettings::default()),
            Err(FusionError::InsufficientSamples)
        );
        assert_eq!(
            fit_magnetometer_fast(&samples[..8], None),
            Err(FusionError::InsufficientSamples)
        );
    }

    #[test]
    fn test_sphere_offset_only() {
        let centre = Vector3::new(5.0, 1.0, 3.0);
        let samples = sphere(20.0, centre);
        let settings = EllipsoidFitSettings {
            expected_field: Some(20.0),
            ..Default::default()
        };
        let calibration = fit_magnetometer(&samples, &settings).unwrap();
        assert!((calibration.hard_iron + centre).amax() < 1e-3, "{:?}", calibration);
        assert!((calibration.soft_iron - Matrix3::identity()).amax() < 1e-3);

        let fast = fit_magnetometer_fast(&samples, Some(20.0)).unwrap();
        assert!((fast.hard_iron + centre).amax() < 1e-3, "{:?}", fast);
        assert!((fast.soft_iron - Matrix3::identity()).amax() < 1e-3);
    }

    #[test]
    fn test_default_field_scales_fast_fit() {
        let samples = sphere(25.0, Vector3::zeros());
        let calibration = fit_magnetometer_fast(&samples, None).unwrap();
        assert!((calibration.soft_iron - Matrix3::identity() * 2.0).amax() < 1e-3);
    }

    #[test]
    fn test_planar_data_is_not_an_ellipsoid() {
        let mut samples = [Vector3::zeros(); 32];
        for (i, sample) in samples.iter_mut().enumerate() {
            let angle = i as f32 * 0.2;
            *sample = Vector3::new(30.0 * angle.cos(), 30.0 * angle.sin(), 0.0);
        }
        assert!(fit_magnetometer_fast(&samples, None).is_err());
        assert_eq!(
            fit_magnetometer(&samples, &EllipsoidFitSettings::default()),
            Err(FusionError::NotAnEllipsoid)
        );
    }

    #[test]
    fn test_identical_samples_are_not_an_ellipsoid() {
        let samples = [Vector3::new(10.0, 5.0, -3.0); 20];
        assert_eq!(
            fit_magnetometer(&samples, &EllipsoidFitSettings::default()),
            Err(FusionError::NotAnEllipsoid)
        );
        assert!(fit_magnetometer_fast(&samples, None).is_err());
    }

    #[test]
    fn test_full_rank_check() {
        let samples = sphere(20.0, Vector3::new(1.0, 2.0, 3.0));
        let fit = SVector::<f64, 4>::new(-1.0, -2.0, -3.0, 20.0);
        let (normal, _, _) = normal_equations(&fit, &samples, &sphere_residual);
        assert!(full_rank(&normal));

        let mut flat = normal;
        flat.row_mut(2).fill(0.0);
        flat.column_mut(2).fill(0.0);
        assert!(!full_rank(&flat));
    }

    #[test]
    fn test_symmetric_sqrt() {
        let k = Matrix3::new(1.1, 0.05, -0.02, 0.05, 0.95, 0.03, -0.02, 0.03, 1.02);
        let root = symmetric_sqrt(&(k * k)).unwrap();
        assert!((root - k).amax() < 1e-12);
        assert!(symmetric_sqrt(&-Matrix3::<f64>::identity()).is_none());
    }
}
