//! Ellipsoid fitting for magnetometer calibration
//!
//! Samples are centred on their mean and scaled to roughly unit size before
//! their quadratic monomials `[x², y², z², xy, xz, yz, x, y, z, 1]` are
//! accumulated into a 10×10 scatter matrix. All three solvers read from that
//! one matrix:
//!
//! - 4 elements: sphere `|x - V|² = B²`, linear least squares
//! - 7 elements: axis-aligned ellipsoid, smallest eigenvector of a 7×7 block
//! - 10 elements: general ellipsoid, smallest eigenvector of the full matrix
//!
//! Sums and decompositions run in `f64`; results are returned in `f32`.

use nalgebra::{
    ComplexField, Matrix3, Matrix4, SMatrix, SVD, SVector, SymmetricEigen, Vector3, Vector4,
};

use crate::calibration::SolverOrder;

/// Scale applied to centred samples, 1 / 50 µT
const FIT_SCALE: f64 = 1.0 / 50.0;

/// Scatter matrix rows used by the 7-element solver
const SEVEN_ELEMENT_ROWS: [usize; 7] = [0, 1, 2, 6, 7, 8, 9];

/// Singular values below this fraction of the largest are treated as zero
const SINGULAR_TOLERANCE: f64 = 1.0e-9;

const EIGEN_MAX_ITERATIONS: usize = 500;

/// Quadratic monomials of a centred, scaled sample
fn monomials(p: Vector3<f64>) -> SVector<f64, 10> {
    SVector::<f64, 10>::from_column_slice(&[
        p.x * p.x,
        p.y * p.y,
        p.z * p.z,
        p.x * p.y,
        p.x * p.z,
        p.y * p.z,
        p.x,
        p.y,
        p.z,
        1.0,
    ])
}

/// Running scatter matrix of the quadratic monomials.
#[derive(Debug, Clone, PartialEq)]
pub struct ScatterAccumulator {
    mean: Vector3<f64>,
    scatter: SMatrix<f64, 10, 10>,
    count: usize,
}

impl ScatterAccumulator {
    /// Start an accumulation centred on `mean` (µT).
    pub fn new(mean: Vector3<f32>) -> Self {
        Self {
            mean: mean.cast::<f64>(),
            scatter: SMatrix::zeros(),
            count: 0,
        }
    }

    /// Add one uncalibrated sample in µT.
    pub fn add(&mut self, sample: Vector3<f32>) {
        let centred = (sample.cast::<f64>() - self.mean) * FIT_SCALE;
        let m = monomials(centred);
        self.scatter += m * m.transpose();
        self.count += 1;
    }

    /// Number of samples added.
    pub fn count(&self) -> usize {
        self.count
    }

    fn unscale(
        &self,
        centre: Vector3<f64>,
        inverse_soft_iron: Matrix3<f64>,
        field: f64,
    ) -> Option<EllipsoidFit> {
        let fit = EllipsoidFit {
            offset: (centre / FIT_SCALE + self.mean).cast::<f32>(),
            inverse_soft_iron: inverse_soft_iron.cast::<f32>(),
            field_strength: (field / FIT_SCALE) as f32,
        };
        fit.is_finite().then_some(fit)
    }
}

/// Result of an ellipsoid fit in physical units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EllipsoidFit {
    /// Hard-iron offset in µT
    pub offset: Vector3<f32>,
    /// Inverse soft-iron matrix, unit determinant
    pub inverse_soft_iron: Matrix3<f32>,
    /// Field strength in µT
    pub field_strength: f32,
}

impl EllipsoidFit {
    /// Distance of a sample from the fitted sphere after correction, in µT.
    pub fn residual(&self, sample: Vector3<f32>) -> f32 {
        (self.inverse_soft_iron * (sample - self.offset)).norm() - self.field_strength
    }

    fn is_finite(&self) -> bool {
        self.offset.iter().all(|v| v.is_finite())
            && self.inverse_soft_iron.iter().all(|v| v.is_finite())
            && self.field_strength.is_finite()
            && self.field_strength > 0.0
    }
}

/// Fit with the requested model, falling back to simpler models when the
/// data cannot support it.
pub fn solve(
    order: SolverOrder,
    accumulator: &ScatterAccumulator,
) -> Option<(SolverOrder, EllipsoidFit)> {
    let attempts: &[SolverOrder] = match order {
        SolverOrder::None => &[],
        SolverOrder::Four => &[SolverOrder::Four],
        SolverOrder::Seven => &[SolverOrder::Seven, SolverOrder::Four],
        SolverOrder::Ten => &[SolverOrder::Ten, SolverOrder::Seven, SolverOrder::Four],
    };

    attempts.iter().find_map(|&attempt| {
        let fit = match attempt {
            SolverOrder::Four => solve4(accumulator),
            SolverOrder::Seven => solve7(accumulator),
            SolverOrder::Ten => solve10(accumulator),
            SolverOrder::None => None,
        };
        fit.map(|fit| (attempt, fit))
    })
}

/// Offset and field strength only.
///
/// Solves `[x y z 1]·p = |x|²` for `p = (2V, B² - |V|²)` through the normal
/// equations. A minimum-norm SVD solution keeps the offset at the data mean
/// along any axis the samples never moved in, so data from a purely
/// horizontal rotation still yields a usable fit.
pub fn solve4(accumulator: &ScatterAccumulator) -> Option<EllipsoidFit> {
    if accumulator.count < 4 {
        return None;
    }
    let s = &accumulator.scatter;
    let normal: Matrix4<f64> = s.fixed_view::<4, 4>(6, 6).into_owned();
    let rhs: Vector4<f64> = (s.fixed_view::<1, 4>(0, 6)
        + s.fixed_view::<1, 4>(1, 6)
        + s.fixed_view::<1, 4>(2, 6))
    .transpose();

    let svd = SVD::new(normal, true, true);
    let largest = svd.singular_values.max();
    if largest <= 0.0 {
        return None;
    }
    let p = svd.solve(&rhs, largest * SINGULAR_TOLERANCE).ok()?;

    let centre = Vector3::new(p[0], p[1], p[2]) * 0.5;
    let field_squared = p[3] + centre.norm_squared();
    if field_squared <= 0.0 {
        return None;
    }
    accumulator.unscale(centre, Matrix3::identity(), field_squared.sqrt())
}

/// Axis-aligned ellipsoid `a(x-cx)² + b(y-cy)² + c(z-cz)² = k`.
pub fn solve7(accumulator: &ScatterAccumulator) -> Option<EllipsoidFit> {
    if accumulator.count < 7 {
        return None;
    }
    let s = &accumulator.scatter;
    let block =
        SMatrix::<f64, 7, 7>::from_fn(|i, j| s[(SEVEN_ELEMENT_ROWS[i], SEVEN_ELEMENT_ROWS[j])]);
    let mut p = smallest_eigenvector7(block)?;
    if p[0] < 0.0 {
        p = -p;
    }

    let gains = Vector3::new(p[0], p[1], p[2]);
    if gains.iter().any(|&g| g <= 0.0) {
        return None;
    }
    let centre = Vector3::new(-p[3] / (2.0 * p[0]), -p[4] / (2.0 * p[1]), -p[5] / (2.0 * p[2]));
    let k = gains.dot(&centre.component_mul(&centre)) - p[6];
    if k <= 0.0 {
        return None;
    }

    let det_root = (gains.x * gains.y * gains.z).cbrt();
    let inverse_soft_iron = Matrix3::from_diagonal(&gains.map(|g| (g / det_root).sqrt()));
    accumulator.unscale(centre, inverse_soft_iron, (k / det_root).sqrt())
}

/// General ellipsoid `(x-c)ᵀA(x-c) = k` with symmetric positive definite `A`.
pub fn solve10(accumulator: &ScatterAccumulator) -> Option<EllipsoidFit> {
    if accumulator.count < 10 {
        return None;
    }
    let mut p = smallest_eigenvector10(accumulator.scatter)?;
    if p[0] + p[1] + p[2] < 0.0 {
        p = -p;
    }

    let a = Matrix3::new(
        p[0], 0.5 * p[3], 0.5 * p[4], //
        0.5 * p[3], p[1], 0.5 * p[5], //
        0.5 * p[4], 0.5 * p[5], p[2],
    );
    let eigen = SymmetricEigen::try_new(a, f64::EPSILON, EIGEN_MAX_ITERATIONS)?;
    if eigen.eigenvalues.iter().any(|&l| l <= 0.0) {
        return None;
    }

    let linear = Vector3::new(p[6], p[7], p[8]);
    let centre = -0.5 * a.try_inverse()? * linear;
    let k = centre.dot(&(a * centre)) - p[9];
    if k <= 0.0 {
        return None;
    }

    let det_root = eigen.eigenvalues.product().cbrt();
    let root = eigen.eigenvalues.map(|l| (l / det_root).sqrt());
    let inverse_soft_iron =
        eigen.eigenvectors * Matrix3::from_diagonal(&root) * eigen.eigenvectors.transpose();
    accumulator.unscale(centre, inverse_soft_iron, (k / det_root).sqrt())
}

/// Unit eigenvector of the smallest eigenvalue of the 7-element block.
fn smallest_eigenvector7(m: SMatrix<f64, 7, 7>) -> Option<SVector<f64, 7>> {
    let eigen = SymmetricEigen::try_new(m, f64::EPSILON, EIGEN_MAX_ITERATIONS)?;
    let index = eigen.eigenvalues.imin();
    Some(eigen.eigenvectors.column(index).into_owned())
}

/// Unit eigenvector of the smallest eigenvalue of the full scatter matrix.
fn smallest_eigenvector10(m: SMatrix<f64, 10, 10>) -> Option<SVector<f64, 10>> {
    let eigen = SymmetricEigen::try_new(m, f64::EPSILON, EIGEN_MAX_ITERATIONS)?;
    let index = eigen.eigenvalues.imin();
    Some(eigen.eigenvectors.column(index).into_owned())
}
