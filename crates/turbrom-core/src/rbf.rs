//! Scattered-data interpolation with radial basis functions.
//!
//! The eddy viscosity interpolator only relies on the [`ScatteredFit`] and
//! [`ScatteredInterpolant`] traits, so another backend can be swapped in.
//! [`RbfSettings`] and [`RbfModel`] are the default implementation:
//! a dense RBF system solved by LU decomposition,
//! which is appropriate for the small training sets of an offline reduction.

use nalgebra as na;
use serde::{Deserialize, Serialize};

/// Radial kernel `φ(r)`, with `ε` the shape parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RbfKernel {
    /// `exp(-(r/ε)²)`
    Gaussian,
    /// `sqrt(1 + (r/ε)²)`
    Multiquadric,
    /// `1 / sqrt(1 + (r/ε)²)`
    InverseMultiquadric,
    /// `r² ln r`
    ThinPlateSpline,
    /// `r`
    Linear,
    /// `r³`
    Cubic,
}

impl RbfKernel {
    /// Evaluate the kernel at distance `r`.
    pub fn eval(&self, r: f64, epsilon: f64) -> f64 {
        match self {
            Self::Gaussian => (-(r / epsilon).powi(2)).exp(),
            Self::Multiquadric => (1. + (r / epsilon).powi(2)).sqrt(),
            Self::InverseMultiquadric => 1. / (1. + (r / epsilon).powi(2)).sqrt(),
            Self::ThinPlateSpline => {
                if r > 0. {
                    r * r * r.ln()
                } else {
                    0.
                }
            }
            Self::Linear => r,
            Self::Cubic => r.powi(3),
        }
    }

    /// Whether the kernel is only conditionally positive definite
    /// and needs a polynomial term for a solvable system.
    pub fn needs_polynomial(&self) -> bool {
        matches!(
            self,
            Self::Multiquadric | Self::ThinPlateSpline | Self::Linear | Self::Cubic
        )
    }

    /// Whether the kernel depends on the shape parameter.
    pub fn uses_shape_parameter(&self) -> bool {
        matches!(
            self,
            Self::Gaussian | Self::Multiquadric | Self::InverseMultiquadric
        )
    }
}

/// Error in fitting a scattered-data interpolant.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FitError {
    /// The training table has no samples.
    #[error("Training table is empty")]
    EmptyTable,
    /// A sample has a different number of coordinates than the table.
    #[error("Sample with {found} coordinates added to a {expected}-dimensional table")]
    InconsistentDimension {
        /// Dimension of the table.
        expected: usize,
        /// Dimension of the sample.
        found: usize,
    },
    /// A sample has a non-finite coordinate or value.
    #[error("Sample {sample} is not finite")]
    NonFinite {
        /// Index of the sample.
        sample: usize,
    },
    /// Two samples are at the same point.
    #[error("Samples {first} and {second} coincide")]
    DuplicateSample {
        /// Index of the earlier sample.
        first: usize,
        /// Index of the later sample.
        second: usize,
    },
    /// The interpolation system couldn't be solved.
    #[error("Interpolation system of size {size} is singular")]
    Singular {
        /// Number of unknowns in the system.
        size: usize,
    },
}

/// Input points and values to fit an interpolant to.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingTable {
    dim: usize,
    points: Vec<Vec<f64>>,
    values: Vec<f64>,
}

impl TrainingTable {
    /// An empty table of `dim`-dimensional input points.
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            points: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Add one sample.
    pub fn add_sample(&mut self, point: &[f64], value: f64) -> Result<(), FitError> {
        if point.len() != self.dim {
            return Err(FitError::InconsistentDimension {
                expected: self.dim,
                found: point.len(),
            });
        }
        self.points.push(point.to_vec());
        self.values.push(value);
        Ok(())
    }

    /// Dimension of the input points.
    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of samples.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no samples.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The input points.
    #[inline]
    pub fn points(&self) -> &[Vec<f64>] {
        &self.points
    }

    /// The sample values.
    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// The axis-aligned bounding box `(min, max)` of the input points.
    pub fn bounds(&self) -> Option<(Vec<f64>, Vec<f64>)> {
        point_bounds(&self.points, self.dim)
    }
}

pub(crate) fn point_bounds(points: &[Vec<f64>], dim: usize) -> Option<(Vec<f64>, Vec<f64>)> {
    if points.is_empty() {
        return None;
    }
    let mut lo = vec![f64::INFINITY; dim];
    let mut hi = vec![f64::NEG_INFINITY; dim];
    for p in points {
        for (a, &x) in p.iter().enumerate() {
            lo[a] = lo[a].min(x);
            hi[a] = hi[a].max(x);
        }
    }
    Some((lo, hi))
}

/// A method of fitting interpolants to scattered data.
pub trait ScatteredFit: Sync {
    /// The fitted interpolant type.
    type Model: ScatteredInterpolant;

    /// Fit an interpolant to a training table.
    fn fit(&self, table: &TrainingTable) -> Result<Self::Model, FitError>;
}

/// A fitted, immutable interpolant.
pub trait ScatteredInterpolant: Send + Sync {
    /// Dimension of the input points.
    fn dim(&self) -> usize;

    /// Evaluate the interpolant at a point.
    ///
    /// # Panics
    ///
    /// If the point's dimension doesn't match the interpolant.
    fn query(&self, point: &[f64]) -> f64;
}

//
// RBF backend
//

/// Settings for fitting [`RbfModel`]s.
///
/// ```
/// # use turbrom_core::rbf::{RbfKernel, RbfSettings};
/// let settings = RbfSettings::default()
///     .kernel(RbfKernel::ThinPlateSpline)
///     .smoothing(1e-8);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RbfSettings {
    /// Radial kernel. Default Gaussian.
    pub kernel: RbfKernel,
    /// Shape parameter `ε`.
    /// If `None`, the mean distance from each sample to its nearest neighbour is used.
    pub epsilon: Option<f64>,
    /// Value added to the diagonal of the system.
    /// Zero gives exact interpolation of the samples.
    pub smoothing: f64,
    /// Whether to map the input points to the unit box before fitting,
    /// which keeps coordinates of very different scales from dominating distances.
    pub normalize: bool,
}

impl Default for RbfSettings {
    fn default() -> Self {
        Self {
            kernel: RbfKernel::Gaussian,
            epsilon: None,
            smoothing: 0.,
            normalize: true,
        }
    }
}

impl RbfSettings {
    /// Set the kernel.
    pub fn kernel(mut self, kernel: RbfKernel) -> Self {
        self.kernel = kernel;
        self
    }

    /// Set a fixed shape parameter.
    pub fn epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = Some(epsilon);
        self
    }

    /// Set the smoothing parameter.
    pub fn smoothing(mut self, smoothing: f64) -> Self {
        self.smoothing = smoothing;
        self
    }

    /// Set whether input points are normalized.
    pub fn normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }
}

/// A fitted radial basis function interpolant.
#[derive(Clone, Debug)]
pub struct RbfModel {
    kernel: RbfKernel,
    epsilon: f64,
    /// centers in normalized coordinates, one per column
    centers: na::DMatrix<f64>,
    weights: na::DVector<f64>,
    /// constant and linear coefficients, if the kernel needs them
    poly: Option<na::DVector<f64>>,
    shift: na::DVector<f64>,
    scale: na::DVector<f64>,
}

impl RbfModel {
    /// The kernel the model was fitted with.
    #[inline]
    pub fn kernel(&self) -> RbfKernel {
        self.kernel
    }

    /// The shape parameter the model was fitted with.
    #[inline]
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Number of centers.
    #[inline]
    pub fn center_count(&self) -> usize {
        self.centers.ncols()
    }

    fn normalized(&self, point: &[f64]) -> na::DVector<f64> {
        let p = na::DVector::from_column_slice(point);
        (p - &self.shift).component_div(&self.scale)
    }
}

impl ScatteredInterpolant for RbfModel {
    fn dim(&self) -> usize {
        self.centers.nrows()
    }

    fn query(&self, point: &[f64]) -> f64 {
        assert_eq!(
            point.len(),
            self.dim(),
            "Point with {} coordinates queried from a {}-dimensional interpolant",
            point.len(),
            self.dim()
        );
        let x = self.normalized(point);
        let radial: f64 = self
            .centers
            .column_iter()
            .zip(self.weights.iter())
            .map(|(c, w)| w * self.kernel.eval((&x - c).norm(), self.epsilon))
            .sum();
        let poly = match &self.poly {
            Some(coefs) => coefs[0] + coefs.rows(1, x.len()).dot(&x),
            None => 0.,
        };
        radial + poly
    }
}

impl ScatteredFit for RbfSettings {
    type Model = RbfModel;

    fn fit(&self, table: &TrainingTable) -> Result<RbfModel, FitError> {
        if table.is_empty() {
            return Err(FitError::EmptyTable);
        }
        let dim = table.dim();
        let n = table.len();
        for (sample, (p, v)) in table.points().iter().zip(table.values()).enumerate() {
            if !v.is_finite() || p.iter().any(|x| !x.is_finite()) {
                return Err(FitError::NonFinite { sample });
            }
        }

        let (shift, scale) = match (self.normalize, table.bounds()) {
            (true, Some((lo, hi))) => {
                let scale = na::DVector::from_iterator(
                    dim,
                    lo.iter()
                        .zip(&hi)
                        .map(|(l, h)| if h > l { h - l } else { 1. }),
                );
                (na::DVector::from_vec(lo), scale)
            }
            _ => (na::DVector::zeros(dim), na::DVector::from_element(dim, 1.)),
        };
        let centers = na::DMatrix::from_fn(dim, n, |a, i| {
            (table.points()[i][a] - shift[a]) / scale[a]
        });

        let mut distances = na::DMatrix::zeros(n, n);
        for i in 0..n {
            for j in 0..i {
                let r = (centers.column(i) - centers.column(j)).norm();
                if r <= f64::EPSILON {
                    return Err(FitError::DuplicateSample {
                        first: j,
                        second: i,
                    });
                }
                distances[(i, j)] = r;
                distances[(j, i)] = r;
            }
        }

        let epsilon = match self.epsilon {
            Some(eps) => eps,
            None => mean_nearest_distance(&distances),
        };

        let poly_terms = if self.kernel.needs_polynomial() {
            dim + 1
        } else {
            0
        };
        let size = n + poly_terms;
        let mut system = na::DMatrix::zeros(size, size);
        for i in 0..n {
            for j in 0..n {
                system[(i, j)] = self.kernel.eval(distances[(i, j)], epsilon);
            }
            system[(i, i)] += self.smoothing;
            if poly_terms > 0 {
                system[(i, n)] = 1.;
                system[(n, i)] = 1.;
                for a in 0..dim {
                    system[(i, n + 1 + a)] = centers[(a, i)];
                    system[(n + 1 + a, i)] = centers[(a, i)];
                }
            }
        }
        let mut rhs = na::DVector::zeros(size);
        rhs.rows_mut(0, n).copy_from_slice(table.values());

        let solution = system
            .lu()
            .solve(&rhs)
            .filter(|s| s.iter().all(|v| v.is_finite()))
            .ok_or(FitError::Singular { size })?;

        Ok(RbfModel {
            kernel: self.kernel,
            epsilon,
            centers,
            weights: solution.rows(0, n).into_owned(),
            poly: (poly_terms > 0).then(|| solution.rows(n, poly_terms).into_owned()),
            shift,
            scale,
        })
    }
}

/// Mean over samples of the distance to the nearest other sample,
/// or 1 for a single sample.
fn mean_nearest_distance(distances: &na::DMatrix<f64>) -> f64 {
    let n = distances.nrows();
    if n < 2 {
        return 1.;
    }
    let total: f64 = (0..n)
        .map(|i| {
            (0..n)
                .filter(|&j| j != i)
                .map(|j| distances[(i, j)])
                .fold(f64::INFINITY, f64::min)
        })
        .sum();
    total / n as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn scattered_2d(f: impl Fn(f64, f64) -> f64) -> TrainingTable {
        let points = [
            [0., 0.],
            [1., 0.],
            [0., 2.],
            [1., 2.],
            [0.4, 0.7],
            [0.8, 1.3],
            [0.2, 1.6],
            [0.6, 0.2],
        ];
        let mut table = TrainingTable::new(2);
        for p in points {
            table.add_sample(&p, f(p[0], p[1])).unwrap();
        }
        table
    }

    #[test]
    fn every_kernel_reproduces_samples() {
        let table = scattered_2d(|x, y| (x + 0.3 * y).sin() + x * y);
        use RbfKernel::*;
        for kernel in [
            Gaussian,
            Multiquadric,
            InverseMultiquadric,
            ThinPlateSpline,
            Linear,
            Cubic,
        ] {
            let model = RbfSettings::default().kernel(kernel).fit(&table).unwrap();
            for (p, v) in table.points().iter().zip(table.values()) {
                assert_relative_eq!(model.query(p), *v, epsilon = 1e-8);
            }
        }
    }

    #[test]
    fn polynomial_kernels_reproduce_linear_functions() {
        let f = |x: f64, y: f64| 1. + 2. * x - 0.5 * y;
        let table = scattered_2d(f);
        for kernel in [RbfKernel::ThinPlateSpline, RbfKernel::Cubic, RbfKernel::Linear] {
            let model = RbfSettings::default().kernel(kernel).fit(&table).unwrap();
            assert_relative_eq!(model.query(&[0.5, 1.]), f(0.5, 1.), epsilon = 1e-8);
            assert_relative_eq!(model.query(&[0.9, 0.1]), f(0.9, 0.1), epsilon = 1e-8);
        }
    }

    #[test]
    fn automatic_shape_parameter() {
        let mut table = TrainingTable::new(1);
        for (i, x) in [0., 1., 3.].into_iter().enumerate() {
            table.add_sample(&[x], i as f64).unwrap();
        }
        let unscaled = RbfSettings::default().normalize(false).fit(&table).unwrap();
        // nearest neighbour distances 1, 1 and 2
        assert_relative_eq!(unscaled.epsilon(), 4. / 3., epsilon = 1e-14);
        let scaled = RbfSettings::default().fit(&table).unwrap();
        assert_relative_eq!(scaled.epsilon(), 4. / 9., epsilon = 1e-14);

        let fixed = RbfSettings::default().epsilon(0.5).fit(&table).unwrap();
        assert_eq!(fixed.epsilon(), 0.5);
    }

    #[test]
    fn smoothing_relaxes_interpolation() {
        let table = scattered_2d(|x, y| x - y);
        let exact = RbfSettings::default().fit(&table).unwrap();
        let smooth = RbfSettings::default().smoothing(0.5).fit(&table).unwrap();
        let p = &table.points()[4];
        let v = table.values()[4];
        assert_relative_eq!(exact.query(p), v, epsilon = 1e-8);
        assert!((smooth.query(p) - v).abs() > 1e-6);
    }

    #[test]
    fn invalid_tables_are_rejected() {
        let settings = RbfSettings::default();
        assert_eq!(settings.fit(&TrainingTable::new(2)).unwrap_err(), FitError::EmptyTable);

        let mut table = TrainingTable::new(2);
        assert_eq!(
            table.add_sample(&[1.], 0.),
            Err(FitError::InconsistentDimension {
                expected: 2,
                found: 1
            })
        );

        table.add_sample(&[0., 0.], 1.).unwrap();
        table.add_sample(&[1., 0.], 2.).unwrap();
        table.add_sample(&[0., 0.], 3.).unwrap();
        assert_eq!(
            settings.fit(&table).unwrap_err(),
            FitError::DuplicateSample {
                first: 0,
                second: 2
            }
        );

        let mut table = TrainingTable::new(1);
        table.add_sample(&[0.], f64::NAN).unwrap();
        assert_eq!(
            settings.fit(&table).unwrap_err(),
            FitError::NonFinite { sample: 0 }
        );
    }

    #[test]
    #[should_panic(expected = "1-dimensional interpolant")]
    fn query_dimension_is_checked() {
        let mut table = TrainingTable::new(1);
        table.add_sample(&[0.], 1.).unwrap();
        table.add_sample(&[1.], 2.).unwrap();
        let model = RbfSettings::default().fit(&table).unwrap();
        model.query(&[0.5, 0.5]);
    }
}
