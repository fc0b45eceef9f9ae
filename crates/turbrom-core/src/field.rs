//! Fields, i.e. values assigned to the cells of a discretization.
//!
//! Snapshots and basis modes are both fields:
//! velocity and supremizer modes are [`VectorField`]s,
//! pressure and eddy viscosity modes are [`ScalarField`]s.
//! Derivatives of vector fields produce [`TensorField`]s,
//! which only appear as intermediate values during operator assembly.

use itertools::izip;
use nalgebra as na;

/// Operations shared by scalar and vector fields,
/// used to write projection and reconstruction generically.
pub trait Field: Clone + Send + Sync {
    /// A field with every value zero on a discretization with `cell_count` cells.
    fn zeros(cell_count: usize) -> Self;

    /// The number of cells this field has values for.
    fn cell_count(&self) -> usize;

    /// Whether every value in the field is finite.
    fn is_finite(&self) -> bool;

    /// The inner product `Σ_c w_c self_c · other_c`.
    fn weighted_inner(&self, other: &Self, weights: &na::DVector<f64>) -> f64;

    /// `self += a * x`.
    fn axpy(&mut self, a: f64, x: &Self);
}

fn weighted_dot(a: &na::DVector<f64>, b: &na::DVector<f64>, weights: &na::DVector<f64>) -> f64 {
    assert!(
        a.len() == b.len() && a.len() == weights.len(),
        "Field size mismatch: {}, {} and {} weights",
        a.len(),
        b.len(),
        weights.len()
    );
    izip!(a.iter(), b.iter(), weights.iter())
        .map(|(a, b, w)| w * a * b)
        .sum()
}

//
// scalar fields
//

/// One real value per cell.
#[derive(Clone, PartialEq)]
pub struct ScalarField {
    /// The underlying values, exposed for convenience.
    pub values: na::DVector<f64>,
}

impl ScalarField {
    /// Wrap a vector of cell values.
    #[inline]
    pub fn from_values(values: na::DVector<f64>) -> Self {
        Self { values }
    }

    /// A field with the same value in every cell.
    pub fn uniform(cell_count: usize, value: f64) -> Self {
        Self::from_values(na::DVector::from_element(cell_count, value))
    }
}

impl Field for ScalarField {
    fn zeros(cell_count: usize) -> Self {
        Self::from_values(na::DVector::zeros(cell_count))
    }

    #[inline]
    fn cell_count(&self) -> usize {
        self.values.len()
    }

    fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    fn weighted_inner(&self, other: &Self, weights: &na::DVector<f64>) -> f64 {
        weighted_dot(&self.values, &other.values, weights)
    }

    fn axpy(&mut self, a: f64, x: &Self) {
        self.values.axpy(a, &x.values, 1.);
    }
}

impl std::fmt::Debug for ScalarField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scalar field, values {:?}", self.values.as_slice())
    }
}

//
// vector fields
//

/// A `DIM`-component vector per cell, stored component-wise.
#[derive(Clone, PartialEq)]
pub struct VectorField<const DIM: usize> {
    /// Values of each Cartesian component.
    pub components: [na::DVector<f64>; DIM],
}

impl<const DIM: usize> VectorField<DIM> {
    /// Construct from component vectors.
    ///
    /// # Panics
    ///
    /// If the components have different lengths.
    pub fn from_components(components: [na::DVector<f64>; DIM]) -> Self {
        if let Some(first) = components.first() {
            assert!(
                components.iter().all(|c| c.len() == first.len()),
                "Vector field components must all have the same length"
            );
        }
        Self { components }
    }

    /// The pointwise outer product `self ⊗ other`,
    /// with component `[a][b] = self_a other_b`.
    pub fn outer(&self, other: &Self) -> TensorField<DIM> {
        TensorField::from_components(std::array::from_fn(|a| {
            std::array::from_fn(|b| self.components[a].component_mul(&other.components[b]))
        }))
    }
}

impl<const DIM: usize> Field for VectorField<DIM> {
    fn zeros(cell_count: usize) -> Self {
        Self::from_components(std::array::from_fn(|_| na::DVector::zeros(cell_count)))
    }

    #[inline]
    fn cell_count(&self) -> usize {
        self.components.first().map_or(0, |c| c.len())
    }

    fn is_finite(&self) -> bool {
        self.components
            .iter()
            .all(|c| c.iter().all(|v| v.is_finite()))
    }

    fn weighted_inner(&self, other: &Self, weights: &na::DVector<f64>) -> f64 {
        izip!(self.components.iter(), other.components.iter())
            .map(|(a, b)| weighted_dot(a, b, weights))
            .sum()
    }

    fn axpy(&mut self, a: f64, x: &Self) {
        for (c, xc) in izip!(self.components.iter_mut(), x.components.iter()) {
            c.axpy(a, xc, 1.);
        }
    }
}

impl<const DIM: usize> std::fmt::Debug for VectorField<DIM> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{DIM}-vector field over {} cells", self.cell_count())
    }
}

//
// tensor fields
//

/// A `DIM × DIM` tensor per cell, e.g. a velocity gradient or a stress.
///
/// The gradient of a vector field `u` has components `[a][b] = ∂_a u_b`.
#[derive(Clone, PartialEq)]
pub struct TensorField<const DIM: usize> {
    /// Values of each tensor component, indexed `[row][column]`.
    pub components: [[na::DVector<f64>; DIM]; DIM],
}

impl<const DIM: usize> TensorField<DIM> {
    /// Construct from component vectors.
    #[inline]
    pub fn from_components(components: [[na::DVector<f64>; DIM]; DIM]) -> Self {
        Self { components }
    }

    /// The pointwise transpose.
    pub fn transpose(&self) -> Self {
        Self::from_components(std::array::from_fn(|a| {
            std::array::from_fn(|b| self.components[b][a].clone())
        }))
    }

    /// The pointwise trace.
    pub fn trace(&self) -> ScalarField {
        let cells = self.components[0][0].len();
        let mut tr = na::DVector::zeros(cells);
        for a in 0..DIM {
            tr += &self.components[a][a];
        }
        ScalarField::from_values(tr)
    }

    /// The deviatoric part `T - tr(T) / DIM · I`.
    pub fn dev(mut self) -> Self {
        let mean_normal = self.trace().values / DIM as f64;
        for a in 0..DIM {
            self.components[a][a] -= &mean_normal;
        }
        self
    }

    /// Multiply every component pointwise by a scalar field.
    pub fn scaled(&self, s: &ScalarField) -> Self {
        Self::from_components(std::array::from_fn(|a| {
            std::array::from_fn(|b| self.components[a][b].component_mul(&s.values))
        }))
    }
}

impl<const DIM: usize> std::fmt::Debug for TensorField<DIM> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{DIM}x{DIM}-tensor field over {} cells",
            self.components[0][0].len()
        )
    }
}

// std trait impls for arithmetic on fields,
// only implemented for references since that's all that reconstruction needs

impl std::ops::Add for &ScalarField {
    type Output = ScalarField;

    fn add(self, rhs: Self) -> Self::Output {
        ScalarField::from_values(&self.values + &rhs.values)
    }
}

impl std::ops::Sub for &ScalarField {
    type Output = ScalarField;

    fn sub(self, rhs: Self) -> Self::Output {
        ScalarField::from_values(&self.values - &rhs.values)
    }
}

impl std::ops::Mul<&ScalarField> for f64 {
    type Output = ScalarField;

    fn mul(self, rhs: &ScalarField) -> Self::Output {
        ScalarField::from_values(self * &rhs.values)
    }
}

impl std::ops::AddAssign<&ScalarField> for ScalarField {
    fn add_assign(&mut self, rhs: &ScalarField) {
        self.values += &rhs.values;
    }
}

impl<const DIM: usize> std::ops::Add for &VectorField<DIM> {
    type Output = VectorField<DIM>;

    fn add(self, rhs: Self) -> Self::Output {
        VectorField::from_components(std::array::from_fn(|a| {
            &self.components[a] + &rhs.components[a]
        }))
    }
}

impl<const DIM: usize> std::ops::Sub for &VectorField<DIM> {
    type Output = VectorField<DIM>;

    fn sub(self, rhs: Self) -> Self::Output {
        VectorField::from_components(std::array::from_fn(|a| {
            &self.components[a] - &rhs.components[a]
        }))
    }
}

impl<const DIM: usize> std::ops::Mul<&VectorField<DIM>> for f64 {
    type Output = VectorField<DIM>;

    fn mul(self, rhs: &VectorField<DIM>) -> Self::Output {
        VectorField::from_components(std::array::from_fn(|a| self * &rhs.components[a]))
    }
}

impl<const DIM: usize> std::ops::AddAssign<&VectorField<DIM>> for VectorField<DIM> {
    fn add_assign(&mut self, rhs: &VectorField<DIM>) {
        for (c, r) in izip!(self.components.iter_mut(), rhs.components.iter()) {
            *c += r;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{tiny_grid_2d, Discretization};
    use approx::assert_relative_eq;

    #[test]
    fn inner_products_are_volume_weighted() {
        let grid = tiny_grid_2d();
        let one = ScalarField::uniform(grid.cell_count(), 1.);
        assert_relative_eq!(grid.inner(&one, &one), grid.total_volume(), epsilon = 1e-14);

        let u = grid.sample_vector(|p| na::Vector2::new(1., p.y));
        let ex = grid.sample_vector(|_| na::Vector2::new(1., 0.));
        assert_relative_eq!(grid.inner(&u, &ex), grid.total_volume(), epsilon = 1e-14);
    }

    #[test]
    fn tensor_algebra() {
        let grid = tiny_grid_2d();
        let u = grid.sample_vector(|p| na::Vector2::new(p.x, 2. * p.y));
        let w = grid.sample_vector(|_| na::Vector2::new(3., 1.));
        let t = u.outer(&w);
        // (u ⊗ w)ᵀ = w ⊗ u
        assert_eq!(t.transpose(), w.outer(&u));

        let tr = t.trace();
        let expected = grid.sample_scalar(|p| 3. * p.x + 2. * p.y);
        assert_relative_eq!(tr.values, expected.values, epsilon = 1e-14);

        let dev = t.clone().dev();
        assert!(dev.trace().values.iter().all(|v| v.abs() < 1e-14));
        // off-diagonals are untouched
        assert_eq!(dev.components[0][1], t.components[0][1]);
    }

    #[test]
    fn field_arithmetic() {
        let grid = tiny_grid_2d();
        let a = grid.sample_scalar(|p| p.x);
        let b = grid.sample_scalar(|p| p.y);
        let mut sum = &a + &b;
        sum.axpy(-1., &b);
        assert_relative_eq!(sum.values, a.values, epsilon = 1e-14);
        assert_relative_eq!((&(2. * &a) - &a).values, a.values, epsilon = 1e-14);

        let u = grid.sample_vector(|p| na::Vector2::new(p.x, p.y));
        let mut acc = VectorField::zeros(grid.cell_count());
        acc += &u;
        acc.axpy(1., &u);
        assert_relative_eq!((&acc - &(2. * &u)).components[1].amax(), 0.);
    }
}
