//! Differential operators on fields,
//! built from the derivative matrices of a [`Discretization`].
//!
//! These are the building blocks of every reduced operator:
//! the Laplacian for diffusion, the divergence of an outer product for advection,
//! and divergences of (eddy-viscosity-weighted) stress tensors for the turbulence closure.
//!
//! All operators panic if a field's size doesn't match the discretization,
//! since that is a programming error rather than a data error.
//! Assembly code checks mode sizes beforehand and reports mismatches as errors.

use nalgebra as na;

use crate::{
    field::{ScalarField, TensorField, VectorField},
    grid::Discretization,
};

#[inline]
fn apply<const DIM: usize>(
    disc: &impl Discretization<DIM>,
    axis: usize,
    values: &na::DVector<f64>,
) -> na::DVector<f64> {
    let d = disc.derivative(axis);
    assert_eq!(
        d.ncols(),
        values.len(),
        "Field with {} values applied to a discretization with {} cells",
        values.len(),
        d.ncols()
    );
    d * values
}

/// Gradient of a scalar field.
pub fn grad_scalar<const DIM: usize>(
    disc: &impl Discretization<DIM>,
    f: &ScalarField,
) -> VectorField<DIM> {
    VectorField::from_components(std::array::from_fn(|a| apply(disc, a, &f.values)))
}

/// Gradient of a vector field, `grad(u)[a][b] = ∂_a u_b`.
pub fn grad<const DIM: usize>(
    disc: &impl Discretization<DIM>,
    u: &VectorField<DIM>,
) -> TensorField<DIM> {
    TensorField::from_components(std::array::from_fn(|a| {
        std::array::from_fn(|b| apply(disc, a, &u.components[b]))
    }))
}

/// Divergence of a vector field.
pub fn div<const DIM: usize>(
    disc: &impl Discretization<DIM>,
    u: &VectorField<DIM>,
) -> ScalarField {
    let mut out = na::DVector::zeros(disc.cell_count());
    for a in 0..DIM {
        out += apply(disc, a, &u.components[a]);
    }
    ScalarField::from_values(out)
}

/// Divergence of a tensor field taken over the first index,
/// `div(T)_b = Σ_a ∂_a T_ab`.
pub fn div_tensor<const DIM: usize>(
    disc: &impl Discretization<DIM>,
    t: &TensorField<DIM>,
) -> VectorField<DIM> {
    VectorField::from_components(std::array::from_fn(|b| {
        let mut out = na::DVector::zeros(disc.cell_count());
        for a in 0..DIM {
            out += apply(disc, a, &t.components[a][b]);
        }
        out
    }))
}

/// Laplacian of a scalar field, `div(grad(f))`.
pub fn laplacian_scalar<const DIM: usize>(
    disc: &impl Discretization<DIM>,
    f: &ScalarField,
) -> ScalarField {
    div(disc, &grad_scalar(disc, f))
}

/// Component-wise Laplacian of a vector field, `div(grad(u))`.
pub fn laplacian<const DIM: usize>(
    disc: &impl Discretization<DIM>,
    u: &VectorField<DIM>,
) -> VectorField<DIM> {
    div_tensor(disc, &grad(disc, u))
}

/// Laplacian with a spatially varying coefficient, `div(nu grad(u))`.
pub fn weighted_laplacian<const DIM: usize>(
    disc: &impl Discretization<DIM>,
    nu: &ScalarField,
    u: &VectorField<DIM>,
) -> VectorField<DIM> {
    div_tensor(disc, &grad(disc, u).scaled(nu))
}

/// Divergence of the deviatoric transposed velocity gradient
/// weighted by a scalar, `div(nu dev(grad(u)ᵀ))`.
///
/// This is the part of the eddy viscosity stress divergence
/// that isn't a Laplacian.
pub fn transposed_stress_divergence<const DIM: usize>(
    disc: &impl Discretization<DIM>,
    nu: &ScalarField,
    u: &VectorField<DIM>,
) -> VectorField<DIM> {
    div_tensor(disc, &grad(disc, u).transpose().dev().scaled(nu))
}

/// Advection in conservative form, `div(w ⊗ u)`,
/// i.e. `u` transported by the flux of `w`.
pub fn div_outer<const DIM: usize>(
    disc: &impl Discretization<DIM>,
    w: &VectorField<DIM>,
    u: &VectorField<DIM>,
) -> VectorField<DIM> {
    div_tensor(disc, &w.outer(u))
}

//
// tests
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        field::Field,
        grid::{tiny_grid_2d, CartesianGrid},
    };
    use approx::assert_relative_eq;

    /// Cells at least two cells away from the boundary along every axis,
    /// where composed central differences are exact for quadratics.
    fn deep_interior<const DIM: usize>(grid: &CartesianGrid<DIM>) -> Vec<usize> {
        let shape = grid.shape();
        (0..grid.cell_count())
            .filter(|&c| {
                let idx = grid.cell_multi_index(c);
                (0..DIM).all(|a| idx[a] >= 2 && idx[a] + 2 < shape[a])
            })
            .collect()
    }

    #[test]
    fn laplacian_of_quadratics() {
        let grid = CartesianGrid::new(na::Vector2::zeros(), na::Vector2::repeat(1.), [7, 6]);
        let interior = deep_interior(&grid);
        assert!(!interior.is_empty());

        let f = grid.sample_scalar(|p| 3. * p.x * p.x - p.y * p.y + p.x * p.y);
        let lap = laplacian_scalar(&grid, &f);
        for &c in &interior {
            assert_relative_eq!(lap.values[c], 6. - 2., epsilon = 1e-10);
        }

        let u = grid.sample_vector(|p| na::Vector2::new(p.y * p.y, p.x * p.x + p.x));
        let lap_u = laplacian(&grid, &u);
        for &c in &interior {
            assert_relative_eq!(lap_u.components[0][c], 2., epsilon = 1e-10);
            assert_relative_eq!(lap_u.components[1][c], 2., epsilon = 1e-10);
        }
    }

    #[test]
    fn linear_fields_have_no_diffusion() {
        let grid = tiny_grid_2d();
        let u = grid.sample_vector(|p| na::Vector2::new(2. * p.x - p.y, p.x + 0.5));
        let lap = laplacian(&grid, &u);
        assert!(lap.components.iter().all(|c| c.amax() < 1e-10));
        let div_u = div(&grid, &u);
        assert!(div_u.values.iter().all(|v| (v - 2.).abs() < 1e-12));
    }

    #[test]
    fn transposed_stress_divergence_of_quadratic() {
        // div((grad u)ᵀ) = grad(div u), and the deviatoric correction
        // removes a 1/DIM share of it
        let grid = CartesianGrid::new(na::Vector2::zeros(), na::Vector2::repeat(1.), [7, 7]);
        let u = grid.sample_vector(|p| na::Vector2::new(p.x * p.x, 0.));
        let one = ScalarField::uniform(grid.cell_count(), 1.);
        let t = transposed_stress_divergence(&grid, &one, &u);
        for c in deep_interior(&grid) {
            assert_relative_eq!(t.components[0][c], 1., epsilon = 1e-10);
            assert_relative_eq!(t.components[1][c], 0., epsilon = 1e-10);
        }

        // a uniform coefficient only scales the result
        let nu = ScalarField::uniform(grid.cell_count(), 0.3);
        let scaled = transposed_stress_divergence(&grid, &nu, &u);
        assert_relative_eq!(scaled.components[0], 0.3 * &t.components[0], epsilon = 1e-12);
    }

    #[test]
    fn weighted_laplacian_with_linear_coefficient() {
        // div(nu grad u) for nu = 1 + x, u = (x, 0) is (1, 0)
        let grid = tiny_grid_2d();
        let nu = grid.sample_scalar(|p| 1. + p.x);
        let u = grid.sample_vector(|p| na::Vector2::new(p.x, 0.));
        let out = weighted_laplacian(&grid, &nu, &u);
        for c in 0..grid.cell_count() {
            assert_relative_eq!(out.components[0][c], 1., epsilon = 1e-10);
            assert_relative_eq!(out.components[1][c], 0., epsilon = 1e-10);
        }
    }

    #[test]
    fn uniform_flow_has_no_advection() {
        let grid = tiny_grid_2d();
        let u = grid.sample_vector(|_| na::Vector2::new(1.5, -0.5));
        let adv = div_outer(&grid, &u, &u);
        assert!(adv.components.iter().all(|c| c.amax() < 1e-12));

        // transporting a linear field with a uniform flow: (w·∇)u
        let v = grid.sample_vector(|p| na::Vector2::new(p.y, 2. * p.x));
        let adv = div_outer(&grid, &u, &v);
        for c in 0..grid.cell_count() {
            assert_relative_eq!(adv.components[0][c], -0.5, epsilon = 1e-10);
            assert_relative_eq!(adv.components[1][c], 3., epsilon = 1e-10);
        }
    }

    #[test]
    #[should_panic(expected = "applied to a discretization")]
    fn mismatched_field_panics() {
        let grid = tiny_grid_2d();
        let f = ScalarField::zeros(3);
        grad_scalar(&grid, &f);
    }
}
