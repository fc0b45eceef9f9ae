//! A small synthetic case shared by tests across modules:
//! analytic fields on the tiny 2D grid, orthonormalized into a basis,
//! and snapshots built from known mode coefficients.

use std::f64::consts::PI;

use nalgebra as na;

use crate::{
    basis::{reconstruct, BasisSet},
    field::{Field, ScalarField, VectorField},
    grid::{tiny_grid_2d, CartesianGrid, Discretization},
    snapshot::{Snapshot, SnapshotStore},
};

pub struct ChannelCase {
    pub grid: CartesianGrid<2>,
    pub basis: BasisSet<2>,
    pub store: SnapshotStore<2>,
}

pub const PARAMETERS: [f64; 5] = [0.5, 1., 1.5, 2., 2.5];

pub fn velocity_coefficients(mu: f64) -> [f64; 3] {
    [mu, 0.5 * mu * mu, mu.sin()]
}

pub fn pressure_coefficients(mu: f64) -> [f64; 2] {
    [0.2 * mu, -0.1 * mu * mu]
}

pub fn nut_coefficients(mu: f64) -> [f64; 2] {
    [0.02 * (1. + mu), 0.01 * mu * mu]
}

/// Modified Gram-Schmidt, also orthogonalizing against an already orthonormal set.
pub fn orthonormalize<F: Field>(grid: &CartesianGrid<2>, fields: Vec<F>, against: &[F]) -> Vec<F> {
    let mut out: Vec<F> = Vec::with_capacity(fields.len());
    for mut f in fields {
        for q in against.iter().chain(out.iter()) {
            let c = grid.inner(&f, q);
            f.axpy(-c, q);
        }
        let norm = grid.inner(&f, &f).sqrt();
        let mut unit = F::zeros(f.cell_count());
        unit.axpy(1. / norm, &f);
        out.push(unit);
    }
    out
}

pub fn channel_basis(grid: &CartesianGrid<2>) -> BasisSet<2> {
    let velocity = orthonormalize(
        grid,
        vec![
            grid.sample_vector(|p| {
                na::Vector2::new(
                    (PI * p.x).sin() * (PI * p.y).cos(),
                    -(PI * p.x).cos() * (PI * p.y).sin(),
                )
            }),
            grid.sample_vector(|p| na::Vector2::new(p.y * p.y, p.x)),
            grid.sample_vector(|p| na::Vector2::new(p.x * p.y, p.x * p.x - p.y)),
            grid.sample_vector(|p| na::Vector2::new((PI * p.y).cos(), (PI * p.x).sin())),
        ],
        &[],
    );
    let supremizer = orthonormalize(
        grid,
        vec![
            grid.sample_vector(|p| na::Vector2::new(p.x, p.y)),
            grid.sample_vector(|p| na::Vector2::new((PI * p.y).sin(), p.x * p.y)),
        ],
        &velocity,
    );
    let pressure = orthonormalize(
        grid,
        vec![
            grid.sample_scalar(|p| p.x - 0.5),
            grid.sample_scalar(|p| p.y * p.y),
            grid.sample_scalar(|p| p.x * p.y),
        ],
        &[],
    );
    let nut = orthonormalize(
        grid,
        vec![
            grid.sample_scalar(|p| 1. + p.x),
            grid.sample_scalar(|p| p.x * p.y + p.y * p.y),
        ],
        &[],
    );

    BasisSet::new(velocity, pressure)
        .with_supremizer(supremizer)
        .with_eddy_viscosity(nut)
}

/// The snapshot at parameter `mu`, exactly in the span of the basis.
pub fn channel_snapshot(grid: &CartesianGrid<2>, basis: &BasisSet<2>, mu: f64) -> Snapshot<2> {
    let cells = grid.cell_count();
    Snapshot {
        parameters: vec![mu],
        velocity: reconstruct(cells, &velocity_coefficients(mu), basis.velocity_modes()),
        pressure: reconstruct(cells, &pressure_coefficients(mu), basis.pressure_modes()),
        nut: reconstruct(cells, &nut_coefficients(mu), basis.nut_modes()),
    }
}

pub fn channel_case() -> ChannelCase {
    let grid = tiny_grid_2d();
    let basis = channel_basis(&grid);
    let mut store = SnapshotStore::new(grid.cell_count());
    let snapshots = PARAMETERS
        .iter()
        .map(|&mu| channel_snapshot(&grid, &basis, mu))
        .collect();
    store
        .extend(snapshots)
        .expect("fixture snapshots should be valid");
    ChannelCase { grid, basis, store }
}

/// Snapshots shaped like the time steps of one unsteady solve:
/// every frame has the same parameters but different fields.
pub fn unsteady_store(grid: &CartesianGrid<2>, basis: &BasisSet<2>) -> SnapshotStore<2> {
    let mut store = SnapshotStore::new(grid.cell_count());
    let frames = PARAMETERS
        .iter()
        .map(|&t| Snapshot {
            parameters: vec![1.],
            ..channel_snapshot(grid, basis, t)
        })
        .collect();
    store
        .extend(frames)
        .expect("fixture snapshots should be valid");
    store
}

/// A uniform eddy viscosity mode with value `c`, handy for analytic checks.
pub fn uniform_nut(grid: &CartesianGrid<2>, c: f64) -> ScalarField {
    ScalarField::uniform(grid.cell_count(), c)
}

/// A velocity field with a NaN in one cell.
pub fn poisoned_velocity(grid: &CartesianGrid<2>) -> VectorField<2> {
    let mut u = grid.sample_vector(|p| na::Vector2::new(p.x, p.y));
    u.components[1][3] = f64::NAN;
    u
}
