//! Offline stage of a turbulent reduced model for a synthetic family of vortex flows.
//!
//! The "full-order solver" here produces analytic fields,
//! and the basis is obtained by orthonormalizing snapshots,
//! but the steps are the same as with a real solver and a POD basis.
//!
//! Run with `RUST_LOG=info` (or `debug` for assembly timings) to see the log output.

use turbrom::{self as tr, Discretization, Field};

use std::f64::consts::PI;

/// Velocity, pressure and eddy viscosity of a vortex whose strength
/// and eddy viscosity grow with the parameter.
fn vortex(grid: &tr::CartesianGrid<2>, mu: f64) -> tr::Snapshot<2> {
    let velocity = grid.sample_vector(|p| {
        let swirl = tr::Vec2::new(
            (PI * p.x).sin() * (PI * p.y).cos(),
            -(PI * p.x).cos() * (PI * p.y).sin(),
        );
        let shear = tr::Vec2::new(p.y * p.y, 0.);
        mu * swirl + (0.2 * mu * mu) * shear
    });
    let pressure = grid.sample_scalar(|p| {
        0.25 * mu * mu * ((2. * PI * p.x).cos() + (2. * PI * p.y).cos())
    });
    let nut = grid.sample_scalar(|p| 1e-3 * mu * (1. + p.y) + 1e-4 * mu * mu * p.x * p.y);
    tr::Snapshot {
        parameters: vec![mu],
        velocity,
        pressure,
        nut,
    }
}

/// Gram-Schmidt on the given fields, dropping ones that are (nearly) dependent.
fn orthonormal_modes<F: Field>(grid: &tr::CartesianGrid<2>, fields: &[F], max: usize) -> Vec<F> {
    let mut modes: Vec<F> = Vec::new();
    for field in fields {
        let mut f = field.clone();
        for m in &modes {
            let c = grid.inner(&f, m);
            f.axpy(-c, m);
        }
        let norm = grid.inner(&f, &f).sqrt();
        if norm < 1e-8 * grid.inner(field, field).sqrt() {
            continue;
        }
        let mut unit = F::zeros(grid.cell_count());
        unit.axpy(1. / norm, &f);
        modes.push(unit);
        if modes.len() == max {
            break;
        }
    }
    modes
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let grid = tr::CartesianGrid::new(tr::Vec2::zeros(), tr::Vec2::repeat(1.), [24, 24]);

    // truth solves; one sample is set up to fail
    // to show how failures are recorded instead of aborting the campaign
    let mut solver = |mu: &[f64]| -> Result<Vec<tr::Snapshot<2>>, tr::SolveError> {
        if mu[0] > 2.7 {
            return Err(tr::SolveError::NotConverged {
                iterations: 500,
                residual: 3e-2,
            });
        }
        Ok(vec![vortex(&grid, mu[0])])
    };
    let samples: Vec<Vec<f64>> = (0..7).map(|i| vec![0.5 + 0.4 * i as f64]).collect();
    let mut store = tr::SnapshotStore::new(grid.cell_count());
    let report = store.collect_campaign(&mut solver, &samples, tr::FailurePolicy::SkipAndRecord)?;
    for failure in &report.failures {
        log::warn!("sample {} failed: {}", failure.sample, failure.error);
    }

    // basis
    let velocity = orthonormal_modes(&grid, store.velocity_fields(), 2);
    let pressure = orthonormal_modes(&grid, store.pressure_fields(), 1);
    let nut = orthonormal_modes(&grid, store.nut_fields(), 2);
    // supremizers would come from a pressure-gradient lifting; any extra field works here
    let supremizer_candidates: Vec<_> = pressure
        .iter()
        .map(|p| tr::operator::grad_scalar(&grid, p))
        .collect();
    let supremizer = orthonormal_modes(
        &grid,
        &[velocity.clone(), supremizer_candidates].concat(),
        velocity.len() + 1,
    )
    .split_off(velocity.len());
    let basis = tr::BasisSet::new(velocity, pressure)
        .with_supremizer(supremizer)
        .with_eddy_viscosity(nut);
    println!("basis sizes: {}", basis.max_counts());

    let operator_folder = std::env::temp_dir().join("turbrom_offline_stage");
    let config = tr::ReductionConfig {
        operator_folder: Some(operator_folder.clone()),
        ..Default::default()
    };
    let reduction = tr::TurbulentReduction::new(&grid, &basis, config);

    let counts = basis.max_counts();
    let sup = reduction.project_sup(&store, &counts)?;
    let ppe = reduction.project_ppe(&store, &counts)?;
    println!(
        "operators saved to {} for {} and {}",
        operator_folder.display(),
        sup.operators.counts(),
        ppe.operators.counts()
    );

    // online: eddy viscosity coefficients at a new parameter,
    // then the nonlinear term (a; c)ᵀ C_total[i] a for some velocity coefficients,
    // i.e. advection minus eddy viscosity diffusion
    let mu = 1.3;
    let query = sup.interpolator.query(&[mu]);
    let n = sup.operators.b_total.nrows();
    let a = tr::na::DVector::from_fn(n, |i, _| if i == 0 { mu } else { 0. });
    let y = tr::na::DVector::from_iterator(
        n + query.values.len(),
        a.iter().chain(query.values.iter()).copied(),
    );
    for (i, c) in sup.operators.c_total.iter().enumerate() {
        println!("nonlinear term of mode {i}: {:.6e}", y.dot(&(c * &a)));
    }
    println!("eddy viscosity coefficients at mu = {mu}: {:?} ({:?})", query.values.as_slice(), query.domain);

    let far = sup.interpolator.query(&[10.]);
    println!("at mu = 10 the query is {:?}", far.domain);

    Ok(())
}
