//! `turbrom` builds Galerkin reduced-order models of turbulent incompressible flows
//! closed with an eddy viscosity model.
//!
//! The offline stage takes snapshots of a full-order simulation
//! and an orthonormal basis extracted from them, and produces
//! - the reduced Navier-Stokes operators, projected either with supremizer enrichment
//!   or with the pressure Poisson equation,
//! - the reduced operators of the eddy viscosity closure,
//!   one matrix per eddy viscosity mode,
//! - interpolants that give the eddy viscosity coefficients
//!   from parameters or reduced velocity coefficients at online time.
//!
//! # Overview
//!
//! Snapshots and modes live on a [`Discretization`],
//! which provides cell volumes for inner products and discrete derivatives.
//! [`CartesianGrid`] is a ready-made implementation;
//! a full-order solver's own mesh can be used by implementing the trait.
//!
//! Snapshots are collected into a [`SnapshotStore`] by running a [`FullOrderSolver`]
//! over a set of parameter samples.
//! Any closure mapping parameters to a list of [`Snapshot`]s is a solver.
//!
//! Modes are given to a [`BasisSet`] (extracting them is up to the user),
//! and a [`TurbulentReduction`] assembles everything from there.
//!
//! ```
//! use turbrom::{self as tr, Discretization};
//!
//! let grid = tr::CartesianGrid::new(tr::Vec2::zeros(), tr::Vec2::repeat(1.), [12, 12]);
//!
//! // single analytic modes standing in for a POD basis
//! let u = grid.sample_vector(|p| tr::Vec2::new(p.y - 0.5, 0.5 - p.x));
//! let u = (1. / grid.inner(&u, &u).sqrt()) * &u;
//! let p = grid.sample_scalar(|p| p.x - 0.5);
//! let p = (1. / grid.inner(&p, &p).sqrt()) * &p;
//! let nut = grid.sample_scalar(|p| 1. + p.y);
//! let nut = (1. / grid.inner(&nut, &nut).sqrt()) * &nut;
//! let basis = tr::BasisSet::new(vec![u.clone()], vec![p.clone()])
//!     .with_eddy_viscosity(vec![nut.clone()]);
//!
//! // a stand-in for the full-order solver
//! let mut solver = |mu: &[f64]| -> Result<Vec<tr::Snapshot<2>>, tr::SolveError> {
//!     Ok(vec![tr::Snapshot {
//!         parameters: mu.to_vec(),
//!         velocity: mu[0] * &u,
//!         pressure: mu[0] * &p,
//!         nut: (0.01 * mu[0]) * &nut,
//!     }])
//! };
//! let mut store = tr::SnapshotStore::new(grid.cell_count());
//! let samples = [vec![1.], vec![2.], vec![3.]];
//! store.collect_campaign(&mut solver, &samples, tr::FailurePolicy::Abort)?;
//!
//! let reduction = tr::TurbulentReduction::new(&grid, &basis, tr::ReductionConfig::default());
//! let rom = reduction.project_sup(&store, &tr::ModeCounts::new(1, 1, 0, 1))?;
//! // velocity rows followed by one eddy viscosity row
//! assert_eq!(rom.operators.c_total[0].shape(), (2, 1));
//!
//! let nut_coefs = rom.interpolator.query(&[2.5]);
//! assert_eq!(nut_coefs.domain, tr::QueryDomain::Inside);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! See the `offline_stage` example in the repository for a longer walkthrough
//! including the pressure Poisson projection and saved operators.

#[doc(inline)]
pub use turbrom_core::*;
