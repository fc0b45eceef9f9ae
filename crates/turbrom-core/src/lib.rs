//! This is the core crate containing all of `turbrom`'s functionality.
//! See the `turbrom` crate's documentation for an overview of the offline stage.

#![warn(missing_docs)]

pub mod grid;
#[doc(inline)]
pub use grid::{CartesianGrid, Discretization};

pub mod field;
#[doc(inline)]
pub use field::{Field, ScalarField, TensorField, VectorField};

pub mod operator;

pub mod snapshot;
#[doc(inline)]
pub use snapshot::{
    CampaignReport, CollectError, FailurePolicy, FullOrderSolver, NoSink, Snapshot,
    SnapshotSink, SnapshotStore, SolveError,
};

pub mod basis;
#[doc(inline)]
pub use basis::{BasisSet, ModeCounts, ModeFamily};

pub mod reduced;
#[doc(inline)]
pub use reduced::{
    AssemblyError, BaselineOperators, Projection, ReducedOperatorAssembler, ReducedTensor3,
};

pub mod turbulence;
#[doc(inline)]
pub use turbulence::{total_operators, PpeClosure, TurbulenceClosureAssembler};

pub mod rbf;
#[doc(inline)]
pub use rbf::{RbfKernel, RbfModel, RbfSettings, ScatteredFit, ScatteredInterpolant, TrainingTable};

pub mod interpolator;
#[doc(inline)]
pub use interpolator::{
    EddyViscosityInterpolator, InputCoordinates, InterpolationTarget, InterpolatorConfig,
    QueryDomain, ViscosityQuery,
};

pub mod reduction;
#[doc(inline)]
pub use reduction::{
    ReducedOperatorSet, ReductionConfig, ReductionError, TurbulentOperators, TurbulentReduction,
};

pub mod persist;

#[cfg(test)]
pub(crate) mod fixtures;

// nalgebra re-exports of common types for convenience

pub use nalgebra as na;
/// Type alias for a 2D `nalgebra` vector.
pub type Vec2 = na::Vector2<f64>;
/// Type alias for a 3D `nalgebra` vector.
pub type Vec3 = na::Vector3<f64>;
