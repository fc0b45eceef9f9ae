//! Online reconstruction of the eddy viscosity.
//!
//! The eddy viscosity depends nonlinearly on the flow,
//! so its reduced coefficients can't be obtained by Galerkin projection.
//! Instead, interpolants are fitted offline from the snapshots
//! and queried online with the current parameters or reduced velocity.

use nalgebra as na;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    basis::{reconstruct, BasisSet, Mode, ModeCounts, ModeFamily},
    field::{Field, ScalarField},
    grid::Discretization,
    rbf::{point_bounds, FitError, RbfModel, RbfSettings, ScatteredFit, ScatteredInterpolant, TrainingTable},
    reduced::AssemblyError,
    snapshot::SnapshotStore,
};

/// What the interpolants take as input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputCoordinates {
    /// The parameter vector of each snapshot.
    #[default]
    Parameters,
    /// Reduced velocity coefficients of each snapshot.
    VelocityCoefficients,
    /// Reduced eddy viscosity coefficients of each snapshot.
    EddyViscosityCoefficients,
}

/// What the interpolants predict.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterpolationTarget {
    /// One interpolant per eddy viscosity mode, predicting its coefficient.
    #[default]
    PerMode,
    /// One interpolant per cell, predicting the local eddy viscosity.
    PerCell,
}

/// Settings for fitting an [`EddyViscosityInterpolator`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InterpolatorConfig {
    /// Input coordinates. Default [`InputCoordinates::Parameters`].
    pub inputs: InputCoordinates,
    /// Interpolation target. Default [`InterpolationTarget::PerMode`].
    pub target: InterpolationTarget,
    /// Settings of the RBF backend.
    pub rbf: RbfSettings,
}

impl InterpolatorConfig {
    /// Set the input coordinates.
    pub fn inputs(mut self, inputs: InputCoordinates) -> Self {
        self.inputs = inputs;
        self
    }

    /// Set the interpolation target.
    pub fn target(mut self, target: InterpolationTarget) -> Self {
        self.target = target;
        self
    }

    /// Set the RBF backend settings.
    pub fn rbf(mut self, rbf: RbfSettings) -> Self {
        self.rbf = rbf;
        self
    }
}

/// Whether a query point lies within the bounding box of the training inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryDomain {
    /// Inside the box, i.e. interpolation.
    Inside,
    /// Outside the box, i.e. extrapolation, which may be inaccurate.
    Outside,
}

/// Result of querying an [`EddyViscosityInterpolator`].
#[derive(Clone, Debug, PartialEq)]
pub struct ViscosityQuery {
    /// Mode coefficients for [`InterpolationTarget::PerMode`],
    /// cell values for [`InterpolationTarget::PerCell`].
    pub values: na::DVector<f64>,
    /// Whether the query was an extrapolation.
    pub domain: QueryDomain,
}

/// Error in fitting an [`EddyViscosityInterpolator`].
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum InterpolatorError {
    /// Snapshots or modes needed for the training tables were missing or invalid.
    #[error("Failed to build training tables")]
    Assembly(#[from] AssemblyError),
    /// Fitting one of the interpolants failed.
    #[error("Failed to fit interpolant {target}")]
    Fit {
        /// Index of the mode or cell the interpolant predicts.
        target: usize,
        /// The underlying error.
        #[source]
        source: FitError,
    },
}

/// Interpolants mapping reduced inputs to the eddy viscosity,
/// fitted once from a snapshot store and immutable afterwards.
#[derive(Clone, Debug)]
pub struct EddyViscosityInterpolator<M = RbfModel> {
    inputs: InputCoordinates,
    target: InterpolationTarget,
    models: Vec<M>,
    samples: Vec<Vec<f64>>,
    bounds: (Vec<f64>, Vec<f64>),
    cell_count: usize,
    /// the modes coefficients refer to, kept for reconstruction
    nut_modes: Vec<ScalarField>,
}

impl EddyViscosityInterpolator<RbfModel> {
    /// Fit RBF interpolants to the snapshots in `store`.
    ///
    /// Velocity and eddy viscosity coefficients are computed with
    /// the first `counts.velocity` and `counts.nut` modes of `basis`.
    pub fn fit<D, const DIM: usize>(
        disc: &D,
        store: &SnapshotStore<DIM>,
        basis: &BasisSet<DIM>,
        counts: &ModeCounts,
        config: &InterpolatorConfig,
    ) -> Result<Self, InterpolatorError>
    where
        D: Discretization<DIM>,
    {
        Self::fit_with(disc, store, basis, counts, config, &config.rbf)
    }
}

impl<M: ScatteredInterpolant> EddyViscosityInterpolator<M> {
    /// Fit interpolants with a custom backend.
    ///
    /// The `rbf` settings of `config` are ignored in favour of `fitter`.
    pub fn fit_with<D, S, const DIM: usize>(
        disc: &D,
        store: &SnapshotStore<DIM>,
        basis: &BasisSet<DIM>,
        counts: &ModeCounts,
        config: &InterpolatorConfig,
        fitter: &S,
    ) -> Result<Self, InterpolatorError>
    where
        D: Discretization<DIM>,
        S: ScatteredFit<Model = M>,
    {
        if store.is_empty() {
            return Err(AssemblyError::NoSnapshots.into());
        }
        let tensor = "nut interpolation";
        let cells = disc.cell_count();
        let nut = basis.scalar_modes(ModeFamily::EddyViscosity, counts.nut, cells, tensor)?;
        let velocity = match config.inputs {
            InputCoordinates::VelocityCoefficients => {
                basis.vector_modes(ModeFamily::Velocity, counts.velocity, cells, tensor)?
            }
            _ => Vec::new(),
        };
        if store.cell_count() != cells {
            return Err(AssemblyError::FieldSize {
                tensor,
                family: ModeFamily::EddyViscosity,
                index: 0,
                expected: cells,
                found: store.cell_count(),
            }
            .into());
        }

        let samples: Vec<Vec<f64>> = store
            .iter()
            .map(|s| match config.inputs {
                InputCoordinates::Parameters => s.parameters.to_vec(),
                InputCoordinates::VelocityCoefficients => coefficients(disc, s.velocity, &velocity),
                InputCoordinates::EddyViscosityCoefficients => coefficients(disc, s.nut, &nut),
            })
            .collect();
        let dim = samples.first().map_or(0, |s| s.len());

        let outputs: Vec<Vec<f64>> = store
            .iter()
            .map(|s| match config.target {
                InterpolationTarget::PerMode => coefficients(disc, s.nut, &nut),
                InterpolationTarget::PerCell => s.nut.values.as_slice().to_vec(),
            })
            .collect();
        let target_count = match config.target {
            InterpolationTarget::PerMode => nut.len(),
            InterpolationTarget::PerCell => cells,
        };

        let mut tables = vec![TrainingTable::new(dim); target_count];
        for (point, out) in samples.iter().zip(&outputs) {
            for (target, (table, &value)) in tables.iter_mut().zip(out).enumerate() {
                table
                    .add_sample(point, value)
                    .map_err(|source| InterpolatorError::Fit { target, source })?;
            }
        }

        log::info!(
            "Fitting {target_count} eddy viscosity interpolants to {} samples",
            samples.len()
        );
        let start = std::time::Instant::now();
        let models = tables
            .par_iter()
            .enumerate()
            .map(|(target, table)| {
                fitter
                    .fit(table)
                    .map_err(|source| InterpolatorError::Fit { target, source })
            })
            .collect::<Result<Vec<M>, _>>()?;
        log::debug!("Interpolants fitted in {:?}", start.elapsed());

        let bounds = point_bounds(&samples, dim).unwrap_or_default();
        Ok(Self {
            inputs: config.inputs,
            target: config.target,
            models,
            samples,
            bounds,
            cell_count: cells,
            nut_modes: nut.iter().map(|m| m.field.clone()).collect(),
        })
    }

    /// Evaluate every interpolant at `point`.
    ///
    /// Points outside the bounding box of the training inputs are still evaluated,
    /// but flagged as [`QueryDomain::Outside`] and logged.
    ///
    /// # Panics
    ///
    /// If the point's dimension doesn't match the training inputs.
    pub fn query(&self, point: &[f64]) -> ViscosityQuery {
        assert_eq!(
            point.len(),
            self.input_dim(),
            "Point with {} coordinates queried from interpolants with {}-dimensional inputs",
            point.len(),
            self.input_dim()
        );
        let values: Vec<f64> = self.models.par_iter().map(|m| m.query(point)).collect();
        let (lo, hi) = &self.bounds;
        let inside = point
            .iter()
            .zip(lo.iter().zip(hi))
            .all(|(x, (l, h))| x >= l && x <= h);
        let domain = if inside {
            QueryDomain::Inside
        } else {
            log::warn!("Eddy viscosity queried outside of the training inputs at {point:?}");
            QueryDomain::Outside
        };
        ViscosityQuery {
            values: na::DVector::from_vec(values),
            domain,
        }
    }

    /// Evaluate the eddy viscosity field at `point`.
    pub fn reconstruct(&self, point: &[f64]) -> (ScalarField, QueryDomain) {
        let q = self.query(point);
        let field = match self.target {
            InterpolationTarget::PerMode => {
                reconstruct(self.cell_count, q.values.as_slice(), &self.nut_modes)
            }
            InterpolationTarget::PerCell => ScalarField::from_values(q.values),
        };
        (field, q.domain)
    }

    /// Input coordinates the interpolants were trained on.
    #[inline]
    pub fn inputs(&self) -> InputCoordinates {
        self.inputs
    }

    /// What the interpolants predict.
    #[inline]
    pub fn target(&self) -> InterpolationTarget {
        self.target
    }

    /// Dimension of query points.
    #[inline]
    pub fn input_dim(&self) -> usize {
        self.bounds.0.len()
    }

    /// Number of interpolants.
    #[inline]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether there are no interpolants, i.e. no eddy viscosity modes were used.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// The training inputs, one per snapshot.
    #[inline]
    pub fn samples(&self) -> &[Vec<f64>] {
        &self.samples
    }

    /// The bounding box `(min, max)` of the training inputs.
    #[inline]
    pub fn bounds(&self) -> (&[f64], &[f64]) {
        (&self.bounds.0, &self.bounds.1)
    }

    /// The fitted interpolants.
    #[inline]
    pub fn models(&self) -> &[M] {
        &self.models
    }
}

fn coefficients<const DIM: usize, F: Field>(
    disc: &impl Discretization<DIM>,
    field: &F,
    modes: &[Mode<'_, F>],
) -> Vec<f64> {
    modes.iter().map(|m| disc.inner(field, m.field)).collect()
}
