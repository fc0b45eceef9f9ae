//! The complete offline stage of a turbulent reduced model:
//! baseline and closure operators assembled side by side,
//! combined into the totals used online, plus the fitted eddy viscosity interpolator.

use std::path::PathBuf;

use nalgebra as na;
use serde::{Deserialize, Serialize};

use crate::{
    basis::{BasisSet, ModeCounts},
    grid::Discretization,
    interpolator::{EddyViscosityInterpolator, InterpolatorConfig, InterpolatorError},
    persist::{self, PersistError},
    rbf::RbfModel,
    reduced::{AssemblyError, BaselineOperators, Projection, ReducedOperatorAssembler, ReducedTensor3},
    snapshot::SnapshotStore,
    turbulence::{total_operators, PpeClosure, TurbulenceClosureAssembler},
};

/// Settings of a [`TurbulentReduction`].
#[derive(Clone, Debug, PartialEq)]
pub struct ReductionConfig {
    /// Settings of the eddy viscosity interpolator.
    pub interpolator: InterpolatorConfig,
    /// Whether the pressure Poisson projection also assembles
    /// the closure terms tested against pressure gradients. Default true.
    pub ppe_turbulence: bool,
    /// Folder to load previously assembled operators from and save new ones to.
    /// Default `None`, i.e. always assemble and never save.
    pub operator_folder: Option<PathBuf>,
}

impl Default for ReductionConfig {
    fn default() -> Self {
        Self {
            interpolator: InterpolatorConfig::default(),
            ppe_turbulence: true,
            operator_folder: None,
        }
    }
}

/// Error in the offline stage.
#[derive(thiserror::Error, Debug)]
pub enum ReductionError {
    /// Assembly of an operator failed.
    #[error("Failed to assemble reduced operators")]
    Assembly(#[from] AssemblyError),
    /// Fitting the eddy viscosity interpolator failed.
    #[error("Failed to fit the eddy viscosity interpolator")]
    Interpolator(#[from] InterpolatorError),
    /// Saving the assembled operators failed.
    #[error("Failed to save reduced operators")]
    Persist(#[from] PersistError),
}

/// Every reduced matrix and tensor of a turbulent model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReducedOperatorSet {
    /// Operators of the laminar Navier-Stokes equations.
    pub baseline: BaselineOperators,
    /// Transpose part of the stress divergence, unit eddy viscosity.
    pub bt: na::DMatrix<f64>,
    /// Laplacian part of the closure, one matrix per eddy viscosity mode.
    pub ct1: ReducedTensor3,
    /// Transpose part of the closure, one matrix per eddy viscosity mode.
    pub ct2: ReducedTensor3,
    /// Closure terms of the pressure Poisson equation, if assembled.
    pub ppe: Option<PpeClosure>,
    /// `B + BT`
    pub b_total: na::DMatrix<f64>,
    /// Advection and negated closure combined per test mode.
    /// See [`total_operators`][crate::turbulence::total_operators].
    pub c_total: ReducedTensor3,
}

impl ReducedOperatorSet {
    /// Strategy the operators were assembled with.
    #[inline]
    pub fn projection(&self) -> Projection {
        self.baseline.projection
    }

    /// Mode counts the operators were assembled with.
    #[inline]
    pub fn counts(&self) -> ModeCounts {
        self.baseline.counts
    }
}

/// Result of the offline stage.
#[derive(Clone, Debug)]
pub struct TurbulentOperators<M = RbfModel> {
    /// The reduced operators.
    pub operators: ReducedOperatorSet,
    /// Interpolator giving the eddy viscosity coefficients online.
    pub interpolator: EddyViscosityInterpolator<M>,
}

/// The offline stage of a turbulent reduced model,
/// composed of a baseline assembler and a closure assembler.
#[derive(Clone, Debug)]
pub struct TurbulentReduction<'a, D, const DIM: usize> {
    disc: &'a D,
    basis: &'a BasisSet<DIM>,
    baseline: ReducedOperatorAssembler<'a, D, DIM>,
    closure: TurbulenceClosureAssembler<'a, D, DIM>,
    config: ReductionConfig,
}

impl<'a, D, const DIM: usize> TurbulentReduction<'a, D, DIM>
where
    D: Discretization<DIM>,
{
    /// Set up a reduction of the given basis.
    pub fn new(disc: &'a D, basis: &'a BasisSet<DIM>, config: ReductionConfig) -> Self {
        Self {
            disc,
            basis,
            baseline: ReducedOperatorAssembler::new(disc, basis),
            closure: TurbulenceClosureAssembler::new(disc, basis),
            config,
        }
    }

    /// The baseline assembler, for assembling individual operators.
    #[inline]
    pub fn baseline(&self) -> &ReducedOperatorAssembler<'a, D, DIM> {
        &self.baseline
    }

    /// The closure assembler, for assembling individual operators.
    #[inline]
    pub fn closure(&self) -> &TurbulenceClosureAssembler<'a, D, DIM> {
        &self.closure
    }

    /// Offline stage with the supremizer projection.
    pub fn project_sup(
        &self,
        store: &SnapshotStore<DIM>,
        counts: &ModeCounts,
    ) -> Result<TurbulentOperators, ReductionError> {
        self.project(store, Projection::Supremizer, *counts)
    }

    /// Offline stage with the pressure Poisson projection,
    /// the formulation used for unsteady flows.
    /// Supremizer modes are not used.
    ///
    /// Time steps of an unsteady solve share their parameters,
    /// so such a store needs an interpolator with
    /// [`InputCoordinates::VelocityCoefficients`][crate::InputCoordinates::VelocityCoefficients]
    /// inputs. With the default parameter inputs fitting fails
    /// with a duplicate sample error.
    pub fn project_ppe(
        &self,
        store: &SnapshotStore<DIM>,
        counts: &ModeCounts,
    ) -> Result<TurbulentOperators, ReductionError> {
        let counts = ModeCounts {
            supremizer: 0,
            ..*counts
        };
        self.project(store, Projection::PressurePoisson, counts)
    }

    fn project(
        &self,
        store: &SnapshotStore<DIM>,
        projection: Projection,
        counts: ModeCounts,
    ) -> Result<TurbulentOperators, ReductionError> {
        if store.is_empty() {
            return Err(AssemblyError::NoSnapshots.into());
        }
        self.basis.check_counts(&counts, "reduction")?;
        log::info!(
            "Offline stage with {projection} projection: {counts}, {} snapshots",
            store.len()
        );

        let operators = match self.load_cached(projection, &counts) {
            Some(ops) => ops,
            None => {
                let ops = match projection {
                    Projection::Supremizer => self.assemble_sup(&counts)?,
                    Projection::PressurePoisson => self.assemble_ppe(&counts)?,
                };
                if let Some(folder) = &self.config.operator_folder {
                    persist::save_operators(folder, &ops)?;
                }
                ops
            }
        };

        let interpolator = EddyViscosityInterpolator::fit(
            self.disc,
            store,
            self.basis,
            &counts,
            &self.config.interpolator,
        )?;
        Ok(TurbulentOperators {
            operators,
            interpolator,
        })
    }

    fn load_cached(&self, projection: Projection, counts: &ModeCounts) -> Option<ReducedOperatorSet> {
        let folder = self.config.operator_folder.as_ref()?;
        match persist::load_operators(folder, projection, counts) {
            Ok(ops) => {
                // file names don't distinguish whether PPE closure terms were assembled
                let wants_ppe = projection == Projection::PressurePoisson && self.config.ppe_turbulence;
                if ops.ppe.is_some() != wants_ppe {
                    log::warn!(
                        "Ignoring stored operators in {}: pressure Poisson closure terms {}",
                        folder.display(),
                        if wants_ppe { "missing" } else { "not requested" }
                    );
                    return None;
                }
                Some(ops)
            }
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                log::warn!("Ignoring stored operators: {e}");
                None
            }
        }
    }

    /// Assemble every operator of the supremizer projection.
    pub fn assemble_sup(&self, counts: &ModeCounts) -> Result<ReducedOperatorSet, AssemblyError> {
        let (nu, nsup, nnut) = (counts.velocity, counts.supremizer, counts.nut);
        let baseline = self.baseline.project_sup(counts)?;
        self.with_closure(baseline, nu, nsup, nnut, None)
    }

    /// Assemble every operator of the pressure Poisson projection.
    pub fn assemble_ppe(&self, counts: &ModeCounts) -> Result<ReducedOperatorSet, AssemblyError> {
        let (nu, np, nnut) = (counts.velocity, counts.pressure, counts.nut);
        let baseline = self.baseline.project_ppe(counts)?;
        let ppe = if self.config.ppe_turbulence {
            Some(self.closure.ppe_closure(nu, np, nnut)?)
        } else {
            None
        };
        self.with_closure(baseline, nu, 0, nnut, ppe)
    }

    fn with_closure(
        &self,
        baseline: BaselineOperators,
        nu: usize,
        nsup: usize,
        nnut: usize,
        ppe: Option<PpeClosure>,
    ) -> Result<ReducedOperatorSet, AssemblyError> {
        let start = std::time::Instant::now();
        let bt = self.closure.bt_turbulence(nu, nsup)?;
        let ct1 = self.closure.turbulence_term1(nu, nsup, nnut)?;
        let ct2 = self.closure.turbulence_term2(nu, nsup, nnut)?;
        let (b_total, c_total) =
            total_operators(&baseline.diffusion, &baseline.convection, &bt, &ct1, &ct2)?;
        log::debug!("Closure operators assembled in {:?}", start.elapsed());
        Ok(ReducedOperatorSet {
            baseline,
            bt,
            ct1,
            ct2,
            ppe,
            b_total,
            c_total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        basis::ModeFamily,
        fixtures,
        interpolator::{InputCoordinates, QueryDomain},
        rbf::FitError,
    };
    use approx::assert_relative_eq;

    #[test]
    fn supremizer_offline_stage() {
        // 3 velocity, 2 supremizer, 2 eddy viscosity modes and 5 snapshots
        let case = fixtures::channel_case();
        let reduction = TurbulentReduction::new(&case.grid, &case.basis, ReductionConfig::default());
        let counts = ModeCounts::new(3, 2, 2, 2);
        let out = reduction.project_sup(&case.store, &counts).unwrap();
        let ops = &out.operators;

        assert_eq!(ops.counts(), counts);
        assert_eq!(ops.bt.shape(), (5, 5));
        for ct in [&ops.ct1, &ops.ct2] {
            assert_eq!(ct.len(), 2);
            assert!(ct.iter().all(|m| m.shape() == (5, 5)));
        }
        assert!(ops.ppe.is_none());
        assert_eq!(ops.b_total.shape(), (5, 5));
        assert_relative_eq!(ops.b_total, &ops.baseline.diffusion + &ops.bt);
        assert_eq!(ops.c_total.len(), 5);
        assert!(ops.c_total.iter().all(|c| c.shape() == (7, 5)));
        assert_eq!(
            ops.c_total[4].view((0, 0), (5, 5)),
            ops.baseline.convection[4].view((0, 0), (5, 5))
        );
        assert_eq!(ops.c_total[4][(6, 2)], -(ops.ct1[1][(4, 2)] + ops.ct2[1][(4, 2)]));

        assert_eq!(out.interpolator.len(), 2);
        assert_eq!(out.interpolator.query(&[1.]).domain, QueryDomain::Inside);
    }

    #[test]
    fn pressure_poisson_offline_stage() {
        let case = fixtures::channel_case();
        let reduction = TurbulentReduction::new(&case.grid, &case.basis, ReductionConfig::default());
        let out = reduction
            .project_ppe(&case.store, &ModeCounts::new(3, 2, 2, 2))
            .unwrap();
        let ops = &out.operators;
        assert_eq!(ops.projection(), Projection::PressurePoisson);
        assert_eq!(ops.counts(), ModeCounts::new(3, 2, 0, 2));
        assert_eq!(ops.bt.shape(), (3, 3));
        assert!(ops.c_total.iter().all(|c| c.shape() == (5, 3)));
        let ppe = ops.ppe.as_ref().unwrap();
        assert_eq!(ppe.ct1.len(), 2);
        assert!(ppe.ct2.iter().all(|m| m.shape() == (2, 3)));

        let config = ReductionConfig {
            ppe_turbulence: false,
            ..Default::default()
        };
        let reduction = TurbulentReduction::new(&case.grid, &case.basis, config);
        let ops = reduction.assemble_ppe(&ModeCounts::new(3, 2, 0, 2)).unwrap();
        assert!(ops.ppe.is_none());
    }

    #[test]
    fn unsteady_offline_stage() {
        let case = fixtures::channel_case();
        let store = fixtures::unsteady_store(&case.grid, &case.basis);
        let counts = ModeCounts::new(3, 2, 0, 2);

        let reduction = TurbulentReduction::new(&case.grid, &case.basis, ReductionConfig::default());
        assert!(matches!(
            reduction.project_ppe(&store, &counts),
            Err(ReductionError::Interpolator(InterpolatorError::Fit {
                source: FitError::DuplicateSample { .. },
                ..
            }))
        ));

        let config = ReductionConfig {
            interpolator: InterpolatorConfig::default().inputs(InputCoordinates::VelocityCoefficients),
            ..Default::default()
        };
        let reduction = TurbulentReduction::new(&case.grid, &case.basis, config);
        let out = reduction.project_ppe(&store, &counts).unwrap();
        assert_eq!(out.interpolator.input_dim(), 3);
        let t = fixtures::PARAMETERS[1];
        let q = out.interpolator.query(&fixtures::velocity_coefficients(t));
        let expected = fixtures::nut_coefficients(t);
        assert_relative_eq!(q.values[0], expected[0], epsilon = 1e-8);
        assert_relative_eq!(q.values[1], expected[1], epsilon = 1e-8);
    }

    #[test]
    fn too_many_eddy_viscosity_modes() {
        // the basis only has 2 eddy viscosity modes
        let case = fixtures::channel_case();
        let reduction = TurbulentReduction::new(&case.grid, &case.basis, ReductionConfig::default());
        let err = reduction
            .project_sup(&case.store, &ModeCounts::new(3, 2, 2, 4))
            .unwrap_err();
        assert!(matches!(
            err,
            ReductionError::Assembly(AssemblyError::ModeCountExceeded {
                family: ModeFamily::EddyViscosity,
                requested: 4,
                available: 2,
                ..
            })
        ));
    }

    #[test]
    fn no_snapshots() {
        let case = fixtures::channel_case();
        let reduction = TurbulentReduction::new(&case.grid, &case.basis, ReductionConfig::default());
        let empty = SnapshotStore::new(case.grid.cell_count());
        for result in [
            reduction.project_sup(&empty, &ModeCounts::new(3, 2, 2, 2)),
            reduction.project_ppe(&empty, &ModeCounts::new(3, 2, 2, 2)),
        ] {
            assert!(matches!(
                result,
                Err(ReductionError::Assembly(AssemblyError::NoSnapshots))
            ));
        }
    }

    #[test]
    fn stored_operators_are_reused() {
        let case = fixtures::channel_case();
        let dir = tempfile::tempdir().unwrap();
        let config = ReductionConfig {
            operator_folder: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let reduction = TurbulentReduction::new(&case.grid, &case.basis, config);
        let counts = ModeCounts::new(2, 1, 1, 1);

        let first = reduction.project_sup(&case.store, &counts).unwrap();
        let file = dir
            .path()
            .join(persist::operator_file_name(Projection::Supremizer, &counts));
        assert!(file.exists());

        // tamper with the stored file to check that it's what gets loaded
        let mut stored = first.operators.clone();
        stored.bt[(0, 0)] = 42.;
        persist::save_operators(dir.path(), &stored).unwrap();
        let second = reduction.project_sup(&case.store, &counts).unwrap();
        assert_eq!(second.operators.bt[(0, 0)], 42.);

        // unreadable files are reassembled
        std::fs::write(&file, "garbage").unwrap();
        let third = reduction.project_sup(&case.store, &counts).unwrap();
        assert_relative_eq!(third.operators.bt, first.operators.bt, max_relative = 1e-12);
    }

    #[test]
    fn stored_operators_must_match_ppe_closure_setting() {
        let case = fixtures::channel_case();
        let dir = tempfile::tempdir().unwrap();
        let reduction_with = |ppe_turbulence: bool| {
            let config = ReductionConfig {
                ppe_turbulence,
                operator_folder: Some(dir.path().to_path_buf()),
                ..Default::default()
            };
            TurbulentReduction::new(&case.grid, &case.basis, config)
        };
        let counts = ModeCounts::new(3, 2, 0, 2);
        let stored = || persist::load_operators(dir.path(), Projection::PressurePoisson, &counts).unwrap();

        let without = reduction_with(false).project_ppe(&case.store, &counts).unwrap();
        assert!(without.operators.ppe.is_none());
        assert!(stored().ppe.is_none());

        // a file without the closure terms isn't enough when they're requested
        let with = reduction_with(true).project_ppe(&case.store, &counts).unwrap();
        let ppe = with.operators.ppe.as_ref().unwrap();
        assert_eq!(ppe.ct1.len(), 2);
        assert!(stored().ppe.is_some());

        // and unrequested ones aren't handed out either
        let again = reduction_with(false).project_ppe(&case.store, &counts).unwrap();
        assert!(again.operators.ppe.is_none());
        assert!(stored().ppe.is_none());
    }
}
