//! Collection of full-order solutions ("snapshots") from truth solves.
//!
//! The full-order solver itself is an external collaborator,
//! plugged in through the [`FullOrderSolver`] trait.
//! Closures of the form `FnMut(&[f64]) -> Result<Vec<Snapshot<DIM>>, SolveError>`
//! implement it directly, which is convenient for tests and scripted campaigns.

use std::ops::Range;

use crate::field::{Field, ScalarField, VectorField};

/// One full-order solution sample.
#[derive(Clone, Debug)]
pub struct Snapshot<const DIM: usize> {
    /// The parameter vector the sample was computed with.
    pub parameters: Vec<f64>,
    /// Velocity field.
    pub velocity: VectorField<DIM>,
    /// Pressure field.
    pub pressure: ScalarField,
    /// Eddy viscosity field.
    pub nut: ScalarField,
}

/// A borrowed view of a stored snapshot.
#[derive(Clone, Copy, Debug)]
pub struct SnapshotView<'a, const DIM: usize> {
    /// Position of the snapshot in collection order.
    pub index: usize,
    /// The parameter vector the sample was computed with.
    pub parameters: &'a [f64],
    /// Velocity field.
    pub velocity: &'a VectorField<DIM>,
    /// Pressure field.
    pub pressure: &'a ScalarField,
    /// Eddy viscosity field.
    pub nut: &'a ScalarField,
}

/// Failure of a full-order solve, reported by the solver.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SolveError {
    /// The nonlinear iteration didn't converge.
    #[error("Truth solve did not converge after {iterations} iterations (residual {residual:e})")]
    NotConverged {
        /// Number of iterations performed.
        iterations: usize,
        /// Final residual.
        residual: f64,
    },
    /// Any other solver failure.
    #[error("Truth solve failed: {0}")]
    Failed(String),
}

/// Error in collecting snapshots.
#[derive(thiserror::Error, Debug)]
pub enum CollectError {
    /// The truth solve for a parameter sample failed.
    #[error("Truth solve for parameters {parameters:?} failed")]
    Solve {
        /// The parameters the solve was attempted with.
        parameters: Vec<f64>,
        /// Error reported by the solver.
        #[source]
        source: SolveError,
    },
    /// The solver reported success but produced no fields.
    #[error("Truth solve for parameters {parameters:?} produced no snapshots")]
    EmptySolve {
        /// The parameters the solve was attempted with.
        parameters: Vec<f64>,
    },
    /// A produced field doesn't match the discretization.
    #[error("{field} field of solution frame {frame} has {found} cells, expected {expected}")]
    FieldSize {
        /// Index of the offending frame within the solve's output.
        frame: usize,
        /// Which field was malformed.
        field: &'static str,
        /// Cell count of the discretization.
        expected: usize,
        /// Cell count of the field.
        found: usize,
    },
    /// A snapshot's parameter vector has a different length than earlier ones.
    #[error("Snapshot has {found} parameters, but earlier snapshots have {expected}")]
    ParameterCount {
        /// Parameter count of the stored snapshots.
        expected: usize,
        /// Parameter count of the new snapshot.
        found: usize,
    },
    /// Persisting a snapshot failed.
    #[error("Persisting snapshot {index} failed")]
    Sink {
        /// Index the snapshot would have been stored at.
        index: usize,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// A full-order (truth) solver producing snapshots for a parameter vector.
pub trait FullOrderSolver<const DIM: usize> {
    /// Solve the full-order problem at the given parameters.
    ///
    /// A steady solve returns one snapshot;
    /// an unsteady solve returns one per written time step.
    fn solve(&mut self, parameters: &[f64]) -> Result<Vec<Snapshot<DIM>>, SolveError>;
}

impl<const DIM: usize, F> FullOrderSolver<DIM> for F
where
    F: FnMut(&[f64]) -> Result<Vec<Snapshot<DIM>>, SolveError>,
{
    fn solve(&mut self, parameters: &[f64]) -> Result<Vec<Snapshot<DIM>>, SolveError> {
        self(parameters)
    }
}

/// Durable storage for snapshots as they are produced,
/// so that an interrupted campaign can be resumed.
pub trait SnapshotSink<const DIM: usize> {
    /// Persist the snapshot that will be stored at `index`.
    fn persist(&mut self, index: usize, snapshot: &Snapshot<DIM>) -> std::io::Result<()>;
}

/// A sink that doesn't persist anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoSink;

impl<const DIM: usize> SnapshotSink<DIM> for NoSink {
    fn persist(&mut self, _index: usize, _snapshot: &Snapshot<DIM>) -> std::io::Result<()> {
        Ok(())
    }
}

/// What to do when a sample in a campaign fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop the campaign and return the error.
    #[default]
    Abort,
    /// Record the failure in the report and continue with the next sample.
    SkipAndRecord,
}

/// A sample that failed during a campaign.
#[derive(Debug)]
pub struct SampleFailure {
    /// Index of the sample in the campaign's sample list.
    pub sample: usize,
    /// The error it failed with.
    pub error: CollectError,
}

/// Outcome of [`SnapshotStore::collect_campaign`].
#[derive(Debug, Default)]
pub struct CampaignReport {
    /// Snapshot index ranges appended for each successful sample,
    /// paired with the sample index.
    pub collected: Vec<(usize, Range<usize>)>,
    /// Samples that failed and were skipped.
    pub failures: Vec<SampleFailure>,
}

/// Ordered, append-only storage of snapshots.
///
/// Velocity, pressure and eddy viscosity lists always have the same length:
/// a sample is either stored completely or not at all.
pub struct SnapshotStore<const DIM: usize> {
    cell_count: usize,
    parameters: Vec<Vec<f64>>,
    velocity: Vec<VectorField<DIM>>,
    pressure: Vec<ScalarField>,
    nut: Vec<ScalarField>,
    sink: Box<dyn SnapshotSink<DIM>>,
}

impl<const DIM: usize> std::fmt::Debug for SnapshotStore<DIM> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("cell_count", &self.cell_count)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl<const DIM: usize> SnapshotStore<DIM> {
    /// Create an empty store for fields with `cell_count` cells.
    pub fn new(cell_count: usize) -> Self {
        Self {
            cell_count,
            parameters: Vec::new(),
            velocity: Vec::new(),
            pressure: Vec::new(),
            nut: Vec::new(),
            sink: Box::new(NoSink),
        }
    }

    /// Persist snapshots to the given sink as they are collected.
    pub fn with_sink(mut self, sink: impl SnapshotSink<DIM> + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Number of stored snapshots.
    #[inline]
    pub fn len(&self) -> usize {
        self.velocity.len()
    }

    /// Whether no snapshots have been stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.velocity.is_empty()
    }

    /// Number of cells every stored field has.
    #[inline]
    pub fn cell_count(&self) -> usize {
        self.cell_count
    }

    /// Velocity snapshots in collection order.
    #[inline]
    pub fn velocity_fields(&self) -> &[VectorField<DIM>] {
        &self.velocity
    }

    /// Pressure snapshots in collection order.
    #[inline]
    pub fn pressure_fields(&self) -> &[ScalarField] {
        &self.pressure
    }

    /// Eddy viscosity snapshots in collection order.
    #[inline]
    pub fn nut_fields(&self) -> &[ScalarField] {
        &self.nut
    }

    /// Parameter vectors of each snapshot in collection order.
    #[inline]
    pub fn parameters(&self) -> &[Vec<f64>] {
        &self.parameters
    }

    /// Get a view of a stored snapshot.
    pub fn get(&self, index: usize) -> Option<SnapshotView<'_, DIM>> {
        (index < self.len()).then(|| SnapshotView {
            index,
            parameters: &self.parameters[index],
            velocity: &self.velocity[index],
            pressure: &self.pressure[index],
            nut: &self.nut[index],
        })
    }

    /// Iterate over all stored snapshots in collection order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = SnapshotView<'_, DIM>> + '_ {
        (0..self.len()).map(|i| SnapshotView {
            index: i,
            parameters: &self.parameters[i],
            velocity: &self.velocity[i],
            pressure: &self.pressure[i],
            nut: &self.nut[i],
        })
    }

    /// Store snapshots produced elsewhere, e.g. loaded from an earlier campaign.
    ///
    /// All snapshots are validated before any of them is stored.
    pub fn extend(
        &mut self,
        snapshots: Vec<Snapshot<DIM>>,
    ) -> Result<Range<usize>, CollectError> {
        self.validate(&snapshots)?;
        let start = self.len();
        for (offset, snapshot) in snapshots.iter().enumerate() {
            self.sink
                .persist(start + offset, snapshot)
                .map_err(|source| CollectError::Sink {
                    index: start + offset,
                    source,
                })?;
        }
        for snapshot in snapshots {
            self.parameters.push(snapshot.parameters);
            self.velocity.push(snapshot.velocity);
            self.pressure.push(snapshot.pressure);
            self.nut.push(snapshot.nut);
        }
        Ok(start..self.len())
    }

    /// Run one truth solve and append the resulting snapshots.
    ///
    /// Returns the range of indices the new snapshots were stored at.
    /// If the solve fails or produces malformed fields,
    /// nothing is stored and the error is returned.
    pub fn collect(
        &mut self,
        solver: &mut impl FullOrderSolver<DIM>,
        parameters: &[f64],
    ) -> Result<Range<usize>, CollectError> {
        log::debug!("Running truth solve for parameters {parameters:?}");
        let snapshots = solver
            .solve(parameters)
            .map_err(|source| CollectError::Solve {
                parameters: parameters.to_vec(),
                source,
            })?;
        if snapshots.is_empty() {
            return Err(CollectError::EmptySolve {
                parameters: parameters.to_vec(),
            });
        }
        let range = self.extend(snapshots)?;
        log::info!(
            "Collected {} snapshot(s) for parameters {parameters:?}, {} stored in total",
            range.len(),
            self.len()
        );
        Ok(range)
    }

    /// Run truth solves for a list of parameter samples in order.
    pub fn collect_campaign(
        &mut self,
        solver: &mut impl FullOrderSolver<DIM>,
        samples: &[Vec<f64>],
        policy: FailurePolicy,
    ) -> Result<CampaignReport, CollectError> {
        let mut report = CampaignReport::default();
        for (sample, parameters) in samples.iter().enumerate() {
            match self.collect(solver, parameters) {
                Ok(range) => report.collected.push((sample, range)),
                Err(error) => match policy {
                    FailurePolicy::Abort => return Err(error),
                    FailurePolicy::SkipAndRecord => {
                        log::warn!("Skipping sample {sample}: {error}");
                        report.failures.push(SampleFailure { sample, error });
                    }
                },
            }
        }
        log::info!(
            "Campaign finished: {} of {} samples collected, {} skipped",
            report.collected.len(),
            samples.len(),
            report.failures.len()
        );
        Ok(report)
    }

    fn validate(&self, snapshots: &[Snapshot<DIM>]) -> Result<(), CollectError> {
        let expected_params = self
            .parameters
            .first()
            .or_else(|| snapshots.first().map(|s| &s.parameters))
            .map(|p| p.len());

        for (frame, snapshot) in snapshots.iter().enumerate() {
            let sizes = [
                ("velocity", snapshot.velocity.cell_count()),
                ("pressure", snapshot.pressure.cell_count()),
                ("eddy viscosity", snapshot.nut.cell_count()),
            ];
            for (field, found) in sizes {
                if found != self.cell_count {
                    return Err(CollectError::FieldSize {
                        frame,
                        field,
                        expected: self.cell_count,
                        found,
                    });
                }
            }
            if let Some(expected) = expected_params {
                if snapshot.parameters.len() != expected {
                    return Err(CollectError::ParameterCount {
                        expected,
                        found: snapshot.parameters.len(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{tiny_grid_2d, CartesianGrid, Discretization};
    use nalgebra as na;
    use std::{cell::RefCell, rc::Rc};

    fn steady_solver(
        grid: &CartesianGrid<2>,
    ) -> impl FnMut(&[f64]) -> Result<Vec<Snapshot<2>>, SolveError> + '_ {
        move |mu: &[f64]| {
            let mu0 = mu[0];
            if mu0 < 0. {
                return Err(SolveError::NotConverged {
                    iterations: 100,
                    residual: 1.,
                });
            }
            Ok(vec![Snapshot {
                parameters: mu.to_vec(),
                velocity: grid.sample_vector(|p| na::Vector2::new(mu0 * p.y, -mu0 * p.x)),
                pressure: grid.sample_scalar(|p| mu0 * p.x * p.y),
                nut: grid.sample_scalar(|p| 1e-3 * (1. + mu0 * p.x)),
            }])
        }
    }

    #[test]
    fn snapshots_are_stored_in_order() {
        let grid = tiny_grid_2d();
        let mut store = SnapshotStore::new(grid.cell_count());
        let mut solver = steady_solver(&grid);
        assert!(store.is_empty());

        assert_eq!(store.collect(&mut solver, &[1.]).unwrap(), 0..1);
        assert_eq!(store.collect(&mut solver, &[2.]).unwrap(), 1..2);
        assert_eq!(store.len(), 2);
        assert_eq!(store.parameters(), &[vec![1.], vec![2.]]);

        let second = store.get(1).unwrap();
        assert_eq!(second.index, 1);
        assert_eq!(second.parameters, &[2.]);
        assert!(store.get(2).is_none());
        assert_eq!(store.iter().len(), 2);
    }

    #[test]
    fn failed_solve_leaves_store_untouched() {
        let grid = tiny_grid_2d();
        let mut store = SnapshotStore::new(grid.cell_count());
        let mut solver = steady_solver(&grid);
        store.collect(&mut solver, &[1.]).unwrap();

        let err = store.collect(&mut solver, &[-1.]).unwrap_err();
        assert!(matches!(
            err,
            CollectError::Solve {
                source: SolveError::NotConverged { .. },
                ..
            }
        ));
        assert_eq!(store.len(), 1);
        assert_eq!(store.velocity_fields().len(), store.pressure_fields().len());
        assert_eq!(store.velocity_fields().len(), store.nut_fields().len());
    }

    #[test]
    fn malformed_frame_rejects_whole_solve() {
        let grid = tiny_grid_2d();
        let cells = grid.cell_count();
        let mut store = SnapshotStore::new(cells);
        let mut unsteady = |mu: &[f64]| -> Result<Vec<Snapshot<2>>, SolveError> {
            let good = Snapshot {
                parameters: mu.to_vec(),
                velocity: VectorField::zeros(cells),
                pressure: ScalarField::zeros(cells),
                nut: ScalarField::zeros(cells),
            };
            let mut bad = good.clone();
            bad.nut = ScalarField::zeros(cells - 1);
            Ok(vec![good.clone(), good, bad])
        };

        let err = store.collect(&mut unsteady, &[0.5]).unwrap_err();
        match err {
            CollectError::FieldSize {
                frame,
                field,
                expected,
                found,
            } => {
                assert_eq!(frame, 2);
                assert_eq!(field, "eddy viscosity");
                assert_eq!(expected, cells);
                assert_eq!(found, cells - 1);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(store.is_empty());

        let mut empty = |_: &[f64]| -> Result<Vec<Snapshot<2>>, SolveError> { Ok(Vec::new()) };
        assert!(matches!(
            store.collect(&mut empty, &[0.5]),
            Err(CollectError::EmptySolve { .. })
        ));
    }

    #[test]
    fn campaign_policies() {
        let grid = tiny_grid_2d();
        let samples = vec![vec![1.], vec![-1.], vec![3.]];

        let mut store = SnapshotStore::new(grid.cell_count());
        let report = store
            .collect_campaign(&mut steady_solver(&grid), &samples, FailurePolicy::SkipAndRecord)
            .unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(report.collected, vec![(0, 0..1), (2, 1..2)]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].sample, 1);

        let mut store = SnapshotStore::new(grid.cell_count());
        let err = store
            .collect_campaign(&mut steady_solver(&grid), &samples, FailurePolicy::Abort)
            .unwrap_err();
        assert!(matches!(err, CollectError::Solve { .. }));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn parameter_count_must_stay_consistent() {
        let grid = tiny_grid_2d();
        let mut store = SnapshotStore::new(grid.cell_count());
        let mut solver = steady_solver(&grid);
        store.collect(&mut solver, &[1.]).unwrap();
        let err = store.collect(&mut solver, &[1., 2.]).unwrap_err();
        assert!(matches!(
            err,
            CollectError::ParameterCount {
                expected: 1,
                found: 2
            }
        ));
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        persisted: Rc<RefCell<Vec<usize>>>,
        fail_at: Option<usize>,
    }

    impl SnapshotSink<2> for RecordingSink {
        fn persist(&mut self, index: usize, _snapshot: &Snapshot<2>) -> std::io::Result<()> {
            if self.fail_at == Some(index) {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
            }
            self.persisted.borrow_mut().push(index);
            Ok(())
        }
    }

    #[test]
    fn snapshots_are_persisted_as_collected() {
        let grid = tiny_grid_2d();
        let sink = RecordingSink {
            fail_at: Some(2),
            ..Default::default()
        };
        let persisted = sink.persisted.clone();
        let mut store = SnapshotStore::new(grid.cell_count()).with_sink(sink);
        let mut solver = steady_solver(&grid);

        store.collect(&mut solver, &[1.]).unwrap();
        store.collect(&mut solver, &[2.]).unwrap();
        let err = store.collect(&mut solver, &[3.]).unwrap_err();
        assert!(matches!(err, CollectError::Sink { index: 2, .. }));
        assert_eq!(*persisted.borrow(), vec![0, 1]);
        assert_eq!(store.len(), 2);
    }
}
