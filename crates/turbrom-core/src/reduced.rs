//! Galerkin projection of the incompressible Navier-Stokes operators
//! onto a reduced basis.
//!
//! The velocity space `L` is the list of velocity modes followed by the supremizer modes.
//! With `P` the pressure modes and `(·, ·)` the volume inner product of the discretization,
//! the baseline operators are
//!
//! - mass `M_ij = (L_i, L_j)`
//! - diffusion `B_ij = (L_i, ∇·∇L_j)`
//! - pressure gradient `K_ij = (L_i, ∇P_j)`
//! - divergence `P_ij = (P_i, ∇·L_j)`
//! - advection `C[i]_jk = (L_i, ∇·(L_j ⊗ L_k))`
//!
//! and for the pressure Poisson formulation additionally
//!
//! - pressure Laplacian `D_ij = (P_i, ∇·∇P_j)`
//! - pressure advection `G[i]_jk = (∇P_i, ∇·(U_j ⊗ U_k))`.
//!
//! Every entry is an independent integral, so entries are computed in parallel.
//! Differential operators are applied to each trial mode once
//! and reused for every test mode.

use nalgebra as na;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    basis::{BasisSet, Mode, ModeCounts, ModeFamily},
    field::{Field, ScalarField, VectorField},
    grid::Discretization,
    operator,
};

/// A third-order reduced tensor stored as a list of matrices,
/// the first index selecting the matrix.
pub type ReducedTensor3 = Vec<na::DMatrix<f64>>;

/// Error in assembling a reduced operator.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AssemblyError {
    /// Assembly was requested before any snapshots were collected.
    #[error("No snapshots have been collected")]
    NoSnapshots,
    /// More modes were requested than the basis provides.
    #[error("{tensor}: requested {requested} {family} modes but only {available} are available")]
    ModeCountExceeded {
        /// Name of the tensor being assembled.
        tensor: &'static str,
        /// Family of the offending modes.
        family: ModeFamily,
        /// Number of modes requested.
        requested: usize,
        /// Number of modes in the basis.
        available: usize,
    },
    /// A mode doesn't have one value per cell of the discretization.
    #[error("{tensor}: {family} mode {index} has {found} values, expected {expected}")]
    FieldSize {
        /// Name of the tensor being assembled.
        tensor: &'static str,
        /// Family of the offending mode.
        family: ModeFamily,
        /// Index of the mode within its family.
        index: usize,
        /// Cell count of the discretization.
        expected: usize,
        /// Number of values in the mode.
        found: usize,
    },
    /// A mode contains NaN or infinite values.
    #[error("{tensor}: {family} mode {index} has non-finite values")]
    NonFiniteMode {
        /// Name of the tensor being assembled.
        tensor: &'static str,
        /// Family of the offending mode.
        family: ModeFamily,
        /// Index of the mode within its family.
        index: usize,
    },
    /// An integral evaluated to NaN or infinity.
    #[error("{tensor}: non-finite value at index {indices:?}")]
    NonFinite {
        /// Name of the tensor being assembled.
        tensor: &'static str,
        /// Index of the first non-finite entry.
        indices: Vec<usize>,
    },
    /// Operators combined with each other have incompatible shapes.
    #[error("{tensor}: expected shape {expected:?}, found {found:?}")]
    ShapeMismatch {
        /// Name of the offending operator.
        tensor: &'static str,
        /// Shape implied by the other operators.
        expected: (usize, usize),
        /// Actual shape.
        found: (usize, usize),
    },
    /// A third-order tensor has the wrong number of matrices.
    #[error("{tensor}: expected {expected} slices, found {found}")]
    SliceCount {
        /// Name of the offending tensor.
        tensor: &'static str,
        /// Number of slices implied by the other operators.
        expected: usize,
        /// Actual number of slices.
        found: usize,
    },
}

/// Strategy for enforcing incompressibility in the reduced model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Projection {
    /// Velocity space enriched with supremizer modes.
    Supremizer,
    /// Pressure Poisson equation, velocity modes only.
    PressurePoisson,
}

impl Projection {
    /// Short name used in file names and log messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Supremizer => "supremizer",
            Self::PressurePoisson => "ppe",
        }
    }
}

impl std::fmt::Display for Projection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// The baseline (laminar) reduced operators for one projection strategy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BaselineOperators {
    /// Strategy the operators were assembled with.
    pub projection: Projection,
    /// Mode counts the operators were assembled with.
    /// The supremizer count is zero for [`Projection::PressurePoisson`].
    pub counts: ModeCounts,
    /// Mass matrix `M`.
    pub mass: na::DMatrix<f64>,
    /// Diffusion matrix `B`.
    pub diffusion: na::DMatrix<f64>,
    /// Pressure gradient matrix `K`.
    pub pressure_gradient: na::DMatrix<f64>,
    /// Divergence matrix `P`, supremizer projection only.
    pub divergence: Option<na::DMatrix<f64>>,
    /// Advection tensor `C`.
    pub convection: ReducedTensor3,
    /// Pressure Laplacian `D`, pressure Poisson projection only.
    pub pressure_laplacian: Option<na::DMatrix<f64>>,
    /// Pressure advection tensor `G`, pressure Poisson projection only.
    pub pressure_convection: Option<ReducedTensor3>,
}

//
// parallel assembly
//

fn check_finite(
    tensor: &'static str,
    values: &[f64],
    indices: impl Fn(usize) -> Vec<usize>,
) -> Result<(), AssemblyError> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(idx) => Err(AssemblyError::NonFinite {
            tensor,
            indices: indices(idx),
        }),
        None => Ok(()),
    }
}

/// Assemble a `rows × cols` matrix whose entries are given by `entry(i, j)`.
pub(crate) fn assemble_matrix(
    tensor: &'static str,
    rows: usize,
    cols: usize,
    entry: impl Fn(usize, usize) -> f64 + Sync,
) -> Result<na::DMatrix<f64>, AssemblyError> {
    // column-major to match nalgebra's storage
    let values: Vec<f64> = (0..rows * cols)
        .into_par_iter()
        .map(|idx| entry(idx % rows, idx / rows))
        .collect();
    check_finite(tensor, &values, |idx| vec![idx % rows, idx / rows])?;
    Ok(na::DMatrix::from_vec(rows, cols, values))
}

/// Assemble `slices` matrices of size `rows × cols`
/// whose entries are given by `entry(k, i, j)`.
pub(crate) fn assemble_tensor(
    tensor: &'static str,
    slices: usize,
    rows: usize,
    cols: usize,
    entry: impl Fn(usize, usize, usize) -> f64 + Sync,
) -> Result<ReducedTensor3, AssemblyError> {
    let size = rows * cols;
    if size == 0 {
        return Ok(vec![na::DMatrix::zeros(rows, cols); slices]);
    }
    let values: Vec<f64> = (0..slices * size)
        .into_par_iter()
        .map(|idx| {
            let within = idx % size;
            entry(idx / size, within % rows, within / rows)
        })
        .collect();
    check_finite(tensor, &values, |idx| {
        let within = idx % size;
        vec![idx / size, within % rows, within / rows]
    })?;
    Ok(values
        .chunks_exact(size)
        .map(|chunk| na::DMatrix::from_column_slice(rows, cols, chunk))
        .collect())
}

/// Apply an operator to every mode in parallel.
pub(crate) fn apply_to_modes<F: Field, T: Send>(
    modes: &[Mode<'_, F>],
    op: impl Fn(&F) -> T + Sync,
) -> Vec<T> {
    modes.par_iter().map(|m| op(m.field)).collect()
}

//
// assembler
//

/// Assembles the baseline reduced operators of a basis on a discretization.
#[derive(Clone, Copy, Debug)]
pub struct ReducedOperatorAssembler<'a, D, const DIM: usize> {
    disc: &'a D,
    basis: &'a BasisSet<DIM>,
}

impl<'a, D, const DIM: usize> ReducedOperatorAssembler<'a, D, DIM>
where
    D: Discretization<DIM>,
{
    /// Create an assembler for the given basis.
    pub fn new(disc: &'a D, basis: &'a BasisSet<DIM>) -> Self {
        Self { disc, basis }
    }

    /// The discretization operators are assembled on.
    #[inline]
    pub fn discretization(&self) -> &'a D {
        self.disc
    }

    /// The basis operators are assembled from.
    #[inline]
    pub fn basis(&self) -> &'a BasisSet<DIM> {
        self.basis
    }

    fn velocity_space(
        &self,
        nu: usize,
        nsup: usize,
        tensor: &'static str,
    ) -> Result<Vec<Mode<'a, VectorField<DIM>>>, AssemblyError> {
        self.basis
            .velocity_space(nu, nsup, self.disc.cell_count(), tensor)
    }

    fn pressure(&self, np: usize, tensor: &'static str) -> Result<Vec<Mode<'a, ScalarField>>, AssemblyError> {
        self.basis
            .scalar_modes(ModeFamily::Pressure, np, self.disc.cell_count(), tensor)
    }

    /// Mass matrix `M_ij = (L_i, L_j)`.
    pub fn mass_term(&self, nu: usize, nsup: usize) -> Result<na::DMatrix<f64>, AssemblyError> {
        let l = self.velocity_space(nu, nsup, "M")?;
        let n = l.len();
        assemble_matrix("M", n, n, |i, j| self.disc.inner(l[i].field, l[j].field))
    }

    /// Diffusion matrix `B_ij = (L_i, ∇·∇L_j)`.
    pub fn diffusive_term(&self, nu: usize, nsup: usize) -> Result<na::DMatrix<f64>, AssemblyError> {
        let l = self.velocity_space(nu, nsup, "B")?;
        let lap = apply_to_modes(&l, |u| operator::laplacian(self.disc, u));
        let n = l.len();
        assemble_matrix("B", n, n, |i, j| self.disc.inner(l[i].field, &lap[j]))
    }

    /// Pressure gradient matrix `K_ij = (L_i, ∇P_j)`.
    pub fn pressure_gradient_term(
        &self,
        nu: usize,
        nsup: usize,
        np: usize,
    ) -> Result<na::DMatrix<f64>, AssemblyError> {
        let l = self.velocity_space(nu, nsup, "K")?;
        let p = self.pressure(np, "K")?;
        let grad_p = apply_to_modes(&p, |f| operator::grad_scalar(self.disc, f));
        assemble_matrix("K", l.len(), p.len(), |i, j| {
            self.disc.inner(l[i].field, &grad_p[j])
        })
    }

    /// Divergence matrix `P_ij = (P_i, ∇·L_j)`.
    pub fn divergence_term(
        &self,
        nu: usize,
        nsup: usize,
        np: usize,
    ) -> Result<na::DMatrix<f64>, AssemblyError> {
        let l = self.velocity_space(nu, nsup, "P")?;
        let p = self.pressure(np, "P")?;
        let div_l = apply_to_modes(&l, |u| operator::div(self.disc, u));
        assemble_matrix("P", p.len(), l.len(), |i, j| {
            self.disc.inner(p[i].field, &div_l[j])
        })
    }

    /// Advection tensor `C[i]_jk = (L_i, ∇·(L_j ⊗ L_k))`.
    pub fn convective_term(&self, nu: usize, nsup: usize) -> Result<ReducedTensor3, AssemblyError> {
        let l = self.velocity_space(nu, nsup, "C")?;
        let n = l.len();
        let advected = pairwise_advection(self.disc, &l);
        assemble_tensor("C", n, n, n, |i, j, k| {
            self.disc.inner(l[i].field, &advected[j * n + k])
        })
    }

    /// Pressure Laplacian `D_ij = (P_i, ∇·∇P_j)`.
    pub fn pressure_laplacian_term(&self, np: usize) -> Result<na::DMatrix<f64>, AssemblyError> {
        let p = self.pressure(np, "D")?;
        let lap = apply_to_modes(&p, |f| operator::laplacian_scalar(self.disc, f));
        assemble_matrix("D", p.len(), p.len(), |i, j| {
            self.disc.inner(p[i].field, &lap[j])
        })
    }

    /// Pressure advection tensor `G[i]_jk = (∇P_i, ∇·(U_j ⊗ U_k))`,
    /// using velocity modes only.
    pub fn pressure_convection_term(&self, nu: usize, np: usize) -> Result<ReducedTensor3, AssemblyError> {
        let u = self.velocity_space(nu, 0, "G")?;
        let p = self.pressure(np, "G")?;
        let grad_p = apply_to_modes(&p, |f| operator::grad_scalar(self.disc, f));
        let advected = pairwise_advection(self.disc, &u);
        assemble_tensor("G", p.len(), nu, nu, |i, j, k| {
            self.disc.inner(&grad_p[i], &advected[j * nu + k])
        })
    }

    /// Assemble every operator of the supremizer projection.
    pub fn project_sup(&self, counts: &ModeCounts) -> Result<BaselineOperators, AssemblyError> {
        let (nu, nsup, np) = (counts.velocity, counts.supremizer, counts.pressure);
        log::info!("Assembling supremizer projection operators ({counts})");
        let start = std::time::Instant::now();
        let ops = BaselineOperators {
            projection: Projection::Supremizer,
            counts: *counts,
            mass: self.mass_term(nu, nsup)?,
            diffusion: self.diffusive_term(nu, nsup)?,
            pressure_gradient: self.pressure_gradient_term(nu, nsup, np)?,
            divergence: Some(self.divergence_term(nu, nsup, np)?),
            convection: self.convective_term(nu, nsup)?,
            pressure_laplacian: None,
            pressure_convection: None,
        };
        log::debug!("Baseline operators assembled in {:?}", start.elapsed());
        Ok(ops)
    }

    /// Assemble every operator of the pressure Poisson projection.
    ///
    /// Supremizer modes are not used; the returned counts have a zero supremizer count.
    pub fn project_ppe(&self, counts: &ModeCounts) -> Result<BaselineOperators, AssemblyError> {
        let counts = ModeCounts {
            supremizer: 0,
            ..*counts
        };
        let (nu, np) = (counts.velocity, counts.pressure);
        log::info!("Assembling pressure Poisson projection operators ({counts})");
        let start = std::time::Instant::now();
        let ops = BaselineOperators {
            projection: Projection::PressurePoisson,
            counts,
            mass: self.mass_term(nu, 0)?,
            diffusion: self.diffusive_term(nu, 0)?,
            pressure_gradient: self.pressure_gradient_term(nu, 0, np)?,
            divergence: None,
            convection: self.convective_term(nu, 0)?,
            pressure_laplacian: Some(self.pressure_laplacian_term(np)?),
            pressure_convection: Some(self.pressure_convection_term(nu, np)?),
        };
        log::debug!("Baseline operators assembled in {:?}", start.elapsed());
        Ok(ops)
    }
}

/// `∇·(L_j ⊗ L_k)` for every pair of modes, stored at `j * n + k`.
fn pairwise_advection<const DIM: usize>(
    disc: &impl Discretization<DIM>,
    modes: &[Mode<'_, VectorField<DIM>>],
) -> Vec<VectorField<DIM>> {
    let n = modes.len();
    (0..n * n)
        .into_par_iter()
        .map(|idx| operator::div_outer(disc, modes[idx / n].field, modes[idx % n].field))
        .collect()
}
