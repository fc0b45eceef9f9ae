//! Reduced operators of the eddy viscosity turbulence closure.
//!
//! The eddy viscosity is expanded in its own modes `ν_k`,
//! so the stress divergence `∇·(ν (∇u + dev((∇u)ᵀ)))` splits into
//! a Laplacian part `CT1` and a transpose part `CT2`, one matrix per eddy viscosity mode:
//!
//! - `BT_ij = (L_i, ∇·dev((∇L_j)ᵀ))`
//! - `CT1[k]_ij = (L_i, ∇·(ν_k ∇L_j))`
//! - `CT2[k]_ij = (L_i, ∇·(ν_k dev((∇L_j)ᵀ)))`
//!
//! The pressure Poisson variants test the same contractions
//! against pressure gradients `∇P_i` instead of velocity modes.

use nalgebra as na;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    basis::{BasisSet, Mode, ModeFamily},
    field::{ScalarField, VectorField},
    grid::Discretization,
    operator,
    reduced::{apply_to_modes, assemble_matrix, assemble_tensor, AssemblyError, ReducedTensor3},
};

/// Closure terms tested against pressure gradients,
/// one `NP × NU` matrix per eddy viscosity mode each.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PpeClosure {
    /// `(∇P_i, ∇·(ν_k ∇U_j))`
    pub ct1: ReducedTensor3,
    /// `(∇P_i, ∇·(ν_k dev((∇U_j)ᵀ)))`
    pub ct2: ReducedTensor3,
}

/// Assembles the turbulence closure operators of a basis on a discretization.
#[derive(Clone, Copy, Debug)]
pub struct TurbulenceClosureAssembler<'a, D, const DIM: usize> {
    disc: &'a D,
    basis: &'a BasisSet<DIM>,
}

impl<'a, D, const DIM: usize> TurbulenceClosureAssembler<'a, D, DIM>
where
    D: Discretization<DIM>,
{
    /// Create an assembler for the given basis.
    pub fn new(disc: &'a D, basis: &'a BasisSet<DIM>) -> Self {
        Self { disc, basis }
    }

    fn nut(&self, nnut: usize, tensor: &'static str) -> Result<Vec<Mode<'a, ScalarField>>, AssemblyError> {
        self.basis
            .scalar_modes(ModeFamily::EddyViscosity, nnut, self.disc.cell_count(), tensor)
    }

    /// `BT_ij = (L_i, ∇·dev((∇L_j)ᵀ))`,
    /// the transpose part of the stress divergence with a unit eddy viscosity.
    pub fn bt_turbulence(&self, nu: usize, nsup: usize) -> Result<na::DMatrix<f64>, AssemblyError> {
        let l = self
            .basis
            .velocity_space(nu, nsup, self.disc.cell_count(), "BT")?;
        let stress = apply_to_modes(&l, |u| {
            operator::div_tensor(self.disc, &operator::grad(self.disc, u).transpose().dev())
        });
        let n = l.len();
        assemble_matrix("BT", n, n, |i, j| self.disc.inner(l[i].field, &stress[j]))
    }

    /// `CT1[k]_ij = (L_i, ∇·(ν_k ∇L_j))`, one matrix per eddy viscosity mode.
    pub fn turbulence_term1(
        &self,
        nu: usize,
        nsup: usize,
        nnut: usize,
    ) -> Result<ReducedTensor3, AssemblyError> {
        let l = self
            .basis
            .velocity_space(nu, nsup, self.disc.cell_count(), "CT1")?;
        let nut = self.nut(nnut, "CT1")?;
        let test: Vec<&VectorField<DIM>> = l.iter().map(|m| m.field).collect();
        self.closure_tensor("CT1", &test, &l, &nut, |coef, u| {
            operator::weighted_laplacian(self.disc, coef, u)
        })
    }

    /// `CT2[k]_ij = (L_i, ∇·(ν_k dev((∇L_j)ᵀ)))`, one matrix per eddy viscosity mode.
    pub fn turbulence_term2(
        &self,
        nu: usize,
        nsup: usize,
        nnut: usize,
    ) -> Result<ReducedTensor3, AssemblyError> {
        let l = self
            .basis
            .velocity_space(nu, nsup, self.disc.cell_count(), "CT2")?;
        let nut = self.nut(nnut, "CT2")?;
        let test: Vec<&VectorField<DIM>> = l.iter().map(|m| m.field).collect();
        self.closure_tensor("CT2", &test, &l, &nut, |coef, u| {
            operator::transposed_stress_divergence(self.disc, coef, u)
        })
    }

    /// `(∇P_i, ∇·(ν_k ∇U_j))`, one `NP × NU` matrix per eddy viscosity mode.
    pub fn turbulence_ppe_term1(
        &self,
        nu: usize,
        np: usize,
        nnut: usize,
    ) -> Result<ReducedTensor3, AssemblyError> {
        let (u, grad_p, nut) = self.ppe_modes(nu, np, nnut, "CT1_PPE")?;
        let test: Vec<&VectorField<DIM>> = grad_p.iter().collect();
        self.closure_tensor("CT1_PPE", &test, &u, &nut, |coef, u| {
            operator::weighted_laplacian(self.disc, coef, u)
        })
    }

    /// `(∇P_i, ∇·(ν_k dev((∇U_j)ᵀ)))`, one `NP × NU` matrix per eddy viscosity mode.
    pub fn turbulence_ppe_term2(
        &self,
        nu: usize,
        np: usize,
        nnut: usize,
    ) -> Result<ReducedTensor3, AssemblyError> {
        let (u, grad_p, nut) = self.ppe_modes(nu, np, nnut, "CT2_PPE")?;
        let test: Vec<&VectorField<DIM>> = grad_p.iter().collect();
        self.closure_tensor("CT2_PPE", &test, &u, &nut, |coef, u| {
            operator::transposed_stress_divergence(self.disc, coef, u)
        })
    }

    /// Both pressure Poisson closure terms.
    pub fn ppe_closure(&self, nu: usize, np: usize, nnut: usize) -> Result<PpeClosure, AssemblyError> {
        Ok(PpeClosure {
            ct1: self.turbulence_ppe_term1(nu, np, nnut)?,
            ct2: self.turbulence_ppe_term2(nu, np, nnut)?,
        })
    }

    #[allow(clippy::type_complexity)]
    fn ppe_modes(
        &self,
        nu: usize,
        np: usize,
        nnut: usize,
        tensor: &'static str,
    ) -> Result<
        (
            Vec<Mode<'a, VectorField<DIM>>>,
            Vec<VectorField<DIM>>,
            Vec<Mode<'a, ScalarField>>,
        ),
        AssemblyError,
    > {
        let cells = self.disc.cell_count();
        let u = self.basis.velocity_space(nu, 0, cells, tensor)?;
        let p = self
            .basis
            .scalar_modes(ModeFamily::Pressure, np, cells, tensor)?;
        let nut = self.nut(nnut, tensor)?;
        let grad_p = apply_to_modes(&p, |f| operator::grad_scalar(self.disc, f));
        Ok((u, grad_p, nut))
    }

    /// Contract `stress(ν_k, trial_j)` with every test field.
    /// The stress of each (mode, eddy viscosity mode) pair is computed once.
    fn closure_tensor(
        &self,
        tensor: &'static str,
        test: &[&VectorField<DIM>],
        trial: &[Mode<'_, VectorField<DIM>>],
        nut: &[Mode<'_, ScalarField>],
        stress: impl Fn(&ScalarField, &VectorField<DIM>) -> VectorField<DIM> + Sync,
    ) -> Result<ReducedTensor3, AssemblyError> {
        let start = std::time::Instant::now();
        let n = trial.len();
        let applied: Vec<VectorField<DIM>> = (0..nut.len() * n)
            .into_par_iter()
            .map(|idx| stress(nut[idx / n].field, trial[idx % n].field))
            .collect();
        let out = assemble_tensor(tensor, nut.len(), test.len(), n, |k, i, j| {
            self.disc.inner(test[i], &applied[k * n + j])
        })?;
        log::debug!(
            "{tensor}: {} matrices of {}x{} assembled in {:?}",
            out.len(),
            test.len(),
            n,
            start.elapsed()
        );
        Ok(out)
    }
}

/// Combine the baseline and closure operators into the ones used online:
/// `B_total = B + BT`, and for every test mode `i` the matrix `C_total[i]`
/// of size `(n + Nnut) × n` whose first `n` rows are `C[i]`
/// and whose row `n + k` is row `i` of `-(CT1[k] + CT2[k])`.
///
/// With `a` the velocity coefficients and `c` the eddy viscosity coefficients,
/// the nonlinear term of test mode `i` is then `[a; c]ᵀ C_total[i] a`,
/// advection minus eddy viscosity diffusion, so that the momentum equation reads
/// `M ȧ = ν B_total a - [a; c]ᵀ C_total[i] a - K b`.
pub fn total_operators(
    b: &na::DMatrix<f64>,
    c: &[na::DMatrix<f64>],
    bt: &na::DMatrix<f64>,
    ct1: &[na::DMatrix<f64>],
    ct2: &[na::DMatrix<f64>],
) -> Result<(na::DMatrix<f64>, ReducedTensor3), AssemblyError> {
    let n = b.nrows();
    let square = (n, n);
    let check_shape = |tensor, m: &na::DMatrix<f64>| {
        if m.shape() != square {
            return Err(AssemblyError::ShapeMismatch {
                tensor,
                expected: square,
                found: m.shape(),
            });
        }
        Ok(())
    };
    check_shape("B", b)?;
    check_shape("BT", bt)?;
    if c.len() != n {
        return Err(AssemblyError::SliceCount {
            tensor: "C",
            expected: n,
            found: c.len(),
        });
    }
    if ct2.len() != ct1.len() {
        return Err(AssemblyError::SliceCount {
            tensor: "CT2",
            expected: ct1.len(),
            found: ct2.len(),
        });
    }
    for m in c {
        check_shape("C", m)?;
    }
    for (m1, m2) in ct1.iter().zip(ct2) {
        check_shape("CT1", m1)?;
        check_shape("CT2", m2)?;
    }

    let b_total = b + bt;
    let nnut = ct1.len();
    let c_total = c
        .iter()
        .enumerate()
        .map(|(i, ci)| {
            let mut total = na::DMatrix::zeros(n + nnut, n);
            total.view_mut((0, 0), (n, n)).copy_from(ci);
            for (k, (m1, m2)) in ct1.iter().zip(ct2).enumerate() {
                // eddy viscosity diffusion is on the opposite side from advection
                total.row_mut(n + k).copy_from(&-(m1.row(i) + m2.row(i)));
            }
            total
        })
        .collect();
    Ok((b_total, c_total))
}
