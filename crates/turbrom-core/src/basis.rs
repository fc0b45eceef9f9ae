//! Reduced bases: ordered lists of orthonormal modes per field family.
//!
//! Mode extraction (POD) is done elsewhere;
//! a [`BasisSet`] just holds the result and hands out truncated, checked views of it.

use nalgebra as na;
use serde::{Deserialize, Serialize};

use crate::{
    field::{Field, ScalarField, VectorField},
    grid::Discretization,
    reduced::AssemblyError,
};

/// The families of modes a reduced model is built from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModeFamily {
    /// Velocity POD modes.
    Velocity,
    /// Pressure POD modes.
    Pressure,
    /// Supremizer modes enriching the velocity space for inf-sup stability.
    Supremizer,
    /// Eddy viscosity POD modes.
    EddyViscosity,
}

impl std::fmt::Display for ModeFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Velocity => "velocity",
            Self::Pressure => "pressure",
            Self::Supremizer => "supremizer",
            Self::EddyViscosity => "eddy viscosity",
        };
        f.write_str(name)
    }
}

/// The number of modes of each family retained in a reduced model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModeCounts {
    /// Number of velocity modes (`NUmodes`).
    pub velocity: usize,
    /// Number of pressure modes (`NPmodes`).
    pub pressure: usize,
    /// Number of supremizer modes (`NSUPmodes`).
    pub supremizer: usize,
    /// Number of eddy viscosity modes (`Nnutmodes`).
    pub nut: usize,
}

impl ModeCounts {
    /// Mode counts in the conventional order velocity, pressure, supremizer, eddy viscosity.
    pub fn new(velocity: usize, pressure: usize, supremizer: usize, nut: usize) -> Self {
        Self {
            velocity,
            pressure,
            supremizer,
            nut,
        }
    }

    /// Dimension of the combined velocity and supremizer space.
    #[inline]
    pub fn velocity_space(&self) -> usize {
        self.velocity + self.supremizer
    }

    /// The count for one family.
    pub fn get(&self, family: ModeFamily) -> usize {
        match family {
            ModeFamily::Velocity => self.velocity,
            ModeFamily::Pressure => self.pressure,
            ModeFamily::Supremizer => self.supremizer,
            ModeFamily::EddyViscosity => self.nut,
        }
    }
}

impl std::fmt::Display for ModeCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "NU={} NP={} NSUP={} Nnut={}",
            self.velocity, self.pressure, self.supremizer, self.nut
        )
    }
}

/// A borrowed mode together with where it came from.
///
/// The combined velocity-supremizer space mixes two families,
/// so assembly errors use this to point at the original mode.
#[derive(Clone, Copy, Debug)]
pub struct Mode<'a, F> {
    /// The family the mode belongs to.
    pub family: ModeFamily,
    /// Index of the mode within its family.
    pub index: usize,
    /// The mode's values.
    pub field: &'a F,
}

/// Ordered mode lists for every field family.
#[derive(Clone, Debug)]
pub struct BasisSet<const DIM: usize> {
    velocity: Vec<VectorField<DIM>>,
    pressure: Vec<ScalarField>,
    supremizer: Vec<VectorField<DIM>>,
    nut: Vec<ScalarField>,
}

impl<const DIM: usize> BasisSet<DIM> {
    /// Create a basis from velocity and pressure modes.
    ///
    /// Supremizer and eddy viscosity modes are added with
    /// [`with_supremizer`][Self::with_supremizer] and
    /// [`with_eddy_viscosity`][Self::with_eddy_viscosity].
    pub fn new(velocity: Vec<VectorField<DIM>>, pressure: Vec<ScalarField>) -> Self {
        Self {
            velocity,
            pressure,
            supremizer: Vec::new(),
            nut: Vec::new(),
        }
    }

    /// Set the supremizer modes.
    pub fn with_supremizer(mut self, supremizer: Vec<VectorField<DIM>>) -> Self {
        self.supremizer = supremizer;
        self
    }

    /// Set the eddy viscosity modes.
    pub fn with_eddy_viscosity(mut self, nut: Vec<ScalarField>) -> Self {
        self.nut = nut;
        self
    }

    /// The number of modes available in a family.
    pub fn available(&self, family: ModeFamily) -> usize {
        match family {
            ModeFamily::Velocity => self.velocity.len(),
            ModeFamily::Pressure => self.pressure.len(),
            ModeFamily::Supremizer => self.supremizer.len(),
            ModeFamily::EddyViscosity => self.nut.len(),
        }
    }

    /// The largest mode counts this basis supports.
    pub fn max_counts(&self) -> ModeCounts {
        ModeCounts {
            velocity: self.velocity.len(),
            pressure: self.pressure.len(),
            supremizer: self.supremizer.len(),
            nut: self.nut.len(),
        }
    }

    /// Velocity modes.
    #[inline]
    pub fn velocity_modes(&self) -> &[VectorField<DIM>] {
        &self.velocity
    }

    /// Pressure modes.
    #[inline]
    pub fn pressure_modes(&self) -> &[ScalarField] {
        &self.pressure
    }

    /// Supremizer modes.
    #[inline]
    pub fn supremizer_modes(&self) -> &[VectorField<DIM>] {
        &self.supremizer
    }

    /// Eddy viscosity modes.
    #[inline]
    pub fn nut_modes(&self) -> &[ScalarField] {
        &self.nut
    }

    /// Check that every count fits in this basis.
    pub fn check_counts(&self, counts: &ModeCounts, tensor: &'static str) -> Result<(), AssemblyError> {
        use ModeFamily::*;
        for family in [Velocity, Pressure, Supremizer, EddyViscosity] {
            check_count(tensor, family, counts.get(family), self.available(family))?;
        }
        Ok(())
    }

    /// The first `count` modes of a vector-valued family,
    /// checked against the basis size and the discretization's cell count.
    pub(crate) fn vector_modes(
        &self,
        family: ModeFamily,
        count: usize,
        cell_count: usize,
        tensor: &'static str,
    ) -> Result<Vec<Mode<'_, VectorField<DIM>>>, AssemblyError> {
        let list = match family {
            ModeFamily::Velocity => &self.velocity,
            ModeFamily::Supremizer => &self.supremizer,
            _ => panic!("{family} modes are scalar-valued"),
        };
        take_modes(tensor, family, list, count, cell_count)
    }

    /// The first `count` modes of a scalar-valued family, checked like
    /// [`vector_modes`][Self::vector_modes].
    pub(crate) fn scalar_modes(
        &self,
        family: ModeFamily,
        count: usize,
        cell_count: usize,
        tensor: &'static str,
    ) -> Result<Vec<Mode<'_, ScalarField>>, AssemblyError> {
        let list = match family {
            ModeFamily::Pressure => &self.pressure,
            ModeFamily::EddyViscosity => &self.nut,
            _ => panic!("{family} modes are vector-valued"),
        };
        take_modes(tensor, family, list, count, cell_count)
    }

    /// The combined velocity-supremizer space:
    /// the first `velocity` velocity modes followed by the first `supremizer` supremizers.
    pub(crate) fn velocity_space(
        &self,
        velocity: usize,
        supremizer: usize,
        cell_count: usize,
        tensor: &'static str,
    ) -> Result<Vec<Mode<'_, VectorField<DIM>>>, AssemblyError> {
        let mut modes = self.vector_modes(ModeFamily::Velocity, velocity, cell_count, tensor)?;
        modes.extend(self.vector_modes(ModeFamily::Supremizer, supremizer, cell_count, tensor)?);
        Ok(modes)
    }

    /// Largest deviation of the Gram matrix of a family's modes from the identity.
    ///
    /// Modes are supposed to be orthonormal under the discretization's inner product;
    /// this is a diagnostic for checking that they actually are.
    pub fn orthonormality_defect(&self, disc: &impl Discretization<DIM>, family: ModeFamily) -> f64 {
        match family {
            ModeFamily::Velocity => gram_defect(disc, &self.velocity),
            ModeFamily::Supremizer => gram_defect(disc, &self.supremizer),
            ModeFamily::Pressure => gram_defect(disc, &self.pressure),
            ModeFamily::EddyViscosity => gram_defect(disc, &self.nut),
        }
    }
}

pub(crate) fn check_count(
    tensor: &'static str,
    family: ModeFamily,
    requested: usize,
    available: usize,
) -> Result<(), AssemblyError> {
    if requested > available {
        return Err(AssemblyError::ModeCountExceeded {
            tensor,
            family,
            requested,
            available,
        });
    }
    Ok(())
}

fn take_modes<'a, F: Field>(
    tensor: &'static str,
    family: ModeFamily,
    list: &'a [F],
    count: usize,
    cell_count: usize,
) -> Result<Vec<Mode<'a, F>>, AssemblyError> {
    check_count(tensor, family, count, list.len())?;
    list[..count]
        .iter()
        .enumerate()
        .map(|(index, field)| {
            if field.cell_count() != cell_count {
                return Err(AssemblyError::FieldSize {
                    tensor,
                    family,
                    index,
                    expected: cell_count,
                    found: field.cell_count(),
                });
            }
            if !field.is_finite() {
                return Err(AssemblyError::NonFiniteMode {
                    tensor,
                    family,
                    index,
                });
            }
            Ok(Mode {
                family,
                index,
                field,
            })
        })
        .collect()
}

fn gram_defect<const DIM: usize, F: Field>(disc: &impl Discretization<DIM>, modes: &[F]) -> f64 {
    let mut defect: f64 = 0.;
    for (i, a) in modes.iter().enumerate() {
        for (j, b) in modes.iter().enumerate() {
            let target = if i == j { 1. } else { 0. };
            defect = defect.max((disc.inner(a, b) - target).abs());
        }
    }
    defect
}

/// Reduced coefficients of a field, `a_i = (field, mode_i)`.
///
/// For an orthonormal basis this is the orthogonal projection onto its span.
pub fn project<const DIM: usize, F: Field>(
    disc: &impl Discretization<DIM>,
    field: &F,
    modes: &[F],
) -> na::DVector<f64> {
    na::DVector::from_iterator(modes.len(), modes.iter().map(|m| disc.inner(field, m)))
}

/// Expand reduced coefficients back into a field, `Σ_i a_i mode_i`.
///
/// # Panics
///
/// If there are more coefficients than modes.
pub fn reconstruct<F: Field>(cell_count: usize, coefficients: &[f64], modes: &[F]) -> F {
    assert!(
        coefficients.len() <= modes.len(),
        "{} coefficients given for {} modes",
        coefficients.len(),
        modes.len()
    );
    let mut out = F::zeros(cell_count);
    for (a, mode) in coefficients.iter().zip(modes) {
        out.axpy(*a, mode);
    }
    out
}
