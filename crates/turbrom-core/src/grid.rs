//! The discretization that snapshots and modes live on.
//!
//! Reduced operators are volume integrals of combinations of modes
//! and their derivatives, so all a discretization has to provide
//! is a set of cell volumes and a discrete partial derivative along each axis.
//! This is captured by the [`Discretization`] trait.
//! The full-order solver's own mesh can be plugged in by implementing it;
//! [`CartesianGrid`] is a uniform cell-centred grid implementation.

use fixedbitset as fb;
use itertools::izip;
use nalgebra as na;
use nalgebra_sparse as nas;

use crate::field::Field;

/// A cell-based discretization with a volume inner product
/// and discrete first derivatives.
///
/// Implementors must be `Sync` because operator assembly
/// reads the discretization from multiple threads.
pub trait Discretization<const DIM: usize>: Sync {
    /// The number of cells, i.e. the length of every field component.
    fn cell_count(&self) -> usize;

    /// Volume of each cell.
    fn volumes(&self) -> &na::DVector<f64>;

    /// Matrix approximating the partial derivative `∂/∂x_axis`
    /// of a cell-centred scalar.
    fn derivative(&self, axis: usize) -> &nas::CsrMatrix<f64>;

    /// The volume-weighted inner product `Σ_c V_c f_c g_c`,
    /// summed over components for vector-valued fields.
    #[inline]
    fn inner<F: Field>(&self, f: &F, g: &F) -> f64
    where
        Self: Sized,
    {
        f.weighted_inner(g, self.volumes())
    }

    /// Integral of a cell-centred scalar over the whole domain.
    fn domain_integral(&self, values: &na::DVector<f64>) -> f64 {
        izip!(self.volumes().iter(), values.iter())
            .map(|(v, f)| v * f)
            .sum()
    }

    /// Total volume of the domain.
    fn total_volume(&self) -> f64 {
        self.volumes().sum()
    }
}

/// A uniform axis-aligned grid of box-shaped cells in `DIM` dimensions.
///
/// Cells are numbered with axis 0 varying fastest.
/// Derivatives are second-order central differences in the interior
/// and first-order one-sided differences in the first and last cell along each axis.
#[derive(Clone, Debug)]
pub struct CartesianGrid<const DIM: usize> {
    shape: [usize; DIM],
    spacing: na::SVector<f64, DIM>,
    origin: na::SVector<f64, DIM>,
    volumes: na::DVector<f64>,
    derivatives: Vec<nas::CsrMatrix<f64>>,
    /// cells where the derivative along the given axis is one-sided
    one_sided: Vec<fb::FixedBitSet>,
    /// union of `one_sided` over all axes
    boundary: fb::FixedBitSet,
}

impl<const DIM: usize> CartesianGrid<DIM> {
    /// Construct a grid covering the box `[origin, origin + extent]`
    /// with `shape[a]` cells along axis `a`.
    ///
    /// # Panics
    ///
    /// If any axis has fewer than two cells or a non-positive extent.
    pub fn new(
        origin: na::SVector<f64, DIM>,
        extent: na::SVector<f64, DIM>,
        shape: [usize; DIM],
    ) -> Self {
        for axis in 0..DIM {
            assert!(
                shape[axis] >= 2,
                "A grid needs at least two cells per axis, got {} along axis {axis}",
                shape[axis]
            );
            assert!(
                extent[axis] > 0.,
                "Grid extent must be positive, got {} along axis {axis}",
                extent[axis]
            );
        }

        let spacing: na::SVector<f64, DIM> = na::SVector::from_fn(|axis, _| extent[axis] / shape[axis] as f64);
        let cell_count: usize = shape.iter().product();
        let cell_volume: f64 = spacing.iter().product();
        let volumes = na::DVector::from_element(cell_count, cell_volume);

        let mut derivatives = Vec::with_capacity(DIM);
        let mut one_sided = Vec::with_capacity(DIM);
        let mut boundary = fb::FixedBitSet::with_capacity(cell_count);
        for axis in 0..DIM {
            let (mat, sided) = derivative_matrix(&shape, spacing[axis], axis);
            boundary.union_with(&sided);
            derivatives.push(mat);
            one_sided.push(sided);
        }

        Self {
            shape,
            spacing,
            origin,
            volumes,
            derivatives,
            one_sided,
            boundary,
        }
    }

    /// Number of cells along each axis.
    #[inline]
    pub fn shape(&self) -> [usize; DIM] {
        self.shape
    }

    /// Edge lengths of a cell.
    #[inline]
    pub fn spacing(&self) -> na::SVector<f64, DIM> {
        self.spacing
    }

    /// The multi-index of a cell given its linear index.
    pub fn cell_multi_index(&self, cell: usize) -> [usize; DIM] {
        let mut rem = cell;
        std::array::from_fn(|axis| {
            let i = rem % self.shape[axis];
            rem /= self.shape[axis];
            i
        })
    }

    /// Center point of a cell.
    pub fn cell_center(&self, cell: usize) -> na::SVector<f64, DIM> {
        let idx = self.cell_multi_index(cell);
        na::SVector::from_fn(|axis, _| {
            self.origin[axis] + (idx[axis] as f64 + 0.5) * self.spacing[axis]
        })
    }

    /// Iterate over the center points of all cells in index order.
    pub fn cell_centers(&self) -> impl Iterator<Item = na::SVector<f64, DIM>> + '_ {
        (0..self.cell_count()).map(|c| self.cell_center(c))
    }

    /// Cells touching the domain boundary along any axis.
    ///
    /// Iterate over the indices with `boundary().ones()`.
    #[inline]
    pub fn boundary(&self) -> &fb::FixedBitSet {
        &self.boundary
    }

    /// Cells where the derivative along `axis` falls back to a one-sided difference.
    #[inline]
    pub fn one_sided(&self, axis: usize) -> &fb::FixedBitSet {
        &self.one_sided[axis]
    }

    /// Evaluate a scalar function at every cell center.
    pub fn sample_scalar(
        &self,
        f: impl Fn(na::SVector<f64, DIM>) -> f64,
    ) -> crate::ScalarField {
        crate::ScalarField::from_values(na::DVector::from_iterator(
            self.cell_count(),
            self.cell_centers().map(f),
        ))
    }

    /// Evaluate a vector function at every cell center.
    pub fn sample_vector(
        &self,
        f: impl Fn(na::SVector<f64, DIM>) -> na::SVector<f64, DIM>,
    ) -> crate::VectorField<DIM> {
        let values: Vec<na::SVector<f64, DIM>> = self.cell_centers().map(f).collect();
        crate::VectorField::from_components(std::array::from_fn(|axis| {
            na::DVector::from_iterator(values.len(), values.iter().map(|v| v[axis]))
        }))
    }
}

impl<const DIM: usize> Discretization<DIM> for CartesianGrid<DIM> {
    #[inline]
    fn cell_count(&self) -> usize {
        self.volumes.len()
    }

    #[inline]
    fn volumes(&self) -> &na::DVector<f64> {
        &self.volumes
    }

    #[inline]
    fn derivative(&self, axis: usize) -> &nas::CsrMatrix<f64> {
        &self.derivatives[axis]
    }
}

/// Build the difference matrix along one axis
/// along with the set of rows that use a one-sided stencil.
fn derivative_matrix(
    shape: &[usize],
    h: f64,
    axis: usize,
) -> (nas::CsrMatrix<f64>, fb::FixedBitSet) {
    let cell_count: usize = shape.iter().product();
    let stride: usize = shape[..axis].iter().product();
    let n = shape[axis];

    let mut coo = nas::CooMatrix::new(cell_count, cell_count);
    let mut one_sided = fb::FixedBitSet::with_capacity(cell_count);
    for cell in 0..cell_count {
        let i = (cell / stride) % n;
        if i == 0 {
            coo.push(cell, cell, -1. / h);
            coo.push(cell, cell + stride, 1. / h);
            one_sided.insert(cell);
        } else if i == n - 1 {
            coo.push(cell, cell - stride, -1. / h);
            coo.push(cell, cell, 1. / h);
            one_sided.insert(cell);
        } else {
            coo.push(cell, cell - stride, -0.5 / h);
            coo.push(cell, cell + stride, 0.5 / h);
        }
    }

    (nas::CsrMatrix::from(&coo), one_sided)
}

/// A small 2D grid used in tests and examples:
/// 8 × 6 cells covering `[0, 1] × [0, 0.75]`.
#[doc(hidden)]
pub fn tiny_grid_2d() -> CartesianGrid<2> {
    CartesianGrid::new(
        na::Vector2::zeros(),
        na::Vector2::new(1., 0.75),
        [8, 6],
    )
}

/// A small 3D grid used in tests: 5 × 4 × 4 cells covering the unit cube.
#[doc(hidden)]
pub fn tiny_grid_3d() -> CartesianGrid<3> {
    CartesianGrid::new(na::Vector3::zeros(), na::Vector3::repeat(1.), [5, 4, 4])
}
