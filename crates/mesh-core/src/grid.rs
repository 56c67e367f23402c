//! Dense scalar grids sampled on a regular lattice.

use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use tracing::debug;

use crate::error::{MeshError, MeshResult};
use crate::spatial::Aabb;

/// Default upper bound on grid samples.
pub const DEFAULT_MAX_CELLS: usize = 50_000_000;

/// Scalar samples on a regular lattice.
///
/// Sample `(x, y, z)` sits at `origin + (x, y, z) * cell_size` and is stored at
/// linear index `x + y * nx + z * nx * ny`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarGrid {
    /// Number of samples along each axis.
    pub dims: [usize; 3],

    /// Position of sample `(0, 0, 0)`.
    pub origin: Point3<f64>,

    /// Spacing between neighbouring samples.
    pub cell_size: f64,

    /// Sample values.
    pub values: Vec<f64>,
}

impl ScalarGrid {
    /// Wrap existing samples, checking shape and values.
    pub fn new(
        dims: [usize; 3],
        origin: Point3<f64>,
        cell_size: f64,
        values: Vec<f64>,
    ) -> MeshResult<Self> {
        let grid = Self {
            dims,
            origin,
            cell_size,
            values,
        };
        grid.validate()?;
        Ok(grid)
    }

    /// Sample `f` at every lattice point, in parallel.
    pub fn from_fn<F>(
        dims: [usize; 3],
        origin: Point3<f64>,
        cell_size: f64,
        f: F,
    ) -> MeshResult<Self>
    where
        F: Fn(Point3<f64>) -> f64 + Sync,
    {
        check_shape(dims, cell_size)?;
        let [nx, ny, _] = dims;
        let total = sample_count(dims);
        let values: Vec<f64> = (0..total)
            .into_par_iter()
            .map(|idx| {
                let x = idx % nx;
                let y = (idx / nx) % ny;
                let z = idx / (nx * ny);
                f(origin + Vector3::new(x as f64, y as f64, z as f64) * cell_size)
            })
            .collect();
        Self::new(dims, origin, cell_size, values)
    }

    /// Lattice covering `bounds` plus `padding` cells on every side, filled with zeros.
    ///
    /// Fails with `GridTooLarge` when the sample count exceeds `max_cells`.
    pub fn covering(
        bounds: &Aabb,
        cell_size: f64,
        padding: usize,
        max_cells: usize,
    ) -> MeshResult<Self> {
        if !(cell_size > 0.0 && cell_size.is_finite()) {
            return Err(MeshError::invalid_parameter(
                "cell_size",
                cell_size,
                "finite and > 0",
            ));
        }
        let pad = padding as f64 * cell_size;
        let origin = bounds.min - Vector3::repeat(pad);
        let extent = bounds.extent() + Vector3::repeat(2.0 * pad);
        // Tolerate round-off so an exact multiple of the cell size is not padded twice.
        let axis = |e: f64| ((e / cell_size - 1e-9).ceil().max(1.0) as usize) + 1;
        let dims = [axis(extent.x), axis(extent.y), axis(extent.z)];

        let total = dims[0]
            .checked_mul(dims[1])
            .and_then(|n| n.checked_mul(dims[2]));
        match total {
            Some(total) if total <= max_cells => {
                debug!(dims = ?dims, total, cell_size, "Allocating scalar grid");
                Ok(Self {
                    dims,
                    origin,
                    cell_size,
                    values: vec![0.0; total],
                })
            }
            _ => Err(MeshError::GridTooLarge { dims, max_cells }),
        }
    }

    /// Check shape, spacing and values.
    pub fn validate(&self) -> MeshResult<()> {
        check_shape(self.dims, self.cell_size)?;
        let expected = sample_count(self.dims);
        if self.values.len() != expected {
            return Err(MeshError::invalid_grid(format!(
                "{} values for dims {:?} (expected {})",
                self.values.len(),
                self.dims,
                expected
            )));
        }
        if let Some(idx) = self.values.iter().position(|v| !v.is_finite()) {
            return Err(MeshError::invalid_grid(format!(
                "sample {:?} is {}",
                self.delinearize(idx),
                self.values[idx]
            )));
        }
        Ok(())
    }

    /// Total number of samples.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the grid holds no samples.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Linear index of sample `(x, y, z)`.
    #[inline]
    pub fn linearize(&self, x: usize, y: usize, z: usize) -> usize {
        x + y * self.dims[0] + z * self.dims[0] * self.dims[1]
    }

    /// Sample coordinates of a linear index.
    #[inline]
    pub fn delinearize(&self, idx: usize) -> [usize; 3] {
        let plane = self.dims[0] * self.dims[1];
        let z = idx / plane;
        let rem = idx % plane;
        [rem % self.dims[0], rem / self.dims[0], z]
    }

    /// World position of sample `(x, y, z)`.
    #[inline]
    pub fn point(&self, x: usize, y: usize, z: usize) -> Point3<f64> {
        self.origin + Vector3::new(x as f64, y as f64, z as f64) * self.cell_size
    }

    /// Value at sample `(x, y, z)`.
    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> f64 {
        self.values[self.linearize(x, y, z)]
    }

    /// Box spanned by the lattice.
    pub fn bounds(&self) -> Aabb {
        let [nx, ny, nz] = self.dims;
        Aabb::new(
            self.origin,
            self.point(nx.saturating_sub(1), ny.saturating_sub(1), nz.saturating_sub(1)),
        )
    }

    /// Smallest and largest sample.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        if self.values.is_empty() {
            return None;
        }
        Some(
            self.values
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                    (lo.min(v), hi.max(v))
                }),
        )
    }
}

fn sample_count(dims: [usize; 3]) -> usize {
    dims[0] * dims[1] * dims[2]
}

fn check_shape(dims: [usize; 3], cell_size: f64) -> MeshResult<()> {
    if dims.iter().any(|&d| d < 2) {
        return Err(MeshError::invalid_grid(format!(
            "dims {dims:?} need at least 2 samples per axis"
        )));
    }
    if !(cell_size > 0.0 && cell_size.is_finite()) {
        return Err(MeshError::invalid_parameter(
            "cell_size",
            cell_size,
            "finite and > 0",
        ));
    }
    Ok(())
}
