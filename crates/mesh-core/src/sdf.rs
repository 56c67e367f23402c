//! Signed distance fields of triangle meshes.

use std::f64::consts::PI;

use nalgebra::Point3;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{MeshError, MeshResult};
use crate::grid::{DEFAULT_MAX_CELLS, ScalarGrid};
use crate::math::{closest_point_on_triangle, solid_angle};
use crate::spatial::{Aabb, KdTree};
use crate::tracing_ext::OperationTimer;
use crate::Mesh;

/// Parameters for [`mesh_to_sdf`].
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
#[cfg_attr(feature = "pipeline-config", serde(default))]
pub struct SdfParams {
    /// Cells along the longest bounding-box axis.
    pub resolution: usize,

    /// Extra cells on every side of the bounding box.
    pub padding: usize,

    /// Maximum number of samples before the grid is refused.
    pub max_cells: usize,
}

impl Default for SdfParams {
    fn default() -> Self {
        Self {
            resolution: 64,
            padding: 2,
            max_cells: DEFAULT_MAX_CELLS,
        }
    }
}

impl SdfParams {
    /// Default parameters with the given resolution.
    pub fn with_resolution(resolution: usize) -> Self {
        Self {
            resolution,
            ..Default::default()
        }
    }
}

/// Point queries against a fixed triangle mesh.
///
/// Distances are exact; a KD-tree over triangle centroids limits how many
/// triangles each query has to test. Signs come from the generalized winding
/// number, so small gaps in the surface do not flip whole regions.
pub struct DistanceField<'a> {
    mesh: &'a Mesh,
    centroids: KdTree,
    max_centroid_radius: f64,
}

impl<'a> DistanceField<'a> {
    /// Index the faces of `mesh`.
    pub fn new(mesh: &'a Mesh) -> Self {
        let (centroids, radii): (Vec<Point3<f64>>, Vec<f64>) = mesh
            .triangles()
            .map(|t| {
                let c = t.centroid();
                let r = [t.v0, t.v1, t.v2]
                    .iter()
                    .map(|v| (v - c).norm())
                    .fold(0.0, f64::max);
                (c, r)
            })
            .unzip();
        Self {
            mesh,
            centroids: KdTree::build(&centroids),
            max_centroid_radius: radii.into_iter().fold(0.0, f64::max),
        }
    }

    /// Unsigned distance from `p` to the surface, `None` for a mesh without faces.
    pub fn distance(&self, p: &Point3<f64>) -> Option<f64> {
        let nearest = self.centroids.nearest(p)?;
        let mut best = self.face_distance(nearest.index, p);
        // A triangle closer than `best` has its centroid within best + radius.
        for candidate in self
            .centroids
            .within_radius(p, best + self.max_centroid_radius)
        {
            best = best.min(self.face_distance(candidate.index, p));
        }
        Some(best)
    }

    /// Generalized winding number of the surface around `p`.
    ///
    /// About 1 inside a closed outward-wound surface and 0 outside.
    pub fn winding_number(&self, p: &Point3<f64>) -> f64 {
        let total: f64 = self
            .mesh
            .faces
            .iter()
            .map(|&[a, b, c]| {
                solid_angle(
                    p,
                    &self.mesh.vertices[a as usize].position,
                    &self.mesh.vertices[b as usize].position,
                    &self.mesh.vertices[c as usize].position,
                )
            })
            .sum();
        total / (4.0 * PI)
    }

    /// Signed distance, negative inside.
    pub fn signed_distance(&self, p: &Point3<f64>) -> Option<f64> {
        let d = self.distance(p)?;
        Some(if self.winding_number(p) > 0.5 { -d } else { d })
    }

    fn face_distance(&self, face: usize, p: &Point3<f64>) -> f64 {
        let [a, b, c] = self.mesh.faces[face];
        let q = closest_point_on_triangle(
            p,
            &self.mesh.vertices[a as usize].position,
            &self.mesh.vertices[b as usize].position,
            &self.mesh.vertices[c as usize].position,
        );
        (q - p).norm()
    }
}

/// Sample the signed distance to `mesh` on a padded lattice around its bounds.
///
/// The cell size is the longest bounding-box extent divided by
/// `params.resolution`. Samples are computed in parallel.
pub fn mesh_to_sdf(mesh: &Mesh, params: &SdfParams) -> MeshResult<ScalarGrid> {
    if params.resolution == 0 {
        return Err(MeshError::invalid_parameter("resolution", 0, ">= 1"));
    }
    mesh.validate()?;
    if mesh.faces.is_empty() {
        return Err(MeshError::empty_mesh("signed distance needs at least one face"));
    }
    let _timer = OperationTimer::for_mesh("mesh_to_sdf", mesh);

    let positions = mesh.positions();
    let bounds = Aabb::from_points(&positions)
        .ok_or_else(|| MeshError::empty_mesh("signed distance needs vertices"))?;
    let longest = bounds.extent().max();
    let cell_size = if longest > 0.0 {
        longest / params.resolution as f64
    } else {
        1.0
    };

    let mut grid = ScalarGrid::covering(&bounds, cell_size, params.padding, params.max_cells)?;
    let field = DistanceField::new(mesh);
    let [nx, ny, _] = grid.dims;
    let (origin, h) = (grid.origin, grid.cell_size);

    grid.values = (0..grid.len())
        .into_par_iter()
        .map(|idx| {
            let p = origin
                + nalgebra::Vector3::new(
                    (idx % nx) as f64,
                    ((idx / nx) % ny) as f64,
                    (idx / (nx * ny)) as f64,
                ) * h;
            field.signed_distance(&p).unwrap_or(f64::INFINITY)
        })
        .collect();

    if let Some((min, max)) = grid.value_range() {
        debug!(min_sdf = min, max_sdf = max, "SDF sampled");
    }
    info!(dims = ?grid.dims, cell_size, "Signed distance field computed");
    Ok(grid)
}
