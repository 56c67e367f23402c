//! Point clouds, normal estimation and surface reconstruction.
//!
//! - [`PointCloud`] stores positions with optional normals
//! - [`estimate_normals`] fits a plane to each point's k nearest neighbours
//! - [`PointCloud::reconstruct_surface`] samples a signed tangent-plane
//!   distance on a grid and extracts its zero level set with marching cubes
//!
//! # Example
//!
//! ```
//! use mesh_core::pointcloud::{PointCloud, ReconstructionParams};
//! use nalgebra::Point3;
//!
//! let positions: Vec<Point3<f64>> = (0..400)
//!     .map(|i| {
//!         let z = 1.0 - 2.0 * (i as f64 + 0.5) / 400.0;
//!         let r = (1.0 - z * z).sqrt();
//!         let phi = i as f64 * 2.399_963_229_728_653;
//!         Point3::new(r * phi.cos(), r * phi.sin(), z)
//!     })
//!     .collect();
//!
//! let cloud = PointCloud::from_positions(&positions);
//! let result = cloud
//!     .reconstruct_surface(&ReconstructionParams::with_voxel_size(0.2))
//!     .unwrap();
//! assert!(result.normals_estimated);
//! assert!(!result.mesh.faces.is_empty());
//! ```

use hashbrown::HashMap;
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{MeshError, MeshResult};
use crate::grid::{DEFAULT_MAX_CELLS, ScalarGrid};
use crate::isosurface::{IsosurfaceParams, marching_cubes};
use crate::math::fit_plane;
use crate::spatial::{Aabb, KdTree};
use crate::tracing_ext::OperationTimer;
use crate::{Mesh, Vertex};

/// A point in the cloud with an optional normal.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct CloudPoint {
    /// 3D position.
    pub position: Point3<f64>,

    /// Unit normal vector (estimated or from scanner).
    pub normal: Option<Vector3<f64>>,
}

impl CloudPoint {
    /// Create a point with only position.
    #[inline]
    pub fn new(position: Point3<f64>) -> Self {
        Self {
            position,
            normal: None,
        }
    }

    /// Create a point from raw coordinates.
    #[inline]
    pub fn from_coords(x: f64, y: f64, z: f64) -> Self {
        Self::new(Point3::new(x, y, z))
    }

    /// Create a point with position and normal.
    #[inline]
    pub fn with_normal(position: Point3<f64>, normal: Vector3<f64>) -> Self {
        Self {
            position,
            normal: Some(normal),
        }
    }

    /// Convert to a mesh vertex.
    pub fn to_vertex(&self) -> Vertex {
        Vertex {
            position: self.position,
            normal: self.normal,
        }
    }
}

/// A collection of 3D points with optional normals.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct PointCloud {
    /// The points in the cloud.
    pub points: Vec<CloudPoint>,
}

impl PointCloud {
    /// Create a new empty point cloud.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a point cloud from a list of positions.
    pub fn from_positions(positions: &[Point3<f64>]) -> Self {
        Self {
            points: positions.iter().map(|&p| CloudPoint::new(p)).collect(),
        }
    }

    /// Create a point cloud from mesh vertices, keeping their normals.
    pub fn from_mesh(mesh: &Mesh) -> Self {
        Self {
            points: mesh
                .vertices
                .iter()
                .map(|v| CloudPoint {
                    position: v.position,
                    normal: v.normal,
                })
                .collect(),
        }
    }

    /// Number of points in the cloud.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the cloud is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Check if all points have normals.
    pub fn has_normals(&self) -> bool {
        !self.points.is_empty() && self.points.iter().all(|p| p.normal.is_some())
    }

    /// Point positions in order.
    pub fn positions(&self) -> Vec<Point3<f64>> {
        self.points.iter().map(|p| p.position).collect()
    }

    /// Axis-aligned bounding box, `None` when empty.
    pub fn bounds(&self) -> Option<Aabb> {
        Aabb::from_points(self.points.iter().map(|p| &p.position))
    }

    /// Compute the centroid (center of mass) of the point cloud.
    pub fn centroid(&self) -> Option<Point3<f64>> {
        if self.points.is_empty() {
            return None;
        }
        let sum = self
            .points
            .iter()
            .fold(Vector3::zeros(), |acc, p| acc + p.position.coords);
        Some(Point3::from(sum / self.points.len() as f64))
    }

    /// Add a point to the cloud.
    #[inline]
    pub fn push(&mut self, point: CloudPoint) {
        self.points.push(point);
    }

    /// Check that every coordinate and normal component is finite.
    pub fn validate(&self) -> MeshResult<()> {
        for (i, p) in self.points.iter().enumerate() {
            for (axis, value) in ["x", "y", "z"].into_iter().zip(p.position.iter()) {
                if !value.is_finite() {
                    return Err(MeshError::invalid_coordinate(i, axis, *value));
                }
            }
            if let Some(n) = p.normal {
                if !n.iter().all(|c| c.is_finite()) {
                    return Err(MeshError::invalid_coordinate(i, "normal", n.norm()));
                }
            }
        }
        Ok(())
    }

    /// Estimate normals for all points using PCA on local neighborhoods.
    ///
    /// Normal signs are arbitrary; see [`PointCloud::orient_normals_outward`].
    pub fn with_estimated_normals(&self, k: usize) -> MeshResult<Self> {
        if k < 3 {
            return Err(MeshError::invalid_parameter("k", k, ">= 3"));
        }
        self.validate()?;
        if self.is_empty() {
            return Ok(self.clone());
        }
        debug!(k, points = self.len(), "Estimating normals");

        let normals = estimate_normals(&self.positions(), k);
        let mut result = self.clone();
        for (point, normal) in result.points.iter_mut().zip(normals) {
            point.normal = Some(normal);
        }
        Ok(result)
    }

    /// Flip normals that point toward the centroid.
    ///
    /// Only meaningful for clouds sampled from the outside of a roughly
    /// star-shaped object.
    pub fn orient_normals_outward(&mut self) {
        let Some(centroid) = self.centroid() else {
            return;
        };
        for point in &mut self.points {
            if let Some(normal) = point.normal.as_mut() {
                if normal.dot(&(point.position - centroid)) < 0.0 {
                    *normal = -*normal;
                }
            }
        }
    }

    /// Average the points falling in each cubic voxel of side `voxel_size`.
    ///
    /// Output order follows the first point seen in each voxel. Averaged
    /// normals are renormalized and dropped where they cancel out.
    pub fn downsample(&self, voxel_size: f64) -> MeshResult<Self> {
        if !(voxel_size > 0.0 && voxel_size.is_finite()) {
            return Err(MeshError::invalid_parameter(
                "voxel_size",
                voxel_size,
                "finite and > 0",
            ));
        }
        self.validate()?;

        let mut slots: HashMap<[i64; 3], usize> = HashMap::new();
        let mut sums: Vec<(Vector3<f64>, Vector3<f64>, usize, bool)> = Vec::new();
        for p in &self.points {
            let key = p.position.coords.map(|c| (c / voxel_size).floor() as i64);
            let slot = *slots.entry([key.x, key.y, key.z]).or_insert_with(|| {
                sums.push((Vector3::zeros(), Vector3::zeros(), 0, true));
                sums.len() - 1
            });
            let entry = &mut sums[slot];
            entry.0 += p.position.coords;
            match p.normal {
                Some(n) => entry.1 += n,
                None => entry.3 = false,
            }
            entry.2 += 1;
        }

        let points = sums
            .into_iter()
            .map(|(pos, normal, count, all_normals)| CloudPoint {
                position: Point3::from(pos / count as f64),
                normal: if all_normals {
                    normal.try_normalize(1e-12)
                } else {
                    None
                },
            })
            .collect::<Vec<_>>();
        debug!(before = self.len(), after = points.len(), "Voxel downsampling");
        Ok(Self { points })
    }

    /// Translate every point.
    pub fn translate(&mut self, offset: Vector3<f64>) {
        for p in &mut self.points {
            p.position += offset;
        }
    }

    /// Mean distance from each point to its nearest neighbour.
    pub fn mean_spacing(&self) -> Option<f64> {
        if self.len() < 2 {
            return None;
        }
        let positions = self.positions();
        let tree = KdTree::build(&positions);
        let total: f64 = positions
            .par_iter()
            .map(|p| {
                tree.k_nearest(p, 2)
                    .get(1)
                    .map_or(0.0, |n| n.distance())
            })
            .sum();
        Some(total / positions.len() as f64)
    }

    /// Reconstruct a closed triangle mesh from the cloud.
    ///
    /// Normals are estimated and oriented outward when missing and
    /// `params.auto_estimate_normals` is set.
    pub fn reconstruct_surface(
        &self,
        params: &ReconstructionParams,
    ) -> MeshResult<ReconstructionResult> {
        reconstruct_surface(self, params)
    }
}

/// Unit normals of the planes fitted to each point's `k` nearest neighbours.
///
/// Points whose neighbourhood is degenerate get +Z. Signs are arbitrary.
pub fn estimate_normals(points: &[Point3<f64>], k: usize) -> Vec<Vector3<f64>> {
    let tree = KdTree::build(points);
    points
        .par_iter()
        .map(|p| {
            let neighbourhood: Vec<Point3<f64>> = tree
                .k_nearest(p, k)
                .iter()
                .map(|n| points[n.index])
                .collect();
            fit_plane(&neighbourhood).map_or_else(Vector3::z, |plane| plane.normal)
        })
        .collect()
}

/// Parameters for [`reconstruct_surface`].
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
#[cfg_attr(feature = "pipeline-config", serde(default))]
pub struct ReconstructionParams {
    /// Grid spacing. If None, the mean point spacing is used.
    pub voxel_size: Option<f64>,

    /// Extra grid cells around the cloud's bounds.
    pub padding: usize,

    /// Estimate normals when the cloud has none.
    pub auto_estimate_normals: bool,

    /// Neighbours used for normal estimation.
    pub normal_neighbors: usize,

    /// Maximum number of grid samples.
    pub max_cells: usize,
}

impl Default for ReconstructionParams {
    fn default() -> Self {
        Self {
            voxel_size: None,
            padding: 3,
            auto_estimate_normals: true,
            normal_neighbors: 16,
            max_cells: DEFAULT_MAX_CELLS,
        }
    }
}

impl ReconstructionParams {
    /// Default parameters with a fixed grid spacing.
    pub fn with_voxel_size(voxel_size: f64) -> Self {
        Self {
            voxel_size: Some(voxel_size),
            ..Default::default()
        }
    }
}

/// Result of surface reconstruction.
#[derive(Debug, Clone)]
pub struct ReconstructionResult {
    /// The reconstructed mesh.
    pub mesh: Mesh,

    /// Grid spacing that was used.
    pub voxel_size: f64,

    /// Grid samples along each axis.
    pub grid_dims: [usize; 3],

    /// Whether normals had to be estimated.
    pub normals_estimated: bool,
}

/// Reconstruct a surface from an oriented point cloud.
///
/// Each grid sample takes the signed distance to the tangent plane of its
/// nearest cloud point; the zero level set is extracted with marching cubes.
pub fn reconstruct_surface(
    cloud: &PointCloud,
    params: &ReconstructionParams,
) -> MeshResult<ReconstructionResult> {
    cloud.validate()?;
    if cloud.len() < 4 {
        return Err(MeshError::empty_mesh(format!(
            "surface reconstruction needs at least 4 points, got {}",
            cloud.len()
        )));
    }
    let _timer = OperationTimer::new("reconstruct_surface");

    let mut cloud = cloud.clone();
    let normals_estimated = !cloud.has_normals();
    if normals_estimated {
        if !params.auto_estimate_normals {
            return Err(MeshError::NormalsRequired {
                details: "surface reconstruction needs oriented normals".to_string(),
            });
        }
        cloud = cloud.with_estimated_normals(params.normal_neighbors)?;
        cloud.orient_normals_outward();
    }

    let voxel_size = match params.voxel_size {
        Some(v) if v > 0.0 && v.is_finite() => v,
        Some(v) => {
            return Err(MeshError::invalid_parameter(
                "voxel_size",
                v,
                "finite and > 0",
            ));
        }
        None => cloud.mean_spacing().filter(|s| *s > 0.0).ok_or_else(|| {
            MeshError::invalid_parameter("voxel_size", 0.0, "points must not coincide")
        })?,
    };

    let bounds = cloud
        .bounds()
        .ok_or_else(|| MeshError::empty_mesh("point cloud has no bounds"))?;
    let mut grid = ScalarGrid::covering(&bounds, voxel_size, params.padding, params.max_cells)?;

    let positions = cloud.positions();
    let normals: Vec<Vector3<f64>> = cloud
        .points
        .iter()
        .map(|p| p.normal.unwrap_or_else(Vector3::z))
        .collect();
    let tree = KdTree::build(&positions);
    let [nx, ny, _] = grid.dims;
    let origin = grid.origin;

    grid.values = (0..grid.len())
        .into_par_iter()
        .map(|idx| {
            let p = origin
                + Vector3::new(
                    (idx % nx) as f64,
                    ((idx / nx) % ny) as f64,
                    (idx / (nx * ny)) as f64,
                ) * voxel_size;
            tree.nearest(&p).map_or(f64::INFINITY, |hit| {
                (p - positions[hit.index]).dot(&normals[hit.index])
            })
        })
        .collect();

    let iso = marching_cubes(&grid, &IsosurfaceParams::default())?;
    info!(
        points = cloud.len(),
        voxel_size,
        faces = iso.mesh.face_count(),
        "Surface reconstructed"
    );

    Ok(ReconstructionResult {
        mesh: iso.mesh,
        voxel_size,
        grid_dims: grid.dims,
        normals_estimated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn fibonacci_sphere(n: usize, radius: f64) -> Vec<Point3<f64>> {
        let golden = std::f64::consts::PI * (3.0 - 5f64.sqrt());
        (0..n)
            .map(|i| {
                let z = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
                let r = (1.0 - z * z).sqrt();
                let phi = golden * i as f64;
                Point3::new(r * phi.cos(), r * phi.sin(), z) * radius
            })
            .collect()
    }

    #[test]
    fn test_planar_normals() {
        let mut positions = Vec::new();
        for j in 0..10 {
            for i in 0..10 {
                positions.push(Point3::new(i as f64, j as f64, 2.0));
            }
        }
        for n in estimate_normals(&positions, 8) {
            assert_relative_eq!(n.z.abs(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_orient_outward_on_sphere() {
        let cloud = PointCloud::from_positions(&fibonacci_sphere(500, 1.0));
        let mut cloud = cloud.with_estimated_normals(10).unwrap();
        cloud.orient_normals_outward();
        assert!(cloud.has_normals());
        for p in &cloud.points {
            let n = p.normal.unwrap();
            assert!(n.dot(&p.position.coords) > 0.9);
        }
    }

    #[test]
    fn test_reconstruct_sphere() {
        let cloud = PointCloud::from_positions(&fibonacci_sphere(3000, 1.0));
        let result = cloud
            .reconstruct_surface(&ReconstructionParams::with_voxel_size(0.1))
            .unwrap();
        assert!(result.normals_estimated);
        assert!(result.mesh.signed_volume() > 0.0);
        let exact = 4.0 / 3.0 * std::f64::consts::PI;
        assert_relative_eq!(result.mesh.volume(), exact, max_relative = 0.05);
    }

    #[test]
    fn test_downsample_merges_voxels() {
        let cloud = PointCloud::from_positions(&[
            Point3::new(0.1, 0.1, 0.1),
            Point3::new(0.3, 0.3, 0.3),
            Point3::new(1.5, 0.1, 0.1),
        ]);
        let down = cloud.downsample(1.0).unwrap();
        assert_eq!(down.len(), 2);
        assert_relative_eq!(down.points[0].position, Point3::new(0.2, 0.2, 0.2), epsilon = 1e-12);
        assert!(cloud.downsample(0.0).is_err());
    }

    #[test]
    fn test_reconstruct_rejects_bad_input() {
        let tiny = PointCloud::from_positions(&[Point3::origin(); 2]);
        assert!(tiny.reconstruct_surface(&ReconstructionParams::default()).is_err());

        let cloud = PointCloud::from_positions(&fibonacci_sphere(50, 1.0));
        let params = ReconstructionParams {
            auto_estimate_normals: false,
            ..Default::default()
        };
        assert!(matches!(
            cloud.reconstruct_surface(&params),
            Err(MeshError::NormalsRequired { .. })
        ));
    }

    #[test]
    fn test_mesh_round_trip_keeps_normals() {
        let mut mesh = Mesh::new();
        mesh.vertices.push(Vertex {
            position: Point3::new(1.0, 2.0, 3.0),
            normal: Some(Vector3::x()),
        });
        let cloud = PointCloud::from_mesh(&mesh);
        assert_eq!(cloud.points[0].to_vertex(), mesh.vertices[0]);
        assert_eq!(cloud.centroid(), Some(Point3::new(1.0, 2.0, 3.0)));
    }
}
