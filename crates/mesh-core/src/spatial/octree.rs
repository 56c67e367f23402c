//! Bucketed point octree and mesh voxelization.

use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use tracing::debug;

use super::{Aabb, Neighbor};
use crate::error::{MeshError, MeshResult};
use crate::math::closest_point_on_triangle;
use crate::Mesh;

/// Parameters controlling octree subdivision.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct OctreeParams {
    /// A leaf splits once it holds more than this many points. Default: 8
    pub max_points: usize,
    /// Leaves at this depth never split. Default: 10
    pub max_depth: usize,
}

impl Default for OctreeParams {
    fn default() -> Self {
        Self {
            max_points: 8,
            max_depth: 10,
        }
    }
}

#[derive(Debug, Clone)]
struct OctreeNode {
    bounds: Aabb,
    depth: usize,
    children: Option<[u32; 8]>,
    points: Vec<u32>,
}

/// A point octree over a cubic root cell.
#[derive(Debug, Clone)]
pub struct Octree {
    points: Vec<Point3<f64>>,
    nodes: Vec<OctreeNode>,
    params: OctreeParams,
}

impl Octree {
    /// Build an octree by inserting `points` in order.
    pub fn build(points: &[Point3<f64>], params: &OctreeParams) -> Self {
        let bounds = Aabb::from_points(points)
            .map(|b| {
                let cube = b.to_cube();
                cube.expanded(cube.extent().max().max(1.0) * 1e-9)
            })
            .unwrap_or_else(|| Aabb::new(Point3::origin(), Point3::origin()));

        let mut tree = Self {
            points: points.to_vec(),
            nodes: vec![OctreeNode {
                bounds,
                depth: 0,
                children: None,
                points: Vec::new(),
            }],
            params: params.clone(),
        };
        for i in 0..points.len() as u32 {
            tree.insert(i);
        }
        debug!(
            points = points.len(),
            nodes = tree.nodes.len(),
            depth = tree.depth(),
            "Built octree"
        );
        tree
    }

    fn insert(&mut self, point: u32) {
        let p = self.points[point as usize];
        let mut node_id = 0usize;
        while let Some(children) = self.nodes[node_id].children {
            node_id = children[child_slot(&self.nodes[node_id].bounds, &p)] as usize;
        }

        self.nodes[node_id].points.push(point);
        let node = &self.nodes[node_id];
        if node.points.len() > self.params.max_points && node.depth < self.params.max_depth {
            self.split(node_id);
        }
    }

    fn split(&mut self, node_id: usize) {
        let bounds = self.nodes[node_id].bounds;
        let depth = self.nodes[node_id].depth + 1;
        let first_child = self.nodes.len() as u32;
        let mut children = [0u32; 8];
        for (slot, child) in children.iter_mut().enumerate() {
            *child = first_child + slot as u32;
            self.nodes.push(OctreeNode {
                bounds: bounds.octant(slot),
                depth,
                children: None,
                points: Vec::new(),
            });
        }

        let moved = std::mem::take(&mut self.nodes[node_id].points);
        self.nodes[node_id].children = Some(children);
        for point in moved {
            let slot = child_slot(&bounds, &self.points[point as usize]);
            self.nodes[children[slot] as usize].points.push(point);
        }
        // Heavily clustered input can overflow a child immediately.
        for child in children {
            let node = &self.nodes[child as usize];
            if node.points.len() > self.params.max_points && node.depth < self.params.max_depth {
                self.split(child as usize);
            }
        }
    }

    /// Number of indexed points.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True if the tree holds no points.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Bounds of the root cell.
    #[inline]
    pub fn bounds(&self) -> Aabb {
        self.nodes[0].bounds
    }

    /// Total number of nodes (internal and leaf).
    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of leaf nodes.
    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.children.is_none()).count()
    }

    /// Deepest leaf level.
    pub fn depth(&self) -> usize {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }

    /// All points within `radius` of `center` (inclusive), nearest first.
    ///
    /// Children whose bounds do not touch the query sphere are skipped.
    pub fn radius_search(&self, center: &Point3<f64>, radius: f64) -> Vec<Neighbor> {
        let mut out = Vec::new();
        if self.points.is_empty() || radius < 0.0 || radius.is_nan() {
            return out;
        }
        let r2 = radius * radius;
        let mut stack = vec![0u32];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id as usize];
            if node.bounds.distance_squared(center) > r2 {
                continue;
            }
            match node.children {
                Some(children) => stack.extend(children),
                None => {
                    for &i in &node.points {
                        let d2 = (self.points[i as usize] - center).norm_squared();
                        if d2 <= r2 {
                            out.push(Neighbor {
                                index: i as usize,
                                distance_squared: d2,
                            });
                        }
                    }
                }
            }
        }
        out.sort_unstable_by(|a, b| {
            a.distance_squared
                .total_cmp(&b.distance_squared)
                .then(a.index.cmp(&b.index))
        });
        out
    }
}

fn child_slot(bounds: &Aabb, p: &Point3<f64>) -> usize {
    let c = bounds.center();
    (0..3).fold(0, |slot, axis| {
        if p[axis] >= c[axis] {
            slot | (1 << axis)
        } else {
            slot
        }
    })
}

/// Parameters for mesh voxelization.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct VoxelizeParams {
    /// Edge length of one voxel. Default: 1.0
    pub voxel_size: f64,
    /// Refuse grids with more cells than this. Default: 16M
    pub max_voxels: usize,
}

impl Default for VoxelizeParams {
    fn default() -> Self {
        Self {
            voxel_size: 1.0,
            max_voxels: 1 << 24,
        }
    }
}

impl VoxelizeParams {
    /// Params with the given voxel edge length.
    pub fn with_voxel_size(voxel_size: f64) -> Self {
        Self {
            voxel_size,
            ..Default::default()
        }
    }
}

/// Surface voxels of a mesh on a regular grid.
#[derive(Debug, Clone)]
pub struct VoxelGrid {
    /// Corner of cell `[0, 0, 0]`.
    pub origin: Point3<f64>,
    /// Edge length of one cell.
    pub voxel_size: f64,
    /// Number of cells per axis.
    pub dims: [usize; 3],
    /// Occupied cells in linear (x fastest) order.
    pub cells: Vec<[u32; 3]>,
}

impl VoxelGrid {
    /// Number of occupied cells.
    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// True if nothing is occupied.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Whether `cell` is occupied.
    pub fn contains(&self, cell: [u32; 3]) -> bool {
        self.cells
            .binary_search_by(|c| (c[2], c[1], c[0]).cmp(&(cell[2], cell[1], cell[0])))
            .is_ok()
    }

    /// World-space center of `cell`.
    #[inline]
    pub fn cell_center(&self, cell: [u32; 3]) -> Point3<f64> {
        self.origin
            + Vector3::new(
                cell[0] as f64 + 0.5,
                cell[1] as f64 + 0.5,
                cell[2] as f64 + 0.5,
            ) * self.voxel_size
    }

    /// Octree over the occupied cell centers; point `i` is `cells[i]`.
    pub fn to_octree(&self, params: &OctreeParams) -> Octree {
        let centers: Vec<Point3<f64>> = self.cells.iter().map(|&c| self.cell_center(c)).collect();
        Octree::build(&centers, params)
    }
}

/// Mark every grid cell touched by a mesh triangle.
///
/// Candidate cells come from each triangle's bounding box; a candidate is kept
/// when its center lies within half a cell diagonal of the triangle, which
/// is conservative: every cell the triangle passes through is kept.
pub fn voxelize_mesh(mesh: &Mesh, params: &VoxelizeParams) -> MeshResult<VoxelGrid> {
    mesh.validate()?;
    let voxel_size = params.voxel_size;
    if !(voxel_size > 0.0 && voxel_size.is_finite()) {
        return Err(MeshError::invalid_parameter(
            "voxel_size",
            voxel_size,
            "a positive finite length",
        ));
    }

    let Some((min, max)) = mesh.bounds() else {
        return Ok(VoxelGrid {
            origin: Point3::origin(),
            voxel_size,
            dims: [0, 0, 0],
            cells: Vec::new(),
        });
    };

    let extent = max - min;
    let dims = [
        (extent.x / voxel_size).floor() as usize + 1,
        (extent.y / voxel_size).floor() as usize + 1,
        (extent.z / voxel_size).floor() as usize + 1,
    ];
    let total = dims[0].saturating_mul(dims[1]).saturating_mul(dims[2]);
    if total > params.max_voxels {
        return Err(MeshError::GridTooLarge {
            dims,
            max_cells: params.max_voxels,
        });
    }

    let half_diagonal = voxel_size * 3f64.sqrt() * 0.5;
    let to_cell = |v: f64, axis: usize| -> usize {
        (((v - min[axis]) / voxel_size).floor().max(0.0) as usize).min(dims[axis] - 1)
    };

    let touched: Vec<Vec<usize>> = mesh
        .triangles()
        .collect::<Vec<_>>()
        .par_iter()
        .map(|tri| {
            let lo = tri.v0.inf(&tri.v1).inf(&tri.v2);
            let hi = tri.v0.sup(&tri.v1).sup(&tri.v2);
            let mut cells = Vec::new();
            for z in to_cell(lo.z, 2)..=to_cell(hi.z, 2) {
                for y in to_cell(lo.y, 1)..=to_cell(hi.y, 1) {
                    for x in to_cell(lo.x, 0)..=to_cell(hi.x, 0) {
                        let center = min
                            + Vector3::new(x as f64 + 0.5, y as f64 + 0.5, z as f64 + 0.5)
                                * voxel_size;
                        let q = closest_point_on_triangle(&center, &tri.v0, &tri.v1, &tri.v2);
                        if (q - center).norm() <= half_diagonal {
                            cells.push(x + y * dims[0] + z * dims[0] * dims[1]);
                        }
                    }
                }
            }
            cells
        })
        .collect();

    let mut occupied = vec![false; total];
    for idx in touched.into_iter().flatten() {
        occupied[idx] = true;
    }
    let cells: Vec<[u32; 3]> = occupied
        .iter()
        .enumerate()
        .filter(|(_, on)| **on)
        .map(|(idx, _)| {
            let x = idx % dims[0];
            let y = (idx / dims[0]) % dims[1];
            let z = idx / (dims[0] * dims[1]);
            [x as u32, y as u32, z as u32]
        })
        .collect();

    debug!(
        dims = ?dims,
        occupied = cells.len(),
        "Voxelized mesh"
    );

    Ok(VoxelGrid {
        origin: min,
        voxel_size,
        dims,
        cells,
    })
}
