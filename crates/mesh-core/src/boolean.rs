//! Mesh boolean operations.
//!
//! Constructive solid geometry on closed, outward-wound triangle meshes using
//! BSP trees (see [`crate::bsp`]).
//!
//! # Operations
//!
//! - **Union**: A ∪ B
//! - **Difference**: A − B
//! - **Intersection**: A ∩ B
//!
//! Inputs without faces are treated as the empty solid, so `difference(A, A)`
//! can be fed back into further operations. Coincident same-facing faces are
//! kept once by both union and intersection, so `union(A, A)` and
//! `intersection(A, A)` both return `A`. Coincident opposite-facing faces
//! cancel.
//!
//! # Example
//!
//! ```
//! use mesh_core::{BooleanOp, BooleanParams, Mesh, boolean_operation};
//!
//! let a = Mesh::new();
//! let b = Mesh::new();
//! let result = boolean_operation(&a, &b, BooleanOp::Union, &BooleanParams::default()).unwrap();
//! assert!(result.mesh.is_empty());
//! ```

use hashbrown::HashMap;
use nalgebra::Point3;
use tracing::{debug, info};

use crate::bsp::{BspTree, CSG_EPSILON, Polygon};
use crate::error::{MeshError, MeshResult};
use crate::math::{EPSILON, triangle_area};
use crate::repair::exact_key;
use crate::spatial::Aabb;
use crate::tracing_ext::OperationTimer;
use crate::{Mesh, Vertex};

/// Boolean operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
#[cfg_attr(feature = "pipeline-config", serde(rename_all = "snake_case"))]
pub enum BooleanOp {
    /// Union: A ∪ B (combines both meshes).
    Union,

    /// Difference: A - B (subtracts B from A).
    Difference,

    /// Intersection: A ∩ B (keeps only overlapping region).
    Intersection,
}

impl std::fmt::Display for BooleanOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BooleanOp::Union => "union",
            BooleanOp::Difference => "difference",
            BooleanOp::Intersection => "intersection",
        })
    }
}

/// Parameters for boolean operations.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
#[cfg_attr(feature = "pipeline-config", serde(default))]
pub struct BooleanParams {
    /// Plane thickness used to classify points as on-plane.
    pub epsilon: f64,

    /// Weld distance for output vertices, relative to the combined bounding-box size.
    pub weld_tolerance: f64,
}

impl Default for BooleanParams {
    fn default() -> Self {
        Self {
            epsilon: CSG_EPSILON,
            weld_tolerance: 1e-9,
        }
    }
}

impl BooleanParams {
    /// Create params with a thicker plane for noisy meshes.
    pub fn for_scans() -> Self {
        Self {
            epsilon: 1e-5,
            ..Default::default()
        }
    }

    /// Create params for precise CAD operations.
    pub fn for_cad() -> Self {
        Self {
            epsilon: 1e-8,
            ..Default::default()
        }
    }

    fn validate(&self) -> MeshResult<()> {
        if !(self.epsilon > 0.0 && self.epsilon.is_finite()) {
            return Err(MeshError::invalid_parameter("epsilon", self.epsilon, "finite and > 0"));
        }
        if !(self.weld_tolerance >= 0.0 && self.weld_tolerance.is_finite()) {
            return Err(MeshError::invalid_parameter(
                "weld_tolerance",
                self.weld_tolerance,
                "finite and >= 0",
            ));
        }
        Ok(())
    }
}

/// Result of a boolean operation.
#[derive(Debug, Clone)]
pub struct BooleanResult {
    /// Resulting mesh.
    pub mesh: Mesh,

    /// Statistics about the operation.
    pub stats: BooleanStats,
}

/// Statistics from boolean operation.
#[derive(Debug, Clone, Default)]
pub struct BooleanStats {
    /// Output triangles originating from mesh A.
    pub faces_from_a: usize,

    /// Output triangles originating from mesh B.
    pub faces_from_b: usize,

    /// Polygons surviving clipping (before triangulation).
    pub polygons_out: usize,

    /// Nodes in the two BSP trees after the operation.
    pub bsp_nodes: usize,

    /// True when the bounding boxes were disjoint and no clipping ran.
    pub disjoint: bool,
}

const TAG_A: u32 = 0;
const TAG_B: u32 = 1;

/// Perform a boolean operation between two solids.
pub fn boolean_operation(
    mesh_a: &Mesh,
    mesh_b: &Mesh,
    operation: BooleanOp,
    params: &BooleanParams,
) -> MeshResult<BooleanResult> {
    params.validate()?;
    mesh_a.validate()?;
    mesh_b.validate()?;
    let _timer = OperationTimer::with_context(
        "boolean_operation",
        mesh_a.face_count() + mesh_b.face_count(),
        mesh_a.vertex_count() + mesh_b.vertex_count(),
    );

    let bbox_a = face_bounds(mesh_a);
    let bbox_b = face_bounds(mesh_b);
    let scale = match (bbox_a, bbox_b) {
        (Some(a), Some(b)) => a.extent().max().max(b.extent().max()),
        (Some(a), None) => a.extent().max(),
        (None, Some(b)) => b.extent().max(),
        (None, None) => 0.0,
    };
    let weld = params.weld_tolerance * scale.max(f64::MIN_POSITIVE);

    let overlapping = matches!((bbox_a, bbox_b), (Some(a), Some(b)) if a.intersects(&b));
    if !overlapping {
        debug!(%operation, "Bounding boxes disjoint, skipping clipping");
        let polygons = match operation {
            BooleanOp::Union => {
                let mut p = to_polygons(mesh_a, TAG_A);
                p.extend(to_polygons(mesh_b, TAG_B));
                p
            }
            BooleanOp::Difference => to_polygons(mesh_a, TAG_A),
            BooleanOp::Intersection => Vec::new(),
        };
        let (mesh, mut stats) = polygons_to_mesh(&polygons, weld, scale);
        stats.disjoint = true;
        return Ok(BooleanResult { mesh, stats });
    }

    let mut a = BspTree::build(to_polygons(mesh_a, TAG_A), params.epsilon);
    let mut b = BspTree::build(to_polygons(mesh_b, TAG_B), params.epsilon);

    match operation {
        BooleanOp::Union => {
            a.clip_to(&b);
            b.clip_to(&a);
            b.invert();
            b.clip_to(&a);
            b.invert();
            a.insert(b.all_polygons());
        }
        BooleanOp::Difference => {
            a.invert();
            a.clip_to(&b);
            b.clip_to(&a);
            b.invert();
            b.clip_to(&a);
            b.invert();
            a.insert(b.all_polygons());
            a.invert();
        }
        BooleanOp::Intersection => {
            a.invert();
            b.clip_to(&a);
            b.invert();
            a.clip_to(&b);
            b.clip_to(&a);
            a.insert(b.all_polygons());
            a.invert();
        }
    }

    let polygons = a.all_polygons();
    let (mesh, mut stats) = polygons_to_mesh(&polygons, weld, scale);
    stats.bsp_nodes = a.node_count() + b.node_count();

    info!(
        %operation,
        faces = mesh.face_count(),
        from_a = stats.faces_from_a,
        from_b = stats.faces_from_b,
        bsp_nodes = stats.bsp_nodes,
        "Boolean operation complete"
    );
    Ok(BooleanResult { mesh, stats })
}

/// A ∪ B with default parameters.
pub fn union(a: &Mesh, b: &Mesh) -> MeshResult<Mesh> {
    Ok(boolean_operation(a, b, BooleanOp::Union, &BooleanParams::default())?.mesh)
}

/// A ∩ B with default parameters.
pub fn intersection(a: &Mesh, b: &Mesh) -> MeshResult<Mesh> {
    Ok(boolean_operation(a, b, BooleanOp::Intersection, &BooleanParams::default())?.mesh)
}

/// A − B with default parameters.
pub fn difference(a: &Mesh, b: &Mesh) -> MeshResult<Mesh> {
    Ok(boolean_operation(a, b, BooleanOp::Difference, &BooleanParams::default())?.mesh)
}

/// Bounds of the vertices referenced by faces, `None` without faces.
fn face_bounds(mesh: &Mesh) -> Option<Aabb> {
    if mesh.faces.is_empty() {
        return None;
    }
    Aabb::from_points(
        mesh.faces
            .iter()
            .flatten()
            .map(|&v| &mesh.vertices[v as usize].position),
    )
}

fn to_polygons(mesh: &Mesh, tag: u32) -> Vec<Polygon> {
    mesh.faces
        .iter()
        .filter_map(|&[a, b, c]| {
            Polygon::new(
                vec![
                    mesh.vertices[a as usize].position,
                    mesh.vertices[b as usize].position,
                    mesh.vertices[c as usize].position,
                ],
                tag,
            )
        })
        .collect()
}

/// Weld polygon corners and fan-triangulate.
fn polygons_to_mesh(polygons: &[Polygon], tolerance: f64, scale: f64) -> (Mesh, BooleanStats) {
    let mut mesh = Mesh::new();
    let mut stats = BooleanStats {
        polygons_out: polygons.len(),
        ..Default::default()
    };
    let mut welder = Welder::new(tolerance);
    let min_area = EPSILON * scale * scale;

    for polygon in polygons {
        let ids: Vec<u32> = polygon
            .vertices
            .iter()
            .map(|p| welder.index(&mut mesh, p))
            .collect();
        for i in 1..ids.len().saturating_sub(1) {
            let face = [ids[0], ids[i], ids[i + 1]];
            if face[0] == face[1] || face[1] == face[2] || face[0] == face[2] {
                continue;
            }
            let [a, b, c] = face.map(|v| &mesh.vertices[v as usize].position);
            if triangle_area(a, b, c) <= min_area {
                continue;
            }
            mesh.faces.push(face);
            if polygon.tag == TAG_A {
                stats.faces_from_a += 1;
            } else {
                stats.faces_from_b += 1;
            }
        }
    }

    // Corners only used by dropped slivers.
    crate::repair::remove_unreferenced_vertices(&mut mesh);
    (mesh, stats)
}

/// Merges points closer than `tolerance`, bucketing by cell. A tolerance of
/// zero merges bit-identical positions only.
struct Welder {
    tolerance: f64,
    cells: HashMap<[i64; 3], Vec<u32>>,
    exact: HashMap<[u64; 3], u32>,
}

impl Welder {
    fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            cells: HashMap::new(),
            exact: HashMap::new(),
        }
    }

    fn cell(&self, p: &Point3<f64>) -> [i64; 3] {
        [0, 1, 2].map(|i| (p[i] / self.tolerance).floor() as i64)
    }

    fn index(&mut self, mesh: &mut Mesh, p: &Point3<f64>) -> u32 {
        if self.tolerance == 0.0 {
            let next = mesh.vertices.len() as u32;
            let id = *self.exact.entry(exact_key(p)).or_insert(next);
            if id == next {
                mesh.vertices.push(Vertex::new(*p));
            }
            return id;
        }

        let [cx, cy, cz] = self.cell(p);
        let tol2 = self.tolerance * self.tolerance;
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    // Tiny tolerances saturate the cell index.
                    let key = [cx.saturating_add(dx), cy.saturating_add(dy), cz.saturating_add(dz)];
                    if let Some(bucket) = self.cells.get(&key) {
                        for &v in bucket {
                            if (mesh.vertices[v as usize].position - p).norm_squared() <= tol2 {
                                return v;
                            }
                        }
                    }
                }
            }
        }
        let id = mesh.vertices.len() as u32;
        mesh.vertices.push(Vertex::new(*p));
        self.cells.entry([cx, cy, cz]).or_default().push(id);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn cube(min: Point3<f64>, size: f64) -> Mesh {
        let corners = [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 0.0, 1.0],
            [1.0, 1.0, 1.0],
            [0.0, 1.0, 1.0],
        ]
        .map(|[x, y, z]| min + Vector3::new(x, y, z) * size);
        Mesh::from_parts(
            corners,
            vec![
                [0, 2, 1],
                [0, 3, 2],
                [4, 5, 6],
                [4, 6, 7],
                [0, 1, 5],
                [0, 5, 4],
                [2, 3, 7],
                [2, 7, 6],
                [0, 4, 7],
                [0, 7, 3],
                [1, 2, 6],
                [1, 6, 5],
            ],
        )
    }

    fn unit() -> Mesh {
        cube(Point3::origin(), 1.0)
    }

    fn shifted() -> Mesh {
        cube(Point3::new(0.5, 0.5, 0.5), 1.0)
    }

    #[test]
    fn test_overlapping_cube_volumes() {
        let u = union(&unit(), &shifted()).unwrap();
        let i = intersection(&unit(), &shifted()).unwrap();
        let d = difference(&unit(), &shifted()).unwrap();
        assert_relative_eq!(u.signed_volume(), 1.875, epsilon = 1e-9);
        assert_relative_eq!(i.signed_volume(), 0.125, epsilon = 1e-9);
        assert_relative_eq!(d.signed_volume(), 0.875, epsilon = 1e-9);
    }

    #[test]
    fn test_union_with_self_is_identity() {
        let a = unit();
        let u = union(&a, &a).unwrap();
        assert_relative_eq!(u.signed_volume(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(u.surface_area(), 6.0, epsilon = 1e-9);
        assert_eq!(u.vertex_count(), 8);
    }

    #[test]
    fn test_intersection_with_self_is_identity() {
        let a = unit();
        let i = intersection(&a, &a).unwrap();
        assert_eq!(i.face_count(), 12);
        assert_eq!(i.vertex_count(), 8);
        assert_relative_eq!(i.signed_volume(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(i.surface_area(), 6.0, epsilon = 1e-9);
    }

    #[test]
    fn test_difference_with_self_is_empty() {
        let a = unit();
        let d = difference(&a, &a).unwrap();
        assert!(d.faces.is_empty());
        assert!(d.vertices.is_empty());
    }

    #[test]
    fn test_face_sharing_cubes_union() {
        let a = unit();
        let b = cube(Point3::new(1.0, 0.0, 0.0), 1.0);
        let u = union(&a, &b).unwrap();
        assert_relative_eq!(u.signed_volume(), 2.0, epsilon = 1e-9);
        // The shared wall is interior and removed.
        assert_relative_eq!(u.surface_area(), 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_disjoint_shortcuts() {
        let a = unit();
        let far = cube(Point3::new(5.0, 5.0, 5.0), 1.0);
        let params = BooleanParams::default();
        let u = boolean_operation(&a, &far, BooleanOp::Union, &params).unwrap();
        assert!(u.stats.disjoint);
        assert_relative_eq!(u.mesh.signed_volume(), 2.0, epsilon = 1e-12);
        assert_eq!((u.stats.faces_from_a, u.stats.faces_from_b), (12, 12));

        let i = boolean_operation(&a, &far, BooleanOp::Intersection, &params).unwrap();
        assert!(i.mesh.is_empty());
        let d = boolean_operation(&a, &far, BooleanOp::Difference, &params).unwrap();
        assert_relative_eq!(d.mesh.signed_volume(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_empty_operand_is_empty_solid() {
        let a = unit();
        let empty = Mesh::new();
        assert_relative_eq!(union(&a, &empty).unwrap().signed_volume(), 1.0, epsilon = 1e-12);
        assert!(intersection(&a, &empty).unwrap().is_empty());
        assert!(difference(&empty, &a).unwrap().is_empty());
    }

    #[test]
    fn test_contained_cube_difference_leaves_cavity() {
        let outer = cube(Point3::origin(), 3.0);
        let inner = cube(Point3::new(1.0, 1.0, 1.0), 1.0);
        let d = difference(&outer, &inner).unwrap();
        assert_relative_eq!(d.signed_volume(), 26.0, epsilon = 1e-9);
        assert_relative_eq!(d.surface_area(), 54.0 + 6.0, epsilon = 1e-9);
    }

    #[test]
    fn test_zero_weld_tolerance_welds_exact_positions() {
        let params = BooleanParams {
            weld_tolerance: 0.0,
            ..Default::default()
        };
        let u = boolean_operation(&unit(), &shifted(), BooleanOp::Union, &params).unwrap();
        assert_relative_eq!(u.mesh.signed_volume(), 1.875, epsilon = 1e-9);

        let mut mesh = Mesh::new();
        let mut welder = Welder::new(0.0);
        let a = welder.index(&mut mesh, &Point3::new(1.0, 2.0, 3.0));
        let b = welder.index(&mut mesh, &Point3::new(1.0, 2.0, 3.0));
        let c = welder.index(&mut mesh, &Point3::new(1.0, 2.0, 3.0 + 1e-12));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(mesh.vertex_count(), 2);
    }

    #[test]
    fn test_tiny_weld_tolerance_does_not_overflow() {
        let mut mesh = Mesh::new();
        let mut welder = Welder::new(1e-310);
        let a = welder.index(&mut mesh, &Point3::new(1.0, -1.0, 0.5));
        let b = welder.index(&mut mesh, &Point3::new(1.0, -1.0, 0.5));
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_bad_params() {
        let params = BooleanParams {
            epsilon: 0.0,
            ..Default::default()
        };
        assert!(boolean_operation(&unit(), &unit(), BooleanOp::Union, &params).is_err());
    }
}
