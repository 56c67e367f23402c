//! Mesh decimation using edge collapse with quadric error metrics.
//!
//! Each vertex carries the sum of the squared-distance quadrics of its incident
//! face planes. Edges are collapsed cheapest first from a min-heap; entries
//! carry per-vertex version stamps so that costs invalidated by an earlier
//! collapse are skipped when popped.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use nalgebra::{Matrix3, Matrix4, Point3, Vector3, Vector4};
use tracing::{debug, info};

use crate::adjacency::MeshAdjacency;
use crate::error::{MeshError, MeshResult};
use crate::math::{Plane, solve3, triangle_normal};
use crate::tracing_ext::OperationTimer;
use crate::{Mesh, Vertex};

/// Parameters for mesh decimation.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
#[cfg_attr(feature = "pipeline-config", serde(default))]
pub struct DecimateParams {
    /// Target number of triangles. If None, uses target_ratio instead.
    pub target_triangles: Option<usize>,

    /// Target ratio of triangles to keep (0.0 to 1.0). Default: 0.5
    pub target_ratio: f64,

    /// Never collapse boundary edges or move boundary vertices. Default: true
    pub preserve_boundary: bool,

    /// Maximum quadric error for a single collapse. If None, no limit.
    pub max_error: Option<f64>,

    /// Cost multiplier for boundary edges when `preserve_boundary` is false.
    pub boundary_penalty: f64,
}

impl Default for DecimateParams {
    fn default() -> Self {
        Self {
            target_triangles: None,
            target_ratio: 0.5,
            preserve_boundary: true,
            max_error: None,
            boundary_penalty: 10.0,
        }
    }
}

impl DecimateParams {
    /// Create params targeting a specific triangle count.
    pub fn with_target_triangles(count: usize) -> Self {
        Self {
            target_triangles: Some(count),
            ..Default::default()
        }
    }

    /// Create params targeting a ratio of original triangles.
    pub fn with_target_ratio(ratio: f64) -> Self {
        Self {
            target_ratio: ratio,
            ..Default::default()
        }
    }

    /// Create aggressive decimation params (more simplification).
    pub fn aggressive() -> Self {
        Self {
            target_ratio: 0.25,
            preserve_boundary: false,
            boundary_penalty: 1.0,
            ..Default::default()
        }
    }

    /// Create conservative decimation params (preserve more detail).
    pub fn conservative() -> Self {
        Self {
            target_ratio: 0.75,
            ..Default::default()
        }
    }

    fn validate(&self) -> MeshResult<()> {
        if !(0.0..=1.0).contains(&self.target_ratio) {
            return Err(MeshError::invalid_parameter(
                "target_ratio",
                self.target_ratio,
                "in [0, 1]",
            ));
        }
        if let Some(e) = self.max_error {
            if !(e >= 0.0) {
                return Err(MeshError::invalid_parameter("max_error", e, ">= 0"));
            }
        }
        if !(self.boundary_penalty >= 1.0) {
            return Err(MeshError::invalid_parameter(
                "boundary_penalty",
                self.boundary_penalty,
                ">= 1",
            ));
        }
        Ok(())
    }

    fn target_for(&self, faces: usize) -> usize {
        self.target_triangles
            .unwrap_or_else(|| ((faces as f64) * self.target_ratio).ceil() as usize)
    }
}

/// Result of mesh decimation.
#[derive(Debug, Clone)]
pub struct DecimateResult {
    /// The decimated mesh.
    pub mesh: Mesh,
    /// Number of triangles in original mesh.
    pub original_triangles: usize,
    /// Number of triangles in decimated mesh.
    pub final_triangles: usize,
    /// Number of edge collapses performed.
    pub collapses_performed: usize,
    /// Number of edge collapses rejected (link condition, flips, boundary).
    pub collapses_rejected: usize,
}

/// Squared-distance quadric `Σ p pᵀ` over planes `p = (a, b, c, d)`.
#[derive(Debug, Clone, Copy)]
struct Quadric(Matrix4<f64>);

impl Quadric {
    fn zero() -> Self {
        Self(Matrix4::zeros())
    }

    fn from_plane(plane: &Plane) -> Self {
        let p = Vector4::from(plane.coefficients());
        Self(p * p.transpose())
    }

    fn add(&mut self, other: &Quadric) {
        self.0 += other.0;
    }

    fn sum(&self, other: &Quadric) -> Quadric {
        Quadric(self.0 + other.0)
    }

    /// `[p, 1]ᵀ Q [p, 1]`, clamped at zero against round-off.
    fn evaluate(&self, p: &Point3<f64>) -> f64 {
        let v = Vector4::new(p.x, p.y, p.z, 1.0);
        v.dot(&(self.0 * v)).max(0.0)
    }

    /// Minimizer of the quadric, `None` when the 3×3 block is singular.
    fn optimal_point(&self) -> Option<Point3<f64>> {
        let a: Matrix3<f64> = self.0.fixed_view::<3, 3>(0, 0).into_owned();
        let b = -Vector3::new(self.0[(0, 3)], self.0[(1, 3)], self.0[(2, 3)]);
        solve3(&a, &b).map(Point3::from)
    }
}

/// An edge collapse candidate in the priority queue.
#[derive(Debug, Clone)]
struct EdgeCollapse {
    v1: u32,
    v2: u32,
    stamp1: u32,
    stamp2: u32,
    cost: f64,
    target: Point3<f64>,
}

impl PartialEq for EdgeCollapse {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EdgeCollapse {}

impl PartialOrd for EdgeCollapse {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EdgeCollapse {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so BinaryHeap pops the cheapest; ties by vertex ids for determinism.
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| (other.v1, other.v2).cmp(&(self.v1, self.v2)))
    }
}

/// Mutable mesh state during decimation.
struct Working {
    positions: Vec<Point3<f64>>,
    vertex_alive: Vec<bool>,
    stamps: Vec<u32>,
    boundary: Vec<bool>,
    quadrics: Vec<Quadric>,
    faces: Vec<[u32; 3]>,
    face_alive: Vec<bool>,
    vertex_faces: Vec<Vec<u32>>,
}

impl Working {
    fn new(mesh: &Mesh, adj: &MeshAdjacency) -> Self {
        let n = mesh.vertices.len();
        let positions = mesh.positions();
        let mut quadrics = vec![Quadric::zero(); n];
        let mut vertex_faces = vec![Vec::new(); n];
        for (f, &[a, b, c]) in mesh.faces.iter().enumerate() {
            if let Some(plane) = Plane::from_points(
                &positions[a as usize],
                &positions[b as usize],
                &positions[c as usize],
            ) {
                let q = Quadric::from_plane(&plane);
                for v in [a, b, c] {
                    quadrics[v as usize].add(&q);
                }
            }
            for v in [a, b, c] {
                vertex_faces[v as usize].push(f as u32);
            }
        }
        Self {
            positions,
            vertex_alive: vec![true; n],
            stamps: vec![0; n],
            boundary: adj.boundary_vertices(),
            quadrics,
            faces: mesh.faces.clone(),
            face_alive: vec![true; mesh.faces.len()],
            vertex_faces,
        }
    }

    fn neighbors(&self, v: u32) -> Vec<u32> {
        let mut out: Vec<u32> = self.vertex_faces[v as usize]
            .iter()
            .flat_map(|&f| self.faces[f as usize])
            .filter(|&w| w != v)
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Live faces containing both `a` and `b`.
    fn shared_faces(&self, a: u32, b: u32) -> Vec<u32> {
        self.vertex_faces[a as usize]
            .iter()
            .copied()
            .filter(|&f| self.faces[f as usize].contains(&b))
            .collect()
    }

    fn candidate(&self, a: u32, b: u32, params: &DecimateParams) -> Option<EdgeCollapse> {
        let shared = self.shared_faces(a, b);
        let is_boundary_edge = shared.len() == 1;
        if params.preserve_boundary && is_boundary_edge {
            return None;
        }
        let (ba, bb) = (self.boundary[a as usize], self.boundary[b as usize]);
        if params.preserve_boundary && ba && bb {
            return None;
        }

        let q = self.quadrics[a as usize].sum(&self.quadrics[b as usize]);
        let pa = self.positions[a as usize];
        let pb = self.positions[b as usize];
        let target = if params.preserve_boundary && ba {
            pa
        } else if params.preserve_boundary && bb {
            pb
        } else {
            best_position(&q, &pa, &pb)
        };
        let mut cost = q.evaluate(&target);
        if is_boundary_edge {
            cost *= params.boundary_penalty;
        }
        Some(EdgeCollapse {
            v1: a.min(b),
            v2: a.max(b),
            stamp1: self.stamps[a.min(b) as usize],
            stamp2: self.stamps[a.max(b) as usize],
            cost,
            target,
        })
    }

    fn is_current(&self, c: &EdgeCollapse) -> bool {
        self.vertex_alive[c.v1 as usize]
            && self.vertex_alive[c.v2 as usize]
            && self.stamps[c.v1 as usize] == c.stamp1
            && self.stamps[c.v2 as usize] == c.stamp2
    }

    /// Common neighbours of `a` and `b` must be exactly the apexes of the faces on the edge.
    fn link_condition_holds(&self, a: u32, b: u32) -> bool {
        let shared = self.shared_faces(a, b);
        let mut apexes: Vec<u32> = shared
            .iter()
            .flat_map(|&f| self.faces[f as usize])
            .filter(|&v| v != a && v != b)
            .collect();
        apexes.sort_unstable();
        apexes.dedup();

        let na = self.neighbors(a);
        let nb = self.neighbors(b);
        let common: Vec<u32> = na
            .iter()
            .copied()
            .filter(|v| nb.binary_search(v).is_ok())
            .collect();
        if common != apexes {
            return false;
        }

        // Edge part of the link: no triangle (a, x, y) may have a twin (b, x, y).
        let opposite = |v: u32, other: u32| -> Vec<(u32, u32)> {
            let mut out: Vec<(u32, u32)> = self.vertex_faces[v as usize]
                .iter()
                .map(|&f| self.faces[f as usize])
                .filter(|face| !face.contains(&other))
                .map(|face| {
                    let [x, y] = match face.iter().position(|&w| w == v) {
                        Some(0) => [face[1], face[2]],
                        Some(1) => [face[2], face[0]],
                        _ => [face[0], face[1]],
                    };
                    (x.min(y), x.max(y))
                })
                .collect();
            out.sort_unstable();
            out
        };
        let ea = opposite(a, b);
        let eb = opposite(b, a);
        !ea.iter().any(|e| eb.binary_search(e).is_ok())
    }

    /// True when moving `a` and `b` to `target` keeps every surviving face's orientation.
    fn preserves_orientation(&self, a: u32, b: u32, target: &Point3<f64>) -> bool {
        for &v in &[a, b] {
            for &f in &self.vertex_faces[v as usize] {
                let face = self.faces[f as usize];
                if face.contains(&a) && face.contains(&b) {
                    continue;
                }
                let before = face.map(|i| self.positions[i as usize]);
                let after = face.map(|i| {
                    if i == a || i == b {
                        *target
                    } else {
                        self.positions[i as usize]
                    }
                });
                let (Some(n0), Some(n1)) = (
                    triangle_normal(&before[0], &before[1], &before[2]),
                    triangle_normal(&after[0], &after[1], &after[2]),
                ) else {
                    return false;
                };
                if n0.dot(&n1) <= 0.0 {
                    return false;
                }
            }
        }
        true
    }

    /// Merge `remove` into `keep`, returning the number of faces deleted.
    fn collapse(&mut self, keep: u32, remove: u32, target: Point3<f64>) -> usize {
        self.positions[keep as usize] = target;
        let q = self.quadrics[remove as usize];
        self.quadrics[keep as usize].add(&q);
        self.boundary[keep as usize] |= self.boundary[remove as usize];

        let mut removed = 0;
        for f in std::mem::take(&mut self.vertex_faces[remove as usize]) {
            let face = &mut self.faces[f as usize];
            if face.contains(&keep) {
                self.face_alive[f as usize] = false;
                removed += 1;
                let others = *face;
                for v in others {
                    if v != remove {
                        self.vertex_faces[v as usize].retain(|&g| g != f);
                    }
                }
            } else {
                for v in face.iter_mut() {
                    if *v == remove {
                        *v = keep;
                    }
                }
                self.vertex_faces[keep as usize].push(f);
            }
        }
        self.vertex_alive[remove as usize] = false;
        self.stamps[keep as usize] += 1;
        self.stamps[remove as usize] += 1;
        removed
    }

    fn into_mesh(self) -> Mesh {
        let mut remap = vec![u32::MAX; self.positions.len()];
        let mut mesh = Mesh::new();
        let live_faces: Vec<[u32; 3]> = self
            .faces
            .iter()
            .zip(&self.face_alive)
            .filter(|(_, alive)| **alive)
            .map(|(f, _)| *f)
            .collect();
        for face in &live_faces {
            let mapped = face.map(|v| {
                if remap[v as usize] == u32::MAX {
                    remap[v as usize] = mesh.vertices.len() as u32;
                    mesh.vertices.push(Vertex::new(self.positions[v as usize]));
                }
                remap[v as usize]
            });
            mesh.faces.push(mapped);
        }
        mesh
    }
}

/// Minimizer of `q` if it exists and stays near the edge, else the best of
/// midpoint and endpoints (midpoint wins ties).
fn best_position(q: &Quadric, pa: &Point3<f64>, pb: &Point3<f64>) -> Point3<f64> {
    let mid = nalgebra::center(pa, pb);
    let reach = 2.0 * (pb - pa).norm();
    if let Some(p) = q.optimal_point() {
        if p.coords.iter().all(|c| c.is_finite()) && (p - mid).norm() <= reach {
            return p;
        }
    }
    let mut best = mid;
    let mut best_cost = q.evaluate(&mid);
    for p in [*pa, *pb] {
        let c = q.evaluate(&p);
        if c < best_cost {
            best = p;
            best_cost = c;
        }
    }
    best
}

/// Decimate a mesh using edge collapse with quadric error metrics.
///
/// The face count never increases. Collapsing stops once the count is at or
/// below the target, when the cheapest remaining collapse exceeds
/// `max_error`, or when no valid collapse is left.
///
/// # Example
/// ```
/// use mesh_core::{DecimateParams, Mesh, Vertex, decimate_mesh};
///
/// let mut mesh = Mesh::new();
/// mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0));
/// mesh.vertices.push(Vertex::from_coords(1.0, 0.0, 0.0));
/// mesh.vertices.push(Vertex::from_coords(0.5, 1.0, 0.0));
/// mesh.faces.push([0, 1, 2]);
///
/// let result = decimate_mesh(&mesh, &DecimateParams::with_target_ratio(0.5)).unwrap();
/// assert!(result.final_triangles <= result.original_triangles);
/// ```
pub fn decimate_mesh(mesh: &Mesh, params: &DecimateParams) -> MeshResult<DecimateResult> {
    params.validate()?;
    mesh.validate()?;
    let original_triangles = mesh.faces.len();
    let target = params.target_for(original_triangles);

    if original_triangles == 0 || original_triangles <= target {
        return Ok(DecimateResult {
            mesh: mesh.clone(),
            original_triangles,
            final_triangles: original_triangles,
            collapses_performed: 0,
            collapses_rejected: 0,
        });
    }

    let _timer = OperationTimer::for_mesh("decimate_mesh", mesh);
    let adj = MeshAdjacency::build(mesh);
    let mut work = Working::new(mesh, &adj);

    let mut heap = BinaryHeap::new();
    for key in adj.edges() {
        let (a, b) = key.vertices();
        if let Some(c) = work.candidate(a, b, params) {
            heap.push(c);
        }
    }
    debug!(candidates = heap.len(), target, "Collapse queue built");

    let mut active_faces = original_triangles;
    let mut collapses_performed = 0;
    let mut collapses_rejected = 0;

    while active_faces > target {
        let Some(c) = heap.pop() else {
            break;
        };
        if !work.is_current(&c) {
            continue;
        }
        if params.max_error.is_some_and(|max| c.cost > max) {
            debug!(cost = c.cost, "Cheapest collapse exceeds max_error");
            break;
        }
        if !work.link_condition_holds(c.v1, c.v2)
            || !work.preserves_orientation(c.v1, c.v2, &c.target)
        {
            collapses_rejected += 1;
            continue;
        }

        active_faces -= work.collapse(c.v1, c.v2, c.target);
        collapses_performed += 1;

        for n in work.neighbors(c.v1) {
            if let Some(next) = work.candidate(c.v1, n, params) {
                heap.push(next);
            }
        }
    }

    let result = work.into_mesh();
    info!(
        original = original_triangles,
        final_faces = result.face_count(),
        collapses = collapses_performed,
        rejected = collapses_rejected,
        "Decimation complete"
    );

    Ok(DecimateResult {
        final_triangles: result.face_count(),
        mesh: result,
        original_triangles,
        collapses_performed,
        collapses_rejected,
    })
}
