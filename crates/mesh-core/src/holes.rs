//! Hole detection and filling.
//!
//! Boundary loops are traced from directed face edges whose reverse is not
//! used by any face. Each loop is returned in *cap orientation*: walking the
//! loop in order, a triangle `(l[a], l[b], l[c])` with `a < b < c` is wound
//! consistently with the faces around the hole.

use hashbrown::HashMap;
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::adjacency::{DirectedEdge, MeshAdjacency};
use crate::error::{MeshError, MeshResult};
use crate::math::triangle_area;
use crate::{Mesh, Vertex};

/// A closed boundary loop (hole) in cap orientation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryLoop {
    /// Ordered vertex indices forming the loop.
    pub vertices: Vec<u32>,
}

impl BoundaryLoop {
    /// Number of edges (and vertices) in the loop.
    pub fn edge_count(&self) -> usize {
        self.vertices.len()
    }

    /// Positions of the loop vertices.
    pub fn positions(&self, mesh: &Mesh) -> Vec<Point3<f64>> {
        self.vertices
            .iter()
            .map(|&v| mesh.vertices[v as usize].position)
            .collect()
    }

    /// Total length of the loop.
    pub fn perimeter(&self, mesh: &Mesh) -> f64 {
        let pts = self.positions(mesh);
        (0..pts.len())
            .map(|i| (pts[(i + 1) % pts.len()] - pts[i]).norm())
            .sum()
    }
}

/// Triangulation strategy for a single hole.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
#[cfg_attr(feature = "pipeline-config", serde(rename_all = "snake_case"))]
pub enum HoleFillStrategy {
    /// Minimum-area triangulation over the loop polygon (O(n³) dynamic program).
    #[default]
    MinimumArea,
    /// One new vertex at the loop centroid, connected radially.
    CentroidFan,
}

/// New geometry that closes one hole.
///
/// Triangles index into the mesh the fill was computed for. Indices at or
/// above `base` refer to entries of `new_vertices`.
#[derive(Debug, Clone, Default)]
pub struct HoleFill {
    /// New triangles.
    pub triangles: Vec<[u32; 3]>,
    /// New vertices introduced by the fill (centroid fan only).
    pub new_vertices: Vec<Point3<f64>>,
    base: u32,
}

impl HoleFill {
    /// True when the fill adds nothing (loops shorter than 3).
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Append the fill to `mesh`, renumbering any new vertices.
    pub fn append_to(&self, mesh: &mut Mesh) {
        let offset = mesh.vertices.len() as u32;
        let base = self.base;
        mesh.vertices
            .extend(self.new_vertices.iter().map(|p| Vertex::new(*p)));
        mesh.faces.extend(self.triangles.iter().map(|tri| {
            tri.map(|v| if v >= base { v - base + offset } else { v })
        }));
    }
}

/// Find all boundary loops of a mesh. Empty for watertight meshes.
///
/// Chains that cannot be closed are skipped with a warning. A chain that
/// passes through a vertex twice is split there into separate loops.
pub fn find_boundary_loops(mesh: &Mesh) -> Vec<BoundaryLoop> {
    let mut directed_count: HashMap<DirectedEdge, u32> = HashMap::new();
    let mut directed: Vec<DirectedEdge> = Vec::new();
    for face in &mesh.faces {
        for k in 0..3 {
            let (a, b) = (face[k], face[(k + 1) % 3]);
            if a == b {
                continue;
            }
            let e = DirectedEdge::new(a, b);
            let count = directed_count.entry(e).or_insert(0);
            if *count == 0 {
                directed.push(e);
            }
            *count += 1;
        }
    }

    let boundary: Vec<DirectedEdge> = directed
        .into_iter()
        .filter(|e| !directed_count.contains_key(&e.reversed()))
        .collect();
    if boundary.is_empty() {
        return Vec::new();
    }
    debug!(boundary_edges = boundary.len(), "Tracing boundary loops");

    let mut outgoing: HashMap<u32, Vec<usize>> = HashMap::new();
    for (i, e) in boundary.iter().enumerate() {
        outgoing.entry(e.from()).or_default().push(i);
    }
    let mut used = vec![false; boundary.len()];
    let mut next_unused = |v: u32, used: &mut [bool]| -> Option<usize> {
        let candidates = outgoing.get_mut(&v)?;
        let pos = candidates.iter().position(|&i| !used[i])?;
        let edge = candidates.remove(pos);
        used[edge] = true;
        Some(edge)
    };

    let mut loops = Vec::new();
    for first in 0..boundary.len() {
        if used[first] {
            continue;
        }
        let start = boundary[first].from();
        let mut chain: Vec<u32> = vec![start];
        let mut position: HashMap<u32, usize> = HashMap::from([(start, 0)]);
        let mut current = start;

        loop {
            let Some(edge) = next_unused(current, &mut used) else {
                warn!(
                    start = start,
                    open_vertices = chain.len(),
                    "Boundary chain is not closed, skipping"
                );
                break;
            };
            let to = boundary[edge].to();
            match position.get(&to).copied() {
                Some(p) => {
                    let mut sub: Vec<u32> = chain.drain(p..).collect();
                    for v in &sub {
                        position.remove(v);
                    }
                    if sub.len() >= 3 {
                        sub[1..].reverse();
                        loops.push(BoundaryLoop { vertices: sub });
                    }
                    if p == 0 {
                        break;
                    }
                    position.insert(to, chain.len());
                    chain.push(to);
                }
                None => {
                    position.insert(to, chain.len());
                    chain.push(to);
                }
            }
            current = to;
        }
    }

    debug!(
        loops = loops.len(),
        sizes = ?loops.iter().map(|l| l.edge_count()).collect::<Vec<_>>(),
        "Found boundary loops"
    );
    loops
}

/// Triangulate one hole.
///
/// Minimum-area fills always produce `n - 2` triangles for an `n`-vertex
/// loop; centroid fans produce `n` triangles and one new vertex. Loops
/// shorter than 3 give an empty fill.
pub fn fill_hole(mesh: &Mesh, boundary: &BoundaryLoop, strategy: HoleFillStrategy) -> HoleFill {
    match strategy {
        HoleFillStrategy::MinimumArea => {
            let adjacency = MeshAdjacency::build(mesh);
            minimum_area_fill(mesh, boundary, &adjacency)
        }
        HoleFillStrategy::CentroidFan => centroid_fan_fill(mesh, boundary),
    }
}

/// Lexicographic triangulation cost: penalties first, then area.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
struct FillCost {
    penalties: u32,
    area: f64,
}

impl FillCost {
    const ZERO: Self = Self {
        penalties: 0,
        area: 0.0,
    };

    fn plus(self, other: Self) -> Self {
        Self {
            penalties: self.penalties + other.penalties,
            area: self.area + other.area,
        }
    }
}

fn minimum_area_fill(
    mesh: &Mesh,
    boundary: &BoundaryLoop,
    adjacency: &MeshAdjacency,
) -> HoleFill {
    let n = boundary.vertices.len();
    let base = mesh.vertices.len() as u32;
    if n < 3 {
        return HoleFill {
            base,
            ..Default::default()
        };
    }

    let loop_v = &boundary.vertices;
    let pts = boundary.positions(mesh);
    let scale = pts
        .iter()
        .map(|p| (p - pts[0]).norm_squared())
        .fold(0.0_f64, f64::max)
        .max(f64::MIN_POSITIVE);
    let degenerate_area = crate::math::EPSILON * scale;

    // A diagonal (i, j) that already exists as a mesh edge would become non-manifold.
    let is_existing_diagonal = |i: usize, j: usize| -> bool {
        if j == i + 1 || (i == 0 && j == n - 1) {
            return false;
        }
        adjacency.edge_id(loop_v[i], loop_v[j]).is_some()
    };

    let triangle_cost = |i: usize, k: usize, j: usize| -> FillCost {
        let area = triangle_area(&pts[i], &pts[k], &pts[j]);
        let mut penalties = u32::from(area <= degenerate_area);
        penalties += u32::from(is_existing_diagonal(i, k));
        penalties += u32::from(is_existing_diagonal(k, j));
        FillCost { penalties, area }
    };

    let idx = |i: usize, j: usize| i * n + j;
    let mut cost = vec![FillCost::ZERO; n * n];
    let mut split = vec![0usize; n * n];

    for len in 2..n {
        for i in 0..n - len {
            let j = i + len;
            let mut best: Option<(FillCost, usize)> = None;
            for k in i + 1..j {
                let c = cost[idx(i, k)]
                    .plus(cost[idx(k, j)])
                    .plus(triangle_cost(i, k, j));
                if best.is_none_or(|(b, _)| c < b) {
                    best = Some((c, k));
                }
            }
            if let Some((c, k)) = best {
                cost[idx(i, j)] = c;
                split[idx(i, j)] = k;
            }
        }
    }

    let mut triangles = Vec::with_capacity(n - 2);
    let mut stack = vec![(0usize, n - 1)];
    while let Some((i, j)) = stack.pop() {
        if j < i + 2 {
            continue;
        }
        let k = split[idx(i, j)];
        triangles.push([loop_v[i], loop_v[k], loop_v[j]]);
        stack.push((k, j));
        stack.push((i, k));
    }

    let total = cost[idx(0, n - 1)];
    if total.penalties > 0 {
        debug!(
            loop_size = n,
            penalties = total.penalties,
            "Hole fill needed degenerate or duplicate-edge triangles"
        );
    }

    HoleFill {
        triangles,
        new_vertices: Vec::new(),
        base,
    }
}

fn centroid_fan_fill(mesh: &Mesh, boundary: &BoundaryLoop) -> HoleFill {
    let n = boundary.vertices.len();
    let base = mesh.vertices.len() as u32;
    if n < 3 {
        return HoleFill {
            base,
            ..Default::default()
        };
    }

    let sum = boundary
        .positions(mesh)
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + p.coords);
    let centroid = Point3::from(sum / n as f64);

    let triangles = (0..n)
        .map(|i| {
            [
                base,
                boundary.vertices[i],
                boundary.vertices[(i + 1) % n],
            ]
        })
        .collect();

    HoleFill {
        triangles,
        new_vertices: vec![centroid],
        base,
    }
}

/// Parameters for [`fill_holes`].
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
#[cfg_attr(feature = "pipeline-config", serde(default))]
pub struct HoleFillParams {
    /// Loops with more edges than this are left open.
    ///
    /// Default: `100`
    pub max_hole_edges: usize,

    /// Preferred strategy.
    pub strategy: HoleFillStrategy,

    /// Above this size, minimum-area fills fall back to a centroid fan.
    ///
    /// Default: `200`
    pub max_dp_vertices: usize,
}

impl Default for HoleFillParams {
    fn default() -> Self {
        Self {
            max_hole_edges: 100,
            strategy: HoleFillStrategy::MinimumArea,
            max_dp_vertices: 200,
        }
    }
}

impl HoleFillParams {
    /// Fill every hole regardless of size.
    pub fn unlimited() -> Self {
        Self {
            max_hole_edges: usize::MAX,
            ..Default::default()
        }
    }
}

/// Fill every hole up to `params.max_hole_edges` in place.
///
/// Returns the number of holes filled. Loops are triangulated in parallel and
/// appended in loop order.
pub fn fill_holes(mesh: &mut Mesh, params: &HoleFillParams) -> MeshResult<usize> {
    if params.max_hole_edges < 3 {
        return Err(MeshError::invalid_parameter(
            "max_hole_edges",
            params.max_hole_edges,
            ">= 3",
        ));
    }
    mesh.validate()?;

    let holes = find_boundary_loops(mesh);
    let (fillable, skipped): (Vec<_>, Vec<_>) = holes
        .into_iter()
        .partition(|hole| hole.edge_count() <= params.max_hole_edges);

    for hole in &skipped {
        warn!(
            edges = hole.edge_count(),
            max = params.max_hole_edges,
            "Skipping large hole"
        );
    }
    if fillable.is_empty() {
        return Ok(0);
    }

    let adjacency = MeshAdjacency::build(mesh);
    let source: &Mesh = mesh;
    let fills: Vec<HoleFill> = fillable
        .par_iter()
        .map(|hole| {
            let use_dp = params.strategy == HoleFillStrategy::MinimumArea
                && hole.edge_count() <= params.max_dp_vertices;
            if use_dp {
                minimum_area_fill(source, hole, &adjacency)
            } else {
                centroid_fan_fill(source, hole)
            }
        })
        .collect();

    let mut filled = 0;
    for fill in fills.iter().filter(|f| !f.is_empty()) {
        fill.append_to(mesh);
        filled += 1;
    }

    if filled > 0 {
        info!(holes = filled, skipped = skipped.len(), "Filled holes");
    }
    Ok(filled)
}
