//! Mesh repair: stitching, degenerate removal, non-manifold resolution and
//! the fixed repair pipeline.
//!
//! The individual stages work in place on a caller-owned working copy and
//! return how much they changed. [`repair_mesh`] runs them in a fixed order on
//! a clone of its input.

use hashbrown::{HashMap, HashSet};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::adjacency::MeshAdjacency;
use crate::error::{MeshError, MeshResult};
use crate::holes::{HoleFillParams, HoleFillStrategy, fill_holes, find_boundary_loops};
use crate::tracing_ext::{OperationTimer, log_repair_stage};
use crate::Mesh;

/// How to choose which faces survive on an edge shared by more than two faces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
#[cfg_attr(feature = "pipeline-config", serde(rename_all = "snake_case"))]
pub enum NonManifoldEdgePolicy {
    /// Visit faces in index order; the first two faces to claim an edge keep it.
    #[default]
    InsertionOrder,
    /// Visit faces by descending area (ties by index) instead.
    LargestArea,
}

/// Configuration parameters for [`repair_mesh`].
///
/// All thresholds are in the same units as the mesh coordinates.
///
/// # Example
///
/// ```
/// use mesh_core::RepairParams;
///
/// let params = RepairParams {
///     stitch_tolerance: 0.01,
///     ..Default::default()
/// };
/// assert!(params.fill_holes);
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
#[cfg_attr(feature = "pipeline-config", serde(default))]
pub struct RepairParams {
    /// Vertices at most this far apart are merged.
    ///
    /// Default: `1e-6`
    pub stitch_tolerance: f64,

    /// Faces with area below this are removed.
    ///
    /// Default: `1e-12`
    pub degenerate_area_threshold: f64,

    /// Which faces survive on non-manifold edges.
    pub non_manifold_policy: NonManifoldEdgePolicy,

    /// Whether to split vertices whose faces form more than one fan.
    ///
    /// Default: `true`
    pub fix_non_manifold_vertices: bool,

    /// Whether to fill boundary loops after the other stages.
    ///
    /// Default: `true`
    pub fill_holes: bool,

    /// Loops with more edges than this are left open.
    ///
    /// Default: `100`
    pub max_hole_edges: usize,

    /// Triangulation used for filled holes.
    pub hole_fill_strategy: HoleFillStrategy,

    /// Whether to drop vertices no face references.
    ///
    /// Default: `true`
    pub remove_unreferenced: bool,

    /// Whether to compute area-weighted vertex normals at the end.
    ///
    /// Default: `false`
    pub compute_normals: bool,
}

impl Default for RepairParams {
    fn default() -> Self {
        Self {
            stitch_tolerance: 1e-6,
            degenerate_area_threshold: 1e-12,
            non_manifold_policy: NonManifoldEdgePolicy::InsertionOrder,
            fix_non_manifold_vertices: true,
            fill_holes: true,
            max_hole_edges: 100,
            hole_fill_strategy: HoleFillStrategy::MinimumArea,
            remove_unreferenced: true,
            compute_normals: false,
        }
    }
}

impl RepairParams {
    /// Params for noisy scan data: coarse stitching, large holes filled.
    pub fn for_scans() -> Self {
        Self {
            stitch_tolerance: 0.01,
            degenerate_area_threshold: 1e-8,
            max_hole_edges: 500,
            ..Default::default()
        }
    }

    /// Params for CAD models: exact stitching, holes left alone.
    pub fn for_cad() -> Self {
        Self {
            stitch_tolerance: 1e-9,
            degenerate_area_threshold: 1e-15,
            fill_holes: false,
            ..Default::default()
        }
    }

    /// Params for printable output: watertight and manifold, with normals.
    pub fn for_printing() -> Self {
        Self {
            stitch_tolerance: 1e-3,
            degenerate_area_threshold: 1e-10,
            non_manifold_policy: NonManifoldEdgePolicy::LargestArea,
            max_hole_edges: 1000,
            compute_normals: true,
            ..Default::default()
        }
    }

    fn validate(&self) -> MeshResult<()> {
        if !self.stitch_tolerance.is_finite() || self.stitch_tolerance < 0.0 {
            return Err(MeshError::invalid_parameter(
                "stitch_tolerance",
                self.stitch_tolerance,
                "finite and >= 0",
            ));
        }
        if !self.degenerate_area_threshold.is_finite() || self.degenerate_area_threshold < 0.0 {
            return Err(MeshError::invalid_parameter(
                "degenerate_area_threshold",
                self.degenerate_area_threshold,
                "finite and >= 0",
            ));
        }
        if self.fill_holes && self.max_hole_edges < 3 {
            return Err(MeshError::invalid_parameter(
                "max_hole_edges",
                self.max_hole_edges,
                ">= 3",
            ));
        }
        Ok(())
    }
}

/// What each repair stage changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairStats {
    pub initial_vertices: usize,
    pub initial_faces: usize,
    pub final_vertices: usize,
    pub final_faces: usize,
    pub vertices_stitched: usize,
    pub duplicate_faces_removed: usize,
    pub degenerate_faces_removed: usize,
    pub non_manifold_faces_removed: usize,
    pub vertices_split: usize,
    pub holes_filled: usize,
    pub holes_remaining: usize,
    pub unreferenced_vertices_removed: usize,
    /// Pipeline passes run, including the final one that changed nothing.
    pub passes: usize,
}

impl RepairStats {
    /// True when no stage changed anything.
    pub fn is_clean(&self) -> bool {
        self.vertices_stitched == 0
            && self.duplicate_faces_removed == 0
            && self.degenerate_faces_removed == 0
            && self.non_manifold_faces_removed == 0
            && self.vertices_split == 0
            && self.holes_filled == 0
            && self.unreferenced_vertices_removed == 0
    }
}

impl std::fmt::Display for RepairStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Repair: {} verts -> {}, {} faces -> {}",
            self.initial_vertices, self.final_vertices, self.initial_faces, self.final_faces
        )?;
        writeln!(f, "  Stitched vertices: {}", self.vertices_stitched)?;
        writeln!(f, "  Duplicate faces removed: {}", self.duplicate_faces_removed)?;
        writeln!(f, "  Degenerate faces removed: {}", self.degenerate_faces_removed)?;
        writeln!(
            f,
            "  Non-manifold faces removed: {}",
            self.non_manifold_faces_removed
        )?;
        writeln!(f, "  Vertices split: {}", self.vertices_split)?;
        writeln!(
            f,
            "  Holes filled: {} ({} remaining)",
            self.holes_filled, self.holes_remaining
        )?;
        writeln!(
            f,
            "  Unreferenced vertices removed: {}",
            self.unreferenced_vertices_removed
        )?;
        write!(f, "  Passes: {}", self.passes)
    }
}

/// Output of [`repair_mesh`].
#[derive(Debug, Clone)]
pub struct RepairResult {
    pub mesh: Mesh,
    pub stats: RepairStats,
}

/// Merge vertices within `tolerance` of each other.
///
/// Greedy bucket merge in vertex order: each vertex joins the first earlier
/// representative within `tolerance` (searching the 27 surrounding cells of a
/// grid with cell size `tolerance`), otherwise it becomes a representative.
/// Merged vertices are compacted away, faces are re-indexed and faces left
/// with fewer than 3 distinct vertices are dropped. A tolerance of zero merges
/// exact duplicates only.
///
/// Returns the number of vertices merged.
pub fn stitch_vertices(mesh: &mut Mesh, tolerance: f64) -> MeshResult<usize> {
    if !tolerance.is_finite() || tolerance < 0.0 {
        return Err(MeshError::invalid_parameter(
            "tolerance",
            tolerance,
            "finite and >= 0",
        ));
    }
    mesh.validate()?;

    let vertex_count = mesh.vertices.len();
    let mut remap: Vec<u32> = Vec::with_capacity(vertex_count);
    let mut representatives: Vec<u32> = Vec::new();

    if tolerance == 0.0 {
        let mut exact: HashMap<[u64; 3], u32> = HashMap::new();
        for vertex in &mesh.vertices {
            let key = exact_key(&vertex.position);
            let next = representatives.len() as u32;
            let target = *exact.entry(key).or_insert(next);
            if target == next {
                representatives.push(remap.len() as u32);
            }
            remap.push(target);
        }
    } else {
        let mut grid: HashMap<(i64, i64, i64), Vec<u32>> = HashMap::new();
        let tol_sq = tolerance * tolerance;
        for (idx, vertex) in mesh.vertices.iter().enumerate() {
            let p = vertex.position;
            let cell = pos_to_cell(&p, tolerance);
            let mut found: Option<u32> = None;
            'search: for dx in -1..=1 {
                for dy in -1..=1 {
                    for dz in -1..=1 {
                        let Some(reps) = grid.get(&(
                            cell.0.saturating_add(dx),
                            cell.1.saturating_add(dy),
                            cell.2.saturating_add(dz),
                        ))
                        else {
                            continue;
                        };
                        for &rep in reps {
                            let rep_pos = &mesh.vertices[representatives[rep as usize] as usize]
                                .position;
                            if (p - rep_pos).norm_squared() <= tol_sq
                                && found.is_none_or(|f| rep < f)
                            {
                                found = Some(rep);
                            }
                        }
                        if found == Some(0) {
                            break 'search;
                        }
                    }
                }
            }
            match found {
                Some(rep) => remap.push(rep),
                None => {
                    let rep = representatives.len() as u32;
                    representatives.push(idx as u32);
                    grid.entry(cell).or_default().push(rep);
                    remap.push(rep);
                }
            }
        }
    }

    let merged = vertex_count - representatives.len();
    if merged == 0 {
        return Ok(0);
    }

    mesh.vertices = representatives
        .iter()
        .map(|&old| mesh.vertices[old as usize].clone())
        .collect();
    for face in &mut mesh.faces {
        *face = face.map(|v| remap[v as usize]);
    }
    let before = mesh.faces.len();
    mesh.faces
        .retain(|&[a, b, c]| a != b && b != c && a != c);

    info!(
        merged = merged,
        tolerance = tolerance,
        collapsed_faces = before - mesh.faces.len(),
        "Stitched vertices"
    );
    Ok(merged)
}

pub(crate) fn exact_key(p: &Point3<f64>) -> [u64; 3] {
    // +0.0 and -0.0 hash alike.
    [p.x + 0.0, p.y + 0.0, p.z + 0.0].map(f64::to_bits)
}

fn pos_to_cell(pos: &Point3<f64>, cell_size: f64) -> (i64, i64, i64) {
    (
        (pos.x / cell_size).floor() as i64,
        (pos.y / cell_size).floor() as i64,
        (pos.z / cell_size).floor() as i64,
    )
}

/// Remove faces with area below `area_threshold` or a repeated vertex.
///
/// Returns the number of faces removed.
pub fn remove_degenerate_faces(mesh: &mut Mesh, area_threshold: f64) -> usize {
    let original_count = mesh.faces.len();
    let vertices = &mesh.vertices;

    mesh.faces.retain(|&[a, b, c]| {
        if a == b || b == c || a == c {
            return false;
        }
        let area = crate::math::triangle_area(
            &vertices[a as usize].position,
            &vertices[b as usize].position,
            &vertices[c as usize].position,
        );
        area >= area_threshold
    });

    let removed = original_count - mesh.faces.len();
    if removed > 0 {
        debug!(removed, threshold = area_threshold, "Removed degenerate faces");
    }
    removed
}

/// Remove faces that use the same three vertices as an earlier face,
/// regardless of winding.
///
/// Returns the number of faces removed.
pub fn remove_duplicate_faces(mesh: &mut Mesh) -> usize {
    let original_count = mesh.faces.len();
    let mut seen: HashSet<[u32; 3]> = HashSet::with_capacity(original_count);
    mesh.faces.retain(|face| {
        let mut key = *face;
        key.sort_unstable();
        seen.insert(key)
    });

    let removed = original_count - mesh.faces.len();
    if removed > 0 {
        debug!(removed, "Removed duplicate faces");
    }
    removed
}

/// Drop faces so that no edge is shared by more than two faces.
///
/// With [`NonManifoldEdgePolicy::InsertionOrder`] faces are visited in index
/// order and a face is kept only if none of its edges already has two kept
/// faces, so every edge keeps its first two incident faces. Faces that do not
/// touch a non-manifold edge are never removed.
///
/// Returns the number of faces removed.
pub fn fix_non_manifold_edges(mesh: &mut Mesh, policy: NonManifoldEdgePolicy) -> usize {
    let adjacency = MeshAdjacency::build(mesh);
    let nm_edges = adjacency.non_manifold_edge_count();
    if nm_edges == 0 {
        return 0;
    }
    debug!(edges = nm_edges, ?policy, "Fixing non-manifold edges");

    let mut order: Vec<usize> = (0..mesh.faces.len()).collect();
    if policy == NonManifoldEdgePolicy::LargestArea {
        let areas: Vec<f64> = mesh.triangles().map(|t| t.area()).collect();
        order.sort_by(|&a, &b| areas[b].total_cmp(&areas[a]).then(a.cmp(&b)));
    }

    let mut claims = vec![0u8; adjacency.edge_count()];
    let mut keep = vec![false; mesh.faces.len()];
    for fi in order {
        let face = mesh.faces[fi];
        let ids: Vec<u32> = (0..3)
            .filter_map(|k| adjacency.edge_id(face[k], face[(k + 1) % 3]))
            .collect();
        if ids.iter().all(|&e| claims[e as usize] < 2) {
            for &e in &ids {
                claims[e as usize] += 1;
            }
            keep[fi] = true;
        }
    }

    let original_count = mesh.faces.len();
    let mut fi = 0;
    mesh.faces.retain(|_| {
        let k = keep[fi];
        fi += 1;
        k
    });
    let removed = original_count - mesh.faces.len();
    if removed > 0 {
        info!(removed, "Removed faces on non-manifold edges");
    }
    removed
}

/// Group the faces around `v` into fans connected through shared edges.
///
/// Fans are ordered by their lowest face index and each fan lists its faces in
/// index order. A manifold vertex yields at most one fan.
pub fn non_manifold_vertex_fans(mesh: &Mesh, adjacency: &MeshAdjacency, v: u32) -> Vec<Vec<u32>> {
    let faces = adjacency.vertex_faces(v);
    if faces.len() < 2 {
        return if faces.is_empty() {
            Vec::new()
        } else {
            vec![faces.to_vec()]
        };
    }

    let mut parent: Vec<usize> = (0..faces.len()).collect();
    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    // Two faces around v are in one fan when they share an edge (v, w).
    let mut first_with: HashMap<u32, usize> = HashMap::new();
    for (local, &fi) in faces.iter().enumerate() {
        for &w in &mesh.faces[fi as usize] {
            if w == v {
                continue;
            }
            match first_with.get(&w) {
                Some(&other) => {
                    let (a, b) = (find(&mut parent, local), find(&mut parent, other));
                    if a != b {
                        parent[a.max(b)] = a.min(b);
                    }
                }
                None => {
                    first_with.insert(w, local);
                }
            }
        }
    }

    let mut fans: Vec<Vec<u32>> = Vec::new();
    let mut fan_of_root: HashMap<usize, usize> = HashMap::new();
    for (local, &fi) in faces.iter().enumerate() {
        let root = find(&mut parent, local);
        let slot = *fan_of_root.entry(root).or_insert_with(|| {
            fans.push(Vec::new());
            fans.len() - 1
        });
        fans[slot].push(fi);
    }
    fans
}

/// Split vertices whose incident faces form more than one fan.
///
/// The fan holding the lowest face index keeps the original vertex; every
/// other fan gets a copy appended to the vertex list (in vertex, then fan,
/// order).
///
/// Returns the number of vertices added.
pub fn fix_non_manifold_vertices(mesh: &mut Mesh) -> usize {
    let adjacency = MeshAdjacency::build(mesh);
    let original_count = mesh.vertices.len() as u32;
    let mut added = 0;

    for v in 0..original_count {
        let fans = non_manifold_vertex_fans(mesh, &adjacency, v);
        for fan in fans.iter().skip(1) {
            let copy = mesh.vertices.len() as u32;
            mesh.vertices.push(mesh.vertices[v as usize].clone());
            for &fi in fan {
                for slot in &mut mesh.faces[fi as usize] {
                    if *slot == v {
                        *slot = copy;
                    }
                }
            }
            added += 1;
        }
    }

    if added > 0 {
        info!(added, "Split non-manifold vertices");
    }
    added
}

/// Remove vertices no face references and compact the vertex array.
///
/// Returns the number of vertices removed.
pub fn remove_unreferenced_vertices(mesh: &mut Mesh) -> usize {
    let original_count = mesh.vertices.len();
    let mut referenced = vec![false; original_count];
    for face in &mesh.faces {
        for &v in face {
            referenced[v as usize] = true;
        }
    }
    if referenced.iter().all(|&r| r) {
        return 0;
    }

    let mut remap = vec![u32::MAX; original_count];
    let mut new_vertices = Vec::with_capacity(original_count);
    for (old, vertex) in mesh.vertices.iter().enumerate() {
        if referenced[old] {
            remap[old] = new_vertices.len() as u32;
            new_vertices.push(vertex.clone());
        }
    }
    for face in &mut mesh.faces {
        *face = face.map(|v| remap[v as usize]);
    }

    let removed = original_count - new_vertices.len();
    mesh.vertices = new_vertices;
    debug!(removed, "Removed unreferenced vertices");
    removed
}

/// Compute vertex normals as the area-weighted average of incident face normals.
///
/// Vertices without a usable normal (isolated, or only degenerate faces) get `None`.
pub fn compute_vertex_normals(mesh: &mut Mesh) {
    let face_normals: Vec<Vector3<f64>> = mesh
        .faces
        .par_iter()
        .map(|&[a, b, c]| {
            crate::math::triangle_normal_raw(
                &mesh.vertices[a as usize].position,
                &mesh.vertices[b as usize].position,
                &mesh.vertices[c as usize].position,
            )
        })
        .collect();

    let mut accum = vec![Vector3::zeros(); mesh.vertices.len()];
    for (face, n) in mesh.faces.iter().zip(&face_normals) {
        for &v in face {
            accum[v as usize] += n;
        }
    }

    for (vertex, sum) in mesh.vertices.iter_mut().zip(accum) {
        vertex.normal = crate::math::try_normalize(&sum);
    }

    debug!(vertices = mesh.vertices.len(), "Computed vertex normals");
}

/// Upper bound on [`repair_mesh`] passes.
const MAX_REPAIR_PASSES: usize = 16;

/// Duplicate, degenerate and non-manifold cleanup, in pipeline order.
fn cleanup_stages(work: &mut Mesh, params: &RepairParams, stats: &mut RepairStats) {
    let duplicates = remove_duplicate_faces(work);
    stats.duplicate_faces_removed += duplicates;
    log_repair_stage("duplicate_faces", duplicates);

    let degenerate = remove_degenerate_faces(work, params.degenerate_area_threshold);
    stats.degenerate_faces_removed += degenerate;
    log_repair_stage("degenerate_faces", degenerate);

    let non_manifold = fix_non_manifold_edges(work, params.non_manifold_policy);
    stats.non_manifold_faces_removed += non_manifold;
    log_repair_stage("non_manifold_edges", non_manifold);

    if params.fix_non_manifold_vertices {
        let split = fix_non_manifold_vertices(work);
        stats.vertices_split += split;
        log_repair_stage("non_manifold_vertices", split);
    }
}

/// One pass of the repair pipeline, adding its counts to `stats`.
fn repair_pass(work: &mut Mesh, params: &RepairParams, stats: &mut RepairStats) -> MeshResult<()> {
    let stitched = stitch_vertices(work, params.stitch_tolerance)?;
    stats.vertices_stitched += stitched;
    log_repair_stage("stitch", stitched);

    cleanup_stages(work, params, stats);

    if params.fill_holes {
        let fill_params = HoleFillParams {
            max_hole_edges: params.max_hole_edges,
            strategy: params.hole_fill_strategy,
            ..Default::default()
        };
        let filled = fill_holes(work, &fill_params)?;
        stats.holes_filled += filled;
        log_repair_stage("fill_holes", filled);
        // Fill triangles can be degenerate, repeat a face or land on an
        // existing edge. Holes reopened here stay open until the next pass.
        if filled > 0 {
            cleanup_stages(work, params, stats);
        }
    }

    if params.remove_unreferenced {
        let removed = remove_unreferenced_vertices(work);
        stats.unreferenced_vertices_removed += removed;
        log_repair_stage("unreferenced_vertices", removed);
    }
    Ok(())
}

/// Run the fixed repair pipeline on a copy of `mesh`.
///
/// One pass runs: stitch → duplicate faces → degenerate faces → non-manifold
/// edges → non-manifold vertices → fill holes → the four cleanup stages again
/// → unreferenced vertices. Split copies of a pinched vertex sit exactly on
/// the original, so the next pass stitches them back and splits again; hole
/// fills can also meet existing edges. Passes are therefore repeated until one
/// leaves the mesh unchanged, which makes the result a fixed point and
/// repairing it again a no-op. Stats are summed over all passes.
///
/// # Example
///
/// ```
/// use mesh_core::{Mesh, RepairParams, repair_mesh};
///
/// let mesh = Mesh::new();
/// let result = repair_mesh(&mesh, &RepairParams::default()).unwrap();
/// assert!(result.mesh.is_empty());
/// ```
pub fn repair_mesh(mesh: &Mesh, params: &RepairParams) -> MeshResult<RepairResult> {
    params.validate()?;
    mesh.validate()?;
    let _timer = OperationTimer::for_mesh("repair_mesh", mesh);

    let mut work = mesh.clone();
    let mut stats = RepairStats {
        initial_vertices: mesh.vertex_count(),
        initial_faces: mesh.face_count(),
        ..Default::default()
    };

    if work.faces.is_empty() {
        warn!("Mesh has no faces, skipping repair");
        stats.final_vertices = work.vertex_count();
        stats.final_faces = 0;
        return Ok(RepairResult { mesh: work, stats });
    }

    loop {
        let before = work.clone();
        repair_pass(&mut work, params, &mut stats)?;
        stats.passes += 1;
        if work == before {
            break;
        }
        if stats.passes == MAX_REPAIR_PASSES {
            warn!(passes = stats.passes, "Repair did not settle, stopping");
            break;
        }
    }
    stats.holes_remaining = find_boundary_loops(&work).len();

    if params.compute_normals {
        compute_vertex_normals(&mut work);
    }

    stats.final_vertices = work.vertex_count();
    stats.final_faces = work.face_count();

    info!(
        verts_before = stats.initial_vertices,
        verts_after = stats.final_vertices,
        faces_before = stats.initial_faces,
        faces_after = stats.final_faces,
        holes_filled = stats.holes_filled,
        "Repair complete"
    );

    Ok(RepairResult { mesh: work, stats })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Vertex;
    use approx::assert_relative_eq;

    fn tetrahedron() -> Mesh {
        Mesh::from_parts(
            [
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(0.0, 0.0, 1.0),
            ],
            vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]],
        )
    }

    /// Tetrahedron whose faces each carry their own three vertices.
    fn triangle_soup_tetrahedron() -> Mesh {
        let tet = tetrahedron();
        let mut soup = Mesh::new();
        for face in &tet.faces {
            let base = soup.vertices.len() as u32;
            for &v in face {
                soup.vertices.push(tet.vertices[v as usize].clone());
            }
            soup.faces.push([base, base + 1, base + 2]);
        }
        soup
    }

    /// Two tetrahedra sharing only vertex 0 (a bow-tie at the apex).
    fn bowtie() -> Mesh {
        let mut mesh = tetrahedron();
        let mirrored = [
            Point3::new(-1.0, 0.0, 0.0),
            Point3::new(0.0, -1.0, 0.0),
            Point3::new(0.0, 0.0, -1.0),
        ];
        for p in mirrored {
            mesh.vertices.push(Vertex::new(p));
        }
        // Vertices 4, 5, 6 mirror 1, 2, 3; mirroring flips handedness, so faces are reversed.
        mesh.faces.extend([[0, 4, 5], [0, 6, 4], [0, 5, 6], [4, 6, 5]]);
        mesh
    }

    #[test]
    fn test_stitch_triangle_soup() {
        let mut soup = triangle_soup_tetrahedron();
        let merged = stitch_vertices(&mut soup, 1e-9).unwrap();
        assert_eq!(merged, 8);
        assert_eq!(soup.vertex_count(), 4);
        assert!(MeshAdjacency::build(&soup).is_watertight());
        assert_relative_eq!(soup.signed_volume(), 1.0 / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_stitch_exact_only() {
        let mut soup = triangle_soup_tetrahedron();
        soup.vertices[0].position.x += 1e-7;
        let merged = stitch_vertices(&mut soup, 0.0).unwrap();
        // The nudged copy of vertex 0 stays apart.
        assert_eq!(merged, 7);
        assert_eq!(soup.vertex_count(), 5);
    }

    #[test]
    fn test_stitch_collapses_small_face() {
        let mut mesh = Mesh::from_parts(
            [
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(0.001, 0.0, 0.0),
                Point3::new(0.0, 0.001, 0.0),
                Point3::new(1.0, 0.0, 0.0),
            ],
            vec![[0, 1, 2], [0, 3, 2]],
        );
        stitch_vertices(&mut mesh, 0.01).unwrap();
        assert_eq!(mesh.vertex_count(), 2);
        assert!(mesh.faces.is_empty());
    }

    #[test]
    fn test_stitch_rejects_negative_tolerance() {
        let mut mesh = tetrahedron();
        assert!(matches!(
            stitch_vertices(&mut mesh, -1.0),
            Err(MeshError::InvalidParameter {
                name: "tolerance",
                ..
            })
        ));
    }

    #[test]
    fn test_remove_degenerate_faces() {
        let mut mesh = tetrahedron();
        mesh.vertices.push(Vertex::from_coords(2.0, 0.0, 0.0));
        mesh.faces.push([0, 1, 4]); // collinear
        mesh.faces.push([1, 1, 2]); // repeated vertex
        assert_eq!(remove_degenerate_faces(&mut mesh, 1e-12), 2);
        assert_eq!(mesh.face_count(), 4);
    }

    #[test]
    fn test_remove_duplicate_faces_ignores_winding() {
        let mut mesh = tetrahedron();
        mesh.faces.push([1, 0, 2]);
        mesh.faces.push([2, 1, 0]);
        assert_eq!(remove_duplicate_faces(&mut mesh), 2);
        assert_eq!(mesh.faces[0], [0, 2, 1]);
    }

    #[test]
    fn test_fix_non_manifold_edges_keeps_first_two() {
        let mut mesh = Mesh::from_parts(
            [
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.5, 1.0, 0.0),
                Point3::new(0.5, -1.0, 0.0),
                Point3::new(0.5, 0.0, 1.0),
            ],
            vec![[0, 1, 2], [1, 0, 3], [0, 1, 4]],
        );
        let removed = fix_non_manifold_edges(&mut mesh, NonManifoldEdgePolicy::InsertionOrder);
        assert_eq!(removed, 1);
        assert_eq!(mesh.faces, vec![[0, 1, 2], [1, 0, 3]]);
        assert!(MeshAdjacency::build(&mesh).is_manifold());
    }

    #[test]
    fn test_fix_non_manifold_edges_largest_area() {
        let mut mesh = Mesh::from_parts(
            [
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.5, 0.1, 0.0),
                Point3::new(0.5, -1.0, 0.0),
                Point3::new(0.5, 0.0, 3.0),
            ],
            vec![[0, 1, 2], [1, 0, 3], [0, 1, 4]],
        );
        fix_non_manifold_edges(&mut mesh, NonManifoldEdgePolicy::LargestArea);
        assert_eq!(mesh.faces, vec![[1, 0, 3], [0, 1, 4]]);
    }

    #[test]
    fn test_fix_non_manifold_vertices_splits_bowtie() {
        let mut mesh = bowtie();
        let adjacency = MeshAdjacency::build(&mesh);
        assert_eq!(non_manifold_vertex_fans(&mesh, &adjacency, 0).len(), 2);

        let added = fix_non_manifold_vertices(&mut mesh);
        assert_eq!(added, 1);
        assert_eq!(mesh.vertex_count(), 8);
        assert_eq!(mesh.vertices[7].position, Point3::origin());
        // First fan keeps vertex 0.
        assert!(mesh.faces[..4].iter().any(|f| f.contains(&0)));
        assert!(mesh.faces[4..].iter().all(|f| !f.contains(&0)));

        let adjacency = MeshAdjacency::build(&mesh);
        assert!((0..8).all(|v| non_manifold_vertex_fans(&mesh, &adjacency, v).len() <= 1));
    }

    #[test]
    fn test_remove_unreferenced() {
        let mut mesh = tetrahedron();
        mesh.vertices.insert(0, Vertex::from_coords(9.0, 9.0, 9.0));
        for face in &mut mesh.faces {
            *face = face.map(|v| v + 1);
        }
        assert_eq!(remove_unreferenced_vertices(&mut mesh), 1);
        assert_eq!(mesh.faces[0], [0, 2, 1]);
        assert_relative_eq!(mesh.signed_volume(), 1.0 / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_compute_vertex_normals() {
        let mut mesh = tetrahedron();
        compute_vertex_normals(&mut mesh);
        let n3 = mesh.vertices[3].normal.unwrap();
        assert_relative_eq!(n3.norm(), 1.0, epsilon = 1e-12);
        // Apex of the z-axis points away from the body.
        assert!(n3.z > 0.0);
    }

    #[test]
    fn test_repair_soup_to_closed_solid() {
        let result = repair_mesh(&triangle_soup_tetrahedron(), &RepairParams::default()).unwrap();
        assert_eq!(result.mesh.vertex_count(), 4);
        assert_eq!(result.mesh.face_count(), 4);
        assert_eq!(result.stats.vertices_stitched, 8);
        assert_eq!(result.stats.holes_remaining, 0);
    }

    #[test]
    fn test_repair_fills_missing_face() {
        let mut mesh = tetrahedron();
        mesh.faces.remove(3);
        let result = repair_mesh(&mesh, &RepairParams::default()).unwrap();
        assert_eq!(result.stats.holes_filled, 1);
        assert_eq!(result.mesh.face_count(), 4);
        assert_relative_eq!(result.mesh.signed_volume(), 1.0 / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_repair_is_idempotent() {
        let mut mesh = bowtie();
        mesh.faces.push([0, 2, 1]); // duplicate
        mesh.vertices.push(Vertex::from_coords(5.0, 5.0, 5.0)); // unreferenced
        let params = RepairParams::default();

        let once = repair_mesh(&mesh, &params).unwrap();
        let twice = repair_mesh(&once.mesh, &params).unwrap();
        assert_eq!(once.mesh, twice.mesh);
    }

    #[test]
    fn test_repair_split_copies_settle() {
        let params = RepairParams::default();
        let once = repair_mesh(&bowtie(), &params).unwrap();
        // The second pass stitches the copy back and splits it again.
        assert_eq!(once.stats.passes, 2);
        assert_eq!(once.mesh.vertex_count(), 8);

        let twice = repair_mesh(&once.mesh, &params).unwrap();
        assert_eq!(twice.stats.passes, 1);
        assert_eq!(twice.mesh, once.mesh);
    }

    #[test]
    fn test_repair_pinch_next_to_hole_is_idempotent() {
        let mut mesh = bowtie();
        // Open both tetrahedra at a face touching the shared apex.
        mesh.faces.retain(|f| *f != [0, 2, 1] && *f != [0, 4, 5]);
        let params = RepairParams::default();

        let once = repair_mesh(&mesh, &params).unwrap();
        assert_eq!(once.stats.holes_remaining, 0);
        assert!(MeshAdjacency::build(&once.mesh).is_watertight());
        assert_relative_eq!(once.mesh.signed_volume(), 2.0 / 6.0, epsilon = 1e-12);

        let twice = repair_mesh(&once.mesh, &params).unwrap();
        assert_eq!(twice.mesh, once.mesh);
        assert_eq!(twice.stats.passes, 1);
    }

    #[test]
    fn test_repair_clean_mesh_is_unchanged() {
        let mesh = tetrahedron();
        let result = repair_mesh(&mesh, &RepairParams::default()).unwrap();
        assert!(result.stats.is_clean());
        assert_eq!(result.mesh, mesh);
    }

    #[test]
    fn test_repair_params_presets() {
        assert!(!RepairParams::for_cad().fill_holes);
        assert!(RepairParams::for_scans().stitch_tolerance > RepairParams::default().stitch_tolerance);
        assert!(RepairParams::for_printing().compute_normals);
        let bad = RepairParams {
            stitch_tolerance: f64::NAN,
            ..Default::default()
        };
        assert!(repair_mesh(&tetrahedron(), &bad).is_err());
    }
}
