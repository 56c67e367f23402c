//! Loop and Catmull-Clark subdivision.
//!
//! Both schemes rebuild the mesh from scratch each pass. Loop subdivision
//! splits every triangle into four; Catmull-Clark turns every `k`-gon into
//! `k` quads. Output vertices are laid out as the updated originals followed
//! by the newly inserted points, so original vertex `i` keeps index `i`.

use nalgebra::{Point3, Vector3};
use tracing::{debug, info};

use crate::adjacency::MeshAdjacency;
use crate::error::{MeshError, MeshResult};
use crate::tracing_ext::OperationTimer;
use crate::{Mesh, PolyMesh, Vertex};

/// Parameters for mesh subdivision.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
#[cfg_attr(feature = "pipeline-config", serde(default))]
pub struct SubdivideParams {
    /// Number of subdivision passes.
    /// Each Loop pass quadruples the triangle count.
    /// Default: 1
    pub iterations: usize,
    /// Move boundary vertices with the 3/4, 1/8, 1/8 curve rule.
    /// When false, boundary vertices keep their positions.
    /// Default: false
    pub smooth_boundary: bool,
}

impl Default for SubdivideParams {
    fn default() -> Self {
        Self {
            iterations: 1,
            smooth_boundary: false,
        }
    }
}

impl SubdivideParams {
    /// Create params for a single subdivision pass.
    pub fn single() -> Self {
        Self::default()
    }

    /// Create params for multiple subdivision passes.
    pub fn with_iterations(iterations: usize) -> Self {
        Self {
            iterations,
            ..Default::default()
        }
    }

    /// Also smooth open boundaries.
    pub fn smooth_boundary(mut self) -> Self {
        self.smooth_boundary = true;
        self
    }
}

/// Result of Loop subdivision.
#[derive(Debug, Clone)]
pub struct SubdivideResult {
    /// The subdivided mesh.
    pub mesh: Mesh,
    /// Original triangle count.
    pub original_faces: usize,
    /// Final triangle count.
    pub final_faces: usize,
    /// Number of passes performed.
    pub iterations_performed: usize,
}

/// Result of Catmull-Clark subdivision.
#[derive(Debug, Clone)]
pub struct CatmullClarkResult {
    /// The subdivided quad mesh.
    pub mesh: PolyMesh,
    /// Original face count.
    pub original_faces: usize,
    /// Final quad count.
    pub final_faces: usize,
    /// Number of passes performed.
    pub iterations_performed: usize,
}

/// Subdivide a triangle mesh with Loop's scheme.
///
/// For a closed mesh with `V` vertices, `E` edges and `F` faces, one pass
/// yields exactly `V + E` vertices and `4F` faces.
///
/// - Interior edges get `3/8 (a + b) + 1/8 (c + d)` where `c`, `d` are the
///   vertices opposite the edge. Boundary and non-manifold edges get the midpoint.
/// - Interior vertices move to `(1 - nβ) v + β Σ neighbours` with `β = 3/16`
///   for valence 3 and `3 / (8n)` otherwise.
///
/// # Example
/// ```
/// use mesh_core::{Mesh, Vertex, subdivide_loop, SubdivideParams};
///
/// let mut mesh = Mesh::new();
/// mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0));
/// mesh.vertices.push(Vertex::from_coords(1.0, 0.0, 0.0));
/// mesh.vertices.push(Vertex::from_coords(0.5, 1.0, 0.0));
/// mesh.faces.push([0, 1, 2]);
///
/// let result = subdivide_loop(&mesh, &SubdivideParams::single()).unwrap();
/// assert_eq!(result.final_faces, 4);
/// ```
pub fn subdivide_loop(mesh: &Mesh, params: &SubdivideParams) -> MeshResult<SubdivideResult> {
    mesh.validate()?;
    if let Some(face_index) = mesh
        .faces
        .iter()
        .position(|&[a, b, c]| a == b || b == c || a == c)
    {
        return Err(MeshError::invalid_topology(format!(
            "face {face_index} repeats a vertex; remove degenerate faces first"
        )));
    }

    let original_faces = mesh.faces.len();
    if original_faces == 0 || params.iterations == 0 {
        return Ok(SubdivideResult {
            mesh: mesh.clone(),
            original_faces,
            final_faces: original_faces,
            iterations_performed: 0,
        });
    }

    let _timer = OperationTimer::for_mesh("subdivide_loop", mesh);
    let mut current = mesh.clone();
    for pass in 0..params.iterations {
        current = loop_pass(&current, params);
        debug!(
            pass,
            vertices = current.vertex_count(),
            faces = current.face_count(),
            "Loop subdivision pass"
        );
    }

    info!(
        faces_before = original_faces,
        faces_after = current.face_count(),
        iterations = params.iterations,
        "Loop subdivision complete"
    );

    Ok(SubdivideResult {
        final_faces: current.faces.len(),
        mesh: current,
        original_faces,
        iterations_performed: params.iterations,
    })
}

fn loop_pass(mesh: &Mesh, params: &SubdivideParams) -> Mesh {
    let adj = MeshAdjacency::build(mesh);
    let vertex_count = mesh.vertices.len();
    let pos = |v: u32| mesh.vertices[v as usize].position.coords;

    let mut vertices: Vec<Vertex> = Vec::with_capacity(vertex_count + adj.edge_count());

    for v in 0..vertex_count as u32 {
        vertices.push(Vertex::new(Point3::from(loop_vertex_position(
            mesh, &adj, v, params,
        ))));
    }

    for (edge_id, key) in adj.edges().iter().enumerate() {
        let (a, b) = key.vertices();
        let faces = adj.faces_of_edge_id(edge_id as u32);
        let p = if faces.len() == 2 {
            let c = opposite_vertex(&mesh.faces[faces[0] as usize], a, b);
            let d = opposite_vertex(&mesh.faces[faces[1] as usize], a, b);
            (pos(a) + pos(b)) * (3.0 / 8.0) + (pos(c) + pos(d)) * (1.0 / 8.0)
        } else {
            (pos(a) + pos(b)) * 0.5
        };
        vertices.push(Vertex::new(Point3::from(p)));
    }

    let edge_vertex = |a: u32, b: u32| -> u32 {
        // Every face edge is in the adjacency; faces with repeated corners were rejected.
        let id = adj.edge_id(a, b).unwrap_or_default();
        vertex_count as u32 + id
    };

    let mut faces = Vec::with_capacity(mesh.faces.len() * 4);
    for &[a, b, c] in &mesh.faces {
        let eab = edge_vertex(a, b);
        let ebc = edge_vertex(b, c);
        let eca = edge_vertex(c, a);
        //        a
        //       / \
        //     eab--eca
        //     / \  / \
        //    b--ebc---c
        faces.push([a, eab, eca]);
        faces.push([eab, b, ebc]);
        faces.push([eca, ebc, c]);
        faces.push([eab, ebc, eca]);
    }

    Mesh { vertices, faces }
}

fn opposite_vertex(face: &[u32; 3], a: u32, b: u32) -> u32 {
    face.iter()
        .copied()
        .find(|&v| v != a && v != b)
        .unwrap_or(a)
}

fn loop_vertex_position(
    mesh: &Mesh,
    adj: &MeshAdjacency,
    v: u32,
    params: &SubdivideParams,
) -> Vector3<f64> {
    let current = mesh.vertices[v as usize].position.coords;
    let neighbors = adj.neighbors(v);
    if neighbors.is_empty() {
        return current;
    }

    if is_boundary_vertex(adj, v) {
        return boundary_vertex_position(mesh, adj, v, params);
    }

    let n = neighbors.len();
    let beta = loop_beta(n);
    let sum: Vector3<f64> = neighbors
        .iter()
        .map(|&w| mesh.vertices[w as usize].position.coords)
        .sum();
    current * (1.0 - n as f64 * beta) + sum * beta
}

/// Touches an edge with a face count other than two.
fn is_boundary_vertex(adj: &MeshAdjacency, v: u32) -> bool {
    adj.neighbors(v)
        .iter()
        .any(|&w| adj.edge_faces(v, w).len() != 2)
}

/// The 3/4, 1/8, 1/8 rule along a simple boundary; other configurations stay put.
fn boundary_vertex_position<V>(
    mesh: &V,
    adj: &MeshAdjacency,
    v: u32,
    params: &SubdivideParams,
) -> Vector3<f64>
where
    V: VertexPositions,
{
    let current = mesh.position(v);
    if !params.smooth_boundary {
        return current;
    }
    let boundary_neighbors: Vec<u32> = adj
        .neighbors(v)
        .iter()
        .copied()
        .filter(|&w| adj.edge_faces(v, w).len() == 1)
        .collect();
    let nonmanifold = adj
        .neighbors(v)
        .iter()
        .any(|&w| adj.edge_faces(v, w).len() > 2);
    if boundary_neighbors.len() != 2 || nonmanifold {
        return current;
    }
    current * 0.75
        + (mesh.position(boundary_neighbors[0]) + mesh.position(boundary_neighbors[1])) * 0.125
}

trait VertexPositions {
    fn position(&self, v: u32) -> Vector3<f64>;
}

impl VertexPositions for Mesh {
    fn position(&self, v: u32) -> Vector3<f64> {
        self.vertices[v as usize].position.coords
    }
}

impl VertexPositions for PolyMesh {
    fn position(&self, v: u32) -> Vector3<f64> {
        self.vertices[v as usize].position.coords
    }
}

/// Loop's vertex weight: `3/16` for valence 3, else `3 / (8n)`.
pub fn loop_beta(valence: usize) -> f64 {
    if valence == 3 {
        3.0 / 16.0
    } else {
        3.0 / (8.0 * valence as f64)
    }
}

/// Subdivide a polygon mesh with the Catmull-Clark scheme.
///
/// Accepts any faces with at least three corners and always returns quads:
/// each `k`-gon becomes `k` quads `(corner, next edge point, face point,
/// previous edge point)`. A closed cube (8 vertices, 6 quads) becomes 26
/// vertices and 24 quads.
pub fn subdivide_catmull_clark(
    mesh: &PolyMesh,
    params: &SubdivideParams,
) -> MeshResult<CatmullClarkResult> {
    mesh.validate()?;
    if let Some(face_index) = mesh.faces.iter().position(|f| has_repeated_corner(f)) {
        return Err(MeshError::invalid_topology(format!(
            "face {face_index} repeats a vertex; remove degenerate faces first"
        )));
    }

    let original_faces = mesh.faces.len();
    if original_faces == 0 || params.iterations == 0 {
        return Ok(CatmullClarkResult {
            mesh: mesh.clone(),
            original_faces,
            final_faces: original_faces,
            iterations_performed: 0,
        });
    }

    let _timer = OperationTimer::with_context(
        "subdivide_catmull_clark",
        mesh.face_count(),
        mesh.vertex_count(),
    );
    let mut current = mesh.clone();
    for pass in 0..params.iterations {
        current = catmull_clark_pass(&current, params);
        debug!(
            pass,
            vertices = current.vertex_count(),
            faces = current.face_count(),
            "Catmull-Clark pass"
        );
    }

    info!(
        faces_before = original_faces,
        faces_after = current.face_count(),
        iterations = params.iterations,
        "Catmull-Clark subdivision complete"
    );

    Ok(CatmullClarkResult {
        final_faces: current.faces.len(),
        mesh: current,
        original_faces,
        iterations_performed: params.iterations,
    })
}

fn has_repeated_corner(face: &[u32]) -> bool {
    (0..face.len()).any(|i| face[i + 1..].contains(&face[i]))
}

fn catmull_clark_pass(mesh: &PolyMesh, params: &SubdivideParams) -> PolyMesh {
    let adj = MeshAdjacency::from_polygons(mesh.vertices.len(), &mesh.faces);
    let vertex_count = mesh.vertices.len();
    let face_base = vertex_count as u32;
    let edge_base = face_base + mesh.faces.len() as u32;

    let face_points: Vec<Vector3<f64>> = mesh
        .faces
        .iter()
        .map(|f| {
            let sum: Vector3<f64> = f.iter().map(|&v| mesh.position(v)).sum();
            sum / f.len() as f64
        })
        .collect();

    let edge_points: Vec<Vector3<f64>> = adj
        .edges()
        .iter()
        .enumerate()
        .map(|(edge_id, key)| {
            let (a, b) = key.vertices();
            let faces = adj.faces_of_edge_id(edge_id as u32);
            if faces.len() == 2 {
                (mesh.position(a)
                    + mesh.position(b)
                    + face_points[faces[0] as usize]
                    + face_points[faces[1] as usize])
                    * 0.25
            } else {
                (mesh.position(a) + mesh.position(b)) * 0.5
            }
        })
        .collect();

    let mut vertices: Vec<Vertex> =
        Vec::with_capacity(vertex_count + face_points.len() + edge_points.len());
    for v in 0..vertex_count as u32 {
        let p = catmull_clark_vertex_position(mesh, &adj, &face_points, v, params);
        vertices.push(Vertex::new(Point3::from(p)));
    }
    vertices.extend(face_points.iter().map(|p| Vertex::new(Point3::from(*p))));
    vertices.extend(edge_points.iter().map(|p| Vertex::new(Point3::from(*p))));

    let edge_vertex =
        |a: u32, b: u32| -> u32 { edge_base + adj.edge_id(a, b).unwrap_or_default() };

    let mut faces = Vec::with_capacity(mesh.faces.iter().map(Vec::len).sum());
    for (fi, face) in mesh.faces.iter().enumerate() {
        let k = face.len();
        let fp = face_base + fi as u32;
        for i in 0..k {
            let v = face[i];
            let next = face[(i + 1) % k];
            let prev = face[(i + k - 1) % k];
            faces.push(vec![v, edge_vertex(v, next), fp, edge_vertex(prev, v)]);
        }
    }

    PolyMesh { vertices, faces }
}

fn catmull_clark_vertex_position(
    mesh: &PolyMesh,
    adj: &MeshAdjacency,
    face_points: &[Vector3<f64>],
    v: u32,
    params: &SubdivideParams,
) -> Vector3<f64> {
    let current = mesh.position(v);
    let neighbors = adj.neighbors(v);
    if neighbors.is_empty() {
        return current;
    }
    if is_boundary_vertex(adj, v) {
        return boundary_vertex_position(mesh, adj, v, params);
    }

    let incident = adj.vertex_faces(v);
    let f_avg: Vector3<f64> = incident
        .iter()
        .map(|&f| face_points[f as usize])
        .sum::<Vector3<f64>>()
        / incident.len() as f64;
    let r_avg: Vector3<f64> = neighbors
        .iter()
        .map(|&w| (current + mesh.position(w)) * 0.5)
        .sum::<Vector3<f64>>()
        / neighbors.len() as f64;
    let n = neighbors.len() as f64;

    (f_avg + r_avg * 2.0 + current * (n - 3.0)) / n
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn make_single_triangle() -> Mesh {
        Mesh {
            vertices: vec![
                Vertex::from_coords(0.0, 0.0, 0.0),
                Vertex::from_coords(1.0, 0.0, 0.0),
                Vertex::from_coords(0.5, 1.0, 0.0),
            ],
            faces: vec![[0, 1, 2]],
        }
    }

    fn make_tetrahedron() -> Mesh {
        let mut mesh = Mesh::new();

        // Regular tetrahedron
        mesh.vertices.push(Vertex::from_coords(1.0, 1.0, 1.0));
        mesh.vertices.push(Vertex::from_coords(1.0, -1.0, -1.0));
        mesh.vertices.push(Vertex::from_coords(-1.0, 1.0, -1.0));
        mesh.vertices.push(Vertex::from_coords(-1.0, -1.0, 1.0));

        mesh.faces.push([0, 1, 2]);
        mesh.faces.push([0, 2, 3]);
        mesh.faces.push([0, 3, 1]);
        mesh.faces.push([1, 3, 2]);

        mesh
    }

    fn make_quad_cube() -> PolyMesh {
        PolyMesh::from_parts(
            [
                Point3::new(-1.0, -1.0, -1.0),
                Point3::new(1.0, -1.0, -1.0),
                Point3::new(1.0, 1.0, -1.0),
                Point3::new(-1.0, 1.0, -1.0),
                Point3::new(-1.0, -1.0, 1.0),
                Point3::new(1.0, -1.0, 1.0),
                Point3::new(1.0, 1.0, 1.0),
                Point3::new(-1.0, 1.0, 1.0),
            ],
            vec![
                vec![0, 3, 2, 1],
                vec![4, 5, 6, 7],
                vec![0, 1, 5, 4],
                vec![2, 3, 7, 6],
                vec![0, 4, 7, 3],
                vec![1, 2, 6, 5],
            ],
        )
    }

    #[test]
    fn test_subdivide_params_default() {
        let params = SubdivideParams::default();
        assert_eq!(params.iterations, 1);
        assert!(!params.smooth_boundary);
        assert!(SubdivideParams::single().smooth_boundary().smooth_boundary);
    }

    #[test]
    fn test_subdivide_single_triangle() {
        let mesh = make_single_triangle();
        let result = subdivide_loop(&mesh, &SubdivideParams::single()).unwrap();

        assert_eq!(result.original_faces, 1);
        assert_eq!(result.final_faces, 4);
        assert_eq!(result.iterations_performed, 1);
        // Original 3 vertices + 3 edge midpoints
        assert_eq!(result.mesh.vertices.len(), 6);
        // All boundary: corners fixed, edge points at midpoints.
        assert_eq!(result.mesh.vertices[0].position, Point3::new(0.0, 0.0, 0.0));
        assert_relative_eq!(result.mesh.vertices[3].position, Point3::new(0.5, 0.0, 0.0));
    }

    #[test]
    fn test_subdivide_tetrahedron_counts() {
        let mesh = make_tetrahedron();
        let result = subdivide_loop(&mesh, &SubdivideParams::single()).unwrap();

        assert_eq!(result.original_faces, 4);
        assert_eq!(result.final_faces, 16);
        // 4 original vertices + 6 edge points
        assert_eq!(result.mesh.vertices.len(), 10);

        let adj = MeshAdjacency::build(&result.mesh);
        assert!(adj.is_watertight());
        assert!(adj.is_manifold());
        // Winding stays outward.
        assert!(result.mesh.signed_volume() > 0.0);
    }

    #[test]
    fn test_loop_counts_follow_v_plus_e() {
        let mesh = make_tetrahedron();
        let result = subdivide_loop(&mesh, &SubdivideParams::with_iterations(2)).unwrap();
        // Pass 1: V=10, E=24, F=16. Pass 2: V=34, F=64.
        assert_eq!(result.mesh.vertex_count(), 34);
        assert_eq!(result.final_faces, 64);
    }

    #[test]
    fn test_loop_shrinks_towards_centroid() {
        let mesh = make_tetrahedron();
        let result = subdivide_loop(&mesh, &SubdivideParams::single()).unwrap();
        // Valence 3: 7/16 v + 3/16 (sum of the others), and the others sum to -v.
        assert_relative_eq!(
            result.mesh.vertices[0].position,
            Point3::new(0.25, 0.25, 0.25),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_smooth_boundary_moves_corners() {
        let mesh = make_single_triangle();
        let result =
            subdivide_loop(&mesh, &SubdivideParams::single().smooth_boundary()).unwrap();
        // 3/4 (0,0,0) + 1/8 (1,0,0) + 1/8 (0.5,1,0)
        assert_relative_eq!(
            result.mesh.vertices[0].position,
            Point3::new(0.1875, 0.125, 0.0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_subdivide_empty_and_zero_iterations() {
        let empty = subdivide_loop(&Mesh::new(), &SubdivideParams::single()).unwrap();
        assert_eq!(empty.final_faces, 0);
        assert_eq!(empty.iterations_performed, 0);

        let tet = make_tetrahedron();
        let same = subdivide_loop(&tet, &SubdivideParams::with_iterations(0)).unwrap();
        assert_eq!(same.mesh, tet);
    }

    #[test]
    fn test_rejects_repeated_corner() {
        let mut mesh = make_single_triangle();
        mesh.faces.push([0, 0, 1]);
        assert!(matches!(
            subdivide_loop(&mesh, &SubdivideParams::single()),
            Err(MeshError::InvalidTopology { .. })
        ));
    }

    #[test]
    fn test_loop_beta_values() {
        assert_relative_eq!(loop_beta(3), 0.1875);
        assert_relative_eq!(loop_beta(6), 0.0625);
        let self_weight_6 = 1.0 - 6.0 * loop_beta(6);
        assert!(self_weight_6 > 0.0 && self_weight_6 < 1.0);
    }

    #[test]
    fn test_catmull_clark_cube() {
        let cube = make_quad_cube();
        let result = subdivide_catmull_clark(&cube, &SubdivideParams::single()).unwrap();
        assert_eq!(result.mesh.vertex_count(), 26);
        assert_eq!(result.final_faces, 24);
        assert!(result.mesh.is_quad_mesh());

        // Valence-3 corner: (F + 2R) / 3 with F = -1/3 and R = -2/3 on every axis.
        assert_relative_eq!(
            result.mesh.vertices[0].position,
            Point3::new(-5.0 / 9.0, -5.0 / 9.0, -5.0 / 9.0),
            epsilon = 1e-12
        );
        // Face points are the face centroids.
        assert_relative_eq!(
            result.mesh.vertices[8].position,
            Point3::new(0.0, 0.0, -1.0),
            epsilon = 1e-12
        );

        let tri = result.mesh.triangulate();
        let adj = MeshAdjacency::build(&tri);
        assert!(adj.is_watertight());
        assert!(tri.signed_volume() > 0.0);
    }

    #[test]
    fn test_catmull_clark_accepts_triangles() {
        let tet = PolyMesh::from(&make_tetrahedron());
        let result = subdivide_catmull_clark(&tet, &SubdivideParams::with_iterations(2)).unwrap();
        // Pass 1: 4 + 4 + 6 = 14 vertices, 12 quads (24 edges).
        // Pass 2: 14 + 12 + 24 = 50 vertices, 48 quads.
        assert_eq!(result.mesh.vertex_count(), 50);
        assert_eq!(result.final_faces, 48);
    }

    #[test]
    fn test_catmull_clark_rejects_bad_arity() {
        let mut cube = make_quad_cube();
        cube.faces.push(vec![0, 1]);
        assert!(matches!(
            subdivide_catmull_clark(&cube, &SubdivideParams::single()),
            Err(MeshError::InvalidFaceArity {
                face_index: 6,
                arity: 2
            })
        ));
    }
}
