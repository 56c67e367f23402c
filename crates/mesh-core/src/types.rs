//! Core mesh data types.

use nalgebra::{Point3, Vector3};

use crate::error::{MeshError, MeshResult};

/// A vertex in the mesh with optional computed attributes.
///
/// The library is unit-agnostic; tolerances are expressed in the same units as positions.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Vertex {
    /// 3D position.
    pub position: Point3<f64>,

    /// Unit normal vector, computed from adjacent faces.
    #[cfg_attr(feature = "pipeline-config", serde(default))]
    pub normal: Option<Vector3<f64>>,
}

impl Vertex {
    /// Create a new vertex with only position set.
    #[inline]
    pub fn new(position: Point3<f64>) -> Self {
        Self {
            position,
            normal: None,
        }
    }

    /// Create a vertex from raw coordinates.
    #[inline]
    pub fn from_coords(x: f64, y: f64, z: f64) -> Self {
        Self::new(Point3::new(x, y, z))
    }
}

/// A triangle mesh with indexed vertices and faces.
///
/// Faces are wound counter-clockwise when seen from outside, so the right-hand
/// rule gives the outward normal.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Mesh {
    /// Vertex data.
    pub vertices: Vec<Vertex>,

    /// Triangle faces as indices into the vertex array.
    pub faces: Vec<[u32; 3]>,
}

impl Mesh {
    /// Create a new empty mesh.
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            faces: Vec::new(),
        }
    }

    /// Create a mesh with pre-allocated capacity.
    pub fn with_capacity(vertex_count: usize, face_count: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(vertex_count),
            faces: Vec::with_capacity(face_count),
        }
    }

    /// Build a mesh from bare positions and triangle indices.
    pub fn from_parts(positions: impl IntoIterator<Item = Point3<f64>>, faces: Vec<[u32; 3]>) -> Self {
        Self {
            vertices: positions.into_iter().map(Vertex::new).collect(),
            faces,
        }
    }

    /// Number of vertices in the mesh.
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of faces (triangles) in the mesh.
    #[inline]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Check if mesh is empty (no vertices or faces).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.faces.is_empty()
    }

    /// Copy of all vertex positions, in index order.
    pub fn positions(&self) -> Vec<Point3<f64>> {
        self.vertices.iter().map(|v| v.position).collect()
    }

    /// Compute the axis-aligned bounding box.
    /// Returns (min_corner, max_corner) or None if mesh has no vertices.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let first = self.vertices.first()?.position;
        let (min, max) = self.vertices[1..]
            .iter()
            .fold((first, first), |(min, max), v| {
                (min.inf(&v.position), max.sup(&v.position))
            });
        Some((min, max))
    }

    /// Iterate over triangles, yielding Triangle structs with actual vertex data.
    ///
    /// Indices must be valid; run [`Mesh::validate`] on untrusted input first.
    pub fn triangles(&self) -> impl Iterator<Item = Triangle> + '_ {
        self.faces.iter().map(|&[i0, i1, i2]| Triangle {
            v0: self.vertices[i0 as usize].position,
            v1: self.vertices[i1 as usize].position,
            v2: self.vertices[i2 as usize].position,
        })
    }

    /// Get a specific triangle by face index.
    pub fn triangle(&self, face_idx: usize) -> Option<Triangle> {
        let &[i0, i1, i2] = self.faces.get(face_idx)?;
        Some(Triangle {
            v0: self.vertices.get(i0 as usize)?.position,
            v1: self.vertices.get(i1 as usize)?.position,
            v2: self.vertices.get(i2 as usize)?.position,
        })
    }

    /// Translate mesh by the given vector.
    pub fn translate(&mut self, offset: Vector3<f64>) {
        for vertex in &mut self.vertices {
            vertex.position += offset;
        }
    }

    /// Scale mesh uniformly around the origin.
    pub fn scale(&mut self, factor: f64) {
        for vertex in &mut self.vertices {
            vertex.position.coords *= factor;
        }
    }

    /// Compute the signed volume of the mesh.
    ///
    /// Sum of signed tetrahedra formed by each face and the origin. Positive for a
    /// closed mesh with outward-facing normals; only meaningful for closed meshes.
    pub fn signed_volume(&self) -> f64 {
        self.triangles()
            .map(|tri| tri.v0.coords.dot(&tri.v1.coords.cross(&tri.v2.coords)))
            .sum::<f64>()
            / 6.0
    }

    /// Absolute value of [`Mesh::signed_volume`].
    #[inline]
    pub fn volume(&self) -> f64 {
        self.signed_volume().abs()
    }

    /// Check if the mesh appears to be inside-out (negative signed volume).
    #[inline]
    pub fn is_inside_out(&self) -> bool {
        self.signed_volume() < 0.0
    }

    /// Compute the total surface area of the mesh.
    pub fn surface_area(&self) -> f64 {
        self.triangles().map(|tri| tri.area()).sum()
    }

    /// Check face indices and coordinates, failing on the first problem.
    pub fn validate(&self) -> MeshResult<()> {
        crate::validate::validate_mesh_data_strict(self)
    }
}

impl Default for Mesh {
    fn default() -> Self {
        Self::new()
    }
}

/// A polygon mesh whose faces may have any number (≥ 3) of corners.
///
/// Used by Catmull-Clark subdivision, which accepts n-gons and produces quads.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct PolyMesh {
    /// Vertex data.
    pub vertices: Vec<Vertex>,

    /// Polygon faces as counter-clockwise index loops.
    pub faces: Vec<Vec<u32>>,
}

impl PolyMesh {
    /// Create a new empty polygon mesh.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a polygon mesh from bare positions and index loops.
    pub fn from_parts(
        positions: impl IntoIterator<Item = Point3<f64>>,
        faces: Vec<Vec<u32>>,
    ) -> Self {
        Self {
            vertices: positions.into_iter().map(Vertex::new).collect(),
            faces,
        }
    }

    /// Number of vertices.
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of polygon faces.
    #[inline]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// True when every face has exactly four corners.
    pub fn is_quad_mesh(&self) -> bool {
        !self.faces.is_empty() && self.faces.iter().all(|f| f.len() == 4)
    }

    /// Check face arity, indices and coordinates.
    pub fn validate(&self) -> MeshResult<()> {
        let vertex_count = self.vertices.len();
        for (face_index, face) in self.faces.iter().enumerate() {
            if face.len() < 3 {
                return Err(MeshError::InvalidFaceArity {
                    face_index,
                    arity: face.len(),
                });
            }
            if let Some(&bad) = face.iter().find(|&&v| v as usize >= vertex_count) {
                return Err(MeshError::invalid_vertex_index(face_index, bad, vertex_count));
            }
        }
        crate::validate::check_coordinates(self.vertices.iter().map(|v| &v.position))
    }

    /// Fan-triangulate every face around its first corner.
    ///
    /// Produces `k - 2` triangles for a `k`-gon; suitable for convex faces,
    /// which is what subdivision and CSG output.
    pub fn triangulate(&self) -> Mesh {
        let tri_count = self.faces.iter().map(|f| f.len().saturating_sub(2)).sum();
        let mut faces = Vec::with_capacity(tri_count);
        for face in &self.faces {
            for i in 1..face.len().saturating_sub(1) {
                faces.push([face[0], face[i], face[i + 1]]);
            }
        }
        Mesh {
            vertices: self.vertices.clone(),
            faces,
        }
    }
}

impl From<&Mesh> for PolyMesh {
    fn from(mesh: &Mesh) -> Self {
        Self {
            vertices: mesh.vertices.clone(),
            faces: mesh.faces.iter().map(|f| f.to_vec()).collect(),
        }
    }
}

/// A triangle with concrete vertex positions (not indices).
#[derive(Debug, Clone, Copy)]
pub struct Triangle {
    pub v0: Point3<f64>,
    pub v1: Point3<f64>,
    pub v2: Point3<f64>,
}

impl Triangle {
    /// Create a new triangle from three vertices.
    #[inline]
    pub fn new(v0: Point3<f64>, v1: Point3<f64>, v2: Point3<f64>) -> Self {
        Self { v0, v1, v2 }
    }

    /// Compute the unnormalized normal vector (cross product of edges).
    /// Its length is twice the triangle area.
    #[inline]
    pub fn normal_unnormalized(&self) -> Vector3<f64> {
        (self.v1 - self.v0).cross(&(self.v2 - self.v0))
    }

    /// Compute the unit normal vector.
    /// Returns None for degenerate triangles.
    #[inline]
    pub fn normal(&self) -> Option<Vector3<f64>> {
        crate::math::try_normalize(&self.normal_unnormalized())
    }

    /// Compute the area of the triangle.
    #[inline]
    pub fn area(&self) -> f64 {
        self.normal_unnormalized().norm() * 0.5
    }

    /// Compute the centroid of the triangle.
    #[inline]
    pub fn centroid(&self) -> Point3<f64> {
        Point3::from((self.v0.coords + self.v1.coords + self.v2.coords) / 3.0)
    }

    /// Lengths of the three edges (v0-v1, v1-v2, v2-v0).
    #[inline]
    pub fn edge_lengths(&self) -> [f64; 3] {
        [
            (self.v1 - self.v0).norm(),
            (self.v2 - self.v1).norm(),
            (self.v0 - self.v2).norm(),
        ]
    }

    /// Longest edge divided by the shortest; infinite for collapsed edges.
    pub fn aspect_ratio(&self) -> f64 {
        let [a, b, c] = self.edge_lengths();
        let min = a.min(b).min(c);
        if min <= f64::EPSILON {
            return f64::INFINITY;
        }
        a.max(b).max(c) / min
    }
}
