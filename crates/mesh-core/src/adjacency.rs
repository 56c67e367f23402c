//! Derived mesh adjacency: edge → faces, vertex → faces, vertex → neighbours.
//!
//! Adjacency is rebuilt from the face list on every call that needs it and
//! never cached on the mesh. Edges are recorded in first-seen order (faces
//! in index order, edges in corner order), so every iteration below is
//! deterministic regardless of hash seeds.

use hashbrown::HashMap;

use crate::Mesh;

/// An undirected edge packed into one `u64`: `(min << 32) | max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey(u64);

impl EdgeKey {
    /// Key for the undirected edge between `a` and `b`.
    #[inline]
    pub fn new(a: u32, b: u32) -> Self {
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        Self(((lo as u64) << 32) | hi as u64)
    }

    /// The two endpoints, smaller index first.
    #[inline]
    pub fn vertices(self) -> (u32, u32) {
        ((self.0 >> 32) as u32, self.0 as u32)
    }

    /// The raw packed value.
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// A directed edge `from → to`, packed the same way without reordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirectedEdge(u64);

impl DirectedEdge {
    #[inline]
    pub fn new(from: u32, to: u32) -> Self {
        Self(((from as u64) << 32) | to as u64)
    }

    #[inline]
    pub fn from(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[inline]
    pub fn to(self) -> u32 {
        self.0 as u32
    }

    #[inline]
    pub fn reversed(self) -> Self {
        Self::new(self.to(), self.from())
    }
}

/// Adjacency tables for a polygon or triangle face list.
#[derive(Debug, Clone)]
pub struct MeshAdjacency {
    edges: Vec<EdgeKey>,
    edge_index: HashMap<EdgeKey, u32>,
    edge_faces: Vec<Vec<u32>>,
    vertex_faces: Vec<Vec<u32>>,
    vertex_neighbors: Vec<Vec<u32>>,
}

impl MeshAdjacency {
    /// Build adjacency for a triangle mesh.
    pub fn build(mesh: &Mesh) -> Self {
        Self::from_polygons(mesh.vertices.len(), &mesh.faces)
    }

    /// Build adjacency for any face list (`[u32; 3]`, `Vec<u32>`, ...).
    ///
    /// Face indices must be `< vertex_count`.
    pub fn from_polygons<F: AsRef<[u32]>>(vertex_count: usize, faces: &[F]) -> Self {
        let mut edges = Vec::new();
        let mut edge_index: HashMap<EdgeKey, u32> = HashMap::new();
        let mut edge_faces: Vec<Vec<u32>> = Vec::new();
        let mut vertex_faces = vec![Vec::new(); vertex_count];
        let mut vertex_neighbors = vec![Vec::new(); vertex_count];

        for (face_idx, face) in faces.iter().enumerate() {
            let face = face.as_ref();
            let n = face.len();
            for (corner, &v) in face.iter().enumerate() {
                let faces_of_v: &mut Vec<u32> = &mut vertex_faces[v as usize];
                if faces_of_v.last() != Some(&(face_idx as u32)) {
                    faces_of_v.push(face_idx as u32);
                }

                let w = face[(corner + 1) % n];
                if v == w {
                    continue;
                }
                let key = EdgeKey::new(v, w);
                let idx = *edge_index.entry(key).or_insert_with(|| {
                    edges.push(key);
                    edge_faces.push(Vec::new());
                    (edges.len() - 1) as u32
                });
                let incident = &mut edge_faces[idx as usize];
                if incident.last() != Some(&(face_idx as u32)) {
                    incident.push(face_idx as u32);
                }
            }
        }

        for key in &edges {
            let (a, b) = key.vertices();
            vertex_neighbors[a as usize].push(b);
            vertex_neighbors[b as usize].push(a);
        }
        for neighbors in &mut vertex_neighbors {
            neighbors.sort_unstable();
            neighbors.dedup();
        }

        Self {
            edges,
            edge_index,
            edge_faces,
            vertex_faces,
            vertex_neighbors,
        }
    }

    /// Number of distinct undirected edges.
    #[inline]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// All edges in first-seen order.
    #[inline]
    pub fn edges(&self) -> &[EdgeKey] {
        &self.edges
    }

    /// Dense index of an edge, if it exists.
    #[inline]
    pub fn edge_id(&self, a: u32, b: u32) -> Option<u32> {
        self.edge_index.get(&EdgeKey::new(a, b)).copied()
    }

    /// Faces incident to the edge with dense index `edge_id`.
    #[inline]
    pub fn faces_of_edge_id(&self, edge_id: u32) -> &[u32] {
        &self.edge_faces[edge_id as usize]
    }

    /// Faces incident to edge `(a, b)`, in face-index order.
    pub fn edge_faces(&self, a: u32, b: u32) -> &[u32] {
        match self.edge_id(a, b) {
            Some(id) => &self.edge_faces[id as usize],
            None => &[],
        }
    }

    /// Faces incident to vertex `v`, in face-index order.
    #[inline]
    pub fn vertex_faces(&self, v: u32) -> &[u32] {
        &self.vertex_faces[v as usize]
    }

    /// Sorted one-ring neighbours of vertex `v`.
    #[inline]
    pub fn neighbors(&self, v: u32) -> &[u32] {
        &self.vertex_neighbors[v as usize]
    }

    /// Edges used by exactly one face.
    pub fn boundary_edges(&self) -> impl Iterator<Item = EdgeKey> + '_ {
        self.edges
            .iter()
            .zip(&self.edge_faces)
            .filter(|(_, faces)| faces.len() == 1)
            .map(|(key, _)| *key)
    }

    /// Edges used by more than two faces.
    pub fn non_manifold_edges(&self) -> impl Iterator<Item = EdgeKey> + '_ {
        self.edges
            .iter()
            .zip(&self.edge_faces)
            .filter(|(_, faces)| faces.len() > 2)
            .map(|(key, _)| *key)
    }

    /// Number of boundary edges.
    pub fn boundary_edge_count(&self) -> usize {
        self.edge_faces.iter().filter(|f| f.len() == 1).count()
    }

    /// Number of non-manifold edges.
    pub fn non_manifold_edge_count(&self) -> usize {
        self.edge_faces.iter().filter(|f| f.len() > 2).count()
    }

    /// Per-vertex flag: touches at least one boundary or non-manifold edge.
    pub fn boundary_vertices(&self) -> Vec<bool> {
        let mut flags = vec![false; self.vertex_faces.len()];
        for (key, faces) in self.edges.iter().zip(&self.edge_faces) {
            if faces.len() != 2 {
                let (a, b) = key.vertices();
                flags[a as usize] = true;
                flags[b as usize] = true;
            }
        }
        flags
    }

    /// No boundary edges.
    #[inline]
    pub fn is_watertight(&self) -> bool {
        self.boundary_edge_count() == 0
    }

    /// No edge with more than two faces.
    #[inline]
    pub fn is_manifold(&self) -> bool {
        self.non_manifold_edge_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    fn two_triangles() -> Mesh {
        Mesh::from_parts(
            [
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(1.0, 1.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        )
    }

    #[test]
    fn test_edge_key_roundtrip_is_canonical() {
        assert_eq!(EdgeKey::new(7, 3), EdgeKey::new(3, 7));
        assert_eq!(EdgeKey::new(7, 3).vertices(), (3, 7));
        let big = EdgeKey::new(u32::MAX, 1);
        assert_eq!(big.vertices(), (1, u32::MAX));
    }

    #[test]
    fn test_directed_edge_reverse() {
        let e = DirectedEdge::new(4, 9);
        assert_eq!(e.from(), 4);
        assert_eq!(e.to(), 9);
        assert_eq!(e.reversed(), DirectedEdge::new(9, 4));
        assert_ne!(e, e.reversed());
    }

    #[test]
    fn test_two_triangle_adjacency() {
        let adj = MeshAdjacency::build(&two_triangles());
        assert_eq!(adj.edge_count(), 5);
        assert_eq!(adj.boundary_edge_count(), 4);
        assert_eq!(adj.edge_faces(0, 2), &[0, 1]);
        assert_eq!(adj.neighbors(0), &[1, 2, 3]);
        assert_eq!(adj.vertex_faces(2), &[0, 1]);
        assert!(!adj.is_watertight());
        assert!(adj.is_manifold());
        // Edges come out in first-seen order.
        assert_eq!(adj.edges()[0], EdgeKey::new(0, 1));
    }

    #[test]
    fn test_non_manifold_edge_detected() {
        let mut mesh = two_triangles();
        mesh.vertices.push(crate::Vertex::from_coords(0.5, 0.5, 1.0));
        mesh.faces.push([0, 2, 4]);
        let adj = MeshAdjacency::build(&mesh);
        assert_eq!(adj.non_manifold_edge_count(), 1);
        assert_eq!(adj.non_manifold_edges().next(), Some(EdgeKey::new(0, 2)));
        assert!(adj.boundary_vertices()[0]);
    }

    #[test]
    fn test_quad_faces() {
        let faces = vec![vec![0u32, 1, 2, 3]];
        let adj = MeshAdjacency::from_polygons(4, &faces);
        assert_eq!(adj.edge_count(), 4);
        assert_eq!(adj.neighbors(0), &[1, 3]);
    }
}
