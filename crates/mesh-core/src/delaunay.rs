//! 3D Delaunay tetrahedralization (Bowyer-Watson) and its Voronoi dual.
//!
//! Points are inserted one at a time into a large enclosing tetrahedron. The
//! tetrahedra whose circumsphere strictly contains the new point form a
//! cavity, which is re-triangulated as a star around the point. Tetrahedra
//! touching the enclosing vertices are discarded at the end.
//!
//! # Example
//!
//! ```
//! use mesh_core::delaunay::tetrahedralize;
//! use nalgebra::Point3;
//!
//! let points = [
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(0.0, 1.0, 0.0),
//!     Point3::new(0.0, 0.0, 1.0),
//! ];
//! let tets = tetrahedralize(&points).unwrap();
//! assert_eq!(tets.len(), 1);
//! assert_eq!(tets.surface_mesh().face_count(), 4);
//! ```

use hashbrown::{HashMap, HashSet};
use nalgebra::{Point3, Vector3};
use tracing::{debug, info, warn};

use crate::error::{MeshError, MeshResult};
use crate::math::{circumsphere, orient3d};
use crate::repair::remove_unreferenced_vertices;
use crate::spatial::Aabb;
use crate::tracing_ext::OperationTimer;
use crate::Mesh;

const NO_TET: u32 = u32::MAX;

/// Enclosing tetrahedron size relative to the input's largest extent.
const SUPER_SCALE: f64 = 100.0;

/// Relative shrink of the circumsphere for the strict-inside test.
const INSIDE_TOLERANCE: f64 = 1e-12;

/// Faces of a positively oriented tetrahedron, each wound so the opposite
/// vertex lies on its positive side, paired with that vertex.
const FACES: [([usize; 3], usize); 4] = [
    ([0, 1, 2], 3),
    ([0, 2, 3], 1),
    ([0, 3, 1], 2),
    ([1, 3, 2], 0),
];

/// A tetrahedron of the output, indexing the input point slice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tetrahedron {
    /// Vertex indices, positively oriented.
    pub vertices: [u32; 4],
    /// Center of the circumscribed sphere.
    pub circumcenter: Point3<f64>,
    /// Radius of the circumscribed sphere.
    pub circumradius: f64,
}

impl Tetrahedron {
    /// Volume, given the point slice the indices refer to.
    pub fn volume(&self, points: &[Point3<f64>]) -> f64 {
        let [a, b, c, d] = self.vertices.map(|i| points[i as usize]);
        orient3d(&a, &b, &c, &d) / 6.0
    }

    /// Faces wound outward.
    pub fn outward_faces(&self) -> [[u32; 3]; 4] {
        FACES.map(|(f, _)| [self.vertices[f[0]], self.vertices[f[2]], self.vertices[f[1]]])
    }
}

/// Delaunay tetrahedralization of a point set.
#[derive(Debug, Clone, Default)]
pub struct Tetrahedralization {
    /// The input points, duplicates included.
    pub points: Vec<Point3<f64>>,
    /// Output tetrahedra.
    pub tetrahedra: Vec<Tetrahedron>,
    /// Indices of input points skipped as exact duplicates of earlier ones.
    pub duplicates: Vec<usize>,
}

impl Tetrahedralization {
    /// Number of tetrahedra.
    #[inline]
    pub fn len(&self) -> usize {
        self.tetrahedra.len()
    }

    /// True when no tetrahedron was produced.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tetrahedra.is_empty()
    }

    /// Total volume of all tetrahedra.
    pub fn volume(&self) -> f64 {
        self.tetrahedra.iter().map(|t| t.volume(&self.points)).sum()
    }

    /// Faces used by exactly one tetrahedron, wound outward, in first-seen order.
    pub fn boundary_faces(&self) -> Vec<[u32; 3]> {
        let mut order: Vec<[u32; 3]> = Vec::new();
        let mut counts: HashMap<[u32; 3], (usize, usize)> = HashMap::new();
        for tet in &self.tetrahedra {
            for face in tet.outward_faces() {
                let entry = counts.entry(face_key(face)).or_insert_with(|| {
                    order.push(face);
                    (order.len() - 1, 0)
                });
                entry.1 += 1;
            }
        }
        order
            .into_iter()
            .filter(|f| counts.get(&face_key(*f)).is_some_and(|&(_, n)| n == 1))
            .collect()
    }

    /// The boundary surface as a mesh over the referenced points.
    pub fn surface_mesh(&self) -> Mesh {
        let mut mesh = Mesh::from_parts(self.points.iter().copied(), self.boundary_faces());
        remove_unreferenced_vertices(&mut mesh);
        mesh
    }

    /// Check the empty-sphere property: no input point lies inside any
    /// circumsphere by more than `tolerance` (relative to the radius).
    pub fn is_delaunay(&self, tolerance: f64) -> bool {
        self.tetrahedra.iter().all(|t| {
            let limit = t.circumradius * (1.0 - tolerance);
            self.points.iter().enumerate().all(|(i, p)| {
                t.vertices.contains(&(i as u32)) || (p - t.circumcenter).norm() >= limit
            })
        })
    }

    /// The Voronoi diagram dual to this tetrahedralization.
    pub fn voronoi(&self) -> VoronoiDiagram {
        let vertices: Vec<Point3<f64>> = self.tetrahedra.iter().map(|t| t.circumcenter).collect();

        let mut face_owner: HashMap<[u32; 3], u32> = HashMap::new();
        let mut edges = Vec::new();
        for (ti, tet) in self.tetrahedra.iter().enumerate() {
            for face in tet.outward_faces() {
                match face_owner.remove(&face_key(face)) {
                    Some(other) => edges.push([other, ti as u32]),
                    None => {
                        face_owner.insert(face_key(face), ti as u32);
                    }
                }
            }
        }

        let mut on_hull = vec![false; self.points.len()];
        for face in self.boundary_faces() {
            for v in face {
                on_hull[v as usize] = true;
            }
        }

        let mut cells: Vec<VoronoiCell> = (0..self.points.len())
            .map(|i| VoronoiCell {
                site: i as u32,
                vertices: Vec::new(),
                neighbors: Vec::new(),
                bounded: false,
            })
            .collect();
        for (ti, tet) in self.tetrahedra.iter().enumerate() {
            for &v in &tet.vertices {
                let cell = &mut cells[v as usize];
                cell.vertices.push(ti as u32);
                cell.neighbors
                    .extend(tet.vertices.iter().copied().filter(|&w| w != v));
            }
        }
        for cell in &mut cells {
            cell.neighbors.sort_unstable();
            cell.neighbors.dedup();
            cell.bounded = !cell.vertices.is_empty() && !on_hull[cell.site as usize];
        }

        VoronoiDiagram {
            vertices,
            edges,
            cells,
        }
    }
}

/// The Voronoi dual of a Delaunay tetrahedralization.
#[derive(Debug, Clone, Default)]
pub struct VoronoiDiagram {
    /// One vertex per tetrahedron: its circumcenter.
    pub vertices: Vec<Point3<f64>>,
    /// Pairs of Voronoi vertices whose tetrahedra share a face.
    pub edges: Vec<[u32; 2]>,
    /// One cell per input point.
    pub cells: Vec<VoronoiCell>,
}

/// The Voronoi cell of one input site.
#[derive(Debug, Clone, PartialEq)]
pub struct VoronoiCell {
    /// Index of the input point.
    pub site: u32,
    /// Voronoi vertices (tetrahedron indices) around the site, ascending.
    pub vertices: Vec<u32>,
    /// Sites sharing a Delaunay edge with this one, ascending.
    pub neighbors: Vec<u32>,
    /// False for hull sites, whose true cell extends to infinity, and for
    /// skipped duplicates.
    pub bounded: bool,
}

#[derive(Debug, Clone)]
struct Tet {
    v: [u32; 4],
    center: Point3<f64>,
    radius_squared: f64,
    alive: bool,
}

fn face_key(mut f: [u32; 3]) -> [u32; 3] {
    f.sort_unstable();
    f
}

struct Builder {
    points: Vec<Point3<f64>>,
    tets: Vec<Tet>,
    faces: HashMap<[u32; 3], [u32; 2]>,
    flat_tolerance: f64,
}

impl Builder {
    fn add_tet(&mut self, v: [u32; 4]) {
        let [a, b, c, d] = v.map(|i| self.points[i as usize]);
        // A failed solve makes the tetrahedron conflict with every later point.
        let (center, radius_squared) = circumsphere(&a, &b, &c, &d).unwrap_or_else(|| {
            (
                Point3::from((a.coords + b.coords + c.coords + d.coords) / 4.0),
                f64::INFINITY,
            )
        });
        let id = self.tets.len() as u32;
        for (f, _) in FACES {
            let slot = self
                .faces
                .entry(face_key([v[f[0]], v[f[1]], v[f[2]]]))
                .or_insert([NO_TET; 2]);
            if slot[0] == NO_TET {
                slot[0] = id;
            } else {
                slot[1] = id;
            }
        }
        self.tets.push(Tet {
            v,
            center,
            radius_squared,
            alive: true,
        });
    }

    fn remove_tet(&mut self, id: u32) {
        let v = self.tets[id as usize].v;
        self.tets[id as usize].alive = false;
        for (f, _) in FACES {
            let key = face_key([v[f[0]], v[f[1]], v[f[2]]]);
            if let Some(slot) = self.faces.get_mut(&key) {
                for s in slot.iter_mut() {
                    if *s == id {
                        *s = NO_TET;
                    }
                }
                if *slot == [NO_TET; 2] {
                    self.faces.remove(&key);
                }
            }
        }
    }

    fn neighbor(&self, id: u32, face: [u32; 3]) -> Option<u32> {
        let slot = self.faces.get(&face_key(face))?;
        let other = if slot[0] == id { slot[1] } else { slot[0] };
        (other != NO_TET).then_some(other)
    }

    fn in_conflict(&self, id: u32, p: &Point3<f64>) -> bool {
        let t = &self.tets[id as usize];
        t.alive && (p - t.center).norm_squared() < t.radius_squared * (1.0 - INSIDE_TOLERANCE)
    }

    /// Faces of the cavity not shared with another cavity tetrahedron,
    /// wound toward the cavity, with the tetrahedron across each.
    fn cavity_boundary(
        &self,
        cavity: &[u32],
        members: &HashSet<u32>,
    ) -> Vec<([u32; 3], Option<u32>)> {
        let mut out = Vec::new();
        for &t in cavity {
            let v = self.tets[t as usize].v;
            for (f, _) in FACES {
                let face = [v[f[0]], v[f[1]], v[f[2]]];
                let across = self.neighbor(t, face);
                if across.is_some_and(|n| members.contains(&n)) {
                    continue;
                }
                out.push((face, across));
            }
        }
        out
    }

    fn insert(&mut self, pi: u32) {
        let p = self.points[pi as usize];
        let Some(seed) = (0..self.tets.len() as u32).find(|&t| self.in_conflict(t, &p)) else {
            warn!(point = pi, "Point in no circumsphere, skipped");
            return;
        };

        let mut members: HashSet<u32> = HashSet::new();
        members.insert(seed);
        let mut cavity = vec![seed];
        let mut stack = vec![seed];
        while let Some(t) = stack.pop() {
            let v = self.tets[t as usize].v;
            for (f, _) in FACES {
                if let Some(n) = self.neighbor(t, [v[f[0]], v[f[1]], v[f[2]]]) {
                    if !members.contains(&n) && self.in_conflict(n, &p) {
                        members.insert(n);
                        cavity.push(n);
                        stack.push(n);
                    }
                }
            }
        }

        // Grow the cavity until every boundary face strictly sees the point.
        let boundary = loop {
            let boundary = self.cavity_boundary(&cavity, &members);
            let mut grown = false;
            for (face, across) in &boundary {
                let [a, b, c] = face.map(|i| self.points[i as usize]);
                if orient3d(&a, &b, &c, &p) <= self.flat_tolerance {
                    if let Some(n) = across {
                        if members.insert(*n) {
                            cavity.push(*n);
                            grown = true;
                        }
                    }
                }
            }
            if !grown {
                break boundary;
            }
        };

        for &t in &cavity {
            self.remove_tet(t);
        }
        for (face, _) in boundary {
            let [a, b, c] = face.map(|i| self.points[i as usize]);
            if orient3d(&a, &b, &c, &p) <= self.flat_tolerance {
                warn!(point = pi, "Flat cavity face on the outer hull, skipped");
                continue;
            }
            self.add_tet([face[0], face[1], face[2], pi]);
        }
    }
}

/// Delaunay tetrahedralization of `points`.
///
/// Exact duplicates are skipped and reported in
/// [`Tetrahedralization::duplicates`]. Fewer than 4 distinct points, or a
/// coplanar set, yields an empty result. Non-finite coordinates are an error.
pub fn tetrahedralize(points: &[Point3<f64>]) -> MeshResult<Tetrahedralization> {
    for (i, p) in points.iter().enumerate() {
        for (axis, value) in ["x", "y", "z"].into_iter().zip(p.iter()) {
            if !value.is_finite() {
                return Err(MeshError::invalid_coordinate(i, axis, *value));
            }
        }
    }
    let _timer = OperationTimer::new("tetrahedralize");

    let mut seen: HashMap<[u64; 3], usize> = HashMap::new();
    let mut distinct: Vec<usize> = Vec::new();
    let mut duplicates = Vec::new();
    for (i, p) in points.iter().enumerate() {
        // Adding 0.0 folds -0.0 into +0.0.
        let key = [p.x, p.y, p.z].map(|c| (c + 0.0).to_bits());
        if seen.contains_key(&key) {
            duplicates.push(i);
        } else {
            seen.insert(key, i);
            distinct.push(i);
        }
    }
    if !duplicates.is_empty() {
        debug!(count = duplicates.len(), "Skipping duplicate points");
    }

    let mut result = Tetrahedralization {
        points: points.to_vec(),
        tetrahedra: Vec::new(),
        duplicates,
    };
    if distinct.len() < 4 {
        return Ok(result);
    }

    let bounds = Aabb::from_points(points).ok_or_else(|| MeshError::empty_mesh("no points"))?;
    let extent = bounds.extent().max();
    let scale = if extent > 0.0 { extent } else { 1.0 };
    let center = bounds.center();

    let mut local: Vec<Point3<f64>> = distinct.iter().map(|&i| points[i]).collect();
    let n = local.len() as u32;
    let s = SUPER_SCALE * scale;
    local.extend([
        center + Vector3::new(s, s, s),
        center + Vector3::new(s, -s, -s),
        center + Vector3::new(-s, s, -s),
        center + Vector3::new(-s, -s, s),
    ]);
    let mut super_tet = [n, n + 1, n + 2, n + 3];
    if orient3d(
        &local[super_tet[0] as usize],
        &local[super_tet[1] as usize],
        &local[super_tet[2] as usize],
        &local[super_tet[3] as usize],
    ) < 0.0
    {
        super_tet.swap(0, 1);
    }

    let mut builder = Builder {
        points: local,
        tets: Vec::new(),
        faces: HashMap::new(),
        flat_tolerance: 1e-14 * scale.powi(3),
    };
    builder.add_tet(super_tet);
    for i in 0..n {
        builder.insert(i);
    }

    result.tetrahedra = builder
        .tets
        .iter()
        .filter(|t| t.alive && t.v.iter().all(|&v| v < n))
        .map(|t| Tetrahedron {
            vertices: t.v.map(|v| distinct[v as usize] as u32),
            circumcenter: t.center,
            circumradius: t.radius_squared.sqrt(),
        })
        .collect();

    info!(
        points = points.len(),
        tetrahedra = result.tetrahedra.len(),
        "Tetrahedralization complete"
    );
    Ok(result)
}
