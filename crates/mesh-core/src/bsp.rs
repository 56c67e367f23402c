//! Binary space partition trees over convex polygons.
//!
//! Nodes live in a flat arena and point at their children by index. Every
//! traversal uses an explicit stack, so deep trees built from large meshes do
//! not exhaust the call stack.

use nalgebra::Point3;

use crate::math::Plane;

/// Distance below which a point counts as lying on a splitting plane.
pub const CSG_EPSILON: f64 = 1e-6;

/// A convex planar polygon with the plane it was created on.
///
/// Split pieces keep their parent's plane instead of refitting it, so
/// fragments of one face stay exactly coplanar.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub vertices: Vec<Point3<f64>>,
    pub plane: Plane,

    /// Caller-defined tag carried through splits (the boolean code stores the input mesh).
    pub tag: u32,
}

impl Polygon {
    /// Polygon on the plane of its corners, `None` if they are degenerate.
    pub fn new(vertices: Vec<Point3<f64>>, tag: u32) -> Option<Self> {
        let plane = Plane::from_polygon(&vertices)?;
        Some(Self {
            vertices,
            plane,
            tag,
        })
    }

    /// Reverse orientation.
    pub fn flip(&mut self) {
        self.vertices.reverse();
        self.plane = self.plane.flipped();
    }
}

const COPLANAR: u8 = 0;
const FRONT: u8 = 1;
const BACK: u8 = 2;
const SPANNING: u8 = 3;

/// Where the pieces of a polygon go after [`split_polygon`].
struct SplitTargets<'a> {
    coplanar_front: &'a mut Vec<Polygon>,
    coplanar_back: &'a mut Vec<Polygon>,
    front: &'a mut Vec<Polygon>,
    back: &'a mut Vec<Polygon>,
}

/// Classify `polygon` against `plane` and route it (or its pieces).
///
/// Coplanar polygons go to the coplanar list matching their facing. Spanning
/// polygons are cut in two along the plane.
fn split_polygon(plane: &Plane, polygon: Polygon, epsilon: f64, out: SplitTargets<'_>) {
    let mut polygon_type = COPLANAR;
    let types: Vec<u8> = polygon
        .vertices
        .iter()
        .map(|v| {
            let t = plane.signed_distance(v);
            let ty = if t < -epsilon {
                BACK
            } else if t > epsilon {
                FRONT
            } else {
                COPLANAR
            };
            polygon_type |= ty;
            ty
        })
        .collect();

    match polygon_type {
        COPLANAR => {
            if plane.normal.dot(&polygon.plane.normal) > 0.0 {
                out.coplanar_front.push(polygon);
            } else {
                out.coplanar_back.push(polygon);
            }
        }
        FRONT => out.front.push(polygon),
        BACK => out.back.push(polygon),
        _ => {
            let n = polygon.vertices.len();
            let mut f = Vec::with_capacity(n + 1);
            let mut b = Vec::with_capacity(n + 1);
            for i in 0..n {
                let j = (i + 1) % n;
                let (ti, tj) = (types[i], types[j]);
                let vi = polygon.vertices[i];
                let vj = polygon.vertices[j];
                if ti != BACK {
                    f.push(vi);
                }
                if ti != FRONT {
                    b.push(vi);
                }
                if (ti | tj) == SPANNING {
                    let t = (plane.offset - plane.normal.dot(&vi.coords))
                        / plane.normal.dot(&(vj - vi));
                    let v = vi + (vj - vi) * t;
                    f.push(v);
                    b.push(v);
                }
            }
            if f.len() >= 3 {
                out.front.push(Polygon {
                    vertices: f,
                    plane: polygon.plane,
                    tag: polygon.tag,
                });
            }
            if b.len() >= 3 {
                out.back.push(Polygon {
                    vertices: b,
                    plane: polygon.plane,
                    tag: polygon.tag,
                });
            }
        }
    }
}

const NONE: u32 = u32::MAX;

#[derive(Debug, Clone)]
struct Node {
    plane: Option<Plane>,
    front: u32,
    back: u32,
    coplanar_front: Vec<Polygon>,
    coplanar_back: Vec<Polygon>,
}

impl Node {
    fn empty() -> Self {
        Self {
            plane: None,
            front: NONE,
            back: NONE,
            coplanar_front: Vec::new(),
            coplanar_back: Vec::new(),
        }
    }
}

/// A BSP tree; the region behind every leaf plane is solid.
#[derive(Debug, Clone)]
pub struct BspTree {
    nodes: Vec<Node>,
    epsilon: f64,
}

impl BspTree {
    /// Build a tree from `polygons`, splitting on the first polygon of each subset.
    pub fn build(polygons: Vec<Polygon>, epsilon: f64) -> Self {
        let mut tree = Self {
            nodes: vec![Node::empty()],
            epsilon,
        };
        tree.insert(polygons);
        tree
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Add `polygons` to the tree, growing leaves as needed.
    pub fn insert(&mut self, polygons: Vec<Polygon>) {
        let mut stack = vec![(0u32, polygons)];
        while let Some((id, polygons)) = stack.pop() {
            if polygons.is_empty() {
                continue;
            }
            let idx = id as usize;
            let plane = *self.nodes[idx].plane.get_or_insert(polygons[0].plane);

            let mut front = Vec::new();
            let mut back = Vec::new();
            let mut coplanar_front = std::mem::take(&mut self.nodes[idx].coplanar_front);
            let mut coplanar_back = std::mem::take(&mut self.nodes[idx].coplanar_back);
            for polygon in polygons {
                split_polygon(
                    &plane,
                    polygon,
                    self.epsilon,
                    SplitTargets {
                        coplanar_front: &mut coplanar_front,
                        coplanar_back: &mut coplanar_back,
                        front: &mut front,
                        back: &mut back,
                    },
                );
            }
            self.nodes[idx].coplanar_front = coplanar_front;
            self.nodes[idx].coplanar_back = coplanar_back;

            if !back.is_empty() {
                let child = self.child_or_new(idx, false);
                stack.push((child, back));
            }
            if !front.is_empty() {
                let child = self.child_or_new(idx, true);
                stack.push((child, front));
            }
        }
    }

    fn child_or_new(&mut self, idx: usize, front: bool) -> u32 {
        let existing = if front {
            self.nodes[idx].front
        } else {
            self.nodes[idx].back
        };
        if existing != NONE {
            return existing;
        }
        let id = self.nodes.len() as u32;
        self.nodes.push(Node::empty());
        if front {
            self.nodes[idx].front = id;
        } else {
            self.nodes[idx].back = id;
        }
        id
    }

    /// Turn the solid inside out: flip every polygon and plane and swap children.
    pub fn invert(&mut self) {
        for node in &mut self.nodes {
            for polygon in node.coplanar_front.iter_mut().chain(&mut node.coplanar_back) {
                polygon.flip();
            }
            if let Some(plane) = node.plane.as_mut() {
                *plane = plane.flipped();
            }
            // Coplanar lists keep their meaning: polygon and plane flip together.
            std::mem::swap(&mut node.front, &mut node.back);
        }
    }

    /// Remove the parts of `polygons` that lie inside this tree's solid.
    pub fn clip_polygons(&self, polygons: Vec<Polygon>) -> Vec<Polygon> {
        let mut out = Vec::new();
        let mut stack = vec![(0u32, polygons)];
        while let Some((id, polygons)) = stack.pop() {
            let node = &self.nodes[id as usize];
            let Some(plane) = node.plane else {
                out.extend(polygons);
                continue;
            };
            let mut front = Vec::new();
            let mut back = Vec::new();
            let mut coplanar_front = Vec::new();
            let mut coplanar_back = Vec::new();
            for polygon in polygons {
                split_polygon(
                    &plane,
                    polygon,
                    self.epsilon,
                    SplitTargets {
                        coplanar_front: &mut coplanar_front,
                        coplanar_back: &mut coplanar_back,
                        front: &mut front,
                        back: &mut back,
                    },
                );
            }
            front.extend(coplanar_front);
            back.extend(coplanar_back);

            // Back pieces with no subtree are inside and dropped.
            if node.back != NONE && !back.is_empty() {
                stack.push((node.back, back));
            }
            if node.front != NONE {
                stack.push((node.front, front));
            } else {
                out.extend(front);
            }
        }
        out
    }

    /// Clip every polygon stored in this tree against `other`.
    pub fn clip_to(&mut self, other: &BspTree) {
        for node in &mut self.nodes {
            node.coplanar_front = other.clip_polygons(std::mem::take(&mut node.coplanar_front));
            node.coplanar_back = other.clip_polygons(std::mem::take(&mut node.coplanar_back));
        }
    }

    /// All stored polygons, in pre-order (node, front subtree, back subtree).
    pub fn all_polygons(&self) -> Vec<Polygon> {
        let mut out = Vec::new();
        let mut stack = vec![0u32];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id as usize];
            out.extend(node.coplanar_front.iter().cloned());
            out.extend(node.coplanar_back.iter().cloned());
            if node.back != NONE {
                stack.push(node.back);
            }
            if node.front != NONE {
                stack.push(node.front);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn square(z: f64, up: bool) -> Polygon {
        let mut v = vec![
            Point3::new(0.0, 0.0, z),
            Point3::new(1.0, 0.0, z),
            Point3::new(1.0, 1.0, z),
            Point3::new(0.0, 1.0, z),
        ];
        if !up {
            v.reverse();
        }
        Polygon::new(v, 0).unwrap()
    }

    fn plane_x(offset: f64) -> Plane {
        Plane {
            normal: Vector3::x(),
            offset,
        }
    }

    fn split(plane: &Plane, polygon: Polygon) -> [Vec<Polygon>; 4] {
        let mut out: [Vec<Polygon>; 4] = Default::default();
        let [cf, cb, f, b] = &mut out;
        split_polygon(
            plane,
            polygon,
            CSG_EPSILON,
            SplitTargets {
                coplanar_front: cf,
                coplanar_back: cb,
                front: f,
                back: b,
            },
        );
        out
    }

    #[test]
    fn test_split_spanning_square() {
        let [cf, cb, f, b] = split(&plane_x(0.25), square(0.0, true));
        assert!(cf.is_empty() && cb.is_empty());
        assert_eq!(f.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(f[0].vertices.len(), 4);
        for v in &b[0].vertices {
            assert!(v.x <= 0.25 + 1e-12);
        }
        // Pieces keep the parent plane.
        assert_eq!(f[0].plane, b[0].plane);
    }

    #[test]
    fn test_split_coplanar_by_facing() {
        let plane = Plane {
            normal: Vector3::z(),
            offset: 0.0,
        };
        let [cf, cb, ..] = split(&plane, square(0.0, true));
        assert_eq!((cf.len(), cb.len()), (1, 0));
        let [cf, cb, ..] = split(&plane, square(0.0, false));
        assert_eq!((cf.len(), cb.len()), (0, 1));
        // Within epsilon still counts as on the plane.
        let [cf, ..] = split(&plane, square(1e-7, true));
        assert_eq!(cf.len(), 1);
    }

    #[test]
    fn test_split_touching_vertex_is_one_sided() {
        let tri = Polygon::new(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(1.0, 1.0, 0.0),
            ],
            0,
        )
        .unwrap();
        let [_, _, f, b] = split(&plane_x(0.0), tri);
        assert_eq!((f.len(), b.len()), (1, 0));
    }

    #[test]
    fn test_invert_flips_everything() {
        let mut tree = BspTree::build(vec![square(0.0, true), square(1.0, false)], CSG_EPSILON);
        let before = tree.all_polygons();
        tree.invert();
        let after = tree.all_polygons();
        assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(&after) {
            assert_relative_eq!(a.plane.normal, -b.plane.normal);
        }
    }

    #[test]
    fn test_clip_drops_back_side() {
        // A single plane z = 0 facing up: everything below is solid.
        let tree = BspTree::build(vec![square(0.0, true)], CSG_EPSILON);
        let above = square(0.5, true);
        let below = square(-0.5, true);
        let kept = tree.clip_polygons(vec![above.clone(), below]);
        assert_eq!(kept, vec![above]);
    }

    #[test]
    fn test_deep_tree_builds_iteratively() {
        // Parallel slabs produce a degenerate (list-shaped) tree.
        let polygons: Vec<Polygon> = (0..2000).map(|i| square(i as f64, true)).collect();
        let tree = BspTree::build(polygons, CSG_EPSILON);
        assert_eq!(tree.node_count(), 2000);
        assert_eq!(tree.all_polygons().len(), 2000);
    }
}
