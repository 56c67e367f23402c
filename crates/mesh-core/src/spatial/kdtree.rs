//! Median-split KD-tree over 3D points.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use nalgebra::Point3;

use super::Aabb;

const NONE: u32 = u32::MAX;

/// A query hit: index into the original point slice plus squared distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub distance_squared: f64,
}

impl Neighbor {
    /// Euclidean distance to the query point.
    #[inline]
    pub fn distance(&self) -> f64 {
        self.distance_squared.sqrt()
    }
}

// Max-heap entry ordered by distance, ties broken by index.
#[derive(Debug, Clone, Copy)]
struct HeapEntry(Neighbor);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .distance_squared
            .total_cmp(&other.0.distance_squared)
            .then(self.0.index.cmp(&other.0.index))
    }
}

#[derive(Debug, Clone)]
struct KdNode {
    point: u32,
    axis: u8,
    left: u32,
    right: u32,
}

/// A static KD-tree.
///
/// Each node splits on the axis of greatest spread among the points below it,
/// at the median. Query results carry indices into the slice passed to
/// [`KdTree::build`].
#[derive(Debug, Clone)]
pub struct KdTree {
    points: Vec<Point3<f64>>,
    nodes: Vec<KdNode>,
    root: u32,
}

impl KdTree {
    /// Build a tree over `points`. Coordinates are expected to be finite.
    pub fn build(points: &[Point3<f64>]) -> Self {
        let mut indices: Vec<u32> = (0..points.len() as u32).collect();
        let mut nodes = Vec::with_capacity(points.len());
        let root = build_recursive(points, &mut indices, &mut nodes);
        Self {
            points: points.to_vec(),
            nodes,
            root,
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

    /// The indexed points in original order.
    #[inline]
    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    /// Closest point to `query`, or `None` for an empty tree.
    pub fn nearest(&self, query: &Point3<f64>) -> Option<Neighbor> {
        let mut best: Option<Neighbor> = None;
        self.nearest_in(self.root, query, &mut best);
        best
    }

    fn nearest_in(&self, node_id: u32, query: &Point3<f64>, best: &mut Option<Neighbor>) {
        if node_id == NONE {
            return;
        }
        let node = &self.nodes[node_id as usize];
        let p = &self.points[node.point as usize];
        let d2 = (p - query).norm_squared();
        let better = match best {
            Some(b) => {
                d2 < b.distance_squared
                    || (d2 == b.distance_squared && (node.point as usize) < b.index)
            }
            None => true,
        };
        if better {
            *best = Some(Neighbor {
                index: node.point as usize,
                distance_squared: d2,
            });
        }

        let axis = node.axis as usize;
        let diff = query[axis] - p[axis];
        let (near, far) = if diff < 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };
        self.nearest_in(near, query, best);
        if best.is_none_or(|b| diff * diff <= b.distance_squared) {
            self.nearest_in(far, query, best);
        }
    }

    /// The `k` closest points, nearest first.
    pub fn k_nearest(&self, query: &Point3<f64>, k: usize) -> Vec<Neighbor> {
        if k == 0 {
            return Vec::new();
        }
        let mut heap = BinaryHeap::with_capacity(k + 1);
        self.k_nearest_in(self.root, query, k, &mut heap);
        let mut out: Vec<Neighbor> = heap.into_iter().map(|e| e.0).collect();
        sort_neighbors(&mut out);
        out
    }

    fn k_nearest_in(
        &self,
        node_id: u32,
        query: &Point3<f64>,
        k: usize,
        heap: &mut BinaryHeap<HeapEntry>,
    ) {
        if node_id == NONE {
            return;
        }
        let node = &self.nodes[node_id as usize];
        let p = &self.points[node.point as usize];
        let entry = HeapEntry(Neighbor {
            index: node.point as usize,
            distance_squared: (p - query).norm_squared(),
        });
        if heap.len() < k {
            heap.push(entry);
        } else if heap.peek().is_some_and(|worst| entry < *worst) {
            heap.pop();
            heap.push(entry);
        }

        let axis = node.axis as usize;
        let diff = query[axis] - p[axis];
        let (near, far) = if diff < 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };
        self.k_nearest_in(near, query, k, heap);
        let prune = heap.len() == k
            && heap
                .peek()
                .is_some_and(|worst| diff * diff > worst.0.distance_squared);
        if !prune {
            self.k_nearest_in(far, query, k, heap);
        }
    }

    /// All points within `radius` of `query` (inclusive), nearest first.
    pub fn within_radius(&self, query: &Point3<f64>, radius: f64) -> Vec<Neighbor> {
        let mut out = Vec::new();
        if radius < 0.0 || radius.is_nan() {
            return out;
        }
        let r2 = radius * radius;
        let mut stack = vec![self.root];
        while let Some(node_id) = stack.pop() {
            if node_id == NONE {
                continue;
            }
            let node = &self.nodes[node_id as usize];
            let p = &self.points[node.point as usize];
            let d2 = (p - query).norm_squared();
            if d2 <= r2 {
                out.push(Neighbor {
                    index: node.point as usize,
                    distance_squared: d2,
                });
            }
            let axis = node.axis as usize;
            let diff = query[axis] - p[axis];
            if diff - radius <= 0.0 {
                stack.push(node.left);
            }
            if diff + radius >= 0.0 {
                stack.push(node.right);
            }
        }
        sort_neighbors(&mut out);
        out
    }

    /// Indices of all points inside `bounds` (inclusive), ascending.
    pub fn range(&self, bounds: &Aabb) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(node_id) = stack.pop() {
            if node_id == NONE {
                continue;
            }
            let node = &self.nodes[node_id as usize];
            let p = &self.points[node.point as usize];
            if bounds.contains(p) {
                out.push(node.point as usize);
            }
            let axis = node.axis as usize;
            if bounds.min[axis] <= p[axis] {
                stack.push(node.left);
            }
            if bounds.max[axis] >= p[axis] {
                stack.push(node.right);
            }
        }
        out.sort_unstable();
        out
    }
}

fn sort_neighbors(neighbors: &mut [Neighbor]) {
    neighbors.sort_unstable_by(|a, b| {
        a.distance_squared
            .total_cmp(&b.distance_squared)
            .then(a.index.cmp(&b.index))
    });
}

fn build_recursive(points: &[Point3<f64>], indices: &mut [u32], nodes: &mut Vec<KdNode>) -> u32 {
    if indices.is_empty() {
        return NONE;
    }

    let axis = widest_axis(points, indices);
    let mid = indices.len() / 2;
    indices.select_nth_unstable_by(mid, |&a, &b| {
        points[a as usize][axis].total_cmp(&points[b as usize][axis])
    });

    let node_id = nodes.len() as u32;
    nodes.push(KdNode {
        point: indices[mid],
        axis: axis as u8,
        left: NONE,
        right: NONE,
    });

    let (left, rest) = indices.split_at_mut(mid);
    let right = &mut rest[1..];
    let left_id = build_recursive(points, left, nodes);
    let right_id = build_recursive(points, right, nodes);
    let node = &mut nodes[node_id as usize];
    node.left = left_id;
    node.right = right_id;
    node_id
}

fn widest_axis(points: &[Point3<f64>], indices: &[u32]) -> usize {
    let mut min = [f64::INFINITY; 3];
    let mut max = [f64::NEG_INFINITY; 3];
    for &i in indices {
        let p = &points[i as usize];
        for axis in 0..3 {
            min[axis] = min[axis].min(p[axis]);
            max[axis] = max[axis].max(p[axis]);
        }
    }
    (0..3)
        .max_by(|&a, &b| (max[a] - min[a]).total_cmp(&(max[b] - min[b])))
        .unwrap_or(0)
}
