//! Spatial indices over point sets: a median-split KD-tree and a
//! bucketed octree, plus the axis-aligned box both are built from.
//!
//! Both structures store their nodes in a flat arena and refer to children
//! by index. They are built once per query batch and are read-only after
//! construction.

mod kdtree;
mod octree;

pub use kdtree::{KdTree, Neighbor};
pub use octree::{Octree, OctreeParams, VoxelGrid, VoxelizeParams, voxelize_mesh};

use nalgebra::{Point3, Vector3};

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl Aabb {
    /// Box with the given corners.
    #[inline]
    pub fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self { min, max }
    }

    /// Tightest box around `points`, or `None` if empty.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point3<f64>>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = *iter.next()?;
        Some(iter.fold(Self::new(first, first), |b, p| Self {
            min: b.min.inf(p),
            max: b.max.sup(p),
        }))
    }

    /// Box extent per axis.
    #[inline]
    pub fn extent(&self) -> Vector3<f64> {
        self.max - self.min
    }

    /// Box center.
    #[inline]
    pub fn center(&self) -> Point3<f64> {
        nalgebra::center(&self.min, &self.max)
    }

    /// Grow the box by `margin` on every side.
    #[inline]
    pub fn expanded(&self, margin: f64) -> Self {
        let m = Vector3::repeat(margin);
        Self::new(self.min - m, self.max + m)
    }

    /// Smallest cube with the same center that contains this box.
    pub fn to_cube(&self) -> Self {
        let half = self.extent().max() * 0.5;
        let c = self.center();
        let h = Vector3::repeat(half);
        Self::new(c - h, c + h)
    }

    /// Closed containment test.
    #[inline]
    pub fn contains(&self, p: &Point3<f64>) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }

    /// True if the boxes overlap (touching counts).
    #[inline]
    pub fn intersects(&self, other: &Aabb) -> bool {
        (0..3).all(|i| self.min[i] <= other.max[i] && other.min[i] <= self.max[i])
    }

    /// Squared distance from `p` to the box (zero inside).
    #[inline]
    pub fn distance_squared(&self, p: &Point3<f64>) -> f64 {
        (0..3)
            .map(|i| {
                let d = (self.min[i] - p[i]).max(0.0).max(p[i] - self.max[i]);
                d * d
            })
            .sum()
    }

    /// Child octant `i` (bit 0 = +x, bit 1 = +y, bit 2 = +z).
    pub fn octant(&self, i: usize) -> Self {
        let c = self.center();
        let mut min = self.min;
        let mut max = c;
        for axis in 0..3 {
            if i & (1 << axis) != 0 {
                min[axis] = c[axis];
                max[axis] = self.max[axis];
            }
        }
        Self::new(min, max)
    }
}
