//! Geometry kernel: vector helpers, small dense solvers, planes and
//! the handful of predicates the algorithms share.
//!
//! Every function here is total: singular inputs produce `None` or a
//! documented fallback value, never NaN.

use nalgebra::{Matrix3, Point3, SMatrix, SVector, SymmetricEigen, Vector3};

/// Lengths at or below this are treated as zero.
pub const EPSILON: f64 = 1e-12;

/// Normalize `v`, or return `None` if it is (numerically) zero.
#[inline]
pub fn try_normalize(v: &Vector3<f64>) -> Option<Vector3<f64>> {
    let len = v.norm();
    if len <= EPSILON || !len.is_finite() {
        None
    } else {
        Some(v / len)
    }
}

/// Normalize `v`, falling back to +Z for zero-length input.
#[inline]
pub fn safe_normalize(v: &Vector3<f64>) -> Vector3<f64> {
    try_normalize(v).unwrap_or_else(Vector3::z)
}

/// Unnormalized normal of triangle `(a, b, c)`; its length is twice the area.
#[inline]
pub fn triangle_normal_raw(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>) -> Vector3<f64> {
    (b - a).cross(&(c - a))
}

/// Unit normal of triangle `(a, b, c)`, or `None` if degenerate.
#[inline]
pub fn triangle_normal(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>) -> Option<Vector3<f64>> {
    try_normalize(&triangle_normal_raw(a, b, c))
}

/// Area of triangle `(a, b, c)`.
#[inline]
pub fn triangle_area(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>) -> f64 {
    0.5 * triangle_normal_raw(a, b, c).norm()
}

/// Cross-product matrix `[v]×` such that `skew(v) * w == v.cross(&w)`.
#[inline]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Cotangent of the angle between `u` and `v`.
///
/// Returns `None` when either vector is zero or they are parallel.
#[inline]
pub fn cotangent(u: &Vector3<f64>, v: &Vector3<f64>) -> Option<f64> {
    let sin = u.cross(v).norm();
    if sin <= EPSILON * u.norm().max(1.0) * v.norm().max(1.0) {
        return None;
    }
    Some(u.dot(v) / sin)
}

/// Solve `a * x = b` by Gauss-Jordan elimination with partial pivoting.
///
/// Returns `None` when a pivot falls below `EPSILON` times the largest
/// absolute entry of `a`.
pub fn solve_linear<const N: usize>(
    a: &SMatrix<f64, N, N>,
    b: &SVector<f64, N>,
) -> Option<SVector<f64, N>> {
    let scale = a.amax();
    if scale <= 0.0 || !scale.is_finite() {
        return None;
    }
    let mut m = *a;
    let mut rhs = *b;

    for col in 0..N {
        let pivot_row = (col..N)
            .max_by(|&i, &j| m[(i, col)].abs().total_cmp(&m[(j, col)].abs()))
            .unwrap_or(col);
        let pivot = m[(pivot_row, col)];
        if pivot.abs() <= EPSILON * scale {
            return None;
        }
        if pivot_row != col {
            m.swap_rows(pivot_row, col);
            rhs.swap_rows(pivot_row, col);
        }

        let inv = 1.0 / m[(col, col)];
        for k in col..N {
            m[(col, k)] *= inv;
        }
        rhs[col] *= inv;

        for row in 0..N {
            if row == col {
                continue;
            }
            let factor = m[(row, col)];
            if factor == 0.0 {
                continue;
            }
            for k in col..N {
                m[(row, k)] -= factor * m[(col, k)];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    rhs.iter().all(|x| x.is_finite()).then_some(rhs)
}

/// Solve a 3×3 system, or `None` if singular.
#[inline]
pub fn solve3(a: &Matrix3<f64>, b: &Vector3<f64>) -> Option<Vector3<f64>> {
    solve_linear::<3>(a, b)
}

/// An oriented plane `normal · p = offset` with unit `normal`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vector3<f64>,
    pub offset: f64,
}

impl Plane {
    /// Plane through `point` with the given (non-zero) normal.
    pub fn from_point_normal(point: &Point3<f64>, normal: &Vector3<f64>) -> Option<Self> {
        let normal = try_normalize(normal)?;
        Some(Self {
            normal,
            offset: normal.dot(&point.coords),
        })
    }

    /// Plane through three points, oriented by the right-hand rule.
    pub fn from_points(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>) -> Option<Self> {
        Self::from_point_normal(a, &triangle_normal_raw(a, b, c))
    }

    /// Plane of a polygon, using Newell's method for the normal so that
    /// nearly collinear leading corners do not matter.
    pub fn from_polygon(points: &[Point3<f64>]) -> Option<Self> {
        if points.len() < 3 {
            return None;
        }
        let mut normal = Vector3::zeros();
        let mut centroid = Vector3::zeros();
        for (i, p) in points.iter().enumerate() {
            let q = &points[(i + 1) % points.len()];
            normal.x += (p.y - q.y) * (p.z + q.z);
            normal.y += (p.z - q.z) * (p.x + q.x);
            normal.z += (p.x - q.x) * (p.y + q.y);
            centroid += p.coords;
        }
        centroid /= points.len() as f64;
        Self::from_point_normal(&Point3::from(centroid), &normal)
    }

    /// Signed distance from `p` to the plane (positive on the normal side).
    #[inline]
    pub fn signed_distance(&self, p: &Point3<f64>) -> f64 {
        self.normal.dot(&p.coords) - self.offset
    }

    /// The same plane facing the other way.
    #[inline]
    pub fn flipped(&self) -> Self {
        Self {
            normal: -self.normal,
            offset: -self.offset,
        }
    }

    /// Homogeneous coefficients `(a, b, c, d)` with `ax + by + cz + d = 0`.
    #[inline]
    pub fn coefficients(&self) -> [f64; 4] {
        [self.normal.x, self.normal.y, self.normal.z, -self.offset]
    }
}

/// Least-squares plane through a point set.
///
/// The normal is the eigenvector of the covariance matrix with the smallest
/// eigenvalue. Returns `None` for fewer than 3 points or a degenerate spread.
/// The sign of the normal is arbitrary.
pub fn fit_plane(points: &[Point3<f64>]) -> Option<Plane> {
    if points.len() < 3 {
        return None;
    }
    let n = points.len() as f64;
    let centroid = points.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / n;
    let mut cov = Matrix3::zeros();
    for p in points {
        let d = p.coords - centroid;
        cov += d * d.transpose();
    }
    cov /= n;
    if cov.amax() <= EPSILON {
        return None;
    }

    let eigen = SymmetricEigen::new(cov);
    let smallest = eigen.eigenvalues.imin();
    let normal = eigen.eigenvectors.column(smallest).into_owned();
    Plane::from_point_normal(&Point3::from(centroid), &normal)
}

/// Six times the signed volume of tetrahedron `(a, b, c, d)`.
///
/// Positive when `d` lies on the side of `(b - a) × (c - a)`.
#[inline]
pub fn orient3d(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>, d: &Point3<f64>) -> f64 {
    (b - a).dot(&(c - a).cross(&(d - a)))
}

/// Circumscribed sphere of a tetrahedron as `(center, radius²)`.
///
/// Returns `None` when the four points are (nearly) coplanar.
pub fn circumsphere(
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
    d: &Point3<f64>,
) -> Option<(Point3<f64>, f64)> {
    let ab = b - a;
    let ac = c - a;
    let ad = d - a;
    let m = Matrix3::from_rows(&[ab.transpose(), ac.transpose(), ad.transpose()]);
    let rhs = Vector3::new(ab.norm_squared(), ac.norm_squared(), ad.norm_squared()) * 0.5;
    let offset = solve3(&m, &rhs)?;
    Some((a + offset, offset.norm_squared()))
}

/// Closest point to `p` on triangle `(a, b, c)`.
///
/// Region-based method from Ericson, *Real-Time Collision Detection* §5.1.5.
pub fn closest_point_on_triangle(
    p: &Point3<f64>,
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
) -> Point3<f64> {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return *a;
    }

    let bp = p - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return *b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let denom = d1 - d3;
        let v = if denom.abs() > EPSILON { d1 / denom } else { 0.0 };
        return a + ab * v;
    }

    let cp = p - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return *c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let denom = d2 - d6;
        let w = if denom.abs() > EPSILON { d2 / denom } else { 0.0 };
        return a + ac * w;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let denom = (d4 - d3) + (d5 - d6);
        let w = if denom.abs() > EPSILON {
            (d4 - d3) / denom
        } else {
            0.0
        };
        return b + (c - b) * w;
    }

    let sum = va + vb + vc;
    if sum.abs() <= EPSILON {
        // Degenerate triangle: fall back to the nearest corner.
        return [*a, *b, *c]
            .into_iter()
            .min_by(|x, y| (x - p).norm_squared().total_cmp(&(y - p).norm_squared()))
            .unwrap_or(*a);
    }
    let denom = 1.0 / sum;
    let v = vb * denom;
    let w = vc * denom;
    a + ab * v + ac * w
}

/// Signed solid angle subtended by triangle `(a, b, c)` at `p`
/// (Van Oosterom & Strackee). Summing over a closed, outward-wound surface
/// gives `4π` inside and `0` outside.
pub fn solid_angle(p: &Point3<f64>, a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>) -> f64 {
    let ra = a - p;
    let rb = b - p;
    let rc = c - p;
    let la = ra.norm();
    let lb = rb.norm();
    let lc = rc.norm();
    if la <= EPSILON || lb <= EPSILON || lc <= EPSILON {
        return 0.0;
    }
    let numerator = ra.dot(&rb.cross(&rc));
    let denominator = la * lb * lc + ra.dot(&rb) * lc + rb.dot(&rc) * la + rc.dot(&ra) * lb;
    2.0 * numerator.atan2(denominator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix6, Vector6};

    #[test]
    fn test_safe_normalize_zero_falls_back() {
        assert_eq!(safe_normalize(&Vector3::zeros()), Vector3::z());
        let n = safe_normalize(&Vector3::new(3.0, 0.0, 4.0));
        assert_relative_eq!(n.norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_solve3_matches_inverse() {
        let a = Matrix3::new(4.0, 1.0, 0.0, 1.0, 3.0, 1.0, 0.0, 1.0, 2.0);
        let x = Vector3::new(1.0, -2.0, 0.5);
        let b = a * x;
        let solved = solve3(&a, &b).unwrap();
        assert_relative_eq!(solved, x, epsilon = 1e-10);
    }

    #[test]
    fn test_solve3_singular() {
        let a = Matrix3::new(1.0, 2.0, 3.0, 2.0, 4.0, 6.0, 0.0, 1.0, 1.0);
        assert!(solve3(&a, &Vector3::new(1.0, 2.0, 3.0)).is_none());
        assert!(solve3(&Matrix3::zeros(), &Vector3::x()).is_none());
    }

    #[test]
    fn test_solve_linear_6x6_needs_pivoting() {
        // Zero on the leading diagonal forces a row swap.
        let mut a = Matrix6::identity() * 2.0;
        a[(0, 0)] = 0.0;
        a[(0, 1)] = 1.0;
        a[(1, 0)] = 1.0;
        let x = Vector6::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0);
        let b = a * x;
        let solved = solve_linear::<6>(&a, &b).unwrap();
        assert_relative_eq!(solved, x, epsilon = 1e-10);
    }

    #[test]
    fn test_fit_plane_recovers_z_plane() {
        let points: Vec<Point3<f64>> = (0..5)
            .flat_map(|i| (0..5).map(move |j| Point3::new(i as f64, j as f64, 2.0)))
            .collect();
        let plane = fit_plane(&points).unwrap();
        assert_relative_eq!(plane.normal.z.abs(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(plane.signed_distance(&Point3::new(7.0, -3.0, 2.0)), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_fit_plane_degenerate() {
        assert!(fit_plane(&[Point3::origin(), Point3::origin(), Point3::origin()]).is_none());
        assert!(fit_plane(&[Point3::origin(), Point3::new(1.0, 0.0, 0.0)]).is_none());
    }

    #[test]
    fn test_plane_from_polygon_orientation() {
        let square = [
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(1.0, 0.0, 1.0),
            Point3::new(1.0, 1.0, 1.0),
            Point3::new(0.0, 1.0, 1.0),
        ];
        let plane = Plane::from_polygon(&square).unwrap();
        assert_relative_eq!(plane.normal, Vector3::z(), epsilon = 1e-12);
        assert_relative_eq!(plane.offset, 1.0, epsilon = 1e-12);
        assert_relative_eq!(plane.flipped().signed_distance(&Point3::origin()), 1.0);
    }

    #[test]
    fn test_circumsphere_of_corner_tetrahedron() {
        let (center, r2) = circumsphere(
            &Point3::new(0.0, 0.0, 0.0),
            &Point3::new(1.0, 0.0, 0.0),
            &Point3::new(0.0, 1.0, 0.0),
            &Point3::new(0.0, 0.0, 1.0),
        )
        .unwrap();
        assert_relative_eq!(center, Point3::new(0.5, 0.5, 0.5), epsilon = 1e-12);
        assert_relative_eq!(r2, 0.75, epsilon = 1e-12);
    }

    #[test]
    fn test_circumsphere_coplanar_is_none() {
        assert!(
            circumsphere(
                &Point3::new(0.0, 0.0, 0.0),
                &Point3::new(1.0, 0.0, 0.0),
                &Point3::new(0.0, 1.0, 0.0),
                &Point3::new(1.0, 1.0, 0.0),
            )
            .is_none()
        );
    }

    #[test]
    fn test_closest_point_regions() {
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(1.0, 0.0, 0.0);
        let c = Point3::new(0.0, 1.0, 0.0);
        // Face interior
        let q = closest_point_on_triangle(&Point3::new(0.2, 0.2, 3.0), &a, &b, &c);
        assert_relative_eq!(q, Point3::new(0.2, 0.2, 0.0), epsilon = 1e-12);
        // Vertex region
        let q = closest_point_on_triangle(&Point3::new(-1.0, -1.0, 0.0), &a, &b, &c);
        assert_relative_eq!(q, a, epsilon = 1e-12);
        // Hypotenuse edge
        let q = closest_point_on_triangle(&Point3::new(1.0, 1.0, 0.0), &a, &b, &c);
        assert_relative_eq!(q, Point3::new(0.5, 0.5, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_cotangent_right_angle_is_zero() {
        let cot = cotangent(&Vector3::x(), &Vector3::y()).unwrap();
        assert_relative_eq!(cot, 0.0, epsilon = 1e-12);
        assert!(cotangent(&Vector3::x(), &(Vector3::x() * 2.0)).is_none());
    }

    #[test]
    fn test_skew_matches_cross() {
        let v = Vector3::new(1.0, 2.0, 3.0);
        let w = Vector3::new(-4.0, 0.5, 2.0);
        assert_relative_eq!(skew(&v) * w, v.cross(&w), epsilon = 1e-12);
    }

    #[test]
    fn test_solid_angle_of_octant_face() {
        // The triangle spanning the three unit axes covers 1/8 of the sphere.
        let omega = solid_angle(
            &Point3::origin(),
            &Point3::new(1.0, 0.0, 0.0),
            &Point3::new(0.0, 1.0, 0.0),
            &Point3::new(0.0, 0.0, 1.0),
        );
        assert_relative_eq!(omega, std::f64::consts::PI / 2.0, epsilon = 1e-12);
    }
}
