//! Rigid registration with Iterative Closest Point.
//!
//! Two variants share one driver loop:
//! - point-to-point, solving each step in closed form with the Kabsch method;
//! - point-to-plane, linearizing the rotation and solving 6×6 normal equations.
//!
//! # Example
//!
//! ```
//! use mesh_core::registration::{RegistrationParams, icp_point_to_point};
//! use nalgebra::{Point3, Vector3};
//!
//! let target: Vec<Point3<f64>> = (0..27)
//!     .map(|i| Point3::new((i % 3) as f64, ((i / 3) % 3) as f64, (i / 9) as f64 * 1.5))
//!     .collect();
//! let source: Vec<Point3<f64>> = target.iter().map(|p| p + Vector3::new(0.1, 0.0, -0.05)).collect();
//!
//! let result = icp_point_to_point(&source, &target, &RegistrationParams::default()).unwrap();
//! assert!(result.converged);
//! ```

use nalgebra::{Matrix3, Matrix4, Point3, Rotation3, SMatrix, SVector, UnitQuaternion, Vector3};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{MeshError, MeshResult};
use crate::math::solve_linear;
use crate::pointcloud::estimate_normals;
use crate::repair::compute_vertex_normals;
use crate::spatial::KdTree;
use crate::tracing_ext::{OperationTimer, log_iteration};
use crate::Mesh;

/// ICP error metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
#[cfg_attr(feature = "pipeline-config", serde(rename_all = "snake_case"))]
pub enum IcpVariant {
    /// Minimize distances between corresponding points.
    #[default]
    PointToPoint,
    /// Minimize distances to the tangent planes of the target.
    PointToPlane,
}

/// Parameters for ICP registration.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
#[cfg_attr(feature = "pipeline-config", serde(default))]
pub struct RegistrationParams {
    /// Error metric.
    pub variant: IcpVariant,

    /// Maximum number of transform updates.
    pub max_iterations: usize,

    /// Stop once the mean squared correspondence error drops below this.
    pub tolerance: f64,

    /// Stop once an iteration improves the error by less than this.
    pub convergence_threshold: f64,

    /// Ignore pairs further apart than this. None accepts every pair.
    pub max_correspondence_distance: Option<f64>,

    /// Neighbours used when target normals have to be estimated.
    pub normal_neighbors: usize,

    /// Fraction of source points used (1.0 uses all of them).
    pub subsample_ratio: f64,
}

impl Default for RegistrationParams {
    fn default() -> Self {
        Self {
            variant: IcpVariant::PointToPoint,
            max_iterations: 50,
            tolerance: 1e-10,
            convergence_threshold: 1e-12,
            max_correspondence_distance: None,
            normal_neighbors: 8,
            subsample_ratio: 1.0,
        }
    }
}

impl RegistrationParams {
    /// Point-to-point ICP with default settings.
    pub fn point_to_point() -> Self {
        Self::default()
    }

    /// Point-to-plane ICP (faster convergence on smooth surfaces).
    pub fn point_to_plane() -> Self {
        Self {
            variant: IcpVariant::PointToPlane,
            ..Default::default()
        }
    }

    /// Set maximum iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the error tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Set maximum correspondence distance.
    pub fn with_max_correspondence_distance(mut self, distance: f64) -> Self {
        self.max_correspondence_distance = Some(distance);
        self
    }

    /// Set subsample ratio for large inputs.
    pub fn with_subsample_ratio(mut self, ratio: f64) -> Self {
        self.subsample_ratio = ratio;
        self
    }

    fn validate(&self) -> MeshResult<()> {
        if !(self.tolerance >= 0.0) {
            return Err(MeshError::invalid_parameter(
                "tolerance",
                self.tolerance,
                ">= 0",
            ));
        }
        if !(self.convergence_threshold >= 0.0) {
            return Err(MeshError::invalid_parameter(
                "convergence_threshold",
                self.convergence_threshold,
                ">= 0",
            ));
        }
        if let Some(d) = self.max_correspondence_distance {
            if !(d > 0.0) {
                return Err(MeshError::invalid_parameter(
                    "max_correspondence_distance",
                    d,
                    "> 0",
                ));
            }
        }
        if self.normal_neighbors < 3 {
            return Err(MeshError::invalid_parameter(
                "normal_neighbors",
                self.normal_neighbors,
                ">= 3",
            ));
        }
        if !(self.subsample_ratio > 0.0 && self.subsample_ratio <= 1.0) {
            return Err(MeshError::invalid_parameter(
                "subsample_ratio",
                self.subsample_ratio,
                "in (0, 1]",
            ));
        }
        Ok(())
    }
}

/// A rigid transformation: rotation followed by translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    /// Rotation quaternion.
    pub rotation: UnitQuaternion<f64>,
    /// Translation vector.
    pub translation: Vector3<f64>,
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl RigidTransform {
    /// Create an identity transformation.
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Create a pure translation.
    pub fn from_translation(translation: Vector3<f64>) -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation,
        }
    }

    /// Create a pure rotation.
    pub fn from_rotation(rotation: UnitQuaternion<f64>) -> Self {
        Self {
            rotation,
            translation: Vector3::zeros(),
        }
    }

    /// Create a transformation from rotation and translation.
    pub fn from_rotation_translation(
        rotation: UnitQuaternion<f64>,
        translation: Vector3<f64>,
    ) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Apply the transformation to a point.
    pub fn transform_point(&self, point: &Point3<f64>) -> Point3<f64> {
        self.rotation * point + self.translation
    }

    /// Apply the rotation to a vector.
    pub fn transform_vector(&self, vector: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * vector
    }

    /// Compose with another transformation (self applied first, then other).
    pub fn then(&self, other: &RigidTransform) -> RigidTransform {
        RigidTransform {
            rotation: other.rotation * self.rotation,
            translation: other.rotation * self.translation + other.translation,
        }
    }

    /// Get the inverse transformation.
    pub fn inverse(&self) -> RigidTransform {
        let inv_rotation = self.rotation.inverse();
        RigidTransform {
            rotation: inv_rotation,
            translation: inv_rotation * -self.translation,
        }
    }

    /// Rotation angle in radians.
    pub fn angle(&self) -> f64 {
        self.rotation.angle()
    }

    /// Convert to a 4x4 homogeneous transformation matrix.
    pub fn to_matrix4(&self) -> Matrix4<f64> {
        let mut m = self.rotation.to_homogeneous();
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        m
    }
}

/// Result of a point-set registration.
#[derive(Debug, Clone)]
pub struct RegistrationResult {
    /// Accumulated transform taking the source onto the target.
    pub transformation: RigidTransform,

    /// Mean squared correspondence error of every correspondence pass.
    ///
    /// Entry `i` is measured before the `i`-th update; the last entry is the
    /// error of the final pose.
    pub error_history: Vec<f64>,

    /// Final mean squared correspondence error (infinite when no pass ran).
    pub mse: f64,

    /// Number of transform updates applied.
    pub iterations: usize,

    /// Whether a stopping criterion other than the iteration cap was met.
    pub converged: bool,

    /// Correspondences used in the last pass.
    pub correspondences_used: usize,
}

impl RegistrationResult {
    fn unchanged() -> Self {
        Self {
            transformation: RigidTransform::identity(),
            error_history: Vec::new(),
            mse: f64::INFINITY,
            iterations: 0,
            converged: false,
            correspondences_used: 0,
        }
    }

    /// Root mean square correspondence error.
    pub fn rms_error(&self) -> f64 {
        self.mse.sqrt()
    }

    /// Check if the registration quality is acceptable.
    ///
    /// Returns true if converged and RMS error is below threshold.
    pub fn is_acceptable(&self, max_rms_error: f64) -> bool {
        self.converged && self.rms_error() <= max_rms_error
    }
}

/// A mesh aligned onto another, plus the registration that produced it.
#[derive(Debug, Clone)]
pub struct AlignmentResult {
    /// The source mesh with the transform applied.
    pub mesh: Mesh,
    /// Registration details.
    pub registration: RegistrationResult,
}

/// A matched pair: source slot, target index, squared distance.
type Pair = (usize, usize, f64);

fn correspondences(tree: &KdTree, points: &[Point3<f64>], max_distance: Option<f64>) -> Vec<Pair> {
    let max_sq = max_distance.map_or(f64::INFINITY, |d| d * d);
    points
        .par_iter()
        .enumerate()
        .filter_map(|(i, p)| {
            let hit = tree.nearest(p)?;
            (hit.distance_squared <= max_sq).then_some((i, hit.index, hit.distance_squared))
        })
        .collect()
}

fn mean_squared(pairs: &[Pair]) -> f64 {
    pairs.iter().map(|p| p.2).sum::<f64>() / pairs.len() as f64
}

/// Optimal rotation and translation between paired points (Kabsch).
fn kabsch(source: &[Point3<f64>], target: &[Point3<f64>], pairs: &[Pair]) -> Option<RigidTransform> {
    let n = pairs.len() as f64;
    let (sc, tc) = pairs.iter().fold(
        (Vector3::zeros(), Vector3::zeros()),
        |(s, t), &(i, j, _)| (s + source[i].coords, t + target[j].coords),
    );
    let (sc, tc) = (sc / n, tc / n);

    let h: Matrix3<f64> = pairs
        .iter()
        .map(|&(i, j, _)| (source[i].coords - sc) * (target[j].coords - tc).transpose())
        .sum();

    let svd = h.svd(true, true);
    let (Some(u), Some(mut v_t)) = (svd.u, svd.v_t) else {
        return None;
    };
    let mut r = v_t.transpose() * u.transpose();
    if r.determinant() < 0.0 {
        // Reflection: flip the axis of the smallest singular value.
        let k = svd.singular_values.imin();
        let flipped = -v_t.row(k);
        v_t.set_row(k, &flipped);
        r = v_t.transpose() * u.transpose();
    }

    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
    let translation = tc - rotation * sc;
    Some(RigidTransform::from_rotation_translation(rotation, translation))
}

/// One Gauss-Newton step of point-to-plane ICP, `None` when the system is singular.
fn point_to_plane_step(
    source: &[Point3<f64>],
    target: &[Point3<f64>],
    normals: &[Vector3<f64>],
    pairs: &[Pair],
) -> Option<RigidTransform> {
    let mut a = SMatrix::<f64, 6, 6>::zeros();
    let mut b = SVector::<f64, 6>::zeros();
    for &(i, j, _) in pairs {
        let p = source[i].coords;
        let n = normals[j];
        let r = (p - target[j].coords).dot(&n);
        let c = p.cross(&n);
        let jac = SVector::<f64, 6>::new(c.x, c.y, c.z, n.x, n.y, n.z);
        a += jac * jac.transpose();
        b -= jac * r;
    }
    let x = solve_linear::<6>(&a, &b)?;
    let rotation = UnitQuaternion::from_scaled_axis(Vector3::new(x[0], x[1], x[2]));
    Some(RigidTransform::from_rotation_translation(
        rotation,
        Vector3::new(x[3], x[4], x[5]),
    ))
}

fn subsample(points: &[Point3<f64>], ratio: f64) -> Vec<Point3<f64>> {
    if ratio >= 1.0 {
        return points.to_vec();
    }
    let step = (1.0 / ratio).round().max(1.0) as usize;
    points.iter().step_by(step).copied().collect()
}

fn check_points(points: &[Point3<f64>], what: &'static str) -> MeshResult<()> {
    for (i, p) in points.iter().enumerate() {
        for (axis, value) in ["x", "y", "z"].into_iter().zip(p.iter()) {
            if !value.is_finite() {
                debug!(set = what, "Non-finite registration input");
                return Err(MeshError::invalid_coordinate(i, axis, *value));
            }
        }
    }
    Ok(())
}

fn run_icp(
    source: &[Point3<f64>],
    target: &[Point3<f64>],
    target_normals: Option<&[Vector3<f64>]>,
    params: &RegistrationParams,
) -> MeshResult<RegistrationResult> {
    params.validate()?;
    check_points(source, "source")?;
    check_points(target, "target")?;
    if let Some(normals) = target_normals {
        if normals.len() != target.len() {
            return Err(MeshError::invalid_parameter(
                "target_normals",
                normals.len(),
                "one normal per target point",
            ));
        }
    }

    let _timer = OperationTimer::new("icp");
    let mut current = subsample(source, params.subsample_ratio);
    if current.len() < 3 || target.len() < 3 {
        warn!(
            source = current.len(),
            target = target.len(),
            "ICP needs at least 3 points per set"
        );
        return Ok(RegistrationResult::unchanged());
    }

    let tree = KdTree::build(target);
    let normals: Option<Vec<Vector3<f64>>> = match params.variant {
        IcpVariant::PointToPoint => None,
        IcpVariant::PointToPlane => Some(match target_normals {
            Some(n) => n.to_vec(),
            None => estimate_normals(target, params.normal_neighbors),
        }),
    };

    let mut transform = RigidTransform::identity();
    let mut history = Vec::new();
    let mut converged = false;
    let mut iterations = 0;
    let mut pairs;

    loop {
        pairs = correspondences(&tree, &current, params.max_correspondence_distance);
        if pairs.len() < 3 {
            warn!(pairs = pairs.len(), "Too few correspondences, stopping ICP");
            break;
        }
        let mse = mean_squared(&pairs);
        log_iteration("icp", iterations, mse);
        let improvement = history.last().map(|prev: &f64| prev - mse);
        history.push(mse);

        if mse < params.tolerance {
            converged = true;
            break;
        }
        if improvement.is_some_and(|d| d.abs() < params.convergence_threshold) {
            converged = true;
            break;
        }
        if iterations >= params.max_iterations {
            break;
        }

        let step = match &normals {
            None => kabsch(&current, target, &pairs),
            Some(n) => point_to_plane_step(&current, target, n, &pairs).or_else(|| {
                debug!("Singular point-to-plane system, using point-to-point step");
                kabsch(&current, target, &pairs)
            }),
        };
        let Some(step) = step else {
            warn!("Degenerate correspondence set, stopping ICP");
            break;
        };

        for p in &mut current {
            *p = step.transform_point(p);
        }
        transform = transform.then(&step);
        iterations += 1;
    }

    if history.is_empty() {
        return Ok(RegistrationResult::unchanged());
    }

    let mse = history.last().copied().unwrap_or(f64::INFINITY);
    info!(
        variant = ?params.variant,
        iterations,
        converged,
        mse,
        angle = transform.angle(),
        "ICP complete"
    );

    Ok(RegistrationResult {
        transformation: transform,
        error_history: history,
        mse,
        iterations,
        converged,
        correspondences_used: pairs.len(),
    })
}

/// Point-to-point ICP aligning `source` onto `target`.
///
/// With fewer than 3 correspondences the identity is returned, unconverged.
pub fn icp_point_to_point(
    source: &[Point3<f64>],
    target: &[Point3<f64>],
    params: &RegistrationParams,
) -> MeshResult<RegistrationResult> {
    let params = RegistrationParams {
        variant: IcpVariant::PointToPoint,
        ..params.clone()
    };
    run_icp(source, target, None, &params)
}

/// Point-to-plane ICP aligning `source` onto `target`.
///
/// When `target_normals` is None they are estimated from the
/// `params.normal_neighbors` nearest target points.
pub fn icp_point_to_plane(
    source: &[Point3<f64>],
    target: &[Point3<f64>],
    target_normals: Option<&[Vector3<f64>]>,
    params: &RegistrationParams,
) -> MeshResult<RegistrationResult> {
    let params = RegistrationParams {
        variant: IcpVariant::PointToPlane,
        ..params.clone()
    };
    run_icp(source, target, target_normals, &params)
}

/// Register two point sets with the variant chosen in `params`.
pub fn register(
    source: &[Point3<f64>],
    target: &[Point3<f64>],
    params: &RegistrationParams,
) -> MeshResult<RegistrationResult> {
    run_icp(source, target, None, params)
}

/// Align a source mesh to a target mesh using their vertices.
///
/// Point-to-plane uses the target's vertex normals, computing them when absent.
pub fn align_meshes(
    source: &Mesh,
    target: &Mesh,
    params: &RegistrationParams,
) -> MeshResult<AlignmentResult> {
    source.validate()?;
    target.validate()?;

    let source_points = source.positions();
    let target_points = target.positions();

    let registration = match params.variant {
        IcpVariant::PointToPoint => run_icp(&source_points, &target_points, None, params)?,
        IcpVariant::PointToPlane => {
            let normals: Vec<Vector3<f64>> =
                if target.vertices.iter().all(|v| v.normal.is_some()) && !target.faces.is_empty() {
                    target
                        .vertices
                        .iter()
                        .filter_map(|v| v.normal)
                        .collect()
                } else if !target.faces.is_empty() {
                    let mut with_normals = target.clone();
                    compute_vertex_normals(&mut with_normals);
                    with_normals
                        .vertices
                        .iter()
                        .map(|v| v.normal.unwrap_or_else(Vector3::z))
                        .collect()
                } else {
                    estimate_normals(&target_points, params.normal_neighbors)
                };
            run_icp(&source_points, &target_points, Some(&normals), params)?
        }
    };

    let t = registration.transformation;
    let mut mesh = source.clone();
    for vertex in &mut mesh.vertices {
        vertex.position = t.transform_point(&vertex.position);
        if let Some(normal) = vertex.normal.as_mut() {
            *normal = t.transform_vector(normal);
        }
    }

    Ok(AlignmentResult { mesh, registration })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn lattice() -> Vec<Point3<f64>> {
        let mut points = Vec::new();
        for k in 0..3 {
            for j in 0..3 {
                for i in 0..3 {
                    points.push(Point3::new(2.0 * i as f64, 2.0 * j as f64, 2.5 * k as f64));
                }
            }
        }
        points
    }

    fn small_motion() -> RigidTransform {
        RigidTransform::from_rotation_translation(
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 2f64.to_radians()),
            Vector3::new(0.05, -0.03, 0.02),
        )
    }

    fn ellipsoid() -> (Vec<Point3<f64>>, Vec<Vector3<f64>>) {
        let axes = Vector3::new(1.0, 2.0, 3.0);
        let mut points = Vec::new();
        let mut normals = Vec::new();
        // A band around the equator; rings near the poles are too dense for the motion below.
        for i in 0..9 {
            let theta = 0.4 + 2.34 * i as f64 / 8.0;
            for j in 0..16 {
                let phi = 2.0 * std::f64::consts::PI * j as f64 / 16.0;
                let unit = Vector3::new(theta.sin() * phi.cos(), theta.sin() * phi.sin(), theta.cos());
                let p = unit.component_mul(&axes);
                points.push(Point3::from(p));
                normals.push(Vector3::new(p.x, p.y / 4.0, p.z / 9.0).normalize());
            }
        }
        (points, normals)
    }

    #[test]
    fn test_self_alignment_is_identity() {
        let points = lattice();
        let result = icp_point_to_point(&points, &points, &RegistrationParams::default()).unwrap();
        assert!(result.converged);
        assert_eq!(result.iterations, 0);
        assert_relative_eq!(result.mse, 0.0);
        assert_relative_eq!(result.transformation.translation.norm(), 0.0);
    }

    #[test]
    fn test_point_to_point_recovers_motion() {
        let target = lattice();
        let motion = small_motion();
        let source: Vec<Point3<f64>> = target
            .iter()
            .map(|p| motion.inverse().transform_point(p))
            .collect();

        let result = icp_point_to_point(&source, &target, &RegistrationParams::default()).unwrap();
        assert!(result.converged);
        assert!(result.mse < 1e-10);
        assert_relative_eq!(result.transformation.angle(), motion.angle(), epsilon = 1e-6);
        for (s, t) in source.iter().zip(&target) {
            assert_relative_eq!(result.transformation.transform_point(s), *t, epsilon = 1e-6);
        }
        for w in result.error_history.windows(2) {
            assert!(w[1] <= w[0] + 1e-12);
        }
    }

    #[test]
    fn test_point_to_plane_with_normals() {
        let (target, normals) = ellipsoid();
        let motion = RigidTransform::from_rotation_translation(
            UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.5f64.to_radians()),
            Vector3::new(0.005, 0.0, -0.005),
        );
        let source: Vec<Point3<f64>> = target.iter().map(|p| motion.transform_point(p)).collect();

        let result =
            icp_point_to_plane(&source, &target, Some(&normals), &RegistrationParams::default())
                .unwrap();
        assert!(result.converged);
        assert!(result.mse < 1e-10);
        for (s, t) in source.iter().zip(&target) {
            assert_relative_eq!(result.transformation.transform_point(s), *t, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_too_few_points() {
        let points = vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0)];
        let result = icp_point_to_point(&points, &points, &RegistrationParams::default()).unwrap();
        assert!(!result.converged);
        assert_eq!(result.iterations, 0);
        assert_eq!(result.transformation, RigidTransform::identity());
    }

    #[test]
    fn test_correspondence_cap_excludes_everything() {
        let target = lattice();
        let source: Vec<Point3<f64>> = target
            .iter()
            .map(|p| p + Vector3::new(100.0, 0.0, 0.0))
            .collect();
        let params = RegistrationParams::default().with_max_correspondence_distance(1.0);
        let result = register(&source, &target, &params).unwrap();
        assert!(!result.converged);
        assert!(result.error_history.is_empty());
    }

    #[test]
    fn test_transform_algebra() {
        let t = small_motion();
        let p = Point3::new(1.0, 2.0, 3.0);
        assert_relative_eq!(t.inverse().transform_point(&t.transform_point(&p)), p, epsilon = 1e-12);
        let m = t.to_matrix4();
        let h = m * p.to_homogeneous();
        assert_relative_eq!(Point3::from(h.xyz()), t.transform_point(&p), epsilon = 1e-12);
        let twice = t.then(&t);
        assert_relative_eq!(twice.angle(), 2.0 * t.angle(), epsilon = 1e-12);
    }

    #[test]
    fn test_align_meshes_moves_vertices() {
        let target = Mesh::from_parts(lattice(), Vec::new());
        let source = Mesh::from_parts(
            lattice().into_iter().map(|p| p + Vector3::new(0.2, 0.1, 0.0)),
            Vec::new(),
        );
        let aligned = align_meshes(&source, &target, &RegistrationParams::default()).unwrap();
        for (a, b) in aligned.mesh.vertices.iter().zip(&target.vertices) {
            assert_relative_eq!(a.position, b.position, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_rejects_bad_params() {
        let points = lattice();
        let params = RegistrationParams::default().with_subsample_ratio(0.0);
        assert!(register(&points, &points, &params).is_err());
        let bad = vec![Point3::new(f64::NAN, 0.0, 0.0); 4];
        assert!(register(&bad, &points, &RegistrationParams::default()).is_err());
    }
}
