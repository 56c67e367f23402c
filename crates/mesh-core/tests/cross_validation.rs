//! Cross-validation tests for mesh operations.
//!
//! These tests check outputs against independent references: the `kiddo`
//! KD-tree for spatial queries, closed-form signed distances, analytic
//! volumes and point-membership tests for CSG.
//!
//! Run with: cargo test -p mesh-core --test cross_validation

use mesh_core::sdf::DistanceField;
use mesh_core::{
    BooleanOp, BooleanParams, IsosurfaceParams, KdTree, Mesh, PolyMesh, SdfParams,
    SubdivideParams, boolean_operation, marching_cubes, mesh_to_sdf, subdivide_catmull_clark,
    subdivide_loop, tetrahedralize, validate_mesh,
};
use nalgebra::{Point3, Vector3};

// =============================================================================
// Test Data
// =============================================================================

/// Deterministic pseudo-random generator so failures reproduce.
struct Lcg(u64);

impl Lcg {
    fn next_f64(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }

    fn point_in(&mut self, lo: f64, hi: f64) -> Point3<f64> {
        let mut c = || lo + (hi - lo) * self.next_f64();
        Point3::new(c(), c(), c())
    }
}

fn random_points(seed: u64, count: usize, lo: f64, hi: f64) -> Vec<Point3<f64>> {
    let mut rng = Lcg(seed);
    (0..count).map(|_| rng.point_in(lo, hi)).collect()
}

fn create_test_cube() -> Mesh {
    Mesh::from_parts(
        [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(1.0, 0.0, 1.0),
            Point3::new(1.0, 1.0, 1.0),
            Point3::new(0.0, 1.0, 1.0),
        ],
        vec![
            [0, 2, 1],
            [0, 3, 2],
            [4, 5, 6],
            [4, 6, 7],
            [0, 1, 5],
            [0, 5, 4],
            [2, 3, 7],
            [2, 7, 6],
            [0, 4, 7],
            [0, 7, 3],
            [1, 2, 6],
            [1, 6, 5],
        ],
    )
}

fn create_quad_cube() -> PolyMesh {
    let cube = create_test_cube();
    PolyMesh::from_parts(
        cube.positions(),
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

fn build_kiddo(points: &[Point3<f64>]) -> kiddo::KdTree<f64, 3> {
    let mut tree = kiddo::KdTree::new();
    for (i, p) in points.iter().enumerate() {
        tree.add(&[p.x, p.y, p.z], i as u64);
    }
    tree
}

/// Exact signed distance to the axis-aligned box `[min, max]`.
fn box_sdf(p: &Point3<f64>, min: Vector3<f64>, max: Vector3<f64>) -> f64 {
    let center = (min + max) * 0.5;
    let half = (max - min) * 0.5;
    let q = (p.coords - center).abs() - half;
    let outside = q.map(|c| c.max(0.0)).norm();
    let inside = q.x.max(q.y).max(q.z).min(0.0);
    outside + inside
}

// =============================================================================
// Spatial Queries vs kiddo
// =============================================================================

#[test]
fn cross_validate_nearest_against_kiddo() {
    let points = random_points(7, 2000, -10.0, 10.0);
    let ours = KdTree::build(&points);
    let reference = build_kiddo(&points);

    for query in random_points(11, 300, -12.0, 12.0) {
        let a = ours.nearest(&query).unwrap();
        let b = reference.nearest_one::<kiddo::SquaredEuclidean>(&[query.x, query.y, query.z]);
        assert!(
            (a.distance_squared - b.distance).abs() <= 1e-12 * b.distance.max(1.0),
            "query {query:?}: {} vs {}",
            a.distance_squared,
            b.distance
        );
    }
}

#[test]
fn cross_validate_k_nearest_against_kiddo() {
    let points = random_points(3, 1500, 0.0, 5.0);
    let ours = KdTree::build(&points);
    let reference = build_kiddo(&points);

    for query in random_points(5, 100, 0.0, 5.0) {
        let a = ours.k_nearest(&query, 12);
        let b = reference.nearest_n::<kiddo::SquaredEuclidean>(&[query.x, query.y, query.z], 12);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert!((x.distance_squared - y.distance).abs() <= 1e-12 * y.distance.max(1.0));
        }
    }
}

#[test]
fn cross_validate_radius_search_against_kiddo() {
    let points = random_points(17, 1500, -1.0, 1.0);
    let ours = KdTree::build(&points);
    let reference = build_kiddo(&points);
    let radius = 0.2;

    for query in random_points(19, 100, -1.0, 1.0) {
        let mut a: Vec<usize> = ours
            .within_radius(&query, radius)
            .iter()
            .map(|n| n.index)
            .collect();
        let mut b: Vec<usize> = reference
            .within::<kiddo::SquaredEuclidean>(&[query.x, query.y, query.z], radius * radius)
            .iter()
            .map(|n| n.item as usize)
            .collect();
        a.sort_unstable();
        b.sort_unstable();
        assert_eq!(a, b);
    }
}

#[test]
fn cross_validate_voronoi_vertices_are_empty_sphere_centers() {
    let points = random_points(23, 150, -3.0, 3.0);
    let tets = tetrahedralize(&points).unwrap();
    let reference = build_kiddo(&points);

    for tet in &tets.tetrahedra {
        let c = tet.circumcenter;
        let nearest = reference.nearest_one::<kiddo::SquaredEuclidean>(&[c.x, c.y, c.z]);
        let r2 = tet.circumradius * tet.circumradius;
        // No site is strictly closer to a Voronoi vertex than its own four.
        assert!(nearest.distance >= r2 * (1.0 - 1e-7));
        for &v in &tet.vertices {
            let d2 = (points[v as usize] - c).norm_squared();
            assert!((d2 - r2).abs() <= 1e-7 * r2.max(1.0));
        }
    }
}

// =============================================================================
// Implicit Surfaces vs Closed Forms
// =============================================================================

#[test]
fn cross_validate_cube_sdf_against_closed_form() {
    let cube = create_test_cube();
    let grid = mesh_to_sdf(&cube, &SdfParams::with_resolution(10)).unwrap();
    let (min, max) = (Vector3::zeros(), Vector3::repeat(1.0));

    let [nx, ny, nz] = grid.dims;
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                let p = grid.point(x, y, z);
                let expected = box_sdf(&p, min, max);
                let actual = grid.get(x, y, z);
                assert!(
                    (actual - expected).abs() < 1e-9,
                    "at {p:?}: {actual} vs {expected}"
                );
            }
        }
    }
}

#[test]
fn cross_validate_sdf_round_trip_volume() {
    let cube = create_test_cube();
    let grid = mesh_to_sdf(&cube, &SdfParams::with_resolution(20)).unwrap();
    let surface = marching_cubes(&grid, &IsosurfaceParams::default()).unwrap().mesh;

    assert!(surface.signed_volume() > 0.0);
    assert!((surface.volume() - 1.0).abs() < 0.05, "volume {}", surface.volume());
}

#[test]
fn cross_validate_winding_number_matches_box_membership() {
    let cube = create_test_cube();
    let field = DistanceField::new(&cube);
    let (min, max) = (Vector3::zeros(), Vector3::repeat(1.0));

    for p in random_points(29, 500, -0.5, 1.5) {
        let d = box_sdf(&p, min, max);
        if d.abs() < 1e-3 {
            continue;
        }
        let inside = field.winding_number(&p) > 0.5;
        assert_eq!(inside, d < 0.0, "at {p:?}");
        let sd = field.signed_distance(&p).unwrap();
        assert!((sd - d).abs() < 1e-9);
    }
}

// =============================================================================
// CSG vs Point Membership
// =============================================================================

#[test]
fn cross_validate_boolean_membership() {
    let a = create_test_cube();
    let mut b = create_test_cube();
    let offset = Vector3::new(0.3, 0.4, 0.5);
    b.translate(offset);

    let (a_min, a_max) = (Vector3::zeros(), Vector3::repeat(1.0));
    let (b_min, b_max) = (offset, offset + Vector3::repeat(1.0));
    let samples = random_points(31, 400, -0.2, 1.7);

    for op in [BooleanOp::Union, BooleanOp::Intersection, BooleanOp::Difference] {
        let result = boolean_operation(&a, &b, op, &BooleanParams::default())
            .unwrap()
            .mesh;
        let field = DistanceField::new(&result);

        for p in &samples {
            let (da, db) = (box_sdf(p, a_min, a_max), box_sdf(p, b_min, b_max));
            if da.abs() < 1e-3 || db.abs() < 1e-3 {
                continue;
            }
            let (in_a, in_b) = (da < 0.0, db < 0.0);
            let expected = match op {
                BooleanOp::Union => in_a || in_b,
                BooleanOp::Intersection => in_a && in_b,
                BooleanOp::Difference => in_a && !in_b,
            };
            let inside = field.winding_number(p) > 0.5;
            assert_eq!(inside, expected, "{op} at {p:?}");
        }
    }
}

#[test]
fn cross_validate_boolean_volumes() {
    let a = create_test_cube();
    let mut b = create_test_cube();
    b.translate(Vector3::new(0.3, 0.4, 0.5));
    let overlap = 0.7 * 0.6 * 0.5;

    let volume = |op| {
        boolean_operation(&a, &b, op, &BooleanParams::default())
            .unwrap()
            .mesh
            .signed_volume()
    };
    assert!((volume(BooleanOp::Union) - (2.0 - overlap)).abs() < 1e-9);
    assert!((volume(BooleanOp::Intersection) - overlap).abs() < 1e-9);
    assert!((volume(BooleanOp::Difference) - (1.0 - overlap)).abs() < 1e-9);
}

// =============================================================================
// Subdivision Invariants
// =============================================================================

#[test]
fn cross_validate_euler_characteristic() {
    let cube = create_test_cube();
    for iterations in 0..=3 {
        let mesh = if iterations == 0 {
            cube.clone()
        } else {
            subdivide_loop(&cube, &SubdivideParams::with_iterations(iterations))
                .unwrap()
                .mesh
        };
        let report = validate_mesh(&mesh).unwrap();
        assert_eq!(report.euler_characteristic(), 2, "after {iterations} iterations");
    }
}

#[test]
fn cross_validate_catmull_clark_counts() {
    // One step on a closed quad mesh: V' = V + E + F, F' = 4F.
    let result = subdivide_catmull_clark(&create_quad_cube(), &SubdivideParams::single()).unwrap();
    assert_eq!(result.mesh.vertex_count(), 8 + 12 + 6);
    assert_eq!(result.mesh.face_count(), 24);
    assert!(result.mesh.is_quad_mesh());

    let triangles = result.mesh.triangulate();
    let report = validate_mesh(&triangles).unwrap();
    assert!(report.is_closed_solid());
    // The limit surface lies inside the control cage.
    assert!(triangles.volume() < 1.0);
    assert!(triangles.volume() > 0.5);
}
