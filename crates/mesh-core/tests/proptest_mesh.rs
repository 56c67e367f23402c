//! Property-based tests for mesh operations.
//!
//! These tests use proptest to generate random inputs and verify invariants.
//!
//! Run with: cargo test -p mesh-core -- proptest

use mesh_core::registration::icp_point_to_point;
use mesh_core::repair::remove_degenerate_faces;
use mesh_core::{
    DecimateParams, KdTree, Mesh, Octree, OctreeParams, RegistrationParams, RepairParams,
    SubdivideParams, Vertex, decimate_mesh, repair_mesh, stitch_vertices, subdivide_loop,
    tetrahedralize, validate_mesh,
};
use nalgebra::{Point3, Unit, UnitQuaternion, Vector3};
use proptest::prelude::*;

// =============================================================================
// Strategies
// =============================================================================

/// Generate a random position in a bounded range.
fn arb_point() -> impl Strategy<Value = Point3<f64>> {
    prop::array::uniform3(-100.0..100.0f64).prop_map(|[x, y, z]| Point3::new(x, y, z))
}

fn arb_points(min: usize, max: usize) -> impl Strategy<Value = Vec<Point3<f64>>> {
    prop::collection::vec(arb_point(), min..=max)
}

/// Generate a mesh whose faces reference valid (possibly repeated) indices.
fn arb_mesh(
    min_vertices: usize,
    max_vertices: usize,
    min_faces: usize,
    max_faces: usize,
) -> impl Strategy<Value = Mesh> {
    (min_vertices..=max_vertices).prop_flat_map(move |num_vertices| {
        let vertices = prop::collection::vec(arb_point(), num_vertices);
        vertices.prop_flat_map(move |points| {
            let n = points.len() as u32;
            let faces = prop::collection::vec(prop::array::uniform3(0..n), min_faces..=max_faces);
            faces.prop_map(move |faces| Mesh {
                vertices: points.iter().map(|&p| Vertex::new(p)).collect(),
                faces,
            })
        })
    })
}

/// Small meshes on a 3x3x3 grid of points, so coincident vertices, shared
/// edges and pinched fans are common.
fn arb_lattice_mesh() -> impl Strategy<Value = Mesh> {
    let corner = prop::array::uniform3(0u8..3)
        .prop_map(|[x, y, z]| Point3::new(x as f64, y as f64, z as f64));
    prop::collection::vec(corner, 4..=11).prop_flat_map(|points| {
        let n = points.len() as u32;
        prop::collection::vec(prop::array::uniform3(0..n), 1..=14).prop_map(move |faces| Mesh {
            vertices: points.iter().map(|&p| Vertex::new(p)).collect(),
            faces,
        })
    })
}

/// Unit cube, outward winding.
fn cube_mesh() -> Mesh {
    Mesh::from_parts(
        [
            Point3::new(-0.5, -0.5, -0.5),
            Point3::new(0.5, -0.5, -0.5),
            Point3::new(0.5, 0.5, -0.5),
            Point3::new(-0.5, 0.5, -0.5),
            Point3::new(-0.5, -0.5, 0.5),
            Point3::new(0.5, -0.5, 0.5),
            Point3::new(0.5, 0.5, 0.5),
            Point3::new(-0.5, 0.5, 0.5),
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

fn lattice() -> Vec<Point3<f64>> {
    let mut points = Vec::new();
    for i in 0..3 {
        for j in 0..3 {
            for k in 0..3 {
                points.push(Point3::new(i as f64 - 1.0, j as f64 - 1.0, k as f64 - 1.0));
            }
        }
    }
    points
}

// =============================================================================
// Property Tests: Spatial Indexing
// =============================================================================

proptest! {
    /// KD-tree nearest neighbour matches a linear scan.
    #[test]
    fn proptest_kdtree_nearest_matches_brute_force(
        points in arb_points(1, 200),
        query in arb_point(),
    ) {
        let tree = KdTree::build(&points);
        let found = tree.nearest(&query).unwrap();
        let best = points
            .iter()
            .map(|p| (p - query).norm_squared())
            .fold(f64::INFINITY, f64::min);
        prop_assert_eq!(found.distance_squared, best);
    }

    /// k-nearest returns the k smallest distances, sorted.
    #[test]
    fn proptest_kdtree_k_nearest_matches_brute_force(
        points in arb_points(1, 150),
        query in arb_point(),
        k in 1usize..20,
    ) {
        let tree = KdTree::build(&points);
        let found: Vec<f64> = tree
            .k_nearest(&query, k)
            .iter()
            .map(|n| n.distance_squared)
            .collect();

        let mut expected: Vec<f64> = points.iter().map(|p| (p - query).norm_squared()).collect();
        expected.sort_by(f64::total_cmp);
        expected.truncate(k);

        prop_assert_eq!(found, expected);
    }

    /// KD-tree and octree radius searches agree with a linear scan.
    #[test]
    fn proptest_radius_search_matches_brute_force(
        points in arb_points(1, 200),
        query in arb_point(),
        radius in 0.0..80.0f64,
    ) {
        let mut expected: Vec<usize> = points
            .iter()
            .enumerate()
            .filter(|(_, p)| (*p - query).norm_squared() <= radius * radius)
            .map(|(i, _)| i)
            .collect();
        expected.sort_unstable();

        let tree = KdTree::build(&points);
        let mut from_kd: Vec<usize> = tree.within_radius(&query, radius).iter().map(|n| n.index).collect();
        from_kd.sort_unstable();
        prop_assert_eq!(&from_kd, &expected);

        let octree = Octree::build(&points, &OctreeParams::default());
        let mut from_oct: Vec<usize> = octree.radius_search(&query, radius).iter().map(|n| n.index).collect();
        from_oct.sort_unstable();
        prop_assert_eq!(&from_oct, &expected);
    }
}

// =============================================================================
// Property Tests: Repair Operations
// =============================================================================

proptest! {
    /// Stitching never increases the vertex count and keeps indices valid.
    #[test]
    fn proptest_stitch_does_not_increase_vertices(
        mesh in arb_mesh(3, 80, 1, 40),
        tolerance in 0.0..20.0f64,
    ) {
        let original = mesh.vertex_count();
        let mut m = mesh.clone();
        stitch_vertices(&mut m, tolerance).unwrap();
        prop_assert!(m.vertex_count() <= original);
        let n = m.vertex_count() as u32;
        prop_assert!(m.faces.iter().flatten().all(|&i| i < n));
    }

    /// After removing degenerate faces no face repeats a vertex.
    #[test]
    fn proptest_remove_degenerate_no_repeated_indices(mesh in arb_mesh(3, 50, 1, 30)) {
        let original = mesh.face_count();
        let mut m = mesh.clone();
        remove_degenerate_faces(&mut m, 1e-10);
        prop_assert!(m.face_count() <= original);
        for face in &m.faces {
            prop_assert!(face[0] != face[1] && face[1] != face[2] && face[0] != face[2],
                "Found degenerate face: {:?}", face);
        }
    }

    /// Repairing a repaired mesh changes nothing.
    #[test]
    fn proptest_repair_is_idempotent(mesh in arb_lattice_mesh()) {
        let params = RepairParams::default();
        let once = repair_mesh(&mesh, &params).unwrap();
        let twice = repair_mesh(&once.mesh, &params).unwrap();
        prop_assert_eq!(&twice.mesh, &once.mesh);
        prop_assert_eq!(twice.stats.passes, 1);
    }

    /// Same on scattered meshes, with the coarse scan preset so stitching bites.
    #[test]
    fn proptest_repair_scan_preset_is_idempotent(mesh in arb_mesh(3, 30, 1, 30)) {
        let params = RepairParams {
            stitch_tolerance: 5.0,
            ..RepairParams::for_scans()
        };
        let once = repair_mesh(&mesh, &params).unwrap();
        let twice = repair_mesh(&once.mesh, &params).unwrap();
        prop_assert_eq!(&twice.mesh, &once.mesh);
    }

    /// Validation never fails on in-range data and counts what it is given.
    #[test]
    fn proptest_validation_no_panic(mesh in arb_mesh(3, 50, 1, 30)) {
        let report = validate_mesh(&mesh).unwrap();
        prop_assert_eq!(report.vertex_count, mesh.vertex_count());
        prop_assert_eq!(report.face_count, mesh.face_count());
    }
}

// =============================================================================
// Property Tests: Geometry Invariants
// =============================================================================

proptest! {
    /// Bounding box contains all vertices.
    #[test]
    fn proptest_bounds_contain_all_vertices(mesh in arb_mesh(3, 100, 1, 10)) {
        let (min, max) = mesh.bounds().unwrap();
        for v in &mesh.vertices {
            for axis in 0..3 {
                prop_assert!(v.position[axis] >= min[axis]);
                prop_assert!(v.position[axis] <= max[axis]);
            }
        }
    }

    /// Surface area is non-negative and volume is finite.
    #[test]
    fn proptest_area_and_volume_are_sane(mesh in arb_mesh(3, 50, 1, 30)) {
        prop_assert!(mesh.surface_area() >= 0.0);
        prop_assert!(mesh.signed_volume().is_finite());
    }

    /// Rigid motion preserves the volume of a closed mesh.
    #[test]
    fn proptest_translation_preserves_volume(offset in prop::array::uniform3(-50.0..50.0f64)) {
        let mut cube = cube_mesh();
        cube.translate(Vector3::from(offset));
        prop_assert!((cube.signed_volume() - 1.0).abs() < 1e-9);
    }
}

// =============================================================================
// Property Tests: Subdivision and Decimation
// =============================================================================

proptest! {
    /// Loop subdivision quadruples the face count and keeps the cube closed.
    #[test]
    fn proptest_loop_subdivision_counts(iterations in 1usize..=3) {
        let cube = cube_mesh();
        let result = subdivide_loop(&cube, &SubdivideParams::with_iterations(iterations)).unwrap();
        let expected = cube.face_count() * 4usize.pow(iterations as u32);
        prop_assert_eq!(result.mesh.face_count(), expected);

        let report = validate_mesh(&result.mesh).unwrap();
        prop_assert!(report.is_closed_solid());
        prop_assert_eq!(report.euler_characteristic(), 2);
    }

    /// Decimation never adds faces and keeps a closed mesh closed.
    #[test]
    fn proptest_decimation_reduces_faces(ratio in 0.1..0.9f64) {
        let dense = subdivide_loop(&cube_mesh(), &SubdivideParams::with_iterations(2)).unwrap().mesh;
        let original = dense.face_count();

        let result = decimate_mesh(&dense, &DecimateParams::with_target_ratio(ratio)).unwrap();
        prop_assert!(result.mesh.face_count() <= original);
        prop_assert_eq!(result.final_triangles, result.mesh.face_count());

        let n = result.mesh.vertex_count() as u32;
        prop_assert!(result.mesh.faces.iter().flatten().all(|&i| i < n));

        let report = validate_mesh(&result.mesh).unwrap();
        prop_assert!(report.is_watertight);
        prop_assert!(report.is_manifold);
    }
}

// =============================================================================
// Property Tests: Delaunay
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Random point sets produce an empty-sphere tetrahedralization with a closed hull.
    #[test]
    fn proptest_delaunay_empty_sphere(points in arb_points(5, 40)) {
        let tets = tetrahedralize(&points).unwrap();
        prop_assert!(!tets.is_empty());
        prop_assert!(tets.is_delaunay(1e-9));
        prop_assert!(tets.tetrahedra.iter().all(|t| t.volume(&tets.points) > 0.0));

        let surface = tets.surface_mesh();
        let report = validate_mesh(&surface).unwrap();
        prop_assert!(report.is_watertight);
        prop_assert!((surface.signed_volume() - tets.volume()).abs() <= 1e-6 * tets.volume());
    }
}

// =============================================================================
// Property Tests: Registration
// =============================================================================

proptest! {
    /// Point-to-point ICP recovers small rigid motions of a lattice.
    #[test]
    fn proptest_icp_recovers_small_motion(
        axis in prop::array::uniform3(-1.0..1.0f64),
        angle in 0.0..0.05f64,
        shift in prop::array::uniform3(-0.15..0.15f64),
    ) {
        let axis = Vector3::from(axis);
        prop_assume!(axis.norm() > 0.1);
        let rotation = UnitQuaternion::from_axis_angle(&Unit::new_normalize(axis), angle);
        let translation = Vector3::from(shift);

        let source = lattice();
        let target: Vec<Point3<f64>> = source.iter().map(|p| rotation * p + translation).collect();

        let result = icp_point_to_point(&source, &target, &RegistrationParams::default()).unwrap();
        prop_assert!(result.converged);
        for (s, t) in source.iter().zip(&target) {
            let moved = result.transformation.transform_point(s);
            prop_assert!((moved - t).norm() < 1e-6);
        }
    }
}
