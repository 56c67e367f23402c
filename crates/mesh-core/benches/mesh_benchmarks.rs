//! Benchmarks for mesh-core operations.
//!
//! Run with: cargo bench -p mesh-core
//!
//! To compare against baseline:
//! 1. First run: cargo bench -p mesh-core -- --save-baseline main
//! 2. After changes: cargo bench -p mesh-core -- --baseline main

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use mesh_core::{
    BooleanOp, BooleanParams, DecimateParams, IsosurfaceParams, KdTree, Mesh, Octree,
    OctreeParams, RegistrationParams, RepairParams, ScalarGrid, SmoothParams, SubdivideParams,
    align_meshes, boolean_operation, decimate_mesh, marching_cubes, repair_mesh, smooth_mesh,
    subdivide_loop, tetrahedralize, validate_mesh,
};
use nalgebra::{Point3, UnitQuaternion, Vector3};

// =============================================================================
// Test Mesh Generation
// =============================================================================

/// Create a unit cube mesh (12 triangles).
fn create_cube() -> Mesh {
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

/// Create a sphere by subdividing an octahedron (8 * 4^level triangles).
fn create_sphere(level: usize) -> Mesh {
    let octahedron = Mesh::from_parts(
        [
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(-1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, -1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(0.0, 0.0, -1.0),
        ],
        vec![
            [0, 2, 4],
            [2, 1, 4],
            [1, 3, 4],
            [3, 0, 4],
            [2, 0, 5],
            [1, 2, 5],
            [3, 1, 5],
            [0, 3, 5],
        ],
    );
    let mut sphere = subdivide_loop(&octahedron, &SubdivideParams::with_iterations(level))
        .map(|r| r.mesh)
        .unwrap_or(octahedron);
    for v in &mut sphere.vertices {
        v.position = Point3::from(v.position.coords.normalize());
    }
    sphere
}

fn random_points(count: usize) -> Vec<Point3<f64>> {
    let mut state = 0x2545_f491_4f6c_dd1d_u64;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state >> 11) as f64 / (1u64 << 53) as f64
    };
    (0..count)
        .map(|_| Point3::new(next(), next(), next()))
        .collect()
}

fn sphere_cases() -> [(&'static str, Mesh); 3] {
    [
        ("sphere_512tri", create_sphere(3)),
        ("sphere_2048tri", create_sphere(4)),
        ("sphere_8192tri", create_sphere(5)),
    ]
}

// =============================================================================
// Validation and Repair
// =============================================================================

fn bench_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("Validation");
    for (name, mesh) in &sphere_cases() {
        group.throughput(Throughput::Elements(mesh.faces.len() as u64));
        group.bench_with_input(BenchmarkId::new("validate", name), mesh, |b, mesh| {
            b.iter(|| validate_mesh(black_box(mesh)))
        });
    }
    group.finish();
}

fn bench_repair(c: &mut Criterion) {
    let mut group = c.benchmark_group("Repair");
    let params = RepairParams::default();
    for (name, mesh) in &sphere_cases() {
        let mut open = mesh.clone();
        open.faces.truncate(open.faces.len() - 4);
        group.throughput(Throughput::Elements(mesh.faces.len() as u64));
        group.bench_with_input(BenchmarkId::new("repair_open", name), &open, |b, mesh| {
            b.iter(|| repair_mesh(black_box(mesh), black_box(&params)))
        });
    }
    group.finish();
}

// =============================================================================
// Spatial Indexing
// =============================================================================

fn bench_spatial(c: &mut Criterion) {
    let mut group = c.benchmark_group("Spatial");
    let queries = random_points(1000);

    for count in [1_000usize, 10_000, 100_000] {
        let points = random_points(count);
        group.bench_with_input(BenchmarkId::new("kdtree_build", count), &points, |b, points| {
            b.iter(|| KdTree::build(black_box(points)))
        });

        let tree = KdTree::build(&points);
        group.throughput(Throughput::Elements(queries.len() as u64));
        group.bench_with_input(BenchmarkId::new("kdtree_knn8", count), &tree, |b, tree| {
            b.iter(|| {
                for q in &queries {
                    black_box(tree.k_nearest(q, 8));
                }
            })
        });

        let octree = Octree::build(&points, &OctreeParams::default());
        group.bench_with_input(BenchmarkId::new("octree_radius", count), &octree, |b, tree| {
            b.iter(|| {
                for q in &queries {
                    black_box(tree.radius_search(q, 0.05));
                }
            })
        });
    }
    group.finish();
}

// =============================================================================
// Subdivision, Smoothing and Decimation
// =============================================================================

fn bench_subdivision(c: &mut Criterion) {
    let mut group = c.benchmark_group("Subdivision");
    let params = SubdivideParams::single();
    for (name, mesh) in &sphere_cases() {
        group.throughput(Throughput::Elements(mesh.faces.len() as u64));
        group.bench_with_input(BenchmarkId::new("loop", name), mesh, |b, mesh| {
            b.iter(|| subdivide_loop(black_box(mesh), black_box(&params)))
        });
    }
    group.finish();
}

fn bench_smoothing(c: &mut Criterion) {
    let mut group = c.benchmark_group("Smoothing");
    let mesh = create_sphere(4);
    let methods = [
        ("laplacian", SmoothParams::laplacian(10, 0.5)),
        ("taubin", SmoothParams::taubin(10, 0.5, -0.53)),
        ("cotangent", SmoothParams::cotangent(10, 0.5)),
        ("bilateral", SmoothParams::bilateral(10, 0.1, 0.05)),
    ];
    group.throughput(Throughput::Elements(mesh.faces.len() as u64));
    for (name, params) in &methods {
        group.bench_with_input(BenchmarkId::new("sphere_2048tri", name), params, |b, params| {
            b.iter(|| smooth_mesh(black_box(&mesh), black_box(params)))
        });
    }
    group.finish();
}

fn bench_decimation(c: &mut Criterion) {
    let mut group = c.benchmark_group("Decimation");
    group.sample_size(20);
    for (name, mesh) in &sphere_cases() {
        let params = DecimateParams::with_target_triangles(mesh.faces.len() / 2);
        group.throughput(Throughput::Elements(mesh.faces.len() as u64));
        group.bench_with_input(BenchmarkId::new("decimate_50pct", name), mesh, |b, mesh| {
            b.iter(|| decimate_mesh(black_box(mesh), black_box(&params)))
        });
    }
    group.finish();
}

// =============================================================================
// Isosurfaces and CSG
// =============================================================================

fn bench_marching_cubes(c: &mut Criterion) {
    let mut group = c.benchmark_group("MarchingCubes");
    group.sample_size(20);
    for n in [32usize, 64] {
        let h = 2.0 / (n - 1) as f64;
        let Ok(grid) = ScalarGrid::from_fn([n, n, n], Point3::new(-1.0, -1.0, -1.0), h, |p| {
            p.coords.norm() - 0.8
        }) else {
            continue;
        };
        group.bench_with_input(BenchmarkId::new("sphere", n), &grid, |b, grid| {
            b.iter(|| marching_cubes(black_box(grid), &IsosurfaceParams::default()))
        });
    }
    group.finish();
}

fn bench_boolean(c: &mut Criterion) {
    let mut group = c.benchmark_group("Boolean");
    group.sample_size(10);
    let cases = [("cube", create_cube()), ("sphere_512tri", create_sphere(3))];
    let params = BooleanParams::default();
    for (name, mesh) in &cases {
        let mut other = mesh.clone();
        other.translate(Vector3::new(0.3, 0.2, 0.1));
        for op in [BooleanOp::Union, BooleanOp::Difference, BooleanOp::Intersection] {
            group.bench_with_input(
                BenchmarkId::new(op.to_string(), name),
                &(mesh, &other),
                |b, (a, other)| b.iter(|| boolean_operation(black_box(a), black_box(other), op, &params)),
            );
        }
    }
    group.finish();
}

// =============================================================================
// Registration and Delaunay
// =============================================================================

fn bench_registration(c: &mut Criterion) {
    let mut group = c.benchmark_group("Registration");
    group.sample_size(20);
    let target = create_sphere(4);
    let mut source = target.clone();
    let rotation = UnitQuaternion::from_euler_angles(0.02, -0.01, 0.03);
    for v in &mut source.vertices {
        v.position = rotation * v.position + Vector3::new(0.01, 0.0, -0.01);
    }
    for (name, params) in [
        ("point_to_point", RegistrationParams::point_to_point()),
        ("point_to_plane", RegistrationParams::point_to_plane()),
    ] {
        group.bench_function(name, |b| b.iter(|| align_meshes(black_box(&source), &target, &params)));
    }
    group.finish();
}

fn bench_delaunay(c: &mut Criterion) {
    let mut group = c.benchmark_group("Delaunay");
    group.sample_size(10);
    for count in [100usize, 1_000, 5_000] {
        let points = random_points(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("tetrahedralize", count), &points, |b, points| {
            b.iter(|| tetrahedralize(black_box(points)))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_validation,
    bench_repair,
    bench_spatial,
    bench_subdivision,
    bench_smoothing,
    bench_decimation,
    bench_marching_cubes,
    bench_boolean,
    bench_registration,
    bench_delaunay,
);

criterion_main!(benches);
