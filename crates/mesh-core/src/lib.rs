//! Triangle mesh geometry processing.
//!
//! This crate collects the classic algorithms of a geometry processing
//! toolkit behind one indexed triangle mesh type:
//!
//! - **Kernel**: robust vector helpers, planes, orientation and circumsphere predicates
//! - **Topology**: typed edge keys, edge-face adjacency, boundary and manifold queries
//! - **Spatial indexing**: KD-tree nearest/k-nearest/radius queries and an octree
//! - **Repair**: vertex stitching, degenerate and duplicate removal, non-manifold
//!   resolution, hole filling
//! - **Refinement**: Loop and Catmull-Clark subdivision
//! - **Smoothing**: uniform Laplacian, Taubin, cotangent-weighted and bilateral
//! - **Implicit surfaces**: scalar grids, signed distance fields, marching cubes
//! - **CSG**: BSP-tree union, intersection and difference
//! - **Simplification**: quadric error metric edge collapse
//! - **Registration**: point-to-point and point-to-plane ICP
//! - **Delaunay**: incremental tetrahedralization and the dual Voronoi diagram
//!
//! # Conventions
//!
//! Coordinates are `f64` in a right-handed system. Faces are wound
//! counter-clockwise when viewed from outside, so normals follow the
//! right-hand rule and a closed, correctly oriented mesh has positive
//! signed volume.
//!
//! Every operation takes its input by reference and returns a new mesh in a
//! result struct together with statistics. Failures are reported as
//! [`MeshError`]; no operation panics on malformed input.
//!
//! # Quick Start
//!
//! ```
//! use mesh_core::{Mesh, SubdivideParams, subdivide_loop, validate_mesh};
//! use nalgebra::Point3;
//!
//! let tetra = Mesh::from_parts(
//!     [
//!         Point3::new(0.0, 0.0, 0.0),
//!         Point3::new(1.0, 0.0, 0.0),
//!         Point3::new(0.0, 1.0, 0.0),
//!         Point3::new(0.0, 0.0, 1.0),
//!     ],
//!     vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]],
//! );
//!
//! let refined = subdivide_loop(&tetra, &SubdivideParams::with_iterations(2)).unwrap();
//! assert_eq!(refined.mesh.face_count(), 64);
//!
//! let report = validate_mesh(&refined.mesh).unwrap();
//! assert!(report.is_closed_solid());
//! ```
//!
//! # Chaining Operations
//!
//! [`Pipeline`] threads a mesh through several stages and keeps a log:
//!
//! ```
//! use mesh_core::{Mesh, Pipeline, SmoothParams};
//! use nalgebra::Point3;
//!
//! # let mesh = Mesh::from_parts(
//! #     [
//! #         Point3::new(0.0, 0.0, 0.0),
//! #         Point3::new(1.0, 0.0, 0.0),
//! #         Point3::new(0.0, 1.0, 0.0),
//! #         Point3::new(0.0, 0.0, 1.0),
//! #     ],
//! #     vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]],
//! # );
//! let result = Pipeline::new(mesh)
//!     .repair()
//!     .and_then(|p| p.subdivide(2))
//!     .and_then(|p| p.smooth(&SmoothParams::taubin(4, 0.5, -0.53)))
//!     .and_then(|p| p.decimate_to_ratio(0.5))
//!     .unwrap()
//!     .finish();
//!
//! for line in &result.operation_log {
//!     println!("{line}");
//! }
//! ```
//!
//! # Error Handling
//!
//! Most operations return [`MeshResult<T>`], which is `Result<T, MeshError>`.
//! Errors carry a stable [`ErrorCode`] and, through `miette`, a help message.
//!
//! ```
//! use mesh_core::{Mesh, MeshError, SmoothParams, smooth_mesh};
//!
//! match smooth_mesh(&Mesh::new(), &SmoothParams::laplacian(3, 1.5)) {
//!     Err(MeshError::InvalidParameter { name, .. }) => assert_eq!(name, "lambda"),
//!     other => panic!("unexpected {other:?}"),
//! }
//! ```
//!
//! # Feature Flags
//!
//! - `pipeline-config`: serde derives on meshes and parameter structs, plus
//!   [`PipelineConfig`] for TOML/JSON workflow files.

mod error;
mod pipeline;
pub mod tracing_ext;
mod types;

pub mod adjacency;
pub mod boolean;
pub mod bsp;
pub mod decimate;
pub mod delaunay;
pub mod grid;
pub mod holes;
pub mod isosurface;
pub mod math;
pub mod pointcloud;
pub mod registration;
pub mod repair;
pub mod sdf;
pub mod smooth;
pub mod spatial;
pub mod subdivide;
pub mod validate;

// Re-export core types at crate root
pub use error::{
    ErrorCode, IssueSeverity, MeshError, MeshLocation, MeshResult, RecoverySuggestion,
    ValidationIssue,
};
pub use types::{Mesh, PolyMesh, Triangle, Vertex};

pub use adjacency::{DirectedEdge, EdgeKey, MeshAdjacency};
pub use spatial::{Aabb, KdTree, Neighbor, Octree, OctreeParams};

pub use pipeline::{IntoPipeline, Pipeline, PipelineResult};
#[cfg(feature = "pipeline-config")]
pub use pipeline::{PipelineConfig, PipelineConfigError, PipelineStep};

pub use boolean::{BooleanOp, BooleanParams, BooleanResult, BooleanStats, boolean_operation};
pub use decimate::{DecimateParams, DecimateResult, decimate_mesh};
pub use delaunay::{Tetrahedralization, VoronoiDiagram, tetrahedralize};
pub use grid::ScalarGrid;
pub use holes::{BoundaryLoop, HoleFillParams, HoleFillStrategy, fill_holes, find_boundary_loops};
pub use isosurface::{IsosurfaceParams, IsosurfaceResult, marching_cubes};
pub use pointcloud::{PointCloud, ReconstructionParams, reconstruct_surface};
pub use registration::{
    IcpVariant, RegistrationParams, RegistrationResult, RigidTransform, align_meshes,
};
pub use repair::{
    NonManifoldEdgePolicy, RepairParams, RepairResult, RepairStats, compute_vertex_normals,
    repair_mesh, stitch_vertices,
};
pub use sdf::{DistanceField, SdfParams, mesh_to_sdf};
pub use smooth::{SmoothMethod, SmoothParams, SmoothResult, smooth_mesh};
pub use subdivide::{
    CatmullClarkResult, SubdivideParams, SubdivideResult, subdivide_catmull_clark, subdivide_loop,
};
pub use validate::{MeshReport, validate_mesh};

pub use tracing_ext::{
    OperationTimer, log_mesh_stats, log_mesh_stats_detailed, log_validation_result,
};

// Convenience methods on Mesh
impl Mesh {
    /// Analyze topology and geometry.
    ///
    /// Unlike [`Mesh::validate`], which only checks structural soundness, this
    /// builds the full [`MeshReport`].
    pub fn report(&self) -> MeshResult<MeshReport> {
        validate::validate_mesh(self)
    }

    /// Repair with default parameters, returning the repaired mesh.
    pub fn repaired(&self) -> MeshResult<Mesh> {
        Ok(repair::repair_mesh(self, &RepairParams::default())?.mesh)
    }

    /// Apply `iterations` rounds of Loop subdivision.
    pub fn subdivided(&self, iterations: usize) -> MeshResult<Mesh> {
        Ok(subdivide::subdivide_loop(self, &SubdivideParams::with_iterations(iterations))?.mesh)
    }

    /// Smooth with the given parameters.
    pub fn smoothed(&self, params: &SmoothParams) -> MeshResult<Mesh> {
        Ok(smooth::smooth_mesh(self, params)?.mesh)
    }

    /// Decimate to a ratio of the current triangle count.
    pub fn decimated(&self, ratio: f64) -> MeshResult<Mesh> {
        Ok(decimate::decimate_mesh(self, &DecimateParams::with_target_ratio(ratio))?.mesh)
    }

    /// Compute vertex normals in place.
    pub fn compute_normals(&mut self) {
        repair::compute_vertex_normals(self);
    }
}
