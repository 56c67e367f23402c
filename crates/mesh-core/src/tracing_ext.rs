//! Tracing helpers shared by the mesh operations.
//!
//! The crate never installs a subscriber. Binaries decide where events go:
//!
//! ```rust,ignore
//! use tracing_subscriber::{fmt, prelude::*, EnvFilter};
//!
//! tracing_subscriber::registry()
//!     .with(fmt::layer())
//!     .with(EnvFilter::from_default_env())
//!     .init();
//!
//! // RUST_LOG=mesh_core=debug for per-stage counts,
//! // RUST_LOG=mesh_core::timing=info for operation timings only.
//! ```
//!
//! # Log Levels
//!
//! - **WARN**: skipped or degenerate input (open boundary chains, oversize holes, singular solves)
//! - **INFO**: one summary per operation, timing
//! - **DEBUG**: per-stage counts and intermediate states
//! - **TRACE**: per-iteration detail

use std::time::Instant;
use tracing::{Span, debug, info, trace, warn};

use crate::Mesh;
use crate::validate::MeshReport;

/// A performance timer that logs duration on drop.
///
/// ```rust,ignore
/// fn expensive_operation() {
///     let _timer = OperationTimer::new("expensive_operation");
///     // ... do work ...
/// } // logs elapsed_ms here
/// ```
pub struct OperationTimer {
    name: &'static str,
    start: Instant,
    span: Span,
}

impl OperationTimer {
    /// Create a new operation timer.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!("mesh_operation", operation = name);
        debug!(target: "mesh_core::timing", operation = name, "Starting operation");
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    /// Create a timer that records the input size on its span.
    pub fn with_context(name: &'static str, face_count: usize, vertex_count: usize) -> Self {
        let span = tracing::info_span!(
            "mesh_operation",
            operation = name,
            faces = face_count,
            vertices = vertex_count
        );
        debug!(
            target: "mesh_core::timing",
            operation = name,
            faces = face_count,
            vertices = vertex_count,
            "Starting operation"
        );
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    /// Timer for an operation over a mesh.
    pub fn for_mesh(name: &'static str, mesh: &Mesh) -> Self {
        Self::with_context(name, mesh.face_count(), mesh.vertex_count())
    }

    /// Get the elapsed time.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Get the span for this timer.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        let elapsed_ms = self.elapsed_ms();
        info!(
            target: "mesh_core::timing",
            operation = self.name,
            elapsed_ms = format!("{:.2}", elapsed_ms),
            "Operation completed"
        );
    }
}

/// Log mesh statistics at debug level.
pub fn log_mesh_stats(mesh: &Mesh, context: &str) {
    let (min_bounds, max_bounds) = mesh.bounds().unwrap_or_default();
    let dims = max_bounds - min_bounds;

    debug!(
        target: "mesh_core::mesh_state",
        context = context,
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        dimensions = format!("{:.2} x {:.2} x {:.2}", dims.x, dims.y, dims.z),
        "Mesh state"
    );
}

/// Log mesh statistics at trace level, including bounds and normals.
pub fn log_mesh_stats_detailed(mesh: &Mesh, context: &str) {
    let (min_bounds, max_bounds) = mesh.bounds().unwrap_or_default();
    let has_normals = mesh.vertices.iter().any(|v| v.normal.is_some());

    trace!(
        target: "mesh_core::mesh_state",
        context = context,
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        min = format!("[{:.4}, {:.4}, {:.4}]", min_bounds.x, min_bounds.y, min_bounds.z),
        max = format!("[{:.4}, {:.4}, {:.4}]", max_bounds.x, max_bounds.y, max_bounds.z),
        has_normals = has_normals,
        "Detailed mesh state"
    );
}

/// Log a validation report.
pub fn log_validation_result(report: &MeshReport) {
    if report.is_valid() && report.is_watertight && report.is_manifold {
        info!(
            target: "mesh_core::validation",
            vertex_count = report.vertex_count,
            face_count = report.face_count,
            components = report.component_count,
            "Mesh validation passed"
        );
    } else {
        warn!(
            target: "mesh_core::validation",
            is_watertight = report.is_watertight,
            is_manifold = report.is_manifold,
            boundary_edges = report.boundary_edge_count,
            non_manifold_edges = report.non_manifold_edge_count,
            non_manifold_vertices = report.non_manifold_vertex_count,
            is_inside_out = report.is_inside_out,
            "Mesh validation found issues"
        );
    }
}

/// Log the outcome of one repair stage.
pub fn log_repair_stage(stage: &str, items_fixed: usize) {
    debug!(
        target: "mesh_core::repair",
        stage = stage,
        items_fixed = items_fixed,
        "Repair stage completed"
    );
}

/// Log one step of an iterative solver.
pub fn log_iteration(operation: &str, iteration: usize, error: f64) {
    trace!(
        target: "mesh_core::iteration",
        operation = operation,
        iteration = iteration,
        error = error,
        "Iteration"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    #[test]
    fn test_operation_timer() {
        let timer = OperationTimer::new("test_operation");
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.elapsed_ms() >= 5.0);
    }

    #[test]
    fn test_timer_for_mesh() {
        let mesh = Mesh::from_parts(
            [
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2]],
        );
        let timer = OperationTimer::for_mesh("single_triangle", &mesh);
        assert!(timer.elapsed_ms() >= 0.0);
        log_mesh_stats(&mesh, "test");
        log_mesh_stats_detailed(&mesh, "test");
    }

    #[test]
    fn test_log_helpers_do_not_panic_on_empty_mesh() {
        let mesh = Mesh::new();
        log_mesh_stats(&mesh, "empty");
        log_repair_stage("stitch", 0);
        log_iteration("icp", 0, 0.0);
    }
}
