//! Pipeline API for chaining mesh operations.
//!
//! A [`Pipeline`] owns a mesh and applies operations in order, recording one
//! log line per stage. With the `pipeline-config` feature a pipeline can also
//! be described as data ([`PipelineConfig`]) and loaded from TOML or JSON.
//!
//! # Example
//!
//! ```
//! use mesh_core::{Mesh, Pipeline};
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
//! let result = Pipeline::new(tetra)
//!     .repair()
//!     .and_then(|p| p.subdivide(1))
//!     .and_then(|p| p.validate())
//!     .unwrap()
//!     .finish();
//!
//! assert_eq!(result.mesh.face_count(), 16);
//! assert!(result.validation.unwrap().is_watertight);
//! ```

use nalgebra::Vector3;
use tracing::{debug, info};

use crate::Mesh;
use crate::boolean::{BooleanOp, BooleanParams, boolean_operation};
use crate::decimate::{DecimateParams, decimate_mesh};
use crate::error::{MeshError, MeshResult};
use crate::holes::{HoleFillParams, fill_holes};
use crate::repair::{RepairParams, compute_vertex_normals, repair_mesh, stitch_vertices};
use crate::smooth::{SmoothParams, smooth_mesh};
use crate::subdivide::{SubdivideParams, subdivide_loop};
use crate::validate::{MeshReport, validate_mesh};

// =========================================================================
// Pipeline Configuration (Serialization)
// =========================================================================

/// A single step in a pipeline configuration.
///
/// Each step represents one operation to be performed on the mesh.
#[cfg(feature = "pipeline-config")]
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum PipelineStep {
    /// Apply default repair.
    Repair,
    /// Apply repair optimized for 3D scans.
    RepairForScans,
    /// Apply repair with custom parameters.
    RepairWithParams {
        #[serde(flatten)]
        params: RepairParams,
    },
    /// Merge vertices closer than `tolerance`.
    Stitch { tolerance: f64 },
    /// Fill holes up to a maximum edge count.
    FillHoles { max_edges: usize },
    /// Loop-subdivide the mesh.
    Subdivide { iterations: usize },
    /// Subdivide with custom parameters.
    SubdivideWithParams {
        #[serde(flatten)]
        params: SubdivideParams,
    },
    /// Smooth the mesh.
    Smooth {
        #[serde(flatten)]
        params: SmoothParams,
    },
    /// Decimate to target triangle count.
    DecimateToCount { target_count: usize },
    /// Decimate to ratio of original triangles.
    DecimateToRatio { ratio: f64 },
    /// Decimate with custom parameters.
    DecimateWithParams {
        #[serde(flatten)]
        params: DecimateParams,
    },
    /// Translate every vertex.
    Translate { offset: [f64; 3] },
    /// Scale about the origin.
    Scale { factor: f64 },
    /// Compute vertex normals.
    ComputeNormals,
    /// Validate the mesh.
    Validate,
    /// Fail unless the mesh is closed, manifold and outward-facing.
    RequireClosedSolid,
}

/// A serializable pipeline configuration.
///
/// # Example TOML
///
/// ```toml
/// name = "clean-and-refine"
///
/// [[steps]]
/// operation = "repair_for_scans"
///
/// [[steps]]
/// operation = "smooth"
/// method = "taubin"
/// iterations = 5
///
/// [[steps]]
/// operation = "decimate_to_ratio"
/// ratio = 0.5
///
/// [[steps]]
/// operation = "validate"
/// ```
#[cfg(feature = "pipeline-config")]
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct PipelineConfig {
    /// Optional name for this workflow.
    #[serde(default)]
    pub name: Option<String>,
    /// Optional description of what this workflow does.
    #[serde(default)]
    pub description: Option<String>,
    /// The sequence of operations to perform.
    pub steps: Vec<PipelineStep>,
}

#[cfg(feature = "pipeline-config")]
impl PipelineConfig {
    /// Create an empty pipeline configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration with a name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Add a step to the configuration.
    pub fn add_step(mut self, step: PipelineStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Set the description.
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, PipelineConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self, PipelineConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Serialize to TOML string.
    pub fn to_toml(&self) -> Result<String, PipelineConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to a TOML file.
    pub fn save_toml(&self, path: impl AsRef<std::path::Path>) -> Result<(), PipelineConfigError> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self, PipelineConfigError> {
        Ok(serde_json::from_str(json_str)?)
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, PipelineConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Repair a scan, smooth it lightly and validate.
    pub fn preset_scan_cleanup() -> Self {
        Self::with_name("scan-cleanup")
            .description("Repair scan data and remove noise")
            .add_step(PipelineStep::RepairForScans)
            .add_step(PipelineStep::Smooth {
                params: SmoothParams::taubin(5, 0.5, -0.53),
            })
            .add_step(PipelineStep::Validate)
    }

    /// Create a preset configuration for mesh simplification.
    pub fn preset_simplify(ratio: f64) -> Self {
        Self::with_name("simplify")
            .description("Simplify mesh while preserving shape")
            .add_step(PipelineStep::Repair)
            .add_step(PipelineStep::DecimateToRatio { ratio })
            .add_step(PipelineStep::ComputeNormals)
    }

    /// Create a preset configuration for mesh refinement.
    pub fn preset_refine(iterations: usize) -> Self {
        Self::with_name("refine")
            .description("Refine mesh with Loop subdivision")
            .add_step(PipelineStep::Repair)
            .add_step(PipelineStep::Subdivide { iterations })
            .add_step(PipelineStep::ComputeNormals)
    }
}

/// Errors that can occur when loading or saving pipeline configurations.
#[cfg(feature = "pipeline-config")]
#[derive(Debug, thiserror::Error)]
pub enum PipelineConfigError {
    /// I/O error reading or writing file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    /// TOML serialization error.
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result of a pipeline execution.
#[derive(Debug)]
pub struct PipelineResult {
    /// The processed mesh.
    pub mesh: Mesh,
    /// Validation report (if validation was performed).
    pub validation: Option<MeshReport>,
    /// Number of pipeline stages executed.
    pub stages_executed: usize,
    /// Log of operations performed.
    pub operation_log: Vec<String>,
}

/// A mesh processing pipeline.
///
/// Every stage consumes the pipeline and returns it, or the first error.
pub struct Pipeline {
    mesh: Mesh,
    validation: Option<MeshReport>,
    stages_executed: usize,
    operation_log: Vec<String>,
}

impl Pipeline {
    /// Start a pipeline with an existing mesh.
    pub fn new(mesh: Mesh) -> Self {
        Self {
            mesh,
            validation: None,
            stages_executed: 0,
            operation_log: Vec::new(),
        }
    }

    // =========================================================================
    // Repair Operations
    // =========================================================================

    /// Apply default repair operations.
    pub fn repair(self) -> MeshResult<Self> {
        self.repair_with_params(&RepairParams::default())
    }

    /// Apply repair tuned for 3D scans.
    pub fn repair_for_scans(self) -> MeshResult<Self> {
        self.repair_with_params(&RepairParams::for_scans())
    }

    /// Apply repair with custom parameters.
    pub fn repair_with_params(mut self, params: &RepairParams) -> MeshResult<Self> {
        let result = repair_mesh(&self.mesh, params)?;
        self.mesh = result.mesh;
        self.stage(format!(
            "Repaired: {} vertices stitched, {} holes filled",
            result.stats.vertices_stitched, result.stats.holes_filled
        ));
        Ok(self)
    }

    /// Merge vertices closer than `tolerance`.
    pub fn stitch(mut self, tolerance: f64) -> MeshResult<Self> {
        let merged = stitch_vertices(&mut self.mesh, tolerance)?;
        self.stage(format!("Stitched {merged} vertices"));
        Ok(self)
    }

    /// Fill holes with at most `max_edges` edges.
    pub fn fill_holes(mut self, max_edges: usize) -> MeshResult<Self> {
        let params = HoleFillParams {
            max_hole_edges: max_edges,
            ..Default::default()
        };
        let filled = fill_holes(&mut self.mesh, &params)?;
        self.stage(format!("Filled {filled} holes"));
        Ok(self)
    }

    // =========================================================================
    // Geometry Operations
    // =========================================================================

    /// Loop-subdivide the mesh.
    pub fn subdivide(self, iterations: usize) -> MeshResult<Self> {
        self.subdivide_with_params(&SubdivideParams::with_iterations(iterations))
    }

    /// Subdivide with custom parameters.
    pub fn subdivide_with_params(mut self, params: &SubdivideParams) -> MeshResult<Self> {
        let result = subdivide_loop(&self.mesh, params)?;
        self.mesh = result.mesh;
        self.stage(format!(
            "Subdivided {} times ({} triangles)",
            result.iterations_performed, result.final_faces
        ));
        Ok(self)
    }

    /// Smooth vertex positions.
    pub fn smooth(mut self, params: &SmoothParams) -> MeshResult<Self> {
        let result = smooth_mesh(&self.mesh, params)?;
        self.mesh = result.mesh;
        self.stage(format!(
            "Smoothed ({:?}, {} iterations, max displacement {:.3e})",
            params.method, result.iterations_performed, result.max_displacement
        ));
        Ok(self)
    }

    /// Decimate to a target triangle count.
    pub fn decimate_to_count(self, target_count: usize) -> MeshResult<Self> {
        self.decimate_with_params(&DecimateParams::with_target_triangles(target_count))
    }

    /// Decimate to a ratio of original triangles.
    pub fn decimate_to_ratio(self, ratio: f64) -> MeshResult<Self> {
        self.decimate_with_params(&DecimateParams::with_target_ratio(ratio))
    }

    /// Decimate with custom parameters.
    pub fn decimate_with_params(mut self, params: &DecimateParams) -> MeshResult<Self> {
        let result = decimate_mesh(&self.mesh, params)?;
        self.mesh = result.mesh;
        self.stage(format!(
            "Decimated from {} to {} triangles",
            result.original_triangles, result.final_triangles
        ));
        Ok(self)
    }

    /// Combine the current mesh with `other`.
    pub fn boolean(mut self, other: &Mesh, op: BooleanOp) -> MeshResult<Self> {
        let result = boolean_operation(&self.mesh, other, op, &BooleanParams::default())?;
        self.mesh = result.mesh;
        self.stage(format!("Boolean {op} ({} triangles)", self.mesh.face_count()));
        Ok(self)
    }

    /// Translate every vertex.
    pub fn translate(mut self, offset: Vector3<f64>) -> Self {
        self.mesh.translate(offset);
        self.stage(format!(
            "Translated by ({}, {}, {})",
            offset.x, offset.y, offset.z
        ));
        self
    }

    /// Scale about the origin.
    pub fn scale(mut self, factor: f64) -> MeshResult<Self> {
        if !(factor.is_finite() && factor != 0.0) {
            return Err(MeshError::invalid_parameter(
                "factor",
                factor,
                "finite and non-zero",
            ));
        }
        self.mesh.scale(factor);
        self.stage(format!("Scaled by {factor}"));
        Ok(self)
    }

    /// Compute or recompute vertex normals.
    pub fn compute_normals(mut self) -> Self {
        compute_vertex_normals(&mut self.mesh);
        self.stage("Computed vertex normals".to_string());
        self
    }

    // =========================================================================
    // Analysis Operations
    // =========================================================================

    /// Validate the mesh and store the report.
    pub fn validate(mut self) -> MeshResult<Self> {
        let report = validate_mesh(&self.mesh)?;
        self.stage(format!(
            "Validated: {} triangles, watertight={}, manifold={}",
            report.face_count, report.is_watertight, report.is_manifold
        ));
        self.validation = Some(report);
        Ok(self)
    }

    /// Validate and fail unless the mesh is a closed, outward-facing solid.
    pub fn require_closed_solid(mut self) -> MeshResult<Self> {
        let report = validate_mesh(&self.mesh)?;
        if !report.is_closed_solid() {
            return Err(MeshError::invalid_topology(format!(
                "mesh is not a closed solid: watertight={}, manifold={}, inside_out={}",
                report.is_watertight, report.is_manifold, report.is_inside_out
            )));
        }
        self.stage("Verified mesh is a closed solid".to_string());
        self.validation = Some(report);
        Ok(self)
    }

    // =========================================================================
    // Configuration-Based Execution
    // =========================================================================

    /// Run every step of `config` in order.
    #[cfg(feature = "pipeline-config")]
    pub fn run_config(mut self, config: &PipelineConfig) -> MeshResult<Self> {
        if let Some(name) = &config.name {
            info!(pipeline = %name, steps = config.steps.len(), "Running pipeline");
            self.operation_log.push(format!("Running pipeline: {name}"));
        }
        for step in &config.steps {
            self = self.run_step(step)?;
        }
        Ok(self)
    }

    /// Execute a single pipeline step.
    #[cfg(feature = "pipeline-config")]
    pub fn run_step(self, step: &PipelineStep) -> MeshResult<Self> {
        debug!(?step, "Pipeline step");
        match step {
            PipelineStep::Repair => self.repair(),
            PipelineStep::RepairForScans => self.repair_for_scans(),
            PipelineStep::RepairWithParams { params } => self.repair_with_params(params),
            PipelineStep::Stitch { tolerance } => self.stitch(*tolerance),
            PipelineStep::FillHoles { max_edges } => self.fill_holes(*max_edges),
            PipelineStep::Subdivide { iterations } => self.subdivide(*iterations),
            PipelineStep::SubdivideWithParams { params } => self.subdivide_with_params(params),
            PipelineStep::Smooth { params } => self.smooth(params),
            PipelineStep::DecimateToCount { target_count } => {
                self.decimate_to_count(*target_count)
            }
            PipelineStep::DecimateToRatio { ratio } => self.decimate_to_ratio(*ratio),
            PipelineStep::DecimateWithParams { params } => self.decimate_with_params(params),
            PipelineStep::Translate { offset } => Ok(self.translate(Vector3::from(*offset))),
            PipelineStep::Scale { factor } => self.scale(*factor),
            PipelineStep::ComputeNormals => Ok(self.compute_normals()),
            PipelineStep::Validate => self.validate(),
            PipelineStep::RequireClosedSolid => self.require_closed_solid(),
        }
    }

    // =========================================================================
    // Output Operations
    // =========================================================================

    /// Finish the pipeline and return the result.
    pub fn finish(self) -> PipelineResult {
        info!(
            stages = self.stages_executed,
            faces = self.mesh.face_count(),
            "Pipeline finished"
        );
        PipelineResult {
            mesh: self.mesh,
            validation: self.validation,
            stages_executed: self.stages_executed,
            operation_log: self.operation_log,
        }
    }

    /// Get a reference to the current mesh state.
    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// Get the current validation report (if any).
    pub fn validation_report(&self) -> Option<&MeshReport> {
        self.validation.as_ref()
    }

    /// Get the operation log.
    pub fn log_entries(&self) -> &[String] {
        &self.operation_log
    }

    /// Get the number of stages executed.
    pub fn stages_executed(&self) -> usize {
        self.stages_executed
    }

    fn stage(&mut self, message: String) {
        debug!(stage = self.stages_executed, "{message}");
        self.operation_log.push(message);
        self.stages_executed += 1;
    }
}

/// Trait for types that can be converted into a Pipeline.
pub trait IntoPipeline {
    /// Convert into a Pipeline.
    fn into_pipeline(self) -> Pipeline;
}

impl IntoPipeline for Mesh {
    fn into_pipeline(self) -> Pipeline {
        Pipeline::new(self)
    }
}
