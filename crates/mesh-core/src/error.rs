//! Error types for geometry operations with rich diagnostics.
//!
//! Errors in this crate follow one rule: problems with the *shape* of the input
//! (indices out of range, non-finite coordinates, bad parameters, mismatched grid
//! sizes) are reported as [`MeshError`] before any computation starts.
//! Numerical singularities are handled locally with epsilon fallbacks, and
//! topological impossibilities (a two-vertex hole, ICP with two correspondences,
//! a hull of three points) produce an empty or unchanged result instead of an error.
//!
//! # Error Codes
//!
//! Each error has a unique code in the format `MESH-XXXX`:
//! - `MESH-2xxx`: Validation errors (indices, coordinates, parameters, grids)
//! - `MESH-3xxx`: Algorithm errors (operations that could not complete)
//!
//! # Example
//!
//! ```
//! use mesh_core::{ErrorCode, MeshError};
//!
//! let err = MeshError::invalid_vertex_index(5, 100, 50);
//! assert_eq!(err.code(), ErrorCode::InvalidVertexIndex);
//! assert_eq!(err.code().as_str(), "MESH-2001");
//! ```

#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias for mesh operations.
pub type MeshResult<T> = Result<T, MeshError>;

/// Machine-readable error codes for mesh operations.
///
/// Codes follow the pattern `MESH-XXXX` where:
/// - 2xxx = Validation errors
/// - 3xxx = Algorithm errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Validation errors (2xxx)
    /// MESH-2001: Face references invalid vertex index
    InvalidVertexIndex = 2001,
    /// MESH-2002: Vertex has NaN or Infinity coordinate
    InvalidCoordinate = 2002,
    /// MESH-2003: Mesh has no vertices or faces
    EmptyMesh = 2003,
    /// MESH-2004: Invalid mesh topology
    InvalidTopology = 2004,
    /// MESH-2009: Face has fewer than three vertices
    InvalidFaceArity = 2009,
    /// MESH-2010: Operation parameter out of range
    InvalidParameter = 2010,
    /// MESH-2011: Scalar grid is malformed
    InvalidGrid = 2011,
    /// MESH-2012: Requested grid exceeds the configured cell budget
    GridTooLarge = 2012,
    /// MESH-2013: Operation needs per-point normals
    NormalsRequired = 2013,

    // Algorithm errors (3xxx)
    /// MESH-3001: Repair operation failed
    RepairFailed = 3001,
    /// MESH-3004: Decimation failed
    DecimationFailed = 3004,
    /// MESH-3006: Boolean operation failed
    BooleanFailed = 3006,
}

impl ErrorCode {
    /// Returns the error code as a string in the format `MESH-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidVertexIndex => "MESH-2001",
            ErrorCode::InvalidCoordinate => "MESH-2002",
            ErrorCode::EmptyMesh => "MESH-2003",
            ErrorCode::InvalidTopology => "MESH-2004",
            ErrorCode::InvalidFaceArity => "MESH-2009",
            ErrorCode::InvalidParameter => "MESH-2010",
            ErrorCode::InvalidGrid => "MESH-2011",
            ErrorCode::GridTooLarge => "MESH-2012",
            ErrorCode::NormalsRequired => "MESH-2013",
            ErrorCode::RepairFailed => "MESH-3001",
            ErrorCode::DecimationFailed => "MESH-3004",
            ErrorCode::BooleanFailed => "MESH-3006",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recovery suggestions for mesh errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoverySuggestion {
    /// Run repair operations to fix the issue.
    RunRepair { operations: Vec<String> },
    /// Check the input data for issues.
    CheckInput { checks: Vec<String> },
    /// Adjust parameters for the operation.
    AdjustParameters { parameters: Vec<(String, String)> },
    /// The input may be too large for the operation.
    ReduceResolution { suggested: Option<usize> },
    /// No automatic recovery available.
    None,
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoverySuggestion::RunRepair { operations } => {
                write!(f, "Run repair operations: {}", operations.join(", "))
            }
            RecoverySuggestion::CheckInput { checks } => {
                write!(f, "Check the input for: {}", checks.join(", "))
            }
            RecoverySuggestion::AdjustParameters { parameters } => {
                let params: Vec<String> = parameters
                    .iter()
                    .map(|(k, v)| format!("{} = {}", k, v))
                    .collect();
                write!(f, "Try adjusting: {}", params.join(", "))
            }
            RecoverySuggestion::ReduceResolution { suggested } => {
                if let Some(res) = suggested {
                    write!(f, "Try a coarser resolution (around {})", res)
                } else {
                    write!(f, "Try a coarser resolution or a larger cell size")
                }
            }
            RecoverySuggestion::None => {
                write!(f, "No automatic recovery available")
            }
        }
    }
}

/// Location information for mesh errors.
#[derive(Debug, Clone)]
pub enum MeshLocation {
    /// Error at a specific vertex.
    Vertex { index: usize },
    /// Error at a specific face.
    Face { index: usize },
    /// Error at a specific edge.
    Edge { vertex_a: u32, vertex_b: u32 },
    /// Error in a scalar grid.
    Grid { dims: [usize; 3] },
    /// Error in an operation parameter.
    Parameter { name: &'static str },
}

impl std::fmt::Display for MeshLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MeshLocation::Vertex { index } => write!(f, "vertex {}", index),
            MeshLocation::Face { index } => write!(f, "face {}", index),
            MeshLocation::Edge { vertex_a, vertex_b } => {
                write!(f, "edge between vertices {} and {}", vertex_a, vertex_b)
            }
            MeshLocation::Grid { dims } => {
                write!(f, "grid {}x{}x{}", dims[0], dims[1], dims[2])
            }
            MeshLocation::Parameter { name } => write!(f, "parameter `{}`", name),
        }
    }
}

/// Errors that can occur during mesh operations.
///
/// Each error variant includes:
/// - A human-readable message
/// - A machine-readable error code
/// - Optional location information
/// - Recovery suggestions when available
#[derive(Debug, Error, Diagnostic)]
pub enum MeshError {
    /// Empty mesh (no vertices or faces) where geometry is required.
    #[error("mesh is empty: {details}")]
    #[diagnostic(
        code(mesh::validation::empty),
        help("The operation needs at least one face to work with.")
    )]
    EmptyMesh { details: String },

    /// Invalid mesh topology.
    #[error("invalid mesh topology: {details}")]
    #[diagnostic(
        code(mesh::validation::topology),
        help("Try running `mesh repair` first, or use `mesh info` for a detailed report.")
    )]
    InvalidTopology { details: String },

    /// Invalid vertex index in face data.
    #[error(
        "invalid vertex index: face {face_index} references vertex {vertex_index}, but mesh only has {vertex_count} vertices"
    )]
    #[diagnostic(
        code(mesh::validation::vertex_index),
        help("Every face index must be smaller than the vertex count.")
    )]
    InvalidVertexIndex {
        face_index: usize,
        vertex_index: u32,
        vertex_count: usize,
    },

    /// Invalid coordinate value (NaN or Infinity).
    #[error("invalid coordinate at vertex {vertex_index}: {coordinate} is {value}")]
    #[diagnostic(
        code(mesh::validation::coordinate),
        help("Check for numerical issues in the source data.")
    )]
    InvalidCoordinate {
        vertex_index: usize,
        coordinate: &'static str,
        value: f64,
    },

    /// A polygon with fewer than three corners.
    #[error("face {face_index} has {arity} vertices; at least 3 are required")]
    #[diagnostic(
        code(mesh::validation::face_arity),
        help("Drop or merge faces with fewer than three distinct vertices.")
    )]
    InvalidFaceArity { face_index: usize, arity: usize },

    /// A parameter outside its accepted range.
    #[error("invalid parameter `{name}` = {value}: expected {expected}")]
    #[diagnostic(code(mesh::validation::parameter))]
    InvalidParameter {
        name: &'static str,
        value: String,
        expected: &'static str,
    },

    /// A scalar grid whose shape does not match its data.
    #[error("invalid scalar grid: {details}")]
    #[diagnostic(
        code(mesh::validation::grid),
        help("Grids need at least 2 samples per axis and dims[0]*dims[1]*dims[2] finite values.")
    )]
    InvalidGrid { details: String },

    /// A requested grid exceeds the cell budget.
    #[error("grid {dims:?} exceeds the limit of {max_cells} cells")]
    #[diagnostic(
        code(mesh::validation::grid_size),
        help("Lower the resolution or raise `max_cells`.")
    )]
    GridTooLarge { dims: [usize; 3], max_cells: usize },

    /// Normals are needed but unavailable.
    #[error("normals required: {details}")]
    #[diagnostic(
        code(mesh::validation::normals),
        help("Estimate normals with `PointCloud::with_estimated_normals` first.")
    )]
    NormalsRequired { details: String },

    /// Mesh repair failed.
    #[error("mesh repair failed: {details}")]
    #[diagnostic(
        code(mesh::repair::failed),
        help("Try running individual repair operations to identify the specific issue.")
    )]
    RepairFailed { details: String },

    /// Boolean operation failed.
    #[error("boolean {operation} failed: {details}")]
    #[diagnostic(
        code(mesh::boolean::failed),
        help("Ensure both meshes are closed and consistently wound. Try `mesh repair` on both inputs first.")
    )]
    BooleanFailed { details: String, operation: String },

    /// Decimation failed.
    #[error("decimation failed: {details}")]
    #[diagnostic(
        code(mesh::decimate::failed),
        help("Try a less aggressive target or repair the mesh before decimation.")
    )]
    DecimationFailed { details: String },
}

impl MeshError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            MeshError::EmptyMesh { .. } => ErrorCode::EmptyMesh,
            MeshError::InvalidTopology { .. } => ErrorCode::InvalidTopology,
            MeshError::InvalidVertexIndex { .. } => ErrorCode::InvalidVertexIndex,
            MeshError::InvalidCoordinate { .. } => ErrorCode::InvalidCoordinate,
            MeshError::InvalidFaceArity { .. } => ErrorCode::InvalidFaceArity,
            MeshError::InvalidParameter { .. } => ErrorCode::InvalidParameter,
            MeshError::InvalidGrid { .. } => ErrorCode::InvalidGrid,
            MeshError::GridTooLarge { .. } => ErrorCode::GridTooLarge,
            MeshError::NormalsRequired { .. } => ErrorCode::NormalsRequired,
            MeshError::RepairFailed { .. } => ErrorCode::RepairFailed,
            MeshError::BooleanFailed { .. } => ErrorCode::BooleanFailed,
            MeshError::DecimationFailed { .. } => ErrorCode::DecimationFailed,
        }
    }

    /// Returns a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self {
            MeshError::EmptyMesh { .. } => RecoverySuggestion::CheckInput {
                checks: vec!["mesh has geometry".into()],
            },
            MeshError::InvalidTopology { .. } => RecoverySuggestion::RunRepair {
                operations: vec!["fix_non_manifold_edges".into(), "remove_degenerate".into()],
            },
            MeshError::InvalidVertexIndex { .. } => RecoverySuggestion::RunRepair {
                operations: vec!["validate".into(), "remove_invalid_faces".into()],
            },
            MeshError::InvalidCoordinate { .. } => RecoverySuggestion::CheckInput {
                checks: vec!["coordinate values".into(), "export precision".into()],
            },
            MeshError::InvalidFaceArity { .. } => RecoverySuggestion::RunRepair {
                operations: vec!["stitch".into(), "remove_degenerate".into()],
            },
            MeshError::InvalidParameter { name, expected, .. } => {
                RecoverySuggestion::AdjustParameters {
                    parameters: vec![((*name).into(), (*expected).into())],
                }
            }
            MeshError::InvalidGrid { .. } => RecoverySuggestion::CheckInput {
                checks: vec!["grid dimensions".into(), "sample values".into()],
            },
            MeshError::GridTooLarge { dims, max_cells } => {
                let longest = dims.iter().copied().max().unwrap_or(0).max(1);
                let total = dims.iter().product::<usize>().max(1);
                let shrink = (*max_cells as f64 / total as f64).cbrt();
                RecoverySuggestion::ReduceResolution {
                    suggested: Some(((longest as f64) * shrink).floor() as usize),
                }
            }
            MeshError::NormalsRequired { .. } => RecoverySuggestion::CheckInput {
                checks: vec!["target normals".into()],
            },
            MeshError::RepairFailed { .. } => RecoverySuggestion::None,
            MeshError::BooleanFailed { .. } => RecoverySuggestion::RunRepair {
                operations: vec!["repair both meshes".into()],
            },
            MeshError::DecimationFailed { .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![("target_ratio".into(), "try a higher value".into())],
            },
        }
    }

    /// Returns location information if available.
    pub fn location(&self) -> Option<MeshLocation> {
        match self {
            MeshError::InvalidVertexIndex { face_index, .. }
            | MeshError::InvalidFaceArity { face_index, .. } => {
                Some(MeshLocation::Face { index: *face_index })
            }
            MeshError::InvalidCoordinate { vertex_index, .. } => Some(MeshLocation::Vertex {
                index: *vertex_index,
            }),
            MeshError::InvalidParameter { name, .. } => Some(MeshLocation::Parameter { name }),
            MeshError::GridTooLarge { dims, .. } => Some(MeshLocation::Grid { dims: *dims }),
            _ => None,
        }
    }

    // Constructor helpers for common error patterns

    /// Create an InvalidVertexIndex error.
    pub fn invalid_vertex_index(face_index: usize, vertex_index: u32, vertex_count: usize) -> Self {
        MeshError::InvalidVertexIndex {
            face_index,
            vertex_index,
            vertex_count,
        }
    }

    /// Create an InvalidCoordinate error.
    pub fn invalid_coordinate(vertex_index: usize, coordinate: &'static str, value: f64) -> Self {
        MeshError::InvalidCoordinate {
            vertex_index,
            coordinate,
            value,
        }
    }

    /// Create an InvalidParameter error.
    pub fn invalid_parameter(
        name: &'static str,
        value: impl std::fmt::Display,
        expected: &'static str,
    ) -> Self {
        MeshError::InvalidParameter {
            name,
            value: value.to_string(),
            expected,
        }
    }

    /// Create an EmptyMesh error.
    pub fn empty_mesh(details: impl Into<String>) -> Self {
        MeshError::EmptyMesh {
            details: details.into(),
        }
    }

    /// Create an InvalidGrid error.
    pub fn invalid_grid(details: impl Into<String>) -> Self {
        MeshError::InvalidGrid {
            details: details.into(),
        }
    }

    /// Create an InvalidTopology error.
    pub fn invalid_topology(details: impl Into<String>) -> Self {
        MeshError::InvalidTopology {
            details: details.into(),
        }
    }

    /// Create a BooleanFailed error.
    pub fn boolean_failed(operation: impl Into<String>, details: impl Into<String>) -> Self {
        MeshError::BooleanFailed {
            details: details.into(),
            operation: operation.into(),
        }
    }
}

/// Validation issues that can be collected during mesh validation.
///
/// Unlike `MeshError`, these represent issues that may be warnings rather than errors,
/// and multiple issues can be collected without stopping validation.
#[derive(Debug, Clone)]
pub enum ValidationIssue {
    /// Face references a vertex index that doesn't exist.
    InvalidVertexIndex {
        face_index: usize,
        vertex_index: u32,
        vertex_count: usize,
    },
    /// Vertex has NaN coordinate.
    NaNCoordinate {
        vertex_index: usize,
        coordinate: &'static str,
    },
    /// Vertex has infinite coordinate.
    InfiniteCoordinate {
        vertex_index: usize,
        coordinate: &'static str,
        value: f64,
    },
    /// Face repeats a vertex, so it spans no area.
    RepeatedVertex { face_index: usize },
}

impl ValidationIssue {
    /// Returns a severity level for the issue.
    pub fn severity(&self) -> IssueSeverity {
        match self {
            ValidationIssue::InvalidVertexIndex { .. } => IssueSeverity::Error,
            ValidationIssue::NaNCoordinate { .. } => IssueSeverity::Error,
            ValidationIssue::InfiniteCoordinate { .. } => IssueSeverity::Error,
            ValidationIssue::RepeatedVertex { .. } => IssueSeverity::Warning,
        }
    }

    /// Returns an error code for programmatic handling.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationIssue::InvalidVertexIndex { .. } => "MESH-2001",
            ValidationIssue::NaNCoordinate { .. } => "MESH-2002",
            ValidationIssue::InfiniteCoordinate { .. } => "MESH-2002",
            ValidationIssue::RepeatedVertex { .. } => "MESH-2005",
        }
    }
}

/// Severity levels for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IssueSeverity {
    /// Warning, mesh may have issues.
    Warning,
    /// Error, mesh is invalid.
    Error,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationIssue::InvalidVertexIndex {
                face_index,
                vertex_index,
                vertex_count,
            } => write!(
                f,
                "face {} references vertex {}, but mesh only has {} vertices",
                face_index, vertex_index, vertex_count
            ),
            ValidationIssue::NaNCoordinate {
                vertex_index,
                coordinate,
            } => write!(f, "vertex {} has NaN {} coordinate", vertex_index, coordinate),
            ValidationIssue::InfiniteCoordinate {
                vertex_index,
                coordinate,
                value,
            } => write!(
                f,
                "vertex {} has infinite {} coordinate ({})",
                vertex_index, coordinate, value
            ),
            ValidationIssue::RepeatedVertex { face_index } => {
                write!(f, "face {} repeats a vertex", face_index)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = MeshError::invalid_vertex_index(5, 100, 50);
        assert_eq!(err.code(), ErrorCode::InvalidVertexIndex);
        assert_eq!(err.code().as_str(), "MESH-2001");

        let err = MeshError::invalid_parameter("lambda", 1.5, "a value in (0, 1]");
        assert_eq!(err.code().as_str(), "MESH-2010");
    }

    #[test]
    fn test_parameter_suggestion() {
        let err = MeshError::invalid_parameter("lambda", -0.1, "a value in (0, 1]");
        match err.recovery_suggestion() {
            RecoverySuggestion::AdjustParameters { parameters } => {
                assert_eq!(parameters[0].0, "lambda");
            }
            other => panic!("Expected AdjustParameters, got {:?}", other),
        }
    }

    #[test]
    fn test_grid_too_large_suggests_resolution() {
        let err = MeshError::GridTooLarge {
            dims: [400, 400, 400],
            max_cells: 8_000_000,
        };
        match err.recovery_suggestion() {
            RecoverySuggestion::ReduceResolution { suggested } => {
                let res = suggested.unwrap();
                assert!(res <= 200 && res > 150, "suggested {}", res);
            }
            other => panic!("Expected ReduceResolution, got {:?}", other),
        }
    }

    #[test]
    fn test_location_info() {
        let err = MeshError::invalid_vertex_index(5, 100, 50);
        match err.location() {
            Some(MeshLocation::Face { index }) => assert_eq!(index, 5),
            other => panic!("Expected Face location, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_issue_severity() {
        let issue = ValidationIssue::RepeatedVertex { face_index: 0 };
        assert_eq!(issue.severity(), IssueSeverity::Warning);

        let issue = ValidationIssue::InvalidVertexIndex {
            face_index: 0,
            vertex_index: 100,
            vertex_count: 50,
        };
        assert_eq!(issue.severity(), IssueSeverity::Error);
    }

    #[test]
    fn test_error_display() {
        let err = MeshError::invalid_vertex_index(5, 100, 50);
        let display = format!("{}", err);
        assert!(display.contains("face 5"));
        assert!(display.contains("vertex 100"));
        assert!(display.contains("50 vertices"));
    }
}
