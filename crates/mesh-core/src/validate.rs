//! Mesh validation and reporting.
//!
//! Two layers: [`validate_mesh_data`] checks the *shape* of the input (indices,
//! coordinates) and is what every algorithm calls before touching data;
//! [`validate_mesh`] produces a topological report for a structurally valid mesh.

use nalgebra::Point3;
use tracing::{debug, warn};

use crate::Mesh;
use crate::adjacency::MeshAdjacency;
use crate::error::{MeshError, MeshResult, ValidationIssue};
use crate::repair::non_manifold_vertex_fans;

/// Validation report for a mesh.
#[derive(Debug, Clone)]
pub struct MeshReport {
    /// Whether the mesh has no boundary edges.
    pub is_watertight: bool,

    /// Whether all edges have at most 2 adjacent faces and all vertex fans are connected.
    pub is_manifold: bool,

    /// Number of boundary edges (edges with 1 adjacent face).
    pub boundary_edge_count: usize,

    /// Number of non-manifold edges (edges with >2 adjacent faces).
    pub non_manifold_edge_count: usize,

    /// Number of vertices whose incident faces form more than one fan.
    pub non_manifold_vertex_count: usize,

    /// Number of faces with (near) zero area.
    pub degenerate_face_count: usize,

    /// Total vertex count.
    pub vertex_count: usize,

    /// Total face count.
    pub face_count: usize,

    /// Number of unique edges.
    pub edge_count: usize,

    /// Bounding box as (min_corner, max_corner).
    pub bounds: Option<(Point3<f64>, Point3<f64>)>,

    /// Signed volume of the mesh (positive = outward normals, negative = inside-out).
    /// Only meaningful for closed (watertight) meshes.
    pub signed_volume: f64,

    /// Total surface area of the mesh.
    pub surface_area: f64,

    /// Whether the mesh appears to be inside-out (negative signed volume).
    pub is_inside_out: bool,

    /// Number of face-connected components.
    pub component_count: usize,
}

impl MeshReport {
    /// Check if mesh passes basic validity checks.
    pub fn is_valid(&self) -> bool {
        self.vertex_count > 0 && self.face_count > 0
    }

    /// Closed, manifold and outward-facing.
    pub fn is_closed_solid(&self) -> bool {
        self.is_watertight && self.is_manifold && !self.is_inside_out
    }

    /// Euler characteristic `V - E + F`.
    pub fn euler_characteristic(&self) -> i64 {
        self.vertex_count as i64 - self.edge_count as i64 + self.face_count as i64
    }
}

impl std::fmt::Display for MeshReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Mesh Report:")?;
        writeln!(f, "  Vertices: {}", self.vertex_count)?;
        writeln!(f, "  Faces: {}", self.face_count)?;
        writeln!(f, "  Edges: {}", self.edge_count)?;
        writeln!(f, "  Components: {}", self.component_count)?;

        if let Some((min, max)) = &self.bounds {
            writeln!(
                f,
                "  Bounds: [{:.3}, {:.3}, {:.3}] to [{:.3}, {:.3}, {:.3}]",
                min.x, min.y, min.z, max.x, max.y, max.z
            )?;
        }

        writeln!(f, "  Surface Area: {:.4}", self.surface_area)?;
        writeln!(f, "  Signed Volume: {:.4}", self.signed_volume)?;
        writeln!(
            f,
            "  Watertight: {} (boundary edges: {})",
            if self.is_watertight { "yes" } else { "NO" },
            self.boundary_edge_count
        )?;
        writeln!(
            f,
            "  Manifold: {} (non-manifold edges: {}, vertices: {})",
            if self.is_manifold { "yes" } else { "NO" },
            self.non_manifold_edge_count,
            self.non_manifold_vertex_count
        )?;
        writeln!(f, "  Degenerate faces: {}", self.degenerate_face_count)?;
        writeln!(
            f,
            "  Orientation: {}",
            if self.is_inside_out {
                "INSIDE-OUT"
            } else {
                "outward"
            }
        )?;
        Ok(())
    }
}

/// Validate a mesh and return a report.
///
/// Fails only on input-shape problems (see [`validate_mesh_data_strict`]).
pub fn validate_mesh(mesh: &Mesh) -> MeshResult<MeshReport> {
    validate_mesh_data_strict(mesh)?;
    let adjacency = MeshAdjacency::build(mesh);

    let boundary_edge_count = adjacency.boundary_edge_count();
    let non_manifold_edge_count = adjacency.non_manifold_edge_count();
    let non_manifold_vertex_count = (0..mesh.vertices.len() as u32)
        .filter(|&v| non_manifold_vertex_fans(mesh, &adjacency, v).len() > 1)
        .count();
    let degenerate_face_count = mesh
        .triangles()
        .filter(|t| t.area() <= crate::math::EPSILON)
        .count();
    let signed_volume = mesh.signed_volume();

    let report = MeshReport {
        is_watertight: boundary_edge_count == 0,
        is_manifold: non_manifold_edge_count == 0 && non_manifold_vertex_count == 0,
        boundary_edge_count,
        non_manifold_edge_count,
        non_manifold_vertex_count,
        degenerate_face_count,
        vertex_count: mesh.vertex_count(),
        face_count: mesh.face_count(),
        edge_count: adjacency.edge_count(),
        bounds: mesh.bounds(),
        signed_volume,
        surface_area: mesh.surface_area(),
        is_inside_out: signed_volume < 0.0,
        component_count: count_components(mesh),
    };

    if !report.is_watertight {
        warn!(
            boundary_edges = boundary_edge_count,
            "Mesh is not watertight"
        );
    }
    if !report.is_manifold {
        warn!(
            non_manifold_edges = non_manifold_edge_count,
            non_manifold_vertices = non_manifold_vertex_count,
            "Mesh is not manifold"
        );
    }
    if report.is_inside_out && report.is_watertight {
        warn!("Mesh appears to be inside-out (negative signed volume)");
    }
    debug!("{}", report);

    Ok(report)
}

fn count_components(mesh: &Mesh) -> usize {
    let mut parent: Vec<u32> = (0..mesh.vertices.len() as u32).collect();
    fn find(parent: &mut [u32], mut x: u32) -> u32 {
        while parent[x as usize] != x {
            parent[x as usize] = parent[parent[x as usize] as usize];
            x = parent[x as usize];
        }
        x
    }
    for face in &mesh.faces {
        for k in 1..3 {
            let a = find(&mut parent, face[0]);
            let b = find(&mut parent, face[k]);
            if a != b {
                parent[a.max(b) as usize] = a.min(b);
            }
        }
    }

    let mut used = vec![false; mesh.vertices.len()];
    for face in &mesh.faces {
        for &v in face {
            used[v as usize] = true;
        }
    }
    let mut roots: Vec<u32> = (0..mesh.vertices.len() as u32)
        .filter(|&v| used[v as usize])
        .map(|v| find(&mut parent, v))
        .collect();
    roots.sort_unstable();
    roots.dedup();
    roots.len()
}

/// Options for mesh data validation.
#[derive(Debug, Clone)]
pub struct ValidationOptions {
    /// Whether to reject the mesh on finding invalid data (default: true).
    /// If false, issues are collected but validation continues.
    pub reject_on_invalid: bool,
    /// Maximum number of issues to collect before stopping (default: 100).
    pub max_issues: usize,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            reject_on_invalid: true,
            max_issues: 100,
        }
    }
}

impl ValidationOptions {
    /// Create options that collect all issues without rejecting.
    pub fn collect_all() -> Self {
        Self {
            reject_on_invalid: false,
            max_issues: 1000,
        }
    }
}

/// Result of mesh data validation.
#[derive(Debug, Clone, Default)]
pub struct DataValidationResult {
    /// List of issues found during validation.
    pub issues: Vec<ValidationIssue>,
    /// Number of invalid vertex indices found.
    pub invalid_index_count: usize,
    /// Number of NaN coordinates found.
    pub nan_count: usize,
    /// Number of infinite coordinates found.
    pub infinity_count: usize,
}

impl DataValidationResult {
    /// Check if validation passed with no issues.
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    /// Get total number of issues found.
    pub fn issue_count(&self) -> usize {
        self.issues.len()
    }
}

impl std::fmt::Display for DataValidationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            return write!(f, "Data validation passed: no issues found");
        }
        writeln!(f, "Data validation found {} issue(s):", self.issue_count())?;
        for issue in &self.issues {
            writeln!(f, "  - [{}] {}", issue.code(), issue)?;
        }
        Ok(())
    }
}

/// Validate mesh data for invalid indices and coordinates.
///
/// Checks that face indices are within vertex bounds and that no coordinate
/// is NaN or infinite. Faces that repeat a vertex are reported as warnings.
///
/// # Returns
/// - `Ok(DataValidationResult)` - Validation completed (check `is_valid()` for result)
/// - `Err(MeshError)` - only when `reject_on_invalid` is true and an error-level issue was found
pub fn validate_mesh_data(
    mesh: &Mesh,
    options: &ValidationOptions,
) -> MeshResult<DataValidationResult> {
    let mut result = DataValidationResult::default();
    let vertex_count = mesh.vertices.len();

    for (vertex_index, vertex) in mesh.vertices.iter().enumerate() {
        if result.issues.len() >= options.max_issues {
            break;
        }
        for (coordinate, value) in named_coords(&vertex.position) {
            if value.is_finite() {
                continue;
            }
            if options.reject_on_invalid {
                return Err(MeshError::invalid_coordinate(vertex_index, coordinate, value));
            }
            if value.is_nan() {
                result.nan_count += 1;
                result.issues.push(ValidationIssue::NaNCoordinate {
                    vertex_index,
                    coordinate,
                });
            } else {
                result.infinity_count += 1;
                result.issues.push(ValidationIssue::InfiniteCoordinate {
                    vertex_index,
                    coordinate,
                    value,
                });
            }
        }
    }

    for (face_index, face) in mesh.faces.iter().enumerate() {
        if result.issues.len() >= options.max_issues {
            break;
        }
        for &vertex_index in face {
            if vertex_index as usize >= vertex_count {
                if options.reject_on_invalid {
                    return Err(MeshError::invalid_vertex_index(
                        face_index,
                        vertex_index,
                        vertex_count,
                    ));
                }
                result.invalid_index_count += 1;
                result.issues.push(ValidationIssue::InvalidVertexIndex {
                    face_index,
                    vertex_index,
                    vertex_count,
                });
            }
        }
        if face[0] == face[1] || face[1] == face[2] || face[0] == face[2] {
            result
                .issues
                .push(ValidationIssue::RepeatedVertex { face_index });
        }
    }

    if result.is_valid() {
        debug!("Mesh data validation passed");
    } else {
        warn!(
            issues = result.issues.len(),
            invalid_indices = result.invalid_index_count,
            nan = result.nan_count,
            inf = result.infinity_count,
            "Mesh data validation found issues"
        );
    }

    Ok(result)
}

/// Validate mesh data, failing on the first error-level issue.
pub fn validate_mesh_data_strict(mesh: &Mesh) -> MeshResult<()> {
    validate_mesh_data(mesh, &ValidationOptions::default())?;
    Ok(())
}

/// Reject any non-finite coordinate in a point sequence.
pub fn check_coordinates<'a>(points: impl IntoIterator<Item = &'a Point3<f64>>) -> MeshResult<()> {
    for (index, p) in points.into_iter().enumerate() {
        for (coordinate, value) in named_coords(p) {
            if !value.is_finite() {
                return Err(MeshError::invalid_coordinate(index, coordinate, value));
            }
        }
    }
    Ok(())
}

fn named_coords(p: &Point3<f64>) -> [(&'static str, f64); 3] {
    [("x", p.x), ("y", p.y), ("z", p.z)]
}
