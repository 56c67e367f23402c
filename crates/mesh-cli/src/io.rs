//! JSON documents for meshes and point clouds.
//!
//! A mesh document is `{ "vertices": [{x,y,z}], "faces": [[i,j,k] | [i,j,k,l]] }`
//! and a point cloud document is `{ "points": [{x,y,z}], "normals"?: [{x,y,z}] }`.
//! Quad faces are accepted everywhere; triangle-only operations triangulate them.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use mesh_core::pointcloud::CloudPoint;
use mesh_core::{Mesh, MeshReport, PointCloud, PolyMesh, Vertex};
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Xyz {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl From<Point3<f64>> for Xyz {
    fn from(p: Point3<f64>) -> Self {
        Self { x: p.x, y: p.y, z: p.z }
    }
}

impl From<Vector3<f64>> for Xyz {
    fn from(v: Vector3<f64>) -> Self {
        Self { x: v.x, y: v.y, z: v.z }
    }
}

impl Xyz {
    pub fn point(self) -> Point3<f64> {
        Point3::new(self.x, self.y, self.z)
    }

    pub fn vector(self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshDocument {
    pub vertices: Vec<Xyz>,
    pub faces: Vec<Vec<u32>>,
}

impl MeshDocument {
    pub fn from_mesh(mesh: &Mesh) -> Self {
        Self {
            vertices: mesh.vertices.iter().map(|v| v.position.into()).collect(),
            faces: mesh.faces.iter().map(|f| f.to_vec()).collect(),
        }
    }

    pub fn from_poly_mesh(mesh: &PolyMesh) -> Self {
        Self {
            vertices: mesh.vertices.iter().map(|v| v.position.into()).collect(),
            faces: mesh.faces.clone(),
        }
    }

    /// Polygon mesh with every face checked for arity and index range.
    pub fn to_poly_mesh(&self) -> Result<PolyMesh> {
        let mesh = PolyMesh {
            vertices: self.vertices.iter().map(|p| Vertex::new(p.point())).collect(),
            faces: self.faces.clone(),
        };
        mesh.validate()?;
        Ok(mesh)
    }

    /// Triangle mesh; quads and larger polygons are fan-triangulated.
    pub fn to_mesh(&self) -> Result<Mesh> {
        if self.faces.iter().all(|f| f.len() == 3) {
            let mesh = Mesh {
                vertices: self.vertices.iter().map(|p| Vertex::new(p.point())).collect(),
                faces: self.faces.iter().map(|f| [f[0], f[1], f[2]]).collect(),
            };
            mesh.validate()?;
            return Ok(mesh);
        }
        Ok(self.to_poly_mesh()?.triangulate())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PointCloudDocument {
    pub points: Vec<Xyz>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normals: Option<Vec<Xyz>>,
}

impl PointCloudDocument {
    pub fn to_cloud(&self) -> Result<PointCloud> {
        let mut cloud = PointCloud::new();
        match &self.normals {
            Some(normals) => {
                if normals.len() != self.points.len() {
                    bail!(
                        "point cloud has {} points but {} normals",
                        self.points.len(),
                        normals.len()
                    );
                }
                for (p, n) in self.points.iter().zip(normals) {
                    cloud.push(CloudPoint::with_normal(p.point(), n.vector()));
                }
            }
            None => {
                for p in &self.points {
                    cloud.push(CloudPoint::new(p.point()));
                }
            }
        }
        cloud.validate()?;
        Ok(cloud)
    }
}

/// Either shape, told apart by its keys.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Document {
    Mesh(MeshDocument),
    Cloud(PointCloudDocument),
}

impl Document {
    /// Point positions of either shape, with normals when a cloud carries them.
    pub fn to_cloud(&self) -> Result<PointCloud> {
        match self {
            Document::Mesh(doc) => Ok(PointCloud::from_mesh(&doc.to_mesh()?)),
            Document::Cloud(doc) => doc.to_cloud(),
        }
    }
}

/// Serializable view of a [`MeshReport`].
#[derive(Debug, Clone, Serialize)]
pub struct ReportDocument {
    pub vertices: usize,
    pub faces: usize,
    pub edges: usize,
    pub components: usize,
    pub is_watertight: bool,
    pub is_manifold: bool,
    pub is_inside_out: bool,
    pub is_closed_solid: bool,
    pub boundary_edges: usize,
    pub non_manifold_edges: usize,
    pub non_manifold_vertices: usize,
    pub degenerate_faces: usize,
    pub euler_characteristic: i64,
    pub signed_volume: f64,
    pub surface_area: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<[Xyz; 2]>,
}

impl From<&MeshReport> for ReportDocument {
    fn from(report: &MeshReport) -> Self {
        Self {
            vertices: report.vertex_count,
            faces: report.face_count,
            edges: report.edge_count,
            components: report.component_count,
            is_watertight: report.is_watertight,
            is_manifold: report.is_manifold,
            is_inside_out: report.is_inside_out,
            is_closed_solid: report.is_closed_solid(),
            boundary_edges: report.boundary_edge_count,
            non_manifold_edges: report.non_manifold_edge_count,
            non_manifold_vertices: report.non_manifold_vertex_count,
            degenerate_faces: report.degenerate_face_count,
            euler_characteristic: report.euler_characteristic(),
            signed_volume: report.signed_volume,
            surface_area: report.surface_area,
            bounds: report.bounds.map(|(min, max)| [min.into(), max.into()]),
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}

pub fn load_mesh(path: &Path) -> Result<Mesh> {
    read_json::<MeshDocument>(path)?
        .to_mesh()
        .with_context(|| format!("Failed to load mesh from {}", path.display()))
}

pub fn load_poly_mesh(path: &Path) -> Result<PolyMesh> {
    read_json::<MeshDocument>(path)?
        .to_poly_mesh()
        .with_context(|| format!("Failed to load mesh from {}", path.display()))
}

pub fn load_document(path: &Path) -> Result<Document> {
    read_json(path)
}

pub fn save_mesh(mesh: &Mesh, path: &Path) -> Result<()> {
    write_json(&MeshDocument::from_mesh(mesh), path)
}

pub fn save_poly_mesh(mesh: &PolyMesh, path: &Path) -> Result<()> {
    write_json(&MeshDocument::from_poly_mesh(mesh), path)
}

pub fn save_value(value: &serde_json::Value, path: &Path) -> Result<()> {
    write_json(value, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::MeshError;
    use tempfile::tempdir;

    fn tetrahedron() -> Mesh {
        Mesh::from_parts(
            [
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(0.0, 0.0, 1.0),
            ],
            vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]],
        )
    }

    #[test]
    fn mesh_survives_a_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tetra.json");
        let mesh = tetrahedron();

        save_mesh(&mesh, &path).unwrap();
        let loaded = load_mesh(&path).unwrap();

        assert_eq!(loaded.faces, mesh.faces);
        assert_eq!(loaded.positions(), mesh.positions());
    }

    #[test]
    fn parses_the_documented_shape() {
        let doc: MeshDocument = serde_json::from_str(
            r#"{"vertices":[{"x":0,"y":0,"z":0},{"x":1,"y":0,"z":0},{"x":1,"y":1,"z":0},{"x":0,"y":1,"z":0}],
                "faces":[[0,1,2,3]]}"#,
        )
        .unwrap();
        let mesh = doc.to_mesh().unwrap();
        assert_eq!(mesh.face_count(), 2);
        assert!((mesh.surface_area() - 1.0).abs() < 1e-12);

        let poly = doc.to_poly_mesh().unwrap();
        assert!(poly.is_quad_mesh());
    }

    #[test]
    fn rejects_out_of_range_indices() {
        let doc = MeshDocument {
            vertices: vec![Xyz { x: 0.0, y: 0.0, z: 0.0 }; 3],
            faces: vec![vec![0, 1, 7]],
        };
        let err = doc.to_mesh().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MeshError>(),
            Some(MeshError::InvalidVertexIndex { vertex_index: 7, .. })
        ));
    }

    #[test]
    fn untagged_document_distinguishes_shapes() {
        let cloud: Document =
            serde_json::from_str(r#"{"points":[{"x":1,"y":2,"z":3}]}"#).unwrap();
        assert!(matches!(cloud, Document::Cloud(_)));

        let mesh: Document = serde_json::from_value(serde_json::to_value(
            MeshDocument::from_mesh(&tetrahedron()),
        )
        .unwrap())
        .unwrap();
        assert_eq!(mesh.to_cloud().unwrap().len(), 4);
    }

    #[test]
    fn cloud_normals_must_match_points() {
        let doc = PointCloudDocument {
            points: vec![Xyz { x: 0.0, y: 0.0, z: 0.0 }; 2],
            normals: Some(vec![Xyz { x: 0.0, y: 0.0, z: 1.0 }]),
        };
        assert!(doc.to_cloud().is_err());
    }
}
