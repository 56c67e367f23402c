//! Stable string names for core operations.
//!
//! A [`Gateway`] is an ordinary value built by the caller. Each entry maps a
//! dotted name to a plain function taking the input document and a flat
//! options object, both as JSON. Missing option fields take the defaults of
//! the matching `mesh_core` parameter struct.

use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow, bail};
use mesh_core::{
    BooleanOp, BooleanParams, DecimateParams, HoleFillParams, IsosurfaceParams, KdTree,
    ReconstructionParams, RegistrationParams, RepairParams, SdfParams, SmoothParams,
    SubdivideParams,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::io::{Document, MeshDocument, ReportDocument, Xyz};

/// `(input, options) -> result`
pub type Operation = fn(&Value, &Value) -> Result<Value>;

#[derive(Default)]
pub struct Gateway {
    operations: BTreeMap<&'static str, Operation>,
}

impl Gateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gateway exposing every mesh-core operation the CLI knows about.
    pub fn with_core_operations() -> Self {
        let mut gateway = Self::new();
        gateway
            .register("mesh.validate", validate)
            .register("mesh.repair", repair)
            .register("mesh.fill_holes", fill_holes)
            .register("mesh.subdivide.loop", subdivide_loop)
            .register("mesh.subdivide.catmull_clark", subdivide_catmull_clark)
            .register("mesh.smooth", smooth)
            .register("mesh.decimate", decimate)
            .register("mesh.boolean", boolean)
            .register("mesh.sdf", sdf)
            .register("mesh.remesh.isosurface", remesh_isosurface)
            .register("mesh.register", register)
            .register("points.nearest", nearest)
            .register("points.delaunay", delaunay)
            .register("points.voronoi", voronoi)
            .register("points.reconstruct", reconstruct);
        gateway
    }

    pub fn register(&mut self, name: &'static str, operation: Operation) -> &mut Self {
        self.operations.insert(name, operation);
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.operations.keys().copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    pub fn call(&self, name: &str, input: &Value, options: &Value) -> Result<Value> {
        let operation = self
            .operations
            .get(name)
            .ok_or_else(|| anyhow!("unknown operation '{name}' (try `mesh call --list`)"))?;
        debug!(operation = name, "Dispatching gateway call");
        operation(input, options).with_context(|| format!("operation '{name}' failed"))
    }
}

/// Options object, or the parameter defaults when absent.
fn options<T: DeserializeOwned + Default>(options: &Value) -> Result<T> {
    if options.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(options.clone()).context("invalid options")
}

fn mesh_input(input: &Value) -> Result<mesh_core::Mesh> {
    MeshDocument::deserialize(input)
        .context("input is not a mesh document")?
        .to_mesh()
}

fn mesh_field(input: &Value, key: &str) -> Result<mesh_core::Mesh> {
    let value = input
        .get(key)
        .ok_or_else(|| anyhow!("input needs a '{key}' mesh"))?;
    mesh_input(value).with_context(|| format!("in '{key}'"))
}

fn cloud_input(input: &Value) -> Result<mesh_core::PointCloud> {
    Document::deserialize(input)
        .context("input is neither a mesh nor a point cloud document")?
        .to_cloud()
}

fn mesh_value(mesh: &mesh_core::Mesh) -> Result<Value> {
    Ok(serde_json::to_value(MeshDocument::from_mesh(mesh))?)
}

fn validate(input: &Value, _options: &Value) -> Result<Value> {
    let report = mesh_core::validate_mesh(&mesh_input(input)?)?;
    Ok(serde_json::to_value(ReportDocument::from(&report))?)
}

fn repair(input: &Value, opts: &Value) -> Result<Value> {
    let params: RepairParams = options(opts)?;
    let result = mesh_core::repair_mesh(&mesh_input(input)?, &params)?;
    let s = &result.stats;
    Ok(json!({
        "mesh": mesh_value(&result.mesh)?,
        "stats": {
            "vertices_stitched": s.vertices_stitched,
            "duplicate_faces_removed": s.duplicate_faces_removed,
            "degenerate_faces_removed": s.degenerate_faces_removed,
            "non_manifold_faces_removed": s.non_manifold_faces_removed,
            "vertices_split": s.vertices_split,
            "holes_filled": s.holes_filled,
            "holes_remaining": s.holes_remaining,
            "unreferenced_vertices_removed": s.unreferenced_vertices_removed,
        },
    }))
}

fn fill_holes(input: &Value, opts: &Value) -> Result<Value> {
    let params: HoleFillParams = options(opts)?;
    let mut mesh = mesh_input(input)?;
    let filled = mesh_core::fill_holes(&mut mesh, &params)?;
    Ok(json!({ "mesh": mesh_value(&mesh)?, "holes_filled": filled }))
}

fn subdivide_loop(input: &Value, opts: &Value) -> Result<Value> {
    let params: SubdivideParams = options(opts)?;
    let result = mesh_core::subdivide_loop(&mesh_input(input)?, &params)?;
    Ok(json!({
        "mesh": mesh_value(&result.mesh)?,
        "iterations": result.iterations_performed,
    }))
}

fn subdivide_catmull_clark(input: &Value, opts: &Value) -> Result<Value> {
    let params: SubdivideParams = options(opts)?;
    let mesh = MeshDocument::deserialize(input)
        .context("input is not a mesh document")?
        .to_poly_mesh()?;
    let result = mesh_core::subdivide_catmull_clark(&mesh, &params)?;
    Ok(json!({
        "mesh": serde_json::to_value(MeshDocument::from_poly_mesh(&result.mesh))?,
        "iterations": result.iterations_performed,
    }))
}

fn smooth(input: &Value, opts: &Value) -> Result<Value> {
    let params: SmoothParams = options(opts)?;
    let result = mesh_core::smooth_mesh(&mesh_input(input)?, &params)?;
    Ok(json!({
        "mesh": mesh_value(&result.mesh)?,
        "average_displacement": result.average_displacement,
        "max_displacement": result.max_displacement,
    }))
}

fn decimate(input: &Value, opts: &Value) -> Result<Value> {
    let params: DecimateParams = options(opts)?;
    let result = mesh_core::decimate_mesh(&mesh_input(input)?, &params)?;
    Ok(json!({
        "mesh": mesh_value(&result.mesh)?,
        "original_triangles": result.original_triangles,
        "final_triangles": result.final_triangles,
        "collapses_performed": result.collapses_performed,
    }))
}

#[derive(Deserialize)]
struct BooleanOptions {
    op: BooleanOp,
    #[serde(flatten)]
    params: BooleanParams,
}

/// Input `{a, b}`; options `{op, epsilon?, weld_tolerance?}`.
fn boolean(input: &Value, opts: &Value) -> Result<Value> {
    let BooleanOptions { op, params } =
        serde_json::from_value(opts.clone()).context("options need an 'op'")?;
    let a = mesh_field(input, "a")?;
    let b = mesh_field(input, "b")?;
    let result = mesh_core::boolean_operation(&a, &b, op, &params)?;
    Ok(json!({
        "mesh": mesh_value(&result.mesh)?,
        "disjoint": result.stats.disjoint,
    }))
}

fn sdf(input: &Value, opts: &Value) -> Result<Value> {
    let params: SdfParams = options(opts)?;
    let grid = mesh_core::mesh_to_sdf(&mesh_input(input)?, &params)?;
    Ok(json!({
        "dims": grid.dims,
        "origin": Xyz::from(grid.origin),
        "cell_size": grid.cell_size,
        "values": grid.values,
    }))
}

#[derive(Default, Deserialize)]
struct RemeshOptions {
    #[serde(flatten)]
    sdf: SdfParams,
    #[serde(flatten)]
    iso: IsosurfaceParams,
}

/// Mesh to SDF to marching cubes.
fn remesh_isosurface(input: &Value, opts: &Value) -> Result<Value> {
    let RemeshOptions { sdf, iso } = options(opts)?;
    let grid = mesh_core::mesh_to_sdf(&mesh_input(input)?, &sdf)?;
    let result = mesh_core::marching_cubes(&grid, &iso)?;
    Ok(json!({
        "mesh": mesh_value(&result.mesh)?,
        "active_cells": result.active_cells,
    }))
}

/// Input `{source, target}`.
fn register(input: &Value, opts: &Value) -> Result<Value> {
    let params: RegistrationParams = options(opts)?;
    let source = mesh_field(input, "source")?;
    let target = mesh_field(input, "target")?;
    let result = mesh_core::align_meshes(&source, &target, &params)?;
    let reg = &result.registration;
    let q = reg.transformation.rotation.quaternion();
    Ok(json!({
        "mesh": mesh_value(&result.mesh)?,
        "rotation": { "w": q.w, "x": q.i, "y": q.j, "z": q.k },
        "translation": Xyz::from(reg.transformation.translation),
        "rms_error": reg.rms_error(),
        "iterations": reg.iterations,
        "converged": reg.converged,
    }))
}

#[derive(Deserialize)]
struct NearestOptions {
    query: Xyz,
    #[serde(default = "default_k")]
    k: usize,
}

fn default_k() -> usize {
    1
}

fn nearest(input: &Value, opts: &Value) -> Result<Value> {
    let NearestOptions { query, k } =
        serde_json::from_value(opts.clone()).context("options need a 'query' point")?;
    let tree = KdTree::build(&cloud_input(input)?.positions());
    let found: Vec<Value> = tree
        .k_nearest(&query.point(), k)
        .iter()
        .map(|n| json!({ "index": n.index, "distance": n.distance() }))
        .collect();
    Ok(Value::Array(found))
}

fn delaunay(input: &Value, _options: &Value) -> Result<Value> {
    let tets = mesh_core::tetrahedralize(&cloud_input(input)?.positions())?;
    let tetrahedra: Vec<[u32; 4]> = tets.tetrahedra.iter().map(|t| t.vertices).collect();
    Ok(json!({
        "tetrahedra": tetrahedra,
        "volume": tets.volume(),
        "duplicates": tets.duplicates,
        "hull": mesh_value(&tets.surface_mesh())?,
    }))
}

fn voronoi(input: &Value, _options: &Value) -> Result<Value> {
    let diagram = mesh_core::tetrahedralize(&cloud_input(input)?.positions())?.voronoi();
    let vertices: Vec<Xyz> = diagram.vertices.iter().map(|&p| p.into()).collect();
    let cells: Vec<Value> = diagram
        .cells
        .iter()
        .map(|c| {
            json!({
                "site": c.site,
                "vertices": c.vertices,
                "neighbors": c.neighbors,
                "bounded": c.bounded,
            })
        })
        .collect();
    Ok(json!({ "vertices": vertices, "edges": diagram.edges, "cells": cells }))
}

fn reconstruct(input: &Value, opts: &Value) -> Result<Value> {
    let params: ReconstructionParams = options(opts)?;
    let cloud = cloud_input(input)?;
    if cloud.is_empty() {
        bail!("point cloud is empty");
    }
    let result = mesh_core::reconstruct_surface(&cloud, &params)?;
    Ok(json!({
        "mesh": mesh_value(&result.mesh)?,
        "voxel_size": result.voxel_size,
        "normals_estimated": result.normals_estimated,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::Mesh;
    use nalgebra::Point3;

    fn tetrahedron() -> Value {
        let mesh = Mesh::from_parts(
            [
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(0.0, 0.0, 1.0),
            ],
            vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]],
        );
        mesh_value(&mesh).unwrap()
    }

    #[test]
    fn lists_names_in_order() {
        let gateway = Gateway::with_core_operations();
        let names: Vec<_> = gateway.names().collect();
        assert!(names.contains(&"mesh.subdivide.loop"));
        assert!(names.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn loop_subdivision_through_the_gateway() {
        let gateway = Gateway::with_core_operations();
        let out = gateway
            .call("mesh.subdivide.loop", &tetrahedron(), &json!({ "iterations": 1 }))
            .unwrap();
        let mesh: MeshDocument = serde_json::from_value(out["mesh"].clone()).unwrap();
        assert_eq!(mesh.vertices.len(), 10);
        assert_eq!(mesh.faces.len(), 16);
    }

    #[test]
    fn null_options_use_defaults() {
        let gateway = Gateway::with_core_operations();
        let out = gateway.call("mesh.validate", &tetrahedron(), &Value::Null).unwrap();
        assert_eq!(out["is_closed_solid"], json!(true));
        assert_eq!(out["euler_characteristic"], json!(2));
    }

    #[test]
    fn unknown_names_are_errors() {
        let gateway = Gateway::with_core_operations();
        assert!(!gateway.contains("mesh.teleport"));
        assert!(gateway.call("mesh.teleport", &tetrahedron(), &Value::Null).is_err());
    }

    #[test]
    fn boolean_requires_an_op() {
        let gateway = Gateway::with_core_operations();
        let input = json!({ "a": tetrahedron(), "b": tetrahedron() });
        assert!(gateway.call("mesh.boolean", &input, &Value::Null).is_err());
    }

    #[test]
    fn nearest_point_query() {
        let gateway = Gateway::with_core_operations();
        let input = json!({ "points": [
            { "x": 0.0, "y": 0.0, "z": 0.0 },
            { "x": 5.0, "y": 0.0, "z": 0.0 },
            { "x": 0.0, "y": 3.0, "z": 0.0 },
        ]});
        let out = gateway
            .call("points.nearest", &input, &json!({ "query": { "x": 0.0, "y": 2.5, "z": 0.0 }, "k": 2 }))
            .unwrap();
        assert_eq!(out[0]["index"], json!(2));
        assert_eq!(out[1]["index"], json!(0));
    }

    #[test]
    fn caller_supplied_operations() {
        fn echo(input: &Value, _: &Value) -> Result<Value> {
            Ok(input.clone())
        }
        let mut gateway = Gateway::new();
        gateway.register("echo", echo);
        assert_eq!(gateway.call("echo", &json!(7), &Value::Null).unwrap(), json!(7));
    }
}
