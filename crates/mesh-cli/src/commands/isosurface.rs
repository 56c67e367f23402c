//! mesh isosurface command - remesh through a scalar field.
//!
//! Mesh input is sampled into a signed distance grid; point clouds go
//! through tangent-plane surface reconstruction. Both finish with marching
//! cubes.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use mesh_core::{
    IsosurfaceParams, ReconstructionParams, SdfParams, marching_cubes, mesh_to_sdf,
    reconstruct_surface, validate_mesh,
};
use serde::Serialize;

use crate::io::Document;
use crate::{Cli, OutputFormat, io, output};

#[derive(Serialize)]
struct IsosurfaceSummary {
    input: String,
    output: String,
    source: &'static str,
    grid: [usize; 3],
    vertices: usize,
    faces: usize,
    watertight: bool,
    volume: f64,
}

pub fn run(
    input: &Path,
    output_path: &Path,
    resolution: usize,
    voxel_size: Option<f64>,
    iso_value: f64,
    cli: &Cli,
) -> Result<()> {
    let (source, grid_dims, mesh) = match io::load_document(input)? {
        Document::Mesh(doc) => {
            let mesh = doc.to_mesh()?;
            let grid = mesh_to_sdf(&mesh, &SdfParams::with_resolution(resolution))?;
            output::info(
                &format!(
                    "Extracting level {iso_value} from a {}x{}x{} distance grid...",
                    grid.dims[0], grid.dims[1], grid.dims[2]
                ),
                cli.format,
                cli.quiet,
            );
            let result = marching_cubes(&grid, &IsosurfaceParams::at(iso_value))?;
            ("sdf", grid.dims, result.mesh)
        }
        Document::Cloud(doc) => {
            let cloud = doc.to_cloud()?;
            let params = match voxel_size {
                Some(size) => ReconstructionParams::with_voxel_size(size),
                None => ReconstructionParams::default(),
            };
            output::info(
                &format!("Reconstructing surface from {} points...", cloud.len()),
                cli.format,
                cli.quiet,
            );
            let result = reconstruct_surface(&cloud, &params)?;
            ("point-cloud", result.grid_dims, result.mesh)
        }
    };

    let report = validate_mesh(&mesh)?;
    io::save_mesh(&mesh, output_path)?;

    let summary = IsosurfaceSummary {
        input: input.display().to_string(),
        output: output_path.display().to_string(),
        source,
        grid: grid_dims,
        vertices: mesh.vertex_count(),
        faces: mesh.face_count(),
        watertight: report.is_watertight,
        volume: report.signed_volume,
    };

    match cli.format {
        OutputFormat::Json => output::print(&summary, cli.quiet),
        OutputFormat::Text => {
            if !cli.quiet {
                output::success(
                    &format!("Isosurface saved to {}", output_path.display()),
                    cli.format,
                    cli.quiet,
                );
                println!(
                    "  {}: {}x{}x{} ({})",
                    "Grid".cyan(),
                    summary.grid[0],
                    summary.grid[1],
                    summary.grid[2],
                    summary.source
                );
                println!(
                    "  {}: {} vertices, {} faces",
                    "Surface".cyan(),
                    summary.vertices,
                    summary.faces
                );
                println!(
                    "  {}: {}",
                    "Watertight".cyan(),
                    output::yes_no(summary.watertight)
                );
                println!("  {}: {:.6}", "Volume".cyan(), summary.volume);
            }
        }
    }

    Ok(())
}
