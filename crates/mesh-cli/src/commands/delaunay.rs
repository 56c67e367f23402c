//! mesh delaunay command - tetrahedralize a point set.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use mesh_core::tetrahedralize;
use serde::Serialize;

use crate::{Cli, OutputFormat, io, output};

#[derive(Serialize)]
struct DelaunaySummary {
    input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hull: Option<String>,
    points: usize,
    duplicates: usize,
    tetrahedra: usize,
    hull_faces: usize,
    volume: f64,
    voronoi_vertices: usize,
    voronoi_edges: usize,
    bounded_cells: usize,
}

pub fn run(input: &Path, hull_path: Option<&Path>, cli: &Cli) -> Result<()> {
    let cloud = io::load_document(input)?.to_cloud()?;
    let points = cloud.positions();

    output::info(
        &format!("Tetrahedralizing {} points...", points.len()),
        cli.format,
        cli.quiet,
    );

    let tets = tetrahedralize(&points)?;
    let voronoi = tets.voronoi();
    let hull = tets.surface_mesh();
    if let Some(path) = hull_path {
        io::save_mesh(&hull, path)?;
    }

    let summary = DelaunaySummary {
        input: input.display().to_string(),
        hull: hull_path.map(|p| p.display().to_string()),
        points: points.len(),
        duplicates: tets.duplicates.len(),
        tetrahedra: tets.len(),
        hull_faces: hull.face_count(),
        volume: tets.volume(),
        voronoi_vertices: voronoi.vertices.len(),
        voronoi_edges: voronoi.edges.len(),
        bounded_cells: voronoi.cells.iter().filter(|c| c.bounded).count(),
    };

    match cli.format {
        OutputFormat::Json => output::print(&summary, cli.quiet),
        OutputFormat::Text => {
            if !cli.quiet {
                println!("{}", "Delaunay Tetrahedralization".bold().underline());
                println!(
                    "  {}: {} ({} duplicates skipped)",
                    "Points".cyan(),
                    summary.points,
                    summary.duplicates
                );
                println!("  {}: {}", "Tetrahedra".cyan(), summary.tetrahedra);
                println!("  {}: {}", "Hull faces".cyan(), summary.hull_faces);
                println!("  {}: {:.6}", "Hull volume".cyan(), summary.volume);
                println!(
                    "  {}: {} vertices, {} edges, {} bounded cells",
                    "Voronoi".cyan(),
                    summary.voronoi_vertices,
                    summary.voronoi_edges,
                    summary.bounded_cells
                );
                if let Some(path) = &summary.hull {
                    output::success(&format!("Hull saved to {path}"), cli.format, cli.quiet);
                }
            }
        }
    }

    Ok(())
}
