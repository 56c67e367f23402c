//! mesh subdivide command - Loop or Catmull-Clark refinement.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use mesh_core::{SubdivideParams, subdivide_catmull_clark, subdivide_loop};
use serde::Serialize;

use crate::{Cli, OutputFormat, SubdivisionScheme, io, output};

#[derive(Serialize)]
struct SubdivideSummary {
    input: String,
    output: String,
    scheme: &'static str,
    iterations: usize,
    original_faces: usize,
    final_faces: usize,
    final_vertices: usize,
}

pub fn run(
    input: &Path,
    output_path: &Path,
    scheme: SubdivisionScheme,
    iterations: usize,
    cli: &Cli,
) -> Result<()> {
    let params = SubdivideParams::with_iterations(iterations);

    let summary = match scheme {
        SubdivisionScheme::Loop => {
            let mesh = io::load_mesh(input)?;
            let result = subdivide_loop(&mesh, &params)?;
            io::save_mesh(&result.mesh, output_path)?;
            SubdivideSummary {
                input: input.display().to_string(),
                output: output_path.display().to_string(),
                scheme: "loop",
                iterations: result.iterations_performed,
                original_faces: result.original_faces,
                final_faces: result.final_faces,
                final_vertices: result.mesh.vertex_count(),
            }
        }
        SubdivisionScheme::CatmullClark => {
            let mesh = io::load_poly_mesh(input)?;
            let result = subdivide_catmull_clark(&mesh, &params)?;
            io::save_poly_mesh(&result.mesh, output_path)?;
            SubdivideSummary {
                input: input.display().to_string(),
                output: output_path.display().to_string(),
                scheme: "catmull-clark",
                iterations: result.iterations_performed,
                original_faces: result.original_faces,
                final_faces: result.final_faces,
                final_vertices: result.mesh.vertex_count(),
            }
        }
    };

    match cli.format {
        OutputFormat::Json => output::print(&summary, cli.quiet),
        OutputFormat::Text => {
            if !cli.quiet {
                output::success(
                    &format!("Subdivided mesh saved to {}", output_path.display()),
                    cli.format,
                    cli.quiet,
                );
                println!(
                    "  {}: {} × {}",
                    "Scheme".cyan(),
                    summary.scheme,
                    summary.iterations
                );
                println!(
                    "  {}: {} → {}",
                    "Faces".cyan(),
                    summary.original_faces,
                    summary.final_faces
                );
                println!("  {}: {}", "Vertices".cyan(), summary.final_vertices);
            }
        }
    }

    Ok(())
}
