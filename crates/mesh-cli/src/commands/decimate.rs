//! mesh decimate command - simplify mesh by reducing triangles.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use mesh_core::{DecimateParams, decimate_mesh};
use serde::Serialize;

use crate::{Cli, OutputFormat, io, output};

#[derive(Serialize)]
struct DecimateSummary {
    input: String,
    output: String,
    success: bool,
    original_triangles: usize,
    final_triangles: usize,
    reduction_ratio: f64,
    collapses_performed: usize,
    collapses_rejected: usize,
}

pub fn run(
    input: &Path,
    output_path: &Path,
    ratio: Option<f64>,
    count: Option<usize>,
    preserve_boundary: bool,
    cli: &Cli,
) -> Result<()> {
    let mesh = io::load_mesh(input)?;

    let mut params = match count {
        Some(target_count) => DecimateParams::with_target_triangles(target_count),
        None => DecimateParams::with_target_ratio(ratio.unwrap_or(0.5)),
    };
    params.preserve_boundary = preserve_boundary;

    output::info(
        &format!("Decimating mesh ({} triangles)...", mesh.face_count()),
        cli.format,
        cli.quiet,
    );

    let result = decimate_mesh(&mesh, &params)?;
    io::save_mesh(&result.mesh, output_path)?;

    let reduction = if result.original_triangles == 0 {
        0.0
    } else {
        1.0 - result.final_triangles as f64 / result.original_triangles as f64
    };

    let summary = DecimateSummary {
        input: input.display().to_string(),
        output: output_path.display().to_string(),
        success: true,
        original_triangles: result.original_triangles,
        final_triangles: result.final_triangles,
        reduction_ratio: reduction,
        collapses_performed: result.collapses_performed,
        collapses_rejected: result.collapses_rejected,
    };

    match cli.format {
        OutputFormat::Json => output::print(&summary, cli.quiet),
        OutputFormat::Text => {
            if !cli.quiet {
                output::success(
                    &format!("Decimated mesh saved to {}", output_path.display()),
                    cli.format,
                    cli.quiet,
                );
                println!(
                    "  {}: {} → {} triangles ({:.1}% reduction)",
                    "Triangles".cyan(),
                    summary.original_triangles,
                    summary.final_triangles,
                    summary.reduction_ratio * 100.0
                );
                println!(
                    "  {}: {} edge collapses ({} rejected)",
                    "Operations".cyan(),
                    summary.collapses_performed,
                    summary.collapses_rejected
                );
            }
        }
    }

    Ok(())
}
