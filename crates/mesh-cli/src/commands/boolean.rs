//! mesh boolean command - CSG union, intersection and difference.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use mesh_core::{BooleanOp, BooleanParams, boolean_operation, validate_mesh};
use serde::Serialize;

use crate::{Cli, OutputFormat, io, output};

#[derive(Serialize)]
struct BooleanSummary {
    a: String,
    b: String,
    output: String,
    operation: String,
    faces: usize,
    volume: f64,
    watertight: bool,
    disjoint_inputs: bool,
}

pub fn run(a: &Path, b: &Path, output_path: &Path, op: BooleanOp, cli: &Cli) -> Result<()> {
    let mesh_a = io::load_mesh(a)?;
    let mesh_b = io::load_mesh(b)?;

    output::info(
        &format!(
            "Computing {op} of {} and {} faces...",
            mesh_a.face_count(),
            mesh_b.face_count()
        ),
        cli.format,
        cli.quiet,
    );

    let result = boolean_operation(&mesh_a, &mesh_b, op, &BooleanParams::default())?;
    let report = validate_mesh(&result.mesh)?;
    io::save_mesh(&result.mesh, output_path)?;

    let summary = BooleanSummary {
        a: a.display().to_string(),
        b: b.display().to_string(),
        output: output_path.display().to_string(),
        operation: op.to_string(),
        faces: result.mesh.face_count(),
        volume: report.signed_volume,
        watertight: report.is_watertight,
        disjoint_inputs: result.stats.disjoint,
    };

    match cli.format {
        OutputFormat::Json => output::print(&summary, cli.quiet),
        OutputFormat::Text => {
            if !cli.quiet {
                output::success(
                    &format!("{} saved to {}", summary.operation, output_path.display()),
                    cli.format,
                    cli.quiet,
                );
                println!("  {}: {}", "Faces".cyan(), summary.faces);
                println!("  {}: {:.6}", "Volume".cyan(), summary.volume);
                println!(
                    "  {}: {}",
                    "Watertight".cyan(),
                    output::yes_no(summary.watertight)
                );
                if summary.disjoint_inputs {
                    println!("  {}: bounding boxes do not overlap", "Note".yellow());
                }
            }
        }
    }

    Ok(())
}
