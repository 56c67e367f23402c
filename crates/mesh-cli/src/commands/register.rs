//! mesh register command - rigid ICP alignment.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use mesh_core::{RegistrationParams, align_meshes};
use serde::Serialize;

use crate::io::Xyz;
use crate::{Cli, OutputFormat, io, output};

#[derive(Serialize)]
struct RegisterSummary {
    source: String,
    target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<String>,
    variant: &'static str,
    converged: bool,
    iterations: usize,
    rms_error: f64,
    rotation_angle_deg: f64,
    translation: Xyz,
    /// Row-major homogeneous matrix mapping source onto target.
    matrix: [[f64; 4]; 4],
}

pub fn run(
    source: &Path,
    target: &Path,
    output_path: Option<&Path>,
    point_to_plane: bool,
    max_iterations: usize,
    cli: &Cli,
) -> Result<()> {
    let source_mesh = io::load_mesh(source)?;
    let target_mesh = io::load_mesh(target)?;

    let params = if point_to_plane {
        RegistrationParams::point_to_plane()
    } else {
        RegistrationParams::point_to_point()
    }
    .with_max_iterations(max_iterations);

    let result = align_meshes(&source_mesh, &target_mesh, &params)?;
    if let Some(path) = output_path {
        io::save_mesh(&result.mesh, path)?;
    }

    let registration = &result.registration;
    let transform = &registration.transformation;
    let m = transform.to_matrix4();
    let mut matrix = [[0.0; 4]; 4];
    for (r, row) in matrix.iter_mut().enumerate() {
        for (c, value) in row.iter_mut().enumerate() {
            *value = m[(r, c)];
        }
    }

    let summary = RegisterSummary {
        source: source.display().to_string(),
        target: target.display().to_string(),
        output: output_path.map(|p| p.display().to_string()),
        variant: if point_to_plane {
            "point-to-plane"
        } else {
            "point-to-point"
        },
        converged: registration.converged,
        iterations: registration.iterations,
        rms_error: registration.rms_error(),
        rotation_angle_deg: transform.angle().to_degrees(),
        translation: transform.translation.into(),
        matrix,
    };

    match cli.format {
        OutputFormat::Json => output::print(&summary, cli.quiet),
        OutputFormat::Text => {
            if !cli.quiet {
                let status = if summary.converged {
                    "converged".green()
                } else {
                    "did not converge".yellow()
                };
                println!("{}", "ICP Registration".bold().underline());
                println!(
                    "  {}: {} ({}, {} iterations)",
                    "Result".cyan(),
                    status,
                    summary.variant,
                    summary.iterations
                );
                println!("  {}: {:.3e}", "RMS error".cyan(), summary.rms_error);
                println!("  {}: {:.4}°", "Rotation".cyan(), summary.rotation_angle_deg);
                println!(
                    "  {}: ({:.6}, {:.6}, {:.6})",
                    "Translation".cyan(),
                    summary.translation.x,
                    summary.translation.y,
                    summary.translation.z
                );
                if let Some(path) = &summary.output {
                    output::success(&format!("Aligned mesh saved to {path}"), cli.format, cli.quiet);
                }
            }
        }
    }

    Ok(())
}
