//! mesh smooth command - relax vertex positions.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use mesh_core::{SmoothParams, smooth_mesh};
use serde::Serialize;

use crate::{Cli, OutputFormat, SmoothingMethod, io, output};

#[derive(Serialize)]
struct SmoothSummary {
    input: String,
    output: String,
    iterations: usize,
    average_displacement: f64,
    max_displacement: f64,
    volume_before: f64,
    volume_after: f64,
}

/// Map command-line knobs onto [`SmoothParams`].
///
/// Bilateral filtering reuses `lambda` and `mu` as its spatial and range
/// sigmas; `mu` is taken by magnitude there.
pub fn build_params(
    method: SmoothingMethod,
    iterations: usize,
    lambda: f64,
    mu: f64,
    preserve_boundary: bool,
) -> SmoothParams {
    let mut params = match method {
        SmoothingMethod::Laplacian => SmoothParams::laplacian(iterations, lambda),
        SmoothingMethod::Taubin => SmoothParams::taubin(iterations, lambda, mu),
        SmoothingMethod::Cotangent => SmoothParams::cotangent(iterations, lambda),
        SmoothingMethod::Bilateral => SmoothParams::bilateral(iterations, lambda, mu.abs()),
    };
    params.preserve_boundary = preserve_boundary;
    params
}

pub fn run(input: &Path, output_path: &Path, params: SmoothParams, cli: &Cli) -> Result<()> {
    let mesh = io::load_mesh(input)?;

    output::info(
        &format!(
            "Smoothing mesh ({:?}, {} iterations)...",
            params.method, params.iterations
        ),
        cli.format,
        cli.quiet,
    );

    let result = smooth_mesh(&mesh, &params)?;
    io::save_mesh(&result.mesh, output_path)?;

    let summary = SmoothSummary {
        input: input.display().to_string(),
        output: output_path.display().to_string(),
        iterations: result.iterations_performed,
        average_displacement: result.average_displacement,
        max_displacement: result.max_displacement,
        volume_before: mesh.signed_volume(),
        volume_after: result.mesh.signed_volume(),
    };

    match cli.format {
        OutputFormat::Json => output::print(&summary, cli.quiet),
        OutputFormat::Text => {
            if !cli.quiet {
                output::success(
                    &format!("Smoothed mesh saved to {}", output_path.display()),
                    cli.format,
                    cli.quiet,
                );
                println!(
                    "  {}: {:.6} average, {:.6} max",
                    "Displacement".cyan(),
                    summary.average_displacement,
                    summary.max_displacement
                );
                println!(
                    "  {}: {:.6} → {:.6}",
                    "Volume".cyan(),
                    summary.volume_before,
                    summary.volume_after
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::SmoothMethod;

    #[test]
    fn bilateral_takes_sigmas_from_lambda_and_mu() {
        let params = build_params(SmoothingMethod::Bilateral, 3, 0.2, -0.1, true);
        assert_eq!(params.method, SmoothMethod::Bilateral);
        assert_eq!(params.sigma_spatial, Some(0.2));
        assert_eq!(params.sigma_range, Some(0.1));
    }

    #[test]
    fn taubin_keeps_signed_mu() {
        let params = build_params(SmoothingMethod::Taubin, 5, 0.5, -0.53, false);
        assert_eq!(params.method, SmoothMethod::Taubin);
        assert_eq!(params.mu, -0.53);
        assert!(!params.preserve_boundary);
    }
}
