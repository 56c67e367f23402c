//! mesh repair command - fix common mesh issues.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use mesh_core::{RepairParams, repair_mesh, validate_mesh};
use serde::Serialize;

use crate::{Cli, OutputFormat, io, output};

/// Parameter preset chosen on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Default,
    Printing,
    Scan,
    Cad,
}

impl Preset {
    /// First set flag wins, in the order printing, scan, CAD.
    pub fn from_flags(for_printing: bool, for_scan: bool, for_cad: bool) -> Self {
        if for_printing {
            Preset::Printing
        } else if for_scan {
            Preset::Scan
        } else if for_cad {
            Preset::Cad
        } else {
            Preset::Default
        }
    }

    fn params(self) -> RepairParams {
        match self {
            Preset::Default => RepairParams::default(),
            Preset::Printing => RepairParams::for_printing(),
            Preset::Scan => RepairParams::for_scans(),
            Preset::Cad => RepairParams::for_cad(),
        }
    }
}

#[derive(Serialize)]
struct RepairSummary {
    input: String,
    output: String,
    success: bool,
    input_vertices: usize,
    input_faces: usize,
    output_vertices: usize,
    output_faces: usize,
    vertices_stitched: usize,
    duplicate_faces_removed: usize,
    degenerate_faces_removed: usize,
    non_manifold_faces_removed: usize,
    vertices_split: usize,
    holes_filled: usize,
    holes_remaining: usize,
    passes: usize,
    watertight: bool,
    manifold: bool,
}

pub fn run(
    input: &Path,
    output_path: &Path,
    preset: Preset,
    max_hole_edges: Option<usize>,
    stitch_tolerance: Option<f64>,
    cli: &Cli,
) -> Result<()> {
    let mesh = io::load_mesh(input)?;

    let mut params = preset.params();
    if let Some(max_edges) = max_hole_edges {
        params.max_hole_edges = max_edges;
    }
    if let Some(tolerance) = stitch_tolerance {
        params.stitch_tolerance = tolerance;
    }

    output::info(
        &format!(
            "Repairing mesh ({} vertices, {} faces)...",
            mesh.vertex_count(),
            mesh.face_count()
        ),
        cli.format,
        cli.quiet,
    );

    let result = repair_mesh(&mesh, &params).context("Repair operation failed")?;
    let report = validate_mesh(&result.mesh)?;

    io::save_mesh(&result.mesh, output_path)?;

    let stats = &result.stats;
    let summary = RepairSummary {
        input: input.display().to_string(),
        output: output_path.display().to_string(),
        success: true,
        input_vertices: stats.initial_vertices,
        input_faces: stats.initial_faces,
        output_vertices: stats.final_vertices,
        output_faces: stats.final_faces,
        vertices_stitched: stats.vertices_stitched,
        duplicate_faces_removed: stats.duplicate_faces_removed,
        degenerate_faces_removed: stats.degenerate_faces_removed,
        non_manifold_faces_removed: stats.non_manifold_faces_removed,
        vertices_split: stats.vertices_split,
        holes_filled: stats.holes_filled,
        holes_remaining: stats.holes_remaining,
        passes: stats.passes,
        watertight: report.is_watertight,
        manifold: report.is_manifold,
    };

    match cli.format {
        OutputFormat::Json => output::print(&summary, cli.quiet),
        OutputFormat::Text => {
            if !cli.quiet {
                output::success(
                    &format!("Repaired mesh saved to {}", output_path.display()),
                    cli.format,
                    cli.quiet,
                );
                println!(
                    "  {}: {} → {}",
                    "Vertices".cyan(),
                    summary.input_vertices,
                    summary.output_vertices
                );
                println!(
                    "  {}: {} → {}",
                    "Faces".cyan(),
                    summary.input_faces,
                    summary.output_faces
                );
                if stats.is_clean() {
                    println!("  {}: none needed", "Repairs".cyan());
                } else {
                    println!("  {}: {}", "Stitched vertices".cyan(), summary.vertices_stitched);
                    println!(
                        "  {}: {} degenerate, {} duplicate, {} non-manifold",
                        "Faces removed".cyan(),
                        summary.degenerate_faces_removed,
                        summary.duplicate_faces_removed,
                        summary.non_manifold_faces_removed
                    );
                    println!("  {}: {}", "Vertices split".cyan(), summary.vertices_split);
                    println!(
                        "  {}: {} filled, {} left open",
                        "Holes".cyan(),
                        summary.holes_filled,
                        summary.holes_remaining
                    );
                }
                println!(
                    "  {}: {}",
                    "Watertight".cyan(),
                    output::yes_no(summary.watertight)
                );
                if summary.holes_remaining > 0 {
                    output::warning(
                        "Some holes exceed --max-hole-edges and were left open",
                        cli.format,
                        cli.quiet,
                    );
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_flag_precedence() {
        assert_eq!(Preset::from_flags(false, false, false), Preset::Default);
        assert_eq!(Preset::from_flags(true, true, false), Preset::Printing);
        assert_eq!(Preset::from_flags(false, true, true), Preset::Scan);
        assert!(!Preset::Cad.params().fill_holes);
        assert_eq!(Preset::Scan.params().max_hole_edges, 500);
    }
}
