//! mesh validate command - check mesh topology.

use std::path::Path;

use anyhow::{Result, bail};
use colored::Colorize;
use mesh_core::validate_mesh;
use serde::Serialize;

use crate::io::{self, ReportDocument};
use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct ValidationResult {
    path: String,
    valid: bool,
    issues: Vec<IssueInfo>,
    report: ReportDocument,
}

#[derive(Serialize)]
struct IssueInfo {
    category: &'static str,
    message: String,
    severity: &'static str,
}

impl IssueInfo {
    fn error(category: &'static str, message: String) -> Self {
        Self {
            category,
            message,
            severity: "error",
        }
    }

    fn warning(category: &'static str, message: String) -> Self {
        Self {
            category,
            message,
            severity: "warning",
        }
    }
}

pub fn run(input: &Path, require_solid: bool, cli: &Cli) -> Result<()> {
    let mesh = io::load_mesh(input)?;
    let report = validate_mesh(&mesh)?;
    let mut issues = Vec::new();

    if !report.is_watertight {
        issues.push(IssueInfo::error(
            "topology",
            format!(
                "Mesh is not watertight ({} boundary edges)",
                report.boundary_edge_count
            ),
        ));
    }
    if !report.is_manifold {
        issues.push(IssueInfo::error(
            "topology",
            format!(
                "Mesh is not manifold ({} non-manifold edges, {} non-manifold vertices)",
                report.non_manifold_edge_count, report.non_manifold_vertex_count
            ),
        ));
    }
    if report.is_inside_out {
        issues.push(IssueInfo::error(
            "orientation",
            "Faces are wound inward (negative signed volume)".to_string(),
        ));
    }
    if report.degenerate_face_count > 0 {
        issues.push(IssueInfo::warning(
            "geometry",
            format!("{} degenerate faces", report.degenerate_face_count),
        ));
    }
    if report.component_count > 1 {
        issues.push(IssueInfo::warning(
            "topology",
            format!("{} disconnected components", report.component_count),
        ));
    }

    let valid = !issues.iter().any(|i| i.severity == "error");
    let result = ValidationResult {
        path: input.display().to_string(),
        valid,
        issues,
        report: ReportDocument::from(&report),
    };

    match cli.format {
        OutputFormat::Json => output::print(&result, cli.quiet),
        OutputFormat::Text => {
            if !cli.quiet {
                println!("{}", "Mesh Validation".bold().underline());
                println!("  {}: {}", "File".cyan(), input.display());
                println!("  {}: {}", "Watertight".cyan(), output::yes_no(report.is_watertight));
                println!("  {}: {}", "Manifold".cyan(), output::yes_no(report.is_manifold));
                println!(
                    "  {}: {}",
                    "Closed solid".cyan(),
                    output::yes_no(report.is_closed_solid())
                );

                if result.issues.is_empty() {
                    output::success("No issues found", cli.format, cli.quiet);
                } else {
                    println!("\n{}", "Issues".bold());
                    for issue in &result.issues {
                        let tag = if issue.severity == "error" {
                            issue.severity.red().bold()
                        } else {
                            issue.severity.yellow().bold()
                        };
                        println!("  [{}] {}: {}", tag, issue.category, issue.message);
                    }
                }
            }
        }
    }

    if require_solid && !report.is_closed_solid() {
        bail!("{} is not a closed, outward-oriented solid", input.display());
    }

    Ok(())
}
