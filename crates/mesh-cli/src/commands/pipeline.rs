//! mesh pipeline command - run a workflow file.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use mesh_core::{Pipeline, PipelineConfig};
use serde::Serialize;

use crate::io::ReportDocument;
use crate::{Cli, OutputFormat, io, output};

#[derive(Serialize)]
struct PipelineSummary {
    config: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    input: String,
    output: String,
    stages_executed: usize,
    vertices: usize,
    faces: usize,
    log: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    validation: Option<ReportDocument>,
}

/// Load a pipeline definition; `.json` files are JSON, anything else TOML.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let config = if is_json {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        PipelineConfig::from_json(&text)
    } else {
        PipelineConfig::from_toml_file(path)
    };
    config.with_context(|| format!("Invalid pipeline definition in {}", path.display()))
}

pub fn run(config_path: &Path, input: &Path, output_path: &Path, cli: &Cli) -> Result<()> {
    let config = load_config(config_path)?;
    let mesh = io::load_mesh(input)?;

    output::info(
        &format!(
            "Running {} pipeline steps on {} faces...",
            config.steps.len(),
            mesh.face_count()
        ),
        cli.format,
        cli.quiet,
    );

    let result = Pipeline::new(mesh).run_config(&config)?.finish();
    io::save_mesh(&result.mesh, output_path)?;

    let summary = PipelineSummary {
        config: config_path.display().to_string(),
        name: config.name.clone(),
        input: input.display().to_string(),
        output: output_path.display().to_string(),
        stages_executed: result.stages_executed,
        vertices: result.mesh.vertex_count(),
        faces: result.mesh.face_count(),
        log: result.operation_log,
        validation: result.validation.as_ref().map(ReportDocument::from),
    };

    match cli.format {
        OutputFormat::Json => output::print(&summary, cli.quiet),
        OutputFormat::Text => {
            if !cli.quiet {
                if let Some(name) = &summary.name {
                    println!("{}", name.bold().underline());
                }
                for (i, line) in summary.log.iter().enumerate() {
                    println!("  {:>2}. {}", i + 1, line);
                }
                if let Some(report) = &summary.validation {
                    println!(
                        "  {}: {}",
                        "Closed solid".cyan(),
                        output::yes_no(report.is_closed_solid)
                    );
                }
                output::success(
                    &format!(
                        "{} stages, result saved to {}",
                        summary.stages_executed,
                        output_path.display()
                    ),
                    cli.format,
                    cli.quiet,
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::PipelineStep;
    use tempfile::tempdir;

    #[test]
    fn loads_toml_and_json_by_extension() {
        let dir = tempdir().unwrap();
        let config = PipelineConfig::preset_refine(2).add_step(PipelineStep::Validate);

        let toml_path = dir.path().join("refine.toml");
        config.save_toml(&toml_path).unwrap();
        let from_toml = load_config(&toml_path).unwrap();
        assert_eq!(from_toml.steps.len(), config.steps.len());

        let json_path = dir.path().join("refine.json");
        fs::write(&json_path, config.to_json().unwrap()).unwrap();
        let from_json = load_config(&json_path).unwrap();
        assert_eq!(from_json.steps.len(), config.steps.len());
    }

    #[test]
    fn reports_bad_definitions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "steps = [{ operation = \"teleport\" }]").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }
}
