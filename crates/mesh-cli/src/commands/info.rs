//! mesh info command - display mesh statistics.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use mesh_core::validate_mesh;
use serde::Serialize;

use crate::io::{self, Xyz};
use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct MeshInfo {
    path: String,
    vertices: usize,
    faces: usize,
    edges: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    bounds: Option<BoundsInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    volume: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    surface_area: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    components: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    euler_characteristic: Option<i64>,
}

#[derive(Serialize)]
struct BoundsInfo {
    min: Xyz,
    max: Xyz,
    dimensions: Xyz,
}

pub fn run(input: &Path, detailed: bool, cli: &Cli) -> Result<()> {
    let mesh = io::load_mesh(input)?;
    let report = validate_mesh(&mesh)?;

    let bounds = report.bounds.map(|(min, max)| BoundsInfo {
        min: min.into(),
        max: max.into(),
        dimensions: (max - min).into(),
    });

    let info = MeshInfo {
        path: input.display().to_string(),
        vertices: report.vertex_count,
        faces: report.face_count,
        edges: report.edge_count,
        bounds,
        volume: detailed.then_some(report.signed_volume.abs()),
        surface_area: detailed.then_some(report.surface_area),
        components: detailed.then_some(report.component_count),
        euler_characteristic: detailed.then(|| report.euler_characteristic()),
    };

    match cli.format {
        OutputFormat::Json => output::print(&info, cli.quiet),
        OutputFormat::Text => {
            if !cli.quiet {
                println!("{}", "Mesh Information".bold().underline());
                println!("  {}: {}", "File".cyan(), input.display());
                println!("  {}: {}", "Vertices".cyan(), info.vertices);
                println!("  {}: {}", "Faces".cyan(), info.faces);
                println!("  {}: {}", "Edges".cyan(), info.edges);

                if let Some(ref b) = info.bounds {
                    println!(
                        "  {}: {:.4} x {:.4} x {:.4}",
                        "Dimensions".cyan(),
                        b.dimensions.x,
                        b.dimensions.y,
                        b.dimensions.z
                    );
                    println!(
                        "  {}: ({:.4}, {:.4}, {:.4})",
                        "Min bounds".cyan(),
                        b.min.x,
                        b.min.y,
                        b.min.z
                    );
                    println!(
                        "  {}: ({:.4}, {:.4}, {:.4})",
                        "Max bounds".cyan(),
                        b.max.x,
                        b.max.y,
                        b.max.z
                    );
                }

                if let Some(vol) = info.volume {
                    println!("  {}: {:.6}", "Volume".cyan(), vol);
                }
                if let Some(area) = info.surface_area {
                    println!("  {}: {:.6}", "Surface area".cyan(), area);
                }
                if let Some(components) = info.components {
                    println!("  {}: {}", "Components".cyan(), components);
                }
                if let Some(chi) = info.euler_characteristic {
                    println!("  {}: {}", "Euler characteristic".cyan(), chi);
                }
            }
        }
    }

    Ok(())
}
