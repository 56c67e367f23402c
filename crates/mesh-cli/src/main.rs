//! mesh-cli: Command-line interface for mesh-core.
//!
//! Meshes and point sets are exchanged as JSON documents:
//!
//! ```json
//! { "vertices": [{"x": 0, "y": 0, "z": 0}, ...], "faces": [[0, 1, 2], ...] }
//! { "points": [{"x": 0, "y": 0, "z": 0}, ...], "normals": [...] }
//! ```
//!
//! # Logging
//!
//! Set the `RUST_LOG` environment variable to control log output:
//! - `RUST_LOG=mesh_core=info` - Basic operation logging
//! - `RUST_LOG=mesh_core=debug` - Detailed progress logging
//! - `RUST_LOG=mesh_core::timing=debug` - Performance timing
//! - `RUST_LOG=debug` - All debug output
//!
//! # Example
//!
//! ```bash
//! # Repair a mesh with info logging
//! RUST_LOG=mesh_core=info mesh repair input.json -o output.json
//!
//! # Run a named operation through the gateway
//! mesh call mesh.subdivide.loop input.json --options '{"iterations": 2}'
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod gateway;
mod io;
mod output;

use commands::{
    boolean, call, decimate, delaunay, info, isosurface, pipeline, register, repair, smooth,
    subdivide, validate,
};

/// mesh - A command-line tool for triangle mesh geometry processing.
///
/// Repair, refine, simplify, combine and align meshes stored as JSON.
#[derive(Parser)]
#[command(name = "mesh")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format for results
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Suppress all non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase output verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Display mesh statistics and information
    Info {
        /// Input mesh file
        input: PathBuf,

        /// Show volume, area and component details
        #[arg(long)]
        detailed: bool,
    },

    /// Check mesh topology and report issues
    Validate {
        /// Input mesh file
        input: PathBuf,

        /// Fail unless the mesh is a closed, consistently oriented solid
        #[arg(long)]
        require_solid: bool,
    },

    /// Repair common mesh issues
    Repair {
        /// Input mesh file
        input: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Use printing-optimized repair settings
        #[arg(long)]
        for_printing: bool,

        /// Use scan-optimized repair settings
        #[arg(long)]
        for_scan: bool,

        /// Use CAD-optimized repair settings
        #[arg(long)]
        for_cad: bool,

        /// Fill holes up to this edge count
        #[arg(long)]
        max_hole_edges: Option<usize>,

        /// Vertex stitching tolerance
        #[arg(long)]
        stitch_tolerance: Option<f64>,
    },

    /// Refine a mesh by subdivision
    Subdivide {
        /// Input mesh file
        input: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Subdivision scheme
        #[arg(long, default_value = "loop")]
        scheme: SubdivisionScheme,

        /// Number of subdivision passes
        #[arg(long, short = 'n', default_value = "1")]
        iterations: usize,
    },

    /// Smooth vertex positions
    Smooth {
        /// Input mesh file
        input: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Smoothing method
        #[arg(long, default_value = "taubin")]
        method: SmoothingMethod,

        /// Number of smoothing passes
        #[arg(long, short = 'n', default_value = "10")]
        iterations: usize,

        /// Step size (spatial sigma for bilateral)
        #[arg(long, default_value = "0.5")]
        lambda: f64,

        /// Taubin inflation step (range sigma for bilateral)
        #[arg(long, default_value = "-0.53", allow_hyphen_values = true)]
        mu: f64,

        /// Let boundary vertices move
        #[arg(long)]
        move_boundary: bool,
    },

    /// Decimate (simplify) a mesh to reduce triangle count
    Decimate {
        /// Input mesh file
        input: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Target ratio (0.0-1.0) of original triangles to keep
        #[arg(long, conflicts_with = "count")]
        ratio: Option<f64>,

        /// Target number of triangles
        #[arg(long, conflicts_with = "ratio")]
        count: Option<usize>,

        /// Preserve mesh boundary edges
        #[arg(long)]
        preserve_boundary: bool,
    },

    /// Combine two closed meshes with a CSG operation
    Boolean {
        /// First operand
        a: PathBuf,

        /// Second operand
        b: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Set operation
        #[arg(long, default_value = "union")]
        op: BooleanOperation,
    },

    /// Rigidly align a source mesh onto a target mesh with ICP
    Register {
        /// Mesh to move
        source: PathBuf,

        /// Reference mesh
        target: PathBuf,

        /// Write the aligned source mesh here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Minimize point-to-plane instead of point-to-point distance
        #[arg(long)]
        point_to_plane: bool,

        /// Maximum ICP iterations
        #[arg(long, default_value = "50")]
        max_iterations: usize,
    },

    /// Tetrahedralize a point set and summarize its Voronoi dual
    Delaunay {
        /// Input point cloud or mesh file
        input: PathBuf,

        /// Write the convex hull surface here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Extract an isosurface from a mesh SDF or a point cloud
    Isosurface {
        /// Input mesh or point cloud file
        input: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Grid cells along the longest axis (mesh input)
        #[arg(long, default_value = "64")]
        resolution: usize,

        /// Voxel edge length (point cloud input)
        #[arg(long)]
        voxel_size: Option<f64>,

        /// Level to extract
        #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
        iso_value: f64,
    },

    /// Run a TOML or JSON pipeline file
    Pipeline {
        /// Pipeline definition (.toml or .json)
        config: PathBuf,

        /// Input mesh file
        input: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Invoke an operation by its stable name
    Call {
        /// Operation name, e.g. mesh.subdivide.loop (use --list to see all)
        #[arg(required_unless_present = "list")]
        name: Option<String>,

        /// Input document
        input: Option<PathBuf>,

        /// Operation options as a JSON object
        #[arg(long)]
        options: Option<String>,

        /// Write the result document here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// List registered operation names
        #[arg(long)]
        list: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SubdivisionScheme {
    /// Loop subdivision of triangles
    Loop,
    /// Catmull-Clark subdivision into quads
    CatmullClark,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SmoothingMethod {
    /// Uniform Laplacian
    Laplacian,
    /// Taubin lambda/mu
    Taubin,
    /// Cotangent-weighted Laplacian
    Cotangent,
    /// Bilateral normal filter
    Bilateral,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum BooleanOperation {
    Union,
    Intersection,
    Difference,
}

impl From<BooleanOperation> for mesh_core::BooleanOp {
    fn from(op: BooleanOperation) -> Self {
        match op {
            BooleanOperation::Union => mesh_core::BooleanOp::Union,
            BooleanOperation::Intersection => mesh_core::BooleanOp::Intersection,
            BooleanOperation::Difference => mesh_core::BooleanOp::Difference,
        }
    }
}

/// Initialize the tracing subscriber based on verbosity level.
fn init_tracing(verbose: u8, quiet: bool) {
    // RUST_LOG wins over -v flags
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = if quiet {
            "error"
        } else {
            match verbose {
                0 => "warn",
                1 => "mesh_core=info,mesh=info",
                2 => "mesh_core=debug,mesh=debug",
                _ => "trace",
            }
        };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    #[cfg(debug_assertions)]
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let result = match &cli.command {
        Commands::Info { input, detailed } => info::run(input, *detailed, &cli),
        Commands::Validate {
            input,
            require_solid,
        } => validate::run(input, *require_solid, &cli),
        Commands::Repair {
            input,
            output,
            for_printing,
            for_scan,
            for_cad,
            max_hole_edges,
            stitch_tolerance,
        } => repair::run(
            input,
            output,
            repair::Preset::from_flags(*for_printing, *for_scan, *for_cad),
            *max_hole_edges,
            *stitch_tolerance,
            &cli,
        ),
        Commands::Subdivide {
            input,
            output,
            scheme,
            iterations,
        } => subdivide::run(input, output, *scheme, *iterations, &cli),
        Commands::Smooth {
            input,
            output,
            method,
            iterations,
            lambda,
            mu,
            move_boundary,
        } => smooth::run(
            input,
            output,
            smooth::build_params(*method, *iterations, *lambda, *mu, !*move_boundary),
            &cli,
        ),
        Commands::Decimate {
            input,
            output,
            ratio,
            count,
            preserve_boundary,
        } => decimate::run(input, output, *ratio, *count, *preserve_boundary, &cli),
        Commands::Boolean { a, b, output, op } => boolean::run(a, b, output, (*op).into(), &cli),
        Commands::Register {
            source,
            target,
            output,
            point_to_plane,
            max_iterations,
        } => register::run(
            source,
            target,
            output.as_deref(),
            *point_to_plane,
            *max_iterations,
            &cli,
        ),
        Commands::Delaunay { input, output } => delaunay::run(input, output.as_deref(), &cli),
        Commands::Isosurface {
            input,
            output,
            resolution,
            voxel_size,
            iso_value,
        } => isosurface::run(input, output, *resolution, *voxel_size, *iso_value, &cli),
        Commands::Pipeline {
            config,
            input,
            output,
        } => pipeline::run(config, input, output, &cli),
        Commands::Call {
            name,
            input,
            options,
            output,
            list,
        } => {
            let gateway = gateway::Gateway::with_core_operations();
            if *list {
                call::list(&gateway, &cli)
            } else {
                call::run(
                    &gateway,
                    name.as_deref().unwrap_or_default(),
                    input.as_deref(),
                    options.as_deref(),
                    output.as_deref(),
                    &cli,
                )
            }
        }
    };

    if let Err(e) = &result {
        if !cli.quiet {
            if let Some(mesh_err) = e.downcast_ref::<mesh_core::MeshError>() {
                eprintln!("{}: {}", "Error".red().bold(), mesh_err);
                eprintln!("  {}: {}", "Code".cyan(), mesh_err.code());
                eprintln!(
                    "  {}: {}",
                    "Suggestion".green(),
                    mesh_err.recovery_suggestion()
                );
                if let Some(location) = mesh_err.location() {
                    eprintln!("  {}: {}", "Location".yellow(), location);
                }
            } else {
                eprintln!("{}: {}", "Error".red().bold(), e);
                for cause in e.chain().skip(1) {
                    eprintln!("  {}: {}", "Caused by".yellow(), cause);
                }
            }
        }
        std::process::exit(1);
    }

    Ok(())
}
