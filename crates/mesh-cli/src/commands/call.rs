//! mesh call command - invoke an operation through the gateway.

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::Value;

use crate::gateway::Gateway;
use crate::{Cli, OutputFormat, io, output};

pub fn list(gateway: &Gateway, cli: &Cli) -> Result<()> {
    let names: Vec<&str> = gateway.names().collect();
    match cli.format {
        OutputFormat::Json => output::print(&names, cli.quiet),
        OutputFormat::Text => {
            if !cli.quiet {
                for name in names {
                    println!("{name}");
                }
            }
        }
    }
    Ok(())
}

/// Parse `--options`; absent means every parameter takes its default.
pub fn parse_options(raw: Option<&str>) -> Result<Value> {
    match raw {
        None => Ok(Value::Null),
        Some(text) => {
            let value: Value = serde_json::from_str(text).context("--options is not valid JSON")?;
            if !value.is_object() {
                bail!("--options must be a JSON object");
            }
            Ok(value)
        }
    }
}

pub fn run(
    gateway: &Gateway,
    name: &str,
    input: Option<&Path>,
    options: Option<&str>,
    output_path: Option<&Path>,
    cli: &Cli,
) -> Result<()> {
    if !gateway.contains(name) {
        bail!("unknown operation '{name}' (try `mesh call --list`)");
    }
    let Some(input) = input else {
        bail!("'{name}' needs an input document");
    };
    let document: Value = {
        let text = std::fs::read_to_string(input)
            .with_context(|| format!("Failed to read {}", input.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse {}", input.display()))?
    };
    let options = parse_options(options)?;

    let result = gateway.call(name, &document, &options)?;

    match output_path {
        Some(path) => {
            io::save_value(&result, path)?;
            output::success(
                &format!("{name} result saved to {}", path.display()),
                cli.format,
                cli.quiet,
            );
        }
        None => output::print(&result, cli.quiet),
    }

    Ok(())
}
