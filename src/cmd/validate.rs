//! `livemock validate`: check a file of endpoint definitions for errors.
//!
//! Parses the JSON array, validates every definition's fields, then runs a
//! trial route synchronization to catch method/path collisions. Reports
//! in either human-readable text or machine-readable JSON.

use std::path::Path;

use crate::cli::{ValidateArgs, ValidateFormat};
use crate::endpoint::validation::validate;
use crate::endpoint::EndpointDefinition;
use crate::error::{LivemockError, ValidationError};
use crate::routing;

pub fn execute(args: &ValidateArgs) -> Result<(), LivemockError> {
    let path = &args.file;
    let definitions = load(path)?;

    let errors: Vec<ValidationError> = definitions.iter().flat_map(validate).collect();
    if !errors.is_empty() {
        match args.format {
            ValidateFormat::Text => {
                eprintln!("\u{2717} {} has {} errors\n", path.display(), errors.len());
                for error in &errors {
                    eprintln!("{error}");
                }
            }
            ValidateFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "valid": false,
                        "errors": errors,
                    })
                );
            }
        }
        return Err(LivemockError::InvalidDefinition { errors });
    }

    if let Err(e) = routing::validate(&definitions) {
        match args.format {
            ValidateFormat::Text => eprintln!("\u{2717} {}: {e}", path.display()),
            ValidateFormat::Json => println!(
                "{}",
                serde_json::json!({
                    "valid": false,
                    "conflict": e.to_string(),
                })
            ),
        }
        return Err(e);
    }

    let live = definitions.iter().filter(|d| !d.is_deleted()).count();
    match args.format {
        ValidateFormat::Text => {
            println!("\u{2713} {}: {live} endpoints", path.display());
            for def in definitions.iter().filter(|d| !d.is_deleted()) {
                println!("  {}", def.label());
            }
        }
        ValidateFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "valid": true,
                    "endpoints": live,
                })
            );
        }
    }

    Ok(())
}

fn load(path: &Path) -> Result<Vec<EndpointDefinition>, LivemockError> {
    if !path.exists() {
        return Err(LivemockError::DefinitionsFileNotFound {
            path: path.to_path_buf(),
        });
    }
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|source| LivemockError::DefinitionsParse {
        path: path.display().to_string(),
        source,
    })
}
