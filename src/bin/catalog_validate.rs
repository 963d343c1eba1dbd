//! Re-checks the top-level index of an existing catalog root.
//!
//! Errors and warnings are printed to stderr; a one-line-per-count summary goes
//! to stdout when the index passes.

use anyhow::{Result, bail};
use catalog_sync::{FsStore, validate_catalog_index};
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "catalog-validate", about = "Validate a catalog's top-level index")]
struct Args {
    #[arg(long, env = "CATALOG_ROOT", default_value = ".")]
    catalog_root: PathBuf,

    #[arg(long, env = "CATALOG_INDEX_FILE", default_value = "index.json")]
    index_file: String,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let store = FsStore::new(&args.catalog_root);
    let report = validate_catalog_index(&store, &args.index_file)?;

    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
    for error in &report.errors {
        eprintln!("error: {error}");
    }
    if !report.is_ok() {
        bail!("index validation failed with {} error(s)", report.errors.len());
    }

    println!("index validation passed");
    println!("  - {} manifests", report.manifests);
    println!("  - {} total items", report.items);
    println!("  - {} unique IDs", report.unique_ids);
    Ok(())
}
