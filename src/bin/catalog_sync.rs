//! Runs one reconciliation pass over a catalog root.
//!
//! Logs go to stderr (filtered by `RUST_LOG`, default `info`); the run summary
//! is printed to stdout as JSON. Any fatal condition exits non-zero before the
//! top-level index is replaced.

use anyhow::{Context, Result};
use catalog_sync::{
    CatalogLock, FsStore, RunContext, SyncArgs, SyncConfig, load_records, reconcile,
};
use clap::Parser;
use std::fs;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run() -> Result<()> {
    let config = SyncConfig::resolve(SyncArgs::parse())?;
    fs::create_dir_all(&config.catalog_root)
        .with_context(|| format!("creating {}", config.catalog_root.display()))?;

    let _lock = if config.lock {
        Some(CatalogLock::acquire(&config.catalog_root)?)
    } else {
        None
    };

    info!(source = %config.source.display(), kind = config.source_kind.as_str(), "loading records");
    let loaded = load_records(&config.source, config.source_kind)?;
    let store = FsStore::new(&config.catalog_root);
    let ctx = RunContext::new(
        &config.servers_dir,
        &config.index_file,
        loaded.descriptor,
        config.source_label,
    )
    .with_registry_base_url(config.registry_url);

    let summary = reconcile(&store, loaded.batch, &ctx)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
