//! Run configuration for `catalog-sync`.
//!
//! Flags come from the command line with environment fallbacks; [`SyncConfig`]
//! is the validated form the binary actually runs with.

use crate::catalog::paths::normalize_dir;
use crate::source::SourceKind;
use anyhow::{Result, bail};
use clap::Parser;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "catalog-sync",
    about = "Reconcile discovered server manifests into a lifecycle-tracked catalog"
)]
pub struct SyncArgs {
    /// Harvest directory, registry dump or record stream to ingest.
    #[arg(long, env = "CATALOG_SOURCE")]
    pub source: PathBuf,

    #[arg(long, env = "CATALOG_SOURCE_KIND", value_enum, default_value_t = SourceKind::Auto)]
    pub source_kind: SourceKind,

    #[arg(long, env = "CATALOG_ROOT", default_value = ".")]
    pub catalog_root: PathBuf,

    /// Entry directory, relative to the catalog root.
    #[arg(long, env = "CATALOG_SERVERS_DIR", default_value = "servers")]
    pub servers_dir: String,

    /// Top-level index path, relative to the catalog root.
    #[arg(long, env = "CATALOG_INDEX_FILE", default_value = "index.json")]
    pub index_file: String,

    /// Label used in deprecation reasons; defaults to the source path.
    #[arg(long)]
    pub source_label: Option<String>,

    /// Base URL recorded in registry provenance.
    #[arg(long, env = "CATALOG_REGISTRY_URL")]
    pub registry_url: Option<String>,

    /// Skip the advisory lock on the catalog root.
    #[arg(long)]
    pub no_lock: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub source: PathBuf,
    pub source_kind: SourceKind,
    pub catalog_root: PathBuf,
    pub servers_dir: String,
    pub index_file: String,
    pub source_label: String,
    pub registry_url: Option<String>,
    pub lock: bool,
}

impl SyncConfig {
    pub fn resolve(args: SyncArgs) -> Result<Self> {
        let servers_dir = catalog_relative("--servers-dir", &args.servers_dir)?;
        let index_file = catalog_relative("--index-file", &args.index_file)?;
        if index_file.is_empty() {
            bail!("--index-file must name a file under the catalog root");
        }
        let source_label = args
            .source_label
            .filter(|label| !label.trim().is_empty())
            .unwrap_or_else(|| args.source.display().to_string());

        Ok(Self {
            source: args.source,
            source_kind: args.source_kind,
            catalog_root: args.catalog_root,
            servers_dir,
            index_file,
            source_label,
            registry_url: args.registry_url,
            lock: !args.no_lock,
        })
    }
}

/// Normalize a path that must stay inside the catalog root.
fn catalog_relative(flag: &str, raw: &str) -> Result<String> {
    let path = Path::new(raw);
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => bail!("{flag} must be relative to the catalog root without '..': {raw}"),
        }
    }
    Ok(normalize_dir(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<SyncConfig> {
        let mut argv = vec!["catalog-sync"];
        argv.extend_from_slice(args);
        SyncConfig::resolve(SyncArgs::try_parse_from(argv)?)
    }

    #[test]
    fn defaults_fill_in() {
        let config = parse(&["--source", "harvest/out"]).unwrap();
        assert_eq!(config.servers_dir, "servers");
        assert_eq!(config.index_file, "index.json");
        assert_eq!(config.catalog_root, PathBuf::from("."));
        assert_eq!(config.source_label, "harvest/out");
        assert_eq!(config.source_kind, SourceKind::Auto);
        assert!(config.lock);
    }

    #[test]
    fn paths_are_normalized_and_confined() {
        let config = parse(&[
            "--source",
            "dump.json",
            "--source-kind",
            "registry",
            "--servers-dir",
            "./catalog/servers/",
            "--no-lock",
        ])
        .unwrap();
        assert_eq!(config.servers_dir, "catalog/servers");
        assert_eq!(config.source_kind, SourceKind::Registry);
        assert!(!config.lock);

        assert!(parse(&["--source", "x", "--servers-dir", "../escape"]).is_err());
        assert!(parse(&["--source", "x", "--index-file", "/abs/index.json"]).is_err());
        assert!(parse(&["--source", "x", "--index-file", "."]).is_err());
    }
}
