//! Discovery-input adapters.
//!
//! Each adapter reads records already produced by a discovery tool and turns
//! them into a [`RecordBatch`]. Nothing here fetches over the network.
//! Rows that cannot be used are recorded as skippable errors; only a source
//! that cannot be opened at all is an error.

use crate::catalog::index::SourceDescriptor;
use crate::catalog::normalize::RawRecord;
use crate::catalog::reconcile::RecordBatch;
use crate::error::SkippableError;
use crate::{StreamRow, parse_json_stream};
use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

const HARVEST_INDEX: &str = "index.json";

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum SourceKind {
    /// Directory means harvest output, file means record stream.
    #[default]
    Auto,
    /// Harvester output directory with an `index.json` of manifest paths.
    HarvestDir,
    /// Registry listing page, JSON array or NDJSON of server responses.
    Registry,
    /// JSON array or NDJSON of mixed records.
    Records,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Auto => "auto",
            SourceKind::HarvestDir => "harvest-dir",
            SourceKind::Registry => "registry",
            SourceKind::Records => "records",
        }
    }

    fn resolve(self, path: &Path) -> SourceKind {
        match self {
            SourceKind::Auto if path.is_dir() => SourceKind::HarvestDir,
            SourceKind::Auto => SourceKind::Records,
            other => other,
        }
    }
}

/// Records loaded from one source plus a descriptor for the index.
#[derive(Debug)]
pub struct LoadedSource {
    pub batch: RecordBatch,
    pub descriptor: SourceDescriptor,
}

pub fn load_records(path: &Path, kind: SourceKind) -> Result<LoadedSource> {
    let kind = kind.resolve(path);
    let batch = if kind == SourceKind::HarvestDir {
        load_harvest_dir(path)?
    } else {
        let input =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let origin = path.display().to_string();
        records_from_stream(&input, &origin, kind == SourceKind::Registry)?
    };
    debug!(
        kind = kind.as_str(),
        records = batch.records.len(),
        skipped = batch.errors.len(),
        "source loaded"
    );
    Ok(LoadedSource {
        batch,
        descriptor: SourceDescriptor {
            kind: kind.as_str().to_string(),
            location: path.display().to_string(),
            ..SourceDescriptor::default()
        },
    })
}

/// Parse a JSON document or NDJSON stream of records.
///
/// Registry listing pages (`{"servers": [...]}`) are flattened into their
/// server responses. With `registry_only`, rows that are not registry shaped
/// are skipped.
pub fn records_from_stream(input: &str, origin: &str, registry_only: bool) -> Result<RecordBatch> {
    let mut batch = RecordBatch::default();
    for StreamRow { position, parsed } in parse_json_stream(input)? {
        let row_origin = format!("{origin}#{position}");
        let value = match parsed {
            Ok(value) => value,
            Err(detail) => {
                batch.errors.push(SkippableError::InvalidJson {
                    origin: row_origin,
                    detail,
                });
                continue;
            }
        };

        for (offset, value) in expand_listing_page(value).into_iter().enumerate() {
            let record_origin = if offset == 0 {
                row_origin.clone()
            } else {
                format!("{row_origin}.{offset}")
            };
            match RawRecord::classify(record_origin.clone(), value) {
                Ok(RawRecord::RepoSourced(_)) if registry_only => {
                    batch
                        .errors
                        .push(SkippableError::UnrecognizedRecord { origin: record_origin });
                }
                Ok(record) => batch.records.push(record),
                Err(err) => batch.errors.push(err),
            }
        }
    }
    Ok(batch)
}

fn expand_listing_page(value: Value) -> Vec<Value> {
    match value {
        Value::Object(mut page) if page.get("servers").is_some_and(Value::is_array) => {
            match page.remove("servers") {
                Some(Value::Array(servers)) => servers,
                _ => Vec::new(),
            }
        }
        other => vec![other],
    }
}

/// Load a harvester output directory.
///
/// The directory's `index.json` lists manifest references under `manifests`
/// or `manifest_paths`. Each reference is resolved as an absolute path, then
/// relative to the directory, then by a unique filename match anywhere below
/// it.
pub fn load_harvest_dir(dir: &Path) -> Result<RecordBatch> {
    let index_path = dir.join(HARVEST_INDEX);
    if !index_path.is_file() {
        bail!("harvester did not produce an index at {}", index_path.display());
    }
    let raw = fs::read_to_string(&index_path)
        .with_context(|| format!("reading {}", index_path.display()))?;
    let index: Value = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", index_path.display()))?;

    let references: Vec<String> = ["manifests", "manifest_paths"]
        .iter()
        .filter_map(|key| index.get(*key).and_then(Value::as_array))
        .find(|list| !list.is_empty())
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let mut batch = RecordBatch::default();
    for reference in references {
        let Some(path) = resolve_manifest_path(dir, &reference) else {
            warn!(%reference, "could not resolve manifest reference");
            batch
                .errors
                .push(SkippableError::UnresolvedReference { reference });
            continue;
        };
        let parsed = fs::read_to_string(&path)
            .map_err(|err| err.to_string())
            .and_then(|text| serde_json::from_str::<Value>(&text).map_err(|err| err.to_string()));
        match parsed {
            Ok(value) => match RawRecord::classify(reference, value) {
                Ok(record) => batch.records.push(record),
                Err(err) => batch.errors.push(err),
            },
            Err(detail) => batch.errors.push(SkippableError::InvalidJson {
                origin: reference,
                detail,
            }),
        }
    }
    Ok(batch)
}

/// Locate a manifest reference inside a harvest directory.
pub fn resolve_manifest_path(dir: &Path, reference: &str) -> Option<PathBuf> {
    let candidate = Path::new(reference);
    if candidate.is_absolute() && candidate.is_file() {
        return Some(candidate.to_path_buf());
    }

    let relative = dir.join(candidate);
    if relative.is_file() {
        return Some(relative);
    }

    let file_name = candidate.file_name()?;
    let mut matches = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == file_name)
        .map(|entry| entry.into_path());
    let first = matches.next()?;
    matches.next().is_none().then_some(first)
}
