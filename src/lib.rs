//! Shared library for the catalog-sync tools.
//!
//! The crate reconciles freshly discovered server records against an on-disk
//! catalog and renders the catalog's index documents. The binaries under
//! `src/bin/` are thin wrappers: `catalog-sync` runs one reconciliation pass,
//! `catalog-validate` re-checks an existing catalog root.

use anyhow::{Result, bail};
use serde_json::Value;

pub mod catalog;
pub mod config;
pub mod error;
pub mod lock;
pub mod schema_loader;
pub mod source;
pub mod store;

pub use catalog::{
    CatalogIndex, IdentityKey, Manifest, ManifestId, RawRecord, RecordBatch, RunContext,
    RunSummary, SourceDescriptor, Transport, ValidationReport, reconcile, validate_catalog_index,
};
pub use config::{SyncArgs, SyncConfig};
pub use error::{FatalError, SkippableError};
pub use lock::CatalogLock;
pub use source::{SourceKind, load_records};
pub use store::{CatalogStore, FsStore, MemStore};

/// One row of a JSON record stream.
#[derive(Debug, Clone)]
pub struct StreamRow {
    /// 1-based array index, or line number for NDJSON input.
    pub position: usize,
    pub parsed: std::result::Result<Value, String>,
}

/// Split a JSON document or NDJSON stream into rows.
///
/// A whole-document array yields one row per element and a whole-document
/// object yields a single row. Otherwise every non-empty line is parsed on its
/// own, and a line that fails to parse becomes an `Err` row instead of failing
/// the stream.
pub fn parse_json_stream(input: &str) -> Result<Vec<StreamRow>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        bail!("No input provided");
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return match value {
            Value::Array(items) => Ok(items
                .into_iter()
                .enumerate()
                .map(|(idx, value)| StreamRow {
                    position: idx + 1,
                    parsed: Ok(value),
                })
                .collect()),
            Value::Object(_) => Ok(vec![StreamRow {
                position: 1,
                parsed: Ok(value),
            }]),
            _ => bail!("Unsupported JSON input; expected object or array"),
        };
    }

    Ok(trimmed
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| StreamRow {
            position: idx + 1,
            parsed: serde_json::from_str(line.trim()).map_err(|err| err.to_string()),
        })
        .collect())
}
