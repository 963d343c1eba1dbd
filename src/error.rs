//! Error taxonomy for reconciliation runs.
//!
//! Two kinds are kept deliberately distinct. [`SkippableError`] describes a
//! single input row (or a single prior catalog entry) that could not be used;
//! the run records it in its summary and keeps going. [`FatalError`] describes
//! a structural problem with the catalog itself and aborts the run before the
//! top-level index is written.

use serde::Serialize;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Run-level failure. Any of these stops the run with a non-zero exit.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("discovery source produced no usable records: {detail}")]
    EmptyInput { detail: String },

    #[error("ID collision detected: id {id} claimed by {first} and {second}")]
    IdentityCollision {
        id: String,
        first: String,
        second: String,
    },

    #[error("path collision detected: {path} claimed by {first} and {second}")]
    PathCollision {
        path: String,
        first: String,
        second: String,
    },

    #[error("manifest missing 'id' ({key})")]
    MissingId { key: String },

    #[error("BUG: manifest path is URL: {path}")]
    PathIsUrl { path: String },

    #[error("BUG: active manifest missing on disk: {path}")]
    ActivePathMissing { path: String },

    #[error("catalog index failed schema validation:\n{details}")]
    IndexSchema { details: String },

    #[error("catalog root {} is locked by another run", root.display())]
    Locked { root: PathBuf },

    #[error("catalog store error at {path}: {source}")]
    Store {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FatalError {
    pub(crate) fn store(path: impl Into<String>, source: io::Error) -> Self {
        FatalError::Store {
            path: path.into(),
            source,
        }
    }
}

/// Row-level failure. Collected into the run summary, never aborts a run.
#[derive(Debug, Clone, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkippableError {
    #[error("could not resolve manifest reference: {reference}")]
    UnresolvedReference { reference: String },

    #[error("{origin}: invalid JSON: {detail}")]
    InvalidJson { origin: String, detail: String },

    #[error("{origin}: record matches neither a repository nor a registry shape")]
    UnrecognizedRecord { origin: String },

    #[error("{origin}: unexpected type tag '{found}'")]
    WrongType { origin: String, found: String },

    #[error("{origin}: missing required field '{field}'")]
    MissingField { origin: String, field: String },

    #[error("{origin}: manifest failed schema validation: {details}")]
    SchemaViolation { origin: String, details: String },

    #[error("{origin}: registry marks this server as deleted")]
    Deleted { origin: String },

    #[error("{path}: unable to read existing manifest: {detail}")]
    UnreadableExisting { path: String, detail: String },
}
