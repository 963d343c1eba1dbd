//! Bundled JSON Schema loading.
//!
//! The manifest and catalog-index schemas ship inside the binary so a run can
//! never validate against a stale copy on disk. Each schema document carries a
//! top-level `schema_version` marker that is checked before compilation.

use anyhow::{Result, anyhow, bail};
use jsonschema::JSONSchema;
use serde_json::Value;
use std::sync::OnceLock;

const MANIFEST_SCHEMA: &str = include_str!("../schema/manifest.schema.json");
const CATALOG_INDEX_SCHEMA: &str = include_str!("../schema/catalog_index.schema.json");

pub const MANIFEST_SCHEMA_VERSION: &str = "catalog_manifest_v1";
pub const CATALOG_INDEX_SCHEMA_VERSION: &str = "catalog_index_v1";

/// A compiled schema plus the version marker it was loaded with.
pub struct CompiledSchema {
    pub schema_version: String,
    compiled: JSONSchema,
}

impl CompiledSchema {
    /// Validate `instance`, returning every violation as a display string.
    pub fn validate(&self, instance: &Value) -> std::result::Result<(), Vec<String>> {
        self.compiled.validate(instance).map_err(|errors| {
            errors
                .map(|err| format!("{}: {err}", err.instance_path))
                .collect()
        })
    }
}

/// Schema for a single `manifest.json`.
pub fn manifest_schema() -> Result<&'static CompiledSchema> {
    static SCHEMA: OnceLock<std::result::Result<CompiledSchema, String>> = OnceLock::new();
    cached(&SCHEMA, "manifest", MANIFEST_SCHEMA, MANIFEST_SCHEMA_VERSION)
}

/// Schema for the top-level `index.json`.
pub fn catalog_index_schema() -> Result<&'static CompiledSchema> {
    static SCHEMA: OnceLock<std::result::Result<CompiledSchema, String>> = OnceLock::new();
    cached(
        &SCHEMA,
        "catalog index",
        CATALOG_INDEX_SCHEMA,
        CATALOG_INDEX_SCHEMA_VERSION,
    )
}

fn cached(
    cell: &'static OnceLock<std::result::Result<CompiledSchema, String>>,
    label: &str,
    raw: &str,
    expected_version: &str,
) -> Result<&'static CompiledSchema> {
    cell.get_or_init(|| compile_schema(raw, expected_version).map_err(|err| format!("{err:#}")))
        .as_ref()
        .map_err(|err| anyhow!("loading bundled {label} schema: {err}"))
}

pub(crate) fn compile_schema(raw: &str, expected_version: &str) -> Result<CompiledSchema> {
    let schema: Value = serde_json::from_str(raw).map_err(|err| anyhow!("parsing schema: {err}"))?;
    let schema_version = extract_schema_version(&schema)
        .ok_or_else(|| anyhow!("schema missing schema_version marker"))?;
    if schema_version != expected_version {
        bail!(
            "schema_version '{}' does not match expected '{}'",
            schema_version,
            expected_version
        );
    }

    let compiled =
        JSONSchema::compile(&schema).map_err(|err| anyhow!("compiling schema: {err}"))?;
    Ok(CompiledSchema {
        schema_version,
        compiled,
    })
}

fn extract_schema_version(schema: &Value) -> Option<String> {
    let version = schema.get("schema_version").and_then(Value::as_str)?;
    if version
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        Some(version.to_string())
    } else {
        None
    }
}
