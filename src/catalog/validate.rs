//! Consistency checks for a written top-level index.
//!
//! Works on the raw JSON rather than [`crate::catalog::index::CatalogIndex`]
//! so a malformed index yields a list of problems instead of a single parse
//! error.

use crate::schema_loader::catalog_index_schema;
use crate::store::CatalogStore;
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Clone, Debug, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub manifests: usize,
    pub items: usize,
    pub unique_ids: usize,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate `index_file` and the entries it references.
///
/// Fails only when the index cannot be read or parsed; every other problem is
/// collected in the report.
pub fn validate_catalog_index(store: &dyn CatalogStore, index_file: &str) -> Result<ValidationReport> {
    let bytes = store
        .read(index_file)
        .with_context(|| format!("reading {index_file}"))?;
    let index: Value =
        serde_json::from_slice(&bytes).with_context(|| format!("parsing {index_file}"))?;

    let mut report = ValidationReport::default();
    match catalog_index_schema()?.validate(&index) {
        Ok(()) => {}
        Err(errors) => report
            .errors
            .extend(errors.into_iter().map(|err| format!("schema: {err}"))),
    }

    let manifests = check_manifests(store, &index, &mut report);
    check_items(&index, &manifests, &mut report);
    Ok(report)
}

fn is_url(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

fn check_manifests(store: &dyn CatalogStore, index: &Value, report: &mut ValidationReport) -> Vec<String> {
    let Some(field) = index.get("manifests") else {
        report.errors.push("index missing 'manifests' field".to_string());
        return Vec::new();
    };
    let Some(entries) = field.as_array() else {
        report.errors.push("'manifests' must be a list".to_string());
        return Vec::new();
    };

    let mut paths = Vec::with_capacity(entries.len());
    for entry in entries {
        let path = entry
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| entry.to_string());
        if is_url(&path) {
            report
                .errors
                .push(format!("manifests must be relative paths (found URL): {path}"));
        } else if !store.exists(&path) {
            report
                .errors
                .push(format!("manifests path does not exist on disk: {path}"));
        }
        paths.push(path);
    }
    report.manifests = paths.len();
    paths
}

fn check_items(index: &Value, manifests: &[String], report: &mut ValidationReport) {
    let Some(field) = index.get("items") else {
        report.errors.push("index missing 'items' field".to_string());
        return;
    };
    let Some(items) = field.as_array() else {
        report.errors.push("'items' must be a list".to_string());
        return;
    };
    report.items = items.len();

    let mut seen_ids = BTreeSet::new();
    let mut active_paths = BTreeSet::new();
    for item in items {
        if !item.is_object() {
            report.errors.push(format!("item is not an object: {item}"));
            continue;
        }
        let Some(id) = item.get("id").and_then(Value::as_str).filter(|id| !id.is_empty()) else {
            report.errors.push(format!("item missing 'id': {item}"));
            continue;
        };
        if !seen_ids.insert(id.to_string()) {
            report.errors.push(format!("duplicate ID found: {id}"));
        }

        let Some(path) = item
            .get("manifest_path")
            .and_then(Value::as_str)
            .filter(|path| !path.is_empty())
        else {
            report.errors.push(format!("item missing 'manifest_path': {id}"));
            continue;
        };
        if is_url(path) {
            report
                .errors
                .push(format!("item manifest_path is URL: {id} -> {path}"));
        }
        if item.get("status").and_then(Value::as_str) == Some("active") {
            active_paths.insert(path.to_string());
        }
    }
    report.unique_ids = seen_ids.len();

    let listed: BTreeSet<&str> = manifests.iter().map(String::as_str).collect();
    for path in &active_paths {
        if !listed.contains(path.as_str()) {
            report
                .errors
                .push(format!("active manifest missing from manifests list: {path}"));
        }
    }
    for path in manifests {
        if !active_paths.contains(path) {
            report
                .warnings
                .push(format!("manifest in manifests list is not active: {path}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;
    use serde_json::json;

    fn store_with(index: Value) -> MemStore {
        let store = MemStore::new();
        store
            .write("index.json", &serde_json::to_vec(&index).unwrap())
            .unwrap();
        store
            .write("servers/a/x/manifest.json", b"{}")
            .unwrap();
        store
    }

    fn item(id: &str, path: &str, status: &str) -> Value {
        json!({
            "type": "mcp_server",
            "id": id,
            "name": id,
            "transport": "SSE",
            "status": status,
            "manifest_path": path
        })
    }

    fn index(items: Vec<Value>, manifests: Vec<&str>) -> Value {
        json!({
            "generated_at": "2025-01-01T00:00:00Z",
            "source": {"kind": "records", "location": "seed.json"},
            "counts": {"total_items": items.len(), "active_manifests": manifests.len()},
            "items": items,
            "manifests": manifests
        })
    }

    #[test]
    fn consistent_index_passes() {
        let store = store_with(index(
            vec![
                item("x", "servers/a/x/manifest.json", "active"),
                item("y", "servers/a/y/manifest.json", "deprecated"),
            ],
            vec!["servers/a/x/manifest.json"],
        ));
        let report = validate_catalog_index(&store, "index.json").unwrap();
        assert!(report.is_ok(), "{:?}", report.errors);
        assert_eq!(report.unique_ids, 2);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn reports_missing_paths_duplicates_and_unlisted_actives() {
        let store = store_with(index(
            vec![
                item("x", "servers/a/x/manifest.json", "active"),
                item("x", "servers/a/z/manifest.json", "active"),
            ],
            vec!["servers/a/x/manifest.json", "servers/a/gone/manifest.json"],
        ));
        let report = validate_catalog_index(&store, "index.json").unwrap();
        let joined = report.errors.join("\n");
        assert!(joined.contains("does not exist on disk: servers/a/gone/manifest.json"));
        assert!(joined.contains("duplicate ID found: x"));
        assert!(joined.contains("missing from manifests list: servers/a/z/manifest.json"));
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn url_paths_fail_both_checks() {
        let store = store_with(index(
            vec![item("x", "https://example.com/m.json", "active")],
            vec!["https://example.com/m.json"],
        ));
        let report = validate_catalog_index(&store, "index.json").unwrap();
        assert!(report.errors.iter().any(|e| e.starts_with("schema:")));
        assert!(report.errors.iter().any(|e| e.contains("found URL")));
        assert!(report.errors.iter().any(|e| e.contains("item manifest_path is URL")));
    }

    #[test]
    fn unreadable_index_is_an_error() {
        assert!(validate_catalog_index(&MemStore::new(), "index.json").is_err());
    }
}
