//! Index documents rendered from reconciled catalog state.
//!
//! Three layers exist: a per-variant index pointing at `./manifest.json`, a
//! per-group index listing member manifests relative to the group directory,
//! and the top-level [`CatalogIndex`]. Every layer is rebuilt from scratch on
//! each run and sorted, so the same catalog state always renders the same
//! documents.

use crate::catalog::identity::IdentityKey;
use crate::catalog::model::{LifecycleStatus, MANIFEST_TYPE, Manifest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

const VARIANT_MANIFEST_REF: &str = "./manifest.json";
const REPO_URL_PREFIX: &str = "https://github.com/";

/// `{ "manifests": [...] }`, used by variant and group indexes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestList {
    pub manifests: Vec<String>,
}

/// Where a run's records came from.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub kind: String,
    pub location: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One audit row of the top-level index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub transport: String,
    pub status: String,
    pub manifest_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subpath: Option<String>,
}

impl IndexItem {
    pub fn new(manifest: &Manifest, key: &IdentityKey, manifest_path: &str) -> Self {
        let (repo, subpath) = match key {
            IdentityKey::Repo { repo, subpath, .. } => {
                (Some(format!("{REPO_URL_PREFIX}{repo}")), Some(subpath.clone()))
            }
            IdentityKey::Registry { .. } => (None, None),
        };
        IndexItem {
            kind: MANIFEST_TYPE.to_string(),
            id: manifest.id.to_string(),
            name: manifest.name.clone(),
            version: Some(manifest.version.clone()).filter(|v| !v.is_empty()),
            transport: key.transport().to_string(),
            status: manifest.effective_status().as_str().to_string(),
            manifest_path: manifest_path.to_string(),
            repo,
            subpath,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == LifecycleStatus::Active.as_str()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexCounts {
    pub total_items: usize,
    pub active_manifests: usize,
    pub deprecated_added_this_run: usize,
    pub reactivated_this_run: usize,
    pub deprecated: usize,
    pub disabled: usize,
}

/// Top-level `index.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CatalogIndex {
    pub generated_at: DateTime<Utc>,
    pub source: SourceDescriptor,
    pub counts: IndexCounts,
    /// Every known entry, active or not.
    pub items: Vec<IndexItem>,
    /// Active entries only; the list downstream ingestion consumes.
    pub manifests: Vec<String>,
}

/// Per-run transition tallies carried into the index counts.
#[derive(Clone, Copy, Debug, Default)]
pub struct RunTallies {
    pub deprecated_added: usize,
    pub reactivated: usize,
}

/// Index written next to each entry's manifest.
pub fn variant_index() -> ManifestList {
    ManifestList {
        manifests: vec![VARIANT_MANIFEST_REF.to_string()],
    }
}

/// Group index from catalog-relative manifest paths under `group_dir`.
///
/// Paths outside the group are ignored; the rest become group-relative,
/// sorted and deduplicated.
pub fn group_index<I, S>(group_dir: &str, manifest_paths: I) -> ManifestList
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let prefix = format!("{}/", group_dir.trim_end_matches('/'));
    let unique: BTreeSet<String> = manifest_paths
        .into_iter()
        .filter_map(|path| path.as_ref().strip_prefix(&prefix).map(str::to_string))
        .collect();
    ManifestList {
        manifests: unique.into_iter().collect(),
    }
}

/// Collapse items sharing a manifest path.
///
/// The item with the greater version string wins; on a tie the later item
/// wins. Versions compare as plain strings, so `"9"` outranks `"10"`.
pub fn dedupe_by_path(items: Vec<IndexItem>) -> Vec<IndexItem> {
    let mut by_path: BTreeMap<String, IndexItem> = BTreeMap::new();
    for item in items {
        match by_path.get(&item.manifest_path) {
            Some(existing) if !prefer_version(&item, existing) => {}
            _ => {
                by_path.insert(item.manifest_path.clone(), item);
            }
        }
    }
    by_path.into_values().collect()
}

/// True when `candidate` should replace `existing`.
pub fn prefer_version(candidate: &IndexItem, existing: &IndexItem) -> bool {
    candidate.version.as_deref().unwrap_or_default() >= existing.version.as_deref().unwrap_or_default()
}

/// Assemble the top-level index from every entry's item row.
pub fn build_catalog_index(
    generated_at: DateTime<Utc>,
    source: SourceDescriptor,
    items: Vec<IndexItem>,
    tallies: RunTallies,
) -> CatalogIndex {
    let mut items = dedupe_by_path(items);
    items.sort_by(|a, b| (&a.id, &a.manifest_path).cmp(&(&b.id, &b.manifest_path)));

    let manifests: Vec<String> = items
        .iter()
        .filter(|item| item.is_active())
        .map(|item| item.manifest_path.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let count_status = |status: LifecycleStatus| {
        items
            .iter()
            .filter(|item| item.status == status.as_str())
            .count()
    };
    let counts = IndexCounts {
        total_items: items.len(),
        active_manifests: manifests.len(),
        deprecated_added_this_run: tallies.deprecated_added,
        reactivated_this_run: tallies.reactivated,
        deprecated: count_status(LifecycleStatus::Deprecated),
        disabled: count_status(LifecycleStatus::Disabled),
    };

    CatalogIndex {
        generated_at,
        source,
        counts,
        items,
        manifests,
    }
}
