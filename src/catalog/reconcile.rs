//! Reconciliation engine.
//!
//! A run has three phases. The prior catalog is loaded into a
//! [`CatalogSnapshot`]. A plan is computed in memory from the snapshot and the
//! complete normalized record set: collisions are detected and every lifecycle
//! transition is decided before anything touches the store. Only then is the
//! plan applied: entry files, group indexes and, last, the top-level index.
//!
//! A run that fails before the top-level index is written leaves the previous
//! `index.json` in place. Entry files already rewritten by the failed run stay
//! rewritten; each is a valid manifest on its own.

use crate::catalog::identity::{IdentityKey, ManifestId, derive};
use crate::catalog::index::{
    CatalogIndex, IndexItem, RunTallies, SourceDescriptor, build_catalog_index, group_index,
    variant_index,
};
use crate::catalog::lifecycle::{LifecycleTracker, Transition};
use crate::catalog::model::Manifest;
use crate::catalog::normalize::{RawRecord, SourceContext, normalize};
use crate::catalog::paths::{EntryPath, MANIFEST_FILE, assign, group_dir, group_of, normalize_dir};
use crate::catalog::snapshot::CatalogSnapshot;
use crate::error::{FatalError, SkippableError};
use crate::schema_loader::catalog_index_schema;
use crate::store::{CatalogStore, encode_json};
use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Records handed over by a discovery source, plus rows it already rejected.
#[derive(Debug, Default)]
pub struct RecordBatch {
    pub records: Vec<RawRecord>,
    pub errors: Vec<SkippableError>,
}

/// Everything a run needs besides the records and the store.
#[derive(Clone, Debug)]
pub struct RunContext {
    /// Catalog-relative directory holding entry groups.
    pub servers_dir: String,
    /// Catalog-relative path of the top-level index.
    pub index_file: String,
    pub source: SourceDescriptor,
    /// Used in deprecation reasons and synthesized provenance.
    pub label: String,
    pub registry_base_url: Option<String>,
    pub now: DateTime<Utc>,
}

impl RunContext {
    pub fn new(servers_dir: &str, index_file: &str, source: SourceDescriptor, label: impl Into<String>) -> Self {
        Self {
            servers_dir: normalize_dir(servers_dir),
            index_file: normalize_dir(index_file),
            source,
            label: label.into(),
            registry_base_url: None,
            now: Utc::now().trunc_subsecs(0),
        }
    }

    pub fn with_registry_base_url(mut self, url: Option<String>) -> Self {
        self.registry_base_url = url;
        self
    }

    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now.trunc_subsecs(0);
        self
    }

    fn absent_reason(&self) -> String {
        format!("Not found in latest harvest from {}", self.label)
    }
}

/// How many entries took each transition this run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TransitionCounts {
    pub activated: usize,
    pub refreshed: usize,
    pub reactivated: usize,
    pub held_disabled: usize,
    pub deprecated: usize,
    pub relocated: usize,
    pub still_inactive: usize,
    /// Prior entries whose path was claimed by a different key this run.
    pub superseded: usize,
}

impl TransitionCounts {
    fn record(&mut self, transition: Transition) {
        let slot = match transition {
            Transition::Activated => &mut self.activated,
            Transition::Refreshed => &mut self.refreshed,
            Transition::Reactivated => &mut self.reactivated,
            Transition::HeldDisabled => &mut self.held_disabled,
            Transition::Deprecated => &mut self.deprecated,
            Transition::Relocated => &mut self.relocated,
            Transition::StillInactive => &mut self.still_inactive,
        };
        *slot += 1;
    }
}

/// Outcome of a successful run.
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub records: usize,
    pub manifests_seen: usize,
    pub transitions: TransitionCounts,
    pub total_items: usize,
    pub active_manifests: usize,
    pub index_file: String,
    pub errors: Vec<SkippableError>,
}

/// An entry to be written at its assigned path.
#[derive(Debug)]
struct PlannedEntry {
    key: IdentityKey,
    path: EntryPath,
    manifest_path: String,
    manifest: Manifest,
}

/// A prior entry rewritten in place with an absent or relocated transition.
///
/// `listed` is false when another entry already carries its id; the file stays
/// on disk but gets no row in `items[]`.
#[derive(Debug)]
struct RetainedEntry {
    key: IdentityKey,
    manifest_path: String,
    manifest: Manifest,
    listed: bool,
}

#[derive(Debug, Default)]
struct Plan {
    seen: Vec<PlannedEntry>,
    retained: Vec<RetainedEntry>,
    transitions: TransitionCounts,
}

/// Run one reconciliation pass against `store`.
pub fn reconcile(store: &dyn CatalogStore, batch: RecordBatch, ctx: &RunContext) -> Result<RunSummary, FatalError> {
    let RecordBatch {
        records,
        mut errors,
    } = batch;
    if records.is_empty() {
        return Err(FatalError::EmptyInput {
            detail: format!("{} returned no records", ctx.label),
        });
    }
    info!(records = records.len(), source = %ctx.label, "starting reconciliation");

    let source_ctx = SourceContext {
        label: ctx.label.clone(),
        registry_base_url: ctx.registry_base_url.clone(),
    };
    let mut fresh = Vec::new();
    for record in &records {
        match normalize(record, &source_ctx) {
            Ok(manifests) => fresh.extend(manifests),
            Err(err) => {
                warn!(error = %err, "skipping record");
                errors.push(err);
            }
        }
    }
    if fresh.is_empty() {
        return Err(FatalError::EmptyInput {
            detail: format!("all {} records from {} were skipped", records.len(), ctx.label),
        });
    }

    let snapshot = CatalogSnapshot::load(store, &ctx.servers_dir)?;
    info!(existing = snapshot.len(), fresh = fresh.len(), "loaded prior catalog");
    errors.extend(snapshot.errors.iter().cloned());

    let plan = build_plan(fresh, &snapshot, ctx)?;
    let items = apply(store, &plan, ctx)?;

    let tallies = RunTallies {
        deprecated_added: plan.transitions.deprecated + plan.transitions.relocated,
        reactivated: plan.transitions.reactivated,
    };
    let index = build_catalog_index(ctx.now, ctx.source.clone(), items, tallies);
    check_active_paths(store, &index)?;
    write_top_index(store, &index, ctx)?;

    info!(
        total_items = index.counts.total_items,
        active = index.counts.active_manifests,
        deprecated_added = index.counts.deprecated_added_this_run,
        skipped = errors.len(),
        "reconciliation complete"
    );
    Ok(RunSummary {
        records: records.len(),
        manifests_seen: plan.seen.len(),
        transitions: plan.transitions,
        total_items: index.counts.total_items,
        active_manifests: index.counts.active_manifests,
        index_file: ctx.index_file.clone(),
        errors,
    })
}

fn build_plan(fresh: Vec<Manifest>, snapshot: &CatalogSnapshot, ctx: &RunContext) -> Result<Plan, FatalError> {
    let tracker = LifecycleTracker::new(ctx.now);
    let mut by_key: BTreeMap<IdentityKey, PlannedEntry> = BTreeMap::new();
    let mut id_owner: BTreeMap<ManifestId, IdentityKey> = BTreeMap::new();
    let mut path_owner: BTreeMap<String, IdentityKey> = BTreeMap::new();

    for manifest in fresh {
        let key = derive(&manifest);
        if manifest.id.is_blank() {
            return Err(FatalError::MissingId {
                key: key.to_string(),
            });
        }
        match id_owner.get(&manifest.id) {
            Some(owner) if *owner != key => {
                return Err(FatalError::IdentityCollision {
                    id: manifest.id.to_string(),
                    first: owner.to_string(),
                    second: key.to_string(),
                });
            }
            Some(_) => {}
            None => {
                id_owner.insert(manifest.id.clone(), key.clone());
            }
        }

        let path = assign(&key);
        let manifest_path = path.manifest(&ctx.servers_dir);
        match path_owner.get(&manifest_path) {
            Some(owner) if *owner != key => {
                return Err(FatalError::PathCollision {
                    path: manifest_path,
                    first: owner.to_string(),
                    second: key.to_string(),
                });
            }
            Some(_) => {}
            None => {
                path_owner.insert(manifest_path.clone(), key.clone());
            }
        }

        if let Some(current) = by_key.get(&key) {
            if manifest.version < current.manifest.version {
                debug!(%key, version = %manifest.version, "keeping newer duplicate");
                continue;
            }
        }
        by_key.insert(
            key.clone(),
            PlannedEntry {
                key,
                path,
                manifest_path,
                manifest,
            },
        );
    }

    let mut plan = Plan::default();
    for (_, mut entry) in by_key {
        let hash = entry.manifest.provenance.registry_hash();
        let prior = snapshot
            .entries
            .iter()
            .find(|existing| existing.path == entry.manifest_path && existing.key == entry.key)
            .or_else(|| snapshot.get(&entry.key))
            .or_else(|| {
                snapshot
                    .entries
                    .iter()
                    .find(|existing| hash.is_some() && existing.manifest.provenance.registry_hash() == hash)
            });
        if let Some(prior) = prior {
            entry.manifest.lifecycle = prior.manifest.lifecycle.clone();
            if entry.manifest.harvest.is_none() {
                entry.manifest.harvest = prior.manifest.harvest.clone();
            }
        }
        let transition = if entry.manifest.provenance.deprecated_upstream() {
            tracker.mark_seen_deprecated(&mut entry.manifest)
        } else {
            tracker.mark_seen(&mut entry.manifest)
        };
        debug!(key = %entry.key, path = %entry.manifest_path, ?transition, "seen");
        plan.transitions.record(transition);
        plan.seen.push(entry);
    }

    let seen_paths: BTreeMap<&str, &PlannedEntry> = plan
        .seen
        .iter()
        .map(|entry| (entry.manifest_path.as_str(), entry))
        .collect();
    let seen_keys: BTreeMap<&IdentityKey, &PlannedEntry> =
        plan.seen.iter().map(|entry| (&entry.key, entry)).collect();
    let seen_hashes: BTreeMap<&str, &PlannedEntry> = plan
        .seen
        .iter()
        .filter_map(|entry| Some((entry.manifest.provenance.registry_hash()?, entry)))
        .collect();

    let mut retained = Vec::new();
    for existing in &snapshot.entries {
        let hash = existing.manifest.provenance.registry_hash();
        if let Some(&owner) = seen_paths.get(existing.path.as_str()) {
            let same_variant = hash.is_some() && owner.manifest.provenance.registry_hash() == hash;
            if owner.key != existing.key && !same_variant {
                warn!(path = %existing.path, old = %existing.key, new = %owner.key, "entry superseded at its path");
                plan.transitions.superseded += 1;
            }
            continue;
        }

        // Same key at a new path, a legacy entry matched by hash, or a different
        // key that now carries this entry's id.
        let replacement = seen_keys
            .get(&existing.key)
            .or_else(|| hash.and_then(|hash| seen_hashes.get(hash)))
            .or_else(|| {
                id_owner
                    .get(&existing.manifest.id)
                    .and_then(|owner| seen_keys.get(owner))
            })
            .copied();

        let mut manifest = existing.manifest.clone();
        let transition = match replacement {
            Some(moved) => tracker.mark_relocated(
                &mut manifest,
                &format!("Relocated to {}", moved.manifest_path),
                moved.manifest.id.as_str(),
            ),
            None => tracker.mark_absent(&mut manifest, &ctx.absent_reason()),
        };
        debug!(key = %existing.key, path = %existing.path, ?transition, "not seen");
        plan.transitions.record(transition);
        retained.push(RetainedEntry {
            key: existing.key.clone(),
            manifest_path: existing.path.clone(),
            manifest,
            listed: false,
        });
    }

    // One row per id: fresh entries first, then retained entries that were not
    // replaced, then the rest in path order.
    let mut listed_ids: BTreeSet<&ManifestId> = plan.seen.iter().map(|entry| &entry.manifest.id).collect();
    let mut order: Vec<usize> = (0..retained.len()).collect();
    order.sort_by_key(|&idx| retained[idx].manifest.lifecycle.replaced_by.is_some());
    let mut listed = vec![false; retained.len()];
    for idx in order {
        let entry = &retained[idx];
        if listed_ids.insert(&entry.manifest.id) {
            listed[idx] = true;
        } else {
            debug!(id = %entry.manifest.id, path = %entry.manifest_path, "id already listed; row omitted");
        }
    }
    for (entry, listed) in retained.iter_mut().zip(listed) {
        entry.listed = listed;
    }
    plan.retained = retained;
    Ok(plan)
}

/// Write every planned entry and the group indexes; return the item rows.
fn apply(store: &dyn CatalogStore, plan: &Plan, ctx: &RunContext) -> Result<Vec<IndexItem>, FatalError> {
    let mut items = Vec::with_capacity(plan.seen.len() + plan.retained.len());

    for entry in &plan.seen {
        write_json(store, &entry.manifest_path, &entry.manifest)?;
        let provenance = if entry.manifest.provenance.is_empty() {
            synthesize_provenance(&entry.key, ctx)
        } else {
            serde_json::to_value(&entry.manifest.provenance).map_err(|source| FatalError::Encode {
                path: entry.path.provenance(&ctx.servers_dir),
                source,
            })?
        };
        write_json(store, &entry.path.provenance(&ctx.servers_dir), &provenance)?;
        write_json(store, &entry.path.index(&ctx.servers_dir), &variant_index())?;
        items.push(IndexItem::new(&entry.manifest, &entry.key, &entry.manifest_path));
    }

    for entry in &plan.retained {
        write_json(store, &entry.manifest_path, &entry.manifest)?;
        if entry.listed {
            items.push(IndexItem::new(&entry.manifest, &entry.key, &entry.manifest_path));
        }
    }

    write_group_indexes(store, &ctx.servers_dir)?;
    info!(
        written = plan.seen.len(),
        retained = plan.retained.len(),
        "catalog entries written"
    );
    Ok(items)
}

fn synthesize_provenance(key: &IdentityKey, ctx: &RunContext) -> Value {
    let mut provenance = json!({
        "transport": key.transport().as_str(),
        "harvested_from": ctx.label,
        "harvested_at": ctx.now,
    });
    if let IdentityKey::Repo { repo, subpath, .. } = key {
        provenance["repo_url"] = json!(format!("https://github.com/{repo}"));
        provenance["subpath"] = json!(subpath);
    }
    provenance
}

fn write_group_indexes(store: &dyn CatalogStore, servers_dir: &str) -> Result<(), FatalError> {
    let manifests = store
        .find_files(servers_dir, MANIFEST_FILE)
        .map_err(|err| FatalError::store(servers_dir, err))?;
    let groups: BTreeSet<&str> = manifests
        .iter()
        .filter_map(|path| group_of(servers_dir, path))
        .collect();
    for group in groups {
        let dir = group_dir(servers_dir, group);
        let list = group_index(&dir, &manifests);
        write_json(store, &format!("{dir}/index.json"), &list)?;
    }
    Ok(())
}

/// Every active path must be relative and present before the index is trusted.
fn check_active_paths(store: &dyn CatalogStore, index: &CatalogIndex) -> Result<(), FatalError> {
    for path in &index.manifests {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Err(FatalError::PathIsUrl { path: path.clone() });
        }
        if !store.exists(path) {
            return Err(FatalError::ActivePathMissing { path: path.clone() });
        }
    }
    Ok(())
}

fn write_top_index(store: &dyn CatalogStore, index: &CatalogIndex, ctx: &RunContext) -> Result<(), FatalError> {
    let value = serde_json::to_value(index).map_err(|source| FatalError::Encode {
        path: ctx.index_file.clone(),
        source,
    })?;
    let schema = catalog_index_schema().map_err(|err| FatalError::IndexSchema {
        details: format!("{err:#}"),
    })?;
    schema
        .validate(&value)
        .map_err(|errors| FatalError::IndexSchema {
            details: errors.join("\n"),
        })?;

    let bytes = encode_json(&value).map_err(|source| FatalError::Encode {
        path: ctx.index_file.clone(),
        source,
    })?;
    store
        .write_atomic(&ctx.index_file, &bytes)
        .map_err(|err| FatalError::store(&ctx.index_file, err))
}

fn write_json<T: Serialize>(store: &dyn CatalogStore, path: &str, value: &T) -> Result<(), FatalError> {
    let bytes = encode_json(value).map_err(|source| FatalError::Encode {
        path: path.to_string(),
        source,
    })?;
    store.write(path, &bytes).map_err(|err| FatalError::store(path, err))
}
