//! Read-only view of the catalog as it stood when a run started.

use crate::catalog::identity::{IdentityKey, derive};
use crate::catalog::model::{MANIFEST_TYPE, Manifest, load_manifest_from_bytes};
use crate::catalog::paths::MANIFEST_FILE;
use crate::error::{FatalError, SkippableError};
use crate::store::CatalogStore;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// One manifest found under the servers directory.
#[derive(Clone, Debug)]
pub struct ExistingEntry {
    /// Catalog-relative path of the `manifest.json`.
    pub path: String,
    pub key: IdentityKey,
    pub manifest: Manifest,
}

#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    /// Entries sorted by path.
    pub entries: Vec<ExistingEntry>,
    /// Index into `entries` of the first entry seen for each key.
    pub by_key: BTreeMap<IdentityKey, usize>,
    pub errors: Vec<SkippableError>,
}

impl CatalogSnapshot {
    /// Load every `manifest.json` under `servers_dir`.
    ///
    /// Unreadable manifests are recorded as skippable errors and left out of
    /// the snapshot; files whose `type` is not a server manifest are ignored.
    pub fn load(store: &dyn CatalogStore, servers_dir: &str) -> Result<Self, FatalError> {
        let paths = store
            .find_files(servers_dir, MANIFEST_FILE)
            .map_err(|err| FatalError::store(servers_dir, err))?;

        let mut snapshot = CatalogSnapshot::default();
        for path in paths {
            let manifest = match store
                .read(&path)
                .map_err(anyhow::Error::from)
                .and_then(|bytes| load_manifest_from_bytes(&bytes))
            {
                Ok(manifest) => manifest,
                Err(err) => {
                    warn!(%path, error = %format!("{err:#}"), "skipping unreadable manifest");
                    snapshot.errors.push(SkippableError::UnreadableExisting {
                        path,
                        detail: format!("{err:#}"),
                    });
                    continue;
                }
            };
            if manifest.kind != MANIFEST_TYPE {
                debug!(%path, kind = %manifest.kind, "ignoring non-server manifest");
                continue;
            }

            let key = derive(&manifest);
            let index = snapshot.entries.len();
            snapshot.by_key.entry(key.clone()).or_insert(index);
            snapshot.entries.push(ExistingEntry {
                path,
                key,
                manifest,
            });
        }
        Ok(snapshot)
    }

    pub fn get(&self, key: &IdentityKey) -> Option<&ExistingEntry> {
        self.by_key.get(key).map(|&index| &self.entries[index])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
