//! Server catalog model and reconciliation.
//!
//! Leaves first: `identity` keys entries, `normalize` turns raw records into
//! manifests, `paths` places them, `lifecycle` ages them, `reconcile` drives a
//! run and `index` renders the resulting documents.

pub mod identity;
pub mod index;
pub mod lifecycle;
pub mod model;
pub mod normalize;
pub mod paths;
pub mod reconcile;
pub mod registry;
pub mod snapshot;
pub mod validate;

pub use identity::{IdentityKey, ManifestId, Transport, derive};
pub use index::{CatalogIndex, IndexCounts, IndexItem, ManifestList, SourceDescriptor};
pub use lifecycle::{LifecycleTracker, Transition};
pub use model::{Harvest, Lifecycle, LifecycleStatus, Manifest, Provenance, load_manifest_from_bytes};
pub use normalize::{RawRecord, SourceContext, normalize};
pub use paths::{EntryPath, assign};
pub use reconcile::{RecordBatch, RunContext, RunSummary, TransitionCounts, reconcile};
pub use snapshot::CatalogSnapshot;
pub use validate::{ValidationReport, validate_catalog_index};
