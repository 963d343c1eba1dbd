//! Canonical manifest schema and its lifecycle/harvest sub-records.
//!
//! Fields the reconciler reasons about are typed; everything else a discovery
//! tool attached (tools, resources, packages, remotes, inputs) survives in the
//! flattened `extra` maps so entries can be rewritten in place without loss.

use crate::catalog::identity::{ManifestId, Transport};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;

/// Fixed `type` tag on every catalog manifest.
pub const MANIFEST_TYPE: &str = "mcp_server";

/// Provenance `source` value marking registry-sourced manifests.
pub const REGISTRY_SOURCE: &str = "mcp-registry";

const UPSTREAM_DEPRECATED: &str = "deprecated";

type Extra = BTreeMap<String, Value>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
/// One installable or reachable server variant.
pub struct Manifest {
    #[serde(rename = "type", default, deserialize_with = "nullable")]
    pub kind: String,
    #[serde(default, deserialize_with = "nullable")]
    pub id: ManifestId,
    #[serde(default, deserialize_with = "nullable")]
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "BTreeMap::is_empty")]
    pub links: Extra,
    #[serde(default, deserialize_with = "nullable")]
    pub mcp_registration: McpRegistration,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Provenance::is_empty")]
    pub provenance: Provenance,
    #[serde(default, deserialize_with = "nullable")]
    pub lifecycle: Lifecycle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub harvest: Option<Harvest>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Manifest {
    /// Transport declared in `mcp_registration.server`, `UNKNOWN` when absent.
    pub fn transport(&self) -> Transport {
        self.mcp_registration
            .server
            .transport
            .clone()
            .unwrap_or(Transport::Unknown)
    }

    /// Lifecycle status with an unset status reading as active.
    pub fn effective_status(&self) -> LifecycleStatus {
        self.lifecycle
            .status
            .clone()
            .unwrap_or(LifecycleStatus::Active)
    }

    pub fn is_active(&self) -> bool {
        self.effective_status() == LifecycleStatus::Active
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
/// How a consumer reaches or launches the server.
pub struct McpRegistration {
    #[serde(default, deserialize_with = "nullable")]
    pub server: ServerRegistration,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerRegistration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<Transport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecSpec>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
/// Command line used to launch a STDIO server.
pub struct ExecSpec {
    pub cmd: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
/// Where a manifest came from.
///
/// Discovery tools disagree on field names, so the repository reference may
/// appear as `repo_url`, `repo` or `source_repo`, and the subpath as
/// `subpath`, `path` or `source_path`. Use [`Provenance::repo_ref`] and
/// [`Provenance::subpath_ref`] rather than reading the fields directly.
pub struct Provenance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subpath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_key: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Provenance {
    pub fn is_empty(&self) -> bool {
        *self == Provenance::default()
    }

    pub fn is_registry(&self) -> bool {
        self.source.as_deref() == Some(REGISTRY_SOURCE)
    }

    /// Short hash of the registry variant key, present on every registry entry
    /// including those written before the full key was persisted.
    pub fn registry_hash(&self) -> Option<&str> {
        if !self.is_registry() {
            return None;
        }
        self.identity_key.as_deref().filter(|hash| !hash.is_empty())
    }

    pub fn deprecated_upstream(&self) -> bool {
        self.upstream_status
            .as_deref()
            .is_some_and(|status| status.eq_ignore_ascii_case(UPSTREAM_DEPRECATED))
    }

    pub fn repo_ref(&self) -> Option<&str> {
        first_non_blank([&self.repo_url, &self.repo, &self.source_repo])
    }

    pub fn subpath_ref(&self) -> Option<&str> {
        first_non_blank([&self.subpath, &self.path, &self.source_path])
    }
}

fn first_non_blank<'a, const N: usize>(candidates: [&'a Option<String>; N]) -> Option<&'a str> {
    candidates
        .into_iter()
        .filter_map(|value| value.as_deref())
        .find(|value| !value.trim().is_empty())
}

/// Catalog lifecycle status.
///
/// `Other` keeps status strings written by external operators; the tracker
/// treats them like an unset status.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LifecycleStatus {
    Active,
    Deprecated,
    Disabled,
    Other(String),
}

impl LifecycleStatus {
    pub fn as_str(&self) -> &str {
        match self {
            LifecycleStatus::Active => "active",
            LifecycleStatus::Deprecated => "deprecated",
            LifecycleStatus::Disabled => "disabled",
            LifecycleStatus::Other(value) => value.as_str(),
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "active" => LifecycleStatus::Active,
            "deprecated" => LifecycleStatus::Deprecated,
            "disabled" => LifecycleStatus::Disabled,
            other => LifecycleStatus::Other(other.to_string()),
        }
    }
}

impl Serialize for LifecycleStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LifecycleStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(Self::parse(&value))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
/// Lifecycle sub-record. `deprecated_at` is write-once.
pub struct Lifecycle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<LifecycleStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reactivated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaced_by: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
/// Per-run sighting record.
pub struct Harvest {
    #[serde(default)]
    pub seen_in_latest_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Treat an explicit JSON `null` like a missing field.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + DeserializeOwned,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parse a manifest document without further validation.
pub fn load_manifest_from_bytes(bytes: &[u8]) -> Result<Manifest> {
    serde_json::from_slice(bytes).context("parsing manifest JSON")
}
