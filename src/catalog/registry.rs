//! Wire types for registry `ServerResponse` objects.
//!
//! Only the fields normalization needs are typed. Package and remote objects
//! keep their remaining fields so the original entry can be embedded in the
//! manifest it produced.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// `_meta` key holding the official registry's lifecycle hints.
pub const OFFICIAL_META_KEY: &str = "io.modelcontextprotocol.registry/official";

#[derive(Clone, Debug, Deserialize)]
pub struct ServerResponse {
    pub server: RegistryServer,
    #[serde(rename = "_meta", default)]
    pub meta: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RegistryServer {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "serverName", default)]
    pub server_name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub repository: Option<Value>,
    #[serde(default)]
    pub packages: Option<Vec<Package>>,
    #[serde(default)]
    pub remotes: Option<Vec<Remote>>,
    #[serde(default)]
    pub inputs: Option<Value>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub license: Option<String>,
}

impl RegistryServer {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.server_name.as_deref())
            .filter(|name| !name.trim().is_empty())
            .unwrap_or("unknown")
    }

    /// Repository URL from either a bare string or a `{url}` object.
    pub fn repository_url(&self) -> Option<&str> {
        let url = match self.repository.as_ref()? {
            Value::String(url) => Some(url.as_str()),
            Value::Object(map) => map.get("url").and_then(Value::as_str),
            _ => None,
        };
        url.filter(|url| !url.trim().is_empty())
    }

    pub fn input_variables(&self) -> Option<&Value> {
        self.inputs
            .as_ref()?
            .get("variables")
            .filter(|vars| match vars {
                Value::Object(map) => !map.is_empty(),
                Value::Array(items) => !items.is_empty(),
                Value::Null => false,
                _ => true,
            })
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Package {
    #[serde(rename = "registryType", default, skip_serializing_if = "Option::is_none")]
    pub registry_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(rename = "runtimeHint", default, skip_serializing_if = "Option::is_none")]
    pub runtime_hint: Option<String>,
    #[serde(rename = "runtimeArguments", default, skip_serializing_if = "Vec::is_empty")]
    pub runtime_arguments: Vec<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Package {
    /// Runtime arguments rendered as plain strings.
    ///
    /// Registry arguments are either strings or `{type, value}` objects; the
    /// latter contribute their `value`. Anything else is dropped.
    pub fn argument_strings(&self) -> Vec<String> {
        self.runtime_arguments
            .iter()
            .filter_map(|arg| match arg {
                Value::String(text) => Some(text.clone()),
                Value::Object(map) => map.get("value").and_then(Value::as_str).map(str::to_string),
                _ => None,
            })
            .collect()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Remote {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Remote {
    pub fn transport_name(&self) -> &str {
        self.transport
            .as_deref()
            .or(self.kind.as_deref())
            .unwrap_or_default()
    }
}

/// Lifecycle hints published alongside a server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpstreamHints {
    pub status: Option<String>,
    pub published_at: Option<String>,
    pub updated_at: Option<String>,
}

impl ServerResponse {
    /// Read hints from the official `_meta` block, falling back to top-level `_meta`.
    pub fn hints(&self) -> UpstreamHints {
        let official = self.meta.get(OFFICIAL_META_KEY);
        let pick = |field: &str| {
            official
                .and_then(|meta| meta.get(field))
                .or_else(|| self.meta.get(field))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        UpstreamHints {
            status: pick("status"),
            published_at: pick("publishedAt"),
            updated_at: pick("updatedAt"),
        }
    }
}
