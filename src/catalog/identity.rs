//! Identity keys and generated manifest identifiers.
//!
//! An [`IdentityKey`] names one logical server variant independently of its
//! cosmetic metadata. Repository-sourced entries are keyed by
//! `(owner/repo, subpath, transport)`; registry-sourced entries by the full
//! composite variant string, since one upstream server may yield several
//! installable variants.

use crate::catalog::model::Manifest;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

/// Length of the hex digest suffix used in generated ids and paths.
pub const SHORT_HASH_LEN: usize = 10;

const UNKNOWN_REPO: &str = "unknown/unknown";

/// Stable identifier carried in a manifest's `id` field.
#[derive(Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestId(pub String);

impl ManifestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ManifestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Connection mechanism a server exposes.
///
/// Parsing is case-insensitive; `Other` keeps transports this crate does not
/// model so rewritten manifests do not lose them.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Transport {
    Sse,
    Ws,
    Stdio,
    Unknown,
    Other(String),
}

impl Transport {
    pub fn as_str(&self) -> &str {
        match self {
            Transport::Sse => "SSE",
            Transport::Ws => "WS",
            Transport::Stdio => "STDIO",
            Transport::Unknown => "UNKNOWN",
            Transport::Other(value) => value.as_str(),
        }
    }

    pub fn parse(value: &str) -> Self {
        let upper = value.trim().to_ascii_uppercase();
        match upper.as_str() {
            "" | "UNKNOWN" => Transport::Unknown,
            "SSE" => Transport::Sse,
            "WS" => Transport::Ws,
            "STDIO" => Transport::Stdio,
            _ => Transport::Other(upper),
        }
    }

    /// Map a registry remote transport onto the closed `{SSE, WS}` set.
    ///
    /// Unrecognized names fall back to SSE.
    pub fn for_remote(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "WS" | "WEBSOCKET" => Transport::Ws,
            _ => Transport::Sse,
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Transport {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Transport {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(Self::parse(&value))
    }
}

/// Stable key naming one catalog entry across runs.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum IdentityKey {
    Repo {
        repo: String,
        subpath: String,
        transport: Transport,
    },
    Registry {
        server_name: String,
        transport: Transport,
        variant_key: String,
    },
}

impl IdentityKey {
    pub fn transport(&self) -> &Transport {
        match self {
            IdentityKey::Repo { transport, .. } | IdentityKey::Registry { transport, .. } => {
                transport
            }
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityKey::Repo {
                repo,
                subpath,
                transport,
            } => write!(f, "{repo}|{subpath}|{transport}"),
            IdentityKey::Registry { variant_key, .. } => f.write_str(variant_key),
        }
    }
}

/// Compute the identity key of a normalized (or previously persisted) manifest.
///
/// Registry entries persist their composite variant key in provenance. Older
/// entries that only kept the short hash are keyed on that hash instead. Such a
/// key never equals a freshly derived one, so the engine pairs them up through
/// [`Provenance::registry_hash`](crate::catalog::model::Provenance::registry_hash).
pub fn derive(manifest: &Manifest) -> IdentityKey {
    let provenance = &manifest.provenance;
    let transport = manifest.transport();

    if provenance.is_registry() {
        let server_name = provenance
            .server_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| manifest.name.clone());
        let variant_key = match (&provenance.variant_key, &provenance.identity_key) {
            (Some(key), _) if !key.is_empty() => key.clone(),
            (_, Some(hash)) => format!("{server_name}|legacy|{hash}"),
            _ => format!("{server_name}|legacy|{}", manifest.id),
        };
        return IdentityKey::Registry {
            server_name,
            transport,
            variant_key,
        };
    }

    let repo = provenance
        .repo_ref()
        .map(normalize_repo_slug)
        .unwrap_or_else(|| UNKNOWN_REPO.to_string());
    let subpath = normalize_subpath(provenance.subpath_ref().unwrap_or_default());
    IdentityKey::Repo {
        repo,
        subpath,
        transport,
    }
}

/// Normalize a repository URL or slug to `owner/repo`.
///
/// Accepts `https://host/owner/repo(.git)`, `git@host:owner/repo.git`,
/// `host/owner/repo` and bare `owner/repo`.
pub fn normalize_repo_slug(raw: &str) -> String {
    let mut slug = raw.trim().trim_end_matches('/');

    if let Some((_, rest)) = slug.split_once("://") {
        slug = rest.split_once('/').map(|(_, path)| path).unwrap_or("");
    } else if let Some(rest) = slug.strip_prefix("git@") {
        slug = rest.split_once(':').map(|(_, path)| path).unwrap_or(rest);
    } else if let Some((host, path)) = slug.split_once('/') {
        if host.contains('.') && path.contains('/') {
            slug = path;
        }
    }

    let slug = slug.strip_suffix(".git").unwrap_or(slug).trim_matches('/');
    if slug.is_empty() {
        UNKNOWN_REPO.to_string()
    } else {
        slug.to_string()
    }
}

/// Strip leading/trailing separators and unify backslashes.
pub fn normalize_subpath(raw: &str) -> String {
    raw.trim()
        .replace('\\', "/")
        .trim_matches('/')
        .to_string()
}

/// First [`SHORT_HASH_LEN`] hex characters of the SHA-256 of `value`.
pub fn short_hash(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(SHORT_HASH_LEN);
    hex
}

/// Generated id for registry variants: `mcp.<slug>.<transport>.<hash10>`.
pub fn stable_manifest_id(server_name: &str, transport: &Transport, variant_key: &str) -> ManifestId {
    let safe_name = server_name.replace(['/', '.'], "-");
    ManifestId(format!(
        "mcp.{safe_name}.{}.{}",
        transport.as_str().to_ascii_lowercase(),
        short_hash(variant_key)
    ))
}

/// Composite key for one installable registry package.
pub fn package_variant_key(
    server_name: &str,
    registry_type: Option<&str>,
    identifier: Option<&str>,
    version: Option<&str>,
) -> String {
    format!(
        "{server_name}|package|{}|{}|{}",
        registry_type.unwrap_or_default(),
        identifier.unwrap_or_default(),
        version.unwrap_or_default()
    )
}

/// Composite key for one registry remote endpoint.
pub fn remote_variant_key(server_name: &str, transport: &Transport, url: Option<&str>) -> String {
    format!(
        "{server_name}|remote|{transport}|{}",
        url.unwrap_or_default()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transport_round_trips_known_and_unknown() {
        let known: Transport = serde_json::from_str("\"sse\"").unwrap();
        assert_eq!(known, Transport::Sse);
        assert_eq!(serde_json::to_string(&known).unwrap(), "\"SSE\"");

        let custom: Transport = serde_json::from_str("\"streamable_http\"").unwrap();
        assert_eq!(custom, Transport::Other("STREAMABLE_HTTP".to_string()));
        assert_eq!(
            serde_json::to_string(&custom).unwrap(),
            "\"STREAMABLE_HTTP\""
        );

        let blank: Transport = serde_json::from_str("\"  \"").unwrap();
        assert_eq!(blank, Transport::Unknown);
    }

    #[test]
    fn remote_transports_collapse_to_sse_or_ws() {
        assert_eq!(Transport::for_remote("streamable_http"), Transport::Sse);
        assert_eq!(Transport::for_remote("HTTP"), Transport::Sse);
        assert_eq!(Transport::for_remote("websocket"), Transport::Ws);
        assert_eq!(Transport::for_remote("carrier-pigeon"), Transport::Sse);
    }

    #[test]
    fn repo_urls_normalize_to_owner_repo() {
        for raw in [
            "https://github.com/acme/widget",
            "https://github.com/acme/widget.git",
            "https://github.com/acme/widget/",
            "git@github.com:acme/widget.git",
            "github.com/acme/widget",
            "acme/widget",
        ] {
            assert_eq!(normalize_repo_slug(raw), "acme/widget", "input {raw}");
        }
        assert_eq!(normalize_repo_slug(""), "unknown/unknown");
    }

    #[test]
    fn subpaths_lose_leading_separators() {
        assert_eq!(normalize_subpath("/src/server"), "src/server");
        assert_eq!(normalize_subpath("src\\server\\"), "src/server");
        assert_eq!(normalize_subpath(""), "");
    }

    #[test]
    fn generated_ids_are_deterministic_and_distinct() {
        let a = package_variant_key("io.github.acme/weather", Some("pypi"), Some("weather-mcp"), Some("1.2.0"));
        let b = package_variant_key("io.github.acme/weather", Some("pypi"), Some("weather-mcp"), Some("1.3.0"));
        let id_a = stable_manifest_id("io.github.acme/weather", &Transport::Stdio, &a);
        assert_eq!(id_a, stable_manifest_id("io.github.acme/weather", &Transport::Stdio, &a));
        assert_ne!(id_a, stable_manifest_id("io.github.acme/weather", &Transport::Stdio, &b));
        assert!(id_a.as_str().starts_with("mcp.io-github-acme-weather.stdio."));
        assert_eq!(id_a.as_str().rsplit('.').next().unwrap().len(), SHORT_HASH_LEN);
    }

    #[test]
    fn derive_uses_repo_provenance_and_transport() {
        let manifest: Manifest = serde_json::from_value(json!({
            "type": "mcp_server",
            "id": "widget",
            "name": "widget",
            "version": "0.1.0",
            "mcp_registration": {"server": {"transport": "sse"}},
            "provenance": {"repo_url": "https://github.com/acme/widget.git", "subpath": "/src/server"}
        }))
        .unwrap();
        assert_eq!(
            derive(&manifest),
            IdentityKey::Repo {
                repo: "acme/widget".to_string(),
                subpath: "src/server".to_string(),
                transport: Transport::Sse,
            }
        );
    }

    #[test]
    fn derive_registry_prefers_persisted_variant_key() {
        let manifest: Manifest = serde_json::from_value(json!({
            "type": "mcp_server",
            "id": "mcp.io-github-acme-weather.sse.0123456789",
            "name": "io.github.acme/weather",
            "version": "1.0.0",
            "mcp_registration": {"server": {"transport": "SSE", "url": "https://x/sse"}},
            "provenance": {
                "source": "mcp-registry",
                "server_name": "io.github.acme/weather",
                "variant_key": "io.github.acme/weather|remote|SSE|https://x/sse"
            }
        }))
        .unwrap();
        let key = derive(&manifest);
        assert_eq!(key.to_string(), "io.github.acme/weather|remote|SSE|https://x/sse");
        assert_eq!(key.transport(), &Transport::Sse);
    }
}
