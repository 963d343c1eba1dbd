//! Manifest normalization.
//!
//! Discovery hands over loosely shaped JSON. [`RawRecord::classify`] sorts each
//! row into one of two shapes up front, and [`normalize`] runs the matching
//! per-shape conversion. A registry server may expand into several manifests:
//! one per package and one per remote.

use crate::catalog::identity::{
    Transport, normalize_repo_slug, package_variant_key, remote_variant_key, short_hash,
    stable_manifest_id,
};
use crate::catalog::model::{
    ExecSpec, MANIFEST_TYPE, Manifest, McpRegistration, Provenance, REGISTRY_SOURCE,
    ServerRegistration,
};
use crate::catalog::registry::{Package, RegistryServer, Remote, ServerResponse, UpstreamHints};
use crate::error::SkippableError;
use crate::schema_loader::manifest_schema;
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Version assigned to repository manifests that do not declare one.
pub const DEFAULT_VERSION: &str = "0.1.0";

/// Placeholder command for packages that lack both a runtime hint and an identifier.
pub const MISSING_EXEC_PLACEHOLDER: [&str; 2] = ["echo", "missing-runtimeHint-or-identifier"];

const DELETED_STATUS: &str = "deleted";

/// One discovery row, sorted by shape.
#[derive(Clone, Debug)]
pub enum RawRecord {
    RepoSourced(RepoRecord),
    RegistrySourced(RegistryRecord),
}

/// A manifest-shaped document produced by a repository harvester.
#[derive(Clone, Debug)]
pub struct RepoRecord {
    pub origin: String,
    pub manifest: Value,
}

/// A registry `ServerResponse`.
#[derive(Clone, Debug)]
pub struct RegistryRecord {
    pub origin: String,
    pub response: ServerResponse,
}

impl RawRecord {
    /// Decide which shape `value` has.
    ///
    /// Objects with a `server` object are registry responses. Objects carrying
    /// any of `type`, `provenance` or `mcp_registration` are repository
    /// manifests. Anything else is skipped.
    pub fn classify(origin: impl Into<String>, value: Value) -> Result<RawRecord, SkippableError> {
        let origin = origin.into();
        let Some(object) = value.as_object() else {
            return Err(SkippableError::UnrecognizedRecord { origin });
        };

        if object.get("server").is_some_and(Value::is_object) {
            let response: ServerResponse =
                serde_json::from_value(value).map_err(|err| SkippableError::InvalidJson {
                    origin: origin.clone(),
                    detail: err.to_string(),
                })?;
            return Ok(RawRecord::RegistrySourced(RegistryRecord { origin, response }));
        }

        if ["type", "provenance", "mcp_registration"]
            .iter()
            .any(|key| object.contains_key(*key))
        {
            return Ok(RawRecord::RepoSourced(RepoRecord {
                origin,
                manifest: value,
            }));
        }

        Err(SkippableError::UnrecognizedRecord { origin })
    }

    pub fn origin(&self) -> &str {
        match self {
            RawRecord::RepoSourced(record) => &record.origin,
            RawRecord::RegistrySourced(record) => &record.origin,
        }
    }
}

/// Facts about the discovery source shared by every record of a run.
#[derive(Clone, Debug, Default)]
pub struct SourceContext {
    /// Human-readable source label, e.g. the harvest directory.
    pub label: String,
    pub registry_base_url: Option<String>,
}

/// Convert one raw record into canonical manifests.
pub fn normalize(record: &RawRecord, ctx: &SourceContext) -> Result<Vec<Manifest>, SkippableError> {
    let manifests = match record {
        RawRecord::RepoSourced(repo) => vec![normalize_repo(repo)?],
        RawRecord::RegistrySourced(registry) => normalize_registry(registry, ctx)?,
    };
    for manifest in &manifests {
        check_schema(record.origin(), manifest)?;
    }
    Ok(manifests)
}

fn normalize_repo(record: &RepoRecord) -> Result<Manifest, SkippableError> {
    let origin = &record.origin;
    match record.manifest.get("type") {
        None | Some(Value::Null) => {}
        Some(Value::String(tag)) if tag == MANIFEST_TYPE => {}
        Some(other) => {
            return Err(SkippableError::WrongType {
                origin: origin.clone(),
                found: other.as_str().map(str::to_string).unwrap_or_else(|| other.to_string()),
            });
        }
    }

    let mut manifest: Manifest =
        serde_json::from_value(record.manifest.clone()).map_err(|err| SkippableError::InvalidJson {
            origin: origin.clone(),
            detail: err.to_string(),
        })?;
    manifest.kind = MANIFEST_TYPE.to_string();

    if manifest.name.trim().is_empty() {
        manifest.name = manifest
            .provenance
            .repo_ref()
            .map(repo_basename)
            .ok_or_else(|| SkippableError::MissingField {
                origin: origin.clone(),
                field: "name".to_string(),
            })?;
    }
    if manifest.version.trim().is_empty() {
        manifest.version = DEFAULT_VERSION.to_string();
    }
    let server = &mut manifest.mcp_registration.server;
    if server.transport.is_none() {
        server.transport = Some(Transport::Unknown);
    }
    Ok(manifest)
}

fn repo_basename(repo_ref: &str) -> String {
    let slug = normalize_repo_slug(repo_ref);
    slug.rsplit('/').next().unwrap_or(&slug).to_string()
}

fn normalize_registry(record: &RegistryRecord, ctx: &SourceContext) -> Result<Vec<Manifest>, SkippableError> {
    let server = &record.response.server;
    let server_name = server.display_name().to_string();
    let origin = format!("{}: {server_name}", record.origin);
    let hints = record.response.hints();

    if hints
        .status
        .as_deref()
        .is_some_and(|status| status.eq_ignore_ascii_case(DELETED_STATUS))
    {
        return Err(SkippableError::Deleted { origin });
    }

    let Some(version) = server.version.clone().filter(|v| !v.trim().is_empty()) else {
        return Err(SkippableError::MissingField {
            origin,
            field: "version".to_string(),
        });
    };

    let packages = server.packages.as_deref().unwrap_or_default();
    let remotes = server.remotes.as_deref().unwrap_or_default();
    if packages.is_empty() && remotes.is_empty() {
        return Err(SkippableError::MissingField {
            origin,
            field: "packages or remotes".to_string(),
        });
    }

    let base = RegistryBase {
        server,
        server_name: &server_name,
        version: &version,
        hints: &hints,
        ctx,
    };
    let mut manifests = Vec::with_capacity(packages.len() + remotes.len());
    for pkg in packages {
        manifests.push(base.package_manifest(pkg));
    }
    for remote in remotes {
        manifests.push(base.remote_manifest(remote));
    }
    Ok(manifests)
}

/// Fields shared by every manifest one registry server expands into.
struct RegistryBase<'a> {
    server: &'a RegistryServer,
    server_name: &'a str,
    version: &'a str,
    hints: &'a UpstreamHints,
    ctx: &'a SourceContext,
}

impl RegistryBase<'_> {
    fn package_manifest(&self, pkg: &Package) -> Manifest {
        let variant_key = package_variant_key(
            self.server_name,
            pkg.registry_type.as_deref(),
            pkg.identifier.as_deref(),
            pkg.version.as_deref(),
        );
        let registration = ServerRegistration {
            transport: Some(Transport::Stdio),
            exec: Some(stdio_exec(pkg)),
            ..ServerRegistration::default()
        };
        let mut manifest = self.manifest(Transport::Stdio, &variant_key, registration);
        manifest.extra.insert("packages".to_string(), json!([pkg]));
        manifest
    }

    fn remote_manifest(&self, remote: &Remote) -> Manifest {
        let transport = Transport::for_remote(remote.transport_name());
        let variant_key = remote_variant_key(self.server_name, &transport, remote.url.as_deref());
        let registration = ServerRegistration {
            transport: Some(transport.clone()),
            url: remote.url.clone(),
            ..ServerRegistration::default()
        };
        let mut manifest = self.manifest(transport, &variant_key, registration);
        manifest.extra.insert("remotes".to_string(), json!([remote]));
        manifest
    }

    fn manifest(&self, transport: Transport, variant_key: &str, server: ServerRegistration) -> Manifest {
        let mut extra = BTreeMap::new();
        if let Some(variables) = self.server.input_variables() {
            extra.insert("inputs".to_string(), json!({ "variables": variables }));
        }

        Manifest {
            kind: MANIFEST_TYPE.to_string(),
            id: stable_manifest_id(self.server_name, &transport, variant_key),
            name: self.server_name.to_string(),
            version: self.version.to_string(),
            title: self.server.title.clone(),
            description: self.server.description.clone(),
            tags: self.server.tags.clone().unwrap_or_default(),
            license: self.server.license.clone().filter(|l| !l.trim().is_empty()),
            links: self.links(),
            mcp_registration: McpRegistration {
                server,
                extra: BTreeMap::new(),
            },
            provenance: Provenance {
                source: Some(REGISTRY_SOURCE.to_string()),
                registry_base_url: self.ctx.registry_base_url.clone(),
                server_name: Some(self.server_name.to_string()),
                server_version: Some(self.version.to_string()),
                published_at: self.hints.published_at.clone(),
                updated_at: self.hints.updated_at.clone(),
                upstream_status: self.hints.status.clone(),
                identity_key: Some(short_hash(variant_key)),
                variant_key: Some(variant_key.to_string()),
                ..Provenance::default()
            },
            lifecycle: Default::default(),
            harvest: None,
            extra,
        }
    }

    fn links(&self) -> BTreeMap<String, Value> {
        let mut links = BTreeMap::new();
        if let Some(url) = self.server.repository_url() {
            for key in ["repository", "homepage", "documentation"] {
                links.insert(key.to_string(), Value::String(url.to_string()));
            }
        }
        links
    }
}

/// Build the launch command for a registry package.
///
/// Pinned `hint args.. ident==version` when everything is known, unpinned when
/// the version is missing, and a placeholder command when either the
/// `runtimeHint` or the identifier is absent. No runner is guessed from the
/// registry type.
pub fn stdio_exec(pkg: &Package) -> ExecSpec {
    let hint = pkg
        .runtime_hint
        .as_deref()
        .map(str::trim)
        .filter(|hint| !hint.is_empty());
    let identifier = pkg.identifier.as_deref().filter(|id| !id.trim().is_empty());
    let version = pkg.version.as_deref().filter(|v| !v.trim().is_empty());

    let cmd = match (hint, identifier) {
        (Some(hint), Some(identifier)) => {
            let mut cmd = vec![hint.to_string()];
            cmd.extend(pkg.argument_strings());
            cmd.push(match version {
                Some(version) => format!("{identifier}=={version}"),
                None => identifier.to_string(),
            });
            cmd
        }
        _ => MISSING_EXEC_PLACEHOLDER.iter().map(|s| s.to_string()).collect(),
    };
    ExecSpec {
        cmd,
        env: BTreeMap::new(),
    }
}

fn check_schema(origin: &str, manifest: &Manifest) -> Result<(), SkippableError> {
    let violation = |details: String| SkippableError::SchemaViolation {
        origin: origin.to_string(),
        details,
    };
    let schema = manifest_schema().map_err(|err| violation(format!("{err:#}")))?;
    let value = serde_json::to_value(manifest).map_err(|err| violation(err.to_string()))?;
    schema.validate(&value).map_err(|errors| violation(errors.join("; ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::identity::derive;

    fn ctx() -> SourceContext {
        SourceContext {
            label: "test".to_string(),
            registry_base_url: Some("https://registry.example".to_string()),
        }
    }

    fn classify(value: Value) -> RawRecord {
        RawRecord::classify("row", value).unwrap()
    }

    fn weather() -> Value {
        json!({
            "server": {
                "name": "io.github.acme/weather",
                "description": "Forecasts",
                "version": "1.2.0",
                "repository": {"url": "https://github.com/acme/weather", "source": "github"},
                "packages": [{
                    "registryType": "pypi",
                    "identifier": "weather-mcp",
                    "version": "1.2.0",
                    "runtimeHint": "uvx"
                }],
                "remotes": [{"type": "sse", "url": "https://x/sse"}],
                "inputs": {"variables": {"API_KEY": {"isSecret": true}}},
                "license": "MIT"
            },
            "_meta": {"io.modelcontextprotocol.registry/official": {"status": "active", "publishedAt": "2025-01-01T00:00:00Z"}}
        })
    }

    #[test]
    fn classify_sorts_by_shape() {
        assert!(matches!(classify(weather()), RawRecord::RegistrySourced(_)));
        assert!(matches!(
            classify(json!({"provenance": {"repo_url": "acme/widget"}})),
            RawRecord::RepoSourced(_)
        ));
        let err = RawRecord::classify("row", json!({"hello": 1})).unwrap_err();
        assert!(matches!(err, SkippableError::UnrecognizedRecord { .. }));
        let err = RawRecord::classify("row", json!([1, 2])).unwrap_err();
        assert!(matches!(err, SkippableError::UnrecognizedRecord { .. }));
    }

    #[test]
    fn registry_server_expands_per_package_and_remote() {
        let manifests = normalize(&classify(weather()), &ctx()).unwrap();
        assert_eq!(manifests.len(), 2);

        let stdio = &manifests[0];
        assert!(stdio.id.as_str().starts_with("mcp.io-github-acme-weather.stdio."));
        assert_eq!(stdio.transport(), Transport::Stdio);
        assert_eq!(
            stdio.mcp_registration.server.exec.as_ref().unwrap().cmd,
            vec!["uvx", "weather-mcp==1.2.0"]
        );
        assert_eq!(stdio.extra["packages"][0]["identifier"], "weather-mcp");
        assert_eq!(stdio.extra["inputs"]["variables"]["API_KEY"]["isSecret"], true);
        assert_eq!(stdio.links["homepage"], "https://github.com/acme/weather");
        assert_eq!(stdio.provenance.upstream_status.as_deref(), Some("active"));

        let sse = &manifests[1];
        assert!(sse.id.as_str().starts_with("mcp.io-github-acme-weather.sse."));
        assert_eq!(sse.mcp_registration.server.url.as_deref(), Some("https://x/sse"));
        assert_eq!(sse.name, stdio.name);
        assert_eq!(sse.version, stdio.version);
        assert_ne!(derive(sse), derive(stdio));
        assert!(sse.lifecycle.status.is_none());
    }

    #[test]
    fn deleted_and_versionless_servers_are_skipped() {
        let mut deleted = weather();
        deleted["_meta"]["io.modelcontextprotocol.registry/official"]["status"] = json!("deleted");
        assert!(matches!(
            normalize(&classify(deleted), &ctx()).unwrap_err(),
            SkippableError::Deleted { .. }
        ));

        let mut versionless = weather();
        versionless["server"]
            .as_object_mut()
            .unwrap()
            .remove("version");
        let err = normalize(&classify(versionless), &ctx()).unwrap_err();
        assert!(matches!(err, SkippableError::MissingField { ref field, .. } if field == "version"));

        let empty = json!({"server": {"name": "x/y", "version": "1"}});
        assert!(matches!(
            normalize(&classify(empty), &ctx()).unwrap_err(),
            SkippableError::MissingField { .. }
        ));
    }

    #[test]
    fn exec_degrades_without_version_or_identifier() {
        let unpinned: Package = serde_json::from_value(json!({
            "registryType": "npm",
            "identifier": "@acme/tool",
            "runtimeHint": "npx",
            "runtimeArguments": ["-y"]
        }))
        .unwrap();
        assert_eq!(stdio_exec(&unpinned).cmd, vec!["npx", "-y", "@acme/tool"]);

        let bare: Package = serde_json::from_value(json!({"registryType": "oci"})).unwrap();
        assert_eq!(stdio_exec(&bare).cmd, MISSING_EXEC_PLACEHOLDER.to_vec());
    }

    #[test]
    fn missing_runtime_hint_yields_placeholder() {
        let npm: Package = serde_json::from_value(json!({
            "registryType": "npm",
            "identifier": "@acme/tool",
            "version": "1.2.0"
        }))
        .unwrap();
        assert_eq!(stdio_exec(&npm).cmd, MISSING_EXEC_PLACEHOLDER.to_vec());

        let pypi: Package = serde_json::from_value(json!({
            "registryType": "pypi",
            "identifier": "weather-mcp",
            "runtimeHint": "  "
        }))
        .unwrap();
        assert_eq!(stdio_exec(&pypi).cmd, MISSING_EXEC_PLACEHOLDER.to_vec());
    }

    #[test]
    fn unknown_remote_transport_falls_back_to_sse() {
        let mut value = weather();
        value["server"]["packages"] = json!([]);
        value["server"]["remotes"] = json!([
            {"type": "streamable-http", "url": "https://x/mcp"},
            {"transport": "websocket", "url": "wss://x/ws"}
        ]);
        let manifests = normalize(&classify(value), &ctx()).unwrap();
        assert_eq!(manifests[0].transport(), Transport::Sse);
        assert_eq!(manifests[1].transport(), Transport::Ws);
    }

    #[test]
    fn repo_records_get_defaults() {
        let record = classify(json!({
            "type": "mcp_server",
            "id": "widget",
            "provenance": {"repo_url": "https://github.com/acme/widget.git", "subpath": "src/server"}
        }));
        let manifest = normalize(&record, &ctx()).unwrap().remove(0);
        assert_eq!(manifest.name, "widget");
        assert_eq!(manifest.version, DEFAULT_VERSION);
        assert_eq!(manifest.transport(), Transport::Unknown);
    }

    #[test]
    fn repo_records_reject_foreign_types_and_missing_names() {
        let err = normalize(&classify(json!({"type": "tool", "id": "x"})), &ctx()).unwrap_err();
        assert!(matches!(err, SkippableError::WrongType { ref found, .. } if found == "tool"));

        let err = normalize(&classify(json!({"type": "mcp_server", "id": "x"})), &ctx()).unwrap_err();
        assert!(matches!(err, SkippableError::MissingField { ref field, .. } if field == "name"));
    }

    #[test]
    fn schema_violations_are_skippable() {
        let record = classify(json!({
            "type": "mcp_server",
            "id": "x",
            "name": "x",
            "mcp_registration": {"server": {"transport": "STDIO", "exec": {"cmd": []}}}
        }));
        let err = normalize(&record, &ctx()).unwrap_err();
        assert!(matches!(err, SkippableError::SchemaViolation { .. }));
    }
}
