#![allow(dead_code)]

use anyhow::{Context, Result, bail};
use catalog_sync::{
    CatalogIndex, CatalogStore, FatalError, RawRecord, RecordBatch, RunContext, RunSummary,
    SourceDescriptor, reconcile,
};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

pub const WIDGET_PATH: &str = "servers/acme-widget/widget__src__server/manifest.json";

pub fn run_at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap()
}

pub fn context(hour: u32) -> RunContext {
    let source = SourceDescriptor {
        kind: "records".to_string(),
        location: "fixtures.ndjson".to_string(),
        ..SourceDescriptor::default()
    };
    RunContext::new("servers", "index.json", source, "fixtures.ndjson")
        .with_registry_base_url(Some("https://registry.example".to_string()))
        .with_now(run_at(hour))
}

pub fn repo_manifest(id: &str, repo: &str, subpath: &str, transport: &str) -> Value {
    json!({
        "type": "mcp_server",
        "id": id,
        "name": id,
        "version": "0.1.0",
        "description": format!("{id} server"),
        "mcp_registration": {
            "tool": {"id": format!("{id}-tool")},
            "server": {"transport": transport, "url": "http://127.0.0.1:6288/sse"}
        },
        "provenance": {"repo_url": format!("https://github.com/{repo}"), "subpath": subpath}
    })
}

pub fn widget() -> Value {
    repo_manifest("widget", "acme/widget", "src/server", "SSE")
}

pub fn gizmo() -> Value {
    repo_manifest("gizmo", "acme/gizmo", "", "STDIO")
}

pub fn weather_server(status: &str) -> Value {
    json!({
        "server": {
            "name": "io.github.acme/weather",
            "description": "Weather forecasts",
            "version": "1.2.0",
            "repository": {"url": "https://github.com/acme/weather", "source": "github"},
            "packages": [{
                "registryType": "pypi",
                "identifier": "weather-mcp",
                "version": "1.2.0",
                "runtimeHint": "uvx"
            }],
            "remotes": [{"type": "sse", "url": "https://x/sse"}]
        },
        "_meta": {
            "io.modelcontextprotocol.registry/official": {
                "status": status,
                "publishedAt": "2025-01-01T00:00:00Z"
            }
        }
    })
}

pub fn batch(values: &[Value]) -> RecordBatch {
    let records = values
        .iter()
        .enumerate()
        .map(|(idx, value)| RawRecord::classify(format!("row#{}", idx + 1), value.clone()).unwrap())
        .collect();
    RecordBatch {
        records,
        errors: Vec::new(),
    }
}

pub fn sync(store: &dyn CatalogStore, values: &[Value], hour: u32) -> Result<RunSummary, FatalError> {
    reconcile(store, batch(values), &context(hour))
}

pub fn read_json(store: &dyn CatalogStore, path: &str) -> Result<Value> {
    let bytes = store.read(path).with_context(|| format!("reading {path}"))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing {path}"))
}

pub fn read_index(store: &dyn CatalogStore) -> Result<CatalogIndex> {
    let bytes = store.read("index.json").context("reading index.json")?;
    serde_json::from_slice(&bytes).context("parsing index.json")
}

/// Write manifests into a harvester-style output directory.
pub fn write_harvest_dir(dir: &Path, manifests: &[Value]) -> Result<PathBuf> {
    let mut paths = Vec::new();
    for (idx, manifest) in manifests.iter().enumerate() {
        let rel = format!("harvest/{idx}/manifest.json");
        let path = dir.join(&rel);
        fs::create_dir_all(path.parent().context("manifest parent")?)?;
        fs::write(&path, serde_json::to_vec_pretty(manifest)?)?;
        paths.push(format!("{idx}/manifest.json"));
    }
    let root = dir.join("harvest");
    fs::create_dir_all(&root)?;
    fs::write(
        root.join("index.json"),
        serde_json::to_vec_pretty(&json!({ "manifests": paths }))?,
    )?;
    Ok(root)
}

pub fn sync_binary() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_catalog-sync"));
    for var in [
        "CATALOG_SOURCE",
        "CATALOG_SOURCE_KIND",
        "CATALOG_ROOT",
        "CATALOG_SERVERS_DIR",
        "CATALOG_INDEX_FILE",
        "CATALOG_REGISTRY_URL",
    ] {
        cmd.env_remove(var);
    }
    cmd.env("RUST_LOG", "warn");
    cmd
}

pub fn validate_binary() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_catalog-validate"));
    cmd.env_remove("CATALOG_ROOT").env_remove("CATALOG_INDEX_FILE");
    cmd
}

pub fn run_command(mut cmd: Command) -> Result<Output> {
    let output = cmd
        .output()
        .with_context(|| format!("failed to run command: {:?}", cmd))?;
    if output.status.success() {
        Ok(output)
    } else {
        bail!(
            "command {:?} failed: status {:?}\nstdout: {}\nstderr: {}",
            cmd,
            output.status.code(),
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )
    }
}
