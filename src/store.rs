//! Catalog storage behind a small trait.
//!
//! Paths are catalog-relative strings using `/` separators, the same form that
//! ends up in index documents. [`FsStore`] maps them under a root directory;
//! [`MemStore`] keeps everything in a map for tests.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

pub trait CatalogStore {
    fn read(&self, path: &str) -> io::Result<Vec<u8>>;

    /// Overwrite `path`, creating parent directories as needed.
    fn write(&self, path: &str, bytes: &[u8]) -> io::Result<()>;

    /// Like [`CatalogStore::write`] but readers never observe a partial file.
    fn write_atomic(&self, path: &str, bytes: &[u8]) -> io::Result<()> {
        self.write(path, bytes)
    }

    fn exists(&self, path: &str) -> bool;

    /// Every file named `file_name` below `dir`, as sorted catalog-relative paths.
    fn find_files(&self, dir: &str, file_name: &str) -> io::Result<Vec<String>>;
}

/// Pretty-printed, key-sorted JSON with a trailing newline.
///
/// Routing through `serde_json::Value` sorts object keys, so equal documents
/// always encode to equal bytes.
pub fn encode_json<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    let mut bytes = serde_json::to_vec_pretty(&value)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Filesystem store rooted at the catalog root.
#[derive(Clone, Debug)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a catalog-relative path, refusing anything that escapes the root.
    pub fn resolve(&self, rel: &str) -> io::Result<PathBuf> {
        let rel_path = Path::new(rel);
        let mut resolved = self.root.clone();
        for component in rel_path.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(io::Error::new(
                        ErrorKind::InvalidInput,
                        format!("catalog path escapes root: {rel}"),
                    ));
                }
            }
        }
        Ok(resolved)
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = rel
            .components()
            .map(|component| component.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }
}

impl CatalogStore for FsStore {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        fs::read(self.resolve(path)?)
    }

    fn write(&self, path: &str, bytes: &[u8]) -> io::Result<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(target, bytes)
    }

    fn write_atomic(&self, path: &str, bytes: &[u8]) -> io::Result<()> {
        let target = self.resolve(path)?;
        let parent = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&parent)?;
        let mut tmp = NamedTempFile::new_in(&parent)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target).map_err(|err| err.error)?;
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.is_file()).unwrap_or(false)
    }

    fn find_files(&self, dir: &str, file_name: &str) -> io::Result<Vec<String>> {
        let base = self.resolve(dir)?;
        if !base.is_dir() {
            return Ok(Vec::new());
        }
        let mut found = Vec::new();
        for entry in WalkDir::new(&base).follow_links(false) {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() || entry.file_name() != file_name {
                continue;
            }
            if let Some(rel) = self.relative(entry.path()) {
                found.push(rel);
            }
        }
        found.sort();
        Ok(found)
    }
}

/// In-memory store.
#[derive(Clone, Debug, Default)]
pub struct MemStore {
    files: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorted list of every stored path.
    pub fn paths(&self) -> Vec<String> {
        self.files
            .read()
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn poisoned() -> io::Error {
        io::Error::other("memory store lock poisoned")
    }
}

impl CatalogStore for MemStore {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        let files = self.files.read().map_err(|_| Self::poisoned())?;
        files.get(path).cloned().ok_or_else(|| {
            io::Error::new(ErrorKind::NotFound, format!("memory://{path} not found"))
        })
    }

    fn write(&self, path: &str, bytes: &[u8]) -> io::Result<()> {
        let mut files = self.files.write().map_err(|_| Self::poisoned())?;
        files.insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.files
            .read()
            .map(|files| files.contains_key(path))
            .unwrap_or(false)
    }

    fn find_files(&self, dir: &str, file_name: &str) -> io::Result<Vec<String>> {
        let files = self.files.read().map_err(|_| Self::poisoned())?;
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        Ok(files
            .keys()
            .filter(|path| dir.is_empty() || dir == "." || path.starts_with(&prefix))
            .filter(|path| path.rsplit('/').next() == Some(file_name))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn encode_json_sorts_keys_and_ends_with_newline() {
        let bytes = encode_json(&json!({"b": 1, "a": {"d": 2, "c": 3}})).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.ends_with("}\n"));
        assert!(text.find("\"a\"").unwrap() < text.find("\"b\"").unwrap());
        assert!(text.find("\"c\"").unwrap() < text.find("\"d\"").unwrap());
    }

    #[test]
    fn fs_store_round_trips_and_lists() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = FsStore::new(dir.path());
        store.write("servers/g/v2/manifest.json", b"{}")?;
        store.write("servers/g/v1/manifest.json", b"{}")?;
        store.write("servers/g/v1/provenance.json", b"{}")?;
        store.write_atomic("index.json", b"{\"manifests\":[]}")?;

        assert!(store.exists("index.json"));
        assert_eq!(store.read("index.json")?, b"{\"manifests\":[]}".to_vec());
        assert_eq!(
            store.find_files("servers", "manifest.json")?,
            vec![
                "servers/g/v1/manifest.json".to_string(),
                "servers/g/v2/manifest.json".to_string()
            ]
        );
        assert!(store.find_files("missing", "manifest.json")?.is_empty());
        Ok(())
    }

    #[test]
    fn fs_store_refuses_escaping_paths() {
        let store = FsStore::new("/tmp/catalog-root");
        assert!(store.resolve("../outside.json").is_err());
        assert!(store.resolve("/etc/passwd").is_err());
        assert!(!store.exists("../outside.json"));
    }

    #[test]
    fn mem_store_lists_by_prefix() -> anyhow::Result<()> {
        let store = MemStore::new();
        store.write("servers/a/x/manifest.json", b"1")?;
        store.write("servers-old/a/x/manifest.json", b"2")?;
        store.write("servers/a/x/index.json", b"3")?;
        assert_eq!(
            store.find_files("servers", "manifest.json")?,
            vec!["servers/a/x/manifest.json".to_string()]
        );
        assert!(store.read("nope").is_err());
        Ok(())
    }
}
