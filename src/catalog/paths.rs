//! Deterministic placement of catalog entries.
//!
//! [`assign`] is a pure function of the identity key: the same key maps to the
//! same `<group>/<variant>` directory on every run regardless of scan order or
//! what already exists on disk.

use crate::catalog::identity::{IdentityKey, short_hash};
use std::fmt;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const PROVENANCE_FILE: &str = "provenance.json";
pub const INDEX_FILE: &str = "index.json";

const PLACEHOLDER_SLUG: &str = "unknown";
const VARIANT_JOINER: &str = "__";

/// Group and variant directory names for one entry.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct EntryPath {
    pub group: String,
    pub variant: String,
}

impl EntryPath {
    /// Entry directory relative to the catalog root.
    pub fn dir(&self, servers_dir: &str) -> String {
        join_rel(&[servers_dir, &self.group, &self.variant])
    }

    pub fn manifest(&self, servers_dir: &str) -> String {
        join_rel(&[&self.dir(servers_dir), MANIFEST_FILE])
    }

    pub fn provenance(&self, servers_dir: &str) -> String {
        join_rel(&[&self.dir(servers_dir), PROVENANCE_FILE])
    }

    pub fn index(&self, servers_dir: &str) -> String {
        join_rel(&[&self.dir(servers_dir), INDEX_FILE])
    }
}

impl fmt::Display for EntryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.variant)
    }
}

/// Compute the entry directory for `key`.
pub fn assign(key: &IdentityKey) -> EntryPath {
    match key {
        IdentityKey::Repo { repo, subpath, .. } => {
            let (owner, name) = split_owner(repo);
            let name_slug = safe_slug(name);
            EntryPath {
                group: format!("{}-{}", safe_slug(owner), name_slug),
                variant: subpath_to_variant(&name_slug, subpath),
            }
        }
        IdentityKey::Registry {
            server_name,
            transport,
            variant_key,
        } => {
            let (namespace, name) = match server_name.split_once('/') {
                Some((namespace, name)) => (namespace, name),
                None => (server_name.as_str(), server_name.as_str()),
            };
            let distinguisher = format!(
                "{}-{}",
                transport.as_str().to_ascii_lowercase(),
                short_hash(variant_key)
            );
            EntryPath {
                group: safe_slug(namespace),
                variant: format!(
                    "{}{VARIANT_JOINER}{}",
                    safe_slug(name),
                    segment_safe(&distinguisher)
                ),
            }
        }
    }
}

/// Lowercase, collapse non-alphanumerics to single hyphens, trim hyphens.
pub fn safe_slug(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_hyphen = false;
    for ch in value.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(ch);
        } else {
            pending_hyphen = true;
        }
    }
    if slug.is_empty() {
        PLACEHOLDER_SLUG.to_string()
    } else {
        slug
    }
}

/// `<name>__<subpath segments joined by __>`, or `<name>__.` for the repo root.
pub fn subpath_to_variant(name_slug: &str, subpath: &str) -> String {
    let segments: Vec<String> = subpath
        .replace('\\', "/")
        .split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(segment_safe)
        .collect();
    let tail = if segments.is_empty() {
        ".".to_string()
    } else {
        segments.join(VARIANT_JOINER)
    };
    format!("{name_slug}{VARIANT_JOINER}{tail}")
}

/// Catalog-relative directory with `.` segments and stray separators removed.
pub fn normalize_dir(dir: &str) -> String {
    let unified = dir.replace('\\', "/");
    let parts: Vec<&str> = unified.split('/').collect();
    join_rel(&parts)
}

/// Group directory of a catalog-relative path under `servers_dir`.
pub fn group_dir(servers_dir: &str, group: &str) -> String {
    join_rel(&[servers_dir, group])
}

/// Name of the group a catalog-relative file path belongs to, if any.
pub fn group_of<'a>(servers_dir: &str, path: &'a str) -> Option<&'a str> {
    let prefix = normalize_dir(servers_dir);
    let rest = if prefix.is_empty() {
        path
    } else {
        path.strip_prefix(prefix.as_str())?.strip_prefix('/')?
    };
    let (group, tail) = rest.split_once('/')?;
    (!group.is_empty() && !tail.is_empty()).then_some(group)
}

fn split_owner(repo: &str) -> (&str, &str) {
    match repo.split_once('/') {
        Some((owner, name)) if !name.is_empty() => (owner, name),
        Some((owner, _)) => (owner, PLACEHOLDER_SLUG),
        None => (repo, PLACEHOLDER_SLUG),
    }
}

fn segment_safe(segment: &str) -> String {
    segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

fn join_rel(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|part| part.trim_matches('/'))
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::identity::{Transport, package_variant_key};

    fn repo_key(repo: &str, subpath: &str, transport: Transport) -> IdentityKey {
        IdentityKey::Repo {
            repo: repo.to_string(),
            subpath: subpath.to_string(),
            transport,
        }
    }

    #[test]
    fn repo_entries_land_under_owner_repo_group() {
        let path = assign(&repo_key("acme/widget", "src/server", Transport::Sse));
        assert_eq!(path.group, "acme-widget");
        assert_eq!(path.variant, "widget__src__server");
        assert_eq!(
            path.manifest("servers"),
            "servers/acme-widget/widget__src__server/manifest.json"
        );
    }

    #[test]
    fn repo_root_uses_dot_variant() {
        let path = assign(&repo_key("Acme/My_Widget", "", Transport::Unknown));
        assert_eq!(path.group, "acme-my-widget");
        assert_eq!(path.variant, "my-widget__.");
    }

    #[test]
    fn assignment_ignores_call_order() {
        let keys = [
            repo_key("acme/widget", "a", Transport::Sse),
            repo_key("acme/widget", "b", Transport::Ws),
            repo_key("zeta/tool", "", Transport::Stdio),
        ];
        let forward: Vec<EntryPath> = keys.iter().map(assign).collect();
        let mut backward: Vec<EntryPath> = keys.iter().rev().map(assign).collect();
        backward.reverse();
        assert_eq!(forward, backward);
    }

    #[test]
    fn registry_entries_group_by_namespace() {
        let variant_key = package_variant_key(
            "io.github.acme/weather",
            Some("pypi"),
            Some("weather-mcp"),
            Some("1.2.0"),
        );
        let path = assign(&IdentityKey::Registry {
            server_name: "io.github.acme/weather".to_string(),
            transport: Transport::Stdio,
            variant_key: variant_key.clone(),
        });
        assert_eq!(path.group, "io-github-acme");
        assert_eq!(
            path.variant,
            format!("weather__stdio-{}", short_hash(&variant_key))
        );
    }

    #[test]
    fn slugs_collapse_and_fall_back() {
        assert_eq!(safe_slug("  Hello,, World!! "), "hello-world");
        assert_eq!(safe_slug("---"), "unknown");
        assert_eq!(safe_slug(""), "unknown");
    }

    #[test]
    fn variant_segments_are_filesystem_safe() {
        assert_eq!(subpath_to_variant("x", "a b/c:d"), "x__a-b__c-d");
        assert_eq!(subpath_to_variant("x", "\\win\\path\\"), "x__win__path");
    }

    #[test]
    fn group_lookup_strips_servers_dir() {
        assert_eq!(normalize_dir("./servers/"), "servers");
        assert_eq!(normalize_dir("."), "");
        assert_eq!(group_of("servers", "servers/acme/x/manifest.json"), Some("acme"));
        assert_eq!(group_of("", "acme/x/manifest.json"), Some("acme"));
        assert_eq!(group_of("servers", "other/acme/x/manifest.json"), None);
        assert_eq!(group_of("servers", "servers/manifest.json"), None);
        assert_eq!(group_dir("servers", "acme"), "servers/acme");
    }

    #[test]
    fn join_rel_skips_dot_roots() {
        assert_eq!(join_rel(&[".", "g", "v"]), "g/v");
        assert_eq!(join_rel(&["servers/", "g"]), "servers/g");
    }
}
