//! Metadata index over FRP configs, persisted as JSON in the state directory.
//!
//! Each entry records what a config describes (server or client, the server
//! endpoint a client dials, proxy names) plus user tags. Entries are rebuilt
//! from the file on `reindex`; tags survive reindexing.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fleetkit::{ConfigKind, Endpoint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// frpc connects to 7000 when `serverPort` is omitted
pub const DEFAULT_SERVER_PORT: u16 = 7000;

const INDEX_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub kind: Option<ConfigKind>,
    #[serde(default)]
    pub server_addr: Option<String>,
    #[serde(default)]
    pub server_port: Option<u16>,
    #[serde(default)]
    pub bind_port: Option<u16>,
    #[serde(default)]
    pub proxies: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub indexed_at: DateTime<Utc>,
}

impl IndexEntry {
    /// Extract metadata from a config body. Unparseable bodies still get a
    /// kind from the file name so they stay selectable.
    pub fn analyze(path: &Path, body: &str) -> Self {
        let doc: Option<toml::Table> = body.parse().ok();
        let kind = detect_kind(doc.as_ref(), path);

        let get_port = |key: &str| {
            doc.as_ref()
                .and_then(|d| d.get(key))
                .and_then(toml::Value::as_integer)
                .and_then(|p| u16::try_from(p).ok())
        };

        let server_addr = doc
            .as_ref()
            .and_then(|d| d.get("serverAddr"))
            .and_then(toml::Value::as_str)
            .map(str::to_string);

        let server_port = match kind {
            Some(ConfigKind::Client) if server_addr.is_some() => get_port("serverPort").or(Some(DEFAULT_SERVER_PORT)),
            _ => None,
        };

        let proxies = doc
            .as_ref()
            .and_then(|d| d.get("proxies"))
            .and_then(toml::Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|p| p.get("name").and_then(toml::Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            kind,
            server_addr,
            server_port,
            bind_port: get_port("bindPort"),
            proxies,
            tags: Vec::new(),
            indexed_at: Utc::now(),
        }
    }

    /// The server endpoint a client config dials
    pub fn endpoint(&self) -> Option<Endpoint> {
        match (self.kind, &self.server_addr, self.server_port) {
            (Some(ConfigKind::Client), Some(host), Some(port)) if !host.is_empty() => Some(Endpoint {
                host: host.clone(),
                port,
            }),
            _ => None,
        }
    }
}

/// Server if it binds a port, client if it names a server, otherwise by file name
pub fn detect_kind(doc: Option<&toml::Table>, path: &Path) -> Option<ConfigKind> {
    if let Some(doc) = doc {
        if doc.contains_key("bindPort") {
            return Some(ConfigKind::Server);
        }
        if doc.contains_key("serverAddr") {
            return Some(ConfigKind::Client);
        }
    }

    let stem = path.file_stem()?.to_string_lossy().to_ascii_lowercase();
    if stem.starts_with("frps") {
        Some(ConfigKind::Server)
    } else if stem.starts_with("frpc") {
        Some(ConfigKind::Client)
    } else {
        None
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, IndexEntry>,
}

/// JSON-backed index; every mutation is written through atomically.
pub struct JsonIndex {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, IndexEntry>>,
}

impl JsonIndex {
    /// Open the index at `path`. A missing file is an empty index; a corrupt
    /// one is discarded with a warning since it can be rebuilt from configs.
    pub fn open(path: &Path) -> Result<Self> {
        let entries = match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<IndexFile>(&content) {
                Ok(file) => file.entries,
                Err(e) => {
                    log::warn!("Ignoring corrupt index {}: {e}", path.display());
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e).with_context(|| format!("Could not read {}", path.display())),
        };

        log::debug!("Index {} has {} entries", path.display(), entries.len());
        Ok(Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, IndexEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn key(path: &Path) -> String {
        path.to_string_lossy().to_string()
    }

    pub fn entry(&self, path: &Path) -> Option<IndexEntry> {
        self.lock().get(&Self::key(path)).cloned()
    }

    pub fn tags(&self, path: &Path) -> Vec<String> {
        self.lock().get(&Self::key(path)).map(|e| e.tags.clone()).unwrap_or_default()
    }

    /// Replace the tags of an indexed config, indexing it first if needed
    pub fn set_tags(&self, path: &Path, tags: Vec<String>) -> Result<()> {
        if self.entry(path).is_none() {
            self.refresh(path)?;
        }
        let mut entries = self.lock();
        if let Some(entry) = entries.get_mut(&Self::key(path)) {
            entry.tags = tags;
        }
        self.save(&entries)
    }

    /// Index every config in `paths` that has no entry yet or was modified
    /// after it was indexed. Returns how many were (re)indexed.
    pub fn ensure(&self, paths: &[PathBuf]) -> Result<usize> {
        let outdated: Vec<&PathBuf> = paths.iter().filter(|p| self.is_outdated(p)).collect();
        for path in &outdated {
            self.refresh(path)?;
        }
        Ok(outdated.len())
    }

    fn is_outdated(&self, path: &Path) -> bool {
        let Some(entry) = self.entry(path) else {
            return true;
        };
        fs::metadata(path)
            .and_then(|m| m.modified())
            .is_ok_and(|modified| DateTime::<Utc>::from(modified) > entry.indexed_at)
    }

    /// Drop entries whose file no longer exists
    pub fn prune(&self) -> Result<usize> {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, _| Path::new(key).exists());
        let removed = before - entries.len();
        if removed > 0 {
            self.save(&entries)?;
        }
        Ok(removed)
    }

    fn refresh(&self, path: &Path) -> Result<()> {
        let body = fs::read_to_string(path).with_context(|| format!("Could not read {}", path.display()))?;
        let mut fresh = IndexEntry::analyze(path, &body);

        let mut entries = self.lock();
        let key = Self::key(path);
        if let Some(previous) = entries.get(&key) {
            fresh.tags = previous.tags.clone();
        }
        entries.insert(key, fresh);
        self.save(&entries)
    }

    fn save(&self, entries: &BTreeMap<String, IndexEntry>) -> Result<()> {
        let file = IndexFile {
            version: INDEX_VERSION,
            entries: entries.clone(),
        };
        let content = serde_json::to_vec_pretty(&file)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("Could not create {}", parent.display()))?;
        }
        fleetkit::atomic::write_atomic(&self.path, &content)
            .with_context(|| format!("Could not write {}", self.path.display()))
    }
}

impl fleetkit::Index for JsonIndex {
    fn resolve_endpoint(&self, config: &Path) -> fleetkit::Result<Option<fleetkit::Endpoint>> {
        if self.entry(config).is_none() {
            fleetkit::Index::reindex(self, config)?;
        }
        Ok(self.entry(config).and_then(|e| e.endpoint()))
    }

    fn reindex(&self, path: &Path) -> fleetkit::Result<()> {
        self.refresh(path)
            .map_err(|e| fleetkit::Error::collaborator("index", format!("{e:#}")))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use fleetkit::Index;
    use tempfile::TempDir;

    const CLIENT: &str = r#"
serverAddr = "203.0.113.7"
serverPort = 7100

[[proxies]]
name = "ssh"
type = "tcp"
localPort = 22
remotePort = 6022

[[proxies]]
name = "web"
type = "http"
localPort = 8080
"#;

    #[test]
    fn test_analyze_client() {
        let entry = IndexEntry::analyze(Path::new("/etc/frp/edge.toml"), CLIENT);
        assert_eq!(entry.kind, Some(ConfigKind::Client));
        assert_eq!(entry.proxies, vec!["ssh", "web"]);
        assert_eq!(
            entry.endpoint(),
            Some(Endpoint {
                host: "203.0.113.7".into(),
                port: 7100
            })
        );
    }

    #[test]
    fn test_analyze_client_default_port() {
        let entry = IndexEntry::analyze(Path::new("c.toml"), "serverAddr = \"relay.example.net\"\n");
        assert_eq!(entry.server_port, Some(DEFAULT_SERVER_PORT));
    }

    #[test]
    fn test_analyze_server() {
        let entry = IndexEntry::analyze(Path::new("/etc/frp/hub.toml"), "bindPort = 7000\n");
        assert_eq!(entry.kind, Some(ConfigKind::Server));
        assert_eq!(entry.bind_port, Some(7000));
        assert_eq!(entry.endpoint(), None);
    }

    #[test]
    fn test_kind_from_file_name_when_unparseable() {
        let entry = IndexEntry::analyze(Path::new("/etc/frp/frpc-eu.toml"), "serverAddr = ");
        assert_eq!(entry.kind, Some(ConfigKind::Client));
        let entry = IndexEntry::analyze(Path::new("/etc/frp/misc.toml"), "[[[");
        assert_eq!(entry.kind, None);
    }

    #[test]
    fn test_reindex_preserves_tags_and_persists() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("frpc-a.toml");
        fs::write(&config, CLIENT).unwrap();
        let index_path = dir.path().join("state").join("index.json");

        let index = JsonIndex::open(&index_path).unwrap();
        index.set_tags(&config, vec!["prod".into(), "eu".into()]).unwrap();

        fs::write(&config, "serverAddr = \"198.51.100.1\"\n").unwrap();
        index.reindex(&config).unwrap();

        let reopened = JsonIndex::open(&index_path).unwrap();
        let entry = reopened.entry(&config).unwrap();
        assert_eq!(entry.tags, vec!["prod", "eu"]);
        assert_eq!(entry.server_addr.as_deref(), Some("198.51.100.1"));
    }

    #[test]
    fn test_resolve_endpoint_indexes_on_demand() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("frpc-b.toml");
        fs::write(&config, CLIENT).unwrap();

        let index = JsonIndex::open(&dir.path().join("index.json")).unwrap();
        let endpoint = index.resolve_endpoint(&config).unwrap().unwrap();
        assert_eq!(endpoint.to_string(), "203.0.113.7:7100");
    }

    #[test]
    fn test_reindex_missing_file_is_collaborator_error() {
        let dir = TempDir::new().unwrap();
        let index = JsonIndex::open(&dir.path().join("index.json")).unwrap();
        let err = index.reindex(&dir.path().join("gone.toml")).unwrap_err();
        assert!(err.to_string().starts_with("index failed"));
    }

    #[test]
    fn test_corrupt_index_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.json");
        fs::write(&path, "{ nope").unwrap();
        let index = JsonIndex::open(&path).unwrap();
        assert!(index.entry(&dir.path().join("x.toml")).is_none());
    }

    #[test]
    fn test_ensure_and_prune() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("frpc-a.toml");
        let b = dir.path().join("frps-b.toml");
        fs::write(&a, CLIENT).unwrap();
        fs::write(&b, "bindPort = 7000\n").unwrap();

        let index = JsonIndex::open(&dir.path().join("index.json")).unwrap();
        assert_eq!(index.ensure(&[a.clone(), b.clone()]).unwrap(), 2);
        assert_eq!(index.ensure(&[a.clone(), b.clone()]).unwrap(), 0);

        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(&a, "serverAddr = \"198.51.100.1\"\n").unwrap();
        assert_eq!(index.ensure(&[a.clone(), b.clone()]).unwrap(), 1);
        assert_eq!(index.entry(&a).unwrap().server_addr.as_deref(), Some("198.51.100.1"));

        fs::remove_file(&b).unwrap();
        assert_eq!(index.prune().unwrap(), 1);
        assert!(index.entry(&a).is_some());
    }
}
