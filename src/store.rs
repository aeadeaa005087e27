//! Config store over a directory of FRP `*.toml` files

use crate::index::{JsonIndex, detect_kind};
use fleetkit::{ConfigKind, Error, Filter};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct FsConfigStore {
    dir: PathBuf,
    index: Arc<JsonIndex>,
}

impl FsConfigStore {
    pub fn new(dir: PathBuf, index: Arc<JsonIndex>) -> Self {
        Self { dir, index }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Every config file, sorted by name. Hidden files are skipped.
    pub fn list(&self) -> fleetkit::Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| Error::io(&self.dir, e))?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
            .filter(|p| !config_name(p).starts_with('.'))
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Server or client, from content first, then file name
    pub fn kind_of(&self, path: &Path) -> Option<ConfigKind> {
        let doc = fs::read_to_string(path).ok().and_then(|body| body.parse::<toml::Table>().ok());
        detect_kind(doc.as_ref(), path)
    }
}

/// Config name as used in filters and service names: the file stem
pub fn config_name(path: &Path) -> String {
    path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default()
}

impl fleetkit::ConfigStore for FsConfigStore {
    fn resolve(&self, filter: &Filter) -> fleetkit::Result<Vec<PathBuf>> {
        let all = self.list()?;
        let selected: Vec<PathBuf> = match filter {
            Filter::All => all,
            Filter::Kind(kind) => all.into_iter().filter(|p| self.kind_of(p) == Some(*kind)).collect(),
            Filter::Tag(tag) => all.into_iter().filter(|p| self.index.tags(p).contains(tag)).collect(),
            Filter::Name(_) => all.into_iter().filter(|p| filter.matches_name(&config_name(p))).collect(),
            Filter::Status(_) => {
                return Err(Error::collaborator(
                    "config store",
                    "status filters select services, not config files",
                ));
            }
        };

        log::debug!("Filter '{filter}' selected {} config(s) in {}", selected.len(), self.dir.display());
        Ok(selected)
    }

    fn read(&self, path: &Path) -> fleetkit::Result<String> {
        fs::read_to_string(path).map_err(|e| Error::io(path, e))
    }

    fn write(&self, path: &Path, body: &str) -> fleetkit::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        fs::write(path, body).map_err(|e| Error::io(path, e))
    }
}
