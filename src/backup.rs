//! Timestamped backups with per-file retention

use chrono::{NaiveDateTime, Utc};
use fleetkit::Error;
use std::fs;
use std::path::{Path, PathBuf};

const STAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";

/// Copies configs to `<dir>/<file>.<UTC timestamp>.bak`, keeping the newest `keep` per file
pub struct DirBackup {
    dir: PathBuf,
    keep: usize,
}

impl DirBackup {
    pub fn new(dir: PathBuf, keep: usize) -> Self {
        Self { dir, keep: keep.max(1) }
    }

    /// Existing backups of `file_name`, oldest first
    pub fn backups_of(&self, file_name: &str) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };

        let prefix = format!("{file_name}.");
        let mut found: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.strip_prefix(&prefix))
                    .and_then(|rest| rest.strip_suffix(".bak"))
                    .is_some_and(|stamp| NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).is_ok())
            })
            .collect();
        // Fixed-width timestamps sort chronologically
        found.sort();
        found
    }

    fn rotate(&self, file_name: &str) {
        let backups = self.backups_of(file_name);
        let excess = backups.len().saturating_sub(self.keep);
        for old in backups.into_iter().take(excess) {
            match fs::remove_file(&old) {
                Ok(()) => log::debug!("Removed old backup {}", old.display()),
                Err(e) => log::warn!("Could not remove old backup {}: {e}", old.display()),
            }
        }
    }
}

impl fleetkit::Backup for DirBackup {
    fn backup(&self, path: &Path) -> fleetkit::Result<PathBuf> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| Error::collaborator("backup", format!("{} has no file name", path.display())))?;

        fs::create_dir_all(&self.dir).map_err(|e| Error::io(&self.dir, e))?;

        let stamp = Utc::now().format(STAMP_FORMAT);
        let target = self.dir.join(format!("{file_name}.{stamp}.bak"));
        fs::copy(path, &target).map_err(|e| Error::io(path, e))?;
        log::debug!("Backed up {} to {}", path.display(), target.display());

        self.rotate(&file_name);
        Ok(target)
    }
}
