//! Command implementations.
//!
//! Every command returns its process exit code; `Err` is reserved for
//! failures that kept the engine from running at all.

pub mod bulk;
pub mod probe;
pub mod status;
pub mod tag;
pub mod update;
pub mod validate;

use crate::config::Settings;
use crate::index::JsonIndex;
use crate::interrupt;
use crate::paths;
use crate::store::{FsConfigStore, config_name};
use crate::supervisor::Systemctl;
use crate::{Context, ui};
use anyhow::{Result, bail};
use colored::Colorize;
use fleetkit::{BatchReport, CancelToken, Executor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything a command needs, built once from settings
pub struct Fleet {
    pub settings: Settings,
    pub state_dir: PathBuf,
    pub index: Arc<JsonIndex>,
    pub store: FsConfigStore,
    pub supervisor: Systemctl,
    pub cancel: CancelToken,
}

impl Fleet {
    /// Load settings and state from their default locations, wired to Ctrl-C
    pub fn load() -> Result<Self> {
        let settings = Settings::load()?;
        let state_dir = paths::state_dir()?;
        Self::open(settings, state_dir, interrupt::token())
    }

    pub fn open(settings: Settings, state_dir: PathBuf, cancel: CancelToken) -> Result<Self> {
        let index = Arc::new(JsonIndex::open(&paths::index_file(&state_dir))?);
        let store = FsConfigStore::new(settings.config_dir(), Arc::clone(&index));
        let supervisor = Systemctl::new(&settings.supervisor, settings.service_prefix.clone());

        log::debug!(
            "Config dir {}, state dir {}",
            store.dir().display(),
            state_dir.display()
        );

        Ok(Self {
            settings,
            state_dir,
            index,
            store,
            supervisor,
            cancel,
        })
    }

    /// Executor bounded at `max_parallel`, cancelled by Ctrl-C
    pub fn executor(&self, max_parallel: usize) -> Executor {
        Executor::new(max_parallel)
            .with_poll_interval(self.settings.poll_interval())
            .with_cancel(self.cancel.clone())
    }

    /// Path of the config called `name` (file stem)
    pub fn find_config(&self, name: &str) -> Result<PathBuf> {
        let found = self.store.list()?.into_iter().find(|p| config_name(p) == name);
        match found {
            Some(path) => Ok(path),
            None => bail!("No config named '{name}' in {}", self.store.dir().display()),
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        paths::cache_dir(&self.state_dir)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.settings.backup_dir(&self.state_dir)
    }
}

/// Two summary lines, then one line per failure
pub fn print_batch_summary(ctx: &Context, report: &BatchReport, ok_label: &str, fail_label: &str) {
    if ctx.quiet && report.is_success() {
        return;
    }

    println!();
    println!(
        "{}: {} | {}: {}",
        ok_label,
        report.succeeded.to_string().green(),
        fail_label,
        if report.failed > 0 {
            report.failed.to_string().red()
        } else {
            report.failed.to_string().normal()
        }
    );
    ui::dim(&format!(
        "{} unit(s) in {}",
        report.total,
        ui::format_elapsed(report.elapsed)
    ));

    if report.cancelled {
        ui::warn("Interrupted - units that had not started are counted as failed");
    }

    if !report.failures.is_empty() && !ctx.quiet {
        println!();
        ui::error("Failures:");
        for (target, detail) in &report.failures {
            ui::failure(target, detail);
        }
    }
}

/// Batch exit code: 128 + signal when interrupted, else the clamped failure count
pub fn batch_exit_code(report: &BatchReport) -> i32 {
    if report.cancelled {
        interrupt::exit_code()
    } else {
        report.exit_code()
    }
}

/// Display a path relative to the config directory when possible
pub fn short_path<'a>(path: &'a Path, dir: &Path) -> std::borrow::Cow<'a, str> {
    path.strip_prefix(dir).unwrap_or(path).to_string_lossy()
}
