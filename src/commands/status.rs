//! Service status view, served from a stale-while-revalidate cache.
//!
//! The snapshot (liveness of every managed service plus what the index knows
//! about its config) is mirrored to `<state>/cache/services.json`, so a fresh
//! process renders immediately and refreshes in the background when the
//! snapshot is older than the TTL.

use super::Fleet;
use crate::Context;
use crate::config::Settings;
use crate::index::{IndexEntry, JsonIndex};
use crate::store::{FsConfigStore, config_name};
use crate::supervisor::Systemctl;
use crate::ui;
use anyhow::Result;
use colored::Colorize;
use fleetkit::{
    CancelToken, ConfigKind, Executor, Lookup, NoProgress, Operation, ServiceState, StaleCache, WorkUnit,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const STATUS_KEY: &str = "services";
const WATCH_STEP: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRow {
    pub service: String,
    pub config: String,
    pub kind: Option<ConfigKind>,
    pub state: ServiceState,
    pub endpoint: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub services: Vec<ServiceRow>,
}

impl StatusSnapshot {
    pub fn count(&self, state: ServiceState) -> usize {
        self.services.iter().filter(|s| s.state == state).count()
    }
}

pub fn run(ctx: &Context, fleet: &Fleet, refresh: bool, watch: Option<u64>) -> Result<i32> {
    let cache = status_cache(fleet);
    let mut force = refresh;

    loop {
        let lookup = if force {
            cache.force_refresh(STATUS_KEY)?
        } else {
            cache.get(STATUS_KEY)?
        };
        force = false;

        if watch.is_some() && !ctx.quiet {
            // Best effort; a non-terminal stdout just scrolls
            let _ = console::Term::stdout().clear_screen();
        }
        render(ctx, &lookup);

        let Some(secs) = watch else {
            break;
        };
        if !sleep_unless_cancelled(Duration::from_secs(secs.max(1)), &fleet.cancel) {
            break;
        }
    }

    // Let a background refresh land so the next invocation starts warm
    if !cache.settle(fleet.settings.settle_timeout()) {
        log::debug!("status refresh still running at exit");
    }
    Ok(0)
}

/// Cache whose payload is recomputed by querying the supervisor
pub fn status_cache(fleet: &Fleet) -> StaleCache<StatusSnapshot> {
    let store = FsConfigStore::new(fleet.store.dir().to_path_buf(), Arc::clone(&fleet.index));
    let index = Arc::clone(&fleet.index);
    let supervisor = fleet.supervisor.clone();
    let settings = fleet.settings.clone();
    let cancel = fleet.cancel.clone();

    StaleCache::new(fleet.settings.cache_ttl(), Some(fleet.cache_dir()), move |_key: &str| {
        snapshot(&store, &index, &supervisor, &settings, &cancel)
    })
}

fn snapshot(
    store: &FsConfigStore,
    index: &JsonIndex,
    supervisor: &Systemctl,
    settings: &Settings,
    cancel: &CancelToken,
) -> Result<StatusSnapshot> {
    supervisor.check_available()?;

    let configs = store.list()?;
    let removed = index.prune()?;
    if removed > 0 {
        log::debug!("Dropped {removed} index entries for deleted configs");
    }
    index.ensure(&configs)?;

    let units = WorkUnit::batch(
        configs.iter().map(|c| supervisor.service_name(c)),
        Operation::Status,
        settings.service_timeout(),
    );
    let report = Executor::new(settings.engine.service_parallel)
        .with_poll_interval(settings.poll_interval())
        .with_cancel(cancel.clone())
        .run_batch(&units, &supervisor.liveness_runner(), &mut NoProgress)?;
    if report.cancelled {
        return Err(fleetkit::Error::Cancelled.into());
    }

    let services = configs
        .iter()
        .zip(units.into_iter().zip(&report.results))
        .map(|(config, (unit, result))| {
            let entry = index.entry(config);
            ServiceRow {
                service: unit.target,
                config: config_name(config),
                kind: entry.as_ref().and_then(|e| e.kind),
                state: if result.is_success() {
                    ServiceState::Active
                } else {
                    ServiceState::Inactive
                },
                endpoint: entry.as_ref().and_then(IndexEntry::endpoint).map(|e| e.to_string()),
                tags: entry.map(|e| e.tags).unwrap_or_default(),
            }
        })
        .collect();

    Ok(StatusSnapshot { services })
}

fn render(ctx: &Context, lookup: &Lookup<StatusSnapshot>) {
    let snapshot = &lookup.payload;

    if !ctx.quiet {
        ui::header("Services");
        if snapshot.services.is_empty() {
            ui::dim("No managed services");
        }
        for row in &snapshot.services {
            let (symbol, state) = match row.state {
                ServiceState::Active => ("●".green(), "active".green()),
                ServiceState::Inactive => ("○".red(), "inactive".red()),
            };
            let kind = row.kind.map_or_else(|| "?".to_string(), |k| k.to_string());
            let mut line = format!("  {symbol} {:<28} {:<8} {:<8}", row.service, kind, state);
            if let Some(endpoint) = &row.endpoint {
                line.push_str(&format!(" → {endpoint}"));
            }
            if !row.tags.is_empty() {
                line.push_str(&format!(" {}", format!("[{}]", row.tags.join(", ")).dimmed()));
            }
            println!("{line}");
        }
        println!();
    }

    println!(
        "Active: {} | Inactive: {}",
        snapshot.count(ServiceState::Active).to_string().green(),
        snapshot.count(ServiceState::Inactive).to_string().red()
    );

    let mut age = format!("Updated {} ago", ui::format_age(lookup.generated_at));
    if lookup.stale {
        age.push_str(" (refreshing)");
    }
    ui::dim(&age);
}

/// Sleep for `total`, waking early on cancellation. Returns `false` if cancelled.
fn sleep_unless_cancelled(total: Duration, cancel: &CancelToken) -> bool {
    let deadline = Instant::now() + total;
    while Instant::now() < deadline {
        if cancel.is_cancelled() {
            return false;
        }
        thread::sleep(WATCH_STEP.min(deadline.saturating_duration_since(Instant::now())));
    }
    !cancel.is_cancelled()
}
