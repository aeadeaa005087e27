//! Connectivity test: TCP connect to every client's server endpoint

use super::{Fleet, batch_exit_code, print_batch_summary, short_path};
use crate::Context;
use crate::cli::TestArgs;
use crate::progress::BatchProgress;
use crate::ui;
use anyhow::Result;
use fleetkit::{ConfigKind, ConfigStore, Index, Operation, TcpProbe, WorkUnit};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

pub fn run(ctx: &Context, fleet: &Fleet, args: TestArgs) -> Result<i32> {
    let targets = endpoints(fleet, &args)?;
    if targets.is_empty() {
        ui::warn("No client endpoints to test");
        return Ok(0);
    }

    let timeout = args
        .timeout_ms
        .map_or_else(|| fleet.settings.probe_timeout(), Duration::from_millis);
    let max_parallel = args.max_parallel.unwrap_or(fleet.settings.engine.probe_parallel).max(1);

    if !ctx.quiet {
        ui::header(&format!("Testing {} endpoint(s)", targets.len()));
    }
    log::info!("Probing {} endpoint(s), {max_parallel} at a time, {timeout:?} each", targets.len());

    let units = WorkUnit::batch(targets, Operation::Probe, timeout);
    let mut progress = if ctx.quiet {
        BatchProgress::new(true)
    } else {
        BatchProgress::new(false).with_live_lines()
    };
    let report = fleet.executor(max_parallel).run_batch(&units, &TcpProbe, &mut progress)?;

    print_batch_summary(ctx, &report, "Reachable", "Unreachable");
    Ok(batch_exit_code(&report))
}

/// Distinct `host:port` endpoints of the selected client configs, in config order
fn endpoints(fleet: &Fleet, args: &TestArgs) -> Result<Vec<String>> {
    let clients: Vec<PathBuf> = fleet
        .store
        .resolve(&args.filter)?
        .into_iter()
        .filter(|c| fleet.store.kind_of(c) == Some(ConfigKind::Client))
        .collect();

    let reindexed = fleet.index.ensure(&clients)?;
    if reindexed > 0 {
        log::debug!("Indexed {reindexed} client config(s)");
    }

    let mut seen = HashSet::new();
    let mut targets = Vec::new();
    for config in &clients {
        match fleet.index.resolve_endpoint(config)? {
            Some(endpoint) => {
                let target = endpoint.to_string();
                if seen.insert(target.clone()) {
                    targets.push(target);
                }
            }
            None => ui::warn(&format!(
                "{} has no serverAddr, skipping",
                short_path(config, fleet.store.dir())
            )),
        }
    }
    Ok(targets)
}
