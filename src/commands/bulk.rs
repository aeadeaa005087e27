//! Bulk service operations: one supervisor call per selected service

use super::{Fleet, batch_exit_code, print_batch_summary};
use crate::Context;
use crate::cli::BulkArgs;
use crate::progress::BatchProgress;
use crate::ui;
use anyhow::{Context as _, Result};
use colored::Colorize;
use fleetkit::{ConfigStore, Filter, NoProgress, Operation, ServiceState, WorkUnit};
use std::path::PathBuf;

pub fn run(ctx: &Context, fleet: &Fleet, args: BulkArgs) -> Result<i32> {
    let operation = Operation::from(args.operation);
    let max_parallel = args.max_parallel.unwrap_or(fleet.settings.engine.service_parallel).max(1);

    let needs_supervisor = !args.dry_run || matches!(args.filter, Filter::Status(_));
    if needs_supervisor {
        fleet.supervisor.check_available()?;
    }

    let services = resolve_services(fleet, &args.filter)?;
    if services.is_empty() {
        ui::warn(&format!("No services match '{}'", args.filter));
        return Ok(0);
    }

    if args.dry_run {
        ui::warn("Dry run - no services will be touched");
        for service in &services {
            println!("  {} {} {}", "→".cyan(), operation, service);
        }
        return Ok(0);
    }

    if operation.is_disruptive() && !args.yes {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!("{} {} service(s)?", capitalize(operation.as_str()), services.len()))
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;

        if !confirmed {
            ui::info("Aborted");
            return Ok(0);
        }
    }

    if !ctx.quiet {
        ui::header(&format!("{} {} service(s)", capitalize(operation.as_str()), services.len()));
    }
    log::info!("{operation} on {} service(s), {max_parallel} at a time", services.len());

    let units = WorkUnit::batch(services, operation, fleet.settings.service_timeout());
    let runner = fleet.supervisor.runner();
    let mut progress = BatchProgress::new(ctx.quiet);
    let report = fleet.executor(max_parallel).run_batch(&units, &runner, &mut progress)?;

    print_batch_summary(ctx, &report, "Succeeded", "Failed");
    Ok(batch_exit_code(&report))
}

/// Service names for `filter`, resolved once before the batch starts.
///
/// A status filter queries every managed service's liveness first.
pub fn resolve_services(fleet: &Fleet, filter: &Filter) -> Result<Vec<String>> {
    let configs: Vec<PathBuf> = match filter {
        Filter::Status(_) => fleet.store.list()?,
        other => fleet.store.resolve(other)?,
    };
    let names: Vec<String> = configs.iter().map(|c| fleet.supervisor.service_name(c)).collect();

    let Filter::Status(wanted) = filter else {
        return Ok(names);
    };

    let units = WorkUnit::batch(names, Operation::Status, fleet.settings.service_timeout());
    let report = fleet
        .executor(fleet.settings.engine.service_parallel)
        .run_batch(&units, &fleet.supervisor.liveness_runner(), &mut NoProgress)?;
    if report.cancelled {
        return Err(fleetkit::Error::Cancelled.into());
    }

    Ok(units
        .into_iter()
        .zip(&report.results)
        .filter(|(_, result)| {
            let state = if result.is_success() {
                ServiceState::Active
            } else {
                ServiceState::Inactive
            };
            state == *wanted
        })
        .map(|(unit, _)| unit.target)
        .collect())
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars
        .next()
        .map(|first| first.to_uppercase().chain(chars).collect())
        .unwrap_or_default()
}
