//! All-or-nothing config updates

use super::{Fleet, short_path};
use crate::Context;
use crate::backup::DirBackup;
use crate::cli::UpdateArgs;
use crate::interrupt;
use crate::ui;
use crate::validate::FrpValidator;
use anyhow::{Context as _, Result, bail};
use colored::Colorize;
use fleetkit::{Filter, Mutation, TransactionManager, TransactionPlan, TransactionResult};
use std::fs;

pub fn run(ctx: &Context, fleet: &Fleet, args: UpdateArgs) -> Result<i32> {
    if matches!(args.filter, Filter::Status(_)) {
        bail!("Status filters select services; use type:, tag: or name: to select configs");
    }

    let mutation = match (&args.field, &args.value, &args.replace_with) {
        (Some(field), Some(value), None) => Mutation::set_field(field.as_str(), value),
        (None, None, Some(file)) => {
            let body = fs::read_to_string(file).with_context(|| format!("Could not read {}", file.display()))?;
            Mutation::replace(body)
        }
        _ => bail!("Pass either --field with --value, or --replace-with"),
    };

    let plan = TransactionPlan {
        filter: args.filter,
        mutation,
        dry_run: args.dry_run,
    };
    log::info!("Applying {} to '{}'", plan.mutation, plan.filter);

    let backup = DirBackup::new(fleet.backup_dir(), fleet.settings.backup.keep);
    let manager = TransactionManager::new(&fleet.store, &FrpValidator, &backup, fleet.index.as_ref())
        .with_cancel(fleet.cancel.clone());

    let result = match manager.apply(&plan) {
        Ok(result) => result,
        Err(fleetkit::Error::Cancelled) => {
            ui::warn("Interrupted - no configs were changed");
            return Ok(interrupt::exit_code());
        }
        Err(e) => return Err(e).context("Config update failed"),
    };

    report(ctx, fleet, &result);
    Ok(result.exit_code())
}

fn report(ctx: &Context, fleet: &Fleet, result: &TransactionResult) {
    let dir = fleet.store.dir();

    if !result.validation_errors.is_empty() {
        ui::error(&format!(
            "Validation failed for {} file(s) - no configs were changed",
            result.validation_errors.len()
        ));
        for (path, error) in &result.validation_errors {
            ui::failure(&short_path(path, dir), error);
        }
        return;
    }

    if result.preview {
        if result.previews.is_empty() {
            ui::info("Nothing to change");
            return;
        }
        ui::warn(&format!("Dry run - {} file(s) would change", result.previews.len()));
        if !ctx.quiet {
            for preview in &result.previews {
                println!();
                println!("  {}", short_path(&preview.path, dir).bold());
                ui::diff(&preview.before, &preview.after);
            }
        }
        return;
    }

    if result.changed_files.is_empty() {
        ui::info("Nothing to change");
        return;
    }

    ui::success(&format!("Updated {} file(s)", result.changed_files.len()));
    if !ctx.quiet {
        for path in &result.changed_files {
            println!("  {} {}", "✓".green(), short_path(path, dir));
        }
        ui::dim(&format!("Backups in {}", fleet.backup_dir().display()));
    }

    for (path, warning) in &result.index_warnings {
        ui::warn(&format!("Index not updated for {}: {warning}", short_path(path, dir)));
    }
}
