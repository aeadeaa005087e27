//! Validate live configs without changing them

use super::{Fleet, short_path};
use crate::Context;
use crate::ui;
use crate::validate::FrpValidator;
use anyhow::{Result, bail};
use colored::Colorize;
use fleetkit::{ConfigStore, Filter, Validator};
use rayon::prelude::*;
use std::path::PathBuf;

pub fn run(ctx: &Context, fleet: &Fleet, filter: &Filter) -> Result<i32> {
    if matches!(filter, Filter::Status(_)) {
        bail!("Status filters select services; use type:, tag: or name: to select configs");
    }

    let configs = fleet.store.resolve(filter)?;
    if configs.is_empty() {
        ui::warn(&format!("No configs match '{filter}'"));
        return Ok(0);
    }

    let problems = check_all(fleet, &configs)?;
    let dir = fleet.store.dir();

    if !ctx.quiet {
        for (path, errors) in configs.iter().zip(&problems) {
            if errors.is_empty() {
                println!("  {} {}", "✓".green(), short_path(path, dir));
            } else {
                println!("  {} {}", "✗".red(), short_path(path, dir));
                for error in errors {
                    println!("      {}", error.dimmed());
                }
            }
        }
        println!();
    }

    let invalid = problems.iter().filter(|e| !e.is_empty()).count();
    if invalid == 0 {
        ui::success(&format!("{} config(s) valid", configs.len()));
        Ok(0)
    } else {
        ui::error(&format!("{invalid} of {} config(s) invalid", configs.len()));
        Ok(1)
    }
}

/// Errors per config, in the order given
fn check_all(fleet: &Fleet, configs: &[PathBuf]) -> Result<Vec<Vec<String>>> {
    let bodies = configs
        .iter()
        .map(|path| fleet.store.read(path))
        .collect::<fleetkit::Result<Vec<String>>>()?;

    Ok(bodies.par_iter().map(|body| FrpValidator.validate(body).errors).collect())
}
