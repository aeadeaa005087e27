//! Tag configs so filters can select them with `tag:<name>`

use super::Fleet;
use crate::Context;
use crate::ui;
use anyhow::{Result, bail};

pub fn run(ctx: &Context, fleet: &Fleet, name: &str, tags: &[String]) -> Result<i32> {
    let path = fleet.find_config(name)?;

    let mut tags: Vec<String> = tags.iter().map(|t| t.trim().to_string()).collect();
    if let Some(bad) = tags.iter().find(|t| t.is_empty() || t.contains(char::is_whitespace)) {
        bail!("Invalid tag '{bad}': tags must be non-empty and contain no spaces");
    }
    tags.sort();
    tags.dedup();

    fleet.index.set_tags(&path, tags.clone())?;

    if tags.is_empty() {
        ui::success(&format!("Cleared tags of {name}"));
    } else if !ctx.quiet {
        ui::success(&format!("{name}: {}", tags.join(", ")));
    }
    Ok(0)
}
