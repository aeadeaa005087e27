//! Progress indicators for batch commands.
//!
//! Renders the executor's completion counter as a single `Progress: n/total`
//! line updated in place, optionally with one result line per unit printed
//! above it as each unit finishes.

use crate::ui;
use fleetkit::{BatchObserver, BatchReport, UnitResult, WorkUnit};
use indicatif::{ProgressBar, ProgressStyle};

pub struct BatchProgress {
    pb: ProgressBar,
    live_lines: bool,
}

impl BatchProgress {
    /// A progress line on stderr, hidden when `quiet`
    pub fn new(quiet: bool) -> Self {
        let pb = if quiet { ProgressBar::hidden() } else { ProgressBar::new(0) };
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} Progress: {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Self { pb, live_lines: false }
    }

    /// Also print `<target> ✓ OK` / `<target> ✗ FAIL` the moment each unit completes
    pub fn with_live_lines(mut self) -> Self {
        self.live_lines = true;
        self
    }

    fn print_line(&self, line: String) {
        if self.pb.is_hidden() {
            println!("{line}");
        } else {
            self.pb.println(line);
        }
    }
}

impl BatchObserver for BatchProgress {
    fn on_batch_start(&mut self, total: usize) {
        self.pb.set_length(total as u64);
        self.pb.set_position(0);
    }

    fn on_unit_complete(&mut self, unit: &WorkUnit, result: &UnitResult, completed: usize, _total: usize) {
        if self.live_lines {
            self.print_line(ui::outcome_line(&unit.target, result.is_success()));
        }
        self.pb.set_message(unit.target.clone());
        self.pb.set_position(completed as u64);
    }

    fn on_tick(&mut self) {
        self.pb.tick();
    }

    fn on_batch_complete(&mut self, _report: &BatchReport) {
        self.pb.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetkit::{Operation, UnitOutcome};
    use std::time::Duration;

    #[test]
    fn test_position_follows_completions() {
        let units = WorkUnit::batch(["a", "b", "c"], Operation::Restart, Duration::from_secs(1));
        let mut progress = BatchProgress::new(true);

        progress.on_batch_start(units.len());
        for (i, unit) in units.iter().enumerate() {
            let result = UnitResult::from_outcome(unit.id, UnitOutcome::success("exit 0"));
            progress.on_unit_complete(unit, &result, i + 1, units.len());
            assert_eq!(progress.pb.position(), (i + 1) as u64);
        }
        progress.on_batch_complete(&BatchReport::default());
    }
}
