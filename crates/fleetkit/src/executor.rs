//! Bounded parallel executor - runs a worklist with capped concurrency.
//!
//! The executor owns the worklist, the in-flight count and the result slots.
//! Workers only ever send `(slot, outcome)` over a channel; all bookkeeping
//! and observer callbacks happen on the calling thread.
//!
//! Failure semantics are continue-on-error: a failing, timing-out or even
//! panicking unit is recorded and the batch carries on.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::runner::UnitRunner;
use crate::unit::{BatchReport, UnitOutcome, UnitResult, WorkUnit};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

/// Default fan-out for service lifecycle operations
pub const SERVICE_PARALLELISM: usize = 10;

/// Default fan-out for connectivity probes
pub const PROBE_PARALLELISM: usize = 20;

/// Default wait between capacity checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(75);

/// Receives progress from a running batch.
///
/// All callbacks run on the thread that called [`Executor::run_batch`].
pub trait BatchObserver {
    /// Called once before any unit is launched
    fn on_batch_start(&mut self, _total: usize) {}

    /// Called as each unit completes; `completed` increases by one per call
    fn on_unit_complete(&mut self, unit: &WorkUnit, result: &UnitResult, completed: usize, total: usize);

    /// Called when a poll interval passes with no completion
    fn on_tick(&mut self) {}

    /// Called once with the final report
    fn on_batch_complete(&mut self, _report: &BatchReport) {}
}

/// No-op observer
pub struct NoProgress;

impl BatchObserver for NoProgress {
    fn on_unit_complete(&mut self, _unit: &WorkUnit, _result: &UnitResult, _completed: usize, _total: usize) {}
}

/// Runs batches of work units with at most `max_parallel` in flight.
#[derive(Debug, Clone)]
pub struct Executor {
    max_parallel: usize,
    poll_interval: Duration,
    cancel: CancelToken,
}

impl Executor {
    /// Create an executor; `max_parallel` is raised to at least 1
    pub fn new(max_parallel: usize) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel: CancelToken::new(),
        }
    }

    /// Set the wait between capacity checks
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Share a cancellation token with the caller
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Run every unit through `runner` and aggregate the results.
    ///
    /// Only infrastructure problems (the worker pool cannot be built) return
    /// `Err`. On cancellation no further units are launched, in-flight units
    /// are awaited (runners are expected to abort promptly), and unstarted
    /// units are reported as failed with detail `cancelled`.
    pub fn run_batch<R, O>(&self, units: &[WorkUnit], runner: &R, observer: &mut O) -> Result<BatchReport>
    where
        R: UnitRunner + ?Sized,
        O: BatchObserver + ?Sized,
    {
        let started = Instant::now();
        let total = units.len();
        observer.on_batch_start(total);

        if total == 0 {
            let report = BatchReport::from_results(units, Vec::new(), false, started.elapsed());
            observer.on_batch_complete(&report);
            return Ok(report);
        }

        let workers = self.max_parallel.min(total);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("fleetkit-unit-{i}"))
            .build()
            .map_err(|e| Error::WorkerPool(e.to_string()))?;

        log::debug!("batch of {total} units, {workers} in flight at most");

        let (tx, rx) = mpsc::channel::<(usize, UnitOutcome)>();
        let mut slots: Vec<Option<UnitResult>> = vec![None; total];
        let mut next = 0;
        let mut in_flight = 0;
        let mut completed = 0;
        let mut cancelled = false;

        pool.in_place_scope(|scope| {
            loop {
                if !cancelled && self.cancel.is_cancelled() {
                    cancelled = true;
                    log::warn!("batch cancelled with {in_flight} unit(s) in flight, {} not started", total - next);
                }

                while !cancelled && in_flight < workers && next < total {
                    let index = next;
                    let unit = &units[index];
                    let tx = tx.clone();
                    let cancel = self.cancel.clone();

                    scope.spawn(move |_| {
                        let outcome = panic::catch_unwind(AssertUnwindSafe(|| runner.run(unit, &cancel)))
                            .unwrap_or_else(|payload| {
                                UnitOutcome::failure(format!("runner panicked: {}", panic_message(payload.as_ref())))
                            });
                        let _ = tx.send((index, outcome));
                    });

                    next += 1;
                    in_flight += 1;
                }

                if in_flight == 0 {
                    break;
                }

                match rx.recv_timeout(self.poll_interval) {
                    Ok((index, outcome)) => {
                        in_flight -= 1;
                        let unit = &units[index];
                        if slots[index].is_some() {
                            log::error!("duplicate result for unit {} ({}) ignored", unit.id, unit.target);
                            continue;
                        }

                        let result = UnitResult::from_outcome(unit.id, outcome);
                        if !result.is_success() {
                            log::debug!("unit {} ({}) failed: {}", unit.id, unit.target, result.detail);
                        }
                        completed += 1;
                        observer.on_unit_complete(unit, &result, completed, total);
                        slots[index] = Some(result);
                    }
                    Err(RecvTimeoutError::Timeout) => observer.on_tick(),
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        let results: Vec<UnitResult> = slots
            .into_iter()
            .zip(units)
            .map(|(slot, unit)| {
                slot.unwrap_or_else(|| UnitResult::from_outcome(unit.id, UnitOutcome::failure("cancelled")))
            })
            .collect();

        let report = BatchReport::from_results(units, results, cancelled, started.elapsed());
        log::debug!(
            "batch finished in {:?}: {} succeeded, {} failed",
            report.elapsed,
            report.succeeded,
            report.failed
        );
        observer.on_batch_complete(&report);
        Ok(report)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::Operation;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn units(n: usize) -> Vec<WorkUnit> {
        WorkUnit::batch((0..n).map(|i| format!("svc-{i}")), Operation::Restart, Duration::from_secs(1))
    }

    /// Tracks how many units run at once and the peak
    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Gauge {
        fn enter(&self) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn exit(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct Recorder {
        started_with: Option<usize>,
        completed: Vec<usize>,
        finished: bool,
    }

    impl BatchObserver for Recorder {
        fn on_batch_start(&mut self, total: usize) {
            self.started_with = Some(total);
        }

        fn on_unit_complete(&mut self, _unit: &WorkUnit, _result: &UnitResult, completed: usize, _total: usize) {
            self.completed.push(completed);
        }

        fn on_batch_complete(&mut self, _report: &BatchReport) {
            self.finished = true;
        }
    }

    #[test]
    fn test_all_succeed_within_budget() {
        let batch = units(50);
        let runner = |_: &WorkUnit, _: &CancelToken| {
            thread::sleep(Duration::from_millis(150));
            UnitOutcome::success("ok")
        };

        let start = Instant::now();
        let report = Executor::new(10).run_batch(&batch, &runner, &mut NoProgress).unwrap();

        assert_eq!(report.succeeded, 50);
        assert_eq!(report.failed, 0);
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(!report.cancelled);
    }

    #[test]
    fn test_continue_on_error() {
        let batch = units(50);
        let failing: HashSet<usize> = [3, 17, 40].into_iter().collect();
        let runner = move |u: &WorkUnit, _: &CancelToken| {
            thread::sleep(Duration::from_millis(5));
            if failing.contains(&u.id) {
                UnitOutcome::failure(format!("exit 1 on {}", u.target))
            } else {
                UnitOutcome::success("ok")
            }
        };

        let report = Executor::new(10).run_batch(&batch, &runner, &mut NoProgress).unwrap();

        assert_eq!(report.succeeded, 47);
        assert_eq!(report.failed, 3);
        let targets: Vec<_> = report.failures.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(targets, vec!["svc-3", "svc-17", "svc-40"]);
        assert_eq!(report.failures[1].1, "exit 1 on svc-17");
    }

    #[test]
    fn test_exactly_once_for_every_parallelism() {
        let n = 12;
        let batch = units(n);
        for max_parallel in 1..=n {
            let calls = AtomicUsize::new(0);
            let runner = |u: &WorkUnit, _: &CancelToken| {
                calls.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis((u.id as u64 * 7) % 11));
                if u.id % 4 == 0 {
                    UnitOutcome::failure("boom")
                } else {
                    UnitOutcome::success("ok")
                }
            };

            let report = Executor::new(max_parallel)
                .with_poll_interval(Duration::from_millis(5))
                .run_batch(&batch, &runner, &mut NoProgress)
                .unwrap();

            assert_eq!(calls.load(Ordering::SeqCst), n);
            assert_eq!(report.succeeded + report.failed, n);
            let ids: Vec<_> = report.results.iter().map(|r| r.unit_id).collect();
            assert_eq!(ids, (0..n).collect::<Vec<_>>());
            assert_eq!(report.failed, 3);
        }
    }

    #[test]
    fn test_parallelism_bound() {
        let batch = units(40);
        let gauge = Arc::new(Gauge::default());
        let runner = {
            let gauge = Arc::clone(&gauge);
            move |_: &WorkUnit, _: &CancelToken| {
                gauge.enter();
                thread::sleep(Duration::from_millis(30));
                gauge.exit();
                UnitOutcome::success("ok")
            }
        };

        Executor::new(7).run_batch(&batch, &runner, &mut NoProgress).unwrap();

        let peak = gauge.peak.load(Ordering::SeqCst);
        assert!(peak <= 7, "peak {peak} exceeded bound");
        assert!(peak >= 2, "units never overlapped");
    }

    #[test]
    fn test_observer_sees_monotonic_progress() {
        let batch = units(9);
        let runner = |_: &WorkUnit, _: &CancelToken| UnitOutcome::success("ok");
        let mut recorder = Recorder::default();

        Executor::new(3).run_batch(&batch, &runner, &mut recorder).unwrap();

        assert_eq!(recorder.started_with, Some(9));
        assert_eq!(recorder.completed, (1..=9).collect::<Vec<_>>());
        assert!(recorder.finished);
    }

    #[test]
    fn test_panicking_runner_is_a_unit_failure() {
        let batch = units(4);
        let runner = |u: &WorkUnit, _: &CancelToken| {
            if u.id == 2 {
                panic!("bad unit");
            }
            UnitOutcome::success("ok")
        };

        let report = Executor::new(2).run_batch(&batch, &runner, &mut NoProgress).unwrap();
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failures, vec![("svc-2".to_string(), "runner panicked: bad unit".to_string())]);
    }

    #[test]
    fn test_cancellation_stops_launching_and_accounts_everything() {
        let batch = units(30);
        let cancel = CancelToken::new();
        let launched = AtomicUsize::new(0);
        let runner = |_: &WorkUnit, cancel: &CancelToken| {
            launched.fetch_add(1, Ordering::SeqCst);
            let deadline = Instant::now() + Duration::from_secs(5);
            while Instant::now() < deadline {
                if cancel.is_cancelled() {
                    return UnitOutcome::failure("cancelled");
                }
                thread::sleep(Duration::from_millis(5));
            }
            UnitOutcome::success("ok")
        };

        let trigger = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            trigger.cancel();
        });

        let start = Instant::now();
        let report = Executor::new(4)
            .with_cancel(cancel)
            .run_batch(&batch, &runner, &mut NoProgress)
            .unwrap();
        canceller.join().unwrap();

        assert!(start.elapsed() < Duration::from_secs(3));
        assert!(report.cancelled);
        assert_eq!(report.total, 30);
        assert_eq!(report.failed, 30);
        assert_eq!(launched.load(Ordering::SeqCst), 4);
        assert!(report.results.iter().all(|r| r.detail == "cancelled"));
    }

    #[test]
    fn test_empty_batch() {
        let runner = |_: &WorkUnit, _: &CancelToken| UnitOutcome::success("ok");
        let report = Executor::new(10).run_batch(&[], &runner, &mut NoProgress).unwrap();
        assert_eq!(report.total, 0);
        assert!(report.is_success());
    }
}
