//! Core batch types: work units, their results, and the aggregate report

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// What a unit of work does to its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Start,
    Stop,
    Restart,
    Reload,
    /// TCP reachability check against `host:port`
    Probe,
    /// Read-only liveness query of a service
    Status,
}

impl Operation {
    /// Lowercase verb, as passed to a service supervisor
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Reload => "reload",
            Self::Probe => "probe",
            Self::Status => "status",
        }
    }

    /// Whether the operation interrupts running services
    pub fn is_disruptive(&self) -> bool {
        matches!(self, Self::Stop | Self::Restart)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart),
            "reload" => Ok(Self::Reload),
            "probe" => Ok(Self::Probe),
            "status" => Ok(Self::Status),
            other => Err(format!("unknown operation '{other}'")),
        }
    }
}

/// One item of a batch. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    /// Ordinal within the batch
    pub id: usize,
    /// Service name or `host:port`
    pub target: String,
    pub operation: Operation,
    /// Budget for this unit alone, independent of the batch lifetime
    pub timeout: Duration,
}

impl WorkUnit {
    pub fn new(id: usize, target: impl Into<String>, operation: Operation, timeout: Duration) -> Self {
        Self {
            id,
            target: target.into(),
            operation,
            timeout,
        }
    }

    /// Build a batch of units over `targets`, numbering them in order
    pub fn batch<I, S>(targets: I, operation: Operation, timeout: Duration) -> Vec<WorkUnit>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        targets
            .into_iter()
            .enumerate()
            .map(|(id, target)| WorkUnit::new(id, target, operation, timeout))
            .collect()
    }
}

/// Terminal status of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitStatus {
    Success,
    Failure,
}

/// What a runner reports for one unit, before the executor stamps it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOutcome {
    pub status: UnitStatus,
    /// Free text diagnostic (exit code, stderr, timeout reason)
    pub detail: String,
}

impl UnitOutcome {
    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            status: UnitStatus::Success,
            detail: detail.into(),
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            status: UnitStatus::Failure,
            detail: detail.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == UnitStatus::Success
    }
}

/// Outcome of a work unit, produced exactly once per unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitResult {
    pub unit_id: usize,
    pub status: UnitStatus,
    pub detail: String,
    pub completed_at: DateTime<Utc>,
}

impl UnitResult {
    pub fn from_outcome(unit_id: usize, outcome: UnitOutcome) -> Self {
        Self {
            unit_id,
            status: outcome.status,
            detail: outcome.detail,
            completed_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == UnitStatus::Success
    }
}

/// Aggregate over all results of a batch
///
/// `succeeded + failed == total` always holds, and `results` carries one
/// entry per enqueued unit in enqueue order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// `(target, detail)` pairs in enqueue order
    pub failures: Vec<(String, String)>,
    /// Per-unit results in enqueue order
    pub results: Vec<UnitResult>,
    /// Set when the batch was interrupted; unstarted units count as failed
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl BatchReport {
    /// Build the report from a drained batch. `results[i]` belongs to `units[i]`.
    pub fn from_results(units: &[WorkUnit], results: Vec<UnitResult>, cancelled: bool, elapsed: Duration) -> Self {
        let mut report = BatchReport {
            total: units.len(),
            cancelled,
            elapsed,
            ..Default::default()
        };

        for (unit, result) in units.iter().zip(&results) {
            if result.is_success() {
                report.succeeded += 1;
            } else {
                report.failed += 1;
                report.failures.push((unit.target.clone(), result.detail.clone()));
            }
        }

        report.results = results;
        report
    }

    /// Check if every unit succeeded
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Exit code convention for bulk commands: 0, or the failure count
    pub fn exit_code(&self) -> i32 {
        self.failed.min(125) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_round_trip_names() {
        for op in [
            Operation::Start,
            Operation::Stop,
            Operation::Restart,
            Operation::Reload,
            Operation::Probe,
            Operation::Status,
        ] {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
        }
        assert!("bounce".parse::<Operation>().is_err());
        assert_eq!(" Restart ".parse::<Operation>().unwrap(), Operation::Restart);
    }

    #[test]
    fn test_batch_numbers_units_in_order() {
        let units = WorkUnit::batch(["a", "b", "c"], Operation::Reload, Duration::from_secs(2));
        let ids: Vec<_> = units.iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(units[1].target, "b");
    }

    #[test]
    fn test_report_counts_and_failure_order() {
        let units = WorkUnit::batch(["a", "b", "c", "d"], Operation::Start, Duration::from_secs(1));
        let results = vec![
            UnitResult::from_outcome(0, UnitOutcome::success("ok")),
            UnitResult::from_outcome(1, UnitOutcome::failure("exit 3")),
            UnitResult::from_outcome(2, UnitOutcome::success("ok")),
            UnitResult::from_outcome(3, UnitOutcome::failure("timed out")),
        ];

        let report = BatchReport::from_results(&units, results, false, Duration::ZERO);
        assert_eq!(report.total, 4);
        assert_eq!(report.succeeded + report.failed, report.total);
        assert_eq!(
            report.failures,
            vec![
                ("b".to_string(), "exit 3".to_string()),
                ("d".to_string(), "timed out".to_string())
            ]
        );
        assert_eq!(report.exit_code(), 2);
        assert!(!report.is_success());
    }

    #[test]
    fn test_exit_code_is_clamped() {
        let report = BatchReport {
            total: 300,
            failed: 300,
            ..Default::default()
        };
        assert_eq!(report.exit_code(), 125);
    }
}
