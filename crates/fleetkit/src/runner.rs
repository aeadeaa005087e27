//! Unit runners - execute one unit of work and report a terminal outcome.
//!
//! A runner never returns an error: any spawn failure, non-zero exit or
//! timeout becomes a [`UnitOutcome::failure`] with a diagnostic.

use crate::cancel::CancelToken;
use crate::process::{self, ProcessOutcome};
use crate::unit::{UnitOutcome, WorkUnit};
use std::process::Command;

/// Executes a single work unit.
///
/// Implementations run on worker threads, so they must be `Send + Sync`, and
/// they must honour both `unit.timeout` and `cancel`.
pub trait UnitRunner: Send + Sync {
    fn run(&self, unit: &WorkUnit, cancel: &CancelToken) -> UnitOutcome;
}

impl<F> UnitRunner for F
where
    F: Fn(&WorkUnit, &CancelToken) -> UnitOutcome + Send + Sync,
{
    fn run(&self, unit: &WorkUnit, cancel: &CancelToken) -> UnitOutcome {
        self(unit, cancel)
    }
}

/// Runner that maps each unit to an external command.
///
/// Exit code 0 is success; non-zero exit, signal death, timeout and
/// cancellation are failures carrying stderr or the reason as detail.
pub struct CommandRunner<B> {
    build: B,
}

impl<B> CommandRunner<B>
where
    B: Fn(&WorkUnit) -> Command + Send + Sync,
{
    pub fn new(build: B) -> Self {
        Self { build }
    }
}

impl<B> UnitRunner for CommandRunner<B>
where
    B: Fn(&WorkUnit) -> Command + Send + Sync,
{
    fn run(&self, unit: &WorkUnit, cancel: &CancelToken) -> UnitOutcome {
        let mut cmd = (self.build)(unit);
        let program = cmd.get_program().to_string_lossy().to_string();

        match process::run_with_timeout(&mut cmd, unit.timeout, cancel) {
            Ok(outcome) => describe(outcome, unit),
            Err(e) => UnitOutcome::failure(format!("failed to execute {program}: {e}")),
        }
    }
}

/// Turn a process outcome into a unit outcome with a one-line detail
pub fn describe(outcome: ProcessOutcome, unit: &WorkUnit) -> UnitOutcome {
    match outcome {
        ProcessOutcome::Exited { code: Some(0), .. } => UnitOutcome::success("exit 0"),
        ProcessOutcome::Exited {
            code: Some(code),
            stderr,
            ..
        } => {
            let stderr = first_line(&stderr);
            if stderr.is_empty() {
                UnitOutcome::failure(format!("exit {code}"))
            } else {
                UnitOutcome::failure(format!("exit {code}: {stderr}"))
            }
        }
        ProcessOutcome::Exited { code: None, .. } => UnitOutcome::failure("terminated by signal"),
        ProcessOutcome::TimedOut => UnitOutcome::failure(format!("timed out after {}", format_duration(unit.timeout))),
        ProcessOutcome::Cancelled => UnitOutcome::failure("cancelled"),
    }
}

fn first_line(text: &str) -> &str {
    text.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim()
}

fn format_duration(d: std::time::Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::Operation;
    use std::time::Duration;

    fn unit(target: &str, timeout: Duration) -> WorkUnit {
        WorkUnit::new(0, target, Operation::Restart, timeout)
    }

    #[test]
    fn test_closure_runner() {
        let runner = |u: &WorkUnit, _: &CancelToken| UnitOutcome::success(format!("ran {}", u.target));
        let outcome = runner.run(&unit("svc", Duration::from_secs(1)), &CancelToken::new());
        assert_eq!(outcome.detail, "ran svc");
    }

    #[test]
    fn test_describe_failure_uses_stderr() {
        let outcome = describe(
            ProcessOutcome::Exited {
                code: Some(5),
                stdout: String::new(),
                stderr: "\nUnit moonfrp-a.service not found.\nmore".into(),
            },
            &unit("moonfrp-a", Duration::from_secs(5)),
        );
        assert!(!outcome.is_success());
        assert_eq!(outcome.detail, "exit 5: Unit moonfrp-a.service not found.");
    }

    #[test]
    fn test_describe_timeout() {
        let outcome = describe(ProcessOutcome::TimedOut, &unit("x", Duration::from_millis(1500)));
        assert_eq!(outcome.detail, "timed out after 1500ms");

        let outcome = describe(ProcessOutcome::TimedOut, &unit("x", Duration::from_secs(5)));
        assert_eq!(outcome.detail, "timed out after 5s");
    }

    #[cfg(unix)]
    #[test]
    fn test_command_runner() {
        let runner = CommandRunner::new(|u: &WorkUnit| {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", &format!("test {} = ok", u.target)]);
            cmd
        });

        let cancel = CancelToken::new();
        assert!(runner.run(&unit("ok", Duration::from_secs(5)), &cancel).is_success());
        let failed = runner.run(&unit("bad", Duration::from_secs(5)), &cancel);
        assert_eq!(failed.detail, "exit 1");
    }

    #[test]
    fn test_command_runner_spawn_failure() {
        let runner = CommandRunner::new(|_: &WorkUnit| Command::new("/nonexistent/supervisor"));
        let outcome = runner.run(&unit("x", Duration::from_secs(1)), &CancelToken::new());
        assert!(outcome.detail.starts_with("failed to execute /nonexistent/supervisor"));
    }
}
