//! Service supervisor (systemctl-compatible CLI)

use crate::store::config_name;
use anyhow::{Result, bail};
use fleetkit::{CancelToken, CommandRunner, Operation, ProcessOutcome, UnitOutcome, UnitRunner, WorkUnit};
use std::path::Path;
use std::process::Command;
use std::time::Duration;

const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs `<program> [args..] <verb> <service>`.
///
/// `program` may carry leading arguments, e.g. `sudo systemctl` or
/// `systemctl --user`.
#[derive(Debug, Clone)]
pub struct Systemctl {
    program: String,
    leading_args: Vec<String>,
    prefix: String,
}

impl Systemctl {
    pub fn new(program: &str, prefix: impl Into<String>) -> Self {
        let mut words = program.split_whitespace().map(str::to_string);
        Self {
            program: words.next().unwrap_or_else(|| "systemctl".to_string()),
            leading_args: words.collect(),
            prefix: prefix.into(),
        }
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args);
        cmd
    }

    /// `<prefix>-<config stem>`
    pub fn service_name(&self, config: &Path) -> String {
        format!("{}-{}", self.prefix, config_name(config))
    }

    /// Verb passed to the supervisor for an operation
    pub fn verb(operation: Operation) -> &'static str {
        match operation {
            Operation::Status => "is-active",
            other => other.as_str(),
        }
    }

    pub fn command(&self, operation: Operation, service: &str) -> Command {
        let mut cmd = self.base_command();
        cmd.arg(Self::verb(operation));
        if operation == Operation::Status {
            cmd.arg("--quiet");
        }
        cmd.arg(service);
        cmd
    }

    /// Fail fast when the supervisor cannot be run at all
    pub fn check_available(&self) -> Result<()> {
        let mut cmd = self.base_command();
        cmd.arg("--version");

        match fleetkit::run_with_timeout(&mut cmd, AVAILABILITY_TIMEOUT, &CancelToken::new()) {
            Ok(ProcessOutcome::Exited { code: Some(0), .. }) => Ok(()),
            Ok(ProcessOutcome::Exited { code, stderr, .. }) => bail!(
                "Service supervisor '{}' is not usable (exit {}): {}",
                self.program,
                code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                stderr.trim()
            ),
            Ok(_) => bail!("Service supervisor '{}' did not respond", self.program),
            Err(e) => bail!("Service supervisor '{}' is not available: {e}", self.program),
        }
    }

    /// Runner that applies each unit's operation to the service named by its target
    pub fn runner(&self) -> impl UnitRunner + '_ {
        CommandRunner::new(move |unit: &WorkUnit| self.command(unit.operation, &unit.target))
    }

    /// Runner for `Operation::Status` units: success means the service is active
    pub fn liveness_runner(&self) -> impl UnitRunner + '_ {
        move |unit: &WorkUnit, cancel: &CancelToken| {
            let mut cmd = self.command(Operation::Status, &unit.target);
            match fleetkit::run_with_timeout(&mut cmd, unit.timeout, cancel) {
                Ok(ProcessOutcome::Exited { code: Some(0), .. }) => UnitOutcome::success("active"),
                Ok(ProcessOutcome::Exited { .. }) => UnitOutcome::failure("inactive"),
                Ok(ProcessOutcome::TimedOut) => UnitOutcome::failure("timed out"),
                Ok(ProcessOutcome::Cancelled) => UnitOutcome::failure("cancelled"),
                Err(e) => UnitOutcome::failure(format!("failed to execute {}: {e}", self.program)),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// A fake supervisor run through `sh`, returned as a `program` setting.
    /// Logs `<verb> <service>` to `calls.log`; services whose name contains
    /// `broken` fail, `is-active` succeeds for names containing `up`.
    #[cfg(unix)]
    pub(crate) fn fake_supervisor(dir: &Path) -> String {
        let log = dir.join("calls.log");
        let script = dir.join("fake-systemctl");
        let body = format!(
            r#"#!/bin/sh
if [ "$1" = "--version" ]; then echo "fake 1"; exit 0; fi
if [ "$1" = "is-active" ]; then
  case "$3" in *up*) exit 0 ;; *) exit 3 ;; esac
fi
echo "$1 $2" >> "{log}"
case "$2" in *broken*) echo "Job for $2.service failed." >&2; exit 1 ;; esac
exit 0
"#,
            log = log.display()
        );
        fs::write(&script, body).unwrap();
        format!("sh {}", script.display())
    }

    #[test]
    fn test_service_name() {
        let sup = Systemctl::new("systemctl", "moonfrp");
        assert_eq!(sup.service_name(Path::new("/etc/frp/frpc-eu.toml")), "moonfrp-frpc-eu");
    }

    #[test]
    fn test_program_with_leading_args() {
        let sup = Systemctl::new("sudo systemctl", "moonfrp");
        let cmd = sup.command(Operation::Start, "moonfrp-a");
        assert_eq!(cmd.get_program(), "sudo");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().to_string()).collect();
        assert_eq!(args, vec!["systemctl", "start", "moonfrp-a"]);
    }

    #[test]
    fn test_command_shape() {
        let sup = Systemctl::new("systemctl", "moonfrp");
        let cmd = sup.command(Operation::Restart, "moonfrp-a");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().to_string()).collect();
        assert_eq!(args, vec!["restart", "moonfrp-a"]);

        let cmd = sup.command(Operation::Status, "moonfrp-a");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().to_string()).collect();
        assert_eq!(args, vec!["is-active", "--quiet", "moonfrp-a"]);
    }

    #[test]
    fn test_unavailable_supervisor() {
        let sup = Systemctl::new("/nonexistent/systemctl", "moonfrp");
        assert!(sup.check_available().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_runner_against_fake_supervisor() {
        let dir = TempDir::new().unwrap();
        let sup = Systemctl::new(&fake_supervisor(dir.path()), "moonfrp");
        sup.check_available().unwrap();

        let runner = sup.runner();
        let cancel = CancelToken::new();
        let ok = WorkUnit::new(0, "moonfrp-a", Operation::Reload, Duration::from_secs(5));
        assert!(runner.run(&ok, &cancel).is_success());

        let broken = WorkUnit::new(1, "moonfrp-broken", Operation::Restart, Duration::from_secs(5));
        let outcome = runner.run(&broken, &cancel);
        assert_eq!(outcome.detail, "exit 1: Job for moonfrp-broken.service failed.");

        let calls = fs::read_to_string(dir.path().join("calls.log")).unwrap();
        assert_eq!(calls, "reload moonfrp-a\nrestart moonfrp-broken\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_liveness_runner() {
        let dir = TempDir::new().unwrap();
        let sup = Systemctl::new(&fake_supervisor(dir.path()), "moonfrp");
        let runner = sup.liveness_runner();
        let cancel = CancelToken::new();

        let up = WorkUnit::new(0, "moonfrp-up-1", Operation::Status, Duration::from_secs(5));
        let down = WorkUnit::new(1, "moonfrp-down-1", Operation::Status, Duration::from_secs(5));
        assert!(runner.run(&up, &cancel).is_success());
        assert_eq!(runner.run(&down, &cancel).detail, "inactive");
    }
}
