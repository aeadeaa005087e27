//! TCP reachability probing

use crate::cancel::CancelToken;
use crate::runner::UnitRunner;
use crate::unit::{UnitOutcome, WorkUnit};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

/// Default per-probe budget
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Runner that treats `unit.target` as `host:port` and attempts a TCP connect.
///
/// Success means a connection was established; refusal, timeout and
/// resolution failure are all failures.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

impl UnitRunner for TcpProbe {
    fn run(&self, unit: &WorkUnit, cancel: &CancelToken) -> UnitOutcome {
        if cancel.is_cancelled() {
            return UnitOutcome::failure("cancelled");
        }
        probe(&unit.target, unit.timeout)
    }
}

/// Attempt a TCP connect to `target` within `timeout` across all resolved addresses
pub fn probe(target: &str, timeout: Duration) -> UnitOutcome {
    let started = Instant::now();
    let addrs: Vec<SocketAddr> = match target.to_socket_addrs() {
        Ok(addrs) => addrs.collect(),
        Err(e) => return UnitOutcome::failure(format!("cannot resolve {target}: {e}")),
    };

    if addrs.is_empty() {
        return UnitOutcome::failure(format!("{target} resolved to no addresses"));
    }

    let mut last_error = String::new();
    for addr in addrs {
        let Some(remaining) = timeout.checked_sub(started.elapsed()).filter(|d| !d.is_zero()) else {
            return UnitOutcome::failure(format!("timed out after {}ms", timeout.as_millis()));
        };

        match TcpStream::connect_timeout(&addr, remaining) {
            Ok(_) => {
                return UnitOutcome::success(format!("connected in {}ms", started.elapsed().as_millis()));
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                last_error = format!("timed out after {}ms", timeout.as_millis());
            }
            Err(e) => last_error = e.to_string(),
        }
    }

    UnitOutcome::failure(last_error)
}
