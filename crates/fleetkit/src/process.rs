//! External command execution with a hard deadline.
//!
//! Children are spawned in their own process group so a timeout or a
//! cancellation can take down the whole group; every spawned child is reaped
//! before the call returns. Live groups are also recorded in a fixed,
//! lock-free table so a signal handler can kill them with
//! [`kill_live_groups`] before exiting.

use crate::cancel::CancelToken;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How often a running child is checked for exit, timeout and cancellation
pub const DEFAULT_POLL: Duration = Duration::from_millis(20);

/// Grace period for pipe readers after the child exits
const READER_GRACE: Duration = Duration::from_millis(200);

/// Concurrent children tracked for signal-time cleanup
const GROUP_SLOTS: usize = 256;

static LIVE_GROUPS: [AtomicI32; GROUP_SLOTS] = [const { AtomicI32::new(0) }; GROUP_SLOTS];

/// Holds a [`LIVE_GROUPS`] slot until the child is reaped
struct GroupSlot(Option<usize>);

impl GroupSlot {
    fn claim(pid: u32) -> Self {
        let Ok(pid) = i32::try_from(pid) else {
            return Self(None);
        };
        let slot = LIVE_GROUPS
            .iter()
            .position(|cell| cell.compare_exchange(0, pid, Ordering::SeqCst, Ordering::SeqCst).is_ok());
        if slot.is_none() {
            log::debug!("live group table full; pid {pid} is not tracked");
        }
        Self(slot)
    }
}

impl Drop for GroupSlot {
    fn drop(&mut self) {
        if let Some(slot) = self.0 {
            LIVE_GROUPS[slot].store(0, Ordering::SeqCst);
        }
    }
}

/// SIGKILL the process group of every child that has not been reaped yet.
///
/// Async-signal-safe: reads atomics and calls kill(2), nothing else.
pub fn kill_live_groups() {
    #[cfg(unix)]
    {
        for cell in &LIVE_GROUPS {
            let pid = cell.load(Ordering::SeqCst);
            if pid > 0 {
                // SAFETY: kill(2) on a group this process created at spawn
                unsafe {
                    libc::kill(-pid, libc::SIGKILL);
                }
            }
        }
    }
}

/// Terminal state of an external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The child exited on its own
    Exited {
        /// Exit code, `None` when killed by a signal
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    /// The deadline passed and the child was killed
    TimedOut,
    /// Cancellation was requested and the child was killed
    Cancelled,
}

impl ProcessOutcome {
    /// Whether the child exited with status 0
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited { code: Some(0), .. })
    }
}

/// Run `cmd` to completion, killing it after `timeout` or on cancellation.
///
/// Errors only when the command cannot be spawned at all.
pub fn run_with_timeout(cmd: &mut Command, timeout: Duration, cancel: &CancelToken) -> std::io::Result<ProcessOutcome> {
    cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd.spawn()?;
    let group = GroupSlot::claim(child.id());
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            // Reaped; the pid may be reused from here on
            drop(group);
            return Ok(ProcessOutcome::Exited {
                code: status.code(),
                stdout: collect(stdout),
                stderr: collect(stderr),
            });
        }

        if cancel.is_cancelled() {
            terminate(&mut child);
            return Ok(ProcessOutcome::Cancelled);
        }

        let now = Instant::now();
        if now >= deadline {
            terminate(&mut child);
            return Ok(ProcessOutcome::TimedOut);
        }

        thread::sleep(DEFAULT_POLL.min(deadline - now));
    }
}

type Drained = (Arc<Mutex<Vec<u8>>>, JoinHandle<()>);

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<Drained> {
    let mut pipe = pipe?;
    let buf = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&buf);
    let handle = thread::spawn(move || {
        let mut chunk = [0u8; 4096];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => match sink.lock() {
                    Ok(mut locked) => locked.extend_from_slice(&chunk[..n]),
                    Err(poisoned) => poisoned.into_inner().extend_from_slice(&chunk[..n]),
                },
            }
        }
    });
    Some((buf, handle))
}

/// Take whatever a reader captured; a grandchild holding the pipe open must
/// not keep us waiting past the grace period.
fn collect(drained: Option<Drained>) -> String {
    let Some((buf, handle)) = drained else {
        return String::new();
    };

    let grace_end = Instant::now() + READER_GRACE;
    while !handle.is_finished() && Instant::now() < grace_end {
        thread::sleep(Duration::from_millis(5));
    }
    if handle.is_finished() {
        let _ = handle.join();
    }

    let bytes = match buf.lock() {
        Ok(locked) => locked.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };
    String::from_utf8_lossy(&bytes).trim().to_string()
}

/// Kill the child's process group, then the child itself, and reap it.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pid) = i32::try_from(child.id()) {
            // SAFETY: kill(2) with a negative pid signals the group we created at spawn
            unsafe {
                libc::kill(-pid, libc::SIGKILL);
            }
        }
    }

    let _ = child.kill();
    let _ = child.wait();
}
