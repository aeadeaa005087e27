//! Termination signal handling.
//!
//! The first SIGINT, SIGTERM or SIGHUP sets a process-wide flag that every
//! [`CancelToken`] from [`token`] observes: batches stop launching units and
//! kill in-flight children, transactions abort before commit and drop their
//! scratch directories on the way out. A second signal kills every child
//! process group that is still running and exits at once.

use fleetkit::CancelToken;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

/// Exit status for a run interrupted by Ctrl-C
pub const EXIT_INTERRUPTED: i32 = 130;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// First signal received, 0 if none
static SIGNAL: AtomicI32 = AtomicI32::new(0);

#[cfg(unix)]
const HANDLED: [(libc::c_int, &str); 3] = [(libc::SIGINT, "SIGINT"), (libc::SIGTERM, "SIGTERM"), (libc::SIGHUP, "SIGHUP")];

#[cfg(unix)]
extern "C" fn on_signal(signal: libc::c_int) {
    let _ = SIGNAL.compare_exchange(0, signal, Ordering::SeqCst, Ordering::SeqCst);
    if INTERRUPTED.swap(true, Ordering::SeqCst) {
        fleetkit::kill_live_groups();
        // SAFETY: _exit is async-signal-safe
        unsafe { libc::_exit(128 + signal) };
    }
}

/// Install the handler for every termination signal
pub fn install() {
    #[cfg(unix)]
    {
        let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        for (signal, name) in HANDLED {
            // SAFETY: the handler only touches atomics, kill(2) and _exit
            let previous = unsafe { libc::signal(signal, handler) };
            if previous == libc::SIG_ERR {
                log::warn!("could not install {name} handler; it will exit without cleanup");
            }
        }
    }
}

/// Cancellation token tied to the termination signals
pub fn token() -> CancelToken {
    CancelToken::linked_to(&INTERRUPTED)
}

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Conventional `128 + signal` status for the signal that stopped the run
pub fn exit_code() -> i32 {
    match SIGNAL.load(Ordering::SeqCst) {
        0 => EXIT_INTERRUPTED,
        signal => 128 + signal,
    }
}
