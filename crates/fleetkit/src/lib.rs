//! # Fleetkit
//!
//! Concurrent operation engine for administering a fleet of tunnel endpoints.
//!
//! The crate has no terminal UI and no knowledge of a particular service
//! supervisor or config layout; callers plug those in through traits.
//!
//! ## Engines
//!
//! - **Executor**: runs a batch of [`WorkUnit`]s with at most `max_parallel`
//!   in flight. Continue-on-error: every unit yields exactly one
//!   [`UnitResult`] and failures never abort the batch.
//! - **TransactionManager**: stages a [`Mutation`] over every file a
//!   [`Filter`] selects, validates all of them, then commits all or none.
//! - **StaleCache**: serves cached payloads immediately and refreshes stale
//!   ones in the background, one refresh per key at a time.
//!
//! ## Example
//!
//! ```ignore
//! use fleetkit::{Executor, NoProgress, Operation, TcpProbe, WorkUnit};
//! use std::time::Duration;
//!
//! let units = WorkUnit::batch(
//!     ["10.0.0.1:7000", "10.0.0.2:7000"],
//!     Operation::Probe,
//!     Duration::from_secs(1),
//! );
//! let report = Executor::new(20).run_batch(&units, &TcpProbe, &mut NoProgress)?;
//! println!("Reachable: {} | Unreachable: {}", report.succeeded, report.failed);
//! ```
//!
//! ## Provider Traits
//!
//! - [`UnitRunner`]: executes one unit (closures work too)
//! - [`BatchObserver`]: receives batch progress
//! - [`ConfigStore`], [`Validator`], [`Backup`], [`Index`]: transaction collaborators
//!
//! Only infrastructure problems surface as [`Error`]; unit and validation
//! failures are data.

pub mod atomic;
pub mod cache;
pub mod cancel;
pub mod error;
pub mod executor;
pub mod filter;
pub mod mutation;
pub mod probe;
pub mod process;
pub mod runner;
pub mod transaction;
pub mod unit;

// Re-export main types at crate root
pub use cache::{Lookup, StaleCache};
pub use cancel::CancelToken;
pub use error::{Error, Result};
pub use executor::{BatchObserver, DEFAULT_POLL_INTERVAL, Executor, NoProgress, PROBE_PARALLELISM, SERVICE_PARALLELISM};
pub use filter::{ConfigKind, Filter, ServiceState, glob_match};
pub use mutation::Mutation;
pub use probe::{DEFAULT_PROBE_TIMEOUT, TcpProbe};
pub use process::{ProcessOutcome, kill_live_groups, run_with_timeout};
pub use runner::{CommandRunner, UnitRunner};
pub use transaction::{
    Backup, ConfigStore, Endpoint, Index, Preview, StagedChange, Transaction, TransactionManager, TransactionPlan,
    TransactionResult, Validation, ValidationState, Validator,
};
pub use unit::{BatchReport, Operation, UnitOutcome, UnitResult, UnitStatus, WorkUnit};
