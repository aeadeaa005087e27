//! Atomic multi-file config transactions.
//!
//! A [`Transaction`] stages every mutated body in a private scratch
//! directory and validates all of them before deciding anything. Commit runs
//! only when every staged file is valid: each original is backed up and then
//! replaced atomically. Otherwise the scratch copies are discarded and no
//! original is touched. Partial success is not a possible outcome.
//!
//! This is the opposite of the executor's continue-on-error semantics.

use crate::atomic::write_atomic;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::mutation::Mutation;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Where config files live.
pub trait ConfigStore: Send + Sync {
    /// Paths selected by `filter`, in a stable order
    fn resolve(&self, filter: &Filter) -> Result<Vec<PathBuf>>;

    fn read(&self, path: &Path) -> Result<String>;

    /// Only used to stage scratch copies; originals are replaced by the
    /// transaction with the body read back from scratch
    fn write(&self, path: &Path, body: &str) -> Result<()>;
}

/// Outcome of validating one config body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validation {
    pub errors: Vec<String>,
}

impl Validation {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn from_errors(errors: Vec<String>) -> Self {
        Self { errors }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Checks a config body. Must report every problem, not just the first.
pub trait Validator: Send + Sync {
    fn validate(&self, body: &str) -> Validation;
}

/// Takes a timestamped copy of a file right before it is replaced.
pub trait Backup: Send + Sync {
    fn backup(&self, path: &Path) -> Result<PathBuf>;
}

/// Address a client config connects to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Metadata index over config files.
pub trait Index: Send + Sync {
    /// Server endpoint a config connects to, `None` for server configs
    fn resolve_endpoint(&self, config: &Path) -> Result<Option<Endpoint>>;

    /// Refresh the entry for a file after it changed
    fn reindex(&self, path: &Path) -> Result<()>;
}

/// A proposed mutation over the files a filter selects
#[derive(Debug, Clone)]
pub struct TransactionPlan {
    pub filter: Filter,
    pub mutation: Mutation,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationState {
    Pending,
    Valid,
    Invalid(String),
}

/// One file under transaction. Never outlives the transaction.
#[derive(Debug)]
pub struct StagedChange {
    pub original_path: PathBuf,
    /// `None` when the mutation could not be applied to the original
    pub scratch_path: Option<PathBuf>,
    pub original_hash: blake3::Hash,
    pub validation: ValidationState,
    /// Set once the commit phase has backed the original up
    pub backup_path: Option<PathBuf>,
    pub before: String,
    pub after: Option<String>,
}

impl StagedChange {
    /// Whether committing would alter the file
    pub fn is_change(&self) -> bool {
        self.after.as_deref().is_some_and(|after| after != self.before)
    }
}

/// Before/after bodies of a file a commit would change
#[derive(Debug, Clone)]
pub struct Preview {
    pub path: PathBuf,
    pub before: String,
    pub after: String,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionResult {
    pub committed: bool,
    /// Dry run: nothing was committed, nothing was meant to be
    pub preview: bool,
    pub changed_files: Vec<PathBuf>,
    pub validation_errors: Vec<(PathBuf, String)>,
    pub previews: Vec<Preview>,
    pub backups: Vec<PathBuf>,
    /// Index updates that failed after a successful replace
    pub index_warnings: Vec<(PathBuf, String)>,
}

impl TransactionResult {
    pub fn is_success(&self) -> bool {
        self.committed || (self.preview && self.validation_errors.is_empty())
    }

    pub fn exit_code(&self) -> i32 {
        i32::from(!self.is_success())
    }
}

/// Runs transactions against a set of collaborators.
pub struct TransactionManager<'a> {
    store: &'a dyn ConfigStore,
    validator: &'a dyn Validator,
    backup: &'a dyn Backup,
    index: &'a dyn Index,
    cancel: CancelToken,
}

impl<'a> TransactionManager<'a> {
    pub fn new(
        store: &'a dyn ConfigStore,
        validator: &'a dyn Validator,
        backup: &'a dyn Backup,
        index: &'a dyn Index,
    ) -> Self {
        Self {
            store,
            validator,
            backup,
            index,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Open a transaction with its own scratch directory
    pub fn begin(&self, plan: &TransactionPlan) -> Result<Transaction<'_>> {
        let scratch = tempfile::Builder::new()
            .prefix("fleetkit-tx-")
            .tempdir()
            .map_err(|source| Error::ScratchDir { source })?;

        log::debug!("transaction scratch at {}", scratch.path().display());

        Ok(Transaction {
            manager: self,
            plan: plan.clone(),
            scratch,
            changes: Vec::new(),
            prepared: false,
        })
    }

    /// Prepare, then preview, roll back or commit depending on the plan and
    /// the validation outcome.
    pub fn apply(&self, plan: &TransactionPlan) -> Result<TransactionResult> {
        let mut tx = self.begin(plan)?;
        tx.prepare()?;

        if plan.dry_run {
            return Ok(tx.preview());
        }
        if !tx.all_valid() {
            return Ok(tx.rollback());
        }
        tx.commit()
    }
}

/// A single prepare/commit/rollback cycle.
///
/// Dropping a transaction without committing discards its scratch directory.
pub struct Transaction<'m> {
    manager: &'m TransactionManager<'m>,
    plan: TransactionPlan,
    scratch: TempDir,
    changes: Vec<StagedChange>,
    prepared: bool,
}

impl Transaction<'_> {
    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    pub fn changes(&self) -> &[StagedChange] {
        &self.changes
    }

    /// Every staged file validated successfully (vacuously true when nothing was selected)
    pub fn all_valid(&self) -> bool {
        self.changes.iter().all(|c| c.validation == ValidationState::Valid)
    }

    pub fn validation_errors(&self) -> Vec<(PathBuf, String)> {
        self.changes
            .iter()
            .filter_map(|c| match &c.validation {
                ValidationState::Invalid(reason) => Some((c.original_path.clone(), reason.clone())),
                _ => None,
            })
            .collect()
    }

    /// Stage and validate every selected file. Mutates nothing outside the scratch directory.
    pub fn prepare(&mut self) -> Result<()> {
        if self.manager.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let store = self.manager.store;
        let paths = store.resolve(&self.plan.filter)?;
        log::debug!("prepare: {} file(s) selected by '{}'", paths.len(), self.plan.filter);

        self.changes.clear();
        for (i, path) in paths.into_iter().enumerate() {
            let before = store.read(&path)?;
            let original_hash = blake3::hash(before.as_bytes());

            let change = match self.plan.mutation.apply(&before) {
                Ok(after) => {
                    let name = path.file_name().map_or_else(|| "config".into(), |n| n.to_string_lossy().to_string());
                    let scratch_path = self.scratch.path().join(format!("{i:03}-{name}"));
                    store.write(&scratch_path, &after)?;
                    // Validate what actually landed in scratch, not the in-memory body
                    let staged = store.read(&scratch_path)?;
                    StagedChange {
                        original_path: path,
                        scratch_path: Some(scratch_path),
                        original_hash,
                        validation: ValidationState::Pending,
                        backup_path: None,
                        before,
                        after: Some(staged),
                    }
                }
                Err(reason) => StagedChange {
                    original_path: path,
                    scratch_path: None,
                    original_hash,
                    validation: ValidationState::Invalid(reason),
                    backup_path: None,
                    before,
                    after: None,
                },
            };
            self.changes.push(change);
        }

        let validator = self.manager.validator;
        self.changes
            .par_iter_mut()
            .filter(|c| c.validation == ValidationState::Pending)
            .for_each(|change| {
                let body = change.after.as_deref().unwrap_or_default();
                let validation = validator.validate(body);
                change.validation = if validation.is_ok() {
                    ValidationState::Valid
                } else {
                    ValidationState::Invalid(validation.errors.join("; "))
                };
            });

        self.prepared = true;
        let invalid = self.changes.iter().filter(|c| c.validation != ValidationState::Valid).count();
        log::debug!("prepare: {} staged, {invalid} invalid", self.changes.len());
        Ok(())
    }

    /// Describe what a commit would do and discard the scratch copies
    pub fn preview(self) -> TransactionResult {
        let validation_errors = self.validation_errors();
        let previews = self
            .changes
            .iter()
            .filter(|c| c.is_change())
            .map(|c| Preview {
                path: c.original_path.clone(),
                before: c.before.clone(),
                after: c.after.clone().unwrap_or_default(),
            })
            .collect();

        log::info!("dry run: {} file(s) would change", self.changes.iter().filter(|c| c.is_change()).count());
        self.discard();

        TransactionResult {
            preview: true,
            validation_errors,
            previews,
            ..TransactionResult::default()
        }
    }

    /// Discard every scratch copy; originals stay untouched
    pub fn rollback(self) -> TransactionResult {
        let validation_errors = self.validation_errors();
        log::info!(
            "rolled back: {} of {} file(s) failed validation",
            validation_errors.len(),
            self.changes.len()
        );
        self.discard();

        TransactionResult {
            validation_errors,
            ..TransactionResult::default()
        }
    }

    /// Back up and replace every changed original.
    ///
    /// Falls back to [`Transaction::rollback`] or [`Transaction::preview`]
    /// when the plan is a dry run or a file is invalid. Once the first
    /// replace happens the commit is not interrupted by cancellation; if a
    /// backup or replace fails, files already replaced are restored from
    /// their original bodies and [`Error::CommitFailed`] is returned.
    pub fn commit(mut self) -> Result<TransactionResult> {
        if !self.prepared {
            self.prepare()?;
        }
        if self.plan.dry_run {
            return Ok(self.preview());
        }
        if !self.all_valid() {
            return Ok(self.rollback());
        }
        if self.manager.cancel.is_cancelled() {
            log::warn!("transaction cancelled before commit, nothing changed");
            return Err(Error::Cancelled);
        }

        let store = self.manager.store;
        for change in self.changes.iter().filter(|c| c.is_change()) {
            let current = store.read(&change.original_path)?;
            if blake3::hash(current.as_bytes()) != change.original_hash {
                return Err(Error::ConcurrentModification(change.original_path.clone()));
            }
        }

        let mut replaced: Vec<usize> = Vec::new();
        for i in 0..self.changes.len() {
            if !self.changes[i].is_change() {
                continue;
            }
            if let Err(e) = self.replace(i) {
                let path = self.changes[i].original_path.clone();
                let restored = self.restore(&replaced);
                log::error!("commit failed on {}: {e}", path.display());
                return Err(Error::CommitFailed {
                    path,
                    message: e.to_string(),
                    restored,
                });
            }
            replaced.push(i);
        }

        let mut index_warnings = Vec::new();
        for &i in &replaced {
            let path = &self.changes[i].original_path;
            if let Err(e) = self.manager.index.reindex(path) {
                log::warn!("index update failed for {}: {e}", path.display());
                index_warnings.push((path.clone(), e.to_string()));
            }
        }

        let changed_files: Vec<PathBuf> = replaced.iter().map(|&i| self.changes[i].original_path.clone()).collect();
        let backups: Vec<PathBuf> = replaced.iter().filter_map(|&i| self.changes[i].backup_path.clone()).collect();
        log::info!("committed {} file(s)", changed_files.len());
        self.discard();

        Ok(TransactionResult {
            committed: true,
            changed_files,
            backups,
            index_warnings,
            ..TransactionResult::default()
        })
    }

    /// Promote the scratch copy over the original. The scratch body must
    /// still be the one that was validated.
    fn replace(&mut self, i: usize) -> Result<()> {
        let store = self.manager.store;
        let change = &self.changes[i];
        let scratch_path = change
            .scratch_path
            .clone()
            .ok_or_else(|| Error::ConcurrentModification(change.original_path.clone()))?;
        let staged = store.read(&scratch_path)?;
        if Some(staged.as_str()) != change.after.as_deref() {
            return Err(Error::ConcurrentModification(scratch_path));
        }

        let backup_path = self.manager.backup.backup(&change.original_path)?;
        let change = &mut self.changes[i];
        change.backup_path = Some(backup_path);

        write_atomic(&change.original_path, staged.as_bytes()).map_err(|e| Error::io(&change.original_path, e))
    }

    fn restore(&self, replaced: &[usize]) -> usize {
        let mut restored = 0;
        for &i in replaced {
            let change = &self.changes[i];
            match write_atomic(&change.original_path, change.before.as_bytes()) {
                Ok(()) => restored += 1,
                Err(e) => log::error!("could not restore {}: {e}", change.original_path.display()),
            }
        }
        restored
    }

    fn discard(self) {
        let path = self.scratch.path().to_path_buf();
        if let Err(e) = self.scratch.close() {
            log::warn!("could not remove scratch directory {}: {e}", path.display());
        }
    }
}
