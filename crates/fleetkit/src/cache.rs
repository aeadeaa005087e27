//! Stale-while-revalidate cache.
//!
//! Readers always get an answer right away: the cached payload, marked stale
//! once it is older than the TTL. The first stale read starts one background
//! refresh for that key; later reads keep getting the stale payload until the
//! refresh swaps a new one in. Only a cold key (nothing cached, nothing on
//! disk) is computed synchronously.
//!
//! Payloads are mirrored to `<dir>/<key>.json` so the next process can start
//! warm while the file is still within the TTL.

use crate::atomic::write_atomic;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::fs;
use std::io::ErrorKind;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Answer to a [`StaleCache::get`]
#[derive(Debug, Clone)]
pub struct Lookup<T> {
    pub payload: T,
    /// Older than the TTL; a refresh is in flight or about to land
    pub stale: bool,
    pub generated_at: DateTime<Utc>,
}

/// On-disk mirror of an entry
#[derive(Serialize, Deserialize)]
struct SideFile<T> {
    payload: T,
    generated_at: DateTime<Utc>,
    ttl_seconds: u64,
}

struct Entry<T> {
    payload: Option<(T, DateTime<Utc>)>,
    /// At most one refresh per key; guarded by the entries mutex
    refreshing: bool,
}

impl<T> Default for Entry<T> {
    fn default() -> Self {
        Self {
            payload: None,
            refreshing: false,
        }
    }
}

type ComputeFn<T> = dyn Fn(&str) -> std::result::Result<T, String> + Send + Sync;

struct Shared<T> {
    entries: Mutex<HashMap<String, Entry<T>>>,
    idle: Condvar,
    compute: Box<ComputeFn<T>>,
    ttl: Duration,
    side_dir: Option<PathBuf>,
}

/// Keyed stale-while-revalidate cache. Cheap to clone; clones share state.
pub struct StaleCache<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for StaleCache<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> StaleCache<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    /// `compute` builds the payload for a key; `side_dir` enables the on-disk mirror.
    pub fn new<F, E>(ttl: Duration, side_dir: Option<PathBuf>, compute: F) -> Self
    where
        F: Fn(&str) -> std::result::Result<T, E> + Send + Sync + 'static,
        E: Display,
    {
        Self {
            shared: Arc::new(Shared {
                entries: Mutex::new(HashMap::new()),
                idle: Condvar::new(),
                compute: Box::new(move |key| compute(key).map_err(|e| e.to_string())),
                ttl,
                side_dir,
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.shared.ttl
    }

    /// Return the cached payload for `key` without waiting on a refresh.
    ///
    /// Errors only when a cold key fails to compute or its side file cannot
    /// be read at all.
    pub fn get(&self, key: &str) -> Result<Lookup<T>> {
        self.ensure_loaded(key)?;

        let mut entries = self.shared.lock();
        let entry = entries.entry(key.to_string()).or_default();

        if let Some((payload, generated_at)) = &entry.payload {
            let stale = self.shared.is_stale(*generated_at);
            let lookup = Lookup {
                payload: payload.clone(),
                stale,
                generated_at: *generated_at,
            };
            if stale && !entry.refreshing {
                entry.refreshing = true;
                drop(entries);
                self.spawn_refresh(key);
            }
            return Ok(lookup);
        }

        // Cold: nothing stale to hand out, so compute in the foreground
        let mut entries = self.shared.wait_idle(entries, key);
        let entry = entries.entry(key.to_string()).or_default();
        if let Some((payload, generated_at)) = &entry.payload {
            return Ok(Lookup {
                payload: payload.clone(),
                stale: self.shared.is_stale(*generated_at),
                generated_at: *generated_at,
            });
        }
        entry.refreshing = true;
        drop(entries);

        log::debug!("cold compute for '{key}'");
        self.shared.recompute(key)
    }

    /// Recompute `key` now, waiting for any background refresh to land first
    pub fn force_refresh(&self, key: &str) -> Result<Lookup<T>> {
        let entries = self.shared.lock();
        let mut entries = self.shared.wait_idle(entries, key);
        entries.entry(key.to_string()).or_default().refreshing = true;
        drop(entries);

        log::debug!("forced refresh for '{key}'");
        self.shared.recompute(key)
    }

    pub fn is_refreshing(&self, key: &str) -> bool {
        self.shared.lock().get(key).is_some_and(|e| e.refreshing)
    }

    /// Wait up to `timeout` for all in-flight refreshes to finish.
    ///
    /// Returns `false` if one is still running.
    pub fn settle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut entries = self.shared.lock();
        loop {
            if !entries.values().any(|e| e.refreshing) {
                return true;
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()).filter(|d| !d.is_zero()) else {
                return false;
            };
            entries = self
                .shared
                .idle
                .wait_timeout(entries, remaining)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    fn ensure_loaded(&self, key: &str) -> Result<()> {
        if self.shared.lock().contains_key(key) {
            return Ok(());
        }

        let loaded = self.shared.load_side_file(key)?;
        let mut entries = self.shared.lock();
        let entry = entries.entry(key.to_string()).or_default();
        if entry.payload.is_none() {
            entry.payload = loaded;
        }
        Ok(())
    }

    fn spawn_refresh(&self, key: &str) {
        let shared = Arc::clone(&self.shared);
        let owned = key.to_string();
        let spawned = thread::Builder::new()
            .name(format!("cache-refresh-{key}"))
            .spawn(move || {
                if let Err(e) = shared.recompute(&owned) {
                    log::warn!("{e}; keeping the previous payload");
                }
            });

        if let Err(e) = spawned {
            log::warn!("could not start background refresh for '{key}': {e}");
            let mut entries = self.shared.lock();
            if let Some(entry) = entries.get_mut(key) {
                entry.refreshing = false;
            }
            self.shared.idle.notify_all();
        }
    }
}

impl<T> Shared<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_idle<'g>(
        &self,
        guard: MutexGuard<'g, HashMap<String, Entry<T>>>,
        key: &str,
    ) -> MutexGuard<'g, HashMap<String, Entry<T>>> {
        self.idle
            .wait_while(guard, |entries| entries.get(key).is_some_and(|e| e.refreshing))
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// A timestamp ahead of the clock (skew, a step back) counts as stale
    fn is_stale(&self, generated_at: DateTime<Utc>) -> bool {
        Utc::now()
            .signed_duration_since(generated_at)
            .to_std()
            .map_or(true, |age| age >= self.ttl)
    }

    /// Compute, swap in and mirror to disk. The caller must have set `refreshing`,
    /// which stays set until the side file is written.
    fn recompute(&self, key: &str) -> Result<Lookup<T>> {
        let computed = panic::catch_unwind(AssertUnwindSafe(|| (self.compute)(key)))
            .unwrap_or_else(|_| Err("compute panicked".to_string()));
        let generated_at = Utc::now();

        let result = match computed {
            Ok(payload) => {
                self.lock().entry(key.to_string()).or_default().payload = Some((payload.clone(), generated_at));
                log::debug!("cache '{key}' refreshed");
                self.store_side_file(key, &payload, generated_at);
                Ok(Lookup {
                    payload,
                    stale: false,
                    generated_at,
                })
            }
            Err(message) => Err(Error::Compute {
                key: key.to_string(),
                message,
            }),
        };

        self.lock().entry(key.to_string()).or_default().refreshing = false;
        self.idle.notify_all();
        result
    }

    /// `<dir>/<key>.json`; keys that need sanitising get a hash suffix so
    /// `a/b` and `a_b` do not share a file.
    fn side_path(&self, key: &str) -> Option<PathBuf> {
        let mut name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        if name != key {
            let hash = blake3::hash(key.as_bytes()).to_hex();
            name = format!("{name}-{}", &hash[..8]);
        }
        self.side_dir.as_ref().map(|dir| dir.join(format!("{name}.json")))
    }

    fn load_side_file(&self, key: &str) -> Result<Option<(T, DateTime<Utc>)>> {
        let Some(path) = self.side_path(key) else {
            return Ok(None);
        };

        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(Error::CacheFile { path, source }),
        };

        match serde_json::from_str::<SideFile<T>>(&text) {
            Ok(file) if !self.is_stale(file.generated_at) => {
                log::debug!("warm start for '{key}' from {}", path.display());
                Ok(Some((file.payload, file.generated_at)))
            }
            Ok(_) => {
                log::debug!("side file {} is past its TTL", path.display());
                Ok(None)
            }
            Err(e) => {
                log::warn!("ignoring corrupt cache file {}: {e}", path.display());
                Ok(None)
            }
        }
    }

    fn store_side_file(&self, key: &str, payload: &T, generated_at: DateTime<Utc>) {
        let Some(path) = self.side_path(key) else {
            return;
        };

        let file = SideFile {
            payload,
            generated_at,
            ttl_seconds: self.ttl.as_secs(),
        };

        let written = serde_json::to_vec_pretty(&file)
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).map_err(|e| e.to_string())?;
                }
                write_atomic(&path, &bytes).map_err(|e| e.to_string())
            });

        if let Err(e) = written {
            log::warn!("could not write cache file {}: {e}", path.display());
        }
    }
}
