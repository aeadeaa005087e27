//! Centralized path resolution for moonfrp
//!
//! # Environment Variables
//!
//! - `MOONFRP_HOME` - Override the settings directory (holds `config.toml`)
//! - `MOONFRP_STATE_DIR` - Override the state directory (index, cache, backups)
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `MOONFRP_HOME` environment variable
//! 2. `XDG_CONFIG_HOME/moonfrp` (if set)
//! 3. `~/.config/moonfrp`
//!
//! For state_dir():
//! 1. `MOONFRP_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/moonfrp` (if set)
//! 3. `~/.local/state/moonfrp`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for settings directory override
pub const ENV_HOME: &str = "MOONFRP_HOME";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "MOONFRP_STATE_DIR";

const APP: &str = "moonfrp";

/// Get the moonfrp settings directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_HOME) {
        let path = expand(&dir);
        log::debug!("Using settings dir from {}: {}", ENV_HOME, path.display());
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join(APP);
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join(APP);
    log::debug!("Using default settings dir: {}", path.display());
    Ok(path)
}

/// Get the moonfrp state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join(APP);
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join(APP);
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// `config.toml` inside the settings directory
pub fn settings_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Directory holding cache side files
pub fn cache_dir(state: &Path) -> PathBuf {
    state.join("cache")
}

/// Metadata index file
pub fn index_file(state: &Path) -> PathBuf {
    state.join("index.json")
}

/// Default backup directory when settings don't name one
pub fn default_backup_dir(state: &Path) -> PathBuf {
    state.join("backups")
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, MutexGuard, PoisonError};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Serialises tests that touch process environment variables
    fn env_lock() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with `key` set (`Some`) or removed (`None`), restoring it afterwards
    fn with_env<F, R>(key: &str, value: Option<&str>, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let original = env::var(key).ok();
        // SAFETY: callers hold env_lock(), so no other test reads the environment concurrently
        match value {
            Some(v) => unsafe { env::set_var(key, v) },
            None => unsafe { env::remove_var(key) },
        }
        let result = f();
        match original {
            // SAFETY: as above
            Some(v) => unsafe { env::set_var(key, v) },
            None => unsafe { env::remove_var(key) },
        }
        result
    }

    #[test]
    fn test_config_dir_env_override() {
        let _guard = env_lock();
        with_env(ENV_HOME, Some("/custom/moonfrp"), || {
            assert_eq!(config_dir().unwrap(), PathBuf::from("/custom/moonfrp"));
        });
    }

    #[test]
    fn test_config_dir_env_override_with_tilde() {
        let _guard = env_lock();
        let home = dirs::home_dir().unwrap();
        with_env(ENV_HOME, Some("~/ops/moonfrp"), || {
            assert_eq!(config_dir().unwrap(), home.join("ops").join("moonfrp"));
        });
    }

    #[test]
    fn test_xdg_config_home() {
        let _guard = env_lock();
        with_env(ENV_HOME, None, || {
            with_env("XDG_CONFIG_HOME", Some("/tmp/xdg-config-test"), || {
                assert_eq!(config_dir().unwrap(), PathBuf::from("/tmp/xdg-config-test/moonfrp"));
            });
        });
    }

    #[test]
    fn test_state_dir_env_override() {
        let _guard = env_lock();
        with_env(ENV_STATE_DIR, Some("/var/lib/moonfrp"), || {
            assert_eq!(state_dir().unwrap(), PathBuf::from("/var/lib/moonfrp"));
        });
    }

    #[test]
    fn test_xdg_state_home() {
        let _guard = env_lock();
        with_env(ENV_STATE_DIR, None, || {
            with_env("XDG_STATE_HOME", Some("/tmp/xdg-state-test"), || {
                assert_eq!(state_dir().unwrap(), PathBuf::from("/tmp/xdg-state-test/moonfrp"));
            });
        });
    }

    #[cfg(unix)]
    #[test]
    fn test_default_state_dir_unix() {
        let _guard = env_lock();
        with_env(ENV_STATE_DIR, None, || {
            with_env("XDG_STATE_HOME", None, || {
                let home = dirs::home_dir().unwrap();
                assert_eq!(state_dir().unwrap(), home.join(".local").join("state").join("moonfrp"));
            });
        });
    }

    #[test]
    fn test_state_layout() {
        let state = Path::new("/state");
        assert_eq!(cache_dir(state), PathBuf::from("/state/cache"));
        assert_eq!(index_file(state), PathBuf::from("/state/index.json"));
        assert_eq!(default_backup_dir(state), PathBuf::from("/state/backups"));
    }

    #[test]
    fn test_expand_absolute() {
        assert_eq!(expand("/etc/frp"), PathBuf::from("/etc/frp"));
    }

    #[test]
    fn test_expand_unknown_env_var_unchanged() {
        let result = expand("/path/$NONEXISTENT_MOONFRP_VAR/file");
        assert_eq!(result, PathBuf::from("/path/$NONEXISTENT_MOONFRP_VAR/file"));
    }
}
