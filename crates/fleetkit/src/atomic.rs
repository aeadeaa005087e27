//! Crash-safe file replacement

use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Replace `path` with `contents` so readers see either the old or the new file.
///
/// Writes a temp file in the same directory, fsyncs it, copies the permissions
/// of the file being replaced (if any) and renames it over `path`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let permissions = fs::metadata(path).ok().map(|m| m.permissions());

    let mut tmp = tempfile::Builder::new().prefix(".fleetkit-").tempfile_in(parent)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;

    if let Some(permissions) = permissions {
        tmp.as_file().set_permissions(permissions)?;
    }

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_creates_and_replaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("frpc.toml");

        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "two");

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".fleetkit-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_preserves_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("frps.toml");
        fs::write(&path, "bindPort = 7000").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();

        write_atomic(&path, b"bindPort = 7001").unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }

    #[test]
    fn test_missing_parent_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope").join("x.toml");
        assert!(write_atomic(&path, b"x").is_err());
    }
}
