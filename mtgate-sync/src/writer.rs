//! Backup-then-overwrite artifact writer.
//!
//! ## `commit` protocol
//!
//! 1. Normalise line endings to LF.
//! 2. Read the current file; identical content is left alone.
//! 3. Write the new content to `<path>.mtgate.tmp`.
//! 4. Copy the current file to `<path>.backup`, replacing any older backup.
//! 5. Rename the temp file over the destination (atomic on POSIX).
//!
//! A failure at any step is a [`SyncError::PersistenceFailure`] for that
//! path. The temp file is removed on failure; the destination is untouched.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{io_err, SyncError};

// ---------------------------------------------------------------------------
// Write result
// ---------------------------------------------------------------------------

/// Outcome of committing a single artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// Content was written. `backup` holds the previous content, if there was
    /// a previous file.
    Written {
        path: PathBuf,
        backup: Option<PathBuf>,
    },
    /// The file on disk already has this content, or is create-only and exists.
    Unchanged { path: PathBuf },
    /// `--dry-run`: the file *would* have been written.
    WouldWrite { path: PathBuf },
}

impl WriteResult {
    pub fn path(&self) -> &Path {
        match self {
            WriteResult::Written { path, .. }
            | WriteResult::Unchanged { path }
            | WriteResult::WouldWrite { path } => path,
        }
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, WriteResult::Unchanged { .. })
    }
}

/// `<path>.backup`, the single-slot copy of the previously committed content.
pub fn backup_path(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.backup", path.display()))
}

fn tmp_path(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.mtgate.tmp", path.display()))
}

pub(crate) fn normalize_line_endings(content: &str) -> String {
    content.replace("\r\n", "\n")
}

/// Current content of `path`, `None` when it does not exist.
pub(crate) fn read_current(path: &Path) -> Result<Option<String>, SyncError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(normalize_line_endings(&content))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(path, e)),
    }
}

// ---------------------------------------------------------------------------
// commit
// ---------------------------------------------------------------------------

/// Persists `content` at `path`, keeping the previous version as a backup.
pub fn commit(path: &Path, content: &str, dry_run: bool) -> Result<WriteResult, SyncError> {
    commit_with_tmp(path, content, dry_run, &tmp_path(path))
}

fn commit_with_tmp(
    path: &Path,
    content: &str,
    dry_run: bool,
    tmp: &Path,
) -> Result<WriteResult, SyncError> {
    let content = normalize_line_endings(content);
    let current = read_current(path)?;

    if current.as_deref() == Some(content.as_str()) {
        tracing::debug!("unchanged: {}", path.display());
        return Ok(WriteResult::Unchanged {
            path: path.to_path_buf(),
        });
    }

    if dry_run {
        tracing::info!("[dry-run] would write: {}", path.display());
        return Ok(WriteResult::WouldWrite {
            path: path.to_path_buf(),
        });
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    if let Some(tmp_parent) = tmp.parent() {
        fs::create_dir_all(tmp_parent).map_err(|e| io_err(tmp_parent, e))?;
    }
    fs::write(tmp, &content).map_err(|e| io_err(tmp, e))?;

    let backup = match current {
        Some(_) => {
            let backup = backup_path(path);
            if let Err(e) = fs::copy(path, &backup) {
                let _ = fs::remove_file(tmp);
                return Err(io_err(&backup, e));
            }
            Some(backup)
        }
        None => None,
    };

    if let Err(e) = fs::rename(tmp, path) {
        let _ = fs::remove_file(tmp);
        return Err(io_err(path, e));
    }

    tracing::info!("wrote: {}", path.display());
    Ok(WriteResult::Written {
        path: path.to_path_buf(),
        backup,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn first_write_has_no_backup() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("stream.conf");
        let result = commit(&path, "hello", false).expect("commit");
        assert_eq!(
            result,
            WriteResult::Written {
                path: path.clone(),
                backup: None
            }
        );
        assert!(path.exists());
        assert!(!backup_path(&path).exists());
    }

    #[test]
    fn same_content_is_unchanged_and_not_backed_up() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("config.py");
        commit(&path, "same content", false).expect("first");
        let result = commit(&path, "same content", false).expect("second");
        assert!(matches!(result, WriteResult::Unchanged { .. }));
        assert!(!backup_path(&path).exists());
    }

    #[test]
    fn overwrite_keeps_previous_content_as_backup() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("config.py");
        commit(&path, "v1", false).expect("v1");
        let result = commit(&path, "v2", false).expect("v2");
        let backup = backup_path(&path);
        assert_eq!(
            result,
            WriteResult::Written {
                path: path.clone(),
                backup: Some(backup.clone())
            }
        );
        assert_eq!(fs::read_to_string(&path).expect("read"), "v2");
        assert_eq!(fs::read_to_string(&backup).expect("read backup"), "v1");
    }

    #[test]
    fn backup_holds_only_the_previous_commit() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("80.conf");
        for content in ["v1", "v2", "v3"] {
            commit(&path, content, false).expect("commit");
        }
        assert_eq!(fs::read_to_string(backup_path(&path)).expect("read"), "v2");
    }

    #[test]
    fn dry_run_does_not_touch_disk() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("nope.conf");
        let result = commit(&path, "content", true).expect("commit");
        assert!(matches!(result, WriteResult::WouldWrite { .. }));
        assert!(!path.exists(), "dry-run must not create files");
    }

    #[test]
    fn tmp_file_removed_after_write() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("clean.conf");
        commit(&path, "data", false).expect("commit");
        assert!(!tmp_path(&path).exists(), ".mtgate.tmp must be cleaned up");
    }

    #[test]
    fn creates_parent_directories() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp
            .path()
            .join("edge")
            .join("sites-available")
            .join("p.example.com");
        commit(&path, "content", false).expect("commit");
        assert!(path.exists());
    }

    #[test]
    fn crlf_and_lf_content_compare_equal() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("normalize.conf");

        let first = commit(&path, "line1\r\nline2\r\n", false).expect("first");
        assert!(first.is_change());

        let second = commit(&path, "line1\nline2\n", false).expect("second");
        assert!(!second.is_change());

        assert_eq!(fs::read_to_string(&path).expect("read"), "line1\nline2\n");
    }

    #[test]
    fn directory_in_the_way_is_a_persistence_failure() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("stream.conf");
        fs::create_dir_all(&path).expect("mkdir");
        let err = commit(&path, "content", false).expect_err("must fail");
        assert!(matches!(err, SyncError::PersistenceFailure { .. }));
        assert_eq!(err.path(), Some(path.as_path()));
    }

    #[test]
    #[cfg(unix)]
    fn failed_commit_leaves_original_and_cleans_tmp() {
        use std::os::unix::fs::PermissionsExt;

        let root = TempDir::new().expect("tempdir");
        let readonly_dir = root.path().join("readonly");
        fs::create_dir_all(&readonly_dir).expect("mkdir");

        let path = readonly_dir.join("config.py");
        fs::write(&path, "original").expect("write");

        let mut perms = fs::metadata(&readonly_dir).expect("meta").permissions();
        perms.set_mode(0o555);
        fs::set_permissions(&readonly_dir, perms).expect("chmod");

        // Privileged users ignore directory permissions.
        let canary = readonly_dir.join("canary");
        let writable = fs::write(&canary, "").is_ok();

        let tmp_dir = TempDir::new().expect("tempdir");
        let tmp = tmp_dir.path().join("config.py.mtgate.tmp");

        if !writable {
            let err = commit_with_tmp(&path, "new content", false, &tmp)
                .expect_err("commit should fail on readonly dir");
            assert!(matches!(err, SyncError::PersistenceFailure { .. }));
            assert_eq!(fs::read_to_string(&path).expect("read"), "original");
            assert!(!tmp.exists(), ".mtgate.tmp should be cleaned up");
        }

        let mut perms = fs::metadata(&readonly_dir).expect("meta").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&readonly_dir, perms).expect("chmod");
    }
}
