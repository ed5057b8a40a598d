//! Crash- and race-safe replacement of a lock artifact.
//!
//! Writers serialize on `<artifact>.lock`, write a temp file in the target's
//! directory, fsync it, and rename it over the target. Readers never lock:
//! rename is atomic on POSIX filesystems, so they see the whole old file or the
//! whole new one. Filesystems without atomic rename (some network mounts) do
//! not get that guarantee.
mod lock;

pub use lock::{LockError, LockGuard, PlatformLock};

use lock::{acquire, platform_lock};

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Writer bound to a lock wait budget.
#[derive(Debug, Clone)]
pub struct AtomicWriter {
    lock_timeout: Duration,
}

/// Exclusive right to replace one target file.
#[derive(Debug)]
pub struct WriteGuard {
    target: PathBuf,
    _lock: LockGuard<PlatformLock>,
}

impl AtomicWriter {
    pub fn new(lock_timeout: Duration) -> Self {
        Self { lock_timeout }
    }

    /// Take the write lock for `target`, waiting at most the configured timeout.
    pub fn lock(&self, target: &Path) -> Result<WriteGuard, LockError> {
        let lock_path = lock_path_for(target);
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).map_err(|source| LockError::Io {
                path: lock_path.clone(),
                source,
            })?;
        }
        let guard = acquire(
            platform_lock(lock_path.clone()),
            &lock_path,
            self.lock_timeout,
        )?;
        Ok(WriteGuard {
            target: target.to_path_buf(),
            _lock: guard,
        })
    }

    /// Lock, replace, unlock.
    pub fn write(&self, target: &Path, content: &str) -> Result<()> {
        let guard = self.lock(target)?;
        guard.commit(content)
    }
}

impl WriteGuard {
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Atomically replace the target with `content`.
    pub fn commit(&self, content: &str) -> Result<()> {
        replace_file(&self.target, content.as_bytes())
    }
}

/// Sibling lock file for `target` (`base.txt` -> `base.txt.lock`).
pub fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "artifact".into());
    name.push(".lock");
    target.with_file_name(name)
}

fn replace_file(target: &Path, bytes: &[u8]) -> Result<()> {
    let parent = target
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    let file_name = target
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("target has no file name: {}", target.display()))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{file_name}."))
        .suffix(".tmp")
        .tempfile_in(parent)
        .with_context(|| format!("create temp file in {}", parent.display()))?;
    tmp.write_all(bytes)
        .with_context(|| format!("write temp file for {}", target.display()))?;
    tmp.flush()
        .with_context(|| format!("flush temp file for {}", target.display()))?;
    copy_permissions(target, tmp.as_file())?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("sync temp file for {}", target.display()))?;
    tmp.persist(target)
        .map_err(|err| err.error)
        .with_context(|| format!("publish {}", target.display()))?;
    sync_dir(parent)?;
    tracing::debug!(path = %target.display(), bytes = bytes.len(), "artifact replaced");
    Ok(())
}

/// Keep the target's mode; new files get 0644 instead of the temp file's 0600.
fn copy_permissions(target: &Path, tmp: &fs::File) -> Result<()> {
    let permissions = match fs::metadata(target) {
        Ok(meta) => meta.permissions(),
        Err(_) => match default_permissions() {
            Some(permissions) => permissions,
            None => return Ok(()),
        },
    };
    tmp.set_permissions(permissions)
        .with_context(|| format!("set permissions for {}", target.display()))
}

#[cfg(unix)]
fn default_permissions() -> Option<fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn default_permissions() -> Option<fs::Permissions> {
    None
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    let handle = fs::File::open(dir).with_context(|| format!("open {}", dir.display()))?;
    handle
        .sync_all()
        .with_context(|| format!("sync {}", dir.display()))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
