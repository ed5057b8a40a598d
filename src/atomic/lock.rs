//! Advisory write locks.
//!
//! Core code talks to the [`Lock`] trait; the backend is picked per platform.
//! On unix the lock is `flock(LOCK_EX | LOCK_NB)` on a sibling lock file,
//! released by the kernel if the holder dies. Elsewhere the lock file itself
//! is the lock (exclusive create); a crashed holder leaves it behind and it
//! must be removed by hand.
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const POLL_START: Duration = Duration::from_millis(10);
const POLL_MAX: Duration = Duration::from_millis(100);

/// Minimal lock capability: a non-blocking attempt and an explicit release.
pub trait Lock {
    /// Returns `Ok(false)` when another holder owns the lock.
    fn try_acquire(&mut self) -> io::Result<bool>;
    fn release(&mut self) -> io::Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("write lock {} still held by another process after {:.1}s", path.display(), waited.as_secs_f64())]
    Contention { path: PathBuf, waited: Duration },
    #[error("write lock {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Exclusive `flock` on a lock file.
#[cfg(unix)]
#[derive(Debug)]
pub struct FlockLock {
    path: PathBuf,
    file: Option<File>,
}

#[cfg(unix)]
impl FlockLock {
    pub fn new(path: PathBuf) -> Self {
        Self { path, file: None }
    }
}

#[cfg(unix)]
impl Lock for FlockLock {
    fn try_acquire(&mut self) -> io::Result<bool> {
        use std::os::unix::io::AsRawFd;
        if self.file.is_some() {
            return Ok(true);
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        // SAFETY: fd belongs to `file`, which outlives the call.
        #[allow(unsafe_code)]
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            self.file = Some(file);
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK)
        {
            return Ok(false);
        }
        Err(err)
    }

    fn release(&mut self) -> io::Result<()> {
        use std::os::unix::io::AsRawFd;
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        // SAFETY: fd belongs to `file`, which is still open here.
        #[allow(unsafe_code)]
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Lock held by owning an exclusively created lock file.
#[cfg_attr(unix, allow(dead_code))]
#[derive(Debug)]
pub struct CreateLock {
    path: PathBuf,
    held: bool,
}

impl CreateLock {
    #[cfg_attr(unix, allow(dead_code))]
    pub fn new(path: PathBuf) -> Self {
        Self { path, held: false }
    }
}

impl Lock for CreateLock {
    fn try_acquire(&mut self) -> io::Result<bool> {
        if self.held {
            return Ok(true);
        }
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(_) => {
                self.held = true;
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn release(&mut self) -> io::Result<()> {
        if !self.held {
            return Ok(());
        }
        self.held = false;
        std::fs::remove_file(&self.path)
    }
}

#[cfg(unix)]
pub type PlatformLock = FlockLock;
#[cfg(not(unix))]
pub type PlatformLock = CreateLock;

/// The backend used for `lock_path` on this platform.
pub fn platform_lock(lock_path: PathBuf) -> PlatformLock {
    PlatformLock::new(lock_path)
}

/// Held lock; released when dropped, whatever the exit path.
#[derive(Debug)]
pub struct LockGuard<L: Lock> {
    lock: L,
    path: PathBuf,
}

impl<L: Lock> Drop for LockGuard<L> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.release() {
            tracing::warn!(path = %self.path.display(), error = %err, "release write lock failed");
        }
    }
}

/// Poll `lock` until acquired or `timeout` elapses.
pub fn acquire<L: Lock>(
    mut lock: L,
    path: &Path,
    timeout: Duration,
) -> Result<LockGuard<L>, LockError> {
    let start = Instant::now();
    let mut delay = POLL_START;
    loop {
        let acquired = lock.try_acquire().map_err(|source| LockError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if acquired {
            tracing::debug!(
                path = %path.display(),
                waited_ms = start.elapsed().as_millis() as u64,
                "write lock acquired"
            );
            return Ok(LockGuard {
                lock,
                path: path.to_path_buf(),
            });
        }
        let waited = start.elapsed();
        if waited >= timeout {
            return Err(LockError::Contention {
                path: path.to_path_buf(),
                waited,
            });
        }
        std::thread::sleep(delay.min(timeout - waited));
        delay = (delay * 2).min(POLL_MAX);
    }
}
