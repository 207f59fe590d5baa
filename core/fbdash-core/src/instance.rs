//! Single-instance guard per installation.
//!
//! # Lock File
//!
//! Location: `~/.fbdash/instances/{hash}.lock` where `{hash}` is MD5 of the
//! normalized install path. Two installs on one machine get different locks;
//! relaunching the same install collides with itself.
//!
//! The file holds the owner's PID for diagnostics only. Ownership is the OS
//! advisory lock on the open handle (`flock` on Unix, an exclusive share mode on
//! Windows), so a crashed or killed owner never leaves a stale lock behind.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{FarmError, Result};

/// Identifier derived from an installation path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceId(String);

impl InstanceId {
    /// Hashes the normalized install path.
    ///
    /// Separators are unified and trailing ones dropped; on Windows the path is
    /// case-folded because the filesystem is case-insensitive.
    pub fn from_install_path(path: &Path) -> Self {
        let normalized = normalize_install_path(&path.to_string_lossy());
        Self(format!("{:x}", md5::compute(normalized)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn lock_file_in(&self, lock_dir: &Path) -> PathBuf {
        lock_dir.join(format!("{}.lock", self.0))
    }
}

fn normalize_install_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let trimmed = unified.trim_end_matches('/');
    let trimmed = if trimmed.is_empty() { "/" } else { trimmed };
    if cfg!(windows) {
        trimmed.to_lowercase()
    } else {
        trimmed.to_string()
    }
}

/// Held single-instance lock. Released on [`release`](Self::release) or drop.
#[derive(Debug)]
pub struct InstanceGuard {
    id: InstanceId,
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl InstanceGuard {
    /// Tries to become the only holder of `id`.
    ///
    /// Returns `Ok(None)` when another process (or another guard in this
    /// process) already holds it.
    pub fn try_acquire(lock_dir: &Path, id: &InstanceId) -> Result<Option<Self>> {
        fs_err::create_dir_all(lock_dir)
            .map_err(|err| FarmError::io("creating instance lock directory", err))?;

        let path = id.lock_file_in(lock_dir);
        let mut file = match open_exclusive(&path) {
            Ok(Some(file)) => file,
            Ok(None) => {
                tracing::debug!(id = %id.as_str(), "Instance lock held elsewhere");
                return Ok(None);
            }
            Err(err) => {
                return Err(FarmError::io(
                    format!("opening instance lock {}", path.display()),
                    err,
                ))
            }
        };

        // Diagnostics only; ownership is the OS lock.
        let _ = file.set_len(0);
        let _ = writeln!(file, "{}", std::process::id());

        tracing::debug!(id = %id.as_str(), path = %path.display(), "Instance lock acquired");
        Ok(Some(Self {
            id: id.clone(),
            path,
            file: Mutex::new(Some(file)),
        }))
    }

    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    pub fn lock_path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        match self.file.lock() {
            Ok(file) => file.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }

    /// Releases the lock. Safe to call any number of times.
    /// Returns true only for the call that actually released it.
    pub fn release(&self) -> bool {
        let taken = match self.file.lock() {
            Ok(mut file) => file.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match taken {
            Some(file) => {
                // Closing the handle drops the OS lock.
                drop(file);
                tracing::debug!(id = %self.id.as_str(), "Instance lock released");
                true
            }
            None => false,
        }
    }

    /// Takes the lock back after [`release`](Self::release).
    ///
    /// Returns `Ok(true)` when this guard holds the lock afterwards, `Ok(false)`
    /// when another process grabbed it in between.
    pub fn reacquire(&self) -> Result<bool> {
        let mut slot = match self.file.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.is_some() {
            return Ok(true);
        }

        let file = open_exclusive(&self.path).map_err(|err| {
            FarmError::io(format!("reopening instance lock {}", self.path.display()), err)
        })?;
        match file {
            Some(mut file) => {
                let _ = file.set_len(0);
                let _ = writeln!(file, "{}", std::process::id());
                *slot = Some(file);
                tracing::debug!(id = %self.id.as_str(), "Instance lock reacquired");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(unix)]
fn open_exclusive(path: &Path) -> io::Result<Option<File>> {
    use std::os::unix::io::AsRawFd;

    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)?;

    // SAFETY: flock is a standard POSIX call on a valid fd owned by `file`.
    // LOCK_EX | LOCK_NB is a non-blocking exclusive lock.
    #[allow(unsafe_code)]
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        return Ok(Some(file));
    }
    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        return Ok(None);
    }
    Err(err)
}

#[cfg(windows)]
fn open_exclusive(path: &Path) -> io::Result<Option<File>> {
    use std::os::windows::fs::OpenOptionsExt;

    const ERROR_SHARING_VIOLATION: i32 = 32;

    match OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .share_mode(0)
        .open(path)
    {
        Ok(file) => Ok(Some(file)),
        Err(err) if err.raw_os_error() == Some(ERROR_SHARING_VIOLATION) => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(not(any(unix, windows)))]
fn open_exclusive(path: &Path) -> io::Result<Option<File>> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map(Some)
}
