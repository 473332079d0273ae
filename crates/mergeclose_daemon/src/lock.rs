//! Single-instance pid lock.
//!
//! The lock is a file holding the owner's pid. It only guards against two
//! local processes sharing one checkpoint; it is not a distributed lock.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("merge-close daemon already running with pid {pid} (lock file {})", .path.display())]
    AlreadyRunning { pid: u32, path: PathBuf },

    #[error("lock file I/O failed for {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LockError {
    fn io(path: &Path, source: io::Error) -> Self {
        LockError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Held lock. Dropping it removes the file.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    released: bool,
}

impl InstanceLock {
    /// Take the lock at `path`, reclaiming it if the recorded owner is gone.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| LockError::io(parent, e))?;
        }

        let file = match open_new(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                if let Some(pid) = read_pid(path) {
                    if pid_is_alive(pid) {
                        return Err(LockError::AlreadyRunning {
                            pid,
                            path: path.to_path_buf(),
                        });
                    }
                    warn!(pid, path = %path.display(), "reclaiming stale daemon lock");
                } else {
                    warn!(path = %path.display(), "reclaiming unreadable daemon lock");
                }
                match fs::remove_file(path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(LockError::io(path, e)),
                }
                // A concurrent acquirer may win this create; that surfaces as Io.
                open_new(path).map_err(|e| LockError::io(path, e))?
            }
            Err(err) => return Err(LockError::io(path, err)),
        };

        write_pid(file, std::process::id()).map_err(|e| LockError::io(path, e))?;
        info!(path = %path.display(), pid = std::process::id(), "daemon lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) -> Result<(), LockError> {
        self.remove()
    }

    fn remove(&mut self) -> Result<(), LockError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "daemon lock released");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LockError::io(&self.path, e)),
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(err) = self.remove() {
            warn!(error = %err, "failed to remove daemon lock");
        }
    }
}

fn open_new(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

fn write_pid(mut file: File, pid: u32) -> io::Result<()> {
    writeln!(file, "{}", pid)?;
    file.flush()?;
    file.sync_all()
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Liveness check. Permission denied counts as alive; only a definite "no
/// such process" lets the lock be reclaimed.
#[cfg(unix)]
pub fn pid_is_alive(pid: u32) -> bool {
    let pid = match libc::pid_t::try_from(pid) {
        Ok(pid) if pid > 0 => pid,
        _ => return false,
    };
    // SAFETY: signal 0 performs error checking only; nothing is delivered.
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

/// Without a portable liveness check, any recorded pid is assumed alive.
#[cfg(not(unix))]
pub fn pid_is_alive(pid: u32) -> bool {
    pid != 0
}
