//! Per-repository exclusive writer lock.
//!
//! The lock is a file named `LOCK` created with exclusive-create semantics.
//! Its contents are `"<owner-pid>\n<ISO-8601 timestamp>"`. A lock whose
//! owner is no longer alive is stale and reclaimed automatically; a lock
//! held by a live process fails the acquisition with the holder's details.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::error::{Error, Result};

const LOCK_FILE: &str = "LOCK";

/// Guard for the writer lock; released on drop.
#[derive(Debug)]
pub struct IndexLock {
    path: PathBuf,
}

impl IndexLock {
    /// Acquire the writer lock in `lock_dir`, reclaiming a stale one once.
    pub fn acquire(lock_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(lock_dir)?;
        let path = lock_dir.join(LOCK_FILE);

        match Self::try_create(&path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let (pid, since) = Self::read_holder(&path);
                if let Some(pid) = pid {
                    if pid_alive(pid) {
                        return Err(Error::LockHeld { pid, since });
                    }
                }
                tracing::warn!(
                    "removing stale lock at {} (owner {:?} not alive)",
                    path.display(),
                    pid
                );
                std::fs::remove_file(&path)?;
                Self::try_create(&path).map_err(Error::from)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn try_create(path: &Path) -> std::io::Result<Self> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        write!(file, "{}\n{}", std::process::id(), Utc::now().to_rfc3339())?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    fn read_holder(path: &Path) -> (Option<u32>, String) {
        let contents = std::fs::read_to_string(path).unwrap_or_default();
        let mut lines = contents.lines();
        let pid = lines.next().and_then(|l| l.trim().parse().ok());
        let since = lines.next().unwrap_or("unknown time").to_string();
        (pid, since)
    }

    /// Explicit release; equivalent to dropping the guard.
    pub fn release(self) {}
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        // A lock removed out from under us is fine.
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("failed to remove lock {}: {e}", self.path.display());
            }
        }
    }
}

/// Signal-0 style liveness probe.
fn pid_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true);
    system.process(Pid::from_u32(pid)).is_some()
}
