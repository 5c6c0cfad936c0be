//! Process lock file
//!
//! sled holds an exclusive lock on its database; two counters pointed at the
//! same data directory would otherwise fail late and confusingly. The lock file
//! turns that into a clear startup error naming the other process.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// PID lock file held for the lifetime of a counting process
#[derive(Debug)]
pub struct ProcessLock {
    lock_path: PathBuf,
    owned: bool,
}

impl ProcessLock {
    const LOCK_FILE_NAME: &'static str = ".sheet-counter.lock";

    /// Acquire the lock in `data_dir`, creating the directory if needed.
    ///
    /// Fails if a live sheet counter already holds it. Stale or unreadable
    /// lock files are replaced.
    pub fn acquire<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let lock_path = data_dir.join(Self::LOCK_FILE_NAME);

        match Self::holder(&lock_path) {
            Some(pid) if pid != std::process::id() && Self::is_counter_process(pid) => {
                bail!(
                    "Another sheet counter is already using {:?} (PID: {})\n\
                     Stop it first, or remove the stale lock file: rm {:?}",
                    data_dir,
                    pid,
                    lock_path
                );
            }
            Some(_) => {
                tracing::info!(path = ?lock_path, "[Storage] Replacing stale lock file");
            }
            None => {}
        }

        let pid = std::process::id();
        fs::write(&lock_path, format!("{pid}\n"))
            .with_context(|| format!("Failed to write lock file: {:?}", lock_path))?;
        tracing::debug!(pid, path = ?lock_path, "[Storage] Acquired process lock");

        Ok(Self {
            lock_path,
            owned: true,
        })
    }

    /// PID recorded in an existing lock file, if it can be read.
    fn holder(lock_path: &Path) -> Option<u32> {
        let contents = fs::read_to_string(lock_path).ok()?;
        match contents.trim().parse() {
            Ok(pid) => Some(pid),
            Err(_) => {
                tracing::warn!(path = ?lock_path, "[Storage] Lock file is unreadable, ignoring it");
                None
            }
        }
    }

    #[cfg(unix)]
    fn is_counter_process(pid: u32) -> bool {
        // /proc/PID/cmdline vanishes with the process; a recycled PID belongs to something else
        match fs::read_to_string(format!("/proc/{pid}/cmdline")) {
            Ok(cmdline) => cmdline.contains("sheet-counter") || cmdline.contains("sheet_counter"),
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    fn is_counter_process(_pid: u32) -> bool {
        true
    }

    /// Remove the lock file. Also runs on drop.
    pub fn release(&mut self) {
        if !self.owned {
            return;
        }
        match fs::remove_file(&self.lock_path) {
            Ok(()) => tracing::debug!(path = ?self.lock_path, "[Storage] Released process lock"),
            Err(e) => tracing::warn!(error = %e, "[Storage] Failed to remove lock file"),
        }
        self.owned = false;
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        self.release();
    }
}
