use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use sysinfo::{Pid, ProcessesToUpdate, System};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "crowdwatch::sync";

use crate::log_warn;

/// Pid file held for the duration of one sync run. Removed on drop.
#[derive(Debug)]
pub struct SyncLock {
    path: PathBuf,
}

impl SyncLock {
    /// Lock file used for the database at `db_path`.
    pub fn path_for(db_path: &Path) -> PathBuf {
        let mut name = db_path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".sync.lock");
        db_path.with_file_name(name)
    }

    /// Takes the lock, reclaiming it if the recorded process is gone.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    write!(file, "{}", std::process::id())
                        .with_context(|| format!("failed to write lock file {}", path.display()))?;
                    return Ok(Self { path });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    match read_pid(&path) {
                        Some(pid) if is_process_running(pid) => {
                            bail!("sync already running (pid {pid}, lock {})", path.display())
                        }
                        holder => {
                            log_warn!(
                                "Reclaiming stale sync lock {} (holder {holder:?})",
                                path.display()
                            );
                            match std::fs::remove_file(&path) {
                                Ok(()) => {}
                                Err(err) if err.kind() == ErrorKind::NotFound => {}
                                Err(err) => {
                                    return Err(err).with_context(|| {
                                        format!("failed to remove stale lock {}", path.display())
                                    })
                                }
                            }
                        }
                    }
                }
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("failed to create lock file {}", path.display()))
                }
            }
        }

        bail!("could not take sync lock {}", path.display())
    }
}

impl Drop for SyncLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn is_process_running(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
    system.process(pid).is_some()
}
