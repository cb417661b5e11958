//! Registry of OS processes launched by orca.
//!
//! The registry is bookkeeping for bulk termination only: it never owns the
//! child, never waits on it, and never untracks on its own. Whoever starts a
//! process tracks it (usually through [`ProcessManager::track_scoped`]) and
//! is responsible for untracking it once the process has exited.
//!
//! Group kill relies on every spawn path starting the child in its own
//! process group (`process_group(0)`), so the group id equals the child's pid
//! and one signal reaches all of its descendants.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::error::KillFailure;
use crate::{olog_debug, olog_warn, Error, Result};

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

/// Cheap, cloneable handle to one spawned process.
///
/// Identity is the internal key, not the pid, so a recycled pid can never
/// alias an older registry entry.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    key: u64,
    pid: u32,
    label: Arc<str>,
    started_at: DateTime<Utc>,
}

impl ProcessHandle {
    pub fn new(pid: u32, label: impl Into<Arc<str>>) -> Self {
        Self {
            key: NEXT_KEY.fetch_add(1, Ordering::Relaxed),
            pid,
            label: label.into(),
            started_at: Utc::now(),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

impl PartialEq for ProcessHandle {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for ProcessHandle {}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (pid {})", self.label, self.pid)
    }
}

#[derive(Debug, Default)]
pub struct ProcessManager {
    processes: Mutex<HashMap<u64, ProcessHandle>>,
}

impl ProcessManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running process.
    pub fn track(&self, handle: ProcessHandle) {
        olog_debug!("ProcessManager::track {}", handle);
        self.lock().insert(handle.key, handle);
    }

    /// Track `handle` until the returned guard is dropped.
    pub fn track_scoped(self: &Arc<Self>, handle: ProcessHandle) -> TrackGuard {
        self.track(handle.clone());
        TrackGuard {
            manager: self.clone(),
            handle,
        }
    }

    /// Remove a process from the registry. Unknown handles are ignored.
    pub fn untrack(&self, handle: &ProcessHandle) {
        if self.lock().remove(&handle.key).is_some() {
            olog_debug!("ProcessManager::untrack {}", handle);
        }
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn is_tracked(&self, handle: &ProcessHandle) -> bool {
        self.lock().contains_key(&handle.key)
    }

    /// Snapshot of every tracked handle.
    pub fn tracked(&self) -> Vec<ProcessHandle> {
        self.lock().values().cloned().collect()
    }

    /// Send SIGKILL to the process group of every tracked process.
    ///
    /// Every handle is attempted even when earlier ones fail. Handles stay
    /// tracked; the kill is asynchronous and only the owner of the process
    /// knows when it has actually exited.
    pub fn kill_all(&self) -> Result<()> {
        let targets = self.tracked();
        olog_debug!("ProcessManager::kill_all targets={}", targets.len());

        let failures: Vec<KillFailure> = targets
            .iter()
            .filter_map(|handle| kill_group(handle).err())
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            for failure in &failures {
                olog_warn!("kill_all: {}", failure);
            }
            Err(Error::KillAll(failures))
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, ProcessHandle>> {
        self.processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(unix)]
fn kill_group(handle: &ProcessHandle) -> std::result::Result<(), KillFailure> {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    // pid 0 would address our own process group.
    let raw = match i32::try_from(handle.pid) {
        Ok(raw) if raw > 0 => raw,
        _ => return Err(failure(handle, "invalid pid".to_string())),
    };
    let pid = Pid::from_raw(raw);

    match killpg(pid, Signal::SIGKILL) {
        Ok(()) => Ok(()),
        Err(group_err) => {
            // Not a group leader, or groups unsupported: signal the process alone.
            olog_debug!(
                "killpg failed for {} ({}), falling back to kill",
                handle,
                group_err
            );
            kill(pid, Signal::SIGKILL)
                .map_err(|err| failure(handle, format!("{} (group: {})", err, group_err)))
        }
    }
}

#[cfg(not(unix))]
fn kill_group(handle: &ProcessHandle) -> std::result::Result<(), KillFailure> {
    Err(failure(
        handle,
        "process signalling is not supported on this platform".to_string(),
    ))
}

fn failure(handle: &ProcessHandle, reason: String) -> KillFailure {
    KillFailure {
        pid: handle.pid,
        label: handle.label.to_string(),
        reason,
    }
}

/// Untracks its process when dropped.
#[derive(Debug)]
pub struct TrackGuard {
    manager: Arc<ProcessManager>,
    handle: ProcessHandle,
}

impl TrackGuard {
    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }
}

impl Drop for TrackGuard {
    fn drop(&mut self) {
        self.manager.untrack(&self.handle);
    }
}
