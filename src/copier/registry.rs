//! Live Copier Process Table
//!
//! Every copier process is registered here between spawn and completion so
//! it can be force-terminated from outside the task that waits on it
//! (explicit abort, or disabling the whole runtime). All removal paths go
//! through [`ProcessTable::forget`] or [`ProcessTable::terminate`], both of
//! which are no-ops for an unknown pid. Process creation happens outside the
//! table lock.

use crate::error::AgentError;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;

/// Exit code recorded when the agent aborts a copier (low 16 bits of the
/// agent's "copier aborted" error value).
pub const COPIER_ABORTED_EXIT_CODE: i32 = 0x1C1A;

/// Exit code recorded when the copier runtime is disabled under a running
/// copier.
pub const COPIER_DISABLED_EXIT_CODE: i32 = 0x1C19;

/// Shared view of one live process: the kill signal and the exit code the
/// terminator asked for.
#[derive(Debug, Clone)]
pub struct ProcessTicket {
    pid: u32,
    kill: CancellationToken,
    termination_code: Arc<OnceLock<i32>>,
}

impl ProcessTicket {
    fn new(pid: u32) -> Self {
        Self {
            pid,
            kill: CancellationToken::new(),
            termination_code: Arc::new(OnceLock::new()),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Resolves once somebody requested termination of this process.
    pub async fn kill_requested(&self) {
        self.kill.cancelled().await
    }

    /// Exit code requested by the first terminator, if any.
    pub fn termination_code(&self) -> Option<i32> {
        self.termination_code.get().copied()
    }

    fn request_kill(&self, exit_code: i32) {
        let _ = self.termination_code.set(exit_code);
        self.kill.cancel();
    }
}

struct TableState {
    enabled: bool,
    entries: HashMap<u32, ProcessTicket>,
}

pub struct ProcessTable {
    state: Mutex<TableState>,
}

impl ProcessTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Runs `spawn` and registers the resulting pid.
    ///
    /// The lock is not held across `spawn`. If [`ProcessTable::disable`] ran
    /// in between, the spawned value is dropped unregistered and the call
    /// fails with `ObjectClosed`; callers hand in values whose drop kills
    /// the process (`kill_on_drop`).
    pub fn spawn_registered<T, F>(&self, spawn: F) -> Result<(T, ProcessTicket), AgentError>
    where
        F: FnOnce() -> Result<(T, u32), AgentError>,
    {
        if !self.is_enabled() {
            return Err(AgentError::ObjectClosed);
        }

        let (spawned, pid) = spawn()?;

        let mut state = self.state.lock();
        if !state.enabled {
            drop(state);
            tracing::info!(
                "Copier process {} started while the runtime was being disabled, dropping it",
                pid
            );
            drop(spawned);
            return Err(AgentError::ObjectClosed);
        }

        let ticket = ProcessTicket::new(pid);
        state.entries.insert(pid, ticket.clone());
        drop(state);

        tracing::debug!("Registered copier process {}", pid);

        Ok((spawned, ticket))
    }

    /// Removes `pid` from the table. Returns whether it was present.
    pub fn forget(&self, pid: u32) -> bool {
        let removed = self.state.lock().entries.remove(&pid).is_some();
        if removed {
            tracing::debug!("Unregistered copier process {}", pid);
        }
        removed
    }

    /// Removes `pid` and asks its owner to kill it with `exit_code`.
    ///
    /// Only the caller that actually removed the entry signals the kill, so
    /// racing terminators agree on a single exit code.
    pub fn terminate(&self, pid: u32, exit_code: i32) -> bool {
        let ticket = self.state.lock().entries.remove(&pid);

        match ticket {
            Some(ticket) => {
                tracing::info!(
                    "Terminating copier process {} with exit code {:#x}",
                    pid,
                    exit_code
                );
                ticket.request_kill(exit_code);
                true
            }
            None => false,
        }
    }

    /// Force-terminates `pid` as an explicit abort.
    pub fn abort(&self, pid: u32) -> bool {
        self.terminate(pid, COPIER_ABORTED_EXIT_CODE)
    }

    /// Rejects further spawns and terminates every live copier.
    pub fn disable(&self) -> usize {
        let tickets: Vec<ProcessTicket> = {
            let mut state = self.state.lock();
            state.enabled = false;
            state.entries.drain().map(|(_, ticket)| ticket).collect()
        };

        for ticket in &tickets {
            tracing::info!("Terminating copier process {} (runtime disabled)", ticket.pid);
            ticket.request_kill(COPIER_DISABLED_EXIT_CODE);
        }

        tickets.len()
    }

    pub fn enable(&self) {
        self.state.lock().enabled = true;
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.state.lock().entries.contains_key(&pid)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self {
            state: Mutex::new(TableState {
                enabled: true,
                entries: HashMap::new(),
            }),
        }
    }
}
