//! Copier Process Execution
//!
//! Runs one copier process to completion:
//!
//! 1. **Start**: create a fresh temp working directory, build the command
//!    line, spawn the copier and register it in the [`ProcessTable`].
//! 2. **Waiting**: suspend on process exit, the adjusted deadline, or a kill
//!    request coming through the table. A caller cancellation only requests
//!    the kill; completion still goes through the normal wait path.
//! 3. **Completed**: map the wait result / exit code / error-details file to
//!    an [`AgentError`], then always remove the temp directory and forget
//!    the table entry, also when the run is dropped before it completes.

use super::args::{CommandLine, adjust_timeout, build_command_line};
use super::job::JobDescriptor;
use super::registry::{
    COPIER_ABORTED_EXIT_CODE, COPIER_DISABLED_EXIT_CODE, ProcessTable, ProcessTicket,
};
use crate::config::CopierConfig;
use crate::error::AgentError;

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const TEMP_WORKING_DIRECTORY_PREFIX: &str = "BC";
pub const ERROR_DETAILS_FILE_NAME: &str = "ErrorDetails.txt";

const UNICODE_BOM: char = '\u{FEFF}';

const MAX_WORKING_DIR_ATTEMPTS: usize = 8;

/// Everything known about one copier run between spawn and completion.
#[derive(Debug)]
pub struct ProcessExecutionContext {
    pub command_line: CommandLine,
    pub temp_dir: PathBuf,
    pub error_details_file: PathBuf,
    pub timeout: Duration,
    pub pid: u32,
}

/// How the wait on the child process ended.
#[derive(Debug)]
enum WaitResult {
    Exited(ExitStatus),
    /// Killed on request; carries the exit code the terminator asked for.
    Terminated(i32),
    TimedOut,
    Failed(std::io::Error),
}

/// Runs the copier for `job` and maps its outcome.
///
/// Dropping the returned future partway kills the copier (`kill_on_drop`),
/// unregisters it and removes its temp directory.
pub async fn run_copier(
    table: &ProcessTable,
    config: &CopierConfig,
    job: &JobDescriptor,
    cancel: &CancellationToken,
) -> Result<(), AgentError> {
    if cancel.is_cancelled() {
        tracing::info!(
            "[{}] Copier canceled before start",
            job.activity_id()
        );
        return Err(AgentError::OperationCanceled);
    }

    // Recomputed here, after the queue wait, never carried over from submit.
    let remaining = match job.remaining() {
        Ok(remaining) => remaining,
        Err(e) => {
            tracing::warn!(
                "[{}] Deadline passed before the copier could start",
                job.activity_id()
            );
            return Err(e);
        }
    };
    let timeout = adjust_timeout(remaining, config.timeout_buffer());

    let temp_dir = match create_temp_working_dir(&config.work_dir).await {
        Ok(temp_dir) => temp_dir,
        Err(e) => {
            tracing::error!(
                "[{}] Failed to create copier working directory under {}: {}",
                job.activity_id(),
                config.work_dir.display(),
                e
            );
            return Err(AgentError::from(e));
        }
    };
    let mut cleanup = RunCleanup::new(table, temp_dir.clone());
    let error_details_file = temp_dir.join(ERROR_DETAILS_FILE_NAME);

    let command_line = build_command_line(
        &config.executable,
        job,
        &temp_dir,
        &error_details_file,
        timeout,
    );

    tracing::info!(
        "[{}] Starting copier (timeout {:?}, buffer {:?}): {}",
        job.activity_id(),
        timeout,
        config.timeout_buffer(),
        command_line.log_safe()
    );

    let (mut child, ticket) = match spawn_copier(table, &command_line) {
        Ok(spawned) => spawned,
        Err(e) => {
            tracing::warn!(
                "[{}] Could not create copier process: {}",
                job.activity_id(),
                e
            );
            cleanup.release().await;
            return Err(e);
        }
    };
    cleanup.track(ticket.pid());

    let context = ProcessExecutionContext {
        command_line,
        temp_dir,
        error_details_file,
        timeout,
        pid: ticket.pid(),
    };

    tracing::info!(
        "[{}] Copier process {} created",
        job.activity_id(),
        context.pid
    );

    let started = Instant::now();
    let waited = wait_for_exit(table, &mut child, &ticket, context.timeout, cancel).await;

    tracing::info!(
        "[{}] Copier process {} finished after {:?}: {:?}",
        job.activity_id(),
        context.pid,
        started.elapsed(),
        waited
    );

    let result = finish(&mut child, &context, waited).await;
    cleanup.release().await;

    if let Err(e) = &result {
        tracing::error!("Copier process {} failed: {}", context.pid, e);
    }

    result
}

/// Side effects of one copier run that must not outlive it: the temp
/// directory and the table entry.
///
/// [`RunCleanup::release`] undoes them on every normal path. If the run
/// future is dropped first, `Drop` does the same synchronously.
struct RunCleanup<'a> {
    table: &'a ProcessTable,
    temp_dir: Option<PathBuf>,
    pid: Option<u32>,
}

impl<'a> RunCleanup<'a> {
    fn new(table: &'a ProcessTable, temp_dir: PathBuf) -> Self {
        Self {
            table,
            temp_dir: Some(temp_dir),
            pid: None,
        }
    }

    fn track(&mut self, pid: u32) {
        self.pid = Some(pid);
    }

    async fn release(mut self) {
        if let Some(temp_dir) = self.temp_dir.take() {
            remove_temp_dir(&temp_dir).await;
        }
        if let Some(pid) = self.pid.take() {
            self.table.forget(pid);
        }
    }
}

impl Drop for RunCleanup<'_> {
    fn drop(&mut self) {
        if let Some(pid) = self.pid.take()
            && self.table.forget(pid)
        {
            tracing::warn!("Copier process {} abandoned before completion", pid);
        }
        if let Some(temp_dir) = self.temp_dir.take()
            && let Err(e) = std::fs::remove_dir_all(&temp_dir)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(
                "Failed to delete copier working directory {}: {}",
                temp_dir.display(),
                e
            );
        }
    }
}

fn spawn_copier(
    table: &ProcessTable,
    command_line: &CommandLine,
) -> Result<(Child, ProcessTicket), AgentError> {
    table.spawn_registered(|| {
        let mut child = Command::new(command_line.program())
            .args(command_line.os_args())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::spawn(&e))?;

        match child.id() {
            Some(pid) => Ok((child, pid)),
            None => {
                let _ = child.start_kill();
                Err(AgentError::Internal(
                    "copier process exited before registration".to_string(),
                ))
            }
        }
    })
}

/// The only suspending state. Never busy-loops: every branch is an
/// OS-level or timer wait.
async fn wait_for_exit(
    table: &ProcessTable,
    child: &mut Child,
    ticket: &ProcessTicket,
    timeout: Duration,
    cancel: &CancellationToken,
) -> WaitResult {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut cancel_forwarded = false;

    loop {
        tokio::select! {
            status = child.wait() => {
                return match status {
                    Ok(status) => match ticket.termination_code() {
                        // Killed on request but the exit was observed first.
                        Some(code) if !status.success() => WaitResult::Terminated(code),
                        _ => WaitResult::Exited(status),
                    },
                    Err(e) => WaitResult::Failed(e),
                };
            }
            _ = tokio::time::sleep_until(deadline) => {
                return WaitResult::TimedOut;
            }
            _ = ticket.kill_requested() => {
                if let Err(e) = child.start_kill() {
                    tracing::warn!("Failed to kill copier process {}: {}", ticket.pid(), e);
                }
                let code = ticket
                    .termination_code()
                    .unwrap_or(COPIER_ABORTED_EXIT_CODE);
                return match child.wait().await {
                    Ok(status) if status.success() => WaitResult::Exited(status),
                    Ok(_) => WaitResult::Terminated(code),
                    Err(e) => WaitResult::Failed(e),
                };
            }
            _ = cancel.cancelled(), if !cancel_forwarded => {
                cancel_forwarded = true;
                if !table.abort(ticket.pid()) {
                    tracing::debug!(
                        "Abort of copier process {} was a no-op (already terminating)",
                        ticket.pid()
                    );
                }
            }
        }
    }
}

async fn finish(
    child: &mut Child,
    context: &ProcessExecutionContext,
    waited: WaitResult,
) -> Result<(), AgentError> {
    match waited {
        WaitResult::Exited(status) if status.success() => Ok(()),
        WaitResult::Exited(status) => {
            let exit_code = exit_code_of(&status);
            Err(map_failed_exit(exit_code, &context.error_details_file).await)
        }
        WaitResult::Terminated(code) => Err(map_failed_exit(code, &context.error_details_file).await),
        WaitResult::TimedOut => {
            // The copier should have honoured /timeout itself; kill it anyway.
            tracing::warn!(
                "Copier process {} exceeded its {:?} deadline, terminating",
                context.pid,
                context.timeout
            );
            force_kill(child, context.pid).await;
            Err(AgentError::CopierTimeout)
        }
        WaitResult::Failed(e) => {
            tracing::warn!(
                "Failed to wait for copier process {}: {}",
                context.pid,
                e
            );
            force_kill(child, context.pid).await;
            Err(AgentError::Io(format!("wait for copier failed: {}", e)))
        }
    }
}

/// Maps a failing exit code to an error.
async fn map_failed_exit(exit_code: i32, error_details_file: &Path) -> AgentError {
    // Error details never exist for a process the agent killed.
    if exit_code == COPIER_ABORTED_EXIT_CODE {
        return AgentError::OperationCanceled;
    }
    if exit_code == COPIER_DISABLED_EXIT_CODE {
        return AgentError::NotPrimary;
    }

    let details = match tokio::fs::read_to_string(error_details_file).await {
        Ok(details) => details,
        Err(e) => {
            tracing::error!(
                invariant_violation = true,
                "Copier exited with {} but error details file {} is unreadable: {}",
                exit_code,
                error_details_file.display(),
                e
            );
            return AgentError::CopierUnexpected {
                exit_code,
                details: String::new(),
            };
        }
    };

    match parse_error_details(&details) {
        Ok((code, message)) => AgentError::Copier { code, message },
        Err(details) => {
            tracing::error!(
                invariant_violation = true,
                "Copier exited with {} and malformed error details: {:?}",
                exit_code,
                details
            );
            AgentError::CopierUnexpected { exit_code, details }
        }
    }
}

/// Parses `<integerErrorCode>,<message...>` from the first line. Later
/// lines are ignored. On failure returns the trimmed content so it can
/// still be surfaced.
pub fn parse_error_details(raw: &str) -> Result<(i32, String), String> {
    let content = raw.trim_start_matches(UNICODE_BOM).trim();
    let first_line = content.lines().next().unwrap_or_default();

    let Some((code, message)) = first_line.split_once(',') else {
        return Err(content.to_string());
    };

    match code.trim().parse::<i32>() {
        Ok(code) if code != 0 => Ok((code, message.trim().to_string())),
        _ => Err(content.to_string()),
    }
}

fn exit_code_of(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}

async fn force_kill(child: &mut Child, pid: u32) {
    if let Err(e) = child.start_kill() {
        tracing::warn!("Failed to terminate copier process {}: {}", pid, e);
        return;
    }
    if let Err(e) = child.wait().await {
        tracing::warn!("Failed to reap copier process {}: {}", pid, e);
    }
}

async fn remove_temp_dir(temp_dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(temp_dir).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(
            "Failed to delete copier working directory {}: {}",
            temp_dir.display(),
            e
        );
    }
}

/// Creates a fresh `<work_dir>/BC/<pid>-<uuid>` directory.
///
/// The leaf is created with `create_dir`, so a directory left behind by an
/// earlier run is never reused.
pub async fn create_temp_working_dir(work_dir: &Path) -> std::io::Result<PathBuf> {
    let parent = work_dir.join(TEMP_WORKING_DIRECTORY_PREFIX);
    tokio::fs::create_dir_all(&parent).await?;

    create_fresh_dir(&parent, || {
        format!("{}-{}", std::process::id(), Uuid::new_v4().simple())
    })
    .await
}

/// Creates `parent/<next_name()>`, moving on to the next name whenever the
/// directory already exists.
pub(crate) async fn create_fresh_dir<N>(parent: &Path, mut next_name: N) -> std::io::Result<PathBuf>
where
    N: FnMut() -> String,
{
    for _ in 0..MAX_WORKING_DIR_ATTEMPTS {
        let candidate = parent.join(next_name());
        match tokio::fs::create_dir(&candidate).await {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                tracing::debug!(
                    "Copier working directory {} already exists, picking another",
                    candidate.display()
                );
            }
            Err(e) => return Err(e),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("no unused copier working directory under {}", parent.display()),
    ))
}
