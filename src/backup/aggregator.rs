use super::protocol::{BackupReply, DownloadBackupRequest, UploadBackupRequest};
use crate::copier::job::{Direction, JobDescriptor, operation_name};
use crate::copier::orchestrator::CopyOrchestrator;
use crate::error::AgentError;
use crate::transport::message::{Message, TimeBudget, actions};

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Serves the upload and download actions.
///
/// An upload is one copier run. A download starts one copier run per backup
/// location at once and folds their outcomes into a single result.
pub struct BackupAggregator {
    orchestrator: Arc<CopyOrchestrator>,
}

impl BackupAggregator {
    pub fn new(orchestrator: Arc<CopyOrchestrator>) -> Arc<Self> {
        Arc::new(Self { orchestrator })
    }

    pub fn handles(action: &str) -> bool {
        action == actions::UPLOAD_BACKUP || action == actions::DOWNLOAD_BACKUP
    }

    /// Processes an upload or download message and returns the single reply
    /// (success or failure) owed to the caller.
    pub async fn process(&self, message: &Message, budget: TimeBudget) -> Message {
        let result = match message.action() {
            actions::UPLOAD_BACKUP => match message.decode_body::<UploadBackupRequest>() {
                Ok(request) => self.upload(message.activity_id(), request, budget).await,
                Err(e) => Err(e),
            },
            actions::DOWNLOAD_BACKUP => match message.decode_body::<DownloadBackupRequest>() {
                Ok(request) => self.download(message.activity_id(), request, budget).await,
                Err(e) => Err(e),
            },
            other => Err(AgentError::InvalidMessage(format!(
                "action '{}' is not a backup action",
                other
            ))),
        };

        let body = result.and_then(|reply| {
            serde_json::to_value(reply).map_err(|e| AgentError::Internal(e.to_string()))
        });

        match body {
            Ok(body) => message.reply(body),
            Err(e) => {
                tracing::error!("[{}] {} failed: {}", message.activity_id(), message.action(), e);
                message.failure_reply(&e)
            }
        }
    }

    pub async fn upload(
        &self,
        activity_id: Uuid,
        request: UploadBackupRequest,
        budget: TimeBudget,
    ) -> Result<BackupReply, AgentError> {
        let timeout = job_timeout(&budget, request.timeout_ms)?;

        let job = JobDescriptor::new(
            Direction::Upload,
            request.store,
            request.source_path,
            request.target_folder,
            Some(request.backup_metadata_file),
            activity_id,
            timeout,
        )?;
        let operation = job.operation_name().to_string();

        tracing::info!("[{}] Starting {}", activity_id, operation);
        self.orchestrator.copy(job).await?;

        Ok(BackupReply {
            operation,
            completed_jobs: 1,
        })
    }

    /// Downloads every backup location in parallel.
    ///
    /// All sub-jobs run to completion even after one of them fails; the
    /// reported error is the failure that completed last.
    pub async fn download(
        &self,
        activity_id: Uuid,
        request: DownloadBackupRequest,
        budget: TimeBudget,
    ) -> Result<BackupReply, AgentError> {
        let total = request.backup_locations.len();
        if total == 0 {
            return Err(AgentError::InvalidArgument(
                "download request has no backup locations".to_string(),
            ));
        }
        let timeout = job_timeout(&budget, request.timeout_ms)?;
        let operation = operation_name(&request.store, Direction::Download).to_string();

        tracing::info!(
            "[{}] Starting {} of {} backup locations",
            activity_id,
            operation,
            total
        );

        let (fan_out, done) = FanOut::new(total);

        for (index, location) in request.backup_locations.into_iter().enumerate() {
            let job = JobDescriptor::new(
                Direction::Download,
                request.store.clone(),
                location,
                request.destination_root.clone(),
                None,
                activity_id,
                timeout,
            );

            let job = match job {
                Ok(job) => job,
                Err(e) => {
                    // Counts as a completed sub-job; the rest still run.
                    fan_out.complete(index, Err(e));
                    continue;
                }
            };

            let orchestrator = self.orchestrator.clone();
            let fan_out = fan_out.clone();
            tokio::spawn(async move {
                let result = orchestrator.copy(job).await;
                fan_out.complete(index, result);
            });
        }
        drop(fan_out);

        match done.await {
            Ok(Ok(())) => Ok(BackupReply {
                operation,
                completed_jobs: total,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AgentError::Internal(
                "download sub-job ended without reporting".to_string(),
            )),
        }
    }
}

/// Timeout for the jobs of one request. Each job turns it into a deadline on
/// construction, so queue waits are charged against it.
fn job_timeout(budget: &TimeBudget, requested_ms: Option<u64>) -> Result<Duration, AgentError> {
    let remaining = budget.check()?;
    Ok(requested_ms
        .map(Duration::from_millis)
        .map_or(remaining, |requested| requested.min(remaining)))
}

#[derive(Debug)]
pub(crate) struct AggregateState {
    total: usize,
    completed: usize,
    last_error: Option<AgentError>,
    gate: Option<oneshot::Sender<Result<(), AgentError>>>,
}

/// Shared completion tracker of one download fan-out.
pub(crate) struct FanOut {
    state: Mutex<AggregateState>,
}

impl FanOut {
    pub(crate) fn new(total: usize) -> (Arc<Self>, oneshot::Receiver<Result<(), AgentError>>) {
        let (tx, rx) = oneshot::channel();
        let fan_out = Arc::new(Self {
            state: Mutex::new(AggregateState {
                total,
                completed: 0,
                last_error: None,
                gate: Some(tx),
            }),
        });
        (fan_out, rx)
    }

    /// Records one sub-job outcome. Returns true for the single call that
    /// completed the aggregate.
    pub(crate) fn complete(&self, index: usize, result: Result<(), AgentError>) -> bool {
        if let Err(e) = &result {
            tracing::warn!("Backup location {} failed: {}", index, e);
        }

        let finished = {
            let mut state = self.state.lock();
            state.completed += 1;
            if let Err(e) = result {
                state.last_error = Some(e);
            }

            if state.completed < state.total {
                return false;
            }

            let gate = state.gate.take();
            let last_error = state.last_error.take();
            gate.map(|gate| (gate, last_error))
        };

        match finished {
            Some((gate, last_error)) => {
                let _ = gate.send(last_error.map_or(Ok(()), Err));
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn completed(&self) -> usize {
        self.state.lock().completed
    }
}
