use super::job::JobDescriptor;
use super::process::run_copier;
use super::queue::JobQueue;
use super::registry::ProcessTable;
use crate::config::ConfigStore;
use crate::error::AgentError;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Drives a single copy job: throttle slot, copier process, outcome.
pub struct CopyOrchestrator {
    config: Arc<ConfigStore>,
    queue: Arc<JobQueue>,
    processes: Arc<ProcessTable>,
}

impl CopyOrchestrator {
    pub fn new(
        config: Arc<ConfigStore>,
        queue: Arc<JobQueue>,
        processes: Arc<ProcessTable>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            queue,
            processes,
        })
    }

    /// Runs `job` to completion.
    pub async fn copy(&self, job: JobDescriptor) -> Result<(), AgentError> {
        self.copy_with_cancel(job, CancellationToken::new()).await
    }

    /// Runs `job`, force-terminating the copier if `cancel` fires while it
    /// is running.
    pub async fn copy_with_cancel(
        &self,
        job: JobDescriptor,
        cancel: CancellationToken,
    ) -> Result<(), AgentError> {
        job.assert_valid();

        tracing::debug!(
            "[{}] Queueing {} job (in flight {}/{})",
            job.activity_id(),
            job.operation_name(),
            self.queue.in_flight(),
            self.queue.limit()
        );

        let processes = self.processes.clone();
        let config = self.config.clone();

        let result = self
            .queue
            .submit(async move {
                // Snapshot taken at dispatch so a reload while queued applies.
                let copier = config.current().copier;
                run_copier(&processes, &copier, &job, &cancel).await
            })
            .await;

        match &result {
            Ok(()) => tracing::debug!("Copy job completed"),
            Err(e) => tracing::debug!("Copy job failed: {}", e),
        }

        result
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn processes(&self) -> &Arc<ProcessTable> {
        &self.processes
    }
}
