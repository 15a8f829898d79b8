use axum::{Json, extract::Extension, http::StatusCode};
use std::sync::Arc;

use super::message::{Message, TimeBudget};
use super::protocol::StatusResponse;
use crate::backup::aggregator::BackupAggregator;
use crate::config::ConfigStore;
use crate::copier::orchestrator::CopyOrchestrator;
use crate::error::AgentError;
use crate::routing::router::CrossNodeRouter;

/// Routes an inbound message to the component owning its action, or to the
/// local process serving its actor.
pub struct MessageDispatcher {
    config: Arc<ConfigStore>,
    aggregator: Arc<BackupAggregator>,
    router: Arc<CrossNodeRouter>,
}

impl MessageDispatcher {
    pub fn new(
        config: Arc<ConfigStore>,
        aggregator: Arc<BackupAggregator>,
        router: Arc<CrossNodeRouter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            aggregator,
            router,
        })
    }

    /// Always yields exactly one reply: the success reply, the remote reply
    /// of a forwarded message, or a failure reply.
    pub async fn dispatch(&self, message: Message) -> Message {
        let default_timeout = self.config.current().copier.default_operation_timeout();
        let budget = TimeBudget::from_headers(&message.headers, default_timeout);
        let action = message.action().to_string();

        tracing::debug!(
            "[{}] Received {} from {} ({:?} left)",
            message.activity_id(),
            action,
            message.headers.actor,
            budget.remaining()
        );

        if BackupAggregator::handles(&action) {
            return self.aggregator.process(&message, budget).await;
        }

        if CrossNodeRouter::handles(&action) {
            let request = message.clone();
            return match self.router.route(message, budget).await {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::warn!("[{}] {} failed: {}", request.activity_id(), action, e);
                    request.failure_reply(&e)
                }
            };
        }

        // Anything else may be a service message forwarded by a peer agent.
        let request = message.clone();
        match self.router.deliver_to_actor(message, budget).await {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                tracing::warn!("[{}] Unsupported action {}", request.activity_id(), action);
                request.failure_reply(&AgentError::InvalidMessage(format!(
                    "unsupported action '{}'",
                    action
                )))
            }
            Err(e) => {
                tracing::warn!(
                    "[{}] Delivery of {} to {} failed: {}",
                    request.activity_id(),
                    action,
                    request.headers.actor,
                    e
                );
                request.failure_reply(&e)
            }
        }
    }
}

/// Inter-node and intra-process messages share one handler; failures travel
/// as failure replies, so the HTTP status is always 200.
pub async fn handle_message(
    Extension(dispatcher): Extension<Arc<MessageDispatcher>>,
    Json(message): Json<Message>,
) -> (StatusCode, Json<Message>) {
    let reply = dispatcher.dispatch(message).await;
    (StatusCode::OK, Json(reply))
}

pub async fn handle_status(
    Extension(config): Extension<Arc<ConfigStore>>,
    Extension(orchestrator): Extension<Arc<CopyOrchestrator>>,
) -> (StatusCode, Json<StatusResponse>) {
    let config = config.current();
    let queue = orchestrator.queue();
    let processes = orchestrator.processes();

    (
        StatusCode::OK,
        Json(StatusResponse {
            node_id: config.node_id,
            node_instance: config.node_instance,
            copier_limit: queue.limit(),
            copiers_in_flight: queue.in_flight(),
            live_processes: processes.len(),
            copier_enabled: processes.is_enabled(),
        }),
    )
}
