use axum::{
    Router,
    extract::Extension,
    routing::{get, post},
};
use backup_agent::backup::aggregator::BackupAggregator;
use backup_agent::config::ConfigStore;
use backup_agent::config::store::read_config;
use backup_agent::copier::orchestrator::CopyOrchestrator;
use backup_agent::copier::queue::JobQueue;
use backup_agent::copier::registry::ProcessTable;
use backup_agent::logging;
use backup_agent::routing::router::CrossNodeRouter;
use backup_agent::routing::topology::ConfiguredTopology;
use backup_agent::transport::client::{HttpIpcTransport, HttpNodeTransport};
use backup_agent::transport::handlers::{MessageDispatcher, handle_message, handle_status};
use backup_agent::transport::protocol::{ENDPOINT_IPC_MESSAGE, ENDPOINT_MESSAGE, ENDPOINT_STATUS};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "backup-agent", about = "Node-local backup/restore agent")]
struct Args {
    /// Path of the TOML configuration file.
    #[arg(long, default_value = "backup-agent.toml")]
    config: PathBuf,

    /// Overrides the bind address from the configuration file.
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// How often the configuration file is checked for changes.
    #[arg(long, default_value_t = 10)]
    reload_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let args = Args::parse();

    let mut config = read_config(&args.config)?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    let bind_addr = config.bind;

    tracing::info!(
        "Starting backup agent {}:{} on {}",
        config.node_id,
        config.node_instance,
        bind_addr
    );
    tracing::info!(
        "Copier {} (max {} concurrent, work dir {})",
        config.copier.executable.display(),
        config.copier.max_concurrent_jobs,
        config.copier.work_dir.display()
    );

    // 1. Configuration + live reload:
    let store = ConfigStore::new(config);
    let _reloader = store.clone().watch_file(
        args.config.clone(),
        Duration::from_secs(args.reload_interval_secs.max(1)),
    );

    // 2. Copier runtime:
    let queue = JobQueue::with_config(store.subscribe());
    let processes = ProcessTable::new();
    let orchestrator = CopyOrchestrator::new(store.clone(), queue.clone(), processes.clone());
    let aggregator = BackupAggregator::new(orchestrator.clone());

    // 3. Routing:
    let topology = ConfiguredTopology::new(store.clone());
    let router = CrossNodeRouter::new(
        topology.clone(),
        topology.clone(),
        topology,
        Arc::new(HttpNodeTransport::new(store.clone())),
        Arc::new(HttpIpcTransport::new(store.clone())),
    );

    let dispatcher = MessageDispatcher::new(store.clone(), aggregator, router);

    // 4. HTTP Router:
    let app = Router::new()
        .route(ENDPOINT_MESSAGE, post(handle_message))
        .route(ENDPOINT_IPC_MESSAGE, post(handle_message))
        .route(ENDPOINT_STATUS, get(handle_status))
        .layer(Extension(dispatcher))
        .layer(Extension(orchestrator))
        .layer(Extension(store));

    // 5. Start HTTP server:
    tracing::info!("HTTP server listening on {}", bind_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    // 6. Stop the copier runtime:
    let terminated = processes.disable();
    queue.shutdown();
    tracing::info!("Shut down ({} running copiers terminated)", terminated);

    Ok(())
}
