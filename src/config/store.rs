//! Live configuration store.
//!
//! The current `AgentConfig` lives in a `tokio::sync::watch` channel. Readers
//! take a cheap snapshot with [`ConfigStore::current`]; components that must
//! react to changes (the copier job queue) hold a [`watch::Receiver`] from
//! [`ConfigStore::subscribe`] and re-apply on every change event.

use super::types::AgentConfig;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub struct ConfigStore {
    tx: watch::Sender<AgentConfig>,
}

impl ConfigStore {
    pub fn new(config: AgentConfig) -> Arc<Self> {
        let (tx, _rx) = watch::channel(config);
        Arc::new(Self { tx })
    }

    /// Parses and loads a TOML config file.
    pub fn load(path: &Path) -> Result<Arc<Self>> {
        let config = read_config(path)?;
        Ok(Self::new(config))
    }

    pub fn current(&self) -> AgentConfig {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AgentConfig> {
        self.tx.subscribe()
    }

    /// Publishes a new configuration. Subscribers are only notified when
    /// something actually changed.
    pub fn update(&self, config: AgentConfig) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == config {
                return false;
            }
            *current = config;
            true
        })
    }

    /// Polls `path` every `interval` and publishes changed contents.
    ///
    /// A file that fails to parse is logged and ignored; the last good
    /// configuration stays live.
    pub fn watch_file(
        self: Arc<Self>,
        path: PathBuf,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let loaded = {
                    let path = path.clone();
                    tokio::task::spawn_blocking(move || read_config(&path)).await
                };

                match loaded {
                    Ok(Ok(config)) => {
                        if self.update(config) {
                            tracing::info!("Reloaded configuration from {}", path.display());
                        }
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(
                            "Ignoring invalid configuration in {}: {:#}",
                            path.display(),
                            e
                        );
                    }
                    Err(e) => {
                        tracing::error!("Configuration reload task failed: {}", e);
                    }
                }
            }
        })
    }
}

pub fn read_config(path: &Path) -> Result<AgentConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    parse_config(&raw).with_context(|| format!("failed to parse config file {}", path.display()))
}

pub fn parse_config(raw: &str) -> Result<AgentConfig> {
    let config: AgentConfig = toml::from_str(raw)?;

    if config.copier.max_concurrent_jobs == 0 {
        anyhow::bail!("copier.max_concurrent_jobs must be at least 1");
    }

    Ok(config)
}
