//! Server list sources and the polling refresher.
//!
//! # Responsibilities
//! - Produce immutable snapshots of the current server set
//! - Periodically pull a source and install the snapshot on a balancer
//!
//! # Design Decisions
//! - A failed pull keeps the previous list; an empty list is never assumed
//! - The refresher shares the balancer's shutdown signal

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::schema::ServerConfig;
use crate::error::{Error, Result};
use crate::load_balancer::{LoadBalancer, Server};

/// Supplies the current server set.
#[async_trait]
pub trait ServerListSource: Send + Sync + fmt::Debug {
    async fn servers(&self) -> Result<Vec<Server>>;
}

/// Fixed list, typically taken from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticServerList {
    servers: Vec<Server>,
}

impl StaticServerList {
    pub fn new(servers: Vec<Server>) -> Self {
        Self { servers }
    }

    pub fn from_config(configs: &[ServerConfig]) -> Result<Self> {
        let servers = configs
            .iter()
            .map(Server::from_config)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::ServerList(e.to_string()))?;
        Ok(Self::new(servers))
    }

    pub fn into_servers(self) -> Vec<Server> {
        self.servers
    }
}

#[async_trait]
impl ServerListSource for StaticServerList {
    async fn servers(&self) -> Result<Vec<Server>> {
        Ok(self.servers.clone())
    }
}

/// Pull `source` once and install the result. Returns the new list size.
pub async fn refresh_once(lb: &LoadBalancer, source: &dyn ServerListSource) -> Result<usize> {
    let servers = source.servers().await?;
    let count = servers.len();
    lb.set_servers(servers);
    Ok(count)
}

/// Spawn a task that refreshes `lb` from `source` every `interval` until shutdown.
pub fn spawn_list_refresher(
    lb: Arc<LoadBalancer>,
    source: Arc<dyn ServerListSource>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            lb = %lb.name(),
            interval_ms = interval.as_millis() as u64,
            "Server list refresher starting"
        );

        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = refresh_once(&lb, source.as_ref()).await {
                        tracing::warn!(lb = %lb.name(), error = %e, "Server list refresh failed, keeping previous list");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!(lb = %lb.name(), "Server list refresher received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    })
}
