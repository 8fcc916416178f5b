//! Background task startup.
//!
//! # Responsibilities
//! - Start the prober and the server list refresher for a balancer
//! - Wire both to one shutdown signal
//!
//! # Design Decisions
//! - Tasks start in dependency order: list refresher first, then prober
//! - A disabled prober is not spawned at all

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::schema::LoadBalancerConfig;
use crate::health::active::Prober;
use crate::lifecycle::shutdown::Shutdown;
use crate::load_balancer::{spawn_list_refresher, LoadBalancer, ServerListSource};

/// Spawn the background loops configured for `lb`.
///
/// `source` is polled every `list_refresh.interval_ms`; pass `None` when the
/// server list is static.
pub fn spawn_background_tasks(
    lb: Arc<LoadBalancer>,
    config: &LoadBalancerConfig,
    source: Option<Arc<dyn ServerListSource>>,
    shutdown: &Shutdown,
) -> Vec<JoinHandle<()>> {
    let mut tasks = Vec::new();

    if let Some(source) = source {
        tasks.push(spawn_list_refresher(
            lb.clone(),
            source,
            config.list_refresh.interval(),
            shutdown.subscribe(),
        ));
    }

    if config.probe.enabled {
        tasks.push(Prober::from_config(lb.clone(), &config.probe).spawn(shutdown.subscribe()));
    }

    tracing::info!(lb = %lb.name(), tasks = tasks.len(), "Background tasks started");
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ProbeKind;
    use crate::load_balancer::{Server, StaticServerList};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_spawn_and_drain() {
        let mut config = LoadBalancerConfig::default();
        config.probe.kind = ProbeKind::Constant;
        let lb = Arc::new(LoadBalancer::builder("bg").build());
        let source: Arc<dyn ServerListSource> =
            Arc::new(StaticServerList::new(vec![Server::new("10.0.0.1", 80)]));
        let shutdown = Shutdown::new();

        let tasks = spawn_background_tasks(lb.clone(), &config, Some(source), &shutdown);
        assert_eq!(tasks.len(), 2);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(lb.all_servers().len(), 1);
        assert_eq!(lb.reachable_servers().len(), 1);

        assert_eq!(shutdown.drain(tasks, Duration::from_secs(5)).await, 0);
    }

    #[tokio::test]
    async fn test_disabled_probe_not_spawned() {
        let mut config = LoadBalancerConfig::default();
        config.probe.enabled = false;
        let lb = Arc::new(LoadBalancer::builder("bg").build());
        let shutdown = Shutdown::new();

        let tasks = spawn_background_tasks(lb, &config, None, &shutdown);
        assert!(tasks.is_empty());
    }
}
