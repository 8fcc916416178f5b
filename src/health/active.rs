//! Active health probing.
//!
//! # Responsibilities
//! - Periodically probe every known server
//! - Update server reachability based on results
//! - Rebuild the balancer's reachable subset after each round
//!
//! # Design Decisions
//! - One task per probe; a round waits for all of them concurrently
//! - Every probe has a hard deadline; a late probe is aborted, not awaited
//! - Probe errors mean "unreachable" and never touch the circuit breaker

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::schema::ProbeConfig;
use crate::health::probe::{probe_from_config, HealthProbe, ProbeError};
use crate::load_balancer::{LoadBalancer, Server};

/// Counts from one probe round. `timed_out` is a subset of `unreachable`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeRoundSummary {
    pub reachable: usize,
    pub unreachable: usize,
    pub timed_out: usize,
}

enum ProbeOutcome {
    Verdict(bool),
    Failed(ProbeError),
    Panicked,
    TimedOut,
}

/// Background loop that keeps server reachability current.
pub struct Prober {
    lb: Arc<LoadBalancer>,
    probe: Arc<dyn HealthProbe>,
    interval: Duration,
    timeout: Duration,
    enabled: bool,
}

impl Prober {
    pub fn new(
        lb: Arc<LoadBalancer>,
        probe: Arc<dyn HealthProbe>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            lb,
            probe,
            interval,
            timeout,
            enabled: true,
        }
    }

    pub fn from_config(lb: Arc<LoadBalancer>, config: &ProbeConfig) -> Self {
        Self {
            enabled: config.enabled,
            ..Self::new(lb, probe_from_config(config), config.interval(), config.timeout())
        }
    }

    /// Spawn [`Prober::run`] on the current runtime.
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.enabled {
            tracing::info!(lb = %self.lb.name(), "Active health probing disabled");
            return;
        }

        tracing::info!(
            lb = %self.lb.name(),
            interval_ms = self.interval.as_millis() as u64,
            timeout_ms = self.timeout.as_millis() as u64,
            "Prober starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.probe_round().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!(lb = %self.lb.name(), "Prober received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every known server once and apply the verdicts.
    pub async fn probe_round(&self) -> ProbeRoundSummary {
        let servers = self.lb.all_servers();

        let checks = servers.iter().cloned().map(|server| {
            let probe = Arc::clone(&self.probe);
            let target = server.clone();
            let mut handle = tokio::spawn(async move { probe.probe(&target).await });
            let timeout = self.timeout;

            async move {
                let outcome = match time::timeout(timeout, &mut handle).await {
                    Ok(Ok(Ok(alive))) => ProbeOutcome::Verdict(alive),
                    Ok(Ok(Err(e))) => ProbeOutcome::Failed(e),
                    Ok(Err(_)) => ProbeOutcome::Panicked,
                    Err(_) => {
                        handle.abort();
                        ProbeOutcome::TimedOut
                    }
                };
                (server, outcome)
            }
        });

        let mut summary = ProbeRoundSummary::default();
        for (server, outcome) in join_all(checks).await {
            let reachable = match outcome {
                ProbeOutcome::Verdict(alive) => alive,
                ProbeOutcome::Failed(e) => {
                    tracing::debug!(server = %server, error = %e, "Probe failed");
                    false
                }
                ProbeOutcome::Panicked => {
                    tracing::debug!(server = %server, "Probe task panicked");
                    false
                }
                ProbeOutcome::TimedOut => {
                    summary.timed_out += 1;
                    false
                }
            };

            if reachable {
                summary.reachable += 1;
            } else {
                summary.unreachable += 1;
            }
            self.apply(&server, reachable);
        }

        self.lb.refresh_reachable();
        tracing::debug!(
            lb = %self.lb.name(),
            reachable = summary.reachable,
            unreachable = summary.unreachable,
            timed_out = summary.timed_out,
            "Probe round complete"
        );
        summary
    }

    fn apply(&self, server: &Server, reachable: bool) {
        if !self.lb.registry().set_reachable(server, reachable) {
            return;
        }
        if reachable {
            tracing::info!(lb = %self.lb.name(), server = %server, "Server is reachable again");
        } else {
            tracing::warn!(lb = %self.lb.name(), server = %server, "Server became unreachable");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::probe::ConstantProbe;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct DownSet(HashSet<Server>);

    #[async_trait]
    impl HealthProbe for DownSet {
        async fn probe(&self, server: &Server) -> Result<bool, ProbeError> {
            if self.0.contains(server) {
                Err(ProbeError::Status(503))
            } else {
                Ok(true)
            }
        }
    }

    #[derive(Debug)]
    struct Hangs(Server);

    #[async_trait]
    impl HealthProbe for Hangs {
        async fn probe(&self, server: &Server) -> Result<bool, ProbeError> {
            if *server == self.0 {
                std::future::pending::<()>().await;
            }
            Ok(true)
        }
    }

    #[derive(Debug, Default)]
    struct Counting(AtomicUsize);

    #[async_trait]
    impl HealthProbe for Counting {
        async fn probe(&self, _server: &Server) -> Result<bool, ProbeError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    fn balancer(n: u16) -> Arc<LoadBalancer> {
        let servers = (0..n).map(|i| Server::new("127.0.0.1", 9000 + i)).collect();
        Arc::new(LoadBalancer::builder("probe-test").servers(servers).build())
    }

    fn prober(lb: &Arc<LoadBalancer>, probe: Arc<dyn HealthProbe>) -> Prober {
        Prober::new(lb.clone(), probe, Duration::from_secs(30), Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_round_marks_failures_unreachable() {
        let lb = balancer(3);
        let down = lb.all_servers()[2].clone();
        let probe = Arc::new(DownSet([down.clone()].into_iter().collect()));

        let summary = prober(&lb, probe).probe_round().await;
        assert_eq!(
            summary,
            ProbeRoundSummary {
                reachable: 2,
                unreachable: 1,
                timed_out: 0
            }
        );
        assert!(!lb.registry().is_reachable(&down));
        assert_eq!(lb.reachable_servers().len(), 2);
        assert!(!lb.reachable_servers().contains(&down));
    }

    #[tokio::test]
    async fn test_recovery() {
        let lb = balancer(2);
        prober(&lb, Arc::new(ConstantProbe::new(false))).probe_round().await;
        assert!(lb.reachable_servers().is_empty());

        prober(&lb, Arc::new(ConstantProbe::alive())).probe_round().await;
        assert_eq!(lb.reachable_servers().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_probe_does_not_stall_round() {
        let lb = balancer(3);
        let stuck = lb.all_servers()[0].clone();

        let started = time::Instant::now();
        let summary = prober(&lb, Arc::new(Hangs(stuck.clone()))).probe_round().await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.reachable, 2);
        assert!(!lb.registry().is_reachable(&stuck));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_shutdown() {
        let lb = balancer(2);
        let probe = Arc::new(Counting::default());
        let (tx, rx) = broadcast::channel(1);

        let handle = prober(&lb, probe.clone()).spawn(rx);
        time::sleep(Duration::from_secs(65)).await;
        // Rounds at 0s, 30s and 60s, two servers each.
        assert_eq!(probe.0.load(Ordering::SeqCst), 6);

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_disabled_returns_immediately() {
        let lb = balancer(1);
        let mut config = ProbeConfig::default();
        config.enabled = false;
        let (_tx, rx) = broadcast::channel(1);
        Prober::from_config(lb, &config).run(rx).await;
    }
}
