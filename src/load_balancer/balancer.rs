//! Load balancer orchestration.
//!
//! # Responsibilities
//! - Hold the authoritative server list and its reachable subset
//! - Delegate selection to the configured rule
//! - Record attempt outcomes into the health registry
//! - Drive a caller's operation through the retry policy
//!
//! # Design Decisions
//! - The full list and its reachable subset swap together as one `ArcSwap`
//!   snapshot; the subset is always drawn from the list it sits beside
//! - An attempt is closed by its guard, so a cancelled caller cannot leak
//!   an in-flight count
//! - The balancer never inspects the transport; callers report outcomes
//! - Selection failure is terminal for a request and is never retried here

use std::future::Future;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::loader::ConfigError;
use crate::config::schema::LoadBalancerConfig;
use crate::config::validation::validate_config;
use crate::error::{Error, Result};
use crate::health::registry::{HealthRegistry, RegistrySnapshot};
use crate::health::stats::now_millis;
use crate::load_balancer::filter::{RandomSubsetFilter, ServerListFilter};
use crate::load_balancer::list::StaticServerList;
use crate::load_balancer::round_robin::RoundRobin;
use crate::load_balancer::{rule_from_config, SelectionRule, Server, ServerView};
use crate::observability::metrics;
use crate::resilience::retries::{
    AttemptFailure, DefaultRetryPolicy, RetryDecision, RetryPolicy, RetryTracker,
};

/// A server list paired with the reachable subset derived from it.
#[derive(Debug, Default)]
struct ServerLists {
    all: Arc<Vec<Server>>,
    reachable: Arc<Vec<Server>>,
}

impl ServerLists {
    fn derive(all: Arc<Vec<Server>>, registry: &HealthRegistry) -> Self {
        let reachable = all
            .iter()
            .filter(|server| registry.is_reachable(server))
            .cloned()
            .collect();
        Self {
            all,
            reachable: Arc::new(reachable),
        }
    }
}

/// Client-side load balancer for one named group of servers.
#[derive(Debug)]
pub struct LoadBalancer {
    name: String,
    lists: ArcSwap<ServerLists>,
    registry: Arc<HealthRegistry>,
    rule: Arc<dyn SelectionRule>,
    retry_policy: Arc<dyn RetryPolicy>,
    filter: Option<Arc<dyn ServerListFilter>>,
}

impl LoadBalancer {
    pub fn builder(name: impl Into<String>) -> LoadBalancerBuilder {
        LoadBalancerBuilder::new(name)
    }

    /// Build a balancer from a configuration, validating it first.
    pub fn from_config(config: &LoadBalancerConfig) -> Result<Self> {
        validate_config(config).map_err(ConfigError::Validation)?;
        let servers = StaticServerList::from_config(&config.servers)?;

        let mut builder = Self::builder(config.name.clone())
            .rule(rule_from_config(&config.selection))
            .retry_policy(Arc::new(DefaultRetryPolicy::from_config(&config.retries)))
            .registry(Arc::new(HealthRegistry::from_config(&config.circuit_breaker)))
            .servers(servers.into_servers());
        if let Some(size) = config.selection.subset_size {
            builder = builder.filter(Arc::new(RandomSubsetFilter::new(size)));
        }
        Ok(builder.build())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rule(&self) -> &dyn SelectionRule {
        self.rule.as_ref()
    }

    pub fn registry(&self) -> &Arc<HealthRegistry> {
        &self.registry
    }

    pub fn retry_policy(&self) -> &Arc<dyn RetryPolicy> {
        &self.retry_policy
    }

    /// Current snapshot of every known server.
    pub fn all_servers(&self) -> Arc<Vec<Server>> {
        self.lists.load().all.clone()
    }

    /// Current snapshot of servers the prober considers reachable.
    pub fn reachable_servers(&self) -> Arc<Vec<Server>> {
        self.lists.load().reachable.clone()
    }

    /// Replace the server list wholesale.
    ///
    /// The list filter (if any) runs first. Health history survives for
    /// servers still present in `servers`; entries for the rest are pruned.
    pub fn set_servers(&self, servers: Vec<Server>) {
        self.registry.retain_only(&servers);

        let servers = match &self.filter {
            Some(filter) => filter.filter(servers, &self.registry, now_millis()),
            None => servers,
        };
        self.registry.track(&servers);

        let all = Arc::new(servers);
        let previous = self
            .lists
            .rcu(|_| ServerLists::derive(all.clone(), &self.registry));
        if previous.all.as_slice() != all.as_slice() {
            tracing::info!(
                lb = %self.name,
                previous = previous.all.len(),
                current = all.len(),
                "Server list updated"
            );
        }
    }

    /// Recompute the reachable subset from the registry.
    pub fn refresh_reachable(&self) {
        self.lists
            .rcu(|current| ServerLists::derive(current.all.clone(), &self.registry));
    }

    pub fn choose_server(&self) -> Result<Server> {
        self.choose_server_at(now_millis())
    }

    /// Select a server as of `now` (milliseconds since the Unix epoch).
    pub fn choose_server_at(&self, now: u64) -> Result<Server> {
        let lists = self.lists.load_full();
        let view = ServerView {
            all: lists.all.as_slice(),
            reachable: lists.reachable.as_slice(),
            registry: &self.registry,
            now,
        };

        match self.rule.choose(&view) {
            Some(server) => {
                metrics::record_selection(&self.name, &server);
                tracing::debug!(lb = %self.name, rule = self.rule.name(), server = %server, "Server selected");
                Ok(server)
            }
            None => {
                metrics::record_no_server_available(&self.name);
                tracing::warn!(
                    lb = %self.name,
                    rule = self.rule.name(),
                    servers = lists.all.len(),
                    reachable = lists.reachable.len(),
                    "No server available"
                );
                Err(Error::NoServerAvailable {
                    lb: self.name.clone(),
                })
            }
        }
    }

    pub fn record_attempt_start(&self, server: &Server) {
        self.record_attempt_start_at(server, now_millis());
    }

    pub fn record_attempt_start_at(&self, server: &Server, now: u64) {
        self.registry.record_attempt_start(server, now);
    }

    /// Record an attempt start and return the guard that closes it.
    pub fn start_attempt(&self, server: &Server) -> AttemptGuard<'_> {
        self.record_attempt_start(server);
        AttemptGuard {
            lb: self,
            server: server.clone(),
            finished: false,
        }
    }

    /// Report how an attempt ended; `None` means success.
    pub fn report_outcome(&self, server: &Server, failure: Option<&AttemptFailure>) {
        self.report_outcome_at(server, failure, now_millis());
    }

    pub fn report_outcome_at(&self, server: &Server, failure: Option<&AttemptFailure>, now: u64) {
        match failure {
            None => self.registry.record_attempt_end(server, true, false, now),
            Some(failure) => {
                let tripping = self.retry_policy.is_circuit_tripping_failure(failure);
                tracing::debug!(
                    lb = %self.name,
                    server = %server,
                    error = %failure,
                    circuit_tripping = tripping,
                    "Attempt failed"
                );
                self.registry.record_attempt_end(server, false, tripping, now);
            }
        }
    }

    /// Aggregate health view over the current server list.
    pub fn stats(&self, now: u64) -> RegistrySnapshot {
        self.registry.snapshot(&self.lists.load().all, now)
    }

    /// Run `op` against selected servers until it succeeds or the retry
    /// policy gives up.
    ///
    /// Each attempt is bracketed by start/outcome recording, including when
    /// the returned future is dropped mid-attempt. A selection failure aborts
    /// immediately with [`Error::NoServerAvailable`].
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(Server) -> Fut,
        Fut: Future<Output = std::result::Result<T, AttemptFailure>>,
    {
        let mut tracker = RetryTracker::new(self.retry_policy.as_ref());
        let mut server = self.choose_server()?;

        loop {
            let attempt = self.start_attempt(&server);
            let failure = match op(server.clone()).await {
                Ok(value) => {
                    attempt.finish(None);
                    return Ok(value);
                }
                Err(failure) => failure,
            };
            attempt.finish(Some(&failure));

            match tracker.on_failure(&failure) {
                RetryDecision::SameServer => {
                    metrics::record_retry(&self.name, true);
                    tracing::debug!(lb = %self.name, server = %server, attempt = tracker.attempts(), "Retrying on same server");
                }
                RetryDecision::NextServer => {
                    metrics::record_retry(&self.name, false);
                    server = self.choose_server()?;
                    tracing::debug!(lb = %self.name, server = %server, attempt = tracker.attempts(), "Retrying on next server");
                }
                RetryDecision::GiveUp => {
                    return Err(Error::RetriesExhausted {
                        attempts: tracker.attempts(),
                        last: failure,
                    });
                }
            }
        }
    }
}

/// An in-flight attempt on one server.
///
/// [`AttemptGuard::finish`] reports the outcome. Dropping the guard
/// unfinished records a failure that does not count toward the breaker.
#[derive(Debug)]
#[must_use = "dropping the guard ends the attempt as a failure"]
pub struct AttemptGuard<'a> {
    lb: &'a LoadBalancer,
    server: Server,
    finished: bool,
}

impl AttemptGuard<'_> {
    pub fn server(&self) -> &Server {
        &self.server
    }

    /// Report how the attempt ended; `None` means success.
    pub fn finish(mut self, failure: Option<&AttemptFailure>) {
        self.finished = true;
        self.lb.report_outcome(&self.server, failure);
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        tracing::debug!(lb = %self.lb.name, server = %self.server, "Attempt abandoned before completion");
        self.lb
            .registry
            .record_attempt_end(&self.server, false, false, now_millis());
    }
}

/// Builder for [`LoadBalancer`]; unset parts get round-robin, the default
/// retry policy and a default registry.
#[derive(Debug)]
pub struct LoadBalancerBuilder {
    name: String,
    servers: Vec<Server>,
    rule: Option<Arc<dyn SelectionRule>>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    registry: Option<Arc<HealthRegistry>>,
    filter: Option<Arc<dyn ServerListFilter>>,
}

impl LoadBalancerBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            servers: Vec::new(),
            rule: None,
            retry_policy: None,
            registry: None,
            filter: None,
        }
    }

    pub fn servers(mut self, servers: Vec<Server>) -> Self {
        self.servers = servers;
        self
    }

    pub fn rule(mut self, rule: Arc<dyn SelectionRule>) -> Self {
        self.rule = Some(rule);
        self
    }

    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn registry(mut self, registry: Arc<HealthRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn filter(mut self, filter: Arc<dyn ServerListFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn build(self) -> LoadBalancer {
        let lb = LoadBalancer {
            name: self.name,
            lists: ArcSwap::from_pointee(ServerLists::default()),
            registry: self.registry.unwrap_or_default(),
            rule: self.rule.unwrap_or_else(|| Arc::new(RoundRobin::new())),
            retry_policy: self
                .retry_policy
                .unwrap_or_else(|| Arc::new(DefaultRetryPolicy::default())),
            filter: self.filter,
        };
        lb.set_servers(self.servers);
        lb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{RuleKind, ServerConfig};
    use crate::load_balancer::LeastActive;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    fn servers(n: u16) -> Vec<Server> {
        (0..n).map(|i| Server::new("10.0.0.1", 8000 + i)).collect()
    }

    #[test]
    fn test_empty_list_is_no_server_available() {
        let lb = LoadBalancer::builder("empty").build();
        let err = lb.choose_server().unwrap_err();
        assert!(err.is_no_server_available());
        assert_eq!(err.to_string(), "no server available from load balancer 'empty'");
    }

    #[test]
    fn test_round_robin_cycle() {
        let lb = LoadBalancer::builder("rr").servers(servers(3)).build();
        let picks: Vec<Server> = (0..6).map(|_| lb.choose_server().unwrap()).collect();
        for s in servers(3) {
            assert_eq!(picks.iter().filter(|p| **p == s).count(), 2);
        }
        assert_eq!(picks[0], picks[3]);
    }

    #[test]
    fn test_reachable_subset_follows_registry() {
        let lb = LoadBalancer::builder("rr").servers(servers(3)).build();
        let down = servers(3)[1].clone();
        lb.registry().set_reachable(&down, false);
        lb.refresh_reachable();

        assert_eq!(lb.reachable_servers().len(), 2);
        for _ in 0..10 {
            assert_ne!(lb.choose_server().unwrap(), down);
        }
    }

    #[test]
    fn test_unreachable_everywhere_round_robin_returns_none() {
        let lb = LoadBalancer::builder("rr").servers(servers(2)).build();
        for s in servers(2) {
            lb.registry().set_reachable(&s, false);
        }
        lb.refresh_reachable();
        assert!(lb.choose_server().unwrap_err().is_no_server_available());
    }

    #[test]
    fn test_tripped_but_reachable_round_robin_still_selects() {
        let lb = LoadBalancer::builder("rr").servers(servers(3)).build();
        for s in servers(3) {
            lb.record_attempt_start_at(&s, 0);
            lb.report_outcome_at(&s, Some(&AttemptFailure::ConnectionRefused), 0);
        }
        assert!(lb.choose_server_at(1).is_ok());
    }

    #[test]
    fn test_outcome_classification() {
        let lb = LoadBalancer::builder("lb").servers(servers(1)).build();
        let s = servers(1)[0].clone();

        lb.record_attempt_start_at(&s, 0);
        lb.report_outcome_at(&s, Some(&AttemptFailure::Response { status: 503 }), 0);
        assert!(!lb.registry().is_circuit_breaker_tripped(&s, 1));

        lb.record_attempt_start_at(&s, 0);
        lb.report_outcome_at(&s, Some(&AttemptFailure::ConnectTimeout), 0);
        assert!(lb.registry().is_circuit_breaker_tripped(&s, 1));

        lb.record_attempt_start_at(&s, 2);
        lb.report_outcome_at(&s, None, 2);
        assert!(!lb.registry().is_circuit_breaker_tripped(&s, 3));

        let stats = lb.stats(3);
        assert_eq!(stats.servers[0].health.total_requests, 3);
        assert_eq!(stats.servers[0].health.total_failures, 2);
        assert_eq!(stats.active_requests, 0);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["total_servers"], 1);
        assert_eq!(json["servers"][0]["server"], "10.0.0.1:8000");
        assert_eq!(json["servers"][0]["total_failures"], 2);
        assert_eq!(json["servers"][0]["circuit_tripped"], false);
    }

    #[test]
    fn test_set_servers_prunes_registry() {
        let lb = LoadBalancer::builder("lb").servers(servers(3)).build();
        for s in servers(3) {
            lb.record_attempt_start(&s);
        }
        lb.set_servers(servers(2));
        assert_eq!(lb.all_servers().len(), 2);
        assert_eq!(lb.registry().len(), 2);
        assert_eq!(lb.registry().active_requests(&servers(2)[0], 0), 1);

        // A verdict or a stats read for the removed server leaves it removed.
        let removed = servers(3)[2].clone();
        assert!(!lb.registry().set_reachable(&removed, false));
        assert_eq!(lb.stats(0).total_servers, 2);
        assert_eq!(lb.registry().len(), 2);
        assert!(lb.registry().get(&removed).is_none());
    }

    #[test]
    fn test_set_servers_tracks_new_servers() {
        let lb = LoadBalancer::builder("lb").servers(servers(2)).build();
        assert_eq!(lb.registry().len(), 2);

        let down = servers(2)[1].clone();
        assert!(lb.registry().set_reachable(&down, false));
        lb.refresh_reachable();
        assert_eq!(lb.reachable_servers().as_slice(), &servers(2)[..1]);
    }

    #[test]
    fn test_reachable_subset_drawn_from_current_list() {
        let lb = LoadBalancer::builder("lb").servers(servers(50)).build();
        let other: Vec<Server> = (0..50).map(|i| Server::new("10.0.0.2", 8000 + i)).collect();
        let done = AtomicBool::new(false);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    lb.refresh_reachable();
                }
            });
            let checker = scope.spawn(|| {
                let mut mismatches = 0;
                while !done.load(Ordering::Acquire) {
                    let lists = lb.lists.load();
                    if !lists.reachable.iter().all(|s| lists.all.contains(s)) {
                        mismatches += 1;
                    }
                }
                mismatches
            });

            for round in 0..500 {
                lb.set_servers(if round % 2 == 0 { other.clone() } else { servers(50) });
            }
            done.store(true, Ordering::Release);
            assert_eq!(checker.join().unwrap(), 0);
        });

        assert_eq!(lb.all_servers().as_slice(), servers(50).as_slice());
        assert_eq!(lb.reachable_servers().as_slice(), servers(50).as_slice());
    }

    #[test]
    fn test_subset_filter_applied() {
        let lb = LoadBalancer::builder("lb")
            .filter(Arc::new(RandomSubsetFilter::new(2)))
            .rule(Arc::new(LeastActive::new()))
            .servers(servers(5))
            .build();
        assert_eq!(lb.all_servers().len(), 2);
    }

    #[test]
    fn test_from_config() {
        let mut config = LoadBalancerConfig::default();
        config.name = "orders".into();
        config.selection.rule = RuleKind::LeastActive;
        config.servers = vec![ServerConfig {
            address: "10.0.0.2:9000".into(),
            zone: None,
            ready_to_serve: true,
            metadata: Default::default(),
        }];

        let lb = LoadBalancer::from_config(&config).unwrap();
        assert_eq!(lb.name(), "orders");
        assert_eq!(lb.rule().name(), "least_active");
        assert_eq!(lb.choose_server().unwrap(), Server::new("10.0.0.2", 9000));

        config.circuit_breaker.failure_threshold = 0;
        assert!(matches!(
            LoadBalancer::from_config(&config),
            Err(Error::Config(ConfigError::Validation(_)))
        ));
    }

    #[tokio::test]
    async fn test_execute_retries_next_server() {
        let lb = LoadBalancer::builder("lb")
            .servers(servers(2))
            .retry_policy(Arc::new(DefaultRetryPolicy::new(0, 1)))
            .build();
        // The cursor pre-increments, so index 1 is tried first.
        let first = servers(2)[1].clone();
        let first_ref = &first;

        let result = lb
            .execute(|server| async move {
                if server == *first_ref {
                    Err(AttemptFailure::ConnectionRefused)
                } else {
                    Ok(server)
                }
            })
            .await;

        assert_eq!(result.unwrap(), servers(2)[0]);
        assert!(lb.registry().is_circuit_breaker_tripped(&first, now_millis()));
    }

    #[tokio::test]
    async fn test_execute_exhausts_budgets() {
        let lb = LoadBalancer::builder("lb")
            .servers(servers(3))
            .retry_policy(Arc::new(DefaultRetryPolicy::new(1, 1)))
            .build();
        let calls = AtomicU32::new(0);

        let err = lb
            .execute(|_server| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(AttemptFailure::ReadTimeout) }
            })
            .await
            .unwrap_err();

        // 1 + 1 same-server + 1 next-server + 1 same-server on the new one
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match err {
            Error::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 4);
                assert_eq!(last, AttemptFailure::ReadTimeout);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(lb.stats(now_millis()).active_requests, 0);
    }

    #[tokio::test]
    async fn test_execute_no_server() {
        let lb = LoadBalancer::builder("lb").build();
        let err = lb
            .execute(|_server| async { Ok::<_, AttemptFailure>(()) })
            .await
            .unwrap_err();
        assert!(err.is_no_server_available());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_execute_closes_attempt() {
        let lb = LoadBalancer::builder("lb").servers(servers(1)).build();
        let server = servers(1)[0].clone();

        let result = tokio::time::timeout(
            Duration::from_millis(50),
            lb.execute(|_server| std::future::pending::<std::result::Result<(), AttemptFailure>>()),
        )
        .await;
        assert!(result.is_err());

        let stats = lb.stats(now_millis());
        assert_eq!(stats.active_requests, 0);
        assert_eq!(stats.servers[0].health.total_requests, 1);
        assert_eq!(stats.servers[0].health.total_failures, 1);
        assert!(!lb.registry().is_circuit_breaker_tripped(&server, now_millis()));
    }

    #[test]
    fn test_attempt_guard_finish() {
        let lb = LoadBalancer::builder("lb").servers(servers(1)).build();
        let server = servers(1)[0].clone();

        let attempt = lb.start_attempt(&server);
        assert_eq!(attempt.server(), &server);
        assert_eq!(lb.registry().active_requests(&server, 0), 1);
        attempt.finish(Some(&AttemptFailure::ConnectionRefused));

        assert_eq!(lb.registry().active_requests(&server, 0), 0);
        assert!(lb.registry().is_circuit_breaker_tripped(&server, now_millis()));
        assert_eq!(lb.stats(now_millis()).servers[0].health.total_failures, 1);
    }
}
