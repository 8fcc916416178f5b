//! Failure injection tests for the load balancer.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use client_balancer::health::{now_millis, Prober, TcpProbe};
use client_balancer::load_balancer::LeastActive;
use client_balancer::resilience::DefaultRetryPolicy;
use client_balancer::{AttemptFailure, Error, LoadBalancer};

mod common;

#[tokio::test]
async fn test_503_retried_on_next_server() {
    let healthy = common::start_mock_backend("ok").await;

    let unavailable_calls = Arc::new(AtomicU32::new(0));
    let uc = unavailable_calls.clone();
    let unavailable = common::start_programmable_backend(move || {
        let uc = uc.clone();
        async move {
            uc.fetch_add(1, Ordering::SeqCst);
            (503, "Service Unavailable".into())
        }
    })
    .await;

    // Round-robin starts at index 1, so the failing server is tried first.
    let lb = LoadBalancer::builder("web")
        .servers(vec![healthy.clone(), unavailable.clone()])
        .retry_policy(Arc::new(DefaultRetryPolicy::new(0, 1)))
        .build();
    let client = common::http_client();

    let body = lb
        .execute(|server| {
            let client = client.clone();
            async move { common::send(&client, &server).await }
        })
        .await
        .unwrap();

    assert_eq!(body, "ok");
    assert_eq!(unavailable_calls.load(Ordering::SeqCst), 1);
    // The server answered, so its breaker stays closed.
    assert!(!lb.registry().is_circuit_breaker_tripped(&unavailable, now_millis()));
}

#[tokio::test]
async fn test_dead_server_is_avoided_after_trip() {
    let dead = common::dead_server().await;
    let live = common::start_mock_backend("live").await;

    let lb = LoadBalancer::builder("web")
        .rule(Arc::new(LeastActive::new()))
        .servers(vec![dead.clone(), live.clone()])
        .build();
    let client = common::http_client();

    // Both idle: the dead server wins the tie, fails, and the retry moves on.
    let body = lb
        .execute(|server| {
            let client = client.clone();
            async move { common::send(&client, &server).await }
        })
        .await
        .unwrap();
    assert_eq!(body, "live");
    assert!(lb.registry().is_circuit_breaker_tripped(&dead, now_millis()));

    for _ in 0..20 {
        assert_eq!(lb.choose_server().unwrap(), live);
    }
}

#[tokio::test]
async fn test_retries_exhausted_when_everything_is_down() {
    let lb = LoadBalancer::builder("web")
        .servers(vec![common::dead_server().await, common::dead_server().await])
        .retry_policy(Arc::new(DefaultRetryPolicy::new(1, 1)))
        .build();
    let client = common::http_client();

    let err = lb
        .execute(|server| {
            let client = client.clone();
            async move { common::send(&client, &server).await }
        })
        .await
        .unwrap_err();

    // Refused connections are never retried on the same server.
    match err {
        Error::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 2);
            assert_eq!(last, AttemptFailure::ConnectionRefused);
        }
        other => panic!("unexpected error: {other}"),
    }

    let stats = lb.stats(now_millis());
    assert_eq!(stats.active_requests, 0);
    assert_eq!(stats.servers.iter().map(|s| s.health.total_failures).sum::<u64>(), 2);
}

#[tokio::test]
async fn test_hanging_probe_does_not_stall_round() {
    let a = common::start_mock_backend("a").await;
    let b = common::start_mock_backend("b").await;
    let lb = Arc::new(LoadBalancer::builder("web").servers(vec![a.clone(), b.clone()]).build());

    let probe = Arc::new(common::HangingProbe {
        stuck: vec![a.clone()],
    });
    let prober = Prober::new(lb.clone(), probe, Duration::from_secs(30), Duration::from_millis(200));

    let started = Instant::now();
    let summary = prober.probe_round().await;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(summary.timed_out, 1);
    assert_eq!(summary.reachable, 1);

    assert_eq!(*lb.reachable_servers(), vec![b.clone()]);
    for _ in 0..5 {
        assert_eq!(lb.choose_server().unwrap(), b);
    }
}

#[tokio::test]
async fn test_tcp_probe_detects_dead_server() {
    let live = common::start_mock_backend("live").await;
    let dead = common::dead_server().await;
    let lb = Arc::new(LoadBalancer::builder("web").servers(vec![live.clone(), dead.clone()]).build());

    let prober = Prober::new(lb.clone(), Arc::new(TcpProbe), Duration::from_secs(30), Duration::from_secs(1));
    let summary = prober.probe_round().await;

    assert_eq!(summary.reachable, 1);
    assert_eq!(summary.unreachable, 1);
    assert!(!lb.registry().is_reachable(&dead));
    // Probe failures never count toward the circuit breaker.
    assert!(!lb.registry().is_circuit_breaker_tripped(&dead, now_millis()));
}
