//! Traffic generator runs against a live demo service.

use std::time::{Duration, Instant};

use monitoring_demo::faults::FaultKind;
use monitoring_demo::lifecycle::Shutdown;
use monitoring_demo::observability::metrics::{ERROR_COUNT, REQUEST_COUNT};
use monitoring_demo::traffic::{self, EndpointWeight, TrafficConfig, TrafficError};

mod common;

#[tokio::test]
async fn test_half_faulted_run() {
    let service = common::start_service(common::quiet_config()).await;

    let mut config = TrafficConfig::new(service.base_url());
    config.rate = 10.0;
    config.duration = Duration::from_secs(5);
    config.endpoints = vec![EndpointWeight::new("/items/{id}", 1)];
    config.fault_fraction = 0.5;
    config.fault_kind = FaultKind::ServerError;
    config.seed = Some(7);
    config.issuers = 2;

    let shutdown = Shutdown::new();
    let summary = traffic::run(config, reqwest::Client::new(), shutdown.subscribe())
        .await
        .unwrap();

    assert!(!summary.cancelled);
    assert!((45..=50).contains(&summary.issued), "{summary:?}");
    assert!((15..=35).contains(&summary.failed), "{summary:?}");
    assert_eq!(summary.succeeded + summary.failed, summary.issued);
    assert_eq!(summary.server_errors, summary.failed);
    assert_eq!(summary.abandoned, 0);
    assert_eq!(summary.latency.samples as u64, summary.issued);

    // The service saw the same traffic (plus the startup probe).
    let injected = service
        .registry
        .counter_value(
            ERROR_COUNT,
            &[("endpoint", "/items/{id}"), ("error_type", "injected_fault")],
        )
        .unwrap_or(0);
    assert_eq!(injected, summary.server_errors);
    let ok = service
        .registry
        .counter_value(
            REQUEST_COUNT,
            &[("method", "GET"), ("endpoint", "/items/{id}"), ("status", "200")],
        )
        .unwrap_or(0);
    assert_eq!(ok, summary.succeeded);

    service.shutdown.trigger();
}

#[tokio::test]
async fn test_unreachable_target_fails_probe() {
    let addr = common::unused_addr().await;
    let config = TrafficConfig::new(url::Url::parse(&format!("http://{addr}")).unwrap());

    let shutdown = Shutdown::new();
    let result = traffic::run(config, reqwest::Client::new(), shutdown.subscribe()).await;
    assert!(matches!(result, Err(TrafficError::Unreachable { .. })));
}

#[tokio::test]
async fn test_silent_target_fails_startup_within_timeout() {
    let addr = common::silent_addr().await;
    let mut config = TrafficConfig::new(url::Url::parse(&format!("http://{addr}")).unwrap());
    config.request_timeout = Duration::from_millis(200);

    let shutdown = Shutdown::new();
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        traffic::run(config, reqwest::Client::new(), shutdown.subscribe()),
    )
    .await
    .expect("run should give up on a silent target");
    assert!(matches!(result, Err(TrafficError::Unreachable { .. })));
}

#[tokio::test]
async fn test_interrupt_stops_issuing() {
    let service = common::start_service(common::quiet_config()).await;

    let mut config = TrafficConfig::new(service.base_url());
    config.rate = 20.0;
    config.duration = Duration::from_secs(30);
    config.endpoints = vec![EndpointWeight::new("/health", 1)];
    config.issuers = 2;

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        trigger.trigger();
    });

    let started = Instant::now();
    let summary = traffic::run(config, reqwest::Client::new(), shutdown.subscribe())
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(summary.cancelled);
    assert!(summary.issued > 0 && summary.issued < 600, "{summary:?}");
    assert_eq!(
        summary.succeeded + summary.failed + summary.abandoned,
        summary.issued
    );

    service.shutdown.trigger();
}

#[tokio::test]
async fn test_slow_requests_are_abandoned_after_drain() {
    let mut service_config = common::quiet_config();
    service_config.workload.min_work_ms = 3_000;
    service_config.workload.max_work_ms = 3_000;
    let service = common::start_service(service_config).await;

    let mut config = TrafficConfig::new(service.base_url());
    config.rate = 20.0;
    config.duration = Duration::from_secs(30);
    config.endpoints = vec![EndpointWeight::new("/", 1)];
    config.issuers = 1;
    config.burst = 4;
    config.drain_timeout = Duration::from_millis(100);

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(400)).await;
        trigger.trigger();
    });

    let summary = traffic::run(config, reqwest::Client::new(), shutdown.subscribe())
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.issued, 4, "{summary:?}");
    assert_eq!(summary.abandoned, 4);
    assert_eq!(summary.succeeded + summary.failed, 0);

    service.shutdown.trigger();
}
