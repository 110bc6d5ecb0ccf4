//! End-to-end instrumentation tests against a live listener.

use std::time::Duration;

use monitoring_demo::config::{FaultConfig, FaultRates};
use monitoring_demo::observability::metrics::{
    ERROR_COUNT, REQUEST_CANCELLED, REQUEST_COUNT, REQUEST_LATENCY,
};
use monitoring_demo::observability::Level;

mod common;

#[tokio::test]
async fn test_concurrent_requests_share_one_series() {
    let service = common::start_service(common::quiet_config()).await;
    let client = reqwest::Client::new();

    let mut tasks = Vec::new();
    for i in 0..100 {
        let client = client.clone();
        let url = service.url(&format!("/items/{}", i + 1));
        tasks.push(tokio::spawn(async move {
            client.get(url).send().await.unwrap().status()
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), 200);
    }

    let labels = [("method", "GET"), ("endpoint", "/items/{id}"), ("status", "200")];
    assert_eq!(service.registry.counter_value(REQUEST_COUNT, &labels), Some(100));
    let latency = service
        .registry
        .histogram_snapshot(REQUEST_LATENCY, &[("method", "GET"), ("endpoint", "/items/{id}")])
        .unwrap();
    assert_eq!(latency.count, 100);
    assert_eq!(service.log.len(), 100);
    assert!(service.log.events().iter().all(|e| e.level == Level::Info));

    let text = reqwest::get(format!("http://{}/metrics", service.metrics_addr))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(text.contains(
        "request_count_total{method=\"GET\",endpoint=\"/items/{id}\",status=\"200\"} 100"
    ));
    assert!(text.contains(
        "request_latency_seconds_count{method=\"GET\",endpoint=\"/items/{id}\"} 100"
    ));
    assert!(!text.contains("error_count_total{"));
    assert!(!text.contains("/items/1\""));

    service.shutdown.trigger();
}

#[tokio::test]
async fn test_trace_header_round_trip() {
    let service = common::start_service(common::quiet_config()).await;
    let client = reqwest::Client::new();
    let trace = "0af7651916cd43dd8448eb211c80319c";

    let response = client
        .get(service.url("/health"))
        .header("traceparent", format!("00-{trace}-b7ad6b7169203331-01"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.headers()["x-trace-id"], trace);
    let echoed = response.headers()["traceparent"].to_str().unwrap().to_string();
    assert!(echoed.starts_with(&format!("00-{trace}-")));
    assert!(!echoed.contains("b7ad6b7169203331"));

    let response = client
        .get(service.url("/health"))
        .header("traceparent", "garbage")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let fresh = response.headers()["x-trace-id"].to_str().unwrap().to_string();
    assert_eq!(fresh.len(), 32);
    assert_ne!(fresh, trace);

    let events = service.log.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].trace_id, trace);
    assert_eq!(events[1].trace_id, fresh);

    service.shutdown.trigger();
}

#[tokio::test]
async fn test_fault_policy_hot_reload() {
    let service = common::start_service(common::quiet_config()).await;
    let client = reqwest::Client::new();

    let status = client.get(service.url("/health")).send().await.unwrap().status();
    assert_eq!(status, 200);

    let mut config = common::quiet_config();
    let mut faults = FaultConfig::disabled();
    faults
        .endpoints
        .insert("/health".into(), FaultRates::server_error(1.0, 503));
    config.faults = faults;
    service.config_tx.send(config).unwrap();

    let mut status = 200;
    for _ in 0..50 {
        status = client.get(service.url("/health")).send().await.unwrap().status().as_u16();
        if status == 503 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status, 503);
    assert!(
        service
            .registry
            .counter_value(
                ERROR_COUNT,
                &[("endpoint", "/health"), ("error_type", "health_check_failed")]
            )
            .unwrap_or(0)
            >= 1
    );
    let last = service.log.events().pop().unwrap();
    assert_eq!(last.level, Level::Error);

    service.shutdown.trigger();
}

#[tokio::test]
async fn test_request_timeout_is_recorded_as_cancelled() {
    let mut config = common::quiet_config();
    config.timeouts.request_secs = 1;
    config.workload.min_work_ms = 3_000;
    config.workload.max_work_ms = 3_000;
    let service = common::start_service(config).await;

    let response = reqwest::get(service.url("/api/data")).await.unwrap();
    assert_eq!(response.status(), 408);
    assert!(common::wait_until(Duration::from_secs(2), || service.log.len() == 1).await);

    assert_eq!(
        service
            .registry
            .counter_value(REQUEST_CANCELLED, &[("method", "GET"), ("endpoint", "/api/data")]),
        Some(1)
    );
    assert_eq!(
        service.registry.counter_value(
            REQUEST_COUNT,
            &[("method", "GET"), ("endpoint", "/api/data"), ("status", "499")]
        ),
        Some(1)
    );
    assert_eq!(service.registry.counter_total(ERROR_COUNT), 0);

    let events = service.log.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].message, "Request cancelled");
    assert_eq!(events[0].level, Level::Warning);

    service.shutdown.trigger();
}
