//! Trusted range bootstrap against a mock upstream API.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use webhook_gate::lifecycle::Shutdown;
use webhook_gate::security::CidrBlock;
use webhook_gate::upstream::{spawn_refresh, AppCredentials, BootstrapError, Bootstrapper};
use webhook_gate::TrustedRanges;

mod common;

fn bootstrapper(base_url: &str) -> Bootstrapper {
    Bootstrapper::new(
        AppCredentials::new("12345", common::PRIVATE_KEY),
        base_url,
        Duration::from_secs(5),
        "webhook-gate-tests",
    )
    .unwrap()
}

fn block(s: &str) -> CidrBlock {
    s.parse().unwrap()
}

#[tokio::test]
async fn test_fetches_hook_ranges_as_installation() {
    let mock = Arc::new(common::MockUpstream {
        installations: vec![42, 43],
        hooks: vec!["192.30.252.0/22", "185.199.108.0/22", "2a0a:a440::/29", "not-a-cidr"],
        ..Default::default()
    });
    let base = common::start_mock_upstream(mock.clone()).await;

    let ranges = bootstrapper(&base).fetch_trusted_ranges().await.unwrap();

    assert_eq!(ranges, vec![block("192.30.252.0/22"), block("185.199.108.0/22")]);
    assert_eq!(mock.last_per_page.lock().unwrap().as_deref(), Some("1"));
    assert_eq!(mock.installation_calls.load(Ordering::SeqCst), 1);
    assert_eq!(mock.token_calls.load(Ordering::SeqCst), 1);
    assert_eq!(mock.meta_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_no_installations() {
    let mock = Arc::new(common::MockUpstream {
        installations: vec![],
        hooks: vec!["192.30.252.0/22"],
        ..Default::default()
    });
    let base = common::start_mock_upstream(mock.clone()).await;

    let err = bootstrapper(&base).fetch_trusted_ranges().await.unwrap_err();

    assert!(matches!(err, BootstrapError::NoInstallation));
    assert_eq!(mock.token_calls.load(Ordering::SeqCst), 0);
    assert_eq!(mock.meta_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rejected_app_credentials() {
    let mock = Arc::new(common::MockUpstream {
        installations: vec![42],
        app_failure: Some(StatusCode::UNAUTHORIZED),
        ..Default::default()
    });
    let base = common::start_mock_upstream(mock).await;

    let err = bootstrapper(&base).fetch_trusted_ranges().await.unwrap_err();
    assert!(matches!(err, BootstrapError::Credential(_)));
}

#[tokio::test]
async fn test_upstream_error_status() {
    let mock = Arc::new(common::MockUpstream {
        installations: vec![42],
        app_failure: Some(StatusCode::BAD_GATEWAY),
        ..Default::default()
    });
    let base = common::start_mock_upstream(mock).await;

    let err = bootstrapper(&base).fetch_trusted_ranges().await.unwrap_err();
    assert!(matches!(err, BootstrapError::Status { status: 502, .. }));
}

#[tokio::test]
async fn test_unreachable_upstream() {
    // Bind then drop to get a port nothing listens on
    let port = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };
    let err = bootstrapper(&format!("http://127.0.0.1:{}", port))
        .fetch_trusted_ranges()
        .await
        .unwrap_err();
    assert!(matches!(err, BootstrapError::Http { .. } | BootstrapError::Timeout { .. }));
}

#[tokio::test]
async fn test_periodic_refresh_swaps_ranges() {
    let mock = Arc::new(common::MockUpstream {
        installations: vec![7],
        hooks: vec!["10.0.0.0/8"],
        ..Default::default()
    });
    let base = common::start_mock_upstream(mock.clone()).await;

    let ranges = TrustedRanges::empty();
    let shutdown = Shutdown::new();
    let handle = spawn_refresh(
        Arc::new(bootstrapper(&base)),
        ranges.clone(),
        Duration::from_millis(100),
        shutdown.subscribe(),
    );

    let mut refreshed = false;
    for _ in 0..50 {
        if ranges.contains("10.1.2.3") {
            refreshed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(refreshed, "refresh task should have loaded the ranges");

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("refresh task should stop on shutdown")
        .unwrap();
}

#[tokio::test]
async fn test_refresh_with_no_usable_ranges_keeps_current_set() {
    let mock = Arc::new(common::MockUpstream {
        installations: vec![7],
        hooks: vec!["2a0a:a440::/29", "not-a-cidr"],
        ..Default::default()
    });
    let base = common::start_mock_upstream(mock.clone()).await;

    let ranges = TrustedRanges::new(vec![block("10.0.0.0/8")]);
    let shutdown = Shutdown::new();
    let handle = spawn_refresh(
        Arc::new(bootstrapper(&base)),
        ranges.clone(),
        Duration::from_millis(100),
        shutdown.subscribe(),
    );

    for _ in 0..50 {
        if mock.meta_calls.load(Ordering::SeqCst) >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(mock.meta_calls.load(Ordering::SeqCst) >= 2, "refresh should have run");
    assert_eq!(ranges.snapshot().as_slice(), &[block("10.0.0.0/8")]);
    assert!(ranges.contains("10.1.2.3"));

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("refresh task should stop on shutdown")
        .unwrap();
}
