//! Contract Test: Target IP auto-update
//!
//! Constraints verified:
//! - auto_update providers take the detected public IP
//! - The store is written only when the IP actually changed
//! - Detection failures keep the stored IP
//! - The detector is queried at most once per batch

mod common;

use common::*;
use mantrae_dns_core::sync::SyncEvent;
use mantrae_dns_core::traits::{IpSource, ProviderStore};
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;

fn auto(id: i64, ip: &str) -> mantrae_dns_core::config::StoredProvider {
    let mut provider = fake_provider(id, ip);
    provider.config.auto_update = true;
    provider
}

#[tokio::test]
async fn detected_ip_is_persisted_and_published() {
    let detected: IpAddr = "198.51.100.20".parse().unwrap();
    let source = FixedIpSource::new(detected);
    let calls = source.calls();

    let mut h = harness(
        vec![auto(1, "203.0.113.5"), auto(2, "")],
        vec![router("app", &["app.example.com"], vec![1, 2])],
        Some(Arc::new(source) as Arc<dyn IpSource>),
    );

    let report = h.driver.sync_all().await.unwrap();

    assert_eq!(report.failed, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.store.get_provider(1).await.unwrap().config.ip, "198.51.100.20");
    assert_eq!(h.store.get_provider(2).await.unwrap().config.ip, "198.51.100.20");
    assert_eq!(h.backend.named("app.example.com")[0].content, "198.51.100.20");

    let refreshed: Vec<_> = h
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, SyncEvent::IpRefreshed { .. }))
        .collect();
    assert_eq!(refreshed.len(), 2);
    assert!(refreshed.contains(&SyncEvent::IpRefreshed {
        provider_id: 1,
        previous: "203.0.113.5".to_string(),
        current: detected,
    }));
}

#[tokio::test]
async fn unchanged_ip_is_not_rewritten() {
    let source = FixedIpSource::new("203.0.113.5".parse().unwrap());
    let mut h = harness(
        vec![auto(1, "203.0.113.5")],
        vec![router("app", &["app.example.com"], vec![1])],
        Some(Arc::new(source) as Arc<dyn IpSource>),
    );

    h.driver.sync_all().await.unwrap();

    assert!(!h
        .drain_events()
        .iter()
        .any(|e| matches!(e, SyncEvent::IpRefreshed { .. })));
}

#[tokio::test]
async fn detection_failure_keeps_stored_ip() {
    let h = harness(
        vec![auto(1, "203.0.113.5")],
        vec![router("app", &["app.example.com"], vec![1])],
        Some(Arc::new(FailingIpSource) as Arc<dyn IpSource>),
    );

    let report = h.driver.sync_all().await.unwrap();

    assert_eq!(report.succeeded, 1);
    assert_eq!(h.store.get_provider(1).await.unwrap().config.ip, "203.0.113.5");
    assert_eq!(h.backend.named("app.example.com")[0].content, "203.0.113.5");
}

#[tokio::test]
async fn manual_providers_ignore_detection() {
    let source = FixedIpSource::new("198.51.100.20".parse().unwrap());
    let calls = source.calls();
    let h = harness(
        vec![fake_provider(1, "203.0.113.5")],
        vec![router("app", &["app.example.com"], vec![1])],
        Some(Arc::new(source) as Arc<dyn IpSource>),
    );

    h.driver.sync_all().await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.backend.named("app.example.com")[0].content, "203.0.113.5");
}
