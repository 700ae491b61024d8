//! NATS key-value integration tests
//!
//! These tests require a running NATS server with JetStream enabled:
//!   nats-server -js
//!
//! Tests are skipped automatically if NATS is not available.

use a3s_alerts::provider::nats::{NatsConfig, NatsProvider, StorageType};
use a3s_alerts::{
    AlertError, AlertProvider, AlertQuery, LoginAttempt, LoginMonitor, MonitorConfig, NewAlert,
    SecurityService,
};
use std::sync::Arc;
use std::time::Duration;

/// Try to connect to NATS. Returns None if server is unavailable.
async fn try_nats_provider(suffix: &str) -> Option<NatsProvider> {
    let run = uuid::Uuid::new_v4().simple().to_string();
    let config = NatsConfig {
        url: "nats://127.0.0.1:4222".to_string(),
        alerts_bucket: format!("TEST_ALERTS_{}_{}", suffix, &run[..8]),
        logins_bucket: format!("TEST_LOGINS_{}_{}", suffix, &run[..8]),
        storage: StorageType::Memory,
        login_retention_secs: 300,
        connect_timeout_secs: 2,
        ..Default::default()
    };

    match NatsProvider::connect(config).await {
        Ok(provider) => Some(provider),
        Err(_) => {
            eprintln!("NATS not available, skipping integration test");
            None
        }
    }
}

/// Helper to connect a provider, or skip the test
macro_rules! nats_provider {
    ($suffix:expr) => {
        match try_nats_provider($suffix).await {
            Some(p) => p,
            None => return,
        }
    };
}

async fn next_snapshot(
    feed: &mut Box<dyn a3s_alerts::AlertSubscription>,
) -> a3s_alerts::AlertSnapshot {
    tokio::time::timeout(Duration::from_secs(5), feed.next())
        .await
        .expect("no snapshot within 5s")
        .unwrap()
        .expect("feed ended")
}

#[tokio::test]
async fn test_nats_create_and_get() {
    let provider = nats_provider!("create");

    let alert = provider
        .create_alert(NewAlert::new("u@x.com", 5))
        .await
        .unwrap();
    assert!(alert.id.starts_with("alert-"));

    let stored = provider.get_alert(&alert.id).await.unwrap().unwrap();
    assert_eq!(stored, alert);
    assert!(provider.get_alert("alert-missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_nats_feed_follows_writes() {
    let provider = nats_provider!("feed");
    let existing = provider
        .create_alert(NewAlert::new("a@x.com", 5))
        .await
        .unwrap();

    let mut feed = provider.subscribe_unread().await.unwrap();
    let snapshot = next_snapshot(&mut feed).await;
    assert!(snapshot.contains(&existing.id));

    let added = provider
        .create_alert(NewAlert::new("b@x.com", 7))
        .await
        .unwrap();
    let snapshot = next_snapshot(&mut feed).await;
    assert!(snapshot.contains(&added.id));
    assert_eq!(snapshot.len(), 2);

    provider.mark_read(&existing.id).await.unwrap();
    let snapshot = next_snapshot(&mut feed).await;
    assert!(!snapshot.contains(&existing.id));
    assert_eq!(snapshot.len(), 1);
}

#[tokio::test]
async fn test_nats_mark_read_idempotent_and_missing() {
    let provider = nats_provider!("mark");
    let alert = provider
        .create_alert(NewAlert::new("u@x.com", 5))
        .await
        .unwrap();

    provider.mark_read(&alert.id).await.unwrap();
    provider.mark_read(&alert.id).await.unwrap();
    assert!(provider.get_alert(&alert.id).await.unwrap().unwrap().read);

    let err = provider.mark_read("alert-missing").await.unwrap_err();
    assert!(matches!(err, AlertError::NotFound(_)));
}

#[tokio::test]
async fn test_nats_stats_and_logins() {
    let provider = nats_provider!("stats");

    provider
        .record_login(&LoginAttempt::new("u@x.com", false))
        .await
        .unwrap();
    provider
        .record_login(&LoginAttempt::new("u@x.com", true))
        .await
        .unwrap();
    provider
        .create_alert(NewAlert::new("u@x.com", 5))
        .await
        .unwrap();

    let service = SecurityService::new(provider);
    let stats = service.get_stats().await.unwrap();
    assert_eq!(stats.failed_logins_24h, 1);
    assert_eq!(stats.success_logins_24h, 1);
    assert_eq!(stats.unread_alerts, 1);
    assert_eq!(stats.locked_accounts, 0);
}

#[tokio::test]
async fn test_nats_monitor_raises_lockout() {
    let provider = Arc::new(nats_provider!("monitor"));
    let monitor = LoginMonitor::new(provider.clone(), MonitorConfig::default()).unwrap();

    for _ in 0..5 {
        monitor.record_attempt("u@x.com", false, None).await.unwrap();
    }

    let alerts = provider
        .list_alerts(&AlertQuery::all().for_email("u@x.com"))
        .await
        .unwrap();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].lockout_until.is_some());
    assert!(monitor.is_locked("u@x.com").await.unwrap());
}

#[tokio::test]
async fn test_nats_malformed_document_ends_feed() {
    let provider = nats_provider!("schema");
    let mut feed = provider.subscribe_unread().await.unwrap();
    next_snapshot(&mut feed).await;

    let js = async_nats::jetstream::new(provider.client().nats_client().clone());
    let bucket = js
        .get_key_value(&provider.client().config().alerts_bucket)
        .await
        .unwrap();
    bucket
        .put("alert-broken", r#"{"email": "u@x.com"}"#.into())
        .await
        .unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), feed.next())
        .await
        .expect("no update within 5s")
        .unwrap_err();
    assert!(matches!(err, AlertError::Schema { .. }));
    assert!(feed.next().await.unwrap().is_none());
}

#[tokio::test]
async fn test_nats_subscriber_count() {
    let provider = nats_provider!("subs");
    let feed = provider.subscribe_unread().await.unwrap();
    assert_eq!(provider.info().await.unwrap().subscribers, 1);
    drop(feed);
    assert_eq!(provider.info().await.unwrap().subscribers, 0);
}
