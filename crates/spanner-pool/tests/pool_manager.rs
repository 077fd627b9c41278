//! Pool sharing and reference counting.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use spanner_auth::{AccessToken, AuthError, Credentials, CredentialsProvider};
use spanner_pool::{PoolError, SessionPoolKey, SessionPoolManager, SessionPoolOptions};
use spanner_protocol::{CancellationToken, DatabaseName, RpcError, TransportOptions};
use spanner_testing::{MockSpanner, MockTransportFactory};

fn database(name: &str) -> DatabaseName {
    format!("projects/p/instances/i/databases/{name}")
        .parse()
        .unwrap()
}

fn key(db: &str) -> SessionPoolKey {
    SessionPoolKey::new(
        database(db),
        TransportOptions::default(),
        SessionPoolOptions::new()
            .min_sessions(2)
            .max_sessions(10)
            .maintenance_interval(Duration::from_secs(3600)),
    )
}

fn manager() -> (SessionPoolManager, Arc<MockTransportFactory>) {
    let spanner = Arc::new(MockSpanner::new());
    let factory = Arc::new(MockTransportFactory::new(spanner));
    (SessionPoolManager::new(factory.clone()), factory)
}

#[derive(Debug)]
struct Failing;

#[async_trait]
impl CredentialsProvider for Failing {
    async fn access_token(&self) -> Result<AccessToken, AuthError> {
        Err(AuthError::TokenUnavailable("metadata server unreachable".into()))
    }
}

#[derive(Debug)]
struct Slow;

#[async_trait]
impl CredentialsProvider for Slow {
    async fn access_token(&self) -> Result<AccessToken, AuthError> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(AccessToken::new("slow"))
    }
}

#[tokio::test(start_paused = true)]
async fn test_equal_keys_share_a_pool() {
    let (manager, factory) = manager();
    let cancel = CancellationToken::new();

    let a = manager.acquire_pool(&key("d"), &cancel).await.unwrap();
    let b = manager.acquire_pool(&key("d"), &cancel).await.unwrap();

    assert!(a.ptr_eq(&b));
    assert_eq!(factory.created(), 1);
    assert_eq!(manager.pool_count(), 1);
    assert_eq!(manager.reference_count(&key("d")), 2);
}

#[tokio::test(start_paused = true)]
async fn test_distinct_keys_get_distinct_pools() {
    let (manager, factory) = manager();
    let cancel = CancellationToken::new();

    let a = manager.acquire_pool(&key("d"), &cancel).await.unwrap();
    let b = manager.acquire_pool(&key("other"), &cancel).await.unwrap();

    let mut bigger = key("d");
    bigger.options.max_sessions = 20;
    let c = manager.acquire_pool(&bigger, &cancel).await.unwrap();

    let mut elsewhere = key("d");
    elsewhere.transport.endpoint = "localhost:9010".into();
    let d = manager.acquire_pool(&elsewhere, &cancel).await.unwrap();

    assert!(!a.ptr_eq(&b));
    assert!(!a.ptr_eq(&c));
    assert!(!a.ptr_eq(&d));
    assert_eq!(factory.created(), 4);
    assert_eq!(manager.pool_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_acquirers_share_one_creation() {
    let (manager, factory) = manager();
    let cancel = CancellationToken::new();
    let key = key("d");

    let pools = futures_util::future::join_all(
        (0..8).map(|_| manager.acquire_pool(&key, &cancel)),
    )
    .await;

    let first = pools[0].as_ref().unwrap();
    for pool in &pools {
        assert!(pool.as_ref().unwrap().ptr_eq(first));
    }
    assert_eq!(factory.created(), 1);
    assert_eq!(manager.reference_count(&key), 8);
}

#[tokio::test(start_paused = true)]
async fn test_last_release_shuts_pool_down() {
    let (manager, factory) = manager();
    let cancel = CancellationToken::new();
    let key = key("d");

    let a = manager.acquire_pool(&key, &cancel).await.unwrap();
    let b = manager.acquire_pool(&key, &cancel).await.unwrap();
    a.when_ready(&cancel).await.unwrap();
    assert_eq!(factory.spanner().live_sessions(), 2);

    assert!(!manager.release_pool(&a));
    assert!(!a.is_shut_down());
    assert_eq!(manager.reference_count(&key), 1);

    assert!(manager.release_pool(&b));
    assert_eq!(manager.pool_count(), 0);
    assert!(manager.database_statistics(&key).is_none());

    // Wait for the background shutdown to finish.
    b.shutdown(&cancel).await.unwrap();
    assert!(b.is_shut_down());
    assert_eq!(factory.spanner().live_sessions(), 0);

    // A new acquisition starts a fresh pool.
    let c = manager.acquire_pool(&key, &cancel).await.unwrap();
    assert!(!c.ptr_eq(&a));
    assert_eq!(factory.created(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_release_of_unknown_pool_is_ignored() {
    let (manager, _) = manager();
    let (other, _) = self::manager();
    let cancel = CancellationToken::new();

    let pool = other.acquire_pool(&key("d"), &cancel).await.unwrap();
    assert!(!manager.release_pool(&pool));
    assert_eq!(other.reference_count(&key("d")), 1);
}

#[tokio::test(start_paused = true)]
async fn test_creation_failure_reaches_every_waiter_and_is_forgotten() {
    let (manager, factory) = manager();
    factory.fail_next(RpcError::unavailable("endpoint down"));
    let cancel = CancellationToken::new();
    let key = key("d");

    let results = futures_util::future::join_all(
        (0..3).map(|_| manager.acquire_pool(&key, &cancel)),
    )
    .await;
    for result in results {
        assert!(matches!(result, Err(PoolError::Rpc(_))));
    }
    assert_eq!(manager.pool_count(), 0);
    assert_eq!(manager.reference_count(&key), 0);

    let pool = manager.acquire_pool(&key, &cancel).await.unwrap();
    pool.when_ready(&cancel).await.unwrap();
    assert_eq!(factory.created(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_credentials_are_resolved_before_the_transport_is_built() {
    let (manager, factory) = manager();
    let cancel = CancellationToken::new();

    let mut failing = key("d");
    failing.transport.credentials = Credentials::provider(Failing);
    assert!(matches!(
        manager.acquire_pool(&failing, &cancel).await,
        Err(PoolError::Auth(AuthError::TokenUnavailable(_)))
    ));
    assert_eq!(factory.created(), 0);

    let mut token = key("d");
    token.transport.credentials = Credentials::AccessToken("secret".into());
    manager.acquire_pool(&token, &cancel).await.unwrap();
    assert_eq!(factory.authenticated(), vec![true]);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_acquisition_drops_its_reference() {
    let (manager, factory) = manager();
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert!(matches!(
        manager.acquire_pool(&key("d"), &cancel).await,
        Err(PoolError::Cancelled)
    ));
    assert_eq!(manager.reference_count(&key("d")), 0);
    assert_eq!(manager.pool_count(), 0);
    assert_eq!(factory.created(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_acquisition_drops_its_reference() {
    let (manager, factory) = manager();
    let mut key = key("d");
    key.transport.credentials = Credentials::provider(Slow);

    let attempt = tokio::time::timeout(
        Duration::from_secs(1),
        manager.acquire_pool(&key, &CancellationToken::new()),
    )
    .await;
    assert!(attempt.is_err());
    assert_eq!(manager.reference_count(&key), 0);
    assert_eq!(manager.pool_count(), 0);
    assert_eq!(factory.created(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_options_are_rejected() {
    let (manager, _) = manager();
    let mut key = key("d");
    key.options.min_sessions = 50;

    assert!(matches!(
        manager.acquire_pool(&key, &CancellationToken::new()).await,
        Err(PoolError::Configuration(_))
    ));
    assert_eq!(manager.pool_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_database_statistics() {
    let (manager, _) = manager();
    let cancel = CancellationToken::new();
    let key = key("d");

    assert!(manager.database_statistics(&key).is_none());
    let pool = manager.acquire_pool(&key, &cancel).await.unwrap();
    pool.when_ready(&cancel).await.unwrap();

    let stats = manager.database_statistics(&key).unwrap();
    assert_eq!(stats.database, "projects/p/instances/i/databases/d");
    assert_eq!(stats.idle_sessions, 2);
    assert_eq!(stats.max_sessions, 10);
    assert!(!stats.shut_down);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_all() {
    let (manager, factory) = manager();
    let cancel = CancellationToken::new();

    let a = manager.acquire_pool(&key("a"), &cancel).await.unwrap();
    let b = manager.acquire_pool(&key("b"), &cancel).await.unwrap();
    a.when_ready(&cancel).await.unwrap();
    b.when_ready(&cancel).await.unwrap();

    manager.shutdown_all(&cancel).await.unwrap();
    assert!(a.is_shut_down());
    assert!(b.is_shut_down());
    assert_eq!(manager.pool_count(), 0);
    assert_eq!(factory.spanner().live_sessions(), 0);
}
