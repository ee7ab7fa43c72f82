//! Expiry, reaping and shutdown.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use authpool::{Pool, PoolError, ShutdownReport};
use authpool_testing::{MockConnector, init_tracing};

// =============================================================================
// Expiry
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_reaper_retires_idle_connections() {
    init_tracing();
    let connector = MockConnector::new();
    let pool = Pool::builder(connector.clone())
        .max_lifetime(Duration::ZERO)
        .idle_timeout(Duration::from_secs(1))
        .build()
        .await
        .unwrap();

    let conn = pool.acquire().await.unwrap();
    let first = conn.id;
    conn.release().await.unwrap();
    assert_eq!(pool.status().idle, 1);

    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(pool.status().idle, 0);
    assert_eq!(connector.closed(), 1);
    assert_eq!(pool.metrics().connections_retired, 1);

    let conn = pool.acquire().await.unwrap();
    assert_ne!(conn.id, first);
}

#[tokio::test(start_paused = true)]
async fn test_expired_connection_retired_on_release() {
    let connector = MockConnector::new();
    let pool = Pool::builder(connector.clone())
        .max_lifetime(Duration::from_secs(1))
        .idle_timeout(Duration::ZERO)
        .build()
        .await
        .unwrap();

    let conn = pool.acquire().await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    conn.release().await.unwrap();

    assert_eq!(pool.status().total(), 0);
    assert_eq!(connector.closed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_idle_connection_skipped_at_checkout() {
    let connector = MockConnector::new();
    let pool = Pool::builder(connector.clone())
        .max_lifetime(Duration::ZERO)
        .idle_timeout(Duration::from_secs(1))
        .reaper_interval(Duration::from_secs(3600))
        .build()
        .await
        .unwrap();

    let conn = pool.acquire().await.unwrap();
    let first = conn.id;
    conn.release().await.unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;

    let conn = pool.acquire().await.unwrap();
    assert_ne!(conn.id, first);
    // Expired connections are never probed.
    assert_eq!(connector.pings(), 0);
    tokio::task::yield_now().await;
    assert_eq!(connector.closed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_close_of_expired_connections_does_not_stall_acquire() {
    let connector = MockConnector::new();
    let pool = Pool::builder(connector.clone())
        .max_pool_size(3)
        .max_lifetime(Duration::from_secs(10))
        .idle_timeout(Duration::ZERO)
        .reaper_interval(Duration::from_secs(15))
        .build()
        .await
        .unwrap();

    let held = vec![
        pool.acquire().await.unwrap(),
        pool.acquire().await.unwrap(),
        pool.acquire().await.unwrap(),
    ];
    for conn in held {
        conn.release().await.unwrap();
    }
    connector.set_close_delay(Duration::from_secs(1));
    tokio::time::sleep(Duration::from_secs(12)).await;

    let conn = pool.acquire_timeout(Duration::from_millis(500)).await.unwrap();
    assert_eq!(connector.opened(), 4);
    assert_eq!(pool.metrics().connections_retired, 3);
    assert_eq!(pool.status().in_use, 1);

    // Every retired handle is closed through the connector, none dropped.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(connector.closed(), 3);
    assert_eq!(connector.live(), 1);
    drop(conn);
}

#[tokio::test(start_paused = true)]
async fn test_manual_reap() {
    let connector = MockConnector::new();
    let pool = Pool::builder(connector.clone())
        .max_lifetime(Duration::ZERO)
        .idle_timeout(Duration::from_secs(1))
        .reaper_interval(Duration::from_secs(3600))
        .build()
        .await
        .unwrap();

    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    a.release().await.unwrap();
    b.release().await.unwrap();

    assert_eq!(pool.reap().await, 0);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(pool.reap().await, 2);
    assert_eq!(pool.status().idle, 0);
    assert_eq!(connector.closed(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_connections_survive() {
    let connector = MockConnector::new();
    let pool = Pool::builder(connector.clone())
        .max_lifetime(Duration::ZERO)
        .idle_timeout(Duration::ZERO)
        .build()
        .await
        .unwrap();

    let conn = pool.acquire().await.unwrap();
    let first = conn.id;
    conn.release().await.unwrap();

    tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
    assert_eq!(pool.reap().await, 0);

    let conn = pool.acquire().await.unwrap();
    assert_eq!(conn.id, first);
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn test_shutdown_closes_idle_and_rejects_acquire() {
    let connector = MockConnector::new();
    let pool = Pool::builder(connector.clone()).build().await.unwrap();

    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    a.release().await.unwrap();
    b.release().await.unwrap();

    let report = pool.shutdown(Duration::from_secs(1)).await;
    assert_eq!(report.idle_closed, 2);
    assert_eq!(report.returned, 0);
    assert_eq!(report.revoked, 0);
    assert_eq!(connector.closed(), 2);
    assert!(pool.is_closed());

    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, PoolError::PoolClosed));
}

#[tokio::test]
async fn test_shutdown_wakes_waiters() {
    let connector = MockConnector::new();
    let pool = Pool::builder(connector.clone())
        .max_pool_size(1)
        .build()
        .await
        .unwrap();

    let held = pool.acquire().await.unwrap();
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire_timeout(Duration::from_secs(30)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let shutdown = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.shutdown(Duration::from_secs(5)).await })
    };

    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, PoolError::PoolClosed));

    held.release().await.unwrap();
    let report = shutdown.await.unwrap();
    assert_eq!(report.returned, 1);
    assert_eq!(report.revoked, 0);
    assert!(report.elapsed < Duration::from_secs(5));
    assert_eq!(connector.closed(), 1);
}

#[tokio::test]
async fn test_shutdown_revokes_stragglers() {
    let connector = MockConnector::new();
    let pool = Pool::builder(connector.clone()).build().await.unwrap();

    let held = pool.acquire().await.unwrap();
    let revocation = held.revocation();
    assert!(!held.is_revoked());

    let report = pool.shutdown(Duration::from_millis(50)).await;
    assert_eq!(report.revoked, 1);
    assert!(revocation.is_cancelled());
    assert!(held.is_revoked());
    assert_eq!(pool.status().in_use, 0);

    held.release().await.unwrap();
    assert_eq!(connector.closed(), 1);
    assert_eq!(connector.live(), 0);
}

#[tokio::test]
async fn test_holder_watching_revocation_gives_connection_back() {
    let connector = MockConnector::new();
    let pool = Pool::builder(connector.clone()).build().await.unwrap();

    let conn = pool.acquire().await.unwrap();
    let worker = tokio::spawn(async move {
        conn.revocation().cancelled().await;
        conn.release().await
    });

    let report = pool.shutdown(Duration::from_millis(20)).await;
    assert_eq!(report.revoked, 1);

    worker.await.unwrap().unwrap();
    assert_eq!(connector.closed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_reports_open_still_in_flight() {
    let connector = MockConnector::new();
    connector.set_open_delay(Duration::from_secs(1));
    let pool = Pool::builder(connector.clone())
        .acquire_timeout(Duration::from_secs(5))
        .build()
        .await
        .unwrap();

    let opener = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(pool.status().creating, 1);

    let report = pool.shutdown(Duration::from_millis(50)).await;
    assert_eq!(report.pending_opens, 1);
    assert_eq!(report.revoked, 0);

    let err = opener.await.unwrap().unwrap_err();
    assert!(matches!(err, PoolError::PoolClosed));
    tokio::task::yield_now().await;
    assert_eq!(connector.opened(), 1);
    assert_eq!(connector.closed(), 1);
    assert_eq!(connector.live(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_background_closes() {
    let connector = MockConnector::new();
    let pool = Pool::builder(connector.clone())
        .max_pool_size(1)
        .build()
        .await
        .unwrap();

    let conn = pool.acquire().await.unwrap();
    let broken = conn.id;
    conn.release().await.unwrap();
    connector.break_connection(broken);
    connector.set_close_delay(Duration::from_millis(500));

    // Replacing the broken connection starts a slow background close.
    pool.acquire().await.unwrap().release().await.unwrap();
    tokio::task::yield_now().await;
    assert_eq!(connector.closed(), 0);

    connector.set_close_delay(Duration::ZERO);
    let report = pool.shutdown(Duration::from_secs(1)).await;
    assert_eq!(report.idle_closed, 1);
    assert!(report.elapsed >= Duration::from_millis(400));
    assert_eq!(connector.closed(), 2);
    assert_eq!(connector.live(), 0);
}

#[tokio::test]
async fn test_dropped_revoked_connection_closed_in_background() {
    let connector = MockConnector::new();
    let pool = Pool::builder(connector.clone()).build().await.unwrap();

    let held = pool.acquire().await.unwrap();
    pool.shutdown(Duration::from_millis(10)).await;
    drop(held);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(connector.closed(), 1);
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let connector = MockConnector::new();
    let pool = Pool::builder(connector.clone()).build().await.unwrap();
    pool.acquire().await.unwrap().release().await.unwrap();

    let (first, second) = tokio::join!(
        pool.shutdown(Duration::from_secs(1)),
        pool.shutdown(Duration::from_secs(1))
    );
    assert_eq!(first, second);
    assert_eq!(first.idle_closed, 1);

    let third = pool.shutdown(Duration::ZERO).await;
    assert_eq!(third, first);
    assert_eq!(connector.closed(), 1);
}

#[tokio::test]
async fn test_shutdown_counts_close_errors() {
    let connector = MockConnector::new();
    let pool = Pool::builder(connector.clone()).build().await.unwrap();
    pool.acquire().await.unwrap().release().await.unwrap();
    connector.fail_close(true);

    let report = pool.shutdown(Duration::from_secs(1)).await;
    assert_eq!(report.close_errors, 1);
    assert_eq!(report.idle_closed, 1);
}

#[tokio::test]
async fn test_shutdown_of_empty_pool() {
    let connector = MockConnector::new();
    let pool = Pool::builder(connector.clone()).build().await.unwrap();

    let report = pool.shutdown(Duration::from_secs(1)).await;
    assert_eq!(
        report,
        ShutdownReport {
            elapsed: report.elapsed,
            ..ShutdownReport::default()
        }
    );
    assert_eq!(pool.reap().await, 0);
}
