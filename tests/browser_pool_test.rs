mod common;

use common::FakeDriver;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use webagent_orchestrator::config::PoolConfig;
use webagent_orchestrator::{BrowserSessionPool, EngineError, ReleaseOutcome, TaskId};

fn pool_config(max_sessions: usize) -> PoolConfig {
    PoolConfig {
        max_sessions,
        min_warm_sessions: 0,
        ..PoolConfig::default()
    }
}

const ACQUIRE: Duration = Duration::from_secs(2);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquirers_never_share_a_session() {
    let driver = FakeDriver::new();
    let pool = BrowserSessionPool::new(pool_config(3), driver.as_driver());
    let held = Arc::new(Mutex::new(HashSet::new()));

    let handles: Vec<_> = (0..24)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let held = Arc::clone(&held);
            tokio::spawn(async move {
                let lease = pool.acquire(TaskId::new(), ACQUIRE).await.expect("lease");
                assert!(held.lock().insert(lease.id()), "{} leased twice", lease.id());
                assert!(pool.stats().leased <= 3);

                tokio::time::sleep(Duration::from_millis(5)).await;

                held.lock().remove(&lease.id());
                pool.release(lease, ReleaseOutcome::healthy(1)).await;
            })
        })
        .collect();

    for handle in handles {
        handle.await.expect("acquirer task");
    }

    let stats = pool.stats();
    assert_eq!(stats.leased, 0);
    assert!(stats.total <= 3);
    assert!(driver.launches() <= 3);
}

#[tokio::test]
async fn test_waiters_are_served_in_arrival_order() {
    let driver = FakeDriver::new();
    let pool = BrowserSessionPool::new(pool_config(1), driver.as_driver());
    let first_lease = pool.acquire(TaskId::new(), ACQUIRE).await.expect("lease");

    let (order_tx, mut order_rx) = mpsc::unbounded_channel();
    let mut waiters = Vec::new();
    for n in 0..3 {
        let waiter_pool = Arc::clone(&pool);
        let order_tx = order_tx.clone();
        waiters.push(tokio::spawn(async move {
            let lease = waiter_pool.acquire(TaskId::new(), ACQUIRE).await.expect("lease");
            order_tx.send(n).expect("receiver alive");
            waiter_pool.release(lease, ReleaseOutcome::healthy(1)).await;
        }));
        // Make the arrival order unambiguous
        while pool.stats().waiting < n + 1 {
            tokio::task::yield_now().await;
        }
    }
    drop(order_tx);

    pool.release(first_lease, ReleaseOutcome::healthy(1)).await;
    for waiter in waiters {
        waiter.await.expect("waiter task");
    }

    let mut order = Vec::new();
    while let Some(n) = order_rx.recv().await {
        order.push(n);
    }
    assert_eq!(order, vec![0, 1, 2]);
    assert_eq!(driver.launches(), 1);
}

#[tokio::test]
async fn test_acquire_times_out_when_pool_is_exhausted() {
    let driver = FakeDriver::new();
    let pool = BrowserSessionPool::new(pool_config(1), driver.as_driver());
    let lease = pool.acquire(TaskId::new(), ACQUIRE).await.expect("lease");

    let err = pool
        .acquire(TaskId::new(), Duration::from_millis(50))
        .await
        .expect_err("pool is exhausted");
    assert!(matches!(err, EngineError::PoolTimeout { .. }));
    assert_eq!(pool.stats().waiting, 0, "timed-out acquirer left the queue");

    // Nothing is handed to the departed acquirer when the session comes back
    pool.release(lease, ReleaseOutcome::healthy(1)).await;
    assert_eq!(pool.stats().idle, 1);
    let again = pool.acquire(TaskId::new(), ACQUIRE).await.expect("lease");
    pool.release(again, ReleaseOutcome::healthy(1)).await;
}

#[tokio::test]
async fn test_session_is_retired_at_page_limit() {
    let driver = FakeDriver::new();
    let config = PoolConfig {
        max_pages_per_session: 2,
        ..pool_config(1)
    };
    let pool = BrowserSessionPool::new(config, driver.as_driver());

    let lease = pool.acquire(TaskId::new(), ACQUIRE).await.expect("lease");
    let first_id = lease.id();
    pool.release(lease, ReleaseOutcome::healthy(1)).await;

    let lease = pool.acquire(TaskId::new(), ACQUIRE).await.expect("lease");
    assert_eq!(lease.id(), first_id, "idle session is reused");
    pool.release(lease, ReleaseOutcome::healthy(1)).await;

    assert_eq!(driver.closes(), 1);
    assert_eq!(pool.stats().total, 0);

    let lease = pool.acquire(TaskId::new(), ACQUIRE).await.expect("lease");
    assert_ne!(lease.id(), first_id);
    assert_eq!(driver.launches(), 2);
    pool.release(lease, ReleaseOutcome::healthy(1)).await;
}

#[tokio::test]
async fn test_session_is_retired_at_memory_limit() {
    let driver = FakeDriver::new();
    let config = PoolConfig {
        max_session_memory_bytes: 1024,
        ..pool_config(1)
    };
    let pool = BrowserSessionPool::new(config, driver.as_driver());

    let lease = pool.acquire(TaskId::new(), ACQUIRE).await.expect("lease");
    pool.release(lease, ReleaseOutcome::healthy(1).with_memory(Some(4096)))
        .await;

    assert_eq!(driver.closes(), 1);
    assert_eq!(pool.stats().sessions_retired, 1);
}

#[tokio::test]
async fn test_unhealthy_release_retires_and_healthy_release_resets() {
    let driver = FakeDriver::new();
    let pool = BrowserSessionPool::new(pool_config(2), driver.as_driver());

    let lease = pool.acquire(TaskId::new(), ACQUIRE).await.expect("lease");
    pool.release(lease, ReleaseOutcome::healthy(1)).await;
    assert_eq!(driver.resets(), 1);
    assert_eq!(pool.stats().idle, 1);

    let lease = pool.acquire(TaskId::new(), ACQUIRE).await.expect("lease");
    pool.release(lease, ReleaseOutcome::unhealthy(1)).await;
    assert_eq!(driver.resets(), 1);
    assert_eq!(driver.closes(), 1);

    let stats = pool.stats();
    assert_eq!((stats.idle, stats.leased, stats.total), (0, 0, 0));
}

#[tokio::test]
async fn test_failed_health_check_replaces_idle_session() {
    let driver = FakeDriver::new();
    let pool = BrowserSessionPool::new(pool_config(1), driver.as_driver());

    let lease = pool.acquire(TaskId::new(), ACQUIRE).await.expect("lease");
    let stale = lease.id();
    pool.release(lease, ReleaseOutcome::healthy(1)).await;

    driver.fail_health_checks(true);
    let lease = pool.acquire(TaskId::new(), ACQUIRE).await.expect("lease");
    assert_ne!(lease.id(), stale);
    assert_eq!(driver.closes(), 1);
    assert_eq!(driver.launches(), 2);
    pool.release(lease, ReleaseOutcome::unhealthy(0)).await;
}

#[tokio::test]
async fn test_launch_failure_returns_capacity() {
    let driver = FakeDriver::new();
    driver.fail_launches(true);
    let pool = BrowserSessionPool::new(pool_config(1), driver.as_driver());

    let err = pool
        .acquire(TaskId::new(), ACQUIRE)
        .await
        .expect_err("launch fails");
    assert!(matches!(err, EngineError::ResourceExhausted(_)));
    assert_eq!(pool.stats().total, 0);

    driver.fail_launches(false);
    let lease = pool.acquire(TaskId::new(), ACQUIRE).await.expect("lease");
    pool.release(lease, ReleaseOutcome::healthy(1)).await;
}

#[tokio::test]
async fn test_cancelled_acquire_leaves_the_queue() {
    let driver = FakeDriver::new();
    let pool = BrowserSessionPool::new(pool_config(1), driver.as_driver());
    let lease = pool.acquire(TaskId::new(), ACQUIRE).await.expect("lease");

    let waiter = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.acquire(TaskId::new(), ACQUIRE).await.map(drop) })
    };
    while pool.stats().waiting == 0 {
        tokio::task::yield_now().await;
    }
    waiter.abort();
    let _ = waiter.await;

    assert_eq!(pool.stats().waiting, 0);
    pool.release(lease, ReleaseOutcome::healthy(1)).await;
    assert_eq!(pool.stats().idle, 1);
}

#[tokio::test]
async fn test_hanging_reset_retires_session() {
    let driver = FakeDriver::new();
    driver.hang_resets(true);
    let config = PoolConfig {
        session_call_timeout_ms: 50,
        ..pool_config(1)
    };
    let pool = BrowserSessionPool::new(config, driver.as_driver());

    let lease = pool.acquire(TaskId::new(), ACQUIRE).await.expect("lease");
    tokio::time::timeout(Duration::from_secs(2), pool.release(lease, ReleaseOutcome::healthy(1)))
        .await
        .expect("release is bounded");

    assert_eq!(driver.resets(), 1);
    assert_eq!(driver.closes(), 1);
    let stats = pool.stats();
    assert_eq!((stats.idle, stats.leased, stats.total), (0, 0, 0));
    assert_eq!(stats.sessions_retired, 1);

    // The slot is free for a fresh session
    let lease = pool.acquire(TaskId::new(), ACQUIRE).await.expect("lease");
    assert_eq!(driver.launches(), 2);
    pool.release(lease, ReleaseOutcome::unhealthy(1)).await;
}

#[tokio::test]
async fn test_hanging_close_still_frees_capacity() {
    let driver = FakeDriver::new();
    driver.hang_closes(true);
    let config = PoolConfig {
        session_call_timeout_ms: 50,
        ..pool_config(1)
    };
    let pool = BrowserSessionPool::new(config, driver.as_driver());

    let lease = pool.acquire(TaskId::new(), ACQUIRE).await.expect("lease");
    tokio::time::timeout(
        Duration::from_secs(2),
        pool.release(lease, ReleaseOutcome::unhealthy(1)),
    )
    .await
    .expect("release is bounded");

    assert_eq!(driver.closes(), 1);
    let stats = pool.stats();
    assert_eq!((stats.leased, stats.total, stats.sessions_retired), (0, 0, 1));
}

#[tokio::test]
async fn test_release_interrupted_mid_reset_is_not_lost() {
    let driver = FakeDriver::new();
    driver.hang_resets(true);
    let config = PoolConfig {
        session_call_timeout_ms: 60_000,
        ..pool_config(1)
    };
    let pool = BrowserSessionPool::new(config, driver.as_driver());
    let lease = pool.acquire(TaskId::new(), ACQUIRE).await.expect("lease");

    let releasing = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.release(lease, ReleaseOutcome::healthy(1)).await })
    };
    while driver.resets() == 0 {
        tokio::task::yield_now().await;
    }
    releasing.abort();
    let _ = releasing.await;

    // The abandoned session is closed in the background
    tokio::time::timeout(Duration::from_secs(2), async {
        while pool.stats().total > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("capacity returned");
    assert_eq!(driver.closes(), 1);
    assert_eq!(pool.stats().leased, 0);

    let report = pool.shutdown(Duration::from_millis(100)).await;
    assert_eq!(report.abandoned, 0);
}

#[tokio::test]
async fn test_dropped_lease_is_retired() {
    let driver = FakeDriver::new();
    let pool = BrowserSessionPool::new(pool_config(1), driver.as_driver());

    let lease = pool.acquire(TaskId::new(), ACQUIRE).await.expect("lease");
    drop(lease);

    // Capacity comes back once the background retirement runs
    let lease = pool.acquire(TaskId::new(), ACQUIRE).await.expect("lease");
    assert_eq!(driver.launches(), 2);
    assert_eq!(driver.closes(), 1);
    pool.release(lease, ReleaseOutcome::healthy(1)).await;
}

#[tokio::test]
async fn test_warm_up_fills_minimum() {
    let driver = FakeDriver::new();
    let config = PoolConfig {
        min_warm_sessions: 2,
        ..pool_config(4)
    };
    let pool = BrowserSessionPool::new(config, driver.as_driver());

    assert_eq!(pool.warm_up().await, 2);
    assert_eq!(pool.warm_up().await, 0);

    let stats = pool.stats();
    assert_eq!((stats.idle, stats.total), (2, 2));
    assert_eq!(pool.sessions().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_idle_sessions_are_reaped_down_to_warm_minimum() {
    let driver = FakeDriver::new();
    let config = PoolConfig {
        min_warm_sessions: 1,
        idle_timeout_secs: 60,
        ..pool_config(3)
    };
    let pool = BrowserSessionPool::new(config, driver.as_driver());

    let leases = vec![
        pool.acquire(TaskId::new(), ACQUIRE).await.expect("lease"),
        pool.acquire(TaskId::new(), ACQUIRE).await.expect("lease"),
        pool.acquire(TaskId::new(), ACQUIRE).await.expect("lease"),
    ];
    for lease in leases {
        pool.release(lease, ReleaseOutcome::healthy(1)).await;
    }
    assert_eq!(pool.reap_idle().await, 0);

    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(pool.reap_idle().await, 2);

    let stats = pool.stats();
    assert_eq!((stats.idle, stats.total), (1, 1));
    assert_eq!(driver.closes(), 2);
}

#[tokio::test]
async fn test_shutdown_rejects_waiters_and_new_acquires() {
    let driver = FakeDriver::new();
    let pool = BrowserSessionPool::new(pool_config(1), driver.as_driver());
    let lease = pool.acquire(TaskId::new(), ACQUIRE).await.expect("lease");

    let waiter = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.acquire(TaskId::new(), Duration::from_secs(10)).await })
    };
    while pool.stats().waiting == 0 {
        tokio::task::yield_now().await;
    }

    let returner = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            pool.release(lease, ReleaseOutcome::healthy(1)).await;
        })
    };

    let report = pool.shutdown(Duration::from_secs(2)).await;
    assert_eq!(report.drained, 1);
    assert_eq!(report.abandoned, 0);
    returner.await.expect("returner task");

    let waited = waiter.await.expect("waiter task");
    assert!(matches!(waited, Err(EngineError::PoolClosed)));
    assert!(matches!(
        pool.acquire(TaskId::new(), ACQUIRE).await,
        Err(EngineError::PoolClosed)
    ));

    // Returned after close: retired, not parked
    assert_eq!(driver.closes(), 1);
    assert_eq!(pool.stats().idle, 0);
}
