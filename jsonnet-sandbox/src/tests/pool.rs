use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_test::{assert_pending, assert_ready, assert_ready_err};

use super::utils::{FakeResource, Tracker};
use crate::{
    context::EvalContext,
    error::Error,
    pool::{Pool, PoolConfig, PoolStat, MAX_POOL_SIZE},
};

fn pool(max_size: usize) -> Pool<FakeResource> {
    Pool::new(PoolConfig::default().with_max_size(max_size))
}

#[tokio::test]
async fn test_release_makes_resource_reusable() {
    let pool = pool(2);
    let tracker = Tracker::new();
    let ctx = EvalContext::background();

    let first = pool.acquire(&ctx, || tracker.create()).await.unwrap();
    let id = first.id;
    first.release();
    assert_eq!(
        pool.stat(),
        PoolStat {
            live: 1,
            idle: 1,
            max_size: 2
        }
    );

    let again = pool.acquire(&ctx, || tracker.create()).await.unwrap();
    assert_eq!(again.id, id);
    assert_eq!(tracker.created(), 1);
    again.release();
}

#[tokio::test]
async fn test_size_one_pool_blocks_second_caller() {
    let pool = pool(1);
    let tracker = Tracker::new();
    let ctx = EvalContext::background();

    let first = pool.acquire(&ctx, || tracker.create()).await.unwrap();

    let mut second = tokio_test::task::spawn(pool.acquire(&ctx, || tracker.create()));
    assert_pending!(second.poll());
    assert_eq!(pool.stat().live, 1);

    first.release();
    assert!(second.is_woken());
    let second = assert_ready!(second.poll()).unwrap();
    assert_eq!(second.id, 0);
    assert_eq!(tracker.created(), 1);
    second.release();
}

#[tokio::test]
async fn test_live_resources_never_exceed_max_size() {
    let pool = pool(3);
    let tracker = Tracker::new();
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = vec![];
    for _ in 0..32 {
        let pool = pool.clone();
        let tracker = tracker.clone();
        let peak = peak.clone();
        handles.push(tokio::spawn(async move {
            let ctx = EvalContext::background();
            let resource = pool.acquire(&ctx, || tracker.create()).await.unwrap();
            peak.fetch_max(pool.stat().live, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            resource.release();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(tracker.created() <= 3);
    assert!(pool.stat().live <= 3);
}

#[tokio::test]
async fn test_dropped_checkout_destroys_resource() {
    let pool = pool(1);
    let tracker = Tracker::new();
    let ctx = EvalContext::background();

    let checkout = pool.acquire(&ctx, || tracker.create()).await.unwrap();
    drop(checkout);

    assert_eq!(tracker.destroyed(), 1);
    assert_eq!(pool.stat().live, 0);

    // the slot is free again
    let replacement = pool.acquire(&ctx, || tracker.create()).await.unwrap();
    assert_eq!(replacement.id, 1);
    replacement.destroy();
    assert_eq!(tracker.destroyed(), 2);
}

#[tokio::test]
async fn test_exited_idle_resource_is_skipped() {
    let pool = pool(1);
    let tracker = Tracker::new();
    let ctx = EvalContext::background();

    let checkout = pool.acquire(&ctx, || tracker.create()).await.unwrap();
    let exited = checkout.exit_handle();
    checkout.release();
    exited.store(true, Ordering::SeqCst);

    let fresh = pool.acquire(&ctx, || tracker.create()).await.unwrap();
    assert_eq!(fresh.id, 1);
    assert_eq!(tracker.destroyed(), 1);
    assert_eq!(pool.stat().live, 1);
    fresh.release();
}

#[tokio::test]
async fn test_reaper_destroys_exited_idle_resources() {
    let pool = Pool::new(
        PoolConfig::default()
            .with_max_size(2)
            .with_reap_interval(Duration::from_millis(10)),
    );
    let tracker = Tracker::new();
    let ctx = EvalContext::background();

    let dying = pool.acquire(&ctx, || tracker.create()).await.unwrap();
    let healthy = pool.acquire(&ctx, || tracker.create()).await.unwrap();
    let exited = dying.exit_handle();
    dying.release();
    exited.store(true, Ordering::SeqCst);

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(tracker.destroyed(), 1);
    assert_eq!(
        pool.stat(),
        PoolStat {
            live: 1,
            idle: 0,
            max_size: 2
        }
    );
    // checked-out resources are left alone
    healthy.release();
    assert_eq!(pool.stat().idle, 1);
}

#[tokio::test]
async fn test_reap_idle_on_demand() {
    let pool = pool(1);
    let tracker = Tracker::new();
    let ctx = EvalContext::background();

    let checkout = pool.acquire(&ctx, || tracker.create()).await.unwrap();
    let exited = checkout.exit_handle();
    checkout.release();

    assert_eq!(pool.reap_idle(), 0);
    exited.store(true, Ordering::SeqCst);
    assert_eq!(pool.reap_idle(), 1);
    assert_eq!(pool.stat().live, 0);
}

#[tokio::test]
async fn test_acquire_observes_context_deadline() {
    let pool = pool(1);
    let tracker = Tracker::new();
    let held = pool
        .acquire(&EvalContext::background(), || tracker.create())
        .await
        .unwrap();

    let ctx = EvalContext::background().with_timeout(Duration::from_millis(20));
    let err = pool.acquire(&ctx, || tracker.create()).await.unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded));

    let cancelled = EvalContext::background();
    cancelled.cancel();
    let err = pool
        .acquire(&cancelled, || tracker.create())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));

    assert_eq!(tracker.created(), 1);
    held.release();
}

#[tokio::test]
async fn test_failed_construction_frees_the_slot() {
    let pool = pool(1);
    let tracker = Tracker::new();
    let ctx = EvalContext::background();

    let err = pool
        .acquire(&ctx, || async {
            Err::<FakeResource, _>(Error::Setup("no binary".into()))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Setup(_)));
    assert_eq!(pool.stat().live, 0);

    let ok = pool.acquire(&ctx, || tracker.create()).await.unwrap();
    ok.release();
}

#[tokio::test]
async fn test_close_rejects_waiters_and_destroys_resources() {
    let pool = pool(1);
    let tracker = Tracker::new();
    let ctx = EvalContext::background();

    let idle = pool.acquire(&ctx, || tracker.create()).await.unwrap();
    idle.release();
    let held = pool.acquire(&ctx, || tracker.create()).await.unwrap();

    let mut waiter = tokio_test::task::spawn(pool.acquire(&ctx, || tracker.create()));
    assert_pending!(waiter.poll());

    pool.close();
    assert!(pool.is_closed());
    assert!(matches!(assert_ready_err!(waiter.poll()), Error::PoolClosed));

    held.release();
    assert_eq!(tracker.destroyed(), 1);
    assert_eq!(pool.stat().live, 0);
    assert_eq!(pool.stat().idle, 0);

    let err = pool.acquire(&ctx, || tracker.create()).await.unwrap_err();
    assert!(matches!(err, Error::PoolClosed));
}

#[tokio::test]
async fn test_max_size_is_clamped() {
    let smallest = pool(0);
    assert_eq!(smallest.stat().max_size, 1);

    let largest = pool(usize::MAX);
    assert_eq!(largest.stat().max_size, MAX_POOL_SIZE);
    assert!(MAX_POOL_SIZE <= Semaphore::MAX_PERMITS);
    assert!(MAX_POOL_SIZE <= i32::MAX as usize);
}
