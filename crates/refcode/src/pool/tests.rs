use super::*;
use crate::store::memory::{MemoryConnector, MemoryStore, Operation};
use core::time::Duration;
use tokio::time::timeout;

fn pool(size: usize) -> (MemoryStore, Arc<ConnectionPool<MemoryConnector>>) {
    let store = MemoryStore::new(StoreKind::Primary);
    let pool = ConnectionPool::lazy(StoreKind::Primary, store.connector(), size).unwrap();
    (store, Arc::new(pool))
}

#[test]
fn zero_sized_pool_is_rejected() {
    let store = MemoryStore::new(StoreKind::Secondary);
    let err = ConnectionPool::lazy(StoreKind::Secondary, store.connector(), 0).err();
    assert!(matches!(err, Some(Error::InvalidConfig { .. })));
}

#[tokio::test]
async fn open_connects_every_slot_up_front() {
    let store = MemoryStore::new(StoreKind::Primary);
    let pool = ConnectionPool::open(StoreKind::Primary, store.connector(), 4)
        .await
        .unwrap();
    assert_eq!(store.connects(), 4);
    assert_eq!(pool.idle(), 4);
    assert_eq!(pool.in_use(), 0);
}

#[tokio::test]
async fn open_fails_if_any_connection_fails() {
    let store = MemoryStore::new(StoreKind::Primary);
    store.set_fault_hook(|op| {
        matches!(op, Operation::Connect).then(|| Error::Connection {
            store: StoreKind::Primary,
            reason: "refused".into(),
        })
    });
    let res = ConnectionPool::open(StoreKind::Primary, store.connector(), 2).await;
    assert!(matches!(res, Err(Error::Connection { .. })));
}

#[tokio::test]
async fn released_connections_are_reused() {
    let (store, pool) = pool(2);

    let conn = pool.acquire().await.unwrap();
    assert_eq!(pool.in_use(), 1);
    pool.release(conn);
    assert_eq!(pool.in_use(), 0);
    assert_eq!(pool.idle(), 1);

    let conn = pool.acquire().await.unwrap();
    drop(conn);
    assert_eq!(store.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn acquire_waits_for_a_free_slot() {
    let (_store, pool) = pool(1);
    let held = pool.acquire().await.unwrap();

    let blocked = timeout(Duration::from_secs(5), pool.acquire()).await;
    assert!(blocked.is_err(), "second acquire should wait");

    let waiter = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.acquire().await.map(|c| c.store()) })
    };
    tokio::task::yield_now().await;
    held.release();

    let store = waiter.await.unwrap().unwrap();
    assert_eq!(store, StoreKind::Primary);
    assert_eq!(pool.peak_in_use(), 1);
}

#[tokio::test]
async fn discarded_connections_are_replaced() {
    let (store, pool) = pool(1);

    pool.acquire().await.unwrap().discard();
    assert_eq!(pool.idle(), 0);
    assert_eq!(pool.in_use(), 0);

    let _conn = pool.acquire().await.unwrap();
    assert_eq!(store.connects(), 2);
}

#[tokio::test]
async fn failed_connect_frees_the_slot() {
    let (store, pool) = pool(1);
    store.set_fault_hook(|op| {
        matches!(op, Operation::Connect).then(|| Error::Connection {
            store: StoreKind::Primary,
            reason: "reset by peer".into(),
        })
    });
    assert!(matches!(pool.acquire().await, Err(Error::Connection { .. })));
    assert_eq!(pool.in_use(), 0);

    store.clear_fault_hook();
    assert!(pool.acquire().await.is_ok());
}

#[tokio::test]
async fn close_all_refuses_new_acquisitions() {
    let (store, pool) = pool(3);
    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    let held = pool.acquire().await.unwrap();
    drop(a);
    drop(b);

    pool.close_all().await.unwrap();
    assert!(pool.is_closed());
    assert_eq!(store.closes(), 2);
    assert!(matches!(pool.acquire().await, Err(Error::PoolClosed { .. })));

    // Released after close: never makes it back into the idle list.
    drop(held);
    assert_eq!(pool.idle(), 0);
    assert_eq!(pool.in_use(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn releases_racing_close_all_are_all_closed() {
    for _ in 0..50 {
        let (store, pool) = pool(8);
        let mut held = Vec::new();
        for _ in 0..8 {
            held.push(pool.acquire().await.unwrap());
        }

        let releases: Vec<_> = held
            .into_iter()
            .map(|conn| {
                tokio::spawn(async move {
                    tokio::task::yield_now().await;
                    drop(conn);
                })
            })
            .collect();
        pool.close_all().await.unwrap();
        for release in releases {
            release.await.unwrap();
        }

        assert_eq!(pool.idle(), 0);
        timeout(Duration::from_secs(1), async {
            while store.closes() < 8 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn checkouts_never_exceed_pool_size() {
    let (store, pool) = pool(2);
    store.set_latency(Duration::from_millis(2));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let pool = Arc::clone(&pool);
        handles.push(tokio::spawn(async move {
            for _ in 0..5 {
                let mut conn = pool.acquire().await.unwrap();
                conn.commit().await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(pool.peak_in_use(), 2);
    assert!(store.connects() <= 2);
    assert_eq!(store.commits(), 100);
}
