mod common;

use common::{MockDriver, MockState};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;
use tablekit::DbError;
use tablekit::db::ConnectionPool;

#[test]
fn test_third_acquirer_blocks_until_release() {
    let (driver, state) = MockDriver::new();
    let pool = Arc::new(ConnectionPool::new(driver, 2).unwrap());

    let first = pool.acquire().unwrap();
    let second = pool.acquire().unwrap();

    let (tx, rx) = mpsc::channel();
    let waiter = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || {
            let conn = pool.acquire().unwrap();
            tx.send(conn.id()).unwrap();
            pool.release(conn);
        })
    };

    // Both connections are checked out, the third caller must wait.
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(pool.stats().checked_out, 2);

    let released = first.id();
    pool.release(first);
    let handed_over = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    waiter.join().unwrap();

    assert_eq!(handed_over, released);
    assert_eq!(MockState::count(&state.connects), 2);

    pool.release(second);
    let stats = pool.stats();
    assert_eq!(stats.idle + stats.budget + stats.checked_out, 2);
    assert_eq!(stats.idle, 2);
}

#[test]
fn test_idle_connections_are_reused_lifo() {
    let (driver, state) = MockDriver::new();
    let pool = ConnectionPool::new(driver, 3).unwrap();

    let a = pool.acquire().unwrap();
    let b = pool.acquire().unwrap();
    let (a_id, b_id) = (a.id(), b.id());
    pool.release(a);
    pool.release(b);

    assert_eq!(pool.acquire().unwrap().id(), b_id);
    assert_eq!(pool.acquire().unwrap().id(), a_id);
    assert_eq!(MockState::count(&state.connects), 2);
}

#[test]
fn test_connect_failure_restores_budget() {
    let (driver, state) = MockDriver::new();
    let pool = ConnectionPool::new(driver, 1).unwrap();

    state.fail_connect.store(true, Ordering::SeqCst);
    let err = pool.acquire().unwrap_err();
    assert!(matches!(err, DbError::Connection { .. }));
    assert_eq!(pool.stats().budget, 1);

    state.fail_connect.store(false, Ordering::SeqCst);
    let conn = pool.acquire().unwrap();
    assert_eq!(pool.stats().budget, 0);
    pool.release(conn);
}

#[test]
fn test_invalidate_closes_and_restores_budget() {
    let (driver, state) = MockDriver::new();
    let pool = ConnectionPool::new(driver, 1).unwrap();

    let conn = pool.acquire().unwrap();
    let old = conn.id();
    pool.invalidate(conn);
    assert_eq!(MockState::count(&state.closes), 1);
    assert_eq!(pool.stats().budget, 1);

    let fresh = pool.acquire().unwrap();
    assert_ne!(fresh.id(), old);
    assert_eq!(MockState::count(&state.connects), 2);
}

#[test]
fn test_guard_releases_on_drop() {
    let (driver, _state) = MockDriver::new();
    let pool = ConnectionPool::new(driver, 1).unwrap();
    {
        let guard = pool.get().unwrap();
        assert!(guard.id().is_some());
        assert_eq!(pool.stats().checked_out, 1);
    }
    assert_eq!(pool.stats().idle, 1);

    pool.get().unwrap().invalidate();
    assert_eq!(pool.stats().budget, 1);
}

#[test]
fn test_acquire_timeout_when_exhausted() {
    let (driver, _state) = MockDriver::new();
    let pool = ConnectionPool::new(driver, 1).unwrap();
    let held = pool.acquire().unwrap();

    let err = pool.acquire_timeout(Duration::from_millis(50)).unwrap_err();
    assert!(matches!(err, DbError::Timeout { .. }));

    pool.release(held);
    assert!(pool.acquire_timeout(Duration::from_millis(50)).is_ok());
}

#[test]
fn test_drain_waits_for_checkouts_and_rejects_new_acquires() {
    let (driver, state) = MockDriver::new();
    let pool = Arc::new(ConnectionPool::new(driver, 2).unwrap());

    let idle = pool.acquire().unwrap();
    let held = pool.acquire().unwrap();
    pool.release(idle);

    let drainer = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.drain_all())
    };

    while !pool.is_shutting_down() {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(matches!(pool.acquire(), Err(DbError::PoolClosed)));
    thread::sleep(Duration::from_millis(50));
    assert!(!drainer.is_finished());

    pool.release(held);
    drainer.join().unwrap();

    let stats = pool.stats();
    assert_eq!(stats.budget, 2);
    assert_eq!(stats.idle, 0);
    assert_eq!(MockState::count(&state.closes), 2);
}

#[test]
fn test_concurrent_use_never_exceeds_cap() {
    const MAX: usize = 3;
    let (driver, state) = MockDriver::new();
    let pool = Arc::new(ConnectionPool::new(driver, MAX).unwrap());
    let in_use = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let in_use = Arc::clone(&in_use);
            let peak = Arc::clone(&peak);
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..25 {
                    let conn = pool.acquire().unwrap();
                    let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_micros(rng.gen_range(0..2000)));
                    in_use.fetch_sub(1, Ordering::SeqCst);
                    pool.release(conn);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= MAX);
    assert!(MockState::count(&state.connects) <= MAX);
    let stats = pool.stats();
    assert_eq!(stats.checked_out, 0);
    assert_eq!(stats.idle + stats.budget, MAX);
}

#[test]
fn test_zero_capacity_is_rejected() {
    let (driver, _state) = MockDriver::new();
    assert!(matches!(
        ConnectionPool::new(driver, 0),
        Err(DbError::Configuration { .. })
    ));
}
