//! Request queue polling and the termination handshake.

mod common;

use common::{pool_on, test_config, wait_until, DAEMON_DEADLINE};
use std::ptr::NonNull;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use unified_pool::{
    Arch, DaemonStatus, DrainPolicy, HostBackend, MemoryBackend, MemoryPool, MockDeviceBackend,
    PoolError, QueueRef, RequestQueue, Residency,
};

#[test]
fn test_idle_daemon_without_queue() {
    let pool = MemoryPool::new(test_config()).unwrap();
    thread::sleep(Duration::from_millis(30));

    assert_eq!(pool.daemon_status(), DaemonStatus::Running);
    assert_eq!(pool.processed_tail(), 0);

    pool.terminate().unwrap();
    assert!(pool.killed());
}

#[test]
fn test_second_terminate_returns_immediately() {
    let pool = MemoryPool::new(test_config()).unwrap();
    pool.terminate().unwrap();

    let start = Instant::now();
    pool.terminate().unwrap();
    assert!(start.elapsed() < Duration::from_millis(100));
    assert_eq!(pool.daemon_status(), DaemonStatus::Stopped);
}

#[test]
fn test_terminate_latency_bounded_by_interval() {
    let pool = MemoryPool::new(test_config().with_poll_interval(Duration::from_millis(20))).unwrap();
    let start = Instant::now();
    pool.terminate().unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_incremental_tail_tracked_monotonically() {
    const N: u32 = 20;
    let pool = MemoryPool::new(test_config()).unwrap();
    let queue = Arc::new(RequestQueue::new());
    pool.set_queue(QueueRef::host(queue.clone()));

    let mut last = 0;
    for _ in 0..N {
        queue.push();
        let tail = queue.tail();
        assert!(wait_until(DAEMON_DEADLINE, || {
            let seen = pool.processed_tail();
            assert!(seen >= last, "processed_tail moved backward: {seen} < {last}");
            assert!(seen <= tail, "processed_tail {seen} exceeded tail {tail}");
            last = seen;
            seen == tail
        }));
        thread::sleep(Duration::from_millis(2));
    }

    assert_eq!(pool.processed_tail(), N);
    pool.terminate().unwrap();
}

#[test]
fn test_tail_jump_reaches_target_and_holds() {
    let pool = MemoryPool::new(test_config()).unwrap();
    let queue = Arc::new(RequestQueue::new());
    pool.set_queue(QueueRef::host(queue.clone()));

    queue.set_tail(3);
    assert!(wait_until(DAEMON_DEADLINE, || pool.processed_tail() == 3));

    thread::sleep(Duration::from_millis(20));
    assert_eq!(pool.processed_tail(), 3);

    queue.push();
    assert!(wait_until(DAEMON_DEADLINE, || pool.processed_tail() == 4));
    pool.terminate().unwrap();
}

#[test]
fn test_one_per_wake_needs_one_wake_per_request() {
    let pool = MemoryPool::new(test_config().with_poll_interval(Duration::from_millis(25))).unwrap();
    let queue = Arc::new(RequestQueue::new());
    queue.set_tail(8);
    pool.set_queue(QueueRef::host(queue));

    thread::sleep(Duration::from_millis(50));
    let seen = pool.processed_tail();
    assert!(seen < 8, "one-per-wake drained {seen} requests in ~2 intervals");

    assert!(wait_until(DAEMON_DEADLINE, || pool.processed_tail() == 8));
}

#[test]
fn test_drain_all_catches_up_in_one_wake() {
    let pool = pool_on(Arc::new(HostBackend::new()), Arch::Cpu, DrainPolicy::All);
    let queue = Arc::new(RequestQueue::new());
    queue.set_tail(1000);
    pool.set_queue(QueueRef::host(queue));

    assert!(wait_until(DAEMON_DEADLINE, || pool.processed_tail() == 1000));
    pool.terminate().unwrap();
}

#[test]
fn test_device_queue_observed_through_copy_engine() {
    let mock = Arc::new(MockDeviceBackend::new());
    let pool = pool_on(mock.clone(), Arch::Cuda, DrainPolicy::OnePerWake);

    let region = mock.allocate(64, Residency::Device).unwrap();
    let queue = unsafe { QueueRef::device(region.cast::<RequestQueue>()) };
    let tail = queue.tail_addr().cast_mut();
    pool.set_queue(queue);

    for value in 1..=5u32 {
        mock.write_device(tail, value).unwrap();
        assert!(wait_until(DAEMON_DEADLINE, || pool.processed_tail() == value));
    }
    assert!(mock.copies_performed() >= 5);

    pool.terminate().unwrap();
    unsafe { mock.release(region, 64, Residency::Device) };
}

#[test]
fn test_copy_failure_ends_daemon_abnormally() {
    let mock = Arc::new(MockDeviceBackend::new());
    let pool = pool_on(mock.clone(), Arch::Cuda, DrainPolicy::OnePerWake);

    let region = mock.allocate(64, Residency::Device).unwrap();
    pool.set_queue(unsafe { QueueRef::device(region.cast::<RequestQueue>()) });
    mock.set_fail_copies(true);

    assert!(wait_until(DAEMON_DEADLINE, || pool.daemon_status().is_finished()));
    assert!(matches!(pool.daemon_status(), DaemonStatus::Failed(_)));
    assert!(!pool.killed());

    let err = pool.terminate().unwrap_err();
    assert!(matches!(err, PoolError::DaemonFailed(ref reason) if reason.contains("injected")));

    // reported again, without another join
    assert!(matches!(pool.terminate(), Err(PoolError::DaemonFailed(_))));

    drop(pool);
    unsafe { mock.release(region, 64, Residency::Device) };
}

#[test]
fn test_device_queue_without_accelerator_fails_loudly() {
    let pool = pool_on(Arc::new(HostBackend::new()), Arch::Cpu, DrainPolicy::OnePerWake);
    let mut fake = RequestQueue::new();
    pool.set_queue(unsafe { QueueRef::device(NonNull::from(&mut fake)) });

    assert!(wait_until(DAEMON_DEADLINE, || pool.daemon_status().is_finished()));
    let err = pool.terminate().unwrap_err();
    assert!(matches!(err, PoolError::DaemonFailed(ref reason) if reason.contains("--features cuda")));
}

#[test]
fn test_swapping_queues_tracks_progress_per_queue() {
    let pool = MemoryPool::new(test_config()).unwrap();
    let first = Arc::new(RequestQueue::new());
    first.set_tail(4);
    pool.set_queue(QueueRef::host(first.clone()));
    assert!(wait_until(DAEMON_DEADLINE, || pool.processed_tail() == 4));

    // same queue again keeps progress
    pool.set_queue(QueueRef::host(first.clone()));
    assert_eq!(pool.processed_tail(), 4);

    let second = Arc::new(RequestQueue::new());
    second.set_tail(2);
    pool.set_queue(QueueRef::host(second.clone()));
    assert!(pool.processed_tail() <= 2);
    assert!(wait_until(DAEMON_DEADLINE, || pool.processed_tail() == 2));

    pool.clear_queue();
    assert_eq!(pool.processed_tail(), 0);
    thread::sleep(Duration::from_millis(10));
    assert_eq!(pool.processed_tail(), 0);
    assert_eq!(pool.daemon_status(), DaemonStatus::Running);

    pool.set_queue(QueueRef::host(second));
    assert_eq!(pool.processed_tail(), 2);
    pool.terminate().unwrap();
}

#[test]
fn test_reinstalled_queue_is_not_processed_twice() {
    let pool = MemoryPool::new(test_config()).unwrap();
    let drained = Arc::new(RequestQueue::new());
    drained.set_tail(3);
    pool.set_queue(QueueRef::host(drained.clone()));
    assert!(wait_until(DAEMON_DEADLINE, || pool.processed_tail() == 3));

    let other = Arc::new(RequestQueue::new());
    pool.set_queue(QueueRef::host(other));
    thread::sleep(Duration::from_millis(5));
    pool.set_queue(QueueRef::host(drained.clone()));

    let mut trace = Vec::new();
    for _ in 0..20 {
        trace.push(pool.processed_tail());
        thread::sleep(Duration::from_millis(1));
    }
    trace.dedup();
    assert_eq!(trace, vec![3], "requests of the reinstalled queue were processed again");
    assert_eq!(drained.tail(), 3);

    // new work on the reinstalled queue resumes from where it left off
    drained.push();
    assert!(wait_until(DAEMON_DEADLINE, || pool.processed_tail() == 4));
    pool.terminate().unwrap();
}

#[test]
fn test_allocation_while_daemon_polls() {
    let pool = Arc::new(MemoryPool::new(test_config().with_default_buffer_size(1 << 12)).unwrap());
    let queue = Arc::new(RequestQueue::new());
    pool.set_queue(QueueRef::host(queue.clone()));

    let allocator = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || {
            for _ in 0..500 {
                pool.allocate(100, 16).unwrap();
            }
        })
    };
    for _ in 0..50 {
        queue.push();
        thread::sleep(Duration::from_micros(200));
    }
    allocator.join().unwrap();

    assert!(wait_until(DAEMON_DEADLINE, || pool.processed_tail() == 50));
    pool.terminate().unwrap();
}

#[tokio::test]
async fn test_progress_subscription() {
    let pool = MemoryPool::new(test_config()).unwrap();
    let mut progress = pool.subscribe_progress();
    assert_eq!(*progress.borrow(), 0);

    let queue = Arc::new(RequestQueue::new());
    pool.set_queue(QueueRef::host(queue.clone()));
    queue.publish(5);

    let reached = tokio::time::timeout(DAEMON_DEADLINE, progress.wait_for(|&done| done >= 5))
        .await
        .expect("daemon should report progress")
        .map(|done| *done)
        .unwrap();
    assert_eq!(reached, 5);

    pool.terminate().unwrap();
}
