//! Unit tests for the threading module
//!
//! # Test Categories
//! 1. Thread tests - spawning, joining, return values
//! 2. Interrupt tests - timed sleeps and early wake-up
//! 3. Worker pool tests - FIFO order, error isolation, backpressure, shutdown

use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// ============================================================================
// Thread Tests
// ============================================================================

#[test]
fn test_thread_spawn_with_return_value() {
    let thread = Thread::spawn("compute_thread", || (1..=5).product::<u32>())
        .expect("Thread spawn should succeed");
    assert_eq!(thread.name(), "compute_thread");
    assert_eq!(thread.join().expect("Thread join should succeed"), 120);
}

#[test]
fn test_thread_join_reports_panic() {
    let thread = Thread::spawn("panicking", || panic!("boom")).unwrap();
    let result: Result<()> = thread.join();
    assert!(matches!(result, Err(PoolError::JoinFailed(_))));
}

#[test]
fn test_thread_is_running() {
    let interrupt = Arc::new(Interrupt::new());
    let gate = Arc::clone(&interrupt);
    let since = interrupt.generation();
    let thread = Thread::spawn("sleeper", move || {
        gate.sleep_for(Duration::from_secs(5), since);
    })
    .unwrap();

    assert!(thread.is_running());
    interrupt.trigger();
    thread.join().unwrap();
}

// ============================================================================
// Interrupt Tests
// ============================================================================

#[test]
fn test_interrupt_sleep_runs_to_deadline() {
    let interrupt = Interrupt::new();
    let start = Instant::now();
    let interrupted = interrupt.sleep_for(Duration::from_millis(30), interrupt.generation());
    assert!(!interrupted);
    assert!(start.elapsed() >= Duration::from_millis(30));
}

#[test]
fn test_interrupt_past_deadline_returns_immediately() {
    let interrupt = Interrupt::new();
    let start = Instant::now();
    assert!(!interrupt.sleep_until(start, interrupt.generation()));
    assert!(start.elapsed() < Duration::from_millis(20));
}

#[test]
fn test_interrupt_wakes_sleeper_early() {
    let interrupt = Arc::new(Interrupt::new());
    let since = interrupt.generation();
    let sleeper = Arc::clone(&interrupt);
    let start = Instant::now();

    let handle = thread::spawn(move || sleeper.sleep_for(Duration::from_secs(10), since));
    thread::sleep(Duration::from_millis(20));
    interrupt.trigger();

    assert!(handle.join().unwrap());
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_interrupt_trigger_before_sleep_is_not_lost() {
    let interrupt = Interrupt::new();
    let since = interrupt.generation();
    interrupt.trigger();

    let start = Instant::now();
    assert!(interrupt.sleep_for(Duration::from_secs(10), since));
    assert!(start.elapsed() < Duration::from_millis(100));
}

// ============================================================================
// Worker Pool Tests
// ============================================================================

#[test]
fn test_pool_rejects_zero_workers() {
    assert!(matches!(WorkerPool::new(0), Err(PoolError::NoWorkers)));
}

#[test]
fn test_pool_runs_all_tasks() {
    let pool = WorkerPool::new(DEFAULT_WORKERS).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..50 {
        let counter = Arc::clone(&counter);
        pool.submit(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), PoolError>(())
        })
        .unwrap();
    }

    pool.wait_completion();
    assert_eq!(counter.load(Ordering::SeqCst), 50);
    assert_eq!(pool.size(), DEFAULT_WORKERS);
}

#[test]
fn test_single_worker_is_fifo() {
    let pool = WorkerPool::new(1).unwrap();
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

    for i in 0..10 {
        let order = Arc::clone(&order);
        pool.submit(move || {
            order.lock().push(i);
            Ok::<(), PoolError>(())
        })
        .unwrap();
    }

    pool.wait_completion();
    assert_eq!(*order.lock(), (0..10).collect::<Vec<_>>());
}

#[test]
fn test_failing_and_panicking_tasks_do_not_kill_workers() {
    let pool = WorkerPool::new(1).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    pool.submit(|| Err::<(), _>("device busy")).unwrap();
    pool.submit(|| -> std::result::Result<(), String> { panic!("decoder exploded") })
        .unwrap();

    let after = Arc::clone(&counter);
    pool.submit(move || {
        after.fetch_add(1, Ordering::SeqCst);
        Ok::<(), String>(())
    })
    .unwrap();

    pool.wait_completion();
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn test_full_queue_blocks_submitter() {
    let pool = Arc::new(WorkerPool::new(1).unwrap());
    let release = Arc::new(Interrupt::new());
    let since = release.generation();

    // One task occupies the worker, one fills the single queue slot.
    for _ in 0..2 {
        let release = Arc::clone(&release);
        pool.submit(move || {
            release.sleep_for(Duration::from_secs(10), since);
            Ok::<(), String>(())
        })
        .unwrap();
    }

    let submitted = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&submitted);
    let submitter_pool = Arc::clone(&pool);
    let submitter = thread::spawn(move || {
        submitter_pool
            .submit(|| Ok::<(), String>(()))
            .unwrap();
        flag.store(1, Ordering::SeqCst);
    });

    thread::sleep(Duration::from_millis(100));
    assert_eq!(submitted.load(Ordering::SeqCst), 0, "submit should block on a full queue");

    release.trigger();
    submitter.join().unwrap();
    assert_eq!(submitted.load(Ordering::SeqCst), 1);
    pool.wait_completion();
}

#[test]
fn test_every_worker_stops_with_the_pool() {
    let pool = WorkerPool::new(4).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..8 {
        let counter = Arc::clone(&counter);
        pool.submit(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), String>(())
        })
        .unwrap();
    }
    pool.wait_completion();
    assert!(!pool.is_stopped());

    let start = Instant::now();
    pool.stop();
    assert!(pool.is_stopped());
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(counter.load(Ordering::SeqCst), 8);
}

#[test]
fn test_submit_after_stop_fails() {
    let pool = WorkerPool::new(2).unwrap();
    pool.stop();
    assert!(pool.is_stopped());
    assert_eq!(pool.submit(|| Ok::<(), String>(())), Err(PoolError::Stopped));
}

#[test]
fn test_stop_drops_queued_work() {
    let pool = WorkerPool::new(1).unwrap();
    let release = Arc::new(Interrupt::new());
    let since = release.generation();
    let ran = Arc::new(AtomicUsize::new(0));

    let blocker = Arc::clone(&release);
    pool.submit(move || {
        blocker.sleep_for(Duration::from_millis(200), since);
        Ok::<(), String>(())
    })
    .unwrap();

    let queued = Arc::clone(&ran);
    pool.submit(move || {
        queued.fetch_add(1, Ordering::SeqCst);
        Ok::<(), String>(())
    })
    .unwrap();

    pool.stop();
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}
