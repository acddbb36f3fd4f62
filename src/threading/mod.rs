//! Threading support for earcon playback
//!
//! This module provides the thread handle wrapper, an interruptible sleep
//! primitive and the bounded worker pool that executes audio commands.
//!
//! # Design Notes
//!
//! Playback is split between two kinds of threads:
//! - one pacing thread per active chain, which only sleeps and dispatches
//! - a fixed set of worker threads, which block inside device feeds
//!
//! The worker queue is bounded by the number of workers. A full queue blocks
//! the submitter, which keeps a pacing thread from running far ahead of the
//! audio actually being started.
//!
//! Primitives used:
//! - `std::thread` for thread spawning
//! - `crossbeam::channel` for the bounded task queue
//! - `parking_lot::{Mutex, Condvar}` for completion tracking and interrupts

#[cfg(test)]
mod tests;

use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

/// Default number of worker threads
pub const DEFAULT_WORKERS: usize = 5;

/// Error type for threading operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// Thread spawn failed
    #[error("Thread spawn failed: {0}")]
    SpawnFailed(String),
    /// Thread join failed
    #[error("Thread join failed: {0}")]
    JoinFailed(String),
    /// The pool was stopped and no longer accepts work
    #[error("Worker pool has been stopped")]
    Stopped,
    /// A pool needs at least one worker
    #[error("Worker pool needs at least one thread")]
    NoWorkers,
}

pub type Result<T> = std::result::Result<T, PoolError>;

// ============================================================================
// Thread Handle
// ============================================================================

/// Handle to a spawned, named thread
pub struct Thread<T> {
    handle: Option<JoinHandle<T>>,
    name: String,
}

impl<T> Thread<T> {
    /// Spawn a new thread that executes the given function
    ///
    /// # Errors
    /// Returns `PoolError::SpawnFailed` if thread creation fails
    pub fn spawn<F>(name: &str, f: F) -> Result<Self>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(f)
            .map_err(|e| PoolError::SpawnFailed(format!("{}: {}", name, e)))?;

        Ok(Self {
            handle: Some(handle),
            name: name.to_string(),
        })
    }

    /// Wait for the thread to finish and return its result
    ///
    /// # Errors
    /// Returns `PoolError::JoinFailed` if the thread panicked
    pub fn join(mut self) -> Result<T> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| PoolError::JoinFailed(format!("{} panicked", self.name))),
            None => Err(PoolError::JoinFailed(format!("{} already joined", self.name))),
        }
    }

    /// Check if the thread is still running
    pub fn is_running(&self) -> bool {
        match &self.handle {
            Some(handle) => !handle.is_finished(),
            None => false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Interrupt
// ============================================================================

/// Wakes sleepers early
///
/// Sleepers capture the generation before sleeping and wake as soon as it
/// moves. Each `trigger` bumps the generation, so a trigger that lands before
/// the sleep starts is not lost.
#[derive(Debug, Default)]
pub struct Interrupt {
    generation: Mutex<u64>,
    condvar: Condvar,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation
    pub fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    /// Wake every sleeper
    pub fn trigger(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.condvar.notify_all();
    }

    /// Sleep until `deadline` unless the generation moves away from `since`
    ///
    /// # Returns
    /// `true` if the sleep was interrupted
    pub fn sleep_until(&self, deadline: Instant, since: u64) -> bool {
        let mut generation = self.generation.lock();
        while *generation == since {
            if Instant::now() >= deadline {
                return false;
            }
            self.condvar.wait_until(&mut generation, deadline);
        }
        true
    }

    /// Sleep for `duration` unless the generation moves away from `since`
    pub fn sleep_for(&self, duration: Duration, since: u64) -> bool {
        self.sleep_until(Instant::now() + duration, since)
    }
}

// ============================================================================
// Worker Pool
// ============================================================================

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Outstanding task counter used by `wait_completion`
#[derive(Default)]
struct Outstanding {
    count: Mutex<usize>,
    done: Condvar,
}

impl Outstanding {
    fn add(&self) {
        *self.count.lock() += 1;
    }

    fn finish(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.done.notify_all();
        }
    }

    fn wait_zero(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.done.wait(&mut count);
        }
    }
}

/// Fixed-size pool of threads draining a bounded FIFO queue
///
/// Task errors and panics are logged and swallowed; a failing task never
/// takes its worker down.
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<Thread<()>>>,
    outstanding: Arc<Outstanding>,
    stopping: Arc<AtomicBool>,
    size: usize,
}

impl WorkerPool {
    /// Start `size` workers sharing a queue of capacity `size`
    ///
    /// # Errors
    /// Returns `PoolError::NoWorkers` for a zero size, or
    /// `PoolError::SpawnFailed` if a worker cannot be started
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(PoolError::NoWorkers);
        }

        let (tx, rx) = channel::bounded::<Job>(size);
        let outstanding = Arc::new(Outstanding::default());
        let stopping = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let rx = rx.clone();
            let outstanding = Arc::clone(&outstanding);
            let worker_stopping = Arc::clone(&stopping);
            let worker = Thread::spawn(&format!("earcon-worker-{}", index), move || {
                worker_loop(rx, outstanding, worker_stopping)
            });
            match worker {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    // Workers already started exit once the sender is gone.
                    stopping.store(true, Ordering::SeqCst);
                    drop(tx);
                    for worker in workers {
                        let _ = worker.join();
                    }
                    return Err(e);
                }
            }
        }

        debug!(workers = size, "worker pool started");

        Ok(Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            outstanding,
            stopping,
            size,
        })
    }

    /// Number of worker threads
    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue a task, blocking while the queue is full
    ///
    /// The task's error, if any, is logged by the worker that runs it.
    ///
    /// # Errors
    /// Returns `PoolError::Stopped` once the pool has been stopped
    pub fn submit<F, E>(&self, task: F) -> Result<()>
    where
        F: FnOnce() -> std::result::Result<(), E> + Send + 'static,
        E: Display,
    {
        let sender = match self.sender.lock().as_ref() {
            Some(sender) => sender.clone(),
            None => return Err(PoolError::Stopped),
        };

        let job: Job = Box::new(move || {
            if let Err(e) = task() {
                warn!("task failed: {}", e);
            }
        });

        self.outstanding.add();
        // Sending happens outside the sender lock so `stop` is never blocked
        // behind a submitter waiting for queue space.
        if sender.send(job).is_err() {
            self.outstanding.finish();
            return Err(PoolError::Stopped);
        }
        Ok(())
    }

    /// Block until every task queued so far has finished
    pub fn wait_completion(&self) {
        self.outstanding.wait_zero();
    }

    /// Drop queued tasks, let running tasks finish and join every worker
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.sender.lock().take();

        let workers: Vec<Thread<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            let name = worker.name().to_string();
            if let Err(e) = worker.join() {
                error!(worker = %name, "worker did not shut down cleanly: {}", e);
            }
        }
        debug!("worker pool stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.is_stopped() {
            self.stop();
        }
    }
}

fn worker_loop(rx: Receiver<Job>, outstanding: Arc<Outstanding>, stopping: Arc<AtomicBool>) {
    while let Ok(job) = rx.recv() {
        if !stopping.load(Ordering::SeqCst) {
            if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                error!("task panicked in worker pool");
            }
        }
        outstanding.finish();
    }
}
