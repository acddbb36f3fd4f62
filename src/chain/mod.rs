//! Playback chains
//!
//! A chain is a run of synchronous audio commands that must play back to
//! back on the speech timeline. The scheduler gives each started chain its
//! own pacing thread, which hands commands to the worker pool at absolute
//! offsets from the chain's start.
//!
//! # Design Notes
//!
//! - Pacing uses absolute targets (start + sum of previous durations), so
//!   dispatch jitter does not accumulate along the chain.
//! - A command's `run` blocks on a worker, never on the pacing thread. How
//!   long a command actually plays does not move the next dispatch.
//! - Cancellation only flips a flag, wakes the pacing thread and asks each
//!   command to stop. It never waits for audio to go quiet.
//! - At most one chain is current. Starting a chain replaces the current one
//!   without cancelling it.
//! - Natural completion clears the current slot only if it still holds the
//!   finishing chain. A chain started at the same moment may still be
//!   cleared by a cancel that raced with it; this is accepted.


use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::sound::AudioCommand;
use crate::threading::{Interrupt, PoolError, Thread, WorkerPool};

/// Error type for chain scheduling
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// The scheduler has been stopped
    #[error("Chain scheduler has been stopped")]
    Stopped,
    /// Chains are never restarted
    #[error("Chain {0} has already been started")]
    AlreadyStarted(u64),
    /// The pacing thread could not be created
    #[error(transparent)]
    Thread(#[from] PoolError),
}

static NEXT_CHAIN_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// Chain
// ============================================================================

/// Lifecycle of a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChainState {
    Pending = 0,
    Running = 1,
    Completed = 2,
    Terminated = 3,
}

impl ChainState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ChainState::Pending,
            1 => ChainState::Running,
            2 => ChainState::Completed,
            _ => ChainState::Terminated,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, ChainState::Completed | ChainState::Terminated)
    }
}

/// Ordered group of synchronous commands
pub struct Chain {
    id: u64,
    commands: Vec<Arc<dyn AudioCommand>>,
    duration_ms: u64,
    state: AtomicU8,
    started: AtomicBool,
    interrupt: Interrupt,
    paced: Mutex<bool>,
    paced_cv: Condvar,
}

impl Chain {
    pub fn new(commands: Vec<Arc<dyn AudioCommand>>) -> Self {
        let duration_ms = commands.iter().map(|c| c.duration_ms()).sum();
        Self {
            id: NEXT_CHAIN_ID.fetch_add(1, Ordering::Relaxed),
            commands,
            duration_ms,
            state: AtomicU8::new(ChainState::Pending as u8),
            started: AtomicBool::new(false),
            interrupt: Interrupt::new(),
            paced: Mutex::new(false),
            paced_cv: Condvar::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Sum of the member durations
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn commands(&self) -> &[Arc<dyn AudioCommand>] {
        &self.commands
    }

    pub fn state(&self) -> ChainState {
        ChainState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == ChainState::Terminated
    }

    /// Stop the chain and every command in it
    ///
    /// Idempotent. A completed chain stays completed, but its commands are
    /// still told to stop since their audio may outlast the pacing.
    pub fn terminate(&self) {
        let mut current = self.state.load(Ordering::SeqCst);
        while current != ChainState::Completed as u8 && current != ChainState::Terminated as u8 {
            match self.state.compare_exchange(
                current,
                ChainState::Terminated as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    debug!(chain = self.id, "chain terminated");
                    break;
                }
                Err(actual) => current = actual,
            }
        }
        self.interrupt.trigger();
        for command in &self.commands {
            command.terminate();
        }
    }

    /// Block until the pacing thread has finished with this chain
    ///
    /// Returns immediately for a chain that was never started.
    pub fn wait(&self) {
        if !self.started.load(Ordering::SeqCst) {
            return;
        }
        let mut paced = self.paced.lock();
        while !*paced {
            self.paced_cv.wait(&mut paced);
        }
    }

    fn transition(&self, from: ChainState, to: ChainState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn mark_paced(&self) {
        *self.paced.lock() = true;
        self.paced_cv.notify_all();
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("id", &self.id)
            .field("duration_ms", &self.duration_ms)
            .field("state", &self.state())
            .field("commands", &self.commands)
            .finish()
    }
}

// ============================================================================
// Current Chain
// ============================================================================

/// Handle to a started chain
#[derive(Clone)]
pub struct ChainHandle {
    chain: Arc<Chain>,
    current: Weak<CurrentChain>,
}

impl ChainHandle {
    pub fn chain(&self) -> &Arc<Chain> {
        &self.chain
    }

    pub fn id(&self) -> u64 {
        self.chain.id
    }

    /// Terminate the chain and drop it from the current slot
    pub fn cancel(&self) {
        self.chain.terminate();
        if let Some(current) = self.current.upgrade() {
            current.clear_if(self.chain.id);
        }
    }

    /// Block until pacing has finished
    pub fn wait(&self) {
        self.chain.wait();
    }
}

impl fmt::Debug for ChainHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainHandle({})", self.chain.id)
    }
}

/// Process-wide slot holding the chain that cancellation applies to
#[derive(Debug, Default)]
pub struct CurrentChain {
    slot: Mutex<Option<ChainHandle>>,
}

impl CurrentChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `handle` current, returning the chain it replaced
    pub fn install(&self, handle: ChainHandle) -> Option<ChainHandle> {
        self.slot.lock().replace(handle)
    }

    pub fn current(&self) -> Option<ChainHandle> {
        self.slot.lock().clone()
    }

    /// Empty the slot if it still holds chain `id`
    pub fn clear_if(&self, id: u64) -> bool {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|h| h.chain.id == id) {
            *slot = None;
            true
        } else {
            false
        }
    }

    /// Terminate the current chain, if any
    ///
    /// # Returns
    /// `true` if a chain was cancelled
    pub fn cancel(&self) -> bool {
        let taken = self.slot.lock().take();
        match taken {
            Some(handle) => {
                handle.chain.terminate();
                true
            }
            None => false,
        }
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Starts chains and tracks their pacing threads
pub struct ChainScheduler {
    pool: Arc<WorkerPool>,
    current: Arc<CurrentChain>,
    active: Mutex<Vec<(Arc<Chain>, Thread<()>)>>,
    stopping: AtomicBool,
}

impl ChainScheduler {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self {
            pool,
            current: Arc::new(CurrentChain::new()),
            active: Mutex::new(Vec::new()),
            stopping: AtomicBool::new(false),
        }
    }

    /// The slot cancellation hooks consult
    pub fn current(&self) -> &Arc<CurrentChain> {
        &self.current
    }

    /// Start playing `chain` and make it current
    ///
    /// # Errors
    /// Returns `ChainError::Stopped` after `stop`, `ChainError::AlreadyStarted`
    /// for a chain passed to `start` before, or `ChainError::Thread`
    /// if the pacing thread cannot be spawned
    pub fn start(&self, chain: Arc<Chain>) -> Result<ChainHandle, ChainError> {
        if self.stopping.load(Ordering::SeqCst) {
            return Err(ChainError::Stopped);
        }
        if chain.started.swap(true, Ordering::SeqCst) {
            return Err(ChainError::AlreadyStarted(chain.id));
        }

        let handle = ChainHandle {
            chain: Arc::clone(&chain),
            current: Arc::downgrade(&self.current),
        };
        // A chain cancelled before it started never becomes current.
        if !chain.is_terminated() {
            self.current.install(handle.clone());
        }

        let pool = Arc::clone(&self.pool);
        let current = Arc::clone(&self.current);
        let paced = Arc::clone(&chain);
        let thread = Thread::spawn(&format!("earcon-chain-{}", chain.id), move || {
            pace(&paced, &pool, &current);
        });
        let thread = match thread {
            Ok(thread) => thread,
            Err(e) => {
                handle.cancel();
                chain.mark_paced();
                return Err(e.into());
            }
        };

        let mut active = self.active.lock();
        active.retain(|(_, t)| t.is_running());
        active.push((chain, thread));
        Ok(handle)
    }

    /// Number of chains whose pacing thread is still alive
    pub fn active_count(&self) -> usize {
        self.active
            .lock()
            .iter()
            .filter(|(_, t)| t.is_running())
            .count()
    }

    /// Cancel every running chain and join their threads
    ///
    /// The scheduler refuses new chains afterwards. The worker pool is left
    /// running; it belongs to the caller.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.current.cancel();

        let active: Vec<_> = self.active.lock().drain(..).collect();
        for (chain, thread) in active {
            chain.terminate();
            if let Err(e) = thread.join() {
                warn!(chain = chain.id, "pacing thread failed: {}", e);
            }
        }
        debug!("chain scheduler stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }
}

impl Drop for ChainScheduler {
    fn drop(&mut self) {
        if !self.is_stopped() {
            self.stop();
        }
    }
}

/// Body of a pacing thread
fn pace(chain: &Chain, pool: &WorkerPool, current: &CurrentChain) {
    let since = chain.interrupt.generation();
    if !chain.transition(ChainState::Pending, ChainState::Running) {
        current.clear_if(chain.id);
        chain.mark_paced();
        return;
    }

    let start = Instant::now();
    let mut target = start;
    debug!(chain = chain.id, commands = chain.commands.len(), duration_ms = chain.duration_ms, "chain started");

    for (index, command) in chain.commands.iter().enumerate() {
        if chain.is_terminated() {
            debug!(chain = chain.id, index, "chain stopped before dispatch");
            break;
        }

        let task = Arc::clone(command);
        if let Err(e) = pool.submit(move || task.run()) {
            warn!(chain = chain.id, index, "cannot dispatch command: {}", e);
            chain.terminate();
            break;
        }

        target += Duration::from_millis(command.duration_ms());
        if chain.interrupt.sleep_until(target, since) {
            break;
        }
    }

    let completed = chain.transition(ChainState::Running, ChainState::Completed);
    current.clear_if(chain.id);
    if completed {
        debug!(chain = chain.id, elapsed_ms = start.elapsed().as_millis() as u64, "chain completed");
    }
    chain.mark_paced();
}
