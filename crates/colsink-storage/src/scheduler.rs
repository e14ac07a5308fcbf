//! Sealing Task Schedulers
//!
//! A buffered sink hands the sealing of each page to a `TaskScheduler` and later blocks on
//! `wait()` before it commits a cluster. Schedulers are injected into the sink; nothing here is
//! a process-wide singleton.
//!
//! ## Implementations
//!
//! - `InlineScheduler`: runs each task on the calling thread as soon as it is submitted.
//!   Deterministic; used in tests and single-threaded builds.
//! - `ThreadPoolScheduler`: a dedicated rayon pool. In-flight tasks are counted so `wait()`
//!   can block until the pool has drained this scheduler's work.
//! - `TokioScheduler`: runs tasks on a tokio runtime's blocking pool, for applications that
//!   already own a runtime.
//!
//! ## Panics
//!
//! A panicking task never takes down the control thread. Panics are counted and reported by
//! the next `wait()` as `Error::TaskPanicked`. Tasks that fail without panicking report through
//! their own result slot instead.
//!
//! ## Example
//!
//! ```ignore
//! let scheduler = Arc::new(ThreadPoolScheduler::new(Some(4))?);
//! let mut sink = BufferedPageSink::with_scheduler(inner, scheduler);
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::WriteOptions;
use crate::error::{Error, Result};

/// A unit of work submitted to a scheduler
pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait TaskScheduler: Send + Sync {
    /// Submit a task; it may start immediately or at any later point
    fn add_task(&self, task: Task);

    /// Block until every task submitted so far has finished
    fn wait(&self) -> Result<()>;
}

// ---------------------------------------------------------------
// Inline
// ---------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InlineScheduler {
    executed: AtomicUsize,
    panicked: AtomicUsize,
}

impl InlineScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks run so far
    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::Relaxed)
    }
}

impl TaskScheduler for InlineScheduler {
    fn add_task(&self, task: Task) {
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            self.panicked.fetch_add(1, Ordering::Relaxed);
        }
        self.executed.fetch_add(1, Ordering::Relaxed);
    }

    fn wait(&self) -> Result<()> {
        match self.panicked.swap(0, Ordering::Relaxed) {
            0 => Ok(()),
            n => Err(Error::TaskPanicked(n)),
        }
    }
}

// ---------------------------------------------------------------
// Thread pool
// ---------------------------------------------------------------

#[derive(Debug, Default)]
struct Pending {
    in_flight: usize,
    panicked: usize,
}

#[derive(Debug, Default)]
struct PendingTasks {
    state: Mutex<Pending>,
    drained: Condvar,
}

impl PendingTasks {
    fn submitted(&self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight += 1;
    }

    fn finished(&self, panicked: bool) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.in_flight -= 1;
        if panicked {
            state.panicked += 1;
        }
        if state.in_flight == 0 {
            self.drained.notify_all();
        }
    }

    /// Block until nothing is in flight; returns and resets the panic count
    fn drain(&self) -> usize {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while state.in_flight > 0 {
            state = self
                .drained
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        std::mem::take(&mut state.panicked)
    }

    fn in_flight(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight
    }
}

/// Seals pages on a dedicated rayon thread pool.
///
/// `wait()` must not be called from one of the pool's own threads.
pub struct ThreadPoolScheduler {
    pool: rayon::ThreadPool,
    pending: Arc<PendingTasks>,
}

impl ThreadPoolScheduler {
    /// Build a pool with `num_threads` workers (`None`: rayon's default)
    pub fn new(num_threads: Option<usize>) -> Result<Self> {
        let mut builder =
            rayon::ThreadPoolBuilder::new().thread_name(|i| format!("colsink-seal-{}", i));
        if let Some(n) = num_threads {
            if n == 0 {
                return Err(Error::Scheduler("thread pool needs at least one thread".to_string()));
            }
            builder = builder.num_threads(n);
        }
        let pool = builder
            .build()
            .map_err(|e| Error::Scheduler(format!("failed to build sealing pool: {}", e)))?;

        debug!(threads = pool.current_num_threads(), "Sealing thread pool started");

        Ok(Self {
            pool,
            pending: Arc::new(PendingTasks::default()),
        })
    }

    pub fn from_options(options: &WriteOptions) -> Result<Self> {
        Self::new(options.sealing_threads)
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Tasks submitted but not yet finished
    pub fn pending(&self) -> usize {
        self.pending.in_flight()
    }
}

impl TaskScheduler for ThreadPoolScheduler {
    fn add_task(&self, task: Task) {
        self.pending.submitted();
        let pending = Arc::clone(&self.pending);
        self.pool.spawn(move || {
            let panicked = catch_unwind(AssertUnwindSafe(task)).is_err();
            pending.finished(panicked);
        });
    }

    fn wait(&self) -> Result<()> {
        match self.pending.drain() {
            0 => Ok(()),
            n => {
                warn!(panicked = n, "Sealing tasks panicked");
                Err(Error::TaskPanicked(n))
            }
        }
    }
}

impl std::fmt::Debug for ThreadPoolScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPoolScheduler")
            .field("threads", &self.num_threads())
            .field("pending", &self.pending())
            .finish()
    }
}

// ---------------------------------------------------------------
// Tokio
// ---------------------------------------------------------------

/// Seals pages on the blocking pool of a tokio runtime.
///
/// `wait()` blocks the calling thread and must be called outside of async context.
pub struct TokioScheduler {
    handle: Handle,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Use the runtime the caller is running in
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| Error::Scheduler(format!("no tokio runtime: {}", e)))?;
        Ok(Self::new(handle))
    }

    pub fn pending(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|t| !t.is_finished())
            .count()
    }
}

impl TaskScheduler for TokioScheduler {
    fn add_task(&self, task: Task) {
        let join = self.handle.spawn_blocking(task);
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(join);
    }

    fn wait(&self) -> Result<()> {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));

        let mut panicked = 0;
        let mut cancelled = 0;
        for task in tasks {
            if let Err(e) = self.handle.block_on(task) {
                if e.is_panic() {
                    panicked += 1;
                } else {
                    cancelled += 1;
                }
            }
        }

        if cancelled > 0 {
            return Err(Error::Scheduler(format!(
                "{} sealing task(s) cancelled by runtime shutdown",
                cancelled
            )));
        }
        if panicked > 0 {
            warn!(panicked, "Sealing tasks panicked");
            return Err(Error::TaskPanicked(panicked));
        }
        Ok(())
    }
}

impl std::fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}
