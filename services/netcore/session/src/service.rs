//! Executor and strands.
//!
//! A [`Service`] wraps a tokio runtime handle. Each session gets its own
//! [`Strand`]: a serial queue of synchronous jobs drained by a single runtime
//! task, so all lifecycle transitions and I/O completions of one session run
//! one after another even on a multi-threaded runtime.

use crate::error::SessionError;
use std::cell::Cell;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

type Job = Box<dyn FnOnce() + Send + 'static>;

static NEXT_STRAND_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Strand whose job is executing on this thread (0 when none)
    static CURRENT_STRAND: Cell<u64> = const { Cell::new(0) };
}

/// Marks the current thread as running a strand job until dropped
struct StrandGuard {
    previous: u64,
}

impl StrandGuard {
    fn enter(id: u64) -> Self {
        let previous = CURRENT_STRAND.with(|current| current.replace(id));
        Self { previous }
    }
}

impl Drop for StrandGuard {
    fn drop(&mut self) {
        CURRENT_STRAND.with(|current| current.set(self.previous));
    }
}

/// Shared I/O executor
#[derive(Debug)]
pub struct Service {
    handle: Handle,
}

impl Service {
    /// Create a service on top of a runtime handle
    pub fn new(handle: Handle) -> Arc<Self> {
        Arc::new(Self { handle })
    }

    /// Create a service on the runtime of the calling context
    pub fn current() -> Result<Arc<Self>, SessionError> {
        let handle = Handle::try_current().map_err(|_| SessionError::NoRuntime)?;
        Ok(Self::new(handle))
    }

    /// Runtime handle
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Spawn a future onto the runtime
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Create a new strand and start draining it
    pub fn strand(&self) -> Strand {
        let id = NEXT_STRAND_ID.fetch_add(1, Ordering::Relaxed);
        let (queue, mut jobs) = mpsc::unbounded_channel::<Job>();

        self.handle.spawn(async move {
            while let Some(job) = jobs.recv().await {
                let _guard = StrandGuard::enter(id);
                job();
            }
            trace!("Strand {} drained and closed", id);
        });

        Strand { id, queue }
    }
}

/// Serial job queue.
///
/// The drain task ends once every `Strand` clone is dropped and the queued
/// jobs have run.
#[derive(Clone, Debug)]
pub struct Strand {
    id: u64,
    queue: mpsc::UnboundedSender<Job>,
}

impl Strand {
    /// Strand identifier, unique per process
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the calling thread is currently running a job of this strand
    pub fn running_in_this_thread(&self) -> bool {
        CURRENT_STRAND.with(|current| current.get() == self.id)
    }

    /// Queue a job; returns false if the strand is gone
    pub fn post<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.send(Box::new(job)).is_ok()
    }

    /// Run inline when already on this strand, otherwise queue
    pub fn dispatch<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.running_in_this_thread() {
            job();
            true
        } else {
            self.post(job)
        }
    }
}
