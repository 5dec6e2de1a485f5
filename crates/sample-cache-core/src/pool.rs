use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use tracing::debug;

use crate::error::Error;

/// What the batch does when a task fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Keep running the remaining tasks.
    Continue,
    /// Let running tasks finish but cancel everything not yet started.
    FailFast,
}

#[derive(Debug)]
pub enum TaskOutcome<R> {
    Done(R),
    Failed(Error),
    Cancelled,
}

/// Bounded pool running one batch of independent tasks at a time.
pub struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Result<Self, Error> {
        let threads = threads.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("sample-cache-worker-{}", i))
            .build()
            .map_err(|e| Error::Other(format!("cannot build worker pool: {}", e)))?;
        debug!("Worker pool with {} threads", threads);
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `task` on every item and block until all are settled.
    ///
    /// Returns `(index, outcome)` pairs in completion order, index being the
    /// item's position in `items`.
    pub fn run<T, R, F>(
        &self,
        items: Vec<T>,
        policy: FailurePolicy,
        task: F,
    ) -> Vec<(usize, TaskOutcome<R>)>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> Result<R, Error> + Sync,
    {
        let (tx, rx) = mpsc::channel();
        let cancelled = AtomicBool::new(false);
        let task = &task;
        let cancelled_ref = &cancelled;

        self.pool.scope(|scope| {
            for (id, item) in items.into_iter().enumerate() {
                let tx = tx.clone();
                scope.spawn(move |_| {
                    let outcome = if cancelled_ref.load(Ordering::SeqCst) {
                        TaskOutcome::Cancelled
                    } else {
                        match task(item) {
                            Ok(result) => TaskOutcome::Done(result),
                            Err(err) => {
                                if policy == FailurePolicy::FailFast {
                                    cancelled_ref.store(true, Ordering::SeqCst);
                                }
                                TaskOutcome::Failed(err)
                            }
                        }
                    };
                    // the receiver outlives the scope
                    let _ = tx.send((id, outcome));
                });
            }
        });
        drop(tx);

        rx.into_iter().collect()
    }
}
