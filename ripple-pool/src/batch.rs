//! The batched, per-worker-queue thread pool.

use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::{mpsc, Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crate::error::{PoolError, PoolResult};

/// The per-item function a batch runs. Installed once per batch with
/// [`BatchPool::set_task`].
type Task<T> = Arc<dyn Fn(T) + Send + Sync + 'static>;

/// Phase bookkeeping shared between the coordinator and the workers.
struct PoolState<T> {
    /// A batch is in flight. Enqueue and task installation are forbidden
    /// while set.
    running: bool,
    /// The pool is being dropped; workers exit at their next wait.
    shutdown: bool,
    /// Workers that have drained their queue this batch. Counts up to the
    /// worker count, then back down to zero as workers pass the end-wait.
    finished: usize,
    /// The per-item function for the current batch.
    task: Option<Task<T>>,
}

struct Shared<T> {
    state: Mutex<PoolState<T>>,
    /// Signals phase changes (batch start, batch end, shutdown).
    batch_cv: Condvar,
    /// Signals completion-count changes to `go()`.
    finish_cv: Condvar,
    workers: usize,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, PoolState<T>> {
        self.state.lock().expect("batch pool state poisoned")
    }
}

/// A fixed-size worker pool that executes one function over per-worker
/// queues, batch by batch.
///
/// Lifecycle per batch: [`set_task`](Self::set_task), then
/// [`enqueue`](Self::enqueue) every item to its chosen worker, then
/// [`go`](Self::go). `go()` releases the workers, blocks until every
/// worker has drained its queue, and returns with the workers parked
/// awaiting the next batch.
///
/// Invariants: `finished` never exceeds the worker count; a worker that
/// has reported finished executes nothing until the next `go()`; a worker
/// observes its queue in enqueue order.
pub struct BatchPool<T> {
    shared: Arc<Shared<T>>,
    /// Send halves of the per-worker queues. Only the coordinator sends,
    /// only the owning worker receives.
    senders: Vec<Sender<T>>,
    handles: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> BatchPool<T> {
    /// Creates a pool of `workers` parked threads named after `name`.
    ///
    /// # Errors
    /// Returns [`PoolError::Spawn`] if a worker thread cannot be spawned.
    ///
    /// # Panics
    /// Panics if `workers` is zero.
    pub fn new(name: &str, workers: usize) -> PoolResult<Self> {
        assert!(workers > 0, "batch pool needs at least one worker");

        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                running: false,
                shutdown: false,
                finished: 0,
                task: None,
            }),
            batch_cv: Condvar::new(),
            finish_cv: Condvar::new(),
            workers,
        });

        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let (tx, rx) = mpsc::channel();
            senders.push(tx);
            let thread_name = format!("{name} worker {i}");
            let worker_shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || worker_loop(&worker_shared, &rx))
                .map_err(|source| PoolError::Spawn { name: thread_name, source })?;
            handles.push(handle);
        }

        Ok(Self { shared, senders, handles })
    }

    /// Returns the number of workers.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.shared.workers
    }

    /// Installs the per-item function for the next batch.
    ///
    /// # Panics
    /// Panics if a batch is currently running.
    pub fn set_task(&self, task: impl Fn(T) + Send + Sync + 'static) {
        let mut state = self.shared.lock();
        assert!(!state.running, "set_task while a batch is running");
        state.task = Some(Arc::new(task));
    }

    /// Appends `item` to worker `worker`'s queue.
    ///
    /// # Panics
    /// Panics if a batch is currently running or `worker` is out of range.
    pub fn enqueue(&self, worker: usize, item: T) {
        let state = self.shared.lock();
        assert!(!state.running, "enqueue while a batch is running");
        drop(state);
        self.senders[worker]
            .send(item)
            .expect("batch pool worker exited with the pool alive");
    }

    /// Releases the workers and blocks until every queue is drained.
    ///
    /// On return the workers are parked again and the pool accepts the
    /// next `set_task`/`enqueue` cycle.
    ///
    /// # Panics
    /// Panics if no task was installed or a batch is already running.
    pub fn go(&self) {
        let mut state = self.shared.lock();
        assert!(!state.running, "go() while a batch is running");
        assert!(state.task.is_some(), "go() without set_task");

        state.running = true;
        self.shared.batch_cv.notify_all();
        while state.finished < self.shared.workers {
            state = self
                .shared
                .finish_cv
                .wait(state)
                .expect("batch pool state poisoned");
        }

        // Every worker has drained its queue. Flip the phase so workers
        // move from their end-wait back to their work-wait, and wait for
        // the count to drain to zero before handing the pool back.
        state.running = false;
        self.shared.batch_cv.notify_all();
        while state.finished > 0 {
            state = self
                .shared
                .finish_cv
                .wait(state)
                .expect("batch pool state poisoned");
        }
    }
}

impl<T> Drop for BatchPool<T> {
    fn drop(&mut self) {
        {
            let mut state = self.shared.lock();
            state.shutdown = true;
            self.shared.batch_cv.notify_all();
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop<T>(shared: &Shared<T>, queue: &Receiver<T>) {
    loop {
        // Wait for work.
        let task = {
            let mut state = shared.lock();
            while !state.running && !state.shutdown {
                state = shared
                    .batch_cv
                    .wait(state)
                    .expect("batch pool state poisoned");
            }
            if state.shutdown {
                return;
            }
            Arc::clone(state.task.as_ref().expect("running without a task"))
        };

        // Drain our queue. Everything was enqueued before go(), so an
        // empty channel means the queue is exhausted.
        loop {
            match queue.try_recv() {
                Ok(item) => task(item),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }

        // Report finished.
        {
            let mut state = shared.lock();
            state.finished += 1;
            if state.finished == shared.workers {
                shared.finish_cv.notify_one();
            } else {
                assert!(state.finished < shared.workers);
            }
        }

        // Wait for the batch to end, then count ourselves back out.
        {
            let mut state = shared.lock();
            while state.running && !state.shutdown {
                state = shared
                    .batch_cv
                    .wait(state)
                    .expect("batch pool state poisoned");
            }
            if state.shutdown {
                return;
            }
            state.finished -= 1;
            if state.finished == 0 {
                shared.finish_cv.notify_one();
            }
        }
    }
}
