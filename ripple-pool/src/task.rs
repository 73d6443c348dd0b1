//! The generic shared-queue task pool.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crate::error::{PoolError, PoolResult};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct TaskState {
    queue: VecDeque<Job>,
    /// Jobs currently executing on a worker.
    active: usize,
    shutdown: bool,
}

struct Shared {
    state: Mutex<TaskState>,
    /// Wakes workers when work arrives or shutdown is signaled.
    work_cv: Condvar,
    /// Wakes `join()` when the pool may have gone idle.
    done_cv: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().expect("task pool state poisoned")
    }
}

/// A conventional shared-queue thread pool: schedule closures, then
/// [`join`](Self::join) until everything scheduled has finished.
///
/// Unlike [`crate::BatchPool`], the caller does not choose which worker
/// runs an item; any idle worker takes the next job. This is the right
/// shape when ordering does not matter, as for prefetch.
pub struct TaskPool {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl TaskPool {
    /// Creates a pool of `workers` threads named after `name`.
    ///
    /// # Errors
    /// Returns [`PoolError::Spawn`] if a worker thread cannot be spawned.
    ///
    /// # Panics
    /// Panics if `workers` is zero.
    pub fn new(name: &str, workers: usize) -> PoolResult<Self> {
        assert!(workers > 0, "task pool needs at least one worker");

        let shared = Arc::new(Shared {
            state: Mutex::new(TaskState {
                queue: VecDeque::new(),
                active: 0,
                shutdown: false,
            }),
            work_cv: Condvar::new(),
            done_cv: Condvar::new(),
        });

        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let thread_name = format!("{name} worker {i}");
            let worker_shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || worker_loop(&worker_shared))
                .map_err(|source| PoolError::Spawn { name: thread_name, source })?;
            handles.push(handle);
        }

        Ok(Self { shared, handles })
    }

    /// Schedules a job on any idle worker.
    pub fn schedule(&self, job: impl FnOnce() + Send + 'static) {
        let mut state = self.shared.lock();
        state.queue.push_back(Box::new(job));
        self.shared.work_cv.notify_one();
    }

    /// Blocks until the queue is empty and no job is executing.
    pub fn join(&self) {
        let mut state = self.shared.lock();
        while !state.queue.is_empty() || state.active > 0 {
            state = self
                .shared
                .done_cv
                .wait(state)
                .expect("task pool state poisoned");
        }
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        {
            let mut state = self.shared.lock();
            state.shutdown = true;
            self.shared.work_cv.notify_all();
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let job = {
            let mut state = shared.lock();
            loop {
                if let Some(job) = state.queue.pop_front() {
                    state.active += 1;
                    break job;
                }
                if state.shutdown {
                    return;
                }
                state = shared
                    .work_cv
                    .wait(state)
                    .expect("task pool state poisoned");
            }
        };

        job();

        let mut state = shared.lock();
        state.active -= 1;
        if state.queue.is_empty() && state.active == 0 {
            shared.done_cv.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_join_waits_for_all_jobs() {
        let pool = TaskPool::new("test", 4).unwrap();
        let count = Arc::new(AtomicU32::new(0));

        for _ in 0..64 {
            let count = Arc::clone(&count);
            pool.schedule(move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.join();
        assert_eq!(count.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn test_join_on_idle_pool_returns() {
        let pool = TaskPool::new("test", 2).unwrap();
        pool.join();
    }

    #[test]
    fn test_schedule_after_join() {
        let pool = TaskPool::new("test", 2).unwrap();
        let count = Arc::new(AtomicU32::new(0));

        for round in 0..3 {
            for _ in 0..10 {
                let count = Arc::clone(&count);
                pool.schedule(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                });
            }
            pool.join();
            assert_eq!(count.load(Ordering::SeqCst), (round + 1) * 10);
        }
    }
}
