//! Fixed set of worker threads (C13).
//!
//! Thin layer over a dedicated rayon pool:
//!
//! - [`WorkerPool::parallelize`] runs a closure over a slice of disjoint work
//!   items and returns once all of them finished (the caller thread helps).
//! - [`WorkerPool::run_task`] submits one job and hands back a [`TaskHandle`]
//!   to join later. The handle's result slot is a mutex with a condition
//!   variable.
//!
//! Panics never cross the pool boundary; both entry points return them as
//! [`TaskPanic`] values.

use crate::error::{PoolError, TaskPanic};
use rayon::prelude::*;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use tracing::{debug, error};

pub struct WorkerPool {
    pool: rayon::ThreadPool,
    threads: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool").field("threads", &self.threads).finish()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> TaskPanic {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    TaskPanic(message)
}

impl WorkerPool {
    pub fn new(threads: usize) -> Result<Self, PoolError> {
        let threads = threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("beam-sim-worker-{i}"))
            .build()?;
        debug!(threads, "worker pool started");
        Ok(Self { pool, threads })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `f` on every item and block until all complete.
    pub fn parallelize<T, F>(&self, items: &mut [T], f: F) -> Result<(), TaskPanic>
    where
        T: Send,
        F: Fn(&mut T) + Sync + Send,
    {
        if items.len() <= 1 {
            return catch_unwind(AssertUnwindSafe(|| items.iter_mut().for_each(&f)))
                .map_err(panic_message);
        }
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.pool.install(|| items.par_iter_mut().for_each(&f))
        }));
        result.map_err(|payload| {
            let panic = panic_message(payload);
            error!(message = %panic.0, "parallel batch panicked");
            panic
        })
    }

    /// Submit one job; join it through the returned handle.
    pub fn run_task<F, R>(&self, f: F) -> TaskHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let slot: Arc<TaskSlot<R>> =
            Arc::new(TaskSlot { result: Mutex::new(None), done: Condvar::new() });
        let writer = Arc::clone(&slot);
        self.pool.spawn(move || {
            let outcome = catch_unwind(AssertUnwindSafe(f)).map_err(panic_message);
            if let Err(panic) = &outcome {
                error!(message = %panic.0, "worker task panicked");
            }
            let mut result = writer.result.lock().unwrap_or_else(PoisonError::into_inner);
            *result = Some(outcome);
            writer.done.notify_all();
        });
        TaskHandle { slot }
    }
}

struct TaskSlot<R> {
    result: Mutex<Option<Result<R, TaskPanic>>>,
    done: Condvar,
}

/// Join handle of a [`WorkerPool::run_task`] job.
pub struct TaskHandle<R> {
    slot: Arc<TaskSlot<R>>,
}

impl<R> TaskHandle<R> {
    pub fn is_finished(&self) -> bool {
        self.slot.result.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Block until the job finished and take its result.
    pub fn join(self) -> Result<R, TaskPanic> {
        let mut result = self.slot.result.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(outcome) = result.take() {
                return outcome;
            }
            result = self.slot.done.wait(result).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_parallelize_touches_every_item() {
        let pool = WorkerPool::new(3).unwrap();
        let mut items: Vec<u64> = (0..100).collect();
        pool.parallelize(&mut items, |x| *x *= 2).unwrap();
        assert!(items.iter().enumerate().all(|(i, &x)| x == 2 * i as u64));
    }

    #[test]
    fn test_parallelize_reports_panic() {
        let pool = WorkerPool::new(2).unwrap();
        let mut items = vec![1, 2, 3, 4];
        let err = pool
            .parallelize(&mut items, |x| {
                if *x == 3 {
                    panic!("bad item");
                }
            })
            .unwrap_err();
        assert_eq!(err.0, "bad item");
    }

    #[test]
    fn test_run_task_joins_result() {
        let pool = WorkerPool::new(1).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let handle = pool.run_task(move || {
            c.fetch_add(5, Ordering::SeqCst);
            vec![1, 2, 3]
        });
        assert_eq!(handle.join().unwrap(), vec![1, 2, 3]);
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_run_task_panic_is_value() {
        let pool = WorkerPool::new(1).unwrap();
        let handle = pool.run_task(|| -> u32 { panic!("{}", String::from("task blew up")) });
        let err = handle.join().unwrap_err();
        assert_eq!(err, TaskPanic("task blew up".into()));
    }
}
