//! Worker pool with a bounded wait.
//!
//! Tasks are spawned on a dedicated rayon pool and report back over a
//! crossbeam channel. The caller blocks until every task has reported or the
//! deadline passes; in the latter case the pass fails and whatever the late
//! tasks produce is dropped. Results are returned in task order, so the outcome
//! never depends on scheduling.

use crate::error::{LinkError, Result};
use crossbeam::channel::{unbounded, RecvTimeoutError};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::time::{Duration, Instant};

pub struct WorkerPool {
    name: &'static str,
    pool: ThreadPool,
    timeout: Duration,
}

impl WorkerPool {
    /// Build a pool of `threads` workers (`0` = rayon default, one per core).
    pub fn new(name: &'static str, threads: usize, timeout: Duration) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("{name}-{i}"))
            .panic_handler(move |_| tracing::error!(pool = name, "linking task panicked"))
            .build()
            .map_err(|e| LinkError::ThreadPool(e.to_string()))?;
        Ok(Self {
            name,
            pool,
            timeout,
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run every task and collect the results in task order.
    pub fn run_all<T, F>(&self, tasks: Vec<F>) -> Result<Vec<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let total = tasks.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let (tx, rx) = unbounded::<(usize, T)>();
        for (i, task) in tasks.into_iter().enumerate() {
            let tx = tx.clone();
            self.pool.spawn(move || {
                // the receiver is gone once the caller gave up waiting
                let _ = tx.send((i, task()));
            });
        }
        drop(tx);

        // a timeout past the end of the clock means no deadline at all
        let deadline = Instant::now().checked_add(self.timeout);
        let mut slots: Vec<Option<T>> = (0..total).map(|_| None).collect();
        for received in 0..total {
            let next = match deadline {
                Some(deadline) => rx.recv_deadline(deadline),
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match next {
                Ok((i, value)) => slots[i] = Some(value),
                Err(RecvTimeoutError::Timeout) => {
                    tracing::error!(
                        pool = self.name,
                        pending = total - received,
                        "tasks timed out"
                    );
                    return Err(LinkError::Timeout {
                        timeout: self.timeout,
                        pending: total - received,
                        total,
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(LinkError::interrupted(format!(
                        "{} of {total} {} tasks terminated without a result",
                        total - received,
                        self.name
                    )));
                }
            }
        }
        Ok(slots.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_come_back_in_task_order() {
        let pool = WorkerPool::new("test", 4, Duration::from_secs(10)).unwrap();
        let tasks: Vec<_> = (0..32u64)
            .map(|i| {
                move || {
                    std::thread::sleep(Duration::from_millis((32 - i) % 5));
                    i * i
                }
            })
            .collect();
        let out = pool.run_all(tasks).unwrap();
        assert_eq!(out, (0..32u64).map(|i| i * i).collect::<Vec<_>>());
    }

    #[test]
    fn slow_tasks_time_out() {
        let pool = WorkerPool::new("test", 1, Duration::from_millis(20)).unwrap();
        let tasks = vec![|| std::thread::sleep(Duration::from_millis(500))];
        assert!(matches!(pool.run_all(tasks), Err(LinkError::Timeout { .. })));
    }

    #[test]
    fn panicking_task_interrupts_the_pass() {
        let pool = WorkerPool::new("test", 2, Duration::from_secs(10)).unwrap();
        let tasks: Vec<Box<dyn FnOnce() -> u32 + Send>> =
            vec![Box::new(|| 1), Box::new(|| panic!("boom"))];
        assert!(matches!(pool.run_all(tasks), Err(LinkError::Interrupted(_))));
    }

    #[test]
    fn unbounded_timeout_waits_for_results() {
        let pool = WorkerPool::new("test", 1, Duration::MAX).unwrap();
        let tasks: Vec<fn() -> u8> = vec![|| 1, || 2];
        assert_eq!(pool.run_all(tasks).unwrap(), vec![1, 2]);
    }

    #[test]
    fn no_tasks_no_wait() {
        let pool = WorkerPool::new("test", 1, Duration::from_millis(1)).unwrap();
        let tasks: Vec<fn() -> u8> = Vec::new();
        assert!(pool.run_all(tasks).unwrap().is_empty());
    }
}
