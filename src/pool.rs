//! Fixed-size worker pool with a completion-counting result channel.
//!
//! Every submitted task sends exactly one message back, so the collector knows
//! how many tasks are still running. Panics are caught inside the task and
//! counted instead of tearing down the pool.

use anyhow::{Context, Result};
use rayon::ThreadPool;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};
use tracing::warn;

pub struct WorkerPool {
    name: String,
    pool: ThreadPool,
}

#[derive(Debug)]
pub struct PoolOutcome<R> {
    pub results: Vec<R>,
    pub expected: usize,
    pub panicked: usize,
    pub timed_out: bool,
}

impl<R> PoolOutcome<R> {
    pub fn returned(&self) -> usize {
        self.results.len() + self.panicked
    }
}

impl WorkerPool {
    pub fn new(name: &str, threads: usize) -> Result<Self> {
        let thread_prefix = name.to_string();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(move |i| format!("{thread_prefix}-{i}"))
            .build()
            .with_context(|| format!("Failed to build {name} pool"))?;
        Ok(Self {
            name: name.to_string(),
            pool,
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs `task` once per item and waits for the results.
    ///
    /// With a timeout, collection stops at the deadline and the results
    /// received so far are returned; unfinished tasks keep running detached
    /// and their results are dropped.
    pub fn run<T, R, F>(&self, items: Vec<T>, timeout: Option<Duration>, task: F) -> PoolOutcome<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        let expected = items.len();
        let task = Arc::new(task);
        let (tx, rx) = mpsc::channel::<Option<R>>();

        for item in items {
            let tx = tx.clone();
            let task = Arc::clone(&task);
            self.pool.spawn(move || {
                let out = panic::catch_unwind(AssertUnwindSafe(|| task(item))).ok();
                let _ = tx.send(out);
            });
        }
        drop(tx);

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut outcome = PoolOutcome {
            results: Vec::with_capacity(expected),
            expected,
            panicked: 0,
            timed_out: false,
        };

        while outcome.returned() < expected {
            let next = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        Err(RecvTimeoutError::Timeout)
                    } else {
                        rx.recv_timeout(deadline - now)
                    }
                }
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match next {
                Ok(Some(result)) => outcome.results.push(result),
                Ok(None) => outcome.panicked += 1,
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        pool = %self.name,
                        returned = outcome.returned(),
                        expected,
                        "timeout reached, continuing with partial results"
                    );
                    outcome.timed_out = true;
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if outcome.panicked > 0 {
            warn!(pool = %self.name, panicked = outcome.panicked, "tasks panicked");
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_every_result() -> Result<()> {
        let pool = WorkerPool::new("test", 3)?;
        let mut outcome = pool.run((1..=10).collect(), None, |n: u32| n * 2);
        outcome.results.sort();
        assert_eq!(outcome.expected, 10);
        assert_eq!(outcome.results, (1..=10).map(|n| n * 2).collect::<Vec<_>>());
        assert!(!outcome.timed_out);
        Ok(())
    }

    #[test]
    fn panicking_task_does_not_affect_siblings() -> Result<()> {
        let pool = WorkerPool::new("test", 2)?;
        let outcome = pool.run(vec![1, 2, 3], None, |n: u32| {
            if n == 2 {
                panic!("boom");
            }
            n
        });
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.panicked, 1);
        assert_eq!(outcome.returned(), 3);
        Ok(())
    }

    #[test]
    fn timeout_returns_partial_results() -> Result<()> {
        let pool = WorkerPool::new("test", 2)?;
        let outcome = pool.run(vec![0u64, 5_000], Some(Duration::from_millis(300)), |ms| {
            std::thread::sleep(Duration::from_millis(ms));
            ms
        });
        assert!(outcome.timed_out);
        assert_eq!(outcome.results, vec![0]);
        Ok(())
    }
}
