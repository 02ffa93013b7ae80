//! Single-thread worker for boot-time jobs.
//!
//! Preloads and runtime loader construction run here so that whatever
//! thread-local state they capture belongs to a short-lived thread rather
//! than to the application's main thread.

use crate::error::WorkerError;
use crossbeam_channel::{bounded, unbounded, Sender};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use tracing::{debug, trace};

type Job = Box<dyn FnOnce() + Send>;

pub struct Worker {
    name: String,
    jobs: Mutex<Option<Sender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub fn spawn(name: impl Into<String>) -> Result<Self, WorkerError> {
        let name = name.into();
        let (tx, rx) = unbounded::<Job>();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                for job in rx {
                    job();
                }
            })
            .map_err(|e| WorkerError::Spawn {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        debug!(worker = %name, "worker started");
        Ok(Self {
            name,
            jobs: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `f` on the worker thread and wait for its result.
    pub fn run<T, F>(&self, f: F) -> Result<T, WorkerError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let interrupted = || WorkerError::Interrupted(self.name.clone());
        let sender = self.jobs.lock().clone().ok_or_else(interrupted)?;
        let (reply_tx, reply_rx) = bounded(1);
        let job: Job = Box::new(move || {
            let outcome = catch_unwind(AssertUnwindSafe(f));
            let _ = reply_tx.send(outcome);
        });
        sender.send(job).map_err(|_| interrupted())?;
        match reply_rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(WorkerError::Panicked(self.name.clone())),
            Err(_) => Err(interrupted()),
        }
    }

    /// Stop accepting jobs. Jobs already queued still run.
    pub fn interrupt(&self) {
        if self.jobs.lock().take().is_some() {
            trace!(worker = %self.name, "worker interrupted");
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.jobs.lock().is_none()
    }

    /// Wait for the worker thread to finish. Blocks until `interrupt` has
    /// been called and the queue has drained.
    pub fn join(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                debug!(worker = %self.name, "worker thread ended with a panic");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.interrupt();
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_returns_value_from_worker_thread() {
        let w = Worker::spawn("test-worker").unwrap();
        let name = w.run(|| thread::current().name().map(str::to_string)).unwrap();
        assert_eq!(name.as_deref(), Some("test-worker"));
        assert_eq!(w.run(|| 2 + 2).unwrap(), 4);
    }

    /// Invariant: a panicking job is reported and the worker keeps serving.
    #[test]
    fn panicking_job_does_not_kill_worker() {
        let w = Worker::spawn("panicky").unwrap();
        let r: Result<(), _> = w.run(|| panic!("boom"));
        assert_eq!(r, Err(WorkerError::Panicked("panicky".into())));
        assert_eq!(w.run(|| 1).unwrap(), 1);
    }

    /// Invariant: after `interrupt` no job is accepted and `join` returns.
    #[test]
    fn interrupt_then_join() {
        let w = Worker::spawn("short").unwrap();
        w.interrupt();
        assert!(w.is_interrupted());
        assert_eq!(w.run(|| 1), Err(WorkerError::Interrupted("short".into())));
        w.join();
        w.join();
    }
}
