//! Background maintenance thread.
//!
//! One named thread consumes [`Job`]s from a channel and, when an interval is
//! configured, sweeps expired files on its own schedule. Shutdown closes the
//! channel, lets queued jobs drain, and waits a bounded time for the thread.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::engine::SessionEngine;

/// How long shutdown waits for queued jobs before detaching the thread.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Maintenance work the thread can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    /// Remove expired session files.
    DeleteExpired,
    /// Checkpoint every resident session to disk.
    CacheSaveAll,
}

/// How a shutdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The thread finished all queued work and exited.
    Drained,
    /// The thread was still busy when the timeout elapsed and was detached.
    TimedOut,
}

/// Handle to the running maintenance thread.
pub struct JobWorker {
    tx: Option<Sender<Job>>,
    done: mpsc::Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl JobWorker {
    /// Start the worker thread.
    ///
    /// With `sweep_interval` set, [`Job::DeleteExpired`] also runs whenever
    /// that much time passes since the previous scheduled sweep.
    pub fn spawn(
        engine: Arc<SessionEngine>,
        sweep_interval: Option<Duration>,
    ) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let (done_tx, done) = mpsc::channel();

        let handle = std::thread::Builder::new()
            .name("keeper-jobs".into())
            .spawn(move || {
                let mut next_sweep = sweep_interval.map(|every| Instant::now() + every);
                loop {
                    let job = match (sweep_interval, next_sweep) {
                        (Some(every), Some(due)) => {
                            match rx.recv_timeout(due.saturating_duration_since(Instant::now())) {
                                Ok(job) => job,
                                Err(RecvTimeoutError::Timeout) => {
                                    next_sweep = Some(Instant::now() + every);
                                    Job::DeleteExpired
                                }
                                Err(RecvTimeoutError::Disconnected) => break,
                            }
                        }
                        _ => match rx.recv() {
                            Ok(job) => job,
                            Err(_) => break,
                        },
                    };
                    run(&engine, job);
                }
                info!("Session job thread exiting");
                let _ = done_tx.send(());
            })?;

        info!(?sweep_interval, "Started session job thread");
        Ok(Self {
            tx: Some(tx),
            done,
            handle: Some(handle),
        })
    }

    /// Queue a job. Returns false once the worker has shut down.
    pub fn submit(&self, job: Job) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.send(job).is_ok())
    }

    /// Check if the worker thread is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Close the queue and wait up to `timeout` for queued jobs to finish.
    pub fn shutdown(&mut self, timeout: Duration) -> ShutdownOutcome {
        drop(self.tx.take());
        let Some(handle) = self.handle.take() else {
            return ShutdownOutcome::Drained;
        };

        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    warn!("Session job thread panicked");
                }
                ShutdownOutcome::Drained
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(?timeout, "Session job thread did not stop in time, detaching");
                ShutdownOutcome::TimedOut
            }
        }
    }
}

impl Drop for JobWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown(DEFAULT_SHUTDOWN_TIMEOUT);
        }
    }
}

fn run(engine: &SessionEngine, job: Job) {
    debug!(?job, "Running session job");
    match job {
        Job::DeleteExpired => {
            engine.delete_expired();
        }
        Job::CacheSaveAll => {
            engine.cache_save_all();
        }
    }
}
