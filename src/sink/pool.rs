//! Bounded sink worker pool, used for single-mode sink writes and for the
//! bootstrap snapshot's per-table fan-out: `std::thread` workers pulling
//! off a shared `mpsc` queue, polled with `recv_timeout` in the same
//! blocking-with-timeout style the socket reads use.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, warn};

use crate::cancel::CancellationToken;

const RECV_POLL_TIMEOUT: Duration = Duration::from_millis(200);

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed-size pool of worker threads draining a shared job queue.
///
/// Unlike a typical thread pool, `submit` does not return a handle: callers
/// that need results run their batch through [`Pool::scope`] instead, since
/// the bootstrap fan-out and sink dispatch paths only ever need "did every
/// job finish", not a per-job handle.
pub struct Pool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl Pool {
    /// Spawns `size` worker threads. Each worker polls the shared queue with
    /// a timeout so it notices cancellation promptly instead of blocking
    /// forever on an empty queue past shutdown.
    pub fn new(size: usize, cancel: CancellationToken) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..size.max(1))
            .map(|id| {
                let receiver = Arc::clone(&receiver);
                let cancel = cancel.clone();
                thread::Builder::new()
                    .name(format!("sink-worker-{id}"))
                    .spawn(move || worker_loop(receiver, cancel))
                    .expect("failed to spawn sink worker thread")
            })
            .collect();

        Self { sender: Some(sender), workers }
    }

    /// Queues a job for a worker to run. Panics inside the job are caught at
    /// the worker boundary and logged rather than propagated, so one bad
    /// batch can't silently kill the pool out from under the rest.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let alive = self.sender.as_ref().map(|s| s.send(Box::new(job)).is_ok()).unwrap_or(false);
        if !alive {
            warn!("sink worker pool is shut down, dropping submitted job");
        }
    }

    /// Runs a batch of independent jobs across the pool and blocks until all
    /// of them complete, collecting each job's result. This is the shape the
    /// bootstrap snapshot's per-table fan-out needs: dump every table, then
    /// only proceed once the whole snapshot has landed.
    pub fn scope<T, F>(&self, jobs: Vec<F>) -> Vec<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (result_tx, result_rx) = mpsc::channel();
        let total = jobs.len();
        for (index, job) in jobs.into_iter().enumerate() {
            let result_tx = result_tx.clone();
            self.submit(move || {
                let value = job();
                let _ = result_tx.send((index, value));
            });
        }
        drop(result_tx);

        let mut results: Vec<Option<T>> = (0..total).map(|_| None).collect();
        for _ in 0..total {
            match result_rx.recv() {
                Ok((index, value)) => results[index] = Some(value),
                Err(_) => break,
            }
        }
        results.into_iter().flatten().collect()
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        // Dropping the sender disconnects the queue, which is what lets the
        // workers drain outstanding jobs and exit; joining first would
        // deadlock on an uncancelled token.
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("sink worker thread panicked during shutdown");
            }
        }
    }
}

fn worker_loop(receiver: Arc<Mutex<Receiver<Job>>>, cancel: CancellationToken) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let job = {
            let guard = receiver.lock().unwrap();
            guard.recv_timeout(RECV_POLL_TIMEOUT)
        };
        match job {
            Ok(job) => job(),
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            // The pool dropped its sender: normal shutdown.
            Err(mpsc::RecvTimeoutError::Disconnected) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn scope_runs_all_jobs_and_collects_results() {
        let pool = Pool::new(4, CancellationToken::new());
        let jobs: Vec<_> = (0..10).map(|i| move || i * 2).collect();
        let mut results = pool.scope(jobs);
        results.sort_unstable();
        assert_eq!(results, (0..10).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn submit_executes_job_asynchronously() {
        let pool = Pool::new(2, CancellationToken::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let done = Arc::new((Mutex::new(false), std::sync::Condvar::new()));

        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            let done = Arc::clone(&done);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                if counter.load(Ordering::SeqCst) == 5 {
                    let (lock, cvar) = &*done;
                    *lock.lock().unwrap() = true;
                    cvar.notify_all();
                }
            });
        }

        let (lock, cvar) = &*done;
        let guard = lock.lock().unwrap();
        let _ = cvar.wait_timeout_while(guard, Duration::from_secs(5), |finished| !*finished).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }
}
