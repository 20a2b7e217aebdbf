//! # Worker Pool
//!
//! Fixed set of OS threads draining one FIFO queue. Each device connection is
//! one job and holds its worker until the peer goes away, so the pool size
//! bounds how many devices are served at once.

use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use log::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Queue {
    jobs: VecDeque<Job>,
    stopping: bool,
}

#[derive(Default)]
struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
}

impl Shared {
    fn next_job(&self) -> Option<Job> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(job) = queue.jobs.pop_front() {
                return Some(job);
            }
            if queue.stopping {
                return None;
            }
            queue = self
                .available
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one).
    pub fn new(size: usize) -> io::Result<Self> {
        let shared = Arc::new(Shared::default());
        let mut workers = Vec::with_capacity(size.max(1));

        for id in 0..size.max(1) {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("worker-{id}"))
                .spawn(move || worker_loop(id, &shared))?;
            workers.push(handle);
        }

        Ok(Self { shared, workers })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue a job and wake one idle worker. Jobs submitted after shutdown
    /// has begun are dropped; returns whether the job was accepted.
    pub fn enqueue<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut queue = self.shared.queue.lock().unwrap_or_else(PoisonError::into_inner);
            if queue.stopping {
                debug!("Worker pool stopping - dropping submitted job");
                return false;
            }
            queue.jobs.push_back(Box::new(job));
        }
        self.shared.available.notify_one();
        true
    }

    /// Stop accepting jobs, let workers drain the queue, and join them.
    pub fn shutdown(&mut self) {
        {
            let mut queue = self.shared.queue.lock().unwrap_or_else(PoisonError::into_inner);
            queue.stopping = true;
        }
        self.shared.available.notify_all();

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("Worker thread exited abnormally");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(id: usize, shared: &Shared) {
    while let Some(job) = shared.next_job() {
        // A panicking connection must not take the worker with it.
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!("Job on worker {} panicked", id);
        }
    }
    debug!("Worker {} exiting", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_runs_every_job() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut pool = WorkerPool::new(4).unwrap();
        assert_eq!(pool.size(), 4);

        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            assert!(pool.enqueue(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_zero_size_still_spawns_a_worker() {
        let pool = WorkerPool::new(0).unwrap();
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn test_single_worker_is_fifo() {
        let (tx, rx) = mpsc::channel();
        let mut pool = WorkerPool::new(1).unwrap();
        for i in 0..10 {
            let tx = tx.clone();
            pool.enqueue(move || tx.send(i).unwrap());
        }
        pool.shutdown();
        let order: Vec<i32> = rx.try_iter().collect();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_enqueue_after_shutdown_is_dropped() {
        let mut pool = WorkerPool::new(2).unwrap();
        pool.shutdown();

        let ran = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&ran);
        assert!(!pool.enqueue(move || {
            flag.fetch_add(1, Ordering::SeqCst);
        }));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let (tx, rx) = mpsc::channel();
        let mut pool = WorkerPool::new(1).unwrap();
        pool.enqueue(|| panic!("boom"));
        pool.enqueue(move || tx.send("still alive").unwrap());

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            "still alive"
        );
        pool.shutdown();
    }

    #[test]
    fn test_drop_joins_in_flight_work() {
        let done = Arc::new(AtomicUsize::new(0));
        {
            let pool = WorkerPool::new(2).unwrap();
            for _ in 0..4 {
                let done = Arc::clone(&done);
                pool.enqueue(move || {
                    std::thread::sleep(Duration::from_millis(10));
                    done.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(done.load(Ordering::SeqCst), 4);
    }
}
