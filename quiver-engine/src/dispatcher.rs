//! Worker pool and the single delivery thread.
//!
//! Fetch and decode run on a fixed pool of named worker threads fed by a
//! FIFO `crossbeam-channel` queue. Completion callbacks are posted to one
//! dedicated delivery thread over a `flume` channel, so every target mutation
//! and listener callback is serialized regardless of which worker produced
//! the result.
//!
//! Both queues shut down by dropping their sender: threads drain what is
//! already queued, then exit.

use parking_lot::{Condvar, Mutex};
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, error, trace};

/// A unit of work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Count of queued plus running jobs.
#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn increment(&self) {
        *self.count.lock() += 1;
    }

    fn decrement(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn get(&self) -> usize {
        *self.count.lock()
    }

    fn wait_zero(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.idle.wait(&mut count);
        }
    }
}

/// Fixed-size FIFO thread pool.
pub struct WorkerPool {
    sender: Mutex<Option<crossbeam_channel::Sender<Job>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    thread_ids: Vec<ThreadId>,
    pending: Arc<Pending>,
    executed: Arc<AtomicU64>,
}

impl WorkerPool {
    /// Spawn `size` workers named `<name>-<n>`.
    pub fn new(size: usize, name: &str) -> io::Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let pending = Arc::new(Pending::default());
        let executed = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::with_capacity(size);
        for n in 0..size.max(1) {
            let receiver = receiver.clone();
            let pending = Arc::clone(&pending);
            let executed = Arc::clone(&executed);
            let handle = thread::Builder::new()
                .name(format!("{name}-{n}"))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        if catch_unwind(AssertUnwindSafe(job)).is_err() {
                            error!("worker job panicked");
                        }
                        executed.fetch_add(1, Ordering::Relaxed);
                        pending.decrement();
                    }
                    trace!("worker exiting");
                })?;
            handles.push(handle);
        }
        let thread_ids = handles.iter().map(|h| h.thread().id()).collect();
        debug!(workers = handles.len(), name, "worker pool started");

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            handles: Mutex::new(handles),
            thread_ids,
            pending,
            executed,
        })
    }

    /// Queue a job. Returns it back if the pool has been shut down.
    pub fn execute(&self, job: Job) -> Result<(), Job> {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(job);
        };
        self.pending.increment();
        sender.send(job).map_err(|e| {
            self.pending.decrement();
            e.into_inner()
        })
    }

    /// Block until no job is queued or running.
    ///
    /// Returns immediately when called from a worker, whose own job would
    /// otherwise never let the count reach zero.
    pub fn wait_idle(&self) {
        if self.is_worker_thread() {
            return;
        }
        self.pending.wait_zero();
    }

    /// Queued plus running jobs.
    pub fn pending(&self) -> usize {
        self.pending.get()
    }

    /// Jobs finished since the pool started.
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    pub fn size(&self) -> usize {
        self.thread_ids.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender.lock().is_none()
    }

    pub fn is_worker_thread(&self) -> bool {
        self.thread_ids.contains(&thread::current().id())
    }

    /// Stop accepting jobs, let queued jobs finish and join the workers.
    ///
    /// Idempotent. From a worker thread the workers are left to exit on
    /// their own.
    pub fn shutdown(&self) {
        drop(self.sender.lock().take());
        if self.is_worker_thread() {
            return;
        }
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Single thread that runs completion callbacks in posting order.
pub struct DeliveryQueue {
    sender: Mutex<Option<flume::Sender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl DeliveryQueue {
    pub fn new(name: &str) -> io::Result<Self> {
        let (sender, receiver) = flume::unbounded::<Job>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("delivery callback panicked");
                    }
                }
                trace!("delivery thread exiting");
            })?;
        let thread_id = handle.thread().id();
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
            thread_id,
        })
    }

    /// Queue a callback. Returns false once the queue has shut down.
    pub fn post(&self, job: Job) -> bool {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(job).is_ok(),
            None => false,
        }
    }

    /// Block until every callback posted before this call has run.
    pub fn flush(&self) {
        if self.is_delivery_thread() {
            return;
        }
        let (tx, rx) = flume::bounded::<()>(1);
        if self.post(Box::new(move || {
            let _ = tx.send(());
        })) {
            // Err means the queue shut down and dropped the marker.
            let _ = rx.recv();
        }
    }

    pub fn is_delivery_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Run what is queued, then stop the thread. Idempotent.
    pub fn shutdown(&self) {
        drop(self.sender.lock().take());
        if self.is_delivery_thread() {
            return;
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                error!("delivery thread panicked");
            }
        }
    }
}

impl Drop for DeliveryQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
