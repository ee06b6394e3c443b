//! A small bounded worker pool for pack compression, with cooperative
//! cancellation and a completion-order task waiter.
//!
//! Not rayon: the pool must let a task that blocks on other tasks release
//! its working slot for the duration of the wait (marking itself "waiting"
//! rather than "working"), so one compressing-packer task waiting on its own
//! block subtasks doesn't starve the pool of the capacity those subtasks
//! need to make progress.

use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, trace};

/// Cooperative cancellation flag, checked at granular points inside a
/// submitted task. Cloning shares the same underlying flag.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns `Err(CompressionCancelled)` if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::CompressionCancelled)
        } else {
            Ok(())
        }
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    working: usize,
    queue: VecDeque<Job>,
    shutdown: bool,
}

struct Inner {
    capacity: usize,
    state: Mutex<PoolState>,
    cvar: Condvar,
}

/// A bounded pool of worker threads. At most `capacity` tasks run
/// concurrently; a task can temporarily give up its slot via
/// [`ThreadPool::release_while`] while it blocks on other work.
pub struct ThreadPool {
    inner: Arc<Inner>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// `capacity` of zero defaults to [`std::thread::available_parallelism`].
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            capacity
        };

        let inner = Arc::new(Inner {
            capacity,
            state: Mutex::new(PoolState { working: 0, queue: VecDeque::new(), shutdown: false }),
            cvar: Condvar::new(),
        });

        let workers = (0..capacity)
            .map(|id| {
                let inner = inner.clone();
                std::thread::Builder::new()
                    .name(format!("sqpack-pool-{id}"))
                    .spawn(move || worker_loop(inner))
                    .expect("failed to spawn pool worker thread")
            })
            .collect();

        debug!(capacity, "thread pool started");
        Self { inner, workers }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Submit a task, returning a handle whose `join()` blocks for its
    /// result.
    pub fn spawn<T, F>(&self, f: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        self.enqueue(Box::new(move || {
            let result = f();
            let _ = tx.send(result);
        }));
        TaskHandle { receiver: rx }
    }

    fn enqueue(&self, job: Job) {
        let mut state = self.inner.state.lock().unwrap();
        state.queue.push_back(job);
        self.inner.cvar.notify_all();
    }

    /// Mark the calling worker as "waiting" rather than "working" for the
    /// duration of `f`, freeing its slot for queued tasks to start, then
    /// re-acquire a slot before returning.
    ///
    /// Must only be called from within a task already running on this
    /// pool — it assumes the caller currently holds one of the pool's
    /// working slots and gives it back at the end.
    pub fn release_while<R>(&self, f: impl FnOnce() -> R) -> R {
        {
            let mut state = self.inner.state.lock().unwrap();
            state.working -= 1;
            self.inner.cvar.notify_all();
        }
        let result = f();
        {
            let mut state = self.inner.state.lock().unwrap();
            while state.working >= self.inner.capacity {
                state = self.inner.cvar.wait(state).unwrap();
            }
            state.working += 1;
        }
        result
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state.lock().unwrap();
            state.shutdown = true;
            self.inner.cvar.notify_all();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(inner: Arc<Inner>) {
    loop {
        let job = {
            let mut state = inner.state.lock().unwrap();
            loop {
                if state.shutdown && state.queue.is_empty() {
                    return;
                }
                if !state.queue.is_empty() && state.working < inner.capacity {
                    state.working += 1;
                    break state.queue.pop_front().unwrap();
                }
                state = inner.cvar.wait(state).unwrap();
            }
        };

        job();

        let mut state = inner.state.lock().unwrap();
        state.working -= 1;
        inner.cvar.notify_all();
        trace!("worker task complete");
    }
}

/// A single submitted task's eventual result.
pub struct TaskHandle<T> {
    receiver: mpsc::Receiver<Result<T>>,
}

impl<T> TaskHandle<T> {
    /// Block until the task completes, returning its result.
    pub fn join(self) -> Result<T> {
        self.receiver
            .recv()
            .unwrap_or_else(|_| Err(Error::bad_data("pool worker dropped without a result")))
    }
}

/// Collects a batch of submitted tasks' results in completion order,
/// regardless of submission order.
pub struct TaskWaiter<T> {
    sender: mpsc::Sender<(usize, Result<T>)>,
    receiver: mpsc::Receiver<(usize, Result<T>)>,
    remaining: usize,
}

impl<T: Send + 'static> TaskWaiter<T> {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self { sender, receiver, remaining: 0 }
    }

    /// Submit `f` to `pool`, tagging its result with `index` so callers can
    /// reassemble out-of-order completions.
    pub fn submit<F>(&mut self, pool: &ThreadPool, index: usize, f: F)
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let sender = self.sender.clone();
        self.remaining += 1;
        pool.enqueue(Box::new(move || {
            let result = f();
            let _ = sender.send((index, result));
        }));
    }

    /// Block until the next task completes, in completion order. Returns
    /// `None` once every submitted task has been collected.
    pub fn wait_one(&mut self) -> Option<(usize, Result<T>)> {
        if self.remaining == 0 {
            return None;
        }
        let item = self.receiver.recv().ok()?;
        self.remaining -= 1;
        Some(item)
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

impl<T: Send + 'static> Default for TaskWaiter<T> {
    fn default() -> Self {
        Self::new()
    }
}
