//! Synchronous dispatch to named executors.
//!
//! The lock does not schedule work itself; it consumes a narrow
//! dispatch capability supplied by the embedding application. An
//! [`Executor`] is a serial execution context (on Apple platforms a
//! dispatch queue, elsewhere typically an event-loop thread) that can
//! run a task and block the submitter until it has finished.
//!
//! [`ThreadExecutor`] is the crate's own worker-thread-backed
//! implementation, used to stand in for the platform main queue and
//! throughout the tests.

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread;

use crate::identity::{self, ThreadToken};

/// The identity of an executor, unique within the process.
///
/// Used to recognize the designated main queue: the lock compares the
/// id of the dispatch target against the id of the main queue it was
/// constructed with.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ExecutorId(NonZeroU64);

/// Ids start at 1 for the same reason thread tokens do.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl ExecutorId {
    /// Allocates a fresh, process-unique id.
    pub fn new() -> ExecutorId {
        let raw = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        ExecutorId(NonZeroU64::new(raw).unwrap())
    }
}

/// A unit of work submitted to an executor.
///
/// The lifetime is the borrow of the submitting stack frame:
/// [`Executor::run_sync`] blocks until the task has run, so tasks may
/// capture references to the caller's locals.
pub type Task<'a> = Box<dyn FnOnce() + Send + 'a>;

/// A serial execution context with synchronous submit-and-wait.
pub trait Executor: Send + Sync {
    /// This executor's identity.
    fn id(&self) -> ExecutorId;

    /// True iff the calling thread is the thread this executor runs
    /// tasks on.
    fn is_current(&self) -> bool;

    /// Runs `task` on this executor and blocks until it completes.
    ///
    /// Implementations must run the task inline when called from the
    /// executor's own thread; blocking on oneself is a deadlock.
    fn run_sync(&self, task: Task<'_>);
}

enum Message {
    Run(Task<'static>, mpsc::Sender<()>),
    Stop,
}

/// An [`Executor`] backed by a single worker thread.
///
/// Tasks are forwarded over a channel and the submitter blocks on a
/// completion signal, which gives `run_sync` the required
/// submit-and-wait semantics.
pub struct ThreadExecutor {
    id: ExecutorId,
    worker: ThreadToken,
    sender: mpsc::Sender<Message>,
    join: Option<thread::JoinHandle<()>>,
}

impl ThreadExecutor {
    /// Spawns the worker thread. `name` becomes the thread name.
    pub fn new(name: &str) -> ThreadExecutor {
        let (sender, receiver) = mpsc::channel::<Message>();
        let (token_tx, token_rx) = mpsc::channel::<ThreadToken>();
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _ = token_tx.send(identity::current());
                while let Ok(message) = receiver.recv() {
                    match message {
                        Message::Run(task, done) => {
                            task();
                            let _ = done.send(());
                        }
                        Message::Stop => break,
                    }
                }
            })
            .expect("failed to spawn executor thread");
        let worker = token_rx
            .recv()
            .expect("executor thread exited before reporting its identity");
        ThreadExecutor {
            id: ExecutorId::new(),
            worker,
            sender,
            join: Some(join),
        }
    }
}

impl Executor for ThreadExecutor {
    fn id(&self) -> ExecutorId {
        self.id
    }

    fn is_current(&self) -> bool {
        identity::current() == self.worker
    }

    fn run_sync(&self, task: Task<'_>) {
        if self.is_current() {
            // Already on the worker; waiting on ourselves would hang.
            task();
            return;
        }

        // SAFETY: we block on `done_rx` until the worker has finished
        // running the task, so nothing the task borrows can be
        // outlived. The erased lifetime never escapes this call.
        let task: Task<'static> = unsafe { std::mem::transmute(task) };

        let (done_tx, done_rx) = mpsc::channel();
        self.sender
            .send(Message::Run(task, done_tx))
            .expect("executor thread is gone");
        done_rx.recv().expect("executor thread died running a task");
    }
}

impl Drop for ThreadExecutor {
    fn drop(&mut self) {
        let _ = self.sender.send(Message::Stop);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl std::fmt::Debug for ThreadExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadExecutor")
            .field("id", &self.id)
            .field("worker", &self.worker)
            .finish()
    }
}
