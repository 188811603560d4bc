//! The render mutex itself.
//!
//! One [`RenderMutex`] exists per bridge session. The underlying
//! primitive is a plain non-reentrant [`parking_lot::RawMutex`];
//! everything reentrant about this type comes from the owner tracking
//! layered on top of it: the lock remembers which thread holds the
//! primitive and whether that hold was taken through the privileged
//! render-thread path, and every entry point consults that state
//! before touching the primitive.
//!
//! Owner state is kept in atomic words holding
//! [`ThreadToken`](crate::identity::ThreadToken)s (zero
//! meaning "none") so that any thread can ask "do I hold this?"
//! without taking another lock. The words are only ever written by
//! the thread that currently holds the primitive.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::lock_api::RawMutex as _;

use crate::checks::contract;
use crate::dispatch::Executor;
use crate::identity;

/// Sleep between acquisition attempts of a timed acquire.
///
/// Process-wide. The timed path is a polling loop rather than an OS
/// timed wait, so this is the latency/CPU trade-off knob.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_nanos(100);

static POLL_INTERVAL_NANOS: AtomicU64 = AtomicU64::new(DEFAULT_POLL_INTERVAL.as_nanos() as u64);

/// Returns the sleep interval used between attempts of a timed
/// acquisition.
pub fn poll_interval() -> Duration {
    Duration::from_nanos(POLL_INTERVAL_NANOS.load(Ordering::Relaxed))
}

/// Sets the sleep interval used between attempts of a timed
/// acquisition.
///
/// Takes effect for the next sleep of any polling loop already in
/// flight; there is no synchronization with readers beyond the
/// atomic store.
pub fn set_poll_interval(interval: Duration) {
    POLL_INTERVAL_NANOS.store(interval.as_nanos() as u64, Ordering::Relaxed);
}

/// How the calling thread held the lock when `run_without_lock`
/// started.
enum HeldMode {
    None,
    Plain,
    Render,
}

/// The lock mediating between the render thread and everything else.
///
/// Callers never lock or unlock this type directly; they hand a
/// closure to one of the six `run_*` entry points, each of which
/// applies the right acquire/release discipline around it. The
/// closure may itself re-enter any entry point: a thread that already
/// holds the lock is recognized and never blocks on itself.
pub struct RenderMutex {
    /// The non-reentrant primitive.
    raw: parking_lot::RawMutex,
    /// Token of the thread holding `raw`, 0 when unheld.
    owner: AtomicU64,
    /// Token of the thread recognized as the render thread, 0 outside
    /// a privileged hold. Non-zero implies equal to `owner`.
    render_thread: AtomicU64,
    /// Set by the outermost call dispatching to the main queue, so
    /// nested calls targeting main skip the reservation bookkeeping.
    main_reserved: AtomicBool,
    /// The designated main queue.
    main_queue: Arc<dyn Executor>,
    /// The designated render queue, consulted only by the contract
    /// checks. `None` disables those checks.
    render_queue: Option<Arc<dyn Executor>>,
}

impl RenderMutex {
    /// Creates the lock for a bridge session.
    ///
    /// `main_queue` is the executor that
    /// [`run_from_render_thread_on_main`](Self::run_from_render_thread_on_main)
    /// dispatches to. `render_queue`, when given, lets debug builds
    /// verify that the privileged entry points really are called from
    /// the render thread.
    pub fn new(main_queue: Arc<dyn Executor>, render_queue: Option<Arc<dyn Executor>>) -> Self {
        RenderMutex {
            raw: parking_lot::RawMutex::INIT,
            owner: AtomicU64::new(0),
            render_thread: AtomicU64::new(0),
            main_reserved: AtomicBool::new(false),
            main_queue,
            render_queue,
        }
    }

    /// True iff the lock is held by the calling thread.
    pub fn is_locked_on_current_thread(&self) -> bool {
        self.owner.load(Ordering::Acquire) == identity::current().to_raw()
    }

    /// True iff the lock is held by its holder through the privileged
    /// render-thread path.
    pub fn is_locked_on_render_thread(&self) -> bool {
        let render = self.render_thread.load(Ordering::Acquire);
        render != 0 && render == self.owner.load(Ordering::Acquire)
    }

    /// Blocking acquire with a reentrancy short-circuit.
    ///
    /// Returns whether this call took the primitive, i.e. whether the
    /// caller owes the matching [`release`](Self::release). A thread
    /// that already holds the lock gets `false` back immediately
    /// instead of deadlocking on itself.
    fn acquire(&self) -> bool {
        if self.is_locked_on_current_thread() {
            return false;
        }
        self.raw.lock();
        self.owner
            .store(identity::current().to_raw(), Ordering::Release);
        true
    }

    /// Bounded acquire: polls the primitive, sleeping
    /// [`poll_interval`] between attempts, until it succeeds or more
    /// than `timeout` has elapsed. Same reentrancy short-circuit and
    /// same return contract as [`acquire`](Self::acquire); on timeout
    /// the owner state is untouched.
    fn acquire_timeout(&self, timeout: Duration) -> bool {
        if self.is_locked_on_current_thread() {
            return false;
        }
        let start = Instant::now();
        loop {
            if self.raw.try_lock() {
                self.owner
                    .store(identity::current().to_raw(), Ordering::Release);
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            std::thread::sleep(poll_interval());
        }
    }

    fn release(&self) {
        contract(
            self.is_locked_on_current_thread(),
            "released by a thread that does not hold the lock",
        );
        self.owner.store(0, Ordering::Release);
        // SAFETY: per the contract above, the calling thread holds
        // the primitive.
        unsafe { self.raw.unlock() };
    }

    /// [`acquire`](Self::acquire), additionally marking the hold as
    /// the privileged render-thread hold on success.
    fn acquire_as_render_thread(&self) -> bool {
        if !self.is_locked_on_current_thread() {
            // Re-entrant chains (native -> script -> native -> script)
            // legitimately arrive here on other threads while the
            // lock is already held, so the queue check applies only
            // when this call is about to take the primitive itself.
            if let Some(render_queue) = &self.render_queue {
                contract(
                    render_queue.is_current(),
                    "privileged acquire from outside the render queue",
                );
            }
        }
        let acquired = self.acquire();
        if acquired {
            self.render_thread
                .store(identity::current().to_raw(), Ordering::Release);
        }
        acquired
    }

    fn release_as_render_thread(&self) {
        contract(
            self.is_locked_on_current_thread() && self.is_locked_on_render_thread(),
            "privileged release without a privileged hold",
        );
        self.render_thread.store(0, Ordering::Release);
        self.release();
    }

    /// Runs `f` under the lock as the render thread.
    ///
    /// Takes the lock through the privileged path, runs `f`, and
    /// releases only if this call did the acquiring, so re-entrant
    /// calls from a thread already holding the lock are safe.
    pub fn run_from_render_thread<R>(&self, f: impl FnOnce() -> R) -> R {
        profiling::scope!("RenderMutex::run_from_render_thread");
        let acquired = self.acquire_as_render_thread();
        let result = f();
        if acquired {
            self.release_as_render_thread();
        }
        result
    }

    /// Lets `queue` run `f` while the render thread steps out of the
    /// protected region.
    ///
    /// Called from the render thread while it holds the lock, this
    /// releases the lock, dispatches `f` synchronously to `queue`,
    /// and re-takes the lock through the privileged path afterwards.
    /// The release is the point: the target queue may have callbacks
    /// pending that themselves need the lock, and they get to run
    /// before `f` does.
    ///
    /// Re-entrant calls are recognized and short-circuited: a thread
    /// that holds the lock through the plain (non-privileged) path
    /// runs `f` inline without any dispatch, unless `f` is bound for
    /// the main queue and no outer call has reserved it yet; in that
    /// case `f` is dispatched to main **while the lock stays held**.
    /// If the main queue's pending work needs this lock, that
    /// deadlocks; this is a known hazard of deep re-entrant chains,
    /// accepted rather than guarded against. A call made while the
    /// lock is not held at all dispatches without touching the lock.
    pub fn run_from_render_thread_on<F>(&self, queue: &dyn Executor, f: F)
    where
        F: FnOnce() + Send,
    {
        profiling::scope!("RenderMutex::run_from_render_thread_on");
        let reserved_main = queue.id() == self.main_queue.id()
            && !self.main_queue.is_current()
            && self
                .main_reserved
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();

        if self.is_locked_on_current_thread() {
            if self.is_locked_on_render_thread() {
                // Yield the lock so the target queue can drain work
                // that may itself need it, then take it back.
                self.release_as_render_thread();
                queue.run_sync(Box::new(f));
                self.acquire_as_render_thread();
            } else if reserved_main {
                // Re-entrant chain holding the plain lock: dispatch
                // while still holding the primitive. See the hazard
                // note above.
                queue.run_sync(Box::new(f));
            } else {
                // Pure re-entry: skip the redundant hop.
                f();
            }
        } else {
            // Not inside a protected region; plain synchronous
            // dispatch, the lock stays untouched.
            queue.run_sync(Box::new(f));
        }

        if reserved_main {
            self.main_reserved.store(false, Ordering::Release);
        }
    }

    /// [`run_from_render_thread_on`](Self::run_from_render_thread_on)
    /// targeting the designated main queue.
    pub fn run_from_render_thread_on_main<F>(&self, f: F)
    where
        F: FnOnce() + Send,
    {
        self.run_from_render_thread_on(&*self.main_queue, f);
    }

    /// Runs `f` under the lock from a non-render thread, typically a
    /// native callback about to call into script code.
    pub fn run_from_non_render_thread<R>(&self, f: impl FnOnce() -> R) -> R {
        profiling::scope!("RenderMutex::run_from_non_render_thread");
        let acquired = self.acquire();
        let result = f();
        if acquired {
            self.release();
        }
        result
    }

    /// Like
    /// [`run_from_non_render_thread`](Self::run_from_non_render_thread),
    /// but gives up after `timeout`.
    ///
    /// If the lock cannot be taken in time, `f` is never started; the
    /// omission is reported as a warning through [`log`], not as an
    /// error value.
    pub fn run_from_non_render_thread_timeout(&self, f: impl FnOnce(), timeout: Duration) {
        profiling::scope!("RenderMutex::run_from_non_render_thread_timeout");
        let acquired = self.acquire_timeout(timeout);
        if !self.is_locked_on_current_thread() {
            log::warn!("render mutex not acquired within {timeout:?}, skipping callback");
            return;
        }
        f();
        if acquired {
            self.release();
        }
    }

    /// Fully releases the lock around `f`, then restores the exact
    /// prior hold.
    ///
    /// For work that must block awaiting a signal from another thread
    /// (a semaphore wait for a native-to-script callback, say), which
    /// would deadlock if this thread kept the lock while waiting. If
    /// the calling thread holds the lock, through either path, it
    /// is released for the duration of `f` and re-acquired in the
    /// same mode before returning.
    ///
    /// Use with care: if `f` hands work to another thread that in
    /// turn needs the *current* thread, the lock cannot help and a
    /// deadlock will still occur.
    pub fn run_without_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        profiling::scope!("RenderMutex::run_without_lock");
        let mode = if !self.is_locked_on_current_thread() {
            HeldMode::None
        } else if self.is_locked_on_render_thread() {
            HeldMode::Render
        } else {
            HeldMode::Plain
        };

        match mode {
            HeldMode::Render => self.release_as_render_thread(),
            HeldMode::Plain => self.release(),
            HeldMode::None => {}
        }

        let result = f();

        match mode {
            HeldMode::Render => {
                self.acquire_as_render_thread();
            }
            HeldMode::Plain => {
                self.acquire();
            }
            HeldMode::None => {}
        }
        result
    }
}

impl std::fmt::Debug for RenderMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderMutex")
            .field("owner", &self.owner.load(Ordering::Relaxed))
            .field("render_thread", &self.render_thread.load(Ordering::Relaxed))
            .field("main_reserved", &self.main_reserved.load(Ordering::Relaxed))
            .finish()
    }
}
