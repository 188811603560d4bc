/*! A thread-affine reentrant lock for native-to-script bridges.
 *
 *  This crate implements the mutual exclusion used between a render
 *  thread and every other thread of an application that forwards
 *  native callbacks into an interpreted scripting runtime. Plain
 *  mutexes deadlock here for two reasons: native callbacks can
 *  re-enter the runtime on a thread that already holds the lock
 *  (native -> script -> native -> script), and the render thread
 *  sometimes has to synchronize with the main thread while logically
 *  still inside a protected region.
 *
 *  [`RenderMutex`] encodes exactly those call patterns:
 *
 *  - Non-render threads take the lock from native callbacks before
 *    running script callback code.
 *  - While the render thread is executing, it holds the lock to keep
 *    native callbacks from synchronizing with it.
 *  - When the render thread must synchronize with the main thread
 *    (e.g. reading back an image), it first releases the lock. This
 *    lets the main thread drain a pending callback (possibly running
 *    script code on the main thread itself) before servicing the
 *    render thread's request.
 *
 *  The lock is not a general-purpose reentrant mutex. It recognizes
 *  one privileged thread (the render thread), one auxiliary executor
 *  (the main queue, see [`Executor`]), and the documented re-entry
 *  patterns of the bridge, and nothing else. In particular,
 *  [`RenderMutex::run_from_render_thread_on`] can dispatch to the
 *  main queue *while still holding the lock* when called from a
 *  re-entrant chain; that is an accepted hazard of the bridge's call
 *  patterns, not a guarantee the lock makes. See the method docs.
 */

#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unsafe_op_in_unsafe_fn,
    unused_extern_crates,
    unused_qualifications
)]

mod checks;
pub mod dispatch;
pub mod identity;
mod mutex;

pub use dispatch::{Executor, ExecutorId, Task, ThreadExecutor};
pub use identity::ThreadToken;
pub use mutex::{poll_interval, set_poll_interval, RenderMutex};
