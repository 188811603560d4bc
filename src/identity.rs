//! Opaque, comparable thread identities.
//!
//! The lock never inspects OS thread ids directly; reentrancy
//! detection compares [`ThreadToken`]s, which are process-unique
//! non-zero integers handed out lazily, one per thread. The non-zero
//! representation lets the lock pack "owner or none" into a single
//! atomic word.

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// The identity of a thread, unique within the process.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ThreadToken(NonZeroU64);

impl ThreadToken {
    /// The raw word stored in the lock's atomic owner cells.
    pub(crate) fn to_raw(self) -> u64 {
        self.0.get()
    }
}

/// Tokens start at 1 so that 0 can mean "no thread".
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: ThreadToken = {
        let raw = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        ThreadToken(NonZeroU64::new(raw).unwrap())
    };
}

/// Returns the calling thread's token, allocating it on first use.
pub fn current() -> ThreadToken {
    CURRENT.with(|token| *token)
}

#[test]
fn tokens_are_stable_and_distinct() {
    let here = current();
    assert_eq!(here, current());

    let there = std::thread::spawn(current).join().unwrap();
    assert_ne!(here, there);
}
