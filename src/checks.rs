//! Contract checks for the lock's caller preconditions.
//!
//! The lock's preconditions (release only by the holder, privileged
//! entry only from the render queue) are contracts between the two
//! legitimate callers, not runtime errors, so violations are handled
//! by a build-time policy rather than by error values:
//!
//! - Debug builds panic at the violation site.
//! - Release builds with the `contract-log` feature report the
//!   violation through [`log`] and continue.
//! - Plain release builds trust the caller and check nothing.
//!
//! Exactly one policy module is selected here; lock logic calls
//! [`contract`] unconditionally.

#[cfg(debug_assertions)]
mod panicking {
    #[track_caller]
    pub fn contract(ok: bool, what: &str) {
        assert!(ok, "render mutex contract violated: {what}");
    }
}

#[cfg(all(not(debug_assertions), feature = "contract-log"))]
mod logging {
    pub fn contract(ok: bool, what: &str) {
        if !ok {
            log::error!("render mutex contract violated: {what}");
        }
    }
}

#[cfg(all(not(debug_assertions), not(feature = "contract-log")))]
mod silent {
    pub fn contract(_ok: bool, _what: &str) {}
}

#[cfg(debug_assertions)]
use panicking as chosen;

#[cfg(all(not(debug_assertions), feature = "contract-log"))]
use logging as chosen;

#[cfg(all(not(debug_assertions), not(feature = "contract-log")))]
use silent as chosen;

pub(crate) use chosen::contract;
