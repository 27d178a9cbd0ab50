//! # Kernel synchronization primitives
//!
//! Two lock classes, and nothing else:
//!
//! * [`SpinLock`]: short critical sections over counters and list links.
//!   Waiters busy-wait. Never hold one across I/O or across a
//!   [`SleepLock`] wait. When two are held at once they must be taken in
//!   the order the owning subsystem documents.
//! * [`SleepLock`]: per-object exclusive access that may be held across
//!   storage I/O. Waiters give the core away through a [`Yield`]
//!   implementation supplied by the scheduler instead of spinning.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod sched;
mod sleep_lock;
mod spin_lock;

pub use sched::{SpinYield, Yield};
pub use sleep_lock::{SleepLock, SleepLockGuard};
pub use spin_lock::{SpinLock, SpinLockGuard};
