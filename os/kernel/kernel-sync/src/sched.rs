use core::hint::spin_loop;

/// Hook through which a blocked [`SleepLock`](crate::SleepLock) waiter gives
/// up the core.
///
/// The scheduler implements this by switching to another runnable task; the
/// waiter is resumed at some later point and retries the lock.
pub trait Yield {
    /// Let other work run on this core before returning.
    fn yield_now();
}

/// Fallback [`Yield`] for code that runs before the scheduler exists.
///
/// Only issues a spin-loop hint. Once tasks can be switched, use the
/// scheduler's implementation instead.
#[derive(Debug, Default, Copy, Clone)]
pub struct SpinYield;

impl Yield for SpinYield {
    #[inline]
    fn yield_now() {
        spin_loop();
    }
}
