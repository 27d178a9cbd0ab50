use crate::Yield;
use core::{
    cell::UnsafeCell,
    fmt,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

/// Exclusive access lock whose waiters yield the core instead of spinning.
///
/// A holder may keep a `SleepLock` across slow operations such as disk I/O.
/// Contenders call `Y::yield_now()` between attempts, so no busy loop burns
/// the core while the holder works. A waiter never holds a
/// [`SpinLock`](crate::SpinLock) while it waits.
///
/// There is no ordering between different sleep locks; callers that take
/// several must agree on an order among themselves.
///
/// Every acquisition draws a fresh ticket from the lock and records it as the
/// current holder, so a guard can tell whether the lock is still its own
/// (see [`SleepLockGuard::holding`]).
///
/// # Examples
///
/// ```
/// use kernel_sync::{SleepLock, SpinYield};
///
/// let l: SleepLock<[u8; 4], SpinYield> = SleepLock::new("demo", [0; 4]);
/// {
///     let mut g = l.lock();
///     g[0] = 7;
///     assert!(l.is_locked());
/// }
/// assert!(!l.is_locked());
/// assert_eq!(l.lock()[0], 7);
/// ```
pub struct SleepLock<T, Y: Yield> {
    name: &'static str,
    locked: AtomicBool,
    /// Ticket of the current holder; zero while unlocked.
    holder: AtomicU64,
    /// Last ticket handed out.
    tickets: AtomicU64,
    data: UnsafeCell<T>,
    _yield: PhantomData<fn() -> Y>,
}

// Safety: the locked flag grants exclusive access to `data`.
unsafe impl<T: Send, Y: Yield> Sync for SleepLock<T, Y> {}
unsafe impl<T: Send, Y: Yield> Send for SleepLock<T, Y> {}

impl<T, Y: Yield> SleepLock<T, Y> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            name,
            locked: AtomicBool::new(false),
            holder: AtomicU64::new(0),
            tickets: AtomicU64::new(0),
            data: UnsafeCell::new(data),
            _yield: PhantomData,
        }
    }

    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Whether some holder currently owns the lock.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Try once; returns immediately. A failed attempt leaves the lock and
    /// its holder untouched.
    #[inline]
    pub fn try_lock(&self) -> Option<SleepLockGuard<'_, T, Y>> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }
        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed) + 1;
        self.holder.store(ticket, Ordering::Relaxed);
        Some(SleepLockGuard { lock: self, ticket })
    }

    /// Acquire the lock, yielding the core for as long as someone else holds it.
    pub fn lock(&self) -> SleepLockGuard<'_, T, Y> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            Y::yield_now();
        }
    }

    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T, Y: Yield> fmt::Debug for SleepLock<T, Y> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SleepLock")
            .field("name", &self.name)
            .field("locked", &self.is_locked())
            .field("holder", &self.holder.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Proof of holding a [`SleepLock`]; releases it on drop.
pub struct SleepLockGuard<'a, T, Y: Yield> {
    lock: &'a SleepLock<T, Y>,
    ticket: u64,
}

impl<T, Y: Yield> SleepLockGuard<'_, T, Y> {
    /// Whether the lock is held, and held through this guard.
    ///
    /// A live guard only reports `false` if the lock was released or taken
    /// behind its back, e.g. by a forged unlock.
    #[inline]
    #[must_use]
    pub fn holding(&self) -> bool {
        self.lock.is_locked() && self.lock.holder.load(Ordering::Relaxed) == self.ticket
    }
}

impl<T, Y: Yield> Deref for SleepLockGuard<'_, T, Y> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T, Y: Yield> DerefMut for SleepLockGuard<'_, T, Y> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T, Y: Yield> Drop for SleepLockGuard<'_, T, Y> {
    fn drop(&mut self) {
        // A guard that lost its lock must not release someone else's.
        if self.holding() {
            self.lock.holder.store(0, Ordering::Relaxed);
            self.lock.locked.store(false, Ordering::Release);
        }
    }
}
