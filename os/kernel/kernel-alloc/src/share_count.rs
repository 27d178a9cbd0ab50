//! # Copy-on-write share counts
//!
//! One counter per managed frame recording how many mappings reference it.
//! The table sits behind a single lock of its own, independent of the
//! per-core free-list locks, so a frame's count is consistent no matter which
//! core's list the frame currently lives on (or whether it is on one at all).
//!
//! Under- and overflow are kernel bugs and panic.

/// Share counts for `N` frames, indexed by frame number relative to the
/// start of the managed range.
pub struct ShareTable<const N: usize> {
    counts: [u32; N],
}

impl<const N: usize> Default for ShareTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ShareTable<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self { counts: [0; N] }
    }

    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, index: usize) -> u32 {
        self.counts[index]
    }

    /// Reset the count of a freshly allocated frame to one.
    ///
    /// # Panics
    /// If the frame still has sharers; a frame on a free list must be at zero.
    #[inline]
    pub fn claim(&mut self, index: usize) {
        assert_eq!(
            self.counts[index], 0,
            "share count of free frame #{index} is nonzero"
        );
        self.counts[index] = 1;
    }

    /// Add a sharer and return the new count.
    ///
    /// # Panics
    /// If the frame is free (count zero) or the count would overflow.
    #[inline]
    pub fn increment(&mut self, index: usize) -> u32 {
        let c = &mut self.counts[index];
        assert_ne!(*c, 0, "share of free frame #{index}");
        *c = c
            .checked_add(1)
            .unwrap_or_else(|| panic!("share count overflow on frame #{index}"));
        *c
    }

    /// Drop a sharer and return the remaining count.
    ///
    /// # Panics
    /// If the count is already zero (double free / underflow).
    #[inline]
    pub fn decrement(&mut self, index: usize) -> u32 {
        let c = &mut self.counts[index];
        *c = c
            .checked_sub(1)
            .unwrap_or_else(|| panic!("share count underflow on frame #{index} (double free?)"));
        *c
    }
}
