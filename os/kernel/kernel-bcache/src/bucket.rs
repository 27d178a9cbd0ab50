//! Shard membership lists.
//!
//! Each shard owns a singly linked list of buffer slots. Links are slot
//! indices stored in the slots themselves, terminated by [`NIL`]. A list may
//! only be read or changed while its shard's [`SpinLock`](kernel_sync::SpinLock)
//! is held, which is also what orders the relaxed atomics in the slots.

use crate::buf::BufSlot;
use crate::device::{BlockNo, DeviceId};
use core::sync::atomic::Ordering;
use kernel_sync::Yield;

/// End-of-list marker.
pub(crate) const NIL: usize = usize::MAX;

/// Head of one shard's membership list.
pub(crate) struct Bucket {
    head: usize,
}

/// An eviction candidate found in one bucket.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub slot: usize,
    /// Predecessor in the list, or [`NIL`] when `slot` is the head.
    pub prev: usize,
    pub stamp: u64,
}

impl Bucket {
    pub(crate) const fn empty() -> Self {
        Self { head: NIL }
    }

    /// A bucket that owns `slots[0..n]`, linked in index order.
    pub(crate) fn chain<Y: Yield>(slots: &[BufSlot<Y>]) -> Self {
        for (i, slot) in slots.iter().enumerate() {
            let next = if i + 1 < slots.len() { i + 1 } else { NIL };
            slot.next.store(next, Ordering::Relaxed);
        }
        Self {
            head: if slots.is_empty() { NIL } else { 0 },
        }
    }

    /// Walk the list as `(prev, slot)` pairs.
    fn links<'s, Y: Yield>(&self, slots: &'s [BufSlot<Y>]) -> impl Iterator<Item = (usize, usize)> + 's {
        let mut prev = NIL;
        let mut cur = self.head;
        core::iter::from_fn(move || {
            if cur == NIL {
                return None;
            }
            let item = (prev, cur);
            prev = cur;
            cur = slots[cur].next.load(Ordering::Relaxed);
            Some(item)
        })
    }

    pub(crate) fn len<Y: Yield>(&self, slots: &[BufSlot<Y>]) -> usize {
        self.links(slots).count()
    }

    /// The member caching `(device, block)`, if any.
    pub(crate) fn find<Y: Yield>(
        &self,
        slots: &[BufSlot<Y>],
        device: DeviceId,
        block: BlockNo,
    ) -> Option<usize> {
        self.links(slots)
            .map(|(_, slot)| slot)
            .find(|&slot| slots[slot].holds(device, block))
    }

    /// The unreferenced member with the smallest stamp, provided that stamp
    /// is below `older_than`. Ties go to the member nearest the head.
    pub(crate) fn oldest_unreferenced<Y: Yield>(
        &self,
        slots: &[BufSlot<Y>],
        older_than: u64,
    ) -> Option<Candidate> {
        let mut best: Option<Candidate> = None;
        for (prev, slot) in self.links(slots) {
            let buf = &slots[slot];
            if buf.refcnt.load(Ordering::Relaxed) != 0 {
                continue;
            }
            let stamp = buf.stamp.load(Ordering::Relaxed);
            if stamp < best.map_or(older_than, |c| c.stamp) {
                best = Some(Candidate { slot, prev, stamp });
            }
        }
        best
    }

    pub(crate) fn push_front<Y: Yield>(&mut self, slots: &[BufSlot<Y>], slot: usize) {
        slots[slot].next.store(self.head, Ordering::Relaxed);
        self.head = slot;
    }

    /// Remove `slot`, whose predecessor is `prev`, from the list.
    pub(crate) fn unlink<Y: Yield>(&mut self, slots: &[BufSlot<Y>], prev: usize, slot: usize) {
        let next = slots[slot].next.swap(NIL, Ordering::Relaxed);
        if prev == NIL {
            debug_assert_eq!(self.head, slot);
            self.head = next;
        } else {
            debug_assert_eq!(slots[prev].next.load(Ordering::Relaxed), slot);
            slots[prev].next.store(next, Ordering::Relaxed);
        }
    }
}
