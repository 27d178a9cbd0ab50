//! The sharded block cache.
//!
//! # Locks
//!
//! - One [`SpinLock`] per shard guards the shard's membership list and the
//!   `refcnt`/`stamp` of every slot on it.
//! - One [`SleepLock`](kernel_sync::SleepLock) per slot guards the content.
//!   It is only ever waited for with no shard lock held.
//!
//! Lookups, releases and pins hold one shard lock. The eviction scan holds at
//! most two: the shard with the best candidate so far and the shard being
//! scanned, always acquired in ascending shard index. Every scan agrees on
//! that order, which is what keeps concurrent scans from deadlocking.

use crate::bucket::{Bucket, Candidate};
use crate::buf::{BufHandle, BufSlot};
use crate::device::{BlockDevice, BlockNo, DeviceId, NO_DEVICE};
use crate::error::CacheError;
use core::sync::atomic::{AtomicU64, Ordering};
use kernel_info::block::{NBUCKET as DEFAULT_NBUCKET, NBUF as DEFAULT_NBUF};
use kernel_sync::{SpinLock, SpinLockGuard, Yield};
use log::{debug, info, trace};

/// Counters since construction.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Acquires satisfied by a buffer already labeled with the block.
    pub hits: u64,
    /// Acquires that repurposed an evicted buffer.
    pub misses: u64,
    /// Misses that found the block inserted by someone else while scanning,
    /// and gave their victim back. Also counted in `hits`.
    pub lost_races: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    lost_races: AtomicU64,
}

/// The buffer chosen by an eviction scan, with its shard still locked.
struct Victim<'a> {
    shard: usize,
    guard: SpinLockGuard<'a, Bucket>,
    candidate: Candidate,
}

/// A buffer an eviction scan took off its shard. While it exists the buffer
/// is on no list and has no references.
#[derive(Debug, Copy, Clone)]
struct Evicted {
    origin: usize,
    slot: usize,
    stamp: u64,
}

/// A fixed pool of `NBUF` block buffers, hashed by block number into
/// `NBUCKET` shards.
///
/// - `D` is the storage driver.
/// - `Y` is how a task waiting for a busy buffer gives up the core.
pub struct BufferCache<D, Y, const NBUF: usize = DEFAULT_NBUF, const NBUCKET: usize = DEFAULT_NBUCKET>
where
    D: BlockDevice,
    Y: Yield,
{
    device: D,
    slots: [BufSlot<Y>; NBUF],
    shards: [SpinLock<Bucket>; NBUCKET],
    /// Logical clock stamped on buffers as they become unreferenced.
    clock: AtomicU64,
    counters: Counters,
}

impl<D, Y, const NBUF: usize, const NBUCKET: usize> BufferCache<D, Y, NBUF, NBUCKET>
where
    D: BlockDevice,
    Y: Yield,
{
    const GEOMETRY: () = {
        assert!(NBUF > 0, "the cache needs at least one buffer");
        assert!(NBUCKET > 0, "the cache needs at least one shard");
    };

    /// A cache over `device` whose buffers are all empty and parked in
    /// shard 0 with stamp 0.
    #[must_use]
    pub fn new(device: D) -> Self {
        let () = Self::GEOMETRY;
        let slots: [BufSlot<Y>; NBUF] = core::array::from_fn(|_| BufSlot::new());
        let mut shards: [SpinLock<Bucket>; NBUCKET] =
            core::array::from_fn(|_| SpinLock::named("bcache.bucket", Bucket::empty()));
        *shards[0].get_mut() = Bucket::chain(&slots);

        info!("bcache: {nbuf} buffers in {nbucket} shards", nbuf = NBUF, nbucket = NBUCKET);
        Self {
            device,
            slots,
            shards,
            clock: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    /// The storage driver underneath.
    #[must_use]
    pub const fn device(&self) -> &D {
        &self.device
    }

    /// Get exclusive access to the buffer for `(device, block)`.
    ///
    /// Never does I/O: the returned buffer may be invalid, in which case the
    /// caller loads it with [`BufHandle::load`] (or uses [`read`](Self::read)).
    /// Blocks, yielding the core, while another task holds the buffer.
    ///
    /// # Panics
    /// If the block is not cached and every buffer is referenced, or if
    /// `device` is [`NO_DEVICE`].
    #[must_use]
    pub fn acquire(&self, device: DeviceId, block: BlockNo) -> BufHandle<'_, D, Y, NBUF, NBUCKET> {
        assert_ne!(device, NO_DEVICE, "bcache: device id {NO_DEVICE} is reserved");
        let shard = Self::shard_of(block);

        {
            let bucket = self.shards[shard].lock();
            if let Some(slot) = bucket.find(&self.slots, device, block) {
                self.slots[slot].refcnt.fetch_add(1, Ordering::Relaxed);
                drop(bucket);
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return self.hold(slot);
            }
        }

        // Miss. Never scan the other shards with our own still locked.
        let slot = self.settle(device, block, self.evict());
        self.hold(slot)
    }

    /// [`acquire`](Self::acquire) the block and make sure its content is loaded.
    ///
    /// # Errors
    /// [`CacheError::Read`] if the device fails; the buffer is released.
    ///
    /// # Panics
    /// See [`acquire`](Self::acquire).
    pub fn read(
        &self,
        device: DeviceId,
        block: BlockNo,
    ) -> Result<BufHandle<'_, D, Y, NBUF, NBUCKET>, CacheError> {
        let mut handle = self.acquire(device, block);
        handle.load()?;
        Ok(handle)
    }

    /// Write the buffer's content to the device.
    ///
    /// # Errors
    /// [`CacheError::Write`] if the device fails.
    ///
    /// # Panics
    /// If `handle` does not hold its buffer or belongs to another cache.
    pub fn commit(&self, handle: &BufHandle<'_, D, Y, NBUF, NBUCKET>) -> Result<(), CacheError> {
        self.check_owner(handle, "commit");
        let (device, block) = (handle.device(), handle.block());
        self.device
            .write_block(device, block, handle.data())
            .map_err(|source| CacheError::Write {
                device,
                block,
                source,
            })?;
        self.slots[handle.slot].valid.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Give up a handle: release the content lock, then drop the reference.
    /// When no references remain, the buffer becomes evictable and is stamped
    /// with the next tick of the cache's clock.
    ///
    /// # Panics
    /// If `handle` belongs to another cache.
    pub fn release(&self, handle: BufHandle<'_, D, Y, NBUF, NBUCKET>) {
        self.check_owner(&handle, "release");
        drop(handle);
    }

    /// Keep the buffer cached after `handle` is released, until a matching
    /// [`unpin`](Self::unpin).
    ///
    /// # Panics
    /// If `handle` belongs to another cache.
    pub fn pin(&self, handle: &BufHandle<'_, D, Y, NBUF, NBUCKET>) {
        self.check_owner(handle, "pin");
        self.add_reference(handle.slot);
    }

    /// Undo one [`pin`](Self::pin).
    ///
    /// # Panics
    /// If the buffer is not pinned, or `handle` belongs to another cache.
    pub fn unpin(&self, handle: &BufHandle<'_, D, Y, NBUF, NBUCKET>) {
        self.check_owner(handle, "unpin");
        let buf = &self.slots[handle.slot];
        let _bucket = self.shards[Self::shard_of(handle.block())].lock();
        let refs = buf.refcnt.load(Ordering::Relaxed);
        // The handle itself accounts for one reference.
        assert!(refs > 1, "bcache: unpin of unpinned buffer #{}", handle.slot);
        buf.refcnt.store(refs - 1, Ordering::Relaxed);
    }

    /// Whether `(device, block)` currently has a buffer.
    #[must_use]
    pub fn is_cached(&self, device: DeviceId, block: BlockNo) -> bool {
        self.shards[Self::shard_of(block)]
            .lock()
            .find(&self.slots, device, block)
            .is_some()
    }

    /// Current number of references to the buffer of `(device, block)`, if cached.
    #[must_use]
    pub fn ref_count(&self, device: DeviceId, block: BlockNo) -> Option<u32> {
        let bucket = self.shards[Self::shard_of(block)].lock();
        bucket
            .find(&self.slots, device, block)
            .map(|slot| self.slots[slot].refcnt.load(Ordering::Relaxed))
    }

    /// Number of buffers on each shard's list.
    #[must_use]
    pub fn shard_lengths(&self) -> [usize; NBUCKET] {
        core::array::from_fn(|i| self.shards[i].lock().len(&self.slots))
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            lost_races: self.counters.lost_races.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn slot(&self, index: usize) -> &BufSlot<Y> {
        &self.slots[index]
    }

    /// Drop one reference; called by a handle after it let go of the content.
    pub(crate) fn unreference(&self, slot: usize) {
        let buf = &self.slots[slot];
        // A referenced buffer never changes its block, so its shard is stable.
        let _bucket = self.shards[Self::shard_of(buf.block.load(Ordering::Relaxed))].lock();
        let refs = buf.refcnt.load(Ordering::Relaxed);
        assert!(refs > 0, "bcache: release of unreferenced buffer #{slot}");
        buf.refcnt.store(refs - 1, Ordering::Relaxed);
        if refs == 1 {
            let now = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
            buf.stamp.store(now, Ordering::Relaxed);
        }
    }

    /// Find the least recently released buffer over all shards.
    ///
    /// Returns with the victim's shard still locked.
    fn select_victim(&self) -> Victim<'_> {
        let mut best: Option<Victim<'_>> = None;
        for (shard, lock) in self.shards.iter().enumerate() {
            let guard = lock.lock();
            let older_than = best.as_ref().map_or(u64::MAX, |v| v.candidate.stamp);
            if let Some(candidate) = guard.oldest_unreferenced(&self.slots, older_than) {
                // Keeps this shard locked and unlocks the previous best.
                best = Some(Victim {
                    shard,
                    guard,
                    candidate,
                });
            }
        }
        let Some(victim) = best else {
            panic!("bcache: no buffers");
        };
        victim
    }

    /// Take the least recently released buffer off its shard.
    fn evict(&self) -> Evicted {
        let Victim {
            shard,
            mut guard,
            candidate,
        } = self.select_victim();
        guard.unlink(&self.slots, candidate.prev, candidate.slot);
        Evicted {
            origin: shard,
            slot: candidate.slot,
            stamp: candidate.stamp,
        }
    }

    /// Finish a miss on `(device, block)` with a buffer taken off its shard.
    ///
    /// Relabels `evicted` and files it under the block's shard, unless the
    /// block was cached by someone else in the meantime. Then the victim goes
    /// back to its origin shard with its stamp, and that other buffer is used.
    /// Returns the buffer to hold; its reference is already counted.
    fn settle(&self, device: DeviceId, block: BlockNo, evicted: Evicted) -> usize {
        let mut bucket = self.shards[Self::shard_of(block)].lock();
        if let Some(slot) = bucket.find(&self.slots, device, block) {
            self.slots[slot].refcnt.fetch_add(1, Ordering::Relaxed);
            drop(bucket);
            self.give_back(evicted);
            debug!(
                "bcache: lost race for {device}:{block}, returned buffer #{} to shard {}",
                evicted.slot, evicted.origin
            );
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            self.counters.lost_races.fetch_add(1, Ordering::Relaxed);
            return slot;
        }

        let buf = &self.slots[evicted.slot];
        trace!(
            "bcache: buffer #{} {}:{} (stamp {}) -> {device}:{block}",
            evicted.slot,
            buf.device.load(Ordering::Relaxed),
            buf.block.load(Ordering::Relaxed),
            evicted.stamp
        );
        buf.relabel(device, block);
        buf.refcnt.store(1, Ordering::Relaxed);
        bucket.push_front(&self.slots, evicted.slot);
        drop(bucket);
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        evicted.slot
    }

    /// Return an unused victim to its origin shard, stamp unchanged.
    ///
    /// Its old label is dropped: while it was off every list, its block may
    /// have been cached in another buffer (and even written and evicted), so
    /// its content can no longer be trusted.
    fn give_back(&self, evicted: Evicted) {
        let buf = &self.slots[evicted.slot];
        let mut origin = self.shards[evicted.origin].lock();
        // Keep the block so the buffer still hashes to its origin shard.
        buf.relabel(NO_DEVICE, buf.block.load(Ordering::Relaxed));
        origin.push_front(&self.slots, evicted.slot);
    }

    /// Count one more reference, taking the lock of the buffer's shard.
    fn add_reference(&self, slot: usize) {
        let buf = &self.slots[slot];
        let _bucket = self.shards[Self::shard_of(buf.block.load(Ordering::Relaxed))].lock();
        buf.refcnt.fetch_add(1, Ordering::Relaxed);
    }

    fn hold(&self, slot: usize) -> BufHandle<'_, D, Y, NBUF, NBUCKET> {
        BufHandle {
            cache: self,
            slot,
            content: Some(self.slots[slot].content.lock()),
        }
    }

    fn check_owner(&self, handle: &BufHandle<'_, D, Y, NBUF, NBUCKET>, op: &str) {
        assert!(
            core::ptr::eq(handle.cache, self),
            "bcache: {op} of buffer #{} from another cache",
            handle.slot
        );
        assert!(
            handle.content.as_ref().is_some_and(|g| g.holding()),
            "bcache: {op} of buffer #{} without holding it",
            handle.slot
        );
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn shard_of(block: BlockNo) -> usize {
        block as usize % NBUCKET
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceError;
    use kernel_info::block::BLOCK_SIZE;
    use kernel_sync::SpinYield;

    struct NullDisk;

    impl BlockDevice for NullDisk {
        fn read_block(&self, _: DeviceId, _: BlockNo, _: &mut [u8; BLOCK_SIZE]) -> Result<(), DeviceError> {
            Ok(())
        }

        fn write_block(&self, _: DeviceId, _: BlockNo, _: &[u8; BLOCK_SIZE]) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    type Cache = BufferCache<NullDisk, SpinYield, 2, 2>;

    #[test]
    fn lost_race_gives_the_victim_back_with_its_stamp() {
        let c = Cache::new(NullDisk);
        // Block 1 -> buffer #0 in shard 1 (stamp 1), block 2 -> buffer #1 in shard 0 (stamp 2).
        drop(c.acquire(1, 1));
        drop(c.acquire(1, 2));
        assert_eq!(c.shard_lengths(), [1, 1]);

        // Our scan takes the oldest buffer off shard 1 ...
        let evicted = c.evict();
        assert_eq!((evicted.origin, evicted.slot, evicted.stamp), (1, 0, 1));
        assert_eq!(c.shard_lengths(), [1, 0]);
        assert!(!c.is_cached(1, 1));

        // ... while another task caches block 4 in the only buffer left.
        let rival = c.acquire(1, 4);
        assert_eq!(rival.buffer_index(), 1);

        let slot = c.settle(1, 4, evicted);
        assert_eq!(slot, rival.buffer_index());
        assert_eq!(c.ref_count(1, 4), Some(2));
        assert_eq!(c.shard_lengths(), [1, 1], "victim is back in shard 1");
        assert_eq!(c.slots[0].stamp.load(Ordering::Relaxed), 1);
        assert_eq!(c.slots[0].refcnt.load(Ordering::Relaxed), 0);
        assert!(!c.is_cached(1, 1), "stale label was dropped");
        assert_eq!(
            c.stats(),
            CacheStats {
                hits: 1,
                misses: 3,
                lost_races: 1,
            }
        );

        // Drop the reference `settle` counted for us, then the rival's.
        c.unreference(slot);
        drop(rival);
        assert_eq!(c.ref_count(1, 4), Some(0));

        // The returned victim is still the oldest and is reused first.
        assert_eq!(c.acquire(1, 6).buffer_index(), 0);
    }

    #[test]
    fn settle_without_a_rival_relabels_the_victim() {
        let c = Cache::new(NullDisk);
        let evicted = c.evict();
        assert_eq!((evicted.origin, evicted.slot), (0, 0));

        let slot = c.settle(1, 3, evicted);
        assert_eq!(slot, 0);
        assert_eq!(c.shard_lengths(), [1, 1]);
        assert_eq!(c.ref_count(1, 3), Some(1));
        assert_eq!(c.stats().misses, 1);
        c.unreference(slot);
        assert_eq!(c.slots[0].stamp.load(Ordering::Relaxed), 1);
    }
}
