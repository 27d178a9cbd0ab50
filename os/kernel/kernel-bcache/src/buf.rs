use crate::bucket::NIL;
use crate::cache::BufferCache;
use crate::device::{BlockDevice, BlockNo, DeviceId, NO_DEVICE};
use crate::error::CacheError;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use kernel_info::block::BLOCK_SIZE;
use kernel_sync::{SleepLock, SleepLockGuard, Yield};

/// One statically allocated buffer.
///
/// The metadata fields are atomics only so the slot can be shared; all of
/// them except `valid` change only under the lock of the shard the slot
/// belongs to. `valid` and the content change only under the content lock,
/// or while the slot is unreferenced and being relabeled.
pub(crate) struct BufSlot<Y: Yield> {
    pub device: AtomicU32,
    pub block: AtomicU32,
    /// Holders plus waiters plus pins.
    pub refcnt: AtomicU32,
    /// Logical time at which `refcnt` last dropped to zero.
    pub stamp: AtomicU64,
    /// Next slot in the owning shard's list.
    pub next: AtomicUsize,
    /// Whether `content` mirrors the block on disk.
    pub valid: AtomicBool,
    pub content: SleepLock<[u8; BLOCK_SIZE], Y>,
}

impl<Y: Yield> BufSlot<Y> {
    pub(crate) const fn new() -> Self {
        Self {
            device: AtomicU32::new(NO_DEVICE),
            block: AtomicU32::new(0),
            refcnt: AtomicU32::new(0),
            stamp: AtomicU64::new(0),
            next: AtomicUsize::new(NIL),
            valid: AtomicBool::new(false),
            content: SleepLock::new("bcache.buffer", [0; BLOCK_SIZE]),
        }
    }

    #[inline]
    pub(crate) fn holds(&self, device: DeviceId, block: BlockNo) -> bool {
        self.device.load(Ordering::Relaxed) == device && self.block.load(Ordering::Relaxed) == block
    }

    /// Repurpose an unreferenced slot for `(device, block)`.
    pub(crate) fn relabel(&self, device: DeviceId, block: BlockNo) {
        self.device.store(device, Ordering::Relaxed);
        self.block.store(block, Ordering::Relaxed);
        self.valid.store(false, Ordering::Relaxed);
    }
}

/// Exclusive access to one cached block.
///
/// Obtained from [`BufferCache::acquire`] or [`BufferCache::read`]; holds the
/// buffer's content lock and one reference. Dropping the handle is the same
/// as passing it to [`BufferCache::release`]. Do not keep handles longer than
/// needed: other tasks wanting the block wait for it.
pub struct BufHandle<'a, D, Y, const NBUF: usize, const NBUCKET: usize>
where
    D: BlockDevice,
    Y: Yield,
{
    pub(crate) cache: &'a BufferCache<D, Y, NBUF, NBUCKET>,
    pub(crate) slot: usize,
    /// `None` only while the handle is being dropped.
    pub(crate) content: Option<SleepLockGuard<'a, [u8; BLOCK_SIZE], Y>>,
}

impl<D, Y, const NBUF: usize, const NBUCKET: usize> BufHandle<'_, D, Y, NBUF, NBUCKET>
where
    D: BlockDevice,
    Y: Yield,
{
    #[must_use]
    pub fn device(&self) -> DeviceId {
        self.buf().device.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn block(&self) -> BlockNo {
        self.buf().block.load(Ordering::Relaxed)
    }

    /// Index of the underlying buffer in the pool. Two handles with the same
    /// index (at different times) refer to the same buffer.
    #[must_use]
    pub const fn buffer_index(&self) -> usize {
        self.slot
    }

    /// Whether the content has been loaded from (or committed to) the device.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.buf().valid.load(Ordering::Relaxed)
    }

    /// The cached bytes.
    ///
    /// # Panics
    /// If the handle no longer holds the content lock.
    #[must_use]
    pub fn data(&self) -> &[u8; BLOCK_SIZE] {
        match &self.content {
            Some(g) if g.holding() => &**g,
            _ => panic!("bcache: buffer #{} is not held", self.slot),
        }
    }

    /// Mutable content. Changes reach the device only through
    /// [`BufferCache::commit`].
    ///
    /// # Panics
    /// If the handle no longer holds the content lock.
    pub fn data_mut(&mut self) -> &mut [u8; BLOCK_SIZE] {
        let slot = self.slot;
        match self.content.as_mut() {
            Some(g) => &mut **g,
            None => panic!("bcache: buffer #{slot} is not held"),
        }
    }

    /// Read the block from the device unless the buffer already holds it.
    ///
    /// # Errors
    /// [`CacheError::Read`] if the driver fails; the buffer stays invalid and
    /// the next holder retries.
    pub fn load(&mut self) -> Result<(), CacheError> {
        if self.is_valid() {
            return Ok(());
        }
        let (device, block) = (self.device(), self.block());
        let cache = self.cache;
        cache
            .device()
            .read_block(device, block, self.data_mut())
            .map_err(|source| CacheError::Read {
                device,
                block,
                source,
            })?;
        self.buf().valid.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn buf(&self) -> &BufSlot<Y> {
        self.cache.slot(self.slot)
    }
}

impl<D, Y, const NBUF: usize, const NBUCKET: usize> Drop for BufHandle<'_, D, Y, NBUF, NBUCKET>
where
    D: BlockDevice,
    Y: Yield,
{
    fn drop(&mut self) {
        let content = self.content.take();
        assert!(
            content.as_ref().is_some_and(|g| g.holding()),
            "bcache: release of buffer #{} without holding it",
            self.slot
        );
        // Give up the content before touching the shard, like any other holder.
        drop(content);
        self.cache.unreference(self.slot);
    }
}

impl<D, Y, const NBUF: usize, const NBUCKET: usize> fmt::Debug for BufHandle<'_, D, Y, NBUF, NBUCKET>
where
    D: BlockDevice,
    Y: Yield,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufHandle")
            .field("buffer", &self.slot)
            .field("device", &self.device())
            .field("block", &self.block())
            .field("valid", &self.is_valid())
            .finish_non_exhaustive()
    }
}
