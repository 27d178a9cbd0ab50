//! Per-core physical frame allocator with work stealing.
//!
//! ```text
//!   allocate() on core k                         free(frame) on core k
//!   ────────────────────                         ─────────────────────
//!   lock list[k] ── pop ──► hit ─┐               shares[frame] -= 1
//!        │ empty                 │                    │ == 0
//!        ▼                       │                    ▼
//!   for v in 0..NCPU, v != k:    │               fill FRAME_FREE_FILL
//!     lock list[v] ── pop ──► hit┤               lock list[k] ── push
//!     unlock list[v]             │
//!        │ all empty             ▼
//!        ▼               shares[frame] = 1
//!      None              fill FRAME_ALLOC_FILL
//! ```
//!
//! # Lock order
//! A core holds at most one free-list lock at a time; stealers visit the
//! other lists in ascending core id. The share-count lock is never taken
//! while a free-list lock is held.

use crate::free_list::FreeList;
use crate::share_count::ShareTable;
use crate::{Frame, PhysMapper, PhysicalAddress};
use core::marker::PhantomData;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use kernel_info::memory::{FRAME_ALLOC_FILL, FRAME_FREE_FILL, MAX_CPUS, MAX_FRAMES, PAGE_SHIFT};
use kernel_sync::SpinLock;
use log::{info, trace, warn};

/// Identifies the core the caller is running on.
///
/// Implemented by the kernel's per-CPU layer. The answer only picks which
/// free list is tried first and which list a freed frame lands on; a task
/// migrating between cores mid-call is harmless.
pub trait CurrentCpu {
    /// Logical index of the executing core, `0..NCPU`.
    fn current_cpu() -> usize;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameAllocInitError {
    #[error("range {start}..{end} holds no whole frame")]
    EmptyRange {
        start: PhysicalAddress,
        end: PhysicalAddress,
    },
    #[error("range holds {frames} frames, but the share table only tracks {capacity}")]
    TooLarge { frames: u64, capacity: usize },
    #[error("frame allocator is already initialized")]
    AlreadyInitialized,
}

/// The physical page allocator.
///
/// Hands out [`Frame`]s from `NCPU` per-core free lists and tracks how many
/// mappings share each frame. Construct it empty (in a `static` if needed),
/// then hand it a physical range with [`init`](Self::init).
///
/// - `M` touches frame contents (fill patterns, free-list links).
/// - `C` tells which core is calling.
/// - `NFRAMES` bounds the size of the managed range.
pub struct FrameAllocator<M, C, const NCPU: usize = MAX_CPUS, const NFRAMES: usize = MAX_FRAMES> {
    mapper: M,
    lists: [SpinLock<FreeList>; NCPU],
    shares: SpinLock<ShareTable<NFRAMES>>,
    claimed: AtomicBool,
    /// Physical address of frame #0 of the managed range.
    base: AtomicU64,
    /// Number of managed frames; zero until `init` completes.
    frames: AtomicUsize,
    _cpu: PhantomData<fn() -> C>,
}

impl<M, C, const NCPU: usize, const NFRAMES: usize> FrameAllocator<M, C, NCPU, NFRAMES>
where
    M: PhysMapper,
    C: CurrentCpu,
{
    const HAS_CPUS: () = assert!(NCPU > 0, "at least one free list is required");

    /// An allocator that manages nothing yet.
    #[must_use]
    pub const fn new(mapper: M) -> Self {
        let () = Self::HAS_CPUS;
        Self {
            mapper,
            lists: [const { SpinLock::named("kmem", FreeList::new()) }; NCPU],
            shares: SpinLock::named("kmem.shares", ShareTable::new()),
            claimed: AtomicBool::new(false),
            base: AtomicU64::new(0),
            frames: AtomicUsize::new(0),
            _cpu: PhantomData,
        }
    }

    /// Take ownership of every whole frame in `start..end`.
    ///
    /// The frames are split into `NCPU` contiguous slices, one per core, each
    /// scrubbed with [`FRAME_FREE_FILL`] and pushed onto its core's list. All
    /// share counts start at zero. Returns the number of managed frames.
    ///
    /// # Errors
    /// - [`FrameAllocInitError::EmptyRange`] if no page-aligned frame fits.
    /// - [`FrameAllocInitError::TooLarge`] if the range exceeds `NFRAMES`.
    /// - [`FrameAllocInitError::AlreadyInitialized`] on a second call.
    ///
    /// # Safety
    /// `start..end` must be RAM that nobody else uses, mapped writable by the
    /// allocator's [`PhysMapper`].
    pub unsafe fn init(
        &self,
        start: PhysicalAddress,
        end: PhysicalAddress,
    ) -> Result<usize, FrameAllocInitError> {
        let first = start.align_up();
        let last = end.align_down();
        if last <= first {
            return Err(FrameAllocInitError::EmptyRange { start, end });
        }

        let count = (last - first) >> PAGE_SHIFT;
        let frames = match usize::try_from(count) {
            Ok(n) if n <= NFRAMES => n,
            _ => {
                return Err(FrameAllocInitError::TooLarge {
                    frames: count,
                    capacity: NFRAMES,
                });
            }
        };

        if self.claimed.swap(true, Ordering::AcqRel) {
            return Err(FrameAllocInitError::AlreadyInitialized);
        }

        let base = Frame::containing(first);
        self.base.store(first.as_u64(), Ordering::Relaxed);

        let per_cpu = frames.div_ceil(NCPU);
        for (cpu, list) in self.lists.iter().enumerate() {
            let lo = (cpu * per_cpu).min(frames);
            let hi = ((cpu + 1) * per_cpu).min(frames);
            let mut list = list.lock();
            // Push high to low so each core hands out its lowest frame first.
            for index in (lo..hi).rev() {
                let frame = base.offset(index as u64);
                unsafe {
                    self.mapper.fill_frame(frame, FRAME_FREE_FILL);
                    list.push(&self.mapper, frame);
                }
            }
        }

        self.frames.store(frames, Ordering::Release);
        info!(
            "kmem: managing {frames} frames at {first}..{last}, {per_cpu} per core on {ncpu} cores",
            ncpu = NCPU
        );
        Ok(frames)
    }

    /// Allocate one frame.
    ///
    /// Tries the calling core's list first, then steals from the other cores
    /// in ascending core id. The frame comes back with share count 1 and
    /// every byte set to [`FRAME_ALLOC_FILL`]. Returns `None` when every
    /// list is empty; the caller decides whether to reclaim, retry or fail.
    ///
    /// # Panics
    /// If [`CurrentCpu`] reports a core outside `0..NCPU`.
    #[must_use]
    pub fn allocate(&self) -> Option<Frame> {
        let cpu = Self::this_cpu();
        let Some(frame) = self.pop_local(cpu).or_else(|| self.steal(cpu)) else {
            warn!("kmem: out of frames on cpu {cpu}");
            return None;
        };

        let index = self.index_of(frame);
        self.shares.lock().claim(index);
        // SAFETY: the frame is off every list and its count was zero; we own it.
        unsafe { self.mapper.fill_frame(frame, FRAME_ALLOC_FILL) };
        Some(frame)
    }

    /// Drop one reference to `frame`; at zero the frame returns to the calling
    /// core's free list.
    ///
    /// # Panics
    /// On a double free (count already zero) or a frame outside the managed range.
    pub fn free(&self, frame: Frame) {
        self.release_count(frame);
    }

    /// Record an additional mapping of `frame` and return the new share count.
    ///
    /// # Panics
    /// If `frame` is free or outside the managed range.
    pub fn retain(&self, frame: Frame) -> u32 {
        let index = self.index_of(frame);
        self.shares.lock().increment(index)
    }

    /// Drop one mapping of `frame` and return the remaining share count.
    ///
    /// When the count reaches zero the frame is recycled exactly as by
    /// [`free`](Self::free).
    ///
    /// # Panics
    /// On share-count underflow or a frame outside the managed range.
    pub fn release_count(&self, frame: Frame) -> u32 {
        let index = self.index_of(frame);
        let remaining = self.shares.lock().decrement(index);
        if remaining == 0 {
            self.recycle(frame);
        }
        remaining
    }

    /// Current share count of `frame`; zero while it is free.
    ///
    /// # Panics
    /// If `frame` is outside the managed range.
    #[must_use]
    pub fn share_count(&self, frame: Frame) -> u32 {
        let index = self.index_of(frame);
        self.shares.lock().get(index)
    }

    /// Whether `frame` belongs to the managed range.
    #[must_use]
    pub fn contains(&self, frame: Frame) -> bool {
        self.try_index_of(frame).is_some()
    }

    /// Number of frames handed over by [`init`](Self::init).
    #[must_use]
    pub fn managed_frames(&self) -> usize {
        self.frames.load(Ordering::Acquire)
    }

    /// Number of frames currently on `cpu`'s free list.
    ///
    /// # Panics
    /// If `cpu` is not below `NCPU`.
    #[must_use]
    pub fn free_frames_on(&self, cpu: usize) -> usize {
        self.lists[cpu].lock().len()
    }

    /// Number of free frames over all cores.
    ///
    /// Lists are counted one at a time, so under concurrent use the sum is
    /// only approximate.
    #[must_use]
    pub fn free_frames(&self) -> usize {
        self.lists.iter().map(|l| l.lock().len()).sum()
    }

    fn this_cpu() -> usize {
        let cpu = C::current_cpu();
        assert!(cpu < NCPU, "kmem: cpu {cpu} out of range ({ncpu} cores)", ncpu = NCPU);
        cpu
    }

    fn pop_local(&self, cpu: usize) -> Option<Frame> {
        unsafe { self.lists[cpu].lock().pop(&self.mapper) }
    }

    /// First-fit steal: one frame from the first non-empty list after
    /// skipping our own, visiting cores in ascending id.
    fn steal(&self, thief: usize) -> Option<Frame> {
        for (victim, list) in self.lists.iter().enumerate() {
            if victim == thief {
                continue;
            }
            let frame = unsafe { list.lock().pop(&self.mapper) };
            if let Some(frame) = frame {
                trace!("kmem: cpu {thief} stole {frame} from cpu {victim}");
                return Some(frame);
            }
        }
        None
    }

    fn recycle(&self, frame: Frame) {
        let cpu = Self::this_cpu();
        // SAFETY: the count just dropped to zero, so no mapping or list refers
        // to the frame any more.
        unsafe {
            self.mapper.fill_frame(frame, FRAME_FREE_FILL);
            self.lists[cpu].lock().push(&self.mapper, frame);
        }
    }

    fn try_index_of(&self, frame: Frame) -> Option<usize> {
        let frames = self.frames.load(Ordering::Acquire);
        let base = self.base.load(Ordering::Relaxed);
        let offset = frame.start_address().as_u64().checked_sub(base)?;
        usize::try_from(offset >> PAGE_SHIFT)
            .ok()
            .filter(|&index| index < frames)
    }

    fn index_of(&self, frame: Frame) -> usize {
        self.try_index_of(frame)
            .unwrap_or_else(|| panic!("kmem: {frame:?} is outside the managed range"))
    }
}
