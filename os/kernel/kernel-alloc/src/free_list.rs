use crate::{Frame, PhysMapper};
use core::mem::MaybeUninit;

/// Header stored at the beginning of every **free** frame.
///
/// A free frame in memory has the following layout:
///
/// ```text
/// +-----------------+------------------------------------------+
/// | Run (header)    |   FRAME_FREE_FILL bytes                  |
/// +-----------------+------------------------------------------+
/// ^ frame start     ^ frame start + size_of::<Run>()
/// ```
///
/// The header is part of the free frame and is overwritten as soon as the
/// frame is handed out.
#[repr(C)]
struct Run {
    /// Next free frame on the same list.
    next: Option<Frame>,
}

/// An unordered stack of free frames, linked through the frames themselves.
///
/// One `FreeList` exists per core, each behind its own
/// [`SpinLock`](kernel_sync::SpinLock). The list owns every frame on it: the
/// only code that reads or writes a listed frame is `push`/`pop` under that
/// lock.
///
/// # Invariants
/// - Every listed frame appears exactly once, on exactly one list.
/// - `len` equals the number of frames reachable from `head`.
pub struct FreeList {
    head: Option<Frame>,
    len: usize,
}

impl Default for FreeList {
    fn default() -> Self {
        Self::new()
    }
}

impl FreeList {
    #[must_use]
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Put `frame` on top of the list.
    ///
    /// # Safety
    /// - The caller owns `frame`: it is allocated, its share count is zero,
    ///   and it is on no other list.
    /// - `mapper` must map `frame` writable.
    pub unsafe fn push<M: PhysMapper>(&mut self, mapper: &M, frame: Frame) {
        let run: &mut MaybeUninit<Run> = unsafe { mapper.phys_to_mut(frame.start_address()) };
        run.write(Run { next: self.head });
        self.head = Some(frame);
        self.len += 1;
    }

    /// Take the top frame off the list.
    ///
    /// # Safety
    /// - `mapper` must be the mapper the frames were pushed with.
    pub unsafe fn pop<M: PhysMapper>(&mut self, mapper: &M) -> Option<Frame> {
        let frame = self.head?;
        let run: &mut MaybeUninit<Run> = unsafe { mapper.phys_to_mut(frame.start_address()) };
        // SAFETY: `push` wrote a `Run` header into every listed frame.
        let run = unsafe { run.assume_init_read() };
        self.head = run.next;
        self.len -= 1;
        Some(frame)
    }
}
