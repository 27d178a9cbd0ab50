//! # Memory Layout

/// Size of one physical frame (and one virtual page) in bytes.
pub const PAGE_SIZE: usize = 4096;

/// `log2(PAGE_SIZE)`.
pub const PAGE_SHIFT: u32 = 12;

/// A simple Higher Half Direct Map (HHDM) base.
/// Anything you map at [`HHDM_BASE`] + `pa` lets the kernel
/// access physical memory via a fixed offset.
pub const HHDM_BASE: u64 = 0xffff_8880_0000_0000;

/// Start of RAM handed to the frame allocator on the reference board.
pub const PHYS_RAM_BASE: u64 = 0x8000_0000;

/// Amount of RAM handed to the frame allocator on the reference board.
pub const PHYS_RAM_SIZE: u64 = 128 * 1024 * 1024;

/// Number of execution cores, and therefore of per-core free lists.
pub const MAX_CPUS: usize = 8;

/// Upper bound on the number of frames a single allocator instance tracks.
#[allow(clippy::cast_possible_truncation)]
pub const MAX_FRAMES: usize = (PHYS_RAM_SIZE >> PAGE_SHIFT) as usize;

/// Byte written over a frame's contents when it is handed out.
pub const FRAME_ALLOC_FILL: u8 = 0x05;

/// Byte written over a frame's contents when it goes back on a free list.
pub const FRAME_FREE_FILL: u8 = 0x01;

/// Round `x` up to the next multiple of [`PAGE_SIZE`].
///
/// ### Examples
/// ```rust
/// # use kernel_info::memory::page_round_up;
/// assert_eq!(page_round_up(0), 0);
/// assert_eq!(page_round_up(1), 4096);
/// assert_eq!(page_round_up(4096), 4096);
/// ```
#[inline]
#[must_use]
pub const fn page_round_up(x: u64) -> u64 {
    (x + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1)
}

/// Round `x` down to a multiple of [`PAGE_SIZE`].
///
/// ### Examples
/// ```rust
/// # use kernel_info::memory::page_round_down;
/// assert_eq!(page_round_down(4095), 0);
/// assert_eq!(page_round_down(8193), 8192);
/// ```
#[inline]
#[must_use]
pub const fn page_round_down(x: u64) -> u64 {
    x & !(PAGE_SIZE as u64 - 1)
}

const _: () = {
    assert!(PAGE_SIZE == 1 << PAGE_SHIFT);
    assert!(PHYS_RAM_BASE.is_multiple_of(PAGE_SIZE as u64));
    assert!(PHYS_RAM_SIZE.is_multiple_of(PAGE_SIZE as u64));
    assert!(MAX_CPUS > 0);
    assert!(FRAME_ALLOC_FILL != FRAME_FREE_FILL);
};
