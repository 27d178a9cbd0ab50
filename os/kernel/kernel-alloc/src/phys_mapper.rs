//! # Physical memory access
//!
//! Frames are named by physical address, but the kernel can only touch
//! virtual ones. A [`PhysMapper`] bridges the two so the allocator can scrub
//! frames and thread its free lists through them, without knowing how
//! physical memory is mapped.
//!
//! - **Kernel**: [`HhdmPhysMapper`], every physical address is visible at
//!   `HHDM_BASE + pa`.
//! - **Tests**: an in-memory "RAM" that turns an address into a pointer into
//!   a heap buffer.

use crate::{Frame, PhysicalAddress};
use kernel_info::memory::{HHDM_BASE, PAGE_SIZE};

/// Converts physical addresses to usable pointers in the current address space.
///
/// Implementations must be shareable between cores: the allocator calls the
/// mapper from whichever core is allocating or freeing.
pub trait PhysMapper: Sync {
    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// - `pa` must be mapped, writable, and valid for a `T`.
    /// - The caller must guarantee no other live reference aliases the same
    ///   bytes for `'a`.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;

    /// The whole frame as bytes.
    ///
    /// # Safety
    /// Same as [`phys_to_mut`](Self::phys_to_mut); additionally the caller must
    /// own the frame (it is on a locked free list, or was just taken off one).
    #[inline]
    unsafe fn frame_bytes<'a>(&self, frame: Frame) -> &'a mut [u8; PAGE_SIZE] {
        unsafe { self.phys_to_mut(frame.start_address()) }
    }

    /// Overwrite every byte of `frame` with `pattern`.
    ///
    /// # Safety
    /// See [`frame_bytes`](Self::frame_bytes).
    #[inline]
    unsafe fn fill_frame(&self, frame: Frame, pattern: u8) {
        unsafe { self.frame_bytes(frame) }.fill(pattern);
    }
}

/// [`PhysMapper`] for kernels with a higher-half direct map (HHDM).
///
/// # Safety
/// - The HHDM mapping must be present and cover the referenced physical range.
pub struct HhdmPhysMapper;

impl PhysMapper for HhdmPhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let va = (HHDM_BASE + pa.as_u64()) as *mut T;
        // SAFETY: Caller must ensure the physical address is valid and mapped via HHDM.
        unsafe { &mut *va }
    }
}
