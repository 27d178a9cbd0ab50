//! # Kernel Physical Page Allocator
//!
//! This crate owns the pool of 4 KiB physical frames and hands them out to the
//! rest of the kernel: page tables, kernel stacks, user pages and I/O buffers.
//! It also keeps the copy-on-write share count of every frame.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 FrameAllocator                      │
//! │    • allocate / free / retain / release_count       │
//! │    • work stealing in ascending core order          │
//! └───────┬───────────────────────────────┬─────────────┘
//!         │                               │
//! ┌───────▼────────────────────┐ ┌────────▼────────────┐
//! │ per-core FreeList × NCPU   │ │ ShareTable          │
//! │  • SpinLock each           │ │  • one SpinLock     │
//! │  • links live in the frames│ │  • u32 per frame    │
//! └───────┬────────────────────┘ └─────────────────────┘
//!         │
//! ┌───────▼────────────────────┐
//! │ PhysMapper                 │
//! │  • HHDM in the kernel      │
//! │  • in-memory RAM in tests  │
//! └────────────────────────────┘
//! ```
//!
//! ## Failure model
//!
//! Running out of frames is an ordinary condition: [`FrameAllocator::allocate`]
//! returns `None`. Double frees, share-count underflow and frames outside the
//! managed range are kernel bugs and panic.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kernel_alloc::{CurrentCpu, FrameAllocator, HhdmPhysMapper, PhysicalAddress};
//! use kernel_info::memory::{PHYS_RAM_BASE, PHYS_RAM_SIZE};
//!
//! struct Bsp;
//! impl CurrentCpu for Bsp {
//!     fn current_cpu() -> usize { 0 }
//! }
//!
//! static KMEM: FrameAllocator<HhdmPhysMapper, Bsp> = FrameAllocator::new(HhdmPhysMapper);
//!
//! // The kernel image occupies the first 2 MiB of RAM.
//! let start = PhysicalAddress::new(PHYS_RAM_BASE + 0x20_0000);
//! let end = PhysicalAddress::new(PHYS_RAM_BASE + PHYS_RAM_SIZE);
//! unsafe { KMEM.init(start, end) }.expect("frame allocator");
//! if let Some(frame) = KMEM.allocate() {
//!     KMEM.retain(frame);        // fork shares the page
//!     KMEM.release_count(frame); // child unmaps it
//!     KMEM.free(frame);          // parent drops the last reference
//! }
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod address;
pub mod frame_alloc;
pub mod free_list;
pub mod phys_mapper;
pub mod share_count;

pub use address::{Frame, PhysicalAddress};
pub use frame_alloc::{CurrentCpu, FrameAllocInitError, FrameAllocator};
pub use phys_mapper::{HhdmPhysMapper, PhysMapper};
