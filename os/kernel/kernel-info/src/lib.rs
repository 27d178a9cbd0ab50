//! # Kernel Configuration
//!
//! Compile-time configuration shared by the kernel's resource pools. Every
//! subsystem that sizes a fixed array or agrees on a memory geometry takes its
//! numbers from here, so the frame allocator, the buffer cache and their
//! collaborators can never disagree about a page or block size.
//!
//! ## Modules
//!
//! ### Memory ([`memory`])
//! * **Frame geometry**: [`PAGE_SIZE`](memory::PAGE_SIZE) and the alignment
//!   helpers derived from it
//! * **Direct map**: [`HHDM_BASE`](memory::HHDM_BASE), where all of physical
//!   memory is visible to the kernel
//! * **Per-core layout**: [`MAX_CPUS`](memory::MAX_CPUS), the number of
//!   per-core free lists
//! * **Fill patterns**: the bytes written into frames on allocation and on
//!   release, to make stale reads visible
//!
//! ### Block I/O ([`block`])
//! * **Block geometry**: [`BLOCK_SIZE`](block::BLOCK_SIZE)
//! * **Buffer pool**: [`NBUF`](block::NBUF) cached blocks hashed into
//!   [`NBUCKET`](block::NBUCKET) shards
//!
//! ## Configuration Management
//!
//! All values are `const` and checked by compile-time assertions next to
//! their definition. Subsystems that need different sizes in tests take them
//! as const generics that default to these values.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod block;
pub mod memory;
