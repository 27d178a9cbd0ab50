//! # Kernel Buffer Cache
//!
//! An in-memory cache of disk blocks shared by every task. At most one buffer
//! exists per `(device, block)` at any time, and at most one task at a time
//! touches its bytes. Unreferenced buffers are recycled least recently
//! released first.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   BufferCache                        │
//! │    • acquire / read / commit / release / pin / unpin │
//! │    • cross-shard eviction scan, two locks at most    │
//! └───────┬─────────────────────────────────┬────────────┘
//!         │ block % NBUCKET                 │
//! ┌───────▼─────────────────────┐ ┌─────────▼───────────┐
//! │ Bucket × NBUCKET            │ │ BufSlot × NBUF      │
//! │  • SpinLock each            │ │  • refcnt, stamp    │
//! │  • slot-index linked list   │ │  • SleepLock content│
//! └─────────────────────────────┘ └─────────┬───────────┘
//!                                           │
//!                                 ┌─────────▼───────────┐
//!                                 │ BlockDevice         │
//!                                 └─────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kernel_bcache::{BlockDevice, BlockNo, BufferCache, DeviceError, DeviceId};
//! use kernel_info::block::BLOCK_SIZE;
//! use kernel_sync::SpinYield;
//!
//! struct Disk;
//! impl BlockDevice for Disk {
//!     fn read_block(&self, _: DeviceId, _: BlockNo, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), DeviceError> {
//!         buf.fill(0);
//!         Ok(())
//!     }
//!     fn write_block(&self, _: DeviceId, _: BlockNo, _: &[u8; BLOCK_SIZE]) -> Result<(), DeviceError> {
//!         Ok(())
//!     }
//! }
//!
//! let bcache: BufferCache<Disk, SpinYield> = BufferCache::new(Disk);
//! let mut b = bcache.read(1, 33).expect("superblock");
//! b.data_mut()[0] = 0xef;
//! bcache.commit(&b).expect("write back");
//! bcache.pin(&b); // keep it cached across the transaction
//! bcache.release(b);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod bucket;
mod buf;
pub mod cache;
pub mod device;
mod error;

pub use buf::BufHandle;
pub use cache::{BufferCache, CacheStats};
pub use device::{BlockDevice, BlockNo, DeviceError, DeviceId, NO_DEVICE};
pub use error::CacheError;
