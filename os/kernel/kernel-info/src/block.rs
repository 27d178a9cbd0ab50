//! # Block I/O Geometry

/// Size of one disk block, and of one cached buffer's content.
pub const BLOCK_SIZE: usize = 1024;

/// Largest number of blocks a single file-system operation writes.
pub const MAX_OP_BLOCKS: usize = 10;

/// Number of buffers in the block cache.
pub const NBUF: usize = MAX_OP_BLOCKS * 3;

/// Number of hash shards the block cache is split into.
///
/// A small prime, so that sequential block numbers spread evenly and the
/// eviction scan over all shards stays short.
pub const NBUCKET: usize = 13;

const _: () = {
    assert!(BLOCK_SIZE.is_power_of_two());
    assert!(NBUF >= NBUCKET);
    assert!(NBUCKET > 0);
};
