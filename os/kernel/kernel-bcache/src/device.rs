//! # Storage driver interface

use kernel_info::block::BLOCK_SIZE;

/// Identifies a block device.
pub type DeviceId = u32;

/// Reserved device id carried by buffers that never held a block.
pub const NO_DEVICE: DeviceId = DeviceId::MAX;

/// Block number within a device.
pub type BlockNo = u32;

/// Synchronous block storage underneath the cache.
///
/// Both calls may put the calling task to sleep until the transfer is done.
/// The cache invokes them only while it holds the buffer's content lock and
/// never while it holds a shard lock.
pub trait BlockDevice: Sync {
    /// Fill `buf` with the contents of `block` on `device`.
    ///
    /// # Errors
    /// Whatever the driver reports; the buffer stays invalid.
    fn read_block(
        &self,
        device: DeviceId,
        block: BlockNo,
        buf: &mut [u8; BLOCK_SIZE],
    ) -> Result<(), DeviceError>;

    /// Persist `buf` as the contents of `block` on `device`.
    ///
    /// # Errors
    /// Whatever the driver reports.
    fn write_block(
        &self,
        device: DeviceId,
        block: BlockNo,
        buf: &[u8; BLOCK_SIZE],
    ) -> Result<(), DeviceError>;
}

/// Failures reported by a [`BlockDevice`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("no such device: {0}")]
    NoDevice(DeviceId),
    #[error("block {block} is past the end of device {device}")]
    OutOfRange { device: DeviceId, block: BlockNo },
    #[error("device {0} reported an I/O error")]
    Io(DeviceId),
}
