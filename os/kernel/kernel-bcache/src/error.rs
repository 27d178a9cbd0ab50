use crate::device::{BlockNo, DeviceError, DeviceId};

/// Recoverable buffer cache failures.
///
/// Only storage errors end up here. Broken invariants (releasing a buffer
/// that is not held, running out of evictable buffers) panic instead.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("failed to read block {block} of device {device}")]
    Read {
        device: DeviceId,
        block: BlockNo,
        #[source]
        source: DeviceError,
    },
    #[error("failed to write block {block} of device {device}")]
    Write {
        device: DeviceId,
        block: BlockNo,
        #[source]
        source: DeviceError,
    },
}
