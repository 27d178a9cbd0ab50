use core::fmt;
use core::ops::{Add, Sub};
use kernel_info::memory::{PAGE_SHIFT, PAGE_SIZE, page_round_down, page_round_up};

/// Physical memory address.
///
/// A thin wrapper around a `u64` that denotes a **physical** address, so it
/// cannot be confused with a pointer or a virtual address. Turn it into
/// something dereferenceable through a [`PhysMapper`](crate::PhysMapper).
///
/// ### Examples
/// ```rust
/// # use kernel_alloc::PhysicalAddress;
/// let pa = PhysicalAddress::new(0x8000_1042);
/// assert_eq!(pa.align_down().as_u64(), 0x8000_1000);
/// assert_eq!(pa.align_up().as_u64(), 0x8000_2000);
/// assert!(!pa.is_page_aligned());
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.0.is_multiple_of(PAGE_SIZE as u64)
    }

    #[inline]
    #[must_use]
    pub const fn align_up(self) -> Self {
        Self(page_round_up(self.0))
    }

    #[inline]
    #[must_use]
    pub const fn align_down(self) -> Self {
        Self(page_round_down(self.0))
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA(0x{:016X})", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<u64> for PhysicalAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl Add<u64> for PhysicalAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl Sub for PhysicalAddress {
    type Output = u64;
    #[inline]
    fn sub(self, rhs: Self) -> u64 {
        self.0 - rhs.0
    }
}

/// One [`PAGE_SIZE`] frame of physical memory, named by its start address.
///
/// A `Frame` is only a name. Whether it is free, allocated, or shared
/// between address spaces is tracked by the
/// [`FrameAllocator`](crate::FrameAllocator) that manages it.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Frame(PhysicalAddress);

impl Frame {
    /// The frame starting at `pa`, or `None` if `pa` is not page aligned.
    #[inline]
    #[must_use]
    pub const fn from_start_address(pa: PhysicalAddress) -> Option<Self> {
        if pa.is_page_aligned() {
            Some(Self(pa))
        } else {
            None
        }
    }

    /// The frame that contains `pa`.
    #[inline]
    #[must_use]
    pub const fn containing(pa: PhysicalAddress) -> Self {
        Self(pa.align_down())
    }

    #[inline]
    #[must_use]
    pub const fn start_address(self) -> PhysicalAddress {
        self.0
    }

    /// Global frame number (`address >> PAGE_SHIFT`).
    #[inline]
    #[must_use]
    pub const fn number(self) -> u64 {
        self.0.as_u64() >> PAGE_SHIFT
    }

    /// The frame `n` frames above this one.
    #[inline]
    #[must_use]
    pub const fn offset(self, n: u64) -> Self {
        Self(PhysicalAddress::new(self.0.as_u64() + (n << PAGE_SHIFT)))
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame(0x{:016X})", self.0.as_u64())
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
