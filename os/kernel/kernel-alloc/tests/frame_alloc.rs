use kernel_alloc::{CurrentCpu, Frame, FrameAllocInitError, FrameAllocator, PhysMapper, PhysicalAddress};
use kernel_info::memory::{FRAME_ALLOC_FILL, FRAME_FREE_FILL, PAGE_SIZE};
use std::cell::{Cell, UnsafeCell};
use std::collections::HashSet;
use std::panic;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

/// Where our fake RAM starts in "physical" address space.
const RAM_BASE: u64 = 0x8000_0000;

/// Bytes at the start of a free frame that hold the free-list link.
const LINK_BYTES: usize = 16;

/// A 4 KiB-aligned raw frame. We use this as our "physical RAM" backing store in tests.
#[repr(align(4096))]
struct Page(UnsafeCell<[u8; PAGE_SIZE]>);

struct Ram {
    pages: Box<[Page]>,
}

// Safety: the allocator only touches a page while it owns it.
unsafe impl Sync for Ram {}

/// A tiny in-memory "RAM" plus an HHDM-style mapper. Physical address
/// `RAM_BASE + i * 4096` is page `i` of the buffer.
#[derive(Clone)]
struct TestPhys(Arc<Ram>);

impl TestPhys {
    fn with_frames(n: usize) -> Self {
        let pages = (0..n).map(|_| Page(UnsafeCell::new([0; PAGE_SIZE]))).collect();
        Self(Arc::new(Ram { pages }))
    }

    fn start(&self) -> PhysicalAddress {
        PhysicalAddress::new(RAM_BASE)
    }

    fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new(RAM_BASE + (self.0.pages.len() * PAGE_SIZE) as u64)
    }

    fn bytes(&self, frame: Frame) -> [u8; PAGE_SIZE] {
        *unsafe { self.frame_bytes(frame) }
    }
}

impl PhysMapper for TestPhys {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let off = pa.as_u64() - RAM_BASE;
        let idx = (off >> 12) as usize;
        let within = (off & 0xfff) as usize;
        unsafe { &mut *self.0.pages[idx].0.get().cast::<u8>().add(within).cast::<T>() }
    }
}

thread_local! {
    static CPU: Cell<usize> = const { Cell::new(0) };
}

/// Each test thread pretends to run on whatever core it last switched to.
struct TestCpu;

impl CurrentCpu for TestCpu {
    fn current_cpu() -> usize {
        CPU.with(Cell::get)
    }
}

fn on_cpu(cpu: usize) {
    CPU.with(|c| c.set(cpu));
}

type Kmem<const NCPU: usize> = FrameAllocator<TestPhys, TestCpu, NCPU, 64>;

fn kmem<const NCPU: usize>(frames: usize) -> (Arc<Kmem<NCPU>>, TestPhys) {
    let ram = TestPhys::with_frames(frames);
    let kmem = Arc::new(Kmem::<NCPU>::new(ram.clone()));
    let managed = unsafe { kmem.init(ram.start(), ram.end()) }.expect("init");
    assert_eq!(managed, frames);
    (kmem, ram)
}

fn frame(index: u64) -> Frame {
    Frame::containing(PhysicalAddress::new(RAM_BASE)).offset(index)
}

#[test]
fn init_partitions_range_across_cores() {
    let (kmem, ram) = kmem::<4>(16);
    assert_eq!(kmem.managed_frames(), 16);
    assert_eq!(kmem.free_frames(), 16);
    for cpu in 0..4 {
        assert_eq!(kmem.free_frames_on(cpu), 4);
    }
    // Free frames are scrubbed and unshared.
    let f = frame(9);
    assert!(kmem.contains(f));
    assert_eq!(kmem.share_count(f), 0);
    assert!(ram.bytes(f)[LINK_BYTES..].iter().all(|&b| b == FRAME_FREE_FILL));
}

#[test]
fn init_rounds_to_whole_frames() {
    let ram = TestPhys::with_frames(8);
    let kmem = Kmem::<2>::new(ram.clone());
    let start = PhysicalAddress::new(RAM_BASE + 1);
    let end = PhysicalAddress::new(RAM_BASE + 8 * PAGE_SIZE as u64 - 1);
    assert_eq!(unsafe { kmem.init(start, end) }, Ok(6));
    assert!(!kmem.contains(frame(0)));
    assert!(kmem.contains(frame(1)));
    assert!(kmem.contains(frame(6)));
    assert!(!kmem.contains(frame(7)));
}

#[test]
fn init_rejects_bad_ranges() {
    let ram = TestPhys::with_frames(4);
    let kmem = Kmem::<2>::new(ram.clone());

    let start = PhysicalAddress::new(RAM_BASE + 10);
    let end = PhysicalAddress::new(RAM_BASE + 100);
    assert_eq!(
        unsafe { kmem.init(start, end) },
        Err(FrameAllocInitError::EmptyRange { start, end })
    );

    let huge = PhysicalAddress::new(RAM_BASE + 65 * PAGE_SIZE as u64);
    assert_eq!(
        unsafe { kmem.init(ram.start(), huge) },
        Err(FrameAllocInitError::TooLarge {
            frames: 65,
            capacity: 64
        })
    );

    assert_eq!(unsafe { kmem.init(ram.start(), ram.end()) }, Ok(4));
    assert_eq!(
        unsafe { kmem.init(ram.start(), ram.end()) },
        Err(FrameAllocInitError::AlreadyInitialized)
    );
}

#[test]
fn uninitialized_allocator_is_empty() {
    let kmem = Kmem::<2>::new(TestPhys::with_frames(1));
    assert_eq!(kmem.allocate(), None);
    assert_eq!(kmem.managed_frames(), 0);
    assert!(!kmem.contains(frame(0)));
}

#[test]
fn allocate_fills_and_free_scrubs() {
    let (kmem, ram) = kmem::<2>(4);
    on_cpu(1);

    let f = kmem.allocate().expect("frame");
    assert_eq!(kmem.share_count(f), 1);
    assert!(ram.bytes(f).iter().all(|&b| b == FRAME_ALLOC_FILL));
    assert_eq!(kmem.free_frames_on(1), 1);

    kmem.free(f);
    assert_eq!(kmem.share_count(f), 0);
    assert!(ram.bytes(f)[LINK_BYTES..].iter().all(|&b| b == FRAME_FREE_FILL));
    assert_eq!(kmem.free_frames_on(1), 2);
}

#[test]
fn freed_frame_goes_to_the_freeing_core() {
    let (kmem, _ram) = kmem::<2>(4);
    on_cpu(0);
    let f = kmem.allocate().expect("frame");
    assert_eq!(kmem.free_frames_on(0), 1);

    on_cpu(1);
    kmem.free(f);
    assert_eq!(kmem.free_frames_on(0), 1);
    assert_eq!(kmem.free_frames_on(1), 3);

    // Core 1 pops it first: it sits on top of core 1's list.
    assert_eq!(kmem.allocate(), Some(f));
}

#[test]
fn exhausted_core_steals_in_ascending_order() {
    let (kmem, _ram) = kmem::<4>(16);
    on_cpu(3);

    let own: Vec<_> = (0..4).map(|_| kmem.allocate().unwrap()).collect();
    assert_eq!(own, (12..16).map(frame).collect::<Vec<_>>());
    assert_eq!(kmem.free_frames_on(3), 0);

    // Core 0 is the lowest id, so it is robbed first, one frame per call.
    assert_eq!(kmem.allocate(), Some(frame(0)));
    assert_eq!(kmem.free_frames_on(0), 3);
    assert_eq!(kmem.free_frames_on(1), 4);

    for expected in 1..4 {
        assert_eq!(kmem.allocate(), Some(frame(expected)));
    }
    // Core 0 is dry now; core 1 is next.
    assert_eq!(kmem.allocate(), Some(frame(4)));
    assert_eq!(kmem.free_frames_on(2), 4);
}

#[test]
fn allocate_returns_none_when_everything_is_taken() {
    let (kmem, _ram) = kmem::<2>(2);
    let a = kmem.allocate().unwrap();
    let b = kmem.allocate().unwrap();
    assert_ne!(a, b);
    assert_eq!(kmem.allocate(), None);

    kmem.free(b);
    assert_eq!(kmem.allocate(), Some(b));
}

#[test]
fn shared_frame_survives_until_last_release() {
    let (kmem, _ram) = kmem::<1>(2);
    let f = kmem.allocate().unwrap();

    assert_eq!(kmem.retain(f), 2);
    assert_eq!(kmem.retain(f), 3);
    assert_eq!(kmem.release_count(f), 2);
    kmem.free(f);
    assert_eq!(kmem.share_count(f), 1);
    assert_eq!(kmem.free_frames(), 1, "frame recycled while still mapped");

    assert_eq!(kmem.release_count(f), 0);
    assert_eq!(kmem.free_frames(), 2);
}

#[test]
#[should_panic(expected = "double free")]
fn double_free_is_fatal() {
    let (kmem, _ram) = kmem::<1>(2);
    let f = kmem.allocate().unwrap();
    kmem.free(f);
    kmem.free(f);
}

#[test]
#[should_panic(expected = "outside the managed range")]
fn freeing_foreign_frame_is_fatal() {
    let (kmem, _ram) = kmem::<1>(2);
    kmem.free(frame(2));
}

#[test]
#[should_panic(expected = "share of free frame")]
fn retaining_free_frame_is_fatal() {
    let (kmem, _ram) = kmem::<1>(2);
    kmem.retain(frame(0));
}

#[test]
fn double_free_does_not_corrupt_lists() {
    let (kmem, _ram) = kmem::<1>(2);
    let f = kmem.allocate().unwrap();
    kmem.free(f);

    let res = panic::catch_unwind(panic::AssertUnwindSafe(|| kmem.free(f)));
    assert!(res.is_err());
    // Still exactly two frames, each listed once.
    assert_eq!(kmem.free_frames(), 2);
    let a = kmem.allocate().unwrap();
    let b = kmem.allocate().unwrap();
    assert_ne!(a, b);
    assert_eq!(kmem.allocate(), None);
}

#[test]
fn racing_stealers_get_the_last_frame_once() {
    for _ in 0..50 {
        let (kmem, _ram) = kmem::<3>(3);

        // Cores 0 and 1 drain their own lists; only core 2's frame is left.
        on_cpu(0);
        let held0 = kmem.allocate().unwrap();
        on_cpu(1);
        let held1 = kmem.allocate().unwrap();
        assert_eq!(kmem.free_frames_on(2), 1);

        let start = Arc::new(Barrier::new(2));
        let handles: Vec<_> = [0, 1]
            .into_iter()
            .map(|cpu| {
                let kmem = Arc::clone(&kmem);
                let start = Arc::clone(&start);
                thread::spawn(move || {
                    on_cpu(cpu);
                    start.wait();
                    kmem.allocate()
                })
            })
            .collect();

        let got: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners: Vec<_> = got.iter().flatten().collect();
        assert_eq!(winners, vec![&frame(2)], "got {got:?}");
        kmem.free(held0);
        kmem.free(held1);
    }
}

#[test]
fn concurrent_allocations_never_alias() {
    const CPUS: usize = 4;
    const FRAMES: usize = 32;
    let (kmem, ram) = kmem::<CPUS>(FRAMES);

    let live = Arc::new(Mutex::new(HashSet::new()));
    let start = Arc::new(Barrier::new(CPUS));

    let handles: Vec<_> = (0..CPUS)
        .map(|cpu| {
            let kmem = Arc::clone(&kmem);
            let live = Arc::clone(&live);
            let start = Arc::clone(&start);
            let ram = ram.clone();
            thread::spawn(move || {
                on_cpu(cpu);
                start.wait();
                for round in 0..200 {
                    // Grab more than our share so we regularly steal and starve.
                    let mut mine = Vec::new();
                    for _ in 0..(FRAMES / CPUS + round % 5) {
                        if let Some(f) = kmem.allocate() {
                            assert!(live.lock().unwrap().insert(f), "{f:?} handed out twice");
                            assert_eq!(kmem.share_count(f), 1);
                            mine.push(f);
                        }
                    }
                    for &f in &mine {
                        // Tag the frame and make sure nobody else scribbled on it.
                        let bytes = unsafe { ram.frame_bytes(f) };
                        bytes[100] = cpu as u8;
                        thread::yield_now();
                        assert_eq!(bytes[100], cpu as u8);
                    }
                    for f in mine {
                        assert!(live.lock().unwrap().remove(&f));
                        kmem.free(f);
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert!(live.lock().unwrap().is_empty());
    assert_eq!(kmem.free_frames(), FRAMES);
    for i in 0..FRAMES as u64 {
        assert_eq!(kmem.share_count(frame(i)), 0);
    }
}
