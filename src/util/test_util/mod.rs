use crate::util::address::{Address, ByteSize};
use crate::util::constants::BYTES_IN_GBYTE;
use std::panic;
use std::sync::Mutex;

pub mod mock_graph;

// Tests that dump or map archives ask for fixed base addresses. We want to ensure that the
// requested ranges do not overlap for different tests, so we organize them here. Each region is
// large enough for the archive reservation plus the class space used by the tests.

pub(crate) struct MmapTestRegion {
    pub start: Address,
    pub size: ByteSize,
}
impl MmapTestRegion {
    pub const fn reserve_after(prev: MmapTestRegion, size: ByteSize) -> MmapTestRegion {
        Self::reserve_after_address(prev.start.add(prev.size), size)
    }
    pub const fn reserve_after_address(addr: Address, size: ByteSize) -> MmapTestRegion {
        MmapTestRegion { start: addr, size }
    }
}

// The address is chosen empirically: far above the usual heap and far below shared libraries.
const TEST_ADDRESS: Address = unsafe { Address::from_usize(0x10_0000_0000) };
const TEST_REGION_SIZE: ByteSize = BYTES_IN_GBYTE;

// archive::reserve
pub(crate) const RESERVE_TEST_REGION: MmapTestRegion =
    MmapTestRegion::reserve_after_address(TEST_ADDRESS, TEST_REGION_SIZE);
// archive::builder
pub(crate) const BUILDER_TEST_REGION: MmapTestRegion =
    MmapTestRegion::reserve_after(RESERVE_TEST_REGION, TEST_REGION_SIZE);
// tests::mock_test_rebase
pub(crate) const REBASE_TEST_REGION: MmapTestRegion =
    MmapTestRegion::reserve_after(BUILDER_TEST_REGION, TEST_REGION_SIZE);
// tests::mock_test_dump_and_map
pub(crate) const DUMP_AND_MAP_TEST_REGION: MmapTestRegion =
    MmapTestRegion::reserve_after(REBASE_TEST_REGION, TEST_REGION_SIZE);
// tests::mock_test_determinism
pub(crate) const DETERMINISM_TEST_REGION: MmapTestRegion =
    MmapTestRegion::reserve_after(DUMP_AND_MAP_TEST_REGION, TEST_REGION_SIZE);
// tests::mock_test_random_graph
pub(crate) const RANDOM_GRAPH_TEST_REGION: MmapTestRegion =
    MmapTestRegion::reserve_after(DETERMINISM_TEST_REGION, TEST_REGION_SIZE);

lazy_static! {
    // A global lock to make tests serial.
    // If we do want more parallelism, we can allow each set of tests to have their own locks. But it seems unnecessary for now.
    static ref SERIAL_TEST_LOCK: Mutex<()> = Mutex::default();
}

// force some tests to be executed serially
pub fn serial_test<F>(f: F)
where
    F: FnOnce(),
{
    // If one test fails, the lock will become poisoned. We would want to continue for other tests anyway.
    let _guard = SERIAL_TEST_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    f();
}

// Always execute a cleanup closure no matter the test panics or not.
pub fn with_cleanup<T, C>(test: T, cleanup: C)
where
    T: FnOnce() + panic::UnwindSafe,
    C: FnOnce(),
{
    let res = panic::catch_unwind(test);
    cleanup();
    if let Err(e) = res {
        panic::resume_unwind(e);
    }
}
