use std::path::Path;

pub use crate::archive::{ArchiveBuilder, DefaultFollowPolicy, MapArchiveError, MappedArchive, RegionId};
pub use crate::memory_manager::{self, ArchiveBuilderOptions};
pub use crate::util::constants::{BYTES_IN_MBYTE, BYTES_IN_WORD};
pub use crate::util::options::RelocationMode;
pub use crate::util::test_util::mock_graph::*;
pub(crate) use crate::util::test_util::{serial_test, MmapTestRegion};
pub use crate::util::Address;
pub use crate::vm::{ArchiveBinding, ArchiveParts, RootOrder, RootProvider};

/// A binding over mock objects: a set of root providers and a follow policy.
pub struct MockBinding {
    pub policy: DefaultFollowPolicy,
    pub roots: Vec<MockRoots>,
}

impl MockBinding {
    pub fn new(roots: Vec<MockRoots>) -> Self {
        MockBinding {
            policy: DefaultFollowPolicy::new(),
            roots,
        }
    }

    /// A binding with empty providers of the given names, to read roots back into.
    pub fn empty(names: &[&'static str]) -> Self {
        Self::new(names.iter().map(|&name| MockRoots::empty(name)).collect())
    }
}

impl ArchiveBinding for MockBinding {
    type VMObjectKind = MockKind;

    fn kinds() -> &'static [MockKind] {
        &MockKind::ALL
    }

    fn archive_parts(&mut self) -> ArchiveParts<'_, MockKind> {
        ArchiveParts {
            follow_policy: &self.policy,
            root_providers: self
                .roots
                .iter_mut()
                .map(|r| r as &mut dyn RootProvider<MockKind>)
                .collect(),
        }
    }
}

/// Options for an archive requested at the start of `region`, small enough for tests.
pub(crate) fn test_options(region: &MmapTestRegion) -> ArchiveBuilderOptions {
    let mut builder = ArchiveBuilderOptions::new_no_env_vars();
    builder.options.shared_base_address = region.start;
    builder.options.archive_reserve_size = 16 * BYTES_IN_MBYTE;
    builder.options.use_compressed_class_pointers = false;
    builder
}

/// Run `test` serially with a path for an archive file in a fresh temporary directory.
pub fn with_archive_file<F: FnOnce(&Path)>(name: &str, test: F) {
    serial_test(|| {
        let dir = tempfile::tempdir().unwrap();
        test(&dir.path().join(name));
    })
}

pub fn addr(w: usize) -> Address {
    unsafe { Address::from_usize(w) }
}
