use std::ops::Range;

use crate::archive::source_obj::FollowMode;
use crate::util::Address;
use crate::vm::ObjectKind;

/// Decides what the builder does with each reachable object.
pub trait FollowPolicy<K: ObjectKind> {
    /// What to do with the object at `object`. Asked once per distinct object.
    fn follow_mode(&self, object: Address, kind: K) -> FollowMode;

    /// Does `addr` lie in a pre-existing archive? Pointers into such archives survive relocation
    /// unchanged.
    fn is_in_existing_region(&self, addr: Address) -> bool;
}

/// Points to objects in the given pre-existing archive ranges, clears references to excluded
/// objects, and copies everything else.
#[derive(Default, Clone, Debug)]
pub struct DefaultFollowPolicy {
    existing_regions: Vec<Range<Address>>,
}

impl DefaultFollowPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat `range` as a pre-existing archive, such as a base archive that is mapped while a
    /// dynamic archive is dumped on top of it.
    pub fn with_existing_region(mut self, range: Range<Address>) -> Self {
        assert!(range.start <= range.end);
        self.existing_regions.push(range);
        self
    }

    pub fn existing_regions(&self) -> &[Range<Address>] {
        &self.existing_regions
    }
}

impl<K: ObjectKind> FollowPolicy<K> for DefaultFollowPolicy {
    fn follow_mode(&self, object: Address, kind: K) -> FollowMode {
        if <Self as FollowPolicy<K>>::is_in_existing_region(self, object) {
            FollowMode::PointToExisting
        } else if kind.is_excluded(object) {
            FollowMode::Nullify
        } else {
            FollowMode::Copy
        }
    }

    fn is_in_existing_region(&self, addr: Address) -> bool {
        self.existing_regions.iter().any(|r| r.contains(&addr))
    }
}
