use crate::archive::FollowPolicy;
use crate::vm::{ObjectKind, RootProvider};

/// The parts of a binding that a dump needs at the same time.
pub struct ArchiveParts<'a, K: ObjectKind> {
    pub follow_policy: &'a dyn FollowPolicy<K>,
    /// The providers in the order their roots are walked and serialized. Loading must use the
    /// same order.
    pub root_providers: Vec<&'a mut dyn RootProvider<K>>,
}

/// Ties together what a host has to provide to dump and map archives.
pub trait ArchiveBinding {
    type VMObjectKind: ObjectKind;

    /// Every kind of the host. The loader finds the dispatch table of an archived table copy by
    /// the name of its kind.
    fn kinds() -> &'static [Self::VMObjectKind];

    fn archive_parts(&mut self) -> ArchiveParts<'_, Self::VMObjectKind>;
}
