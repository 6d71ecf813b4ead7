use std::fmt::Debug;
use std::hash::Hash;

use crate::util::Address;

/// The kind of a metadata object. A kind tells the archive builder everything it needs to know
/// about an object: how big it is, which of its words are pointers, whether it may be archived,
/// and where it goes.
///
/// The builder never looks inside an object except through its kind. Kinds are small values
/// (typically a fieldless enum) and are passed by value.
pub trait ObjectKind: Copy + Eq + Hash + Ord + Debug + Send + Sync + 'static {
    /// A name for statistics and logging. Names must be unique among the kinds of one host,
    /// because the loader uses them to match restored dispatch tables.
    fn name(self) -> &'static str;

    /// The size of the object at `object` in bytes. The archived copy is padded to a word
    /// multiple.
    fn size_in_bytes(self, object: Address) -> usize;

    /// Report every pointer field of the object at `object` to `visitor`. Null fields may be
    /// reported or skipped. Every reported slot must lie within the object.
    fn scan_object(self, object: Address, visitor: &mut dyn RefVisitor<Self>);

    /// Is the object at `object` excluded from the archive? References to an excluded object are
    /// cleared in the archive.
    fn is_excluded(self, _object: Address) -> bool {
        false
    }

    /// Does the object go to the read-only region? Objects that the runtime writes after loading
    /// must return false.
    fn is_read_only(self, object: Address) -> bool;

    /// The dispatch table whose address objects of this kind store in their first word, if any.
    /// The archive holds a copy of each such table, and the first word of every archived object
    /// of this kind points to that copy. The loader refills the copies from the tables of the
    /// loading process.
    fn dispatch_table(self) -> Option<&'static [usize]> {
        None
    }

    /// Does an archived object of this kind get a one-word index slot in front of it?
    fn has_index_slot(self) -> bool {
        false
    }

    /// The name of the object, used to order roots by name. Kinds whose roots are ordered by
    /// name must return `Some`.
    fn object_name(self, _object: Address) -> Option<Vec<u8>> {
        None
    }
}

/// What a special reference points to. A special reference is a word that holds a raw address
/// which is not the start of an archived object, such as an entry point into generated code or a
/// pointer into the middle of another object.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, strum_macros::IntoStaticStr)]
pub enum SpecialRefKind {
    /// An entry point in the code region or in a pre-existing archive.
    MethodEntry,
    /// A pointer into the body of an archived object.
    InteriorPointer,
}

/// Callback trait of [`ObjectKind::scan_object`].
pub trait RefVisitor<K: ObjectKind> {
    /// Report the pointer field at `slot`, which points to an object of kind `kind` (or is null).
    fn visit_ref(&mut self, slot: Address, kind: K);

    /// Report a special reference at `slot`.
    fn visit_special_ref(&mut self, kind: SpecialRefKind, slot: Address);
}
