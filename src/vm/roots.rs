use crate::util::tagged::TagMask;
use crate::util::Address;
use crate::vm::{ObjectKind, RefSlot};

/// Callback trait of [`RootProvider::push_roots`].
pub trait RootVisitor<K: ObjectKind> {
    /// Report a root slot that points to an object of kind `kind`.
    fn visit_root(&mut self, slot: Address, kind: K);
}

/// This lets us use closures as RootVisitor.
impl<K: ObjectKind, F: FnMut(Address, K)> RootVisitor<K> for F {
    fn visit_root(&mut self, slot: Address, kind: K) {
        self(slot, kind)
    }
}

/// The order in which the builder walks the roots of one provider. The layout of the archive
/// follows the walk order, so a provider whose natural order is not deterministic (such as a
/// hash table) must pick one of the sorted orders.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RootOrder {
    /// Walk the roots in the order they are pushed.
    AsPushed,
    /// Sort the roots by the address of the object they point to. Two roots pointing to the same
    /// object are a fatal error.
    SourceAddress,
    /// Sort the roots by [`ObjectKind::object_name`]. Two roots with the same name are a fatal
    /// error.
    Name,
}

/// Rewrites root slots to point to the archived copies of their objects.
pub struct RootRelocator<'a> {
    mask: TagMask,
    resolve: &'a dyn Fn(Address) -> Address,
}

impl<'a> RootRelocator<'a> {
    pub(crate) fn new(mask: TagMask, resolve: &'a dyn Fn(Address) -> Address) -> Self {
        Self { mask, resolve }
    }

    /// The address `object` has in the archive, or zero if references to it are cleared.
    pub fn resolve(&self, object: Address) -> Address {
        (self.resolve)(object)
    }

    /// Rewrite the root slot at `slot`. Null slots are left alone, tags are kept.
    pub fn relocate_slot(&self, slot: Address) {
        let slot = RefSlot::from_address(slot);
        if let Some(object) = slot.load_object(self.mask) {
            let new_object = self.resolve(object);
            if new_object.is_zero() {
                slot.clear();
            } else {
                slot.store(new_object, self.mask);
            }
        }
    }
}

/// A source of roots, such as a symbol table, a class dictionary or an array of well-known
/// classes.
///
/// The builder discovers every archived object by walking from the roots of its providers. Once
/// the objects are copied, it rewrites the roots to point to the copies and writes the non-null
/// roots into the archive in walk order. A provider must not move or resize its root slots while
/// it is being dumped.
pub trait RootProvider<K: ObjectKind> {
    /// A name for logging.
    fn name(&self) -> &'static str;

    /// The order in which the builder walks the roots.
    fn root_order(&self) -> RootOrder {
        RootOrder::AsPushed
    }

    /// Report every root slot. Null slots may be reported or skipped.
    fn push_roots(&mut self, visitor: &mut dyn RootVisitor<K>);

    /// Rewrite every root slot to point to the archived copy of its object.
    fn relocate_roots(&mut self, relocator: &RootRelocator) {
        let mut slots = vec![];
        self.push_roots(&mut |slot: Address, _kind: K| slots.push(slot));
        for slot in slots {
            relocator.relocate_slot(slot);
        }
    }

    /// Replace the roots with those of a mapped archive. `roots` holds the non-null roots in the
    /// order the builder walked them (see [`RootOrder`]), relocated to the mapped archive and
    /// with their tags.
    fn restore_roots(&mut self, roots: &[usize]);
}
