use std::collections::VecDeque;

use crate::util::tagged::TagMask;
use crate::util::Address;
use crate::vm::{ObjectKind, RefSlot, RefVisitor, SpecialRefKind};

/// A reference to a metadata object: a slot and the kind of the object it points to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MetaRef<K: ObjectKind> {
    slot: RefSlot,
    kind: K,
}

impl<K: ObjectKind> MetaRef<K> {
    pub fn new(slot: Address, kind: K) -> Self {
        MetaRef {
            slot: RefSlot::from_address(slot),
            kind,
        }
    }

    pub fn slot(&self) -> RefSlot {
        self.slot
    }

    pub fn kind(&self) -> K {
        self.kind
    }

    /// The object this reference points to. Zero for a null reference.
    pub fn obj(&self, mask: TagMask) -> Address {
        self.slot.load(mask).address()
    }
}

/// Callback trait of [`GraphWalker`].
pub trait RefClosure<K: ObjectKind> {
    /// Called for every non-null reference reached, including references to objects that were
    /// reached before. `enclosing` is the object holding the reference, or `None` for a root.
    /// Return true to have the walker scan the referenced object.
    fn do_ref(&mut self, enclosing: Option<Address>, r: &MetaRef<K>) -> bool;

    /// Called for every non-null special reference in a scanned object.
    fn do_special_ref(&mut self, _enclosing: Address, _kind: SpecialRefKind, _slot: Address) {}
}

enum Field<K> {
    Ref(Address, K),
    Special(SpecialRefKind, Address),
}

struct FieldCollector<K> {
    fields: Vec<Field<K>>,
}

impl<K: ObjectKind> RefVisitor<K> for FieldCollector<K> {
    fn visit_ref(&mut self, slot: Address, kind: K) {
        self.fields.push(Field::Ref(slot, kind));
    }

    fn visit_special_ref(&mut self, kind: SpecialRefKind, slot: Address) {
        self.fields.push(Field::Special(kind, slot));
    }
}

/// Walks the object graph from a set of roots.
///
/// The walker reports every reference it reaches to a [`RefClosure`] together with the object
/// enclosing the reference, and scans an object only when the closure asks for it. The closure
/// is responsible for remembering which objects it has seen. The walk keeps a queue of objects to
/// scan rather than recursing, so deep graphs cannot overflow the stack.
pub struct GraphWalker<K: ObjectKind> {
    mask: TagMask,
    pending: VecDeque<(Address, K)>,
    scanned_objects: usize,
}

impl<K: ObjectKind> GraphWalker<K> {
    pub fn new(mask: TagMask) -> Self {
        GraphWalker {
            mask,
            pending: VecDeque::new(),
            scanned_objects: 0,
        }
    }

    /// Walk everything reachable from the root `r` that the closure wants scanned.
    pub fn walk_from_root(&mut self, closure: &mut dyn RefClosure<K>, r: MetaRef<K>) {
        self.push(closure, None, r);
        self.finish(closure);
    }

    fn push(&mut self, closure: &mut dyn RefClosure<K>, enclosing: Option<Address>, r: MetaRef<K>) {
        let obj = r.obj(self.mask);
        if obj.is_zero() {
            return;
        }
        if closure.do_ref(enclosing, &r) {
            self.pending.push_back((obj, r.kind()));
        }
    }

    fn finish(&mut self, closure: &mut dyn RefClosure<K>) {
        while let Some((obj, kind)) = self.pending.pop_front() {
            let mut collector = FieldCollector { fields: vec![] };
            kind.scan_object(obj, &mut collector);
            self.scanned_objects += 1;
            for field in collector.fields {
                match field {
                    Field::Ref(slot, field_kind) => {
                        self.push(closure, Some(obj), MetaRef::new(slot, field_kind));
                    }
                    Field::Special(special_kind, slot) => {
                        if RefSlot::from_address(slot).load_raw() != 0 {
                            closure.do_special_ref(obj, special_kind, slot);
                        }
                    }
                }
            }
        }
    }

    /// The number of objects scanned so far.
    pub fn scanned_objects(&self) -> usize {
        self.scanned_objects
    }
}
