//! Slots holding pointers to metadata objects.

use std::fmt;

use crate::util::tagged::{TagMask, TaggedAddress};
use crate::util::Address;

/// A word-sized location that holds a pointer to a metadata object, possibly with tag bits.
///
/// A slot can be a field of an object, a root held by the host, or a word in the dump buffer.
/// `RefSlot` has pointer semantics: it points to the slot, it is not the slot itself.
///
/// Loading a slot strips the tag and [`RefSlot::store`] keeps it, so relocating the pointer in a
/// slot never changes its tag bits.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct RefSlot {
    slot_addr: Address,
}

impl RefSlot {
    /// Create a slot at `slot_addr`, which must be word-aligned.
    pub fn from_address(slot_addr: Address) -> Self {
        debug_assert!(
            slot_addr.is_word_aligned(),
            "slot {} is not word-aligned",
            slot_addr
        );
        Self { slot_addr }
    }

    /// Get the address of the slot itself.
    pub fn as_address(&self) -> Address {
        self.slot_addr
    }

    /// The raw word in the slot, tag included.
    pub fn load_raw(&self) -> usize {
        unsafe { self.slot_addr.load::<usize>() }
    }

    /// The pointer in the slot, split into address and tag.
    pub fn load(&self, mask: TagMask) -> TaggedAddress {
        TaggedAddress::unpack(self.load_raw(), mask)
    }

    /// The object the slot points to, or `None` if the slot is null.
    pub fn load_object(&self, mask: TagMask) -> Option<Address> {
        let t = self.load(mask);
        (!t.is_null()).then_some(t.address())
    }

    /// Make the slot point to `object`, keeping the tag bits currently in the slot.
    pub fn store(&self, object: Address, mask: TagMask) {
        let t = self.load(mask).with_address(object);
        unsafe { t.store(self.slot_addr) }
    }

    /// Zero the whole word, tag included.
    pub fn clear(&self) {
        unsafe { self.slot_addr.store::<usize>(0) }
    }
}

impl fmt::Debug for RefSlot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "RefSlot({})", self.slot_addr)
    }
}
