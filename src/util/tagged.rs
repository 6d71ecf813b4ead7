//! Tagged pointer words.
//!
//! An embedded pointer may carry a small tag in its low bits. Relocation must change only the
//! address part of such a word and keep the tag bits intact. Every read of a pointer field goes
//! through [`TaggedAddress::unpack`] and every write through [`TaggedAddress::pack`].

use std::fmt;

use crate::util::constants::BYTES_IN_ADDRESS;
use crate::util::Address;

/// The bits of a pointer word that hold the tag.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct TagMask(usize);

impl TagMask {
    /// A mask with no tag bits. Every word is a plain address.
    pub const NONE: TagMask = TagMask(0);

    /// Create a tag mask. Returns `None` if the mask uses bits that an aligned address may occupy.
    pub const fn new(mask: usize) -> Option<TagMask> {
        if Self::is_valid(mask) {
            Some(TagMask(mask))
        } else {
            None
        }
    }

    /// Is `mask` usable as a tag mask? Tags must fit below the word alignment of objects.
    pub const fn is_valid(mask: usize) -> bool {
        mask & !(BYTES_IN_ADDRESS - 1) == 0
    }

    pub const fn bits(self) -> usize {
        self.0
    }
}

/// A pointer word split into its address and its tag.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct TaggedAddress {
    address: Address,
    tag: usize,
}

impl TaggedAddress {
    /// Split a raw word loaded from a pointer field.
    pub fn unpack(word: usize, mask: TagMask) -> TaggedAddress {
        TaggedAddress {
            // Safe: the word was loaded from a pointer field.
            address: unsafe { Address::from_usize(word & !mask.0) },
            tag: word & mask.0,
        }
    }

    /// Load and split the pointer word stored at `slot`.
    ///
    /// # Safety
    /// `slot` must be a readable, word-aligned location.
    pub unsafe fn load(slot: Address, mask: TagMask) -> TaggedAddress {
        Self::unpack(slot.load::<usize>(), mask)
    }

    /// Combine address and tag into a raw word.
    pub fn pack(self) -> usize {
        debug_assert!(
            self.address.and(self.tag) == 0,
            "address {} overlaps tag {:#x}",
            self.address,
            self.tag
        );
        self.address.as_usize() | self.tag
    }

    /// Pack and store this word at `slot`.
    ///
    /// # Safety
    /// `slot` must be a writable, word-aligned location.
    pub unsafe fn store(self, slot: Address) {
        slot.store::<usize>(self.pack())
    }

    /// The same tag with a different address.
    pub fn with_address(self, address: Address) -> TaggedAddress {
        TaggedAddress {
            address,
            tag: self.tag,
        }
    }

    pub fn address(self) -> Address {
        self.address
    }

    pub fn tag(self) -> usize {
        self.tag
    }

    /// A word is null if its address part is zero, whatever its tag.
    pub fn is_null(self) -> bool {
        self.address.is_zero()
    }
}

impl fmt::Debug for TaggedAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}|{:#x}", self.address, self.tag)
    }
}
