use crate::util::bitmap::BitMap;
use crate::util::Address;

/// Marks the words of the dump buffer that hold pointers.
///
/// Bit `i` stands for the word at `ptr_base + i * BYTES_IN_WORD`. A marked word holds either an
/// address inside the buffer, an address inside a pre-existing archive, or (temporarily) zero.
/// The map is persisted in the archive so that the loader can relocate the archive.
pub struct ArchivePtrMarker {
    ptrmap: BitMap,
    ptr_base: Address,
    ptr_end: Address,
    compacted: bool,
}

impl ArchivePtrMarker {
    /// Create a marker for the buffer range `[ptr_base, ptr_end)`.
    pub fn new(ptr_base: Address, ptr_end: Address) -> Self {
        assert!(ptr_base.is_word_aligned() && ptr_end.is_word_aligned());
        ArchivePtrMarker {
            ptrmap: BitMap::new(0),
            ptr_base,
            ptr_end,
            compacted: false,
        }
    }

    fn bit_of(&self, loc: Address) -> usize {
        assert!(
            self.ptr_base <= loc && loc < self.ptr_end,
            "pointer location {} outside the buffer [{}, {})",
            loc,
            self.ptr_base,
            self.ptr_end
        );
        loc.word_index_from(self.ptr_base)
    }

    /// Mark the word at `loc` as a pointer, unless it holds zero.
    pub fn mark_pointer(&mut self, loc: Address) {
        assert!(!self.compacted, "cannot be marked after compaction");
        let bit = self.bit_of(loc);
        if bit >= self.ptrmap.size() {
            self.ptrmap.resize(bit + 1);
        }
        // Zero words need no relocation.
        if unsafe { loc.load::<usize>() } != 0 {
            self.ptrmap.set_bit(bit);
        }
    }

    /// Forget that the word at `loc` holds a pointer.
    pub fn clear_pointer(&mut self, loc: Address) {
        let bit = self.bit_of(loc);
        if bit < self.ptrmap.size() {
            self.ptrmap.clear_bit(bit);
        }
    }

    /// Store `value` at `loc` and mark it.
    pub fn set_and_mark_pointer(&mut self, loc: Address, value: usize) {
        unsafe { loc.store::<usize>(value) };
        self.mark_pointer(loc);
    }

    pub fn is_marked(&self, loc: Address) -> bool {
        let bit = self.bit_of(loc);
        bit < self.ptrmap.size() && self.ptrmap.at(bit)
    }

    /// Drop all bits after `max_non_null_offset`. No word may be marked afterwards.
    pub fn compact(&mut self, max_non_null_offset: usize) {
        assert!(!self.compacted, "cannot compact again");
        self.ptrmap.resize(max_non_null_offset + 1);
        self.compacted = true;
    }

    pub fn ptrmap(&self) -> &BitMap {
        &self.ptrmap
    }

    pub(crate) fn ptrmap_mut(&mut self) -> &mut BitMap {
        &mut self.ptrmap
    }

    pub fn ptr_base(&self) -> Address {
        self.ptr_base
    }

    pub fn ptr_end(&self) -> Address {
        self.ptr_end
    }
}
