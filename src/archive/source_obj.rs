use std::collections::HashMap;

use strum_macros::{Display, IntoStaticStr};

use crate::util::bitmap::BitMap;
use crate::util::conversions::bytes_to_words_up;
use crate::util::Address;
use crate::vm::ObjectKind;

/// What the builder does with a reachable object.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum FollowMode {
    /// Copy the object into the archive and scan its fields.
    Copy,
    /// The object already lives in a pre-existing archive. Keep pointing to it.
    PointToExisting,
    /// Do not archive the object. References to it are cleared.
    Nullify,
}

/// Bookkeeping for one distinct source object.
#[derive(Debug)]
pub struct SourceObjInfo<K: ObjectKind> {
    source_address: Address,
    kind: K,
    follow_mode: FollowMode,
    read_only: bool,
    size_in_bytes: usize,
    /// `[ptrmap_start, ptrmap_end)` is the range of the owning list's pointer map that covers
    /// this object, one bit per word.
    ptrmap_start: usize,
    ptrmap_end: usize,
    dumped_address: Option<Address>,
}

impl<K: ObjectKind> SourceObjInfo<K> {
    pub fn new(
        source_address: Address,
        kind: K,
        follow_mode: FollowMode,
        read_only: bool,
        size_in_bytes: usize,
    ) -> Self {
        SourceObjInfo {
            source_address,
            kind,
            follow_mode,
            read_only,
            size_in_bytes,
            ptrmap_start: 0,
            ptrmap_end: 0,
            // An object in an existing archive keeps its address.
            dumped_address: (follow_mode == FollowMode::PointToExisting).then_some(source_address),
        }
    }

    pub fn source_address(&self) -> Address {
        self.source_address
    }
    pub fn kind(&self) -> K {
        self.kind
    }
    pub fn follow_mode(&self) -> FollowMode {
        self.follow_mode
    }
    pub fn should_copy(&self) -> bool {
        self.follow_mode == FollowMode::Copy
    }
    pub fn read_only(&self) -> bool {
        self.read_only
    }
    pub fn size_in_bytes(&self) -> usize {
        self.size_in_bytes
    }
    pub fn size_in_words(&self) -> usize {
        bytes_to_words_up(self.size_in_bytes)
    }
    pub fn ptrmap_start(&self) -> usize {
        self.ptrmap_start
    }
    pub fn ptrmap_end(&self) -> usize {
        self.ptrmap_end
    }

    /// The address of the archived copy. `None` before the object is copied, and forever for
    /// objects whose references are cleared.
    pub fn dumped_address(&self) -> Option<Address> {
        self.dumped_address
    }

    pub(crate) fn set_dumped_address(&mut self, addr: Address) {
        assert!(self.should_copy(), "only copied objects move");
        assert!(
            self.dumped_address.is_none(),
            "{} is copied twice",
            self.source_address
        );
        self.dumped_address = Some(addr);
    }

    /// Does `addr` point into this object?
    pub fn contains(&self, addr: Address) -> bool {
        self.source_address <= addr && addr < self.source_address + self.size_in_bytes
    }
}

/// All distinct source objects, keyed by source address. An object is entered the first time
/// it is reached and never again.
pub struct SourceObjTable<K: ObjectKind> {
    index: HashMap<Address, usize>,
    objs: Vec<SourceObjInfo<K>>,
}

/// The index of an entry of a [`SourceObjTable`].
pub type SourceObjId = usize;

impl<K: ObjectKind> Default for SourceObjTable<K> {
    fn default() -> Self {
        SourceObjTable {
            index: HashMap::new(),
            objs: vec![],
        }
    }
}

impl<K: ObjectKind> SourceObjTable<K> {
    pub fn lookup(&self, source_address: Address) -> Option<SourceObjId> {
        self.index.get(&source_address).copied()
    }

    pub fn get(&self, source_address: Address) -> Option<&SourceObjInfo<K>> {
        self.lookup(source_address).map(|id| &self.objs[id])
    }

    /// Enter a new object. Entering an address twice is a bug.
    pub fn insert(&mut self, info: SourceObjInfo<K>) -> SourceObjId {
        let id = self.objs.len();
        let prev = self.index.insert(info.source_address, id);
        assert!(
            prev.is_none(),
            "{} is already in the table",
            info.source_address
        );
        self.objs.push(info);
        id
    }

    pub fn at(&self, id: SourceObjId) -> &SourceObjInfo<K> {
        &self.objs[id]
    }

    pub fn at_mut(&mut self, id: SourceObjId) -> &mut SourceObjInfo<K> {
        &mut self.objs[id]
    }

    pub fn len(&self) -> usize {
        self.objs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceObjInfo<K>> {
        self.objs.iter()
    }
}

/// The objects bound for one region, in discovery order, with a pointer map covering all of
/// them back to back.
#[derive(Default)]
pub struct SourceObjList {
    objs: Vec<SourceObjId>,
    ptrmap: BitMap,
    total_words: usize,
}

impl SourceObjList {
    /// Append an object and give it the next range of the pointer map.
    pub fn append<K: ObjectKind>(&mut self, id: SourceObjId, table: &mut SourceObjTable<K>) {
        let info = table.at_mut(id);
        debug_assert!(info.should_copy(), "only copied objects are listed");
        info.ptrmap_start = self.total_words;
        self.total_words += info.size_in_words();
        info.ptrmap_end = self.total_words;
        self.ptrmap.resize(self.total_words);
        self.objs.push(id);
    }

    /// Remember that the word at `slot` of the listed object `info` is a pointer field.
    pub fn remember_embedded_pointer<K: ObjectKind>(
        &mut self,
        info: &SourceObjInfo<K>,
        slot: Address,
    ) {
        assert!(
            info.should_copy(),
            "only copied objects have pointer maps"
        );
        assert!(
            info.contains(slot),
            "slot {} is outside {:?} object {}",
            slot,
            info.kind,
            info.source_address
        );
        let field_word = slot.word_index_from(info.source_address);
        let bit = info.ptrmap_start + field_word;
        debug_assert!(bit < info.ptrmap_end, "sanity");
        self.ptrmap.set_bit(bit);
    }

    pub fn objs(&self) -> &[SourceObjId] {
        &self.objs
    }

    pub fn ptrmap(&self) -> &BitMap {
        &self.ptrmap
    }

    pub fn len(&self) -> usize {
        self.objs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objs.is_empty()
    }
}
