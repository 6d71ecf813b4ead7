//! A small object model for testing the builder and the loader.
//!
//! Every object is a run of words in a [`MockHeap`]. Word 0 is a header naming the kind, except
//! for [`MockKind::Klass`], whose word 0 is the address of its dispatch table. Objects are
//! bump-allocated, so objects created in the same order in two heaps have the same relative
//! addresses.

use crate::util::constants::BYTES_IN_WORD;
use crate::util::conversions::bytes_to_words_up;
use crate::util::Address;
use crate::vm::{ObjectKind, RefVisitor, RootOrder, RootProvider, RootVisitor, SpecialRefKind};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MockKind {
    /// `[header, value]`. Read-only.
    Leaf,
    /// `[header, left, right]`. Both fields point to any kind.
    Node,
    /// `[header, length, bytes...]`. Read-only.
    Symbol,
    /// `[dispatch, name, super, entry, profile, mirror, interior]`. `entry` and `interior` are
    /// special references. Has a dispatch table and an index slot.
    Klass,
    /// `[header, counter]`. Excluded from the archive.
    Profile,
    /// `[header, target]`. The target pointer carries tag bits.
    Tagged,
}

pub const LEAF_HEADER: usize = 0xA1;
pub const NODE_HEADER: usize = 0xA2;
pub const SYMBOL_HEADER: usize = 0xA3;
pub const PROFILE_HEADER: usize = 0xA5;
pub const TAGGED_HEADER: usize = 0xA6;

/// Stand-ins for the function pointers of a dispatch table.
pub static KLASS_DISPATCH: [usize; 4] = [0x1111, 0x2222, 0x3333, 0x4444];

pub mod klass_field {
    pub const DISPATCH: usize = 0;
    pub const NAME: usize = 1;
    pub const SUPER: usize = 2;
    pub const ENTRY: usize = 3;
    pub const PROFILE: usize = 4;
    pub const MIRROR: usize = 5;
    pub const INTERIOR: usize = 6;
    pub const WORDS: usize = 7;
}

fn word(obj: Address, index: usize) -> usize {
    unsafe { (obj + index * BYTES_IN_WORD).load::<usize>() }
}

/// Archived klasses point to a copy of the dispatch table, which holds the same entries once the
/// archive is built or restored.
fn is_dispatch_copy(w: usize) -> bool {
    w != 0
        && w % BYTES_IN_WORD == 0
        && unsafe { Address::from_usize(w).load::<usize>() } == KLASS_DISPATCH[0]
}

/// Strip any tag from a pointer word.
fn untag(w: usize) -> usize {
    w & !(BYTES_IN_WORD - 1)
}

impl MockKind {
    /// The kind of the object at `object`, from its first word.
    pub fn of(object: Address) -> MockKind {
        match word(object, 0) {
            LEAF_HEADER => MockKind::Leaf,
            NODE_HEADER => MockKind::Node,
            SYMBOL_HEADER => MockKind::Symbol,
            PROFILE_HEADER => MockKind::Profile,
            TAGGED_HEADER => MockKind::Tagged,
            w if w == KLASS_DISPATCH.as_ptr() as usize || is_dispatch_copy(w) => MockKind::Klass,
            w => panic!("{} is not a mock object (first word {:#x})", object, w),
        }
    }

    pub const ALL: [MockKind; 6] = [
        MockKind::Leaf,
        MockKind::Node,
        MockKind::Symbol,
        MockKind::Klass,
        MockKind::Profile,
        MockKind::Tagged,
    ];

    fn visit_field(object: Address, index: usize, visitor: &mut dyn RefVisitor<MockKind>) {
        let target = untag(word(object, index));
        if target != 0 {
            let target_kind = MockKind::of(unsafe { Address::from_usize(target) });
            visitor.visit_ref(object + index * BYTES_IN_WORD, target_kind);
        }
    }
}

impl ObjectKind for MockKind {
    fn name(self) -> &'static str {
        match self {
            MockKind::Leaf => "Leaf",
            MockKind::Node => "Node",
            MockKind::Symbol => "Symbol",
            MockKind::Klass => "Klass",
            MockKind::Profile => "Profile",
            MockKind::Tagged => "Tagged",
        }
    }

    fn size_in_bytes(self, object: Address) -> usize {
        let words = match self {
            MockKind::Leaf | MockKind::Profile | MockKind::Tagged => 2,
            MockKind::Node => 3,
            MockKind::Symbol => 2 + bytes_to_words_up(word(object, 1)),
            MockKind::Klass => klass_field::WORDS,
        };
        words * BYTES_IN_WORD
    }

    fn scan_object(self, object: Address, visitor: &mut dyn RefVisitor<MockKind>) {
        match self {
            MockKind::Leaf | MockKind::Symbol | MockKind::Profile => {}
            MockKind::Node => {
                MockKind::visit_field(object, 1, visitor);
                MockKind::visit_field(object, 2, visitor);
            }
            MockKind::Tagged => MockKind::visit_field(object, 1, visitor),
            MockKind::Klass => {
                MockKind::visit_field(object, klass_field::NAME, visitor);
                MockKind::visit_field(object, klass_field::SUPER, visitor);
                visitor.visit_special_ref(
                    SpecialRefKind::MethodEntry,
                    object + klass_field::ENTRY * BYTES_IN_WORD,
                );
                MockKind::visit_field(object, klass_field::PROFILE, visitor);
                MockKind::visit_field(object, klass_field::MIRROR, visitor);
                visitor.visit_special_ref(
                    SpecialRefKind::InteriorPointer,
                    object + klass_field::INTERIOR * BYTES_IN_WORD,
                );
            }
        }
    }

    fn is_excluded(self, _object: Address) -> bool {
        self == MockKind::Profile
    }

    fn is_read_only(self, _object: Address) -> bool {
        matches!(self, MockKind::Leaf | MockKind::Symbol)
    }

    fn dispatch_table(self) -> Option<&'static [usize]> {
        (self == MockKind::Klass).then_some(&KLASS_DISPATCH[..])
    }

    fn has_index_slot(self) -> bool {
        self == MockKind::Klass
    }

    fn object_name(self, object: Address) -> Option<Vec<u8>> {
        match self {
            MockKind::Symbol => Some(symbol_bytes(object)),
            MockKind::Klass => {
                let name = word(object, klass_field::NAME);
                Some(symbol_bytes(unsafe { Address::from_usize(name) }))
            }
            _ => None,
        }
    }
}

/// The bytes of the symbol at `symbol`.
pub fn symbol_bytes(symbol: Address) -> Vec<u8> {
    let len = word(symbol, 1);
    unsafe { (symbol + 2 * BYTES_IN_WORD).as_bytes(len) }.to_vec()
}

/// A bump-allocated arena of mock objects. Objects stay valid as long as the heap lives.
pub struct MockHeap {
    words: Box<[usize]>,
    cursor: usize,
}

impl Default for MockHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHeap {
    pub const DEFAULT_CAPACITY_WORDS: usize = 64 * 1024;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY_WORDS)
    }

    pub fn with_capacity(words: usize) -> Self {
        MockHeap {
            words: vec![0; words].into_boxed_slice(),
            cursor: 0,
        }
    }

    /// The address of the first object.
    pub fn start(&self) -> Address {
        Address::from_ptr(self.words.as_ptr())
    }

    fn alloc(&mut self, contents: &[usize]) -> Address {
        let start = self.cursor;
        assert!(
            start + contents.len() <= self.words.len(),
            "mock heap is full"
        );
        self.words[start..start + contents.len()].copy_from_slice(contents);
        self.cursor += contents.len();
        Address::from_ptr(&self.words[start])
    }

    pub fn leaf(&mut self, value: usize) -> Address {
        self.alloc(&[LEAF_HEADER, value])
    }

    pub fn node(&mut self, left: Address, right: Address) -> Address {
        self.alloc(&[NODE_HEADER, left.as_usize(), right.as_usize()])
    }

    pub fn symbol(&mut self, s: &str) -> Address {
        let mut contents = vec![SYMBOL_HEADER, s.len()];
        for chunk in s.as_bytes().chunks(BYTES_IN_WORD) {
            let mut buf = [0u8; BYTES_IN_WORD];
            buf[..chunk.len()].copy_from_slice(chunk);
            contents.push(usize::from_ne_bytes(buf));
        }
        self.alloc(&contents)
    }

    pub fn klass(&mut self, name: Address, super_klass: Address) -> Address {
        let mut contents = [0usize; klass_field::WORDS];
        contents[klass_field::DISPATCH] = KLASS_DISPATCH.as_ptr() as usize;
        contents[klass_field::NAME] = name.as_usize();
        contents[klass_field::SUPER] = super_klass.as_usize();
        self.alloc(&contents)
    }

    pub fn profile(&mut self, counter: usize) -> Address {
        self.alloc(&[PROFILE_HEADER, counter])
    }

    pub fn tagged(&mut self, target: Address, tag: usize) -> Address {
        self.alloc(&[TAGGED_HEADER, target.as_usize() | tag])
    }

    pub fn set_field(&mut self, object: Address, index: usize, value: usize) {
        unsafe { (object + index * BYTES_IN_WORD).store::<usize>(value) }
    }

    /// Roots walked in the order given.
    pub fn roots(&self, objects: &[Address]) -> MockRoots {
        MockRoots::new("mock-roots", RootOrder::AsPushed, objects)
    }
}

/// Read word `index` of the object at `object`.
pub fn field(object: Address, index: usize) -> usize {
    word(object, index)
}

/// A root provider holding a vector of root slots.
pub struct MockRoots {
    name: &'static str,
    order: RootOrder,
    slots: Vec<usize>,
}

impl MockRoots {
    pub fn new(name: &'static str, order: RootOrder, objects: &[Address]) -> Self {
        MockRoots {
            name,
            order,
            slots: objects.iter().map(|o| o.as_usize()).collect(),
        }
    }

    /// An empty provider to read roots back into.
    pub fn empty(name: &'static str) -> Self {
        Self::new(name, RootOrder::AsPushed, &[])
    }

    pub fn slot(&self, i: usize) -> Address {
        Address::from_ref(&self.slots[i])
    }

    pub fn get(&self, i: usize) -> Address {
        unsafe { Address::from_usize(self.slots[i]) }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl RootProvider<MockKind> for MockRoots {
    fn name(&self) -> &'static str {
        self.name
    }

    fn root_order(&self) -> RootOrder {
        self.order
    }

    fn push_roots(&mut self, visitor: &mut dyn RootVisitor<MockKind>) {
        for slot in self.slots.iter_mut() {
            let target = untag(*slot);
            if target != 0 {
                let kind = MockKind::of(unsafe { Address::from_usize(target) });
                visitor.visit_root(Address::from_mut_ptr(slot as *mut usize), kind);
            }
        }
    }

    fn restore_roots(&mut self, roots: &[usize]) {
        self.slots = roots.to_vec();
    }
}
