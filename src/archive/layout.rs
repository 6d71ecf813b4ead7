use enum_map::Enum;
use strum_macros::{Display, EnumIter, IntoStaticStr};

/// The regions of an archive, in file order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Enum, EnumIter, Display, IntoStaticStr)]
pub enum RegionId {
    /// Trampolines and the dispatch table copies. Mapped executable.
    #[strum(serialize = "mc")]
    Mc,
    /// Objects the runtime may write after loading.
    #[strum(serialize = "rw")]
    Rw,
    /// Objects that are never written after loading, followed by the serialized root data.
    #[strum(serialize = "ro")]
    Ro,
    /// The pointer bitmap. Not mapped; read by the loader when it has to relocate.
    #[strum(serialize = "bm")]
    Bm,
    /// Reserved for archived heap objects. Always empty.
    #[strum(serialize = "hp")]
    Hp,
}

pub const NUM_REGIONS: usize = 5;

static_assertions::const_assert_eq!(NUM_REGIONS, RegionId::Hp as usize + 1);

impl RegionId {
    /// The regions copied into the dump buffer and mapped contiguously at load time.
    pub const CORE_REGIONS: [RegionId; 3] = [RegionId::Mc, RegionId::Rw, RegionId::Ro];

    pub fn is_core(self) -> bool {
        Self::CORE_REGIONS.contains(&self)
    }

    /// Is the region mapped read-only when no relocation is needed?
    pub fn is_read_only(self) -> bool {
        self == RegionId::Ro
    }

    pub fn allow_exec(self) -> bool {
        self == RegionId::Mc
    }

    pub fn index(self) -> usize {
        self as usize
    }
}
