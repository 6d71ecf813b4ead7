use std::fs::File;
use std::io::Result;

use crate::util::address::Address;

/// Abstraction for the OS memory operations used by the dump buffer and the archive loader.
///
/// Address ranges go through three states: reserved (no access, no backing memory), committed
/// (readable and writable, zero-filled on first touch) and released.
pub trait Memory {
    /// Whether a file can be mapped over part of a range previously reserved by [`Memory::reserve`].
    /// If false, archive regions are read into committed memory instead.
    const CAN_MAP_INTO_RESERVATION: bool;

    /// Set a memory region to zero.
    fn zero(start: Address, len: usize) {
        Self::set(start, 0, len);
    }

    /// Set a memory region to a specific value.
    fn set(start: Address, val: u8, len: usize) {
        unsafe {
            std::ptr::write_bytes::<u8>(start.to_mut_ptr(), val, len);
        }
    }

    /// Reserve `size` bytes of address space without backing memory.
    ///
    /// If `requested` is given, the range must start exactly there or the call fails (and no
    /// memory stays reserved). Otherwise the OS picks a range starting at a multiple of
    /// `alignment`.
    fn reserve(
        requested: Option<Address>,
        size: usize,
        alignment: usize,
        annotation: &MmapAnnotation<'_>,
    ) -> Result<Address>;

    /// Release a reserved range, or any part of it.
    fn release(start: Address, size: usize) -> Result<()>;

    /// Make part of a reserved range accessible. Committing an already committed range is
    /// harmless and keeps its contents.
    fn commit(start: Address, size: usize, prot: MmapProtection) -> Result<()>;

    /// Change the protection of a committed or mapped range.
    fn protect(start: Address, size: usize, prot: MmapProtection) -> Result<()>;

    /// Map `size` bytes of `file`, starting at `file_offset`, privately at exactly `start`,
    /// replacing whatever part of a reservation is there. Writes are not carried to the file.
    fn map_file(
        file: &File,
        file_offset: u64,
        start: Address,
        size: usize,
        prot: MmapProtection,
    ) -> Result<()>;

    /// Check whether the given OS error number indicates an out-of-memory condition.
    fn is_mmap_oom(os_errno: i32) -> bool;
}

/// The protection flags for mmap
#[repr(i32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MmapProtection {
    /// Allow read only
    ReadOnly,
    /// Allow read + write
    ReadWrite,
    /// Allow read + write + code execution
    ReadWriteExec,
    /// Do not allow any access
    NoAccess,
}

/// Annotation for an mmap entry.
///
/// This is for debugging. On Linux, every reservation is named with `prctl(PR_SET_VMA)` so that
/// the ranges can be told apart in `/proc/self/maps`. The annotation is ignored on other
/// platforms.
pub enum MmapAnnotation<'a> {
    /// The dump buffer or a mapped archive.
    Archive {
        /// What the range is used for, e.g. "dump" or "mapped".
        purpose: &'a str,
    },
    /// The class space next to the archive.
    ClassSpace,
    /// The mmap is for a test case.  Usually constructed using the [`mmap_anno_test!`] macro.
    Test {
        /// The source file.
        file: &'a str,
        /// The line number.
        line: u32,
    },
    /// For all other use cases.
    Misc {
        /// A human-readable descriptive name.
        name: &'a str,
    },
}

/// Construct an `MmapAnnotation::Test` with the current file name and line number.
#[macro_export]
macro_rules! mmap_anno_test {
    () => {
        &$crate::util::os::MmapAnnotation::Test {
            file: file!(),
            line: line!(),
        }
    };
}

// Export this to external crates
pub use mmap_anno_test;

impl std::fmt::Display for MmapAnnotation<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MmapAnnotation::Archive { purpose } => write!(f, "cds:archive:{purpose}"),
            MmapAnnotation::ClassSpace => write!(f, "cds:class-space"),
            MmapAnnotation::Test { file, line } => write!(f, "cds:test:{file}:{line}"),
            MmapAnnotation::Misc { name } => write!(f, "cds:misc:{name}"),
        }
    }
}
