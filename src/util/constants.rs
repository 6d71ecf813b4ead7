/// log2 of the number of bits in a byte
pub const LOG_BITS_IN_BYTE: u8 = 3;
/// The number of bits in a byte
pub const BITS_IN_BYTE: usize = 1 << LOG_BITS_IN_BYTE;

/// log2 of the number of bytes in a gigabyte
pub const LOG_BYTES_IN_GBYTE: u8 = 30;
/// The number of bytes in a gigabyte
pub const BYTES_IN_GBYTE: usize = 1 << LOG_BYTES_IN_GBYTE;

/// log2 of the number of bytes in a megabyte
pub const LOG_BYTES_IN_MBYTE: u8 = 20;
/// The number of bytes in a megabyte
pub const BYTES_IN_MBYTE: usize = 1 << LOG_BYTES_IN_MBYTE;

/// log2 of the number of bytes in a kilobyte
pub const LOG_BYTES_IN_KBYTE: u8 = 10;
/// The number of bytes in a kilobyte
pub const BYTES_IN_KBYTE: usize = 1 << LOG_BYTES_IN_KBYTE;

#[cfg(target_pointer_width = "32")]
/// log2 of the number of bytes in an address
pub const LOG_BYTES_IN_ADDRESS: u8 = 2;
#[cfg(target_pointer_width = "64")]
/// log2 of the number of bytes in an address
pub const LOG_BYTES_IN_ADDRESS: u8 = 3;
/// The number of bytes in an address
pub const BYTES_IN_ADDRESS: usize = 1 << LOG_BYTES_IN_ADDRESS;
/// log2 of the number of bits in an address
pub const LOG_BITS_IN_ADDRESS: usize = LOG_BITS_IN_BYTE as usize + LOG_BYTES_IN_ADDRESS as usize;
/// The number of bits in an address
pub const BITS_IN_ADDRESS: usize = 1 << LOG_BITS_IN_ADDRESS;

/// log2 of the number of bytes in a word
pub const LOG_BYTES_IN_WORD: u8 = LOG_BYTES_IN_ADDRESS;
/// The number of bytes in a word
pub const BYTES_IN_WORD: usize = 1 << LOG_BYTES_IN_WORD;
/// log2 of the number of bits in a word
pub const LOG_BITS_IN_WORD: usize = LOG_BITS_IN_BYTE as usize + LOG_BYTES_IN_WORD as usize;
/// The number of bits in a word
pub const BITS_IN_WORD: usize = 1 << LOG_BITS_IN_WORD;

/// log2 of the number of bytes in a page
pub const LOG_BYTES_IN_PAGE: u8 = 12;
/// The number of bytes in a page
pub const BYTES_IN_PAGE: usize = 1 << LOG_BYTES_IN_PAGE;

/// Archive layout constants. These are the defaults of the corresponding options and the limits
/// the options are validated against.
mod archive_constants {
    use super::*;

    /// The requested base address of the archive if none is configured.
    #[cfg(target_pointer_width = "64")]
    pub const DEFAULT_SHARED_BASE_ADDRESS: usize = 0x8_0000_0000;
    /// The requested base address of the archive if none is configured.
    #[cfg(target_pointer_width = "32")]
    pub const DEFAULT_SHARED_BASE_ADDRESS: usize = 0x4000_0000;

    /// The default granularity of the core regions. Regions start at, and file offsets are
    /// aligned to, multiples of this value.
    pub const DEFAULT_CORE_REGION_ALIGNMENT: usize = 64 * BYTES_IN_KBYTE;

    /// The default amount of memory committed at once when a dump region grows.
    pub const DEFAULT_COMMIT_GRANULE: usize = BYTES_IN_MBYTE;

    /// The default size of the address range reserved for the dump buffer.
    pub const DEFAULT_ARCHIVE_RESERVE_SIZE: usize = 512 * BYTES_IN_MBYTE;

    /// The default size of the class space that follows the archive.
    pub const DEFAULT_CLASS_SPACE_SIZE: usize = 256 * BYTES_IN_MBYTE;

    /// The default alignment of the class space.
    pub const DEFAULT_CLASS_SPACE_ALIGNMENT: usize = 4 * BYTES_IN_MBYTE;

    /// Archive and class space together must fit in this range so that compressed class
    /// pointers can encode every class in both.
    pub const MAX_ENCODING_RANGE_SIZE: usize = 4 * BYTES_IN_GBYTE;

    /// The bits of an embedded pointer word that may hold a tag. All archived objects are
    /// word-aligned, so the low bits of a pointer are free.
    pub const DEFAULT_POINTER_TAG_MASK: usize = 0b11;
}
pub use archive_constants::*;
