//! The on-disk header of an archive file.
//!
//! The file starts with a [`FileMapHeader`], followed by the regions in [`RegionId`] order, each
//! at a file offset aligned to the core region alignment. The core regions (mc, rw, ro) are
//! mapped back to back at `base + mapping_offset`. The bm region holds the pointer bitmap and is
//! only read when the archive must be relocated.

use std::hash::Hasher;
use std::mem::size_of;

use bytemuck::{Pod, Zeroable};
use memoffset::offset_of;
use strum::IntoEnumIterator;
use twox_hash::XxHash64;

use crate::archive::error::MapArchiveError;
use crate::archive::layout::{RegionId, NUM_REGIONS};
use crate::build_info::{self, BUILD_IDENT_LEN};
use crate::util::constants::BYTES_IN_PAGE;
use crate::util::conversions::{raw_align_up, raw_is_aligned};
use crate::util::options::Options;
use crate::util::Address;

pub const ARCHIVE_MAGIC: u32 = 0xf00b_aba2;
pub const CURRENT_ARCHIVE_VERSION: u32 = 1;

/// One region of the file.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct FileMapRegion {
    pub file_offset: u64,
    /// Offset from the mapped base. Only meaningful for core regions.
    pub mapping_offset: u64,
    pub used: u64,
    pub checksum: u64,
    pub read_only: u32,
    pub allow_exec: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct FileMapHeader {
    pub magic: u32,
    pub version: u32,
    pub header_size: u64,
    /// Covers every byte after this field.
    pub header_checksum: u64,
    pub build_ident: [u8; BUILD_IDENT_LEN],
    /// Where the archive was built to be mapped. All pointers in the file assume this base.
    pub requested_base_address: u64,
    /// Where the dump buffer actually was. For diagnostics only.
    pub mapped_base_address: u64,
    pub core_region_alignment: u64,
    pub pointer_tag_mask: u64,
    /// Zero if the archive was built without a class space.
    pub class_space_size: u64,
    pub class_space_alignment: u64,
    /// Offset of the serialized data from the mapped base.
    pub serialized_data_offset: u64,
    /// The number of leading zero bits trimmed from the pointer bitmap.
    pub ptrmap_start_pos: u64,
    /// The number of bits stored in the bm region.
    pub ptrmap_size_in_bits: u64,
    pub compressed_class_pointers: u32,
    pub num_regions: u32,
    pub regions: [FileMapRegion; NUM_REGIONS],
}

static_assertions::const_assert_eq!(size_of::<FileMapRegion>(), 40);
static_assertions::const_assert_eq!(size_of::<FileMapHeader>(), 168 + NUM_REGIONS * 40);

/// XxHash64 of `bytes`, the checksum used for the header and the regions.
pub fn checksum(bytes: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(bytes);
    hasher.finish()
}

impl FileMapHeader {
    pub fn new(options: &Options, requested_base: Address, mapped_base: Address) -> Self {
        let mut header = FileMapHeader::zeroed();
        header.magic = ARCHIVE_MAGIC;
        header.version = CURRENT_ARCHIVE_VERSION;
        header.header_size = size_of::<FileMapHeader>() as u64;
        header.build_ident = *build_info::BUILD_IDENT;
        header.requested_base_address = requested_base.as_usize() as u64;
        header.mapped_base_address = mapped_base.as_usize() as u64;
        header.core_region_alignment = options.core_region_alignment as u64;
        header.pointer_tag_mask = options.tag_mask().bits() as u64;
        if options.use_compressed_class_pointers {
            header.compressed_class_pointers = 1;
            header.class_space_size = options.class_space_size as u64;
            header.class_space_alignment = options.class_space_alignment as u64;
        }
        header.num_regions = NUM_REGIONS as u32;
        for id in RegionId::iter() {
            let r = &mut header.regions[id.index()];
            r.read_only = id.is_read_only() as u32;
            r.allow_exec = id.allow_exec() as u32;
        }
        header
    }

    pub fn region(&self, id: RegionId) -> &FileMapRegion {
        &self.regions[id.index()]
    }

    pub fn region_mut(&mut self, id: RegionId) -> &mut FileMapRegion {
        &mut self.regions[id.index()]
    }

    pub fn requested_base_address(&self) -> Address {
        unsafe { Address::from_usize(self.requested_base_address as usize) }
    }

    pub fn core_region_alignment(&self) -> usize {
        self.core_region_alignment as usize
    }

    /// The class space size and alignment, if the archive was built with a class space.
    pub fn class_space(&self) -> Option<(usize, usize)> {
        (self.compressed_class_pointers != 0).then_some((
            self.class_space_size as usize,
            self.class_space_alignment as usize,
        ))
    }

    /// The number of bytes the core regions span when mapped.
    pub fn mapping_size(&self) -> usize {
        RegionId::CORE_REGIONS
            .iter()
            .map(|id| {
                let r = self.region(*id);
                raw_align_up(
                    (r.mapping_offset + r.used) as usize,
                    self.core_region_alignment(),
                )
            })
            .max()
            .unwrap_or(0)
    }

    fn checksummed_bytes(&self) -> &[u8] {
        let start = offset_of!(FileMapHeader, header_checksum) + size_of::<u64>();
        &bytemuck::bytes_of(self)[start..]
    }

    pub fn compute_checksum(&self) -> u64 {
        checksum(self.checksummed_bytes())
    }

    /// Seal the header. Must be the last change before it is written.
    pub fn update_checksum(&mut self) {
        self.header_checksum = self.compute_checksum();
    }

    /// Read a header from the start of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<FileMapHeader, MapArchiveError> {
        if bytes.len() < size_of::<FileMapHeader>() {
            return Err(MapArchiveError::InvalidHeader(format!(
                "file is too small ({} bytes)",
                bytes.len()
            )));
        }
        Ok(bytemuck::pod_read_unaligned(
            &bytes[..size_of::<FileMapHeader>()],
        ))
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Check that this header describes an archive that the current build can map with
    /// `options`, and that every region lies within a file of `file_len` bytes.
    pub fn validate(&self, options: &Options, file_len: u64) -> Result<(), MapArchiveError> {
        let invalid = |msg: String| Err(MapArchiveError::InvalidHeader(msg));

        if self.magic != ARCHIVE_MAGIC {
            return invalid(format!("bad magic {:#x}", self.magic));
        }
        if self.version != CURRENT_ARCHIVE_VERSION {
            return invalid(format!(
                "version {} is not supported (expected {})",
                self.version, CURRENT_ARCHIVE_VERSION
            ));
        }
        if self.header_size != size_of::<FileMapHeader>() as u64 {
            return invalid(format!("header size {}", self.header_size));
        }
        let found = self.compute_checksum();
        if found != self.header_checksum {
            return Err(MapArchiveError::ChecksumMismatch {
                what: "header",
                expected: self.header_checksum,
                found,
            });
        }
        if self.build_ident != *build_info::BUILD_IDENT {
            return invalid(format!(
                "created by '{}', this is '{}'",
                build_info::ident_to_string(&self.build_ident),
                build_info::ident_to_string(&build_info::BUILD_IDENT)
            ));
        }
        let alignment = self.core_region_alignment();
        if !alignment.is_power_of_two() || alignment % BYTES_IN_PAGE != 0 {
            return invalid(format!("core region alignment {:#x}", alignment));
        }
        if !raw_is_aligned(self.requested_base_address as usize, alignment) {
            return invalid(format!(
                "requested base {:#x} is not aligned",
                self.requested_base_address
            ));
        }
        if self.num_regions as usize != NUM_REGIONS {
            return invalid(format!("{} regions", self.num_regions));
        }
        for id in RegionId::iter() {
            let r = self.region(id);
            let in_file = r.file_offset.checked_add(r.used).is_some_and(|end| end <= file_len);
            if !in_file {
                return invalid(format!("region {} is outside the file", id));
            }
            if id.is_core() && !raw_is_aligned(r.file_offset as usize, alignment) {
                return invalid(format!("region {} is not aligned in the file", id));
            }
        }

        let compressed = self.compressed_class_pointers != 0;
        if compressed != options.use_compressed_class_pointers {
            return Err(MapArchiveError::IncompatibleOptions(format!(
                "archive {} compressed class pointers",
                if compressed { "uses" } else { "does not use" }
            )));
        }
        if self.pointer_tag_mask as usize != options.tag_mask().bits() {
            return Err(MapArchiveError::IncompatibleOptions(format!(
                "pointer tag mask {:#x}, expected {:#x}",
                self.pointer_tag_mask,
                options.tag_mask().bits()
            )));
        }
        Ok(())
    }
}
