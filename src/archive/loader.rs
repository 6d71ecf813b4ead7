use std::ops::Range;
use std::path::Path;

use crate::archive::error::MapArchiveError;
use crate::archive::filemap::FileMapReader;
use crate::archive::header::{checksum, FileMapHeader};
use crate::archive::layout::RegionId;
use crate::archive::relocation::SharedDataRelocator;
use crate::archive::reserve::{
    reserve_address_space_for_archives, ArchiveReservation, ReservationRequest,
};
use crate::archive::serialize::{serialize_archive_data, ArchivedRoots, ReadClosure};
use crate::util::bitmap::BitMap;
use crate::util::constants::{BYTES_IN_PAGE, BYTES_IN_WORD};
use crate::util::conversions::raw_align_up;
use crate::util::options::{Options, RelocationMode};
use crate::util::os::{Memory, MmapProtection, OSMemory};
use crate::util::Address;
use crate::vm::{ObjectKind, RootProvider};

/// An archive mapped into this process.
///
/// The core regions are mapped back to back at [`MappedArchive::mapped_base`], preferably at the
/// base address the archive was built for. If that range is not available, the archive is mapped
/// elsewhere and every pointer recorded in its bitmap is rebased. The mapping lives as long as
/// this value.
pub struct MappedArchive {
    header: FileMapHeader,
    reservation: Option<ArchiveReservation>,
    mapped_base: Address,
}

impl MappedArchive {
    /// Map the archive at `path`. Any error leaves nothing mapped.
    pub fn map(path: &Path, options: &Options) -> Result<MappedArchive, MapArchiveError> {
        let reader = FileMapReader::open(path, options)?;
        let header = *reader.header();
        let reservation = Self::reserve(&header, options)?;
        let archive = MappedArchive {
            header,
            mapped_base: reservation.archive.base(),
            reservation: Some(reservation),
        };

        archive.map_regions(&reader)?;
        if options.verify_shared_spaces {
            archive.verify_checksums()?;
        }
        archive.rebase_if_needed(&reader, options)?;
        archive.protect_regions()?;
        info!(
            "Mapped {} at {} (requested {}), {} bytes",
            path.display(),
            archive.mapped_base,
            archive.requested_base(),
            archive.header.mapping_size()
        );
        Ok(archive)
    }

    fn reserve(
        header: &FileMapHeader,
        options: &Options,
    ) -> Result<ArchiveReservation, MapArchiveError> {
        let size = header.mapping_size();
        let mut request = ReservationRequest {
            requested: match options.relocation_mode {
                RelocationMode::MapAtRequested => Some(header.requested_base_address()),
                RelocationMode::AlwaysRelocate => None,
            },
            archive_size: size,
            archive_alignment: header.core_region_alignment(),
            class_space: header.class_space(),
            split: options.split_reservation,
        };
        if let Some(reservation) = reserve_address_space_for_archives(&request) {
            return Ok(reservation);
        }
        if let Some(requested) = request.requested.take() {
            warn!(
                "Unable to map the archive at the requested address {}, it will be relocated",
                requested
            );
            if let Some(reservation) = reserve_address_space_for_archives(&request) {
                return Ok(reservation);
            }
        }
        Err(MapArchiveError::ReservationFailed { size })
    }

    /// Map each core region from the file, or read it if it cannot be mapped. Regions are
    /// writable until they are rebased.
    fn map_regions(&self, reader: &FileMapReader) -> Result<(), MapArchiveError> {
        for id in RegionId::CORE_REGIONS {
            let r = self.header.region(id);
            if r.used == 0 {
                continue;
            }
            let start = self.mapped_base + r.mapping_offset as usize;
            let size = raw_align_up(r.used as usize, BYTES_IN_PAGE);
            let mapped = OSMemory::CAN_MAP_INTO_RESERVATION
                && match OSMemory::map_file(
                    reader.file(),
                    r.file_offset,
                    start,
                    size,
                    MmapProtection::ReadWrite,
                ) {
                    Ok(()) => true,
                    Err(e) => {
                        info!("Unable to map region {} ({}), reading it instead", id, e);
                        false
                    }
                };
            if !mapped {
                OSMemory::commit(start, size, MmapProtection::ReadWrite)?;
                reader.read_region_into(id, start)?;
            }
            info!(
                "Mapped region {:<3} at [{}, {}) ({} bytes){}",
                id,
                start,
                start + size,
                r.used,
                if mapped { "" } else { ", read" }
            );
        }
        Ok(())
    }

    fn verify_checksums(&self) -> Result<(), MapArchiveError> {
        for id in RegionId::CORE_REGIONS {
            let r = self.header.region(id);
            let range = self.region_range(id);
            let found = checksum(unsafe { range.start.as_bytes(range.end - range.start) });
            if found != r.checksum {
                return Err(MapArchiveError::ChecksumMismatch {
                    what: id.into(),
                    expected: r.checksum,
                    found,
                });
            }
        }
        debug!("Region checksums verified");
        Ok(())
    }

    fn rebase_if_needed(
        &self,
        reader: &FileMapReader,
        options: &Options,
    ) -> Result<(), MapArchiveError> {
        let delta = self.delta();
        if delta == 0 {
            return Ok(());
        }
        let bits = self.header.ptrmap_size_in_bits as usize;
        if bits == 0 {
            return Ok(());
        }
        let bytes = reader.read_region(RegionId::Bm)?;
        if bytes.len() * 8 < bits {
            return Err(MapArchiveError::InvalidHeader(format!(
                "bitmap of {} bytes cannot hold {} bits",
                bytes.len(),
                bits
            )));
        }
        if options.verify_shared_spaces {
            let found = checksum(&bytes);
            let expected = self.header.region(RegionId::Bm).checksum;
            if found != expected {
                return Err(MapArchiveError::ChecksumMismatch {
                    what: RegionId::Bm.into(),
                    expected,
                    found,
                });
            }
        }
        let bitmap = BitMap::from_bytes(&bytes, bits);

        let size = self.header.mapping_size();
        let patch_base =
            self.mapped_base + self.header.ptrmap_start_pos as usize * BYTES_IN_WORD;
        let patch_end = self.mapped_base + size;
        if patch_base + bits * BYTES_IN_WORD > patch_end {
            return Err(MapArchiveError::InvalidHeader(
                "pointer bitmap is larger than the archive".to_string(),
            ));
        }
        let requested = self.requested_base();
        let relocator = SharedDataRelocator::new(
            patch_base,
            patch_end,
            requested..requested + size,
            self.mapped_base..self.mapped_base + size,
        );
        if options.parallel_relocation {
            relocator.patch_parallel(&bitmap, options.relocation_threads);
        } else {
            relocator.patch(&bitmap);
        }
        info!(
            "Relocated {} pointers from {} to {} (delta = {:#x})",
            bitmap.count_one_bits(),
            requested,
            self.mapped_base,
            delta
        );
        Ok(())
    }

    fn protect_regions(&self) -> Result<(), MapArchiveError> {
        let ro = self.header.region(RegionId::Ro);
        if ro.used != 0 {
            let start = self.mapped_base + ro.mapping_offset as usize;
            OSMemory::protect(
                start,
                raw_align_up(ro.used as usize, BYTES_IN_PAGE),
                MmapProtection::ReadOnly,
            )?;
        }
        let mc = self.header.region(RegionId::Mc);
        if mc.used != 0 {
            let start = self.mapped_base + mc.mapping_offset as usize;
            let size = raw_align_up(mc.used as usize, BYTES_IN_PAGE);
            if let Err(e) = OSMemory::protect(start, size, MmapProtection::ReadWriteExec) {
                warn!("Unable to make region mc executable: {}", e);
            }
        }
        Ok(())
    }

    pub fn header(&self) -> &FileMapHeader {
        &self.header
    }

    pub fn mapped_base(&self) -> Address {
        self.mapped_base
    }

    pub fn requested_base(&self) -> Address {
        self.header.requested_base_address()
    }

    /// How far the archive was moved from its requested base.
    pub fn delta(&self) -> isize {
        self.mapped_base.get_offset(self.requested_base())
    }

    /// The used range of core region `id`.
    pub fn region_range(&self, id: RegionId) -> Range<Address> {
        debug_assert!(id.is_core(), "{} is not mapped", id);
        let r = self.header.region(id);
        let start = self.mapped_base + r.mapping_offset as usize;
        start..start + r.used as usize
    }

    pub fn contains(&self, addr: Address) -> bool {
        RegionId::CORE_REGIONS
            .iter()
            .any(|id| self.region_range(*id).contains(&addr))
    }

    /// Read the roots of `providers` back from the archive, and restore the dispatch table
    /// copies of the archived kinds from their tables in this process. `kinds` lists every kind
    /// the archive may refer to. `providers` must be the providers the archive was dumped with,
    /// in the same order.
    ///
    /// Everything is checked before anything is written, so on error the providers and the
    /// dispatch table copies are left as they were.
    pub fn read_serialized_data<K: ObjectKind>(
        &self,
        providers: &mut [&mut dyn RootProvider<K>],
        kinds: &[K],
    ) -> Result<(), MapArchiveError> {
        let start = self.mapped_base + self.header.serialized_data_offset as usize;
        let ro = self.region_range(RegionId::Ro);
        if !ro.contains(&start) {
            return Err(MapArchiveError::InvalidHeader(format!(
                "serialized data at {} is outside ro [{}, {})",
                start, ro.start, ro.end
            )));
        }
        let mut soc = ReadClosure::new(start, ro.end);
        let mut clones = vec![];
        let mut roots: Vec<ArchivedRoots> = vec![];
        serialize_archive_data(&mut soc, &mut clones, &mut roots)?;
        debug!(
            "Read {} bytes of serialized data, {} dispatch tables",
            soc.cursor() - start,
            clones.len()
        );

        if roots.len() != providers.len() {
            return Err(MapArchiveError::IncompatibleArchive(format!(
                "archived {} root providers, found {}",
                roots.len(),
                providers.len()
            )));
        }
        for (archived, provider) in roots.iter().zip(providers.iter()) {
            if archived.provider.as_slice() != provider.name().as_bytes() {
                return Err(MapArchiveError::IncompatibleArchive(format!(
                    "expected roots of {}, found {}",
                    String::from_utf8_lossy(&archived.provider),
                    provider.name()
                )));
            }
        }

        let mc = self.region_range(RegionId::Mc);
        let mut tables = Vec::with_capacity(clones.len());
        for clone in &clones {
            let name = String::from_utf8_lossy(&clone.name);
            let kind = kinds
                .iter()
                .find(|k| k.name().as_bytes() == clone.name.as_slice())
                .ok_or_else(|| {
                    MapArchiveError::IncompatibleArchive(format!("unknown kind {}", name))
                })?;
            let table = kind.dispatch_table().ok_or_else(|| {
                MapArchiveError::IncompatibleArchive(format!("{} has no dispatch table", name))
            })?;
            if table.len() != clone.len as usize {
                return Err(MapArchiveError::IncompatibleArchive(format!(
                    "dispatch table of {} has {} entries, archived {}",
                    name,
                    table.len(),
                    clone.len
                )));
            }
            let addr = unsafe { Address::from_usize(clone.address) };
            if addr < mc.start || addr > mc.end || mc.end - addr < table.len() * BYTES_IN_WORD {
                return Err(MapArchiveError::InvalidHeader(format!(
                    "dispatch table copy of {} at {} is outside mc",
                    name, addr
                )));
            }
            tables.push((kind, table, addr));
        }

        for (kind, table, addr) in tables {
            for (i, entry) in table.iter().enumerate() {
                unsafe { (addr + i * BYTES_IN_WORD).store::<usize>(*entry) };
            }
            trace!("Restored dispatch table of {} at {}", kind.name(), addr);
        }
        for (archived, provider) in roots.iter().zip(providers.iter_mut()) {
            debug!(
                "Restoring {} roots of {}",
                archived.roots.len(),
                provider.name()
            );
            provider.restore_roots(&archived.roots);
        }
        Ok(())
    }
}

impl Drop for MappedArchive {
    fn drop(&mut self) {
        if let Some(reservation) = self.reservation.take() {
            reservation.release();
        }
    }
}
