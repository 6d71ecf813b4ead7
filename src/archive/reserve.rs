use crate::util::constants::MAX_ENCODING_RANGE_SIZE;
use crate::util::conversions::{raw_align_down, raw_align_up};
use crate::util::options::SplitReservation;
use crate::util::os::{Memory, MmapAnnotation, OSMemory, OSProcess, Process};
use crate::util::Address;

/// A range of reserved address space. Reserved memory is inaccessible until committed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReservedSpace {
    base: Address,
    size: usize,
}

impl ReservedSpace {
    /// Reserve `size` bytes, exactly at `requested` if given, or anywhere at `alignment`.
    pub fn reserve(
        requested: Option<Address>,
        size: usize,
        alignment: usize,
        annotation: &MmapAnnotation<'_>,
    ) -> Option<ReservedSpace> {
        match OSMemory::reserve(requested, size, alignment, annotation) {
            Ok(base) => {
                debug!(
                    "Reserved [{}, {}) ({} bytes){}",
                    base,
                    base + size,
                    size,
                    if requested.is_some() { " at the requested address" } else { "" }
                );
                Some(ReservedSpace { base, size })
            }
            Err(e) => {
                info!(
                    "Unable to reserve {} bytes at {}: {}",
                    size,
                    requested.map_or_else(|| "any address".to_string(), |a| a.to_string()),
                    e
                );
                if e.raw_os_error().is_some_and(OSMemory::is_mmap_oom) {
                    match OSProcess::get_process_memory_maps() {
                        Ok(maps) => debug!("Out of address space. Process memory map:\n{}", maps),
                        Err(e) => debug!("Out of address space, and the memory map is unavailable: {}", e),
                    }
                }
                None
            }
        }
    }

    pub fn base(&self) -> Address {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn end(&self) -> Address {
        self.base + self.size
    }

    pub fn contains(&self, addr: Address) -> bool {
        self.base <= addr && addr < self.end()
    }

    /// The first `split_offset` bytes of this range.
    pub fn first_part(&self, split_offset: usize) -> ReservedSpace {
        assert!(split_offset <= self.size);
        ReservedSpace {
            base: self.base,
            size: split_offset,
        }
    }

    /// The rest of this range after `split_offset` bytes.
    pub fn last_part(&self, split_offset: usize) -> ReservedSpace {
        assert!(split_offset <= self.size);
        ReservedSpace {
            base: self.base + split_offset,
            size: self.size - split_offset,
        }
    }

    /// Release the range, together with anything committed or mapped in it.
    pub fn release(self) {
        if self.size == 0 {
            return;
        }
        if let Err(e) = OSMemory::release(self.base, self.size) {
            warn!("Failed to release [{}, {}): {}", self.base, self.end(), e);
        }
    }
}

/// What to reserve for an archive.
#[derive(Copy, Clone, Debug)]
pub struct ReservationRequest {
    /// Reserve exactly here, or anywhere if `None`.
    pub requested: Option<Address>,
    /// The size of the archive part. Rounded up to `archive_alignment`.
    pub archive_size: usize,
    pub archive_alignment: usize,
    /// The size and alignment of a class space right after the archive, if one is needed.
    pub class_space: Option<(usize, usize)>,
    pub split: SplitReservation,
}

/// The archive range and the class space next to it.
#[derive(Debug)]
pub struct ArchiveReservation {
    pub archive: ReservedSpace,
    pub class_space: Option<ReservedSpace>,
}

impl ArchiveReservation {
    pub fn release(self) {
        self.archive.release();
        if let Some(ccs) = self.class_space {
            ccs.release();
        }
    }
}

/// Reserve the address space for an archive and, if requested, for the class space that follows
/// it. Returns `None` if the space cannot be reserved; nothing stays reserved in that case.
///
/// With a class space, the archive starts at a class space alignment boundary and the class
/// space starts at the first class space alignment boundary after the archive. Both must fit in
/// the range compressed class pointers can encode, so the class space is shrunk if needed.
pub fn reserve_address_space_for_archives(req: &ReservationRequest) -> Option<ArchiveReservation> {
    let archive_space_size = raw_align_up(req.archive_size, req.archive_alignment);
    if let Some(base) = req.requested {
        assert!(
            base.is_aligned_to(req.archive_alignment),
            "Archive base address invalid: {}",
            base
        );
    }

    let Some((class_space_size, class_space_alignment)) = req.class_space else {
        // The simple case: no class space.
        let archive = ReservedSpace::reserve(
            req.requested,
            archive_space_size,
            req.archive_alignment,
            &MmapAnnotation::Archive { purpose: "archive" },
        )?;
        return Some(ArchiveReservation {
            archive,
            class_space: None,
        });
    };

    if let Some(base) = req.requested {
        assert!(
            base.is_aligned_to(class_space_alignment),
            "Archive base address {} unaligned, needs alignment {:#x}",
            base,
            class_space_alignment
        );
    }

    let ccs_begin_offset = raw_align_up(archive_space_size, class_space_alignment);
    let gap_size = ccs_begin_offset - archive_space_size;

    // Reduce the class space if it would not fit into the encoding range.
    assert!(
        archive_space_size < MAX_ENCODING_RANGE_SIZE - class_space_alignment,
        "Archive too large"
    );
    let mut class_space_size = class_space_size;
    if archive_space_size + gap_size + class_space_size > MAX_ENCODING_RANGE_SIZE {
        let reduced = raw_align_down(
            MAX_ENCODING_RANGE_SIZE - archive_space_size - gap_size,
            class_space_alignment,
        );
        info!(
            "Reducing class space size from {} to {}",
            class_space_size, reduced
        );
        class_space_size = reduced;
    }

    let total_range_size = ccs_begin_offset + class_space_size;
    let alignment = req.archive_alignment.max(class_space_alignment);

    let split = match req.split {
        // Every supported platform can release part of a reservation.
        SplitReservation::Auto => SplitReservation::Split,
        other => other,
    };

    match split {
        SplitReservation::Separate => {
            // Probe for a range large enough for both, then reserve the two parts separately.
            // Another thread may take the probed range in between, in which case we fail.
            let base = match req.requested {
                Some(base) => base,
                None => {
                    let probe = ReservedSpace::reserve(
                        None,
                        total_range_size,
                        alignment,
                        &MmapAnnotation::Misc { name: "archive-probe" },
                    )?;
                    let base = probe.base();
                    probe.release();
                    base
                }
            };
            let archive = ReservedSpace::reserve(
                Some(base),
                ccs_begin_offset,
                alignment,
                &MmapAnnotation::Archive { purpose: "archive" },
            )?;
            let Some(class_space) = ReservedSpace::reserve(
                Some(base + ccs_begin_offset),
                class_space_size,
                class_space_alignment,
                &MmapAnnotation::ClassSpace,
            ) else {
                archive.release();
                return None;
            };
            Some(ArchiveReservation {
                archive,
                class_space: Some(class_space),
            })
        }
        _ => {
            let total = ReservedSpace::reserve(
                req.requested,
                total_range_size,
                alignment,
                &MmapAnnotation::Archive { purpose: "archive+class-space" },
            )?;
            debug_assert!(req.requested.is_none() || req.requested == Some(total.base()));
            // The gap stays reserved at the end of the archive part.
            Some(ArchiveReservation {
                archive: total.first_part(ccs_begin_offset),
                class_space: Some(total.last_part(ccs_begin_offset)),
            })
        }
    }
}
