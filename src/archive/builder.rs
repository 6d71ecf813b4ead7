//! Building an archive.
//!
//! The builder copies every object reachable from the roots of its providers into a dump buffer
//! made of three regions, `mc`, `rw` and `ro`, laid out back to back:
//!
//! 1. Gather: walk the object graph from each provider's roots and decide, with the
//!    [`FollowPolicy`], which objects are copied. Every pointer field of a copied object is
//!    remembered in the pointer map of the list that owns the object.
//! 2. Copy: make shallow copies of the read-write objects into `rw`, then of the read-only
//!    objects into `ro`. Dispatch tables of the kinds that have one are cloned into `mc`.
//! 3. Relocate: rewrite the pointer fields of the copies, the special references, and finally
//!    the roots themselves, to point to the copies. Every pointer word written into the buffer is
//!    marked in the [`ArchivePtrMarker`].
//! 4. Serialize: write the dispatch table clones and the roots of every provider at the end of
//!    `ro`.
//! 5. Rebase every marked pointer from the buffer address to the requested base address, and
//!    write the file.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::Path;

use enum_map::EnumMap;

use crate::archive::dump_region::{percent_of, DumpRegion, OutOfSpace};
use crate::archive::filemap::FileMapWriter;
use crate::archive::header::FileMapHeader;
use crate::archive::layout::RegionId;
use crate::archive::policy::FollowPolicy;
use crate::archive::ptr_marker::ArchivePtrMarker;
use crate::archive::relocation::SharedDataRelocator;
use crate::archive::reserve::{
    reserve_address_space_for_archives, ArchiveReservation, ReservationRequest,
};
use crate::archive::serialize::{
    serialize_archive_data, ArchivedRoots, DispatchClone, WriteClosure,
};
use crate::archive::source_obj::{
    FollowMode, SourceObjId, SourceObjInfo, SourceObjList, SourceObjTable,
};
use crate::archive::stats::DumpAllocStats;
use crate::archive::walker::{GraphWalker, MetaRef, RefClosure};
use crate::util::constants::BYTES_IN_WORD;
use crate::util::options::Options;
use crate::util::tagged::{TagMask, TaggedAddress};
use crate::util::Address;
use crate::vm::{ObjectKind, RefSlot, RootOrder, RootProvider, RootRelocator, SpecialRefKind};

/// A special reference found while gathering, identified by its source object and the offset of
/// the field in that object.
#[derive(Copy, Clone, Debug)]
struct SpecialRef {
    kind: SpecialRefKind,
    src_obj: Address,
    field_offset: usize,
}

/// What a finished dump produced.
#[derive(Debug)]
pub struct ArchiveSummary {
    pub header: FileMapHeader,
    pub requested_base_address: Address,
    pub buffer_base_address: Address,
    /// Bytes written per region.
    pub region_used: EnumMap<RegionId, usize>,
    pub copied_objects: usize,
    /// Pointer words recorded in the bitmap.
    pub marked_pointers: usize,
}

fn dumped_address_of<K: ObjectKind>(info: &SourceObjInfo<K>) -> Address {
    info.dumped_address().unwrap_or_else(|| {
        panic!(
            "{:?} object {} has not been copied",
            info.kind(),
            info.source_address()
        )
    })
}

pub struct ArchiveBuilder<'a, K: ObjectKind> {
    options: Options,
    policy: &'a dyn FollowPolicy<K>,
    mask: TagMask,
    reservation: Option<ArchiveReservation>,
    buffer_bottom: Address,
    requested_bottom: Address,
    mc: DumpRegion,
    rw: DumpRegion,
    ro: DumpRegion,
    marker: ArchivePtrMarker,
    table: SourceObjTable<K>,
    rw_list: SourceObjList,
    ro_list: SourceObjList,
    special_refs: Vec<SpecialRef>,
    dispatch_kinds: BTreeSet<K>,
    /// Where the dispatch table of each kind was cloned in mc, and its length in words.
    dispatch_clones: BTreeMap<K, (Address, usize)>,
    /// The non-null root slots of every provider, in walk order.
    root_slots: Vec<(&'static str, Vec<Address>)>,
    serialized_data: Address,
    stats: DumpAllocStats,
    is_built: bool,
}

impl<'a, K: ObjectKind> ArchiveBuilder<'a, K> {
    /// Reserve the dump buffer, at the requested base address if possible.
    pub fn new(options: &Options, policy: &'a dyn FollowPolicy<K>) -> Self {
        let requested = options.requested_base_address();
        let reservation = reserve_address_space_for_archives(&Self::reservation_request(
            options, requested,
        ))
        .or_else(|| {
            requested.and_then(|addr| {
                info!(
                    "Unable to reserve the dump buffer at {}, the archive will be relocated",
                    addr
                );
                reserve_address_space_for_archives(&Self::reservation_request(options, None))
            })
        })
        .unwrap_or_else(|| panic!("Unable to reserve memory for shared space"));
        Self::with_reservation(options, policy, reservation)
    }

    /// Reserve the dump buffer at `buffer`, which need not be the requested base address.
    #[cfg(test)]
    pub(crate) fn with_buffer_at(
        options: &Options,
        policy: &'a dyn FollowPolicy<K>,
        buffer: Address,
    ) -> Self {
        let reservation =
            reserve_address_space_for_archives(&Self::reservation_request(options, Some(buffer)))
                .unwrap_or_else(|| panic!("Unable to reserve the dump buffer at {}", buffer));
        Self::with_reservation(options, policy, reservation)
    }

    fn reservation_request(options: &Options, requested: Option<Address>) -> ReservationRequest {
        ReservationRequest {
            requested,
            archive_size: options.archive_reserve_size,
            archive_alignment: options.core_region_alignment,
            class_space: options
                .use_compressed_class_pointers
                .then_some((options.class_space_size, options.class_space_alignment)),
            split: options.split_reservation,
        }
    }

    fn with_reservation(
        options: &Options,
        policy: &'a dyn FollowPolicy<K>,
        reservation: ArchiveReservation,
    ) -> Self {
        let bottom = reservation.archive.base();
        let end = reservation.archive.end();
        let requested_bottom = options.requested_base_address().unwrap_or(bottom);
        info!(
            "Reserved archive buffer [{}, {}) ({} bytes), requested base address {}",
            bottom,
            end,
            end - bottom,
            requested_bottom
        );

        let alignment = options.core_region_alignment;
        let granule = options.commit_granule;
        let mut mc = DumpRegion::new("mc", alignment, granule);
        mc.init(bottom, end);
        ArchiveBuilder {
            options: options.clone(),
            policy,
            mask: options.tag_mask(),
            reservation: Some(reservation),
            buffer_bottom: bottom,
            requested_bottom,
            mc,
            rw: DumpRegion::new("rw", alignment, granule),
            ro: DumpRegion::new("ro", alignment, granule),
            marker: ArchivePtrMarker::new(bottom, end),
            table: SourceObjTable::default(),
            rw_list: SourceObjList::default(),
            ro_list: SourceObjList::default(),
            special_refs: vec![],
            dispatch_kinds: BTreeSet::new(),
            dispatch_clones: BTreeMap::new(),
            root_slots: vec![],
            serialized_data: Address::ZERO,
            stats: DumpAllocStats::default(),
            is_built: false,
        }
    }

    pub fn buffer_bottom(&self) -> Address {
        self.buffer_bottom
    }

    pub fn requested_bottom(&self) -> Address {
        self.requested_bottom
    }

    pub fn region(&self, id: RegionId) -> &DumpRegion {
        match id {
            RegionId::Mc => &self.mc,
            RegionId::Rw => &self.rw,
            RegionId::Ro => &self.ro,
            _ => panic!("{} is not a dump region", id),
        }
    }

    fn region_mut(&mut self, id: RegionId) -> &mut DumpRegion {
        match id {
            RegionId::Mc => &mut self.mc,
            RegionId::Rw => &mut self.rw,
            RegionId::Ro => &mut self.ro,
            _ => panic!("{} is not a dump region", id),
        }
    }

    pub fn source_objects(&self) -> &SourceObjTable<K> {
        &self.table
    }

    pub fn ptr_marker(&self) -> &ArchivePtrMarker {
        &self.marker
    }

    pub fn stats(&self) -> &DumpAllocStats {
        &self.stats
    }

    /// The address of the copy of the source object `src`, if it was copied or points to an
    /// existing archive.
    pub fn get_dumped_addr(&self, src: Address) -> Option<Address> {
        self.table.get(src).and_then(|info| info.dumped_address())
    }

    /// The address that `buffer_addr` will have when the archive is mapped at the requested base.
    pub fn to_requested(&self, buffer_addr: Address) -> Address {
        debug_assert!(self.is_in_buffer(buffer_addr), "{} is not in the buffer", buffer_addr);
        self.requested_bottom + (buffer_addr - self.buffer_bottom)
    }

    fn buffer_top(&self) -> Address {
        [&self.ro, &self.rw, &self.mc]
            .iter()
            .find(|r| !r.base().is_zero())
            .map_or(self.buffer_bottom, |r| r.top())
    }

    fn is_in_buffer(&self, addr: Address) -> bool {
        self.buffer_bottom <= addr && addr < self.buffer_top()
    }

    fn allocate(&mut self, id: RegionId, num_bytes: usize, alignment: usize) -> Address {
        let result = self.region_mut(id).allocate(num_bytes, alignment);
        result.unwrap_or_else(|e| self.report_out_of_space(e))
    }

    fn report_out_of_space(&self, e: OutOfSpace) -> ! {
        for r in [&self.mc, &self.rw, &self.ro] {
            r.print_out_of_space_msg(e.region, e.needed_bytes);
        }
        panic!("{}", e)
    }

    /// Allocate `size` bytes of code in mc. Must be called before [`ArchiveBuilder::build`].
    /// Special references of kind [`SpecialRefKind::MethodEntry`] may point into the allocated
    /// range.
    pub fn allocate_trampoline(&mut self, size: usize) -> Address {
        assert!(!self.is_built, "trampolines must be allocated before the archive is built");
        self.allocate(RegionId::Mc, size, BYTES_IN_WORD)
    }

    /// Build the archive in the dump buffer. On return, the roots of `providers` point to the
    /// copies in the buffer and every marked pointer has been rebased to the requested base.
    pub fn build(&mut self, providers: &mut [&mut dyn RootProvider<K>]) {
        assert!(!self.is_built, "an ArchiveBuilder builds a single archive");

        self.gather_source_objs(providers);
        self.allocate_dispatch_clones();

        self.mc.pack(Some(&mut self.rw));
        info!("Allocating RW objects ...");
        self.dump_objects(false);
        self.rw.pack(Some(&mut self.ro));
        info!("Allocating RO objects ...");
        self.dump_objects(true);

        info!("Relocating embedded pointers ...");
        self.relocate_embedded_pointers(false);
        self.relocate_embedded_pointers(true);
        self.relocate_special_refs();
        info!("Relocating external roots ...");
        self.relocate_roots(providers);

        if self.should_verify() {
            self.verify_roots(providers);
            self.verify_marked_pointers();
        }

        self.write_serialized_data();
        self.ro.pack(None);
        if self.options.print_statistics {
            self.print_region_stats();
        }
        self.relocate_to_requested();
        self.is_built = true;
    }

    /// Build the archive and write it to `path`.
    pub fn dump(
        mut self,
        providers: &mut [&mut dyn RootProvider<K>],
        path: &Path,
    ) -> ArchiveSummary {
        self.build(providers);
        self.write_archive(path)
    }

    fn should_verify(&self) -> bool {
        cfg!(debug_assertions)
            || cfg!(feature = "extreme_assertions")
            || self.options.verify_shared_spaces
    }

    fn gather_source_objs(&mut self, providers: &mut [&mut dyn RootProvider<K>]) {
        info!("Gathering all archivable objects ...");
        let mut walker = GraphWalker::new(self.mask);
        for provider in providers.iter_mut() {
            let roots = self.collect_roots(&mut **provider);
            debug!("Walking {} roots of {}", roots.len(), provider.name());
            self.root_slots.push((
                provider.name(),
                roots.iter().map(|r| r.slot().as_address()).collect(),
            ));
            let mut closure = GatherClosure { builder: &mut *self };
            for r in roots {
                walker.walk_from_root(&mut closure, r);
            }
        }
        info!(
            "Gathering all archivable objects ... done: {} objects ({} rw, {} ro), {} scanned",
            self.table.len(),
            self.rw_list.len(),
            self.ro_list.len(),
            walker.scanned_objects()
        );
    }

    /// The non-null roots of `provider`, in the order the provider asks for.
    fn collect_roots(&self, provider: &mut dyn RootProvider<K>) -> Vec<MetaRef<K>> {
        let mask = self.mask;
        let mut roots = vec![];
        provider.push_roots(&mut |slot: Address, kind: K| {
            let r = MetaRef::new(slot, kind);
            if !r.obj(mask).is_zero() {
                roots.push(r);
            }
        });
        sort_roots(provider.name(), provider.root_order(), mask, &mut roots);
        roots
    }

    fn gather_one(&mut self, enclosing: Option<Address>, r: &MetaRef<K>) -> bool {
        let obj = r.obj(self.mask);
        if let Some(enclosing) = enclosing {
            self.remember_embedded_pointer(enclosing, r.slot().as_address());
        }
        if self.table.lookup(obj).is_some() {
            return false;
        }

        let kind = r.kind();
        let mode = self.policy.follow_mode(obj, kind);
        let read_only = kind.is_read_only(obj);
        let id = self.table.insert(SourceObjInfo::new(
            obj,
            kind,
            mode,
            read_only,
            kind.size_in_bytes(obj),
        ));
        trace!("{} {} {}", mode, kind.name(), obj);
        if mode != FollowMode::Copy {
            return false;
        }

        if read_only {
            self.ro_list.append(id, &mut self.table);
        } else {
            self.rw_list.append(id, &mut self.table);
        }
        if kind.dispatch_table().is_some() {
            self.dispatch_kinds.insert(kind);
        }
        true
    }

    fn remember_embedded_pointer(&mut self, enclosing: Address, slot: Address) {
        let id = self
            .table
            .lookup(enclosing)
            .unwrap_or_else(|| panic!("enclosing object {} was not gathered", enclosing));
        let info = self.table.at(id);
        let list = if info.read_only() {
            &mut self.ro_list
        } else {
            &mut self.rw_list
        };
        list.remember_embedded_pointer(info, slot);
    }

    fn allocate_dispatch_clones(&mut self) {
        let kinds: Vec<K> = self.dispatch_kinds.iter().copied().collect();
        for kind in kinds {
            let Some(table) = kind.dispatch_table() else {
                continue;
            };
            let clone = self.allocate(RegionId::Mc, table.len() * BYTES_IN_WORD, BYTES_IN_WORD);
            for (i, entry) in table.iter().enumerate() {
                unsafe { (clone + i * BYTES_IN_WORD).store::<usize>(*entry) };
            }
            debug!(
                "Copied dispatch table of {} ({} entries) to {}",
                kind.name(),
                table.len(),
                clone
            );
            self.dispatch_clones.insert(kind, (clone, table.len()));
        }
    }

    fn dump_objects(&mut self, read_only: bool) {
        let ids: Vec<SourceObjId> = if read_only {
            self.ro_list.objs().to_vec()
        } else {
            self.rw_list.objs().to_vec()
        };
        for id in ids {
            self.make_shallow_copy(id, read_only);
        }
    }

    fn make_shallow_copy(&mut self, id: SourceObjId, read_only: bool) {
        let region = if read_only { RegionId::Ro } else { RegionId::Rw };
        let (src, kind, bytes) = {
            let info = self.table.at(id);
            (info.source_address(), info.kind(), info.size_in_bytes())
        };

        let oldtop = self.region(region).top();
        let mut index_slot_bytes = 0;
        if kind.has_index_slot() {
            self.allocate(region, BYTES_IN_WORD, BYTES_IN_WORD);
            index_slot_bytes = BYTES_IN_WORD;
            self.stats.record_other(BYTES_IN_WORD, read_only);
        }
        let dest = self.allocate(region, bytes, BYTES_IN_WORD);
        unsafe {
            std::ptr::copy_nonoverlapping(src.to_ptr::<u8>(), dest.to_mut_ptr::<u8>(), bytes);
        }
        if let Some(&(clone, _)) = self.dispatch_clones.get(&kind) {
            self.marker.set_and_mark_pointer(dest, clone.as_usize());
        }
        let newtop = self.region(region).top();
        self.stats
            .record(kind.name(), newtop - oldtop - index_slot_bytes, read_only);

        trace!("Copy: {} ==> {} {:>5} {}", src, dest, bytes, kind.name());
        self.table.at_mut(id).set_dumped_address(dest);
    }

    /// Point the pointer fields of every copy in the list to the copies of their targets.
    fn relocate_embedded_pointers(&mut self, read_only: bool) {
        let list = if read_only {
            &self.ro_list
        } else {
            &self.rw_list
        };
        let mask = self.mask;
        for &id in list.objs() {
            let info = self.table.at(id);
            let dst = dumped_address_of(info);
            let start = info.ptrmap_start();
            for bit in list.ptrmap().iter_set_bits(start, info.ptrmap_end()) {
                let slot = RefSlot::from_address(dst + (bit - start) * BYTES_IN_WORD);
                let Some(target) = slot.load_object(mask) else {
                    continue;
                };
                let target_info = self.table.get(target).unwrap_or_else(|| {
                    panic!(
                        "Field {:?} of {:?} object {} points to {}, which was not gathered",
                        slot,
                        info.kind(),
                        info.source_address(),
                        target
                    )
                });
                if target_info.follow_mode() == FollowMode::Nullify {
                    trace!("Nullify {:?} (was {})", slot, target);
                    slot.clear();
                } else {
                    slot.store(dumped_address_of(target_info), mask);
                    self.marker.mark_pointer(slot.as_address());
                }
            }
        }
    }

    fn relocate_special_refs(&mut self) {
        if self.special_refs.is_empty() {
            return;
        }
        // Copied objects by source address, for interior pointers.
        let copied: BTreeMap<Address, SourceObjId> = self
            .table
            .iter()
            .enumerate()
            .filter(|(_, info)| info.should_copy())
            .map(|(id, info)| (info.source_address(), id))
            .collect();

        let updates: Vec<(Address, usize)> = self
            .special_refs
            .iter()
            .map(|sr| {
                let info = self
                    .table
                    .get(sr.src_obj)
                    .unwrap_or_else(|| panic!("{} was not gathered", sr.src_obj));
                let src_value = unsafe { (sr.src_obj + sr.field_offset).load::<usize>() };
                let dst_slot = dumped_address_of(info) + sr.field_offset;
                let dst_value = unsafe { dst_slot.load::<usize>() };
                assert_eq!(
                    src_value, dst_value,
                    "{:?} reference at {} was already relocated",
                    sr.kind, dst_slot
                );
                (dst_slot, self.resolve_special_ref(&copied, sr.kind, src_value))
            })
            .collect();

        debug!("Relocating {} special references", updates.len());
        for (slot, value) in updates {
            self.marker.set_and_mark_pointer(slot, value);
        }
    }

    fn resolve_special_ref(
        &self,
        copied: &BTreeMap<Address, SourceObjId>,
        kind: SpecialRefKind,
        value: usize,
    ) -> usize {
        let addr = unsafe { Address::from_usize(value) };
        // Code in mc, such as a trampoline, or an existing archive.
        if self.is_in_buffer(addr) || self.policy.is_in_existing_region(addr) {
            return value;
        }
        if let Some((_, &id)) = copied.range(..=addr).next_back() {
            let info = self.table.at(id);
            if info.contains(addr) {
                return (dumped_address_of(info) + (addr - info.source_address())).as_usize();
            }
        }
        panic!(
            "{:?} reference {} points neither into the archive nor into a copied object",
            kind, addr
        )
    }

    fn relocate_roots(&mut self, providers: &mut [&mut dyn RootProvider<K>]) {
        let table = &self.table;
        let resolve = |obj: Address| match table.get(obj) {
            Some(info) => info.dumped_address().unwrap_or(Address::ZERO),
            None => panic!("Root {} was not gathered", obj),
        };
        let relocator = RootRelocator::new(self.mask, &resolve);
        for provider in providers.iter_mut() {
            provider.relocate_roots(&relocator);
        }
    }

    fn verify_roots(&self, providers: &mut [&mut dyn RootProvider<K>]) {
        let mask = self.mask;
        for provider in providers.iter_mut() {
            let name = provider.name();
            provider.push_roots(&mut |slot: Address, _kind: K| {
                if let Some(obj) = RefSlot::from_address(slot).load_object(mask) {
                    assert!(
                        self.is_in_buffer(obj) || self.policy.is_in_existing_region(obj),
                        "Root of {} at {} points to {}, outside the archive",
                        name,
                        slot,
                        obj
                    );
                }
            });
        }
    }

    fn verify_marked_pointers(&self) {
        let ptrmap = self.marker.ptrmap();
        for bit in ptrmap.iter_set_bits(0, ptrmap.size()) {
            let loc = self.buffer_bottom + bit * BYTES_IN_WORD;
            let target = RefSlot::from_address(loc).load(self.mask);
            if target.is_null() {
                continue;
            }
            assert!(
                self.is_in_buffer(target.address())
                    || self.policy.is_in_existing_region(target.address()),
                "Marked pointer at {} points to {}, outside the archive",
                loc,
                target.address()
            );
        }
    }

    fn write_serialized_data(&mut self) {
        let mut clones: Vec<DispatchClone> = self
            .dispatch_clones
            .iter()
            .map(|(kind, &(addr, len))| DispatchClone {
                name: kind.name().as_bytes().to_vec(),
                address: addr.as_usize(),
                len: len as u32,
            })
            .collect();
        // The slots now hold the relocated roots.
        let mut roots: Vec<ArchivedRoots> = self
            .root_slots
            .iter()
            .map(|(name, slots)| ArchivedRoots {
                provider: name.as_bytes().to_vec(),
                roots: slots.iter().map(|s| unsafe { s.load::<usize>() }).collect(),
            })
            .collect();

        let start = self.ro.top();
        self.serialized_data = start;
        {
            let mut soc = WriteClosure::new(&mut self.ro, &mut self.marker);
            if let Err(e) = serialize_archive_data(&mut soc, &mut clones, &mut roots) {
                panic!("Unable to write serialized data: {}", e);
            }
        }
        let bytes = self.ro.top() - start;
        self.stats.record_other(bytes, true);
        debug!("Serialized data: {} bytes at {}", bytes, start);
    }

    fn print_region_stats(&mut self) {
        let bitmap_bytes = self.marker.ptrmap().size_in_bytes();
        let total = self.mc.used() + self.rw.used() + self.ro.used() + bitmap_bytes;
        let reserved = self.ro.end() - self.buffer_bottom;
        for r in [&self.mc, &self.rw, &self.ro] {
            r.print(total);
        }
        info!(
            "bm  space: {:>9} [ {:>4.1}% of total]",
            bitmap_bytes,
            percent_of(bitmap_bytes, total)
        );
        info!(
            "total    : {:>9} [100.0% of total] out of {:>9} bytes [{:>5.1}% used]",
            total,
            reserved,
            percent_of(total, reserved)
        );
        self.stats
            .print_stats(self.ro.used(), self.rw.used(), self.mc.used());
    }

    /// Rebase every marked pointer into the buffer to the requested base, drop marks of words
    /// that became null, and trim the bitmap after its last marked word.
    fn relocate_to_requested(&mut self) {
        let bottom = self.buffer_bottom;
        let size = self.ro.end() - bottom;
        let delta = self.requested_bottom.get_offset(bottom);
        let relocator = SharedDataRelocator::new(
            bottom,
            self.ro.top(),
            bottom..bottom + size,
            self.requested_bottom..self.requested_bottom + size,
        );

        let ptrmap = self.marker.ptrmap();
        let bits: Vec<usize> = ptrmap.iter_set_bits(0, ptrmap.size()).collect();
        for bit in bits {
            let loc = bottom + bit * BYTES_IN_WORD;
            let value = unsafe { loc.load::<usize>() };
            if value == 0 {
                self.marker.ptrmap_mut().clear_bit(bit);
                continue;
            }
            match relocator.relocate_value(value) {
                Some(new_value) => unsafe { loc.store::<usize>(new_value) },
                None => {
                    let target = TaggedAddress::unpack(value, self.mask).address();
                    assert!(
                        self.policy.is_in_existing_region(target),
                        "Pointer {:#x} at {} points neither into the archive nor into an existing region",
                        value,
                        loc
                    );
                }
            }
        }

        match self.marker.ptrmap().find_last_set_bit() {
            Some(last) => self.marker.compact(last),
            None => self.marker.ptrmap_mut().resize(0),
        }
        if delta != 0 {
            info!(
                "Relocated archive from {} to {} (delta = {:#x})",
                bottom, self.requested_bottom, delta
            );
        }
    }

    /// Write the built archive to `path`. Failing to write is fatal, and leaves no file at `path`.
    pub fn write_archive(&mut self, path: &Path) -> ArchiveSummary {
        assert!(self.is_built, "the archive must be built before it is written");

        let mut header =
            FileMapHeader::new(&self.options, self.requested_bottom, self.buffer_bottom);
        header.serialized_data_offset = (self.serialized_data - self.buffer_bottom) as u64;
        let ptrmap = self.marker.ptrmap();
        // Leading zero bits are not stored.
        let start_pos = ptrmap.find_first_set_bit(0, ptrmap.size()).unwrap_or(0);
        let trimmed = ptrmap.slice(start_pos, ptrmap.size());
        header.ptrmap_start_pos = start_pos as u64;
        header.ptrmap_size_in_bits = trimmed.size() as u64;
        let bitmap_bytes = trimmed.to_bytes();

        // The clones are restored from the running process when the archive is mapped.
        let saved = self.zero_dispatch_clones();
        let result = self.write_file(path, header, &bitmap_bytes);
        self.restore_dispatch_clones(saved);
        let header = result
            .unwrap_or_else(|e| panic!("Unable to write archive {}: {}", path.display(), e));

        let mut region_used: EnumMap<RegionId, usize> = EnumMap::default();
        for id in RegionId::CORE_REGIONS {
            region_used[id] = self.region(id).used();
        }
        region_used[RegionId::Bm] = bitmap_bytes.len();
        ArchiveSummary {
            header,
            requested_base_address: self.requested_bottom,
            buffer_base_address: self.buffer_bottom,
            region_used,
            copied_objects: self.rw_list.len() + self.ro_list.len(),
            marked_pointers: trimmed.count_one_bits(),
        }
    }

    fn write_file(
        &self,
        path: &Path,
        header: FileMapHeader,
        bitmap_bytes: &[u8],
    ) -> io::Result<FileMapHeader> {
        let mut writer = FileMapWriter::create(path, header)?;
        match self.write_regions(&mut writer, bitmap_bytes) {
            Ok(()) => writer.finish(),
            Err(e) => {
                writer.discard();
                Err(e)
            }
        }
    }

    fn write_regions(&self, writer: &mut FileMapWriter, bitmap_bytes: &[u8]) -> io::Result<()> {
        for id in RegionId::CORE_REGIONS {
            let r = self.region(id);
            let bytes = unsafe { r.used_bytes() };
            writer.write_region(id, bytes, r.base() - self.buffer_bottom)?;
        }
        writer.write_region(RegionId::Bm, bitmap_bytes, 0)?;
        writer.write_region(RegionId::Hp, &[], 0)
    }

    fn zero_dispatch_clones(&self) -> Vec<(Address, Vec<usize>)> {
        self.dispatch_clones
            .values()
            .map(|&(addr, len)| {
                let words = (0..len)
                    .map(|i| {
                        let p = addr + i * BYTES_IN_WORD;
                        let w = unsafe { p.load::<usize>() };
                        unsafe { p.store::<usize>(0) };
                        w
                    })
                    .collect();
                (addr, words)
            })
            .collect()
    }

    fn restore_dispatch_clones(&self, saved: Vec<(Address, Vec<usize>)>) {
        for (addr, words) in saved {
            for (i, w) in words.into_iter().enumerate() {
                unsafe { (addr + i * BYTES_IN_WORD).store::<usize>(w) };
            }
        }
    }
}

impl<K: ObjectKind> Drop for ArchiveBuilder<'_, K> {
    fn drop(&mut self) {
        if let Some(reservation) = self.reservation.take() {
            reservation.release();
        }
    }
}

/// Sort the roots of one provider. Two roots of the same object are fatal when the order is
/// not [`RootOrder::AsPushed`].
fn sort_roots<K: ObjectKind>(
    provider: &str,
    order: RootOrder,
    mask: TagMask,
    roots: &mut Vec<MetaRef<K>>,
) {
    match order {
        RootOrder::AsPushed => {}
        RootOrder::SourceAddress => {
            roots.sort_by_key(|r| r.obj(mask));
            if let Some(w) = roots.windows(2).find(|w| w[0].obj(mask) == w[1].obj(mask)) {
                panic!("Duplicate root {} in {}", w[0].obj(mask), provider);
            }
        }
        RootOrder::Name => {
            let mut named: Vec<(Vec<u8>, MetaRef<K>)> = roots
                .drain(..)
                .map(|r| {
                    let obj = r.obj(mask);
                    let name = r.kind().object_name(obj).unwrap_or_else(|| {
                        panic!("{:?} root {} of {} has no name", r.kind(), obj, provider)
                    });
                    (name, r)
                })
                .collect();
            named.sort_by(|a, b| a.0.cmp(&b.0));
            if let Some(w) = named.windows(2).find(|w| w[0].0 == w[1].0) {
                panic!(
                    "Duplicate root named {} in {}",
                    String::from_utf8_lossy(&w[0].0),
                    provider
                );
            }
            roots.extend(named.into_iter().map(|(_, r)| r));
        }
    }
}

struct GatherClosure<'b, 'a, K: ObjectKind> {
    builder: &'b mut ArchiveBuilder<'a, K>,
}

impl<K: ObjectKind> RefClosure<K> for GatherClosure<'_, '_, K> {
    fn do_ref(&mut self, enclosing: Option<Address>, r: &MetaRef<K>) -> bool {
        self.builder.gather_one(enclosing, r)
    }

    fn do_special_ref(&mut self, enclosing: Address, kind: SpecialRefKind, slot: Address) {
        self.builder.special_refs.push(SpecialRef {
            kind,
            src_obj: enclosing,
            field_offset: slot - enclosing,
        });
    }
}
