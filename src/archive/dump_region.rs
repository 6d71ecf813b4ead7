use std::fmt;

use crate::util::constants::{BYTES_IN_PAGE, BYTES_IN_WORD};
use crate::util::conversions::raw_align_up;
use crate::util::os::{Memory, MmapProtection, OSMemory};
use crate::util::Address;

/// A dump region ran out of reserved space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfSpace {
    pub region: &'static str,
    pub needed_bytes: usize,
}

impl fmt::Display for OutOfSpace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Unable to allocate from '{}' region. Please reduce the number of shared classes.",
            self.region
        )
    }
}

/// A bump-pointer region of the dump buffer.
///
/// The region owns `[base, end)` of the buffer reservation. Memory is committed in chunks of at
/// least `commit_granule` bytes as `top` grows. Once [`DumpRegion::pack`]ed, the region is
/// frozen and the next region starts at its aligned end.
pub struct DumpRegion {
    name: &'static str,
    base: Address,
    top: Address,
    end: Address,
    committed_end: Address,
    is_packed: bool,
    region_alignment: usize,
    commit_granule: usize,
}

impl DumpRegion {
    pub fn new(name: &'static str, region_alignment: usize, commit_granule: usize) -> Self {
        DumpRegion {
            name,
            base: Address::ZERO,
            top: Address::ZERO,
            end: Address::ZERO,
            committed_end: Address::ZERO,
            is_packed: false,
            region_alignment,
            commit_granule,
        }
    }

    /// Give the region the range `[base, reserved_end)`. Nothing is committed yet.
    pub fn init(&mut self, base: Address, reserved_end: Address) {
        assert!(
            self.base.is_zero(),
            "region {} is already initialized",
            self.name
        );
        debug_assert!(base <= reserved_end);
        self.base = base;
        self.top = base;
        self.end = reserved_end;
        self.committed_end = base;
    }

    /// Allocate `num_bytes` bytes at `alignment` (at least a word) and zero them.
    ///
    /// Returns [`OutOfSpace`] if the allocation would pass the end of the region. Memory is
    /// committed as needed; failing to commit reserved memory is fatal.
    pub fn allocate(&mut self, num_bytes: usize, alignment: usize) -> Result<Address, OutOfSpace> {
        let alignment = alignment.max(BYTES_IN_WORD);
        let p = self.top.align_up(alignment);
        let newtop = p + raw_align_up(num_bytes, alignment);
        self.expand_top_to(newtop)?;
        OSMemory::zero(p, newtop - p);
        Ok(p)
    }

    /// Append one word at `top`, which must be word-aligned.
    pub fn append_word(&mut self, value: usize) -> Result<Address, OutOfSpace> {
        debug_assert!(self.top.is_word_aligned(), "bad alignment");
        let p = self.top;
        self.expand_top_to(p + BYTES_IN_WORD)?;
        unsafe { p.store::<usize>(value) };
        Ok(p)
    }

    fn expand_top_to(&mut self, newtop: Address) -> Result<(), OutOfSpace> {
        assert!(
            self.is_allocatable(),
            "region {} is not allocatable",
            self.name
        );
        if newtop > self.end {
            return Err(OutOfSpace {
                region: self.name,
                needed_bytes: newtop.get_extent(self.top),
            });
        }
        self.commit_to(newtop);
        self.top = newtop;
        Ok(())
    }

    fn commit_to(&mut self, newtop: Address) {
        if newtop <= self.committed_end {
            return;
        }
        let min_bytes = raw_align_up(newtop - self.committed_end, BYTES_IN_PAGE);
        let uncommitted = self.end - self.committed_end;
        let commit = min_bytes.max(self.commit_granule).min(uncommitted);
        debug_assert!(commit >= min_bytes, "sanity");

        if let Err(e) = OSMemory::commit(self.committed_end, commit, MmapProtection::ReadWrite) {
            panic!(
                "Failed to expand shared space to {} bytes (region {}): {}",
                newtop - self.base,
                self.name,
                e
            );
        }
        self.committed_end += commit;
        info!(
            "Expanding region {} by {:>7} bytes [total {:>9} bytes ending at {}]",
            self.name,
            commit,
            self.committed_end - self.base,
            self.committed_end
        );
    }

    /// Freeze this region. Its end is rounded up to the region alignment, and `next`, if given,
    /// starts there and may use the rest of this region's reserved range.
    pub fn pack(&mut self, next: Option<&mut DumpRegion>) {
        assert!(!self.is_packed(), "region {} is already packed", self.name);
        let reserved_end = self.end;
        self.end = self.top.align_up(self.region_alignment);
        self.is_packed = true;
        if let Some(next) = next {
            next.init(self.end, reserved_end);
            // The committed pages past our end are usable by the next region.
            next.committed_end = self.committed_end.max(self.end).min(reserved_end);
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
    pub fn base(&self) -> Address {
        self.base
    }
    pub fn top(&self) -> Address {
        self.top
    }
    pub fn end(&self) -> Address {
        self.end
    }
    pub fn reserved(&self) -> usize {
        self.end - self.base
    }
    pub fn used(&self) -> usize {
        self.top - self.base
    }
    pub fn is_packed(&self) -> bool {
        self.is_packed
    }
    pub fn is_allocatable(&self) -> bool {
        !self.is_packed() && !self.base.is_zero()
    }
    pub fn contains(&self, p: Address) -> bool {
        self.base <= p && p < self.top
    }

    /// The used bytes of the region.
    ///
    /// # Safety
    /// The region must not be written while the slice is alive.
    pub unsafe fn used_bytes<'a>(&self) -> &'a [u8] {
        self.base.as_bytes(self.used())
    }

    pub fn print(&self, total_bytes: usize) {
        info!(
            "{:<3} space: {:>9} [ {:>4.1}% of total] out of {:>9} bytes [{:>5.1}% used] at {}",
            self.name,
            self.used(),
            percent_of(self.used(), total_bytes),
            self.reserved(),
            percent_of(self.used(), self.reserved()),
            self.base
        );
    }

    pub fn print_out_of_space_msg(&self, failing_region: &str, needed_bytes: usize) {
        error!(
            "[{:<8}] {} - {} capacity ={:>9}, allocated ={:>9}{}",
            self.name,
            self.base,
            self.top,
            self.end.get_extent(self.base),
            self.top.get_extent(self.base),
            if self.name == failing_region {
                format!(" required = {}", needed_bytes)
            } else {
                String::new()
            }
        );
    }
}

pub(crate) fn percent_of(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmap_anno_test;
    use crate::util::constants::BYTES_IN_MBYTE;

    const ALIGN: usize = 64 * 1024;

    fn with_reservation<F: FnOnce(Address, usize)>(size: usize, f: F) {
        let base = OSMemory::reserve(None, size, ALIGN, mmap_anno_test!()).unwrap();
        f(base, size);
        OSMemory::release(base, size).unwrap();
    }

    #[test]
    fn allocate_zeroes_and_aligns() {
        with_reservation(4 * BYTES_IN_MBYTE, |base, size| {
            let mut r = DumpRegion::new("rw", ALIGN, BYTES_IN_MBYTE);
            r.init(base, base + size);
            let a = r.allocate(3, BYTES_IN_WORD).unwrap();
            assert_eq!(a, base);
            assert_eq!(r.used(), BYTES_IN_WORD);
            let b = r.allocate(16, 16).unwrap();
            assert!(b.is_aligned_to(16));
            assert_eq!(unsafe { b.load::<u64>() }, 0);
            assert!(r.contains(b));
            let w = r.append_word(0xdead).unwrap();
            assert_eq!(unsafe { w.load::<usize>() }, 0xdead);
        });
    }

    #[test]
    fn pack_starts_next_region_at_aligned_end() {
        with_reservation(4 * BYTES_IN_MBYTE, |base, size| {
            let mut mc = DumpRegion::new("mc", ALIGN, BYTES_IN_MBYTE);
            let mut rw = DumpRegion::new("rw", ALIGN, BYTES_IN_MBYTE);
            mc.init(base, base + size);
            mc.allocate(100, BYTES_IN_WORD).unwrap();
            assert!(!rw.is_allocatable());
            mc.pack(Some(&mut rw));
            assert!(mc.is_packed());
            assert!(!mc.is_allocatable());
            assert_eq!(rw.base(), mc.top().align_up(ALIGN));
            assert_eq!(rw.base(), mc.end());
            assert_eq!(rw.end(), base + size);
            let p = rw.allocate(8, BYTES_IN_WORD).unwrap();
            assert_eq!(p, rw.base());
        });
    }

    #[test]
    fn out_of_space() {
        with_reservation(ALIGN, |base, size| {
            let mut r = DumpRegion::new("ro", ALIGN, BYTES_IN_MBYTE);
            r.init(base, base + size);
            r.allocate(size - 16, BYTES_IN_WORD).unwrap();
            let err = r.allocate(32, BYTES_IN_WORD).unwrap_err();
            assert_eq!(err.region, "ro");
            assert_eq!(err.needed_bytes, 32);
            assert!(err.to_string().contains("Unable to allocate from 'ro' region"));
            // A failed allocation does not move top.
            assert_eq!(r.used(), size - 16);
        });
    }
}
