use std::ops::Range;

use crate::util::bitmap::BitMap;
use crate::util::constants::{BITS_IN_WORD, BYTES_IN_WORD};
use crate::util::conversions::raw_align_up;
use crate::util::Address;

/// Rebases the pointers of an archive that is mapped somewhere other than where it was built to
/// be mapped.
///
/// Bit `i` of the pointer bitmap stands for the word at `patch_base + i * BYTES_IN_WORD`. Each
/// marked word that points into the old range is moved by `new_base - old_base`. Other marked
/// words point into pre-existing archives, which do not move, and are left alone.
pub struct SharedDataRelocator {
    patch_base: Address,
    patch_end: Address,
    valid_old: Range<Address>,
    valid_new: Range<Address>,
    delta: isize,
}

impl SharedDataRelocator {
    pub fn new(
        patch_base: Address,
        patch_end: Address,
        valid_old: Range<Address>,
        valid_new: Range<Address>,
    ) -> Self {
        let delta = valid_new.start.get_offset(valid_old.start);
        debug!(
            "SharedDataRelocator::patch [{}, {}) from [{}, {}) to [{}, {}), delta = {:#x}",
            patch_base,
            patch_end,
            valid_old.start,
            valid_old.end,
            valid_new.start,
            valid_new.end,
            delta
        );
        SharedDataRelocator {
            patch_base,
            patch_end,
            valid_old,
            valid_new,
            delta,
        }
    }

    pub fn delta(&self) -> isize {
        self.delta
    }

    /// The rebased value of the pointer word `value`, or `None` if it does not point into the old
    /// range. A rebased pointer that leaves the new range is fatal.
    pub fn relocate_value(&self, value: usize) -> Option<usize> {
        let old = unsafe { Address::from_usize(value) };
        if !self.valid_old.contains(&old) {
            return None;
        }
        let new = old + self.delta;
        assert!(
            self.valid_new.contains(&new),
            "Relocated pointer {} (from {}) is outside [{}, {})",
            new,
            old,
            self.valid_new.start,
            self.valid_new.end
        );
        Some(new.as_usize())
    }

    fn do_bit(&self, bit: usize) {
        let p = self.patch_base + bit * BYTES_IN_WORD;
        debug_assert!(p < self.patch_end, "must be");
        let value = unsafe { p.load::<usize>() };
        if let Some(new_value) = self.relocate_value(value) {
            trace!("Patch {}: {:#x} -> {:#x}", p, value, new_value);
            unsafe { p.store::<usize>(new_value) };
        }
    }

    /// Patch the words marked in `bitmap` in `[from, to)`.
    fn patch_bits(&self, bitmap: &BitMap, from: usize, to: usize) {
        bitmap.iterate(from, to, |bit| {
            self.do_bit(bit);
            true
        });
    }

    /// Patch every word marked in `bitmap`.
    pub fn patch(&self, bitmap: &BitMap) {
        self.patch_bits(bitmap, 0, bitmap.size());
    }

    /// Patch every word marked in `bitmap`, with the bitmap split into chunks that `threads`
    /// threads patch in parallel. Each word belongs to exactly one chunk, so no word is written
    /// twice.
    pub fn patch_parallel(&self, bitmap: &BitMap, threads: usize) {
        let size = bitmap.size();
        let threads = threads.max(1);
        // Chunk boundaries on word boundaries of the bitmap.
        let chunk = raw_align_up(size.div_ceil(threads).max(1), BITS_IN_WORD);
        if threads == 1 || size <= chunk {
            self.patch(bitmap);
            return;
        }
        let pool = match rayon_core::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("cds-relocation-{}", i))
            .build()
        {
            Ok(pool) => pool,
            Err(e) => {
                warn!("Unable to start relocation threads ({}), relocating serially", e);
                self.patch(bitmap);
                return;
            }
        };
        debug!(
            "Relocating {} bits with {} threads in chunks of {} bits",
            size, threads, chunk
        );
        pool.scope(|s| {
            for from in (0..size).step_by(chunk) {
                let to = (from + chunk).min(size);
                s.spawn(move |_| self.patch_bits(bitmap, from, to));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(a: usize) -> Address {
        unsafe { Address::from_usize(a) }
    }

    #[test]
    fn only_pointers_into_the_old_range_move() {
        let old = addr(0x8_0000_0000)..addr(0x8_0010_0000);
        let new = addr(0x9_0000_0000)..addr(0x9_0010_0000);
        let mut words = vec![0x8_0000_0040usize, 0x7000_0000, 0x8_000f_fff8 | 0b1, 0x8_0000_0000];
        let base = Address::from_mut_ptr(words.as_mut_ptr());
        let end = base + words.len() * BYTES_IN_WORD;
        let mut bitmap = BitMap::new(words.len());
        bitmap.set_bit(0);
        bitmap.set_bit(1);
        bitmap.set_bit(2);

        SharedDataRelocator::new(base, end, old, new).patch(&bitmap);
        // Tags survive, existing-region pointers and unmarked words do not move.
        assert_eq!(words, vec![0x9_0000_0040, 0x7000_0000, 0x9_000f_fff8 | 0b1, 0x8_0000_0000]);
    }

    #[test]
    fn parallel_patch_matches_serial_patch() {
        let old = addr(0x8_0000_0000)..addr(0x9_0000_0000);
        let new = addr(0x10_0000_0000)..addr(0x11_0000_0000);
        let n = 10_000;
        let original: Vec<usize> = (0..n).map(|i| 0x8_0000_0000 + i * 8).collect();
        let mut bitmap = BitMap::new(n);
        for i in (0..n).filter(|i| i % 3 != 0) {
            bitmap.set_bit(i);
        }

        let mut serial = original.clone();
        let base = Address::from_mut_ptr(serial.as_mut_ptr());
        SharedDataRelocator::new(base, base + n * BYTES_IN_WORD, old.clone(), new.clone())
            .patch(&bitmap);

        let mut parallel = original.clone();
        let base = Address::from_mut_ptr(parallel.as_mut_ptr());
        SharedDataRelocator::new(base, base + n * BYTES_IN_WORD, old, new).patch_parallel(&bitmap, 4);

        assert_eq!(serial, parallel);
        assert_eq!(parallel[0], original[0]);
        assert_eq!(parallel[1], original[1] + 0x8_0000_0000);
    }

    #[test]
    #[should_panic(expected = "is outside")]
    fn leaving_the_new_range_is_fatal() {
        let relocator = SharedDataRelocator::new(
            addr(0x1000),
            addr(0x2000),
            addr(0x8_0000_0000)..addr(0x8_0010_0000),
            addr(0x9_0000_0000)..addr(0x9_0000_1000),
        );
        relocator.relocate_value(0x8_0000_2000);
    }
}
