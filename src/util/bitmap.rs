//! A growable bit map, one bit per word.
//!
//! Used for the per-list pointer maps of source objects and for the buffer-wide map of pointer
//! words that is persisted in the archive.

use std::fmt;

use crate::util::constants::{BITS_IN_WORD, BYTES_IN_WORD, LOG_BITS_IN_WORD};

#[derive(Clone, Default, PartialEq, Eq)]
pub struct BitMap {
    words: Vec<usize>,
    size: usize,
}

fn word_index(bit: usize) -> usize {
    bit >> LOG_BITS_IN_WORD
}

fn bit_mask(bit: usize) -> usize {
    1 << (bit & (BITS_IN_WORD - 1))
}

fn words_for(size: usize) -> usize {
    (size + BITS_IN_WORD - 1) >> LOG_BITS_IN_WORD
}

impl BitMap {
    /// Create a bit map of `size` bits, all clear.
    pub fn new(size: usize) -> Self {
        BitMap {
            words: vec![0; words_for(size)],
            size,
        }
    }

    /// The number of bits in the map.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The number of bytes needed to store the map.
    pub fn size_in_bytes(&self) -> usize {
        words_for(self.size) * BYTES_IN_WORD
    }

    /// Grow or shrink the map. New bits are clear. Bits beyond the new size are dropped.
    pub fn resize(&mut self, new_size: usize) {
        self.words.resize(words_for(new_size), 0);
        self.size = new_size;
        self.clear_tail();
    }

    fn clear_tail(&mut self) {
        let rem = self.size & (BITS_IN_WORD - 1);
        if rem != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1usize << rem) - 1;
            }
        }
    }

    pub fn at(&self, bit: usize) -> bool {
        debug_assert!(bit < self.size, "bit {} out of range {}", bit, self.size);
        self.words[word_index(bit)] & bit_mask(bit) != 0
    }

    pub fn set_bit(&mut self, bit: usize) {
        debug_assert!(bit < self.size, "bit {} out of range {}", bit, self.size);
        self.words[word_index(bit)] |= bit_mask(bit);
    }

    pub fn clear_bit(&mut self, bit: usize) {
        debug_assert!(bit < self.size, "bit {} out of range {}", bit, self.size);
        self.words[word_index(bit)] &= !bit_mask(bit);
    }

    /// Is no bit set?
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn count_one_bits(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Find the first set bit in `[from, to)`.
    pub fn find_first_set_bit(&self, from: usize, to: usize) -> Option<usize> {
        let to = to.min(self.size);
        let mut bit = from;
        while bit < to {
            let word = self.words[word_index(bit)] >> (bit & (BITS_IN_WORD - 1));
            if word == 0 {
                // Skip to the start of the next word.
                bit = (word_index(bit) + 1) << LOG_BITS_IN_WORD;
                continue;
            }
            let found = bit + word.trailing_zeros() as usize;
            return if found < to { Some(found) } else { None };
        }
        None
    }

    /// Find the last set bit in the whole map.
    pub fn find_last_set_bit(&self) -> Option<usize> {
        self.words
            .iter()
            .enumerate()
            .rev()
            .find(|(_, w)| **w != 0)
            .map(|(i, w)| (i << LOG_BITS_IN_WORD) + (BITS_IN_WORD - 1 - w.leading_zeros() as usize))
    }

    /// Visit every set bit in `[from, to)` in ascending order. Stop early if `f` returns false.
    /// Returns false if the iteration was stopped early.
    pub fn iterate<F: FnMut(usize) -> bool>(&self, from: usize, to: usize, mut f: F) -> bool {
        let mut next = from;
        while let Some(bit) = self.find_first_set_bit(next, to) {
            if !f(bit) {
                return false;
            }
            next = bit + 1;
        }
        true
    }

    /// Iterator over the set bits in `[from, to)`.
    pub fn iter_set_bits(&self, from: usize, to: usize) -> SetBits<'_> {
        SetBits {
            map: self,
            next: from,
            to,
        }
    }

    /// A new map holding the bits `[from, to)` of this map, renumbered to start at zero.
    pub fn slice(&self, from: usize, to: usize) -> BitMap {
        let to = to.min(self.size);
        let mut result = BitMap::new(to.saturating_sub(from));
        for bit in self.iter_set_bits(from, to) {
            result.set_bit(bit - from);
        }
        result
    }

    /// Serialize the map as native-endian words.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.size_in_bytes());
        for w in &self.words {
            bytes.extend_from_slice(&w.to_ne_bytes());
        }
        bytes
    }

    /// Restore a map of `size` bits from the bytes produced by [`BitMap::to_bytes`].
    pub fn from_bytes(bytes: &[u8], size: usize) -> BitMap {
        assert!(
            bytes.len() >= words_for(size) * BYTES_IN_WORD,
            "{} bytes cannot hold a bit map of {} bits",
            bytes.len(),
            size
        );
        let words = bytes
            .chunks_exact(BYTES_IN_WORD)
            .take(words_for(size))
            .map(|c| {
                let mut buf = [0u8; BYTES_IN_WORD];
                buf.copy_from_slice(c);
                usize::from_ne_bytes(buf)
            })
            .collect();
        let mut map = BitMap { words, size };
        map.clear_tail();
        map
    }
}

pub struct SetBits<'a> {
    map: &'a BitMap,
    next: usize,
    to: usize,
}

impl Iterator for SetBits<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let bit = self.map.find_first_set_bit(self.next, self.to)?;
        self.next = bit + 1;
        Some(bit)
    }
}

impl fmt::Debug for BitMap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "BitMap({} bits, {} set)", self.size, self.count_one_bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_find() {
        let mut map = BitMap::new(200);
        assert!(map.is_empty());
        map.set_bit(3);
        map.set_bit(64);
        map.set_bit(199);
        assert_eq!(map.find_first_set_bit(0, 200), Some(3));
        assert_eq!(map.find_first_set_bit(4, 200), Some(64));
        assert_eq!(map.find_first_set_bit(65, 199), None);
        assert_eq!(map.find_last_set_bit(), Some(199));
        assert_eq!(map.iter_set_bits(0, 200).collect::<Vec<_>>(), vec![3, 64, 199]);
        map.clear_bit(199);
        assert_eq!(map.find_last_set_bit(), Some(64));
        assert_eq!(map.count_one_bits(), 2);
    }

    #[test]
    fn iterate_stops_early() {
        let mut map = BitMap::new(10);
        map.set_bit(1);
        map.set_bit(5);
        map.set_bit(7);
        let mut seen = vec![];
        let completed = map.iterate(0, 10, |bit| {
            seen.push(bit);
            bit < 5
        });
        assert!(!completed);
        assert_eq!(seen, vec![1, 5]);
    }

    #[test]
    fn shrinking_drops_bits() {
        let mut map = BitMap::new(128);
        map.set_bit(70);
        map.set_bit(10);
        map.resize(65);
        assert_eq!(map.find_last_set_bit(), Some(10));
        map.resize(128);
        assert!(!map.at(70));
    }

    #[test]
    fn slice_renumbers() {
        let mut map = BitMap::new(300);
        map.set_bit(130);
        map.set_bit(131);
        map.set_bit(290);
        let s = map.slice(128, 292);
        assert_eq!(s.size(), 164);
        assert_eq!(s.iter_set_bits(0, s.size()).collect::<Vec<_>>(), vec![2, 3, 162]);
    }

    #[test]
    fn bytes_restore_same_bits() {
        let mut map = BitMap::new(100);
        map.set_bit(0);
        map.set_bit(99);
        let bytes = map.to_bytes();
        assert_eq!(bytes.len(), map.size_in_bytes());
        assert_eq!(BitMap::from_bytes(&bytes, 100), map);
    }
}
