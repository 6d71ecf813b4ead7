//! The serialized data stream.
//!
//! After all objects are copied, the builder writes a stream of words at the end of the ro
//! region: the dispatch table copies and the roots of every provider, in the order the builder
//! walked them. The loader replays the same sequence of calls to read them back. Each call
//! consumes exactly one word, except [`SerializeClosure::do_bytes`].

use crate::archive::dump_region::DumpRegion;
use crate::archive::error::MapArchiveError;
use crate::archive::ptr_marker::ArchivePtrMarker;
use crate::util::constants::BYTES_IN_WORD;
use crate::util::conversions::bytes_to_words_up;
use crate::util::Address;

/// Writes or reads the serialized data stream. Writing never fails; reading fails when the stream
/// does not hold what the caller expects.
pub trait SerializeClosure {
    /// True when loading an archive, false when dumping one.
    fn reading(&self) -> bool;

    /// A pointer word. Dumping marks it for relocation.
    fn do_ptr(&mut self, p: &mut usize) -> Result<(), MapArchiveError>;

    fn do_u32(&mut self, p: &mut u32) -> Result<(), MapArchiveError>;

    /// A marker that must match when reading.
    fn do_tag(&mut self, tag: i32) -> Result<(), MapArchiveError>;

    /// A length-prefixed byte string.
    fn do_bytes(&mut self, bytes: &mut Vec<u8>) -> Result<(), MapArchiveError>;
}

/// Appends the stream to the ro region of the dump buffer.
pub struct WriteClosure<'a> {
    region: &'a mut DumpRegion,
    marker: &'a mut ArchivePtrMarker,
}

impl<'a> WriteClosure<'a> {
    pub fn new(region: &'a mut DumpRegion, marker: &'a mut ArchivePtrMarker) -> Self {
        WriteClosure { region, marker }
    }

    fn append(&mut self, value: usize) -> Address {
        match self.region.append_word(value) {
            Ok(p) => p,
            Err(e) => {
                self.region.print_out_of_space_msg(e.region, e.needed_bytes);
                panic!("{}", e);
            }
        }
    }
}

impl SerializeClosure for WriteClosure<'_> {
    fn reading(&self) -> bool {
        false
    }

    fn do_ptr(&mut self, p: &mut usize) -> Result<(), MapArchiveError> {
        let loc = self.append(*p);
        self.marker.mark_pointer(loc);
        Ok(())
    }

    fn do_u32(&mut self, p: &mut u32) -> Result<(), MapArchiveError> {
        self.append(*p as usize);
        Ok(())
    }

    fn do_tag(&mut self, tag: i32) -> Result<(), MapArchiveError> {
        self.append(tag as isize as usize);
        Ok(())
    }

    fn do_bytes(&mut self, bytes: &mut Vec<u8>) -> Result<(), MapArchiveError> {
        self.append(bytes.len());
        for chunk in bytes.chunks(BYTES_IN_WORD) {
            let mut buf = [0u8; BYTES_IN_WORD];
            buf[..chunk.len()].copy_from_slice(chunk);
            self.append(usize::from_ne_bytes(buf));
        }
        Ok(())
    }
}

/// Reads the stream from a mapped archive.
pub struct ReadClosure {
    cursor: Address,
    end: Address,
}

impl ReadClosure {
    /// Read the stream in `[start, end)`.
    pub fn new(start: Address, end: Address) -> Self {
        debug_assert!(start.is_word_aligned());
        ReadClosure { cursor: start, end }
    }

    fn remaining_words(&self) -> usize {
        (self.end - self.cursor) / BYTES_IN_WORD
    }

    fn next(&mut self) -> Result<usize, MapArchiveError> {
        if self.remaining_words() == 0 {
            return Err(MapArchiveError::IncompatibleArchive(format!(
                "serialized data ends at {}",
                self.end
            )));
        }
        let value = unsafe { self.cursor.load::<usize>() };
        self.cursor += BYTES_IN_WORD;
        Ok(value)
    }

    /// The address of the next word to read.
    pub fn cursor(&self) -> Address {
        self.cursor
    }
}

impl SerializeClosure for ReadClosure {
    fn reading(&self) -> bool {
        true
    }

    fn do_ptr(&mut self, p: &mut usize) -> Result<(), MapArchiveError> {
        *p = self.next()?;
        Ok(())
    }

    fn do_u32(&mut self, p: &mut u32) -> Result<(), MapArchiveError> {
        *p = self.next()? as u32;
        Ok(())
    }

    fn do_tag(&mut self, tag: i32) -> Result<(), MapArchiveError> {
        let found = self.next()? as isize as i32;
        if found != tag {
            return Err(MapArchiveError::IncompatibleArchive(format!(
                "expected tag {:#x} in serialized data, found {:#x}",
                tag, found
            )));
        }
        Ok(())
    }

    fn do_bytes(&mut self, bytes: &mut Vec<u8>) -> Result<(), MapArchiveError> {
        let len = self.next()?;
        if bytes_to_words_up(len) > self.remaining_words() {
            return Err(MapArchiveError::IncompatibleArchive(format!(
                "byte string of {} bytes runs past the serialized data",
                len
            )));
        }
        bytes.clear();
        for _ in 0..bytes_to_words_up(len) {
            bytes.extend_from_slice(&self.next()?.to_ne_bytes());
        }
        bytes.truncate(len);
        Ok(())
    }
}

const TAG_BEGIN: i32 = 0x5ca1_ab1e;
const TAG_DISPATCH_TABLES: i32 = 1;
const TAG_PROVIDER_END: i32 = 2;
const TAG_END: i32 = 0x0e0d;

/// The copy of a dispatch table in the mc region.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchClone {
    /// The name of the kind the table belongs to.
    pub name: Vec<u8>,
    pub address: usize,
    pub len: u32,
}

/// The roots of one provider, in the order the builder walked them. Each root is the word its
/// slot held after relocation, tag bits included.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArchivedRoots {
    pub provider: Vec<u8>,
    pub roots: Vec<usize>,
}

/// A count followed by that many items. When reading, items are read one at a time, so a
/// corrupt count runs into the end of the stream before much is allocated for it.
fn do_items<T: Default>(
    soc: &mut dyn SerializeClosure,
    items: &mut Vec<T>,
    mut do_item: impl FnMut(&mut dyn SerializeClosure, &mut T) -> Result<(), MapArchiveError>,
) -> Result<(), MapArchiveError> {
    let mut count = items.len() as u32;
    soc.do_u32(&mut count)?;
    if soc.reading() {
        items.clear();
        for _ in 0..count {
            let mut item = T::default();
            do_item(soc, &mut item)?;
            items.push(item);
        }
    } else {
        for item in items.iter_mut() {
            do_item(soc, item)?;
        }
    }
    Ok(())
}

/// The whole serialized data stream: the dispatch table clones, then the roots of every
/// provider. Used in both directions, so the stream is read exactly as it was written.
pub(crate) fn serialize_archive_data(
    soc: &mut dyn SerializeClosure,
    dispatch_clones: &mut Vec<DispatchClone>,
    provider_roots: &mut Vec<ArchivedRoots>,
) -> Result<(), MapArchiveError> {
    soc.do_tag(TAG_BEGIN)?;

    do_items(soc, dispatch_clones, |soc, clone| {
        soc.do_bytes(&mut clone.name)?;
        soc.do_ptr(&mut clone.address)?;
        soc.do_u32(&mut clone.len)
    })?;
    soc.do_tag(TAG_DISPATCH_TABLES)?;

    do_items(soc, provider_roots, |soc, provider| {
        soc.do_bytes(&mut provider.provider)?;
        do_items(soc, &mut provider.roots, |soc, root| soc.do_ptr(root))?;
        soc.do_tag(TAG_PROVIDER_END)
    })?;
    soc.do_tag(TAG_END)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmap_anno_test;
    use crate::util::constants::BYTES_IN_MBYTE;
    use crate::util::os::{Memory, OSMemory};

    fn with_ro_region(f: impl FnOnce(&mut DumpRegion, &mut ArchivePtrMarker)) {
        let size = BYTES_IN_MBYTE;
        let base = OSMemory::reserve(None, size, 64 * 1024, mmap_anno_test!()).unwrap();
        let mut region = DumpRegion::new("ro", 64 * 1024, BYTES_IN_MBYTE);
        region.init(base, base + size);
        let mut marker = ArchivePtrMarker::new(base, base + size);
        f(&mut region, &mut marker);
        OSMemory::release(base, size).unwrap();
    }

    #[test]
    fn replay_reads_what_was_written() {
        with_ro_region(|region, marker| {
            let start = region.top();
            {
                let mut w = WriteClosure::new(region, marker);
                w.do_tag(-1).unwrap();
                w.do_u32(&mut 7).unwrap();
                w.do_ptr(&mut 0x1230).unwrap();
                w.do_ptr(&mut 0).unwrap();
                w.do_bytes(&mut b"Klass-with-a-long-name".to_vec()).unwrap();
                w.do_tag(-2).unwrap();
            }
            // Only the non-null pointer is marked.
            assert_eq!(marker.ptrmap().count_one_bits(), 1);
            assert!(marker.is_marked(start + 2 * BYTES_IN_WORD));

            let mut r = ReadClosure::new(start, region.top());
            let (mut n, mut p, mut q, mut bytes) = (0u32, 0usize, 1usize, vec![]);
            r.do_tag(-1).unwrap();
            r.do_u32(&mut n).unwrap();
            r.do_ptr(&mut p).unwrap();
            r.do_ptr(&mut q).unwrap();
            r.do_bytes(&mut bytes).unwrap();
            r.do_tag(-2).unwrap();
            assert_eq!((n, p, q), (7, 0x1230, 0));
            assert_eq!(bytes, b"Klass-with-a-long-name");
            assert_eq!(r.cursor(), region.top());

            // Past the end.
            assert!(matches!(
                r.do_ptr(&mut p),
                Err(MapArchiveError::IncompatibleArchive(_))
            ));
        })
    }

    #[test]
    fn clones_and_roots() {
        with_ro_region(|region, marker| {
            let mut clones = vec![DispatchClone {
                name: b"Klass".to_vec(),
                address: 0x1000,
                len: 3,
            }];
            let mut roots = vec![
                ArchivedRoots {
                    provider: b"classes".to_vec(),
                    roots: vec![0x2000, 0, 0x3001],
                },
                ArchivedRoots {
                    provider: b"symbols".to_vec(),
                    roots: vec![],
                },
            ];

            let start = region.top();
            serialize_archive_data(&mut WriteClosure::new(region, marker), &mut clones, &mut roots)
                .unwrap();
            // The clone address and the two non-null roots.
            assert_eq!(marker.ptrmap().count_one_bits(), 3);

            let mut r = ReadClosure::new(start, region.top());
            let mut read_clones = vec![];
            let mut read_roots = vec![];
            serialize_archive_data(&mut r, &mut read_clones, &mut read_roots).unwrap();
            assert_eq!(read_clones, clones);
            assert_eq!(read_roots, roots);
            assert_eq!(r.cursor(), region.top());
        })
    }

    #[test]
    fn truncated_stream_is_an_error() {
        with_ro_region(|region, marker| {
            let mut clones = vec![];
            let mut roots = vec![ArchivedRoots {
                provider: b"classes".to_vec(),
                roots: vec![0x2000; 16],
            }];
            let start = region.top();
            serialize_archive_data(&mut WriteClosure::new(region, marker), &mut clones, &mut roots)
                .unwrap();

            let end = region.top() - 4 * BYTES_IN_WORD;
            let mut r = ReadClosure::new(start, end);
            let result = serialize_archive_data(&mut r, &mut vec![], &mut vec![]);
            assert!(matches!(result, Err(MapArchiveError::IncompatibleArchive(_))));
        })
    }

    #[test]
    fn wrong_tag_is_an_error() {
        with_ro_region(|region, marker| {
            let start = region.top();
            WriteClosure::new(region, marker).do_tag(3).unwrap();
            let mut r = ReadClosure::new(start, region.top());
            assert!(matches!(
                r.do_tag(4),
                Err(MapArchiveError::IncompatibleArchive(_))
            ));
        })
    }
}
