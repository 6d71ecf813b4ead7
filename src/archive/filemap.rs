//! Writing archive files, and reading them back.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::mem::size_of;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::archive::error::MapArchiveError;
use crate::archive::header::{checksum, FileMapHeader};
use crate::archive::layout::RegionId;
use crate::util::conversions::raw_align_up;
use crate::util::options::Options;
use crate::util::Address;

/// Writes an archive to `<path>.tmp` and renames it to `<path>` when complete. Until then no file
/// exists at `path`, so a failed dump never leaves a file that a later run could try to map.
pub struct FileMapWriter {
    path: PathBuf,
    tmp_path: PathBuf,
    file: File,
    file_offset: u64,
    alignment: u64,
    header: FileMapHeader,
}

fn tmp_path_of(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

impl FileMapWriter {
    /// Start writing an archive described by `header`. The regions follow the header at offsets
    /// aligned to the core region alignment.
    pub fn create(path: &Path, header: FileMapHeader) -> io::Result<Self> {
        let tmp_path = tmp_path_of(path);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        info!("Dumping shared data to file: {}", path.display());
        let alignment = header.core_region_alignment as u64;
        let mut writer = FileMapWriter {
            path: path.to_path_buf(),
            tmp_path,
            file,
            file_offset: 0,
            alignment,
            header,
        };
        // The header is written last. Leave room for it.
        writer.pad_to(raw_align_up(size_of::<FileMapHeader>(), alignment as usize) as u64)?;
        Ok(writer)
    }

    fn pad_to(&mut self, offset: u64) -> io::Result<()> {
        debug_assert!(offset >= self.file_offset);
        const ZEROS: [u8; 4096] = [0; 4096];
        while self.file_offset < offset {
            let n = ((offset - self.file_offset) as usize).min(ZEROS.len());
            self.file.write_all(&ZEROS[..n])?;
            self.file_offset += n as u64;
        }
        Ok(())
    }

    /// Write the bytes of region `id`. `mapping_offset` is the offset of the region from the
    /// mapped base, and is ignored for regions that are not mapped.
    pub fn write_region(
        &mut self,
        id: RegionId,
        bytes: &[u8],
        mapping_offset: usize,
    ) -> io::Result<()> {
        let offset = raw_align_up(self.file_offset as usize, self.alignment as usize) as u64;
        self.pad_to(offset)?;
        self.file.write_all(bytes)?;
        self.file_offset += bytes.len() as u64;

        let r = self.header.region_mut(id);
        r.file_offset = offset;
        r.mapping_offset = if id.is_core() { mapping_offset as u64 } else { 0 };
        r.used = bytes.len() as u64;
        r.checksum = checksum(bytes);
        debug!(
            "Shared file region ({:<3}) {} bytes, file offset {:#010x}, mapping offset {:#010x}",
            id, r.used, r.file_offset, r.mapping_offset
        );
        Ok(())
    }

    /// Seal and write the header, flush the file to disk and move it into place. On failure the
    /// partial file is removed.
    pub fn finish(mut self) -> io::Result<FileMapHeader> {
        match self.seal_and_publish() {
            Ok(()) => Ok(self.header),
            Err(e) => {
                self.discard();
                Err(e)
            }
        }
    }

    fn seal_and_publish(&mut self) -> io::Result<()> {
        let end = raw_align_up(self.file_offset as usize, self.alignment as usize) as u64;
        self.pad_to(end)?;
        self.header.update_checksum();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(self.header.as_bytes())?;
        self.file.sync_all()?;
        fs::rename(&self.tmp_path, &self.path)?;
        info!(
            "Archive written to {} ({} bytes)",
            self.path.display(),
            end
        );
        Ok(())
    }

    /// Give up and remove the partial file.
    pub fn discard(self) {
        drop(self.file);
        if let Err(e) = fs::remove_file(&self.tmp_path) {
            warn!("Failed to remove {}: {}", self.tmp_path.display(), e);
        }
    }
}

/// An opened archive file with a validated header.
pub struct FileMapReader {
    path: PathBuf,
    file: File,
    header: FileMapHeader,
}

impl FileMapReader {
    /// Open `path` and check that its header can be used with `options`.
    pub fn open(path: &Path, options: &Options) -> Result<Self, MapArchiveError> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut buf = vec![0u8; size_of::<FileMapHeader>()];
        if file_len < buf.len() as u64 {
            return Err(MapArchiveError::InvalidHeader(format!(
                "file is too small ({} bytes)",
                file_len
            )));
        }
        file.read_exact_at(&mut buf, 0)?;
        let header = FileMapHeader::from_bytes(&buf)?;
        header.validate(options, file_len)?;
        debug!(
            "Opened {}: requested base {}, mapping size {} bytes",
            path.display(),
            header.requested_base_address(),
            header.mapping_size()
        );
        Ok(FileMapReader {
            path: path.to_path_buf(),
            file,
            header,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn header(&self) -> &FileMapHeader {
        &self.header
    }

    /// Read region `id` into memory at `dst`, which must be committed and writable.
    pub fn read_region_into(&self, id: RegionId, dst: Address) -> io::Result<()> {
        let r = self.header.region(id);
        let buf = unsafe { dst.as_bytes_mut(r.used as usize) };
        self.file.read_exact_at(buf, r.file_offset)
    }

    /// Read region `id` into a fresh buffer.
    pub fn read_region(&self, id: RegionId) -> io::Result<Vec<u8>> {
        let r = self.header.region(id);
        let mut buf = vec![0u8; r.used as usize];
        self.file.read_exact_at(&mut buf, r.file_offset)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_are_aligned_and_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.jsa");
        let options = Options::default();
        let base = unsafe { Address::from_usize(0x8_0000_0000) };
        let alignment = options.core_region_alignment;

        let mut writer =
            FileMapWriter::create(&path, FileMapHeader::new(&options, base, base)).unwrap();
        assert!(!path.exists());
        writer.write_region(RegionId::Mc, &[1u8; 24], 0).unwrap();
        writer.write_region(RegionId::Rw, &[2u8; 100], alignment).unwrap();
        writer.write_region(RegionId::Ro, &[], 2 * alignment).unwrap();
        writer.write_region(RegionId::Bm, &[3u8; 16], 0).unwrap();
        writer.write_region(RegionId::Hp, &[], 0).unwrap();
        let header = writer.finish().unwrap();
        assert!(path.exists());
        assert!(!tmp_path_of(&path).exists());

        let reader = FileMapReader::open(&path, &options).unwrap();
        assert_eq!(*reader.header(), header);
        let mc = reader.header().region(RegionId::Mc);
        assert_eq!(mc.file_offset as usize, alignment);
        let rw = reader.header().region(RegionId::Rw);
        assert_eq!(rw.file_offset as usize, 2 * alignment);
        assert_eq!(rw.checksum, checksum(&[2u8; 100]));
        assert_eq!(reader.read_region(RegionId::Rw).unwrap(), vec![2u8; 100]);
        assert_eq!(reader.read_region(RegionId::Bm).unwrap(), vec![3u8; 16]);
        assert_eq!(reader.header().mapping_size(), 2 * alignment);
    }

    #[test]
    fn discard_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("discarded.jsa");
        let options = Options::default();
        let writer =
            FileMapWriter::create(&path, FileMapHeader::new(&options, Address::ZERO, Address::ZERO))
                .unwrap();
        writer.discard();
        assert!(!path.exists());
        assert!(!tmp_path_of(&path).exists());
    }

    #[test]
    fn truncated_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.jsa");
        std::fs::write(&path, [0u8; 10]).unwrap();
        assert!(matches!(
            FileMapReader::open(&path, &Options::default()),
            Err(MapArchiveError::InvalidHeader(_))
        ));
        assert!(matches!(
            FileMapReader::open(&dir.path().join("missing.jsa"), &Options::default()),
            Err(MapArchiveError::Io(_))
        ));
    }
}
