use std::fs::File;
use std::io::Result;

use crate::util::address::Address;
use crate::util::os::posix_common;
use crate::util::os::*;

pub struct MacOSMemoryImpl;

impl Memory for MacOSMemoryImpl {
    const CAN_MAP_INTO_RESERVATION: bool = true;

    fn reserve(
        requested: Option<Address>,
        size: usize,
        alignment: usize,
        _annotation: &MmapAnnotation<'_>,
    ) -> Result<Address> {
        // There is no MAP_FIXED_NOREPLACE on macOS. The address is a hint and the result is checked.
        match requested {
            Some(start) => posix_common::reserve_at(start, size, 0),
            None => posix_common::reserve_anywhere(size, alignment),
        }
    }

    fn release(start: Address, size: usize) -> Result<()> {
        posix_common::munmap(start, size)
    }

    fn commit(start: Address, size: usize, prot: MmapProtection) -> Result<()> {
        posix_common::mprotect(start, size, prot)
    }

    fn protect(start: Address, size: usize, prot: MmapProtection) -> Result<()> {
        posix_common::mprotect(start, size, prot)
    }

    fn map_file(
        file: &File,
        file_offset: u64,
        start: Address,
        size: usize,
        prot: MmapProtection,
    ) -> Result<()> {
        posix_common::map_file(file, file_offset, start, size, prot)
    }

    fn is_mmap_oom(os_errno: i32) -> bool {
        posix_common::is_mmap_oom(os_errno)
    }
}

pub struct MacOSProcessImpl;

impl Process for MacOSProcessImpl {
    fn get_process_memory_maps() -> Result<String> {
        let output = std::process::Command::new("vmmap")
            .arg(std::process::id().to_string())
            .output()?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
