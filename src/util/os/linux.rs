use std::fs::File;
use std::io::Result;

use crate::util::address::Address;
use crate::util::os::posix_common;
use crate::util::os::*;

pub struct LinuxMemoryImpl;

impl Memory for LinuxMemoryImpl {
    const CAN_MAP_INTO_RESERVATION: bool = true;

    fn reserve(
        requested: Option<Address>,
        size: usize,
        alignment: usize,
        annotation: &MmapAnnotation<'_>,
    ) -> Result<Address> {
        let start = match requested {
            Some(start) => posix_common::reserve_at(start, size, libc::MAP_FIXED_NOREPLACE)?,
            None => posix_common::reserve_anywhere(size, alignment)?,
        };
        #[cfg(not(feature = "no_mmap_annotation"))]
        set_vma_name(start, size, annotation);
        #[cfg(feature = "no_mmap_annotation")]
        let _ = annotation;
        Ok(start)
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

#[cfg(not(feature = "no_mmap_annotation"))]
fn set_vma_name(start: Address, size: usize, annotation: &MmapAnnotation) {
    // `PR_SET_VMA` is new in Linux 5.17. Older kernels return `EINVAL`, as do names longer
    // than 80 bytes. The name is only for debugging, so errors are logged and ignored.
    let Ok(anno_cstr) = std::ffi::CString::new(annotation.to_string()) else {
        return;
    };
    let result = posix_common::wrap_libc_call(
        &|| unsafe {
            libc::prctl(
                libc::PR_SET_VMA,
                libc::PR_SET_VMA_ANON_NAME,
                start.to_ptr::<libc::c_void>(),
                size,
                anno_cstr.as_ptr(),
            )
        },
        0,
    );
    if let Err(e) = result {
        debug!("Error while calling prctl: {e}");
    }
}

pub struct LinuxProcessImpl;

impl Process for LinuxProcessImpl {
    fn get_process_memory_maps() -> Result<String> {
        std::fs::read_to_string("/proc/self/maps")
    }
}
