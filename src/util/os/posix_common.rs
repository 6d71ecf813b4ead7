use std::fs::File;
use std::io::Result;
use std::os::unix::io::AsRawFd;

use crate::util::address::Address;
use crate::util::conversions::raw_align_up;
use crate::util::os::memory::*;

impl MmapProtection {
    fn into_native_flags(self) -> i32 {
        use libc::{PROT_EXEC, PROT_NONE, PROT_READ, PROT_WRITE};
        match self {
            Self::ReadOnly => PROT_READ,
            Self::ReadWrite => PROT_READ | PROT_WRITE,
            Self::ReadWriteExec => PROT_READ | PROT_WRITE | PROT_EXEC,
            Self::NoAccess => PROT_NONE,
        }
    }
}

const RESERVE_FLAGS: i32 = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE;

/// Reserve at an exact address. `exact_flag` is `MAP_FIXED_NOREPLACE` where the platform has it.
/// Kernels that do not know the flag treat the address as a hint, so the result is checked.
pub fn reserve_at(start: Address, size: usize, exact_flag: i32) -> Result<Address> {
    let ret = unsafe {
        libc::mmap(
            start.to_mut_ptr(),
            size,
            libc::PROT_NONE,
            RESERVE_FLAGS | exact_flag,
            -1,
            0,
        )
    };
    if ret == libc::MAP_FAILED {
        return Err(std::io::Error::last_os_error());
    }
    let got = Address::from_mut_ptr(ret);
    if got != start {
        munmap(got, size)?;
        return Err(std::io::Error::new(
            std::io::ErrorKind::AddrInUse,
            format!("requested {} but the OS reserved {}", start, got),
        ));
    }
    Ok(start)
}

/// Reserve anywhere, then trim the range so it starts at a multiple of `alignment`.
pub fn reserve_anywhere(size: usize, alignment: usize) -> Result<Address> {
    let extra = if alignment > page_size() {
        alignment
    } else {
        0
    };
    let total = size + extra;
    let ret = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            total,
            libc::PROT_NONE,
            RESERVE_FLAGS,
            -1,
            0,
        )
    };
    if ret == libc::MAP_FAILED {
        return Err(std::io::Error::last_os_error());
    }
    let raw = ret as usize;
    let aligned = raw_align_up(raw, alignment.max(1));
    let head = aligned - raw;
    let tail = total - head - size;
    let base = Address::from_mut_ptr(ret);
    if head > 0 {
        munmap(base, head)?;
    }
    if tail > 0 {
        munmap(base + head + size, tail)?;
    }
    Ok(base + head)
}

pub fn map_file(
    file: &File,
    file_offset: u64,
    start: Address,
    size: usize,
    prot: MmapProtection,
) -> Result<()> {
    let ptr = start.to_mut_ptr();
    let ret = unsafe {
        libc::mmap(
            ptr,
            size,
            prot.into_native_flags(),
            libc::MAP_PRIVATE | libc::MAP_FIXED,
            file.as_raw_fd(),
            file_offset as libc::off_t,
        )
    };
    if ret == libc::MAP_FAILED {
        return Err(std::io::Error::last_os_error());
    }
    debug_assert_eq!(ret, ptr);
    Ok(())
}

pub fn is_mmap_oom(os_errno: i32) -> bool {
    os_errno == libc::ENOMEM
}

pub fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

pub fn munmap(start: Address, size: usize) -> Result<()> {
    wrap_libc_call(&|| unsafe { libc::munmap(start.to_mut_ptr(), size) }, 0)
}

pub fn mprotect(start: Address, size: usize, prot: MmapProtection) -> Result<()> {
    wrap_libc_call(
        &|| unsafe { libc::mprotect(start.to_mut_ptr(), size, prot.into_native_flags()) },
        0,
    )
}

pub fn wrap_libc_call<T: PartialEq>(f: &dyn Fn() -> T, expect: T) -> Result<()> {
    let ret = f();
    if ret == expect {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}
