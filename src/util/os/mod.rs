//! Operating system services: address space reservation, commit, file mapping.

pub mod memory;
pub mod process;

pub use memory::*;
pub use process::*;

#[cfg(unix)]
pub(crate) mod posix_common;

#[cfg(target_os = "linux")]
pub(crate) mod linux;
#[cfg(target_os = "linux")]
pub use linux::{LinuxMemoryImpl as OSMemory, LinuxProcessImpl as OSProcess};

#[cfg(target_os = "macos")]
pub(crate) mod macos;
#[cfg(target_os = "macos")]
pub use macos::{MacOSMemoryImpl as OSMemory, MacOSProcessImpl as OSProcess};
