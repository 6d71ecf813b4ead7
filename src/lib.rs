//! cds-archive builds and maps archives of runtime metadata.
//!
//! A runtime that loads the same metadata (classes, symbols, method tables) at every start can
//! dump that metadata once into an archive, and map the archive at later starts instead of
//! loading the metadata again. An archive is a memory image: its objects are laid out as they are
//! used in memory, and pointers between them are plain addresses that assume the archive is
//! mapped at a requested base address. Every pointer word is recorded in a bitmap, so that an
//! archive that cannot be mapped at its requested base can be rebased.
//!
//! The crate is organized as follows:
//! * [`memory_manager`]: the safe API a runtime uses to dump and map archives.
//! * [`vm`]: the traits a runtime implements to describe its objects and roots.
//! * [`archive`]: the builder, the file format and the loader.
//! * [`util`]: addresses, bitmaps, options and the OS memory layer.

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

pub mod archive;
pub mod build_info;
pub mod memory_manager;
pub mod util;
pub mod vm;

pub use crate::archive::{
    ArchiveBuilder, ArchiveSummary, DefaultFollowPolicy, FollowMode, FollowPolicy,
    MapArchiveError, MappedArchive,
};
pub use crate::memory_manager::ArchiveBuilderOptions;

#[cfg(test)]
mod tests;
