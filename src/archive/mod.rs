//! The archive engine: building an archive from a graph of metadata objects, writing it to a
//! file, and mapping it back.

pub mod builder;
pub mod dump_region;
pub mod error;
pub mod filemap;
pub mod header;
pub mod layout;
pub mod loader;
pub mod policy;
pub mod ptr_marker;
pub mod relocation;
pub mod reserve;
pub mod serialize;
pub mod source_obj;
pub mod stats;
pub mod walker;

pub use self::builder::{ArchiveBuilder, ArchiveSummary};
pub use self::dump_region::DumpRegion;
pub use self::error::MapArchiveError;
pub use self::header::FileMapHeader;
pub use self::layout::RegionId;
pub use self::loader::MappedArchive;
pub use self::policy::{DefaultFollowPolicy, FollowPolicy};
pub use self::serialize::SerializeClosure;
pub use self::source_obj::FollowMode;
