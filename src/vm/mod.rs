//! The interface between the archive builder and the runtime whose metadata it archives.
//!
//! A host describes its metadata objects with an [`ObjectKind`], hands its roots to the builder
//! through [`RootProvider`]s, and chooses what to archive with a
//! [`FollowPolicy`](crate::archive::FollowPolicy).

mod binding;
mod object_kind;
mod roots;
mod slot;

pub use self::binding::{ArchiveBinding, ArchiveParts};
pub use self::object_kind::{ObjectKind, RefVisitor, SpecialRefKind};
pub use self::roots::{RootOrder, RootProvider, RootRelocator, RootVisitor};
pub use self::slot::RefSlot;
