//! Utilities shared by the builder and the loader.

/// Addresses and byte sizes.
pub mod address;
pub mod bitmap;
pub mod constants;
pub mod conversions;
pub mod logger;
pub mod options;
/// The OS memory layer: reserving, committing and mapping address ranges.
pub mod os;
/// Pointer words with tag bits.
pub mod tagged;

#[cfg(test)]
pub(crate) mod test_util;

pub use self::address::Address;
