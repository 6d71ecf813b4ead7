use std::default::Default;
use strum_macros::EnumString;

use crate::util::constants::*;
use crate::util::tagged::TagMask;
use crate::util::Address;

/// How the loader picks the address to map an archive at.
#[derive(Copy, Clone, EnumString, Debug, PartialEq, Eq)]
pub enum RelocationMode {
    /// Try the base address recorded in the archive first. Relocate only if that fails.
    MapAtRequested,
    /// Always let the OS choose the address, and relocate. Useful for testing the relocation path.
    AlwaysRelocate,
}

/// How the archive range and the class space are reserved.
#[derive(Copy, Clone, EnumString, Debug, PartialEq, Eq)]
pub enum SplitReservation {
    /// Let the platform decide. A single reservation is split in two where the OS allows it.
    Auto,
    /// Reserve one combined range and split it.
    Split,
    /// Reserve two adjacent ranges separately, for platforms that cannot split a reservation.
    Separate,
}

fn always_valid<T>(_: &T) -> bool {
    true
}

fn is_power_of_two_at_least_page(v: &usize) -> bool {
    v.is_power_of_two() && *v >= BYTES_IN_PAGE
}

macro_rules! options {
    ($($(#[$outer:meta])*$name:ident: $type:ty[$validator:expr] = $default:expr),*,) => [
        options!($($(#[$outer])*$name: $type[$validator] = $default),*);
    ];
    ($($(#[$outer:meta])*$name:ident: $type:ty[$validator:expr] = $default:expr),*) => [
        /// Options for dumping and mapping archives.
        ///
        /// Options can be set programmatically with [`Options::set_from_str`], from a
        /// space-separated `key=value` string with [`Options::set_bulk_from_command_line`], or
        /// from environment variables (`CDS_SHARED_BASE_ADDRESS=0x900000000`) with
        /// [`Options::read_env_var_settings`].
        #[derive(Clone, Debug)]
        pub struct Options {
            $($(#[$outer])*pub $name: $type),*
        }

        impl Options {
            /// Set an option from its snake-case name and a string value. Returns false, and
            /// keeps the old value, if the name is unknown or the value cannot be parsed or is
            /// invalid.
            pub fn set_from_str(&mut self, s: &str, val: &str) -> bool {
                match s {
                    // Parse the given value from str (by env vars or by calling process()) to the right type
                    $(stringify!($name) => if let Ok(typed_val) = val.parse::<$type>() {
                        let validate_fn = $validator;
                        let is_valid = validate_fn(&typed_val);
                        if is_valid {
                            // Only set value if valid.
                            self.$name = typed_val;
                        } else {
                            warn!("Unable to set {}={:?}. Invalid value. The old value is kept.", s, val);
                        }
                        is_valid
                    } else {
                        warn!("Unable to set {}={:?}. Can't parse value. The old value is kept.", s, val);
                        false
                    })*
                    _ => {
                        warn!("Unknown option {}", s);
                        false
                    }
                }
            }

            /// Is `s` the name of an option?
            pub fn is_option_name(s: &str) -> bool {
                matches!(s, $(stringify!($name))|*)
            }
        }

        impl Default for Options {
            fn default() -> Self {
                Options {
                    $($name: $default),*
                }
            }
        }
    ]
}

options! {
    /// The address the archive is built for. Zero means "wherever the dump buffer lands".
    shared_base_address:     Address           [|v: &Address| v.is_aligned_to(BYTES_IN_PAGE)] = unsafe { Address::from_usize(DEFAULT_SHARED_BASE_ADDRESS) },
    /// The size of the address range reserved for the dump buffer.
    archive_reserve_size:    usize             [|v: &usize| *v > 0 && *v % BYTES_IN_PAGE == 0] = DEFAULT_ARCHIVE_RESERVE_SIZE,
    /// Reserve a class space next to the archive so that compressed class pointers reach both.
    use_compressed_class_pointers: bool        [always_valid] = cfg!(target_pointer_width = "64"),
    /// The size of the class space.
    class_space_size:        usize             [|v: &usize| *v > 0 && *v % BYTES_IN_PAGE == 0] = DEFAULT_CLASS_SPACE_SIZE,
    /// The alignment of the class space (and of the requested base address when a class space is used).
    class_space_alignment:   usize             [is_power_of_two_at_least_page] = DEFAULT_CLASS_SPACE_ALIGNMENT,
    /// The granularity of core regions in the buffer and in the file.
    core_region_alignment:   usize             [is_power_of_two_at_least_page] = DEFAULT_CORE_REGION_ALIGNMENT,
    /// How much memory a dump region commits at once when it grows.
    commit_granule:          usize             [|v: &usize| *v > 0 && *v % BYTES_IN_PAGE == 0] = DEFAULT_COMMIT_GRANULE,
    /// The low bits of an embedded pointer that may hold a tag.
    pointer_tag_mask:        usize             [|v: &usize| TagMask::is_valid(*v)] = DEFAULT_POINTER_TAG_MASK,
    /// Where to map an archive.
    relocation_mode:         RelocationMode    [always_valid] = RelocationMode::MapAtRequested,
    /// Verify region checksums when mapping.
    verify_shared_spaces:    bool              [always_valid] = false,
    /// Relocate a mapped archive with several threads.
    parallel_relocation:     bool              [always_valid] = false,
    /// The number of threads used by parallel relocation.
    relocation_threads:      usize             [|v: &usize| *v > 0] = num_cpus::get(),
    /// How to reserve the archive range and the class space.
    split_reservation:       SplitReservation  [always_valid] = SplitReservation::Auto,
    /// Log allocation statistics at the end of a dump.
    print_statistics:        bool              [always_valid] = true,
}

impl Options {
    /// Set options from environment variables prefixed with `CDS_`, e.g. `CDS_VERIFY_SHARED_SPACES=true`.
    /// Unknown variables are ignored.
    pub fn read_env_var_settings(&mut self) {
        const PREFIX: &str = "CDS_";
        for (key, val) in std::env::vars() {
            // strip the prefix, and get the lower case string
            if let Some(rest_of_key) = key.strip_prefix(PREFIX) {
                let lowercase: &str = &rest_of_key.to_lowercase();
                if Self::is_option_name(lowercase) {
                    self.set_from_str(lowercase, &val);
                }
            }
        }
    }

    /// Set an option from a camel-case name, such as `sharedBaseAddress`.
    pub fn set_from_camelcase_str(&mut self, s: &str, val: &str) -> bool {
        trace!("Trying to process option pair: ({}, {})", s, val);

        let mut sr = String::with_capacity(s.len());
        for c in s.chars() {
            if c.is_uppercase() {
                sr.push('_');
                for c in c.to_lowercase() {
                    sr.push(c);
                }
            } else {
                sr.push(c)
            }
        }

        let result = self.set_from_str(sr.as_str(), val);
        if result {
            trace!("Validation passed");
        } else {
            trace!("Validation failed")
        }
        result
    }

    /// Set options in bulk from a string of whitespace-separated `key=value` pairs. Returns false
    /// if any pair was rejected. Pairs before the rejected one stay set.
    pub fn set_bulk_from_command_line(&mut self, options: &str) -> bool {
        for opt in options.split_ascii_whitespace() {
            let kv_pair: Vec<&str> = opt.split('=').collect();
            if kv_pair.len() != 2 {
                return false;
            }
            if !self.set_from_camelcase_str(kv_pair[0], kv_pair[1]) {
                return false;
            }
        }
        true
    }

    /// The tag mask of embedded pointers.
    pub fn tag_mask(&self) -> TagMask {
        // The validator guarantees a valid mask.
        TagMask::new(self.pointer_tag_mask).unwrap_or(TagMask::NONE)
    }

    /// The requested base address, or `None` if the OS should choose. The configured address is
    /// rounded up to the region (and class space) alignment.
    pub fn requested_base_address(&self) -> Option<Address> {
        if self.shared_base_address.is_zero() {
            return None;
        }
        let alignment = if self.use_compressed_class_pointers {
            self.core_region_alignment.max(self.class_space_alignment)
        } else {
            self.core_region_alignment
        };
        let aligned = self.shared_base_address.align_up(alignment);
        if aligned != self.shared_base_address {
            info!(
                "Requested base address {} is not aligned to {:#x}, using {}",
                self.shared_base_address, alignment, aligned
            );
        }
        Some(aligned)
    }
}
