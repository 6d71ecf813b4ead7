//! Host-to-archive interface: safe Rust APIs.
//!
//! A host (a "binding") implements [`ArchiveBinding`] to describe its metadata objects, its
//! roots and what it wants archived. We expect a binding to use this API as follows:
//!
//! 1. Create an [`ArchiveBuilderOptions`] and set options with [`process()`] or
//!    [`process_bulk()`]. Options can also be set from `CDS_*` environment variables.
//! 2. At dump time, call [`dump_archive()`] once all metadata to archive is loaded.
//! 3. At startup, call [`map_archive()`] (or [`try_map_archive()`], which runs without an
//!    archive when it cannot be used). The roots of the binding's providers are read back from
//!    the archive, and the archive stays mapped as long as the returned [`MappedArchive`] lives.
//!
//! Hosts that need more control, such as allocating trampolines before the dump, can use
//! [`ArchiveBuilder`] directly.

use std::path::Path;

use crate::archive::{ArchiveBuilder, ArchiveSummary, MapArchiveError, MappedArchive};
use crate::util::logger;
use crate::util::options::Options;
use crate::vm::{ArchiveBinding, ArchiveParts};

/// Holds the options for dumping and mapping archives.
pub struct ArchiveBuilderOptions {
    pub options: Options,
}

impl Default for ArchiveBuilderOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveBuilderOptions {
    /// Create options with default values, overridden by `CDS_*` environment variables.
    pub fn new() -> Self {
        let mut options = Options::default();
        options.read_env_var_settings();
        ArchiveBuilderOptions { options }
    }

    /// Create options with default values, ignoring environment variables.
    pub fn new_no_env_vars() -> Self {
        ArchiveBuilderOptions {
            options: Options::default(),
        }
    }

    /// Set an option by its camel-case or snake-case name.
    pub fn set_option(&mut self, name: &str, val: &str) -> bool {
        self.options.set_from_camelcase_str(name, val)
    }

    /// Set options from a string of whitespace-separated `key=value` pairs.
    pub fn set_options_bulk_by_str(&mut self, options: &str) -> bool {
        self.options.set_bulk_from_command_line(options)
    }
}

/// Process an option. Returns false if the option is unknown or the value is rejected.
///
/// Arguments:
/// * `builder`: The options holder to change.
/// * `name`: The name of the option.
/// * `value`: The value of the option (as a string).
pub fn process(builder: &mut ArchiveBuilderOptions, name: &str, value: &str) -> bool {
    builder.set_option(name, value)
}

/// Process multiple options at once, such as `"sharedBaseAddress=0x900000000 printStatistics=false"`.
pub fn process_bulk(builder: &mut ArchiveBuilderOptions, options: &str) -> bool {
    builder.set_options_bulk_by_str(options)
}

/// Dump the metadata reachable from the binding's roots into an archive at `path`.
///
/// On return, the binding's roots point into the dump buffer, which is released when this
/// function returns, so the host should not use its archived metadata afterwards. Running out of
/// buffer space, an inconsistent object graph or a failure to write the file is fatal.
pub fn dump_archive<B: ArchiveBinding>(
    builder: &ArchiveBuilderOptions,
    binding: &mut B,
    path: &Path,
) -> ArchiveSummary {
    logger::init_once();
    let ArchiveParts {
        follow_policy,
        mut root_providers,
    } = binding.archive_parts();
    ArchiveBuilder::new(&builder.options, follow_policy).dump(&mut root_providers, path)
}

/// Map the archive at `path` and read the binding's roots from it.
///
/// Problems with the file, such as a mismatching build or options, a bad checksum or an address
/// range that cannot be reserved, are returned as errors. So is an archive dumped with other root
/// providers, or with object kinds whose dispatch tables have changed. The binding's roots are
/// only replaced if the archive can be used.
pub fn map_archive<B: ArchiveBinding>(
    builder: &ArchiveBuilderOptions,
    binding: &mut B,
    path: &Path,
) -> Result<MappedArchive, MapArchiveError> {
    logger::init_once();
    let archive = MappedArchive::map(path, &builder.options)?;
    let mut parts = binding.archive_parts();
    archive.read_serialized_data(&mut parts.root_providers, B::kinds())?;
    Ok(archive)
}

/// Like [`map_archive()`], but logs a warning and returns `None` if the archive cannot be used.
pub fn try_map_archive<B: ArchiveBinding>(
    builder: &ArchiveBuilderOptions,
    binding: &mut B,
    path: &Path,
) -> Option<MappedArchive> {
    match map_archive(builder, binding, path) {
        Ok(archive) => Some(archive),
        Err(e) => {
            warn!("Unable to use shared archive {}: {}", path.display(), e);
            None
        }
    }
}
