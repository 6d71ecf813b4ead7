use std::fmt;
use std::io;

/// Why an archive could not be mapped. None of these is fatal: the host carries on without the
/// archive.
#[derive(Debug)]
pub enum MapArchiveError {
    /// The file cannot be opened or read.
    Io(io::Error),
    /// The header is malformed, or the archive was created by a different build.
    InvalidHeader(String),
    /// The archive was created with options that do not match the current ones.
    IncompatibleOptions(String),
    /// The header or a region does not hash to its recorded checksum.
    ChecksumMismatch {
        what: &'static str,
        expected: u64,
        found: u64,
    },
    /// No address range could be reserved for the archive, neither at the requested address nor
    /// anywhere else.
    ReservationFailed { size: usize },
    /// The serialized data does not match the root providers or object kinds of this host.
    IncompatibleArchive(String),
}

impl fmt::Display for MapArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MapArchiveError::Io(e) => write!(f, "I/O error: {}", e),
            MapArchiveError::InvalidHeader(msg) => write!(f, "invalid archive header: {}", msg),
            MapArchiveError::IncompatibleOptions(msg) => {
                write!(f, "archive is incompatible with the current options: {}", msg)
            }
            MapArchiveError::ChecksumMismatch {
                what,
                expected,
                found,
            } => write!(
                f,
                "checksum mismatch in {}: expected {:#018x}, found {:#018x}",
                what, expected, found
            ),
            MapArchiveError::ReservationFailed { size } => {
                write!(f, "unable to reserve {} bytes for the archive", size)
            }
            MapArchiveError::IncompatibleArchive(msg) => {
                write!(f, "archive does not match this host: {}", msg)
            }
        }
    }
}

impl std::error::Error for MapArchiveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MapArchiveError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for MapArchiveError {
    fn from(e: io::Error) -> Self {
        MapArchiveError::Io(e)
    }
}
