mod raw {
    // See https://docs.rs/built/latest/built/index.html for the full list of constants in built.rs.
    // We only use the package version, the feature string and the git information.
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// Crate version such as 0.1.0
pub const CDS_PKG_VERSION: &str = raw::PKG_VERSION;

/// Comma separated features enabled for this build
pub const CDS_FEATURES: &str = raw::FEATURES_STR;

/// The maximum length of the build identity stored in an archive header (including the trailing
/// zero byte).
pub const BUILD_IDENT_LEN: usize = 64;

lazy_static! {
    /// Git version such as a96e8f991c91a81df51e7975849441f52fdbcdcc, or a96e8f991c91a81df51e7975849441f52fdbcdcc-dirty,
    /// or unknown-git-version if the crate is not built from a git repo.
    pub static ref CDS_GIT_VERSION: &'static str = &CDS_GIT_VERSION_STRING;

    // Owned string
    static ref CDS_GIT_VERSION_STRING: String = match raw::GIT_COMMIT_HASH {
        Some(hash) => format!("{}{}", hash, if raw::GIT_DIRTY.unwrap_or(false) { "-dirty" } else { "" }),
        None => "unknown-git-version".to_string(),
    };

    /// The identity of this build. An archive can only be used by the build that created it.
    pub static ref BUILD_IDENT: [u8; BUILD_IDENT_LEN] = {
        let ident = format!("cds-archive {} ({}; {})", CDS_PKG_VERSION, *CDS_GIT_VERSION, raw::TARGET);
        let mut buf = [0u8; BUILD_IDENT_LEN];
        let len = ident.len().min(BUILD_IDENT_LEN - 1);
        buf[..len].copy_from_slice(&ident.as_bytes()[..len]);
        buf
    };
}

/// Render a zero-terminated build identity for logging.
pub fn ident_to_string(ident: &[u8; BUILD_IDENT_LEN]) -> String {
    let len = ident.iter().position(|b| *b == 0).unwrap_or(BUILD_IDENT_LEN);
    String::from_utf8_lossy(&ident[..len]).into_owned()
}
