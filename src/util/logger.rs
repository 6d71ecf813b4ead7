use log::SetLoggerError;

/// Attempt to init a env_logger for the archive builder and loader.
/// Does nothing if the "builtin_env_logger" feature is disabled.
pub fn try_init() -> Result<(), SetLoggerError> {
    cfg_if::cfg_if! {
        if #[cfg(feature = "builtin_env_logger")] {
            env_logger::try_init_from_env(
                // By default, use info level logging so the dump statistics are visible.
                env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
            )
        } else {
            Ok(())
        }
    }
}

/// Initialize the logger once. Later calls, and calls after the host installed its own logger,
/// are ignored.
pub(crate) fn init_once() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| match try_init() {
        Ok(_) => debug!("cds-archive initialized the logger."),
        Err(_) => debug!(
            "cds-archive failed to initialize the logger. Possibly a logger has been initialized by the host."
        ),
    });
}
