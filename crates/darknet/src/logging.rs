use tracing_subscriber::EnvFilter;

/// Installs the stderr log subscriber used by the command line tools
///
/// The filter is read from `RUST_LOG` and defaults to `warn`, keeping stdout
/// free for the tools' regular output.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}
