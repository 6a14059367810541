use tracing_subscriber::{fmt, EnvFilter};

/// Installs the JSON subscriber. `RUST_LOG` selects levels; defaults to `info`.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).json().try_init();
}
