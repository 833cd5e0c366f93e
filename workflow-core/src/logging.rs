//! ABOUTME: Logging infrastructure and structured logging utilities
//! ABOUTME: Provides tracing initialization shared across engine binaries

/// Initialize a JSON-structured `tracing` subscriber reading filter
/// directives from `RUST_LOG`, falling back to `info`.
pub fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| e.into())
}
