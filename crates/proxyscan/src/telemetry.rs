//! Logging bootstrap (C8, §4.8). Initialised once, at process startup, before
//! anything else runs.

/// Installs a `tracing-subscriber` fmt layer filtered by `RUST_LOG`
/// (`info` by default). Call this exactly once, before any other component
/// starts logging.
pub fn init() {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}
