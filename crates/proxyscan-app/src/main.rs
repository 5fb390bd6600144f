//! Thin CLI entry point: parse configuration, init logging, and hand off to
//! the library crate's startup sequence.

use proxyscan::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let config = Config::load()?;
	proxyscan::telemetry::init();
	proxyscan::run(config).await
}
