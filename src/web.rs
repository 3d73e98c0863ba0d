#![cfg(not(tarpaulin_include))]

use order_intake::{Config, app};

/// Entry point for the order intake server.
///
/// Reads configuration from `ORDER_INTAKE_CONFIG` and the `ORDER_INTAKE_*`
/// environment, then serves the HTTP API until the process is stopped.
/// Log verbosity follows `RUST_LOG` and defaults to `info`.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::load()?;
    log::debug!("loaded {config:?}");

    app::run(config).await
}
