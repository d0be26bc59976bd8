#![cfg(not(tarpaulin_include))]

use reportgen::app;
use reportgen::config::{self, Config};
use reportgen::login;

/// Main entry point for the report generation service
///
/// Initializes logging, creates the on-disk store and upload tree, then
/// starts the HTTP server.
///
/// # Environment
/// * `RUST_LOG` - log filter, e.g. `info` or `reportgen=debug`
/// * `APP_ENV` - `production` selects the production render profile
/// * `BIND_ADDR` - listener address, defaults to `0.0.0.0:5001`
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let cfg = Config::from_env();
    login::init_database()?;
    config::ensure_upload_dirs()?;

    app::run(cfg).await
}
