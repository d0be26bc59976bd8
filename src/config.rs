#![cfg(not(tarpaulin_include))]

use std::env;
use std::fs::create_dir_all;

/// Root directory for the JSON store (users, projects, error sets)
pub const DATABASE_DIR: &str = "database";

/// Root directory for uploaded and generated files
pub const UPLOAD_DIR: &str = "uploads";

/// Generated reports, interactive chart artifacts and batch zips
pub const REPORTS_DIR: &str = "uploads/reports";

/// Batch output tree keyed by Report_Name
pub const REPORTS_BY_NAME_DIR: &str = "uploads/reports_by_name";

/// Batch output tree keyed by Report_Code
pub const REPORTS_BY_CODE_DIR: &str = "uploads/reports_by_code";

/// Runtime configuration for the service
///
/// Values are read from environment variables with development defaults.
/// Setting `APP_ENV=production` switches to the production profile, which
/// renders smaller charts and sweeps scratch space more often.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP listener binds to
    pub bind_addr: String,

    /// Maximum accepted request body size in bytes
    pub max_upload_bytes: usize,

    /// Rendered chart width in pixels
    pub chart_width: u32,

    /// Rendered chart height in pixels
    pub chart_height: u32,

    /// Upper bound on charts rendered for a single report
    pub max_charts_per_report: usize,

    /// Scratch-space sweep interval, in processed batch files
    pub cleanup_interval: usize,

    /// Request timeout in seconds (batch runs may be long)
    pub request_timeout_secs: u64,

    /// True when running the production profile
    pub production: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5001".to_string(),
            max_upload_bytes: 100 * 1024 * 1024,
            chart_width: 1000,
            chart_height: 600,
            max_charts_per_report: 50,
            cleanup_interval: 5,
            request_timeout_secs: 300,
            production: false,
        }
    }
}

impl Config {
    /// Build a configuration from the environment
    ///
    /// Recognized variables:
    /// * `APP_ENV` - `production` selects the production profile
    /// * `BIND_ADDR` - listener address, e.g. `0.0.0.0:5001`
    /// * `MAX_UPLOAD_MB` - request body cap in megabytes
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(mode) = env::var("APP_ENV") {
            if mode.eq_ignore_ascii_case("production") {
                config.production = true;
                // Production renders smaller figures and sweeps more often
                config.chart_width = 800;
                config.chart_height = 480;
                config.cleanup_interval = 3;
            }
        }

        if let Ok(addr) = env::var("BIND_ADDR") {
            if !addr.is_empty() {
                config.bind_addr = addr;
            }
        }

        if let Ok(mb) = env::var("MAX_UPLOAD_MB") {
            if let Ok(mb) = mb.parse::<usize>() {
                config.max_upload_bytes = mb * 1024 * 1024;
            }
        }

        config
    }
}

/// Create the upload directory tree
///
/// Called once at startup so report generation never races directory
/// creation mid-request.
pub fn ensure_upload_dirs() -> std::io::Result<()> {
    create_dir_all(REPORTS_DIR)?;
    create_dir_all(REPORTS_BY_NAME_DIR)?;
    create_dir_all(REPORTS_BY_CODE_DIR)?;
    Ok(())
}
