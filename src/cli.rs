//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

/// Developer-portal backend - API key provisioning for gateway consumers
#[derive(Parser, Debug)]
#[command(name = "apikey-portal")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "APIKEY_PORTAL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "APIKEY_PORTAL_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "APIKEY_PORTAL_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "APIKEY_PORTAL_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "APIKEY_PORTAL_LOG_FORMAT")]
    pub log_format: Option<String>,
}
