//! Command-line interface argument parsing and definitions
//!
//! This module defines the CLI structure using clap's derive API.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::logging::LogFormat;

/// Courier CLI - authenticated, retried, rate-limited HTTP requests
#[derive(Parser, Debug)]
#[command(
    name = "courier",
    version,
    author,
    about,
    long_about = None,
    propagate_version = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Enable verbose output (can be used multiple times for increased verbosity)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Path to configuration file (YAML or JSON)
    #[arg(short, long, global = true, env = "COURIER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Base URL override
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Directory holding the stored token
    #[arg(long, global = true, env = "COURIER_TOKEN_DIR")]
    pub token_dir: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, global = true, env = "COURIER_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// The subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Perform GET requests and print the JSON bodies
    Get(GetArgs),

    /// Store a bearer token for later requests
    Login(LoginArgs),

    /// Remove the stored token
    Logout,

    /// Inspect and validate configuration
    Config(ConfigArgs),
}

/// Arguments for the get command
#[derive(Parser, Debug)]
pub struct GetArgs {
    /// Path relative to the base URL, or an absolute URL
    #[arg(value_name = "PATH")]
    pub path: String,

    /// Query parameter as key=value (repeatable)
    #[arg(short = 'Q', long = "query", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub query: Vec<(String, String)>,

    /// Number of times to perform the request
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub repeat: u32,

    /// Maximum requests in flight at once
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub concurrency: u32,

    /// Print compact JSON instead of pretty-printing
    #[arg(long)]
    pub compact: bool,
}

/// Arguments for the login command
#[derive(Parser, Debug)]
pub struct LoginArgs {
    /// Access token
    #[arg(long, env = "COURIER_TOKEN", hide_env_values = true)]
    pub token: String,

    /// Refresh token to store alongside the access token
    #[arg(long, hide_env_values = true)]
    pub refresh_token: Option<String>,

    /// Seconds until the access token expires
    #[arg(long, value_name = "SECONDS")]
    pub expires_in: Option<u64>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show(ConfigShowArgs),

    /// Validate a configuration file (defaults to the active one)
    Validate(ConfigValidateArgs),
}

/// Arguments for config show
#[derive(Parser, Debug)]
pub struct ConfigShowArgs {
    /// Show configuration in specified format
    #[arg(short, long, value_enum, default_value = "yaml")]
    pub format: ConfigFormat,
}

/// Arguments for config validate
#[derive(Parser, Debug)]
pub struct ConfigValidateArgs {
    /// Configuration file to validate
    #[arg(value_name = "FILE")]
    pub file: Option<PathBuf>,
}

/// Configuration output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the effective verbosity level
    pub fn verbosity_level(&self) -> u8 {
        if self.quiet {
            0
        } else {
            self.verbose
        }
    }

    /// Check if colored output should be used
    pub fn use_color(&self) -> bool {
        !self.no_color && std::env::var("NO_COLOR").is_err()
    }
}
