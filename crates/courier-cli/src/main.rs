//! Courier CLI - command-line front end for the request engine
//!
//! Performs authenticated, retried and rate-limited requests against a
//! configured API, and manages the stored token those requests use.

mod cli;
mod config;
mod error;
mod handlers;
mod logging;
mod output;

use cli::{Cli, Commands};
use colored::control;
use config::Config;
use error::Result;
use logging::{timing::Timer, LoggingConfig};
use output::OutputWriter;
use std::process;
use tracing::Instrument;

#[tokio::main]
async fn main() {
    // .env is optional
    dotenv::dotenv().ok();

    let cli = Cli::parse_args();

    control::set_override(cli.use_color());

    if let Err(e) = init_logging(&cli) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let use_color = cli.use_color();
    match run(cli).await {
        Ok(()) => process::exit(0),
        Err(e) => {
            eprintln!("{}", error::format_error(&e, use_color));
            if let Some(hint) = e.hint() {
                eprintln!("hint: {}", hint);
            }
            process::exit(e.exit_code());
        }
    }
}

/// Main application logic
async fn run(cli: Cli) -> Result<()> {
    let timer = Timer::new("cli_execution");

    let config = Config::load_with_file(cli.config.as_deref())?
        .with_overrides(cli.base_url.clone(), cli.token_dir.clone());
    let mut output = OutputWriter::new(cli.use_color(), cli.quiet);

    tracing::info!(
        command = ?cli.command,
        verbosity = cli.verbosity_level(),
        config = ?config.source,
        "Executing command"
    );

    let command = cli.command;
    let execution = async move {
        match command {
            Commands::Get(args) => handlers::handle_get(args, &config, &mut output).await,
            Commands::Login(args) => handlers::handle_login(args, &config, &mut output).await,
            Commands::Logout => handlers::handle_logout(&config, &mut output).await,
            Commands::Config(args) => handlers::handle_config(args, &config, &mut output).await,
        }
    };
    execution.instrument(timer.span().clone()).await
}

/// Initialize the logging system
fn init_logging(cli: &Cli) -> Result<()> {
    let mut logging_config =
        LoggingConfig::from_verbosity(cli.verbosity_level()).with_format(cli.log_format);
    logging_config.ansi = cli.use_color();

    // quiet mode only logs errors
    if cli.quiet {
        logging_config.level = "error".to_string();
    }

    logging::init_logging(logging_config)
}
