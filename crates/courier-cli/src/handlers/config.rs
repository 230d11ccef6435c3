//! Configuration command handlers

use crate::cli::{ConfigAction, ConfigArgs, ConfigFormat, ConfigShowArgs, ConfigValidateArgs};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::output::OutputWriter;

/// Handle the config command
pub async fn handle_config(
    args: ConfigArgs,
    config: &Config,
    output: &mut OutputWriter,
) -> Result<()> {
    match args.action {
        ConfigAction::Show(show_args) => handle_config_show(show_args, config, output),
        ConfigAction::Validate(validate_args) => {
            handle_config_validate(validate_args, config, output)
        }
    }
}

/// Handle config show subcommand
fn handle_config_show(
    args: ConfigShowArgs,
    config: &Config,
    output: &mut OutputWriter,
) -> Result<()> {
    let content = match args.format {
        ConfigFormat::Yaml => serde_yaml::to_string(config)
            .map_err(|e| Error::config(format!("Failed to serialize as YAML: {}", e)))?,
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
    };

    output.writeln(content.trim_end())
}

/// Handle config validate subcommand
fn handle_config_validate(
    args: ConfigValidateArgs,
    config: &Config,
    output: &mut OutputWriter,
) -> Result<()> {
    let checked = match args.file {
        Some(path) => Config::from_file(&path)?,
        None => config.clone(),
    };

    let origin = checked
        .source
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "defaults and environment".to_string());

    checked.client.validate()?;
    output.success(&format!("✓ Configuration from {} is valid", origin))?;
    Ok(())
}
