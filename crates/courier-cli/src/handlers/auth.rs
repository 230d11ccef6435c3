//! Login and logout handlers

use std::time::Duration;

use courier_core::BearerToken;

use super::token_store;
use crate::cli::LoginArgs;
use crate::config::Config;
use crate::error::Result;
use crate::output::OutputWriter;

/// Handle the login command
pub async fn handle_login(
    args: LoginArgs,
    config: &Config,
    output: &mut OutputWriter,
) -> Result<()> {
    let mut token = BearerToken::new(args.token);
    if let Some(refresh_token) = args.refresh_token {
        token = token.with_refresh_token(refresh_token);
    }
    if let Some(seconds) = args.expires_in {
        token = token.expires_in(Duration::from_secs(seconds));
    }

    let store = token_store(config);
    store.save(Some(token)).map_err(courier_core::Error::from)?;

    tracing::info!(key = store.key(), dir = %config.token_dir.display(), "Token stored");
    output.success(&format!(
        "✓ Token stored in {}",
        config.token_dir.display()
    ))?;
    Ok(())
}

/// Handle the logout command
pub async fn handle_logout(config: &Config, output: &mut OutputWriter) -> Result<()> {
    let store = token_store(config);
    if store.load().is_none() {
        output.info("No stored token")?;
        return Ok(());
    }

    store.clear().map_err(courier_core::Error::from)?;
    output.success("✓ Stored token removed")?;
    Ok(())
}
