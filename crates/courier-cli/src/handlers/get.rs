//! GET request handler

use std::sync::Arc;
use std::time::Instant;

use courier_core::{CallOptions, Endpoint};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::build_client;
use crate::cli::GetArgs;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::output::OutputWriter;

/// Handle the get command
///
/// Requests run through one client, so `--repeat` with `--concurrency`
/// shares its rate limiter and token store. Ctrl-C cancels outstanding
/// requests.
pub async fn handle_get(args: GetArgs, config: &Config, output: &mut OutputWriter) -> Result<()> {
    let client = build_client(config)?;

    let mut endpoint = Endpoint::<Value>::get(args.path);
    for (key, value) in args.query {
        endpoint = endpoint.with_query(key, value);
    }
    let endpoint = Arc::new(endpoint);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling requests");
            interrupt.cancel();
        }
    });

    let permits = Arc::new(Semaphore::new(args.concurrency as usize));
    let mut tasks = JoinSet::new();
    for index in 0..args.repeat {
        let client = client.clone();
        let endpoint = Arc::clone(&endpoint);
        let permits = Arc::clone(&permits);
        let options = CallOptions::new().with_cancel(cancel.clone());

        tasks.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| Error::other(e.to_string()))?;
            let started = Instant::now();
            let body = client.perform_with(endpoint.as_ref(), options).await?;
            tracing::debug!(
                index,
                duration_ms = started.elapsed().as_millis() as u64,
                "Request finished"
            );
            Ok::<_, Error>((index, body))
        });
    }

    let mut bodies = Vec::with_capacity(args.repeat as usize);
    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        match joined.map_err(|e| Error::other(format!("request task failed: {}", e)))? {
            Ok(result) => bodies.push(result),
            Err(error) => {
                tracing::warn!(error = %error, "Request failed");
                first_error.get_or_insert(error);
            }
        }
    }
    cancel.cancel();

    bodies.sort_by_key(|(index, _)| *index);
    for (_, body) in &bodies {
        output.json(body, !args.compact)?;
    }

    match first_error {
        Some(error) => {
            if args.repeat > 1 {
                output.warning(&format!(
                    "{} of {} requests failed",
                    args.repeat as usize - bodies.len(),
                    args.repeat
                ))?;
            }
            Err(error)
        }
        None => Ok(()),
    }
}
