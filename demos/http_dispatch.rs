//! HTTP Dispatch Example
//!
//! Posts each argument (or bulk batch) as a JSON body to an HTTP endpoint,
//! cancels the run on Ctrl-C, and writes the report to a JSON file.
//!
//! ```text
//! DISPATCH_URL=http://localhost:8080/lookup \
//! DISPATCH_CONFIG=dispatch.yaml \
//!   cargo run --example http_dispatch -- 1 2 3 "[4, 5]"
//! ```
//!
//! Arguments are parsed as JSON; anything that is not valid JSON is sent as
//! a string.

use anyhow::Context;
use paced_dispatch::requester::JsonHttpRequester;
use paced_dispatch::{DispatchConfig, Dispatcher, Payload};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("paced_dispatch=info")),
        )
        .init();

    let url = std::env::var("DISPATCH_URL").context("DISPATCH_URL must be set")?;
    let config = match std::env::var("DISPATCH_CONFIG") {
        Ok(path) => DispatchConfig::from_file(&path).with_context(|| format!("loading {}", path))?,
        Err(_) => DispatchConfig::new().with_rate(5, 1.0),
    }
    .with_env_overrides()?
    .with_log_file("dispatch-report.json");

    let args: Vec<Value> = std::env::args()
        .skip(1)
        .map(|raw| serde_json::from_str(&raw).unwrap_or(Value::String(raw)))
        .collect();

    let requester = JsonHttpRequester::new(move |client: &reqwest::Client, payload: &Payload| {
        client.post(&url).json(&payload.clone().into_value())
    })?;
    let dispatcher = Dispatcher::new(requester, config)?;

    let cancel = dispatcher.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let report = dispatcher.run(args).await?;
    println!(
        "{} succeeded, {} failed, {} pending{}",
        report.successes.len(),
        report.failures.len(),
        report.pending.len(),
        if report.cancelled { " (cancelled)" } else { "" }
    );
    Ok(())
}
