use super::{Payload, RequestError, Requester};
use crate::{Error, ErrorContext};
use async_trait::async_trait;
use serde_json::Value;
use std::env;
use std::time::Duration;
use tracing::debug;

/// JSON-over-HTTP collaborator built on `reqwest`.
///
/// The caller owns URL and body construction through `build`; this type only
/// sends the request and classifies the response:
/// - non-2xx status -> [`RequestError::Http`]
/// - empty body, `null`, `{}` or `[]` -> [`RequestError::Empty`]
/// - transport or decode failure -> [`RequestError::Other`]
pub struct JsonHttpRequester<F> {
    client: reqwest::Client,
    build: F,
}

impl<F> JsonHttpRequester<F>
where
    F: Fn(&reqwest::Client, &Payload) -> reqwest::RequestBuilder + Send + Sync,
{
    /// Creates a requester with a client configured from the environment.
    ///
    /// - `PACED_DISPATCH_HTTP_TIMEOUT_SECS` (default 30)
    /// - `PACED_DISPATCH_HTTP_POOL_MAX_IDLE_PER_HOST` (default 32)
    pub fn new(build: F) -> crate::Result<Self> {
        let timeout_secs = env::var("PACED_DISPATCH_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(30);
        let max_idle = env::var("PACED_DISPATCH_HTTP_POOL_MAX_IDLE_PER_HOST")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(32);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .pool_max_idle_per_host(max_idle)
            .build()
            .map_err(|e| {
                Error::configuration_with_context(
                    format!("failed to build HTTP client: {}", e),
                    ErrorContext::new().with_source("http_requester"),
                )
            })?;
        Ok(Self::with_client(client, build))
    }

    pub fn with_client(client: reqwest::Client, build: F) -> Self {
        Self { client, build }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

fn is_empty_json(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

#[async_trait]
impl<F> Requester for JsonHttpRequester<F>
where
    F: Fn(&reqwest::Client, &Payload) -> reqwest::RequestBuilder + Send + Sync,
{
    async fn request(&self, payload: Payload) -> Result<Value, RequestError> {
        let resp = (self.build)(&self.client, &payload).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            debug!(http_status = status.as_u16(), "request failed");
            return Err(RequestError::Http {
                status: status.as_u16(),
                message: body,
            });
        }

        let body = resp.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(RequestError::Empty);
        }
        let value: Value = serde_json::from_slice(&body)?;
        if is_empty_json(&value) {
            return Err(RequestError::Empty);
        }
        Ok(value)
    }
}
