//! The remote-call collaborator.
//!
//! The dispatch engine knows nothing about URLs, authentication or response
//! formats. It only needs something that turns a [`Payload`] into a JSON value
//! or one of the [`RequestError`] categories.
//!
//! | Adapter | Use |
//! |---------|-----|
//! | [`from_fn`] | async closure |
//! | [`blocking`] | synchronous closure, run on the blocking pool |
//! | [`JsonHttpRequester`] | reqwest client with a caller-supplied request builder |

mod http;

pub use http::JsonHttpRequester;

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// What a single collaborator invocation receives.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Batch size 1: the argument itself.
    Single(Value),
    /// Two or more arguments grouped into one bulk request.
    Bulk(Vec<Value>),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Single(_) => 1,
            Payload::Bulk(args) => args.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_bulk(&self) -> bool {
        matches!(self, Payload::Bulk(_))
    }

    /// Flattens the payload into one JSON value (bulk payloads become an array).
    pub fn into_value(self) -> Value {
        match self {
            Payload::Single(arg) => arg,
            Payload::Bulk(args) => Value::Array(args),
        }
    }

    pub fn args(&self) -> &[Value] {
        match self {
            Payload::Single(arg) => std::slice::from_ref(arg),
            Payload::Bulk(args) => args,
        }
    }
}

/// Failure categories a collaborator may report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The call completed but returned nothing meaningful.
    #[error("the response was returned empty")]
    Empty,

    /// Transport/protocol-level failure carrying a status code.
    #[error("failed with code {status}")]
    Http { status: u16, message: String },

    /// Anything else.
    #[error("exception raised: {0}")]
    Other(String),
}

impl RequestError {
    pub fn http(status: u16) -> Self {
        RequestError::Http {
            status,
            message: String::new(),
        }
    }

    pub fn other(msg: impl std::fmt::Display) -> Self {
        RequestError::Other(msg.to_string())
    }
}

impl From<reqwest::Error> for RequestError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => RequestError::Http {
                status: status.as_u16(),
                message: e.to_string(),
            },
            None => RequestError::Other(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for RequestError {
    fn from(e: serde_json::Error) -> Self {
        RequestError::Other(e.to_string())
    }
}

/// The collaborator called by every worker.
///
/// Implementations must be safe to call from many workers at once.
#[async_trait]
pub trait Requester: Send + Sync {
    async fn request(&self, payload: Payload) -> Result<Value, RequestError>;
}

#[async_trait]
impl<R: Requester + ?Sized> Requester for Arc<R> {
    async fn request(&self, payload: Payload) -> Result<Value, RequestError> {
        (**self).request(payload).await
    }
}

/// Requester backed by an async closure.
pub struct FnRequester<F> {
    f: F,
}

/// Wraps an async closure as a [`Requester`].
pub fn from_fn<F, Fut>(f: F) -> FnRequester<F>
where
    F: Fn(Payload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, RequestError>> + Send + 'static,
{
    FnRequester { f }
}

#[async_trait]
impl<F, Fut> Requester for FnRequester<F>
where
    F: Fn(Payload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, RequestError>> + Send + 'static,
{
    async fn request(&self, payload: Payload) -> Result<Value, RequestError> {
        (self.f)(payload).await
    }
}

/// Requester backed by a synchronous closure.
///
/// Each call runs on tokio's blocking pool so slow blocking I/O never stalls
/// the workers' runtime threads. A panic inside the closure is reported as
/// [`RequestError::Other`].
pub struct BlockingRequester<F> {
    f: Arc<F>,
}

/// Wraps a synchronous closure as a [`Requester`].
pub fn blocking<F>(f: F) -> BlockingRequester<F>
where
    F: Fn(Payload) -> Result<Value, RequestError> + Send + Sync + 'static,
{
    BlockingRequester { f: Arc::new(f) }
}

#[async_trait]
impl<F> Requester for BlockingRequester<F>
where
    F: Fn(Payload) -> Result<Value, RequestError> + Send + Sync + 'static,
{
    async fn request(&self, payload: Payload) -> Result<Value, RequestError> {
        let f = Arc::clone(&self.f);
        match tokio::task::spawn_blocking(move || f(payload)).await {
            Ok(result) => result,
            Err(e) => Err(RequestError::Other(format!("request task failed: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_accessors() {
        let single = Payload::Single(json!(5));
        assert_eq!(single.len(), 1);
        assert!(!single.is_bulk());
        assert_eq!(single.args(), &[json!(5)]);
        assert_eq!(single.into_value(), json!(5));

        let bulk = Payload::Bulk(vec![json!(1), json!(2)]);
        assert_eq!(bulk.len(), 2);
        assert!(bulk.is_bulk());
        assert_eq!(bulk.into_value(), json!([1, 2]));
    }

    #[test]
    fn test_request_error_messages() {
        assert_eq!(RequestError::Empty.to_string(), "the response was returned empty");
        assert_eq!(RequestError::http(503).to_string(), "failed with code 503");
        assert_eq!(
            RequestError::other("boom").to_string(),
            "exception raised: boom"
        );
    }

    #[tokio::test]
    async fn test_from_fn() {
        let requester = from_fn(|payload: Payload| async move {
            match payload {
                Payload::Single(v) => Ok(json!({ "echo": v })),
                Payload::Bulk(_) => Err(RequestError::Empty),
            }
        });
        assert_eq!(
            requester.request(Payload::Single(json!(1))).await,
            Ok(json!({ "echo": 1 }))
        );
        assert_eq!(
            requester.request(Payload::Bulk(vec![json!(1), json!(2)])).await,
            Err(RequestError::Empty)
        );
    }

    #[tokio::test]
    async fn test_blocking_panic_is_classified() {
        let requester = blocking(|payload: Payload| {
            if payload.is_bulk() {
                panic!("bulk not supported");
            }
            Ok(json!("ok"))
        });
        assert_eq!(requester.request(Payload::Single(json!(1))).await, Ok(json!("ok")));
        match requester.request(Payload::Bulk(vec![json!(1), json!(2)])).await {
            Err(RequestError::Other(msg)) => assert!(msg.contains("request task failed")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_arc_requester() {
        let requester: Arc<dyn Requester> = Arc::new(from_fn(|_p: Payload| async { Ok::<_, RequestError>(json!(true)) }));
        assert_eq!(requester.request(Payload::Single(json!(0))).await, Ok(json!(true)));
    }
}
