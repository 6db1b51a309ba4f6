//! # paced-dispatch
//!
//! Rate-limited, adaptively batched dispatch of a large argument backlog
//! through a fixed worker pool, with per-argument failure isolation and
//! round-based retry.
//!
//! ## Overview
//!
//! A caller supplies a [`Requester`] (the remote call) and a list of JSON
//! arguments. The dispatcher emits at most `Nrequests` calls per `period`,
//! groups arguments into bulk calls while recent latency is low, records a
//! success or a classified failure for every argument, and re-runs the
//! failed ones for up to `max_repeat` rounds.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use paced_dispatch::{dispatch, requester, DispatchConfig, Payload, RequestError};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> paced_dispatch::Result<()> {
//!     let fetch = requester::from_fn(|payload: Payload| async move {
//!         // call the remote service here
//!         Ok::<_, RequestError>(json!({ "echo": payload.into_value() }))
//!     });
//!
//!     let config = DispatchConfig::new().with_rate(10, 1.0).with_max_workers(4);
//!     let args = (0..100).map(|i| json!(i)).collect();
//!     let report = dispatch(fetch, args, config).await?;
//!
//!     println!("{} ok, {} failed", report.successes.len(), report.failures.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`key`] | Canonical, hashable keys for arbitrary arguments |
//! | [`requester`] | The remote-call trait and its adapters |
//! | [`config`] | Pacing, batching and pool configuration |
//! | [`dispatch`] | Feeder, queue, workers and shutdown of a single round |
//! | [`results`] | Result store, batch unflattening and the final report |
//! | [`dispatcher`] | Round-based retry driver |

pub mod config;
pub mod dispatch;
pub mod dispatcher;
pub mod key;
pub mod requester;
pub mod results;

pub use config::DispatchConfig;
pub use dispatch::{DispatchSignals, RoundHandle, RoundReport, ShutdownState};
pub use dispatcher::{dispatch, CancelHandle, Dispatcher};
pub use key::{to_key, Key};
pub use requester::{Payload, RequestError, Requester};
pub use results::{DispatchReport, FailureKind};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
