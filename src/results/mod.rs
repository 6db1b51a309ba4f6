//! Result collection.
//!
//! Workers write classified outcomes into a shared [`ResultStore`]; once a
//! round has stopped, [`unflatten`] expands bulk batch entries into
//! per-argument entries, and the driver folds the rounds into a
//! [`DispatchReport`].

mod aggregate;
mod outcome;
mod report;
mod store;

pub use aggregate::{unflatten, BatchKeyRegistry, RoundResults};
pub use outcome::{FailureKind, Outcome};
pub use report::{DispatchReport, RoundSummary};
pub use store::{RawResults, ResultStore};
