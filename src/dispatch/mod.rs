//! The round engine.
//!
//! One round wires a paced producer to a fixed worker pool through a bounded
//! queue:
//!
//! ```text
//! backlog -> PacingFeeder -> DispatchQueue -> WorkerPool -> ResultStore
//!                 ^                 |               |
//!           LatencyWindow <---------+---------------+
//!                              ShutdownCoordinator
//! ```
//!
//! The feeder emits at most one batch per `period / Nrequests` and blocks
//! when the queue is full. Workers record request latency, which the feeder
//! reads to decide between single and bulk batches. The coordinator stops
//! the workers once the feeder is done and the queue is empty.

mod feeder;
mod latency;
mod pool;
mod queue;
mod round;
mod shutdown;
mod signals;
mod worker;

pub use feeder::{BatchSizePolicy, FeederReport, PacingFeeder};
pub use latency::LatencyWindow;
pub use pool::{WorkerHandle, WorkerPool};
pub use queue::{Batch, DispatchQueue};
pub use round::{RoundHandle, RoundReport};
pub use shutdown::{ShutdownCoordinator, ShutdownState};
pub use signals::DispatchSignals;
pub use worker::WorkerStats;
