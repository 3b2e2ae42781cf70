//! Job relay between browser-side clients and the private agent
//!
//! Jobs are queued FIFO and handed out one poll at a time; results are
//! staged per job id and read exactly once. A collector sweeps stale
//! entries opportunistically.

mod broker;
mod collector;
mod handler;
mod queue;
mod store;
mod types;

pub use broker::Broker;
pub use collector::{Collector, SweepStats};
pub use handler::{relay_router, RelayState};
pub use queue::JobQueue;
pub use store::ResultStore;
pub use types::{
    normalize_path, now_millis, ApiError, ApiErrorDetail, CompleteRequest, CompleteResponse, Job,
    JobResult, PollResponse, QueueRequest, QueueResponse, ResultResponse, RECOMPUTED_HEADERS,
};
