//! Reference agent
//!
//! Runs inside the private network. It polls the broker's relay for jobs,
//! executes each one against the private service and posts the response
//! back as a result.
//!
//! ```text
//! private service  <──HTTP──  Agent  ──poll/complete──>  broker /api/relay
//!                             ├ poller   (Semaphore-bounded job tasks)
//!                             └ upstream (Upstream trait, reqwest impl)
//! ```

mod poller;
mod upstream;

pub use poller::Agent;
pub use upstream::{encode_body, HttpUpstream, Upstream};
