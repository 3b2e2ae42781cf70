//! Navigation endpoint for tunneled pages
//!
//! `/tunnel/<path>` serves a small bootstrap document that queues a GET for
//! `<path>` through the relay, waits for the agent's rewritten result and
//! replaces itself with it.

mod handler;
mod page;

pub use handler::{service_path, tunnel_router, TunnelState};
pub use page::bootstrap_page;
