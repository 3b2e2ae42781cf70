//! Client-facing proxy endpoint
//!
//! Turns an ordinary browser request into a relay job and blocks until the
//! agent answers or the deadline passes.

mod handler;
mod headers;

pub use handler::{proxy_router, ProxyState, TIMEOUT_MESSAGE};
pub use headers::{decode_body, extract_body, forward_headers, response_headers, ExtractedBody};
