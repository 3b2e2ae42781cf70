//! tunnelgate - HTTP relay broker for services behind NAT
//!
//! A private web application that cannot accept inbound connections is made
//! reachable through a public broker. A small agent running next to the
//! service polls the broker for work, executes each request against the
//! service and posts the response back.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  /api/proxy?path=…   ┌──────────────────────────────┐
//! │ Browser  │ ───────────────────▶ │           Broker             │
//! │          │  /tunnel/*path       │  ┌────────┐   ┌───────────┐  │
//! │          │ ───────────────────▶ │  │  Job   │   │  Result   │  │
//! │          │  /api/relay          │  │ Queue  │   │  Store    │  │
//! │          │  (queue / result)    │  └───┬────┘   └─────▲─────┘  │
//! └──────────┘                      │      │  Collector    │        │
//!                                   └──────┼───────────────┼────────┘
//!                                  poll    │               │ complete
//!                                   ┌──────▼───────────────┴────────┐
//!                                   │            Agent              │
//!                                   └──────────────┬────────────────┘
//!                                                  │ HTTP
//!                                   ┌──────────────▼────────────────┐
//!                                   │        Private service        │
//!                                   └───────────────────────────────┘
//! ```
//!
//! Two client flows exist. Resource and API requests go through
//! `/api/proxy`, which holds the connection until the agent answers.
//! Page navigation goes through `/tunnel/<path>`, which serves a bootstrap
//! document that queues the page, polls for it and replaces itself with the
//! rewritten HTML.
//!
//! ## Modules
//!
//! - [`relay`]: job queue, result store, collector and the relay endpoint
//! - [`proxy`]: blocking client-facing proxy endpoint
//! - [`tunnel`]: navigation bootstrap page
//! - [`rewrite`]: HTML/CSS URL rewriting and the runtime patch
//! - [`agent`]: reference agent (poller and upstream client)
//! - [`api`]: router assembly
//! - [`config`]: configuration management

pub mod agent;
pub mod api;
pub mod config;
pub mod error;
pub mod proxy;
pub mod relay;
pub mod rewrite;
pub mod tunnel;

pub use config::TunnelGateConfig;
pub use error::{Error, Result};
