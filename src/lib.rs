//! doh-proxy - A DNS proxy backed by a DNS-over-HTTPS JSON API.
//!
//! The proxy listens for classic DNS queries over UDP and TCP and settles each
//! one by walking an ordered chain of upstreams: an optional primary classic
//! server, a DNS-over-HTTPS JSON endpoint, and an optional fallback classic
//! server. A response whose code is in the configured fallthrough set moves
//! the query on to the next upstream.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`config`]: Configuration loading and validation
//! - [`dns`]: Upstream transports, JSON translation, and the dispatch chain
//! - [`server`]: UDP and TCP listeners
//! - [`metrics`]: Prometheus exporter
//! - [`error`]: Error types
//!
//! # Testing
//!
//! Upstreams sit behind the [`dns::DnsResolver`] trait and answers leave
//! through [`dns::ResponseSink`], so the chain can be exercised without
//! network access:
//!
//! ```rust
//! use doh_proxy::dns::FallthroughSet;
//! use hickory_proto::op::ResponseCode;
//!
//! let set = FallthroughSet::from_names(["NXDOMAIN", "SERVFAIL"]).unwrap();
//! assert!(set.contains(ResponseCode::ServFail));
//! assert!(!set.contains(ResponseCode::NoError));
//! ```

pub mod config;
pub mod dns;
pub mod error;
pub mod metrics;
pub mod server;

pub use config::Config;
pub use error::{Error, Result};
