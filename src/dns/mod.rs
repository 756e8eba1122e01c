//! DNS-related modules.

pub mod chain;
pub mod doh;
pub mod fallthrough;
pub mod json;
pub mod record;
pub mod resolver;
pub mod response;

pub use chain::{ChainConfig, DispatchChain, Outcome, ResponseSink, Stage};
pub use doh::DohResolver;
pub use fallthrough::{FallthroughSet, NoFallthrough};
pub use resolver::{DnsResolver, Protocol, UpstreamResolver};
