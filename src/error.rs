//! Error types for the DoH proxy.

use std::io;
use std::net::{AddrParseError, SocketAddr};

use thiserror::Error;

use crate::dns::doh::DohError;

/// Main error type for proxy operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("DNS protocol error: {0}")]
    Protocol(#[from] hickory_proto::ProtoError),

    #[error("DNS-over-HTTPS error: {0}")]
    Doh(#[from] DohError),

    #[error("upstream {addr} did not answer within the timeout")]
    UpstreamTimeout { addr: SocketAddr },

    #[error("upstream answered with id {actual}, expected {expected}")]
    IdMismatch { expected: u16, actual: u16 },

    #[error("query has no question")]
    NoQuestion,

    #[error("resolver error: {0}")]
    Resolver(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("metrics error: {0}")]
    Metrics(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
}

/// Validation errors for configuration values.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("doh_endpoint is required")]
    EmptyDohEndpoint,

    #[error("invalid doh_endpoint {url:?}: {reason}")]
    InvalidDohEndpoint { url: String, reason: String },

    #[error("invalid {field} address {value:?}: {source}")]
    InvalidUpstreamAddress {
        field: &'static str,
        value: String,
        #[source]
        source: AddrParseError,
    },

    #[error("unknown response code in fallthrough_statuses: {name:?}")]
    UnknownResponseCode { name: String },

    #[error("upstream_timeout_secs must be greater than 0")]
    ZeroUpstreamTimeout,

    #[error("tcp_idle_timeout_secs must be greater than 0")]
    ZeroTcpIdleTimeout,
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;
