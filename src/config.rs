//! Configuration loading and validation.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::dns::chain::ChainConfig;
use crate::dns::doh::DEFAULT_DOH_ENDPOINT;
use crate::dns::fallthrough::{FallthroughSet, NoFallthrough};
use crate::error::{ConfigError, Result, ValidationError};

/// Port used for upstream addresses given without one.
const DEFAULT_DNS_PORT: u16 = 53;

/// Main configuration for the DoH proxy.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address to listen on, for both UDP and TCP.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// DNS-over-HTTPS JSON endpoint.
    #[serde(default = "default_doh_endpoint")]
    pub doh_endpoint: String,

    /// Classic DNS server tried before the DoH endpoint ("ip" or "ip:port").
    #[serde(default)]
    pub primary_dns: Option<String>,

    /// Classic DNS server tried after the DoH endpoint failed ("ip" or "ip:port").
    #[serde(default)]
    pub fallback_dns: Option<String>,

    /// Response code names that make a query fall through to the next upstream.
    #[serde(default = "default_fallthrough_statuses")]
    pub fallthrough_statuses: Vec<String>,

    /// Domain suffixes that are never allowed to fall through.
    #[serde(default)]
    pub no_fallthrough: Vec<String>,

    /// Timeout in seconds of a single upstream exchange, classic or DoH.
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_secs: u64,

    /// Idle time in seconds after which client TCP connections are closed.
    #[serde(default = "default_tcp_idle_timeout")]
    pub tcp_idle_timeout_secs: u64,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Expose a `/metrics` endpoint.
    #[serde(default)]
    pub enabled: bool,

    /// Address of the metrics HTTP listener.
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], DEFAULT_DNS_PORT))
}

fn default_doh_endpoint() -> String {
    DEFAULT_DOH_ENDPOINT.to_string()
}

fn default_fallthrough_statuses() -> Vec<String> {
    vec!["NXDOMAIN".to_string()]
}

const fn default_upstream_timeout() -> u64 {
    5
}

const fn default_tcp_idle_timeout() -> u64 {
    8
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9090))
}

/// Parse an upstream address, defaulting the port to 53.
fn parse_upstream_addr(
    field: &'static str,
    value: &str,
) -> std::result::Result<SocketAddr, ValidationError> {
    let value = value.trim();
    if let Ok(ip) = value.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_DNS_PORT));
    }
    value
        .parse()
        .map_err(|source| ValidationError::InvalidUpstreamAddress {
            field,
            value: value.to_string(),
            source,
        })
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        let endpoint = self.doh_endpoint.trim();
        if endpoint.is_empty() {
            return Err(ValidationError::EmptyDohEndpoint);
        }
        let url = reqwest::Url::parse(endpoint).map_err(|err| {
            ValidationError::InvalidDohEndpoint {
                url: endpoint.to_string(),
                reason: err.to_string(),
            }
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ValidationError::InvalidDohEndpoint {
                url: endpoint.to_string(),
                reason: "scheme must be http or https".to_string(),
            });
        }

        self.primary_addr()?;
        self.fallback_addr()?;
        self.fallthrough_set()?;

        if self.upstream_timeout_secs == 0 {
            return Err(ValidationError::ZeroUpstreamTimeout);
        }

        if self.tcp_idle_timeout_secs == 0 {
            return Err(ValidationError::ZeroTcpIdleTimeout);
        }

        Ok(())
    }

    /// Address of the primary classic server, if configured.
    pub fn primary_addr(&self) -> std::result::Result<Option<SocketAddr>, ValidationError> {
        optional_addr("primary_dns", self.primary_dns.as_deref())
    }

    /// Address of the fallback classic server, if configured.
    pub fn fallback_addr(&self) -> std::result::Result<Option<SocketAddr>, ValidationError> {
        optional_addr("fallback_dns", self.fallback_dns.as_deref())
    }

    /// Response codes that trigger fallthrough.
    pub fn fallthrough_set(&self) -> std::result::Result<FallthroughSet, ValidationError> {
        FallthroughSet::from_names(&self.fallthrough_statuses)
    }

    /// Fallthrough settings handed to the dispatch chain.
    pub fn chain_config(&self) -> std::result::Result<ChainConfig, ValidationError> {
        Ok(ChainConfig {
            fallthrough: self.fallthrough_set()?,
            no_fallthrough: NoFallthrough::new(&self.no_fallthrough),
        })
    }

    /// Timeout of a single upstream exchange.
    pub const fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    /// Idle timeout of client TCP connections.
    pub const fn tcp_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.tcp_idle_timeout_secs)
    }
}

/// Empty strings count as "not configured".
fn optional_addr(
    field: &'static str,
    value: Option<&str>,
) -> std::result::Result<Option<SocketAddr>, ValidationError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => parse_upstream_addr(field, value).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use hickory_proto::op::ResponseCode;

    #[test]
    fn test_parse_valid_config() {
        let toml = r#"
            listen = "127.0.0.1:8053"
            doh_endpoint = "https://cloudflare-dns.com/dns-query"
            primary_dns = "10.0.0.1:5353"
            fallback_dns = "192.168.1.1"
            fallthrough_statuses = ["NXDOMAIN", "SERVFAIL"]
            no_fallthrough = ["corp.example"]
            upstream_timeout_secs = 3
        "#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.listen.to_string(), "127.0.0.1:8053");
        assert_eq!(config.doh_endpoint, "https://cloudflare-dns.com/dns-query");
        assert_eq!(
            config.primary_addr().unwrap(),
            Some("10.0.0.1:5353".parse().unwrap())
        );
        assert_eq!(
            config.fallback_addr().unwrap(),
            Some("192.168.1.1:53".parse().unwrap())
        );
        assert_eq!(config.upstream_timeout(), Duration::from_secs(3));

        let chain = config.chain_config().unwrap();
        assert!(chain.fallthrough.contains(ResponseCode::NXDomain));
        assert!(chain.fallthrough.contains(ResponseCode::ServFail));
        assert_eq!(chain.no_fallthrough.len(), 1);
    }

    #[test]
    fn test_default_values() {
        let config = Config::parse("").unwrap();

        assert_eq!(config.listen.to_string(), "0.0.0.0:53");
        assert_eq!(config.doh_endpoint, DEFAULT_DOH_ENDPOINT);
        assert_eq!(config.primary_addr().unwrap(), None);
        assert_eq!(config.fallback_addr().unwrap(), None);
        assert_eq!(config.fallthrough_statuses, vec!["NXDOMAIN"]);
        assert!(config.no_fallthrough.is_empty());
        assert_eq!(config.upstream_timeout_secs, 5);
        assert_eq!(config.tcp_idle_timeout_secs, 8);
        assert!(!config.metrics.enabled);
        assert_eq!(config.metrics.listen.to_string(), "0.0.0.0:9090");

        let chain = config.chain_config().unwrap();
        assert_eq!(chain.fallthrough, FallthroughSet::default());
        assert!(chain.no_fallthrough.is_empty());
    }

    #[test]
    fn test_ipv6_upstream_address() {
        let toml = r#"
            primary_dns = "[2001:db8::53]:5353"
            fallback_dns = "2001:db8::1"
        "#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(
            config.primary_addr().unwrap(),
            Some("[2001:db8::53]:5353".parse().unwrap())
        );
        assert_eq!(
            config.fallback_addr().unwrap(),
            Some("[2001:db8::1]:53".parse().unwrap())
        );
    }

    #[test]
    fn test_empty_upstream_means_not_configured() {
        let toml = r#"
            primary_dns = ""
        "#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.primary_addr().unwrap(), None);
    }

    #[test]
    fn test_metrics_config() {
        let toml = r#"
            [metrics]
            enabled = true
            listen = "127.0.0.1:9100"
        "#;

        let config = Config::parse(toml).unwrap();
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.listen.to_string(), "127.0.0.1:9100");
    }

    #[test]
    fn test_empty_doh_endpoint_rejected() {
        let toml = r#"
            doh_endpoint = ""
        "#;

        assert!(matches!(
            Config::parse(toml),
            Err(Error::Config(ConfigError::Validation(
                ValidationError::EmptyDohEndpoint
            )))
        ));
    }

    #[test]
    fn test_non_http_doh_endpoint_rejected() {
        let toml = r#"
            doh_endpoint = "ftp://dns.example/resolve"
        "#;

        assert!(matches!(
            Config::parse(toml),
            Err(Error::Config(ConfigError::Validation(
                ValidationError::InvalidDohEndpoint { .. }
            )))
        ));
    }

    #[test]
    fn test_invalid_upstream_address_rejected() {
        let toml = r#"
            fallback_dns = "not-an-address"
        "#;

        assert!(matches!(
            Config::parse(toml),
            Err(Error::Config(ConfigError::Validation(
                ValidationError::InvalidUpstreamAddress {
                    field: "fallback_dns",
                    ..
                }
            )))
        ));
    }

    #[test]
    fn test_unknown_fallthrough_status_rejected() {
        let toml = r#"
            fallthrough_statuses = ["NXDOMAIN", "MAYBE"]
        "#;

        assert!(matches!(
            Config::parse(toml),
            Err(Error::Config(ConfigError::Validation(
                ValidationError::UnknownResponseCode { .. }
            )))
        ));
    }

    #[test]
    fn test_zero_upstream_timeout_rejected() {
        let toml = r#"
            upstream_timeout_secs = 0
        "#;

        assert!(Config::parse(toml).is_err());
    }

    #[test]
    fn test_zero_tcp_idle_timeout_rejected() {
        let toml = r#"
            tcp_idle_timeout_secs = 0
        "#;

        assert!(Config::parse(toml).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let toml = r#"
            unknown_field = "value"
        "#;

        assert!(matches!(
            Config::parse(toml),
            Err(Error::Config(ConfigError::Parse(_)))
        ));
    }

    #[test]
    fn test_sample_config_file() {
        let config = Config::parse(include_str!("../config.toml")).unwrap();

        assert_eq!(config.primary_addr().unwrap(), None);
        assert_eq!(
            config.fallback_addr().unwrap(),
            Some("1.1.1.1:53".parse().unwrap())
        );
        assert_eq!(config.chain_config().unwrap().no_fallthrough.len(), 2);
    }
}
