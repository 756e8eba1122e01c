//! DNS-over-HTTPS transport using the JSON resolve API.
//!
//! One query becomes one HTTP GET carrying the question as URL parameters.
//! The JSON answer is decoded and turned back into a DNS response that
//! matches the original query.

use std::time::Duration;

use hickory_proto::op::Message;
use reqwest::Client;
use reqwest::header::ACCEPT;
use tracing::debug;

use super::json::DohResponse;
use super::resolver::{DnsResolver, Protocol};
use super::response::assemble_response;
use crate::error::{Error, Result};

/// Default Google endpoint of the JSON API.
pub const DEFAULT_DOH_ENDPOINT: &str = "https://dns.google.com/resolve";

/// Client subnet sent with every request. Disables subnet-based answers.
pub const EDNS_CLIENT_SUBNET: &str = "0.0.0.0/0";

/// Media type of the JSON API.
const DNS_JSON_MEDIA_TYPE: &str = "application/dns-json";

/// User-Agent header value for HTTP requests.
const USER_AGENT: &str = concat!("doh-proxy/", env!("CARGO_PKG_VERSION"));

/// Error type for DNS-over-HTTPS exchanges.
#[derive(Debug, thiserror::Error)]
pub enum DohError {
    /// HTTP request failed with a non-success status code.
    #[error("HTTP request failed for {url}: status {status}")]
    HttpStatus {
        /// URL that was requested.
        url: String,
        /// HTTP status code returned.
        status: u16,
    },

    /// Network error during HTTP request.
    #[error("network error querying {url}: {source}")]
    Network {
        /// URL that was requested.
        url: String,
        /// Underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// Timeout querying the endpoint.
    #[error("timeout querying {url}")]
    Timeout {
        /// URL that timed out.
        url: String,
    },

    /// Response body is not a valid JSON answer.
    #[error("malformed JSON DNS response: {0}")]
    Decode(#[source] serde_json::Error),

    /// Failed to create HTTP client.
    #[error("failed to create HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

/// Resolver forwarding queries to a DNS-over-HTTPS JSON endpoint.
#[derive(Debug, Clone)]
pub struct DohResolver {
    client: Client,
    endpoint: String,
}

impl DohResolver {
    /// Create a resolver for `endpoint` with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(DohError::ClientBuild)?;

        Ok(Self::with_client(client, endpoint))
    }

    /// Create a resolver reusing an existing HTTP client.
    pub fn with_client(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// The endpoint queries are sent to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Perform the HTTP exchange for the first question of `query`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoQuestion`] for a query without question, and a
    /// [`DohError`] when the request fails or the body cannot be decoded.
    pub async fn fetch(&self, query: &Message) -> Result<DohResponse> {
        let question = query.queries().first().ok_or(Error::NoQuestion)?;
        let name = question.name().to_ascii();
        let record_type = u16::from(question.query_type()).to_string();

        // The checking-disabled flag is never forwarded.
        let request = self
            .client
            .get(self.endpoint.as_str())
            .header(ACCEPT, DNS_JSON_MEDIA_TYPE)
            .query(&[
                ("name", name.as_str()),
                ("type", record_type.as_str()),
                ("edns_client_subnet", EDNS_CLIENT_SUBNET),
            ]);

        debug!(endpoint = %self.endpoint, name = %name, qtype = %record_type, "sending DoH request");

        let response = request
            .send()
            .await
            .map_err(|err| self.request_error(err))?;

        if !response.status().is_success() {
            return Err(DohError::HttpStatus {
                url: self.endpoint.clone(),
                status: response.status().as_u16(),
            }
            .into());
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| self.request_error(err))?;

        let decoded = serde_json::from_slice(&body).map_err(DohError::Decode)?;
        Ok(decoded)
    }

    fn request_error(&self, err: reqwest::Error) -> DohError {
        if err.is_timeout() {
            DohError::Timeout {
                url: self.endpoint.clone(),
            }
        } else {
            DohError::Network {
                url: self.endpoint.clone(),
                source: err,
            }
        }
    }
}

impl DnsResolver for DohResolver {
    async fn resolve(&self, query: &Message, _protocol: Protocol) -> Result<Message> {
        let upstream = self.fetch(query).await?;
        Ok(assemble_response(query, &upstream))
    }
}
