//! JSON envelope of the DNS-over-HTTPS resolve API.
//!
//! Every field is optional on the wire: providers omit empty sections and
//! false flags, so missing values decode to their defaults.

use serde::Deserialize;

/// Decoded body of a DoH JSON answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DohResponse {
    /// DNS response code.
    #[serde(rename = "Status", default)]
    pub status: u16,

    /// Truncated.
    #[serde(rename = "TC", default)]
    pub truncated: bool,

    /// Recursion desired.
    #[serde(rename = "RD", default)]
    pub recursion_desired: bool,

    /// Recursion available.
    #[serde(rename = "RA", default)]
    pub recursion_available: bool,

    /// Authenticated data (DNSSEC validated).
    #[serde(rename = "AD", default)]
    pub authentic_data: bool,

    /// Checking disabled.
    #[serde(rename = "CD", default)]
    pub checking_disabled: bool,

    #[serde(rename = "Question", default)]
    pub question: Vec<DohQuestion>,

    #[serde(rename = "Answer", default)]
    pub answer: Vec<DohRecord>,

    #[serde(rename = "Authority", default)]
    pub authority: Vec<DohRecord>,

    #[serde(rename = "Additional", default)]
    pub additional: Vec<DohRecord>,

    /// Client subnet the provider used, echoed back.
    #[serde(default)]
    pub edns_client_subnet: Option<String>,

    /// Free-form diagnostic text some providers attach.
    #[serde(rename = "Comment", default)]
    pub comment: Option<String>,
}

/// A question echoed back by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DohQuestion {
    #[serde(default)]
    pub name: String,

    #[serde(rename = "type", default)]
    pub record_type: u16,
}

/// A resource record with its RDATA in presentation format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DohRecord {
    #[serde(default)]
    pub name: String,

    #[serde(rename = "type", default)]
    pub record_type: u16,

    #[serde(rename = "TTL", default)]
    pub ttl: u32,

    #[serde(default)]
    pub data: String,
}
