//! Fallthrough policy.
//!
//! Decides whether an upstream answer is good enough to send back to the
//! client, or whether the dispatch chain should move on to the next upstream.

use std::collections::HashSet;

use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::Name;

use crate::error::ValidationError;

/// Response code mnemonics accepted in configuration.
const RESPONSE_CODE_NAMES: &[(&str, u16)] = &[
    ("NOERROR", 0),
    ("FORMERR", 1),
    ("SERVFAIL", 2),
    ("NXDOMAIN", 3),
    ("NOTIMP", 4),
    ("REFUSED", 5),
    ("YXDOMAIN", 6),
    ("YXRRSET", 7),
    ("NXRRSET", 8),
    ("NOTAUTH", 9),
    ("NOTZONE", 10),
    ("BADSIG", 16),
    ("BADVERS", 16),
    ("BADKEY", 17),
    ("BADTIME", 18),
    ("BADMODE", 19),
    ("BADNAME", 20),
    ("BADALG", 21),
    ("BADTRUNC", 22),
    ("BADCOOKIE", 23),
];

/// Look up the numeric value of a response code mnemonic (`"NXDOMAIN"` → 3).
///
/// Matching is case-insensitive.
pub fn parse_response_code(name: &str) -> Option<u16> {
    RESPONSE_CODE_NAMES
        .iter()
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name.trim()))
        .map(|(_, code)| *code)
}

/// Response codes that count as a failure for chaining purposes.
///
/// An upstream answer carrying one of these codes makes the chain try the
/// next upstream, even though the exchange itself succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallthroughSet {
    codes: HashSet<u16>,
}

impl FallthroughSet {
    /// Create a set from response codes.
    pub fn new<I>(codes: I) -> Self
    where
        I: IntoIterator<Item = ResponseCode>,
    {
        Self {
            codes: codes.into_iter().map(u16::from).collect(),
        }
    }

    /// Create a set from response code mnemonics such as `"NXDOMAIN"`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownResponseCode`] for a name that is not
    /// a known response code.
    pub fn from_names<I, S>(names: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let codes = names
            .into_iter()
            .map(|name| {
                let name = name.as_ref();
                parse_response_code(name).ok_or_else(|| ValidationError::UnknownResponseCode {
                    name: name.to_string(),
                })
            })
            .collect::<Result<HashSet<_>, _>>()?;

        Ok(Self { codes })
    }

    /// Check whether a response code is in the set.
    #[inline]
    pub fn contains(&self, code: ResponseCode) -> bool {
        self.codes.contains(&u16::from(code))
    }

    /// Returns the number of codes in the set.
    #[inline]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Check if the set has no codes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Classify an upstream answer.
    ///
    /// A missing response is never successful. Otherwise the response is
    /// successful unless its code is in the set.
    pub fn is_success(&self, response: Option<&Message>) -> bool {
        response.is_some_and(|response| !self.contains(response.response_code()))
    }
}

impl Default for FallthroughSet {
    fn default() -> Self {
        Self::new([ResponseCode::NXDomain])
    }
}

/// Domain suffixes for which the chain must never fall through.
///
/// A query for a matching name is settled by the first upstream that
/// completes, whatever its response code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoFallthrough {
    /// Suffixes stored lowercase, without trailing dot. The root suffix `"."`
    /// is stored as the empty string and matches every name.
    suffixes: Vec<String>,
}

impl NoFallthrough {
    /// Create the suffix list. Blank entries are dropped.
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let suffixes = suffixes
            .into_iter()
            .filter(|suffix| !suffix.as_ref().trim().is_empty())
            .map(|suffix| normalize(suffix.as_ref()))
            .collect();

        Self { suffixes }
    }

    /// Returns the number of suffixes.
    #[inline]
    pub fn len(&self) -> usize {
        self.suffixes.len()
    }

    /// Check if there are no suffixes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.suffixes.is_empty()
    }

    /// Check whether a single name ends with one of the suffixes.
    pub fn matches(&self, name: &Name) -> bool {
        if self.suffixes.is_empty() {
            return false;
        }

        let name = normalize(&name.to_utf8());
        self.suffixes
            .iter()
            .any(|suffix| name.ends_with(suffix.as_str()))
    }

    /// Decide whether the chain may continue past the first answer for a query.
    ///
    /// Returns false as soon as any question name matches a suffix.
    pub fn continue_fallthrough(&self, query: &Message) -> bool {
        !query.queries().iter().any(|q| self.matches(q.name()))
    }
}

fn normalize(value: &str) -> String {
    value.trim().trim_end_matches('.').to_lowercase()
}
