//! Dispatch chain over the configured upstreams.
//!
//! Every query walks the same ordered list of attempts: the primary classic
//! server if configured, the DoH endpoint, then the fallback classic server if
//! configured. The first acceptable answer is written back. Attempts are never
//! raced or reordered.

use std::fmt;
use std::future::Future;

use hickory_proto::op::{Message, MessageType, ResponseCode};
use metrics::counter;
use tracing::{debug, error, info, instrument, warn};

use super::fallthrough::{FallthroughSet, NoFallthrough};
use super::resolver::{DnsResolver, Protocol};
use crate::error::Result;

/// Destination of the single answer to a query.
///
/// Both operations consume the sink, so it is written at most once.
pub trait ResponseSink: Send + Sized {
    /// Deliver a response to the client.
    fn write(self, response: &Message) -> impl Future<Output = Result<()>> + Send;

    /// Deliver a generic failure (SERVFAIL) for `query` to the client.
    fn write_failure(self, query: &Message) -> impl Future<Output = Result<()>> + Send;
}

/// Build the generic failure answer for a query.
pub fn failure_response(query: &Message) -> Message {
    let mut response = Message::new();
    response
        .set_id(query.id())
        .set_message_type(MessageType::Response)
        .set_op_code(query.op_code())
        .set_recursion_desired(query.recursion_desired())
        .set_checking_disabled(query.checking_disabled())
        .set_response_code(ResponseCode::ServFail);

    for q in query.queries() {
        response.add_query(q.clone());
    }

    response
}

/// Fallthrough settings shared by every query.
#[derive(Debug, Clone, Default)]
pub struct ChainConfig {
    /// Response codes that make the chain try the next upstream.
    pub fallthrough: FallthroughSet,
    /// Suffixes for which the first completed attempt is final.
    pub no_fallthrough: NoFallthrough,
}

/// Position of an attempt in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Primary,
    Doh,
    Fallback,
}

impl Stage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Doh => "doh",
            Self::Fallback => "fallback",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a query was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// An upstream answer was written.
    Answered {
        stage: Stage,
        response_code: ResponseCode,
    },
    /// A generic failure was written.
    Failed,
}

/// An upstream borrowed from the chain for one attempt.
enum Upstream<'a, C, D> {
    Classic(&'a C),
    Doh(&'a D),
}

impl<C, D> Upstream<'_, C, D>
where
    C: DnsResolver,
    D: DnsResolver,
{
    async fn resolve(&self, query: &Message, protocol: Protocol) -> Result<Message> {
        match self {
            Self::Classic(resolver) => resolver.resolve(query, protocol).await,
            Self::Doh(resolver) => resolver.resolve(query, protocol).await,
        }
    }
}

/// Ordered chain of upstreams: primary, DoH, fallback.
///
/// `C` is the classic resolver type used for the primary and fallback
/// servers, `D` the DNS-over-HTTPS resolver.
pub struct DispatchChain<C, D> {
    primary: Option<C>,
    doh: D,
    fallback: Option<C>,
    config: ChainConfig,
}

impl<C, D> DispatchChain<C, D>
where
    C: DnsResolver,
    D: DnsResolver,
{
    /// Create a chain with only the DoH stage.
    pub const fn new(doh: D, config: ChainConfig) -> Self {
        Self {
            primary: None,
            doh,
            fallback: None,
            config,
        }
    }

    /// Add a classic server tried before DoH.
    #[must_use]
    pub fn with_primary(mut self, primary: C) -> Self {
        self.primary = Some(primary);
        self
    }

    /// Add a classic server tried after DoH.
    #[must_use]
    pub fn with_fallback(mut self, fallback: C) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Stages in the order they are attempted.
    pub fn stages(&self) -> Vec<Stage> {
        self.attempts().map(|(stage, _)| stage).collect()
    }

    fn attempts(&self) -> impl Iterator<Item = (Stage, Upstream<'_, C, D>)> {
        self.primary
            .as_ref()
            .map(|resolver| (Stage::Primary, Upstream::Classic(resolver)))
            .into_iter()
            .chain(std::iter::once((Stage::Doh, Upstream::Doh(&self.doh))))
            .chain(
                self.fallback
                    .as_ref()
                    .map(|resolver| (Stage::Fallback, Upstream::Classic(resolver))),
            )
    }

    /// Settle one query: write exactly one answer or one failure to `sink`.
    #[instrument(skip(self, query, sink), fields(domain, id = query.id(), protocol = %protocol))]
    pub async fn handle<S>(&self, query: &Message, protocol: Protocol, sink: S) -> Outcome
    where
        S: ResponseSink,
    {
        if let Some(question) = query.queries().first() {
            tracing::Span::current().record("domain", question.name().to_string());
        }
        counter!("doh_proxy_queries_total", "protocol" => protocol.as_str()).increment(1);

        let can_fallthrough = self.config.no_fallthrough.continue_fallthrough(query);
        if !can_fallthrough {
            debug!("fallthrough disabled for this query");
        }

        for (stage, upstream) in self.attempts() {
            let response = match upstream.resolve(query, protocol).await {
                Ok(response) => response,
                Err(err) => {
                    warn!(stage = %stage, error = %err, "upstream attempt failed");
                    record_attempt(stage, "error");
                    if !can_fallthrough {
                        return Self::fail(sink, query).await;
                    }
                    continue;
                }
            };

            let response_code = response.response_code();
            let success = self.config.fallthrough.is_success(Some(&response));
            if success || !can_fallthrough {
                record_attempt(stage, if success { "success" } else { "final" });
                info!(stage = %stage, rcode = %response_code, "answering query");
                if let Err(err) = sink.write(&response).await {
                    error!(error = %err, "error writing DNS response");
                }
                counter!("doh_proxy_responses_total", "result" => "answered").increment(1);
                return Outcome::Answered {
                    stage,
                    response_code,
                };
            }

            record_attempt(stage, "fallthrough");
            debug!(stage = %stage, rcode = %response_code, "falling through to next upstream");
        }

        warn!("all upstreams failed");
        Self::fail(sink, query).await
    }

    async fn fail<S>(sink: S, query: &Message) -> Outcome
    where
        S: ResponseSink,
    {
        if let Err(err) = sink.write_failure(query).await {
            error!(error = %err, "error writing DNS failure response");
        }
        counter!("doh_proxy_responses_total", "result" => "failed").increment(1);
        Outcome::Failed
    }
}

fn record_attempt(stage: Stage, result: &'static str) {
    counter!(
        "doh_proxy_upstream_attempts_total",
        "stage" => stage.as_str(),
        "result" => result
    )
    .increment(1);
}
