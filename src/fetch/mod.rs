//! Page fetching capability.
//!
//! Two interchangeable strategies implement [`PageFetcher`]: the plain HTTP
//! [`RequestPipeline`] and the headless-browser fetcher in
//! [`crate::browser`]. Both share one [`crate::modules::proxy::TieredProxyPool`]
//! handle and report every attempt to it.

pub mod pipeline;
pub mod transport;

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::browser::BrowserError;
use crate::modules::proxy::{ProxyEntry, ProxyTier};

pub use pipeline::{FetchOptions, RequestPipeline};
pub use transport::{
    HttpTransport, ReqwestTransport, TransportError, TransportRequest, TransportResponse,
};

pub type FetchResult<T> = Result<T, FetchError>;

/// Classification of a single fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchStatus {
    Ok,
    BlockedForbidden,
    RateLimited,
    ChallengeDetected,
    NetworkError,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Ok => "ok",
            FetchStatus::BlockedForbidden => "blocked-forbidden",
            FetchStatus::RateLimited => "rate-limited",
            FetchStatus::ChallengeDetected => "challenge-detected",
            FetchStatus::NetworkError => "network-error",
        }
    }

    /// Map an HTTP status code (and whether the body carried a challenge
    /// marker) onto the attempt classification.
    pub fn classify(status: u16, challenge_in_body: bool) -> Self {
        match status {
            403 => FetchStatus::BlockedForbidden,
            429 => FetchStatus::RateLimited,
            _ if challenge_in_body => FetchStatus::ChallengeDetected,
            200..=299 => FetchStatus::Ok,
            _ => FetchStatus::NetworkError,
        }
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one fetch attempt.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub url: Url,
    pub status: FetchStatus,
    pub http_status: Option<u16>,
    pub body: Option<Bytes>,
    pub proxy: Option<ProxyEntry>,
    pub tier: Option<ProxyTier>,
}

impl FetchOutcome {
    pub fn is_ok(&self) -> bool {
        self.status == FetchStatus::Ok
    }

    /// Body decoded as UTF-8 (lossy); empty when there is no payload.
    pub fn text(&self) -> String {
        self.body
            .as_ref()
            .map(|body| String::from_utf8_lossy(body).into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("retries exhausted for {url} after {attempts} attempts (last: {last_status})")]
    ExhaustedRetries {
        url: Url,
        attempts: u32,
        last_status: FetchStatus,
    },
    #[error("challenge on {url} not cleared within {waited:?}")]
    ChallengeTimeout { url: Url, waited: Duration },
    #[error("no proxy available in any tier")]
    NoProxyAvailable,
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
}

/// Which fetch strategy a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchStrategy {
    Http,
    #[default]
    Browser,
}

impl FetchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStrategy::Http => "http",
            FetchStrategy::Browser => "browser",
        }
    }
}

impl FromStr for FetchStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "http" => Ok(FetchStrategy::Http),
            "browser" => Ok(FetchStrategy::Browser),
            other => Err(format!("unknown fetch strategy `{other}` (expected http or browser)")),
        }
    }
}

/// Single capability shared by every fetch strategy.
///
/// Implementations are owned by one worker. `close` must release every
/// external resource (browser processes, sessions) and is safe to call more
/// than once.
#[async_trait]
pub trait PageFetcher: Send {
    async fn fetch(&mut self, url: &Url) -> FetchResult<FetchOutcome>;

    async fn close(&mut self);

    fn strategy(&self) -> FetchStrategy;
}
