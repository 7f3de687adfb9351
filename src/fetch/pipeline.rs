//! Plain-HTTP request pipeline.
//!
//! Issues one logical fetch: waits for the process-wide rate limiter, picks a
//! proxy, synthesizes an identity, sends through the transport, classifies
//! the response, and reports the outcome to the proxy pool. Non-ok attempts
//! are retried with exponential backoff until the attempt budget runs out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use http::{HeaderMap, Method};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::time::sleep;
use url::Url;

use super::transport::{HttpTransport, TransportRequest};
use super::{FetchError, FetchOutcome, FetchResult, FetchStatus, FetchStrategy, PageFetcher};
use crate::challenges::detectors::ChallengeDetector;
use crate::config::HarvestConfig;
use crate::modules::events::{
	EventDispatcher, FetchEvent, PostResponseEvent, PreRequestEvent, ProxyFailureEvent,
	RetryEvent,
};
use crate::modules::pacing::{RateLimiter, RetryBackoff};
use crate::modules::proxy::{ProxyEntry, TieredProxyPool};
use crate::modules::spoofing::IdentityGenerator;

/// Per-call request options.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
	/// Headers that override the synthesized identity headers.
	pub headers: HeaderMap,
	pub body: Option<Bytes>,
}

/// HTTP fetch strategy with proxy rotation, identity synthesis and retries.
pub struct RequestPipeline {
	transport: Arc<dyn HttpTransport>,
	pool: Arc<TieredProxyPool>,
	limiter: Arc<RateLimiter>,
	identities: IdentityGenerator,
	detector: ChallengeDetector,
	backoff: RetryBackoff,
	max_attempts: u32,
	timeout: Duration,
	events: Arc<EventDispatcher>,
	rng: StdRng,
}

impl RequestPipeline {
	pub fn new(
		transport: Arc<dyn HttpTransport>,
		pool: Arc<TieredProxyPool>,
		limiter: Arc<RateLimiter>,
	) -> Self {
		Self {
			transport,
			pool,
			limiter,
			identities: IdentityGenerator::default(),
			detector: ChallengeDetector::new(),
			backoff: RetryBackoff::new(1.0, Duration::from_secs(2), Duration::from_secs(10)),
			max_attempts: 12,
			timeout: Duration::from_secs(30),
			events: Arc::new(EventDispatcher::with_logging()),
			rng: StdRng::from_entropy(),
		}
	}

	/// Apply identity pools, retry budget, backoff and timeout from the run config.
	pub fn from_config(
		config: &HarvestConfig,
		transport: Arc<dyn HttpTransport>,
		pool: Arc<TieredProxyPool>,
		limiter: Arc<RateLimiter>,
	) -> Self {
		Self::new(transport, pool, limiter)
			.with_identities(IdentityGenerator::new(&config.anti_detection))
			.with_backoff(RetryBackoff::from_settings(&config.retry))
			.with_max_attempts(config.retry.max_attempts)
			.with_timeout(config.proxy_timeout())
	}

	pub fn with_identities(mut self, identities: IdentityGenerator) -> Self {
		self.identities = identities;
		self
	}

	pub fn with_backoff(mut self, backoff: RetryBackoff) -> Self {
		self.backoff = backoff;
		self
	}

	pub fn with_max_attempts(mut self, attempts: u32) -> Self {
		self.max_attempts = attempts.max(1);
		self
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	pub fn with_events(mut self, events: Arc<EventDispatcher>) -> Self {
		self.events = events;
		self
	}

	pub fn with_rng(mut self, rng: StdRng) -> Self {
		self.rng = rng;
		self
	}

	/// Perform one logical fetch, retrying until an attempt is classified ok
	/// or the attempt budget is spent.
	pub async fn execute(
		&mut self,
		url: &Url,
		method: Method,
		options: FetchOptions,
	) -> FetchResult<FetchOutcome> {
		let mut last_status = FetchStatus::NetworkError;

		for attempt in 1..=self.max_attempts {
			self.limiter.acquire().await;

			let lease = self.pool.acquire();
			if lease.is_none() && !self.pool.is_empty() {
				return Err(FetchError::NoProxyAvailable);
			}
			let (proxy, tier) = match lease {
				Some((entry, tier)) => (Some(entry), Some(tier)),
				None => (None, None),
			};

			let mut headers = self.identities.generate(&mut self.rng).headers();
			for (name, value) in options.headers.iter() {
				headers.insert(name.clone(), value.clone());
			}

			self.events.dispatch(FetchEvent::PreRequest(PreRequestEvent {
				url: url.clone(),
				method: method.clone(),
				attempt,
				tier,
				timestamp: Utc::now(),
			}));

			let request = TransportRequest {
				method: method.clone(),
				url: url.clone(),
				headers,
				body: options.body.clone(),
				proxy: proxy.clone(),
				timeout: self.timeout,
			};

			let started = Instant::now();
			let (status, reason, outcome) = match self.transport.send(request).await {
				Ok(response) => {
					let text = String::from_utf8_lossy(&response.body);
					let challenge = self.detector.detect_http_body(&text).is_some();
					let status = FetchStatus::classify(response.status, challenge);

					self.events.dispatch(FetchEvent::PostResponse(PostResponseEvent {
						url: response.url.clone(),
						method: method.clone(),
						status: response.status,
						latency: started.elapsed(),
						tier,
						timestamp: Utc::now(),
					}));

					let reason = match status {
						FetchStatus::BlockedForbidden => "403 Forbidden".to_string(),
						FetchStatus::RateLimited => "429 Rate Limited".to_string(),
						FetchStatus::ChallengeDetected => "CAPTCHA detected".to_string(),
						_ => format!("HTTP {}", response.status),
					};
					let outcome = FetchOutcome {
						url: response.url,
						status,
						http_status: Some(response.status),
						body: Some(response.body),
						proxy: proxy.clone(),
						tier,
					};
					(status, reason, Some(outcome))
				}
				Err(err) => (FetchStatus::NetworkError, err.to_string(), None),
			};

			if status == FetchStatus::Ok
				&& let Some(outcome) = outcome
			{
				if let Some(entry) = &proxy {
					self.pool.report_success(entry);
				}
				return Ok(outcome);
			}

			last_status = status;
			if let Some(entry) = &proxy {
				self.report_failure(entry, &reason);
			} else {
				log::warn!("direct request to {url} failed: {reason}");
			}

			if attempt < self.max_attempts {
				let delay = self.backoff.delay_for(attempt, &mut self.rng);
				self.events.dispatch(FetchEvent::Retry(RetryEvent {
					url: url.clone(),
					attempt: attempt + 1,
					reason: status.to_string(),
					scheduled_after: delay,
					timestamp: Utc::now(),
				}));
				if !delay.is_zero() {
					sleep(delay).await;
				}
			}
		}

		Err(FetchError::ExhaustedRetries {
			url: url.clone(),
			attempts: self.max_attempts,
			last_status,
		})
	}

	fn report_failure(&self, entry: &ProxyEntry, reason: &str) {
		self.pool.report_failure(entry, reason);
		self.events.dispatch(FetchEvent::ProxyFailure(ProxyFailureEvent {
			tier: entry.tier,
			proxy: entry.label(),
			reason: reason.to_string(),
			timestamp: Utc::now(),
		}));
	}
}

#[async_trait]
impl PageFetcher for RequestPipeline {
	async fn fetch(&mut self, url: &Url) -> FetchResult<FetchOutcome> {
		self.execute(url, Method::GET, FetchOptions::default()).await
	}

	async fn close(&mut self) {}

	fn strategy(&self) -> FetchStrategy {
		FetchStrategy::Http
	}
}
