//! Fetch event system.
//!
//! Provides hooks for logging and custom reactions around request pipeline
//! and browser activity.

use chrono::{DateTime, Utc};
use http::Method;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::modules::proxy::ProxyTier;

/// Structured pre-request event.
#[derive(Debug, Clone)]
pub struct PreRequestEvent {
    pub url: Url,
    pub method: Method,
    pub attempt: u32,
    pub tier: Option<ProxyTier>,
    pub timestamp: DateTime<Utc>,
}

/// Structured post-response event.
#[derive(Debug, Clone)]
pub struct PostResponseEvent {
    pub url: Url,
    pub method: Method,
    pub status: u16,
    pub latency: Duration,
    pub tier: Option<ProxyTier>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ChallengeEvent {
    pub url: Url,
    pub stage: String,
    pub resolved: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ProxyFailureEvent {
    pub tier: ProxyTier,
    pub proxy: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RetryEvent {
    pub url: Url,
    pub attempt: u32,
    pub reason: String,
    pub scheduled_after: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum FetchEvent {
    PreRequest(PreRequestEvent),
    PostResponse(PostResponseEvent),
    Challenge(ChallengeEvent),
    ProxyFailure(ProxyFailureEvent),
    Retry(RetryEvent),
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &FetchEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default, Clone)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Dispatcher with the [`LoggingHandler`] pre-registered.
    pub fn with_logging() -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register_handler(Arc::new(LoggingHandler));
        dispatcher
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: FetchEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

fn tier_label(tier: Option<ProxyTier>) -> String {
    tier.map(|t| t.to_string()).unwrap_or_else(|| "direct".into())
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &FetchEvent) {
        match event {
            FetchEvent::PreRequest(pre) => {
                log::debug!(
                    "-> [{}] {} {} (attempt {})",
                    tier_label(pre.tier),
                    pre.method,
                    pre.url,
                    pre.attempt
                );
            }
            FetchEvent::PostResponse(post) => {
                log::info!(
                    "[{}] {} {} - {} ({:.2}s)",
                    tier_label(post.tier),
                    post.method,
                    post.url,
                    post.status,
                    post.latency.as_secs_f64()
                );
            }
            FetchEvent::Challenge(challenge) => {
                log::info!(
                    "challenge on {} at stage {} resolved={}",
                    challenge.url,
                    challenge.stage,
                    challenge.resolved
                );
            }
            FetchEvent::ProxyFailure(failure) => {
                log::warn!(
                    "{} proxy {} failed: {}",
                    failure.tier,
                    failure.proxy,
                    failure.reason
                );
            }
            FetchEvent::Retry(retry) => {
                log::info!(
                    "retry {} attempt {} after {:.2}s ({})",
                    retry.url,
                    retry.attempt,
                    retry.scheduled_after.as_secs_f64(),
                    retry.reason
                );
            }
        }
    }
}
