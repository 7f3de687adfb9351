//! Cross-cutting services module
//!
//! Egress identity and pacing concerns shared by both fetch strategies:
//! the tiered proxy pool, request identity synthesis, pacing primitives and
//! the fetch event system.

pub mod events;
pub mod pacing;
pub mod proxy;
pub mod spoofing;

// Re-export commonly used types
pub use events::{
    ChallengeEvent, EventDispatcher, EventHandler, FetchEvent, LoggingHandler, PostResponseEvent,
    PreRequestEvent, ProxyFailureEvent, RetryEvent,
};
pub use pacing::{HumanDelay, RateLimiter, RetryBackoff};
pub use proxy::{
    ProxyEntry, ProxyError, ProxyHealthReport, ProxyResult, ProxyTier, TieredProxyPool,
    load_proxy_file, parse_proxy_list,
};
pub use spoofing::{BrowserContextProfile, BrowserType, IdentityGenerator, RequestIdentity};
