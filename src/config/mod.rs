//! Settings and configuration module
//!
//! Provides unified configuration with:
//! - Typed sections with defaults for every field
//! - TOML loading
//! - Validation performed once at startup

pub mod settings;

pub use settings::{
    AntiDetectionSettings, BrowserSettings, CheckpointSettings, ConfigError, ConfigResult,
    HarvestConfig, ListingType, LoggingSettings, ProxySettings, RateLimitSettings,
    RetrySettings, ScrapingSettings, StoreSettings,
};
