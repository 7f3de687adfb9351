//! Typed harvester configuration.
//!
//! Every section carries defaults so an empty (or missing) TOML document is a
//! valid configuration. [`HarvestConfig::validate`] runs once after loading;
//! nothing downstream re-checks these bounds.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Kind of listing searched for on the source site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ListingType {
    #[default]
    Sale,
    Rent,
}

impl ListingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingType::Sale => "sale",
            ListingType::Rent => "rent",
        }
    }

    /// Path segment used by the source site's search URLs.
    pub fn path_segment(&self) -> &'static str {
        match self {
            ListingType::Sale => "vendita",
            ListingType::Rent => "affitto",
        }
    }
}

impl std::str::FromStr for ListingType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "sale" | "vendita" => Ok(ListingType::Sale),
            "rent" | "affitto" => Ok(ListingType::Rent),
            other => Err(format!("unknown listing type `{other}` (expected sale or rent)")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub primary_file: Option<PathBuf>,
    pub backup_file: Option<PathBuf>,
    pub max_consecutive_primary_failures: u32,
    pub proxy_timeout_secs: u64,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            primary_file: None,
            backup_file: None,
            max_consecutive_primary_failures: 5,
            proxy_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub requests_per_second: f64,
    pub delay_mean_secs: f64,
    pub delay_std_dev_secs: f64,
    pub delay_min_secs: f64,
    pub delay_max_secs: f64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests_per_second: 0.5,
            delay_mean_secs: 4.0,
            delay_std_dev_secs: 1.5,
            delay_min_secs: 2.0,
            delay_max_secs: 8.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub multiplier: f64,
    pub min_backoff_secs: f64,
    pub max_backoff_secs: f64,
    pub jitter_secs: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 12,
            multiplier: 1.0,
            min_backoff_secs: 2.0,
            max_backoff_secs: 10.0,
            jitter_secs: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiDetectionSettings {
    pub user_agents: Vec<String>,
    pub accept_languages: Vec<String>,
    pub referers: Vec<String>,
    pub visit_about_page_probability: f64,
    pub skip_listing_probability: f64,
}

impl Default for AntiDetectionSettings {
    fn default() -> Self {
        Self {
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".into(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".into(),
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0".into(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_2) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15".into(),
            ],
            accept_languages: vec![
                "it-IT,it;q=0.9,en-US;q=0.8,en;q=0.7".into(),
                "it-IT,it;q=0.9".into(),
                "it,en-US;q=0.7,en;q=0.3".into(),
            ],
            referers: vec![
                "https://www.google.it/".into(),
                "https://www.google.com/".into(),
                "https://www.bing.com/".into(),
                "https://www.casa.it/".into(),
            ],
            visit_about_page_probability: 0.1,
            skip_listing_probability: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapingSettings {
    pub base_url: String,
    pub listing_type: ListingType,
    pub platform: String,
    pub max_pages_per_target: u32,
    pub early_stop_after_page: u32,
    pub early_stop_probability: f64,
    pub max_card_candidates: usize,
    pub min_class_matches: usize,
}

impl Default for ScrapingSettings {
    fn default() -> Self {
        Self {
            base_url: "https://www.casa.it".into(),
            listing_type: ListingType::Sale,
            platform: "casa_it".into(),
            max_pages_per_target: 10,
            early_stop_after_page: 3,
            early_stop_probability: 0.3,
            max_card_candidates: 200,
            min_class_matches: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    pub navigation_timeout_secs: u64,
    pub auto_resolve_polls: u32,
    pub auto_resolve_interval_ms: u64,
    pub manual_wait_timeout_secs: u64,
    pub manual_poll_interval_ms: u64,
    pub settle_delay_ms: u64,
    pub max_attempts: u32,
    pub cookie_file: Option<PathBuf>,
    pub chrome_executable: Option<PathBuf>,
    pub screenshot_dir: Option<PathBuf>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            navigation_timeout_secs: 30,
            auto_resolve_polls: 10,
            auto_resolve_interval_ms: 1_000,
            manual_wait_timeout_secs: 120,
            manual_poll_interval_ms: 2_000,
            settle_delay_ms: 500,
            max_attempts: 3,
            cookie_file: None,
            chrome_executable: None,
            screenshot_dir: None,
        }
    }
}

impl BrowserSettings {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn auto_resolve_interval(&self) -> Duration {
        Duration::from_millis(self.auto_resolve_interval_ms)
    }

    pub fn manual_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.manual_wait_timeout_secs)
    }

    pub fn manual_poll_interval(&self) -> Duration {
        Duration::from_millis(self.manual_poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointSettings {
    pub path: PathBuf,
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("logs/checkpoints/scrape_checkpoint.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub path: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/listings.redb"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

/// Root configuration populated once at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub proxy: ProxySettings,
    pub rate_limits: RateLimitSettings,
    pub retry: RetrySettings,
    pub anti_detection: AntiDetectionSettings,
    pub scraping: ScrapingSettings,
    pub browser: BrowserSettings,
    pub checkpoint: CheckpointSettings,
    pub store: StoreSettings,
    pub logging: LoggingSettings,
    pub random_seed: Option<u64>,
    /// Directory relative paths are resolved against first.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl HarvestConfig {
    /// Load and validate a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&contents).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(contents: &str) -> ConfigResult<Self> {
        let config: HarvestConfig =
            toml::from_str(contents).map_err(|source| ConfigError::Parse {
                path: PathBuf::from("<inline>"),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let rl = &self.rate_limits;
        let retry = &self.retry;
        for (name, value) in [
            ("rate_limits.requests_per_second", rl.requests_per_second),
            ("rate_limits.delay_mean_secs", rl.delay_mean_secs),
            ("rate_limits.delay_std_dev_secs", rl.delay_std_dev_secs),
            ("rate_limits.delay_min_secs", rl.delay_min_secs),
            ("rate_limits.delay_max_secs", rl.delay_max_secs),
            ("retry.multiplier", retry.multiplier),
            ("retry.min_backoff_secs", retry.min_backoff_secs),
            ("retry.max_backoff_secs", retry.max_backoff_secs),
            ("retry.jitter_secs", retry.jitter_secs),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a finite number, got {value}"
                )));
            }
        }
        if rl.requests_per_second <= 0.0 {
            return Err(ConfigError::Invalid(
                "rate_limits.requests_per_second must be positive".into(),
            ));
        }
        if rl.delay_std_dev_secs < 0.0 {
            return Err(ConfigError::Invalid(
                "rate_limits.delay_std_dev_secs must not be negative".into(),
            ));
        }
        if rl.delay_min_secs < 0.0 || rl.delay_min_secs > rl.delay_max_secs {
            return Err(ConfigError::Invalid(format!(
                "rate_limits delay bounds are inverted ({} > {})",
                rl.delay_min_secs, rl.delay_max_secs
            )));
        }

        if retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if retry.min_backoff_secs < 0.0 || retry.min_backoff_secs > retry.max_backoff_secs {
            return Err(ConfigError::Invalid(format!(
                "retry backoff bounds are inverted ({} > {})",
                retry.min_backoff_secs, retry.max_backoff_secs
            )));
        }
        if retry.multiplier < 0.0 || retry.jitter_secs < 0.0 {
            return Err(ConfigError::Invalid(
                "retry.multiplier and retry.jitter_secs must not be negative".into(),
            ));
        }

        if self.proxy.max_consecutive_primary_failures == 0 {
            return Err(ConfigError::Invalid(
                "proxy.max_consecutive_primary_failures must be at least 1".into(),
            ));
        }

        for (name, value) in [
            (
                "anti_detection.visit_about_page_probability",
                self.anti_detection.visit_about_page_probability,
            ),
            (
                "anti_detection.skip_listing_probability",
                self.anti_detection.skip_listing_probability,
            ),
            (
                "scraping.early_stop_probability",
                self.scraping.early_stop_probability,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }

        if self.anti_detection.user_agents.is_empty() {
            return Err(ConfigError::Invalid(
                "anti_detection.user_agents must not be empty".into(),
            ));
        }
        if self.browser.max_attempts == 0 {
            return Err(ConfigError::Invalid("browser.max_attempts must be at least 1".into()));
        }
        if self.scraping.max_card_candidates == 0 {
            return Err(ConfigError::Invalid(
                "scraping.max_card_candidates must be at least 1".into(),
            ));
        }
        url::Url::parse(&self.scraping.base_url)
            .map_err(|err| ConfigError::Invalid(format!("scraping.base_url: {err}")))?;

        Ok(())
    }

    /// Resolve a configured path: absolute as-is, then relative to the config
    /// file directory when that file exists, else relative to the working
    /// directory.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        if let Some(base) = &self.base_dir {
            let candidate = base.join(path);
            if candidate.exists() {
                return candidate;
            }
        }
        path.to_path_buf()
    }

    pub fn proxy_timeout(&self) -> Duration {
        Duration::from_secs(self.proxy.proxy_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = HarvestConfig::from_toml_str("").unwrap();
        assert_eq!(config.retry.max_attempts, 12);
        assert_eq!(config.proxy.max_consecutive_primary_failures, 5);
        assert_eq!(config.scraping.listing_type, ListingType::Sale);
        assert_eq!(
            config.checkpoint.path,
            PathBuf::from("logs/checkpoints/scrape_checkpoint.json")
        );
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config = HarvestConfig::from_toml_str(
            r#"
            random_seed = 7

            [scraping]
            listing_type = "rent"
            max_pages_per_target = 4

            [rate_limits]
            requests_per_second = 2.0
            "#,
        )
        .unwrap();
        assert_eq!(config.random_seed, Some(7));
        assert_eq!(config.scraping.listing_type.path_segment(), "affitto");
        assert_eq!(config.scraping.max_pages_per_target, 4);
        assert_eq!(config.scraping.early_stop_after_page, 3);
        assert_eq!(config.rate_limits.requests_per_second, 2.0);
        assert_eq!(config.rate_limits.delay_max_secs, 8.0);
    }

    #[test]
    fn rejects_inverted_delay_bounds() {
        let err = HarvestConfig::from_toml_str(
            r#"
            [rate_limits]
            delay_min_secs = 9.0
            delay_max_secs = 3.0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_non_finite_delays() {
        let err = HarvestConfig::from_toml_str("[retry]\nmax_backoff_secs = inf\n").unwrap_err();
        assert!(err.to_string().contains("retry.max_backoff_secs"));

        let err = HarvestConfig::from_toml_str("[rate_limits]\ndelay_mean_secs = nan\n").unwrap_err();
        assert!(err.to_string().contains("rate_limits.delay_mean_secs"));

        let err = HarvestConfig::from_toml_str("[retry]\njitter_secs = -inf\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_out_of_range_probability() {
        let err = HarvestConfig::from_toml_str(
            r#"
            [anti_detection]
            skip_listing_probability = 1.5
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("skip_listing_probability"));
    }

    #[test]
    fn load_records_base_dir_for_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("primary.txt"), "u:p:host:1000\n").unwrap();
        let path = dir.path().join("harvest.toml");
        std::fs::write(&path, "[proxy]\nprimary_file = \"primary.txt\"\n").unwrap();

        let config = HarvestConfig::load(&path).unwrap();
        let resolved = config.resolve_path(config.proxy.primary_file.as_deref().unwrap());
        assert_eq!(resolved, dir.path().join("primary.txt"));
    }

    #[test]
    fn listing_type_accepts_english_and_italian_names() {
        assert_eq!("RENT".parse::<ListingType>().unwrap(), ListingType::Rent);
        assert_eq!("vendita".parse::<ListingType>().unwrap(), ListingType::Sale);
        assert!("auction".parse::<ListingType>().is_err());
    }
}
