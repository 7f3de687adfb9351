//! Request identity synthesis.
//!
//! Builds a plausible browser identity per attempt (user agent, locale,
//! referer) and derives the secondary headers that a real browser with that
//! user agent would send, so the header set stays internally consistent.

use http::header::{
    ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, CONNECTION, REFERER, UPGRADE_INSECURE_REQUESTS,
    USER_AGENT,
};
use http::{HeaderMap, HeaderName, HeaderValue};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::config::AntiDetectionSettings;

const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const CHROME_SEC_CH_UA: &str = r#""Not_A Brand";v="8", "Chromium";v="120", "Google Chrome";v="120""#;

/// Browser family inferred from a user-agent string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrowserType {
    Chrome,
    Edge,
    Firefox,
    Safari,
    Other,
}

impl BrowserType {
    pub fn from_user_agent(user_agent: &str) -> Self {
        if user_agent.contains("Edg/") {
            BrowserType::Edge
        } else if user_agent.contains("Chrome") {
            BrowserType::Chrome
        } else if user_agent.contains("Firefox") {
            BrowserType::Firefox
        } else if user_agent.contains("Safari") {
            BrowserType::Safari
        } else {
            BrowserType::Other
        }
    }

    /// Chromium-based browsers advertise client hints.
    pub fn sends_client_hints(&self) -> bool {
        matches!(self, BrowserType::Chrome | BrowserType::Edge)
    }
}

/// One synthesized client identity.
#[derive(Debug, Clone)]
pub struct RequestIdentity {
    pub user_agent: String,
    pub accept_language: String,
    pub referer: Option<String>,
    pub browser: BrowserType,
}

impl RequestIdentity {
    fn platform_hint(&self) -> &'static str {
        if self.user_agent.contains("Windows") {
            "\"Windows\""
        } else {
            "\"macOS\""
        }
    }

    /// Full header set for this identity.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        insert_header(&mut headers, USER_AGENT, &self.user_agent);
        insert_header(&mut headers, ACCEPT, DEFAULT_ACCEPT);
        insert_header(&mut headers, ACCEPT_LANGUAGE, &self.accept_language);
        insert_header(&mut headers, ACCEPT_ENCODING, "gzip, deflate, br");
        insert_header(&mut headers, CONNECTION, "keep-alive");
        insert_header(&mut headers, UPGRADE_INSECURE_REQUESTS, "1");
        if let Some(referer) = &self.referer {
            insert_header(&mut headers, REFERER, referer);
        }

        if self.browser.sends_client_hints() {
            insert_header(&mut headers, HeaderName::from_static("sec-ch-ua"), CHROME_SEC_CH_UA);
            insert_header(&mut headers, HeaderName::from_static("sec-ch-ua-mobile"), "?0");
            insert_header(
                &mut headers,
                HeaderName::from_static("sec-ch-ua-platform"),
                self.platform_hint(),
            );
        }

        headers
    }
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(err) => log::warn!("dropping header {name}: {err}"),
    }
}

/// Draws identities from the configured pools.
#[derive(Debug, Clone)]
pub struct IdentityGenerator {
    user_agents: Vec<String>,
    accept_languages: Vec<String>,
    referers: Vec<String>,
}

impl IdentityGenerator {
    pub fn new(settings: &AntiDetectionSettings) -> Self {
        Self {
            user_agents: settings.user_agents.clone(),
            accept_languages: settings.accept_languages.clone(),
            referers: settings.referers.clone(),
        }
    }

    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> RequestIdentity {
        let user_agent = self
            .user_agents
            .choose(rng)
            .cloned()
            .unwrap_or_else(|| AntiDetectionSettings::default().user_agents[0].clone());
        let accept_language = self
            .accept_languages
            .choose(rng)
            .cloned()
            .unwrap_or_else(|| BrowserContextProfile::ITALIAN.accept_language.to_string());
        let referer = self.referers.choose(rng).cloned();
        let browser = BrowserType::from_user_agent(&user_agent);

        RequestIdentity {
            user_agent,
            accept_language,
            referer,
            browser,
        }
    }
}

impl Default for IdentityGenerator {
    fn default() -> Self {
        Self::new(&AntiDetectionSettings::default())
    }
}

/// Locale settings applied to every browser context.
#[derive(Debug, Clone, Copy)]
pub struct BrowserContextProfile {
    pub locale: &'static str,
    pub timezone: &'static str,
    pub accept_language: &'static str,
    pub viewport: (u32, u32),
}

impl BrowserContextProfile {
    pub const ITALIAN: BrowserContextProfile = BrowserContextProfile {
        locale: "it-IT",
        timezone: "Europe/Rome",
        accept_language: "it-IT,it;q=0.9,en-US;q=0.8,en;q=0.7",
        viewport: (1920, 1080),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn settings(user_agents: &[&str]) -> AntiDetectionSettings {
        AntiDetectionSettings {
            user_agents: user_agents.iter().map(|ua| ua.to_string()).collect(),
            referers: vec!["https://www.google.it/".into()],
            ..Default::default()
        }
    }

    #[test]
    fn chrome_identity_carries_client_hints() {
        let generator = IdentityGenerator::new(&settings(&[
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        ]));
        let identity = generator.generate(&mut StdRng::seed_from_u64(1));
        let headers = identity.headers();

        assert_eq!(identity.browser, BrowserType::Chrome);
        assert_eq!(headers["sec-ch-ua-platform"], "\"Windows\"");
        assert_eq!(headers["sec-ch-ua-mobile"], "?0");
        assert_eq!(headers[ACCEPT_ENCODING], "gzip, deflate, br");
        assert_eq!(headers[REFERER], "https://www.google.it/");
    }

    #[test]
    fn firefox_identity_omits_client_hints() {
        let generator = IdentityGenerator::new(&settings(&[
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
        ]));
        let headers = generator.generate(&mut StdRng::seed_from_u64(2)).headers();
        assert!(headers.get("sec-ch-ua").is_none());
        assert_eq!(headers[CONNECTION], "keep-alive");
    }

    #[test]
    fn mac_chrome_reports_macos_platform() {
        let generator = IdentityGenerator::new(&settings(&[
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        ]));
        let headers = generator.generate(&mut StdRng::seed_from_u64(3)).headers();
        assert_eq!(headers["sec-ch-ua-platform"], "\"macOS\"");
    }
}
