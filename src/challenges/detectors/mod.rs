//! Challenge detection module.
//!
//! Pattern-based identification of bot-mitigation interstitials, both for raw
//! HTTP bodies and for rendered browser pages (content plus title).

use once_cell::sync::Lazy;
use regex::Regex;

/// High level challenge categories recognised by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengeKind {
    /// Interactive CAPTCHA widget (Turnstile, hCaptcha, reCAPTCHA…).
    CaptchaWidget,
    /// Script interstitial that usually clears itself after a few seconds.
    ScriptInterstitial,
    /// Explicit "prove you are human" wall.
    HumanVerification,
    AccessDenied,
}

/// Where a marker was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    Body,
    Title,
}

#[derive(Debug, Clone)]
struct ChallengePattern {
    id: &'static str,
    kind: ChallengeKind,
    regex: Regex,
}

impl ChallengePattern {
    fn new(id: &'static str, kind: ChallengeKind, raw: &str) -> Self {
        Self {
            id,
            kind,
            regex: build_regex(raw),
        }
    }
}

/// Markers found in the HTML of a rendered challenge page.
static CONTENT_PATTERNS: Lazy<Vec<ChallengePattern>> = Lazy::new(|| {
    use ChallengeKind::*;
    vec![
        ChallengePattern::new("cf_turnstile", CaptchaWidget, r"cf-turnstile"),
        ChallengePattern::new("hcaptcha", CaptchaWidget, r"h-captcha"),
        ChallengePattern::new("recaptcha", CaptchaWidget, r"g-recaptcha"),
        ChallengePattern::new("captcha_container", CaptchaWidget, r"captcha-container"),
        ChallengePattern::new("challenge_running", ScriptInterstitial, r"challenge-running"),
        ChallengePattern::new("challenge_form", ScriptInterstitial, r"challenge-form"),
        ChallengePattern::new("verify_human_en", HumanVerification, r"verify you are human"),
        ChallengePattern::new("verify_human_it", HumanVerification, r"verifica che sei un umano"),
        ChallengePattern::new("security_check_it", HumanVerification, r"controllo di sicurezza"),
        ChallengePattern::new("access_denied_it", AccessDenied, r"accesso negato"),
        ChallengePattern::new("just_a_moment", ScriptInterstitial, r"just a moment"),
        ChallengePattern::new("checking_browser", ScriptInterstitial, r"checking your browser"),
        ChallengePattern::new("please_wait", ScriptInterstitial, r"please wait"),
        ChallengePattern::new("ddos_protection", ScriptInterstitial, r"ddos protection"),
    ]
});

static TITLE_PATTERNS: Lazy<Vec<ChallengePattern>> = Lazy::new(|| {
    vec![
        ChallengePattern::new("title_just_a_moment", ChallengeKind::ScriptInterstitial, r"just a moment"),
        ChallengePattern::new("title_attention_required", ChallengeKind::HumanVerification, r"attention required"),
        ChallengePattern::new("title_cloudflare", ChallengeKind::ScriptInterstitial, r"cloudflare"),
    ]
});

/// Plain-HTTP bodies only need the generic keyword.
static CAPTCHA_KEYWORD: Lazy<ChallengePattern> =
    Lazy::new(|| ChallengePattern::new("captcha_keyword", ChallengeKind::CaptchaWidget, r"captcha"));

/// Detection output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeDetection {
    pub pattern_id: &'static str,
    pub kind: ChallengeKind,
    pub source: MatchSource,
    pub matched_indicators: Vec<&'static str>,
}

/// Stateless matcher over the known challenge signatures.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChallengeDetector;

impl ChallengeDetector {
    pub fn new() -> Self {
        Self
    }

    /// Check a raw HTTP body for the CAPTCHA keyword.
    pub fn detect_http_body(&self, body: &str) -> Option<ChallengeDetection> {
        CAPTCHA_KEYWORD
            .regex
            .is_match(body)
            .then(|| ChallengeDetection {
                pattern_id: CAPTCHA_KEYWORD.id,
                kind: CAPTCHA_KEYWORD.kind,
                source: MatchSource::Body,
                matched_indicators: vec![CAPTCHA_KEYWORD.id],
            })
    }

    /// Check a rendered page's content and title against every known marker.
    pub fn detect_page(&self, content: &str, title: Option<&str>) -> Option<ChallengeDetection> {
        let matched: Vec<&ChallengePattern> = CONTENT_PATTERNS
            .iter()
            .filter(|pattern| pattern.regex.is_match(content))
            .collect();

        if let Some(first) = matched.first() {
            return Some(ChallengeDetection {
                pattern_id: first.id,
                kind: strongest_kind(&matched),
                source: MatchSource::Body,
                matched_indicators: matched.iter().map(|pattern| pattern.id).collect(),
            });
        }

        let title = title?;
        TITLE_PATTERNS
            .iter()
            .find(|pattern| pattern.regex.is_match(title))
            .map(|pattern| ChallengeDetection {
                pattern_id: pattern.id,
                kind: pattern.kind,
                source: MatchSource::Title,
                matched_indicators: vec![pattern.id],
            })
    }
}

/// Interactive walls outrank interstitials that may clear on their own.
fn strongest_kind(matched: &[&ChallengePattern]) -> ChallengeKind {
    let rank = |kind: ChallengeKind| match kind {
        ChallengeKind::AccessDenied => 3,
        ChallengeKind::CaptchaWidget => 2,
        ChallengeKind::HumanVerification => 1,
        ChallengeKind::ScriptInterstitial => 0,
    };
    matched
        .iter()
        .map(|pattern| pattern.kind)
        .max_by_key(|kind| rank(*kind))
        .unwrap_or(ChallengeKind::ScriptInterstitial)
}

fn build_regex(pattern: &str) -> Regex {
    regex::RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .unwrap_or_else(|err| panic!("invalid challenge detection regex `{}`: {}", pattern, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_body_keyword_is_case_insensitive() {
        let detector = ChallengeDetector::new();
        assert!(detector.detect_http_body("<div>Please solve the CAPTCHA</div>").is_some());
        assert!(detector.detect_http_body("<div>Appartamento in vendita</div>").is_none());
    }

    #[test]
    fn detects_turnstile_widget() {
        let html = r#"
			<html><head><title>casa.it</title></head>
			<body>
				<div class="cf-turnstile" data-sitekey="0x4AAAAAAA"></div>
				<p>Checking your browser before accessing</p>
			</body>
			</html>
		"#;
        let detection = ChallengeDetector::new()
            .detect_page(html, Some("casa.it"))
            .expect("should detect");
        assert_eq!(detection.kind, ChallengeKind::CaptchaWidget);
        assert_eq!(detection.source, MatchSource::Body);
        assert!(detection.matched_indicators.contains(&"checking_browser"));
    }

    #[test]
    fn detects_italian_security_check() {
        let detection = ChallengeDetector::new()
            .detect_page("<h1>Controllo di sicurezza in corso</h1>", None)
            .expect("should detect");
        assert_eq!(detection.kind, ChallengeKind::HumanVerification);
    }

    #[test]
    fn falls_back_to_title_markers() {
        let detection = ChallengeDetector::new()
            .detect_page("<html><body></body></html>", Some("Attention Required! | Cloudflare"))
            .expect("should detect");
        assert_eq!(detection.source, MatchSource::Title);
    }

    #[test]
    fn ordinary_listing_page_is_clean() {
        let html = "<html><body><article><h2>Trilocale in vendita</h2></article></body></html>";
        assert!(
            ChallengeDetector::new()
                .detect_page(html, Some("Case in vendita a Roma"))
                .is_none()
        );
    }
}
