//! Headless-browser fetch strategy.
//!
//! Each acquired proxy gets its own browser session (browser proxies are fixed
//! at launch), so rotating the proxy means tearing the session down and
//! launching a new one. Every navigation walks a small state machine:
//!
//! ```text
//! idle -> navigating -> loaded | blocked | challenge
//! challenge -> auto-resolving -> loaded
//!           -> manual-wait -> loaded | timed-out
//! ```
//!
//! The engine itself sits behind [`BrowserLauncher`] / [`BrowserSession`];
//! the Chrome DevTools implementation lives in [`chromium`].

pub mod behavior;
#[cfg(feature = "browser")]
pub mod chromium;
pub mod cookies;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use thiserror::Error;
use tokio::time::{Instant, sleep};
use url::Url;

use crate::challenges::detectors::ChallengeDetector;
use crate::config::BrowserSettings;
use crate::fetch::{FetchError, FetchOutcome, FetchResult, FetchStatus, FetchStrategy, PageFetcher};
use crate::modules::events::{ChallengeEvent, EventDispatcher, FetchEvent, ProxyFailureEvent};
use crate::modules::pacing::RateLimiter;
use crate::modules::proxy::{ProxyEntry, TieredProxyPool};
use crate::modules::spoofing::{BrowserContextProfile, IdentityGenerator};

pub use behavior::{BehaviorSimulator, HumanAction};
pub use cookies::{StoredCookie, load_cookies, save_cookies};

pub type BrowserResult<T> = Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("navigation to {url} timed out after {timeout:?}")]
    NavigationTimeout { url: String, timeout: Duration },
    #[error("devtools protocol error: {0}")]
    Protocol(String),
    #[error("cookie persistence failed: {0}")]
    Cookies(String),
    #[error("browser support not compiled in; rebuild with --features browser")]
    Unsupported,
}

/// Hardening flags passed to every launched browser.
pub const LAUNCH_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-dev-shm-usage",
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-infobars",
    "--window-size=1920,1080",
    "--start-maximized",
];

/// Launch-time parameters for one browser session.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    pub user_agent: String,
    pub profile: BrowserContextProfile,
    pub args: Vec<String>,
    pub chrome_executable: Option<PathBuf>,
}

/// One live browser context bound to (at most) one proxy.
#[async_trait]
pub trait BrowserSession: Send {
    /// Navigate and return the main document's HTTP status when known.
    async fn navigate(&mut self, url: &Url, timeout: Duration) -> BrowserResult<Option<u16>>;

    async fn content(&mut self) -> BrowserResult<String>;

    async fn title(&mut self) -> BrowserResult<Option<String>>;

    async fn scroll_by(&mut self, delta_y: i32) -> BrowserResult<()>;

    async fn move_pointer(&mut self, x: f64, y: f64) -> BrowserResult<()>;

    async fn cookies(&mut self) -> BrowserResult<Vec<StoredCookie>>;

    async fn set_cookies(&mut self, cookies: &[StoredCookie]) -> BrowserResult<()>;

    async fn screenshot(&mut self, path: &Path) -> BrowserResult<()>;

    /// Release the page, context and engine process.
    async fn close(&mut self) -> BrowserResult<()>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(
        &self,
        proxy: Option<&ProxyEntry>,
        options: &LaunchOptions,
    ) -> BrowserResult<Box<dyn BrowserSession>>;
}

/// Navigation states of a single page load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationState {
    Idle,
    Navigating,
    Loaded,
    Blocked,
    Challenge,
    AutoResolving,
    ManualWait,
    TimedOut,
}

struct ActiveSession {
    session: Box<dyn BrowserSession>,
    proxy: Option<ProxyEntry>,
}

enum Resolution {
    Cleared(String),
    TimedOut(Duration),
}

/// Browser-based [`PageFetcher`].
pub struct BrowserFetcher {
    launcher: Arc<dyn BrowserLauncher>,
    pool: Arc<TieredProxyPool>,
    limiter: Arc<RateLimiter>,
    identities: IdentityGenerator,
    detector: ChallengeDetector,
    behavior: BehaviorSimulator,
    settings: BrowserSettings,
    events: Arc<EventDispatcher>,
    rng: StdRng,
    active: Option<ActiveSession>,
    transitions: Vec<NavigationState>,
}

impl BrowserFetcher {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        pool: Arc<TieredProxyPool>,
        limiter: Arc<RateLimiter>,
        settings: BrowserSettings,
    ) -> Self {
        Self {
            launcher,
            pool,
            limiter,
            identities: IdentityGenerator::default(),
            detector: ChallengeDetector::new(),
            behavior: BehaviorSimulator::default(),
            settings,
            events: Arc::new(EventDispatcher::with_logging()),
            rng: StdRng::from_entropy(),
            active: None,
            transitions: vec![NavigationState::Idle],
        }
    }

    pub fn with_identities(mut self, identities: IdentityGenerator) -> Self {
        self.identities = identities;
        self
    }

    pub fn with_behavior(mut self, behavior: BehaviorSimulator) -> Self {
        self.behavior = behavior;
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

    pub fn state(&self) -> NavigationState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(NavigationState::Idle)
    }

    /// States visited by the most recent `fetch`, starting at `Idle`.
    pub fn transitions(&self) -> &[NavigationState] {
        &self.transitions
    }

    pub fn has_session(&self) -> bool {
        self.active.is_some()
    }

    fn enter(&mut self, state: NavigationState) {
        log::debug!("browser navigation state -> {state:?}");
        self.transitions.push(state);
    }

    fn launch_options(&mut self) -> LaunchOptions {
        let identity = self.identities.generate(&mut self.rng);
        LaunchOptions {
            headless: self.settings.headless,
            user_agent: identity.user_agent,
            profile: BrowserContextProfile::ITALIAN,
            args: LAUNCH_ARGS.iter().map(|arg| arg.to_string()).collect(),
            chrome_executable: self.settings.chrome_executable.clone(),
        }
    }

    async fn ensure_session(&mut self) -> FetchResult<()> {
        if self.active.is_some() {
            return Ok(());
        }

        let lease = self.pool.acquire();
        if lease.is_none() && !self.pool.is_empty() {
            return Err(FetchError::NoProxyAvailable);
        }
        let proxy = lease.map(|(entry, _)| entry);
        let options = self.launch_options();

        log::info!(
            "launching browser (headless={}) via {}",
            options.headless,
            proxy.as_ref().map(ProxyEntry::label).unwrap_or_else(|| "direct".into())
        );
        let mut session = match self.launcher.launch(proxy.as_ref(), &options).await {
            Ok(session) => session,
            Err(err) => {
                if let Some(proxy) = &proxy {
                    self.report_proxy_failure(proxy, &format!("launch failed: {err}"));
                }
                return Err(err.into());
            }
        };

        if let Some(path) = &self.settings.cookie_file {
            match load_cookies(path) {
                Ok(cookies) if !cookies.is_empty() => {
                    if let Err(err) = session.set_cookies(&cookies).await {
                        log::warn!("failed to restore cookies: {err}");
                    } else {
                        log::info!("restored {} cookies from {}", cookies.len(), path.display());
                    }
                }
                Ok(_) => {}
                Err(err) => log::warn!("failed to read cookies: {err}"),
            }
        }

        self.active = Some(ActiveSession { session, proxy });
        Ok(())
    }

    /// Close the current session and forget its proxy.
    async fn teardown(&mut self) {
        if let Some(mut active) = self.active.take()
            && let Err(err) = active.session.close().await
        {
            log::warn!("error while closing browser session: {err}");
        }
    }

    fn report_failure(&self, reason: &str) {
        let Some(proxy) = self.active.as_ref().and_then(|active| active.proxy.as_ref()) else {
            log::warn!("direct browser navigation failed: {reason}");
            return;
        };
        self.report_proxy_failure(proxy, reason);
    }

    fn report_proxy_failure(&self, proxy: &ProxyEntry, reason: &str) {
        self.pool.report_failure(proxy, reason);
        self.events.dispatch(FetchEvent::ProxyFailure(ProxyFailureEvent {
            tier: proxy.tier,
            proxy: proxy.label(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        }));
    }

    fn challenge_event(&self, url: &Url, stage: &str, resolved: bool) {
        self.events.dispatch(FetchEvent::Challenge(ChallengeEvent {
            url: url.clone(),
            stage: stage.to_string(),
            resolved,
            timestamp: Utc::now(),
        }));
    }

    async fn page_has_challenge(session: &mut dyn BrowserSession, detector: &ChallengeDetector) -> BrowserResult<(bool, String)> {
        let content = session.content().await?;
        let title = session.title().await?;
        let challenged = detector.detect_page(&content, title.as_deref()).is_some();
        Ok((challenged, content))
    }

    /// Auto-resolve polling, then the longer manual wait.
    async fn resolve_challenge(&mut self, url: &Url) -> FetchResult<Resolution> {
        let detector = self.detector;
        let polls = self.settings.auto_resolve_polls;
        let interval = self.settings.auto_resolve_interval();
        let manual_timeout = self.settings.manual_wait_timeout();
        let manual_interval = self.settings.manual_poll_interval();

        self.enter(NavigationState::AutoResolving);
        log::info!("challenge detected on {url}, waiting for auto-resolution");
        for _ in 0..polls {
            sleep(interval).await;
            let Some(active) = self.active.as_mut() else {
                break;
            };
            let (challenged, content) =
                Self::page_has_challenge(active.session.as_mut(), &detector).await?;
            if !challenged {
                self.challenge_event(url, "auto-resolve", true);
                return Ok(Resolution::Cleared(content));
            }
        }

        self.enter(NavigationState::ManualWait);
        log::warn!(
            "challenge on {url} did not clear by itself, waiting up to {}s for manual resolution",
            manual_timeout.as_secs()
        );
        let started = Instant::now();
        while started.elapsed() < manual_timeout {
            sleep(manual_interval.min(manual_timeout)).await;
            let Some(active) = self.active.as_mut() else {
                break;
            };
            let (challenged, content) =
                Self::page_has_challenge(active.session.as_mut(), &detector).await?;
            if !challenged {
                self.challenge_event(url, "manual-wait", true);
                return Ok(Resolution::Cleared(content));
            }
        }

        self.challenge_event(url, "manual-wait", false);
        Ok(Resolution::TimedOut(started.elapsed()))
    }

    async fn save_screenshot(&mut self, url: &Url) {
        let Some(dir) = self.settings.screenshot_dir.clone() else {
            return;
        };
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let name = format!("challenge_{}.png", Utc::now().format("%Y%m%d_%H%M%S"));
        let path = dir.join(name);
        if let Err(err) = std::fs::create_dir_all(&dir) {
            log::warn!("cannot create screenshot dir {}: {err}", dir.display());
            return;
        }
        match active.session.screenshot(&path).await {
            Ok(()) => log::info!("saved challenge screenshot for {url} to {}", path.display()),
            Err(err) => log::warn!("screenshot failed: {err}"),
        }
    }

    async fn persist_cookies(&mut self) {
        let Some(path) = self.settings.cookie_file.clone() else {
            return;
        };
        let Some(active) = self.active.as_mut() else {
            return;
        };
        match active.session.cookies().await {
            Ok(cookies) => {
                if let Err(err) = save_cookies(&path, &cookies) {
                    log::warn!("{err}");
                }
            }
            Err(err) => log::warn!("failed to read browser cookies: {err}"),
        }
    }

    async fn finish_loaded(&mut self, url: &Url, http_status: Option<u16>, content: String) -> FetchOutcome {
        self.enter(NavigationState::Loaded);

        let settle = self.settings.settle_delay();
        if !settle.is_zero() {
            sleep(settle).await;
        }

        let actions = self.behavior.plan(&mut self.rng);
        if let Some(active) = self.active.as_mut() {
            self.behavior.perform(active.session.as_mut(), &actions).await;
        }

        let proxy = self.active.as_ref().and_then(|active| active.proxy.clone());
        if let Some(entry) = &proxy {
            self.pool.report_success(entry);
        }
        self.persist_cookies().await;

        FetchOutcome {
            url: url.clone(),
            status: FetchStatus::Ok,
            http_status,
            body: Some(Bytes::from(content)),
            tier: proxy.as_ref().map(|entry| entry.tier),
            proxy,
        }
    }

    async fn navigate_once(&mut self, url: &Url) -> FetchResult<Option<FetchOutcome>> {
        self.ensure_session().await?;
        self.enter(NavigationState::Navigating);

        let timeout = self.settings.navigation_timeout();
        let detector = self.detector;
        let Some(active) = self.active.as_mut() else {
            return Ok(None);
        };

        let navigation = active.session.navigate(url, timeout).await;
        let http_status = match navigation {
            Ok(status) => status,
            Err(err) => {
                self.enter(NavigationState::Blocked);
                self.report_failure(&err.to_string());
                self.teardown().await;
                return Ok(None);
            }
        };

        if let Some(code @ (403 | 429)) = http_status {
            self.enter(NavigationState::Blocked);
            let status = FetchStatus::classify(code, false);
            self.report_failure(&format!("{status} ({code})"));
            self.teardown().await;
            return Ok(None);
        }

        let (challenged, content) = Self::page_has_challenge(active.session.as_mut(), &detector).await?;
        if !challenged {
            return Ok(Some(self.finish_loaded(url, http_status, content).await));
        }

        self.enter(NavigationState::Challenge);
        self.challenge_event(url, "detected", false);
        match self.resolve_challenge(url).await? {
            Resolution::Cleared(content) => Ok(Some(self.finish_loaded(url, http_status, content).await)),
            Resolution::TimedOut(waited) => {
                self.enter(NavigationState::TimedOut);
                self.save_screenshot(url).await;
                self.report_failure("challenge not resolved before timeout");
                self.teardown().await;
                Err(FetchError::ChallengeTimeout {
                    url: url.clone(),
                    waited,
                })
            }
        }
    }
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    async fn fetch(&mut self, url: &Url) -> FetchResult<FetchOutcome> {
        self.transitions = vec![NavigationState::Idle];
        let attempts = self.settings.max_attempts.max(1);

        for attempt in 1..=attempts {
            self.limiter.acquire().await;
            match self.navigate_once(url).await {
                Ok(Some(outcome)) => return Ok(outcome),
                Ok(None) => {
                    log::info!("browser attempt {attempt}/{attempts} for {url} blocked, rotating proxy");
                }
                Err(FetchError::Browser(err)) => {
                    log::warn!("browser attempt {attempt}/{attempts} for {url} failed: {err}");
                    self.report_failure(&err.to_string());
                    self.teardown().await;
                }
                Err(err) => return Err(err),
            }
        }

        Err(FetchError::ExhaustedRetries {
            url: url.clone(),
            attempts,
            last_status: FetchStatus::BlockedForbidden,
        })
    }

    async fn close(&mut self) {
        self.teardown().await;
        self.enter(NavigationState::Idle);
    }

    fn strategy(&self) -> FetchStrategy {
        FetchStrategy::Browser
    }
}

/// Launcher used when the crate is built without the `browser` feature.
#[derive(Debug, Default)]
pub struct UnavailableLauncher;

#[async_trait]
impl BrowserLauncher for UnavailableLauncher {
    async fn launch(
        &self,
        _proxy: Option<&ProxyEntry>,
        _options: &LaunchOptions,
    ) -> BrowserResult<Box<dyn BrowserSession>> {
        Err(BrowserError::Unsupported)
    }
}

/// Default launcher for this build.
pub fn default_launcher() -> Arc<dyn BrowserLauncher> {
    #[cfg(feature = "browser")]
    {
        Arc::new(chromium::ChromiumLauncher::new())
    }
    #[cfg(not(feature = "browser"))]
    {
        Arc::new(UnavailableLauncher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::proxy::ProxyTier;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted page: each navigation pops a status, each content read pops a body.
    #[derive(Default)]
    struct Script {
        statuses: Vec<Option<u16>>,
        contents: Vec<String>,
    }

    struct StubSession {
        script: Arc<Mutex<Script>>,
        closed: Arc<AtomicUsize>,
        last_content: String,
    }

    #[async_trait]
    impl BrowserSession for StubSession {
        async fn navigate(&mut self, _url: &Url, _timeout: Duration) -> BrowserResult<Option<u16>> {
            let mut script = self.script.lock().unwrap();
            Ok(if script.statuses.is_empty() { Some(200) } else { script.statuses.remove(0) })
        }

        async fn content(&mut self) -> BrowserResult<String> {
            let mut script = self.script.lock().unwrap();
            if !script.contents.is_empty() {
                self.last_content = script.contents.remove(0);
            }
            Ok(self.last_content.clone())
        }

        async fn title(&mut self) -> BrowserResult<Option<String>> {
            Ok(Some("Case in vendita".into()))
        }

        async fn scroll_by(&mut self, _delta_y: i32) -> BrowserResult<()> {
            Ok(())
        }

        async fn move_pointer(&mut self, _x: f64, _y: f64) -> BrowserResult<()> {
            Ok(())
        }

        async fn cookies(&mut self) -> BrowserResult<Vec<StoredCookie>> {
            Ok(Vec::new())
        }

        async fn set_cookies(&mut self, _cookies: &[StoredCookie]) -> BrowserResult<()> {
            Ok(())
        }

        async fn screenshot(&mut self, _path: &Path) -> BrowserResult<()> {
            Ok(())
        }

        async fn close(&mut self) -> BrowserResult<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct StubLauncher {
        script: Arc<Mutex<Script>>,
        launches: AtomicUsize,
        failing_launches: AtomicUsize,
        closed: Arc<AtomicUsize>,
    }

    impl StubLauncher {
        fn new(statuses: Vec<Option<u16>>, contents: Vec<&str>) -> Self {
            Self {
                script: Arc::new(Mutex::new(Script {
                    statuses,
                    contents: contents.into_iter().map(String::from).collect(),
                })),
                launches: AtomicUsize::new(0),
                failing_launches: AtomicUsize::new(0),
                closed: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn failing_first(self, count: usize) -> Self {
            self.failing_launches.store(count, Ordering::SeqCst);
            self
        }
    }

    #[async_trait]
    impl BrowserLauncher for StubLauncher {
        async fn launch(
            &self,
            _proxy: Option<&ProxyEntry>,
            options: &LaunchOptions,
        ) -> BrowserResult<Box<dyn BrowserSession>> {
            assert!(options.args.iter().any(|arg| arg == "--disable-blink-features=AutomationControlled"));
            self.launches.fetch_add(1, Ordering::SeqCst);
            if self
                .failing_launches
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok()
            {
                return Err(BrowserError::Launch("proxy tunnel refused".into()));
            }
            Ok(Box::new(StubSession {
                script: Arc::clone(&self.script),
                closed: Arc::clone(&self.closed),
                last_content: String::new(),
            }))
        }
    }

    fn fast_settings() -> BrowserSettings {
        BrowserSettings {
            auto_resolve_polls: 3,
            auto_resolve_interval_ms: 0,
            manual_wait_timeout_secs: 0,
            manual_poll_interval_ms: 0,
            settle_delay_ms: 0,
            max_attempts: 3,
            ..Default::default()
        }
    }

    fn pool() -> Arc<TieredProxyPool> {
        Arc::new(TieredProxyPool::new(
            vec![ProxyEntry::new("it0.example", 9000, "u", "p")],
            vec![ProxyEntry::new("us0.example", 9100, "u", "p")],
            1,
        ))
    }

    fn fetcher(launcher: Arc<StubLauncher>, pool: Arc<TieredProxyPool>) -> BrowserFetcher {
        BrowserFetcher::new(
            launcher,
            pool,
            Arc::new(RateLimiter::with_interval(Duration::ZERO)),
            fast_settings(),
        )
        .with_behavior(BehaviorSimulator::disabled())
        .with_events(Arc::new(EventDispatcher::new()))
        .with_rng(StdRng::seed_from_u64(4))
    }

    fn url() -> Url {
        Url::parse("https://www.casa.it/vendita/residenziale/roma/").unwrap()
    }

    #[tokio::test]
    async fn clean_page_loads_and_keeps_session() {
        let launcher = Arc::new(StubLauncher::new(vec![Some(200)], vec!["<article>ok</article>"]));
        let mut fetcher = fetcher(launcher.clone(), pool());

        let outcome = fetcher.fetch(&url()).await.unwrap();
        assert_eq!(outcome.text(), "<article>ok</article>");
        assert_eq!(
            fetcher.transitions(),
            &[NavigationState::Idle, NavigationState::Navigating, NavigationState::Loaded]
        );
        assert!(fetcher.has_session());

        fetcher.close().await;
        assert!(!fetcher.has_session());
        assert_eq!(launcher.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn blocked_navigation_rotates_to_new_session() {
        let launcher = Arc::new(StubLauncher::new(
            vec![Some(403), Some(200)],
            vec!["<article>listing</article>"],
        ));
        let pool = pool();
        let mut fetcher = fetcher(launcher.clone(), pool.clone());

        let outcome = fetcher.fetch(&url()).await.unwrap();
        assert_eq!(outcome.tier, Some(ProxyTier::Backup));
        assert!(pool.is_demoted());
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 2);
        assert_eq!(launcher.closed.load(Ordering::SeqCst), 1);
        assert!(fetcher.transitions().contains(&NavigationState::Blocked));
    }

    #[tokio::test]
    async fn failed_launch_counts_against_the_leased_proxy() {
        let launcher = Arc::new(StubLauncher::new(vec![Some(200)], vec!["<article>ok</article>"]).failing_first(1));
        let pool = pool();
        let mut fetcher = fetcher(launcher.clone(), pool.clone());

        let outcome = fetcher.fetch(&url()).await.unwrap();
        assert!(pool.is_demoted());
        assert_eq!(outcome.tier, Some(ProxyTier::Backup));
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 2);
        assert_eq!(launcher.closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn challenge_that_clears_itself_is_loaded() {
        let launcher = Arc::new(StubLauncher::new(
            vec![Some(200)],
            vec![
                "<div class=\"cf-turnstile\"></div>",
                "<div class=\"cf-turnstile\"></div>",
                "<article>real content</article>",
            ],
        ));
        let mut fetcher = fetcher(launcher, pool());

        let outcome = fetcher.fetch(&url()).await.unwrap();
        assert_eq!(outcome.text(), "<article>real content</article>");
        assert_eq!(
            fetcher.transitions(),
            &[
                NavigationState::Idle,
                NavigationState::Navigating,
                NavigationState::Challenge,
                NavigationState::AutoResolving,
                NavigationState::Loaded,
            ]
        );
    }

    #[tokio::test]
    async fn unresolved_challenge_times_out_and_releases_session() {
        let launcher = Arc::new(StubLauncher::new(
            vec![Some(200)],
            vec!["<p>Verify you are human</p>"],
        ));
        let pool = pool();
        let mut fetcher = fetcher(launcher.clone(), pool.clone());

        let err = fetcher.fetch(&url()).await.unwrap_err();
        assert!(matches!(err, FetchError::ChallengeTimeout { .. }));
        assert_eq!(fetcher.state(), NavigationState::TimedOut);
        assert!(fetcher.transitions().contains(&NavigationState::ManualWait));
        assert!(!fetcher.has_session());
        assert_eq!(launcher.closed.load(Ordering::SeqCst), 1);
        assert!(pool.is_demoted());
    }

    #[tokio::test]
    async fn persistent_blocking_exhausts_attempts() {
        let launcher = Arc::new(StubLauncher::new(vec![Some(429), Some(429), Some(429)], vec![]));
        let mut fetcher = fetcher(launcher.clone(), pool());

        let err = fetcher.fetch(&url()).await.unwrap_err();
        assert!(matches!(err, FetchError::ExhaustedRetries { attempts: 3, .. }));
        assert_eq!(launcher.closed.load(Ordering::SeqCst), 3);
    }
}
