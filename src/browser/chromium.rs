//! Chrome DevTools engine for [`BrowserSession`].

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetLocaleOverrideParams, SetTimezoneOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::fetch::{
    AuthChallengeResponse, AuthChallengeResponseResponse, ContinueRequestParams,
    ContinueWithAuthParams, EnableParams, EventAuthRequired, EventRequestPaused,
};
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, SetUserAgentOverrideParams};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::layout::Point;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::task::JoinHandle;
use url::Url;

use super::{BrowserError, BrowserLauncher, BrowserResult, BrowserSession, LaunchOptions, StoredCookie};
use crate::modules::proxy::ProxyEntry;

/// Hides the most common automation fingerprints before any page script runs.
const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'languages', { get: () => ['it-IT', 'it', 'en-US', 'en'] });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
window.chrome = window.chrome || { runtime: {} };
"#;

impl From<CdpError> for BrowserError {
    fn from(err: CdpError) -> Self {
        BrowserError::Protocol(err.to_string())
    }
}

#[derive(Debug, Default)]
pub struct ChromiumLauncher;

impl ChromiumLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(
        &self,
        proxy: Option<&ProxyEntry>,
        options: &LaunchOptions,
    ) -> BrowserResult<Box<dyn BrowserSession>> {
        let (width, height) = options.profile.viewport;
        let mut builder = BrowserConfig::builder().window_size(width, height);
        if let Some(path) = &options.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        // with_head means a visible window
        if !options.headless {
            builder = builder.with_head();
        }
        for arg in &options.args {
            builder = builder.arg(arg);
        }
        if let Some(entry) = proxy {
            builder = builder.arg(format!("--proxy-server={}", entry.server()));
        }
        let config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let mut session = ChromiumSession {
            browser: Some(browser),
            page: None,
            tasks: vec![handler_task],
        };
        if let Err(err) = session.prepare(proxy, options).await {
            let _ = session.close().await;
            return Err(err);
        }
        Ok(Box::new(session))
    }
}

/// One Chrome process with a single working tab.
pub struct ChromiumSession {
    browser: Option<Browser>,
    page: Option<Page>,
    tasks: Vec<JoinHandle<()>>,
}

impl ChromiumSession {
    fn page(&self) -> BrowserResult<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| BrowserError::Protocol("browser session already closed".into()))
    }

    async fn prepare(&mut self, proxy: Option<&ProxyEntry>, options: &LaunchOptions) -> BrowserResult<()> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| BrowserError::Launch("browser not running".into()))?;
        let page = browser.new_page("about:blank").await?;

        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_SCRIPT))
            .await?;

        let mut user_agent = SetUserAgentOverrideParams::new(options.user_agent.clone());
        user_agent.accept_language = Some(options.profile.accept_language.to_string());
        page.execute(user_agent).await?;
        page.execute(SetTimezoneOverrideParams::new(options.profile.timezone))
            .await?;
        page.execute(
            SetLocaleOverrideParams::builder()
                .locale(options.profile.locale)
                .build(),
        )
        .await?;

        if let Some(entry) = proxy {
            self.install_proxy_auth(&page, entry).await?;
        }

        self.page = Some(page);
        Ok(())
    }

    /// Answer proxy auth challenges through the Fetch domain; `--proxy-server`
    /// cannot carry credentials.
    async fn install_proxy_auth(&mut self, page: &Page, entry: &ProxyEntry) -> BrowserResult<()> {
        let mut auth_events = page.event_listener::<EventAuthRequired>().await?;
        let mut paused_events = page.event_listener::<EventRequestPaused>().await?;
        page.execute(EnableParams::builder().handle_auth_requests(true).build())
            .await?;

        let auth_page = page.clone();
        let username = entry.username.clone();
        let password = entry.password.clone();
        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = auth_events.next().await {
                let response = AuthChallengeResponse::builder()
                    .response(AuthChallengeResponseResponse::ProvideCredentials)
                    .username(username.clone())
                    .password(password.clone())
                    .build();
                let Ok(response) = response else {
                    continue;
                };
                let params = ContinueWithAuthParams::new(event.request_id.clone(), response);
                if let Err(err) = auth_page.execute(params).await {
                    log::debug!("proxy auth reply failed: {err}");
                }
            }
        }));

        let paused_page = page.clone();
        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = paused_events.next().await {
                let params = ContinueRequestParams::new(event.request_id.clone());
                if let Err(err) = paused_page.execute(params).await {
                    log::debug!("continuing paused request failed: {err}");
                }
            }
        }));
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &Url, timeout: Duration) -> BrowserResult<Option<u16>> {
        let page = self.page()?;
        let navigation = async {
            page.goto(url.as_str()).await?;
            let response = page.wait_for_navigation_response().await?;
            Ok::<_, CdpError>(response.and_then(|request| {
                request
                    .response
                    .as_ref()
                    .map(|response| response.status as u16)
            }))
        };

        match tokio::time::timeout(timeout, navigation).await {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(err)) => Err(BrowserError::Navigation {
                url: url.to_string(),
                reason: err.to_string(),
            }),
            Err(_) => Err(BrowserError::NavigationTimeout {
                url: url.to_string(),
                timeout,
            }),
        }
    }

    async fn content(&mut self) -> BrowserResult<String> {
        Ok(self.page()?.content().await?)
    }

    async fn title(&mut self) -> BrowserResult<Option<String>> {
        Ok(self.page()?.get_title().await?)
    }

    async fn scroll_by(&mut self, delta_y: i32) -> BrowserResult<()> {
        self.page()?
            .evaluate(format!("window.scrollBy(0, {delta_y})"))
            .await?;
        Ok(())
    }

    async fn move_pointer(&mut self, x: f64, y: f64) -> BrowserResult<()> {
        self.page()?.move_mouse(Point::new(x, y)).await?;
        Ok(())
    }

    async fn cookies(&mut self) -> BrowserResult<Vec<StoredCookie>> {
        let cookies = self.page()?.get_cookies().await?;
        Ok(cookies
            .into_iter()
            .map(|cookie| StoredCookie {
                name: cookie.name,
                value: cookie.value,
                domain: cookie.domain,
                path: cookie.path,
                secure: cookie.secure,
                http_only: cookie.http_only,
            })
            .collect())
    }

    async fn set_cookies(&mut self, cookies: &[StoredCookie]) -> BrowserResult<()> {
        let mut params = Vec::with_capacity(cookies.len());
        for cookie in cookies {
            match CookieParam::builder()
                .name(cookie.name.clone())
                .value(cookie.value.clone())
                .domain(cookie.domain.clone())
                .path(cookie.path.clone())
                .secure(cookie.secure)
                .http_only(cookie.http_only)
                .build()
            {
                Ok(param) => params.push(param),
                Err(err) => log::warn!("skipping cookie {}: {err}", cookie.name),
            }
        }
        self.page()?.set_cookies(params).await?;
        Ok(())
    }

    async fn screenshot(&mut self, path: &Path) -> BrowserResult<()> {
        self.page()?
            .save_screenshot(ScreenshotParams::builder().full_page(true).build(), path)
            .await?;
        Ok(())
    }

    async fn close(&mut self) -> BrowserResult<()> {
        if let Some(page) = self.page.take() {
            let _ = page.close().await;
        }
        if let Some(mut browser) = self.browser.take() {
            let _ = browser.close().await;
            let _ = browser.wait().await;
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        Ok(())
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
