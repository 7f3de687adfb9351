use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use rand::SeedableRng;
use rand::rngs::StdRng;
use url::Url;

use listing_harvester::fetch::{TransportError, TransportRequest, TransportResponse};
use listing_harvester::modules::{FetchEvent, RetryBackoff};
use listing_harvester::{
    EventDispatcher, EventHandler, FetchError, FetchStatus, FetchStrategy, HttpTransport,
    PageFetcher, ProxyEntry, ProxyTier, RateLimiter, RequestPipeline, TieredProxyPool,
};

const LISTING_PAGE: &str = "<html><body><article><a href=\"/immobili/45678901/\">Bilocale</a></article></body></html>";
const CHALLENGE_PAGE: &str = "<html><head><title>Just a moment...</title></head><body><div class=\"g-recaptcha\"></div></body></html>";

/// Replies from a fixed script and records which proxy each request used.
struct ScriptedTransport {
    replies: Mutex<Vec<(u16, &'static str)>>,
    proxies: Mutex<Vec<Option<String>>>,
}

impl ScriptedTransport {
    fn new(mut replies: Vec<(u16, &'static str)>) -> Arc<Self> {
        replies.reverse();
        Arc::new(Self {
            replies: Mutex::new(replies),
            proxies: Mutex::new(Vec::new()),
        })
    }

    fn proxies(&self) -> Vec<Option<String>> {
        self.proxies.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.proxies
            .lock()
            .unwrap()
            .push(request.proxy.as_ref().map(|proxy| proxy.host.clone()));
        let (status, body) = self
            .replies
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| TransportError::Other("script exhausted".into()))?;
        Ok(TransportResponse {
            status,
            headers: HeaderMap::new(),
            body: Bytes::from_static(body.as_bytes()),
            url: request.url,
        })
    }
}

#[derive(Default)]
struct CountingHandler {
    proxy_failures: AtomicUsize,
    retries: AtomicUsize,
}

impl EventHandler for CountingHandler {
    fn handle(&self, event: &FetchEvent) {
        match event {
            FetchEvent::ProxyFailure(_) => {
                self.proxy_failures.fetch_add(1, Ordering::SeqCst);
            }
            FetchEvent::Retry(_) => {
                self.retries.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    }
}

fn pool() -> Arc<TieredProxyPool> {
    Arc::new(TieredProxyPool::new(
        vec![
            ProxyEntry::new("it0.proxy", 8000, "user", "secret"),
            ProxyEntry::new("it1.proxy", 8001, "user", "secret"),
        ],
        vec![
            ProxyEntry::new("us0.proxy", 9000, "user", "secret"),
            ProxyEntry::new("us1.proxy", 9001, "user", "secret"),
        ],
        2,
    ))
}

fn pipeline(
    transport: Arc<ScriptedTransport>,
    pool: Arc<TieredProxyPool>,
    handler: Arc<CountingHandler>,
    attempts: u32,
) -> RequestPipeline {
    let mut events = EventDispatcher::new();
    events.register_handler(handler);
    RequestPipeline::new(transport, pool, Arc::new(RateLimiter::with_interval(Duration::ZERO)))
        .with_backoff(RetryBackoff::immediate())
        .with_max_attempts(attempts)
        .with_events(Arc::new(events))
        .with_rng(StdRng::seed_from_u64(3))
}

fn search_url() -> Url {
    Url::parse("https://www.casa.it/vendita/residenziale/roma/").unwrap()
}

#[tokio::test]
async fn blocked_primaries_demote_the_pool_before_success() {
    let transport = ScriptedTransport::new(vec![(403, ""), (429, ""), (200, LISTING_PAGE)]);
    let pool = pool();
    let handler = Arc::new(CountingHandler::default());
    let mut fetcher: Box<dyn PageFetcher> =
        Box::new(pipeline(transport.clone(), pool.clone(), handler.clone(), 5));

    let outcome = fetcher.fetch(&search_url()).await.unwrap();
    assert_eq!(fetcher.strategy(), FetchStrategy::Http);
    assert_eq!(outcome.status, FetchStatus::Ok);
    assert_eq!(outcome.tier, Some(ProxyTier::Backup));
    assert!(outcome.text().contains("Bilocale"));

    assert_eq!(
        transport.proxies(),
        vec![
            Some("it0.proxy".to_string()),
            Some("it1.proxy".to_string()),
            Some("us0.proxy".to_string()),
        ]
    );
    assert!(pool.is_demoted());
    assert_eq!(handler.proxy_failures.load(Ordering::SeqCst), 2);
    assert_eq!(handler.retries.load(Ordering::SeqCst), 2);
    fetcher.close().await;
}

#[tokio::test]
async fn challenge_bodies_blacklist_backups_until_exhaustion() {
    let transport = ScriptedTransport::new(vec![
        (403, ""),
        (403, ""),
        (200, CHALLENGE_PAGE),
        (200, CHALLENGE_PAGE),
    ]);
    let pool = pool();
    let handler = Arc::new(CountingHandler::default());
    let mut fetcher = pipeline(transport, pool.clone(), handler.clone(), 4);

    let err = fetcher.fetch(&search_url()).await.unwrap_err();
    match err {
        FetchError::ExhaustedRetries {
            attempts,
            last_status,
            ..
        } => {
            assert_eq!(attempts, 4);
            assert_eq!(last_status, FetchStatus::ChallengeDetected);
        }
        other => panic!("unexpected error: {other}"),
    }

    let health = pool.health_report();
    assert!(health.demoted);
    assert_eq!(health.backup_blacklisted, 2);
    assert_eq!(handler.proxy_failures.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn empty_pool_goes_direct() {
    let transport = ScriptedTransport::new(vec![(200, LISTING_PAGE)]);
    let handler = Arc::new(CountingHandler::default());
    let mut fetcher = pipeline(transport.clone(), Arc::new(TieredProxyPool::empty()), handler, 2);

    let outcome = fetcher.fetch(&search_url()).await.unwrap();
    assert_eq!(outcome.proxy, None);
    assert_eq!(transport.proxies(), vec![None]);
}
