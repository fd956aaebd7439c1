//! Search adapter: headless-browser search with a bounded page pool,
//! block detection and adaptive pacing, plus a plain-HTTP fallback.
//!
//! The browser is a lazily-launched singleton. Tabs are reused through a
//! FIFO page pool; when the browser disconnects the pool drains, waiters
//! get a transient error and the next acquire relaunches.

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    SetBlockedUrLsParams, SetUserAgentOverrideParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use once_cell::sync::Lazy;
use rand::Rng;
use scraper::{Html, Selector};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use url::Url;

use crate::cache::ScraperCache;
use crate::config::Config;
use crate::domain::{is_noise_domain, is_search_engine_host, normalize_domain};
use crate::error::{AppError, Result};
use crate::models::{SearchResult, SearchSource};

/// Anti-bot markers checked against the page title and the first chunk of
/// body text.
const BLOCK_MARKERS: &[&str] = &[
    "captcha",
    "unusual traffic",
    "blocked",
    "access denied",
    "too many requests",
    "robot",
    "automated",
    "bot check",
];

/// Result containers, tried in order. The engine's markup shifts between
/// rollouts; the cascade covers the variants seen in the wild.
const RESULT_SELECTORS: &[&str] = &[
    "article[data-testid='result']",
    "article[data-nrn='result']",
    "li[data-layout='organic']",
    "div[data-testid='result']",
    ".react-results--main article",
    ".results .result",
    ".result__body",
];

/// Anchor selectors matching the result containers above.
const RESULT_LINK_SELECTORS: &[&str] = &[
    "a[data-testid='result-title-a']",
    "article[data-testid='result'] a[href]",
    "li[data-layout='organic'] a[href]",
    ".react-results--main article a[href]",
    ".results .result a.result__a",
    "a.result__a",
];

/// Resource patterns blocked via CDP to cut latency and bandwidth.
const BLOCKED_RESOURCE_PATTERNS: &[&str] = &[
    "*.png", "*.jpg", "*.jpeg", "*.gif", "*.svg", "*.webp", "*.ico", "*.css", "*.woff",
    "*.woff2", "*.ttf", "*.otf", "*.mp4", "*.webm", "*.mp3",
];

const FALLBACK_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
];

const MAX_BLOCK_RETRIES: u32 = 2;

static RESULT_ANCHOR_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a.result__a").expect("result anchor selector must parse"));

fn contains_block_marker(text: &str) -> bool {
    let haystack = text.to_lowercase();
    BLOCK_MARKERS.iter().any(|marker| haystack.contains(marker))
}

/// Back-off before block retry `retry` (0-based): 8 s, then 20 s.
fn block_backoff(retry: u32) -> Duration {
    Duration::from_millis(8_000 + retry as u64 * 12_000)
}

fn doubled_delay(current: u64, cap: u64) -> u64 {
    current.saturating_mul(2).min(cap)
}

fn decayed_delay(current: u64, floor: u64) -> u64 {
    ((current as f64 * 0.9) as u64).max(floor)
}

fn random_user_agent() -> &'static str {
    let idx = rand::thread_rng().gen_range(0..FALLBACK_USER_AGENTS.len());
    FALLBACK_USER_AGENTS[idx]
}

/// Resolves redirect wrappers, drops the engine's own hosts and noise
/// domains, deduplicates by domain and caps the list.
pub(crate) fn normalize_results(hrefs: Vec<String>, max_results: usize) -> Vec<String> {
    let mut seen_domains = HashSet::new();
    let mut urls = Vec::new();

    for href in hrefs {
        let href = href.trim();
        if href.is_empty() {
            continue;
        }
        let href = if href.starts_with("//") {
            format!("https:{}", href)
        } else if href.starts_with('/') {
            format!("https://duckduckgo.com{}", href)
        } else {
            href.to_string()
        };
        let parsed = match Url::parse(&href) {
            Ok(url) => url,
            Err(_) => continue,
        };

        let target = if is_search_engine_host(parsed.host_str().unwrap_or_default()) {
            // unwrap the uddg= redirect parameter; plain engine links are chrome
            match parsed
                .query_pairs()
                .find(|(key, _)| key == "uddg")
                .map(|(_, value)| value.into_owned())
            {
                Some(real) => match Url::parse(&real) {
                    Ok(url) => url,
                    Err(_) => continue,
                },
                None => continue,
            }
        } else {
            parsed
        };

        if target.scheme() != "http" && target.scheme() != "https" {
            continue;
        }
        let domain = match normalize_domain(target.as_str()) {
            Ok(domain) => domain,
            Err(_) => continue,
        };
        if is_search_engine_host(&domain) || is_noise_domain(&domain) {
            continue;
        }
        if !seen_domains.insert(domain) {
            continue;
        }
        urls.push(target.to_string());
        if urls.len() >= max_results {
            break;
        }
    }
    urls
}

fn parse_result_anchors(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    document
        .select(&RESULT_ANCHOR_SELECTOR)
        .filter_map(|el| el.value().attr("href"))
        .map(|href| href.to_string())
        .collect()
}

enum Slot {
    Ready(Page, u64),
    Spawn(u64),
    Wait(oneshot::Receiver<(Page, u64)>),
}

struct PoolState {
    idle: VecDeque<Page>,
    total: usize,
    generation: u64,
    waiters: VecDeque<oneshot::Sender<(Page, u64)>>,
}

/// Bounded FIFO pool of reusable browser tabs.
struct PagePool {
    max: usize,
    state: Mutex<PoolState>,
}

impl PagePool {
    fn new(max: usize) -> Self {
        Self {
            max: max.max(1),
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                total: 0,
                generation: 0,
                waiters: VecDeque::new(),
            }),
        }
    }

    fn checkout(&self) -> Slot {
        let mut state = self.state.lock().expect("pool lock poisoned");
        if let Some(page) = state.idle.pop_front() {
            return Slot::Ready(page, state.generation);
        }
        if state.total < self.max {
            state.total += 1;
            return Slot::Spawn(state.generation);
        }
        let (tx, rx) = oneshot::channel();
        state.waiters.push_back(tx);
        Slot::Wait(rx)
    }

    /// Undo a `Slot::Spawn` whose page creation failed. One queued waiter
    /// is rejected so accounting and the queue stay consistent.
    fn forget_slot(&self, generation: u64) {
        let mut state = self.state.lock().expect("pool lock poisoned");
        if state.generation == generation {
            state.total = state.total.saturating_sub(1);
            state.waiters.pop_front();
        }
    }

    /// Returns a page to the pool, handing it to the oldest waiter if one
    /// is queued. The page is reset to about:blank first; a page that
    /// fails the reset is discarded.
    async fn release(&self, page: Page, generation: u64) {
        let reset_ok = page.goto("about:blank").await.is_ok();
        let mut state = self.state.lock().expect("pool lock poisoned");
        if state.generation != generation {
            // pool was drained while this page was out
            return;
        }
        if !reset_ok {
            state.total = state.total.saturating_sub(1);
            return;
        }
        let mut page = page;
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send((page, generation)) {
                Ok(()) => return,
                Err((returned, _)) => page = returned,
            }
        }
        state.idle.push_back(page);
    }

    /// Clears the pool after a browser disconnect: idle pages are dropped,
    /// waiters are rejected, and outstanding pages from the old generation
    /// are ignored on release.
    fn drain(&self) {
        let mut state = self.state.lock().expect("pool lock poisoned");
        state.idle.clear();
        state.total = 0;
        state.generation += 1;
        state.waiters.clear();
    }
}

/// A checked-out tab. Every exit path returns the tab to the pool: call
/// [`PooledPage::release`] explicitly, or let `Drop` spawn the cleanup.
struct PooledPage {
    page: Option<Page>,
    generation: u64,
    pool: Arc<PagePool>,
}

impl PooledPage {
    fn page(&self) -> &Page {
        self.page.as_ref().expect("pooled page already released")
    }

    async fn release(mut self) {
        if let Some(page) = self.page.take() {
            self.pool.release(page, self.generation).await;
        }
    }
}

impl Drop for PooledPage {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            let pool = Arc::clone(&self.pool);
            let generation = self.generation;
            tokio::spawn(async move {
                pool.release(page, generation).await;
            });
        }
    }
}

struct BrowserHandle {
    browser: Browser,
    alive: Arc<AtomicBool>,
}

/// Issues search-engine queries and returns candidate homepage URLs.
pub(crate) struct SearchAdapter {
    config: Arc<Config>,
    cache: Arc<ScraperCache>,
    http: reqwest::Client,
    browser: tokio::sync::Mutex<Option<BrowserHandle>>,
    pool: Arc<PagePool>,
    delay_ms: AtomicU64,
    consecutive_blocks: AtomicU32,
}

impl SearchAdapter {
    pub(crate) fn new(config: Arc<Config>, cache: Arc<ScraperCache>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        let delay_ms = AtomicU64::new(config.min_search_delay_ms);
        let pool = Arc::new(PagePool::new(config.page_pool_size));
        Ok(Self {
            config,
            cache,
            http,
            browser: tokio::sync::Mutex::new(None),
            pool,
            delay_ms,
            consecutive_blocks: AtomicU32::new(0),
        })
    }

    /// Runs one query. Never returns an error: the browser path falls back
    /// to HTTP on failure, and HTTP failures come back as an empty result
    /// with `error` set. Successful results are cached under the query.
    pub(crate) async fn search(&self, query: &str, use_browser: bool) -> SearchResult {
        let cache_key = format!("search:{}", query);
        if let Some(cached) = self.cache.get(&cache_key) {
            if let Ok(result) = serde_json::from_value::<SearchResult>(cached) {
                tracing::debug!(target: "search_task", "Cache hit for '{}'", query);
                return result;
            }
        }

        let result = if !use_browser {
            self.search_http(query).await
        } else {
            match self.search_with_browser(query).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(target: "search_task",
                        "Browser search failed for '{}' ({}); falling back to HTTP", query, e);
                    let mut result = self.search_http(query).await;
                    if result.error.is_none() {
                        result.error = Some(format!("browser: {}", e));
                    }
                    result
                }
            }
        };

        if !result.blocked && result.error.is_none() && !result.urls.is_empty() {
            if let Ok(value) = serde_json::to_value(&result) {
                self.cache.set(&cache_key, value, None);
            }
        }
        result
    }

    /// Closes the browser and drains the pool. Used on shutdown.
    pub(crate) async fn shutdown(&self) {
        self.pool.drain();
        let mut guard = self.browser.lock().await;
        if let Some(mut handle) = guard.take() {
            handle.alive.store(false, Ordering::SeqCst);
            if let Err(e) = handle.browser.close().await {
                tracing::debug!(target: "search_task", "Browser close failed: {}", e);
            }
            let _ = handle.browser.wait().await;
        }
    }

    async fn launch(&self) -> Result<BrowserHandle> {
        tracing::info!(target: "search_task", "Launching headless browser");
        let browser_config = BrowserConfig::builder()
            .no_sandbox()
            .window_size(1366, 768)
            .args(vec![
                "--disable-gpu",
                "--disable-dev-shm-usage",
                "--lang=nl-NL,nl",
            ])
            .build()
            .map_err(AppError::Browser)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| AppError::Browser(e.to_string()))?;

        let alive = Arc::new(AtomicBool::new(true));
        let alive_flag = Arc::clone(&alive);
        let pool = Arc::clone(&self.pool);
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
            if alive_flag.swap(false, Ordering::SeqCst) {
                tracing::warn!(target: "search_task", "Browser disconnected; draining page pool");
            }
            pool.drain();
        });

        Ok(BrowserHandle { browser, alive })
    }

    async fn new_pooled_page(&self, generation: u64) -> Result<PooledPage> {
        let mut guard = self.browser.lock().await;
        let needs_launch = match guard.as_ref() {
            Some(handle) => !handle.alive.load(Ordering::SeqCst),
            None => true,
        };
        if needs_launch {
            *guard = Some(self.launch().await?);
        }
        let handle = guard.as_ref().expect("browser just ensured");
        let page = handle
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| AppError::Browser(e.to_string()))?;
        drop(guard);

        self.setup_page(&page).await?;
        Ok(PooledPage {
            page: Some(page),
            generation,
            pool: Arc::clone(&self.pool),
        })
    }

    async fn acquire_page(&self) -> Result<PooledPage> {
        match self.pool.checkout() {
            Slot::Ready(page, generation) => Ok(PooledPage {
                page: Some(page),
                generation,
                pool: Arc::clone(&self.pool),
            }),
            Slot::Spawn(generation) => match self.new_pooled_page(generation).await {
                Ok(page) => Ok(page),
                Err(e) => {
                    self.pool.forget_slot(generation);
                    Err(e)
                }
            },
            Slot::Wait(rx) => match rx.await {
                Ok((page, generation)) => Ok(PooledPage {
                    page: Some(page),
                    generation,
                    pool: Arc::clone(&self.pool),
                }),
                Err(_) => Err(AppError::PoolDrained(
                    "browser restarted while waiting for a page".to_string(),
                )),
            },
        }
    }

    /// Spoofed UA, Dutch accept-language, asset blocking.
    async fn setup_page(&self, page: &Page) -> Result<()> {
        let ua = SetUserAgentOverrideParams::builder()
            .user_agent(self.config.user_agent.clone())
            .accept_language("nl-NL,nl;q=0.9,en;q=0.8")
            .build()
            .map_err(AppError::Browser)?;
        page.execute(ua)
            .await
            .map_err(|e| AppError::Browser(e.to_string()))?;
        page.execute(SetBlockedUrLsParams::new(
            BLOCKED_RESOURCE_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>(),
        ))
        .await
        .map_err(|e| AppError::Browser(e.to_string()))?;
        Ok(())
    }

    async fn search_with_browser(&self, query: &str) -> Result<SearchResult> {
        let mut url = Url::parse(&self.config.search_endpoint)?;
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("kl", "nl-nl")
            .append_pair("ia", "web");

        let mut retry: u32 = 0;
        loop {
            let page = self.acquire_page().await?;

            let nav = tokio::time::timeout(self.config.search_timeout, async {
                page.page()
                    .goto(url.as_str())
                    .await
                    .map_err(|e| AppError::Browser(e.to_string()))?;
                page.page()
                    .wait_for_navigation()
                    .await
                    .map_err(|e| AppError::Browser(e.to_string()))?;
                Ok::<(), AppError>(())
            })
            .await;
            match nav {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    page.release().await;
                    return Err(e);
                }
                Err(_) => {
                    page.release().await;
                    return Err(AppError::Browser(format!(
                        "navigation timed out for query '{}'",
                        query
                    )));
                }
            }

            let blocked = match self.page_is_blocked(page.page()).await {
                Ok(blocked) => blocked,
                Err(e) => {
                    page.release().await;
                    return Err(e);
                }
            };
            if blocked {
                let blocks = self.consecutive_blocks.fetch_add(1, Ordering::SeqCst) + 1;
                let delay = self.delay_ms.load(Ordering::SeqCst);
                self.delay_ms.store(
                    doubled_delay(delay, self.config.max_search_delay_ms),
                    Ordering::SeqCst,
                );
                page.release().await;

                if retry < MAX_BLOCK_RETRIES {
                    let backoff = block_backoff(retry);
                    tracing::warn!(target: "search_task",
                        "Search blocked ({} consecutive); retrying in {:?}", blocks, backoff);
                    tokio::time::sleep(backoff).await;
                    retry += 1;
                    continue;
                }
                tracing::warn!(target: "search_task",
                    "Search still blocked after {} retries, giving up on '{}'",
                    MAX_BLOCK_RETRIES, query);
                return Ok(SearchResult::blocked(SearchSource::Browser));
            }

            let hrefs = self.collect_result_hrefs(page.page()).await;
            page.release().await;

            let urls = normalize_results(hrefs, self.config.max_search_results);

            self.consecutive_blocks.store(0, Ordering::SeqCst);
            let delay = self.delay_ms.load(Ordering::SeqCst);
            let decayed = decayed_delay(delay, self.config.min_search_delay_ms);
            self.delay_ms.store(decayed, Ordering::SeqCst);

            // pace before the next search hits the engine
            let jitter: u64 = rand::thread_rng().gen_range(0..500);
            tokio::time::sleep(Duration::from_millis(decayed + jitter)).await;

            tracing::info!(target: "search_task",
                "Search '{}' returned {} URLs (browser)", query, urls.len());
            return Ok(SearchResult {
                urls,
                blocked: false,
                source: SearchSource::Browser,
                error: None,
            });
        }
    }

    async fn page_is_blocked(&self, page: &Page) -> Result<bool> {
        let title = page
            .get_title()
            .await
            .map_err(|e| AppError::Browser(e.to_string()))?
            .unwrap_or_default();
        let body: String = page
            .evaluate("document.body ? document.body.innerText.slice(0, 1000) : ''")
            .await
            .map_err(|e| AppError::Browser(e.to_string()))?
            .into_value()
            .unwrap_or_default();
        Ok(contains_block_marker(&format!("{} {}", title, body)))
    }

    async fn wait_for_results(&self, page: &Page) -> bool {
        for selector in RESULT_SELECTORS {
            let deadline = tokio::time::Instant::now() + self.config.selector_timeout;
            loop {
                if page.find_element(*selector).await.is_ok() {
                    return true;
                }
                if tokio::time::Instant::now() >= deadline {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        }
        false
    }

    async fn collect_result_hrefs(&self, page: &Page) -> Vec<String> {
        let mut found = self.wait_for_results(page).await;
        if !found {
            // nudge lazy rendering once
            let _ = page.evaluate("window.scrollBy(0, 500)").await;
            tokio::time::sleep(Duration::from_millis(800)).await;
            found = self.wait_for_results(page).await;
        }
        if !found {
            tracing::debug!(target: "search_task", "No result selector matched");
            return Vec::new();
        }

        for selector in RESULT_LINK_SELECTORS {
            if let Ok(elements) = page.find_elements(*selector).await {
                let mut hrefs = Vec::new();
                for element in elements {
                    if let Ok(Some(href)) = element.attribute("href").await {
                        hrefs.push(href);
                    }
                }
                if !hrefs.is_empty() {
                    return hrefs;
                }
            }
        }

        // last resort: every link on the page; normalization drops chrome
        let mut hrefs = Vec::new();
        if let Ok(elements) = page.find_elements("a[href]").await {
            for element in elements {
                if let Ok(Some(href)) = element.attribute("href").await {
                    hrefs.push(href);
                }
            }
        }
        hrefs
    }

    async fn search_http(&self, query: &str) -> SearchResult {
        tracing::debug!(target: "search_task", "HTTP search for '{}'", query);
        let response = self
            .http
            .post(&self.config.search_html_endpoint)
            .header(reqwest::header::USER_AGENT, random_user_agent())
            .form(&[("q", query), ("kl", "nl-nl")])
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(target: "search_task", "HTTP search failed for '{}': {}", query, e);
                let mut result = SearchResult::empty(SearchSource::Http);
                result.error = Some(e.to_string());
                return result;
            }
        };

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            tracing::warn!(target: "search_task", "HTTP search rate-limited (429); backing off 30 s");
            tokio::time::sleep(Duration::from_secs(30)).await;
            return SearchResult::blocked(SearchSource::Http);
        }
        if !response.status().is_success() {
            let mut result = SearchResult::empty(SearchSource::Http);
            result.error = Some(format!("HTTP {}", response.status()));
            return result;
        }

        let html = match response.text().await {
            Ok(html) => html,
            Err(e) => {
                let mut result = SearchResult::empty(SearchSource::Http);
                result.error = Some(e.to_string());
                return result;
            }
        };

        let urls = normalize_results(parse_result_anchors(&html), self.config.max_search_results);
        tokio::time::sleep(self.config.random_sleep_duration()).await;

        tracing::info!(target: "search_task",
            "Search '{}' returned {} URLs (http)", query, urls.len());
        SearchResult {
            urls,
            blocked: false,
            source: SearchSource::Http,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_markers_match_case_insensitively() {
        assert!(contains_block_marker("Please complete the CAPTCHA"));
        assert!(contains_block_marker("We detected unusual traffic from your network"));
        assert!(contains_block_marker("Are you a robot?"));
        assert!(!contains_block_marker("DuckDuckGo - Privacy, simplified."));
    }

    #[test]
    fn block_backoff_grows_with_retries() {
        assert_eq!(block_backoff(0), Duration::from_secs(8));
        assert_eq!(block_backoff(1), Duration::from_secs(20));
    }

    #[test]
    fn delay_adaptation() {
        assert_eq!(doubled_delay(1500, 60_000), 3000);
        assert_eq!(doubled_delay(40_000, 60_000), 60_000);
        assert_eq!(decayed_delay(3000, 1500), 2700);
        assert_eq!(decayed_delay(1500, 1500), 1500);
    }

    #[test]
    fn normalize_unwraps_redirects_and_dedupes() {
        let hrefs = vec![
            "//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.acme.nl%2F&rut=abc".to_string(),
            "https://acme.nl/over-ons".to_string(), // same domain, deduped
            "https://other.nl/".to_string(),
            "https://duckduckgo.com/settings".to_string(), // engine chrome
            "mailto:info@acme.nl".to_string(),
            "https://facebook.com/acme".to_string(), // noise
        ];
        let urls = normalize_results(hrefs, 10);
        assert_eq!(
            urls,
            vec!["https://www.acme.nl/".to_string(), "https://other.nl/".to_string()]
        );
    }

    #[test]
    fn normalize_caps_results() {
        let hrefs = (0..20)
            .map(|i| format!("https://company{}.nl/", i))
            .collect::<Vec<_>>();
        assert_eq!(normalize_results(hrefs, 5).len(), 5);
    }

    #[test]
    fn normalize_handles_relative_redirect_links() {
        let hrefs = vec!["/l/?uddg=https%3A%2F%2Fexample.com%2Fpage&rut=x".to_string()];
        assert_eq!(
            normalize_results(hrefs, 10),
            vec!["https://example.com/page".to_string()]
        );
    }

    #[test]
    fn parse_result_anchors_finds_fallback_links() {
        let html = r#"<html><body>
            <div class="result"><a class="result__a" href="https://acme.nl/">Acme</a></div>
            <div class="result"><a class="result__a" href="https://other.nl/">Other</a></div>
            <a href="https://ignored.nl/">not a result</a>
            </body></html>"#;
        let anchors = parse_result_anchors(html);
        assert_eq!(anchors, vec!["https://acme.nl/", "https://other.nl/"]);
    }

    #[tokio::test]
    async fn pool_checkout_bookkeeping() {
        // exercised without a browser: slot accounting only
        let pool = PagePool::new(1);
        match pool.checkout() {
            Slot::Spawn(generation) => assert_eq!(generation, 0),
            _ => panic!("expected spawn slot"),
        }
        // pool is full now; the next checkout must queue
        assert!(matches!(pool.checkout(), Slot::Wait(_)));
        // a failed spawn frees the slot and rejects the queued waiter
        pool.forget_slot(0);
        assert!(matches!(pool.checkout(), Slot::Spawn(_)));
    }

    #[tokio::test]
    async fn drained_pool_rejects_waiters() {
        let pool = PagePool::new(1);
        let _slot = pool.checkout();
        let waiter = match pool.checkout() {
            Slot::Wait(rx) => rx,
            _ => panic!("expected wait slot"),
        };
        pool.drain();
        assert!(waiter.await.is_err());
    }
}
