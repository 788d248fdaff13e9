// src/ingest/transport.rs
//! Transport strategies and the fallback chain every adapter runs them through.

use crate::error::FetchError;
use crate::ingest::extraction::{ExtractionClient, ExtractionOutput};
use crate::ingest::types::{RawItem, StrategyFailure};
use async_trait::async_trait;
use metrics::counter;
use rand::seq::IndexedRandom;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Lowercase substrings that mark a block/challenge page.
pub const ANTI_BOT_SIGNATURES: &[&str] = &["cf-chl-bypass", "challenge-platform", "captcha"];

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
];

const PLAIN_USER_AGENT: &str = concat!("fireproof-leads/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchTarget {
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Extraction-schema id for structured remote extraction.
    pub schema: Option<String>,
    pub wait_for_selector: Option<String>,
}

impl FetchTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.to_string());
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn wait_for(mut self, selector: &str) -> Self {
        self.wait_for_selector = Some(selector.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PageBody {
    Extracted(Vec<Value>),
    Document(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    pub status: u16,
    pub url: String,
    pub body: PageBody,
}

impl FetchedPage {
    pub fn document(url: &str, status: u16, html: impl Into<String>) -> Self {
        Self {
            status,
            url: url.to_string(),
            body: PageBody::Document(html.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait TransportStrategy: Send + Sync {
    fn name(&self) -> &str;
    async fn attempt(&self, target: &FetchTarget, proxy: Option<&str>) -> Result<FetchedPage, FetchError>;
}

pub fn detect_anti_bot(html: &str) -> Option<&'static str> {
    let lower = html.to_ascii_lowercase();
    ANTI_BOT_SIGNATURES.iter().copied().find(|sig| lower.contains(sig))
}

fn http_client(proxy: Option<&str>, timeout: Duration, user_agent: &str) -> Result<reqwest::Client, FetchError> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .redirect(reqwest::redirect::Policy::limited(5));
    if let Some(p) = proxy {
        let proxy = reqwest::Proxy::all(p)
            .map_err(|e| FetchError::transport(format!("invalid proxy `{p}`: {e}")))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| FetchError::transport(format!("building http client: {e}")))
}

fn header_map(pairs: &[(String, String)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (k, v) in pairs {
        match (HeaderName::try_from(k.as_str()), HeaderValue::from_str(v)) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => tracing::debug!(target: "ingest", header = %k, "skipping invalid header"),
        }
    }
    map
}

async fn get_document(
    client: &reqwest::Client,
    target: &FetchTarget,
    extra: HeaderMap,
) -> Result<FetchedPage, FetchError> {
    let mut headers = extra;
    headers.extend(header_map(&target.headers));
    let resp = client.get(&target.url).headers(headers).send().await?;
    let status = resp.status().as_u16();
    let url = resp.url().to_string();
    let body = resp.text().await?;
    Ok(FetchedPage::document(&url, status, body))
}

/* ----------------------------
Plain HTTP
---------------------------- */

#[derive(Debug, Clone)]
pub struct PlainHttp {
    timeout: Duration,
}

impl PlainHttp {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl TransportStrategy for PlainHttp {
    fn name(&self) -> &str {
        "plain_http"
    }

    async fn attempt(&self, target: &FetchTarget, proxy: Option<&str>) -> Result<FetchedPage, FetchError> {
        let client = http_client(proxy, self.timeout, PLAIN_USER_AGENT)?;
        get_document(&client, target, HeaderMap::new()).await
    }
}

/* ----------------------------
Stealth HTTP: browser headers, rotating UA, bounded retries
---------------------------- */

#[derive(Debug, Clone)]
pub struct StealthHttp {
    timeout: Duration,
    max_retries: u8,
    backoff: Duration,
}

impl StealthHttp {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            max_retries: 3,
            backoff: Duration::from_millis(500),
        }
    }

    fn browser_headers() -> HeaderMap {
        let pairs = [
            ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"),
            ("accept-language", "en-US,en;q=0.9"),
            ("dnt", "1"),
            ("upgrade-insecure-requests", "1"),
            ("sec-fetch-dest", "document"),
            ("sec-fetch-mode", "navigate"),
            ("sec-fetch-site", "none"),
        ];
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(HeaderName::from_static(k), HeaderValue::from_static(v));
        }
        map
    }
}

#[async_trait]
impl TransportStrategy for StealthHttp {
    fn name(&self) -> &str {
        "stealth_http"
    }

    async fn attempt(&self, target: &FetchTarget, proxy: Option<&str>) -> Result<FetchedPage, FetchError> {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let ua = USER_AGENTS.choose(&mut rand::rng()).copied().unwrap_or(USER_AGENTS[0]);
            let client = http_client(proxy, self.timeout, ua)?;
            let res = get_document(&client, target, Self::browser_headers()).await;

            let retryable = match &res {
                Ok(page) => page.status == 429 || page.status >= 500,
                Err(FetchError::Transport { .. }) => true,
                Err(_) => false,
            };
            if retryable && attempt < self.max_retries {
                tracing::debug!(target: "ingest", url = %target.url, attempt, "stealth fetch retrying");
                tokio::time::sleep(self.backoff * (1u32 << (attempt - 1))).await;
                continue;
            }
            return res;
        }
    }
}

/* ----------------------------
Remote extraction / render
---------------------------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteMode {
    /// Structured fields for the target's schema id.
    Schema,
    /// Rendered HTML, parsed locally.
    Render,
}

#[derive(Debug, Clone)]
pub struct RemoteExtraction {
    client: Arc<ExtractionClient>,
    mode: RemoteMode,
}

impl RemoteExtraction {
    pub fn new(client: Arc<ExtractionClient>, mode: RemoteMode) -> Self {
        Self { client, mode }
    }
}

#[async_trait]
impl TransportStrategy for RemoteExtraction {
    fn name(&self) -> &str {
        match self.mode {
            RemoteMode::Schema => "remote_extraction",
            RemoteMode::Render => "remote_render",
        }
    }

    async fn attempt(&self, target: &FetchTarget, _proxy: Option<&str>) -> Result<FetchedPage, FetchError> {
        let schema = match self.mode {
            RemoteMode::Schema => Some(
                target
                    .schema
                    .as_deref()
                    .ok_or_else(|| FetchError::Extraction("target has no extraction schema".into()))?,
            ),
            RemoteMode::Render => None,
        };
        let out = self
            .client
            .scrape(&target.url, schema, target.wait_for_selector.as_deref())
            .await?;
        let body = match out {
            ExtractionOutput::Extracted(items) => PageBody::Extracted(items),
            ExtractionOutput::Rendered(html) => PageBody::Document(html),
        };
        Ok(FetchedPage {
            status: 200,
            url: target.url.clone(),
            body,
        })
    }
}

/* ----------------------------
Chain
---------------------------- */

/// What to do when a strategy answers fine but yields zero items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyPolicy {
    /// Report an empty success and stop.
    Stop,
    /// Later strategies may still recover content (e.g. a JS-only page).
    TryRemaining,
}

/// Parsed items of one page; inner errors are single malformed items.
pub type ParsedPage = Vec<Result<RawItem, FetchError>>;

#[derive(Debug, Default)]
pub struct ChainOutcome {
    pub items: Vec<RawItem>,
    pub skipped: usize,
    /// At least one strategy returned 2xx + parseable content.
    pub succeeded: bool,
    pub strategy: Option<String>,
    pub failures: Vec<StrategyFailure>,
}

#[derive(Clone)]
pub struct StrategyChain {
    strategies: Vec<Arc<dyn TransportStrategy>>,
    empty_policy: EmptyPolicy,
}

impl StrategyChain {
    pub fn new(strategies: Vec<Arc<dyn TransportStrategy>>, empty_policy: EmptyPolicy) -> Self {
        Self {
            strategies,
            empty_policy,
        }
    }

    pub async fn run<F>(&self, source: &str, target: &FetchTarget, proxy: Option<&str>, parse: F) -> ChainOutcome
    where
        F: Fn(&FetchedPage) -> Result<ParsedPage, FetchError>,
    {
        let mut out = ChainOutcome::default();

        for strategy in &self.strategies {
            let name = strategy.name();
            let result = strategy
                .attempt(target, proxy)
                .await
                .and_then(|page| {
                    if !page.is_success() {
                        return Err(FetchError::http_status(page.status, format!("GET {}", target.url)));
                    }
                    if let PageBody::Document(html) = &page.body {
                        if let Some(sig) = detect_anti_bot(html) {
                            return Err(FetchError::AntiBot {
                                signature: sig.to_string(),
                            });
                        }
                    }
                    parse(&page)
                });

            let parsed = match result {
                Ok(p) => p,
                Err(e) => {
                    if matches!(e, FetchError::AntiBot { .. }) {
                        tracing::warn!(target: "ingest", source, strategy = name, kind = e.kind(), url = %target.url, "anti-bot challenge");
                    } else {
                        tracing::info!(target: "ingest", source, strategy = name, kind = e.kind(), error = %e, "strategy failed");
                    }
                    out.failures.push(StrategyFailure::new(name, e));
                    continue;
                }
            };

            let mut items = Vec::with_capacity(parsed.len());
            let mut skipped = 0usize;
            for item in parsed {
                match item {
                    Ok(raw) => items.push(raw),
                    Err(e) => {
                        tracing::debug!(target: "ingest", source, strategy = name, error = %e, "skipping malformed item");
                        skipped += 1;
                    }
                }
            }
            if skipped > 0 {
                counter!("leads_parse_skipped_total").increment(skipped as u64);
            }
            out.skipped += skipped;
            out.succeeded = true;

            if !items.is_empty() {
                out.items = items;
                out.strategy = Some(name.to_string());
                return out;
            }
            out.strategy.get_or_insert_with(|| name.to_string());
            if self.empty_policy == EmptyPolicy::Stop {
                return out;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Canned {
        name: &'static str,
        page: Result<FetchedPage, FetchError>,
        calls: AtomicUsize,
    }

    impl Canned {
        fn new(name: &'static str, page: Result<FetchedPage, FetchError>) -> Arc<Self> {
            Arc::new(Self {
                name,
                page,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TransportStrategy for Canned {
        fn name(&self) -> &str {
            self.name
        }
        async fn attempt(&self, _t: &FetchTarget, _p: Option<&str>) -> Result<FetchedPage, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.page.clone()
        }
    }

    fn lines(page: &FetchedPage) -> Result<ParsedPage, FetchError> {
        match &page.body {
            PageBody::Document(s) => Ok(s
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(|l| {
                    if l == "BAD" {
                        Err(FetchError::Parse("bad line".into()))
                    } else {
                        Ok(RawItem {
                            title: l.to_string(),
                            ..Default::default()
                        })
                    }
                })
                .collect()),
            PageBody::Extracted(_) => Err(FetchError::Extraction("unexpected".into())),
        }
    }

    fn dynv(v: Vec<Arc<Canned>>) -> Vec<Arc<dyn TransportStrategy>> {
        v.into_iter().map(|s| s as Arc<dyn TransportStrategy>).collect()
    }

    fn doc(body: &str) -> Result<FetchedPage, FetchError> {
        Ok(FetchedPage::document("https://x", 200, body))
    }

    #[tokio::test]
    async fn first_success_stops_the_chain() {
        let a = Canned::new("a", Err(FetchError::transport("refused")));
        let b = Canned::new("b", Ok(FetchedPage::document("https://x", 503, "")));
        let c = Canned::new("c", doc("one\nBAD\ntwo"));
        let d = Canned::new("d", doc("never"));
        let chain = StrategyChain::new(dynv(vec![a, b, c, d.clone()]), EmptyPolicy::Stop);
        let out = chain.run("t", &FetchTarget::new("https://x"), None, lines).await;
        assert!(out.succeeded);
        assert_eq!(out.items.len(), 2);
        assert_eq!(out.skipped, 1);
        assert_eq!(out.strategy.as_deref(), Some("c"));
        let kinds: Vec<_> = out.failures.iter().map(|f| (f.strategy.as_str(), f.error.kind())).collect();
        assert_eq!(kinds, vec![("a", "transport"), ("b", "transport")]);
        assert_eq!(d.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_policy_controls_recovery() {
        let empty = Canned::new("empty", doc(""));
        let full = Canned::new("full", doc("lead"));

        let stop = StrategyChain::new(dynv(vec![empty.clone(), full.clone()]), EmptyPolicy::Stop);
        let out = stop.run("t", &FetchTarget::new("u"), None, lines).await;
        assert!(out.succeeded && out.items.is_empty());
        assert_eq!(full.calls.load(Ordering::SeqCst), 0);

        let retry = StrategyChain::new(dynv(vec![empty, full.clone()]), EmptyPolicy::TryRemaining);
        let out = retry.run("t", &FetchTarget::new("u"), None, lines).await;
        assert_eq!(out.items.len(), 1);
        assert_eq!(out.strategy.as_deref(), Some("full"));
    }

    #[tokio::test]
    async fn challenge_page_is_anti_bot_not_transport() {
        let blocked = Canned::new("blocked", doc("<div id=\"cf-chl-bypass\">checking</div>"));
        let chain = StrategyChain::new(dynv(vec![blocked]), EmptyPolicy::Stop);
        let out = chain.run("t", &FetchTarget::new("u"), None, lines).await;
        assert!(!out.succeeded);
        assert_eq!(out.failures[0].error.kind(), "anti_bot");
    }

    #[test]
    fn anti_bot_signature_is_case_insensitive() {
        assert_eq!(detect_anti_bot("<title>Please complete the CAPTCHA</title>"), Some("captcha"));
        assert_eq!(detect_anti_bot("<p>steel</p>"), None);
    }
}
