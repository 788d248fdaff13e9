// src/ingest/providers/mod.rs
//! Concrete sources. Every adapter is a [`ChainedAdapter`]: a site profile (targets +
//! parsing) driven through a [`StrategyChain`].

pub mod gc_sites;
pub mod html;
pub mod news;
pub mod reddit_api;
pub mod social;

use crate::config::PipelineConfig;
use crate::error::FetchError;
use crate::ingest::extraction::ExtractionClient;
use crate::ingest::normalize::Normalizer;
use crate::ingest::transport::{
    EmptyPolicy, FetchTarget, FetchedPage, ParsedPage, PlainHttp, RemoteExtraction, RemoteMode,
    StealthHttp, StrategyChain, TransportStrategy,
};
use crate::ingest::types::{FetchRequest, SourceAdapter, SourceAdapterResult};
use crate::ingest::{SourceBinding, SourceRegistry};
use async_trait::async_trait;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;

pub use gc_sites::GcSitesProfile;
pub use news::{NewsMode, NewsSearchProfile};
pub use reddit_api::RedditApiProfile;
pub use social::{SocialSearchProfile, SocialSite};

/// What one site looks like: which pages to ask for and how to read them.
pub trait SiteProfile: Send + Sync {
    fn source(&self) -> &str;
    fn targets(&self, req: &FetchRequest) -> Vec<FetchTarget>;
    fn parse(&self, target: &FetchTarget, page: &FetchedPage) -> Result<ParsedPage, FetchError>;
    fn required_credentials(&self) -> &[&'static str] {
        &[]
    }
}

pub(crate) fn encode_query(q: &str) -> String {
    url::form_urlencoded::byte_serialize(q.as_bytes()).collect()
}

pub struct ChainedAdapter {
    name: String,
    chain: StrategyChain,
    profile: Arc<dyn SiteProfile>,
    normalizer: Arc<Normalizer>,
}

impl ChainedAdapter {
    pub fn new(
        name: impl Into<String>,
        chain: StrategyChain,
        profile: Arc<dyn SiteProfile>,
        normalizer: Arc<Normalizer>,
    ) -> Self {
        Self {
            name: name.into(),
            chain,
            profile,
            normalizer,
        }
    }
}

#[async_trait]
impl SourceAdapter for ChainedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn required_credentials(&self) -> &[&'static str] {
        self.profile.required_credentials()
    }

    async fn fetch(&self, req: &FetchRequest) -> SourceAdapterResult {
        let t0 = std::time::Instant::now();
        let source = self.profile.source().to_string();
        let limit = if req.limit == 0 { usize::MAX } else { req.limit };

        let targets = self.profile.targets(req);
        let mut leads = Vec::new();
        let mut failures = Vec::new();
        let mut succeeded = false;

        for target in &targets {
            if leads.len() >= limit {
                break;
            }
            let out = self
                .chain
                .run(&source, target, req.proxy.as_deref(), |page| {
                    self.profile.parse(target, page)
                })
                .await;
            succeeded |= out.succeeded;
            failures.extend(out.failures);
            counter!("leads_raw_items_total", "source" => source.clone()).increment(out.items.len() as u64);
            for raw in out.items {
                if leads.len() >= limit {
                    break;
                }
                leads.push(self.normalizer.normalize(raw));
            }
        }

        tracing::debug!(
            target: "ingest",
            adapter = %self.name,
            count = leads.len(),
            targets = targets.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "adapter finished"
        );

        SourceAdapterResult::from_parts(succeeded || targets.is_empty(), leads, failures)
    }
}

fn chain(strategies: Vec<Arc<dyn TransportStrategy>>, policy: EmptyPolicy) -> StrategyChain {
    StrategyChain::new(strategies, policy)
}

/// Registry in declaration order: google_news, twitter, reddit, linkedin, gc_sites.
/// Primaries go through the remote extraction service first; fallbacks parse locally.
pub fn default_registry(
    cfg: &PipelineConfig,
    normalizer: Arc<Normalizer>,
    extraction: Arc<ExtractionClient>,
) -> SourceRegistry {
    let local_timeout = Duration::from_secs(cfg.pipeline.source_timeout_secs.clamp(5, 30));
    let schema: Arc<dyn TransportStrategy> =
        Arc::new(RemoteExtraction::new(extraction.clone(), RemoteMode::Schema));
    let render: Arc<dyn TransportStrategy> = Arc::new(RemoteExtraction::new(extraction, RemoteMode::Render));
    let plain: Arc<dyn TransportStrategy> = Arc::new(PlainHttp::new(local_timeout));
    let stealth: Arc<dyn TransportStrategy> = Arc::new(StealthHttp::new(local_timeout));

    let adapter = |name: &str, strategies: Vec<Arc<dyn TransportStrategy>>, policy, profile: Arc<dyn SiteProfile>| {
        Arc::new(ChainedAdapter::new(name, chain(strategies, policy), profile, normalizer.clone()))
            as Arc<dyn SourceAdapter>
    };

    let mut reg = SourceRegistry::new();

    // An empty schema extraction falls through to the rendered page.
    reg.register(SourceBinding::new(
        "google_news",
        adapter(
            "google_news:extraction",
            vec![schema.clone(), render.clone()],
            EmptyPolicy::TryRemaining,
            Arc::new(NewsSearchProfile::new(NewsMode::SearchPage)),
        ),
        Some(adapter(
            "google_news:rss",
            vec![plain.clone(), stealth.clone()],
            EmptyPolicy::Stop,
            Arc::new(NewsSearchProfile::new(NewsMode::Rss)),
        )),
    ));

    for site in [SocialSite::Twitter, SocialSite::Reddit, SocialSite::LinkedIn] {
        let primary = adapter(
            &format!("{}:extraction", site.source()),
            vec![schema.clone(), render.clone()],
            EmptyPolicy::TryRemaining,
            Arc::new(SocialSearchProfile::new(site)),
        );
        let fallback = match site {
            SocialSite::Reddit => adapter(
                "reddit:api",
                vec![plain.clone()],
                EmptyPolicy::Stop,
                Arc::new(RedditApiProfile::default()),
            ),
            // Search pages are script-rendered; an empty plain fetch proves nothing.
            SocialSite::Twitter => adapter(
                "twitter:html",
                vec![plain.clone(), stealth.clone()],
                EmptyPolicy::TryRemaining,
                Arc::new(SocialSearchProfile::new(site)),
            ),
            SocialSite::LinkedIn => adapter(
                "linkedin:html",
                vec![plain.clone(), stealth.clone()],
                EmptyPolicy::Stop,
                Arc::new(SocialSearchProfile::new(site)),
            ),
        };
        reg.register(SourceBinding::new(site.source(), primary, Some(fallback)));
    }

    let gc = Arc::new(GcSitesProfile::new(cfg.gc_sites.clone()));
    reg.register(SourceBinding::new(
        "gc_sites",
        adapter("gc_sites:render", vec![render], EmptyPolicy::Stop, gc.clone()),
        Some(adapter(
            "gc_sites:html",
            vec![plain, stealth],
            EmptyPolicy::TryRemaining,
            gc,
        )),
    ));

    reg
}
