// src/ingest/providers/gc_sites.rs
//! General-contractor project listings. One target per configured site; keywords are
//! left to the filter stage.

use super::html::{parse_cards, CardSpec, TitleFallback};
use super::SiteProfile;
use crate::config::GcSite;
use crate::error::FetchError;
use crate::ingest::extraction::raw_from_extracted;
use crate::ingest::transport::{FetchTarget, FetchedPage, PageBody, ParsedPage};
use crate::ingest::types::FetchRequest;

/// Appended after each site's own selectors.
const GENERIC_CARDS: &str = "div.project, div.card, div.item, article.project, article.card, article.item";
const MIN_CARD_TEXT: usize = 30;

#[derive(Debug, Clone)]
pub struct GcSitesProfile {
    sites: Vec<(GcSite, CardSpec)>,
}

impl GcSitesProfile {
    pub fn new(sites: Vec<GcSite>) -> Self {
        let sites = sites
            .into_iter()
            .map(|site| {
                let mut cards: Vec<&str> = site.selectors.iter().map(String::as_str).collect();
                cards.push(GENERIC_CARDS);
                let spec = CardSpec::new(&cards)
                    .title("h2, h3, h4, .title, .name")
                    .link("a[href]")
                    .title_fallback(TitleFallback::Prefix(50))
                    .min_text_len(MIN_CARD_TEXT);
                (site, spec)
            })
            .collect();
        Self { sites }
    }

    fn site_for(&self, url: &str) -> Option<&(GcSite, CardSpec)> {
        self.sites.iter().find(|(s, _)| s.url == url)
    }
}

impl SiteProfile for GcSitesProfile {
    fn source(&self) -> &str {
        "gc_sites"
    }

    fn targets(&self, _req: &FetchRequest) -> Vec<FetchTarget> {
        self.sites
            .iter()
            .map(|(site, _)| FetchTarget::new(site.url.clone()))
            .collect()
    }

    fn parse(&self, target: &FetchTarget, page: &FetchedPage) -> Result<ParsedPage, FetchError> {
        let (site, spec) = self
            .site_for(&target.url)
            .ok_or_else(|| FetchError::Parse(format!("no gc site configured for {}", target.url)))?;

        let items = match &page.body {
            PageBody::Extracted(values) => values
                .iter()
                .map(|v| raw_from_extracted(v, "gc_sites", &site.url))
                .collect(),
            PageBody::Document(html) => parse_cards(html, &site.url, spec, "gc_sites")?,
        };

        Ok(items
            .into_iter()
            .map(|r| {
                r.map(|mut raw| {
                    raw.author = site.name.clone();
                    raw.metadata
                        .insert("gc".into(), serde_json::Value::String(site.name.clone()));
                    raw
                })
            })
            .collect())
    }
}
