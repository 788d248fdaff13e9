// src/ingest/providers/social.rs
//! Public social search pages (Twitter/X, Reddit, LinkedIn).

use super::html::{parse_cards, CardSpec, TitleFallback};
use super::{encode_query, SiteProfile};
use crate::error::FetchError;
use crate::ingest::extraction::{raw_from_extracted, SCHEMA_SOCIAL_POST};
use crate::ingest::transport::{FetchTarget, FetchedPage, PageBody, ParsedPage};
use crate::ingest::types::FetchRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocialSite {
    Twitter,
    Reddit,
    LinkedIn,
}

impl SocialSite {
    pub fn source(&self) -> &'static str {
        match self {
            Self::Twitter => "twitter",
            Self::Reddit => "reddit",
            Self::LinkedIn => "linkedin",
        }
    }

    fn search_url(&self, q: &str) -> String {
        let q = encode_query(q);
        match self {
            Self::Twitter => format!("https://twitter.com/search?q={q}&src=typed_query&f=live"),
            Self::Reddit => format!("https://www.reddit.com/search/?q={q}&sort=new"),
            Self::LinkedIn => format!(
                "https://www.linkedin.com/search/results/content/?keywords={q}&origin=GLOBAL_SEARCH_HEADER"
            ),
        }
    }

    fn wait_for(&self) -> &'static str {
        match self {
            Self::Twitter => "article[data-testid='tweet']",
            Self::Reddit => "div[data-testid='post-container']",
            Self::LinkedIn => ".feed-shared-update-v2",
        }
    }

    fn card_spec(&self) -> CardSpec {
        match self {
            Self::Twitter => CardSpec::new(&["article[data-testid='tweet']"])
                .text("div[data-testid='tweetText']")
                .author("div[data-testid='User-Name'] a")
                .link("a[href*='/status/']")
                .time("time")
                .title_fallback(TitleFallback::Prefix(100)),
            Self::Reddit => CardSpec::new(&["div[data-testid='post-container']", "shreddit-post"])
                .title("h3")
                .text("div[data-testid='post-content']")
                .author("a[data-testid='post_author_link']")
                .link("a[data-testid='title-link']")
                .time("time"),
            Self::LinkedIn => CardSpec::new(&[".feed-shared-update-v2"])
                .text(".feed-shared-update-v2__description, .feed-shared-text")
                .author(".update-components-actor__name, .feed-shared-actor__name")
                .link("a.app-aware-link")
                .time("time")
                .title_fallback(TitleFallback::FirstLine(100)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SocialSearchProfile {
    site: SocialSite,
    spec: CardSpec,
}

impl SocialSearchProfile {
    pub fn new(site: SocialSite) -> Self {
        Self {
            site,
            spec: site.card_spec(),
        }
    }
}

impl SiteProfile for SocialSearchProfile {
    fn source(&self) -> &str {
        self.site.source()
    }

    fn targets(&self, req: &FetchRequest) -> Vec<FetchTarget> {
        let cookie = match self.site {
            SocialSite::LinkedIn => req
                .credentials
                .get("li_at")
                .filter(|v| !v.trim().is_empty())
                .map(|v| format!("li_at={}", v.trim())),
            _ => None,
        };
        req.search_terms()
            .iter()
            .map(|term| {
                let mut t = FetchTarget::new(self.site.search_url(term))
                    .with_schema(SCHEMA_SOCIAL_POST)
                    .wait_for(self.site.wait_for());
                if let Some(c) = &cookie {
                    t = t.with_header("cookie", c.clone());
                }
                t
            })
            .collect()
    }

    fn parse(&self, target: &FetchTarget, page: &FetchedPage) -> Result<ParsedPage, FetchError> {
        let source = self.site.source();
        match &page.body {
            PageBody::Extracted(items) => Ok(items
                .iter()
                .map(|v| raw_from_extracted(v, source, &target.url))
                .collect()),
            PageBody::Document(html) => parse_cards(html, &page.url, &self.spec, source),
        }
    }
}
