// src/ingest/providers/html.rs
//! Card-style HTML parsing shared by the local (non-extraction) strategies.

use crate::error::FetchError;
use crate::ingest::normalize::{anchored_url, clean_text};
use crate::ingest::transport::ParsedPage;
use crate::ingest::types::RawItem;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Where a card's title comes from when no title selector matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleFallback {
    /// First N characters of the card text.
    Prefix(usize),
    /// First line of the card text, truncated to N characters.
    FirstLine(usize),
}

/// Swappable selector set for one site layout.
#[derive(Debug, Clone)]
pub struct CardSpec {
    /// Tried in order; the first selector that yields any card wins.
    pub cards: Vec<String>,
    pub title: Option<String>,
    pub text: Option<String>,
    pub author: Option<String>,
    pub link: Option<String>,
    pub time: Option<String>,
    pub title_fallback: TitleFallback,
    /// Cards whose text is not longer than this are dropped as noise.
    pub min_text_len: usize,
}

impl CardSpec {
    pub fn new(cards: &[&str]) -> Self {
        Self {
            cards: cards.iter().map(|s| s.to_string()).collect(),
            title: None,
            text: None,
            author: None,
            link: None,
            time: None,
            title_fallback: TitleFallback::Prefix(100),
            min_text_len: 0,
        }
    }

    pub fn title(mut self, sel: &str) -> Self {
        self.title = Some(sel.into());
        self
    }
    pub fn text(mut self, sel: &str) -> Self {
        self.text = Some(sel.into());
        self
    }
    pub fn author(mut self, sel: &str) -> Self {
        self.author = Some(sel.into());
        self
    }
    pub fn link(mut self, sel: &str) -> Self {
        self.link = Some(sel.into());
        self
    }
    pub fn time(mut self, sel: &str) -> Self {
        self.time = Some(sel.into());
        self
    }
    pub fn title_fallback(mut self, f: TitleFallback) -> Self {
        self.title_fallback = f;
        self
    }
    pub fn min_text_len(mut self, n: usize) -> Self {
        self.min_text_len = n;
        self
    }
}

struct Compiled {
    title: Option<Selector>,
    text: Option<Selector>,
    author: Option<Selector>,
    link: Option<Selector>,
    time: Option<Selector>,
}

fn sel(s: &str) -> Result<Selector, FetchError> {
    Selector::parse(s).map_err(|e| FetchError::Parse(format!("bad selector `{s}`: {e}")))
}

fn opt_sel(s: &Option<String>) -> Result<Option<Selector>, FetchError> {
    s.as_deref().map(sel).transpose()
}

fn element_text(el: ElementRef<'_>) -> String {
    clean_text(&el.text().collect::<Vec<_>>().join(" "))
}

fn first_text(card: ElementRef<'_>, s: &Option<Selector>) -> Option<String> {
    let s = s.as_ref()?;
    card.select(s).map(element_text).find(|t| !t.is_empty())
}

/// Parse every card on `html` into a RawItem. Relative links resolve against `page_url`;
/// cards without one get an anchored page URL.
pub fn parse_cards(html: &str, page_url: &str, spec: &CardSpec, source: &str) -> Result<ParsedPage, FetchError> {
    let doc = Html::parse_document(html);
    let compiled = Compiled {
        title: opt_sel(&spec.title)?,
        text: opt_sel(&spec.text)?,
        author: opt_sel(&spec.author)?,
        link: opt_sel(&spec.link)?,
        time: opt_sel(&spec.time)?,
    };
    let base = Url::parse(page_url).ok();

    let mut cards: Vec<ElementRef<'_>> = Vec::new();
    for s in &spec.cards {
        let selector = sel(s)?;
        cards = doc.select(&selector).collect();
        if !cards.is_empty() {
            tracing::debug!(target: "ingest", source, selector = %s, count = cards.len(), "cards found");
            break;
        }
    }

    Ok(cards
        .into_iter()
        .map(|card| card_to_item(card, &compiled, spec, base.as_ref(), page_url, source))
        .collect())
}

fn card_to_item(
    card: ElementRef<'_>,
    c: &Compiled,
    spec: &CardSpec,
    base: Option<&Url>,
    page_url: &str,
    source: &str,
) -> Result<RawItem, FetchError> {
    let full = element_text(card);
    let text = first_text(card, &c.text).unwrap_or_else(|| full.clone());
    if text.chars().count() <= spec.min_text_len || text.is_empty() {
        return Err(FetchError::Parse(format!("card text too short ({} chars)", text.chars().count())));
    }

    let title = first_text(card, &c.title).unwrap_or_else(|| match spec.title_fallback {
        TitleFallback::Prefix(n) => text.chars().take(n).collect(),
        TitleFallback::FirstLine(n) => {
            // line structure is gone after cleaning, so use the raw text nodes
            let first = card
                .text()
                .map(str::trim)
                .find(|t| !t.is_empty())
                .unwrap_or(text.as_str());
            first.chars().take(n).collect()
        }
    });

    let href = c
        .link
        .as_ref()
        .and_then(|s| card.select(s).find_map(|a| a.value().attr("href")))
        .map(str::trim)
        .filter(|h| !h.is_empty());
    let url = match (href, base) {
        (Some(h), Some(b)) => b.join(h).map(String::from).unwrap_or_else(|_| h.to_string()),
        (Some(h), None) => h.to_string(),
        (None, _) => anchored_url(page_url, &title),
    };

    let timestamp = c.time.as_ref().and_then(|s| {
        card.select(s).next().map(|t| {
            t.value()
                .attr("datetime")
                .map(str::to_string)
                .unwrap_or_else(|| element_text(t))
        })
    });

    Ok(RawItem {
        source: source.to_string(),
        title,
        text,
        author: first_text(card, &c.author).unwrap_or_default(),
        url,
        timestamp,
        metadata: serde_json::Map::new(),
    })
}
