// src/ingest/providers/news.rs
use super::html::{parse_cards, CardSpec};
use super::{encode_query, SiteProfile};
use crate::error::FetchError;
use crate::ingest::extraction::{raw_from_extracted, SCHEMA_NEWS_ARTICLE};
use crate::ingest::normalize::anchored_url;
use crate::ingest::transport::{FetchTarget, FetchedPage, PageBody, ParsedPage};
use crate::ingest::types::{FetchRequest, RawItem};
use quick_xml::de::from_str;
use serde::Deserialize;

const LOCALE: &str = "hl=en-US&gl=US&ceid=US:en";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewsMode {
    /// The news search results page (extraction or rendered HTML).
    SearchPage,
    /// The RSS feed of the same search, parsed locally.
    Rss,
}

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewsSearchProfile {
    mode: NewsMode,
    cards: CardSpec,
}

impl NewsSearchProfile {
    pub fn new(mode: NewsMode) -> Self {
        Self {
            mode,
            cards: CardSpec::new(&["article"])
                .title("h3 a, h4 a")
                .link("h3 a, h4 a")
                .time("time")
                .text("p"),
        }
    }
}

impl SiteProfile for NewsSearchProfile {
    fn source(&self) -> &str {
        "google_news"
    }

    fn targets(&self, req: &FetchRequest) -> Vec<FetchTarget> {
        req.search_terms()
            .iter()
            .map(|term| {
                let q = encode_query(term);
                match self.mode {
                    NewsMode::SearchPage => {
                        FetchTarget::new(format!("https://news.google.com/search?q={q}&{LOCALE}"))
                            .with_schema(SCHEMA_NEWS_ARTICLE)
                            .wait_for("article")
                    }
                    NewsMode::Rss => {
                        FetchTarget::new(format!("https://news.google.com/rss/search?q={q}&{LOCALE}"))
                    }
                }
            })
            .collect()
    }

    fn parse(&self, target: &FetchTarget, page: &FetchedPage) -> Result<ParsedPage, FetchError> {
        match (&page.body, self.mode) {
            (PageBody::Extracted(items), _) => Ok(items
                .iter()
                .map(|v| raw_from_extracted(v, "google_news", &target.url))
                .collect()),
            (PageBody::Document(xml), NewsMode::Rss) => parse_rss(xml, &target.url),
            (PageBody::Document(html), NewsMode::SearchPage) => {
                parse_cards(html, &page.url, &self.cards, "google_news")
            }
        }
    }
}

/// RSS 2.0 items. Whole-feed XML errors fail the strategy.
pub fn parse_rss(xml: &str, feed_url: &str) -> Result<ParsedPage, FetchError> {
    let xml_clean = scrub_html_entities_for_xml(xml);
    let rss: Rss = from_str(&xml_clean).map_err(|e| FetchError::Parse(format!("rss xml: {e}")))?;

    Ok(rss
        .channel
        .item
        .into_iter()
        .map(|it| {
            let title = it.title.unwrap_or_default();
            let text = it.description.unwrap_or_default();
            if title.trim().is_empty() && text.trim().is_empty() {
                return Err(FetchError::Parse("rss item without title or description".into()));
            }
            let url = match it.link.map(|l| l.trim().to_string()) {
                Some(l) if !l.is_empty() => l,
                _ => anchored_url(feed_url, &title),
            };
            Ok(RawItem {
                source: "google_news".into(),
                title,
                text,
                author: String::new(),
                url,
                timestamp: it.pub_date,
                metadata: serde_json::Map::new(),
            })
        })
        .collect())
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rss_items_with_html_descriptions() {
        let xml = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>q</title>
<item>
  <title>Hospital tower tops out in Phoenix, AZ</title>
  <link>https://news.example/a</link>
  <pubDate>Sat, 01 Mar 2025 10:00:00 GMT</pubDate>
  <description>&lt;a href="x"&gt;Fireproofing crews&lt;/a&gt;&nbsp;next</description>
</item>
<item><title></title></item>
</channel></rss>"#;
        let items = parse_rss(xml, "https://news.google.com/rss/search?q=x").unwrap();
        assert_eq!(items.len(), 2);
        let a = items[0].as_ref().unwrap();
        assert_eq!(a.url, "https://news.example/a");
        assert!(a.text.contains("<a href=\"x\">Fireproofing crews</a>"));
        assert!(items[1].is_err());
    }

    #[test]
    fn empty_channel_is_empty_not_error() {
        let xml = "<rss><channel><title>none</title></channel></rss>";
        assert!(parse_rss(xml, "u").unwrap().is_empty());
    }

    #[test]
    fn broken_xml_fails_the_page() {
        assert_eq!(parse_rss("<rss><channel>", "u").unwrap_err().kind(), "parse");
    }
}
