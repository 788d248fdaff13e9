// src/ingest/providers/reddit_api.rs
//! Authenticated Reddit search through the OAuth JSON API.

use super::{encode_query, SiteProfile};
use crate::error::FetchError;
use crate::ingest::transport::{FetchTarget, FetchedPage, PageBody, ParsedPage};
use crate::ingest::types::{FetchRequest, RawItem};
use serde::Deserialize;

pub const ACCESS_TOKEN: &str = "access_token";
const API_BASE: &str = "https://oauth.reddit.com";

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct Post {
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    author: String,
    permalink: String,
    #[serde(default)]
    created_utc: Option<f64>,
    #[serde(default)]
    subreddit: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RedditApiProfile {
    per_query: usize,
}

impl Default for RedditApiProfile {
    fn default() -> Self {
        Self { per_query: 25 }
    }
}

impl SiteProfile for RedditApiProfile {
    fn source(&self) -> &str {
        "reddit"
    }

    fn required_credentials(&self) -> &[&'static str] {
        &[ACCESS_TOKEN]
    }

    fn targets(&self, req: &FetchRequest) -> Vec<FetchTarget> {
        let token = req
            .credentials
            .get(ACCESS_TOKEN)
            .map(|t| t.trim().to_string())
            .unwrap_or_default();
        req.search_terms()
            .iter()
            .map(|term| {
                FetchTarget::new(format!(
                    "{API_BASE}/search?q={}&sort=new&type=link&limit={}",
                    encode_query(term),
                    self.per_query
                ))
                .with_header("authorization", format!("bearer {token}"))
                .with_header("accept", "application/json")
            })
            .collect()
    }

    fn parse(&self, _target: &FetchTarget, page: &FetchedPage) -> Result<ParsedPage, FetchError> {
        let PageBody::Document(body) = &page.body else {
            return Err(FetchError::Extraction("expected a JSON listing".into()));
        };
        parse_listing(body)
    }
}

fn parse_listing(body: &str) -> Result<ParsedPage, FetchError> {
    let listing: Listing =
        serde_json::from_str(body).map_err(|e| FetchError::Parse(format!("reddit listing: {e}")))?;

    Ok(listing
        .data
        .children
        .into_iter()
        .map(|c| {
            let post: Post =
                serde_json::from_value(c.data).map_err(|e| FetchError::Parse(format!("reddit post: {e}")))?;
            let mut metadata = serde_json::Map::new();
            if let Some(sr) = post.subreddit {
                metadata.insert("subreddit".into(), sr.into());
            }
            Ok(RawItem {
                source: "reddit".into(),
                title: post.title,
                text: post.selftext,
                author: post.author,
                url: format!("https://www.reddit.com{}", post.permalink),
                timestamp: post.created_utc.map(|t| (t as i64).to_string()),
                metadata,
            })
        })
        .collect())
}
