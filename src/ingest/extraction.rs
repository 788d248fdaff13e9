// src/ingest/extraction.rs
//! Client for the remote scrape/extraction service.
//!
//! One POST per target: the service fetches the page (optionally rendering JS and
//! bypassing anti-bot walls) and either returns AI-extracted fields for a named
//! schema or the rendered HTML.

use crate::config::ExtractionSection;
use crate::error::FetchError;
use crate::ingest::normalize::anchored_url;
use crate::ingest::types::RawItem;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Extraction-schema ids understood by the service.
pub const SCHEMA_SOCIAL_POST: &str = "ai:social_media_post";
pub const SCHEMA_NEWS_ARTICLE: &str = "ai:news_article";

/// Field name the schema result is requested under.
const EXTRACT_FIELD: &str = "items";

#[derive(Debug, Serialize)]
struct ScrapeRequest<'a> {
    key: &'a str,
    url: &'a str,
    render_js: bool,
    asp: bool,
    retry_attempts: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    extract_rules: Option<BTreeMap<&'a str, &'a str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    country: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    wait_for_selector: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    proxy_pool: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    result: Option<ScrapeResult>,
}

#[derive(Debug, Deserialize)]
struct ScrapeResult {
    #[serde(default)]
    extracted: Option<Value>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutput {
    Extracted(Vec<Value>),
    Rendered(String),
}

#[derive(Debug, Clone)]
pub struct ExtractionClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    country: Option<String>,
    asp: bool,
    proxy_pool: Option<String>,
    timeout: Duration,
}

impl ExtractionClient {
    pub fn from_config(cfg: &ExtractionSection) -> Self {
        let api_key = cfg.resolved_api_key();
        if api_key.is_none() {
            tracing::info!(target: "ingest", "no extraction api key; remote strategies will report a missing credential");
        }
        Self {
            client: reqwest::Client::new(),
            endpoint: cfg.endpoint.clone(),
            api_key,
            country: cfg.country.clone(),
            asp: cfg.asp,
            proxy_pool: cfg.proxy_pool.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs.max(1)),
        }
    }

    /// `schema = Some(id)` asks for structured fields, `None` for rendered HTML.
    pub async fn scrape(
        &self,
        url: &str,
        schema: Option<&str>,
        wait_for_selector: Option<&str>,
    ) -> Result<ExtractionOutput, FetchError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| FetchError::CredentialMissing {
                key: crate::config::pipeline::ENV_EXTRACTION_KEY.to_string(),
            })?;

        let req = ScrapeRequest {
            key,
            url,
            render_js: true,
            asp: self.asp,
            retry_attempts: 3,
            extract_rules: schema.map(|s| BTreeMap::from([(EXTRACT_FIELD, s)])),
            country: self.country.as_deref(),
            wait_for_selector,
            proxy_pool: self.proxy_pool.as_deref(),
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&req)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::http_status(status.as_u16(), truncate(&body, 200)));
        }
        let body = resp.text().await?;
        parse_response(&body, schema.is_some())
    }
}

/// Decode a service response body. Malformed bodies and `success: false` are strategy
/// failures; a structured answer with no items is an empty success.
pub fn parse_response(body: &str, structured: bool) -> Result<ExtractionOutput, FetchError> {
    let resp: ScrapeResponse = serde_json::from_str(body)
        .map_err(|e| FetchError::Extraction(format!("malformed response: {e}")))?;

    if resp.success == Some(false) {
        let msg = match resp.error {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => "service reported failure".to_string(),
        };
        return Err(FetchError::Extraction(msg));
    }

    let result = resp
        .result
        .ok_or_else(|| FetchError::Extraction("response has no result".into()))?;

    if structured {
        let extracted = result
            .extracted
            .ok_or_else(|| FetchError::Extraction("no extracted fields".into()))?;
        Ok(ExtractionOutput::Extracted(flatten_extracted(extracted)))
    } else {
        match result.content {
            Some(html) if !html.trim().is_empty() => Ok(ExtractionOutput::Rendered(html)),
            _ => Err(FetchError::Extraction("no rendered content".into())),
        }
    }
}

/// Arrays pass through; objects contribute every array field they hold (in key order)
/// or, when they hold none, themselves.
pub fn flatten_extracted(v: Value) -> Vec<Value> {
    match v {
        Value::Array(items) => items,
        Value::Object(map) => {
            let has_arrays = map.values().any(Value::is_array);
            if !has_arrays {
                return if map.is_empty() {
                    Vec::new()
                } else {
                    vec![Value::Object(map)]
                };
            }
            map.into_iter()
                .filter_map(|(_, v)| match v {
                    Value::Array(items) => Some(items),
                    _ => None,
                })
                .flatten()
                .collect()
        }
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

/// Map one extracted record onto a RawItem.
pub fn raw_from_extracted(v: &Value, source: &str, fallback_url: &str) -> Result<RawItem, FetchError> {
    let obj = v
        .as_object()
        .ok_or_else(|| FetchError::Parse(format!("expected object, got {}", type_name(v))))?;

    let text = str_field(obj, &["text", "content", "description", "summary"]);
    let title = str_field(obj, &["title", "headline"]);
    if text.is_empty() && title.is_empty() {
        return Err(FetchError::Parse("record has neither title nor text".into()));
    }

    let author = match obj.get("author") {
        Some(Value::Object(a)) => str_field(a, &["name", "username"]),
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    };
    let url = {
        let u = str_field(obj, &["url", "link"]);
        if u.is_empty() {
            let label = if title.is_empty() { &text } else { &title };
            anchored_url(fallback_url, label)
        } else {
            u
        }
    };
    let timestamp = Some(str_field(obj, &["date", "published_at", "timestamp"])).filter(|s| !s.is_empty());

    let mut metadata = serde_json::Map::new();
    if let Some(Value::Object(src)) = obj.get("source") {
        if let Some(name) = src.get("name") {
            metadata.insert("publisher".into(), name.clone());
        }
    }
    metadata.insert("via".into(), Value::String("extraction".into()));

    Ok(RawItem {
        source: source.to_string(),
        title,
        text,
        author,
        url,
        timestamp,
        metadata,
    })
}

fn str_field(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_default()
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn truncate(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}
