// src/ingest/types.rs
use crate::error::FetchError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Opaque key/value credentials, forwarded untouched to an adapter.
pub type Credentials = BTreeMap<String, String>;

/// One scraped item before normalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawItem {
    pub source: String, // e.g. "twitter", "google_news"
    pub title: String,
    pub text: String,
    pub author: String,
    pub url: String,
    pub timestamp: Option<String>, // as scraped, any format
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeadRecord {
    /// sha256 prefix of url (or title + description when url is empty).
    pub id: String,
    pub source: String,
    pub title: String,
    pub description: String,
    pub url: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub detected_state: Option<String>,
    pub detected_project_types: Vec<String>,
    pub tags: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchRequest {
    pub keywords: Vec<String>,
    pub context_terms: Vec<String>,
    pub limit: usize,
    pub proxy: Option<String>,
    pub credentials: Credentials,
}

impl FetchRequest {
    /// `"{keyword} {context terms}"` per keyword, in keyword order.
    pub fn search_terms(&self) -> Vec<String> {
        let ctx = self.context_terms.join(" ");
        self.keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(|k| {
                if ctx.is_empty() {
                    k.to_string()
                } else {
                    format!("{k} {ctx}")
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterStatus {
    Success,
    EmptySuccess,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyFailure {
    pub strategy: String,
    pub error: FetchError,
}

impl StrategyFailure {
    pub fn new(strategy: impl Into<String>, error: FetchError) -> Self {
        Self {
            strategy: strategy.into(),
            error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceAdapterResult {
    pub status: AdapterStatus,
    pub leads: Vec<LeadRecord>,
    pub failures: Vec<StrategyFailure>,
}

impl SourceAdapterResult {
    /// `succeeded` is whether at least one strategy answered with parseable content.
    pub fn from_parts(succeeded: bool, leads: Vec<LeadRecord>, failures: Vec<StrategyFailure>) -> Self {
        let status = match (succeeded || !leads.is_empty(), leads.is_empty()) {
            (true, false) => AdapterStatus::Success,
            (true, true) => AdapterStatus::EmptySuccess,
            (false, _) => AdapterStatus::Failed,
        };
        Self {
            status,
            leads,
            failures,
        }
    }

    pub fn failed(strategy: impl Into<String>, error: FetchError) -> Self {
        Self {
            status: AdapterStatus::Failed,
            leads: Vec::new(),
            failures: vec![StrategyFailure::new(strategy, error)],
        }
    }
}

/// One external source's fetch-and-fallback unit. `fetch` never fails past its
/// boundary: every error ends up in the returned result.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Credential keys that must be present before `fetch` is worth calling.
    fn required_credentials(&self) -> &[&'static str] {
        &[]
    }

    async fn fetch(&self, req: &FetchRequest) -> SourceAdapterResult;
}
