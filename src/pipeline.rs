// src/pipeline.rs
//! Façade: orchestrator output through the filter engine, for the HTTP API and the
//! daily batch job.

use crate::config::{PipelineConfig, PipelineSection};
use crate::filter::{FilterEngine, UserFilter};
use crate::ingest::credentials::CredentialStore;
use crate::ingest::extraction::ExtractionClient;
use crate::ingest::normalize::Normalizer;
use crate::ingest::providers::default_registry;
use crate::ingest::types::{AdapterStatus, FetchRequest, LeadRecord};
use crate::ingest::{Orchestrator, OrchestratorSettings, SourceRegistry, SourceRun};
use crate::patterns::PatternTables;
use crate::proxy::{ProxyChecker, ProxyClass, ProxyHealth};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const MAX_CONTEXT_STATES: usize = 3;

#[derive(Debug, Clone, Default)]
pub struct PipelineRequest {
    pub enabled_sources: Vec<String>,
    pub filter: UserFilter,
    /// Falls back to the configured limit.
    pub limit_per_source: Option<usize>,
    pub proxy_override: Option<String>,
    pub user: String,
    /// Whole-run budget; falls back to the configured deadline.
    pub deadline: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Completed,
    /// Some sources failed; the others contributed.
    Partial,
    NoSourcesEnabled,
    AllSourcesFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub status: PipelineStatus,
    pub leads: Vec<LeadRecord>,
    /// Leads after merge + dedup, before filtering.
    pub collected: usize,
    pub duplicates_removed: usize,
    pub runs: Vec<SourceRun>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyHealth>,
}

impl PipelineOutcome {
    fn empty(status: PipelineStatus) -> Self {
        Self {
            status,
            leads: Vec::new(),
            collected: 0,
            duplicates_removed: 0,
            runs: Vec::new(),
            proxy: None,
        }
    }
}

pub struct Pipeline {
    orchestrator: Orchestrator,
    filter: FilterEngine,
    tables: Arc<PatternTables>,
    defaults: PipelineSection,
    proxy_checker: Option<ProxyChecker>,
}

impl Pipeline {
    /// Wire the default source registry from config.
    pub fn from_config(
        cfg: &PipelineConfig,
        tables: Arc<PatternTables>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        let normalizer = Arc::new(Normalizer::new(tables.clone()));
        let extraction = Arc::new(ExtractionClient::from_config(&cfg.extraction));
        let registry = default_registry(cfg, normalizer, extraction);
        let mut p = Self::with_registry(registry, cfg, tables, credentials);
        if cfg.proxy.check_before_run {
            p.proxy_checker = Some(ProxyChecker::from_config(&cfg.proxy));
        }
        p
    }

    pub fn with_registry(
        registry: SourceRegistry,
        cfg: &PipelineConfig,
        tables: Arc<PatternTables>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        let settings = OrchestratorSettings {
            max_concurrency: cfg.pipeline.max_concurrency,
            source_timeout: cfg.source_timeout(),
        };
        Self {
            orchestrator: Orchestrator::new(Arc::new(registry), credentials, settings),
            filter: FilterEngine::new(tables.clone()),
            tables,
            defaults: cfg.pipeline.clone(),
            proxy_checker: None,
        }
    }

    pub fn with_proxy_checker(mut self, checker: ProxyChecker) -> Self {
        self.proxy_checker = Some(checker);
        self
    }

    pub fn sources(&self) -> Vec<&str> {
        self.orchestrator.registry().sources()
    }

    pub fn default_sources(&self) -> &[String] {
        &self.defaults.default_sources
    }

    pub fn user_filter<S, K>(&self, states: S, keywords: K) -> UserFilter
    where
        S: IntoIterator,
        S::Item: AsRef<str>,
        K: IntoIterator,
        K::Item: AsRef<str>,
    {
        UserFilter::new(&self.tables, states, keywords)
    }

    /// Search keywords: the user's, or the configured defaults when they have none.
    pub fn search_keywords(&self, filter: &UserFilter) -> Vec<String> {
        if filter.keywords().is_empty() {
            self.defaults.default_keywords.clone()
        } else {
            filter.keywords().to_vec()
        }
    }

    /// Never errors; every failure is in the outcome.
    pub async fn run(&self, req: PipelineRequest) -> PipelineOutcome {
        let enabled: Vec<String> = req
            .enabled_sources
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if enabled.is_empty() {
            tracing::info!(target: "pipeline", user = %req.user, "no sources enabled");
            return PipelineOutcome::empty(PipelineStatus::NoSourcesEnabled);
        }

        let proxy = match (&self.proxy_checker, req.proxy_override.as_deref()) {
            (Some(checker), Some(p)) if !p.trim().is_empty() => {
                let health = checker.test(p).await;
                if health.class != ProxyClass::Healthy {
                    tracing::warn!(target: "pipeline", proxy = %health.address, class = health.class.as_str(), "proxy not healthy; using it anyway");
                }
                Some(health)
            }
            _ => None,
        };

        let fetch = FetchRequest {
            keywords: self.search_keywords(&req.filter),
            context_terms: context_terms(&req.filter),
            limit: req.limit_per_source.unwrap_or(self.defaults.limit_per_source),
            proxy: req.proxy_override.clone().filter(|p| !p.trim().is_empty()),
            credentials: Default::default(),
        };
        let budget = req
            .deadline
            .unwrap_or(Duration::from_secs(self.defaults.deadline_secs));
        let deadline = Instant::now() + budget;

        tracing::info!(
            target: "pipeline",
            user = %req.user,
            sources = ?enabled,
            states = ?req.filter.states(),
            keywords = ?fetch.keywords,
            "pipeline run started"
        );

        let out = self.orchestrator.run(&enabled, &fetch, &req.user, deadline).await;
        let collected = out.leads.len();
        let status = overall_status(&out.runs);
        let leads = self.filter.filter(out.leads, &req.filter);

        tracing::info!(
            target: "pipeline",
            user = %req.user,
            collected,
            matched = leads.len(),
            status = ?status,
            "pipeline run finished"
        );

        PipelineOutcome {
            status,
            leads,
            collected,
            duplicates_removed: out.duplicates_removed,
            runs: out.runs,
            proxy,
        }
    }
}

/// `construction project` plus up to three filter states, or a general set.
pub fn context_terms(filter: &UserFilter) -> Vec<String> {
    let mut terms = vec!["construction".to_string(), "project".to_string()];
    if filter.states().is_empty() {
        terms.push("building".to_string());
    } else {
        terms.extend(filter.states().iter().take(MAX_CONTEXT_STATES).cloned());
    }
    terms
}

/// A source counts by its last run (fallback when one ran).
fn overall_status(runs: &[SourceRun]) -> PipelineStatus {
    let mut last: HashMap<&str, AdapterStatus> = HashMap::new();
    for r in runs {
        last.insert(r.source.as_str(), r.status);
    }
    if last.is_empty() {
        return PipelineStatus::AllSourcesFailed;
    }
    let failed = last.values().filter(|s| **s == AdapterStatus::Failed).count();
    if failed == last.len() {
        PipelineStatus::AllSourcesFailed
    } else if failed > 0 {
        PipelineStatus::Partial
    } else {
        PipelineStatus::Completed
    }
}
