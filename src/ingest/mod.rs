// src/ingest/mod.rs
pub mod credentials;
pub mod extraction;
pub mod normalize;
pub mod providers;
pub mod transport;
pub mod types;

use crate::error::FetchError;
use crate::ingest::credentials::CredentialStore;
use crate::ingest::types::{
    AdapterStatus, FetchRequest, LeadRecord, SourceAdapter, SourceAdapterResult, StrategyFailure,
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

pub use normalize::{clean_text, Normalizer};

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("leads_raw_items_total", "Raw items parsed from sources.");
        describe_counter!(
            "leads_parse_skipped_total",
            "Malformed items skipped during parsing."
        );
        describe_counter!(
            "leads_source_failures_total",
            "Failed source runs by source and error kind."
        );
        describe_counter!("leads_dedup_total", "Leads removed by URL deduplication.");
        describe_counter!("leads_matched_total", "Leads that passed the user filter.");
        describe_histogram!("leads_source_fetch_ms", "Adapter fetch time in milliseconds.");
        describe_counter!("proxy_probe_total", "Proxy health checks by classification.");
        describe_gauge!("leads_source_timeout_secs", "Configured per-source timeout.");
    });
}

/* ----------------------------
Registry
---------------------------- */

/// A source and its adapters: primary (remote extraction) and optional local fallback.
#[derive(Clone)]
pub struct SourceBinding {
    pub source: String,
    pub primary: Arc<dyn SourceAdapter>,
    pub fallback: Option<Arc<dyn SourceAdapter>>,
}

impl SourceBinding {
    pub fn new(
        source: impl Into<String>,
        primary: Arc<dyn SourceAdapter>,
        fallback: Option<Arc<dyn SourceAdapter>>,
    ) -> Self {
        Self {
            source: source.into(),
            primary,
            fallback,
        }
    }
}

#[derive(Clone, Default)]
pub struct SourceRegistry {
    bindings: Vec<SourceBinding>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-registering a source replaces it in place.
    pub fn register(&mut self, binding: SourceBinding) {
        match self.bindings.iter_mut().find(|b| b.source == binding.source) {
            Some(slot) => *slot = binding,
            None => self.bindings.push(binding),
        }
    }

    pub fn bindings(&self) -> &[SourceBinding] {
        &self.bindings
    }

    pub fn sources(&self) -> Vec<&str> {
        self.bindings.iter().map(|b| b.source.as_str()).collect()
    }

    pub fn get(&self, source: &str) -> Option<&SourceBinding> {
        self.bindings
            .iter()
            .find(|b| b.source.eq_ignore_ascii_case(source.trim()))
    }
}

/* ----------------------------
Orchestrator
---------------------------- */

/// One adapter invocation as reported to callers.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRun {
    pub source: String,
    pub adapter: String,
    /// 1 = primary, 2 = fallback, 0 = never ran (unknown source).
    pub tier: u8,
    pub status: AdapterStatus,
    pub records: usize,
    pub failures: Vec<StrategyFailure>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OrchestratorOutput {
    pub leads: Vec<LeadRecord>,
    pub runs: Vec<SourceRun>,
    pub duplicates_removed: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    pub max_concurrency: usize,
    pub source_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            source_timeout: Duration::from_secs(45),
        }
    }
}

pub struct Orchestrator {
    registry: Arc<SourceRegistry>,
    credentials: Arc<dyn CredentialStore>,
    settings: OrchestratorSettings,
}

struct Job {
    slot: usize,
    source: String,
    adapter: Arc<dyn SourceAdapter>,
    req: FetchRequest,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<SourceRegistry>,
        credentials: Arc<dyn CredentialStore>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            registry,
            credentials,
            settings,
        }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Run every enabled source. Never fails: unknown sources, credential gaps,
    /// timeouts and panics all end up in `runs`.
    pub async fn run(
        &self,
        enabled: &[String],
        base: &FetchRequest,
        user: &str,
        deadline: Instant,
    ) -> OrchestratorOutput {
        ensure_metrics_described();
        let mut runs = Vec::new();

        let wanted: Vec<String> = enabled
            .iter()
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        let mut reported_unknown = HashSet::new();
        for name in &wanted {
            if self.registry.get(name).is_none() && reported_unknown.insert(name.clone()) {
                tracing::warn!(target: "ingest", source = %name, "unknown source requested");
                counter!("leads_source_failures_total", "source" => name.clone(), "kind" => "unknown_source")
                    .increment(1);
                runs.push(SourceRun {
                    source: name.clone(),
                    adapter: String::new(),
                    tier: 0,
                    status: AdapterStatus::Failed,
                    records: 0,
                    failures: vec![StrategyFailure::new("resolve", FetchError::UnknownSource(name.clone()))],
                    elapsed_ms: 0,
                });
            }
        }

        // Registry declaration order, not request order.
        let selected: Vec<&SourceBinding> = self
            .registry
            .bindings()
            .iter()
            .filter(|b| wanted.iter().any(|w| b.source.eq_ignore_ascii_case(w)))
            .collect();

        let requests: Vec<FetchRequest> = selected
            .iter()
            .map(|b| FetchRequest {
                credentials: self.credentials.lookup(user, &b.source),
                ..base.clone()
            })
            .collect();

        let mut slots: Vec<Vec<LeadRecord>> = vec![Vec::new(); selected.len()];

        // Tier 1: primaries.
        let jobs = selected
            .iter()
            .enumerate()
            .map(|(i, b)| Job {
                slot: i,
                source: b.source.clone(),
                adapter: b.primary.clone(),
                req: requests[i].clone(),
            })
            .collect();
        for (slot, run, leads) in self.run_tier(jobs, 1, deadline).await {
            slots[slot] = leads;
            runs.push(run);
        }

        // Tier 2: fallbacks, only where the primary produced nothing.
        let jobs = selected
            .iter()
            .enumerate()
            .filter(|(i, _)| slots[*i].is_empty())
            .filter_map(|(i, b)| {
                b.fallback.as_ref().map(|fb| Job {
                    slot: i,
                    source: b.source.clone(),
                    adapter: fb.clone(),
                    req: requests[i].clone(),
                })
            })
            .collect();
        for (slot, run, leads) in self.run_tier(jobs, 2, deadline).await {
            slots[slot] = leads;
            runs.push(run);
        }

        let merged: Vec<LeadRecord> = slots.into_iter().flatten().collect();
        let (leads, duplicates_removed) = dedup_by_url(merged);
        counter!("leads_dedup_total").increment(duplicates_removed as u64);

        tracing::info!(
            target: "ingest",
            sources = selected.len(),
            leads = leads.len(),
            duplicates = duplicates_removed,
            "orchestrator run finished"
        );

        OrchestratorOutput {
            leads,
            runs,
            duplicates_removed,
        }
    }

    async fn run_tier(&self, jobs: Vec<Job>, tier: u8, deadline: Instant) -> Vec<(usize, SourceRun, Vec<LeadRecord>)> {
        let sem = Arc::new(Semaphore::new(self.settings.max_concurrency.max(1)));
        let source_timeout = self.settings.source_timeout;

        let mut pending: Vec<(Job, JobState)> = Vec::with_capacity(jobs.len());
        for job in jobs {
            let missing = job
                .adapter
                .required_credentials()
                .iter()
                .find(|k| job.req.credentials.get(**k).map_or(true, |v| v.trim().is_empty()))
                .copied();
            if let Some(key) = missing {
                tracing::info!(target: "ingest", source = %job.source, adapter = job.adapter.name(), key, "skipping source: missing credential");
                let res = SourceAdapterResult::failed(
                    job.adapter.name(),
                    FetchError::CredentialMissing { key: key.to_string() },
                );
                pending.push((job, JobState::Ready(res)));
                continue;
            }

            let sem = sem.clone();
            let adapter = job.adapter.clone();
            let req = job.req.clone();
            let spawned_at = Instant::now();
            let handle = tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                let started = Instant::now();
                let until = (started + source_timeout).min(deadline);
                let budget = until.saturating_duration_since(started);
                match tokio::time::timeout_at(until, adapter.fetch(&req)).await {
                    Ok(res) => res,
                    Err(_) => SourceAdapterResult::failed(
                        adapter.name(),
                        FetchError::Timeout {
                            secs: budget.as_secs_f64().ceil() as u64,
                        },
                    ),
                }
            });
            pending.push((job, JobState::Spawned(handle, spawned_at)));
        }

        let mut out = Vec::with_capacity(pending.len());
        for (job, state) in pending {
            let (res, started) = match state {
                JobState::Ready(res) => (res, Instant::now()),
                JobState::Spawned(handle, started) => {
                    let res = match handle.await {
                        Ok(res) => res,
                        Err(e) => {
                            let msg = if e.is_panic() {
                                panic_message(e.into_panic())
                            } else {
                                "task cancelled".to_string()
                            };
                            tracing::error!(target: "ingest", source = %job.source, adapter = job.adapter.name(), error = %msg, "adapter panicked");
                            SourceAdapterResult::failed(job.adapter.name(), FetchError::Panicked(msg))
                        }
                    };
                    (res, started)
                }
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            if res.status == AdapterStatus::Failed {
                for f in &res.failures {
                    counter!(
                        "leads_source_failures_total",
                        "source" => job.source.clone(),
                        "kind" => f.error.kind()
                    )
                    .increment(1);
                }
                tracing::warn!(
                    target: "ingest",
                    source = %job.source,
                    adapter = job.adapter.name(),
                    tier,
                    failures = res.failures.len(),
                    "source failed"
                );
            } else {
                tracing::info!(
                    target: "ingest",
                    source = %job.source,
                    adapter = job.adapter.name(),
                    tier,
                    count = res.leads.len(),
                    status = ?res.status,
                    "source finished"
                );
            }
            histogram!("leads_source_fetch_ms", "source" => job.source.clone()).record(elapsed_ms as f64);

            let run = SourceRun {
                source: job.source.clone(),
                adapter: job.adapter.name().to_string(),
                tier,
                status: res.status,
                records: res.leads.len(),
                failures: res.failures,
                elapsed_ms,
            };
            out.push((job.slot, run, res.leads));
        }
        out
    }
}

enum JobState {
    Ready(SourceAdapterResult),
    Spawned(tokio::task::JoinHandle<SourceAdapterResult>, Instant),
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn url_key(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// Keep the first lead per URL. Leads without a URL are never merged.
pub fn dedup_by_url(leads: Vec<LeadRecord>) -> (Vec<LeadRecord>, usize) {
    let mut seen = HashSet::new();
    let mut removed = 0usize;
    let mut keep = Vec::with_capacity(leads.len());
    for lead in leads {
        let key = url_key(&lead.url);
        if !key.is_empty() && !seen.insert(key) {
            removed += 1;
            continue;
        }
        keep.push(lead);
    }
    (keep, removed)
}
