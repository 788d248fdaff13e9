// src/lib.rs
// Public library surface for the service binary, the batch job and integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod filter;
pub mod ingest;
pub mod metrics;
pub mod patterns;
pub mod pipeline;
pub mod proxy;

// ---- Re-exports for stable public API ----
pub use crate::error::FetchError;
pub use crate::filter::{FilterEngine, UserFilter};
pub use crate::ingest::types::{LeadRecord, RawItem, SourceAdapter, SourceAdapterResult};
pub use crate::patterns::PatternTables;
pub use crate::pipeline::{Pipeline, PipelineOutcome, PipelineRequest, PipelineStatus};

use crate::ingest::credentials::{MemoryCredentialStore, DEFAULT_USER};
use anyhow::Context;
use axum::Router;
use std::sync::Arc;

/// Build the full in-process app (API routes + `/metrics`) from the default config
/// locations. Shared by the Shuttle entrypoint and HTTP tests.
pub async fn app() -> anyhow::Result<Router> {
    let cfg = config::PipelineConfig::load_default().context("load pipeline config")?;
    let tables = PatternTables::load_default().context("load pattern tables")?;
    let credentials = MemoryCredentialStore::from_env(DEFAULT_USER);

    let metrics = crate::metrics::Metrics::init(cfg.pipeline.source_timeout_secs)?;
    let state = api::AppState::from_config(&cfg, Arc::new(tables), Arc::new(credentials));

    tracing::info!(
        target: "pipeline",
        sources = ?state.pipeline.sources(),
        "app ready"
    );
    Ok(api::create_router(state).merge(metrics.router()))
}
