//! Runs the pipeline once for one filter and prints the outcome as JSON.
//!
//! Every flag falls back to its env var when absent (flags win).

use anyhow::{bail, Result};
use clap::Parser;
use fireproof_leads::config::PipelineConfig;
use fireproof_leads::ingest::credentials::{MemoryCredentialStore, DEFAULT_USER};
use fireproof_leads::{PatternTables, Pipeline, PipelineRequest, PipelineStatus, UserFilter};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "daily_pipeline")]
#[command(about = "Collect construction leads for one filter and print them as JSON")]
struct Cli {
    /// Comma-separated state codes or names, e.g. `CA,Texas`
    #[arg(long, env = "LEADS_STATES", default_value = "")]
    states: String,

    /// Comma-separated keywords matched against lead descriptions
    #[arg(long, env = "LEADS_KEYWORDS", default_value = "")]
    keywords: String,

    /// Comma-separated source names; configured defaults when absent
    #[arg(long, env = "LEADS_SOURCES")]
    sources: Option<String>,

    /// Credential lookup key
    #[arg(long, env = "LEADS_USER", default_value = DEFAULT_USER)]
    user: String,
}

impl Cli {
    fn enabled_sources(&self, defaults: &[String]) -> Vec<String> {
        match self.sources.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(csv) => csv.split(',').map(|s| s.trim().to_string()).collect(),
            None => defaults.to_vec(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = PipelineConfig::load_default()?;
    let tables = Arc::new(PatternTables::load_default()?);
    let credentials = Arc::new(MemoryCredentialStore::from_env(&cli.user));

    let filter = UserFilter::from_csv(&tables, &cli.states, &cli.keywords);
    if !filter.unknown_states().is_empty() {
        bail!("unknown states: {}", filter.unknown_states().join(", "));
    }
    let enabled_sources = cli.enabled_sources(&cfg.pipeline.default_sources);

    let pipeline = Pipeline::from_config(&cfg, tables, credentials);
    let outcome = pipeline
        .run(PipelineRequest {
            enabled_sources,
            filter,
            user: cli.user,
            ..Default::default()
        })
        .await;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if outcome.status == PipelineStatus::AllSourcesFailed {
        bail!("every source failed");
    }
    Ok(())
}
