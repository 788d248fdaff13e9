// tests/orchestrator.rs
//
// Orchestrator behavior with scripted adapters (no network):
// panic isolation, registry order, URL dedup, timeouts, two-tier fallback,
// credential gating and unknown sources.

mod common;

use common::{dyn_adapter, lead, Script, ScriptedAdapter};
use fireproof_leads::ingest::credentials::{MemoryCredentialStore, NoCredentials};
use fireproof_leads::ingest::types::{AdapterStatus, FetchRequest};
use fireproof_leads::ingest::{
    Orchestrator, OrchestratorOutput, OrchestratorSettings, SourceBinding, SourceRegistry,
};
use fireproof_leads::FetchError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn orchestrator(registry: SourceRegistry) -> Orchestrator {
    Orchestrator::new(
        Arc::new(registry),
        Arc::new(NoCredentials),
        OrchestratorSettings {
            max_concurrency: 4,
            source_timeout: Duration::from_secs(5),
        },
    )
}

fn enabled(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn request() -> FetchRequest {
    FetchRequest {
        keywords: vec!["fireproofing".into()],
        context_terms: vec!["construction".into()],
        limit: 10,
        ..Default::default()
    }
}

async fn run(orch: &Orchestrator, names: &[&str]) -> OrchestratorOutput {
    orch.run(
        &enabled(names),
        &request(),
        "default",
        Instant::now() + Duration::from_secs(60),
    )
    .await
}

fn urls(out: &OrchestratorOutput) -> Vec<&str> {
    out.leads.iter().map(|l| l.url.as_str()).collect()
}

#[tokio::test]
async fn panicking_source_does_not_break_the_run() {
    let boom = ScriptedAdapter::new("boom", Script::Panic);
    let ok = ScriptedAdapter::new(
        "ok",
        Script::Leads(vec![lead("news", "https://n/1", "Tower", "steel")]),
    );
    let mut reg = SourceRegistry::new();
    reg.register(SourceBinding::new("twitter", dyn_adapter(&boom), None));
    reg.register(SourceBinding::new("news", dyn_adapter(&ok), None));

    let out = run(&orchestrator(reg), &["twitter", "news"]).await;

    assert_eq!(urls(&out), vec!["https://n/1"]);
    let failed = out.runs.iter().find(|r| r.source == "twitter").unwrap();
    assert_eq!(failed.status, AdapterStatus::Failed);
    assert_eq!(failed.failures[0].error.kind(), "panicked");
    assert!(failed.failures[0].error.to_string().contains("exploded"));
}

#[tokio::test]
async fn results_follow_registry_order_and_dedup_keeps_first() {
    let first = ScriptedAdapter::new(
        "first",
        Script::Leads(vec![
            lead("a", "https://x/shared", "from a", ""),
            lead("a", "https://x/a-only", "a2", ""),
        ]),
    );
    let second = ScriptedAdapter::new(
        "second",
        Script::Leads(vec![
            lead("b", "https://x/b-only", "b1", ""),
            lead("b", "https://x/shared/", "from b", ""),
        ]),
    );
    let mut reg = SourceRegistry::new();
    reg.register(SourceBinding::new("a", dyn_adapter(&first), None));
    reg.register(SourceBinding::new("b", dyn_adapter(&second), None));

    // Request order is reversed on purpose.
    let out = run(&orchestrator(reg), &["b", "a"]).await;

    assert_eq!(
        urls(&out),
        vec!["https://x/shared", "https://x/a-only", "https://x/b-only"]
    );
    assert_eq!(out.duplicates_removed, 1);
    assert_eq!(out.leads[0].title, "from a");
}

#[tokio::test(start_paused = true)]
async fn slow_source_times_out_without_blocking_others() {
    let slow = ScriptedAdapter::new("slow", Script::Sleep(Duration::from_secs(600)));
    let fast = ScriptedAdapter::new(
        "fast",
        Script::Leads(vec![lead("fast", "https://f/1", "t", "")]),
    );
    let mut reg = SourceRegistry::new();
    reg.register(SourceBinding::new("slow", dyn_adapter(&slow), None));
    reg.register(SourceBinding::new("fast", dyn_adapter(&fast), None));

    let out = run(&orchestrator(reg), &["slow", "fast"]).await;

    assert_eq!(urls(&out), vec!["https://f/1"]);
    let slow_run = out.runs.iter().find(|r| r.source == "slow").unwrap();
    assert_eq!(slow_run.status, AdapterStatus::Failed);
    assert_eq!(slow_run.failures[0].error, FetchError::Timeout { secs: 5 });
}

#[tokio::test(start_paused = true)]
async fn run_deadline_caps_the_source_timeout() {
    let slow = ScriptedAdapter::new("slow", Script::Sleep(Duration::from_secs(600)));
    let mut reg = SourceRegistry::new();
    reg.register(SourceBinding::new("slow", dyn_adapter(&slow), None));
    let orch = orchestrator(reg);

    let started = Instant::now();
    let out = orch
        .run(
            &enabled(&["slow"]),
            &request(),
            "default",
            Instant::now() + Duration::from_secs(2),
        )
        .await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(out.runs[0].failures[0].error, FetchError::Timeout { secs: 2 });
}

#[tokio::test]
async fn fallback_runs_only_when_primary_is_empty() {
    let empty_primary = ScriptedAdapter::new("g:primary", Script::Empty);
    let g_fallback = ScriptedAdapter::new(
        "g:fallback",
        Script::Leads(vec![lead("g", "https://g/1", "rss item", "")]),
    );
    let good_primary = ScriptedAdapter::new(
        "t:primary",
        Script::Leads(vec![lead("t", "https://t/1", "post", "")]),
    );
    let t_fallback = ScriptedAdapter::new("t:fallback", Script::Empty);

    let mut reg = SourceRegistry::new();
    reg.register(SourceBinding::new(
        "g",
        dyn_adapter(&empty_primary),
        Some(dyn_adapter(&g_fallback)),
    ));
    reg.register(SourceBinding::new(
        "t",
        dyn_adapter(&good_primary),
        Some(dyn_adapter(&t_fallback)),
    ));

    let out = run(&orchestrator(reg), &["g", "t"]).await;

    assert_eq!(urls(&out), vec!["https://g/1", "https://t/1"]);
    assert_eq!(g_fallback.calls(), 1);
    assert_eq!(t_fallback.calls(), 0);
    let g_runs: Vec<_> = out
        .runs
        .iter()
        .filter(|r| r.source == "g")
        .map(|r| (r.tier, r.status))
        .collect();
    assert_eq!(
        g_runs,
        vec![(1, AdapterStatus::EmptySuccess), (2, AdapterStatus::Success)]
    );
}

#[tokio::test]
async fn failed_primary_falls_back() {
    let primary = ScriptedAdapter::new(
        "r:primary",
        Script::Fail(FetchError::http_status(403, "blocked")),
    );
    let fallback = ScriptedAdapter::new(
        "r:fallback",
        Script::Leads(vec![lead("r", "https://r/1", "thread", "")]),
    );
    let mut reg = SourceRegistry::new();
    reg.register(SourceBinding::new(
        "r",
        dyn_adapter(&primary),
        Some(dyn_adapter(&fallback)),
    ));

    let out = run(&orchestrator(reg), &["r"]).await;
    assert_eq!(urls(&out), vec!["https://r/1"]);
    assert_eq!(out.runs.len(), 2);
}

#[tokio::test]
async fn missing_credentials_skip_the_adapter() {
    let gated = ScriptedAdapter::requiring("linkedin:session", Script::Empty, &["li_at"]);
    let mut reg = SourceRegistry::new();
    reg.register(SourceBinding::new("linkedin", dyn_adapter(&gated), None));

    let out = run(&orchestrator(reg.clone()), &["linkedin"]).await;
    assert_eq!(gated.calls(), 0);
    assert_eq!(
        out.runs[0].failures[0].error,
        FetchError::CredentialMissing {
            key: "li_at".into()
        }
    );

    let store = MemoryCredentialStore::new();
    store.insert("alice", "linkedin", "li_at", "cookie-value");
    let orch = Orchestrator::new(
        Arc::new(reg),
        Arc::new(store),
        OrchestratorSettings::default(),
    );
    let out = orch
        .run(
            &enabled(&["linkedin"]),
            &request(),
            "alice",
            Instant::now() + Duration::from_secs(60),
        )
        .await;
    assert_eq!(out.runs[0].status, AdapterStatus::EmptySuccess);
    let seen = gated.last_request.lock().unwrap().clone().unwrap();
    assert_eq!(seen.credentials.get("li_at").map(String::as_str), Some("cookie-value"));
}

#[tokio::test]
async fn unknown_sources_are_reported_not_fatal() {
    let ok = ScriptedAdapter::new("ok", Script::Leads(vec![lead("a", "https://a/1", "t", "")]));
    let mut reg = SourceRegistry::new();
    reg.register(SourceBinding::new("a", dyn_adapter(&ok), None));

    let out = run(&orchestrator(reg), &["a", "myspace", "myspace"]).await;
    assert_eq!(out.leads.len(), 1);
    let unknown: Vec<_> = out.runs.iter().filter(|r| r.tier == 0).collect();
    assert_eq!(unknown.len(), 1);
    assert_eq!(unknown[0].failures[0].error.kind(), "unknown_source");
}
