// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health, GET /sources
// - POST /leads/run (list and CSV filters, empty source list, unknown states)
// - POST /proxies/test (explicit candidates, limit cap, list service, list failure)
// - GET /metrics on the full app()

mod common;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    Router,
};
use common::{dyn_adapter, lead, Script, ScriptedAdapter};
use fireproof_leads::api::{self, AppState};
use fireproof_leads::config::{PipelineConfig, ProxySection};
use fireproof_leads::ingest::credentials::NoCredentials;
use fireproof_leads::ingest::{SourceBinding, SourceRegistry};
use fireproof_leads::proxy::{ProbeClient, ProxyChecker, ProxySource};
use fireproof_leads::{PatternTables, Pipeline};
use http::{Request, StatusCode};
use serde_json::{json, Value as Json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt as _; // for `oneshot`

const BODY_LIMIT: usize = 1024 * 1024;

struct AlwaysOk;

#[async_trait]
impl ProbeClient for AlwaysOk {
    async fn probe(&self, _proxy: &str, _url: &str, _timeout: Duration) -> Result<u16, String> {
        Ok(200)
    }
}

struct StaticList(Option<Vec<String>>);

#[async_trait]
impl ProxySource for StaticList {
    async fn fetch_candidates(&self) -> anyhow::Result<Vec<String>> {
        self.0
            .clone()
            .ok_or_else(|| anyhow::anyhow!("list service unavailable"))
    }
}

fn test_router(list: Option<Vec<String>>) -> Router {
    let news = ScriptedAdapter::new(
        "news",
        Script::Leads(vec![
            lead(
                "google_news",
                "https://n/1",
                "Tower in San Jose, CA",
                "Fireproofing bid due Friday.",
            ),
            lead("google_news", "https://n/2", "Arena in Tulsa, OK", "Fireproofing scope."),
        ]),
    );
    let mut reg = SourceRegistry::new();
    reg.register(SourceBinding::new("google_news", dyn_adapter(&news), None));

    let mut cfg = PipelineConfig::default();
    cfg.pipeline.default_sources = vec!["google_news".into()];

    let state = AppState {
        pipeline: Arc::new(Pipeline::with_registry(
            reg,
            &cfg,
            Arc::new(PatternTables::default_seed().unwrap()),
            Arc::new(NoCredentials),
        )),
        proxies: ProxyChecker::new(Arc::new(AlwaysOk), &ProxySection::default()),
        proxy_list: Arc::new(StaticList(list)),
        proxy_test_limit: 2,
    };
    api::create_router(state)
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Json) {
    let resp = app.oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    let v = serde_json::from_slice(&bytes).unwrap_or(Json::Null);
    (status, v)
}

fn post_json(uri: &str, payload: Json) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("build request")
}

#[tokio::test]
async fn health_returns_ok() {
    let req = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let resp = test_router(None).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    assert_eq!(String::from_utf8(bytes.to_vec()).unwrap(), "OK");
}

#[tokio::test]
async fn sources_lists_registry_and_defaults() {
    let req = Request::builder()
        .uri("/sources")
        .body(Body::empty())
        .unwrap();
    let (status, v) = send(test_router(None), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["sources"], json!(["google_news"]));
    assert_eq!(v["defaults"], json!(["google_news"]));
}

#[tokio::test]
async fn run_leads_filters_with_csv_preferences() {
    let (status, v) = send(
        test_router(None),
        post_json(
            "/leads/run",
            json!({ "states": "California", "keywords": "fireproofing", "user": "alice" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["status"], "completed");
    assert_eq!(v["collected"], 2);
    let leads = v["leads"].as_array().unwrap();
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0]["url"], "https://n/1");
    assert_eq!(v["runs"][0]["source"], "google_news");
}

#[tokio::test]
async fn run_leads_with_no_sources_is_reported() {
    let (status, v) = send(
        test_router(None),
        post_json("/leads/run", json!({ "states": ["CA"], "sources": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["status"], "no_sources_enabled");
    assert_eq!(v["leads"], json!([]));
}

#[tokio::test]
async fn run_leads_rejects_unknown_states() {
    let (status, v) = send(
        test_router(None),
        post_json("/leads/run", json!({ "states": "Calfornia, TX", "keywords": "fireproofing" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(v["error"], "unknown states: Calfornia");
}

#[tokio::test]
async fn proxy_test_uses_given_candidates_up_to_limit() {
    let (status, v) = send(
        test_router(None),
        post_json(
            "/proxies/test",
            json!({ "candidates": ["1.1.1.1:80", "2.2.2.2:80", "3.3.3.3:80"], "limit": 1 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["tested"], 1);
    assert_eq!(v["healthy"], 1);
    assert_eq!(v["results"][0]["address"], "http://1.1.1.1:80");
    assert_eq!(v["results"][0]["class"], "healthy");
}

#[tokio::test]
async fn proxy_test_limit_is_capped_by_config() {
    let (status, v) = send(
        test_router(None),
        post_json(
            "/proxies/test",
            json!({ "candidates": ["1.1.1.1:80", "2.2.2.2:80", "3.3.3.3:80"], "limit": 500 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // Configured test limit is 2.
    assert_eq!(v["tested"], 2);
}

#[tokio::test]
async fn proxy_test_falls_back_to_list_service() {
    let list = vec!["9.9.9.9:3128".to_string(), "8.8.8.8:3128".into(), "7.7.7.7:3128".into()];
    let (status, v) = send(test_router(Some(list)), post_json("/proxies/test", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    // Configured test limit is 2.
    assert_eq!(v["tested"], 2);

    let (status, v) = send(test_router(None), post_json("/proxies/test", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(v["error"].as_str().unwrap().contains("unavailable"));
}

#[tokio::test]
async fn full_app_exposes_metrics() {
    let app = fireproof_leads::app().await.expect("app() should build Router in tests");
    let resp = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(
        text.contains("leads_source_timeout_secs"),
        "metrics output missing gauge:\n{text}"
    );
}
