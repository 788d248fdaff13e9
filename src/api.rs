use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::config::PipelineConfig;
use crate::ingest::credentials::{CredentialStore, DEFAULT_USER};
use crate::patterns::PatternTables;
use crate::pipeline::{Pipeline, PipelineRequest};
use crate::proxy::{HttpProxyList, ProxyChecker, ProxyClass, ProxyHealth, ProxySource};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub proxies: ProxyChecker,
    pub proxy_list: Arc<dyn ProxySource>,
    pub proxy_test_limit: usize,
}

impl AppState {
    pub fn from_config(
        cfg: &PipelineConfig,
        tables: Arc<PatternTables>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            pipeline: Arc::new(Pipeline::from_config(cfg, tables, credentials)),
            proxies: ProxyChecker::from_config(&cfg.proxy),
            proxy_list: Arc::new(HttpProxyList::new(cfg.proxy.list_url.clone())),
            proxy_test_limit: cfg.proxy.test_limit,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/sources", get(list_sources))
        .route("/leads/run", post(run_leads))
        .route("/proxies/test", post(test_proxies))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Accepts `["CA","TX"]` as well as the stored CSV form `"CA, TX"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StringList {
    List(Vec<String>),
    Csv(String),
}

impl StringList {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::List(v) => v,
            Self::Csv(s) => s
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }
}

impl Default for StringList {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
struct RunLeadsReq {
    #[serde(default)]
    states: StringList,
    #[serde(default)]
    keywords: StringList,
    /// Absent means the configured default sources; an empty list runs nothing.
    #[serde(default)]
    sources: Option<StringList>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    proxy: Option<String>,
    #[serde(default)]
    user: Option<String>,
}

#[derive(Serialize)]
struct SourcesOut {
    sources: Vec<String>,
    defaults: Vec<String>,
}

async fn list_sources(State(state): State<AppState>) -> Json<SourcesOut> {
    Json(SourcesOut {
        sources: state.pipeline.sources().into_iter().map(String::from).collect(),
        defaults: state.pipeline.default_sources().to_vec(),
    })
}

async fn run_leads(State(state): State<AppState>, Json(body): Json<RunLeadsReq>) -> Response {
    let filter = state
        .pipeline
        .user_filter(body.states.into_vec(), body.keywords.into_vec());
    if !filter.unknown_states().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorOut {
                error: format!("unknown states: {}", filter.unknown_states().join(", ")),
            }),
        )
            .into_response();
    }
    let enabled_sources = match body.sources {
        Some(list) => list.into_vec(),
        None => state.pipeline.default_sources().to_vec(),
    };
    let req = PipelineRequest {
        enabled_sources,
        filter,
        limit_per_source: body.limit,
        proxy_override: body.proxy,
        user: body.user.unwrap_or_else(|| DEFAULT_USER.to_string()),
        deadline: None,
    };
    Json(state.pipeline.run(req).await).into_response()
}

#[derive(Debug, Default, Deserialize)]
struct ProxyTestReq {
    /// When absent the public list service is queried.
    #[serde(default)]
    candidates: Option<Vec<String>>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Serialize)]
struct ProxyTestOut {
    tested: usize,
    healthy: usize,
    results: Vec<ProxyHealth>,
}

#[derive(Serialize)]
struct ErrorOut {
    error: String,
}

async fn test_proxies(State(state): State<AppState>, Json(body): Json<ProxyTestReq>) -> Response {
    let candidates = match body.candidates {
        Some(c) => c,
        None => match state.proxy_list.fetch_candidates().await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(target: "proxy", error = ?e, "proxy list fetch failed");
                return (
                    StatusCode::BAD_GATEWAY,
                    Json(ErrorOut {
                        error: format!("{e:#}"),
                    }),
                )
                    .into_response();
            }
        },
    };
    let limit = body
        .limit
        .map_or(state.proxy_test_limit, |l| l.min(state.proxy_test_limit));
    let results = state.proxies.test_all(&candidates, limit).await;
    let healthy = results.iter().filter(|h| h.class == ProxyClass::Healthy).count();
    Json(ProxyTestOut {
        tested: results.len(),
        healthy,
        results,
    })
    .into_response()
}
