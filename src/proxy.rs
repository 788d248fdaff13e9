// src/proxy.rs
//! Proxy health: one plain and one secure probe per candidate, classified as
//! Healthy / Degraded / Dead. Advisory only, nothing here blocks a run.

use crate::config::ProxySection;
use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyClass {
    Healthy,
    Degraded,
    Dead,
}

impl ProxyClass {
    pub fn from_probes(plain_ok: bool, secure_ok: bool) -> Self {
        match (plain_ok, secure_ok) {
            (true, true) => Self::Healthy,
            (false, false) => Self::Dead,
            _ => Self::Degraded,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Dead => "dead",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeOutcome {
    pub ok: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxyHealth {
    pub address: String,
    pub plain: ProbeOutcome,
    pub secure: ProbeOutcome,
    pub class: ProxyClass,
}

/// Issues one GET through `proxy` and reports the HTTP status.
#[async_trait]
pub trait ProbeClient: Send + Sync {
    async fn probe(&self, proxy: &str, url: &str, timeout: Duration) -> Result<u16, String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReqwestProbe;

#[async_trait]
impl ProbeClient for ReqwestProbe {
    async fn probe(&self, proxy: &str, url: &str, timeout: Duration) -> Result<u16, String> {
        let p = reqwest::Proxy::all(proxy).map_err(|e| format!("invalid proxy: {e}"))?;
        let client = reqwest::Client::builder()
            .proxy(p)
            .timeout(timeout)
            .build()
            .map_err(|e| format!("client: {e}"))?;
        let resp = client.get(url).send().await.map_err(|e| e.to_string())?;
        Ok(resp.status().as_u16())
    }
}

/// `host:port` gets an `http://` scheme; anything with a scheme is kept.
pub fn normalize_candidate(raw: &str) -> String {
    let t = raw.trim();
    if t.contains("://") {
        t.to_string()
    } else {
        format!("http://{t}")
    }
}

#[derive(Clone)]
pub struct ProxyChecker {
    probe: Arc<dyn ProbeClient>,
    plain_url: String,
    secure_url: String,
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl ProxyChecker {
    pub fn new(probe: Arc<dyn ProbeClient>, cfg: &ProxySection) -> Self {
        Self {
            probe,
            plain_url: cfg.plain_probe_url.clone(),
            secure_url: cfg.secure_probe_url.clone(),
            timeout: Duration::from_secs(cfg.probe_timeout_secs.max(1)),
            permits: Arc::new(Semaphore::new(cfg.max_concurrent_probes.max(1))),
        }
    }

    pub fn from_config(cfg: &ProxySection) -> Self {
        Self::new(Arc::new(ReqwestProbe), cfg)
    }

    async fn timed_probe(&self, proxy: &str, url: &str) -> ProbeOutcome {
        let t0 = Instant::now();
        let res = tokio::time::timeout(self.timeout, self.probe.probe(proxy, url, self.timeout)).await;
        let latency_ms = Some(t0.elapsed().as_millis() as u64);
        match res {
            Ok(Ok(200)) => ProbeOutcome {
                ok: true,
                latency_ms,
                error: None,
            },
            Ok(Ok(status)) => ProbeOutcome {
                ok: false,
                latency_ms,
                error: Some(format!("HTTP {status}")),
            },
            Ok(Err(e)) => ProbeOutcome {
                ok: false,
                latency_ms: None,
                error: Some(e),
            },
            Err(_) => ProbeOutcome {
                ok: false,
                latency_ms: None,
                error: Some(format!("timed out after {}s", self.timeout.as_secs_f32())),
            },
        }
    }

    /// Both probes run concurrently, each under its own timeout.
    pub async fn test(&self, candidate: &str) -> ProxyHealth {
        let address = normalize_candidate(candidate);
        let (plain, secure) = tokio::join!(
            self.timed_probe(&address, &self.plain_url),
            self.timed_probe(&address, &self.secure_url)
        );
        let class = ProxyClass::from_probes(plain.ok, secure.ok);
        counter!("proxy_probe_total", "class" => class.as_str()).increment(1);
        tracing::debug!(target: "proxy", %address, class = class.as_str(), "proxy tested");
        ProxyHealth {
            address,
            plain,
            secure,
            class,
        }
    }

    /// Test at most `limit` candidates, `max_concurrent_probes` at a time; reports keep
    /// candidate order.
    pub async fn test_all(&self, candidates: &[String], limit: usize) -> Vec<ProxyHealth> {
        let mut set = JoinSet::new();
        for (i, c) in candidates.iter().take(limit).enumerate() {
            let checker = self.clone();
            let c = c.clone();
            set.spawn(async move {
                let _permit = checker.permits.clone().acquire_owned().await;
                (i, checker.test(&c).await)
            });
        }

        let mut out: Vec<(usize, ProxyHealth)> = Vec::with_capacity(set.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(pair) => out.push(pair),
                Err(e) => tracing::warn!(target: "proxy", error = %e, "proxy probe task failed"),
            }
        }
        out.sort_by_key(|(i, _)| *i);

        let healthy = out.iter().filter(|(_, h)| h.class == ProxyClass::Healthy).count();
        tracing::info!(target: "proxy", tested = out.len(), healthy, "proxy batch tested");
        out.into_iter().map(|(_, h)| h).collect()
    }
}

/* ----------------------------
Candidate lists
---------------------------- */

#[async_trait]
pub trait ProxySource: Send + Sync {
    async fn fetch_candidates(&self) -> Result<Vec<String>>;
}

/// Public list service returning one proxy per line.
pub struct HttpProxyList {
    url: String,
    client: reqwest::Client,
}

impl HttpProxyList {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ProxySource for HttpProxyList {
    async fn fetch_candidates(&self) -> Result<Vec<String>> {
        let body = self
            .client
            .get(&self.url)
            .timeout(Duration::from_secs(15))
            .send()
            .await
            .context("proxy list http get()")?
            .error_for_status()
            .context("proxy list http status")?
            .text()
            .await
            .context("proxy list http .text()")?;
        Ok(parse_proxy_list(&body))
    }
}

/// Trimmed, non-empty, non-comment lines; duplicates dropped keeping first.
pub fn parse_proxy_list(body: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for line in body.lines() {
        let t = line.trim();
        if t.is_empty() || t.starts_with('#') {
            continue;
        }
        if !out.iter().any(|x| x == t) {
            out.push(t.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_table() {
        assert_eq!(ProxyClass::from_probes(true, true), ProxyClass::Healthy);
        assert_eq!(ProxyClass::from_probes(true, false), ProxyClass::Degraded);
        assert_eq!(ProxyClass::from_probes(false, true), ProxyClass::Degraded);
        assert_eq!(ProxyClass::from_probes(false, false), ProxyClass::Dead);
    }

    #[test]
    fn list_parsing_and_candidate_scheme() {
        let body = "# free list\n1.2.3.4:8080\n\n http://5.6.7.8:3128 \n1.2.3.4:8080\n";
        assert_eq!(parse_proxy_list(body), vec!["1.2.3.4:8080", "http://5.6.7.8:3128"]);
        assert_eq!(normalize_candidate("1.2.3.4:8080"), "http://1.2.3.4:8080");
        assert_eq!(normalize_candidate("socks5://h:1"), "socks5://h:1");
    }
}
