// src/config/pipeline.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, path::PathBuf, time::Duration};

pub const ENV_CONFIG_PATH: &str = "LEADS_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";
pub const ENV_EXTRACTION_KEY: &str = "SCRAPFLY_API_KEY";

fn default_limit() -> usize {
    20
}
fn default_source_timeout() -> u64 {
    45
}
fn default_deadline() -> u64 {
    180
}
fn default_concurrency() -> usize {
    4
}
fn default_keywords() -> Vec<String> {
    vec![
        "fireproofing".into(),
        "steel construction".into(),
        "spray applied".into(),
    ]
}
fn default_sources() -> Vec<String> {
    vec![
        "google_news".into(),
        "twitter".into(),
        "reddit".into(),
        "linkedin".into(),
        "gc_sites".into(),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_limit")]
    pub limit_per_source: usize,
    /// Per-source budget in seconds.
    #[serde(default = "default_source_timeout")]
    pub source_timeout_secs: u64,
    /// Whole-run budget in seconds.
    #[serde(default = "default_deadline")]
    pub deadline_secs: u64,
    #[serde(default = "default_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_keywords")]
    pub default_keywords: Vec<String>,
    #[serde(default = "default_sources")]
    pub default_sources: Vec<String>,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            limit_per_source: default_limit(),
            source_timeout_secs: default_source_timeout(),
            deadline_secs: default_deadline(),
            max_concurrency: default_concurrency(),
            default_keywords: default_keywords(),
            default_sources: default_sources(),
        }
    }
}

fn default_endpoint() -> String {
    "https://api.scrapfly.io/scrape".into()
}
fn default_country() -> Option<String> {
    Some("us".into())
}
fn default_true() -> bool {
    true
}
fn default_extraction_timeout() -> u64 {
    40
}
fn default_api_key() -> Option<String> {
    Some("ENV".into())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSection {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// "ENV" (the default) means: read from SCRAPFLY_API_KEY. Empty disables extraction.
    #[serde(default = "default_api_key")]
    pub api_key: Option<String>,
    #[serde(default = "default_country")]
    pub country: Option<String>,
    /// Ask the service to bypass anti-bot protection.
    #[serde(default = "default_true")]
    pub asp: bool,
    #[serde(default)]
    pub proxy_pool: Option<String>,
    #[serde(default = "default_extraction_timeout")]
    pub timeout_secs: u64,
}

impl Default for ExtractionSection {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: default_api_key(),
            country: default_country(),
            asp: true,
            proxy_pool: None,
            timeout_secs: default_extraction_timeout(),
        }
    }
}

impl ExtractionSection {
    /// Resolve `"ENV"` against the environment. `None` means no key is available.
    pub fn resolved_api_key(&self) -> Option<String> {
        let raw = self.api_key.as_deref().map(str::trim).unwrap_or_default();
        let key = if raw.eq_ignore_ascii_case("env") {
            env::var(ENV_EXTRACTION_KEY).ok()?
        } else {
            raw.to_string()
        };
        let key = key.trim().to_string();
        (!key.is_empty()).then_some(key)
    }
}

fn default_plain_probe() -> String {
    "http://httpbin.org/ip".into()
}
fn default_secure_probe() -> String {
    "https://httpbin.org/ip".into()
}
fn default_probe_timeout() -> u64 {
    5
}
fn default_test_limit() -> usize {
    20
}
fn default_probe_concurrency() -> usize {
    8
}
fn default_list_url() -> String {
    "https://api.proxyscrape.com/v4/free-proxy-list/get?request=display_proxies&proxy_format=protocolipport&format=text".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySection {
    #[serde(default = "default_plain_probe")]
    pub plain_probe_url: String,
    #[serde(default = "default_secure_probe")]
    pub secure_probe_url: String,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_test_limit")]
    pub test_limit: usize,
    /// Probes in flight at once during a batch test.
    #[serde(default = "default_probe_concurrency")]
    pub max_concurrent_probes: usize,
    #[serde(default = "default_list_url")]
    pub list_url: String,
    /// Probe the request's proxy before a run. Advisory only.
    #[serde(default)]
    pub check_before_run: bool,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            plain_probe_url: default_plain_probe(),
            secure_probe_url: default_secure_probe(),
            probe_timeout_secs: default_probe_timeout(),
            test_limit: default_test_limit(),
            max_concurrent_probes: default_probe_concurrency(),
            list_url: default_list_url(),
            check_before_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GcSite {
    pub name: String,
    pub url: String,
    /// Card selectors tried in order; the first one that yields cards wins.
    pub selectors: Vec<String>,
}

fn default_gc_sites() -> Vec<GcSite> {
    let site = |name: &str, url: &str, sel: &[&str]| GcSite {
        name: name.into(),
        url: url.into(),
        selectors: sel.iter().map(|s| s.to_string()).collect(),
    };
    vec![
        site(
            "JE Dunn",
            "https://jedunn.com/projects",
            &[".project", ".card", ".featured-work"],
        ),
        site(
            "Turner Construction",
            "https://www.turnerconstruction.com/experience",
            &[".card", ".project", ".experience-item"],
        ),
        site(
            "Skanska",
            "https://www.usa.skanska.com/what-we-deliver/projects/",
            &[".item", ".project-card", ".grid-item"],
        ),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub extraction: ExtractionSection,
    #[serde(default)]
    pub proxy: ProxySection,
    #[serde(default = "default_gc_sites")]
    pub gc_sites: Vec<GcSite>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineSection::default(),
            extraction: ExtractionSection::default(),
            proxy: ProxySection::default(),
            gc_sites: default_gc_sites(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: PipelineConfig = toml::from_str(s).context("parsing pipeline config toml")?;
        cfg.sanitize();
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        let mut cfg = Self::from_toml_str(&content)?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Load using env var + fallbacks:
    /// 1) $LEADS_CONFIG_PATH
    /// 2) config/pipeline.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            } else {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
        }
        let fallback = PathBuf::from(DEFAULT_CONFIG_PATH);
        if fallback.exists() {
            return Self::load_from(&fallback);
        }
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<usize>("LEADS_LIMIT_PER_SOURCE") {
            self.pipeline.limit_per_source = v;
        }
        if let Some(v) = env_parse::<u64>("LEADS_SOURCE_TIMEOUT_SECS") {
            self.pipeline.source_timeout_secs = v;
        }
        self.sanitize();
    }

    fn sanitize(&mut self) {
        let p = &mut self.pipeline;
        if p.limit_per_source == 0 {
            p.limit_per_source = default_limit();
        }
        if p.source_timeout_secs == 0 {
            p.source_timeout_secs = default_source_timeout();
        }
        if p.deadline_secs == 0 {
            p.deadline_secs = default_deadline();
        }
        p.max_concurrency = p.max_concurrency.max(1);
        if self.proxy.probe_timeout_secs == 0 {
            self.proxy.probe_timeout_secs = default_probe_timeout();
        }
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline.source_timeout_secs)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.pipeline.deadline_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let cfg = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.pipeline.limit_per_source, 20);
        assert_eq!(cfg.pipeline.source_timeout_secs, 45);
        assert_eq!(cfg.proxy.probe_timeout_secs, 5);
        assert_eq!(cfg.gc_sites.len(), 3);
        assert_eq!(cfg.pipeline.default_sources[0], "google_news");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = PipelineConfig::from_toml_str(
            r#"
[pipeline]
limit_per_source = 5
max_concurrency = 0

[extraction]
api_key = "literal-key"

[[gc_sites]]
name = "Acme"
url = "https://acme.example/projects"
selectors = [".tile"]
"#,
        )
        .unwrap();
        assert_eq!(cfg.pipeline.limit_per_source, 5);
        assert_eq!(cfg.pipeline.max_concurrency, 1);
        assert_eq!(cfg.pipeline.deadline_secs, 180);
        assert_eq!(cfg.extraction.resolved_api_key().as_deref(), Some("literal-key"));
        assert_eq!(cfg.gc_sites.len(), 1);
    }

    #[test]
    fn blank_key_is_none() {
        let s = ExtractionSection {
            api_key: Some("  ".into()),
            ..Default::default()
        };
        assert!(s.resolved_api_key().is_none());
    }
}
