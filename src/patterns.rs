// src/patterns.rs
//! Pattern tables: region codes/names, project-type regexes and domain keywords.
//!
//! Tables are built once (built-in seed or TOML file), compiled into regexes and then
//! shared read-only through `Arc`. Nothing here mutates after construction.

use anyhow::{anyhow, Context, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_PATTERNS_PATH: &str = "config/patterns.toml";
pub const ENV_PATTERNS_PATH: &str = "LEADS_PATTERNS_PATH";

/* ----------------------------
Config schema (from TOML)
---------------------------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternConfig {
    #[serde(default = "seed_regions")]
    pub regions: Vec<RegionCfg>,
    #[serde(default = "seed_project_types")]
    pub project_types: Vec<ProjectTypeCfg>,
    #[serde(default = "seed_keywords")]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionCfg {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectTypeCfg {
    pub id: String,
    pub patterns: Vec<String>, // regex, matched case-insensitively
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            regions: seed_regions(),
            project_types: seed_project_types(),
            keywords: seed_keywords(),
        }
    }
}

fn seed_regions() -> Vec<RegionCfg> {
    [
        ("AL", "Alabama"),
        ("AK", "Alaska"),
        ("AZ", "Arizona"),
        ("AR", "Arkansas"),
        ("CA", "California"),
        ("CO", "Colorado"),
        ("CT", "Connecticut"),
        ("DE", "Delaware"),
        ("FL", "Florida"),
        ("GA", "Georgia"),
        ("HI", "Hawaii"),
        ("ID", "Idaho"),
        ("IL", "Illinois"),
        ("IN", "Indiana"),
        ("IA", "Iowa"),
        ("KS", "Kansas"),
        ("KY", "Kentucky"),
        ("LA", "Louisiana"),
        ("ME", "Maine"),
        ("MD", "Maryland"),
        ("MA", "Massachusetts"),
        ("MI", "Michigan"),
        ("MN", "Minnesota"),
        ("MS", "Mississippi"),
        ("MO", "Missouri"),
        ("MT", "Montana"),
        ("NE", "Nebraska"),
        ("NV", "Nevada"),
        ("NH", "New Hampshire"),
        ("NJ", "New Jersey"),
        ("NM", "New Mexico"),
        ("NY", "New York"),
        ("NC", "North Carolina"),
        ("ND", "North Dakota"),
        ("OH", "Ohio"),
        ("OK", "Oklahoma"),
        ("OR", "Oregon"),
        ("PA", "Pennsylvania"),
        ("RI", "Rhode Island"),
        ("SC", "South Carolina"),
        ("SD", "South Dakota"),
        ("TN", "Tennessee"),
        ("TX", "Texas"),
        ("UT", "Utah"),
        ("VT", "Vermont"),
        ("VA", "Virginia"),
        ("WA", "Washington"),
        ("WV", "West Virginia"),
        ("WI", "Wisconsin"),
        ("WY", "Wyoming"),
        ("DC", "District of Columbia"),
    ]
    .into_iter()
    .map(|(code, name)| RegionCfg {
        code: code.to_string(),
        name: name.to_string(),
    })
    .collect()
}

fn seed_project_types() -> Vec<ProjectTypeCfg> {
    let table: [(&str, &[&str]); 6] = [
        (
            "hospital",
            &[r"\bhospital\b", r"\bmedical center\b", r"\bhealthcare\b"],
        ),
        ("tower", &[r"\btower\b", r"\bskyscraper\b", r"\bhigh-rise\b"]),
        (
            "data_center",
            &[r"\bdata center\b", r"\bdatacenter\b", r"\bserver\b"],
        ),
        (
            "multi_story",
            &[r"\b(\d+)\s+stor(y|ies)\b", r"\bover\s+(\d+)\s+stor(y|ies)\b"],
        ),
        (
            "large_area",
            &[r"\b(\d+),?(\d+)?\s+(sq\.?\s*ft|square\s+feet|SF)\b"],
        ),
        (
            "high_value",
            &[r"\$(\d+\.?\d*)\s*million\b", r"\$(\d+\.?\d*)\s*billion\b"],
        ),
    ];
    table
        .iter()
        .map(|(id, pats)| ProjectTypeCfg {
            id: id.to_string(),
            patterns: pats.iter().map(|p| p.to_string()).collect(),
        })
        .collect()
}

fn seed_keywords() -> Vec<String> {
    [
        "fireproofing",
        "fire proofing",
        "steel fireproofing",
        "intumescent coating",
        "cementitious fireproofing",
        "spray-applied fireproofing",
        "SFRM",
        "passive fire protection",
        "fire resistant",
        "fire resistance rating",
        "fire retardant",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/* ----------------------------
Compiled tables
---------------------------- */

#[derive(Debug)]
pub struct Region {
    pub code: String,
    pub name: String,
    name_re: Regex,
    /// Regions whose own name contains this one ("Virginia" inside "West Virginia").
    shadowed_by: Vec<usize>,
}

#[derive(Debug)]
struct ProjectType {
    id: String,
    patterns: Vec<Regex>,
}

#[derive(Debug)]
struct DomainKeyword {
    term: String,
    re: Regex,
}

#[derive(Debug)]
struct PositionalPattern {
    id: &'static str,
    re: Regex,
}

#[derive(Debug)]
pub struct PatternTables {
    regions: Vec<Region>,
    by_code: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
    positional: Vec<PositionalPattern>,
    project_types: Vec<ProjectType>,
    keywords: Vec<DomainKeyword>,
}

impl PatternTables {
    pub fn default_seed() -> Result<Self> {
        Self::from_config(PatternConfig::default())
    }

    /// Load using env var + fallbacks:
    /// 1) $LEADS_PATTERNS_PATH
    /// 2) config/patterns.toml
    /// 3) built-in seed
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_PATTERNS_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_PATTERNS_PATH} points to non-existent path"));
            }
            return Self::load_from(&pb);
        }
        let fallback = PathBuf::from(DEFAULT_PATTERNS_PATH);
        if fallback.exists() {
            return Self::load_from(&fallback);
        }
        Self::default_seed()
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pattern tables from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: PatternConfig = toml::from_str(s).context("parsing pattern tables toml")?;
        Self::from_config(cfg)
    }

    pub fn from_config(cfg: PatternConfig) -> Result<Self> {
        let mut regions = Vec::with_capacity(cfg.regions.len());
        let mut by_code = HashMap::new();
        let mut by_name = HashMap::new();
        for (idx, r) in cfg.regions.iter().enumerate() {
            let code = r.code.trim().to_ascii_uppercase();
            let name = collapse_ws(&r.name);
            if code.len() != 2 || name.is_empty() {
                return Err(anyhow!("region `{}`/`{}` is not a valid entry", r.code, r.name));
            }
            let name_re = whole_word_ci(&name)
                .map_err(|e| anyhow!("region `{code}` name regex error: {e}"))?;
            by_code.insert(code.clone(), idx);
            by_name.insert(name.to_lowercase(), idx);
            regions.push(Region {
                code,
                name,
                name_re,
                shadowed_by: Vec::new(),
            });
        }

        for i in 0..regions.len() {
            let shadowed_by: Vec<usize> = (0..regions.len())
                .filter(|&j| j != i && regions[i].name_re.is_match(&regions[j].name))
                .collect();
            regions[i].shadowed_by = shadowed_by;
        }

        let positional = build_positional(&regions)?;

        let project_types = cfg
            .project_types
            .iter()
            .map(|pt| {
                let patterns = pt
                    .patterns
                    .iter()
                    .map(|p| {
                        RegexBuilder::new(p)
                            .case_insensitive(true)
                            .build()
                            .map_err(|e| anyhow!("project type `{}` regex error: {}", pt.id, e))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(ProjectType {
                    id: pt.id.clone(),
                    patterns,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let keywords = cfg
            .keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(|k| {
                let re = whole_word_ci(k).map_err(|e| anyhow!("keyword `{k}` regex error: {e}"))?;
                Ok(DomainKeyword {
                    term: k.to_string(),
                    re,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            regions,
            by_code,
            by_name,
            positional,
            project_types,
            keywords,
        })
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn region(&self, code: &str) -> Option<&Region> {
        self.by_code
            .get(&code.trim().to_ascii_uppercase())
            .map(|&i| &self.regions[i])
    }

    /// Resolve either a two-letter code or a full region name to its canonical code.
    pub fn resolve_region(&self, token: &str) -> Option<&str> {
        let t = collapse_ws(token);
        if t.len() == 2 {
            if let Some(&i) = self.by_code.get(&t.to_ascii_uppercase()) {
                return Some(&self.regions[i].code);
            }
        }
        self.by_name
            .get(&t.to_lowercase())
            .map(|&i| self.regions[i].code.as_str())
    }

    /// Positional patterns in declaration order first, then a whole-word scan of
    /// every full region name in table order.
    pub fn detect_state(&self, text: &str) -> Option<String> {
        if text.trim().is_empty() {
            return None;
        }

        for p in &self.positional {
            for caps in p.re.captures_iter(text) {
                let Some(m) = caps.get(1) else { continue };
                let token = m.as_str();
                // Code-shaped captures must be uppercase to count as a code.
                let resolved = if token.len() == 2 {
                    self.by_code.get(token).map(|&i| self.regions[i].code.clone())
                } else {
                    self.resolve_region(token).map(str::to_string)
                };
                if let Some(code) = resolved {
                    tracing::trace!(target: "ingest", pattern = p.id, %code, "state via positional pattern");
                    return Some(code);
                }
            }
        }

        self.regions
            .iter()
            .find(|region| self.name_appears(region, text))
            .map(|region| region.code.clone())
    }

    /// Whole-word, case-insensitive mention of the region's full name that is not
    /// part of a longer region name ("Virginia" inside "West Virginia" is WV's).
    pub fn mentions_region(&self, code: &str, text: &str) -> bool {
        self.region(code).is_some_and(|r| self.name_appears(r, text))
    }

    fn name_appears(&self, region: &Region, text: &str) -> bool {
        let shadows: Vec<(usize, usize)> = region
            .shadowed_by
            .iter()
            .flat_map(|&j| self.regions[j].name_re.find_iter(text))
            .map(|m| (m.start(), m.end()))
            .collect();
        region
            .name_re
            .find_iter(text)
            .any(|m| !shadows.iter().any(|&(s, e)| s <= m.start() && m.end() <= e))
    }

    /// Category ids in table order; each category appears at most once.
    pub fn detect_project_types(&self, text: &str) -> Vec<String> {
        self.project_types
            .iter()
            .filter(|pt| pt.patterns.iter().any(|re| re.is_match(text)))
            .map(|pt| pt.id.clone())
            .collect()
    }

    pub fn match_keywords(&self, text: &str) -> BTreeSet<String> {
        self.keywords
            .iter()
            .filter(|k| k.re.is_match(text))
            .map(|k| k.term.clone())
            .collect()
    }
}

fn build_positional(regions: &[Region]) -> Result<Vec<PositionalPattern>> {
    // Longest names first so "West Virginia" wins over "Virginia" at the same offset.
    let mut names: Vec<&str> = regions.iter().map(|r| r.name.as_str()).collect();
    names.sort_by_key(|n| std::cmp::Reverse(n.len()));
    let names_alt = names
        .iter()
        .map(|n| regex::escape(n).replace(' ', r"\s+"))
        .collect::<Vec<_>>()
        .join("|");

    let city = r"[A-Z][A-Za-z.'\-]*(?:\s+[A-Z][A-Za-z.'\-]*)*";
    let specs: Vec<(&'static str, String)> = vec![
        ("in_code", r"\b[Ii]n\s+([A-Z]{2})\b".to_string()),
        ("in_city_code", format!(r"\b[Ii]n\s+{city},\s*([A-Z]{{2}})\b")),
        ("city_code", format!(r"\b{city},\s*([A-Z]{{2}})\b")),
        ("located_in_name", format!(r"(?i)\blocated\s+in\s+({names_alt})\b")),
        (
            "project_in_name",
            format!(r"(?i)\b(?:project|building|facility|site)\s+in\s+({names_alt})\b"),
        ),
        ("code_project", r"\b([A-Z]{2})\s+project\b".to_string()),
    ];

    specs
        .into_iter()
        .map(|(id, pat)| {
            let re = Regex::new(&pat).map_err(|e| anyhow!("state pattern `{id}` regex error: {e}"))?;
            Ok(PositionalPattern { id, re })
        })
        .collect()
}

fn whole_word_ci(term: &str) -> std::result::Result<Regex, regex::Error> {
    let body = regex::escape(term).replace(' ', r"\s+");
    RegexBuilder::new(&format!(r"\b{body}\b"))
        .case_insensitive(true)
        .build()
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
