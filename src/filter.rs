// src/filter.rs
//! Per-user lead filtering.
//!
//! A lead passes when it satisfies the state predicate AND the keyword predicate;
//! an unconstrained side always passes.

use crate::ingest::types::LeadRecord;
use crate::patterns::PatternTables;
use metrics::counter;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// A user's saved preferences. Built through the constructors so codes are canonical
/// and keywords are lowercase and unique.
///
/// State entries that resolve to no region are kept in `unknown_states`: they still
/// restrict the filter, and match nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserFilter {
    states: BTreeSet<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    unknown_states: Vec<String>,
    keywords: Vec<String>,
}

impl UserFilter {
    /// States accept codes or full names; keywords are trimmed, lowercased and
    /// deduplicated keeping first occurrence.
    pub fn new<S, K>(tables: &PatternTables, states: S, keywords: K) -> Self
    where
        S: IntoIterator,
        S::Item: AsRef<str>,
        K: IntoIterator,
        K::Item: AsRef<str>,
    {
        let mut out_states = BTreeSet::new();
        let mut unknown_states: Vec<String> = Vec::new();
        for s in states {
            let s = s.as_ref().trim();
            if s.is_empty() {
                continue;
            }
            match tables.resolve_region(s) {
                Some(code) => {
                    out_states.insert(code.to_string());
                }
                None => {
                    tracing::warn!(target: "pipeline", state = %s, "unknown state in filter");
                    if !unknown_states.iter().any(|u| u == s) {
                        unknown_states.push(s.to_string());
                    }
                }
            }
        }

        let mut out_keywords: Vec<String> = Vec::new();
        for k in keywords {
            let k = k.as_ref().trim().to_lowercase();
            if !k.is_empty() && !out_keywords.contains(&k) {
                out_keywords.push(k);
            }
        }

        Self {
            states: out_states,
            unknown_states,
            keywords: out_keywords,
        }
    }

    /// The comma-separated form the preferences store keeps (`"CA, Texas"`, `"sfrm,steel"`).
    pub fn from_csv(tables: &PatternTables, states: &str, keywords: &str) -> Self {
        Self::new(tables, states.split(','), keywords.split(','))
    }

    pub fn states(&self) -> &BTreeSet<String> {
        &self.states
    }

    /// Entries as the user typed them, in input order.
    pub fn unknown_states(&self) -> &[String] {
        &self.unknown_states
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    fn restricts_states(&self) -> bool {
        !self.states.is_empty() || !self.unknown_states.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        !self.restricts_states() && self.keywords.is_empty()
    }
}

/// A bare code counts only where it reads as a place: "in TX", "Austin, TX", "TX project".
struct StateMatcher {
    code: String,
    code_re: Regex,
}

pub struct FilterEngine {
    tables: Arc<PatternTables>,
}

impl FilterEngine {
    pub fn new(tables: Arc<PatternTables>) -> Self {
        Self { tables }
    }

    /// Stable: survivors keep their input order.
    pub fn filter(&self, leads: Vec<LeadRecord>, user: &UserFilter) -> Vec<LeadRecord> {
        if user.is_empty() {
            counter!("leads_matched_total").increment(leads.len() as u64);
            return leads;
        }

        let matchers = state_matchers(user);
        let before = leads.len();
        let kept: Vec<LeadRecord> = leads
            .into_iter()
            .filter(|l| self.state_ok(l, user, &matchers) && keyword_ok(l, user))
            .collect();

        counter!("leads_matched_total").increment(kept.len() as u64);
        tracing::debug!(target: "pipeline", before, after = kept.len(), "filter applied");
        kept
    }

    fn state_ok(&self, lead: &LeadRecord, user: &UserFilter, matchers: &[StateMatcher]) -> bool {
        if !user.restricts_states() {
            return true;
        }
        if let Some(s) = &lead.detected_state {
            if user.states.contains(s) {
                return true;
            }
        }
        let texts = [lead.title.as_str(), lead.description.as_str()];
        matchers.iter().any(|m| {
            texts
                .iter()
                .any(|t| m.code_re.is_match(t) || self.tables.mentions_region(&m.code, t))
        })
    }
}

fn state_matchers(user: &UserFilter) -> Vec<StateMatcher> {
    user.states
        .iter()
        .filter_map(|code| {
            let c = regex::escape(code);
            // Codes are ASCII letters, so the pattern is always valid.
            let code_re = Regex::new(&format!(r"(?:\b[Ii]n\s+|,\s*){c}\b|\b{c}\s+project\b")).ok()?;
            Some(StateMatcher {
                code: code.clone(),
                code_re,
            })
        })
        .collect()
}

fn keyword_ok(lead: &LeadRecord, user: &UserFilter) -> bool {
    if user.keywords.is_empty() {
        return true;
    }
    let desc = lead.description.to_lowercase();
    user.keywords.iter().any(|k| desc.contains(k.as_str()))
}
