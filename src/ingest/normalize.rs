// src/ingest/normalize.rs
//! RawItem -> LeadRecord. Pure: no I/O, only the shared pattern tables.

use crate::ingest::types::{LeadRecord, RawItem};
use crate::patterns::PatternTables;
use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

pub const UNTITLED: &str = "Untitled";
/// Cleaned text is cut to this many chars; keyword filtering never sees past it.
pub const MAX_DESCRIPTION_CHARS: usize = 4000;

/// Clean scraped text: decode entities, strip tags, ASCII quotes, collapse whitespace,
/// then cap at [`MAX_DESCRIPTION_CHARS`].
pub fn clean_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[a-z][^>]*>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    let chars = out.chars().count();
    if chars > MAX_DESCRIPTION_CHARS {
        tracing::debug!(target: "ingest", chars, kept = MAX_DESCRIPTION_CHARS, "scraped text truncated");
        out = out.chars().take(MAX_DESCRIPTION_CHARS).collect();
    }
    out
}

/// Best-effort timestamp parsing; `None` when nothing matches.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc2822) {
        return DateTime::from_timestamp(dt.unix_timestamp(), 0);
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(secs) = s.parse::<i64>() {
        // epoch millis are common in social payloads
        let secs = if secs > 100_000_000_000 { secs / 1000 } else { secs };
        return DateTime::from_timestamp(secs, 0);
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

pub fn fingerprint(url: &str, title: &str, description: &str) -> String {
    let mut h = Sha256::new();
    if url.trim().is_empty() {
        h.update(title.as_bytes());
        h.update(b"\n");
        h.update(description.as_bytes());
    } else {
        h.update(url.trim().as_bytes());
    }
    let digest = h.finalize();
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

/// `base#slug` for items scraped without their own link, so distinct items on one
/// page never share a URL.
pub fn anchored_url(base: &str, label: &str) -> String {
    let mut slug = String::new();
    for c in label.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
        if slug.len() >= 60 {
            break;
        }
    }
    let slug = slug.trim_end_matches('-');
    let base = base.split('#').next().unwrap_or(base);
    if slug.is_empty() {
        base.to_string()
    } else {
        format!("{base}#{slug}")
    }
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    tables: Arc<PatternTables>,
}

impl Normalizer {
    pub fn new(tables: Arc<PatternTables>) -> Self {
        Self { tables }
    }

    pub fn normalize(&self, raw: RawItem) -> LeadRecord {
        self.normalize_at(raw, Utc::now())
    }

    /// Same as [`normalize`](Self::normalize) with an explicit "now" for the
    /// missing/unparseable timestamp default.
    pub fn normalize_at(&self, raw: RawItem, now: DateTime<Utc>) -> LeadRecord {
        let mut title = clean_text(&raw.title);
        let description = clean_text(&raw.text);
        if title.is_empty() && description.is_empty() {
            title = UNTITLED.to_string();
        }

        let combined = format!("{title} {description}");
        let detected_state = self.tables.detect_state(&combined);
        let detected_project_types = self.tables.detect_project_types(&combined);
        let tags = self.tables.match_keywords(&combined);

        let timestamp = raw
            .timestamp
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(now);

        let url = raw.url.trim().to_string();
        LeadRecord {
            id: fingerprint(&url, &title, &description),
            source: raw.source,
            title,
            description,
            url,
            author: clean_text(&raw.author),
            timestamp,
            detected_state,
            detected_project_types,
            tags,
        }
    }
}
