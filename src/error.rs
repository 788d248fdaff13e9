// src/error.rs
//! Error taxonomy for source fetches.
//!
//! Every variant is contained at the adapter boundary: adapters turn them into
//! `SourceAdapterResult` failure reasons, the orchestrator never returns them.

use serde::ser::{Serialize, SerializeStruct, Serializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Network failure or non-2xx status. Moves the chain to the next strategy.
    #[error("transport error{}: {message}", status_suffix(.status))]
    Transport {
        status: Option<u16>,
        message: String,
    },

    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Structured extraction answered but carried no usable fields.
    #[error("extraction returned no usable fields: {0}")]
    Extraction(String),

    /// One malformed item; siblings are still processed.
    #[error("malformed item: {0}")]
    Parse(String),

    /// Block/challenge page. Terminal for the strategy that hit it.
    #[error("anti-bot challenge detected ({signature})")]
    AntiBot { signature: String },

    #[error("missing credential `{key}`")]
    CredentialMissing { key: String },

    #[error("adapter panicked: {0}")]
    Panicked(String),

    #[error("unknown source `{0}`")]
    UnknownSource(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl FetchError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            status: None,
            message: message.into(),
        }
    }

    pub fn http_status(status: u16, message: impl Into<String>) -> Self {
        Self::Transport {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Stable short label used for metrics and the API failure log.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "transport",
            Self::Timeout { .. } => "timeout",
            Self::Extraction(_) => "extraction",
            Self::Parse(_) => "parse",
            Self::AntiBot { .. } => "anti_bot",
            Self::CredentialMissing { .. } => "credential_missing",
            Self::Panicked(_) => "panicked",
            Self::UnknownSource(_) => "unknown_source",
        }
    }
}

/// Serialized as `{ "kind": ..., "message": ... }` for the API failure log.
impl Serialize for FetchError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut st = serializer.serialize_struct("FetchError", 2)?;
        st.serialize_field("kind", self.kind())?;
        st.serialize_field("message", &self.to_string())?;
        st.end()
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::Transport {
                status: None,
                message: format!("request timed out: {e}"),
            };
        }
        Self::Transport {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_status_when_present() {
        let e = FetchError::http_status(503, "upstream busy");
        assert_eq!(e.to_string(), "transport error (HTTP 503): upstream busy");
        let e = FetchError::transport("connection reset");
        assert_eq!(e.to_string(), "transport error: connection reset");
    }

    #[test]
    fn anti_bot_is_its_own_kind() {
        let e = FetchError::AntiBot {
            signature: "captcha".into(),
        };
        assert_eq!(e.kind(), "anti_bot");
        assert_ne!(e.kind(), FetchError::transport("x").kind());
    }

    #[test]
    fn serializes_kind_and_message() {
        let v = serde_json::to_value(FetchError::Timeout { secs: 45 }).unwrap();
        assert_eq!(v["kind"], "timeout");
        assert_eq!(v["message"], "timed out after 45s");
    }
}
