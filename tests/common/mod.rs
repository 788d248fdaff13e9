// tests/common/mod.rs
// Scripted adapters shared by the orchestrator, pipeline and HTTP tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use fireproof_leads::ingest::types::FetchRequest;
use fireproof_leads::{FetchError, LeadRecord, SourceAdapter, SourceAdapterResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn lead(source: &str, url: &str, title: &str, desc: &str) -> LeadRecord {
    LeadRecord {
        id: format!("{source}:{url}"),
        source: source.into(),
        title: title.into(),
        description: desc.into(),
        url: url.into(),
        author: String::new(),
        timestamp: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        detected_state: None,
        detected_project_types: vec![],
        tags: Default::default(),
    }
}

pub enum Script {
    Leads(Vec<LeadRecord>),
    Empty,
    Fail(FetchError),
    Panic,
    Sleep(Duration),
}

pub struct ScriptedAdapter {
    name: String,
    script: Script,
    required: &'static [&'static str],
    pub calls: AtomicUsize,
    pub last_request: Mutex<Option<FetchRequest>>,
}

impl ScriptedAdapter {
    pub fn new(name: &str, script: Script) -> Arc<Self> {
        Self::requiring(name, script, &[])
    }

    pub fn requiring(name: &str, script: Script, required: &'static [&'static str]) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            script,
            required,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn required_credentials(&self) -> &[&'static str] {
        self.required
    }

    async fn fetch(&self, req: &FetchRequest) -> SourceAdapterResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(req.clone());
        match &self.script {
            Script::Leads(l) => SourceAdapterResult::from_parts(true, l.clone(), vec![]),
            Script::Empty => SourceAdapterResult::from_parts(true, vec![], vec![]),
            Script::Fail(e) => SourceAdapterResult::failed(self.name.clone(), e.clone()),
            Script::Panic => panic!("scripted adapter {} exploded", self.name),
            Script::Sleep(d) => {
                tokio::time::sleep(*d).await;
                SourceAdapterResult::from_parts(true, vec![], vec![])
            }
        }
    }
}

pub fn dyn_adapter(a: &Arc<ScriptedAdapter>) -> Arc<dyn SourceAdapter> {
    a.clone()
}
