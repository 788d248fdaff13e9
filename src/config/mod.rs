// src/config/mod.rs
pub mod pipeline;

pub use pipeline::{ExtractionSection, GcSite, PipelineConfig, PipelineSection, ProxySection};
