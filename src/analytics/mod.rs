mod ollama;

use async_trait::async_trait;

use crate::camera::Snapshot;

pub use ollama::OllamaAnalyzer;

/// Substituted whenever the inference call fails, so the image still goes out.
pub const FALLBACK_DESCRIPTION: &str = "Error checking camera";

#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Short description of what the snapshot shows. Never fails.
    async fn describe(&self, snapshot: &Snapshot) -> String;
}
