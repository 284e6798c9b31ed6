//! Contracts for the remote collaborators the pipeline talks to.
//!
//! The core depends only on these traits. [`OpenAiClient`] and
//! [`FileTopicSource`] are the shipped implementations; tests substitute
//! in-memory doubles.

mod openai;
mod topics;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use openai::OpenAiClient;
pub use topics::FileTopicSource;

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("missing credential: environment variable {0} is not set")]
    MissingCredential(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicCandidate {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub url: Option<String>,
}

impl TopicCandidate {
    /// A candidate with no title carries nothing to write about.
    pub fn is_usable(&self) -> bool {
        !self.title.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRequest {
    pub prompt: String,
    pub size: String,
    pub quality: String,
    pub style: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImage {
    pub file_path: PathBuf,
    pub revised_prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySeverity {
    pub category: String,
    /// 0 (safe) to 6 (severe).
    pub severity: u8,
}

#[async_trait]
pub trait TopicSource: Send + Sync {
    async fn fetch_candidates(
        &self,
        category: &str,
        max: usize,
    ) -> ServiceResult<Vec<TopicCandidate>>;
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> ServiceResult<String>;
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, request: &ImageRequest) -> ServiceResult<RenderedImage>;
}

#[async_trait]
pub trait VisionScorer: Send + Sync {
    async fn analyze_image(&self, file_path: &Path, instruction: &str) -> ServiceResult<String>;
}

#[async_trait]
pub trait ContentSafety: Send + Sync {
    async fn analyze_text(&self, text: &str) -> ServiceResult<Vec<CategorySeverity>>;
}
