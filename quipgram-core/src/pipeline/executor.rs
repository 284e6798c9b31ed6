use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::types::PhaseResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    TrendAnalysis,
    ImageGeneration,
    ImageEvaluation,
    InstagramPosting,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::TrendAnalysis,
        Phase::ImageGeneration,
        Phase::ImageEvaluation,
        Phase::InstagramPosting,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::TrendAnalysis => "trend_analysis",
            Phase::ImageGeneration => "image_generation",
            Phase::ImageEvaluation => "image_evaluation",
            Phase::InstagramPosting => "instagram_posting",
        }
    }

    /// Running-state name, e.g. "analyzing_trends".
    pub fn activity(self) -> &'static str {
        match self {
            Phase::TrendAnalysis => "analyzing_trends",
            Phase::ImageGeneration => "generating_images",
            Phase::ImageEvaluation => "evaluating_images",
            Phase::InstagramPosting => "posting",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives progress notes as phases work.
pub trait ProgressSink: Send + Sync {
    fn report(&self, phase: Phase, tag: &str, message: &str);
}

/// Emits progress as `info!` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn report(&self, phase: Phase, tag: &str, message: &str) {
        info!(phase = %phase, tag, "{message}");
    }
}

/// One pipeline stage.
///
/// Implementations catch their own failures and turn them into
/// [`PhaseResult::Failure`]; nothing below this boundary reaches the
/// coordinator as an error.
#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    type Input: Send + Sync;
    type Output: Send;

    fn phase(&self) -> Phase;

    async fn execute(
        &self,
        input: &Self::Input,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> PhaseResult<Self::Output>;
}
