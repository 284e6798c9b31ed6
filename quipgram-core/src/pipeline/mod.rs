mod compliance;
mod coordinator;
mod evaluation;
mod executor;
mod generation;
mod posting;
mod trend;
mod types;

pub use compliance::{ComplianceDecision, ComplianceGate};
pub use coordinator::{
    EvaluationExecutor, GenerationExecutor, PipelineCoordinator, PostingExecutor, TrendExecutor,
};
pub use evaluation::{parse_score, select_best, ImageEvaluationPhase, SCORE_TIE_EPSILON};
pub use executor::{Phase, PhaseExecutor, ProgressSink, TracingProgress};
pub use generation::ImageGenerationPhase;
pub use posting::{
    extract_hashtags, merge_hashtags, Caption, InstagramPostingPhase, PostingSelectors,
};
pub use trend::{parse_topic_selection, TopicSelection, TrendAnalysisPhase};
pub use types::{
    EngagementAction, EngagementKind, EvaluationResult, GeneratedImage, GenerationResult,
    ImageMetadata, ImageScore, PhaseResult, PostingRequest, PostingResult, RunMode, RunState,
    RunStatus, ScoreSource, TrendRequest, TrendResult,
};
