use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::TopicCandidate;

use super::compliance::ComplianceDecision;
use super::executor::Phase;

/// Outcome of one phase. The coordinator only advances on `Success`.
///
/// `partial` carries whatever the phase managed to produce before failing
/// (for posting, the engagement log) so it can be attached to the run.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseResult<T> {
    Success(T),
    Failure {
        reason: String,
        retryable: bool,
        partial: Option<T>,
    },
}

impl<T> PhaseResult<T> {
    pub fn failure(reason: impl Into<String>, retryable: bool) -> Self {
        PhaseResult::Failure {
            reason: reason.into(),
            retryable,
            partial: None,
        }
    }

    pub fn failure_with(reason: impl Into<String>, retryable: bool, partial: T) -> Self {
        PhaseResult::Failure {
            reason: reason.into(),
            retryable,
            partial: Some(partial),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PhaseResult::Success(_))
    }

    pub fn success(self) -> Option<T> {
        match self {
            PhaseResult::Success(value) => Some(value),
            PhaseResult::Failure { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrendRequest {
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    pub category: String,
    pub candidates_considered: usize,
    pub topic: TopicCandidate,
    /// 0..=100.
    pub virality_score: u8,
    pub sarcastic_angle: String,
    pub image_prompt: String,
    pub used_fallback: bool,
    pub fallback_reason: Option<String>,
    pub analyzed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub file_size_bytes: u64,
    pub width: u32,
    pub height: u32,
    pub format: String,
}

/// A rendered candidate image. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub id: Uuid,
    pub file_path: PathBuf,
    pub prompt: String,
    pub revised_prompt: Option<String>,
    pub size: String,
    pub quality: String,
    pub style: String,
    pub generated_at: DateTime<Utc>,
    pub metadata: Option<ImageMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub images: Vec<GeneratedImage>,
    pub requested: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    /// The vision reply matched the score schema.
    Parsed,
    /// A reply arrived but could not be read; neutral score applied.
    Unparseable,
    /// The vision call failed; floor score applied.
    CallFailed,
}

/// Sub-scores are clamped to [1, 10]. The overall score is derived on
/// demand and never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageScore {
    pub image_id: Uuid,
    pub aesthetic: f64,
    pub engagement: f64,
    pub technical: f64,
    pub platform_fit: f64,
    pub feedback: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub source: ScoreSource,
}

impl ImageScore {
    pub const MIN: f64 = 1.0;
    pub const MAX: f64 = 10.0;

    pub fn new(
        image_id: Uuid,
        aesthetic: f64,
        engagement: f64,
        technical: f64,
        platform_fit: f64,
        source: ScoreSource,
    ) -> Self {
        Self {
            image_id,
            aesthetic: clamp_score(aesthetic),
            engagement: clamp_score(engagement),
            technical: clamp_score(technical),
            platform_fit: clamp_score(platform_fit),
            feedback: String::new(),
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            source,
        }
    }

    /// Every sub-score set to `value`.
    pub fn uniform(image_id: Uuid, value: f64, source: ScoreSource) -> Self {
        Self::new(image_id, value, value, value, value, source)
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = feedback.into();
        self
    }

    pub fn overall_score(&self) -> f64 {
        (self.aesthetic + self.engagement + self.technical + self.platform_fit) / 4.0
    }
}

fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        ImageScore::MIN
    } else {
        value.clamp(ImageScore::MIN, ImageScore::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub scores: Vec<ImageScore>,
    pub selected: GeneratedImage,
    pub selected_score: ImageScore,
    /// Images scored with a substitute value (floor or neutral).
    pub degraded: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostingRequest {
    pub trend: TrendResult,
    pub evaluation: EvaluationResult,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementKind {
    Scroll,
    Like,
    CheckMessages,
    ReturnHome,
}

/// Audit record of one natural-looking action. Never used for control flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementAction {
    pub action_type: EngagementKind,
    pub target: Option<String>,
    pub performed_at: DateTime<Utc>,
    pub success: bool,
}

impl EngagementAction {
    pub fn now(action_type: EngagementKind, target: Option<String>, success: bool) -> Self {
        Self {
            action_type,
            target,
            performed_at: Utc::now(),
            success,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostingResult {
    pub image_id: Uuid,
    pub caption: String,
    pub hashtags: Vec<String>,
    pub caption_fallback: bool,
    pub compliance: ComplianceDecision,
    pub dry_run: bool,
    pub posted: bool,
    pub logged_in: bool,
    pub confirmation_screenshot: Option<PathBuf>,
    pub engagement: Vec<EngagementAction>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Trend analysis only, for diagnostics.
    TrendOnly,
    /// Trend analysis and image generation.
    GenerateOnly,
    /// Every phase, but posting never touches the browser.
    DryRun,
    #[default]
    Full,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::TrendOnly => "trend-only",
            RunMode::GenerateOnly => "generate-only",
            RunMode::DryRun => "dry-run",
            RunMode::Full => "full",
        }
    }

    /// Whether `phase` belongs to runs in this mode.
    pub fn includes(self, phase: Phase) -> bool {
        match self {
            RunMode::TrendOnly => phase == Phase::TrendAnalysis,
            RunMode::GenerateOnly => {
                matches!(phase, Phase::TrendAnalysis | Phase::ImageGeneration)
            }
            RunMode::DryRun | RunMode::Full => true,
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "trend-only" | "trend" => Ok(RunMode::TrendOnly),
            "generate-only" | "generate" => Ok(RunMode::GenerateOnly),
            "dry-run" | "dry" => Ok(RunMode::DryRun),
            "full" => Ok(RunMode::Full),
            other => Err(format!("unknown run mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "phase", rename_all = "snake_case")]
pub enum RunStatus {
    NotStarted,
    Running(Phase),
    Completed,
    Failed,
}

impl RunStatus {
    pub fn label(&self) -> &'static str {
        match self {
            RunStatus::NotStarted => "not_started",
            RunStatus::Running(_) => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running(phase) => write!(f, "{}", phase.activity()),
            other => f.write_str(other.label()),
        }
    }
}

/// The aggregate record of one pipeline run. Only the coordinator mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: Uuid,
    pub mode: RunMode,
    pub category: String,
    pub status: RunStatus,
    pub trend: Option<TrendResult>,
    pub generation: Option<GenerationResult>,
    pub evaluation: Option<EvaluationResult>,
    pub posting: Option<PostingResult>,
    pub error_message: Option<String>,
    pub failed_phase: Option<Phase>,
    pub failure_retryable: Option<bool>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunState {
    pub fn new(mode: RunMode, category: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            mode,
            category: category.into(),
            status: RunStatus::NotStarted,
            trend: None,
            generation: None,
            evaluation: None,
            posting: None,
            error_message: None,
            failed_phase: None,
            failure_retryable: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub(crate) fn begin(&mut self, phase: Phase) {
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        self.status = RunStatus::Running(phase);
    }

    pub(crate) fn fail(&mut self, phase: Phase, reason: impl Into<String>, retryable: bool) {
        self.status = RunStatus::Failed;
        self.failed_phase = Some(phase);
        self.error_message = Some(reason.into());
        self.failure_retryable = Some(retryable);
        self.completed_at = Some(Utc::now());
    }

    pub(crate) fn complete(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        self.status = RunStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overall_score_is_the_mean_of_clamped_subscores() {
        let score = ImageScore::new(Uuid::nil(), 12.0, 8.0, 0.0, 7.0, ScoreSource::Parsed);
        assert_eq!(score.aesthetic, 10.0);
        assert_eq!(score.technical, 1.0);
        assert!((score.overall_score() - 6.5).abs() < 1e-9);
    }

    #[test]
    fn nan_subscore_lands_on_the_floor() {
        let score = ImageScore::uniform(Uuid::nil(), f64::NAN, ScoreSource::Parsed);
        assert_eq!(score.overall_score(), ImageScore::MIN);
    }

    #[test]
    fn run_mode_parses_cli_spellings() {
        assert_eq!("dry-run".parse::<RunMode>().unwrap(), RunMode::DryRun);
        assert_eq!("TREND_ONLY".parse::<RunMode>().unwrap(), RunMode::TrendOnly);
        assert!("everything".parse::<RunMode>().is_err());
        assert!(RunMode::GenerateOnly.includes(Phase::ImageGeneration));
        assert!(!RunMode::GenerateOnly.includes(Phase::ImageEvaluation));
        assert!(RunMode::DryRun.includes(Phase::InstagramPosting));
    }

    #[test]
    fn failure_is_terminal_and_names_the_phase() {
        let mut state = RunState::new(RunMode::Full, "technology");
        state.begin(Phase::ImageGeneration);
        assert_eq!(state.status, RunStatus::Running(Phase::ImageGeneration));
        assert!(!state.is_terminal());

        state.fail(Phase::ImageGeneration, "no images", false);
        assert!(state.is_terminal());
        assert_eq!(state.failed_phase, Some(Phase::ImageGeneration));
        assert_eq!(state.error_message.as_deref(), Some("no images"));
        assert!(state.started_at.is_some() && state.completed_at.is_some());
    }

    #[test]
    fn status_round_trips_through_json_with_phase() {
        let json = serde_json::to_string(&RunStatus::Running(Phase::InstagramPosting)).unwrap();
        assert_eq!(json, r#"{"state":"running","phase":"instagram_posting"}"#);
        let completed = serde_json::to_string(&RunStatus::Completed).unwrap();
        assert_eq!(completed, r#"{"state":"completed"}"#);
    }
}
