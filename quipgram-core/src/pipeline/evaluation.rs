use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EvaluationSection;
use crate::services::VisionScorer;

use super::executor::{Phase, PhaseExecutor, ProgressSink};
use super::types::{
    EvaluationResult, GeneratedImage, GenerationResult, ImageScore, PhaseResult, ScoreSource,
};

/// Overall scores closer than this are treated as equal.
pub const SCORE_TIE_EPSILON: f64 = 1e-9;

const SCORING_INSTRUCTION: &str = "Rate this image as an Instagram post for a sarcastic humor \
account. Reply with JSON only, using this schema: {\"aesthetic\": 1-10, \"engagement\": 1-10, \
\"technical\": 1-10, \"platform_fit\": 1-10, \"feedback\": \"...\", \"strengths\": [\"...\"], \
\"weaknesses\": [\"...\"]}";

#[derive(Debug, Deserialize)]
struct RawScore {
    aesthetic: f64,
    engagement: f64,
    technical: f64,
    platform_fit: f64,
    #[serde(default)]
    feedback: String,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    weaknesses: Vec<String>,
}

/// Reads the score schema out of a vision reply, tolerating prose or code
/// fences around the JSON object. `None` when nothing usable is found.
pub fn parse_score(image_id: Uuid, reply: &str) -> Option<ImageScore> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end <= start {
        return None;
    }
    let raw: RawScore = serde_json::from_str(&reply[start..=end]).ok()?;
    let subscores = [raw.aesthetic, raw.engagement, raw.technical, raw.platform_fit];
    if subscores.iter().any(|value| !value.is_finite()) {
        return None;
    }
    let mut score = ImageScore::new(
        image_id,
        raw.aesthetic,
        raw.engagement,
        raw.technical,
        raw.platform_fit,
        ScoreSource::Parsed,
    )
    .with_feedback(raw.feedback);
    score.strengths = raw.strengths;
    score.weaknesses = raw.weaknesses;
    Some(score)
}

/// Index of the winning image: highest overall score, ties broken by the
/// earliest `generated_at`, then by position. `scores[i]` must belong to
/// `images[i]`.
pub fn select_best(images: &[GeneratedImage], scores: &[ImageScore]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (idx, (image, score)) in images.iter().zip(scores).enumerate() {
        let Some(current) = best else {
            best = Some(idx);
            continue;
        };
        let leader = scores[current].overall_score();
        let candidate = score.overall_score();
        if candidate > leader + SCORE_TIE_EPSILON
            || ((candidate - leader).abs() <= SCORE_TIE_EPSILON
                && image.generated_at < images[current].generated_at)
        {
            best = Some(idx);
        }
    }
    best
}

pub struct ImageEvaluationPhase {
    scorer: Arc<dyn VisionScorer>,
    config: EvaluationSection,
}

impl ImageEvaluationPhase {
    pub fn new(scorer: Arc<dyn VisionScorer>, config: EvaluationSection) -> Self {
        Self { scorer, config }
    }

    async fn score_one(&self, image: &GeneratedImage) -> ImageScore {
        match self
            .scorer
            .analyze_image(&image.file_path, SCORING_INSTRUCTION)
            .await
        {
            Ok(reply) => parse_score(image.id, &reply).unwrap_or_else(|| {
                warn!(image = %image.id, "vision reply unparseable, using neutral score");
                ImageScore::uniform(image.id, self.config.neutral_score, ScoreSource::Unparseable)
                    .with_feedback("score reply could not be parsed")
            }),
            Err(err) => {
                warn!(image = %image.id, error = %err, "vision scoring failed, using floor score");
                ImageScore::uniform(image.id, self.config.floor_score, ScoreSource::CallFailed)
                    .with_feedback(format!("scoring failed: {err}"))
            }
        }
    }
}

#[async_trait]
impl PhaseExecutor for ImageEvaluationPhase {
    type Input = GenerationResult;
    type Output = EvaluationResult;

    fn phase(&self) -> Phase {
        Phase::ImageEvaluation
    }

    async fn execute(
        &self,
        input: &GenerationResult,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> PhaseResult<EvaluationResult> {
        let total = input.images.len();
        let mut scores = Vec::with_capacity(total);
        for (idx, image) in input.images.iter().enumerate() {
            progress.report(
                self.phase(),
                "score",
                &format!("scoring image {}/{}", idx + 1, total),
            );
            let score = tokio::select! {
                _ = cancel.cancelled() => None,
                score = self.score_one(image) => Some(score),
            };
            match score {
                Some(score) => scores.push(score),
                None => {
                    warn!(scored = scores.len(), total, "evaluation cancelled");
                    return match summarize(&input.images, scores) {
                        Some(partial) => PhaseResult::failure_with("cancelled", true, partial),
                        None => PhaseResult::failure("cancelled", true),
                    };
                }
            }
        }

        let Some(result) = summarize(&input.images, scores) else {
            return PhaseResult::failure("no images to evaluate", false);
        };
        let (selected, selected_score, degraded) =
            (&result.selected, &result.selected_score, result.degraded);
        info!(
            image = %selected.id,
            score = selected_score.overall_score(),
            degraded,
            "best image selected"
        );
        progress.report(
            self.phase(),
            "select",
            &format!("selected {} ({:.2})", selected.id, selected_score.overall_score()),
        );
        PhaseResult::Success(result)
    }
}

/// Picks the leader among the images scored so far; `scores` may cover only
/// a prefix of `images`.
fn summarize(images: &[GeneratedImage], scores: Vec<ImageScore>) -> Option<EvaluationResult> {
    let winner = select_best(&images[..scores.len().min(images.len())], &scores)?;
    let degraded = scores
        .iter()
        .filter(|score| score.source != ScoreSource::Parsed)
        .count();
    Some(EvaluationResult {
        selected: images[winner].clone(),
        selected_score: scores[winner].clone(),
        scores,
        degraded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::TracingProgress;
    use chrono::{Duration, TimeZone, Utc};
    use std::path::PathBuf;

    fn image(offset_secs: i64) -> GeneratedImage {
        GeneratedImage {
            id: Uuid::new_v4(),
            file_path: PathBuf::from("img.png"),
            prompt: "p".into(),
            revised_prompt: None,
            size: "1024x1024".into(),
            quality: "standard".into(),
            style: "vivid".into(),
            generated_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
                + Duration::seconds(offset_secs),
            metadata: None,
        }
    }

    fn scored(image: &GeneratedImage, value: f64) -> ImageScore {
        ImageScore::uniform(image.id, value, ScoreSource::Parsed)
    }

    #[test]
    fn ties_go_to_the_earlier_image() {
        let later = image(10);
        let earlier = image(0);
        let images = vec![later.clone(), earlier.clone()];
        let scores = vec![scored(&later, 8.5), scored(&earlier, 8.5)];
        assert_eq!(select_best(&images, &scores), Some(1));
    }

    #[test]
    fn higher_score_wins_regardless_of_order() {
        let a = image(0);
        let b = image(10);
        let forward = select_best(&[a.clone(), b.clone()], &[scored(&a, 8.5), scored(&b, 9.0)]);
        let backward = select_best(&[b.clone(), a.clone()], &[scored(&b, 9.0), scored(&a, 8.5)]);
        assert_eq!(forward, Some(1));
        assert_eq!(backward, Some(0));
    }

    #[test]
    fn empty_input_selects_nothing() {
        assert_eq!(select_best(&[], &[]), None);
    }

    #[test]
    fn parses_fenced_json_reply() {
        let id = Uuid::new_v4();
        let reply = "Sure!\n```json\n{\"aesthetic\": 8, \"engagement\": 9.5, \"technical\": 7, \
                     \"platform_fit\": 11, \"feedback\": \"punchy\", \"strengths\": [\"colour\"]}\n```";
        let score = parse_score(id, reply).unwrap();
        assert_eq!(score.image_id, id);
        assert_eq!(score.platform_fit, 10.0);
        assert_eq!(score.feedback, "punchy");
        assert_eq!(score.strengths, vec!["colour".to_string()]);
        assert!(score.weaknesses.is_empty());
        assert!((score.overall_score() - 8.625).abs() < 1e-9);
    }

    enum Reply {
        Json(f64),
        Prose,
        Fail,
        Hang,
    }

    /// Answers by file name; cancels `cancel_after_first` once a reply is served.
    struct ScriptedScorer {
        replies: Vec<(&'static str, Reply)>,
        cancel_after_first: Option<CancellationToken>,
    }

    #[async_trait]
    impl VisionScorer for ScriptedScorer {
        async fn analyze_image(
            &self,
            file_path: &std::path::Path,
            _instruction: &str,
        ) -> crate::services::ServiceResult<String> {
            let reply = self
                .replies
                .iter()
                .find(|(name, _)| file_path.ends_with(name))
                .map(|(_, reply)| reply);
            if let Some(token) = &self.cancel_after_first {
                token.cancel();
            }
            match reply {
                Some(Reply::Json(value)) => Ok(format!(
                    "Here you go: {{\"aesthetic\": {value}, \"engagement\": {value}, \
                     \"technical\": {value}, \"platform_fit\": {value}}}"
                )),
                Some(Reply::Prose) => Ok("Honestly a solid 7 out of 10.".into()),
                Some(Reply::Hang) => std::future::pending().await,
                Some(Reply::Fail) | None => Err(crate::services::ServiceError::Status {
                    status: 503,
                    body: "vision unavailable".into(),
                }),
            }
        }
    }

    fn named(name: &str, offset_secs: i64) -> GeneratedImage {
        GeneratedImage {
            file_path: PathBuf::from(name),
            ..image(offset_secs)
        }
    }

    #[tokio::test]
    async fn degraded_scores_do_not_stop_selection() {
        let images = vec![named("a.png", 0), named("b.png", 1), named("c.png", 2)];
        let phase = ImageEvaluationPhase::new(
            Arc::new(ScriptedScorer {
                replies: vec![
                    ("a.png", Reply::Fail),
                    ("b.png", Reply::Prose),
                    ("c.png", Reply::Json(6.5)),
                ],
                cancel_after_first: None,
            }),
            EvaluationSection::default(),
        );
        let input = GenerationResult {
            images: images.clone(),
            requested: 3,
            failed: 0,
        };

        let result = phase
            .execute(&input, &TracingProgress, &CancellationToken::new())
            .await
            .success()
            .unwrap();

        assert_eq!(result.scores[0].source, ScoreSource::CallFailed);
        assert_eq!(result.scores[0].overall_score(), 1.0);
        assert!(result.scores[0].feedback.contains("vision unavailable"));
        assert_eq!(result.scores[1].source, ScoreSource::Unparseable);
        assert_eq!(result.scores[1].overall_score(), 5.0);
        assert_eq!(result.degraded, 2);
        assert_eq!(result.selected.id, images[2].id);
        assert_eq!(result.selected_score.source, ScoreSource::Parsed);
    }

    #[tokio::test]
    async fn cancellation_keeps_the_scores_already_computed() {
        let cancel = CancellationToken::new();
        let images = vec![named("a.png", 0), named("b.png", 1)];
        let phase = ImageEvaluationPhase::new(
            Arc::new(ScriptedScorer {
                replies: vec![("a.png", Reply::Json(8.0)), ("b.png", Reply::Hang)],
                cancel_after_first: Some(cancel.clone()),
            }),
            EvaluationSection::default(),
        );
        let input = GenerationResult {
            images: images.clone(),
            requested: 2,
            failed: 0,
        };

        match phase.execute(&input, &TracingProgress, &cancel).await {
            PhaseResult::Failure {
                retryable, partial, ..
            } => {
                assert!(retryable);
                let partial = partial.unwrap();
                assert_eq!(partial.scores.len(), 1);
                assert_eq!(partial.selected.id, images[0].id);
                assert_eq!(partial.degraded, 0);
            }
            other => panic!("expected cancellation, got {other:?}"),
        }
    }

    #[test]
    fn prose_or_partial_json_is_not_a_score() {
        let id = Uuid::new_v4();
        assert!(parse_score(id, "Looks great, 9/10").is_none());
        assert!(parse_score(id, "{\"aesthetic\": 8}").is_none());
        assert!(parse_score(id, "} backwards {").is_none());
    }
}
