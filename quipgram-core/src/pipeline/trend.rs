use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::TrendSection;
use crate::services::{TextGenerator, TopicCandidate, TopicSource};

use super::executor::{Phase, PhaseExecutor, ProgressSink};
use super::types::{PhaseResult, TrendRequest, TrendResult};

const DEFAULT_VIRALITY: u8 = 50;

const SELECTION_SYSTEM_PROMPT: &str = "You pick trending topics for a sarcastic humor account. \
Answer using exactly these labelled lines:\n\
Selected Topic: <title copied from the list>\n\
Virality Score: <0-100>\n\
Sarcastic Angle: <one sentence>\n\
Image Prompt: <one sentence describing a single striking image, no text in the image>";

/// What the topic-selection reply said, as far as it could be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicSelection {
    Parsed {
        topic: String,
        virality: Option<u8>,
        angle: Option<String>,
        image_prompt: Option<String>,
    },
    Unparseable {
        reason: String,
    },
}

/// Reads a labelled-line reply (`Selected Topic:`, `Virality Score:`,
/// `Sarcastic Angle:` or `Angle:`, `Image Prompt:`).
///
/// Labels are case-insensitive and may carry list or bold markers. Only the
/// topic line is required.
pub fn parse_topic_selection(reply: &str) -> TopicSelection {
    let mut topic = None;
    let mut virality = None;
    let mut angle = None;
    let mut image_prompt = None;

    for line in reply.lines() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let label = label
            .trim()
            .trim_start_matches(['-', '*', '#', ' '])
            .trim_end_matches('*')
            .trim()
            .to_ascii_lowercase();
        let value = value.trim().trim_matches('*').trim();
        if value.is_empty() {
            continue;
        }
        match label.as_str() {
            "selected topic" | "topic" => topic = topic.or(Some(value.to_string())),
            "virality score" | "virality" => virality = virality.or(parse_virality(value)),
            "sarcastic angle" | "angle" => angle = angle.or(Some(value.to_string())),
            "image prompt" => image_prompt = image_prompt.or(Some(value.to_string())),
            _ => {}
        }
    }

    match topic {
        Some(topic) => TopicSelection::Parsed {
            topic: topic.trim_matches('"').to_string(),
            virality,
            angle,
            image_prompt,
        },
        None => TopicSelection::Unparseable {
            reason: "reply has no 'Selected Topic:' line".into(),
        },
    }
}

/// Accepts `80`, `80/100` and `80%`; out-of-range values are clamped.
fn parse_virality(value: &str) -> Option<u8> {
    let digits: String = value
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let parsed: f64 = digits.parse().ok()?;
    Some(parsed.clamp(0.0, 100.0).round() as u8)
}

pub struct TrendAnalysisPhase {
    topics: Arc<dyn TopicSource>,
    text: Arc<dyn TextGenerator>,
    config: TrendSection,
}

impl TrendAnalysisPhase {
    pub fn new(
        topics: Arc<dyn TopicSource>,
        text: Arc<dyn TextGenerator>,
        config: TrendSection,
    ) -> Self {
        Self {
            topics,
            text,
            config,
        }
    }

    fn evergreen(&self, category: &str, reason: String) -> TrendResult {
        warn!(category, reason = %reason, "falling back to evergreen topic");
        let topic = TopicCandidate {
            title: self.config.evergreen_title.clone(),
            description: self.config.evergreen_description.clone(),
            source: "evergreen".into(),
            published_at: None,
            url: None,
        };
        TrendResult {
            category: category.to_string(),
            candidates_considered: 0,
            image_prompt: default_image_prompt(&topic),
            topic,
            virality_score: DEFAULT_VIRALITY,
            sarcastic_angle: self.config.evergreen_angle.clone(),
            used_fallback: true,
            fallback_reason: Some(reason),
            analyzed_at: Utc::now(),
        }
    }

    fn selection_prompt(category: &str, candidates: &[TopicCandidate]) -> String {
        let mut prompt = format!("Category: {category}\nCandidates:\n");
        for (idx, candidate) in candidates.iter().enumerate() {
            prompt.push_str(&format!("{}. {}", idx + 1, candidate.title));
            if !candidate.description.is_empty() {
                prompt.push_str(&format!(" - {}", candidate.description));
            }
            prompt.push('\n');
        }
        prompt
    }

    fn from_selection(
        &self,
        category: &str,
        candidates: Vec<TopicCandidate>,
        selection: TopicSelection,
    ) -> TrendResult {
        let considered = candidates.len();
        match selection {
            TopicSelection::Parsed {
                topic,
                virality,
                angle,
                image_prompt,
            } => {
                let chosen = match_candidate(&candidates, &topic).unwrap_or_else(|| TopicCandidate {
                    title: topic.clone(),
                    description: String::new(),
                    source: "model".into(),
                    published_at: None,
                    url: None,
                });
                let mut missing = Vec::new();
                if virality.is_none() {
                    missing.push("virality");
                }
                if angle.is_none() {
                    missing.push("angle");
                }
                TrendResult {
                    category: category.to_string(),
                    candidates_considered: considered,
                    image_prompt: image_prompt.unwrap_or_else(|| default_image_prompt(&chosen)),
                    sarcastic_angle: angle.unwrap_or_else(|| default_angle(&chosen)),
                    topic: chosen,
                    virality_score: virality.unwrap_or(DEFAULT_VIRALITY),
                    used_fallback: !missing.is_empty(),
                    fallback_reason: (!missing.is_empty())
                        .then(|| format!("reply missing {}", missing.join(", "))),
                    analyzed_at: Utc::now(),
                }
            }
            TopicSelection::Unparseable { reason } => {
                self.first_candidate(category, candidates, format!("unparseable selection: {reason}"))
            }
        }
    }

    fn first_candidate(
        &self,
        category: &str,
        mut candidates: Vec<TopicCandidate>,
        reason: String,
    ) -> TrendResult {
        warn!(category, reason = %reason, "using first candidate topic");
        let considered = candidates.len();
        let topic = candidates.swap_remove(0);
        TrendResult {
            category: category.to_string(),
            candidates_considered: considered,
            image_prompt: default_image_prompt(&topic),
            sarcastic_angle: default_angle(&topic),
            topic,
            virality_score: DEFAULT_VIRALITY,
            used_fallback: true,
            fallback_reason: Some(reason),
            analyzed_at: Utc::now(),
        }
    }
}

#[async_trait]
impl PhaseExecutor for TrendAnalysisPhase {
    type Input = TrendRequest;
    type Output = TrendResult;

    fn phase(&self) -> Phase {
        Phase::TrendAnalysis
    }

    async fn execute(
        &self,
        input: &TrendRequest,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> PhaseResult<TrendResult> {
        let category = input.category.as_str();
        progress.report(self.phase(), "fetch", &format!("fetching {category} topics"));

        let fetched = tokio::select! {
            _ = cancel.cancelled() => return PhaseResult::failure("cancelled", true),
            fetched = self.topics.fetch_candidates(category, self.config.max_candidates) => fetched,
        };
        let candidates: Vec<TopicCandidate> = match fetched {
            Ok(candidates) => candidates
                .into_iter()
                .filter(TopicCandidate::is_usable)
                .collect(),
            Err(err) => {
                return PhaseResult::Success(
                    self.evergreen(category, format!("topic source failed: {err}")),
                )
            }
        };
        if candidates.is_empty() {
            return PhaseResult::Success(self.evergreen(category, "no usable topics".into()));
        }

        progress.report(
            self.phase(),
            "select",
            &format!("choosing among {} candidates", candidates.len()),
        );
        let prompt = Self::selection_prompt(category, &candidates);
        let reply = tokio::select! {
            _ = cancel.cancelled() => return PhaseResult::failure("cancelled", true),
            reply = self.text.complete(SELECTION_SYSTEM_PROMPT, &prompt) => reply,
        };
        let result = match reply {
            Ok(reply) => self.from_selection(category, candidates, parse_topic_selection(&reply)),
            Err(err) => {
                self.first_candidate(category, candidates, format!("topic selection failed: {err}"))
            }
        };

        info!(
            category,
            topic = %result.topic.title,
            virality = result.virality_score,
            fallback = result.used_fallback,
            "trend selected"
        );
        PhaseResult::Success(result)
    }
}

fn match_candidate(candidates: &[TopicCandidate], title: &str) -> Option<TopicCandidate> {
    let wanted = title.to_lowercase();
    let wanted = wanted
        .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ' ')
        .trim();
    candidates
        .iter()
        .find(|candidate| candidate.title.to_lowercase() == wanted)
        .or_else(|| {
            candidates.iter().find(|candidate| {
                let title = candidate.title.to_lowercase();
                title.contains(wanted) || wanted.contains(&title)
            })
        })
        .cloned()
}

fn default_angle(topic: &TopicCandidate) -> String {
    format!("Because {} is exactly what everyone needed today.", topic.title)
}

fn default_image_prompt(topic: &TopicCandidate) -> String {
    format!(
        "A witty, photorealistic editorial illustration about {}, square composition, bold colours, no text",
        topic.title
    )
}
