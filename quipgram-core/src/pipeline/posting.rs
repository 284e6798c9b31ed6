use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::browser::{
    BrowserError, BrowserResult, BrowserSession, BrowserSessionManager, Screenshot,
    ScrollDirection, SelectorChain,
};
use crate::config::{PostingSection, SelectorSection};
use crate::services::TextGenerator;

use super::compliance::{ComplianceDecision, ComplianceGate};
use super::executor::{Phase, PhaseExecutor, ProgressSink};
use super::types::{
    EngagementAction, EngagementKind, PhaseResult, PostingRequest, PostingResult, TrendResult,
};

const CAPTION_SYSTEM_PROMPT: &str = "You write short, dry, sarcastic Instagram captions. \
Keep the caption under 300 characters, then add 5 to 10 relevant hashtags.";

const LIKE_TIMEOUT: Duration = Duration::from_millis(1500);
const NEXT_STEPS: usize = 2;

/// A drafted caption body plus its final hashtag list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caption {
    pub body: String,
    pub hashtags: Vec<String>,
    pub used_fallback: bool,
}

impl Caption {
    pub fn full_text(&self) -> String {
        if self.hashtags.is_empty() {
            self.body.clone()
        } else {
            format!("{}\n\n{}", self.body, self.hashtags.join(" "))
        }
    }
}

fn hashtag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"#[\p{L}\p{N}_]+").expect("valid regex"))
}

/// Splits `#tags` out of a drafted caption, returning the remaining body and
/// the tags in order of appearance.
pub fn extract_hashtags(draft: &str) -> (String, Vec<String>) {
    let tags = hashtag_pattern()
        .find_iter(draft)
        .map(|found| found.as_str().to_string())
        .collect();
    let body = hashtag_pattern()
        .replace_all(draft, "")
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    (body, tags)
}

/// De-duplicates case-insensitively, truncates to `max`, then tops up from
/// `defaults` while room remains.
pub fn merge_hashtags(found: &[String], defaults: &[String], max: usize) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(max);
    for tag in found.iter().chain(defaults) {
        if merged.len() >= max {
            break;
        }
        let tag = normalize_tag(tag);
        if tag.len() <= 1 {
            continue;
        }
        if !merged
            .iter()
            .any(|existing| existing.eq_ignore_ascii_case(&tag))
        {
            merged.push(tag);
        }
    }
    merged
}

fn normalize_tag(tag: &str) -> String {
    let trimmed = tag.trim();
    if trimmed.starts_with('#') {
        trimmed.to_string()
    } else {
        format!("#{trimmed}")
    }
}

/// Fallback chains for every control the posting flow touches.
#[derive(Debug, Clone)]
pub struct PostingSelectors {
    pub login_form: SelectorChain,
    pub username_input: SelectorChain,
    pub password_input: SelectorChain,
    pub login_submit: SelectorChain,
    pub optional_dialogs: SelectorChain,
    pub feed_like: SelectorChain,
    pub create_post: SelectorChain,
    pub file_input: SelectorChain,
    pub next_button: SelectorChain,
    pub caption_input: SelectorChain,
    pub share_button: SelectorChain,
    pub share_confirmation: SelectorChain,
}

impl From<&SelectorSection> for PostingSelectors {
    fn from(section: &SelectorSection) -> Self {
        let chain = |control: &str, selectors: &[String]| {
            SelectorChain::new(control, selectors.iter().cloned())
        };
        Self {
            login_form: chain("login form", &section.login_form),
            username_input: chain("username input", &section.username_input),
            password_input: chain("password input", &section.password_input),
            login_submit: chain("login submit", &section.login_submit),
            optional_dialogs: chain("optional dialog", &section.optional_dialogs),
            feed_like: chain("feed like", &section.feed_like),
            create_post: chain("create post", &section.create_post),
            file_input: chain("file input", &section.file_input),
            next_button: chain("next", &section.next_button),
            caption_input: chain("caption input", &section.caption_input),
            share_button: chain("share", &section.share_button),
            share_confirmation: chain("share confirmation", &section.share_confirmation),
        }
    }
}

struct Publication {
    logged_in: bool,
    screenshot: Option<PathBuf>,
}

pub struct InstagramPostingPhase {
    sessions: Arc<Mutex<BrowserSessionManager>>,
    text: Arc<dyn TextGenerator>,
    compliance: ComplianceGate,
    config: PostingSection,
    selectors: PostingSelectors,
}

impl InstagramPostingPhase {
    pub fn new(
        sessions: Arc<Mutex<BrowserSessionManager>>,
        text: Arc<dyn TextGenerator>,
        compliance: ComplianceGate,
        config: PostingSection,
        selectors: PostingSelectors,
    ) -> Self {
        Self {
            sessions,
            text,
            compliance,
            config,
            selectors,
        }
    }

    fn element_timeout(&self) -> Duration {
        Duration::from_millis(self.config.element_timeout_ms)
    }

    pub async fn compose_caption(&self, trend: &TrendResult) -> Caption {
        let prompt = format!(
            "Topic: {}\nContext: {}\nAngle: {}",
            trend.topic.title, trend.topic.description, trend.sarcastic_angle
        );
        let (body, found, used_fallback) = match self.text.complete(CAPTION_SYSTEM_PROMPT, &prompt).await
        {
            Ok(draft) => {
                let (body, found) = extract_hashtags(&draft);
                if body.is_empty() {
                    warn!("caption draft had no text, using template");
                    (template_caption(trend), found, true)
                } else {
                    (body, found, false)
                }
            }
            Err(err) => {
                warn!(error = %err, "caption generation failed, using template");
                (template_caption(trend), Vec::new(), true)
            }
        };
        let hashtags = merge_hashtags(&found, &self.config.default_hashtags, self.config.max_hashtags);
        if hashtags.len() < self.config.min_hashtags {
            warn!(
                count = hashtags.len(),
                min = self.config.min_hashtags,
                "caption has fewer hashtags than configured minimum"
            );
        }
        Caption {
            body,
            hashtags,
            used_fallback,
        }
    }

    async fn publish(
        &self,
        manager: &mut BrowserSessionManager,
        image_path: &std::path::Path,
        image_tag: &str,
        caption: &str,
        log: &mut Vec<EngagementAction>,
        progress: &dyn ProgressSink,
    ) -> BrowserResult<Publication> {
        let session = manager.get_or_create().await?;
        let timeout = self.element_timeout();

        progress.report(Phase::InstagramPosting, "open", &self.config.home_url);
        session.navigate(&self.config.home_url).await?;
        session.dismiss_optional(&self.selectors.optional_dialogs).await?;

        let logged_in = self.login_if_needed(session).await?;
        self.warm_up(session, log).await?;

        progress.report(Phase::InstagramPosting, "upload", "opening post composer");
        session.click_first(&self.selectors.create_post, timeout).await?;
        let input = session.wait_for_any(&self.selectors.file_input, timeout).await?;
        session.upload_file(&input, image_path).await?;
        for _ in 0..NEXT_STEPS {
            session.click_first(&self.selectors.next_button, timeout).await?;
        }

        progress.report(Phase::InstagramPosting, "caption", "typing caption");
        session
            .type_first(&self.selectors.caption_input, caption, timeout)
            .await?;
        session.click_first(&self.selectors.share_button, timeout).await?;
        session
            .wait_for_any(&self.selectors.share_confirmation, timeout * 3)
            .await?;
        progress.report(Phase::InstagramPosting, "shared", "post shared");

        let target = PathBuf::from(&self.config.screenshot_dir).join(format!("posted-{image_tag}.png"));
        let screenshot = match session.screenshot(Some(&target)).await? {
            Screenshot::Saved(path) => Some(path),
            Screenshot::Encoded(_) => None,
        };

        self.wind_down(session, log).await?;
        Ok(Publication {
            logged_in,
            screenshot,
        })
    }

    async fn login_if_needed(&self, session: &mut BrowserSession) -> BrowserResult<bool> {
        let mut required = false;
        for selector in self.selectors.login_form.iter() {
            if session.is_present(selector).await? {
                required = true;
                break;
            }
        }
        if !required {
            debug!("already logged in");
            return Ok(false);
        }

        info!(username = %self.config.username, "logging in");
        let password = std::env::var(&self.config.password_env).map_err(|_| {
            BrowserError::Configuration(format!(
                "login required but {} is not set",
                self.config.password_env
            ))
        })?;
        let timeout = self.element_timeout();
        session
            .type_first(&self.selectors.username_input, &self.config.username, timeout)
            .await?;
        session
            .type_first(&self.selectors.password_input, &password, timeout)
            .await?;
        session.click_first(&self.selectors.login_submit, timeout).await?;
        session.idle().await?;
        // "save login info" then "turn on notifications"
        for _ in 0..2 {
            session.dismiss_optional(&self.selectors.optional_dialogs).await?;
        }
        Ok(true)
    }

    async fn warm_up(
        &self,
        session: &mut BrowserSession,
        log: &mut Vec<EngagementAction>,
    ) -> BrowserResult<()> {
        let scrolls = session.pick_count(self.config.pre_post_scrolls);
        for _ in 0..scrolls {
            match session
                .scroll(ScrollDirection::Down, self.config.scroll_base_px)
                .await
            {
                Ok(delta) => log.push(EngagementAction::now(
                    EngagementKind::Scroll,
                    Some(delta.to_string()),
                    true,
                )),
                Err(err) => {
                    log.push(EngagementAction::now(EngagementKind::Scroll, None, false));
                    return Err(err);
                }
            }
        }

        if session.chance(self.config.like_probability) {
            match session.click_first(&self.selectors.feed_like, LIKE_TIMEOUT).await {
                Ok(selector) => {
                    log.push(EngagementAction::now(EngagementKind::Like, Some(selector), true))
                }
                Err(BrowserError::Cancelled) => return Err(BrowserError::Cancelled),
                Err(err) => {
                    debug!(error = %err, "no post to like");
                    log.push(EngagementAction::now(EngagementKind::Like, None, false));
                }
            }
        }
        Ok(())
    }

    async fn wind_down(
        &self,
        session: &mut BrowserSession,
        log: &mut Vec<EngagementAction>,
    ) -> BrowserResult<()> {
        let steps = [
            (EngagementKind::CheckMessages, self.config.inbox_url.as_str()),
            (EngagementKind::ReturnHome, self.config.home_url.as_str()),
        ];
        for (kind, url) in steps {
            match session.navigate(url).await {
                Ok(()) => log.push(EngagementAction::now(kind, Some(url.to_string()), true)),
                Err(BrowserError::Cancelled) => return Err(BrowserError::Cancelled),
                // The post is already live; a failed courtesy navigation must
                // not turn into a retry that posts twice.
                Err(err) => {
                    warn!(error = %err, action = ?kind, "post-share engagement failed");
                    log.push(EngagementAction::now(kind, Some(url.to_string()), false));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PhaseExecutor for InstagramPostingPhase {
    type Input = PostingRequest;
    type Output = PostingResult;

    fn phase(&self) -> Phase {
        Phase::InstagramPosting
    }

    async fn execute(
        &self,
        input: &PostingRequest,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> PhaseResult<PostingResult> {
        let image = &input.evaluation.selected;
        progress.report(self.phase(), "caption", "composing caption");
        let caption = tokio::select! {
            _ = cancel.cancelled() => return PhaseResult::failure("cancelled", true),
            caption = self.compose_caption(&input.trend) => caption,
        };
        let full_caption = caption.full_text();
        let compliance = tokio::select! {
            _ = cancel.cancelled() => return PhaseResult::failure("cancelled", true),
            decision = self.compliance.review(&full_caption) => decision,
        };

        let mut result = PostingResult {
            image_id: image.id,
            caption: full_caption,
            hashtags: caption.hashtags.clone(),
            caption_fallback: caption.used_fallback,
            compliance: compliance.clone(),
            dry_run: input.dry_run,
            posted: false,
            logged_in: false,
            confirmation_screenshot: None,
            engagement: Vec::new(),
            error: None,
        };

        if let ComplianceDecision::Blocked { reason, .. } = &compliance {
            let reason = format!("caption blocked by compliance gate: {reason}");
            result.error = Some(reason.clone());
            return PhaseResult::failure_with(reason, false, result);
        }
        if input.dry_run {
            progress.report(self.phase(), "dry_run", "caption ready, skipping browser");
            return PhaseResult::Success(result);
        }
        if cancel.is_cancelled() {
            return PhaseResult::failure_with("cancelled", true, result);
        }

        let mut manager = self.sessions.lock().await;
        let mut log = Vec::new();
        let image_tag = image.id.simple().to_string();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(BrowserError::Cancelled),
            outcome = self.publish(
                &mut manager,
                &image.file_path,
                &image_tag,
                &result.caption,
                &mut log,
                progress,
            ) => outcome,
        };
        if let Err(err) = manager.dispose().await {
            warn!(error = %err, "failed to dispose browser session");
        }
        result.engagement = log;

        match outcome {
            Ok(publication) => {
                result.posted = true;
                result.logged_in = publication.logged_in;
                result.confirmation_screenshot = publication.screenshot;
                info!(image = %image.id, "post published");
                PhaseResult::Success(result)
            }
            Err(err) => {
                let retryable = err.is_retryable() || matches!(err, BrowserError::Cancelled);
                warn!(error = %err, retryable, "posting failed");
                result.error = Some(err.to_string());
                PhaseResult::failure_with(format!("posting failed: {err}"), retryable, result)
            }
        }
    }
}

fn template_caption(trend: &TrendResult) -> String {
    format!("{} — {}", trend.topic.title, trend.sarcastic_angle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn extracts_tags_and_cleans_body() {
        let (body, found) =
            extract_hashtags("Batteries: now with 20% more regret. #tech #Regret\n\n#tech #life_hacks");
        assert_eq!(body, "Batteries: now with 20% more regret.");
        assert_eq!(found, tags(&["#tech", "#Regret", "#tech", "#life_hacks"]));
    }

    #[test]
    fn merge_dedupes_truncates_and_fills_defaults() {
        let found = tags(&["#tech", "#TECH", "#regret"]);
        let defaults = tags(&["#sarcasm", "regret", "#memes"]);
        assert_eq!(
            merge_hashtags(&found, &defaults, 4),
            tags(&["#tech", "#regret", "#sarcasm", "#memes"])
        );
        assert_eq!(merge_hashtags(&found, &defaults, 1), tags(&["#tech"]));
        assert!(merge_hashtags(&found, &defaults, 0).is_empty());
    }

    #[test]
    fn full_text_appends_hashtag_line() {
        let caption = Caption {
            body: "Mondays.".into(),
            hashtags: tags(&["#a", "#b"]),
            used_fallback: false,
        };
        assert_eq!(caption.full_text(), "Mondays.\n\n#a #b");
    }

    #[test]
    fn selector_section_maps_to_named_chains() {
        let selectors = PostingSelectors::from(&SelectorSection::default());
        assert_eq!(selectors.create_post.control(), "create post");
        assert!(!selectors.create_post.is_empty());
        assert!(!selectors.share_confirmation.is_empty());
    }
}
