use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use quipgram_core::browser::{
    BehaviorProfile, BrowserDriver, BrowserError, BrowserResult, BrowserSessionManager,
    DriverLauncher, Point,
};
use quipgram_core::config::{PostingSection, SelectorSection};
use quipgram_core::pipeline::{
    ComplianceDecision, ComplianceGate, EngagementKind, EvaluationResult, GeneratedImage,
    ImageScore, InstagramPostingPhase, PhaseExecutor, PhaseResult, PostingRequest,
    PostingResult, PostingSelectors, ScoreSource, TracingProgress, TrendResult,
};
use quipgram_core::services::{ServiceResult, TextGenerator, TopicCandidate};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const HOME: &str = "https://www.instagram.com/";
const INBOX: &str = "https://www.instagram.com/direct/inbox/";
const CAPTION_DRAFT: &str = "Meetings about meetings, now with agendas. #ai #meetings";

#[derive(Default)]
struct FeedState {
    present: HashSet<String>,
    failing_url: Option<String>,
    navigations: Vec<String>,
    clicks: Vec<String>,
    typed: HashMap<String, String>,
    uploads: Vec<PathBuf>,
    closes: usize,
}

/// A feed page where only the `present` selectors exist.
struct FeedDriver {
    state: Arc<StdMutex<FeedState>>,
}

#[async_trait]
impl BrowserDriver for FeedDriver {
    async fn navigate(&mut self, url: &str) -> BrowserResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_url.as_deref() == Some(url) {
            return Err(BrowserError::page("net::ERR_CONNECTION_RESET"));
        }
        state.navigations.push(url.to_string());
        Ok(())
    }

    async fn element_center(&mut self, selector: &str) -> BrowserResult<Point> {
        if self.state.lock().unwrap().present.contains(selector) {
            Ok(Point::new(320.0, 240.0))
        } else {
            Err(BrowserError::interaction(selector, "not on page"))
        }
    }

    async fn move_pointer(&mut self, _point: Point) -> BrowserResult<()> {
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> BrowserResult<()> {
        self.state.lock().unwrap().clicks.push(selector.to_string());
        Ok(())
    }

    async fn key_char(&mut self, selector: &str, ch: char) -> BrowserResult<()> {
        self.state
            .lock()
            .unwrap()
            .typed
            .entry(selector.to_string())
            .or_default()
            .push(ch);
        Ok(())
    }

    async fn key_backspace(&mut self, selector: &str) -> BrowserResult<()> {
        if let Some(text) = self.state.lock().unwrap().typed.get_mut(selector) {
            text.pop();
        }
        Ok(())
    }

    async fn scroll_by(&mut self, _delta_y: i64) -> BrowserResult<()> {
        Ok(())
    }

    async fn element_exists(&mut self, selector: &str) -> BrowserResult<bool> {
        Ok(self.state.lock().unwrap().present.contains(selector))
    }

    async fn text(&mut self, _selector: &str) -> BrowserResult<Option<String>> {
        Ok(None)
    }

    async fn all_text(&mut self, _selector: &str) -> BrowserResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn screenshot(&mut self) -> BrowserResult<Vec<u8>> {
        Ok(b"\x89PNG shared".to_vec())
    }

    async fn set_file_input(&mut self, _selector: &str, path: &Path) -> BrowserResult<()> {
        self.state.lock().unwrap().uploads.push(path.to_path_buf());
        Ok(())
    }

    async fn evaluate(&mut self, _script: &str) -> BrowserResult<Value> {
        Ok(Value::Null)
    }

    async fn close(&mut self) -> BrowserResult<()> {
        self.state.lock().unwrap().closes += 1;
        Ok(())
    }
}

struct FeedLauncher {
    state: Arc<StdMutex<FeedState>>,
    launches: AtomicUsize,
}

#[async_trait]
impl DriverLauncher for FeedLauncher {
    async fn launch(&self, _headless: bool) -> BrowserResult<Box<dyn BrowserDriver>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FeedDriver {
            state: self.state.clone(),
        }))
    }
}

struct FixedCaption;

#[async_trait]
impl TextGenerator for FixedCaption {
    async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> ServiceResult<String> {
        Ok(CAPTION_DRAFT.to_string())
    }
}

/// A model call that never comes back.
struct StalledModel;

#[async_trait]
impl TextGenerator for StalledModel {
    async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> ServiceResult<String> {
        std::future::pending().await
    }
}

struct Fixture {
    dir: TempDir,
    state: Arc<StdMutex<FeedState>>,
    launcher: Arc<FeedLauncher>,
    phase: InstagramPostingPhase,
    request: PostingRequest,
}

fn posting_request(image_path: PathBuf) -> PostingRequest {
    let image = GeneratedImage {
        id: Uuid::new_v4(),
        file_path: image_path,
        prompt: "A robot butler drowning in calendar invites".into(),
        revised_prompt: None,
        size: "1024x1024".into(),
        quality: "standard".into(),
        style: "vivid".into(),
        generated_at: Utc::now(),
        metadata: None,
    };
    let score = ImageScore::uniform(image.id, 8.4, ScoreSource::Parsed);
    PostingRequest {
        trend: TrendResult {
            category: "technology".into(),
            candidates_considered: 3,
            topic: TopicCandidate {
                title: "AI assistant schedules meeting to discuss meetings".into(),
                description: String::new(),
                source: "techwire".into(),
                published_at: None,
                url: None,
            },
            virality_score: 80,
            sarcastic_angle: "Finally, a calendar that hates you personally.".into(),
            image_prompt: "A robot butler drowning in calendar invites".into(),
            used_fallback: false,
            fallback_reason: None,
            analyzed_at: Utc::now(),
        },
        evaluation: EvaluationResult {
            scores: vec![score.clone()],
            selected: image,
            selected_score: score,
            degraded: 0,
        },
        dry_run: false,
    }
}

fn fixture(
    text: Arc<dyn TextGenerator>,
    present: &[String],
    password_env: &str,
    failing_url: Option<&str>,
) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let image_path = dir.path().join("winner.png");
    std::fs::write(&image_path, b"\x89PNG winner").unwrap();

    let state = Arc::new(StdMutex::new(FeedState {
        present: present.iter().cloned().collect(),
        failing_url: failing_url.map(str::to_string),
        ..FeedState::default()
    }));
    let launcher = Arc::new(FeedLauncher {
        state: state.clone(),
        launches: AtomicUsize::new(0),
    });
    let profile = BehaviorProfile::new([50, 150], [100, 300], 0.0, 0.3, false).unwrap();
    let manager =
        BrowserSessionManager::new(launcher.clone(), profile, true, CancellationToken::new())
            .with_seed(3);
    let config = PostingSection {
        username: "dry_wit_daily".into(),
        password_env: password_env.into(),
        pre_post_scrolls: [1, 1],
        like_probability: 0.0,
        element_timeout_ms: 500,
        screenshot_dir: dir.path().join("shots").display().to_string(),
        ..PostingSection::default()
    };
    let phase = InstagramPostingPhase::new(
        Arc::new(Mutex::new(manager)),
        text,
        ComplianceGate::disabled(),
        config,
        PostingSelectors::from(&SelectorSection::default()),
    );

    Fixture {
        request: posting_request(image_path),
        dir,
        state,
        launcher,
        phase,
    }
}

/// First selector of every chain the composer needs.
fn composer_selectors() -> Vec<String> {
    let selectors = SelectorSection::default();
    [
        &selectors.create_post,
        &selectors.file_input,
        &selectors.next_button,
        &selectors.caption_input,
        &selectors.share_button,
        &selectors.share_confirmation,
    ]
    .into_iter()
    .map(|chain| chain[0].clone())
    .collect()
}

fn login_selectors() -> Vec<String> {
    let selectors = SelectorSection::default();
    [
        &selectors.login_form,
        &selectors.username_input,
        &selectors.password_input,
        &selectors.login_submit,
    ]
    .into_iter()
    .map(|chain| chain[0].clone())
    .collect()
}

async fn post(fixture: &Fixture, cancel: &CancellationToken) -> PhaseResult<PostingResult> {
    fixture
        .phase
        .execute(&fixture.request, &TracingProgress, cancel)
        .await
}

#[tokio::test(start_paused = true)]
async fn logs_in_posts_and_winds_down() {
    std::env::set_var("QUIPGRAM_POSTING_TEST_PASSWORD", "hunter2");
    let mut present = login_selectors();
    present.extend(composer_selectors());
    let f = fixture(
        Arc::new(FixedCaption),
        &present,
        "QUIPGRAM_POSTING_TEST_PASSWORD",
        None,
    );

    let result = match post(&f, &CancellationToken::new()).await {
        PhaseResult::Success(result) => result,
        other => panic!("posting should succeed, got {other:?}"),
    };

    assert!(result.posted);
    assert!(result.logged_in);
    assert!(!result.dry_run);
    assert!(result.error.is_none());
    assert_eq!(result.compliance, ComplianceDecision::Skipped);
    assert!(result.caption.starts_with("Meetings about meetings, now with agendas."));

    let image_tag = f.request.evaluation.selected.id.simple().to_string();
    let expected_shot = f.dir.path().join("shots").join(format!("posted-{image_tag}.png"));
    assert_eq!(result.confirmation_screenshot.as_deref(), Some(expected_shot.as_path()));
    assert_eq!(std::fs::read(&expected_shot).unwrap(), b"\x89PNG shared");

    let kinds: Vec<_> = result
        .engagement
        .iter()
        .map(|action| action.action_type)
        .collect();
    assert_eq!(
        kinds,
        vec![
            EngagementKind::Scroll,
            EngagementKind::CheckMessages,
            EngagementKind::ReturnHome
        ]
    );
    assert!(result.engagement.iter().all(|action| action.success));

    let selectors = SelectorSection::default();
    let state = f.state.lock().unwrap();
    assert_eq!(state.navigations, vec![HOME, INBOX, HOME]);
    assert_eq!(
        state.typed.get(&selectors.username_input[0]).map(String::as_str),
        Some("dry_wit_daily")
    );
    assert_eq!(
        state.typed.get(&selectors.password_input[0]).map(String::as_str),
        Some("hunter2")
    );
    assert_eq!(
        state.typed.get(&selectors.caption_input[0]),
        Some(&result.caption)
    );
    assert_eq!(state.uploads, vec![f.request.evaluation.selected.file_path.clone()]);
    // two Next presses, then Share, which shares the same selector here
    let composer_clicks = state
        .clicks
        .iter()
        .filter(|clicked| **clicked == selectors.next_button[0])
        .count();
    assert_eq!(composer_clicks, 3);
    assert!(state.clicks.contains(&selectors.login_submit[0]));
    assert!(state.clicks.contains(&selectors.create_post[0]));
    assert_eq!(state.closes, 1);
    assert_eq!(f.launcher.launches.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_inbox_visit_after_sharing_still_counts_as_posted() {
    let f = fixture(
        Arc::new(FixedCaption),
        &composer_selectors(),
        "QUIPGRAM_POSTING_TEST_UNUSED",
        Some(INBOX),
    );

    let result = match post(&f, &CancellationToken::new()).await {
        PhaseResult::Success(result) => result,
        other => panic!("a shared post must not be reported as failed, got {other:?}"),
    };

    assert!(result.posted);
    assert!(!result.logged_in);
    let wind_down: Vec<_> = result
        .engagement
        .iter()
        .filter(|action| action.action_type != EngagementKind::Scroll)
        .map(|action| (action.action_type, action.success))
        .collect();
    assert_eq!(
        wind_down,
        vec![
            (EngagementKind::CheckMessages, false),
            (EngagementKind::ReturnHome, true)
        ]
    );
    assert_eq!(f.state.lock().unwrap().navigations, vec![HOME, HOME]);
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_a_stalled_caption_request() {
    let f = fixture(
        Arc::new(StalledModel),
        &composer_selectors(),
        "QUIPGRAM_POSTING_TEST_UNUSED",
        None,
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(2), post(&f, &cancel))
        .await
        .expect("posting must return promptly once cancelled");

    match outcome {
        PhaseResult::Failure {
            reason, retryable, ..
        } => {
            assert_eq!(reason, "cancelled");
            assert!(retryable);
        }
        other => panic!("expected a cancelled failure, got {other:?}"),
    }
    assert_eq!(f.launcher.launches.load(Ordering::SeqCst), 0);
}
