use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::browser::BehaviorProfile;
use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct PipelineConfig {
    pub human_simulation: HumanSimulationSection,
    pub chromium: ChromiumSection,
    pub trend: TrendSection,
    pub images: ImagesSection,
    pub evaluation: EvaluationSection,
    pub posting: PostingSection,
    pub selectors: SelectorSection,
    pub compliance: ComplianceSection,
    pub llm: LlmSection,
    pub storage: StorageSection,
}

impl PipelineConfig {
    pub fn behavior_profile(&self) -> Result<BehaviorProfile> {
        Ok(BehaviorProfile::try_from(&self.human_simulation)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HumanSimulationSection {
    pub typing_delay_ms: [u64; 2],
    pub action_delay_ms: [u64; 2],
    pub typo_probability: f64,
    pub scroll_variance: f64,
    pub curved_cursor: bool,
    pub cursor_jitter_px: f64,
    pub cursor_steps: usize,
}

impl Default for HumanSimulationSection {
    fn default() -> Self {
        Self {
            typing_delay_ms: [50, 150],
            action_delay_ms: [2000, 8000],
            typo_probability: 0.02,
            scroll_variance: 0.3,
            curved_cursor: true,
            cursor_jitter_px: 50.0,
            cursor_steps: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChromiumSection {
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub profile_dir: String,
    pub profile_name: String,
    pub window_size: [u32; 2],
    pub user_agents: Vec<String>,
    pub lang: Option<String>,
    pub request_timeout_seconds: Option<u64>,
}

impl Default for ChromiumSection {
    fn default() -> Self {
        Self {
            executable_path: None,
            headless: false,
            sandbox: true,
            disable_gpu: false,
            profile_dir: "data/profiles".into(),
            profile_name: "default".into(),
            window_size: [1366, 768],
            user_agents: Vec::new(),
            lang: Some("en-US".into()),
            request_timeout_seconds: Some(60),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrendSection {
    pub category: String,
    pub max_candidates: usize,
    pub evergreen_title: String,
    pub evergreen_description: String,
    pub evergreen_angle: String,
}

impl Default for TrendSection {
    fn default() -> Self {
        Self {
            category: "technology".into(),
            max_candidates: 10,
            evergreen_title: "Monday mornings".into(),
            evergreen_description: "The universal struggle of starting the week.".into(),
            evergreen_angle: "Nothing says productivity like a fourth coffee before 9am."
                .into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImagesSection {
    pub variations: usize,
    pub size: String,
    pub quality: String,
    pub styles: Vec<String>,
    pub output_dir: String,
    pub request_delay_ms: u64,
}

impl Default for ImagesSection {
    fn default() -> Self {
        Self {
            variations: 4,
            size: "1024x1024".into(),
            quality: "standard".into(),
            styles: vec!["vivid".into(), "natural".into()],
            output_dir: "data/images".into(),
            request_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvaluationSection {
    pub floor_score: f64,
    pub neutral_score: f64,
}

impl Default for EvaluationSection {
    fn default() -> Self {
        Self {
            floor_score: 1.0,
            neutral_score: 5.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostingSection {
    pub home_url: String,
    pub inbox_url: String,
    pub username: String,
    pub password_env: String,
    pub min_hashtags: usize,
    pub max_hashtags: usize,
    pub default_hashtags: Vec<String>,
    pub pre_post_scrolls: [u32; 2],
    pub like_probability: f64,
    pub scroll_base_px: u32,
    pub element_timeout_ms: u64,
    pub screenshot_dir: String,
}

impl Default for PostingSection {
    fn default() -> Self {
        Self {
            home_url: "https://www.instagram.com/".into(),
            inbox_url: "https://www.instagram.com/direct/inbox/".into(),
            username: String::new(),
            password_env: "QUIPGRAM_PASSWORD".into(),
            min_hashtags: 5,
            max_hashtags: 15,
            default_hashtags: vec![
                "#sarcasm".into(),
                "#techhumor".into(),
                "#relatable".into(),
                "#dailyhumor".into(),
                "#memesdaily".into(),
            ],
            pre_post_scrolls: [1, 3],
            like_probability: 0.3,
            scroll_base_px: 600,
            element_timeout_ms: 10_000,
            screenshot_dir: "data/screenshots".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SelectorSection {
    pub login_form: Vec<String>,
    pub username_input: Vec<String>,
    pub password_input: Vec<String>,
    pub login_submit: Vec<String>,
    pub optional_dialogs: Vec<String>,
    pub feed_like: Vec<String>,
    pub create_post: Vec<String>,
    pub file_input: Vec<String>,
    pub next_button: Vec<String>,
    pub caption_input: Vec<String>,
    pub share_button: Vec<String>,
    pub share_confirmation: Vec<String>,
}

impl Default for SelectorSection {
    fn default() -> Self {
        Self {
            login_form: vec!["form#loginForm".into(), "input[name='username']".into()],
            username_input: vec!["input[name='username']".into()],
            password_input: vec!["input[name='password']".into()],
            login_submit: vec!["button[type='submit']".into()],
            optional_dialogs: vec![
                "button._a9--._ap36._a9_1".into(),
                "div[role='dialog'] button._a9_1".into(),
            ],
            feed_like: vec!["article svg[aria-label='Like']".into()],
            create_post: vec![
                "svg[aria-label='New post']".into(),
                "a[href='/create/select/']".into(),
                "svg[aria-label='Create']".into(),
            ],
            file_input: vec!["input[type='file']".into()],
            next_button: vec![
                "div[role='dialog'] div._ac7b div[role='button']".into(),
                "div[role='dialog'] button:last-child".into(),
            ],
            caption_input: vec![
                "div[aria-label='Write a caption...']".into(),
                "textarea[aria-label='Write a caption...']".into(),
            ],
            share_button: vec![
                "div[role='dialog'] div._ac7b div[role='button']".into(),
                "div[role='dialog'] button:last-child".into(),
            ],
            share_confirmation: vec![
                "img[alt='Animated checkmark']".into(),
                "div[role='dialog'] h3".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    Open,
    #[default]
    Closed,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ComplianceSection {
    pub enabled: bool,
    pub severity_threshold: u8,
    pub failure_policy: FailurePolicy,
}

impl Default for ComplianceSection {
    fn default() -> Self {
        Self {
            enabled: false,
            severity_threshold: 2,
            failure_policy: FailurePolicy::Closed,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub endpoint: String,
    pub api_key_env: String,
    pub text_model: String,
    pub vision_model: String,
    pub image_model: String,
    pub timeout_seconds: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            text_model: "gpt-4o-mini".into(),
            vision_model: "gpt-4o".into(),
            image_model: "dall-e-3".into(),
            timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub runs_db: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            runs_db: "data/runs.sqlite".into(),
        }
    }
}

pub fn load_pipeline_config<P: AsRef<Path>>(path: P) -> Result<PipelineConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/pipeline.toml");
        let config = load_pipeline_config(path).expect("config should parse");
        assert_eq!(config.human_simulation.typing_delay_ms, [50, 150]);
        assert_eq!(config.images.variations, 4);
        assert_eq!(config.compliance.failure_policy, FailurePolicy::Closed);
        assert!(!config.selectors.create_post.is_empty());
        config.behavior_profile().expect("fixture profile is valid");
    }

    #[test]
    fn fixture_selectors_match_the_built_in_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/pipeline.toml");
        let selectors = load_pipeline_config(path).unwrap().selectors;
        assert_eq!(selectors, SelectorSection::default());
        // dismissing a dialog must never press a composer button
        for dialog in &selectors.optional_dialogs {
            assert!(!selectors.next_button.contains(dialog), "{dialog}");
            assert!(!selectors.share_button.contains(dialog), "{dialog}");
        }
    }

    #[test]
    fn empty_document_falls_back_to_defaults() {
        let config: PipelineConfig = toml::from_str("").unwrap();
        assert_eq!(config.human_simulation.action_delay_ms, [2000, 8000]);
        assert!((config.human_simulation.typo_probability - 0.02).abs() < f64::EPSILON);
        assert_eq!(config.posting.max_hashtags, 15);
        assert!(!config.chromium.headless);
    }

    #[test]
    fn partial_section_keeps_remaining_defaults() {
        let config: PipelineConfig = toml::from_str(
            "[human_simulation]\ntypo_probability = 0.1\n[compliance]\nfailure_policy = \"open\"\n",
        )
        .unwrap();
        assert!((config.human_simulation.typo_probability - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.human_simulation.typing_delay_ms, [50, 150]);
        assert_eq!(config.compliance.failure_policy, FailurePolicy::Open);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_pipeline_config("/nonexistent/pipeline.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/pipeline.toml"));
    }
}
