use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::config::LlmSection;

use super::{
    CategorySeverity, ContentSafety, ImageGenerator, ImageRequest, RenderedImage, ServiceError,
    ServiceResult, TextGenerator, VisionScorer,
};

const MAX_SEVERITY: u8 = 6;

/// Client for an OpenAI-compatible HTTP API.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    endpoint: Url,
    api_key: String,
    text_model: String,
    vision_model: String,
    image_model: String,
    output_dir: PathBuf,
}

impl OpenAiClient {
    /// Reads the API key from the environment variable named in `llm`.
    pub fn from_config(llm: &LlmSection, output_dir: impl Into<PathBuf>) -> ServiceResult<Self> {
        let api_key = std::env::var(&llm.api_key_env)
            .map_err(|_| ServiceError::MissingCredential(llm.api_key_env.clone()))?;
        Self::with_api_key(llm, api_key, output_dir)
    }

    pub fn with_api_key(
        llm: &LlmSection,
        api_key: impl Into<String>,
        output_dir: impl Into<PathBuf>,
    ) -> ServiceResult<Self> {
        let mut endpoint = Url::parse(&llm.endpoint)
            .map_err(|err| ServiceError::Configuration(format!("llm.endpoint: {err}")))?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(llm.timeout_seconds.max(1)))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            api_key: api_key.into(),
            text_model: llm.text_model.clone(),
            vision_model: llm.vision_model.clone(),
            image_model: llm.image_model.clone(),
            output_dir: output_dir.into(),
        })
    }

    fn url(&self, path: &str) -> ServiceResult<Url> {
        self.endpoint
            .join(path)
            .map_err(|err| ServiceError::Configuration(err.to_string()))
    }

    async fn post(&self, path: &str, body: Value) -> ServiceResult<Value> {
        let url = self.url(path)?;
        debug!(%url, "calling model endpoint");
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<Value>().await?)
    }

    async fn chat(&self, model: &str, messages: Value) -> ServiceResult<String> {
        let reply = self
            .post(
                "chat/completions",
                json!({ "model": model, "messages": messages }),
            )
            .await?;
        chat_content(&reply)
    }
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> ServiceResult<String> {
        self.chat(
            &self.text_model,
            json!([
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt },
            ]),
        )
        .await
    }
}

#[async_trait]
impl VisionScorer for OpenAiClient {
    async fn analyze_image(&self, file_path: &Path, instruction: &str) -> ServiceResult<String> {
        let bytes = tokio::fs::read(file_path).await?;
        let data_url = format!(
            "data:{};base64,{}",
            mime_for(file_path),
            STANDARD.encode(&bytes)
        );
        self.chat(
            &self.vision_model,
            json!([{
                "role": "user",
                "content": [
                    { "type": "text", "text": instruction },
                    { "type": "image_url", "image_url": { "url": data_url } },
                ],
            }]),
        )
        .await
    }
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    b64_json: Option<String>,
    revised_prompt: Option<String>,
}

#[async_trait]
impl ImageGenerator for OpenAiClient {
    async fn generate(&self, request: &ImageRequest) -> ServiceResult<RenderedImage> {
        let reply = self
            .post(
                "images/generations",
                json!({
                    "model": self.image_model,
                    "prompt": request.prompt,
                    "size": request.size,
                    "quality": request.quality,
                    "style": request.style,
                    "n": 1,
                    "response_format": "b64_json",
                }),
            )
            .await?;
        let parsed: ImagesResponse = serde_json::from_value(reply)?;
        let datum = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::InvalidResponse("image response had no data".into()))?;
        let encoded = datum
            .b64_json
            .ok_or_else(|| ServiceError::InvalidResponse("image response had no b64_json".into()))?;
        let bytes = STANDARD
            .decode(encoded.as_bytes())
            .map_err(|err| ServiceError::InvalidResponse(format!("bad base64 image: {err}")))?;

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let file_path = self.output_dir.join(format!("{}.png", Uuid::new_v4()));
        tokio::fs::write(&file_path, &bytes).await?;
        Ok(RenderedImage {
            file_path,
            revised_prompt: datum.revised_prompt,
        })
    }
}

#[async_trait]
impl ContentSafety for OpenAiClient {
    async fn analyze_text(&self, text: &str) -> ServiceResult<Vec<CategorySeverity>> {
        let reply = self.post("moderations", json!({ "input": text })).await?;
        moderation_severities(&reply)
    }
}

fn chat_content(reply: &Value) -> ServiceResult<String> {
    reply
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ServiceError::InvalidResponse("chat reply had no message content".into()))
}

/// Maps moderation probabilities onto the 0..=6 severity scale.
fn moderation_severities(reply: &Value) -> ServiceResult<Vec<CategorySeverity>> {
    let scores = reply
        .pointer("/results/0/category_scores")
        .and_then(Value::as_object)
        .ok_or_else(|| ServiceError::InvalidResponse("moderation reply had no scores".into()))?;
    let ordered: BTreeMap<_, _> = scores.iter().collect();
    Ok(ordered
        .into_iter()
        .filter_map(|(category, score)| {
            score.as_f64().map(|score| CategorySeverity {
                category: category.clone(),
                severity: (score.clamp(0.0, 1.0) * f64::from(MAX_SEVERITY)).round() as u8,
            })
        })
        .collect())
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/png",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_choice_content() {
        let reply = json!({ "choices": [{ "message": { "role": "assistant", "content": "hi" } }] });
        assert_eq!(chat_content(&reply).unwrap(), "hi");
        assert!(matches!(
            chat_content(&json!({ "choices": [] })),
            Err(ServiceError::InvalidResponse(_))
        ));
    }

    #[test]
    fn moderation_scores_scale_to_severity() {
        let reply = json!({ "results": [{ "category_scores": {
            "violence": 0.5, "hate": 0.01, "sexual": 1.0
        } }] });
        let severities = moderation_severities(&reply).unwrap();
        assert_eq!(
            severities,
            vec![
                CategorySeverity { category: "hate".into(), severity: 0 },
                CategorySeverity { category: "sexual".into(), severity: 6 },
                CategorySeverity { category: "violence".into(), severity: 3 },
            ]
        );
    }

    #[test]
    fn picks_mime_from_extension() {
        assert_eq!(mime_for(Path::new("a/b.JPG")), "image/jpeg");
        assert_eq!(mime_for(Path::new("a/b.png")), "image/png");
        assert_eq!(mime_for(Path::new("a/b")), "image/png");
    }

    #[test]
    fn endpoint_paths_join_under_the_base() {
        let llm = LlmSection {
            endpoint: "https://llm.internal/v1".into(),
            ..LlmSection::default()
        };
        let client = OpenAiClient::with_api_key(&llm, "key", "/tmp/out").unwrap();
        assert_eq!(
            client.url("chat/completions").unwrap().as_str(),
            "https://llm.internal/v1/chat/completions"
        );
    }

    #[test]
    fn missing_key_is_reported_by_name() {
        let llm = LlmSection {
            api_key_env: "QUIPGRAM_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..LlmSection::default()
        };
        let err = OpenAiClient::from_config(&llm, "/tmp/out").unwrap_err();
        assert!(err.to_string().contains("QUIPGRAM_TEST_KEY_THAT_IS_NEVER_SET"));
    }
}
