use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ImagesSection;
use crate::services::{ImageGenerator, ImageRequest};

use super::executor::{Phase, PhaseExecutor, ProgressSink};
use super::types::{GeneratedImage, GenerationResult, ImageMetadata, PhaseResult, TrendResult};

const DEFAULT_STYLE: &str = "vivid";

/// Requests the configured number of variations one at a time, pausing
/// between requests. Succeeds when at least one image came back.
pub struct ImageGenerationPhase {
    generator: Arc<dyn ImageGenerator>,
    config: ImagesSection,
}

impl ImageGenerationPhase {
    pub fn new(generator: Arc<dyn ImageGenerator>, config: ImagesSection) -> Self {
        Self { generator, config }
    }

    fn style_for(&self, index: usize) -> String {
        if self.config.styles.is_empty() {
            DEFAULT_STYLE.to_string()
        } else {
            self.config.styles[index % self.config.styles.len()].clone()
        }
    }
}

#[async_trait]
impl PhaseExecutor for ImageGenerationPhase {
    type Input = TrendResult;
    type Output = GenerationResult;

    fn phase(&self) -> Phase {
        Phase::ImageGeneration
    }

    async fn execute(
        &self,
        input: &TrendResult,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> PhaseResult<GenerationResult> {
        let requested = self.config.variations;
        let delay = Duration::from_millis(self.config.request_delay_ms);
        let mut result = GenerationResult {
            images: Vec::with_capacity(requested),
            requested,
            failed: 0,
        };

        for index in 0..requested {
            if index > 0 && !delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return PhaseResult::failure_with("cancelled", true, result);
                    }
                    _ = sleep(delay) => {}
                }
            }
            if cancel.is_cancelled() {
                return PhaseResult::failure_with("cancelled", true, result);
            }

            let request = ImageRequest {
                prompt: input.image_prompt.clone(),
                size: self.config.size.clone(),
                quality: self.config.quality.clone(),
                style: self.style_for(index),
            };
            progress.report(
                self.phase(),
                "generate",
                &format!("variation {}/{} ({})", index + 1, requested, request.style),
            );

            let rendered = tokio::select! {
                _ = cancel.cancelled() => {
                    return PhaseResult::failure_with("cancelled", true, result);
                }
                rendered = self.generator.generate(&request) => rendered,
            };
            match rendered {
                Ok(rendered) => {
                    let metadata = read_metadata(rendered.file_path.clone()).await;
                    result.images.push(GeneratedImage {
                        id: Uuid::new_v4(),
                        file_path: rendered.file_path,
                        prompt: request.prompt,
                        revised_prompt: rendered.revised_prompt,
                        size: request.size,
                        quality: request.quality,
                        style: request.style,
                        generated_at: Utc::now(),
                        metadata,
                    });
                }
                Err(err) => {
                    result.failed += 1;
                    warn!(variation = index + 1, error = %err, "image generation request failed");
                }
            }
        }

        if result.images.is_empty() {
            return PhaseResult::failure(
                format!("all {requested} image generation requests failed"),
                false,
            );
        }
        info!(
            generated = result.images.len(),
            failed = result.failed,
            "image generation finished"
        );
        PhaseResult::Success(result)
    }
}

/// Best effort: an unreadable file just has no metadata.
async fn read_metadata(path: PathBuf) -> Option<ImageMetadata> {
    match tokio::task::spawn_blocking(move || probe_image(&path)).await {
        Ok(Ok(metadata)) => Some(metadata),
        Ok(Err(err)) => {
            debug!(error = %err, "could not read image metadata");
            None
        }
        Err(err) => {
            debug!(error = %err, "metadata task failed");
            None
        }
    }
}

fn probe_image(path: &Path) -> Result<ImageMetadata, String> {
    let file_size_bytes = std::fs::metadata(path)
        .map_err(|err| err.to_string())?
        .len();
    let reader = image::io::Reader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|err| err.to_string())?;
    let format = reader
        .format()
        .map(|format| format!("{format:?}").to_ascii_lowercase())
        .unwrap_or_else(|| "unknown".into());
    let (width, height) = reader.into_dimensions().map_err(|err| err.to_string())?;
    Ok(ImageMetadata {
        file_size_bytes,
        width,
        height,
        format,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn probes_png_dimensions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tiny.png");
        image::RgbImage::new(3, 2).save(&path).unwrap();

        let metadata = probe_image(&path).unwrap();
        assert_eq!((metadata.width, metadata.height), (3, 2));
        assert_eq!(metadata.format, "png");
        assert!(metadata.file_size_bytes > 0);
    }

    #[test]
    fn missing_file_has_no_metadata() {
        assert!(probe_image(Path::new("/nonexistent/image.png")).is_err());
    }
}
