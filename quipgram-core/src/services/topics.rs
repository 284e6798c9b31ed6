use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{ServiceResult, TopicCandidate, TopicSource};

#[derive(Debug, Deserialize)]
struct TopicRecord {
    #[serde(default)]
    category: Option<String>,
    #[serde(flatten)]
    candidate: TopicCandidate,
}

/// Serves topic candidates that some other process already fetched and
/// stored as a JSON array.
///
/// Records without a `category` match every category.
#[derive(Debug, Clone)]
pub struct FileTopicSource {
    path: PathBuf,
}

impl FileTopicSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TopicSource for FileTopicSource {
    async fn fetch_candidates(
        &self,
        category: &str,
        max: usize,
    ) -> ServiceResult<Vec<TopicCandidate>> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let records: Vec<TopicRecord> = serde_json::from_str(&raw)?;
        let total = records.len();
        let selected = records
            .into_iter()
            .filter(|record| {
                record
                    .category
                    .as_deref()
                    .map_or(true, |value| value.eq_ignore_ascii_case(category))
            })
            .map(|record| record.candidate)
            .take(max)
            .collect::<Vec<_>>();
        debug!(
            path = %self.path.display(),
            category,
            total,
            selected = selected.len(),
            "loaded topic candidates"
        );
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn filters_by_category_and_limit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("topics.json");
        std::fs::write(
            &path,
            r#"[
                {"title": "Chip shortage", "category": "Technology", "source": "wire"},
                {"title": "Cup final", "category": "sports"},
                {"title": "AI writes poems", "description": "again"},
                {"title": "Phone batteries", "category": "technology",
                 "published_at": "2024-05-01T10:00:00Z", "url": "https://example.org/a"}
            ]"#,
        )
        .unwrap();

        let source = FileTopicSource::new(&path);
        let all = source.fetch_candidates("technology", 10).await.unwrap();
        let titles: Vec<_> = all.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, ["Chip shortage", "AI writes poems", "Phone batteries"]);
        assert!(all[2].published_at.is_some());

        let limited = source.fetch_candidates("technology", 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let source = FileTopicSource::new("/nonexistent/topics.json");
        assert!(matches!(
            source.fetch_candidates("technology", 5).await,
            Err(crate::services::ServiceError::Io(_))
        ));
    }
}
