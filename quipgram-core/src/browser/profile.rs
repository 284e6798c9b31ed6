use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;

use super::error::{BrowserError, BrowserResult};

const LAST_USED_MARKER: &str = ".last_used";

/// A named Chromium user-data directory that survives between runs, so
/// cookies and the logged-in state carry over.
#[derive(Debug, Clone)]
pub struct BrowserProfile {
    name: String,
    path: PathBuf,
}

impl BrowserProfile {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn last_used(&self) -> BrowserResult<Option<DateTime<Utc>>> {
        let marker = self.path.join(LAST_USED_MARKER);
        match fs::read_to_string(&marker).await {
            Ok(contents) => DateTime::parse_from_rfc3339(contents.trim())
                .map(|stamp| Some(stamp.with_timezone(&Utc)))
                .map_err(|err| {
                    BrowserError::Profile(format!(
                        "corrupt marker {}: {err}",
                        marker.display()
                    ))
                }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(BrowserError::Profile(format!(
                "failed to read profile marker: {err}"
            ))),
        }
    }

    pub async fn touch(&self) -> BrowserResult<DateTime<Utc>> {
        let now = Utc::now();
        fs::write(self.path.join(LAST_USED_MARKER), now.to_rfc3339())
            .await
            .map_err(|err| BrowserError::Profile(format!("failed to update profile marker: {err}")))?;
        Ok(now)
    }
}

#[derive(Debug, Clone)]
pub struct ProfileStore {
    base_dir: PathBuf,
}

impl ProfileStore {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> BrowserResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir).map_err(|err| {
            BrowserError::Profile(format!("failed to create profile base dir: {err}"))
        })?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Opens (creating on first use) the profile called `name`.
    pub fn open(&self, name: &str) -> BrowserResult<BrowserProfile> {
        validate_name(name)?;
        let path = self.base_dir.join(name);
        std::fs::create_dir_all(&path)
            .map_err(|err| BrowserError::Profile(format!("failed to create profile dir: {err}")))?;
        Ok(BrowserProfile {
            name: name.to_string(),
            path,
        })
    }

    pub fn list(&self) -> BrowserResult<Vec<String>> {
        let entries = std::fs::read_dir(&self.base_dir).map_err(|err| {
            BrowserError::Profile(format!("failed to list profile directory: {err}"))
        })?;
        let mut names = entries
            .flatten()
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }
}

fn validate_name(name: &str) -> BrowserResult<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(BrowserError::Profile(format!("invalid profile name '{name}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn reopening_a_profile_keeps_its_directory() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profiles")).unwrap();

        let first = store.open("main").unwrap();
        assert!(first.last_used().await.unwrap().is_none());
        let stamp = first.touch().await.unwrap();

        let again = store.open("main").unwrap();
        assert_eq!(again.path(), first.path());
        let recorded = again.last_used().await.unwrap().unwrap();
        assert_eq!(recorded.timestamp(), stamp.timestamp());
        assert_eq!(store.list().unwrap(), vec!["main".to_string()]);
    }

    #[test]
    fn rejects_names_that_escape_the_base_dir() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path()).unwrap();
        for name in ["", "..", "a/b", "x\\y"] {
            assert!(
                matches!(store.open(name), Err(BrowserError::Profile(_))),
                "{name:?} accepted"
            );
        }
    }
}
