use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::pipeline::RunState;
use crate::sqlite::configure_connection;

const RUNS_SCHEMA: &str = include_str!("../../sql/runs.sql");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open run database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on run database: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("run state serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("run store path not configured")]
    MissingStore,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One row of the run listing, without the full state document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub mode: String,
    pub category: String,
    pub status: String,
    pub failed_phase: Option<String>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunSummary {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            run_id: row.get("run_id")?,
            mode: row.get("mode")?,
            category: row.get("category")?,
            status: row.get("status")?,
            failed_phase: row.get("failed_phase")?,
            error_message: row.get("error_message")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SqliteRunStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for SqliteRunStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl SqliteRunStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> StoreResult<SqliteRunStore> {
        let path = self.path.ok_or(StoreError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }
        Ok(SqliteRunStore { path, flags })
    }
}

/// Persists final [`RunState`] records as JSON, with the fields worth
/// filtering on kept in their own indexed columns.
#[derive(Debug, Clone)]
pub struct SqliteRunStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteRunStore {
    pub fn builder() -> SqliteRunStoreBuilder {
        SqliteRunStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        SqliteRunStoreBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> StoreResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            StoreError::Open {
                source,
                path: self.path.clone(),
            }
        })?;
        configure_connection(&conn).map_err(|source| StoreError::Open {
            source,
            path: self.path.clone(),
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute_batch(RUNS_SCHEMA)?;
        Ok(())
    }

    /// Inserts or replaces the record for `state.run_id`.
    pub fn save(&self, state: &RunState) -> StoreResult<()> {
        let conn = self.open()?;
        let document = serde_json::to_string(state)?;
        conn.execute(
            "INSERT INTO pipeline_runs (run_id, mode, category, status, failed_phase, error_message, \
             started_at, completed_at, saved_at, state_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
             ON CONFLICT(run_id) DO UPDATE SET \
             mode = excluded.mode, category = excluded.category, status = excluded.status, \
             failed_phase = excluded.failed_phase, error_message = excluded.error_message, \
             started_at = excluded.started_at, completed_at = excluded.completed_at, \
             saved_at = excluded.saved_at, state_json = excluded.state_json",
            params![
                state.run_id.to_string(),
                state.mode.as_str(),
                state.category,
                state.status.label(),
                state.failed_phase.map(|phase| phase.as_str()),
                state.error_message,
                state.started_at,
                state.completed_at,
                Utc::now(),
                document,
            ],
        )?;
        Ok(())
    }

    pub fn load(&self, run_id: Uuid) -> StoreResult<Option<RunState>> {
        let conn = self.open()?;
        let document: Option<String> = conn
            .query_row(
                "SELECT state_json FROM pipeline_runs WHERE run_id = ?1",
                params![run_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        document
            .map(|document| serde_json::from_str(&document).map_err(StoreError::from))
            .transpose()
    }

    /// Most recent runs first.
    pub fn list_recent(&self, limit: usize) -> StoreResult<Vec<RunSummary>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, mode, category, status, failed_phase, error_message, started_at, completed_at \
             FROM pipeline_runs ORDER BY COALESCE(started_at, saved_at) DESC, saved_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], RunSummary::from_row)?;
        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row?);
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Phase, RunMode, RunStatus};
    use tempfile::tempdir;

    #[test]
    fn builder_requires_a_path() {
        assert!(matches!(
            SqliteRunStore::builder().build(),
            Err(StoreError::MissingStore)
        ));
    }

    #[test]
    fn status_columns_follow_the_state() {
        let dir = tempdir().unwrap();
        let store = SqliteRunStore::new(dir.path().join("nested/runs.sqlite")).unwrap();
        store.initialize().unwrap();

        let mut state = RunState::new(RunMode::Full, "technology");
        state.status = RunStatus::Failed;
        state.failed_phase = Some(Phase::ImageGeneration);
        state.error_message = Some("all 4 image generation requests failed".into());
        state.started_at = Some(Utc::now());
        store.save(&state).unwrap();

        let listed = store.list_recent(10).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, "failed");
        assert_eq!(listed[0].failed_phase.as_deref(), Some("image_generation"));
        assert_eq!(listed[0].mode, "full");
    }

    #[test]
    fn saving_twice_updates_the_same_row() {
        let dir = tempdir().unwrap();
        let store = SqliteRunStore::new(dir.path().join("runs.sqlite")).unwrap();
        store.initialize().unwrap();

        let mut state = RunState::new(RunMode::DryRun, "science");
        state.status = RunStatus::Running(Phase::TrendAnalysis);
        state.started_at = Some(Utc::now());
        store.save(&state).unwrap();
        state.status = RunStatus::Completed;
        state.completed_at = Some(Utc::now());
        store.save(&state).unwrap();

        let listed = store.list_recent(10).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, "completed");

        let loaded = store.load(state.run_id).unwrap().unwrap();
        assert_eq!(loaded, state);
        assert!(store.load(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn read_only_store_requires_an_existing_file() {
        let dir = tempdir().unwrap();
        let store = SqliteRunStore::builder()
            .path(dir.path().join("absent.sqlite"))
            .read_only(true)
            .build()
            .unwrap();
        assert!(matches!(store.list_recent(5), Err(StoreError::Open { .. })));
    }
}
