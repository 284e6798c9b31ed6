pub mod browser;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod services;
pub mod sqlite;
pub mod store;

pub use config::{load_pipeline_config, FailurePolicy, PipelineConfig};
pub use error::{ConfigError, Result};
pub use pipeline::{
    Phase, PhaseExecutor, PhaseResult, PipelineCoordinator, RunMode, RunState, RunStatus,
};
pub use store::{RunSummary, SqliteRunStore, SqliteRunStoreBuilder, StoreError, StoreResult};
