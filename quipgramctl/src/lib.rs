use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use quipgram_core::browser::{
    BrowserError, BrowserSessionManager, ChromiumLauncher, HumanBehaviorSimulator,
    Keystroke, Point, ProfileStore,
};
use quipgram_core::pipeline::{
    ComplianceDecision, ComplianceGate, ImageEvaluationPhase, ImageGenerationPhase,
    InstagramPostingPhase, PipelineCoordinator, PostingSelectors, RunMode, RunState,
    TrendAnalysisPhase,
};
use quipgram_core::services::{ContentSafety, FileTopicSource, OpenAiClient, ServiceError};
use quipgram_core::{load_pipeline_config, PipelineConfig, RunSummary, SqliteRunStore, StoreError};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] quipgram_core::ConfigError),
    #[error("run store error: {0}")]
    Store(#[from] StoreError),
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
    #[error("service error: {0}")]
    Service(#[from] ServiceError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("run {0} not found")]
    RunNotFound(Uuid),
    #[error("run {run_id} failed during {phase}: {reason}")]
    RunFailed {
        run_id: Uuid,
        phase: String,
        reason: String,
    },
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Quipgram content pipeline control interface", long_about = None)]
pub struct Cli {
    /// Path to pipeline.toml
    #[arg(long, default_value = "configs/pipeline.toml")]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Log filter (overrides RUST_LOG), e.g. `debug` or `quipgram_core=trace`
    #[arg(long)]
    pub log_level: Option<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Runs the pipeline once and records the result
    Run(RunArgs),
    /// Reads recorded runs
    #[command(subcommand)]
    Runs(RunsCommands),
    /// Previews what the behaviour profile produces, without a browser
    #[command(subcommand)]
    Simulate(SimulateCommands),
    /// Prints a shell completion script
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Topic category (defaults to trend.category)
    #[arg(long)]
    pub category: Option<String>,
    #[arg(long, value_parser = parse_mode, default_value = "full")]
    pub mode: RunMode,
    /// Run Chromium headless regardless of chromium.headless
    #[arg(long, default_value_t = false)]
    pub headless: bool,
    /// JSON file with already-fetched topic candidates
    #[arg(long, default_value = "data/topics.json")]
    pub topics_file: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum RunsCommands {
    /// Most recent runs first
    List {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Full record of one run
    Show { run_id: Uuid },
}

#[derive(Subcommand, Debug)]
pub enum SimulateCommands {
    /// Keystroke plan for typing `text`
    Typing {
        text: String,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Cursor path between two points
    Path {
        #[arg(long, value_parser = parse_point)]
        from: Point,
        #[arg(long, value_parser = parse_point)]
        to: Point,
        /// Defaults to human_simulation.cursor_steps
        #[arg(long)]
        steps: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn parse_mode(value: &str) -> std::result::Result<RunMode, String> {
    value.parse()
}

fn parse_point(value: &str) -> std::result::Result<Point, String> {
    value.parse::<Point>().map_err(|err| err.to_string())
}

pub async fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(
            *shell,
            &mut Cli::command(),
            "quipgramctl",
            &mut std::io::stdout(),
        );
        return Ok(());
    }

    let config = load_pipeline_config(&cli.config)?;
    match &cli.command {
        Commands::Run(args) => {
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, cancelling run");
                    trigger.cancel();
                }
            });

            let state = execute_run(config, args, &cancel).await?;
            render(&state, cli.format)?;
            if let Some(phase) = state.failed_phase {
                return Err(AppError::RunFailed {
                    run_id: state.run_id,
                    phase: phase.to_string(),
                    reason: state.error_message.clone().unwrap_or_default(),
                });
            }
        }
        Commands::Runs(RunsCommands::List { limit }) => {
            let store = open_store(&config)?;
            let runs = RunListing(store.list_recent(*limit)?);
            render(&runs, cli.format)?;
        }
        Commands::Runs(RunsCommands::Show { run_id }) => {
            let store = open_store(&config)?;
            let state = store.load(*run_id)?.ok_or(AppError::RunNotFound(*run_id))?;
            render(&state, cli.format)?;
        }
        Commands::Simulate(SimulateCommands::Typing { text, seed }) => {
            let report = simulate_typing(&config, text, *seed)?;
            render(&report, cli.format)?;
        }
        Commands::Simulate(SimulateCommands::Path {
            from,
            to,
            steps,
            seed,
        }) => {
            let report = simulate_path(&config, *from, *to, *steps, *seed)?;
            render(&report, cli.format)?;
        }
        Commands::Completions { .. } => {}
    }
    Ok(())
}

fn open_store(config: &PipelineConfig) -> Result<SqliteRunStore> {
    let store = SqliteRunStore::new(&config.storage.runs_db)?;
    store.initialize()?;
    Ok(store)
}

/// Wires the real collaborators from `config`, runs the pipeline and
/// records the final state.
pub async fn execute_run(
    mut config: PipelineConfig,
    args: &RunArgs,
    cancel: &CancellationToken,
) -> Result<RunState> {
    if args.headless {
        config.chromium.headless = true;
    }
    let category = args
        .category
        .clone()
        .unwrap_or_else(|| config.trend.category.clone());
    let profile = config.behavior_profile()?;

    let client = Arc::new(OpenAiClient::from_config(
        &config.llm,
        &config.images.output_dir,
    )?);
    let safety: Option<Arc<dyn ContentSafety>> = if config.compliance.enabled {
        Some(client.clone() as Arc<dyn ContentSafety>)
    } else {
        None
    };
    let launcher = Arc::new(ChromiumLauncher::new(
        config.chromium.clone(),
        ProfileStore::new(&config.chromium.profile_dir)?,
    ));
    let sessions = BrowserSessionManager::new(
        launcher,
        profile,
        config.chromium.headless,
        cancel.child_token(),
    );

    let coordinator = PipelineCoordinator::new(
        Arc::new(TrendAnalysisPhase::new(
            Arc::new(FileTopicSource::new(&args.topics_file)),
            client.clone(),
            config.trend.clone(),
        )),
        Arc::new(ImageGenerationPhase::new(client.clone(), config.images.clone())),
        Arc::new(ImageEvaluationPhase::new(client.clone(), config.evaluation.clone())),
        Arc::new(InstagramPostingPhase::new(
            Arc::new(Mutex::new(sessions)),
            client,
            ComplianceGate::new(safety, config.compliance.clone()),
            config.posting.clone(),
            PostingSelectors::from(&config.selectors),
        )),
    );

    let state = coordinator.run(&category, args.mode, cancel).await;
    let store = open_store(&config)?;
    store.save(&state)?;
    info!(run_id = %state.run_id, db = %store.path().display(), "run recorded");
    Ok(state)
}

#[derive(Debug, Serialize)]
pub struct TypingReport {
    pub text: String,
    pub keystrokes: Vec<Keystroke>,
    pub typos: usize,
    pub total_pause_ms: u128,
}

#[derive(Debug, Serialize)]
pub struct PathReport {
    pub from: Point,
    pub to: Point,
    pub points: Vec<Point>,
}

pub fn simulate_typing(config: &PipelineConfig, text: &str, seed: Option<u64>) -> Result<TypingReport> {
    let profile = config.behavior_profile()?;
    let mut simulator = match seed {
        Some(seed) => HumanBehaviorSimulator::seeded(profile, seed),
        None => HumanBehaviorSimulator::new(profile),
    };
    let keystrokes = simulator.plan_keystrokes(text);
    let typos = keystrokes
        .iter()
        .filter(|key| matches!(key, Keystroke::Backspace))
        .count();
    let total_pause_ms = keystrokes
        .iter()
        .map(|key| match key {
            Keystroke::Pause(duration) => duration.as_millis(),
            _ => 0,
        })
        .sum();
    Ok(TypingReport {
        text: text.to_string(),
        keystrokes,
        typos,
        total_pause_ms,
    })
}

pub fn simulate_path(
    config: &PipelineConfig,
    from: Point,
    to: Point,
    steps: Option<usize>,
    seed: Option<u64>,
) -> Result<PathReport> {
    let profile = config.behavior_profile()?;
    let steps = steps.unwrap_or_else(|| profile.cursor_steps());
    let mut simulator = match seed {
        Some(seed) => HumanBehaviorSimulator::seeded(profile, seed),
        None => HumanBehaviorSimulator::new(profile),
    };
    Ok(PathReport {
        from,
        to,
        points: simulator.bezier_path(from, to, steps),
    })
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

impl DisplayFallback for RunState {
    fn display(&self) -> String {
        let mut out = format!(
            "run {} ({}, {}): {}\n",
            self.run_id, self.mode, self.category, self.status
        );
        if let Some(trend) = &self.trend {
            let _ = writeln!(
                out,
                "  trend:      {} (virality {}{})",
                trend.topic.title,
                trend.virality_score,
                if trend.used_fallback { ", fallback" } else { "" }
            );
        }
        if let Some(generation) = &self.generation {
            let _ = writeln!(
                out,
                "  generation: {}/{} images, {} failed",
                generation.images.len(),
                generation.requested,
                generation.failed
            );
        }
        if let Some(evaluation) = &self.evaluation {
            let _ = writeln!(
                out,
                "  evaluation: {} scored {:.2} ({} degraded)",
                evaluation.selected.file_path.display(),
                evaluation.selected_score.overall_score(),
                evaluation.degraded
            );
        }
        if let Some(posting) = &self.posting {
            let outcome = if posting.dry_run {
                "dry run"
            } else if posting.posted {
                "posted"
            } else {
                "not posted"
            };
            let compliance = match &posting.compliance {
                ComplianceDecision::Skipped => "skipped".to_string(),
                ComplianceDecision::Approved { max_severity } => {
                    format!("approved (max severity {max_severity})")
                }
                ComplianceDecision::Blocked { reason, .. } => format!("blocked: {reason}"),
                ComplianceDecision::Unverified { reason } => format!("unverified: {reason}"),
            };
            let _ = writeln!(out, "  posting:    {outcome}, compliance {compliance}");
            let _ = writeln!(out, "  caption:    {}", posting.caption.replace('\n', " "));
        }
        if let Some(phase) = self.failed_phase {
            let _ = writeln!(
                out,
                "  failed in {phase}: {} (retryable: {})",
                self.error_message.as_deref().unwrap_or("unknown"),
                if self.failure_retryable == Some(true) { "yes" } else { "no" }
            );
        }
        out.trim_end().to_string()
    }
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
struct RunListing(Vec<RunSummary>);

impl DisplayFallback for RunListing {
    fn display(&self) -> String {
        if self.0.is_empty() {
            return "no recorded runs".to_string();
        }
        let mut out = String::new();
        for run in &self.0 {
            let started = run
                .started_at
                .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string());
            let _ = write!(
                out,
                "{}  {:<13} {:<12} {:<10} {}",
                run.run_id, run.mode, run.category, run.status, started
            );
            if let Some(phase) = &run.failed_phase {
                let _ = write!(out, "  [{phase}]");
            }
            out.push('\n');
        }
        out.trim_end().to_string()
    }
}

impl DisplayFallback for TypingReport {
    fn display(&self) -> String {
        let mut out = String::new();
        for key in &self.keystrokes {
            match key {
                Keystroke::Char(ch) => out.push(*ch),
                Keystroke::Backspace => out.push('⌫'),
                Keystroke::Pause(_) => {}
            }
        }
        format!(
            "{out}\n{} keystrokes, {} typos corrected, {} ms of pauses",
            self.keystrokes
                .iter()
                .filter(|key| !matches!(key, Keystroke::Pause(_)))
                .count(),
            self.typos,
            self.total_pause_ms
        )
    }
}

impl DisplayFallback for PathReport {
    fn display(&self) -> String {
        self.points
            .iter()
            .map(|point| format!("{:.1},{:.1}", point.x, point.y))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_config() -> PipelineConfig {
        load_pipeline_config("../configs/pipeline.toml").unwrap()
    }

    #[test]
    fn parses_run_arguments() {
        let cli = Cli::try_parse_from([
            "quipgramctl",
            "--format",
            "json",
            "run",
            "--category",
            "science",
            "--mode",
            "dry-run",
            "--headless",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.category.as_deref(), Some("science"));
                assert_eq!(args.mode, RunMode::DryRun);
                assert!(args.headless);
                assert_eq!(args.topics_file, PathBuf::from("data/topics.json"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_modes() {
        assert!(Cli::try_parse_from(["quipgramctl", "run", "--mode", "sometimes"]).is_err());
    }

    #[test]
    fn parses_points() {
        assert_eq!(parse_point("10, 20.5").unwrap(), Point::new(10.0, 20.5));
        assert!(parse_point("10").is_err());
        assert!(parse_point("a,b").is_err());
        assert!(parse_point("inf,1").is_err());
    }

    #[test]
    fn seeded_typing_preview_is_reproducible() {
        let config = reference_config();
        let first = simulate_typing(&config, "hello world", Some(9)).unwrap();
        let second = simulate_typing(&config, "hello world", Some(9)).unwrap();
        assert_eq!(first.keystrokes, second.keystrokes);
        let typed: String = first
            .keystrokes
            .iter()
            .filter_map(|key| match key {
                Keystroke::Char(ch) => Some(*ch),
                _ => None,
            })
            .collect();
        assert_eq!(typed.chars().count(), 11 + first.typos);
        assert!(first.total_pause_ms > 0);
    }

    #[test]
    fn path_preview_ends_on_target() {
        let config = reference_config();
        let from = Point::new(0.0, 0.0);
        let to = Point::new(300.0, 120.0);
        let report = simulate_path(&config, from, to, Some(12), Some(4)).unwrap();
        assert_eq!(report.points.first(), Some(&from));
        assert_eq!(report.points.last(), Some(&to));
    }

    #[test]
    fn run_listing_text_marks_failed_phase() {
        let listing = RunListing(vec![RunSummary {
            run_id: "3f1c".into(),
            mode: "full".into(),
            category: "technology".into(),
            status: "failed".into(),
            failed_phase: Some("image_generation".into()),
            error_message: Some("boom".into()),
            started_at: None,
            completed_at: None,
        }]);
        let text = listing.display();
        assert!(text.starts_with("3f1c"));
        assert!(text.ends_with("[image_generation]"));
        assert_eq!(RunListing(Vec::new()).display(), "no recorded runs");
    }

    #[test]
    fn run_state_text_reports_failure() {
        let mut state = RunState::new(RunMode::Full, "technology");
        state.failed_phase = Some(quipgram_core::Phase::ImageGeneration);
        state.error_message = Some("all 4 image generation requests failed".into());
        state.failure_retryable = Some(false);
        let text = state.display();
        assert!(text.contains("failed in image_generation"));
        assert!(text.contains("retryable: no"));
    }
}
