use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::executor::{Phase, PhaseExecutor, ProgressSink, TracingProgress};
use super::types::{
    EvaluationResult, GenerationResult, PhaseResult, PostingRequest, PostingResult, RunMode,
    RunState, TrendRequest, TrendResult,
};

pub type TrendExecutor = dyn PhaseExecutor<Input = TrendRequest, Output = TrendResult>;
pub type GenerationExecutor = dyn PhaseExecutor<Input = TrendResult, Output = GenerationResult>;
pub type EvaluationExecutor =
    dyn PhaseExecutor<Input = GenerationResult, Output = EvaluationResult>;
pub type PostingExecutor = dyn PhaseExecutor<Input = PostingRequest, Output = PostingResult>;

/// Runs the four phases in order, feeding each output into the next input.
///
/// The first `Failure` ends the run: the state records the failing phase and
/// reason, keeps every earlier result, and later phases are never invoked.
/// Retrying is the caller's business.
pub struct PipelineCoordinator {
    trend: Arc<TrendExecutor>,
    generation: Arc<GenerationExecutor>,
    evaluation: Arc<EvaluationExecutor>,
    posting: Arc<PostingExecutor>,
    progress: Arc<dyn ProgressSink>,
}

impl PipelineCoordinator {
    pub fn new(
        trend: Arc<TrendExecutor>,
        generation: Arc<GenerationExecutor>,
        evaluation: Arc<EvaluationExecutor>,
        posting: Arc<PostingExecutor>,
    ) -> Self {
        Self {
            trend,
            generation,
            evaluation,
            posting,
            progress: Arc::new(TracingProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub async fn run(&self, category: &str, mode: RunMode, cancel: &CancellationToken) -> RunState {
        let mut state = RunState::new(mode, category);
        info!(run_id = %state.run_id, mode = %mode, category, "pipeline run started");

        let request = TrendRequest {
            category: category.to_string(),
        };
        let result = self.advance(&mut state, self.trend.as_ref(), &request, cancel).await;
        let Some(trend) = settle(&mut state, Phase::TrendAnalysis, result, |s, v| s.trend = Some(v))
        else {
            return self.finish(state);
        };
        if !mode.includes(Phase::ImageGeneration) {
            return self.finish_completed(state);
        }

        let result = self
            .advance(&mut state, self.generation.as_ref(), &trend, cancel)
            .await;
        let Some(generation) = settle(&mut state, Phase::ImageGeneration, result, |s, v| {
            s.generation = Some(v)
        }) else {
            return self.finish(state);
        };
        if !mode.includes(Phase::ImageEvaluation) {
            return self.finish_completed(state);
        }

        let result = self
            .advance(&mut state, self.evaluation.as_ref(), &generation, cancel)
            .await;
        let Some(evaluation) = settle(&mut state, Phase::ImageEvaluation, result, |s, v| {
            s.evaluation = Some(v)
        }) else {
            return self.finish(state);
        };

        let request = PostingRequest {
            trend,
            evaluation,
            dry_run: mode == RunMode::DryRun,
        };
        let result = self
            .advance(&mut state, self.posting.as_ref(), &request, cancel)
            .await;
        if settle(&mut state, Phase::InstagramPosting, result, |s, v| s.posting = Some(v)).is_none()
        {
            return self.finish(state);
        }
        self.finish_completed(state)
    }

    async fn advance<E>(
        &self,
        state: &mut RunState,
        executor: &E,
        input: &E::Input,
        cancel: &CancellationToken,
    ) -> (Phase, PhaseResult<E::Output>)
    where
        E: PhaseExecutor + ?Sized,
    {
        let phase = executor.phase();
        state.begin(phase);
        self.progress.report(phase, "start", phase.activity());
        if cancel.is_cancelled() {
            return (phase, PhaseResult::failure("cancelled before start", true));
        }
        let result = executor.execute(input, self.progress.as_ref(), cancel).await;
        (phase, result)
    }

    fn finish_completed(&self, mut state: RunState) -> RunState {
        state.complete();
        self.finish(state)
    }

    fn finish(&self, state: RunState) -> RunState {
        match state.failed_phase {
            Some(phase) => warn!(
                run_id = %state.run_id,
                phase = %phase,
                reason = state.error_message.as_deref().unwrap_or_default(),
                "pipeline run failed"
            ),
            None => info!(run_id = %state.run_id, status = %state.status, "pipeline run finished"),
        }
        state
    }
}

/// Records a phase outcome on the run. The failing phase comes from the
/// executor's own identity; `expected` only guards against miswiring.
fn settle<T: Clone>(
    state: &mut RunState,
    expected: Phase,
    (phase, result): (Phase, PhaseResult<T>),
    store: fn(&mut RunState, T),
) -> Option<T> {
    if phase != expected {
        warn!(expected = %expected, actual = %phase, "executor reports an unexpected phase");
    }
    match result {
        PhaseResult::Success(value) => {
            store(state, value.clone());
            Some(value)
        }
        PhaseResult::Failure {
            reason,
            retryable,
            partial,
        } => {
            if let Some(partial) = partial {
                store(state, partial);
            }
            state.fail(phase, reason, retryable);
            None
        }
    }
}
