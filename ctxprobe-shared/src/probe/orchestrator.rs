//! # Benchmark Orchestrator
//!
//! Drives each model through its context-size sweep. Every step starts from an
//! unloaded model, warms the target context, runs one timed generation,
//! samples telemetry, evaluates the stop criteria and records a row. Models
//! run strictly one after another and steps never overlap, since the
//! telemetry assumes exactly one resident model.

use crate::config::RunConfiguration;
use crate::probe::client::InferenceBackend;
use crate::probe::criteria::StopPolicy;
use crate::probe::errors::{ProbeError, ProbeResult};
use crate::probe::telemetry::TelemetrySource;
use crate::probe::types::{
    ModelDescriptor, ModelRun, ProbeStep, RunOutcome, StepMetrics, StepStatus, Verdict,
};
use crate::report::sink::{ResultRow, ResultSink};
use std::fmt;
use tracing::{Instrument, debug, info, info_span, warn};

/// Stop reason recorded when the server rejects a measurement.
pub const SERVER_ERROR_REASON: &str = "Server Error";

/// Where a model's sweep currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbePhase {
    /// Between steps
    Idle,
    /// Releasing the model
    Unloading,
    /// Warming the target context
    Preloading,
    /// Timed generation in flight
    Measuring,
    /// Writing the step's row
    Recording,
    /// Sweep finished for this model
    Stopped,
}

impl fmt::Display for ProbePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Unloading => "unloading",
            Self::Preloading => "loading",
            Self::Measuring => "testing",
            Self::Recording => "recording",
            Self::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Receives progress notifications; used for console output.
pub trait ProgressObserver: Send + Sync {
    /// A model's sweep is starting.
    fn model_started(&self, _model: &ModelDescriptor) {}

    /// A step moved to a new phase.
    fn phase_changed(&self, _model: &str, _context: u32, _phase: ProbePhase) {}

    /// A step's row has been written.
    fn step_recorded(&self, _model: &str, _step: &ProbeStep) {}

    /// A model's sweep has ended.
    fn model_finished(&self, _run: &ModelRun) {}
}

/// Observer that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {}

/// Result of one attempted step.
#[derive(Debug)]
pub enum StepOutcome {
    /// The server answered; the step carries the evaluator's verdict
    Completed(ProbeStep),
    /// The request never completed; the step carries zeroed metrics
    Aborted {
        /// The recorded step
        step: ProbeStep,
        /// What went wrong
        error: ProbeError,
    },
}

impl StepOutcome {
    /// The step to record.
    #[must_use]
    pub fn step(&self) -> &ProbeStep {
        match self {
            Self::Completed(step) | Self::Aborted { step, .. } => step,
        }
    }

    /// Whether the sweep stops after this step.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Completed(step) => step.is_terminal(),
            Self::Aborted { .. } => true,
        }
    }

    fn into_step(self) -> ProbeStep {
        match self {
            Self::Completed(step) | Self::Aborted { step, .. } => step,
        }
    }
}

/// Runs the sweep for every configured model.
#[derive(Debug)]
pub struct BenchmarkOrchestrator<B, T> {
    config: RunConfiguration,
    policy: StopPolicy,
    backend: B,
    telemetry: T,
}

impl<B, T> BenchmarkOrchestrator<B, T>
where
    B: InferenceBackend,
    T: TelemetrySource,
{
    /// Create an orchestrator for a validated configuration.
    ///
    /// # Errors
    /// Returns [`ProbeError::InvalidConfiguration`] if the configuration is invalid.
    pub fn new(config: RunConfiguration, backend: B, telemetry: T) -> ProbeResult<Self> {
        config
            .validate()
            .map_err(|errors| ProbeError::invalid_config("run", errors.join(" ")))?;
        let policy = StopPolicy::from_config(&config);
        Ok(Self {
            config,
            policy,
            backend,
            telemetry,
        })
    }

    /// The configuration this orchestrator runs.
    #[must_use]
    pub fn config(&self) -> &RunConfiguration {
        &self.config
    }

    /// Sweep every model in order.
    ///
    /// Per-model failures end only that model's sweep.
    ///
    /// # Errors
    /// Returns an error only if the result sink cannot be written.
    pub async fn run(
        &self,
        sink: &mut dyn ResultSink,
        observer: &dyn ProgressObserver,
    ) -> ProbeResult<Vec<ModelRun>> {
        let server_version = self.backend.version().await;
        info!(
            server_version = %server_version,
            models = self.config.models.len(),
            num_predict = self.config.sweep.num_predict,
            "starting sweep"
        );

        let mut runs = Vec::with_capacity(self.config.models.len());
        for model in &self.config.models {
            let span = info_span!("model_sweep", model = %model);
            let run = self
                .run_model(model, &server_version, sink, observer)
                .instrument(span)
                .await?;
            runs.push(run);
        }
        Ok(runs)
    }

    /// Sweep a single model from the start context until it stops.
    ///
    /// # Errors
    /// Returns an error only if the result sink cannot be written.
    pub async fn run_model(
        &self,
        model: &str,
        server_version: &str,
        sink: &mut dyn ResultSink,
        observer: &dyn ProgressObserver,
    ) -> ProbeResult<ModelRun> {
        let descriptor = ModelDescriptor {
            name: model.to_string(),
            digest: self.backend.digest(model).await,
        };
        info!(digest = %descriptor.digest, "testing model");
        observer.model_started(&descriptor);

        let mut steps = Vec::new();
        let mut outcome = RunOutcome::CeilingReached;

        for context in self.config.sweep.targets() {
            let attempt = self.probe_step(model, context, observer).await;
            let aborted = matches!(attempt, StepOutcome::Aborted { .. });
            let terminal = attempt.is_terminal();

            observer.phase_changed(model, context, ProbePhase::Recording);
            sink.record(&ResultRow {
                server_version,
                model: &descriptor,
                step: attempt.step(),
            })?;
            observer.step_recorded(model, attempt.step());
            steps.push(attempt.into_step());

            if terminal {
                outcome = if aborted {
                    RunOutcome::Aborted
                } else {
                    RunOutcome::Stopped
                };
                break;
            }

            observer.phase_changed(model, context, ProbePhase::Idle);
            tokio::time::sleep(self.config.timings.step_pause).await;
        }

        let run = ModelRun {
            model: descriptor,
            steps,
            outcome,
        };
        let last_context = run.steps.last().map_or(0, |step| step.target_context);
        observer.phase_changed(model, last_context, ProbePhase::Stopped);
        info!(
            outcome = ?run.outcome,
            optimal_context = ?run.optimal_context(),
            steps = run.steps.len(),
            "model finished"
        );
        observer.model_finished(&run);
        Ok(run)
    }

    /// Execute one step at `context`: unload, preload, measure, sample, evaluate.
    pub async fn probe_step(
        &self,
        model: &str,
        context: u32,
        observer: &dyn ProgressObserver,
    ) -> StepOutcome {
        observer.phase_changed(model, context, ProbePhase::Unloading);
        self.backend.unload(model).await;

        observer.phase_changed(model, context, ProbePhase::Preloading);
        self.backend.preload(model, context).await;

        observer.phase_changed(model, context, ProbePhase::Measuring);
        let measured = self
            .backend
            .measure(
                model,
                context,
                self.config.sweep.num_predict,
                self.config.measure_timeout(),
            )
            .await;
        let sample = self.telemetry.sample().await;

        match measured {
            Ok(metrics) => {
                let verdict = self.policy.evaluate(context, &metrics, &sample);
                debug!(
                    context,
                    status = %verdict.status,
                    eval_tps = metrics.eval_tps,
                    vram_gib = sample.vram_gib,
                    "step evaluated"
                );
                StepOutcome::Completed(ProbeStep::new(context, metrics, sample, verdict))
            }
            Err(ProbeError::ServerStatus { status }) => {
                warn!(context, status, "server reported failure");
                let verdict = Verdict::stop(StepStatus::FailHttp(status), SERVER_ERROR_REASON);
                StepOutcome::Completed(ProbeStep::new(
                    context,
                    StepMetrics::default(),
                    sample,
                    verdict,
                ))
            }
            Err(error) => {
                warn!(context, error = %error, "measurement aborted");
                let verdict = Verdict::stop(StepStatus::Failed, error.to_string());
                StepOutcome::Aborted {
                    step: ProbeStep::new(context, StepMetrics::default(), sample, verdict),
                    error,
                }
            }
        }
    }
}
