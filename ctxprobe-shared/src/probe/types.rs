//! # Probe Types
//!
//! Data carried through one probing step: raw server metrics, the telemetry
//! sample, the evaluator's verdict and the final record.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Memory report parsed from the inference server's log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Total resident size of the model, in GiB
    pub size_gib: f64,
    /// Portion resident in VRAM, in GiB
    pub vram_gib: f64,
    /// `vram / size * 100`, or 0 when size is 0
    pub percent: f64,
}

impl TelemetrySample {
    /// The sample reported when no telemetry is available.
    pub const ZERO: Self = Self {
        size_gib: 0.0,
        vram_gib: 0.0,
        percent: 0.0,
    };

    /// Build a sample from size and VRAM, deriving the offload percentage.
    #[must_use]
    pub fn new(size_gib: f64, vram_gib: f64) -> Self {
        let percent = if size_gib > 0.0 {
            vram_gib / size_gib * 100.0
        } else {
            0.0
        };
        Self {
            size_gib,
            vram_gib,
            percent,
        }
    }

    /// Estimated system RAM held by the model, floored at zero.
    #[must_use]
    pub fn sys_ram_gib(&self) -> f64 {
        (self.size_gib - self.vram_gib).max(0.0)
    }
}

/// Metrics normalised from one successful generate response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StepMetrics {
    /// Prompt tokens the server actually evaluated
    pub actual_context: u32,
    /// Tokens generated
    pub generated_tokens: u32,
    /// Generation throughput, tokens per second
    pub eval_tps: f64,
    /// Prompt processing throughput, tokens per second
    pub prompt_tps: f64,
    /// Total request duration, seconds
    pub total_duration_secs: f64,
}

/// Status tag attached to every recorded step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    /// All criteria passed
    Ok,
    /// The server accepted fewer tokens than requested
    Truncated(u32),
    /// Too little of the model was offloaded to the GPU
    FailGpu,
    /// VRAM budget exceeded
    FailVram,
    /// System-RAM budget exceeded
    FailRam,
    /// Generation too slow
    FailSpeed,
    /// Request took too long
    FailTime,
    /// The server answered with a non-success status
    FailHttp(u16),
    /// The request never produced a response (timeout, transport error)
    Failed,
}

impl StepStatus {
    /// Whether a sweep stops after a step with this status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Ok)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("OK"),
            Self::Truncated(actual) => write!(f, "TRUNCATED ({actual})"),
            Self::FailGpu => f.write_str("FAIL_GPU_%"),
            Self::FailVram => f.write_str("FAIL_VRAM"),
            Self::FailRam => f.write_str("FAIL_RAM"),
            Self::FailSpeed => f.write_str("FAIL_SPEED"),
            Self::FailTime => f.write_str("FAIL_TIME"),
            Self::FailHttp(code) => write!(f, "FAIL_{code}"),
            Self::Failed => f.write_str("FAIL"),
        }
    }
}

/// Outcome of the stop-criteria evaluation for one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Status tag
    pub status: StepStatus,
    /// Human-readable reason, empty unless the step stops the sweep
    pub stop_reason: String,
}

impl Verdict {
    /// A passing verdict.
    #[must_use]
    pub fn pass() -> Self {
        Self {
            status: StepStatus::Ok,
            stop_reason: String::new(),
        }
    }

    /// A terminal verdict with the given status and reason.
    #[must_use]
    pub fn stop(status: StepStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            stop_reason: reason.into(),
        }
    }

    /// Whether the sweep must stop.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// One recorded iteration of a model's sweep.
///
/// Numeric fields not obtained before a failure stay at zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeStep {
    /// When the step was attempted
    pub timestamp: DateTime<Local>,
    /// Requested context size
    pub target_context: u32,
    /// Server-side metrics; zeroed when the request failed
    pub metrics: StepMetrics,
    /// Telemetry sampled after the request
    pub telemetry: TelemetrySample,
    /// Status tag
    pub status: StepStatus,
    /// Stop reason, empty when the sweep continues
    pub stop_reason: String,
}

impl ProbeStep {
    /// Record a step from its parts.
    #[must_use]
    pub fn new(
        target_context: u32,
        metrics: StepMetrics,
        telemetry: TelemetrySample,
        verdict: Verdict,
    ) -> Self {
        Self {
            timestamp: Local::now(),
            target_context,
            metrics,
            telemetry,
            status: verdict.status,
            stop_reason: verdict.stop_reason,
        }
    }

    /// Whether this step ended the sweep.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Identity of a model as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Model identifier, e.g. `llama3:8b`
    pub name: String,
    /// Shortened content digest, or `Unknown`
    pub digest: String,
}

/// Why a model's sweep ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// Every target up to the ceiling passed
    CeilingReached,
    /// A step failed a criterion or the server rejected it
    Stopped,
    /// A request never completed
    Aborted,
}

/// A model paired with the ordered steps executed for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRun {
    /// The probed model
    pub model: ModelDescriptor,
    /// Steps in execution order
    pub steps: Vec<ProbeStep>,
    /// How the sweep ended
    pub outcome: RunOutcome,
}

impl ModelRun {
    /// Largest target context whose step passed every criterion.
    #[must_use]
    pub fn optimal_context(&self) -> Option<u32> {
        self.steps
            .iter()
            .filter(|step| step.status == StepStatus::Ok)
            .map(|step| step.target_context)
            .max()
    }

    /// The step that stopped the sweep, if any.
    #[must_use]
    pub fn stopping_step(&self) -> Option<&ProbeStep> {
        self.steps.last().filter(|step| step.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_is_derived() {
        let sample = TelemetrySample::new(10.0, 5.0);
        assert!((sample.percent - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_percent_is_zero_without_size() {
        let sample = TelemetrySample::new(0.0, 5.0);
        assert!(sample.percent.abs() < f64::EPSILON);
    }

    #[test]
    fn test_sys_ram_is_floored() {
        assert!(TelemetrySample::new(4.0, 6.0).sys_ram_gib().abs() < f64::EPSILON);
        assert!((TelemetrySample::new(10.0, 6.5).sys_ram_gib() - 3.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(StepStatus::Ok.to_string(), "OK");
        assert_eq!(StepStatus::Truncated(900).to_string(), "TRUNCATED (900)");
        assert_eq!(StepStatus::FailGpu.to_string(), "FAIL_GPU_%");
        assert_eq!(StepStatus::FailVram.to_string(), "FAIL_VRAM");
        assert_eq!(StepStatus::FailRam.to_string(), "FAIL_RAM");
        assert_eq!(StepStatus::FailSpeed.to_string(), "FAIL_SPEED");
        assert_eq!(StepStatus::FailTime.to_string(), "FAIL_TIME");
        assert_eq!(StepStatus::FailHttp(500).to_string(), "FAIL_500");
        assert_eq!(StepStatus::Failed.to_string(), "FAIL");
    }

    #[test]
    fn test_only_ok_is_non_terminal() {
        assert!(!StepStatus::Ok.is_terminal());
        assert!(StepStatus::Truncated(1).is_terminal());
        assert!(StepStatus::FailHttp(503).is_terminal());
        assert!(StepStatus::Failed.is_terminal());
    }

    fn step(target: u32, status: StepStatus) -> ProbeStep {
        ProbeStep::new(
            target,
            StepMetrics::default(),
            TelemetrySample::ZERO,
            Verdict::stop(status, ""),
        )
    }

    #[test]
    fn test_optimal_context_is_last_passing_target() {
        let run = ModelRun {
            model: ModelDescriptor {
                name: "m".to_string(),
                digest: "Unknown".to_string(),
            },
            steps: vec![
                step(4096, StepStatus::Ok),
                step(8192, StepStatus::Ok),
                step(12288, StepStatus::FailVram),
            ],
            outcome: RunOutcome::Stopped,
        };
        assert_eq!(run.optimal_context(), Some(8192));
        assert_eq!(run.stopping_step().unwrap().target_context, 12288);
    }

    #[test]
    fn test_optimal_context_empty_when_first_step_fails() {
        let run = ModelRun {
            model: ModelDescriptor {
                name: "m".to_string(),
                digest: "Unknown".to_string(),
            },
            steps: vec![step(4096, StepStatus::FailHttp(500))],
            outcome: RunOutcome::Stopped,
        };
        assert_eq!(run.optimal_context(), None);
    }
}
