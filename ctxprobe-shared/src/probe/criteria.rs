//! # Stop Criteria
//!
//! Pure decision over one step's metrics and telemetry. Checks run in a fixed
//! priority order and the first failing check decides the verdict:
//!
//! 1. context truncation
//! 2. GPU offload floor (unless suppressed)
//! 3. VRAM budget
//! 4. system-RAM budget
//! 5. generation throughput floor
//! 6. duration ceiling

use crate::config::{
    GPU_PERCENT_TOLERANCE, RunConfiguration, StopThresholds, TRUNCATION_TOLERANCE,
};
use crate::probe::types::{StepMetrics, StepStatus, TelemetrySample, Verdict};

/// Stop reason attached to truncated steps.
pub const TRUNCATION_REASON: &str = "context limit reached";

/// Thresholds plus the facts needed to decide whether GPU telemetry is usable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopPolicy {
    /// Configured thresholds
    pub thresholds: StopThresholds,
    /// False when the run has no log source
    pub gpu_telemetry: bool,
    /// Host has an integrated GPU
    pub integrated_gpu: bool,
}

impl StopPolicy {
    /// Derive the policy for a run.
    #[must_use]
    pub fn from_config(config: &RunConfiguration) -> Self {
        Self {
            thresholds: config.thresholds,
            gpu_telemetry: config.gpu_telemetry_enabled(),
            integrated_gpu: config.integrated_gpu,
        }
    }

    /// GPU checks are skipped without logs, and on integrated GPUs reporting 0%.
    #[must_use]
    pub fn suppresses_gpu_check(&self, sample: &TelemetrySample) -> bool {
        !self.gpu_telemetry || (self.integrated_gpu && sample.percent <= 0.0)
    }

    /// Evaluate one step.
    #[must_use]
    pub fn evaluate(
        &self,
        target_context: u32,
        metrics: &StepMetrics,
        sample: &TelemetrySample,
    ) -> Verdict {
        let limits = &self.thresholds;

        if f64::from(metrics.actual_context) < f64::from(target_context) * TRUNCATION_TOLERANCE {
            return Verdict::stop(
                StepStatus::Truncated(metrics.actual_context),
                TRUNCATION_REASON,
            );
        }

        if !self.suppresses_gpu_check(sample)
            && sample.percent < limits.min_gpu_percent - GPU_PERCENT_TOLERANCE
        {
            return Verdict::stop(
                StepStatus::FailGpu,
                format!("GPU {:.1}% < {}%", sample.percent, limits.min_gpu_percent),
            );
        }

        if sample.vram_gib > limits.max_vram_budget_gb {
            return Verdict::stop(
                StepStatus::FailVram,
                format!(
                    "VRAM {:.1}GiB > {:.1}GiB",
                    sample.vram_gib, limits.max_vram_budget_gb
                ),
            );
        }

        let sys_ram = sample.sys_ram_gib();
        if sys_ram > limits.max_sys_ram_gb {
            return Verdict::stop(
                StepStatus::FailRam,
                format!("RAM {sys_ram:.1}GiB > {:.1}GiB", limits.max_sys_ram_gb),
            );
        }

        if metrics.eval_tps < limits.min_eval_tps {
            return Verdict::stop(
                StepStatus::FailSpeed,
                format!("Speed {:.1} < {} t/s", metrics.eval_tps, limits.min_eval_tps),
            );
        }

        if metrics.total_duration_secs > limits.max_duration_seconds {
            return Verdict::stop(
                StepStatus::FailTime,
                format!(
                    "Time {:.1}s > {}s",
                    metrics.total_duration_secs, limits.max_duration_seconds
                ),
            );
        }

        Verdict::pass()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> StopPolicy {
        StopPolicy {
            thresholds: StopThresholds::default(),
            gpu_telemetry: true,
            integrated_gpu: false,
        }
    }

    fn metrics(actual_context: u32) -> StepMetrics {
        StepMetrics {
            actual_context,
            generated_tokens: 100,
            eval_tps: 30.0,
            prompt_tps: 900.0,
            total_duration_secs: 10.0,
        }
    }

    #[test]
    fn test_all_criteria_pass() {
        let verdict = policy().evaluate(4096, &metrics(4096), &TelemetrySample::new(8.0, 8.0));
        assert_eq!(verdict, Verdict::pass());
        assert!(verdict.stop_reason.is_empty());
    }

    #[test]
    fn test_truncation_fires() {
        let verdict = policy().evaluate(1000, &metrics(900), &TelemetrySample::ZERO);
        assert_eq!(verdict.status, StepStatus::Truncated(900));
        assert_eq!(verdict.stop_reason, "context limit reached");
        assert_eq!(verdict.status.to_string(), "TRUNCATED (900)");
    }

    #[test]
    fn test_truncation_tolerance_boundary() {
        // 990 is exactly 99% of 1000 and is accepted
        let verdict = policy().evaluate(1000, &metrics(990), &TelemetrySample::ZERO);
        assert_eq!(verdict.status, StepStatus::Ok);

        let verdict = policy().evaluate(1000, &metrics(989), &TelemetrySample::ZERO);
        assert_eq!(verdict.status, StepStatus::Truncated(989));
    }

    #[test]
    fn test_truncation_takes_priority_over_other_failures() {
        let mut policy = policy();
        policy.thresholds.max_vram_budget_gb = 1.0;
        policy.thresholds.min_eval_tps = 1000.0;
        let verdict = policy.evaluate(1000, &metrics(100), &TelemetrySample::new(20.0, 20.0));
        assert_eq!(verdict.status, StepStatus::Truncated(100));
    }

    #[test]
    fn test_gpu_floor_fires() {
        let mut policy = policy();
        policy.thresholds.min_gpu_percent = 90.0;
        let sample = TelemetrySample::new(20.0, 17.0);
        let verdict = policy.evaluate(4096, &metrics(4096), &sample);
        assert_eq!(verdict.status, StepStatus::FailGpu);
        assert_eq!(verdict.stop_reason, "GPU 85.0% < 90%");
    }

    #[test]
    fn test_gpu_floor_tolerance() {
        let mut policy = policy();
        policy.thresholds.min_gpu_percent = 90.0;
        let sample = TelemetrySample::new(100.0, 89.95);
        assert_eq!(
            policy.evaluate(4096, &metrics(4096), &sample).status,
            StepStatus::Ok
        );
    }

    #[test]
    fn test_gpu_floor_suppressed_without_logs() {
        let mut policy = policy();
        policy.thresholds.min_gpu_percent = 90.0;
        policy.gpu_telemetry = false;
        let sample = TelemetrySample::new(20.0, 17.0);
        assert_eq!(
            policy.evaluate(4096, &metrics(4096), &sample).status,
            StepStatus::Ok
        );
    }

    #[test]
    fn test_gpu_floor_suppressed_on_integrated_gpu_zero_reading() {
        let mut policy = policy();
        policy.thresholds.min_gpu_percent = 90.0;
        policy.integrated_gpu = true;
        assert_eq!(
            policy
                .evaluate(4096, &metrics(4096), &TelemetrySample::ZERO)
                .status,
            StepStatus::Ok
        );

        // A real reading on an integrated GPU is still checked.
        let verdict = policy.evaluate(4096, &metrics(4096), &TelemetrySample::new(10.0, 5.0));
        assert_eq!(verdict.status, StepStatus::FailGpu);
    }

    #[test]
    fn test_zero_reading_fails_gpu_floor_on_discrete_gpu() {
        let mut policy = policy();
        policy.thresholds.min_gpu_percent = 90.0;
        let verdict = policy.evaluate(4096, &metrics(4096), &TelemetrySample::ZERO);
        assert_eq!(verdict.status, StepStatus::FailGpu);
        assert_eq!(verdict.stop_reason, "GPU 0.0% < 90%");
    }

    #[test]
    fn test_vram_budget_fires() {
        let mut policy = policy();
        policy.thresholds.max_vram_budget_gb = 10.0;
        let verdict = policy.evaluate(8192, &metrics(8192), &TelemetrySample::new(12.0, 12.0));
        assert_eq!(verdict.status, StepStatus::FailVram);
        assert_eq!(verdict.stop_reason, "VRAM 12.0GiB > 10.0GiB");
    }

    #[test]
    fn test_ram_budget_fires() {
        let mut policy = policy();
        policy.thresholds.max_sys_ram_gb = 4.0;
        let verdict = policy.evaluate(8192, &metrics(8192), &TelemetrySample::new(20.0, 14.0));
        assert_eq!(verdict.status, StepStatus::FailRam);
        assert_eq!(verdict.stop_reason, "RAM 6.0GiB > 4.0GiB");
    }

    #[test]
    fn test_speed_floor_fires() {
        let mut policy = policy();
        policy.thresholds.min_eval_tps = 40.0;
        let verdict = policy.evaluate(4096, &metrics(4096), &TelemetrySample::ZERO);
        assert_eq!(verdict.status, StepStatus::FailSpeed);
        assert_eq!(verdict.stop_reason, "Speed 30.0 < 40 t/s");
    }

    #[test]
    fn test_duration_ceiling_fires() {
        let mut policy = policy();
        policy.thresholds.max_duration_seconds = 7.5;
        let verdict = policy.evaluate(4096, &metrics(4096), &TelemetrySample::ZERO);
        assert_eq!(verdict.status, StepStatus::FailTime);
        assert_eq!(verdict.stop_reason, "Time 10.0s > 7.5s");
    }

    #[test]
    fn test_vram_checked_before_ram_and_speed() {
        let mut policy = policy();
        policy.thresholds.max_vram_budget_gb = 1.0;
        policy.thresholds.max_sys_ram_gb = 1.0;
        policy.thresholds.min_eval_tps = 1000.0;
        let verdict = policy.evaluate(4096, &metrics(4096), &TelemetrySample::new(10.0, 2.0));
        assert_eq!(verdict.status, StepStatus::FailVram);
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let mut policy = policy();
        policy.thresholds.min_gpu_percent = 50.0;
        policy.thresholds.max_vram_budget_gb = 16.0;
        let metrics = metrics(8000);
        let sample = TelemetrySample::new(14.0, 9.0);
        let first = policy.evaluate(8192, &metrics, &sample);
        for _ in 0..10 {
            assert_eq!(policy.evaluate(8192, &metrics, &sample), first);
        }
    }

    #[test]
    fn test_policy_from_config() {
        let mut config = RunConfiguration::new(
            url::Url::parse("http://localhost:11434").unwrap(),
            vec!["m".to_string()],
        );
        config.integrated_gpu = true;
        let policy = StopPolicy::from_config(&config);
        assert!(!policy.gpu_telemetry);
        assert!(policy.integrated_gpu);
        assert!(policy.suppresses_gpu_check(&TelemetrySample::new(10.0, 1.0)));
    }
}
