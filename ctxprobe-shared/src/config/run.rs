//! # Run Configuration
//!
//! [`RunConfiguration`] is built once by the setup session, validated, and
//! then handed by value to the orchestrator. Nothing in here is mutated once
//! a sweep has started.

use crate::probe::errors::{ProbeError, ProbeResult};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{env, fmt, path::PathBuf, time::Duration};
use url::Url;

/// Default inference server endpoint.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:11434";

/// A step is truncated when the accepted context is below this share of the target.
pub const TRUNCATION_TOLERANCE: f64 = 0.99;

/// Percentage points subtracted from the GPU floor before comparing.
pub const GPU_PERCENT_TOLERANCE: f64 = 0.1;

/// Hard lower bound for the measurement timeout, in seconds.
pub const MEASURE_HARD_TIMEOUT_SECS: u64 = 1800;

/// Added on top of the duration budget when deriving the measurement timeout.
pub const MEASURE_TIMEOUT_MARGIN_SECS: u64 = 60;

const ENV_SERVER_URL: &str = "CTXPROBE_SERVER_URL";
const ENV_OUTPUT_DIR: &str = "CTXPROBE_OUTPUT_DIR";

/// Which kind of log source telemetry is read from.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogMode {
    /// `docker logs --tail` of a running container
    Container,
    /// Tail of a local log file
    File,
    /// No telemetry; every sample is zero
    None,
}

impl fmt::Display for LogMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Container => "docker",
            Self::File => "file",
            Self::None => "none",
        };
        f.write_str(label)
    }
}

/// Log-source descriptor: the mode plus where to find the logs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LogSource {
    /// Container runtime logs for the named container
    Container { name: String },
    /// A server log file on the local filesystem
    File { path: PathBuf },
    /// Telemetry disabled
    None,
}

impl LogSource {
    /// The mode of this source.
    #[must_use]
    pub fn mode(&self) -> LogMode {
        match self {
            Self::Container { .. } => LogMode::Container,
            Self::File { .. } => LogMode::File,
            Self::None => LogMode::None,
        }
    }

    /// Platform-dependent default: docker on Linux, the native server log elsewhere.
    #[must_use]
    pub fn platform_default() -> Self {
        if cfg!(target_os = "macos") {
            Self::File {
                path: PathBuf::from("~/.ollama/logs/server.log"),
            }
        } else if cfg!(target_os = "windows") {
            let base = env::var("LOCALAPPDATA").unwrap_or_default();
            Self::File {
                path: PathBuf::from(base).join("Ollama").join("server.log"),
            }
        } else {
            Self::Container {
                name: "ollama".to_string(),
            }
        }
    }

    /// Expand a leading `~` in file sources against the user's home directory.
    #[must_use]
    pub fn expanded(self) -> Self {
        match self {
            Self::File { path } => Self::File {
                path: expand_home(path),
            },
            other => other,
        }
    }
}

fn expand_home(path: PathBuf) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path;
    };
    match BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(rest),
        None => path,
    }
}

/// Context-size sweep parameters.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepParams {
    /// First context size probed
    pub start_ctx: u32,
    /// Largest context size probed
    pub max_ctx: u32,
    /// Increment between steps
    pub step_size: u32,
    /// Tokens to generate per measurement
    pub num_predict: u32,
}

impl Default for SweepParams {
    fn default() -> Self {
        Self {
            start_ctx: 4096,
            max_ctx: 65536,
            step_size: 4096,
            num_predict: 100,
        }
    }
}

impl SweepParams {
    /// Context sizes this sweep would visit if nothing stopped it.
    pub fn targets(&self) -> impl Iterator<Item = u32> + use<> {
        let Self {
            start_ctx,
            max_ctx,
            step_size,
            ..
        } = *self;
        std::iter::successors(Some(start_ctx), move |ctx| ctx.checked_add(step_size))
            .take_while(move |ctx| *ctx <= max_ctx)
    }
}

/// The five stop thresholds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct StopThresholds {
    /// Minimum share of the model resident in VRAM, in percent
    pub min_gpu_percent: f64,
    /// Maximum system RAM the model may occupy, in GiB
    pub max_sys_ram_gb: f64,
    /// Maximum VRAM the model may occupy, in GiB
    pub max_vram_budget_gb: f64,
    /// Minimum generation throughput, in tokens per second
    pub min_eval_tps: f64,
    /// Maximum wall-clock duration of one measurement, in seconds
    pub max_duration_seconds: f64,
}

impl Default for StopThresholds {
    /// Permissive thresholds that never stop a sweep on their own.
    fn default() -> Self {
        Self {
            min_gpu_percent: 0.0,
            max_sys_ram_gb: 999.0,
            max_vram_budget_gb: 999.0,
            min_eval_tps: 0.0,
            max_duration_seconds: 9999.0,
        }
    }
}

impl StopThresholds {
    /// Suggested values offered by the interactive setup.
    ///
    /// Integrated-GPU hosts report no useful offload share, so the GPU floor is 0 there.
    #[must_use]
    pub fn suggested(integrated_gpu: bool) -> Self {
        Self {
            min_gpu_percent: if integrated_gpu { 0.0 } else { 90.0 },
            max_sys_ram_gb: 32.0,
            max_vram_budget_gb: 24.0,
            min_eval_tps: 2.0,
            max_duration_seconds: 120.0,
        }
    }
}

/// Fixed delays and timeouts used around each step.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeTimings {
    /// Wait after an unload request so memory is released
    pub unload_settle: Duration,
    /// Pause after a successful step before the next unload
    pub step_pause: Duration,
    /// Timeout for the unload request
    pub unload_timeout: Duration,
    /// Timeout for the warm-up request
    pub preload_timeout: Duration,
    /// Timeout for tags and version lookups
    pub lookup_timeout: Duration,
    /// Timeout for reading the log tail
    pub log_timeout: Duration,
}

impl Default for ProbeTimings {
    fn default() -> Self {
        Self {
            unload_settle: Duration::from_millis(1500),
            step_pause: Duration::from_secs(1),
            unload_timeout: Duration::from_secs(5),
            preload_timeout: Duration::from_secs(300),
            lookup_timeout: Duration::from_secs(3),
            log_timeout: Duration::from_secs(10),
        }
    }
}

impl ProbeTimings {
    /// No waiting at all; used by tests and dry runs.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            unload_settle: Duration::ZERO,
            step_pause: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Immutable input to a run.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RunConfiguration {
    /// Base URL of the inference server
    pub server_url: Url,
    /// Models to probe, in order
    pub models: Vec<String>,
    /// Where telemetry comes from
    pub log_source: LogSource,
    /// Context-size sweep
    pub sweep: SweepParams,
    /// Stop thresholds
    pub thresholds: StopThresholds,
    /// Host has an integrated (unified-memory) GPU
    pub integrated_gpu: bool,
    /// Directory the result and specs files are written to
    pub output_dir: PathBuf,
    /// Delays and timeouts around each step
    #[serde(default)]
    pub timings: ProbeTimings,
}

impl RunConfiguration {
    /// Create a configuration with permissive thresholds and default sweep.
    #[must_use]
    pub fn new(server_url: Url, models: Vec<String>) -> Self {
        Self {
            server_url,
            models,
            log_source: LogSource::None,
            sweep: SweepParams::default(),
            thresholds: StopThresholds::default(),
            integrated_gpu: false,
            output_dir: PathBuf::from("."),
            timings: ProbeTimings::default(),
        }
    }

    /// Resolve the server URL from `CTXPROBE_SERVER_URL`, falling back to the default.
    ///
    /// # Errors
    /// Returns [`ProbeError::InvalidConfiguration`] if the variable is not a valid URL.
    pub fn server_url_from_env() -> ProbeResult<Url> {
        let raw = env::var(ENV_SERVER_URL).unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());
        Url::parse(raw.trim())
            .map_err(|err| ProbeError::invalid_config(ENV_SERVER_URL, err.to_string()))
    }

    /// Resolve the output directory from `CTXPROBE_OUTPUT_DIR`, defaulting to the cwd.
    #[must_use]
    pub fn output_dir_from_env() -> PathBuf {
        env::var(ENV_OUTPUT_DIR)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map_or_else(|| PathBuf::from("."), PathBuf::from)
    }

    /// Timeout for one measurement: the hard ceiling or the duration budget plus margin.
    #[must_use]
    pub fn measure_timeout(&self) -> Duration {
        let budget = Duration::try_from_secs_f64(self.thresholds.max_duration_seconds.max(0.0))
            .unwrap_or(Duration::MAX);
        let with_margin = budget.saturating_add(Duration::from_secs(MEASURE_TIMEOUT_MARGIN_SECS));
        with_margin.max(Duration::from_secs(MEASURE_HARD_TIMEOUT_SECS))
    }

    /// Whether GPU-share checks are meaningful for this run.
    #[must_use]
    pub fn gpu_telemetry_enabled(&self) -> bool {
        self.log_source.mode() != LogMode::None
    }

    /// Validate the configuration, collecting every problem found.
    ///
    /// # Errors
    /// Returns the list of validation messages if anything is invalid.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.models.is_empty() {
            errors.push("At least one model must be selected.".to_string());
        }
        if self.models.iter().any(|model| model.trim().is_empty()) {
            errors.push("Model identifiers must not be empty.".to_string());
        }

        if self.sweep.step_size == 0 {
            errors.push("Step size must be greater than 0.".to_string());
        }
        if self.sweep.start_ctx == 0 {
            errors.push("Start context must be greater than 0.".to_string());
        }
        if self.sweep.max_ctx == 0 {
            errors.push("Max context must be greater than 0.".to_string());
        }
        if self.sweep.start_ctx > self.sweep.max_ctx {
            errors.push(format!(
                "Start context ({}) must not exceed max context ({}).",
                self.sweep.start_ctx, self.sweep.max_ctx
            ));
        }

        let thresholds = [
            ("min_gpu_percent", self.thresholds.min_gpu_percent),
            ("max_sys_ram_gb", self.thresholds.max_sys_ram_gb),
            ("max_vram_budget_gb", self.thresholds.max_vram_budget_gb),
            ("min_eval_tps", self.thresholds.min_eval_tps),
            ("max_duration_seconds", self.thresholds.max_duration_seconds),
        ];
        for (name, value) in thresholds {
            if !value.is_finite() {
                errors.push(format!("Threshold {name} must be a finite number."));
            }
        }

        match &self.log_source {
            LogSource::Container { name } if name.trim().is_empty() => {
                errors.push("Container name must not be empty.".to_string());
            }
            LogSource::File { path } if path.as_os_str().is_empty() => {
                errors.push("Log file path must not be empty.".to_string());
            }
            _ => {}
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn config() -> RunConfiguration {
        RunConfiguration::new(
            Url::parse(DEFAULT_SERVER_URL).unwrap(),
            vec!["llama3:8b".to_string()],
        )
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_zero_step_is_rejected() {
        let mut config = config();
        config.sweep.step_size = 0;
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("Step size")));
    }

    #[test]
    fn test_validation_collects_every_problem() {
        let mut config = config();
        config.models.clear();
        config.sweep.start_ctx = 0;
        config.thresholds.min_eval_tps = f64::NAN;
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_start_above_max_is_rejected() {
        let mut config = config();
        config.sweep.start_ctx = 8192;
        config.sweep.max_ctx = 4096;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_container_name_is_rejected() {
        let mut config = config();
        config.log_source = LogSource::Container {
            name: "  ".to_string(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sweep_targets_step_exactly() {
        let sweep = SweepParams {
            start_ctx: 4096,
            max_ctx: 16384,
            step_size: 4096,
            num_predict: 10,
        };
        let targets: Vec<u32> = sweep.targets().collect();
        assert_eq!(targets, vec![4096, 8192, 12288, 16384]);
    }

    #[test]
    fn test_sweep_targets_stop_below_ceiling() {
        let sweep = SweepParams {
            start_ctx: 1000,
            max_ctx: 2500,
            step_size: 1000,
            num_predict: 10,
        };
        assert_eq!(sweep.targets().collect::<Vec<_>>(), vec![1000, 2000]);
    }

    #[test]
    fn test_sweep_targets_do_not_overflow() {
        let sweep = SweepParams {
            start_ctx: u32::MAX - 1,
            max_ctx: u32::MAX,
            step_size: 4096,
            num_predict: 10,
        };
        assert_eq!(sweep.targets().count(), 1);
    }

    #[test]
    fn test_measure_timeout_uses_hard_ceiling() {
        let config = config();
        assert_eq!(config.measure_timeout(), Duration::from_secs(9999 + 60));

        let mut short = config.clone();
        short.thresholds.max_duration_seconds = 120.0;
        assert_eq!(short.measure_timeout(), Duration::from_secs(1800));
    }

    #[test]
    fn test_gpu_telemetry_disabled_without_logs() {
        let mut config = config();
        assert!(!config.gpu_telemetry_enabled());
        config.log_source = LogSource::Container {
            name: "ollama".to_string(),
        };
        assert!(config.gpu_telemetry_enabled());
    }

    #[test]
    fn test_suggested_thresholds_depend_on_gpu_kind() {
        assert_eq!(StopThresholds::suggested(true).min_gpu_percent, 0.0);
        assert_eq!(StopThresholds::suggested(false).min_gpu_percent, 90.0);
    }

    #[test]
    fn test_log_mode_display() {
        assert_eq!(LogMode::Container.to_string(), "docker");
        assert_eq!(LogMode::File.to_string(), "file");
        assert_eq!(LogMode::None.to_string(), "none");
    }

    #[test]
    fn test_home_expansion_leaves_absolute_paths() {
        let source = LogSource::File {
            path: PathBuf::from("/var/log/ollama.log"),
        }
        .expanded();
        assert_eq!(
            source,
            LogSource::File {
                path: PathBuf::from("/var/log/ollama.log")
            }
        );
    }

    #[test]
    fn test_home_expansion_replaces_tilde() {
        let LogSource::File { path } = (LogSource::File {
            path: PathBuf::from("~/.ollama/logs/server.log"),
        })
        .expanded() else {
            panic!("expected file source");
        };
        if BaseDirs::new().is_some() {
            assert!(!path.starts_with("~"));
            assert!(path.ends_with(".ollama/logs/server.log"));
        }
    }

    #[test]
    fn test_log_source_serialization() {
        let source = LogSource::Container {
            name: "ollama".to_string(),
        };
        let json = serde_json::to_string(&source).unwrap();
        assert_eq!(json, r#"{"mode":"container","name":"ollama"}"#);
    }

    #[test]
    #[serial]
    fn test_server_url_from_env() {
        unsafe {
            std::env::remove_var(ENV_SERVER_URL);
        }
        assert_eq!(
            RunConfiguration::server_url_from_env().unwrap().as_str(),
            "http://localhost:11434/"
        );

        unsafe {
            std::env::set_var(ENV_SERVER_URL, "http://gpu-box:11434");
        }
        assert_eq!(
            RunConfiguration::server_url_from_env().unwrap().as_str(),
            "http://gpu-box:11434/"
        );

        unsafe {
            std::env::set_var(ENV_SERVER_URL, "not a url");
        }
        let err = RunConfiguration::server_url_from_env().unwrap_err();
        assert!(err.is_fatal_to_run());

        unsafe {
            std::env::remove_var(ENV_SERVER_URL);
        }
    }

    #[test]
    #[serial]
    fn test_output_dir_from_env() {
        unsafe {
            std::env::remove_var(ENV_OUTPUT_DIR);
        }
        assert_eq!(RunConfiguration::output_dir_from_env(), PathBuf::from("."));

        unsafe {
            std::env::set_var(ENV_OUTPUT_DIR, "/tmp/results");
        }
        assert_eq!(
            RunConfiguration::output_dir_from_env(),
            PathBuf::from("/tmp/results")
        );

        unsafe {
            std::env::remove_var(ENV_OUTPUT_DIR);
        }
    }
}
