//! # Context Probe Module
//!
//! Finds, for each model served by a local inference server, the largest
//! context window that stays within a set of hardware and performance budgets.
//!
//! ## Architecture
//!
//! The module is built from the leaves up:
//! - [`TelemetrySource`] - Reads the latest memory report from the server's log
//! - [`InferenceBackend`] - Unload, preload and timed generation against the server
//! - [`StopPolicy`] - Pure verdict over one step's metrics and telemetry
//! - [`BenchmarkOrchestrator`] - Drives the per-model sweep and records every step
//!
//! ## Usage
//!
//! ```rust,ignore
//! use shared::config::RunConfiguration;
//! use shared::probe::{BenchmarkOrchestrator, NoopObserver, OllamaClient, TelemetryReader};
//! use shared::report::CsvResultSink;
//!
//! let backend = OllamaClient::new(config.server_url.clone(), config.timings)?;
//! let telemetry = TelemetryReader::new(config.log_source.clone(), config.timings.log_timeout);
//! let mut sink = CsvResultSink::create("results.csv")?;
//!
//! let orchestrator = BenchmarkOrchestrator::new(config, backend, telemetry)?;
//! let runs = orchestrator.run(&mut sink, &NoopObserver).await?;
//! ```

pub mod client;
pub mod criteria;
pub mod errors;
pub mod hardware;
pub mod orchestrator;
pub mod telemetry;
pub mod types;

// Re-export the main public APIs
pub use client::{InferenceBackend, OllamaClient, UNKNOWN};
pub use criteria::StopPolicy;
pub use errors::{ProbeError, ProbeResult};
pub use hardware::{GpuReport, GpuType, SystemHardware};
pub use orchestrator::{
    BenchmarkOrchestrator, NoopObserver, ProbePhase, ProgressObserver, StepOutcome,
};
pub use telemetry::{MemoryReportPattern, TelemetryReader, TelemetrySource};
pub use types::{
    ModelDescriptor, ModelRun, ProbeStep, RunOutcome, StepMetrics, StepStatus, TelemetrySample,
    Verdict,
};
