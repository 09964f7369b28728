//! # Configuration
//!
//! This module contains the immutable run configuration handed to the
//! orchestrator, plus the tuning constants the probe relies on.

pub mod run;

pub use run::{
    LogMode, LogSource, ProbeTimings, RunConfiguration, StopThresholds, SweepParams,
    DEFAULT_SERVER_URL, GPU_PERCENT_TOLERANCE, TRUNCATION_TOLERANCE,
};
