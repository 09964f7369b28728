//! # Telemetry Extraction
//!
//! The inference server reports how much of a loaded model sits in VRAM only
//! through its log output. [`TelemetryReader`] fetches a bounded tail of that
//! log and returns the most recent memory report as a [`TelemetrySample`].
//!
//! Telemetry is best effort: any failure to read or parse the log yields
//! [`TelemetrySample::ZERO`] instead of an error.

use crate::config::LogSource;
use crate::probe::errors::{ProbeError, ProbeResult};
use crate::probe::types::TelemetrySample;
use async_trait::async_trait;
use regex::{Captures, Regex};
use std::{
    io::SeekFrom,
    path::Path,
    sync::OnceLock,
    time::Duration,
};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
    process::Command,
};
use tracing::debug;

/// Number of trailing container log lines inspected.
pub const CONTAINER_TAIL_LINES: u32 = 500;

/// Number of trailing bytes read from a log file.
pub const FILE_TAIL_BYTES: u64 = 20_000;

const CONTAINER_RUNTIME: &str = "docker";

const MEMORY_REPORT_PATTERN: &str =
    r#"runner\.size="([\d.]+)\s+GiB".*?runner\.vram="([\d.]+)\s+GiB""#;

static DEFAULT_PATTERN: OnceLock<MemoryReportPattern> = OnceLock::new();

/// Anything that can produce a telemetry sample for the step that just ran.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Return the most recent sample, or [`TelemetrySample::ZERO`] if none is available.
    async fn sample(&self) -> TelemetrySample;
}

/// Regex matching one memory report line.
///
/// The first capture group is the total resident size, the second the VRAM
/// share, both in GiB.
#[derive(Debug, Clone)]
pub struct MemoryReportPattern {
    regex: Regex,
}

impl MemoryReportPattern {
    /// Compile a custom pattern with two float capture groups.
    ///
    /// # Errors
    /// Returns [`ProbeError::InvalidConfiguration`] if the pattern does not compile
    /// or has fewer than two capture groups.
    pub fn new(pattern: &str) -> ProbeResult<Self> {
        let regex = Regex::new(pattern)
            .map_err(|err| ProbeError::invalid_config("telemetry_pattern", err.to_string()))?;
        if regex.captures_len() < 3 {
            return Err(ProbeError::invalid_config(
                "telemetry_pattern",
                "pattern needs two capture groups (size, vram)",
            ));
        }
        Ok(Self { regex })
    }

    /// Parse a single line, returning `None` when it is not a memory report.
    #[must_use]
    pub fn parse_line(&self, line: &str) -> Option<TelemetrySample> {
        self.regex.captures(line).and_then(|captures| sample_from(&captures))
    }

    /// Scan lines from newest to oldest and parse the first report found.
    ///
    /// Only the newest report counts: if its numbers do not parse, the
    /// result is [`TelemetrySample::ZERO`] rather than an older report.
    #[must_use]
    pub fn latest<'a, I>(&self, lines: I) -> TelemetrySample
    where
        I: IntoIterator<Item = &'a str>,
        I::IntoIter: DoubleEndedIterator,
    {
        lines
            .into_iter()
            .rev()
            .find_map(|line| self.regex.captures(line))
            .and_then(|captures| sample_from(&captures))
            .unwrap_or(TelemetrySample::ZERO)
    }
}

impl Default for MemoryReportPattern {
    fn default() -> Self {
        DEFAULT_PATTERN
            .get_or_init(|| Self {
                regex: Regex::new(MEMORY_REPORT_PATTERN).expect("memory report pattern compiles"),
            })
            .clone()
    }
}

/// Reads telemetry from the configured log source.
#[derive(Debug, Clone)]
pub struct TelemetryReader {
    source: LogSource,
    pattern: MemoryReportPattern,
    timeout: Duration,
}

impl TelemetryReader {
    /// Create a reader for `source`, bounding each read by `timeout`.
    #[must_use]
    pub fn new(source: LogSource, timeout: Duration) -> Self {
        Self {
            source: source.expanded(),
            pattern: MemoryReportPattern::default(),
            timeout,
        }
    }

    /// Replace the memory-report pattern.
    #[must_use]
    pub fn with_pattern(mut self, pattern: MemoryReportPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// The log source this reader inspects.
    #[must_use]
    pub fn source(&self) -> &LogSource {
        &self.source
    }

    /// Fetch the raw tail of the log source as text.
    ///
    /// # Errors
    /// Returns an error if the source cannot be read within the timeout.
    pub async fn read_tail(&self) -> ProbeResult<String> {
        let read = async {
            match &self.source {
                LogSource::Container { name } => read_container_tail(name).await,
                LogSource::File { path } => read_file_tail(path, FILE_TAIL_BYTES).await,
                LogSource::None => Ok(String::new()),
            }
        };

        tokio::time::timeout(self.timeout, read)
            .await
            .map_err(|_| ProbeError::Timeout {
                seconds: self.timeout.as_secs(),
            })?
    }
}

#[async_trait]
impl TelemetrySource for TelemetryReader {
    async fn sample(&self) -> TelemetrySample {
        if matches!(self.source, LogSource::None) {
            return TelemetrySample::ZERO;
        }

        match self.read_tail().await {
            Ok(content) => {
                let sample = self.pattern.latest(content.lines());
                debug!(
                    size_gib = sample.size_gib,
                    vram_gib = sample.vram_gib,
                    percent = sample.percent,
                    "telemetry sampled"
                );
                sample
            }
            Err(err) => {
                debug!(error = %err, mode = %self.source.mode(), "telemetry unavailable");
                TelemetrySample::ZERO
            }
        }
    }
}

async fn read_container_tail(name: &str) -> ProbeResult<String> {
    read_container_tail_with(CONTAINER_RUNTIME, name).await
}

async fn read_container_tail_with(runtime: &str, name: &str) -> ProbeResult<String> {
    let output = Command::new(runtime)
        .args(["logs", "--tail", &CONTAINER_TAIL_LINES.to_string(), name])
        .kill_on_drop(true)
        .output()
        .await?;
    if !output.status.success() {
        return Err(ProbeError::IoError {
            message: format!(
                "{runtime} logs {name} exited with {}: {}",
                output.status,
                decode_permissive(&output.stderr).trim()
            ),
        });
    }

    // The server writes its runner reports to stderr; keep stdout after it.
    let mut content = decode_permissive(&output.stderr);
    content.push_str(&decode_permissive(&output.stdout));
    Ok(content)
}

/// Read at most `max_bytes` from the end of `path`.
async fn read_file_tail(path: &Path, max_bytes: u64) -> ProbeResult<String> {
    let mut file = File::open(path).await?;
    let len = file.metadata().await?.len();
    if len > max_bytes {
        file.seek(SeekFrom::Start(len - max_bytes)).await?;
    }

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).await?;
    Ok(decode_permissive(&bytes))
}

fn sample_from(captures: &Captures<'_>) -> Option<TelemetrySample> {
    let size = captures.get(1)?.as_str().parse::<f64>().ok()?;
    let vram = captures.get(2)?.as_str().parse::<f64>().ok()?;
    Some(TelemetrySample::new(size, vram))
}

/// Decode UTF-8, dropping byte sequences that are not valid.
fn decode_permissive(bytes: &[u8]) -> String {
    bytes.utf8_chunks().map(|chunk| chunk.valid()).collect()
}
