//! # Result Sink
//!
//! One row per attempted step, appended to a comma-separated file. The header
//! is written when the file is created; every row reopens the file in append
//! mode so an interrupted run keeps all rows recorded so far.

use crate::probe::errors::ProbeResult;
use crate::probe::types::{ModelDescriptor, ProbeStep};
use chrono::{DateTime, Local};
use std::{
    borrow::Cow,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Prefix shared by the result file and the specs artifact.
pub const RESULT_FILE_PREFIX: &str = "optimal_ollama_result";

/// Column names, in order.
pub const CSV_HEADER: [&str; 18] = [
    "Timestamp",
    "Ollama_Ver",
    "Model",
    "Model_Hash",
    "Target_Ctx",
    "Actual_Ctx",
    "Actual_Gen_Tokens",
    "Eval_Speed (t/s)",
    "Prompt_Speed (t/s)",
    "Total_Duration (s)",
    "GPU_Percent",
    "Sys_RAM_Used_GiB",
    "VRAM_Used_GiB",
    "Status",
    "Stop_Reason",
    "AA_Intelligence",
    "AA_Coding",
    "AA_Agentic",
];

const ROW_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Everything needed to write one row.
#[derive(Debug, Clone, Copy)]
pub struct ResultRow<'a> {
    /// Server version fetched at the start of the run
    pub server_version: &'a str,
    /// The model being probed
    pub model: &'a ModelDescriptor,
    /// The step to record
    pub step: &'a ProbeStep,
}

impl ResultRow<'_> {
    /// Field values in header order, before quoting.
    #[must_use]
    pub fn fields(&self) -> Vec<String> {
        let step = self.step;
        let metrics = &step.metrics;
        let telemetry = &step.telemetry;
        vec![
            step.timestamp.format(ROW_TIMESTAMP_FORMAT).to_string(),
            self.server_version.to_string(),
            self.model.name.clone(),
            self.model.digest.clone(),
            step.target_context.to_string(),
            metrics.actual_context.to_string(),
            metrics.generated_tokens.to_string(),
            format!("{:.2}", metrics.eval_tps),
            format!("{:.2}", metrics.prompt_tps),
            format!("{:.2}", metrics.total_duration_secs),
            format!("{:.1}", telemetry.percent),
            format!("{:.2}", telemetry.sys_ram_gib()),
            format!("{:.2}", telemetry.vram_gib),
            step.status.to_string(),
            step.stop_reason.clone(),
            String::new(),
            String::new(),
            String::new(),
        ]
    }
}

/// Destination for recorded steps.
pub trait ResultSink: Send {
    /// Persist one row.
    ///
    /// # Errors
    /// Returns an error if the row could not be written.
    fn record(&mut self, row: &ResultRow<'_>) -> ProbeResult<()>;
}

/// Quote a field when it contains a delimiter, quote or line break.
#[must_use]
pub fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

/// Join fields into one CSV line, including the trailing line break.
#[must_use]
pub fn csv_line<S: AsRef<str>>(fields: &[S]) -> String {
    let mut line = fields
        .iter()
        .map(|field| csv_field(field.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    line.push_str("\r\n");
    line
}

/// Paths of the two files a run produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultFiles {
    /// Per-step result table
    pub csv: PathBuf,
    /// Hardware and software description
    pub specs: PathBuf,
}

impl ResultFiles {
    /// File names for a run started at `started`, placed under `dir`.
    #[must_use]
    pub fn new(dir: &Path, started: DateTime<Local>) -> Self {
        let stem = format!(
            "{RESULT_FILE_PREFIX}_{}",
            started.format(FILE_TIMESTAMP_FORMAT)
        );
        Self {
            csv: dir.join(format!("{stem}.csv")),
            specs: dir.join(format!("{stem}_specs.txt")),
        }
    }
}

/// Appends rows to a CSV file.
#[derive(Debug, Clone)]
pub struct CsvResultSink {
    path: PathBuf,
}

impl CsvResultSink {
    /// Create (or truncate) the file at `path` and write the header.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create(path: impl Into<PathBuf>) -> ProbeResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, csv_line(&CSV_HEADER))?;
        debug!(path = %path.display(), "result file created");
        Ok(Self { path })
    }

    /// Where rows are written.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultSink for CsvResultSink {
    fn record(&mut self, row: &ResultRow<'_>) -> ProbeResult<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(csv_line(&row.fields()).as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::types::{StepMetrics, StepStatus, TelemetrySample, Verdict};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn model() -> ModelDescriptor {
        ModelDescriptor {
            name: "llama3:8b".to_string(),
            digest: "365c0bd3c000".to_string(),
        }
    }

    fn ok_step() -> ProbeStep {
        ProbeStep::new(
            4096,
            StepMetrics {
                actual_context: 4101,
                generated_tokens: 100,
                eval_tps: 42.5,
                prompt_tps: 1234.5,
                total_duration_secs: 3.25,
            },
            TelemetrySample::new(10.0, 7.5),
            Verdict::pass(),
        )
    }

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("two\nlines"), "\"two\nlines\"");
        assert!(matches!(csv_field("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_row_fields_formatting() {
        let model = model();
        let step = ok_step();
        let fields = ResultRow {
            server_version: "0.5.7",
            model: &model,
            step: &step,
        }
        .fields();

        assert_eq!(fields.len(), CSV_HEADER.len());
        assert_eq!(fields[1], "0.5.7");
        assert_eq!(fields[2], "llama3:8b");
        assert_eq!(fields[3], "365c0bd3c000");
        assert_eq!(fields[4], "4096");
        assert_eq!(fields[5], "4101");
        assert_eq!(fields[6], "100");
        assert_eq!(fields[7], "42.50");
        assert_eq!(fields[8], "1234.50");
        assert_eq!(fields[9], "3.25");
        assert_eq!(fields[10], "75.0");
        assert_eq!(fields[11], "2.50");
        assert_eq!(fields[12], "7.50");
        assert_eq!(fields[13], "OK");
        assert_eq!(fields[14], "");
        assert!(fields[15..].iter().all(String::is_empty));
    }

    #[test]
    fn test_result_file_names() {
        let started = Local.with_ymd_and_hms(2025, 3, 7, 9, 5, 1).unwrap();
        let files = ResultFiles::new(Path::new("/tmp/out"), started);
        assert_eq!(
            files.csv,
            PathBuf::from("/tmp/out/optimal_ollama_result_20250307_090501.csv")
        );
        assert_eq!(
            files.specs,
            PathBuf::from("/tmp/out/optimal_ollama_result_20250307_090501_specs.txt")
        );
    }

    #[test]
    fn test_sink_writes_header_then_appends_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("results.csv");
        let mut sink = CsvResultSink::create(&path).unwrap();

        let model = model();
        let ok = ok_step();
        let failed = ProbeStep::new(
            8192,
            StepMetrics::default(),
            TelemetrySample::new(14.0, 12.0),
            Verdict::stop(StepStatus::FailVram, "VRAM 12.0GiB > 10.0GiB"),
        );
        for step in [&ok, &failed] {
            sink.record(&ResultRow {
                server_version: "0.5.7",
                model: &model,
                step,
            })
            .unwrap();
        }

        let content = fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Timestamp,Ollama_Ver,Model,Model_Hash,Target_Ctx"));
        assert!(lines[0].ends_with("Stop_Reason,AA_Intelligence,AA_Coding,AA_Agentic"));
        assert!(lines[1].contains(",4096,4101,100,42.50,"));
        assert!(lines[2].contains(",8192,0,0,0.00,0.00,0.00,85.7,2.00,12.00,FAIL_VRAM,"));
        assert!(lines[2].ends_with("VRAM 12.0GiB > 10.0GiB,,,"));
    }

    #[test]
    fn test_reason_with_comma_is_quoted() {
        let dir = TempDir::new().unwrap();
        let mut sink = CsvResultSink::create(dir.path().join("r.csv")).unwrap();
        let model = model();
        let step = ProbeStep::new(
            4096,
            StepMetrics::default(),
            TelemetrySample::ZERO,
            Verdict::stop(StepStatus::Failed, "connection reset, retry later"),
        );
        sink.record(&ResultRow {
            server_version: "Unknown",
            model: &model,
            step: &step,
        })
        .unwrap();

        let content = fs::read_to_string(sink.path()).unwrap();
        assert!(content.contains(",FAIL,\"connection reset, retry later\",,,"));
    }

    #[test]
    fn test_create_truncates_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("r.csv");
        fs::write(&path, "stale\n").unwrap();
        CsvResultSink::create(&path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(!content.contains("stale"));
        assert_eq!(content.lines().count(), 1);
    }
}
