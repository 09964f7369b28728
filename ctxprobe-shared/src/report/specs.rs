//! Hardware and software description written once per run.

use crate::probe::errors::ProbeResult;
use crate::probe::hardware::{GpuReport, SystemHardware};
use chrono::{DateTime, Local};
use std::{fs, path::Path};

const RUN_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Render the specs artifact.
#[must_use]
pub fn render_specs(started: DateTime<Local>, hardware: &SystemHardware) -> String {
    let release = if hardware.os_release.is_empty() {
        String::new()
    } else {
        format!(" {}", hardware.os_release)
    };

    let mut lines = vec![
        format!("Run: {}", started.format(RUN_TIMESTAMP_FORMAT)),
        format!(
            "OS: {}{release} ({})",
            hardware.os_name, hardware.architecture
        ),
        match &hardware.cpu_model {
            Some(model) => format!("CPU: {model}"),
            None => "CPU: Detection failed".to_string(),
        },
    ];
    if let Some(gib) = hardware.total_memory_gib() {
        lines.push(format!("Total Memory: {gib:.1} GB"));
    }

    lines.push(String::new());
    lines.push("--- GPU Configuration ---".to_string());
    match &hardware.gpu {
        GpuReport::Devices(devices) if !devices.is_empty() => {
            lines.extend(devices.iter().map(|device| format!("GPU: {device}")));
        }
        GpuReport::Devices(_) | GpuReport::NotFound => {
            lines.push("No NVIDIA GPU found".to_string());
        }
        GpuReport::Metal(Some(cores)) => lines.push(format!("GPU: {cores}")),
        GpuReport::Metal(None) => lines.push("GPU: Apple Metal (Integrated)".to_string()),
        GpuReport::Skipped(reason) => lines.push(format!("GPU Check skipped ({reason})")),
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Write the rendered artifact to `path`.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_specs(path: &Path, content: &str) -> ProbeResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}
