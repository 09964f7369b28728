//! # Hardware Detection
//!
//! Best-effort description of the host a run executes on. The result feeds
//! the specs artifact written next to each result file and decides whether
//! the host counts as an integrated-GPU platform for the GPU-share check.
//!
//! Detection never fails as a whole: every probe that cannot complete leaves
//! its field empty and the specs renderer prints a fallback line instead.

use serde::{Deserialize, Serialize};
use std::process::Command;
use thiserror::Error;
use tracing::debug;

/// Query sent to `nvidia-smi` for the GPU section of the specs artifact.
#[cfg_attr(target_os = "macos", allow(dead_code))]
const NVIDIA_QUERY: &str = "--query-gpu=index,name,memory.total,power.limit,pcie.link.gen.current,pcie.link.width.current";

/// Hardware detection errors
#[derive(Debug, Error)]
pub enum HardwareError {
    /// Failed to detect system memory
    #[error("Failed to detect system memory: {0}")]
    MemoryDetectionFailed(String),

    /// Failed to detect CPU information
    #[error("Failed to detect CPU information: {0}")]
    CpuDetectionFailed(String),

    /// Failed to detect GPU information
    #[error("Failed to detect GPU information: {0}")]
    GpuDetectionFailed(String),

    /// Unsupported platform
    #[error("Hardware detection not supported on this platform")]
    UnsupportedPlatform,
}

/// GPU type detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GpuType {
    /// NVIDIA GPU with CUDA support
    Nvidia,
    /// AMD GPU
    Amd,
    /// Apple Silicon GPU (Metal)
    AppleSilicon,
    /// Intel integrated graphics
    Intel,
    /// No GPU or unsupported GPU
    None,
}

impl GpuType {
    /// Unified-memory GPUs whose offload share the server does not report usefully.
    #[must_use]
    pub fn is_integrated(self) -> bool {
        matches!(self, Self::AppleSilicon | Self::Intel)
    }
}

/// What the GPU section of the specs artifact reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GpuReport {
    /// One line per device, as printed by `nvidia-smi`
    Devices(Vec<String>),
    /// Apple GPU summary, e.g. `Total Number of Cores: 10`
    Metal(Option<String>),
    /// A probe ran but found nothing
    NotFound,
    /// The probe could not run
    Skipped(String),
}

/// System hardware information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHardware {
    /// Operating system family (`linux`, `macos`, `windows`, ...)
    pub os_name: String,
    /// Kernel or OS release, empty if unknown
    pub os_release: String,
    /// Architecture (`x86_64`, `aarch64`, ...)
    pub architecture: String,
    /// CPU brand string
    pub cpu_model: Option<String>,
    /// Total system memory in bytes
    pub total_memory: Option<u64>,
    /// Detected GPU family
    pub gpu_type: GpuType,
    /// GPU section contents
    pub gpu: GpuReport,
}

impl SystemHardware {
    /// Detect system hardware.
    ///
    /// Runs external commands synchronously; call from a blocking context.
    #[must_use]
    pub fn detect() -> Self {
        let cpu_model = Self::detect_cpu()
            .inspect_err(|err| debug!(error = %err, "cpu detection failed"))
            .ok();
        let total_memory = Self::detect_memory()
            .inspect_err(|err| debug!(error = %err, "memory detection failed"))
            .ok();
        let gpu_type = Self::detect_gpu_type().unwrap_or_else(|err| {
            debug!(error = %err, "gpu detection failed");
            GpuType::None
        });

        Self {
            os_name: std::env::consts::OS.to_string(),
            os_release: Self::detect_os_release().unwrap_or_default(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_model,
            total_memory,
            gpu_type,
            gpu: Self::detect_gpu_report(),
        }
    }

    /// Whether the GPU-share check treats a 0% reading as "no telemetry".
    #[must_use]
    pub fn has_integrated_gpu(&self) -> bool {
        self.os_name == "macos" || self.gpu_type.is_integrated()
    }

    /// Total memory in GiB.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn total_memory_gib(&self) -> Option<f64> {
        self.total_memory
            .map(|bytes| bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }

    fn detect_os_release() -> Option<String> {
        #[cfg(target_os = "linux")]
        {
            std::fs::read_to_string("/proc/sys/kernel/osrelease")
                .ok()
                .map(|release| release.trim().to_string())
        }

        #[cfg(not(target_os = "linux"))]
        {
            command_stdout("uname", &["-r"]).ok()
        }
    }

    fn detect_memory() -> Result<u64, HardwareError> {
        #[cfg(target_os = "linux")]
        {
            let meminfo = std::fs::read_to_string("/proc/meminfo")
                .map_err(|e| HardwareError::MemoryDetectionFailed(e.to_string()))?;
            parse_meminfo_total(&meminfo).ok_or_else(|| {
                HardwareError::MemoryDetectionFailed(
                    "Could not parse MemTotal from /proc/meminfo".to_string(),
                )
            })
        }

        #[cfg(target_os = "macos")]
        {
            command_stdout("sysctl", &["-n", "hw.memsize"])
                .map_err(|e| HardwareError::MemoryDetectionFailed(e.to_string()))?
                .parse()
                .map_err(|e: std::num::ParseIntError| {
                    HardwareError::MemoryDetectionFailed(e.to_string())
                })
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        {
            Err(HardwareError::UnsupportedPlatform)
        }
    }

    fn detect_cpu() -> Result<String, HardwareError> {
        #[cfg(target_os = "linux")]
        {
            let cpuinfo = std::fs::read_to_string("/proc/cpuinfo")
                .map_err(|e| HardwareError::CpuDetectionFailed(e.to_string()))?;
            parse_cpuinfo_model(&cpuinfo).ok_or_else(|| {
                HardwareError::CpuDetectionFailed("no model name in /proc/cpuinfo".to_string())
            })
        }

        #[cfg(target_os = "macos")]
        {
            command_stdout("sysctl", &["-n", "machdep.cpu.brand_string"])
                .map_err(|e| HardwareError::CpuDetectionFailed(e.to_string()))
        }

        #[cfg(target_os = "windows")]
        {
            let output = command_stdout("wmic", &["cpu", "get", "name"])
                .map_err(|e| HardwareError::CpuDetectionFailed(e.to_string()))?;
            Ok(output.replace("Name", "").trim().to_string())
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        {
            Err(HardwareError::UnsupportedPlatform)
        }
    }

    fn detect_gpu_type() -> Result<GpuType, HardwareError> {
        #[cfg(target_os = "macos")]
        {
            if std::env::consts::ARCH == "aarch64" {
                return Ok(GpuType::AppleSilicon);
            }
            let displays = command_stdout("system_profiler", &["SPDisplaysDataType"])
                .map_err(|e| HardwareError::GpuDetectionFailed(e.to_string()))?;
            Ok(classify_gpu_listing(&displays))
        }

        #[cfg(not(target_os = "macos"))]
        {
            if Command::new("nvidia-smi")
                .arg("-L")
                .output()
                .is_ok_and(|output| output.status.success())
            {
                return Ok(GpuType::Nvidia);
            }

            #[cfg(target_os = "linux")]
            {
                let listing = command_stdout("lspci", &[])
                    .map_err(|e| HardwareError::GpuDetectionFailed(e.to_string()))?;
                Ok(classify_gpu_listing(&listing))
            }

            #[cfg(not(target_os = "linux"))]
            {
                Ok(GpuType::None)
            }
        }
    }

    fn detect_gpu_report() -> GpuReport {
        #[cfg(target_os = "macos")]
        {
            match command_stdout("system_profiler", &["SPDisplaysDataType"]) {
                Ok(displays) => GpuReport::Metal(metal_cores_line(&displays)),
                Err(err) => GpuReport::Skipped(err.to_string()),
            }
        }

        #[cfg(not(target_os = "macos"))]
        {
            match Command::new("nvidia-smi")
                .args([NVIDIA_QUERY, "--format=csv,noheader"])
                .output()
            {
                Ok(output) if output.status.success() => {
                    GpuReport::Devices(nvidia_lines(&String::from_utf8_lossy(&output.stdout)))
                }
                Ok(_) => GpuReport::NotFound,
                Err(err) => GpuReport::Skipped(err.to_string()),
            }
        }
    }
}

/// Run a command and return its trimmed stdout.
fn command_stdout(program: &str, args: &[&str]) -> std::io::Result<String> {
    let output = Command::new(program).args(args).output()?;
    if !output.status.success() {
        return Err(std::io::Error::other(format!(
            "{program} exited with {}",
            output.status
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// `MemTotal` from `/proc/meminfo`, in bytes.
fn parse_meminfo_total(meminfo: &str) -> Option<u64> {
    meminfo
        .lines()
        .find(|line| line.starts_with("MemTotal:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .filter(|kb| *kb > 0)
        .map(|kb| kb * 1024)
}

/// First `model name` entry from `/proc/cpuinfo`.
fn parse_cpuinfo_model(cpuinfo: &str) -> Option<String> {
    cpuinfo
        .lines()
        .find(|line| line.starts_with("model name"))
        .and_then(|line| line.split(':').nth(1))
        .map(|model| model.trim().to_string())
        .filter(|model| !model.is_empty())
}

fn classify_gpu_listing(listing: &str) -> GpuType {
    let listing = listing.to_lowercase();
    if listing.contains("nvidia") {
        GpuType::Nvidia
    } else if listing.contains("amd") || listing.contains("radeon") {
        GpuType::Amd
    } else if listing.contains("intel") && listing.contains("graphics") {
        GpuType::Intel
    } else {
        GpuType::None
    }
}

#[cfg_attr(target_os = "macos", allow(dead_code))]
fn nvidia_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn metal_cores_line(displays: &str) -> Option<String> {
    displays
        .lines()
        .find(|line| line.contains("Total Number of Cores"))
        .map(|line| line.trim().to_string())
}
