use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::process::Command;

use crate::codec::PixelLayout;
use crate::config::PipelineConfig;

/// What the host offers a transcode run; printed by `framerelay detect`
#[derive(Debug, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub version: String,
    pub os_name: String,
    pub os_version: String,
    pub arch: String,
    pub cpu_cores: usize,
    pub physical_cores: usize,
    pub filter_threads: usize,
    pub memory_mb: u64,
    pub config_file: Option<String>,
    pub pixel_formats: Vec<String>,
    pub encoders: Vec<String>,
}

impl RuntimeInfo {
    pub fn detect() -> Result<Self> {
        Ok(Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            os_name: std::env::consts::OS.to_string(),
            os_version: Self::detect_os_version(),
            arch: std::env::consts::ARCH.to_string(),
            cpu_cores: num_cpus::get(),
            physical_cores: num_cpus::get_physical(),
            filter_threads: rayon::current_num_threads(),
            memory_mb: Self::detect_memory(),
            config_file: PipelineConfig::locate().map(|p| p.display().to_string()),
            pixel_formats: PixelLayout::ALL.iter().map(|l| l.name().to_string()).collect(),
            encoders: vec!["lz4".to_string(), "raw".to_string()],
        })
    }

    fn detect_os_version() -> String {
        if let Ok(output) = Command::new("uname").arg("-r").output() {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        } else {
            "Unknown".to_string()
        }
    }

    fn detect_memory() -> u64 {
        if cfg!(target_os = "macos") {
            if let Ok(output) = Command::new("sysctl").arg("-n").arg("hw.memsize").output() {
                let s = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if let Ok(bytes) = s.parse::<u64>() {
                    return bytes / (1024 * 1024);
                }
            }
        }
        if let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") {
            return parse_meminfo_total(&meminfo).unwrap_or(0);
        }
        0
    }
}

/// MemTotal from /proc/meminfo, in MiB
fn parse_meminfo_total(meminfo: &str) -> Option<u64> {
    let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb / 1024)
}
