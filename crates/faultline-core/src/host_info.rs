//! Host information attached to every notice context.

use serde::{Deserialize, Serialize};

/// Machine and runtime description of the reporting process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostInfo {
    pub hostname: String,
    /// `<os>-<arch>`, optionally followed by the kernel release.
    pub os: String,
    /// Language and toolchain marker.
    pub language: String,
}

impl HostInfo {
    /// Collect host information from the current system.
    pub fn collect() -> Self {
        let kernel = read_kernel_version();
        let mut os = format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH);
        if !kernel.is_empty() {
            os.push(' ');
            os.push_str(&kernel);
        }
        Self {
            hostname: read_hostname(),
            os,
            language: "rust".to_string(),
        }
    }
}

fn read_hostname() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_default()
}

fn read_kernel_version() -> String {
    std::fs::read_to_string("/proc/version")
        .ok()
        .and_then(|v| v.split_whitespace().nth(2).map(String::from))
        .unwrap_or_default()
}
