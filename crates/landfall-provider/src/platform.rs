//! Host operating system differences for the CLI-backed adapters.
//!
//! Adapters never branch on the OS themselves; they ask a [`Platform`] for
//! the executable name and pass every captured output through it.

pub trait Platform: Send + Sync {
    /// Executable name for a tool (`aws` -> `aws.exe` on Windows).
    fn executable(&self, tool: &str) -> String;

    /// Normalize captured output so parsers see `\n` line endings only.
    fn normalize_output(&self, output: &str) -> String {
        output.replace("\r\n", "\n").replace('\r', "\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
    Unix,
    Windows,
}

impl HostPlatform {
    pub fn detect() -> Self {
        if cfg!(windows) {
            HostPlatform::Windows
        } else {
            HostPlatform::Unix
        }
    }
}

impl Platform for HostPlatform {
    fn executable(&self, tool: &str) -> String {
        match self {
            HostPlatform::Windows if !tool.ends_with(".exe") => format!("{tool}.exe"),
            _ => tool.to_string(),
        }
    }
}
