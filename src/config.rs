use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};

/// Default timeout for a single request (30 seconds).
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[cfg(windows)]
const DEFAULT_PYTHON: &str = "python";
#[cfg(not(windows))]
const DEFAULT_PYTHON: &str = "python3";

const DEFAULT_NODE: &str = "node";

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub request_timeout: Duration,
    pub python_command: String,
    pub node_command: String,
    pub log_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            python_command: DEFAULT_PYTHON.to_string(),
            node_command: DEFAULT_NODE.to_string(),
            log_file: default_log_path(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment.
    ///
    /// - `MCPCALC_REQUEST_TIMEOUT_SECS` (optional, default 30) - max seconds per request
    /// - `MCPCALC_PYTHON` (optional, default `python3`) - interpreter for `.py` servers
    /// - `MCPCALC_NODE` (optional, default `node`) - runtime for `.js` servers
    /// - `MCPCALC_LOG_FILE` (optional) - TUI log file
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(val) = lookup("MCPCALC_REQUEST_TIMEOUT_SECS") {
            match val.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.request_timeout = Duration::from_secs(secs),
                _ => bail!("MCPCALC_REQUEST_TIMEOUT_SECS must be a positive integer, got '{val}'"),
            }
        }
        if let Some(python) = lookup("MCPCALC_PYTHON").filter(|v| !v.is_empty()) {
            config.python_command = python;
        }
        if let Some(node) = lookup("MCPCALC_NODE").filter(|v| !v.is_empty()) {
            config.node_command = node;
        }
        if let Some(log_file) = lookup("MCPCALC_LOG_FILE").filter(|v| !v.is_empty()) {
            config.log_file = Some(PathBuf::from(log_file));
        }

        Ok(config)
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

/// `<cache dir>/mcpcalc/mcpcalc.log`, if the platform has a cache dir.
pub fn default_log_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("mcpcalc").join("mcpcalc.log"))
}
