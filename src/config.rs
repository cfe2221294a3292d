use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_false")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            console_logging_enabled: default_true(),
            show_target: default_false(),
            ansi_colors: default_true(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_scan_timeout")]
    pub scan_timeout_secs: f64,
    #[serde(default = "default_scan_limit")]
    pub scan_limit: usize,
    /// Case-insensitive name fragments a scan result must contain. Empty keeps all.
    #[serde(default)]
    pub name_keywords: Vec<String>,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub log: LogSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_timeout_secs: default_scan_timeout(),
            scan_limit: default_scan_limit(),
            name_keywords: vec![],
            log_dir: default_log_dir(),
            poll_interval_ms: default_poll_interval(),
            connect_timeout_secs: default_connect_timeout(),
            log: LogSettings::default(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_scan_timeout() -> f64 {
    5.0
}
fn default_scan_limit() -> usize {
    5
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_poll_interval() -> u64 {
    1000
}
fn default_connect_timeout() -> u64 {
    10
}

impl Config {
    /// Reads `path` if it exists, otherwise returns the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Config> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(path)?;
        let config = serde_json::from_str(&contents)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.scan_timeout_secs).unwrap_or(Duration::ZERO)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
