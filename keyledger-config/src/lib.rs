//! Configuration management for keyledger

use serde::Deserialize;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_KEYS_PATH: &str = "keys";
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_FILE_ROOT: &str = "./keyledger-data";

/// Which document store backs the key ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Github,
    File,
    Memory,
}

impl std::str::FromStr for BackendKind {
    type Err = config::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "github" => Ok(BackendKind::Github),
            "file" => Ok(BackendKind::File),
            "memory" => Ok(BackendKind::Memory),
            other => Err(config::ConfigError::Message(format!(
                "unknown backend '{}', expected github, file or memory",
                other
            ))),
        }
    }
}

/// GitHub repository holding the key document
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubConfig {
    pub owner: String,
    pub repo: String,
    pub token: String,
    pub branch: Option<String>,
    pub api_url: String,
}

/// Expiration scheduler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Seconds between periodic sweeps in `watch` mode
    pub sweep_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_secs: 60,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub backend: BackendKind,
    pub github: Option<GitHubConfig>,
    pub file_root: PathBuf,
    pub keys_path: String,
    pub added_by: String,
    pub scheduler: SchedulerConfig,
    pub log_level: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let backend = match env::var("KEYLEDGER_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => BackendKind::Github,
        };

        // GitHub settings are only complete when owner, repo and token are all set
        let github = if let (Ok(owner), Ok(repo), Ok(token)) = (
            env::var("GITHUB_OWNER"),
            env::var("GITHUB_REPO"),
            env::var("GITHUB_TOKEN"),
        ) {
            Some(GitHubConfig {
                owner,
                repo,
                token,
                branch: env::var("GITHUB_BRANCH").ok(),
                api_url: env::var("GITHUB_API_URL")
                    .unwrap_or_else(|_| DEFAULT_GITHUB_API_URL.to_string()),
            })
        } else {
            None
        };

        let sweep_interval_secs = match env::var("KEYLEDGER_SWEEP_INTERVAL_SECS") {
            Ok(value) => value.trim().parse::<u64>().map_err(|e| {
                config::ConfigError::Message(format!(
                    "KEYLEDGER_SWEEP_INTERVAL_SECS must be whole seconds: {}",
                    e
                ))
            })?,
            Err(_) => SchedulerConfig::default().sweep_interval_secs,
        };

        let scheduler_enabled = env::var("KEYLEDGER_SCHEDULER_ENABLED")
            .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(true);

        Ok(Self {
            backend,
            github,
            file_root: env::var("KEYLEDGER_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_FILE_ROOT)),
            keys_path: env::var("KEYLEDGER_PATH")
                .unwrap_or_else(|_| DEFAULT_KEYS_PATH.to_string()),
            added_by: env::var("KEYLEDGER_ADDED_BY")
                .unwrap_or_else(|_| "script".to_string()),
            scheduler: SchedulerConfig {
                enabled: scheduler_enabled,
                sweep_interval_secs,
            },
            log_level: env::var("LOG_LEVEL").ok(),
        })
    }

    /// GitHub settings, or an error naming the missing variables
    pub fn require_github(&self) -> Result<&GitHubConfig, config::ConfigError> {
        self.github.as_ref().ok_or_else(|| {
            config::ConfigError::NotFound(
                "GITHUB_OWNER, GITHUB_REPO and GITHUB_TOKEN".to_string(),
            )
        })
    }

    /// Get log level, defaulting to "info"
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }
}
