//! Conductor configuration types and loading.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main Conductor configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Agent invocation settings
    pub agent: AgentConfig,

    /// Concurrency limits
    pub concurrency: ConcurrencyConfig,

    /// Quality-control defaults
    pub quality: QualityConfig,

    /// Storage locations
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration with fallback chain: explicit path → project-local
    /// `.conductor.yml` → user config dir → defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".conductor.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("conductor").join("conductor.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Root directory for pause state and telemetry, honouring `CONDUCTOR_HOME`.
    pub fn home_dir(&self) -> PathBuf {
        std::env::var_os("CONDUCTOR_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| self.storage.home_dir.clone())
    }

    /// Path to the agent binary, honouring `CONDUCTOR_AGENT_BIN`.
    pub fn agent_bin(&self) -> PathBuf {
        std::env::var_os("CONDUCTOR_AGENT_BIN")
            .map(PathBuf::from)
            .unwrap_or_else(|| self.agent.binary.clone())
    }
}

/// Agent subprocess invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Path to the agent binary (overridden by `CONDUCTOR_AGENT_BIN`)
    pub binary: PathBuf,

    /// Grace period before SIGKILL after SIGTERM, in milliseconds
    #[serde(rename = "termination-grace-ms")]
    pub termination_grace_ms: u64,

    /// Per-attempt timeout in milliseconds
    #[serde(rename = "attempt-timeout-ms")]
    pub attempt_timeout_ms: u64,
}

impl AgentConfig {
    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("agent"),
            termination_grace_ms: 5_000,
            attempt_timeout_ms: 600_000,
        }
    }
}

/// Concurrency limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Default max concurrency for a wave when neither the wave nor the plan
    /// specify one
    #[serde(rename = "default-max-concurrency")]
    pub default_max_concurrency: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            default_max_concurrency: 4,
        }
    }
}

/// Quality-control defaults (plan-level policy overrides these per plan).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Whether QC is enabled when a plan does not say
    pub enabled: bool,

    /// Default max attempts when a task does not specify one
    #[serde(rename = "default-max-attempts")]
    pub default_max_attempts: u32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_max_attempts: 1,
        }
    }
}

/// Storage locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for pause state and telemetry (overridden by `CONDUCTOR_HOME`)
    #[serde(rename = "home-dir")]
    pub home_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            home_dir: PathBuf::from(".conductor"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = Config::default();
        assert_eq!(config.concurrency.default_max_concurrency, 4);
        assert_eq!(config.quality.default_max_attempts, 1);
        assert!(config.quality.enabled);
    }

    #[test]
    fn deserialize_partial_config_uses_defaults() {
        let yaml = r#"
agent:
  binary: /usr/local/bin/my-agent
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.agent.binary, PathBuf::from("/usr/local/bin/my-agent"));
        assert_eq!(config.concurrency.default_max_concurrency, 4);
    }

    #[test]
    #[serial_test::serial(conductor_home_env)]
    fn conductor_home_env_overrides_config() {
        unsafe { std::env::set_var("CONDUCTOR_HOME", "/tmp/conductor-test-home") };
        let config = Config::default();
        assert_eq!(config.home_dir(), PathBuf::from("/tmp/conductor-test-home"));
        unsafe { std::env::remove_var("CONDUCTOR_HOME") };
    }
}
