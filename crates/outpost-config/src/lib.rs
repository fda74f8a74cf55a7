//! Outpost controller configuration
//!
//! The file is looked up in this order:
//! 1. `OUTPOST_CONFIG` (explicit path, must exist)
//! 2. `./outpost.yaml`
//! 3. `./.outpost/config.yaml`
//! 4. `<config dir>/outpost/config.yaml`
//!
//! A missing file yields the defaults. `OUTPOST_MANAGEMENT_ACCOUNT_ID` and
//! `OUTPOST_MANAGEMENT_NET_ID` override the management metadata.

pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "OUTPOST_CONFIG";
pub const MANAGEMENT_ACCOUNT_ENV: &str = "OUTPOST_MANAGEMENT_ACCOUNT_ID";
pub const MANAGEMENT_NET_ENV: &str = "OUTPOST_MANAGEMENT_NET_ID";

const CANDIDATES: [&str; 2] = ["outpost.yaml", ".outpost/config.yaml"];

/// Management cluster the workload nets peer with
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagementConfig {
    pub account_id: String,
    pub net_id: String,
}

/// Exponential backoff applied to failed reconciles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_delay_secs: u64,
    pub max_delay_secs: u64,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: 1,
            max_delay_secs: 300,
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `attempt` (0-based), capped at `max_delay_secs`
    pub fn delay(&self, attempt: u32) -> Duration {
        let max = self.max_delay_secs as f64;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = (self.initial_delay_secs as f64 * self.multiplier.powi(exponent)).min(max);
        Duration::from_secs_f64(secs.max(0.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Requeue delay while a VM is still pending
    pub vm_pending_requeue_secs: u64,
    /// Requeue delay while a cluster waits for its machines to go away
    pub deletion_requeue_secs: u64,
    /// Deadline of one reconcile pass
    pub call_timeout_secs: u64,
    pub backoff: BackoffConfig,
    pub management: ManagementConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            vm_pending_requeue_secs: 30,
            deletion_requeue_secs: 10,
            call_timeout_secs: 60,
            backoff: BackoffConfig::default(),
            management: ManagementConfig::default(),
        }
    }
}

impl ControllerConfig {
    pub fn vm_pending_requeue(&self) -> Duration {
        Duration::from_secs(self.vm_pending_requeue_secs)
    }

    pub fn deletion_requeue(&self) -> Duration {
        Duration::from_secs(self.deletion_requeue_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Parse a YAML document
    pub fn from_yaml(content: &str, path: &Path) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content, path)
    }

    /// Discover, read and override the config, falling back to defaults
    pub fn load() -> Result<Self> {
        let mut config = match find_config_file()? {
            Some(path) => {
                tracing::debug!(path = %path.display(), "Loading controller config");
                Self::from_file(&path)?
            }
            None => {
                tracing::debug!("No config file found, using defaults");
                Self::default()
            }
        };
        config.apply_env();
        Ok(config)
    }

    /// Apply environment overrides
    pub fn apply_env(&mut self) {
        if let Some(account) = non_empty_env(MANAGEMENT_ACCOUNT_ENV) {
            self.management.account_id = account;
        }
        if let Some(net) = non_empty_env(MANAGEMENT_NET_ENV) {
            self.management.net_id = net;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.backoff.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "backoff.multiplier must be at least 1.0, got {}",
                self.backoff.multiplier
            )));
        }
        if self.call_timeout_secs == 0 {
            return Err(ConfigError::Invalid("call_timeout_secs must be positive".into()));
        }
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Outpost's directory under the user config dir
pub fn get_config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("outpost"))
}

/// Locate the config file; `None` when no candidate exists
pub fn find_config_file() -> Result<Option<PathBuf>> {
    if let Some(explicit) = non_empty_env(CONFIG_ENV) {
        let path = PathBuf::from(explicit);
        if !path.exists() {
            return Err(ConfigError::ExplicitFileMissing(path));
        }
        return Ok(Some(path));
    }

    let current_dir = std::env::current_dir()?;
    for candidate in CANDIDATES {
        let path = current_dir.join(candidate);
        if path.exists() {
            return Ok(Some(path));
        }
    }

    if let Ok(dir) = get_config_dir() {
        let global = dir.join("config.yaml");
        if global.exists() {
            return Ok(Some(global));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.vm_pending_requeue(), Duration::from_secs(30));
        assert_eq!(config.deletion_requeue(), Duration::from_secs(10));
        assert_eq!(config.call_timeout(), Duration::from_secs(60));
        assert!(config.management.account_id.is_empty());
    }

    #[test]
    fn test_backoff_delay_is_capped() {
        let backoff = BackoffConfig::default();
        assert_eq!(backoff.delay(0), Duration::from_secs(1));
        assert_eq!(backoff.delay(3), Duration::from_secs(8));
        assert_eq!(backoff.delay(20), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = "deletion_requeue_secs: 5\nmanagement:\n  net_id: vpc-mgmt\n";
        let config = ControllerConfig::from_yaml(yaml, Path::new("outpost.yaml")).unwrap();
        assert_eq!(config.deletion_requeue_secs, 5);
        assert_eq!(config.vm_pending_requeue_secs, 30);
        assert_eq!(config.management.net_id, "vpc-mgmt");
    }

    #[test]
    fn test_invalid_multiplier() {
        let yaml = "backoff:\n  multiplier: 0.5\n";
        let err = ControllerConfig::from_yaml(yaml, Path::new("outpost.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    #[serial]
    fn test_find_config_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("outpost.yaml"), "call_timeout_secs: 5\n").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let found = find_config_file().unwrap().unwrap();
        assert!(found.ends_with("outpost.yaml"));
        let config = ControllerConfig::load().unwrap();
        assert_eq!(config.call_timeout_secs, 5);

        std::env::set_current_dir(original_dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_find_config_in_dot_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        let dot_dir = temp_dir.path().join(".outpost");
        fs::create_dir(&dot_dir).unwrap();
        fs::write(dot_dir.join("config.yaml"), "{}\n").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let found = find_config_file().unwrap().unwrap();
        assert!(found.ends_with(".outpost/config.yaml"));

        std::env::set_current_dir(original_dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_explicit_path_must_exist() {
        let temp_dir = tempfile::tempdir().unwrap();
        let missing = temp_dir.path().join("missing.yaml");

        unsafe {
            std::env::set_var(CONFIG_ENV, missing.to_str().unwrap());
        }
        let result = find_config_file();
        unsafe {
            std::env::remove_var(CONFIG_ENV);
        }

        assert!(matches!(result, Err(ConfigError::ExplicitFileMissing(_))));
    }

    #[test]
    #[serial]
    fn test_env_overrides_management() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("custom.yaml");
        fs::write(&path, "management:\n  account_id: \"111\"\n  net_id: vpc-file\n").unwrap();

        unsafe {
            std::env::set_var(CONFIG_ENV, path.to_str().unwrap());
            std::env::set_var(MANAGEMENT_NET_ENV, "vpc-env");
        }
        let config = ControllerConfig::load();
        unsafe {
            std::env::remove_var(CONFIG_ENV);
            std::env::remove_var(MANAGEMENT_NET_ENV);
        }

        let config = config.unwrap();
        assert_eq!(config.management.account_id, "111");
        assert_eq!(config.management.net_id, "vpc-env");
    }
}
