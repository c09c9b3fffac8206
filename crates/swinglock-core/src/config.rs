use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables for the PIN/lockout/session policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthPolicy {
    pub pin_length: usize,
    pub max_failed_attempts: u32,
    pub lockout_duration_secs: u64,
    pub session_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            pin_length: 6,
            max_failed_attempts: 3,
            lockout_duration_secs: 5 * 60,
            session_timeout_secs: 15 * 60,
            sweep_interval_secs: 60,
        }
    }
}

impl AuthPolicy {
    pub fn lockout_duration(&self) -> Duration {
        Duration::from_secs(self.lockout_duration_secs)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Feature switches the kernel consults before performing optional behavior.
/// Read-only from the kernel's perspective; owned by the host application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub encryption_enabled: bool,
    pub biometric_enabled: bool,
    pub audit_enabled: bool,
    pub memory_protection_enabled: bool,
    #[serde(default)]
    pub policy: AuthPolicy,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            encryption_enabled: true,
            biometric_enabled: true,
            audit_enabled: true,
            memory_protection_enabled: true,
            policy: AuthPolicy::default(),
        }
    }
}

pub fn load_config(path: &Path) -> anyhow::Result<SecurityConfig> {
    if path.exists() {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    } else {
        Ok(SecurityConfig::default())
    }
}

pub fn save_config(path: &Path, config: &SecurityConfig) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_string_pretty(config)?;
    std::fs::write(path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_sane() {
        let config = SecurityConfig::default();
        assert!(config.encryption_enabled);
        assert_eq!(config.policy.pin_length, 6);
        assert_eq!(config.policy.max_failed_attempts, 3);
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("security.json");
        let mut config = SecurityConfig::default();
        config.policy.max_failed_attempts = 5;
        save_config(&path, &config).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.policy.max_failed_attempts, 5);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let loaded = load_config(&dir.path().join("absent.json")).unwrap();
        assert!(loaded.audit_enabled);
    }
}
