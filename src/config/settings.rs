use std::{collections::HashMap, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::fs::read;

use crate::error::ConfigError;

/// Manager-wide settings, loaded from a JSON file. Every field has a default.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagerSettings {
    /// Parent of every server install directory (`<servers_dir>/<name>`).
    pub servers_dir: PathBuf,
    /// Root of all backups (`<backup_dir>/<name>`).
    pub backup_dir: PathBuf,
    /// Holds one `<name>.json` record per server.
    pub config_dir: PathBuf,
    /// Cache for downloaded server archives.
    pub download_dir: PathBuf,
    pub start_timeout_secs: u64,
    pub stop_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub restart_grace_secs: u64,
    /// In-game message broadcast before a restart. `None` skips the warning.
    pub restart_warning: Option<String>,
    /// Backups kept per pool after the pre-update backup.
    pub backup_keep: u32,
    /// A CPU sample older than this is discarded and the next reading is 0.0%.
    pub probe_sample_ttl_secs: u64,
    /// Server name to systemd unit. Servers listed here are driven through systemctl.
    pub systemd_units: HashMap<String, String>,
    pub screen_prefix: String,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            servers_dir: PathBuf::from("servers"),
            backup_dir: PathBuf::from("backups"),
            config_dir: PathBuf::from(".bedguard"),
            download_dir: PathBuf::from(".bedguard/downloads"),
            start_timeout_secs: 60,
            stop_timeout_secs: 60,
            poll_interval_ms: 500,
            restart_grace_secs: 10,
            restart_warning: Some("Server is restarting in 10 seconds".to_string()),
            backup_keep: 3,
            probe_sample_ttl_secs: 300,
            systemd_units: HashMap::new(),
            screen_prefix: "bedrock-".to_string(),
        }
    }
}

impl ManagerSettings {
    pub async fn load(path: &PathBuf) -> Result<Self, ConfigError> {
        let data = read(path).await.map_err(|e| ConfigError::Read {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        serde_json::from_slice(&data).map_err(|e| ConfigError::Parse {
            path: path.clone(),
            reason: e.to_string(),
        })
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn restart_grace(&self) -> Duration {
        Duration::from_secs(self.restart_grace_secs)
    }

    pub fn probe_sample_ttl(&self) -> Duration {
        Duration::from_secs(self.probe_sample_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let settings: ManagerSettings =
            serde_json::from_str(r#"{"stop_timeout_secs": 5, "systemd_units": {"Alpha": "bedrock-alpha.service"}}"#)
                .unwrap();
        assert_eq!(settings.stop_timeout(), Duration::from_secs(5));
        assert_eq!(settings.start_timeout_secs, 60);
        assert_eq!(settings.screen_prefix, "bedrock-");
        assert_eq!(
            settings.systemd_units.get("Alpha").map(String::as_str),
            Some("bedrock-alpha.service")
        );
    }
}
