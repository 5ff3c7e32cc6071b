use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{
    fs::{File, create_dir_all, read, rename},
    io::{self, AsyncWriteExt},
};

use crate::{config::TargetVersion, error::ConfigError, instance::ServerName};

/// The slice of a server's persisted record this crate reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub installed_version: Option<String>,
    pub target_version: TargetVersion,
    pub last_known_status: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            installed_version: None,
            target_version: TargetVersion::LatestStable,
            last_known_status: "UNKNOWN".to_string(),
        }
    }
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn read(&self, name: &ServerName) -> Result<ServerConfig, ConfigError>;

    async fn write(&self, name: &ServerName, config: &ServerConfig) -> Result<(), ConfigError>;

    async fn set_status(&self, name: &ServerName, status: &str) -> Result<(), ConfigError> {
        let mut config = self.read(name).await?;
        config.last_known_status = status.to_string();
        self.write(name, &config).await
    }
}

/// Stores each record as `<dir>/<name>.json`.
#[derive(Debug, Clone)]
pub struct JsonConfigStore {
    dir: PathBuf,
}

impl JsonConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, name: &ServerName) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }
}

#[async_trait]
impl ConfigStore for JsonConfigStore {
    async fn read(&self, name: &ServerName) -> Result<ServerConfig, ConfigError> {
        let path = self.path_for(name);

        let data = match read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ServerConfig::default()),
            Err(e) => {
                return Err(ConfigError::Read {
                    path,
                    reason: e.to_string(),
                });
            }
        };

        serde_json::from_slice(&data).map_err(|e| ConfigError::Parse {
            path,
            reason: e.to_string(),
        })
    }

    async fn write(&self, name: &ServerName, config: &ServerConfig) -> Result<(), ConfigError> {
        let path = self.path_for(name);
        let write_err = |e: &dyn std::fmt::Display| ConfigError::Write {
            path: path.clone(),
            reason: e.to_string(),
        };

        let json = serde_json::to_vec_pretty(config).map_err(|e| write_err(&e))?;

        create_dir_all(&self.dir).await.map_err(|e| write_err(&e))?;

        // Write beside the target, then rename over it so readers never see half a file.
        let tmp = self.dir.join(format!(".{name}.json.tmp"));
        let mut out = File::create(&tmp).await.map_err(|e| write_err(&e))?;
        out.write_all(&json).await.map_err(|e| write_err(&e))?;
        out.sync_all().await.map_err(|e| write_err(&e))?;
        drop(out);

        rename(&tmp, &path).await.map_err(|e| write_err(&e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_record_reads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonConfigStore::new(dir.path());
        let name: ServerName = "Alpha".parse().unwrap();

        assert_eq!(store.read(&name).await.unwrap(), ServerConfig::default());
    }

    #[tokio::test]
    async fn write_then_set_status_keeps_other_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonConfigStore::new(dir.path().join("nested"));
        let name: ServerName = "Alpha".parse().unwrap();

        let config = ServerConfig {
            installed_version: Some("1.21.50.07".to_string()),
            target_version: TargetVersion::LatestPreview,
            last_known_status: "STOPPED".to_string(),
        };
        store.write(&name, &config).await.unwrap();
        store.set_status(&name, "RUNNING").await.unwrap();

        let read_back = store.read(&name).await.unwrap();
        assert_eq!(read_back.installed_version.as_deref(), Some("1.21.50.07"));
        assert_eq!(read_back.target_version, TargetVersion::LatestPreview);
        assert_eq!(read_back.last_known_status, "RUNNING");
    }
}
