use std::path::PathBuf;

use async_trait::async_trait;
use tokio::{fs::read_to_string, io};

use crate::instance::ServerName;

const DEFAULT_WORLD_NAME: &str = "Bedrock level";

/// Resolves the active world of a server.
#[async_trait]
pub trait PropertiesReader: Send + Sync {
    async fn world_name(&self, name: &ServerName) -> Result<String, String>;
}

/// Reads `level-name` from `<servers_dir>/<name>/server.properties`.
#[derive(Debug, Clone)]
pub struct ServerPropertiesReader {
    servers_dir: PathBuf,
}

impl ServerPropertiesReader {
    pub fn new(servers_dir: impl Into<PathBuf>) -> Self {
        Self {
            servers_dir: servers_dir.into(),
        }
    }
}

#[async_trait]
impl PropertiesReader for ServerPropertiesReader {
    async fn world_name(&self, name: &ServerName) -> Result<String, String> {
        let path = self.servers_dir.join(name.as_str()).join("server.properties");

        let contents = match read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(DEFAULT_WORLD_NAME.to_string());
            }
            Err(e) => return Err(format!("{}: {e}", path.display())),
        };

        Ok(parse_level_name(&contents).unwrap_or_else(|| DEFAULT_WORLD_NAME.to_string()))
    }
}

fn parse_level_name(contents: &str) -> Option<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.starts_with('#'))
        .filter_map(|l| l.split_once('='))
        .find(|(key, _)| key.trim() == "level-name")
        .map(|(_, value)| value.trim().to_string())
        .filter(|v| !v.is_empty())
}
