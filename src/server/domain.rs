use std::{path::Path, sync::Arc};

use serde::Serialize;
use tracing::info;

use crate::{
    backend::{ProcessBackend, host_backend},
    backup::{BackupEngine, BackupKind, BackupRecord},
    config::{ConfigStore, JsonConfigStore, ManagerSettings, PropertiesReader, ServerPropertiesReader},
    error::{Error, ErrorKind, ServerError},
    instance::ServerName,
    probe::{ProcessStatus, StatusProbe},
    update::{Downloader, UpdateOrchestrator, UpdateOutcome, VersionResolver},
};

use super::Supervisor;

/// What every public operation hands back. Failures are carried here, never raised.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ProcessStatus>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub backups: Vec<BackupRecord>,
}

impl OperationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            kind: None,
            status: None,
            backups: Vec::new(),
        }
    }

    pub fn failure(err: impl Into<Error>) -> Self {
        let err = err.into();
        Self {
            success: false,
            message: err.to_string(),
            kind: Some(err.kind()),
            status: None,
            backups: Vec::new(),
        }
    }

    fn with_status(mut self, status: ProcessStatus) -> Self {
        self.status = Some(status);
        self
    }

    fn with_backups(mut self, backups: Vec<BackupRecord>) -> Self {
        self.backups = backups;
        self
    }
}

fn parse_name(raw: &str) -> Result<ServerName, OperationResult> {
    raw.parse::<ServerName>()
        .map_err(|e| OperationResult::failure(ServerError::InvalidName(e)))
}

macro_rules! server_name {
    ($raw:expr) => {
        match parse_name($raw) {
            Ok(name) => name,
            Err(result) => return result,
        }
    };
}

/// Entry point for the HTTP/CLI layer: every operation by server name.
pub struct BedrockManager {
    settings: ManagerSettings,
    supervisor: Arc<Supervisor>,
    probe: Arc<StatusProbe>,
    backups: Arc<BackupEngine>,
    updater: UpdateOrchestrator,
}

impl BedrockManager {
    pub fn builder(settings: ManagerSettings) -> ManagerBuilder {
        ManagerBuilder::new(settings)
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    pub fn backups(&self) -> &Arc<BackupEngine> {
        &self.backups
    }

    pub async fn start(&self, server: &str) -> OperationResult {
        let name = server_name!(server);
        match self.supervisor.start(&name).await {
            Ok(outcome) => OperationResult::ok(format!("Server '{name}' {outcome}")),
            Err(e) => OperationResult::failure(e),
        }
    }

    pub async fn stop(&self, server: &str) -> OperationResult {
        let name = server_name!(server);
        match self.supervisor.stop(&name).await {
            Ok(outcome) => OperationResult::ok(format!("Server '{name}' {outcome}")),
            Err(e) => OperationResult::failure(e),
        }
    }

    pub async fn restart(&self, server: &str) -> OperationResult {
        let name = server_name!(server);
        match self.supervisor.restart(&name).await {
            Ok(outcome) => OperationResult::ok(format!("Server '{name}' {outcome}")),
            Err(e) => OperationResult::failure(e),
        }
    }

    pub async fn send_command(&self, server: &str, command: &str) -> OperationResult {
        let name = server_name!(server);
        match self.supervisor.channel().send(&name, command).await {
            Ok(()) => OperationResult::ok(format!("Command sent to '{name}'")),
            Err(e) => OperationResult::failure(e),
        }
    }

    pub async fn update(&self, server: &str) -> OperationResult {
        let name = server_name!(server);
        match self.updater.update(&name).await {
            Ok(UpdateOutcome::UpToDate { version }) => {
                OperationResult::ok(format!("Server '{name}' already up to date ({version})"))
            }
            Ok(UpdateOutcome::Updated { plan, restarted }) => {
                let from = plan.from_version.as_deref().unwrap_or("none");
                let mut message = format!(
                    "Server '{name}' updated from {from} to {}",
                    plan.to_version
                );
                if restarted {
                    message.push_str(" and restarted");
                }
                OperationResult::ok(message)
            }
            Err(e) => OperationResult::failure(e),
        }
    }

    pub async fn backup(&self, server: &str, kind: BackupKind, file: Option<&str>) -> OperationResult {
        let name = server_name!(server);
        let _slot = self.supervisor.lock(&name).await;
        match self.backups.backup(&name, kind, file).await {
            Ok(record) => {
                let message = format!("Backup created: {}", record.path.display());
                OperationResult::ok(message).with_backups(vec![record])
            }
            Err(e) => OperationResult::failure(e),
        }
    }

    pub async fn list_backups(&self, server: &str, kind: BackupKind) -> OperationResult {
        let name = server_name!(server);
        match self.backups.list_backups(&name, kind).await {
            Ok(records) => OperationResult::ok(format!("{} {kind} backup(s) for '{name}'", records.len()))
                .with_backups(records),
            Err(e) => OperationResult::failure(e),
        }
    }

    pub async fn prune_backups(&self, server: &str, keep: i64) -> OperationResult {
        let name = server_name!(server);
        let _slot = self.supervisor.lock(&name).await;
        match self.backups.prune(&name, keep).await {
            Ok(deleted) => OperationResult::ok(format!(
                "Pruned {deleted} backup(s) for '{name}', keeping {keep} per type"
            )),
            Err(e) => OperationResult::failure(e),
        }
    }

    /// Does not stop the server first; callers restoring a live world stop it themselves.
    pub async fn restore(&self, server: &str, backup_path: &Path, kind: BackupKind) -> OperationResult {
        let name = server_name!(server);
        let _slot = self.supervisor.lock(&name).await;
        match self.backups.restore(&name, backup_path, kind).await {
            Ok(target) => {
                info!(server = %name, target = %target.display(), "Restore complete");
                OperationResult::ok(format!("Restored {kind} backup to {}", target.display()))
            }
            Err(e) => OperationResult::failure(e),
        }
    }

    pub async fn probe_status(&self, server: &str) -> OperationResult {
        let name = server_name!(server);
        match self.probe.probe(&name).await {
            Ok(Some(status)) => {
                OperationResult::ok(format!("Server '{name}' is running")).with_status(status)
            }
            Ok(None) => OperationResult::failure(ServerError::NotRunning(name.to_string())),
            Err(e) => OperationResult::failure(ServerError::from_probe(name.as_str(), e)),
        }
    }
}

/// Wires the manager. Every collaborator has a host default and can be swapped.
pub struct ManagerBuilder {
    settings: ManagerSettings,
    backend: Option<Arc<dyn ProcessBackend>>,
    store: Option<Arc<dyn ConfigStore>>,
    properties: Option<Arc<dyn PropertiesReader>>,
    resolver: Option<Arc<dyn VersionResolver>>,
    downloader: Option<Arc<dyn Downloader>>,
}

impl ManagerBuilder {
    pub fn new(settings: ManagerSettings) -> Self {
        Self {
            settings,
            backend: None,
            store: None,
            properties: None,
            resolver: None,
            downloader: None,
        }
    }

    pub fn backend(mut self, backend: Arc<dyn ProcessBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn config_store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn properties(mut self, properties: Arc<dyn PropertiesReader>) -> Self {
        self.properties = Some(properties);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn VersionResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn downloader(mut self, downloader: Arc<dyn Downloader>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    pub fn build(self) -> BedrockManager {
        let settings = self.settings;

        let backend = self.backend.unwrap_or_else(|| host_backend(&settings));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(JsonConfigStore::new(settings.config_dir.clone())));
        let properties = self
            .properties
            .unwrap_or_else(|| Arc::new(ServerPropertiesReader::new(settings.servers_dir.clone())));
        let (resolver, downloader) = default_collaborators(&settings, self.resolver, self.downloader);

        let probe = Arc::new(StatusProbe::new(backend.clone(), settings.probe_sample_ttl()));
        let supervisor = Arc::new(Supervisor::new(&settings, backend, probe.clone(), store.clone()));
        let backups = Arc::new(BackupEngine::new(
            settings.servers_dir.clone(),
            settings.backup_dir.clone(),
            properties,
        ));
        let updater = UpdateOrchestrator::new(
            supervisor.clone(),
            backups.clone(),
            resolver,
            downloader,
            store,
            settings.backup_keep,
        );

        BedrockManager {
            settings,
            supervisor,
            probe,
            backups,
            updater,
        }
    }
}

#[cfg(feature = "download")]
fn default_collaborators(
    settings: &ManagerSettings,
    resolver: Option<Arc<dyn VersionResolver>>,
    downloader: Option<Arc<dyn Downloader>>,
) -> (Arc<dyn VersionResolver>, Arc<dyn Downloader>) {
    let official = Arc::new(crate::update::BedrockDownloads::new(settings.download_dir.clone()));
    (
        resolver.unwrap_or_else(|| official.clone()),
        downloader.unwrap_or(official),
    )
}

#[cfg(not(feature = "download"))]
fn default_collaborators(
    _settings: &ManagerSettings,
    resolver: Option<Arc<dyn VersionResolver>>,
    downloader: Option<Arc<dyn Downloader>>,
) -> (Arc<dyn VersionResolver>, Arc<dyn Downloader>) {
    let unconfigured = Arc::new(Unconfigured);
    (
        resolver.unwrap_or_else(|| unconfigured.clone()),
        downloader.unwrap_or(unconfigured),
    )
}

/// Stand-in when the crate is built without the official downloader.
#[cfg(not(feature = "download"))]
struct Unconfigured;

#[cfg(not(feature = "download"))]
#[async_trait::async_trait]
impl VersionResolver for Unconfigured {
    async fn resolve(
        &self,
        _target: &crate::config::TargetVersion,
    ) -> Result<String, crate::error::DownloadError> {
        Err(crate::error::DownloadError::Manifest(
            "no version resolver configured".to_string(),
        ))
    }
}

#[cfg(not(feature = "download"))]
#[async_trait::async_trait]
impl Downloader for Unconfigured {
    async fn download(&self, version: &str) -> Result<std::path::PathBuf, crate::error::DownloadError> {
        Err(crate::error::DownloadError::Version(version.to_string()))
    }

    async fn extract(&self, archive: &Path, _dest: &Path) -> Result<(), crate::error::DownloadError> {
        Err(crate::error::DownloadError::Archive {
            path: archive.to_path_buf(),
            reason: "no downloader configured".to_string(),
        })
    }
}
