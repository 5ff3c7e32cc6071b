//! Stop, back up, download, extract, record and restart: a version update.
//!
//! Every step is a hard gate. A failure returns the step that failed and
//! leaves everything exactly as that step left it. In particular a failed
//! extraction may leave a mixed old/new install directory behind; the new
//! version is never recorded and the server is never restarted in that case.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::{
    backup::BackupEngine,
    config::{BedrockVersion, ConfigStore, TargetVersion},
    error::{DownloadError, ServerError, UpdateError, UpdateStep},
    instance::{LifecycleState, ServerInstance, ServerName},
    server::Supervisor,
};

#[cfg(feature = "download")]
mod downloads;

#[cfg(feature = "download")]
pub use downloads::BedrockDownloads;

/// Turns an update target into a concrete version string.
#[async_trait]
pub trait VersionResolver: Send + Sync {
    async fn resolve(&self, target: &TargetVersion) -> Result<String, DownloadError>;
}

/// Fetches and unpacks server archives.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, version: &str) -> Result<PathBuf, DownloadError>;

    async fn extract(&self, archive: &Path, dest: &Path) -> Result<(), DownloadError>;
}

/// The steps one update call will run, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePlan {
    pub from_version: Option<String>,
    pub to_version: String,
    pub steps: Vec<UpdateStep>,
}

impl UpdatePlan {
    fn new(from_version: Option<String>, to_version: String, was_running: bool) -> Self {
        let mut steps = Vec::with_capacity(6);
        if was_running {
            steps.push(UpdateStep::Stop);
        }
        steps.extend([
            UpdateStep::Backup,
            UpdateStep::Download,
            UpdateStep::Extract,
            UpdateStep::Reconfigure,
        ]);
        if was_running {
            steps.push(UpdateStep::Restart);
        }
        Self {
            from_version,
            to_version,
            steps,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    UpToDate { version: String },
    Updated { plan: UpdatePlan, restarted: bool },
}

pub struct UpdateOrchestrator {
    supervisor: Arc<Supervisor>,
    backups: Arc<BackupEngine>,
    resolver: Arc<dyn VersionResolver>,
    downloader: Arc<dyn Downloader>,
    store: Arc<dyn ConfigStore>,
    backup_keep: u32,
}

impl UpdateOrchestrator {
    pub fn new(
        supervisor: Arc<Supervisor>,
        backups: Arc<BackupEngine>,
        resolver: Arc<dyn VersionResolver>,
        downloader: Arc<dyn Downloader>,
        store: Arc<dyn ConfigStore>,
        backup_keep: u32,
    ) -> Self {
        Self {
            supervisor,
            backups,
            resolver,
            downloader,
            store,
            backup_keep,
        }
    }

    #[instrument(skip(self), fields(server = %name))]
    pub async fn update(&self, name: &ServerName) -> Result<UpdateOutcome, UpdateError> {
        let mut slot = self.supervisor.lock(name).await;

        let mut config = self.store.read(name).await.map_err(|e| {
            UpdateError::Resolve(format!("cannot read server config: {e}"))
        })?;
        let instance = ServerInstance {
            name: name.clone(),
            install_dir: self.supervisor.install_dir(name),
            target_version: config.target_version.clone(),
        };

        let to_version = self
            .resolver
            .resolve(&instance.target_version)
            .await
            .map_err(|e| UpdateError::Resolve(e.to_string()))?;

        if let Some(installed) = &config.installed_version
            && same_version(installed, &to_version)
        {
            info!(version = %installed, "Already up to date");
            return Ok(UpdateOutcome::UpToDate {
                version: installed.clone(),
            });
        }

        let was_running = self
            .supervisor
            .refresh(&mut slot, ServerError::from_stop)
            .await
            .map_err(UpdateError::Stop)?
            == LifecycleState::Running;
        let plan = UpdatePlan::new(config.installed_version.clone(), to_version.clone(), was_running);
        info!(
            from = plan.from_version.as_deref().unwrap_or("none"),
            to = %plan.to_version,
            steps = ?plan.steps,
            "Starting update"
        );

        if was_running {
            self.supervisor
                .stop_locked(&mut slot)
                .await
                .map_err(UpdateError::Stop)?;
        }

        let fresh = self
            .backups
            .backup_all(name)
            .await
            .map_err(UpdateError::Backup)?;
        if let Err(e) = self
            .backups
            .prune_retaining(name, i64::from(self.backup_keep), &fresh)
            .await
        {
            warn!(error = %e, "Pruning after pre-update backup failed");
        }

        let archive = self
            .downloader
            .download(&to_version)
            .await
            .map_err(UpdateError::Download)?;
        self.downloader
            .extract(&archive, &instance.install_dir)
            .await
            .map_err(UpdateError::Extract)?;

        config.installed_version = Some(to_version.clone());
        config.last_known_status = LifecycleState::Stopped.to_string();
        self.store
            .write(name, &config)
            .await
            .map_err(UpdateError::Reconfigure)?;
        info!(version = %to_version, "Installed version recorded");

        if was_running {
            // The binaries are already swapped; a failed start is reported, not rolled back.
            self.supervisor
                .start_locked(&mut slot)
                .await
                .map_err(UpdateError::Restart)?;
        }

        Ok(UpdateOutcome::Updated {
            plan,
            restarted: was_running,
        })
    }
}

fn same_version(installed: &str, resolved: &str) -> bool {
    match (
        installed.parse::<BedrockVersion>(),
        resolved.parse::<BedrockVersion>(),
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => installed.trim() == resolved.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_compare_numerically_when_parseable() {
        assert!(same_version("1.21.50.7", "1.21.50.07"));
        assert!(!same_version("1.21.44.01", "1.21.50.07"));
        assert!(same_version("custom-build", "custom-build"));
    }

    #[test]
    fn plan_only_restarts_servers_that_were_running() {
        let plan = UpdatePlan::new(None, "1.21.50.07".to_string(), false);
        assert_eq!(
            plan.steps,
            vec![
                UpdateStep::Backup,
                UpdateStep::Download,
                UpdateStep::Extract,
                UpdateStep::Reconfigure
            ]
        );

        let plan = UpdatePlan::new(Some("1.21.44.01".to_string()), "1.21.50.07".to_string(), true);
        assert_eq!(plan.steps.first(), Some(&UpdateStep::Stop));
        assert_eq!(plan.steps.last(), Some(&UpdateStep::Restart));
    }
}
