//! Backup, pruning and restore of a server's world and config files.
//!
//! Layout under `<backup_root>/<server>/`, three independent pools:
//! - world archives: `<world>_backup_<ts>.mcworld`
//! - properties backups: `<stem>_backup_<ts>.properties`
//! - other config backups: `<stem>_backup_<ts>.json`
//!
//! Nothing here touches processes; callers serialize against lifecycle
//! operations with the server's lock.

use std::{
    cmp::Reverse,
    fmt::{self, Display},
    path::{Component, Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tokio::{
    fs::{copy, create_dir_all, metadata, read_dir, remove_dir_all, remove_file, rename},
    io,
};
use tracing::{debug, info, warn};

use crate::{
    archive,
    config::PropertiesReader,
    error::{BackupError, RestoreError},
    instance::ServerName,
    utils::{BackupName, backup_timestamp, modified_at},
};

const WORLD_EXTENSION: &str = "mcworld";
const PROPERTIES_FILE: &str = "server.properties";

/// Config files taken by [`BackupEngine::backup_all`] besides the world.
pub const STANDARD_CONFIG_FILES: [&str; 3] = [PROPERTIES_FILE, "allowlist.json", "permissions.json"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackupKind {
    World,
    PropertiesConfig,
    JsonConfig,
}

impl BackupKind {
    pub const ALL: [BackupKind; 3] = [
        BackupKind::World,
        BackupKind::PropertiesConfig,
        BackupKind::JsonConfig,
    ];

    /// Which pool a file in the backup directory belongs to, if any.
    pub fn classify(file_name: &str) -> Option<Self> {
        if Path::new(file_name).extension().and_then(|e| e.to_str()) == Some(WORLD_EXTENSION) {
            return Some(BackupKind::World);
        }
        match BackupName::parse(file_name)?.extension.as_str() {
            "properties" => Some(BackupKind::PropertiesConfig),
            "json" => Some(BackupKind::JsonConfig),
            _ => None,
        }
    }
}

impl Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupKind::World => write!(f, "world"),
            BackupKind::PropertiesConfig => write!(f, "properties"),
            BackupKind::JsonConfig => write!(f, "json"),
        }
    }
}

impl FromStr for BackupKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "world" => Ok(BackupKind::World),
            "properties" | "properties_config" => Ok(BackupKind::PropertiesConfig),
            "json" | "json_config" | "config" => Ok(BackupKind::JsonConfig),
            other => Err(format!("unknown backup kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupRecord {
    pub kind: BackupKind,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

pub struct BackupEngine {
    servers_dir: PathBuf,
    backup_root: PathBuf,
    properties: Arc<dyn PropertiesReader>,
}

impl BackupEngine {
    pub fn new(
        servers_dir: impl Into<PathBuf>,
        backup_root: impl Into<PathBuf>,
        properties: Arc<dyn PropertiesReader>,
    ) -> Self {
        Self {
            servers_dir: servers_dir.into(),
            backup_root: backup_root.into(),
            properties,
        }
    }

    pub fn backup_dir(&self, name: &ServerName) -> PathBuf {
        self.backup_root.join(name.as_str())
    }

    fn install_dir(&self, name: &ServerName) -> PathBuf {
        self.servers_dir.join(name.as_str())
    }

    async fn world_dir(&self, name: &ServerName) -> Result<(String, PathBuf), String> {
        let world = self.properties.world_name(name).await?;
        if !is_plain_name(&world) {
            return Err(format!("level-name {world:?} is not a plain directory name"));
        }
        let dir = self.install_dir(name).join("worlds").join(&world);
        Ok((world, dir))
    }

    /// Takes one backup. `file` names the config file for config kinds and
    /// defaults to `server.properties` for [`BackupKind::PropertiesConfig`].
    pub async fn backup(
        &self,
        name: &ServerName,
        kind: BackupKind,
        file: Option<&str>,
    ) -> Result<BackupRecord, BackupError> {
        let dest_dir = self.backup_dir(name);
        create_dir_all(&dest_dir).await.map_err(|e| io_err(&dest_dir, e))?;

        let record = match kind {
            BackupKind::World => self.backup_world(name, &dest_dir).await?,
            BackupKind::PropertiesConfig => {
                let file = file.unwrap_or(PROPERTIES_FILE);
                self.backup_config(name, kind, file, &dest_dir).await?
            }
            BackupKind::JsonConfig => {
                let file = file.ok_or_else(|| {
                    BackupError::InvalidSource("a JSON config backup needs a file name".to_string())
                })?;
                self.backup_config(name, kind, file, &dest_dir).await?
            }
        };

        info!(server = %name, kind = %kind, path = %record.path.display(), "Backup created");
        Ok(record)
    }

    /// World plus the standard config files. Files that do not exist yet are skipped.
    pub async fn backup_all(&self, name: &ServerName) -> Result<Vec<BackupRecord>, BackupError> {
        let mut records = Vec::new();

        match self.backup(name, BackupKind::World, None).await {
            Ok(record) => records.push(record),
            Err(BackupError::WorldNotFound(dir)) => {
                warn!(server = %name, world = %dir.display(), "World not generated yet, skipping world backup");
            }
            Err(e) => return Err(e),
        }

        for file in STANDARD_CONFIG_FILES {
            let kind = if file.ends_with(".properties") {
                BackupKind::PropertiesConfig
            } else {
                BackupKind::JsonConfig
            };

            match self.backup(name, kind, Some(file)).await {
                Ok(record) => records.push(record),
                Err(BackupError::SourceNotFound(path)) => {
                    debug!(server = %name, file = %path.display(), "Config file absent, skipping");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(records)
    }

    async fn backup_world(&self, name: &ServerName, dest_dir: &Path) -> Result<BackupRecord, BackupError> {
        let (world, world_dir) = self.world_dir(name).await.map_err(BackupError::Properties)?;

        if !metadata(&world_dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(BackupError::WorldNotFound(world_dir));
        }

        let base = BackupName {
            stem: world,
            timestamp: backup_timestamp(Local::now()),
            extension: WORLD_EXTENSION.to_string(),
        };
        let dest = unused_path(dest_dir, &base).await;

        let src = world_dir.clone();
        let out = dest.clone();
        tokio::task::spawn_blocking(move || archive::zip_dir(&src, &out))
            .await
            .map_err(|e| archive_err(&dest, e))?
            .map_err(|e| archive_err(&dest, e))?;

        record_for(BackupKind::World, dest).await
    }

    async fn backup_config(
        &self,
        name: &ServerName,
        kind: BackupKind,
        file: &str,
        dest_dir: &Path,
    ) -> Result<BackupRecord, BackupError> {
        if !is_plain_name(file) {
            return Err(BackupError::InvalidSource(file.to_string()));
        }
        let source_name = Path::new(file);

        let (stem, extension) = match (
            source_name.file_stem().and_then(|s| s.to_str()),
            source_name.extension().and_then(|s| s.to_str()),
        ) {
            (Some(stem), Some(ext)) => (stem, ext),
            _ => return Err(BackupError::InvalidSource(file.to_string())),
        };

        let expected = match kind {
            BackupKind::PropertiesConfig => "properties",
            _ => "json",
        };
        if extension != expected {
            return Err(BackupError::InvalidSource(format!(
                "{file} is not a .{expected} file"
            )));
        }

        let source = self.install_dir(name).join(file);
        if !metadata(&source).await.map(|m| m.is_file()).unwrap_or(false) {
            return Err(BackupError::SourceNotFound(source));
        }

        let base = BackupName {
            stem: stem.to_string(),
            timestamp: backup_timestamp(Local::now()),
            extension: extension.to_string(),
        };
        let dest = unused_path(dest_dir, &base).await;

        copy(&source, &dest).await.map_err(|e| io_err(&dest, e))?;

        record_for(kind, dest).await
    }

    /// Backups in one pool, newest first. A missing backup directory is an empty pool.
    pub async fn list_backups(
        &self,
        name: &ServerName,
        kind: BackupKind,
    ) -> Result<Vec<BackupRecord>, BackupError> {
        let dir = self.backup_dir(name);

        let mut entries = match read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&dir, e)),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_err(&dir, e))? {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if BackupKind::classify(file_name) != Some(kind) {
                continue;
            }

            let meta = entry.metadata().await.map_err(|e| io_err(&entry.path(), e))?;
            if !meta.is_file() {
                continue;
            }

            records.push(BackupRecord {
                kind,
                path: entry.path(),
                created_at: modified_at(&meta),
            });
        }

        records.sort_by_key(|r| Reverse((r.created_at, r.path.clone())));
        Ok(records)
    }

    /// Keeps the newest `keep` backups in each pool and deletes the rest.
    /// Returns the number of files deleted.
    pub async fn prune(&self, name: &ServerName, keep: i64) -> Result<usize, BackupError> {
        self.prune_retaining(name, keep, &[]).await
    }

    /// Like [`prune`](Self::prune), but never deletes `retain`. Retained files
    /// count toward `keep` in their pool.
    pub async fn prune_retaining(
        &self,
        name: &ServerName,
        keep: i64,
        retain: &[BackupRecord],
    ) -> Result<usize, BackupError> {
        if keep < 0 {
            return Err(BackupError::InvalidKeepCount(keep));
        }
        let keep = keep as usize;
        let mut deleted = 0;

        for kind in BackupKind::ALL {
            let (kept, pool): (Vec<_>, Vec<_>) = self
                .list_backups(name, kind)
                .await?
                .into_iter()
                .partition(|r| retain.iter().any(|k| k.path == r.path));
            for stale in pool.into_iter().skip(keep.saturating_sub(kept.len())) {
                remove_file(&stale.path)
                    .await
                    .map_err(|e| io_err(&stale.path, e))?;
                debug!(server = %name, kind = %kind, path = %stale.path.display(), "Pruned backup");
                deleted += 1;
            }
        }

        if deleted > 0 {
            info!(server = %name, deleted, keep, "Pruned old backups");
        }
        Ok(deleted)
    }

    /// Puts a backup back in place. Does not stop the server; callers do that first.
    ///
    /// `backup_path` is absolute or relative to the server's backup directory,
    /// and must resolve inside it.
    ///
    /// Returns the path that was replaced.
    pub async fn restore(
        &self,
        name: &ServerName,
        backup_path: &Path,
        kind: BackupKind,
    ) -> Result<PathBuf, RestoreError> {
        let backup = resolve_inside(&self.backup_dir(name), backup_path)?;

        let file_name = backup
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| RestoreError::UnrecognizedName(backup.display().to_string()))?;

        if BackupKind::classify(&file_name) != Some(kind) {
            return Err(RestoreError::UnrecognizedName(format!(
                "{file_name} is not a {kind} backup"
            )));
        }

        let target = match kind {
            BackupKind::World => self.restore_world(name, &backup).await?,
            BackupKind::PropertiesConfig | BackupKind::JsonConfig => {
                let original = BackupName::parse(&file_name)
                    .ok_or_else(|| RestoreError::UnrecognizedName(file_name.clone()))?
                    .original_file_name();
                let target = self.install_dir(name).join(original);
                copy(&backup, &target)
                    .await
                    .map_err(|e| restore_io_err(&target, e))?;
                target
            }
        };

        info!(server = %name, kind = %kind, from = %backup.display(), to = %target.display(), "Backup restored");
        Ok(target)
    }

    async fn restore_world(&self, name: &ServerName, backup: &Path) -> Result<PathBuf, RestoreError> {
        let (world, world_dir) = self.world_dir(name).await.map_err(RestoreError::Properties)?;
        let worlds = self.install_dir(name).join("worlds");
        let staging = worlds.join(format!(".{world}.restoring"));

        if metadata(&staging).await.is_ok() {
            remove_dir_all(&staging)
                .await
                .map_err(|e| restore_io_err(&staging, e))?;
        }

        // Unpack beside the live world first so a corrupt archive leaves it untouched.
        let src = backup.to_path_buf();
        let out = staging.clone();
        tokio::task::spawn_blocking(move || archive::unzip(&src, &out, &|_: &Path| false))
            .await
            .map_err(|e| RestoreError::Archive {
                path: backup.to_path_buf(),
                reason: e.to_string(),
            })?
            .map_err(|reason| RestoreError::Archive {
                path: backup.to_path_buf(),
                reason,
            })?;

        if metadata(&world_dir).await.is_ok() {
            remove_dir_all(&world_dir)
                .await
                .map_err(|e| restore_io_err(&world_dir, e))?;
        }
        rename(&staging, &world_dir)
            .await
            .map_err(|e| restore_io_err(&world_dir, e))?;

        Ok(world_dir)
    }
}

/// Exactly one normal path component. Both separators are refused on every host.
fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    !name.contains(['/', '\\'])
        && matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none()
}

/// Picks `<name>` or, if that exists, the first free `<name>_<n>` variant.
async fn unused_path(dir: &Path, base: &BackupName) -> PathBuf {
    let mut seq = 0;
    loop {
        let candidate = dir.join(base.file_name(seq));
        if metadata(&candidate).await.is_err() {
            return candidate;
        }
        seq += 1;
    }
}

async fn record_for(kind: BackupKind, path: PathBuf) -> Result<BackupRecord, BackupError> {
    let meta = metadata(&path).await.map_err(|e| io_err(&path, e))?;
    Ok(BackupRecord {
        kind,
        created_at: modified_at(&meta),
        path,
    })
}

/// Resolves `candidate` (absolute, or relative to `root`) and requires it to
/// be an existing file inside `root`. Symlinks are followed before the check.
fn resolve_inside(root: &Path, candidate: &Path) -> Result<PathBuf, RestoreError> {
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    let absolute = |p: &Path| std::path::absolute(p).map(|p| lexically_normal(&p));

    let (Ok(joined_abs), Ok(root_abs)) = (absolute(&joined), absolute(root)) else {
        return Err(RestoreError::NotFound(candidate.to_path_buf()));
    };
    if !joined_abs.starts_with(&root_abs) {
        return Err(RestoreError::OutsideBackupRoot(candidate.to_path_buf()));
    }

    let resolved = joined
        .canonicalize()
        .map_err(|_| RestoreError::NotFound(candidate.to_path_buf()))?;
    let root = root
        .canonicalize()
        .map_err(|_| RestoreError::NotFound(root.to_path_buf()))?;

    if !resolved.starts_with(&root) {
        return Err(RestoreError::OutsideBackupRoot(candidate.to_path_buf()));
    }
    if !resolved.is_file() {
        return Err(RestoreError::NotFound(candidate.to_path_buf()));
    }

    Ok(resolved)
}

fn lexically_normal(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn io_err(path: &Path, e: io::Error) -> BackupError {
    BackupError::Io {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

fn archive_err(path: &Path, e: impl Display) -> BackupError {
    BackupError::Archive {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

fn restore_io_err(path: &Path, e: io::Error) -> RestoreError {
    RestoreError::Io {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}
