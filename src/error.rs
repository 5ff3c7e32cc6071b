use std::{fmt, path::PathBuf};

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum VersionError {
    #[error("Incorrect major version: {0}")]
    IncorrectMajor(String),

    #[error("Incorrect minor version: {0}")]
    IncorrectMinor(String),

    #[error("Incorrect patch version: {0}")]
    IncorrectPatch(String),

    #[error("Incorrect build number: {0}")]
    IncorrectBuild(String),

    #[error("Missing major version")]
    MissingMajor,

    #[error("Missing minor version")]
    MissingMinor,

    #[error("Missing patch version")]
    MissingPatch,

    #[error("Too many components")]
    ExtraComponents,

    #[error("Unrecognized version format: {0}")]
    UnknownVersionFormat(String),
}

#[derive(Debug, Clone, Error)]
pub enum NameError {
    #[error("Server name is empty")]
    Empty,

    #[error("Server name contains forbidden character {1:?}: {0}")]
    ForbiddenCharacter(String, char),

    #[error("Server name is reserved: {0}")]
    Reserved(String),
}

#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Failed to write {path}: {reason}")]
    Write { path: PathBuf, reason: String },

    #[error("Malformed config {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

/// Failures reported by a process backend. Payloads carry the raw OS text.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("Executable not found: {0}")]
    ExecutableNotFound(PathBuf),

    #[error("Required tool '{0}' is not available on PATH")]
    CommandToolMissing(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not implemented for this platform: {0}")]
    BackendUnsupportedOnHostOS(&'static str),

    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    #[error("Failed to terminate process: {0}")]
    Terminate(String),

    #[error("Failed to write to console: {0}")]
    Send(String),

    #[error("Failed to query process state: {0}")]
    Probe(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPhase {
    Stop,
    Start,
}

impl fmt::Display for RestartPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartPhase::Stop => write!(f, "stop"),
            RestartPhase::Start => write!(f, "start"),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ServerError {
    #[error("Invalid server name: {0}")]
    InvalidName(#[from] NameError),

    #[error("Server '{server}' executable not found at {path}")]
    ServerNotFound { server: String, path: PathBuf },

    #[error("Server '{server}' failed to start: {reason}")]
    StartFailed { server: String, reason: String },

    #[error("Server '{server}' failed to stop: {reason}")]
    StopFailed { server: String, reason: String },

    #[error("Server '{0}' is not running")]
    NotRunning(String),

    #[error("Command is empty")]
    EmptyCommand,

    #[error("Failed to send command to '{server}': {reason}")]
    SendCommand { server: String, reason: String },

    #[error("Failed to read status of '{server}': {reason}")]
    ProbeFailed { server: String, reason: String },

    #[error("Required tool '{0}' is not available on PATH")]
    CommandToolMissing(String),

    #[error("Not implemented for this platform: {0}")]
    BackendUnsupported(&'static str),

    #[error("Restart of '{server}' failed during {phase} phase: {source}")]
    RestartFailed {
        server: String,
        phase: RestartPhase,
        source: Box<ServerError>,
    },
}

#[derive(Debug, Clone, Error)]
pub enum BackupError {
    #[error("Invalid server name: {0}")]
    InvalidName(#[from] NameError),

    #[error("World directory not found: {0}")]
    WorldNotFound(PathBuf),

    #[error("Source file not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("Invalid source file name: {0}")]
    InvalidSource(String),

    #[error("Backup count must be non-negative, got {0}")]
    InvalidKeepCount(i64),

    #[error("Failed to read server properties: {0}")]
    Properties(String),

    #[error("Backup I/O failure on {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("Failed to write archive {path}: {reason}")]
    Archive { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Error)]
pub enum RestoreError {
    #[error("Invalid server name: {0}")]
    InvalidName(#[from] NameError),

    #[error("Backup path is outside the backup directory: {0}")]
    OutsideBackupRoot(PathBuf),

    #[error("Backup file not found: {0}")]
    NotFound(PathBuf),

    #[error("Cannot derive original file name from backup: {0}")]
    UnrecognizedName(String),

    #[error("Failed to read server properties: {0}")]
    Properties(String),

    #[error("Restore I/O failure on {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("Failed to extract archive {path}: {reason}")]
    Archive { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Download manifest error: {0}")]
    Manifest(String),

    #[error("No download available for version {0}")]
    Version(String),

    #[error("I/O error on {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("Archive error on {path}: {reason}")]
    Archive { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStep {
    Resolve,
    Stop,
    Backup,
    Download,
    Extract,
    Reconfigure,
    Restart,
}

impl fmt::Display for UpdateStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpdateStep::Resolve => "resolve",
            UpdateStep::Stop => "stop",
            UpdateStep::Backup => "backup",
            UpdateStep::Download => "download",
            UpdateStep::Extract => "extract",
            UpdateStep::Reconfigure => "reconfigure",
            UpdateStep::Restart => "restart",
        };
        write!(f, "{s}")
    }
}

/// One variant per update step; the failing step is recoverable with [`UpdateError::step`].
#[derive(Debug, Clone, Error)]
pub enum UpdateError {
    #[error("Invalid server name: {0}")]
    InvalidName(#[from] NameError),

    #[error("Update failed during resolve step: {0}")]
    Resolve(String),

    #[error("Update failed during stop step: {0}")]
    Stop(ServerError),

    #[error("Update failed during backup step: {0}")]
    Backup(BackupError),

    #[error("Update failed during download step: {0}")]
    Download(DownloadError),

    #[error("Update failed during extract step: {0}")]
    Extract(DownloadError),

    #[error("Update failed during reconfigure step: {0}")]
    Reconfigure(ConfigError),

    #[error("Update succeeded but restart failed: {0}")]
    Restart(ServerError),
}

impl UpdateError {
    pub fn step(&self) -> Option<UpdateStep> {
        match self {
            UpdateError::InvalidName(_) => None,
            UpdateError::Resolve(_) => Some(UpdateStep::Resolve),
            UpdateError::Stop(_) => Some(UpdateStep::Stop),
            UpdateError::Backup(_) => Some(UpdateStep::Backup),
            UpdateError::Download(_) => Some(UpdateStep::Download),
            UpdateError::Extract(_) => Some(UpdateStep::Extract),
            UpdateError::Reconfigure(_) => Some(UpdateStep::Reconfigure),
            UpdateError::Restart(_) => Some(UpdateStep::Restart),
        }
    }
}

/// Flat classification of every failure the public surface can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    InvalidName,
    ServerNotFound,
    ServerStart,
    ServerStop,
    ServerNotRunning,
    SendCommand,
    Probe,
    CommandToolMissing,
    BackendUnsupportedOnHostOS,
    Backup,
    Restore,
    Update,
    Config,
}

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Restore(#[from] RestoreError),

    #[error(transparent)]
    Update(#[from] UpdateError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Server(e) => e.kind(),
            Error::Backup(BackupError::InvalidName(_)) => ErrorKind::InvalidName,
            Error::Backup(_) => ErrorKind::Backup,
            Error::Restore(RestoreError::InvalidName(_)) => ErrorKind::InvalidName,
            Error::Restore(_) => ErrorKind::Restore,
            Error::Update(UpdateError::InvalidName(_)) => ErrorKind::InvalidName,
            Error::Update(_) => ErrorKind::Update,
            Error::Config(_) => ErrorKind::Config,
        }
    }
}

impl ServerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServerError::InvalidName(_) => ErrorKind::InvalidName,
            ServerError::ServerNotFound { .. } => ErrorKind::ServerNotFound,
            ServerError::StartFailed { .. } => ErrorKind::ServerStart,
            ServerError::StopFailed { .. } => ErrorKind::ServerStop,
            ServerError::NotRunning(_) => ErrorKind::ServerNotRunning,
            ServerError::EmptyCommand | ServerError::SendCommand { .. } => ErrorKind::SendCommand,
            ServerError::ProbeFailed { .. } => ErrorKind::Probe,
            ServerError::CommandToolMissing(_) => ErrorKind::CommandToolMissing,
            ServerError::BackendUnsupported(_) => ErrorKind::BackendUnsupportedOnHostOS,
            ServerError::RestartFailed { phase, .. } => match phase {
                RestartPhase::Stop => ErrorKind::ServerStop,
                RestartPhase::Start => ErrorKind::ServerStart,
            },
        }
    }

    /// Maps a backend failure raised while starting `server`.
    pub(crate) fn from_start(server: &str, err: BackendError) -> Self {
        match err {
            BackendError::ExecutableNotFound(path) => ServerError::ServerNotFound {
                server: server.to_string(),
                path,
            },
            BackendError::CommandToolMissing(tool) => ServerError::CommandToolMissing(tool),
            BackendError::BackendUnsupportedOnHostOS(what) => ServerError::BackendUnsupported(what),
            other => ServerError::StartFailed {
                server: server.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// Maps a backend failure raised while stopping `server`.
    pub(crate) fn from_stop(server: &str, err: BackendError) -> Self {
        match err {
            BackendError::CommandToolMissing(tool) => ServerError::CommandToolMissing(tool),
            BackendError::BackendUnsupportedOnHostOS(what) => ServerError::BackendUnsupported(what),
            other => ServerError::StopFailed {
                server: server.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// Maps a backend failure raised while reading the status of `server`.
    pub(crate) fn from_probe(server: &str, err: BackendError) -> Self {
        match err {
            BackendError::CommandToolMissing(tool) => ServerError::CommandToolMissing(tool),
            BackendError::BackendUnsupportedOnHostOS(what) => ServerError::BackendUnsupported(what),
            other => ServerError::ProbeFailed {
                server: server.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// Maps a backend failure raised while writing a console line to `server`.
    pub(crate) fn from_send(server: &str, err: BackendError) -> Self {
        match err {
            BackendError::CommandToolMissing(tool) => ServerError::CommandToolMissing(tool),
            BackendError::BackendUnsupportedOnHostOS(what) => ServerError::BackendUnsupported(what),
            other => ServerError::SendCommand {
                server: server.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
