//! OS-specific process adapters.
//!
//! The rest of the crate only sees [`ProcessBackend`]. The concrete
//! implementation is picked once, by [`host_backend`]:
//! - Linux: detached `screen` sessions, or a systemd unit when one is configured
//! - Windows: direct process creation with a named pipe feeding stdin
//! - anything else: every mutating call reports `BackendUnsupportedOnHostOS`

use std::{
    path::Path,
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::{
    config::ManagerSettings,
    error::BackendError,
    instance::{ProcessHandle, ServerName},
};

mod unsupported;

pub use unsupported::UnsupportedBackend;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod linux;
        pub use linux::ScreenBackend;
    } else if #[cfg(target_os = "windows")] {
        mod windows;
        pub use windows::PipeBackend;
    }
}

/// How a backend wants a running server to be brought down gracefully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStrategy {
    /// Write `stop` to the console and wait for the process to exit.
    ConsoleCommand,
    /// Call [`ProcessBackend::terminate`] with `graceful = true`.
    Terminate,
}

#[async_trait]
pub trait ProcessBackend: Send + Sync {
    /// File name of the server binary inside an install directory.
    fn executable_name(&self) -> &'static str;

    fn stop_strategy(&self, name: &ServerName) -> StopStrategy;

    async fn spawn(
        &self,
        name: &ServerName,
        executable: &Path,
        working_dir: &Path,
    ) -> Result<ProcessHandle, BackendError>;

    async fn terminate(&self, handle: &ProcessHandle, graceful: bool) -> Result<(), BackendError>;

    /// Re-attaches to the server's process by name. `None` when nothing is running.
    async fn is_alive(&self, name: &ServerName) -> Result<Option<ProcessHandle>, BackendError>;

    /// Fire-and-forget write of one console line. Success means the transport took it.
    async fn send_line(&self, handle: &ProcessHandle, text: &str) -> Result<(), BackendError>;
}

/// Builds the backend for the host OS. This is the only place that branches on the OS.
pub fn host_backend(settings: &ManagerSettings) -> Arc<dyn ProcessBackend> {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "linux")] {
            Arc::new(ScreenBackend::new(
                settings.screen_prefix.clone(),
                settings.systemd_units.clone(),
            ))
        } else if #[cfg(target_os = "windows")] {
            Arc::new(PipeBackend::new(
                settings.servers_dir.clone(),
                settings.screen_prefix.clone(),
            ))
        } else {
            let _ = settings;
            Arc::new(UnsupportedBackend)
        }
    }
}

/// Wall-clock start of `pid`, falling back to now when the OS does not know it.
pub(crate) fn process_started_at(pid: u32) -> DateTime<Utc> {
    let mut system = System::new();
    let sys_pid = Pid::from_u32(pid);
    system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);

    system
        .process(sys_pid)
        .and_then(|p| DateTime::from_timestamp(p.start_time() as i64, 0))
        .unwrap_or_else(Utc::now)
}

/// Fails with `CommandToolMissing` when `tool` cannot be found on PATH.
#[allow(dead_code)]
pub(crate) fn require_tool(tool: &str) -> Result<(), BackendError> {
    which::which(tool)
        .map(|_| ())
        .map_err(|_| BackendError::CommandToolMissing(tool.to_string()))
}
