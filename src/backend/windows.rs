//! Windows backend: direct process creation, console input through a named pipe.
//!
//! The manager owns the pipe server and bridges whatever arrives on it into the
//! child's stdin. A server that outlives the manager that spawned it is still
//! visible to [`PipeBackend::is_alive`], but its pipe is gone and sends fail.

use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::windows::named_pipe::{ClientOptions, NamedPipeServer, ServerOptions},
    process::{Child, ChildStdin, Command},
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, warn};

use crate::{
    error::BackendError,
    instance::{BackendToken, ProcessHandle, ServerName},
};

use super::{ProcessBackend, StopStrategy, process_started_at};

const CREATE_NO_WINDOW: u32 = 0x0800_0000;
const ERROR_PIPE_BUSY: i32 = 231;
const PIPE_BUSY_RETRIES: usize = 20;

struct Managed {
    child: Child,
    handle: ProcessHandle,
    bridge: JoinHandle<()>,
}

pub struct PipeBackend {
    servers_dir: PathBuf,
    prefix: String,
    children: Mutex<HashMap<String, Managed>>,
}

impl PipeBackend {
    pub fn new(servers_dir: PathBuf, prefix: String) -> Self {
        Self {
            servers_dir,
            prefix,
            children: Mutex::new(HashMap::new()),
        }
    }

    pub fn pipe_name(&self, name: &ServerName) -> String {
        format!(r"\\.\pipe\{}{}", self.prefix, name)
    }

    fn children(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Managed>>, BackendError> {
        self.children
            .lock()
            .map_err(|_| BackendError::Probe("process table lock poisoned".to_string()))
    }

    /// Looks for a server started by an earlier manager process.
    fn find_orphan(&self, name: &ServerName) -> Option<u32> {
        let executable = self
            .servers_dir
            .join(name.as_str())
            .join(self.executable_name());
        let executable = executable.canonicalize().unwrap_or(executable);

        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);

        system
            .processes()
            .iter()
            .find(|(_, p)| {
                p.exe()
                    .map(|exe| exe.canonicalize().unwrap_or_else(|_| exe.to_path_buf()) == executable)
                    .unwrap_or(false)
            })
            .map(|(pid, _)| pid.as_u32())
    }
}

#[async_trait]
impl ProcessBackend for PipeBackend {
    fn executable_name(&self) -> &'static str {
        "bedrock_server.exe"
    }

    fn stop_strategy(&self, _name: &ServerName) -> StopStrategy {
        StopStrategy::Terminate
    }

    async fn spawn(
        &self,
        name: &ServerName,
        executable: &Path,
        working_dir: &Path,
    ) -> Result<ProcessHandle, BackendError> {
        if !executable.is_file() {
            return Err(BackendError::ExecutableNotFound(executable.to_path_buf()));
        }

        let executable = std::path::absolute(executable)
            .map_err(|e| BackendError::Spawn(format!("{}: {e}", executable.display())))?;

        let pipe = self.pipe_name(name);
        let server = ServerOptions::new()
            .first_pipe_instance(true)
            .create(&pipe)
            .map_err(|e| map_io(e, BackendError::Spawn))?;

        let mut child = Command::new(&executable)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .creation_flags(CREATE_NO_WINDOW)
            .spawn()
            .map_err(|e| map_io(e, BackendError::Spawn))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BackendError::Spawn("child stdin unavailable".to_string()))?;
        let pid = child
            .id()
            .ok_or_else(|| BackendError::Spawn("child exited immediately".to_string()))?;

        let handle = ProcessHandle {
            pid,
            started_at: Utc::now(),
            token: BackendToken::Pipe { pipe: pipe.clone() },
        };

        let bridge = tokio::spawn(bridge_pipe(server, pipe, stdin));
        debug!(server = %name, pid, "Spawned server process");

        let mut children = self.children()?;
        if let Some(mut old) = children.insert(
            name.to_string(),
            Managed {
                child,
                handle: handle.clone(),
                bridge,
            },
        ) {
            old.bridge.abort();
            _ = old.child.start_kill();
        }

        Ok(handle)
    }

    async fn terminate(&self, handle: &ProcessHandle, _graceful: bool) -> Result<(), BackendError> {
        // No console stop is guaranteed on Windows; graceful and forced are the same kill.
        {
            let mut children = self.children()?;
            if let Some(managed) = children.values_mut().find(|m| m.handle.pid == handle.pid) {
                return managed
                    .child
                    .start_kill()
                    .map_err(|e| map_io(e, BackendError::Terminate));
            }
        }

        let mut system = System::new();
        let pid = Pid::from_u32(handle.pid);
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        match system.process(pid) {
            Some(process) if process.kill() => Ok(()),
            Some(_) => Err(BackendError::Terminate(format!(
                "process {} refused to terminate",
                handle.pid
            ))),
            None => Ok(()),
        }
    }

    async fn is_alive(&self, name: &ServerName) -> Result<Option<ProcessHandle>, BackendError> {
        {
            let mut children = self.children()?;
            if let Some(managed) = children.get_mut(name.as_str()) {
                match managed.child.try_wait() {
                    Ok(None) => return Ok(Some(managed.handle.clone())),
                    Ok(Some(_)) => {
                        if let Some(done) = children.remove(name.as_str()) {
                            done.bridge.abort();
                        }
                        return Ok(None);
                    }
                    Err(e) => return Err(BackendError::Probe(e.to_string())),
                }
            }
        }

        Ok(self.find_orphan(name).map(|pid| ProcessHandle {
            pid,
            started_at: process_started_at(pid),
            token: BackendToken::Pipe {
                pipe: self.pipe_name(name),
            },
        }))
    }

    async fn send_line(&self, handle: &ProcessHandle, text: &str) -> Result<(), BackendError> {
        let BackendToken::Pipe { pipe } = &handle.token else {
            return Err(BackendError::BackendUnsupportedOnHostOS(
                "screen sessions on Windows",
            ));
        };

        let mut attempts = 0;
        let mut client = loop {
            match ClientOptions::new().open(pipe) {
                Ok(client) => break client,
                Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) && attempts < PIPE_BUSY_RETRIES => {
                    attempts += 1;
                    sleep(Duration::from_millis(50)).await;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(BackendError::Send(format!(
                        "pipe {pipe} does not exist; the server is not accepting commands"
                    )));
                }
                Err(e) => return Err(map_io(e, BackendError::Send)),
            }
        };

        client
            .write_all(format!("{text}\n").as_bytes())
            .await
            .map_err(|e| map_io(e, BackendError::Send))?;
        client
            .flush()
            .await
            .map_err(|e| map_io(e, BackendError::Send))
    }
}

/// Accepts one client at a time and forwards its lines to the server's stdin.
async fn bridge_pipe(mut server: NamedPipeServer, pipe: String, mut stdin: ChildStdin) {
    loop {
        if let Err(e) = server.connect().await {
            warn!(pipe, error = %e, "Named pipe accept failed");
            return;
        }

        let connected = server;
        server = match ServerOptions::new().create(&pipe) {
            Ok(next) => next,
            Err(e) => {
                warn!(pipe, error = %e, "Failed to re-create named pipe");
                return;
            }
        };

        let mut lines = BufReader::new(connected).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = format!("{line}\n");
            if stdin.write_all(line.as_bytes()).await.is_err() || stdin.flush().await.is_err() {
                debug!(pipe, "Server stdin closed, shutting down pipe bridge");
                return;
            }
        }
    }
}

fn map_io(e: io::Error, err: fn(String) -> BackendError) -> BackendError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => BackendError::PermissionDenied(e.to_string()),
        _ => err(e.to_string()),
    }
}
