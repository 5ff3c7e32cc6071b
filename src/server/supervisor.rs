use std::{
    collections::HashMap,
    fmt::{self, Display},
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{
    sync::{Mutex as AsyncMutex, OwnedMutexGuard},
    time::{Instant, sleep},
};
use tracing::{debug, info, instrument, warn};

use crate::{
    backend::{ProcessBackend, StopStrategy},
    channel::CommandChannel,
    config::{ConfigStore, ManagerSettings},
    error::{BackendError, RestartPhase, ServerError},
    instance::{InstanceHandle, LifecycleState, ServerName},
    probe::StatusProbe,
};

/// Exclusive access to one server's lifecycle slot.
pub type ServerGuard = OwnedMutexGuard<InstanceHandle>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOutcome {
    Started,
    AlreadyRunning,
    Stopped,
    AlreadyStopped,
    Restarted,
}

impl Display for LifecycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleOutcome::Started => write!(f, "started"),
            LifecycleOutcome::AlreadyRunning => write!(f, "already running"),
            LifecycleOutcome::Stopped => write!(f, "stopped"),
            LifecycleOutcome::AlreadyStopped => write!(f, "already stopped"),
            LifecycleOutcome::Restarted => write!(f, "restarted"),
        }
    }
}

/// Start/stop/restart state machine for every server, one lock per server name.
pub struct Supervisor {
    servers_dir: PathBuf,
    start_timeout: Duration,
    stop_timeout: Duration,
    poll_interval: Duration,
    restart_grace: Duration,
    restart_warning: Option<String>,
    backend: Arc<dyn ProcessBackend>,
    probe: Arc<StatusProbe>,
    channel: CommandChannel,
    store: Arc<dyn ConfigStore>,
    slots: Mutex<HashMap<ServerName, Arc<AsyncMutex<InstanceHandle>>>>,
}

impl Supervisor {
    pub fn new(
        settings: &ManagerSettings,
        backend: Arc<dyn ProcessBackend>,
        probe: Arc<StatusProbe>,
        store: Arc<dyn ConfigStore>,
    ) -> Self {
        Self {
            servers_dir: settings.servers_dir.clone(),
            start_timeout: settings.start_timeout(),
            stop_timeout: settings.stop_timeout(),
            poll_interval: settings.poll_interval(),
            restart_grace: settings.restart_grace(),
            restart_warning: settings.restart_warning.clone(),
            channel: CommandChannel::new(backend.clone()),
            backend,
            probe,
            store,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn install_dir(&self, name: &ServerName) -> PathBuf {
        self.servers_dir.join(name.as_str())
    }

    pub fn channel(&self) -> &CommandChannel {
        &self.channel
    }

    /// Waits for and takes the server's lock. Held for a whole operation.
    pub async fn lock(&self, name: &ServerName) -> ServerGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots
                .entry(name.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(InstanceHandle::new(name.clone()))))
                .clone()
        };
        slot.lock_owned().await
    }

    /// Last state recorded for the server, without probing.
    pub async fn state(&self, name: &ServerName) -> Option<LifecycleState> {
        self.lock(name).await.status()
    }

    #[instrument(skip(self), fields(server = %name))]
    pub async fn start(&self, name: &ServerName) -> Result<LifecycleOutcome, ServerError> {
        let mut slot = self.lock(name).await;
        self.start_locked(&mut slot).await
    }

    #[instrument(skip(self), fields(server = %name))]
    pub async fn stop(&self, name: &ServerName) -> Result<LifecycleOutcome, ServerError> {
        let mut slot = self.lock(name).await;
        self.stop_locked(&mut slot).await
    }

    #[instrument(skip(self), fields(server = %name))]
    pub async fn restart(&self, name: &ServerName) -> Result<LifecycleOutcome, ServerError> {
        let mut slot = self.lock(name).await;

        if self.refresh(&mut slot, ServerError::from_stop).await? != LifecycleState::Running {
            info!("Server not running, restart is a plain start");
            return self.start_locked(&mut slot).await;
        }

        if let (Some(message), Some(process)) = (&self.restart_warning, slot.process()) {
            let warning = format!("say {message}");
            if let Err(e) = self.channel.send_to(slot.name(), process, &warning).await {
                warn!(error = %e, "Restart warning not delivered");
            }
        }
        sleep(self.restart_grace).await;

        let restart_err = |phase: RestartPhase| {
            move |e: ServerError| ServerError::RestartFailed {
                server: name.to_string(),
                phase,
                source: Box::new(e),
            }
        };

        self.stop_locked(&mut slot)
            .await
            .map_err(restart_err(RestartPhase::Stop))?;
        self.start_locked(&mut slot)
            .await
            .map_err(restart_err(RestartPhase::Start))?;

        Ok(LifecycleOutcome::Restarted)
    }

    /// Re-reads the real process state into the slot and returns it.
    pub(crate) async fn refresh(
        &self,
        slot: &mut InstanceHandle,
        map_err: fn(&str, BackendError) -> ServerError,
    ) -> Result<LifecycleState, ServerError> {
        let live = self
            .probe
            .resolve(slot.name())
            .await
            .map_err(|e| map_err(slot.name().as_str(), e))?;

        match live {
            Some(handle) => slot.attach(handle),
            None => slot.detach(),
        }
        Ok(if slot.process().is_some() {
            LifecycleState::Running
        } else {
            LifecycleState::Stopped
        })
    }

    pub(crate) async fn start_locked(
        &self,
        slot: &mut InstanceHandle,
    ) -> Result<LifecycleOutcome, ServerError> {
        // Always probe first: a process left by an earlier manager must not get a twin.
        if self.refresh(slot, ServerError::from_start).await? == LifecycleState::Running {
            info!(server = %slot.name(), "Server already running");
            return Ok(LifecycleOutcome::AlreadyRunning);
        }

        let name = slot.name().clone();
        let install_dir = self.install_dir(&name);
        let executable = install_dir.join(self.backend.executable_name());
        if !executable.is_file() {
            return Err(ServerError::ServerNotFound {
                server: name.to_string(),
                path: executable,
            });
        }

        slot.transition_status(LifecycleState::Starting);
        if let Err(e) = self.backend.spawn(&name, &executable, &install_dir).await {
            slot.transition_status(LifecycleState::Stopped);
            return Err(ServerError::from_start(name.as_str(), e));
        }

        let deadline = Instant::now() + self.start_timeout;
        loop {
            match self.probe.resolve(&name).await {
                Ok(Some(handle)) => {
                    info!(server = %name, pid = handle.pid, "Server started");
                    slot.attach(handle);
                    self.persist_status(&name, LifecycleState::Running).await;
                    return Ok(LifecycleOutcome::Started);
                }
                Ok(None) => debug!(server = %name, "Waiting for server to come up"),
                Err(e) => debug!(server = %name, error = %e, "Probe failed while starting"),
            }

            if Instant::now() >= deadline {
                break;
            }
            sleep(self.poll_interval).await;
        }

        // The spawn went through, so a slow process may still appear.
        slot.assume_status(LifecycleState::Stopped);
        Err(ServerError::StartFailed {
            server: name.to_string(),
            reason: "failed to start within timeout".to_string(),
        })
    }

    pub(crate) async fn stop_locked(
        &self,
        slot: &mut InstanceHandle,
    ) -> Result<LifecycleOutcome, ServerError> {
        if slot.is_confirmed_stopped() {
            info!(server = %slot.name(), "Server already stopped");
            return Ok(LifecycleOutcome::AlreadyStopped);
        }

        if self.refresh(slot, ServerError::from_stop).await? == LifecycleState::Stopped {
            info!(server = %slot.name(), "Server already stopped");
            return Ok(LifecycleOutcome::AlreadyStopped);
        }

        let name = slot.name().clone();
        let Some(handle) = slot.process().cloned() else {
            return Ok(LifecycleOutcome::AlreadyStopped);
        };

        slot.transition_status(LifecycleState::Stopping);

        let requested = match self.backend.stop_strategy(&name) {
            StopStrategy::ConsoleCommand => self.channel.send_to(&name, &handle, "stop").await,
            StopStrategy::Terminate => self
                .backend
                .terminate(&handle, true)
                .await
                .map_err(|e| ServerError::from_stop(name.as_str(), e)),
        };

        if let Err(e) = requested {
            slot.transition_status(LifecycleState::Running);
            return Err(match e {
                ServerError::SendCommand { server, reason } => ServerError::StopFailed { server, reason },
                other => other,
            });
        }

        let deadline = Instant::now() + self.stop_timeout;
        loop {
            match self.probe.resolve(&name).await {
                Ok(None) => {
                    info!(server = %name, "Server stopped");
                    slot.detach();
                    self.persist_status(&name, LifecycleState::Stopped).await;
                    return Ok(LifecycleOutcome::Stopped);
                }
                Ok(Some(_)) => debug!(server = %name, "Waiting for server to exit"),
                Err(e) => debug!(server = %name, error = %e, "Probe failed while stopping"),
            }

            if Instant::now() >= deadline {
                break;
            }
            sleep(self.poll_interval).await;
        }

        // No forced kill here: unsaved world data is the operator's call.
        slot.transition_status(LifecycleState::Running);
        Err(ServerError::StopFailed {
            server: name.to_string(),
            reason: "failed to stop within timeout; manual intervention may be required"
                .to_string(),
        })
    }

    pub(crate) async fn persist_status(&self, name: &ServerName, state: LifecycleState) {
        if let Err(e) = self.store.set_status(name, &state.to_string()).await {
            warn!(server = %name, error = %e, "Failed to persist server status");
        }
    }
}
