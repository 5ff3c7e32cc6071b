use std::sync::Arc;

use tracing::debug;

use crate::{
    backend::ProcessBackend,
    error::ServerError,
    instance::{ProcessHandle, ServerName},
};

/// Send-only console transport into a running server.
///
/// Delivery means the backend transport accepted the write. The game gives no
/// acknowledgement, so whether the command actually ran is unknown here.
#[derive(Clone)]
pub struct CommandChannel {
    backend: Arc<dyn ProcessBackend>,
}

impl CommandChannel {
    pub fn new(backend: Arc<dyn ProcessBackend>) -> Self {
        Self { backend }
    }

    pub async fn send(&self, name: &ServerName, command: &str) -> Result<(), ServerError> {
        let command = validate(name, command)?;

        let handle = self
            .backend
            .is_alive(name)
            .await
            .map_err(|e| ServerError::from_send(name.as_str(), e))?
            .ok_or_else(|| ServerError::NotRunning(name.to_string()))?;

        self.send_to(name, &handle, command).await
    }

    /// Writes to an already resolved handle. Callers hold the server's lock.
    pub(crate) async fn send_to(
        &self,
        name: &ServerName,
        handle: &ProcessHandle,
        command: &str,
    ) -> Result<(), ServerError> {
        let command = validate(name, command)?;

        self.backend
            .send_line(handle, command)
            .await
            .map_err(|e| ServerError::from_send(name.as_str(), e))?;

        debug!(server = %name, command, "Console command delivered");
        Ok(())
    }
}

fn validate<'a>(name: &ServerName, command: &'a str) -> Result<&'a str, ServerError> {
    let command = command.trim();
    if command.is_empty() {
        return Err(ServerError::EmptyCommand);
    }
    // A line break would smuggle a second command into the console.
    if command.contains(['\n', '\r']) {
        return Err(ServerError::SendCommand {
            server: name.to_string(),
            reason: "command must be a single line".to_string(),
        });
    }
    Ok(command)
}
