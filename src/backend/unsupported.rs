use std::path::Path;

use async_trait::async_trait;

use crate::{
    error::BackendError,
    instance::{ProcessHandle, ServerName},
};

use super::{ProcessBackend, StopStrategy};

/// Backend for hosts that are neither Linux nor Windows.
///
/// Nothing can be running, so probes report "not running" and every
/// mutating call fails with `BackendUnsupportedOnHostOS`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedBackend;

#[async_trait]
impl ProcessBackend for UnsupportedBackend {
    fn executable_name(&self) -> &'static str {
        "bedrock_server"
    }

    fn stop_strategy(&self, _name: &ServerName) -> StopStrategy {
        StopStrategy::Terminate
    }

    async fn spawn(
        &self,
        _name: &ServerName,
        _executable: &Path,
        _working_dir: &Path,
    ) -> Result<ProcessHandle, BackendError> {
        Err(BackendError::BackendUnsupportedOnHostOS("starting servers"))
    }

    async fn terminate(&self, _handle: &ProcessHandle, _graceful: bool) -> Result<(), BackendError> {
        Err(BackendError::BackendUnsupportedOnHostOS("stopping servers"))
    }

    async fn is_alive(&self, _name: &ServerName) -> Result<Option<ProcessHandle>, BackendError> {
        Ok(None)
    }

    async fn send_line(&self, _handle: &ProcessHandle, _text: &str) -> Result<(), BackendError> {
        Err(BackendError::BackendUnsupportedOnHostOS("sending console commands"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_reports_unsupported() {
        let name: ServerName = "Alpha".parse().unwrap();
        let err = UnsupportedBackend
            .spawn(&name, Path::new("bedrock_server"), Path::new("."))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::BackendUnsupportedOnHostOS(_)));
        assert!(UnsupportedBackend.is_alive(&name).await.unwrap().is_none());
    }
}
