use tracing::info;

use super::{LifecycleState, ProcessHandle, ServerName};

/// Per-server lifecycle slot. Lives behind the server's lock, so every
/// transition recorded here is serialized with the operation that made it.
#[derive(Debug)]
pub struct InstanceHandle {
    name: ServerName,
    /// `None` until the first operation has probed the backend.
    status: Option<LifecycleState>,
    /// Set when `status` was assumed rather than observed; the next operation probes.
    stale: bool,
    process: Option<ProcessHandle>,
}

impl InstanceHandle {
    pub fn new(name: ServerName) -> Self {
        Self {
            name,
            status: None,
            stale: false,
            process: None,
        }
    }

    pub fn name(&self) -> &ServerName {
        &self.name
    }

    pub fn status(&self) -> Option<LifecycleState> {
        self.status
    }

    pub fn process(&self) -> Option<&ProcessHandle> {
        self.process.as_ref()
    }

    /// `Stopped` as last observed, not merely assumed after a failed start.
    pub fn is_confirmed_stopped(&self) -> bool {
        self.status == Some(LifecycleState::Stopped) && !self.stale
    }

    /// Records `status` without having seen it, e.g. a start that timed out
    /// after the spawn went through. The process may still come up later.
    pub fn assume_status(&mut self, status: LifecycleState) {
        self.transition_status(status);
        self.stale = true;
    }

    pub fn transition_status(&mut self, status: LifecycleState) {
        let old = self.status;
        self.status = Some(status);

        if old != Some(status) {
            match old {
                Some(old) => info!(server = %self.name, "State changed: {old} -> {status}"),
                None => info!(server = %self.name, "State resolved: {status}"),
            }
        }
    }

    /// Records a live process. Replaces any previous handle; there is never more than one.
    pub fn attach(&mut self, process: ProcessHandle) {
        self.process = Some(process);
        self.stale = false;
        self.transition_status(LifecycleState::Running);
    }

    /// Drops the process handle once the process is confirmed gone.
    pub fn detach(&mut self) {
        self.process = None;
        self.stale = false;
        self.transition_status(LifecycleState::Stopped);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::instance::BackendToken;

    #[test]
    fn attach_and_detach_track_the_single_handle() {
        let mut slot = InstanceHandle::new("Alpha".parse().unwrap());
        assert_eq!(slot.status(), None);

        slot.attach(ProcessHandle {
            pid: 42,
            started_at: Utc::now(),
            token: BackendToken::Screen {
                session: "bedrock-Alpha".to_string(),
            },
        });
        assert_eq!(slot.status(), Some(LifecycleState::Running));
        assert_eq!(slot.process().map(|p| p.pid), Some(42));

        slot.detach();
        assert_eq!(slot.status(), Some(LifecycleState::Stopped));
        assert!(slot.process().is_none());
        assert!(slot.is_confirmed_stopped());
    }

    #[test]
    fn assumed_stop_is_not_confirmed_until_probed() {
        let mut slot = InstanceHandle::new("Alpha".parse().unwrap());
        slot.assume_status(LifecycleState::Stopped);
        assert_eq!(slot.status(), Some(LifecycleState::Stopped));
        assert!(!slot.is_confirmed_stopped());

        slot.detach();
        assert!(slot.is_confirmed_stopped());
    }
}
