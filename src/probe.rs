//! Liveness and resource readings for managed servers.
//!
//! CPU usage is the process CPU time consumed since the previous probe of the
//! same server, divided by the wall time between the two probes. The first
//! probe after start-up, a pid change, or a gap longer than the sample TTL
//! reads 0.0%. On the Linux `screen` path the pid is the session's, so the
//! numbers describe the wrapper rather than the Bedrock process itself.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use chrono::Utc;
use serde::Serialize;
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::{
    backend::ProcessBackend,
    error::BackendError,
    instance::{ProcessHandle, ServerName},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessStatus {
    pub pid: u32,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub memory_mb: f64,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Copy)]
struct CpuSample {
    pid: u32,
    cpu_ms: u64,
    taken_at: Instant,
}

pub struct StatusProbe {
    backend: Arc<dyn ProcessBackend>,
    sample_ttl: Duration,
    system: Mutex<System>,
    samples: Mutex<HashMap<ServerName, CpuSample>>,
}

impl StatusProbe {
    pub fn new(backend: Arc<dyn ProcessBackend>, sample_ttl: Duration) -> Self {
        Self {
            backend,
            sample_ttl,
            system: Mutex::new(System::new()),
            samples: Mutex::new(HashMap::new()),
        }
    }

    /// Liveness only: the server's process handle, if it is running.
    pub async fn resolve(&self, name: &ServerName) -> Result<Option<ProcessHandle>, BackendError> {
        self.backend.is_alive(name).await
    }

    /// Full reading. `None` means the server is not running.
    pub async fn probe(&self, name: &ServerName) -> Result<Option<ProcessStatus>, BackendError> {
        let Some(handle) = self.resolve(name).await? else {
            self.samples
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(name);
            return Ok(None);
        };

        let (memory_bytes, cpu_ms, uptime_secs) = self.read_process(&handle);
        let cpu_percent = self.record_sample(name, handle.pid, cpu_ms, Instant::now());

        Ok(Some(ProcessStatus {
            pid: handle.pid,
            cpu_percent,
            memory_bytes,
            memory_mb: memory_bytes as f64 / (1024.0 * 1024.0),
            uptime_secs,
        }))
    }

    fn read_process(&self, handle: &ProcessHandle) -> (u64, u64, u64) {
        let fallback_uptime = (Utc::now() - handle.started_at).num_seconds().max(0) as u64;

        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        let pid = Pid::from_u32(handle.pid);
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

        match system.process(pid) {
            Some(p) => (p.memory(), p.accumulated_cpu_time(), p.run_time()),
            None => (0, 0, fallback_uptime),
        }
    }

    fn record_sample(&self, name: &ServerName, pid: u32, cpu_ms: u64, now: Instant) -> f64 {
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        let current = CpuSample {
            pid,
            cpu_ms,
            taken_at: now,
        };
        let percent = cpu_percent(samples.get(name), &current, self.sample_ttl);
        samples.insert(name.clone(), current);
        percent
    }
}

fn cpu_percent(previous: Option<&CpuSample>, current: &CpuSample, ttl: Duration) -> f64 {
    let Some(previous) = previous else {
        return 0.0;
    };
    if previous.pid != current.pid {
        return 0.0;
    }

    let elapsed = current.taken_at.saturating_duration_since(previous.taken_at);
    if elapsed.is_zero() || elapsed > ttl {
        return 0.0;
    }

    let used_ms = current.cpu_ms.saturating_sub(previous.cpu_ms) as f64;
    used_ms / elapsed.as_millis() as f64 * 100.0
}
