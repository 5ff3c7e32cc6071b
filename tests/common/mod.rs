#![allow(dead_code)]

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bedguard::{
    BedrockManager, ManagerBuilder, ManagerSettings, ProcessBackend, ProcessHandle, ServerName,
    StopStrategy, error::BackendError, instance::BackendToken,
};
use chrono::Utc;
use tempfile::TempDir;

pub const EXECUTABLE: &str = "bedrock_server";

/// In-memory backend. A server is "running" while its name is in `running`.
/// Writing `stop` to a running server makes it exit unless `never_exit` is set.
#[derive(Default)]
pub struct FakeBackend {
    running: Mutex<HashMap<String, u32>>,
    sent: Mutex<Vec<(String, String)>>,
    pub spawns: AtomicUsize,
    pub terminates: AtomicUsize,
    pub sends: AtomicUsize,
    pub probes: AtomicUsize,
    pub never_up: AtomicBool,
    pub never_exit: AtomicBool,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every call, including liveness checks.
    pub fn total_calls(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
            + self.terminates.load(Ordering::SeqCst)
            + self.sends.load(Ordering::SeqCst)
            + self.probes.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        for counter in [&self.spawns, &self.terminates, &self.sends, &self.probes] {
            counter.store(0, Ordering::SeqCst);
        }
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.running.lock().unwrap().contains_key(name)
    }

    /// Pretends a process for `name` was already running before the manager came up.
    pub fn adopt(&self, name: &str) {
        self.running
            .lock()
            .unwrap()
            .insert(name.to_string(), std::process::id());
    }

    /// The process dies without the manager being told.
    pub fn crash(&self, name: &str) {
        self.running.lock().unwrap().remove(name);
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    fn handle(name: &str, pid: u32) -> ProcessHandle {
        ProcessHandle {
            pid,
            started_at: Utc::now(),
            token: BackendToken::Screen {
                session: name.to_string(),
            },
        }
    }

    fn session(handle: &ProcessHandle) -> String {
        match &handle.token {
            BackendToken::Screen { session } => session.clone(),
            other => panic!("unexpected token {other:?}"),
        }
    }
}

#[async_trait]
impl ProcessBackend for FakeBackend {
    fn executable_name(&self) -> &'static str {
        EXECUTABLE
    }

    fn stop_strategy(&self, _name: &ServerName) -> StopStrategy {
        StopStrategy::ConsoleCommand
    }

    async fn spawn(
        &self,
        name: &ServerName,
        _executable: &Path,
        _working_dir: &Path,
    ) -> Result<ProcessHandle, BackendError> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        // The test process itself stands in for the server so sysinfo can read it.
        let pid = std::process::id();
        if !self.never_up.load(Ordering::SeqCst) {
            self.running
                .lock()
                .unwrap()
                .insert(name.to_string(), pid);
        }
        Ok(Self::handle(name.as_str(), pid))
    }

    async fn terminate(&self, handle: &ProcessHandle, _graceful: bool) -> Result<(), BackendError> {
        self.terminates.fetch_add(1, Ordering::SeqCst);
        if !self.never_exit.load(Ordering::SeqCst) {
            self.running.lock().unwrap().remove(&Self::session(handle));
        }
        Ok(())
    }

    async fn is_alive(&self, name: &ServerName) -> Result<Option<ProcessHandle>, BackendError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .running
            .lock()
            .unwrap()
            .get(name.as_str())
            .map(|pid| Self::handle(name.as_str(), *pid)))
    }

    async fn send_line(&self, handle: &ProcessHandle, text: &str) -> Result<(), BackendError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        let session = Self::session(handle);
        self.sent
            .lock()
            .unwrap()
            .push((session.clone(), text.to_string()));

        if text == "stop" && !self.never_exit.load(Ordering::SeqCst) {
            self.running.lock().unwrap().remove(&session);
        }
        Ok(())
    }
}

/// Temporary servers/backups/config tree plus settings pointing into it.
pub struct TestEnv {
    pub dir: TempDir,
    pub settings: ManagerSettings,
    pub backend: Arc<FakeBackend>,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let settings = ManagerSettings {
            servers_dir: root.join("servers"),
            backup_dir: root.join("backups"),
            config_dir: root.join("config"),
            download_dir: root.join("downloads"),
            start_timeout_secs: 1,
            stop_timeout_secs: 1,
            poll_interval_ms: 10,
            restart_grace_secs: 0,
            ..ManagerSettings::default()
        };
        fs::create_dir_all(&settings.servers_dir).unwrap();
        fs::create_dir_all(&settings.backup_dir).unwrap();

        Self {
            dir,
            settings,
            backend: FakeBackend::new(),
        }
    }

    pub fn builder(&self) -> ManagerBuilder {
        BedrockManager::builder(self.settings.clone()).backend(self.backend.clone())
    }

    pub fn manager(&self) -> BedrockManager {
        self.builder().build()
    }

    pub fn install_dir(&self, name: &str) -> PathBuf {
        self.settings.servers_dir.join(name)
    }

    pub fn backup_dir(&self, name: &str) -> PathBuf {
        self.settings.backup_dir.join(name)
    }

    /// Lays out an install with an executable, properties and a generated world.
    pub fn install(&self, name: &str, world: &str) -> PathBuf {
        let dir = self.install_dir(name);
        let world_dir = dir.join("worlds").join(world);
        fs::create_dir_all(world_dir.join("db")).unwrap();
        fs::write(dir.join(EXECUTABLE), b"#!/bin/sh\n").unwrap();
        fs::write(
            dir.join("server.properties"),
            format!("server-name={name}\nlevel-name={world}\n"),
        )
        .unwrap();
        fs::write(dir.join("allowlist.json"), b"[]").unwrap();
        fs::write(world_dir.join("levelname.txt"), world.as_bytes()).unwrap();
        fs::write(world_dir.join("db").join("CURRENT"), b"MANIFEST-000001\n").unwrap();
        dir
    }

    pub fn files_in(&self, dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = match fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }
}

pub fn server(name: &str) -> ServerName {
    name.parse().unwrap()
}
