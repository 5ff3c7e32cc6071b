//! Linux backend: detached `screen` sessions, optionally wrapped by systemd units.

use std::{collections::HashMap, io, path::Path, process::Output};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::{
    error::BackendError,
    instance::{BackendToken, ProcessHandle, ServerName},
};

use super::{ProcessBackend, StopStrategy, process_started_at, require_tool};

const SCREEN: &str = "screen";
const SYSTEMCTL: &str = "systemctl";

#[derive(Debug, Clone)]
pub struct ScreenBackend {
    prefix: String,
    units: HashMap<String, String>,
}

impl ScreenBackend {
    pub fn new(prefix: String, units: HashMap<String, String>) -> Self {
        Self { prefix, units }
    }

    /// Session names are derived from the server name so any manager process can find them again.
    pub fn session_name(&self, name: &ServerName) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn unit_for(&self, name: &ServerName) -> Option<&str> {
        self.units.get(name.as_str()).map(String::as_str)
    }

    async fn screen(&self, args: &[&str]) -> Result<Output, BackendError> {
        require_tool(SCREEN)?;
        run(Command::new(SCREEN).args(args), SCREEN).await
    }

    async fn systemctl(&self, args: &[&str]) -> Result<Output, BackendError> {
        require_tool(SYSTEMCTL)?;
        let mut command = Command::new(SYSTEMCTL);
        if !is_root() {
            command.arg("--user");
        }
        run(command.args(args), SYSTEMCTL).await
    }

    async fn find_session(&self, session: &str) -> Result<Option<u32>, BackendError> {
        // `screen -ls` exits non-zero when there are no sessions; only stdout matters.
        let output = self.screen(&["-ls"]).await?;
        let listing = String::from_utf8_lossy(&output.stdout);
        Ok(parse_screen_listing(&listing, session))
    }

    async fn unit_main_pid(&self, unit: &str) -> Result<Option<u32>, BackendError> {
        let active = self.systemctl(&["is-active", "--quiet", unit]).await?;
        if !active.status.success() {
            return Ok(None);
        }

        let output = self
            .systemctl(&["show", "--property=MainPID", "--value", unit])
            .await?;
        let pid = String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|pid| *pid != 0);

        Ok(pid)
    }

    fn session_of(handle: &ProcessHandle) -> Result<&str, BackendError> {
        match &handle.token {
            BackendToken::Screen { session } | BackendToken::Systemd { session, .. } => Ok(session),
            BackendToken::Pipe { .. } => Err(BackendError::BackendUnsupportedOnHostOS(
                "named pipe handles on Linux",
            )),
        }
    }
}

#[async_trait]
impl ProcessBackend for ScreenBackend {
    fn executable_name(&self) -> &'static str {
        "bedrock_server"
    }

    fn stop_strategy(&self, name: &ServerName) -> StopStrategy {
        if self.unit_for(name).is_some() {
            StopStrategy::Terminate
        } else {
            StopStrategy::ConsoleCommand
        }
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

        let session = self.session_name(name);

        if let Some(unit) = self.unit_for(name) {
            let output = self.systemctl(&["start", unit]).await?;
            check_status(&output, BackendError::Spawn)?;

            let pid = self.unit_main_pid(unit).await?.unwrap_or(0);
            debug!(server = %name, unit, pid, "Started systemd unit");
            return Ok(ProcessHandle {
                pid,
                started_at: process_started_at(pid),
                token: BackendToken::Systemd {
                    unit: unit.to_string(),
                    session,
                },
            });
        }

        require_tool(SCREEN)?;
        // screen resolves the program after changing directory, so relative paths would break.
        let executable = std::path::absolute(executable)
            .map_err(|e| BackendError::Spawn(format!("{}: {e}", executable.display())))?;
        let working_dir = std::path::absolute(working_dir)
            .map_err(|e| BackendError::Spawn(format!("{}: {e}", working_dir.display())))?;
        let output = run(
            Command::new(SCREEN)
                .arg("-dmS")
                .arg(&session)
                .arg(&executable)
                .current_dir(&working_dir)
                .env("LD_LIBRARY_PATH", &working_dir),
            SCREEN,
        )
        .await?;
        check_status(&output, BackendError::Spawn)?;

        let pid = self.find_session(&session).await?.unwrap_or(0);
        debug!(server = %name, session, pid, "Started screen session");

        Ok(ProcessHandle {
            pid,
            started_at: process_started_at(pid),
            token: BackendToken::Screen { session },
        })
    }

    async fn terminate(&self, handle: &ProcessHandle, graceful: bool) -> Result<(), BackendError> {
        match &handle.token {
            BackendToken::Systemd { unit, .. } => {
                let verb = if graceful { "stop" } else { "kill" };
                let output = self.systemctl(&[verb, unit]).await?;
                check_status(&output, BackendError::Terminate)
            }
            BackendToken::Screen { session } => {
                if graceful {
                    self.send_line(handle, "stop").await
                } else {
                    let output = self.screen(&["-S", session, "-X", "quit"]).await?;
                    check_status(&output, BackendError::Terminate)
                }
            }
            BackendToken::Pipe { .. } => Err(BackendError::BackendUnsupportedOnHostOS(
                "named pipe handles on Linux",
            )),
        }
    }

    async fn is_alive(&self, name: &ServerName) -> Result<Option<ProcessHandle>, BackendError> {
        let session = self.session_name(name);

        if let Some(unit) = self.unit_for(name) {
            return Ok(self.unit_main_pid(unit).await?.map(|pid| ProcessHandle {
                pid,
                started_at: process_started_at(pid),
                token: BackendToken::Systemd {
                    unit: unit.to_string(),
                    session,
                },
            }));
        }

        Ok(self.find_session(&session).await?.map(|pid| ProcessHandle {
            pid,
            started_at: process_started_at(pid),
            token: BackendToken::Screen { session },
        }))
    }

    async fn send_line(&self, handle: &ProcessHandle, text: &str) -> Result<(), BackendError> {
        let session = Self::session_of(handle)?;
        let line = format!("{}\n", escape_stuff(text));
        let output = self
            .screen(&["-S", session, "-p", "0", "-X", "stuff", &line])
            .await?;
        check_status(&output, BackendError::Send)
    }
}

/// `stuff` reads `^X` as a control character and `\` as an escape, so both are escaped here.
fn escape_stuff(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '^') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

async fn run(command: &mut Command, tool: &str) -> Result<Output, BackendError> {
    command.output().await.map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => BackendError::CommandToolMissing(tool.to_string()),
        io::ErrorKind::PermissionDenied => BackendError::PermissionDenied(e.to_string()),
        _ => BackendError::Spawn(format!("{tool}: {e}")),
    })
}

fn check_status(output: &Output, err: fn(String) -> BackendError) -> Result<(), BackendError> {
    if output.status.success() {
        return Ok(());
    }

    let mut reason = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if reason.is_empty() {
        reason = String::from_utf8_lossy(&output.stdout).trim().to_string();
    }
    if reason.is_empty() {
        reason = output.status.to_string();
    }

    if reason.to_ascii_lowercase().contains("permission denied")
        || reason.contains("Access denied")
    {
        return Err(BackendError::PermissionDenied(reason));
    }

    Err(err(reason))
}

/// Finds `<pid>.<session>` in `screen -ls` output.
fn parse_screen_listing(listing: &str, session: &str) -> Option<u32> {
    listing.lines().find_map(|line| {
        let entry = line.split_whitespace().next()?;
        let (pid, name) = entry.split_once('.')?;
        if name == session {
            pid.parse().ok()
        } else {
            None
        }
    })
}

#[inline]
fn is_root() -> bool {
    nix::unistd::getuid().is_root()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "There are screens on:\n\
        \t4821.bedrock-Alpha\t(10/19/2026 09:12:44 AM)\t(Detached)\n\
        \t5102.bedrock-Alpha2\t(10/19/2026 09:13:01 AM)\t(Detached)\n\
        2 Sockets in /run/screen/S-mc.\n";

    #[test]
    fn matches_exact_session_names_only() {
        assert_eq!(parse_screen_listing(LISTING, "bedrock-Alpha"), Some(4821));
        assert_eq!(parse_screen_listing(LISTING, "bedrock-Alpha2"), Some(5102));
        assert_eq!(parse_screen_listing(LISTING, "bedrock-Alp"), None);
        assert_eq!(parse_screen_listing("No Sockets found in /run/screen/S-mc.\n", "bedrock-Alpha"), None);
    }

    #[test]
    fn console_text_is_escaped_for_stuff() {
        assert_eq!(escape_stuff("say hi"), "say hi");
        assert_eq!(escape_stuff("say ^C"), "say \\^C");
        assert_eq!(
            escape_stuff(r#"tellraw @a {"rawtext":[{"text":"a\"b"}]}"#),
            r#"tellraw @a {"rawtext":[{"text":"a\\"b"}]}"#
        );
    }

    #[test]
    fn session_name_uses_prefix() {
        let backend = ScreenBackend::new("bedrock-".to_string(), HashMap::new());
        let name: ServerName = "Alpha".parse().unwrap();
        assert_eq!(backend.session_name(&name), "bedrock-Alpha");
        assert_eq!(backend.stop_strategy(&name), StopStrategy::ConsoleCommand);
    }

    #[test]
    fn configured_unit_switches_to_terminate() {
        let units = HashMap::from([("Alpha".to_string(), "bedrock-alpha.service".to_string())]);
        let backend = ScreenBackend::new("bedrock-".to_string(), units);
        let name: ServerName = "Alpha".parse().unwrap();
        assert_eq!(backend.stop_strategy(&name), StopStrategy::Terminate);
    }
}
