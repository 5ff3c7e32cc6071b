use std::{
    fmt::{self, Display},
    path::PathBuf,
    str::FromStr,
};

use chrono::{DateTime, Utc};

use crate::{config::TargetVersion, error::NameError};

/// Validated server identifier. Safe to embed in paths, session names and pipe names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerName(String);

impl ServerName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ServerName {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(NameError::Empty);
        }
        if s == "." || s == ".." {
            return Err(NameError::Reserved(s.to_string()));
        }
        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
        {
            return Err(NameError::ForbiddenCharacter(s.to_string(), c));
        }
        Ok(Self(s.to_string()))
    }
}

impl Display for ServerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ServerName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One managed server as seen by the lifecycle core.
#[derive(Debug, Clone)]
pub struct ServerInstance {
    pub name: ServerName,
    pub install_dir: PathBuf,
    pub target_version: TargetVersion,
}

impl ServerInstance {
    pub fn executable(&self, executable_name: &str) -> PathBuf {
        self.install_dir.join(executable_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Stopped => write!(f, "STOPPED"),
            LifecycleState::Starting => write!(f, "STARTING"),
            LifecycleState::Running => write!(f, "RUNNING"),
            LifecycleState::Stopping => write!(f, "STOPPING"),
        }
    }
}

/// Backend-specific way back to a running process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendToken {
    /// Detached `screen` session.
    Screen { session: String },
    /// systemd unit whose service wraps the `screen` session.
    Systemd { unit: String, session: String },
    /// Process spawned directly, fed through a named pipe.
    Pipe { pipe: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub token: BackendToken,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        for ok in ["Alpha", "beta-2", "my_server.v1"] {
            assert_eq!(ok.parse::<ServerName>().unwrap().as_str(), ok);
        }
    }

    #[test]
    fn rejects_separators_and_shell_metacharacters() {
        for bad in ["../etc", "a/b", "a\\b", "a;rm", "a b", "$(x)", "a|b", "a`b`"] {
            assert!(
                matches!(bad.parse::<ServerName>(), Err(NameError::ForbiddenCharacter(..))),
                "{bad} should be rejected"
            );
        }
        assert!(matches!("".parse::<ServerName>(), Err(NameError::Empty)));
        assert!(matches!("..".parse::<ServerName>(), Err(NameError::Reserved(_))));
    }
}
