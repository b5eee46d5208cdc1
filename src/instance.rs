use std::{
    fmt::{self, Display},
    path::PathBuf,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{config::PaperSpec, error::Error};

pub const SESSION_PREFIX: &str = "fuji-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
}

impl InstanceState {
    /// The legal transition table. Everything not listed here is a bug in
    /// the caller, surfaced as a precondition failure.
    pub fn can_transition(self, to: InstanceState) -> bool {
        use InstanceState::*;

        matches!(
            (self, to),
            (Stopped, Starting)
                | (Crashed, Starting) // a successful start clears a crash
                | (Starting, Running)
                | (Starting, Crashed)
                | (Starting, Stopped) // spawn never happened; settle back
                | (Running, Stopping)
                | (Running, Crashed)
                | (Stopping, Stopped)
                | (Stopping, Crashed)
                | (Crashed, Stopped)
        )
    }

    /// States from which a fresh start may be claimed.
    pub fn is_down(self) -> bool {
        matches!(self, InstanceState::Stopped | InstanceState::Crashed)
    }
}

impl Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstanceState::Stopped => "stopped",
            InstanceState::Starting => "starting",
            InstanceState::Running => "running",
            InstanceState::Stopping => "stopping",
            InstanceState::Crashed => "crashed",
        };
        write!(f, "{name}")
    }
}

/// One managed PaperMC server: the durable record the registry persists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInstance {
    pub id: Uuid,
    pub name: String,
    pub directory: PathBuf,
    pub paper: PaperSpec,
    pub eula_accepted: bool,
    pub state: InstanceState,
    pub created_at: DateTime<Utc>,
}

impl ServerInstance {
    pub fn new(
        name: String,
        directory: PathBuf,
        paper: PaperSpec,
        eula_accepted: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            directory,
            paper,
            eula_accepted,
            state: InstanceState::Stopped,
            created_at: Utc::now(),
        }
    }

    /// The tmux session bound to this instance, derived from its name.
    pub fn session_name(&self) -> String {
        format!("{SESSION_PREFIX}{}", self.name)
    }

    pub fn jar_path(&self) -> PathBuf {
        self.directory.join("server.jar")
    }

    pub fn properties_path(&self) -> PathBuf {
        self.directory.join("server.properties")
    }

    pub fn eula_path(&self) -> PathBuf {
        self.directory.join("eula.txt")
    }

    pub fn transition(&mut self, to: InstanceState) -> Result<(), Error> {
        if !self.state.can_transition(to) {
            return Err(Error::Precondition(format!(
                "Server '{}' cannot go from {} to {}",
                self.name, self.state, to
            )));
        }
        self.state = to;
        Ok(())
    }
}

/// Normalize and validate a user-supplied server name.
pub fn validate_name(name: &str) -> Result<String, Error> {
    let name = name.to_lowercase();
    let mut chars = name.chars();

    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return Err(Error::InvalidName(name)),
    }

    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(Error::InvalidName(name));
    }

    Ok(name)
}
