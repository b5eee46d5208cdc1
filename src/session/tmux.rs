use std::{ffi::OsStr, io::ErrorKind, path::Path, process::Output};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::SessionBackend;
use crate::error::SessionError;

/// Drives the `tmux` binary. Exit codes are mapped per the tmux contract:
/// `has-session` exits 1 when the session (or server) is absent, which is
/// an answer, not a failure.
pub struct TmuxBackend {
    binary: String,
}

impl TmuxBackend {
    pub fn new() -> Self {
        Self {
            binary: "tmux".to_string(),
        }
    }

    // `=name` forces an exact target match; without it tmux would happily
    // resolve `fuji-a` against a session named `fuji-ab`.
    fn target(name: &str) -> String {
        format!("={name}")
    }

    async fn run<I, S>(&self, name: &str, args: I) -> Result<Output, SessionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|err| match err.kind() {
                ErrorKind::NotFound => SessionError::BinaryMissing,
                _ => SessionError::Io {
                    name: name.to_string(),
                    reason: err.to_string(),
                },
            })
    }
}

impl Default for TmuxBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

#[async_trait]
impl SessionBackend for TmuxBackend {
    async fn exists(&self, name: &str) -> Result<bool, SessionError> {
        let target = Self::target(name);
        let output = self.run(name, ["has-session", "-t", target.as_str()]).await?;

        if output.status.success() {
            return Ok(true);
        }
        match output.status.code() {
            Some(1) => Ok(false),
            _ => Err(SessionError::Io {
                name: name.to_string(),
                reason: stderr_of(&output),
            }),
        }
    }

    async fn create(
        &self,
        name: &str,
        dir: &Path,
        command: &str,
    ) -> Result<(), SessionError> {
        if self.exists(name).await? {
            return Err(SessionError::CreateFailed {
                name: name.to_string(),
                reason: "session already exists".to_string(),
            });
        }

        let dir = dir.to_string_lossy();
        let output = self
            .run(
                name,
                ["new-session", "-d", "-s", name, "-c", dir.as_ref(), command],
            )
            .await?;

        if !output.status.success() {
            return Err(SessionError::CreateFailed {
                name: name.to_string(),
                reason: stderr_of(&output),
            });
        }

        debug!("Created session '{name}' in {dir}");
        Ok(())
    }

    async fn send_keys(&self, name: &str, text: &str) -> Result<(), SessionError> {
        let target = Self::target(name);
        let output = self
            .run(name, ["send-keys", "-t", target.as_str(), text, "Enter"])
            .await?;

        if !output.status.success() {
            return Err(SessionError::Io {
                name: name.to_string(),
                reason: stderr_of(&output),
            });
        }
        Ok(())
    }

    async fn capture(&self, name: &str) -> Result<String, SessionError> {
        let target = Self::target(name);
        let output = self.run(name, ["capture-pane", "-p", "-t", target.as_str()]).await?;

        if !output.status.success() {
            return Err(SessionError::Io {
                name: name.to_string(),
                reason: stderr_of(&output),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn kill(&self, name: &str) -> Result<(), SessionError> {
        let target = Self::target(name);
        let output = self.run(name, ["kill-session", "-t", target.as_str()]).await?;

        // exit 1 means the session was already gone
        if output.status.success() || output.status.code() == Some(1) {
            Ok(())
        } else {
            Err(SessionError::Io {
                name: name.to_string(),
                reason: stderr_of(&output),
            })
        }
    }

    async fn attach(&self, name: &str) -> Result<(), SessionError> {
        let target = Self::target(name);

        // stdio is inherited so tmux takes over the terminal until detach
        let status = Command::new(&self.binary)
            .args(["attach-session", "-t", target.as_str()])
            .status()
            .await
            .map_err(|err| match err.kind() {
                ErrorKind::NotFound => SessionError::BinaryMissing,
                _ => SessionError::Io {
                    name: name.to_string(),
                    reason: err.to_string(),
                },
            })?;

        if !status.success() {
            return Err(SessionError::Io {
                name: name.to_string(),
                reason: format!("tmux attach exited with {status}"),
            });
        }
        Ok(())
    }
}
