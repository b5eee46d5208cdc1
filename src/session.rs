//! Session control surface over the terminal multiplexer.
//!
//! Sessions, not raw child processes, are the unit of supervision: a
//! server keeps running after the CLI invocation exits, and its live
//! console can be reattached later. The multiplexer is modeled as a
//! capability trait so a different backend can stand in for tmux.

use std::path::Path;

use async_trait::async_trait;

use crate::error::SessionError;

#[async_trait]
pub trait SessionBackend {
    async fn exists(&self, name: &str) -> Result<bool, SessionError>;

    /// Spawn a new detached session running `command` in `dir`.
    async fn create(
        &self,
        name: &str,
        dir: &Path,
        command: &str,
    ) -> Result<(), SessionError>;

    /// Inject a line of input into the session's running process.
    async fn send_keys(&self, name: &str, text: &str) -> Result<(), SessionError>;

    /// Snapshot the session's visible output buffer.
    async fn capture(&self, name: &str) -> Result<String, SessionError>;

    /// Terminate the session and its process tree. Idempotent.
    async fn kill(&self, name: &str) -> Result<(), SessionError>;

    /// Hand the terminal over to the session. Blocks until the user
    /// detaches; detaching never touches the server process.
    async fn attach(&self, name: &str) -> Result<(), SessionError>;
}

pub mod tmux;

pub use tmux::TmuxBackend;
