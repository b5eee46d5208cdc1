//! fuji: a command-line manager for PaperMC Minecraft servers.
//!
//! Each managed server runs inside a persistent tmux session so it
//! outlives the CLI invocation that started it; durable per-instance
//! records under the fuji root directory track what exists and what
//! state it is in.

pub mod config;
pub mod error;
pub mod instance;
pub mod properties;
pub mod registry;
pub mod session;
pub mod supervisor;

pub use error::Error;
