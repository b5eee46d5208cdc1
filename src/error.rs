use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by the on-disk instance registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("No server named '{0}' exists")]
    NotFound(String),

    #[error("A server named '{0}' already exists")]
    DuplicateName(String),

    #[error("State record for '{name}' at {} is unreadable: {reason}", path.display())]
    CorruptState {
        name: String,
        path: PathBuf,
        reason: String,
    },

    #[error("Server '{0}' is being modified by another fuji invocation")]
    Conflict(String),

    #[error("Registry I/O failure at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures raised while driving the terminal multiplexer.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to create session '{name}': {reason}")]
    CreateFailed { name: String, reason: String },

    #[error("The tmux binary is not installed or not on PATH")]
    BinaryMissing,

    #[error("tmux failure for session '{name}': {reason}")]
    Io { name: String, reason: String },
}

#[derive(Debug, Clone, Error)]
pub enum VersionError {
    #[error("Incorrect major version: {0}")]
    IncorrectMajor(String),

    #[error("Incorrect minor version: {0}")]
    IncorrectMinor(String),

    #[error("Incorrect patch version: {0}")]
    IncorrectPatch(String),

    #[error("Missing major version")]
    MissingMajor,

    #[error("Missing minor version")]
    MissingMinor,

    #[error("Too many components")]
    ExtraComponents,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error("{0}")]
    Precondition(String),

    #[error("Server '{name}' did not {what} within {seconds}s")]
    Timeout {
        name: String,
        what: &'static str,
        seconds: u64,
    },

    #[error("Server '{name}' exited before becoming ready")]
    ExitedEarly { name: String },

    #[error(
        "Invalid server name '{0}': must start with a letter and contain \
         only letters, digits, '-' or '_'"
    )]
    InvalidName(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn io<S: Into<String>>(context: S, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// Process exit code for the CLI contract; each error kind maps to a
    /// distinct non-zero code.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Registry(RegistryError::NotFound(_)) => 2,
            Error::Registry(RegistryError::DuplicateName(_)) => 3,
            Error::Registry(RegistryError::Conflict(_)) => 4,
            Error::Registry(RegistryError::CorruptState { .. }) => 7,
            Error::Registry(RegistryError::Io { .. }) => 1,
            Error::Session(_) | Error::ExitedEarly { .. } => 6,
            Error::Timeout { .. } => 8,
            Error::Precondition(_)
            | Error::InvalidName(_)
            | Error::Config(_)
            | Error::Version(_) => 5,
            Error::Io { .. } => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
