//! Error taxonomy for the supervisor and control client
//!
//! Four families, one per failure layer, so callers can tell "can't even
//! configure this" from "process wouldn't start" from "process started but
//! won't talk" from "server rejected the request".

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use shared::SharedError;

/// Invalid startup input, raised before any process or connection exists
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing value for {field}")]
    Missing { field: &'static str },

    #[error("Wrong type for {field}: expected {expected}, got {found}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error("Value for {field} out of range: {value}")]
    OutOfRange { field: &'static str, value: String },

    #[error("Malformed {field} {value:?}: {reason}")]
    Malformed {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Executable {name} not found in search path {searched:?}")]
    ExecutableNotFound { name: String, searched: Vec<PathBuf> },

    #[error("Cannot load config file {path}: {message}")]
    ConfigFile { path: PathBuf, message: String },
}

impl ConfigError {
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ConfigError::Missing { field }
            | ConfigError::WrongType { field, .. }
            | ConfigError::OutOfRange { field, .. }
            | ConfigError::Malformed { field, .. } => Some(*field),
            ConfigError::ExecutableNotFound { .. } | ConfigError::ConfigFile { .. } => None,
        }
    }
}

/// Failures while managing the server's OS process
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to launch {path}: {source}")]
    Launch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to terminate server process {pid}: {source}")]
    Terminate {
        pid: i32,
        #[source]
        source: io::Error,
    },

    #[error("Failed to kill server process {pid}: {source}")]
    Kill {
        pid: i32,
        #[source]
        source: io::Error,
    },

    #[error("Failed to flush coverage of server process {pid}: {source}")]
    CoverageFlush {
        pid: i32,
        #[source]
        source: io::Error,
    },

    #[error("Failed to collect exit status of server process {pid}: {source}")]
    Wait {
        pid: i32,
        #[source]
        source: io::Error,
    },

    #[error("No server process to {operation}")]
    NoProcess { operation: &'static str },

    #[error("Server process {pid} is already running")]
    AlreadyRunning { pid: i32 },
}

/// Failures of the control channel itself
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Handshake with {address} failed: {reason}")]
    Handshake { address: String, reason: String },

    #[error("Not connected to the server")]
    NotConnected,

    #[error("Connection closed")]
    Closed,

    #[error("No response to {method} within {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("Malformed frame: {0}")]
    MalformedFrame(#[from] SharedError),

    #[error("Unexpected reply to {method}: {reason}")]
    UnexpectedReply { method: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// The server answered, and the answer was a failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Remote call {method} failed: {name}: {message}")]
pub struct RemoteError {
    pub method: String,
    pub name: String,
    pub message: String,
}

/// Umbrella error returned by the controller and the CLI-facing API
#[derive(Error, Debug)]
pub enum SwitchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl SwitchError {
    pub fn is_connection(&self) -> bool {
        matches!(self, SwitchError::Connection(_))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, SwitchError::Remote(_))
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
pub type ProcessResult<T> = Result<T, ProcessError>;
pub type SwitchResult<T> = Result<T, SwitchError>;
