//! Supervisor and control-channel client for the gst-switch server
//!
//! `core` holds the configuration boundary, the process lifecycle rules and
//! signal fan-out; `services` holds the pieces that talk to the OS and the
//! network; `controller` is the typed facade most callers want.

pub mod controller;
pub mod core;
pub mod error;
pub mod services;
pub mod settings;
pub mod traits;

// Re-export commonly used types
pub use controller::Controller;
pub use core::{
    ConfigValidator, ControlAddress, DispatchReport, LifecycleState, RawServerConfig, RecordMode, SearchPath,
    ServerConfig, SignalDispatcher, Supervisor,
};
pub use error::{ConfigError, ConnectionError, ProcessError, RemoteError, SwitchError, SwitchResult};
pub use services::{ConnectOptions, Connection, ConnectionState};
pub use settings::ClientSettings;
pub use traits::{Liveness, ProcessSpawner, ServerProcess};
