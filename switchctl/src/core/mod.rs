//! Domain logic: configuration boundary, command line, process lifecycle
//! and signal fan-out

pub mod command;
pub mod config;
pub mod dispatcher;
pub mod supervisor;

pub use command::build_command_line;
pub use config::{
    ConfigValidator, ControlAddress, RawServerConfig, RecordMode, SearchPath, ServerConfig,
};
pub use dispatcher::{DispatchReport, SignalDispatcher, SignalHandler};
pub use supervisor::{LifecycleState, Supervisor};
