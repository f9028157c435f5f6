//! Implementations that touch the operating system or the network

pub mod connection;
pub mod process;

pub use connection::{ConnectOptions, Connection, ConnectionState};
pub use process::{OsProcess, TokioSpawner};
