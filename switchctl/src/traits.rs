//! Trait definitions with mockall annotations for testing
//!
//! The supervisor talks to the operating system only through these seams,
//! so its lifecycle rules can be tested without launching real processes.

use std::ffi::OsString;
use std::io;
use std::process::ExitStatus;

/// Whether an owned process is still alive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    /// Exited; the status is `None` when the process is not our child
    Exited(Option<ExitStatus>),
}

/// Handle to one server process
///
/// `request_stop` is the cooperative shutdown request, `force_stop` the
/// immediate one. Implementations hide which OS signal backs each.
#[mockall::automock]
#[async_trait::async_trait]
pub trait ServerProcess: Send + Sync {
    /// OS process id
    fn pid(&self) -> i32;

    /// Ask the process to shut down
    fn request_stop(&mut self) -> io::Result<()>;

    /// Stop the process immediately
    fn force_stop(&mut self) -> io::Result<()>;

    /// Ask an instrumented build to write its coverage counters
    fn flush_coverage(&mut self) -> io::Result<()>;

    /// Non-blocking liveness check
    fn try_wait(&mut self) -> io::Result<Liveness>;

    /// Wait for the process to exit
    async fn wait(&mut self) -> io::Result<Option<ExitStatus>>;
}

/// Launches server processes from an argument vector
#[mockall::automock]
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, argv: &[OsString]) -> io::Result<Box<dyn ServerProcess>>;
}
