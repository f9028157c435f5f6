//! Real server process implementation
//!
//! Spawns the server through `tokio::process` and delivers stop and coverage
//! requests as Unix signals addressed by pid.

use async_trait::async_trait;
use std::ffi::OsString;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};

use crate::traits::{Liveness, ProcessSpawner, ServerProcess};
use shared::{switch_debug, Role};

/// Poll interval when waiting on a process that is not our child
const ATTACHED_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A server process, either spawned by us or adopted by pid
pub struct OsProcess {
    pid: i32,
    child: Option<Child>,
}

impl OsProcess {
    /// Adopt an already running process by pid
    ///
    /// The pid is not checked here; signalling a bogus pid fails when the
    /// signal is sent. Pids at or below zero never reach `kill(2)`, since
    /// they would address a process group.
    pub fn attach(pid: i32) -> Self {
        Self { pid, child: None }
    }

    fn from_child(child: Child) -> io::Result<Self> {
        let pid = child
            .id()
            .ok_or_else(|| io::Error::other("spawned process exited before its pid was read"))?;
        let pid = i32::try_from(pid).map_err(|_| io::Error::other(format!("pid {pid} does not fit in i32")))?;
        Ok(Self { pid, child: Some(child) })
    }
}

#[cfg(unix)]
mod signals {
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;
    use std::io;

    pub const STOP: Signal = Signal::SIGTERM;
    pub const KILL: Signal = Signal::SIGKILL;
    pub const COVERAGE_FLUSH: Signal = Signal::SIGUSR1;

    /// Only positive pids name a single process
    fn target(pid: i32) -> io::Result<Pid> {
        if pid <= 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("pid {pid} does not name a single process"),
            ));
        }
        Ok(Pid::from_raw(pid))
    }

    pub fn send(pid: i32, sig: Signal) -> io::Result<()> {
        signal::kill(target(pid)?, sig).map_err(io::Error::from)
    }

    /// Probe with the null signal
    pub fn alive(pid: i32) -> io::Result<bool> {
        match signal::kill(target(pid)?, None) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            // Exists but belongs to someone else
            Err(Errno::EPERM) => Ok(true),
            Err(e) => Err(io::Error::from(e)),
        }
    }
}

#[async_trait]
impl ServerProcess for OsProcess {
    fn pid(&self) -> i32 {
        self.pid
    }

    #[cfg(unix)]
    fn request_stop(&mut self) -> io::Result<()> {
        signals::send(self.pid, signals::STOP)
    }

    #[cfg(unix)]
    fn force_stop(&mut self) -> io::Result<()> {
        signals::send(self.pid, signals::KILL)
    }

    #[cfg(unix)]
    fn flush_coverage(&mut self) -> io::Result<()> {
        signals::send(self.pid, signals::COVERAGE_FLUSH)
    }

    #[cfg(not(unix))]
    fn request_stop(&mut self) -> io::Result<()> {
        self.force_stop()
    }

    #[cfg(not(unix))]
    fn force_stop(&mut self) -> io::Result<()> {
        match self.child.as_mut() {
            Some(child) => child.start_kill(),
            None => Err(io::Error::new(io::ErrorKind::Unsupported, "cannot signal an attached process")),
        }
    }

    #[cfg(not(unix))]
    fn flush_coverage(&mut self) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "coverage flush needs Unix signals"))
    }

    fn try_wait(&mut self) -> io::Result<Liveness> {
        match self.child.as_mut() {
            Some(child) => Ok(match child.try_wait()? {
                Some(status) => Liveness::Exited(Some(status)),
                None => Liveness::Alive,
            }),
            #[cfg(unix)]
            None => Ok(if signals::alive(self.pid)? {
                Liveness::Alive
            } else {
                Liveness::Exited(None)
            }),
            #[cfg(not(unix))]
            None => Err(io::Error::new(io::ErrorKind::Unsupported, "cannot probe an attached process")),
        }
    }

    async fn wait(&mut self) -> io::Result<Option<ExitStatus>> {
        if let Some(child) = self.child.as_mut() {
            return child.wait().await.map(Some);
        }
        loop {
            if let Liveness::Exited(status) = self.try_wait()? {
                return Ok(status);
            }
            tokio::time::sleep(ATTACHED_POLL_INTERVAL).await;
        }
    }
}

/// Spawner backed by `tokio::process::Command`
///
/// Output streams go to the null device. Must be used inside a Tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct TokioSpawner;

impl TokioSpawner {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessSpawner for TokioSpawner {
    fn spawn(&self, argv: &[OsString]) -> io::Result<Box<dyn ServerProcess>> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command line"))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let process = OsProcess::from_child(cmd.spawn()?)?;
        switch_debug!(Role::Supervisor, "Spawned {:?} as pid {}", program, process.pid);
        Ok(Box::new(process))
    }
}
