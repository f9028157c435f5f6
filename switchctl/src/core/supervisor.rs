//! Server process lifecycle supervision
//!
//! The supervisor owns at most one server process. A successful terminate or
//! kill moves it to the retired slot (where its exit status can still be
//! collected) and leaves the supervisor with nothing to stop; a failed one
//! leaves the process owned so the caller can retry or escalate.

use std::ffi::OsString;
use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use super::command::build_command_line;
use super::config::ServerConfig;
use crate::error::{ProcessError, ProcessResult};
use crate::services::process::{OsProcess, TokioSpawner};
use crate::traits::{Liveness, ProcessSpawner, ServerProcess};
use shared::{switch_debug, switch_info, switch_warn, Role};

/// Lifecycle of the supervised server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    NotStarted,
    Running,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopKind {
    Terminate,
    Kill,
}

pub struct Supervisor {
    config: ServerConfig,
    spawner: Box<dyn ProcessSpawner>,
    process: Option<Box<dyn ServerProcess>>,
    retired: Option<Box<dyn ServerProcess>>,
    state: LifecycleState,
    last_exit: Option<ExitStatus>,
}

impl Supervisor {
    /// Supervisor that launches real processes
    pub fn new(config: ServerConfig) -> Self {
        Self::with_spawner(config, TokioSpawner::new())
    }

    pub fn with_spawner(config: ServerConfig, spawner: impl ProcessSpawner + 'static) -> Self {
        Self {
            config,
            spawner: Box::new(spawner),
            process: None,
            retired: None,
            state: LifecycleState::NotStarted,
            last_exit: None,
        }
    }

    /// Take ownership of an already running server identified by pid
    pub fn attach(config: ServerConfig, pid: i32) -> Self {
        Self::adopt(config, Box::new(OsProcess::attach(pid)))
    }

    /// Take ownership of an existing process handle
    pub fn adopt(config: ServerConfig, process: Box<dyn ServerProcess>) -> Self {
        let mut supervisor = Self::new(config);
        switch_debug!(Role::Supervisor, "Adopted server process {}", process.pid());
        supervisor.process = Some(process);
        supervisor.state = LifecycleState::Running;
        supervisor
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Pid of the owned process, if any
    pub fn pid(&self) -> Option<i32> {
        self.process.as_ref().map(|process| process.pid())
    }

    /// Exit status of the most recently reaped process
    pub fn last_exit(&self) -> Option<ExitStatus> {
        self.last_exit
    }

    pub fn command_line(&self) -> Vec<OsString> {
        build_command_line(&self.config)
    }

    /// Launch the server and return its pid
    pub fn start(&mut self) -> ProcessResult<i32> {
        if let Some(pid) = self.pid() {
            return Err(ProcessError::AlreadyRunning { pid });
        }

        let argv = self.command_line();
        switch_debug!(Role::Supervisor, "Launching server: {:?}", argv);

        let process = self.spawner.spawn(&argv).map_err(|source| ProcessError::Launch {
            path: self.config.executable().to_path_buf(),
            source,
        })?;
        let pid = process.pid();

        if self.retired.take().is_some() {
            switch_debug!(Role::Supervisor, "Discarding unreaped handle of previous server");
        }
        self.process = Some(process);
        self.state = LifecycleState::Running;
        self.last_exit = None;

        switch_info!(
            Role::Supervisor,
            "Server started (PID: {}) video:{} audio:{} control:{}",
            pid,
            self.config.video_port(),
            self.config.audio_port(),
            self.config.controller_address()
        );
        Ok(pid)
    }

    /// Cooperative shutdown of the owned process
    pub fn terminate(&mut self, flush_coverage: bool) -> ProcessResult<()> {
        self.stop(StopKind::Terminate, flush_coverage)
    }

    /// Immediate, non-cooperative stop of the owned process
    pub fn kill(&mut self, flush_coverage: bool) -> ProcessResult<()> {
        self.stop(StopKind::Kill, flush_coverage)
    }

    /// Ask an instrumented server to write coverage counters, leaving it running
    pub fn gcov_flush(&mut self) -> ProcessResult<()> {
        let process = self
            .process
            .as_mut()
            .ok_or(ProcessError::NoProcess { operation: "flush coverage of" })?;
        let pid = process.pid();
        process
            .flush_coverage()
            .map_err(|source| ProcessError::CoverageFlush { pid, source })?;
        switch_debug!(Role::Supervisor, "Requested coverage flush from {}", pid);
        Ok(())
    }

    // Coverage is flushed before the stop signal while the process can still
    // act on it. The stop is attempted regardless and its failure wins.
    fn stop(&mut self, kind: StopKind, flush_coverage: bool) -> ProcessResult<()> {
        let operation = match kind {
            StopKind::Terminate => "terminate",
            StopKind::Kill => "kill",
        };
        let process = self.process.as_mut().ok_or(ProcessError::NoProcess { operation })?;
        let pid = process.pid();

        let flushed = if flush_coverage {
            process
                .flush_coverage()
                .map_err(|source| ProcessError::CoverageFlush { pid, source })
        } else {
            Ok(())
        };

        let stopped = match kind {
            StopKind::Terminate => process
                .request_stop()
                .map_err(|source| ProcessError::Terminate { pid, source }),
            StopKind::Kill => process
                .force_stop()
                .map_err(|source| ProcessError::Kill { pid, source }),
        };

        if let Err(e) = stopped {
            if let Err(flush_err) = &flushed {
                switch_warn!(Role::Supervisor, "{}", flush_err);
            }
            switch_warn!(Role::Supervisor, "{}", e);
            return Err(e);
        }

        self.retired = self.process.take();
        self.state = LifecycleState::Terminated;
        switch_info!(Role::Supervisor, "Server process {} stopped ({})", pid, operation);
        flushed
    }

    /// Supervision check: notices a server that exited on its own
    pub fn check(&mut self) -> ProcessResult<LifecycleState> {
        let Some(process) = self.process.as_mut() else {
            return Ok(self.state);
        };
        let pid = process.pid();

        match process.try_wait().map_err(|source| ProcessError::Wait { pid, source })? {
            Liveness::Alive => Ok(LifecycleState::Running),
            Liveness::Exited(status) => {
                switch_warn!(Role::Supervisor, "Server process {} exited on its own: {:?}", pid, status);
                self.process = None;
                self.last_exit = status;
                self.state = LifecycleState::Terminated;
                Ok(self.state)
            }
        }
    }

    /// Wait up to `timeout` for the stopped process to exit
    ///
    /// Returns `Liveness::Alive` if it is still running; the handle is kept
    /// so the call can be repeated.
    pub async fn reap(&mut self, timeout: Duration) -> ProcessResult<Liveness> {
        let process = self
            .retired
            .as_mut()
            .ok_or(ProcessError::NoProcess { operation: "reap" })?;
        let pid = process.pid();

        match tokio::time::timeout(timeout, process.wait()).await {
            Ok(Ok(status)) => {
                switch_debug!(Role::Supervisor, "Reaped server process {}: {:?}", pid, status);
                self.retired = None;
                self.last_exit = status;
                Ok(Liveness::Exited(status))
            }
            Ok(Err(source)) => Err(ProcessError::Wait { pid, source }),
            Err(_) => Ok(Liveness::Alive),
        }
    }

    /// Terminate, wait up to `grace` for exit, then escalate to a forced stop
    pub async fn terminate_and_reap(
        &mut self,
        flush_coverage: bool,
        grace: Duration,
    ) -> ProcessResult<Option<ExitStatus>> {
        let flushed = match self.terminate(flush_coverage) {
            Ok(()) => Ok(()),
            Err(e @ ProcessError::CoverageFlush { .. }) => Err(e),
            Err(e) => return Err(e),
        };

        if let Liveness::Exited(status) = self.reap(grace).await? {
            return flushed.map(|()| status);
        }

        let process = self
            .retired
            .as_mut()
            .ok_or(ProcessError::NoProcess { operation: "kill" })?;
        let pid = process.pid();
        switch_warn!(
            Role::Supervisor,
            "Server process {} ignored terminate for {:?}, killing",
            pid,
            grace
        );
        process
            .force_stop()
            .map_err(|source| ProcessError::Kill { pid, source })?;

        match self.reap(grace).await? {
            Liveness::Exited(status) => flushed.map(|()| status),
            Liveness::Alive => Err(ProcessError::Wait {
                pid,
                source: io::Error::new(io::ErrorKind::TimedOut, "process still alive after kill"),
            }),
        }
    }
}
