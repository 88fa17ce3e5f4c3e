//! Supervisor for the PHP-FPM worker process.
//!
//! The worker outlives individual invocations: a warm container keeps the
//! same process between requests, and a new container may find the PID and
//! socket markers of a worker that belonged to a previous generation in the
//! shared scratch directory. The socket marker is the only liveness signal
//! the supervisor trusts.

use crate::fastcgi::FastCgiClient;
use std::fs;
use std::io;
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio::time::sleep;
use tracing::{debug, info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "/opt/faas/etc/php-fpm.d/php-fpm.conf";
pub const DEFAULT_PID_PATH: &str = "/tmp/.faas/php-fpm.pid";
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/.faas/php-fpm.sock";

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("PHP-FPM command is empty")]
    EmptyCommand,

    #[error("Failed to spawn PHP-FPM process: {0}")]
    Spawn(#[source] io::Error),

    #[error("PHP-FPM process failed to start: exited with {0} before opening its socket")]
    ExitedEarly(ExitStatus),

    #[error("Timeout after {0:?} while waiting for PHP-FPM process to start")]
    StartTimeout(Duration),

    #[error("Timeout while waiting for PHP-FPM process {pid} to stop")]
    StopTimeout { pid: i32 },

    #[error("Failed to signal PHP-FPM process {pid}: {source}")]
    Signal {
        pid: i32,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ProcessError>;

/// Where the worker lives and how long the supervisor waits on it.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Program and arguments.
    pub command: Vec<String>,
    pub pid_path: PathBuf,
    pub socket_path: PathBuf,
    /// Interval between checks while waiting for the worker to start or stop.
    pub poll_interval: Duration,
    pub start_timeout: Duration,
    pub stop_timeout: Duration,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self::for_config_file(DEFAULT_CONFIG_PATH)
    }
}

impl ProcessConfig {
    /// PHP-FPM in the foreground with the given pool configuration.
    pub fn for_config_file(config_path: impl AsRef<Path>) -> Self {
        Self {
            command: vec![
                "php-fpm".to_string(),
                "--nodaemonize".to_string(),
                "--force-stderr".to_string(),
                "--fpm-config".to_string(),
                config_path.as_ref().to_string_lossy().into_owned(),
            ],
            pid_path: PathBuf::from(DEFAULT_PID_PATH),
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            poll_interval: Duration::from_millis(5),
            start_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// What `ensure_running` found before it had to start a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviousWorker {
    /// No PID marker.
    Absent,
    /// PID marker for a process that no longer exists.
    Stale,
    /// A live worker that was stopped to make room.
    Terminated { pid: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    AlreadyRunning,
    Started { previous: PreviousWorker },
}

/// The PHP-FPM worker owned by this runtime.
pub struct PhpFpmProcess {
    config: ProcessConfig,
    child: Option<Child>,
    state: WorkerState,
}

impl PhpFpmProcess {
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            child: None,
            state: WorkerState::Stopped,
        }
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// PID of the worker this supervisor spawned, if it is still tracked.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// FastCGI client bound to this worker's socket.
    pub fn client(&self, timeout: Duration) -> FastCgiClient {
        FastCgiClient::new(&self.config.socket_path, timeout)
    }

    /// Make sure a worker is accepting connections. Cheap when one already
    /// is; otherwise reclaims whatever a previous worker left behind and
    /// starts a new one.
    pub async fn ensure_running(&mut self) -> Result<StartOutcome> {
        if self.is_listening().await {
            self.state = WorkerState::Running;
            return Ok(StartOutcome::AlreadyRunning);
        }

        if self.state == WorkerState::Running {
            warn!(socket = ?self.config.socket_path, "PHP-FPM socket is gone, restarting worker");
        }

        let previous = self.reclaim().await?;
        self.start().await?;

        Ok(StartOutcome::Started { previous })
    }

    /// Ask the worker to shut down without waiting for it.
    pub fn stop(&mut self) -> Result<()> {
        let Some(child) = self.child.as_mut() else {
            self.state = WorkerState::Stopped;
            return Ok(());
        };

        match (child.try_wait()?, child.id()) {
            (None, Some(pid)) => {
                info!(pid, "Stopping PHP-FPM process");
                self.state = WorkerState::Stopping;
                send_signal(pid as i32, libc::SIGTERM)
            }
            _ => {
                self.child = None;
                self.state = WorkerState::Stopped;
                Ok(())
            }
        }
    }

    async fn is_listening(&self) -> bool {
        let socket_path = &self.config.socket_path;
        socket_path.exists() && UnixStream::connect(socket_path).await.is_ok()
    }

    /// Stop the worker this supervisor still owns and any other worker named
    /// by the PID marker, then clear both markers.
    async fn reclaim(&mut self) -> Result<PreviousWorker> {
        let pid_path = self.config.pid_path.clone();
        let mut previous = PreviousWorker::Absent;

        // Our worker may not have written its PID marker yet.
        if let Some(pid) = self.running_child_pid() {
            self.terminate(pid).await?;
            previous = PreviousWorker::Terminated { pid };
        }
        self.child = None;

        if pid_path.exists() {
            match read_pid(&pid_path) {
                Some(pid) if self.is_alive(pid) => {
                    self.terminate(pid).await?;
                    previous = PreviousWorker::Terminated { pid };
                }
                pid if previous == PreviousWorker::Absent => {
                    info!(?pid, "Removing markers of stale PHP-FPM process");
                    previous = PreviousWorker::Stale;
                }
                _ => {}
            }
        }

        remove_marker(&self.config.socket_path)?;
        remove_marker(&pid_path)?;

        Ok(previous)
    }

    fn running_child_pid(&mut self) -> Option<i32> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(None) => child.id().map(|pid| pid as i32),
            _ => None,
        }
    }

    async fn terminate(&mut self, pid: i32) -> Result<()> {
        info!(pid, "Killing existing PHP-FPM process");
        self.state = WorkerState::Stopping;

        match send_signal(pid, libc::SIGTERM) {
            Ok(()) => {}
            Err(ProcessError::Signal { source, .. })
                if source.raw_os_error() == Some(libc::ESRCH) =>
            {
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        let started = Instant::now();
        while self.is_alive(pid) {
            if started.elapsed() > self.config.stop_timeout {
                return Err(ProcessError::StopTimeout { pid });
            }
            sleep(self.config.poll_interval).await;
        }

        debug!(pid, elapsed = ?started.elapsed(), "PHP-FPM process stopped");
        self.state = WorkerState::Stopped;
        Ok(())
    }

    /// Our own child has to be reaped to disappear, so it is checked through
    /// its handle; any other pid is probed with signal 0.
    fn is_alive(&mut self, pid: i32) -> bool {
        if let Some(child) = self.child.as_mut() {
            if child.id() == Some(pid as u32) {
                return matches!(child.try_wait(), Ok(None));
            }
        }
        process_exists(pid)
    }

    async fn start(&mut self) -> Result<()> {
        if let Some(parent) = self.config.socket_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let (program, args) = self
            .config
            .command
            .split_first()
            .ok_or(ProcessError::EmptyCommand)?;

        // Both worker streams go to stderr.
        let diagnostics = io::stderr().as_fd().try_clone_to_owned()?;

        info!(command = ?self.config.command, "Starting PHP-FPM process");
        self.state = WorkerState::Starting;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(diagnostics))
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                self.state = WorkerState::Stopped;
                ProcessError::Spawn(e)
            })?;

        let started = Instant::now();
        if let Err(e) = wait_for_socket(&mut child, &self.config).await {
            if !matches!(e, ProcessError::ExitedEarly(_)) {
                let _ = child.start_kill();
            }
            self.state = WorkerState::Stopped;
            return Err(e);
        }

        info!(pid = ?child.id(), elapsed = ?started.elapsed(), "PHP-FPM process started");
        self.child = Some(child);
        self.state = WorkerState::Running;
        Ok(())
    }
}

async fn wait_for_socket(child: &mut Child, config: &ProcessConfig) -> Result<()> {
    let started = Instant::now();

    loop {
        if let Some(status) = child.try_wait()? {
            return Err(ProcessError::ExitedEarly(status));
        }
        if config.socket_path.exists() {
            return Ok(());
        }
        if started.elapsed() > config.start_timeout {
            return Err(ProcessError::StartTimeout(config.start_timeout));
        }
        sleep(config.poll_interval).await;
    }
}

fn read_pid(path: &Path) -> Option<i32> {
    fs::read_to_string(path)
        .ok()?
        .trim()
        .parse()
        .ok()
        .filter(|pid| *pid > 0)
}

fn remove_marker(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn process_exists(pid: i32) -> bool {
    // Signal 0 only checks that the process exists and can be signalled.
    let result = unsafe { libc::kill(pid, 0) };
    result == 0 || io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

fn send_signal(pid: i32, signal: libc::c_int) -> Result<()> {
    // pid 0 and negative pids address process groups
    if pid <= 0 {
        return Err(ProcessError::Signal {
            pid,
            source: io::Error::from(io::ErrorKind::InvalidInput),
        });
    }

    if unsafe { libc::kill(pid, signal) } == 0 {
        Ok(())
    } else {
        Err(ProcessError::Signal {
            pid,
            source: io::Error::last_os_error(),
        })
    }
}
