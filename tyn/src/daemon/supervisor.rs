//! Daemon supervisor: liveness probing and detached spawning.
//!
//! "Running" is re-derived from scratch on every probe: the PID file must
//! hold a numeric PID, that process must accept a zero signal, and its
//! executable must be ours. A stale PID file is never deleted; it simply
//! stops satisfying the probe.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::config::Config;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to read PID file {path}: {source}")]
    ReadPid { path: PathBuf, source: io::Error },
    #[error("invalid PID in file {path}: {content:?}")]
    InvalidPid { path: PathBuf, content: String },
    #[error("failed to resolve executable path: {0}")]
    CurrentExe(io::Error),
    #[error("failed to create log directory {path}: {source}")]
    CreateLogDir { path: PathBuf, source: io::Error },
    #[error("failed to open log file {path}: {source}")]
    OpenLog { path: PathBuf, source: io::Error },
    #[error("failed to duplicate log handle: {0}")]
    CloneLog(io::Error),
    #[error("failed to start daemon process {exe}: {source}")]
    Launch { exe: PathBuf, source: io::Error },
    #[error("failed to write PID file {path}: {source}")]
    WritePid { path: PathBuf, source: io::Error },
    #[error("daemon already running (PID {0})")]
    AlreadyRunning(u32),
}

/// Result of [`Supervisor::ensure_running`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    AlreadyRunning,
    Spawned(u32),
}

#[derive(Debug, Clone)]
pub struct Supervisor {
    pid_file: PathBuf,
    log_file: PathBuf,
    /// Binary to spawn and to compare against; `None` means the current executable
    executable: Option<PathBuf>,
}

impl Supervisor {
    pub fn new(config: &Config) -> Self {
        Self {
            pid_file: config.pid_file.clone(),
            log_file: config.log_file.clone(),
            executable: None,
        }
    }

    /// Spawn and identify the daemon as `exe` instead of the current executable
    pub fn with_executable(mut self, exe: impl Into<PathBuf>) -> Self {
        self.executable = Some(exe.into());
        self
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    fn executable(&self) -> Result<PathBuf, SupervisorError> {
        match &self.executable {
            Some(exe) => Ok(exe.clone()),
            None => std::env::current_exe().map_err(SupervisorError::CurrentExe),
        }
    }

    /// Read the recorded PID; a missing file is `None`
    pub fn read_pid(&self) -> Result<Option<u32>, SupervisorError> {
        let content = match fs::read_to_string(&self.pid_file) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(SupervisorError::ReadPid {
                    path: self.pid_file.clone(),
                    source,
                })
            }
        };
        match content.trim().parse::<u32>() {
            Ok(pid) if pid > 0 && pid <= i32::MAX as u32 => Ok(Some(pid)),
            _ => Err(SupervisorError::InvalidPid {
                path: self.pid_file.clone(),
                content,
            }),
        }
    }

    /// Whether the recorded PID is a live instance of our executable.
    ///
    /// Only unparsable PID content is an error. An unreadable file, a dead
    /// process or a foreign one is simply "not running".
    pub fn is_running(&self) -> Result<bool, SupervisorError> {
        let pid = match self.read_pid() {
            Ok(Some(pid)) => pid,
            Ok(None) => return Ok(false),
            Err(SupervisorError::ReadPid { path, source }) => {
                warn!(path = %path.display(), error = %source, "PID file unreadable, treating daemon as stopped");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        if !process_alive(pid) {
            debug!(pid, "recorded daemon PID is not alive");
            return Ok(false);
        }

        // Identity errors (no /proc, permissions) trust the PID
        if let Ok(expected) = self.executable() {
            if let Some(false) = executable_matches(pid, &expected) {
                debug!(pid, "recorded PID belongs to a different executable");
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Start `<exe> serve --daemon` detached in a new session, output to the log file
    pub fn spawn(&self) -> Result<u32, SupervisorError> {
        let exe = self.executable()?;

        if let Some(dir) = self.log_file.parent() {
            fs::create_dir_all(dir).map_err(|source| SupervisorError::CreateLogDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let log = open_append(&self.log_file).map_err(|source| SupervisorError::OpenLog {
            path: self.log_file.clone(),
            source,
        })?;
        let log_err = log.try_clone().map_err(SupervisorError::CloneLog)?;

        let mut cmd = Command::new(&exe);
        cmd.arg("serve")
            .arg("--daemon")
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));
        detach(&mut cmd);

        let child = cmd.spawn().map_err(|source| SupervisorError::Launch {
            exe: exe.clone(),
            source,
        })?;
        let pid = child.id();

        // The child exits on its own when it finds this daemon recorded
        match self.read_pid() {
            Ok(Some(existing)) if existing != pid && matches!(self.is_running(), Ok(true)) => {
                warn!(pid = existing, spawned = pid, "a live daemon is already recorded, keeping its PID");
            }
            _ => self.record_pid(pid)?,
        }

        // Dropping the handle releases the child; it is never waited on
        drop(child);
        Ok(pid)
    }

    /// Write `pid` to the PID file, creating its directory
    pub fn record_pid(&self, pid: u32) -> Result<(), SupervisorError> {
        let write = || -> io::Result<()> {
            if let Some(dir) = self.pid_file.parent() {
                fs::create_dir_all(dir)?;
            }
            fs::write(&self.pid_file, pid.to_string())
        };
        write().map_err(|source| SupervisorError::WritePid {
            path: self.pid_file.clone(),
            source,
        })
    }

    /// Record the current process as the daemon, refusing if another live one exists
    pub fn claim_current(&self) -> Result<(), SupervisorError> {
        let own = std::process::id();
        match self.is_running() {
            Ok(true) => match self.read_pid() {
                Ok(Some(pid)) if pid != own => return Err(SupervisorError::AlreadyRunning(pid)),
                _ => {}
            },
            Ok(false) => {}
            Err(e) => warn!(error = %e, "could not check for a running daemon"),
        }
        self.record_pid(own)
    }

    /// Make sure a daemon exists, spawning one if the probe says none is live.
    ///
    /// A failed probe is logged and treated as "not running".
    pub fn ensure_running(&self) -> Result<EnsureOutcome, SupervisorError> {
        match self.is_running() {
            Ok(true) => return Ok(EnsureOutcome::AlreadyRunning),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "could not check if daemon is running"),
        }

        let pid = self.spawn()?;
        info!(pid, "started daemon process");
        Ok(EnsureOutcome::Spawned(pid))
    }
}

fn open_append(path: &Path) -> io::Result<fs::File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

#[cfg(unix)]
fn detach(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    // SAFETY: setsid is async-signal-safe and touches no parent state
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn detach(_cmd: &mut Command) {}

/// Check if a process exists by sending signal 0
#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

// TODO(windows): OpenProcess-based liveness check
#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    false
}

/// Compare `/proc/<pid>/exe` with `expected`; `None` when it cannot be determined
fn executable_matches(pid: u32, expected: &Path) -> Option<bool> {
    let target = fs::read_link(format!("/proc/{}/exe", pid)).ok()?;
    let expected = fs::canonicalize(expected).unwrap_or_else(|_| expected.to_path_buf());
    Some(target == expected)
}
