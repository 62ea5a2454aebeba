use super::polling::{wait_for_file_content, wait_for_socket, WaitError};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::thread;
use std::time::{Duration, Instant};

const READY_TIMEOUT: Duration = Duration::from_secs(10);
const EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Isolated runtime layout for one test: daemon files, journal and config
/// all live under a temp directory.
pub struct TestEnv {
    pub daemon_dir: PathBuf,
    pub journal_dir: PathBuf,
}

impl TestEnv {
    pub fn new(root: &Path) -> Self {
        Self {
            daemon_dir: root.join("daemon"),
            journal_dir: root.join("journal"),
        }
    }

    pub fn pid_file(&self) -> PathBuf {
        self.daemon_dir.join("daemon.pid")
    }

    pub fn socket_path(&self) -> PathBuf {
        self.daemon_dir.join("daemon.sock")
    }

    /// A `tn` invocation wired to this environment
    pub fn tn(&self) -> Command {
        let mut cmd = Command::new(tn_binary());
        cmd.env("TYN_DAEMON_DIR", &self.daemon_dir)
            .env("TYN_JOURNAL_DIR", &self.journal_dir)
            .env("TYN_CONFIG", self.daemon_dir.join("tyn.yml"))
            .env_remove("TYN_DB_PATH")
            .env_remove("RUST_LOG");
        cmd
    }

    pub fn run(&self, args: &[&str]) -> Output {
        self.tn()
            .args(args)
            .output()
            .expect("failed to run tn binary")
    }
}

/// RAII guard that terminates the detached daemon when dropped.
pub struct DaemonGuard {
    pid: u32,
}

impl DaemonGuard {
    /// Start the daemon through `tn daemon start` and wait until it accepts connections.
    pub fn start(env: &TestEnv) -> Result<Self, DaemonError> {
        let output = env.run(&["daemon", "start"]);
        if !output.status.success() {
            return Err(DaemonError::StartFailed(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }

        let content = wait_for_file_content(
            env.pid_file(),
            |content| content.trim().parse::<u32>().is_ok(),
            READY_TIMEOUT,
        )
        .map_err(DaemonError::ReadyTimeout)?;
        let pid = content
            .trim()
            .parse()
            .map_err(|_| DaemonError::StartFailed(content.clone()))?;
        let guard = Self { pid };

        wait_for_socket(env.socket_path(), READY_TIMEOUT).map_err(DaemonError::ReadyTimeout)?;
        Ok(guard)
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        if !is_process_running(self.pid) {
            return;
        }
        unsafe {
            libc::kill(self.pid as i32, libc::SIGTERM);
        }
        if !wait_for_process_exit(self.pid, EXIT_TIMEOUT) {
            eprintln!("tn daemon pid {} did not exit after SIGTERM", self.pid);
        }
    }
}

/// Wait for a process to exit, used by tests to ensure no orphans remain.
pub fn wait_for_process_exit(pid: u32, timeout: Duration) -> bool {
    let start = Instant::now();
    while is_process_running(pid) && start.elapsed() < timeout {
        thread::sleep(Duration::from_millis(50));
    }
    !is_process_running(pid)
}

pub fn is_process_running(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

pub fn tn_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_tn"))
}

/// Errors that can occur when starting the daemon for tests.
#[derive(Debug)]
pub enum DaemonError {
    StartFailed(String),
    ReadyTimeout(WaitError),
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartFailed(stderr) => write!(f, "tn daemon start failed: {}", stderr),
            Self::ReadyTimeout(err) => write!(f, "daemon never became ready: {}", err),
        }
    }
}

impl std::error::Error for DaemonError {}
