// Blocking client used by the CLI
// One connection per call: connect, write a request line, half-close, read one response line

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::config::Config;
use super::protocol::{deserialize_message, serialize_message, Request, Response};
use super::supervisor::{Supervisor, SupervisorError};

const RESPAWN_WAIT_STEP: Duration = Duration::from_millis(100);
const RESPAWN_WAIT_STEPS: u32 = 50;
const READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not reach daemon at {path}: {source}")]
    Unreachable { path: PathBuf, source: io::Error },
    #[error("could not reach daemon: {0}")]
    Respawn(#[from] SupervisorError),
    #[error("could not reach daemon: {0}")]
    Io(#[from] io::Error),
    #[error("daemon protocol error: {0}")]
    Protocol(String),
}

pub struct DaemonClient {
    socket_path: PathBuf,
    max_frame_size: usize,
    /// Used for the single respawn attempt after a refused connection
    respawn: Option<Supervisor>,
    /// A daemon was just launched; wait for it instead of respawning
    starting: bool,
}

impl DaemonClient {
    pub fn new(config: &Config) -> Self {
        Self {
            socket_path: config.socket_path.clone(),
            max_frame_size: config.settings.max_frame_size,
            respawn: Some(Supervisor::new(config)),
            starting: false,
        }
    }

    /// The daemon was spawned moments ago and may not be listening yet
    pub fn daemon_starting(mut self) -> Self {
        self.starting = true;
        self
    }

    /// Client that fails instead of restarting the daemon
    pub fn without_respawn(mut self) -> Self {
        self.respawn = None;
        self
    }

    pub fn send(&self, command: &str, params: Value) -> Result<Response, ClientError> {
        let request = Request::new(command, params);
        let bytes = serialize_message(&request)
            .map_err(|e| ClientError::Protocol(format!("failed to encode request: {}", e)))?;

        let mut stream = self.connect()?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        stream.write_all(&bytes)?;
        stream.flush()?;
        stream.shutdown(Shutdown::Write)?;

        let line = read_line(&stream, self.max_frame_size)?;
        deserialize_message(&line)
            .map_err(|e| ClientError::Protocol(format!("invalid response: {}", e)))
    }

    fn connect(&self) -> Result<UnixStream, ClientError> {
        let first = match UnixStream::connect(&self.socket_path) {
            Ok(stream) => return Ok(stream),
            Err(e) => e,
        };

        if self.starting {
            return self.wait_for_socket(None).map_err(|e| self.unreachable(e));
        }
        let Some(supervisor) = &self.respawn else {
            return Err(self.unreachable(first));
        };

        // A live recorded daemon may still be binding its socket
        match supervisor.is_running() {
            Ok(true) => {
                debug!(error = %first, "daemon is running but not accepting yet, waiting");
                match self.wait_for_socket(Some(supervisor)) {
                    Ok(stream) => return Ok(stream),
                    Err(e) => warn!(error = %e, "running daemon never accepted, restarting it"),
                }
            }
            Ok(false) => warn!(error = %first, "daemon refused connection, restarting it"),
            Err(e) => warn!(error = %e, "could not check daemon, restarting it"),
        }

        let pid = supervisor.spawn()?;
        debug!(pid, "respawned daemon");
        self.wait_for_socket(None).map_err(|e| self.unreachable(e))
    }

    /// Retry the socket in fixed steps; with `alive`, give up once its probe says
    /// the recorded daemon is gone
    fn wait_for_socket(&self, alive: Option<&Supervisor>) -> io::Result<UnixStream> {
        let mut last = io::Error::from(io::ErrorKind::TimedOut);
        for _ in 0..RESPAWN_WAIT_STEPS {
            std::thread::sleep(RESPAWN_WAIT_STEP);
            match UnixStream::connect(&self.socket_path) {
                Ok(stream) => return Ok(stream),
                Err(e) => last = e,
            }
            if let Some(supervisor) = alive {
                if !matches!(supervisor.is_running(), Ok(true)) {
                    break;
                }
            }
        }
        Err(last)
    }

    fn unreachable(&self, source: io::Error) -> ClientError {
        ClientError::Unreachable {
            path: self.socket_path.clone(),
            source,
        }
    }
}

/// Read one response line of at most `max` bytes
fn read_line(stream: &UnixStream, max: usize) -> Result<Vec<u8>, ClientError> {
    let mut reader = BufReader::new(stream.take(max as u64 + 1));
    let mut buf = Vec::new();
    reader.read_until(b'\n', &mut buf)?;

    if buf.is_empty() {
        return Err(ClientError::Protocol(
            "daemon closed the connection without a response".to_string(),
        ));
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    if buf.len() > max {
        return Err(ClientError::Protocol(format!(
            "response frame too large: more than {} bytes",
            max
        )));
    }
    Ok(buf)
}
