use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

const INITIAL_DELAY_MS: u64 = 50;
const MAX_DELAY_MS: u64 = 500;

/// Error returned when a polled condition never became true.
#[derive(Debug)]
pub struct WaitError {
    path: PathBuf,
    attempts: u32,
    waited: Duration,
    last_error: Option<String>,
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Timed out after {} attempts over {:?} waiting for {}. Last error: {}",
            self.attempts,
            self.waited,
            self.path.display(),
            self.last_error.as_deref().unwrap_or("<none>")
        )
    }
}

impl std::error::Error for WaitError {}

/// Retry `probe` with exponential backoff until it yields a value or `timeout` passes.
fn poll<T, F>(path: &Path, timeout: Duration, mut probe: F) -> Result<T, WaitError>
where
    F: FnMut() -> Result<Option<T>, String>,
{
    let start = Instant::now();
    let mut delay = Duration::from_millis(INITIAL_DELAY_MS);
    let mut attempts = 0;
    let mut last_error = None;

    loop {
        attempts += 1;
        match probe() {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(err) => last_error = Some(err),
        }

        let remaining = timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            return Err(WaitError {
                path: path.to_path_buf(),
                attempts,
                waited: start.elapsed(),
                last_error,
            });
        }

        thread::sleep(delay.min(remaining));
        delay = (delay * 2).min(Duration::from_millis(MAX_DELAY_MS));
    }
}

/// Poll a file until its content satisfies `predicate`.
pub fn wait_for_file_content<P, F>(
    path: P,
    predicate: F,
    timeout: Duration,
) -> Result<String, WaitError>
where
    P: AsRef<Path>,
    F: Fn(&str) -> bool,
{
    let path = path.as_ref();
    poll(path, timeout, || match fs::read_to_string(path) {
        Ok(content) if predicate(&content) => Ok(Some(content)),
        Ok(content) => Err(format!("unexpected content: {:?}", content.trim())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.to_string()),
    })
}

/// Poll a unix socket until a connection is accepted.
pub fn wait_for_socket<P: AsRef<Path>>(path: P, timeout: Duration) -> Result<(), WaitError> {
    let path = path.as_ref();
    poll(path, timeout, || match UnixStream::connect(path) {
        // Dropping the probe connection just gets an error reply from the daemon
        Ok(_) => Ok(Some(())),
        Err(err) => Err(err.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn wait_for_file_content_returns_existing_content() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("daemon.pid");
        fs::write(&file, "4242").unwrap();

        let content = wait_for_file_content(
            &file,
            |text| text.trim().parse::<u32>().is_ok(),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(content, "4242");
    }

    #[test]
    fn wait_for_socket_times_out_with_path() {
        let temp_dir = TempDir::new().unwrap();
        let socket = temp_dir.path().join("missing.sock");

        let err = wait_for_socket(&socket, Duration::from_millis(1)).unwrap_err();
        assert!(err.to_string().contains("missing.sock"));
    }
}
