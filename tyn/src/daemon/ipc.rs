// Unix socket transport for the daemon
// Each connection carries exactly one request line and one response line

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, warn};

use super::dispatch::Dispatcher;
use super::protocol::{deserialize_message, frame_too_large, serialize_message, Request, Response};

/// Outcome of reading one bounded frame
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    /// Payload without its trailing newline
    Line(Vec<u8>),
    /// The peer sent more than the limit before a newline
    TooLarge(usize),
}

/// Bind the daemon socket: remove a stale file, create the parent directory,
/// bind, then restrict the socket to its owner
pub fn bind(socket_path: &Path) -> Result<UnixListener> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path).with_context(|| {
            format!("Failed to remove stale socket: {}", socket_path.display())
        })?;
    }

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create socket directory: {}", parent.display())
        })?;
    }

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("Failed to bind socket: {}", socket_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| {
                format!(
                    "Failed to set socket permissions: {}",
                    socket_path.display()
                )
            })?;
    }

    Ok(listener)
}

/// Accept connections forever; each one is handled on its own task.
/// Accept errors are logged and never stop the loop.
pub async fn accept_loop(listener: UnixListener, dispatcher: Arc<Dispatcher>, max_frame_size: usize) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, dispatcher, max_frame_size).await {
                        warn!(error = %e, "client connection failed");
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "accept error");
            }
        }
    }
}

/// Read one request, dispatch it, write one response, close
pub async fn handle_connection(
    mut stream: UnixStream,
    dispatcher: Arc<Dispatcher>,
    max_frame_size: usize,
) -> Result<()> {
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);

    let response = match read_frame(&mut reader, max_frame_size).await? {
        Frame::TooLarge(len) => Response::failure(frame_too_large(len, max_frame_size)),
        Frame::Line(line) => match deserialize_message::<Request>(&line) {
            Ok(request) => {
                debug!(command = %request.command, "dispatching request");
                let dispatcher = Arc::clone(&dispatcher);
                tokio::task::spawn_blocking(move || dispatcher.dispatch(request))
                    .await
                    .unwrap_or_else(|e| Response::failure(format!("internal error: {}", e)))
            }
            Err(e) => Response::failure(format!("invalid request: {}", e)),
        },
    };

    let bytes = serialize_message(&response).context("Failed to serialize response")?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    writer.shutdown().await?;
    Ok(())
}

/// Read up to the first newline (or EOF), never buffering more than
/// `max_frame_size + 1` bytes
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> std::io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let mut limited = reader.take(max_frame_size as u64 + 1);
    limited.read_until(b'\n', &mut buf).await?;

    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    if buf.len() > max_frame_size {
        return Ok(Frame::TooLarge(buf.len()));
    }
    Ok(Frame::Line(buf))
}
