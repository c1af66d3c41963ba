//! Transient IPC connections to MPV.
//!
//! Each call opens a fresh Unix socket connection, writes one command line and
//! closes. Nothing is shared between calls, so a stalled or broken connection
//! cannot leak into the next command.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use super::protocol::{MpvCommand, MpvMessage, MpvResponse};

#[derive(Error, Debug)]
pub enum IpcError {
  #[error("Connection failed: {0}")]
  ConnectionFailed(std::io::Error),
  #[error("Write failed: {0}")]
  WriteFailed(std::io::Error),
  #[error("Read failed: {0}")]
  ReadFailed(std::io::Error),
  #[error("Invalid reply: {0}")]
  Parse(#[from] serde_json::Error),
  #[error("Command timeout")]
  Timeout,
  #[error("Disconnected")]
  Disconnected,
}

/// Connect to the MPV IPC socket.
pub async fn connect(path: &Path) -> Result<UnixStream, IpcError> {
  UnixStream::connect(path)
    .await
    .map_err(IpcError::ConnectionFailed)
}

/// Fire-and-forget and request/response access to one control socket.
#[derive(Debug, Clone)]
pub struct Transport {
  path: PathBuf,
}

impl Transport {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Send a command without waiting for any reply.
  ///
  /// Failures are logged and swallowed; callers confirm effects through
  /// observed properties instead.
  pub async fn send(&self, cmd: MpvCommand) {
    if let Err(e) = self.try_send(&cmd).await {
      log::debug!("MPV send {:?} dropped: {}", cmd.command, e);
    }
  }

  /// Send a command and return its reply, or `None` when the outcome is unknown.
  pub async fn request(&self, cmd: MpvCommand, timeout: Duration) -> Option<MpvResponse> {
    match self.try_request(&cmd, timeout).await {
      Ok(response) => Some(response),
      Err(e) => {
        log::debug!("MPV request {:?} failed: {}", cmd.command, e);
        None
      }
    }
  }

  pub async fn try_send(&self, cmd: &MpvCommand) -> Result<(), IpcError> {
    let line = cmd.to_line()?;
    let mut stream = connect(&self.path).await?;
    stream.write_all(&line).await.map_err(IpcError::WriteFailed)?;
    stream.flush().await.map_err(IpcError::WriteFailed)?;
    let _ = stream.shutdown().await;
    Ok(())
  }

  pub async fn try_request(
    &self,
    cmd: &MpvCommand,
    timeout: Duration,
  ) -> Result<MpvResponse, IpcError> {
    tokio::time::timeout(timeout, self.exchange(cmd))
      .await
      .map_err(|_| IpcError::Timeout)?
  }

  async fn exchange(&self, cmd: &MpvCommand) -> Result<MpvResponse, IpcError> {
    let line = cmd.to_line()?;
    let stream = connect(&self.path).await?;
    let (reader, mut writer) = stream.into_split();
    writer.write_all(&line).await.map_err(IpcError::WriteFailed)?;
    writer.flush().await.map_err(IpcError::WriteFailed)?;

    let mut reader = BufReader::new(reader);
    let mut buf = String::new();
    loop {
      buf.clear();
      let n = reader
        .read_line(&mut buf)
        .await
        .map_err(IpcError::ReadFailed)?;
      if n == 0 {
        return Err(IpcError::Disconnected);
      }
      let trimmed = buf.trim();
      if trimmed.is_empty() {
        continue;
      }
      // mpv broadcasts events to every client; skip them until the reply arrives.
      match MpvMessage::parse(trimmed)? {
        MpvMessage::Response(response) => return Ok(response),
        MpvMessage::Event(event) => {
          log::debug!("Skipping {} event on request connection", event.event);
        }
      }
    }
  }
}
