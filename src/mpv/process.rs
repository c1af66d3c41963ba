//! MPV process detection, spawning and teardown.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::config::AppConfig;

#[derive(Error, Debug)]
pub enum ProcessError {
  #[error("Failed to spawn MPV: {0}")]
  SpawnFailed(#[from] std::io::Error),
  #[error("IPC socket {} not created within {timeout:?}", .path.display())]
  ReadinessTimeout { path: PathBuf, timeout: Duration },
}

/// Find MPV executable in common locations.
pub fn find_mpv() -> Option<PathBuf> {
  // Check PATH first
  if let Ok(path) = which::which("mpv") {
    return Some(path);
  }

  #[cfg(target_os = "macos")]
  {
    let common_paths = [
      "/usr/local/bin/mpv",
      "/opt/homebrew/bin/mpv",
      "/Applications/mpv.app/Contents/MacOS/mpv",
    ];
    for path in common_paths {
      let p = PathBuf::from(path);
      if p.exists() {
        return Some(p);
      }
    }
  }

  #[cfg(target_os = "linux")]
  {
    let common_paths = ["/usr/bin/mpv", "/usr/local/bin/mpv"];
    for path in common_paths {
      let p = PathBuf::from(path);
      if p.exists() {
        return Some(p);
      }
    }
  }

  None
}

/// Resolve the binary to launch: configured command, detected path, or bare `mpv`.
pub fn player_binary(config: &AppConfig) -> PathBuf {
  config
    .player_cmd
    .as_ref()
    .filter(|s| !s.trim().is_empty())
    .map(PathBuf::from)
    .or_else(find_mpv)
    .unwrap_or_else(|| PathBuf::from("mpv"))
}

/// Build MPV's argument list (without the binary itself).
///
/// `idle` keeps MPV alive with an empty playlist; otherwise the last file
/// stays open when playback ends.
pub fn build_args(config: &AppConfig, target: Option<&str>, idle: bool) -> Vec<String> {
  let mut args = vec!["--force-window=yes".to_string(), "--really-quiet".to_string()];

  if config.enable_ipc {
    args.push(format!("--input-ipc-server={}", config.ipc_path.display()));
  }
  if idle {
    args.push("--idle=yes".to_string());
  } else {
    args.push("--keep-open=yes".to_string());
  }
  if config.disable_video {
    args.push("--video=no".to_string());
  }

  args.extend(config.extra_args.iter().cloned());

  if let Some(target) = target.filter(|t| !t.is_empty()) {
    args.push(target.to_string());
  }
  args
}

/// Spawn MPV detached in its own process group.
pub fn spawn_mpv(binary: &Path, args: &[String]) -> Result<Child, ProcessError> {
  log::info!("Spawning MPV: {:?} {:?}", binary, args);

  let mut cmd = Command::new(binary);
  cmd
    .args(args)
    .stdin(Stdio::null())
    .stdout(Stdio::null())
    .stderr(Stdio::null());

  #[cfg(unix)]
  {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
  }

  Ok(cmd.spawn()?)
}

/// Poll until the socket file exists or `timeout` elapses.
pub async fn await_ready(
  path: &Path,
  timeout: Duration,
  poll_interval: Duration,
) -> Result<(), ProcessError> {
  let deadline = Instant::now() + timeout;
  loop {
    if path.exists() {
      return Ok(());
    }
    let now = Instant::now();
    if now >= deadline {
      return Err(ProcessError::ReadinessTimeout {
        path: path.to_path_buf(),
        timeout,
      });
    }
    tokio::time::sleep(poll_interval.min(deadline - now)).await;
  }
}

/// Ask the process group to exit, then wait up to `grace` for the child.
///
/// Gives up silently after `grace`; the process may be left running.
pub async fn terminate(mut child: Child, grace: Duration) {
  let pid = child.id();
  log::info!("Terminating MPV process group (pid: {})", pid);

  if !signal_group(pid) {
    log::warn!("Group signal failed for pid {}, killing process directly", pid);
    if let Err(e) = child.kill() {
      log::error!("kill() failed: {}", e);
    }
  }

  let deadline = Instant::now() + grace;
  loop {
    match child.try_wait() {
      Ok(Some(status)) => {
        log::info!("MPV process exited with: {}", status);
        return;
      }
      Ok(None) if Instant::now() < deadline => {
        tokio::time::sleep(Duration::from_millis(20)).await;
      }
      Ok(None) => {
        log::warn!("MPV (pid {}) did not exit within {:?}", pid, grace);
        return;
      }
      Err(e) => {
        log::error!("wait() failed: {}", e);
        return;
      }
    }
  }
}

#[cfg(unix)]
fn signal_group(pid: u32) -> bool {
  let Ok(pgid) = libc::pid_t::try_from(pid) else {
    return false;
  };
  // SAFETY: killpg has no memory-safety preconditions.
  unsafe { libc::killpg(pgid, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn signal_group(_pid: u32) -> bool {
  false
}

/// Remove a stale or finished socket file.
pub fn cleanup_ipc(path: &Path) {
  match std::fs::remove_file(path) {
    Ok(()) => log::debug!("Removed IPC socket {}", path.display()),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
    Err(e) => log::warn!("Failed to remove IPC socket {}: {}", path.display(), e),
  }
}
