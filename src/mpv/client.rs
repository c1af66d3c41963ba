//! High-level MPV player: process supervision plus command helpers.

use std::process::Child;
use std::sync::Arc;
use std::time::Duration;

use async_channel::Receiver;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::ipc::{IpcError, Transport};
use super::listener::{EventListener, EventObserver, ObserverSlot};
use super::process::{
  await_ready, build_args, cleanup_ipc, player_binary, spawn_mpv, terminate, ProcessError,
};
use super::properties::{PropertyStore, TrackedProperty};
use super::protocol::{LoadMode, MpvCommand, MpvEvent, MpvResponse, PropertyValue};
use crate::config::{AppConfig, ConfigError};

/// Events buffered for queue sync before new ones are dropped.
const EVENT_BUFFER: usize = 64;

#[derive(Error, Debug)]
pub enum MpvError {
  #[error("Process error: {0}")]
  Process(#[from] ProcessError),
  #[error("IPC error: {0}")]
  Ipc(#[from] IpcError),
  #[error("Config error: {0}")]
  Config(#[from] ConfigError),
}

/// Lifecycle of the supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
  NotStarted,
  /// A child we spawned and own.
  Running,
  /// An MPV instance started elsewhere, reached through the configured socket.
  Attached,
  Stopped,
}

enum ProcessSlot {
  NotStarted,
  Running(Child),
  Attached,
  Stopped,
}

struct ListenerHandle {
  cancel: CancellationToken,
  task: JoinHandle<()>,
}

/// Supervises one MPV process and talks to it over IPC.
pub struct Player {
  config: Arc<AppConfig>,
  transport: Transport,
  store: Arc<PropertyStore>,
  process: Mutex<ProcessSlot>,
  listener: Mutex<Option<ListenerHandle>>,
  observer: ObserverSlot,
  event_tx: async_channel::Sender<MpvEvent>,
  event_rx: Receiver<MpvEvent>,
  /// Serializes start/attach/stop so only one lifecycle runs at a time.
  lifecycle: tokio::sync::Mutex<()>,
}

impl Player {
  pub fn new(config: Arc<AppConfig>) -> Self {
    let (event_tx, event_rx) = async_channel::bounded(EVENT_BUFFER);
    Self {
      transport: Transport::new(config.ipc_path.clone()),
      config,
      store: Arc::new(PropertyStore::new()),
      process: Mutex::new(ProcessSlot::NotStarted),
      listener: Mutex::new(None),
      observer: Arc::new(RwLock::new(None)),
      event_tx,
      event_rx,
      lifecycle: tokio::sync::Mutex::new(()),
    }
  }

  pub fn config(&self) -> &AppConfig {
    &self.config
  }

  pub fn store(&self) -> &Arc<PropertyStore> {
    &self.store
  }

  /// Register the observer invoked for every MPV event.
  pub fn set_observer(&self, observer: impl EventObserver + 'static) {
    *self.observer.write() = Some(Arc::new(observer));
  }

  pub fn clear_observer(&self) {
    *self.observer.write() = None;
  }

  /// Event feed used for queue synchronization.
  pub fn events(&self) -> Receiver<MpvEvent> {
    self.event_rx.clone()
  }

  pub fn status(&self) -> ProcessStatus {
    match &*self.process.lock() {
      ProcessSlot::NotStarted => ProcessStatus::NotStarted,
      ProcessSlot::Running(_) => ProcessStatus::Running,
      ProcessSlot::Attached => ProcessStatus::Attached,
      ProcessSlot::Stopped => ProcessStatus::Stopped,
    }
  }

  /// True while a process exists and has not exited.
  pub fn is_running(&self) -> bool {
    match &mut *self.process.lock() {
      ProcessSlot::Running(child) => matches!(child.try_wait(), Ok(None)),
      ProcessSlot::Attached => self.config.ipc_path.exists(),
      ProcessSlot::NotStarted | ProcessSlot::Stopped => false,
    }
  }

  /// True while the event listener task is alive.
  pub fn listener_running(&self) -> bool {
    self
      .listener
      .lock()
      .as_ref()
      .is_some_and(|l| !l.task.is_finished())
  }

  /// Spawn MPV, replacing any running instance, and wait for its socket.
  ///
  /// With IPC disabled the process is launched on `target` and nothing is awaited.
  pub async fn start(&self, target: Option<&str>, idle: bool) -> Result<(), MpvError> {
    let _lifecycle = self.lifecycle.lock().await;
    self.start_inner(target, idle).await
  }

  async fn start_inner(&self, target: Option<&str>, idle: bool) -> Result<(), MpvError> {
    self.stop_inner().await;

    if self.config.enable_ipc {
      cleanup_ipc(&self.config.ipc_path);
    }
    self.reset_properties();

    let binary = player_binary(&self.config);
    let args = build_args(&self.config, target, idle);
    let child = spawn_mpv(&binary, &args)?;
    *self.process.lock() = ProcessSlot::Running(child);

    if !self.config.enable_ipc {
      return Ok(());
    }

    if let Err(e) = await_ready(
      &self.config.ipc_path,
      self.config.socket_timeout(),
      self.config.socket_poll_interval(),
    )
    .await
    {
      log::error!("MPV did not become ready: {}", e);
      self.stop_inner().await;
      return Err(e.into());
    }

    self.spawn_listener();
    log::info!("MPV started");
    Ok(())
  }

  /// Start MPV with an empty playlist unless it is already running.
  pub async fn start_idle(&self) -> Result<(), MpvError> {
    if self.is_running() {
      return Ok(());
    }
    let _lifecycle = self.lifecycle.lock().await;
    // Another caller may have started it while we waited for the lock.
    if !self.is_running() {
      self.start_inner(None, true).await?;
    }
    Ok(())
  }

  /// Adopt an MPV instance that already serves the configured socket.
  pub async fn attach(&self) -> Result<(), MpvError> {
    let _lifecycle = self.lifecycle.lock().await;
    self.stop_inner().await;
    self.reset_properties();

    await_ready(
      &self.config.ipc_path,
      self.config.socket_timeout(),
      self.config.socket_poll_interval(),
    )
    .await?;

    *self.process.lock() = ProcessSlot::Attached;
    self.spawn_listener();
    log::info!("Attached to MPV at {}", self.config.ipc_path.display());
    Ok(())
  }

  /// Stop the listener and MPV, removing the socket of a spawned instance. Idempotent.
  pub async fn stop(&self) {
    let _lifecycle = self.lifecycle.lock().await;
    self.stop_inner().await;
  }

  async fn stop_inner(&self) {
    let listener = self.listener.lock().take();
    if let Some(listener) = listener {
      listener.cancel.cancel();
      if tokio::time::timeout(Duration::from_millis(100), listener.task)
        .await
        .is_err()
      {
        log::warn!("MPV event listener did not stop in time");
      }
    }

    let previous = std::mem::replace(&mut *self.process.lock(), ProcessSlot::Stopped);
    match previous {
      ProcessSlot::Running(child) => {
        terminate(child, self.config.stop_timeout()).await;
        // Only a socket created by our own child is ours to remove.
        if self.config.enable_ipc {
          cleanup_ipc(&self.config.ipc_path);
        }
      }
      ProcessSlot::Attached => {
        // The socket belongs to whoever started that instance.
        log::info!("Detached from MPV");
      }
      ProcessSlot::NotStarted => {
        *self.process.lock() = ProcessSlot::NotStarted;
      }
      ProcessSlot::Stopped => {}
    }
  }

  fn spawn_listener(&self) {
    let cancel = CancellationToken::new();
    let task = EventListener::new(
      self.transport.clone(),
      self.store.clone(),
      self.observer.clone(),
      self.event_tx.clone(),
      self.config.socket_timeout(),
    )
    .spawn(cancel.clone());
    *self.listener.lock() = Some(ListenerHandle { cancel, task });
  }

  fn reset_properties(&self) {
    self.store.update(TrackedProperty::PlaylistCount.name(), PropertyValue::Int(0));
    self.store.update(TrackedProperty::PlaylistPos.name(), PropertyValue::Null);
  }

  fn ipc_available(&self) -> bool {
    self.config.enable_ipc
      && matches!(
        &*self.process.lock(),
        ProcessSlot::Running(_) | ProcessSlot::Attached
      )
  }

  /// Fire-and-forget command. Silently does nothing without a process.
  pub async fn send(&self, cmd: MpvCommand) {
    if self.ipc_available() {
      log::debug!("Sending MPV command: {:?}", cmd.command);
      self.transport.send(cmd).await;
    }
  }

  /// Command with reply; `None` means the outcome is unknown.
  pub async fn request(&self, cmd: MpvCommand) -> Option<MpvResponse> {
    if !self.ipc_available() {
      return None;
    }
    self.transport.request(cmd, self.config.socket_timeout()).await
  }

  /// Command with reply, reporting why no reply was obtained.
  pub async fn command(&self, cmd: MpvCommand) -> Result<MpvResponse, MpvError> {
    if !self.ipc_available() {
      return Err(IpcError::Disconnected.into());
    }
    Ok(
      self
        .transport
        .try_request(&cmd, self.config.socket_timeout())
        .await?,
    )
  }

  /// Property value when MPV answered with success.
  pub async fn get_property(&self, name: &str) -> Option<serde_json::Value> {
    self
      .request(MpvCommand::get_property(name))
      .await
      .and_then(|r| r.into_data())
  }

  /// Non-empty string property.
  pub async fn get_string(&self, name: &str) -> Option<String> {
    match self.get_property(name).await? {
      serde_json::Value::String(s) if !s.is_empty() => Some(s),
      _ => None,
    }
  }

  /// Query a tracked property directly and refresh the cache with the answer.
  pub async fn query(&self, property: TrackedProperty) -> Option<i64> {
    let data = self.get_property(property.name()).await?;
    self.store.update(property.name(), data);
    self.store.get_int(property)
  }

  pub async fn wait_for_playlist_count(&self, expected: i64, timeout: Duration) -> bool {
    self.store.wait_for_playlist_count(expected, timeout).await
  }

  /// Replace the playlist with `target`, starting MPV if needed.
  pub async fn play(&self, target: &str) -> Result<(), MpvError> {
    if !self.config.enable_ipc {
      return self.start(Some(target), false).await;
    }
    self.start_idle().await?;
    self
      .send(MpvCommand::loadfile(target, LoadMode::Replace, None))
      .await;
    Ok(())
  }

  /// Toggle play/pause.
  pub async fn toggle_pause(&self) {
    self.send(MpvCommand::cycle("pause")).await;
  }
}
