//! Long-lived event connection to MPV.
//!
//! Subscribes to the tracked playlist properties and streams
//! newline-delimited events into the [`PropertyStore`], reconnecting with a
//! short backoff whenever the socket goes away.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::ipc::{self, IpcError, Transport};
use super::properties::{PropertyStore, TrackedProperty};
use super::protocol::{EventKind, MpvCommand, MpvEvent, MpvMessage, PropertyValue};

/// Backoff while the socket does not exist yet or refuses connections.
const CONNECT_BACKOFF: Duration = Duration::from_millis(50);
/// Backoff after any other I/O failure.
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Receives every event decoded by the listener.
pub trait EventObserver: Send + Sync {
  fn on_event(&self, event: &MpvEvent);
}

impl<F> EventObserver for F
where
  F: Fn(&MpvEvent) + Send + Sync,
{
  fn on_event(&self, event: &MpvEvent) {
    self(event)
  }
}

/// Observer slot shared between the player and its listener.
pub type ObserverSlot = Arc<RwLock<Option<Arc<dyn EventObserver>>>>;

/// Background reader for one MPV process instance.
pub struct EventListener {
  transport: Transport,
  store: Arc<PropertyStore>,
  observer: ObserverSlot,
  event_tx: async_channel::Sender<MpvEvent>,
  request_timeout: Duration,
}

impl EventListener {
  pub fn new(
    transport: Transport,
    store: Arc<PropertyStore>,
    observer: ObserverSlot,
    event_tx: async_channel::Sender<MpvEvent>,
    request_timeout: Duration,
  ) -> Self {
    Self {
      transport,
      store,
      observer,
      event_tx,
      request_timeout,
    }
  }

  /// Run until `cancel` fires.
  pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move { self.run(cancel).await })
  }

  async fn run(self, cancel: CancellationToken) {
    log::info!("MPV event listener started");

    while !cancel.is_cancelled() {
      let connected = tokio::select! {
        _ = cancel.cancelled() => break,
        result = ipc::connect(self.transport.path()) => result,
      };

      let backoff = match connected {
        Ok(stream) => match self.serve(stream, &cancel).await {
          Ok(()) => CONNECT_BACKOFF,
          Err(e) => {
            log::debug!("MPV event connection lost: {}", e);
            ERROR_BACKOFF
          }
        },
        Err(IpcError::ConnectionFailed(e))
          if matches!(
            e.kind(),
            std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
          ) =>
        {
          CONNECT_BACKOFF
        }
        Err(e) => {
          log::debug!("MPV event connect failed: {}", e);
          ERROR_BACKOFF
        }
      };

      tokio::select! {
        _ = cancel.cancelled() => break,
        _ = tokio::time::sleep(backoff) => {}
      }
    }

    log::info!("MPV event listener stopped");
  }

  /// Subscribe, then decode lines until EOF, error or cancellation.
  async fn serve(&self, stream: UnixStream, cancel: &CancellationToken) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();

    for property in TrackedProperty::ALL {
      let cmd = MpvCommand::observe_property(property.observer_id(), property.name());
      let line = cmd.to_line().map_err(std::io::Error::other)?;
      writer.write_all(&line).await?;
    }
    writer.flush().await?;
    log::debug!("MPV event listener subscribed");

    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
      buf.clear();
      let n = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        n = reader.read_until(b'\n', &mut buf) => n?,
      };
      if n == 0 {
        log::info!("MPV event connection closed");
        return Ok(());
      }
      // A line without its newline is a truncated write; drop it.
      if buf.last() != Some(&b'\n') {
        continue;
      }
      let line = String::from_utf8_lossy(&buf);
      self.handle_line(line.trim()).await;
    }
  }

  async fn handle_line(&self, line: &str) {
    if line.is_empty() {
      return;
    }
    match MpvMessage::parse(line) {
      Ok(MpvMessage::Event(event)) => self.dispatch(event).await,
      Ok(MpvMessage::Response(response)) => {
        if !response.is_success() {
          log::warn!("MPV rejected subscription: {}", response.error);
        }
      }
      Err(e) => log::debug!("Discarding malformed MPV line: {} - {}", e, line),
    }
  }

  async fn dispatch(&self, event: MpvEvent) {
    self.notify_observer(&event);

    match event.kind() {
      EventKind::PropertyChange => {
        if let Some(name) = &event.name {
          let value = event.data.clone().map(PropertyValue::from).unwrap_or(PropertyValue::Null);
          self.store.update(name, value);
        }
      }
      EventKind::StartFile => {
        if let Some(pos) = event.playlist_pos.clone() {
          self.store.update(TrackedProperty::PlaylistPos.name(), pos);
        }
        self.refresh_count().await;
      }
      EventKind::EndFile => self.refresh_count().await,
      EventKind::Other => {}
    }

    // The player keeps one receiver around only to hand out clones.
    if self.event_tx.receiver_count() <= 1 {
      return;
    }
    if let Err(e) = self.event_tx.try_send(event) {
      log::debug!("Dropping MPV event for queue sync: {}", e);
    }
  }

  fn notify_observer(&self, event: &MpvEvent) {
    let observer = self.observer.read().clone();
    if let Some(observer) = observer {
      if catch_unwind(AssertUnwindSafe(|| observer.on_event(event))).is_err() {
        log::error!("MPV event observer panicked on {} event", event.event);
      }
    }
  }

  async fn refresh_count(&self) {
    let name = TrackedProperty::PlaylistCount.name();
    let data = self
      .transport
      .request(MpvCommand::get_property(name), self.request_timeout)
      .await
      .and_then(|r| r.into_data());
    if let Some(data) = data {
      self.store.update(name, data);
    }
  }
}
