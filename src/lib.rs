use std::sync::Arc;
use std::time::Duration;

mod config;
mod mpv;
mod queue;

pub use config::{default_config_path, AppConfig, ConfigError};
pub use mpv::{
  find_mpv, EventKind, EventObserver, IpcError, LoadMode, MpvCommand, MpvError, MpvEvent,
  MpvResponse, Player, ProcessError, ProcessStatus, PropertyStore, PropertyValue,
  TrackedProperty, Transport,
};
pub use queue::{normalize_locator, QueueManager};

/// How often the session checks whether MPV is still alive.
const LIVENESS_INTERVAL: Duration = Duration::from_millis(500);

/// Play `targets` as a queue until MPV exits or Ctrl-C is pressed.
pub async fn run(targets: Vec<String>) -> Result<(), MpvError> {
  let config_path = default_config_path();
  let config = Arc::new(AppConfig::load(&config_path)?);
  log::info!("Loaded config from {}", config_path.display());

  let player = Arc::new(Player::new(config));
  player.set_observer(|event: &MpvEvent| {
    log::debug!("MPV event: {}", event.event);
  });

  let queue = QueueManager::new(player.clone());
  queue.start_event_sync();

  if targets.is_empty() {
    player.start_idle().await?;
  } else {
    queue.load_queue(targets.as_slice()).await?;
  }
  log::info!("Queued {} item(s)", queue.len());

  let mut liveness = tokio::time::interval(LIVENESS_INTERVAL);
  loop {
    tokio::select! {
      result = tokio::signal::ctrl_c() => {
        if let Err(e) = result {
          log::error!("Failed to listen for Ctrl-C: {}", e);
        }
        break;
      }
      _ = liveness.tick() => {
        if !player.is_running() {
          log::info!("MPV exited");
          break;
        }
      }
    }
  }

  queue.stop_event_sync();
  player.stop().await;
  Ok(())
}
