//! Application-side play queue mirrored into MPV's playlist.
//!
//! MPV owns the real playlist and only confirms edits asynchronously through
//! `playlist-count`. Every mutation here edits the local copy first, sends the
//! matching command, then waits (bounded) for the count to move. A timed-out
//! confirmation is logged and the queue proceeds optimistically; drift is
//! repaired by [`QueueManager::sync_from_external`], which rebuilds the local
//! queue from MPV.
//!
//! Count-based confirmation cannot tell our edit apart from a concurrent one,
//! so a confirmed count is a hint, not proof that a specific entry landed.

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::mpv::{
  EventKind, LoadMode, MpvCommand, MpvError, MpvEvent, Player, PropertyValue, TrackedProperty,
};

/// Pause after an append that MPV did not confirm in time.
const UNCONFIRMED_APPEND_PAUSE: Duration = Duration::from_millis(100);

/// Ordered queue of absolute paths and stream URLs.
#[derive(Clone)]
pub struct QueueManager {
  player: Arc<Player>,
  queue: Arc<Mutex<Vec<String>>>,
  current_pos: Arc<Mutex<Option<i64>>>,
  loading: Arc<AtomicBool>,
  event_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

/// Clears the loading flag on every exit path of a bulk load.
struct LoadingGuard(Arc<AtomicBool>);

impl LoadingGuard {
  fn set(flag: &Arc<AtomicBool>) -> Self {
    flag.store(true, Ordering::SeqCst);
    Self(flag.clone())
  }
}

impl Drop for LoadingGuard {
  fn drop(&mut self) {
    self.0.store(false, Ordering::SeqCst);
  }
}

/// True for `scheme://...` locators such as http(s) streams.
fn is_url(locator: &str) -> bool {
  match locator.split_once("://") {
    Some((scheme, _)) => {
      !scheme.is_empty()
        && scheme
          .chars()
          .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    }
    None => false,
  }
}

/// Make a filesystem path absolute and lexically normalized; URLs pass through.
pub fn normalize_locator(locator: &str) -> String {
  if is_url(locator) {
    return locator.to_string();
  }

  let path = Path::new(locator);
  let joined = if path.is_absolute() {
    path.to_path_buf()
  } else {
    match std::env::current_dir() {
      Ok(cwd) => cwd.join(path),
      Err(e) => {
        log::warn!("Cannot resolve {} against the working directory: {}", locator, e);
        path.to_path_buf()
      }
    }
  };

  let mut normalized = PathBuf::new();
  for component in joined.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => {
        normalized.pop();
      }
      other => normalized.push(other.as_os_str()),
    }
  }
  normalized.to_string_lossy().into_owned()
}

impl QueueManager {
  pub fn new(player: Arc<Player>) -> Self {
    Self {
      player,
      queue: Arc::new(Mutex::new(Vec::new())),
      current_pos: Arc::new(Mutex::new(None)),
      loading: Arc::new(AtomicBool::new(false)),
      event_task: Arc::new(Mutex::new(None)),
    }
  }

  pub fn player(&self) -> &Arc<Player> {
    &self.player
  }

  /// Copy of the local queue.
  pub fn snapshot(&self) -> Vec<String> {
    self.queue.lock().clone()
  }

  pub fn len(&self) -> usize {
    self.queue.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.queue.lock().is_empty()
  }

  /// Position from the last `start-file` event; may be stale.
  pub fn cached_position(&self) -> Option<i64> {
    *self.current_pos.lock()
  }

  /// Follow MPV events: track the playing index and resync on each new file.
  pub fn start_event_sync(&self) {
    let mut slot = self.event_task.lock();
    if slot.as_ref().is_some_and(|task| !task.is_finished()) {
      return;
    }
    let events = self.player.events();
    let queue = self.clone();
    *slot = Some(tokio::spawn(async move {
      while let Ok(event) = events.recv().await {
        queue.handle_event(&event).await;
      }
    }));
  }

  pub fn stop_event_sync(&self) {
    if let Some(task) = self.event_task.lock().take() {
      task.abort();
    }
  }

  async fn handle_event(&self, event: &MpvEvent) {
    if event.kind() != EventKind::StartFile {
      return;
    }
    let pos = event
      .playlist_pos
      .clone()
      .map(PropertyValue::from)
      .and_then(|v| v.as_i64());
    *self.current_pos.lock() = pos;

    if self.loading.load(Ordering::SeqCst) {
      return;
    }
    let fallback = self.snapshot();
    self.sync_from_external(fallback).await;
  }

  async fn playlist_count(&self) -> i64 {
    match self.player.query(TrackedProperty::PlaylistCount).await {
      Some(count) => count,
      None => self.player.store().playlist_count(),
    }
  }

  /// Replace the queue with `locators` and start playing the first one.
  ///
  /// Only fails when MPV cannot be started.
  pub async fn load_queue<S: AsRef<str>>(&self, locators: &[S]) -> Result<(), MpvError> {
    if locators.is_empty() {
      return Ok(());
    }
    let targets: Vec<String> = locators
      .iter()
      .map(|l| normalize_locator(l.as_ref()))
      .collect();

    if !self.player.config().enable_ipc {
      self.player.play(&targets[0]).await?;
      *self.queue.lock() = targets;
      return Ok(());
    }

    let _loading = LoadingGuard::set(&self.loading);
    self.player.start_idle().await?;

    let confirm = self.player.config().confirm_timeout();
    self
      .player
      .send(MpvCommand::loadfile(&targets[0], LoadMode::Replace, None))
      .await;

    // A replace leaves exactly one entry; waiting for `>= 1` would pass on a stale count.
    if !self
      .player
      .store()
      .wait_until(|count| count == 1, confirm)
      .await
    {
      log::warn!("MPV did not report 1 playlist item in time");
    }

    let mut base = self.playlist_count().await;
    for target in &targets[1..] {
      self
        .player
        .send(MpvCommand::loadfile(target, LoadMode::Append, None))
        .await;
      let wanted = base + 1;
      if self.player.wait_for_playlist_count(wanted, confirm).await {
        base = wanted;
      } else {
        log::warn!("Append not observed in time for {}", target);
        tokio::time::sleep(UNCONFIRMED_APPEND_PAUSE).await;
      }
    }

    self.sync_from_external(targets).await;
    Ok(())
  }

  /// Append to the end of the queue, optionally playing it right away.
  pub async fn append(&self, locator: &str, play_now: bool) {
    let target = normalize_locator(locator);
    self.queue.lock().push(target.clone());

    let before = if play_now {
      None
    } else {
      Some(self.playlist_count().await)
    };
    self
      .player
      .send(MpvCommand::loadfile(&target, LoadMode::append(play_now), None))
      .await;

    if let Some(before) = before {
      self.confirm_growth(before, &target).await;
    }
  }

  /// Insert before `index`; at or past the end this is a plain append.
  pub async fn insert_at(&self, index: usize, locator: &str, play_now: bool) {
    let target = normalize_locator(locator);
    let past_end = {
      let mut queue = self.queue.lock();
      if index >= queue.len() {
        true
      } else {
        queue.insert(index, target.clone());
        false
      }
    };
    if past_end {
      return self.append(locator, play_now).await;
    }

    let before = self.playlist_count().await;
    self
      .player
      .send(MpvCommand::loadfile(
        &target,
        LoadMode::insert(play_now),
        Some(index),
      ))
      .await;
    self.confirm_growth(before, &target).await;
  }

  async fn confirm_growth(&self, before: i64, target: &str) {
    let timeout = self.player.config().append_confirm_timeout();
    if !self.player.wait_for_playlist_count(before + 1, timeout).await {
      log::warn!("MPV did not confirm {} in time", target);
    }
  }

  /// Remove by index. Out-of-range indices are ignored.
  pub async fn remove_at(&self, index: usize) {
    {
      let mut queue = self.queue.lock();
      if index >= queue.len() {
        return;
      }
      queue.remove(index);
    }
    self.player.send(MpvCommand::playlist_remove(index)).await;
  }

  /// Remove the first entry matching `locator`, resyncing once on a miss.
  ///
  /// Returns whether an entry was removed.
  pub async fn remove_path(&self, locator: &str) -> bool {
    let target = normalize_locator(locator);
    let position = |queue: &[String]| queue.iter().position(|entry| *entry == target);

    let mut index = position(self.queue.lock().as_slice());
    if index.is_none() {
      let fallback = self.snapshot();
      self.sync_from_external(fallback).await;
      index = position(self.queue.lock().as_slice());
    }

    match index {
      Some(index) => {
        self.remove_at(index).await;
        true
      }
      None => {
        log::debug!("{} is not queued", target);
        false
      }
    }
  }

  /// Move the entry at `old_index` so that it ends up at `new_index`.
  pub async fn move_item(&self, old_index: usize, new_index: usize) {
    let new_index = {
      let mut queue = self.queue.lock();
      if old_index >= queue.len() {
        return;
      }
      let entry = queue.remove(old_index);
      let new_index = new_index.min(queue.len());
      queue.insert(new_index, entry);
      new_index
    };

    // MPV places the entry in front of the one currently at the target index.
    let mpv_target = if new_index > old_index {
      new_index + 1
    } else {
      new_index
    };
    self
      .player
      .send(MpvCommand::playlist_move(old_index, mpv_target))
      .await;
  }

  /// Jump playback to `index`.
  pub async fn play_index(&self, index: usize) {
    self.player.send(MpvCommand::set_playlist_pos(index)).await;
  }

  /// Playing index as reported by MPV, `None` when unknown or idle.
  pub async fn current_index(&self) -> Option<i64> {
    self
      .player
      .query(TrackedProperty::PlaylistPos)
      .await
      .filter(|pos| *pos >= 0)
  }

  /// Rebuild the local queue from MPV's playlist.
  ///
  /// Falls back to `fallback` when nothing could be read back.
  pub async fn sync_from_external(&self, fallback: Vec<String>) {
    let count = self.player.query(TrackedProperty::PlaylistCount).await.unwrap_or(0);

    let mut recovered = Vec::new();
    for i in 0..count.max(0) {
      if let Some(entry) = self.slot_locator(i).await {
        recovered.push(entry);
      }
    }

    let mut queue = self.queue.lock();
    if recovered.is_empty() {
      log::debug!("Playlist sync recovered nothing, using {} fallback entries", fallback.len());
      *queue = fallback;
    } else {
      log::debug!("Playlist sync recovered {} entries", recovered.len());
      *queue = recovered;
    }
  }

  async fn slot_locator(&self, index: i64) -> Option<String> {
    for field in ["filename", "path", "title"] {
      if let Some(value) = self
        .player
        .get_string(&format!("playlist/{}/{}", index, field))
        .await
      {
        return Some(value);
      }
    }
    None
  }
}
