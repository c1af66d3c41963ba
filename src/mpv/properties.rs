//! Cached view of the mpv properties the controller observes.
//!
//! Updated by the event listener (pushed `property-change` events) and by
//! direct queries; read by anyone, and waited on by queue mutations that need
//! mpv to confirm a playlist change.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::protocol::PropertyValue;

/// Properties the listener subscribes to and the store normalizes to integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedProperty {
  PlaylistCount,
  PlaylistPos,
}

impl TrackedProperty {
  pub const ALL: [TrackedProperty; 2] = [
    TrackedProperty::PlaylistCount,
    TrackedProperty::PlaylistPos,
  ];

  pub fn name(self) -> &'static str {
    match self {
      TrackedProperty::PlaylistCount => "playlist-count",
      TrackedProperty::PlaylistPos => "playlist-pos",
    }
  }

  /// Observer id used with `observe_property`.
  pub fn observer_id(self) -> i64 {
    match self {
      TrackedProperty::PlaylistCount => 1,
      TrackedProperty::PlaylistPos => 2,
    }
  }

  pub fn from_name(name: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|p| p.name() == name)
  }
}

/// Coerce a raw value for a tracked property to `Int` or `Null`.
fn normalize_int(raw: PropertyValue) -> PropertyValue {
  match raw {
    PropertyValue::Int(n) => PropertyValue::Int(n),
    PropertyValue::Number(f) if f.is_finite() => PropertyValue::Int(f.trunc() as i64),
    PropertyValue::String(s) => s
      .trim()
      .parse::<i64>()
      .map(PropertyValue::Int)
      .unwrap_or(PropertyValue::Null),
    _ => PropertyValue::Null,
  }
}

struct StoreState {
  values: HashMap<String, PropertyValue>,
  /// Number of times waiters have been woken.
  version: u64,
}

/// Mutex/notify protected map of property name to last known value.
pub struct PropertyStore {
  state: Mutex<StoreState>,
  changed: Notify,
}

impl Default for PropertyStore {
  fn default() -> Self {
    Self::new()
  }
}

impl PropertyStore {
  pub fn new() -> Self {
    let mut values = HashMap::new();
    values.insert(
      TrackedProperty::PlaylistCount.name().to_string(),
      PropertyValue::Int(0),
    );
    values.insert(
      TrackedProperty::PlaylistPos.name().to_string(),
      PropertyValue::Null,
    );
    Self {
      state: Mutex::new(StoreState { values, version: 0 }),
      changed: Notify::new(),
    }
  }

  /// Store a value, waking waiters only if it differs from the previous one.
  ///
  /// Returns whether the stored value changed.
  pub fn update(&self, name: &str, raw: impl Into<PropertyValue>) -> bool {
    let raw = raw.into();
    let value = if TrackedProperty::from_name(name).is_some() {
      normalize_int(raw)
    } else {
      raw
    };

    {
      let mut state = self.state.lock();
      if state.values.get(name) == Some(&value) {
        return false;
      }
      log::debug!("Property {} -> {:?}", name, value);
      state.values.insert(name.to_string(), value);
      state.version += 1;
    }
    self.changed.notify_waiters();
    true
  }

  /// Snapshot read.
  pub fn get(&self, name: &str) -> Option<PropertyValue> {
    self.state.lock().values.get(name).cloned()
  }

  /// Snapshot of a tracked integer property; `None` when absent.
  pub fn get_int(&self, property: TrackedProperty) -> Option<i64> {
    self.get(property.name()).and_then(|v| v.as_i64())
  }

  /// Last known playlist count (0 when unknown).
  pub fn playlist_count(&self) -> i64 {
    self.get_int(TrackedProperty::PlaylistCount).unwrap_or(0)
  }

  /// How many updates have woken waiters so far.
  pub fn version(&self) -> u64 {
    self.state.lock().version
  }

  /// Wait until `predicate(playlist-count)` holds or `timeout` elapses.
  ///
  /// Re-checks on every wake. Returns whether the predicate was met.
  pub async fn wait_until<F>(&self, predicate: F, timeout: Duration) -> bool
  where
    F: Fn(i64) -> bool,
  {
    let deadline = Instant::now() + timeout;
    loop {
      // Register interest before checking so an update in between is not lost.
      let notified = self.changed.notified();
      tokio::pin!(notified);
      notified.as_mut().enable();

      if predicate(self.playlist_count()) {
        return true;
      }
      if tokio::time::timeout_at(deadline, notified).await.is_err() {
        return predicate(self.playlist_count());
      }
    }
  }

  /// Wait until mpv reports at least `expected` playlist entries.
  pub async fn wait_for_playlist_count(&self, expected: i64, timeout: Duration) -> bool {
    self.wait_until(|count| count >= expected, timeout).await
  }
}
