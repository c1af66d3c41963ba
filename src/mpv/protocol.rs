//! MPV JSON IPC protocol types.
//!
//! Reference: https://mpv.io/manual/master/#json-ipc

use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// Global request ID counter for unique command identification.
static REQUEST_ID: AtomicI64 = AtomicI64::new(1);

/// Generate a unique request ID for MPV commands.
pub fn next_request_id() -> i64 {
  REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

/// How `loadfile` places the new entry in mpv's playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
  Replace,
  Append,
  AppendPlay,
  InsertAt,
  InsertAtPlay,
}

impl LoadMode {
  pub fn as_str(self) -> &'static str {
    match self {
      LoadMode::Replace => "replace",
      LoadMode::Append => "append",
      LoadMode::AppendPlay => "append-play",
      LoadMode::InsertAt => "insert-at",
      LoadMode::InsertAtPlay => "insert-at-play",
    }
  }

  /// Append variant, optionally starting playback of the new entry.
  pub fn append(play_now: bool) -> Self {
    if play_now {
      LoadMode::AppendPlay
    } else {
      LoadMode::Append
    }
  }

  /// Insert variant, optionally starting playback of the new entry.
  pub fn insert(play_now: bool) -> Self {
    if play_now {
      LoadMode::InsertAtPlay
    } else {
      LoadMode::InsertAt
    }
  }
}

/// Command sent to MPV via IPC.
#[derive(Debug, Clone, Serialize)]
pub struct MpvCommand {
  pub command: Vec<serde_json::Value>,
  pub request_id: i64,
}

impl MpvCommand {
  /// Create a new command with auto-generated request ID.
  pub fn new(args: Vec<serde_json::Value>) -> Self {
    Self {
      command: args,
      request_id: next_request_id(),
    }
  }

  /// Load a file or URL into the playlist.
  ///
  /// `index` is only sent for the insert modes.
  pub fn loadfile(target: &str, mode: LoadMode, index: Option<usize>) -> Self {
    let mut args = vec!["loadfile".into(), target.into(), mode.as_str().into()];
    if matches!(mode, LoadMode::InsertAt | LoadMode::InsertAtPlay) {
      if let Some(index) = index {
        args.push((index as u64).into());
      }
    }
    Self::new(args)
  }

  /// Remove a playlist entry by index.
  pub fn playlist_remove(index: usize) -> Self {
    Self::new(vec!["playlist-remove".into(), (index as u64).into()])
  }

  /// Move the playlist entry at `from` so it ends up before `to`.
  pub fn playlist_move(from: usize, to: usize) -> Self {
    Self::new(vec![
      "playlist-move".into(),
      (from as u64).into(),
      (to as u64).into(),
    ])
  }

  /// Jump playback to a playlist index.
  pub fn set_playlist_pos(index: usize) -> Self {
    Self::new(vec![
      "set_property".into(),
      "playlist-pos".into(),
      (index as u64).into(),
    ])
  }

  /// Observe a property for changes.
  pub fn observe_property(id: i64, name: &str) -> Self {
    Self::new(vec!["observe_property".into(), id.into(), name.into()])
  }

  /// Get a property value.
  pub fn get_property(name: &str) -> Self {
    Self::new(vec!["get_property".into(), name.into()])
  }

  /// Cycle (toggle) a property.
  pub fn cycle(property: &str) -> Self {
    Self::new(vec!["cycle".into(), property.into()])
  }

  /// Serialize as one newline-terminated JSON line.
  pub fn to_line(&self) -> Result<Vec<u8>, serde_json::Error> {
    let mut line = serde_json::to_vec(self)?;
    line.push(b'\n');
    Ok(line)
  }
}

/// Response from MPV for a command.
#[derive(Debug, Clone, Deserialize)]
pub struct MpvResponse {
  /// "success" or error message.
  pub error: String,
  /// Response data (command-specific).
  #[serde(default)]
  pub data: Option<serde_json::Value>,
  /// Matching request ID (0 when the command carried none).
  #[serde(default)]
  pub request_id: i64,
}

impl MpvResponse {
  /// Check if the command succeeded.
  pub fn is_success(&self) -> bool {
    self.error == "success"
  }

  /// Payload of a successful reply. Failed replies carry no meaningful data.
  pub fn into_data(self) -> Option<serde_json::Value> {
    if self.is_success() {
      self.data.filter(|v| !v.is_null())
    } else {
      None
    }
  }
}

/// Event sent by MPV (property changes, playback events, etc.).
#[derive(Debug, Clone, Deserialize)]
pub struct MpvEvent {
  /// Event type (e.g., "property-change", "start-file", "end-file").
  pub event: String,
  /// Observer ID for property-change events.
  #[serde(default)]
  pub id: Option<i64>,
  /// Property name for property-change events.
  #[serde(default)]
  pub name: Option<String>,
  /// Event data.
  #[serde(default)]
  pub data: Option<serde_json::Value>,
  /// Reason for end-file events (e.g., "eof", "stop", "quit", "error").
  #[serde(default)]
  pub reason: Option<String>,
  /// Playlist index carried by some start-file events.
  #[serde(default, rename = "playlist-pos")]
  pub playlist_pos: Option<serde_json::Value>,
}

impl MpvEvent {
  pub fn kind(&self) -> EventKind {
    match self.event.as_str() {
      "property-change" => EventKind::PropertyChange,
      "start-file" => EventKind::StartFile,
      "end-file" => EventKind::EndFile,
      _ => EventKind::Other,
    }
  }
}

/// Events the controller reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
  PropertyChange,
  StartFile,
  EndFile,
  Other,
}

/// Typed property values from MPV.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
  Bool(bool),
  Int(i64),
  Number(f64),
  String(String),
  /// Arrays and objects, kept as-is.
  Json(serde_json::Value),
  Null,
}

impl PropertyValue {
  pub fn as_i64(&self) -> Option<i64> {
    match self {
      PropertyValue::Int(n) => Some(*n),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      PropertyValue::String(s) => Some(s),
      _ => None,
    }
  }

  pub fn is_null(&self) -> bool {
    matches!(self, PropertyValue::Null)
  }
}

impl From<serde_json::Value> for PropertyValue {
  fn from(value: serde_json::Value) -> Self {
    match value {
      serde_json::Value::Bool(b) => PropertyValue::Bool(b),
      serde_json::Value::Number(n) => match n.as_i64() {
        Some(i) => PropertyValue::Int(i),
        None => PropertyValue::Number(n.as_f64().unwrap_or(0.0)),
      },
      serde_json::Value::String(s) => PropertyValue::String(s),
      serde_json::Value::Array(_) | serde_json::Value::Object(_) => PropertyValue::Json(value),
      serde_json::Value::Null => PropertyValue::Null,
    }
  }
}

/// Message received from MPV IPC (either response or event).
#[derive(Debug, Clone)]
pub enum MpvMessage {
  Response(MpvResponse),
  Event(MpvEvent),
}

impl MpvMessage {
  /// Parse a JSON line from MPV.
  pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(line)?;
    if value.get("event").is_some() {
      Ok(MpvMessage::Event(serde_json::from_value(value)?))
    } else if value.get("error").is_some() {
      Ok(MpvMessage::Response(serde_json::from_value(value)?))
    } else {
      Err(serde_json::Error::custom(
        "message is neither an event nor a reply",
      ))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_command_serialization() {
    let cmd = MpvCommand::loadfile("http://example.com/a.mp3", LoadMode::Append, None);
    let json: serde_json::Value = serde_json::from_slice(&cmd.to_line().unwrap()).unwrap();
    assert_eq!(
      json["command"],
      serde_json::json!(["loadfile", "http://example.com/a.mp3", "append"])
    );
    assert_eq!(json["request_id"], cmd.request_id);
  }

  #[test]
  fn test_insert_carries_index() {
    let cmd = MpvCommand::loadfile("/m/a.flac", LoadMode::InsertAtPlay, Some(2));
    assert_eq!(
      serde_json::Value::Array(cmd.command),
      serde_json::json!(["loadfile", "/m/a.flac", "insert-at-play", 2])
    );

    // index is meaningless for append and must not leak into the command
    let cmd = MpvCommand::loadfile("/m/a.flac", LoadMode::Append, Some(2));
    assert_eq!(cmd.command.len(), 3);
  }

  #[test]
  fn test_line_is_newline_terminated() {
    let line = MpvCommand::cycle("pause").to_line().unwrap();
    assert_eq!(line.last(), Some(&b'\n'));
    assert_eq!(line.iter().filter(|b| **b == b'\n').count(), 1);
  }

  #[test]
  fn test_response_parsing() {
    let json = r#"{"error":"success","data":3,"request_id":1}"#;
    match MpvMessage::parse(json).unwrap() {
      MpvMessage::Response(r) => {
        assert!(r.is_success());
        assert_eq!(r.request_id, 1);
        assert_eq!(r.into_data(), Some(serde_json::json!(3)));
      }
      _ => panic!("Expected response"),
    }
  }

  #[test]
  fn test_failed_response_has_no_data() {
    let json = r#"{"error":"property unavailable","data":5}"#;
    match MpvMessage::parse(json).unwrap() {
      MpvMessage::Response(r) => {
        assert!(!r.is_success());
        assert_eq!(r.request_id, 0);
        assert_eq!(r.into_data(), None);
      }
      _ => panic!("Expected response"),
    }
  }

  #[test]
  fn test_event_parsing() {
    let json = r#"{"event":"property-change","id":1,"name":"playlist-count","data":4}"#;
    match MpvMessage::parse(json).unwrap() {
      MpvMessage::Event(e) => {
        assert_eq!(e.kind(), EventKind::PropertyChange);
        assert_eq!(e.name.as_deref(), Some("playlist-count"));
      }
      _ => panic!("Expected event"),
    }

    let json = r#"{"event":"start-file","playlist_entry_id":3,"playlist-pos":2}"#;
    match MpvMessage::parse(json).unwrap() {
      MpvMessage::Event(e) => {
        assert_eq!(e.kind(), EventKind::StartFile);
        assert_eq!(e.playlist_pos, Some(serde_json::json!(2)));
      }
      _ => panic!("Expected event"),
    }
  }

  #[test]
  fn test_garbage_is_rejected() {
    assert!(MpvMessage::parse(r#"{"event":"#).is_err());
    assert!(MpvMessage::parse(r#"{"hello":1}"#).is_err());
    assert!(MpvMessage::parse("[1,2]").is_err());
  }

  #[test]
  fn test_property_value_conversion() {
    assert_eq!(PropertyValue::from(serde_json::json!(7)).as_i64(), Some(7));
    assert_eq!(PropertyValue::from(serde_json::json!(1.5)), PropertyValue::Number(1.5));
    assert_eq!(
      PropertyValue::from(serde_json::json!("x")).as_str(),
      Some("x")
    );
    assert!(PropertyValue::from(serde_json::Value::Null).is_null());
  }
}
