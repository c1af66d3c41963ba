//! In-process stand-in for an MPV IPC server, used by tests.
//!
//! Implements the command subset the player and queue use, keeps a playlist,
//! answers `get_property`, and pushes `property-change`/`start-file` events
//! the way MPV does.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct Client {
  observed: HashSet<String>,
  tx: mpsc::UnboundedSender<String>,
}

#[derive(Default)]
pub struct FakeState {
  pub playlist: Vec<String>,
  pub pos: Option<usize>,
  /// Accept `loadfile` but never change the playlist.
  pub ignore_loads: bool,
  /// Every command received, in arrival order.
  pub commands: Vec<Vec<Value>>,
  clients: Vec<Option<Client>>,
}

impl FakeState {
  fn broadcast(&mut self, line: &str, property: Option<&str>) {
    for slot in self.clients.iter_mut() {
      let Some(client) = slot else { continue };
      if property.is_some_and(|p| !client.observed.contains(p)) {
        continue;
      }
      if client.tx.send(format!("{}\n", line)).is_err() {
        *slot = None;
      }
    }
  }

  fn count_changed(&mut self) {
    let line = json!({
      "event": "property-change",
      "id": 1,
      "name": "playlist-count",
      "data": self.playlist.len(),
    });
    self.broadcast(&line.to_string(), Some("playlist-count"));
  }

  fn start_file(&mut self, pos: usize) {
    self.pos = Some(pos);
    let line = json!({ "event": "start-file", "playlist-pos": pos });
    self.broadcast(&line.to_string(), None);
  }

  fn property(&self, name: &str) -> Option<Value> {
    match name {
      "playlist-count" => Some(json!(self.playlist.len())),
      "playlist-pos" => Some(self.pos.map(|p| json!(p)).unwrap_or(json!(-1))),
      _ => {
        let rest = name.strip_prefix("playlist/")?;
        let (index, field) = rest.split_once('/')?;
        let entry = self.playlist.get(index.parse::<usize>().ok()?)?;
        match field {
          "filename" | "path" => Some(json!(entry)),
          _ => None,
        }
      }
    }
  }

  fn apply(&mut self, client: usize, args: &[Value]) -> Result<Option<Value>, &'static str> {
    self.commands.push(args.to_vec());
    let name = args.first().and_then(Value::as_str).ok_or("invalid parameter")?;
    let index_arg = |i: usize| args.get(i).and_then(Value::as_u64).map(|v| v as usize);

    match name {
      "loadfile" => {
        if self.ignore_loads {
          return Ok(None);
        }
        let target = args.get(1).and_then(Value::as_str).ok_or("invalid parameter")?;
        let mode = args.get(2).and_then(Value::as_str).unwrap_or("replace");
        match mode {
          "replace" => {
            self.playlist = vec![target.to_string()];
            self.count_changed();
            self.start_file(0);
          }
          "append" | "append-play" => {
            self.playlist.push(target.to_string());
            self.count_changed();
            if mode == "append-play" && self.pos.is_none() {
              self.start_file(self.playlist.len() - 1);
            }
          }
          "insert-at" | "insert-at-play" => {
            let at = index_arg(3).unwrap_or(self.playlist.len()).min(self.playlist.len());
            self.playlist.insert(at, target.to_string());
            self.count_changed();
            if mode == "insert-at-play" {
              self.start_file(at);
            }
          }
          _ => return Err("invalid parameter"),
        }
        Ok(None)
      }
      "playlist-remove" => {
        let at = index_arg(1).ok_or("invalid parameter")?;
        if at >= self.playlist.len() {
          return Err("error running command");
        }
        self.playlist.remove(at);
        self.count_changed();
        Ok(None)
      }
      "playlist-move" => {
        let from = index_arg(1).ok_or("invalid parameter")?;
        let to = index_arg(2).ok_or("invalid parameter")?;
        if from >= self.playlist.len() || to > self.playlist.len() {
          return Err("error running command");
        }
        // MPV moves the entry in front of the entry currently at `to`.
        let entry = self.playlist.remove(from);
        let dest = if to > from { to - 1 } else { to };
        self.playlist.insert(dest, entry);
        Ok(None)
      }
      "set_property" => {
        let prop = args.get(1).and_then(Value::as_str).ok_or("invalid parameter")?;
        if prop != "playlist-pos" {
          return Err("property not found");
        }
        let at = index_arg(2).ok_or("invalid parameter")?;
        if at >= self.playlist.len() {
          return Err("unsupported format for accessing property");
        }
        self.start_file(at);
        Ok(None)
      }
      "get_property" => {
        let prop = args.get(1).and_then(Value::as_str).ok_or("invalid parameter")?;
        self.property(prop).map(Some).ok_or("property unavailable")
      }
      "observe_property" => {
        let prop = args.get(2).and_then(Value::as_str).ok_or("invalid parameter")?;
        let current = self.property(prop);
        if let Some(Some(client)) = self.clients.get_mut(client) {
          client.observed.insert(prop.to_string());
          let line = json!({
            "event": "property-change",
            "id": args.get(1).cloned().unwrap_or(Value::Null),
            "name": prop,
            "data": current,
          });
          let _ = client.tx.send(format!("{}\n", line));
        }
        Ok(None)
      }
      "cycle" => Ok(None),
      _ => Err("invalid parameter"),
    }
  }
}

pub struct FakeMpv {
  path: PathBuf,
  pub state: Arc<Mutex<FakeState>>,
  task: JoinHandle<()>,
}

impl FakeMpv {
  /// Bind a fake server at `path`.
  pub fn start(path: &Path) -> Self {
    let listener = UnixListener::bind(path).expect("bind fake mpv socket");
    let state = Arc::new(Mutex::new(FakeState::default()));
    let accept_state = state.clone();
    let task = tokio::spawn(async move {
      while let Ok((stream, _)) = listener.accept().await {
        tokio::spawn(serve(stream, accept_state.clone()));
      }
    });
    Self {
      path: path.to_path_buf(),
      state,
      task,
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn playlist(&self) -> Vec<String> {
    self.state.lock().playlist.clone()
  }

  pub fn set_playlist(&self, entries: &[&str]) {
    let mut state = self.state.lock();
    state.playlist = entries.iter().map(|e| e.to_string()).collect();
    state.count_changed();
  }

  pub fn commands_named(&self, name: &str) -> Vec<Vec<Value>> {
    self
      .state
      .lock()
      .commands
      .iter()
      .filter(|c| c.first().and_then(Value::as_str) == Some(name))
      .cloned()
      .collect()
  }
}

/// Poll `condition` for up to two seconds.
///
/// Fire-and-forget commands reach the fake on their own connections, so
/// their effects are only eventually visible.
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
  let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
  while tokio::time::Instant::now() < deadline {
    if condition() {
      return true;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  condition()
}

impl Drop for FakeMpv {
  fn drop(&mut self) {
    self.task.abort();
  }
}

async fn serve(stream: UnixStream, state: Arc<Mutex<FakeState>>) {
  let (reader, mut writer) = stream.into_split();
  let (tx, mut rx) = mpsc::unbounded_channel::<String>();
  let id = {
    let mut state = state.lock();
    state.clients.push(Some(Client {
      observed: HashSet::new(),
      tx: tx.clone(),
    }));
    state.clients.len() - 1
  };

  let writer_task = tokio::spawn(async move {
    while let Some(line) = rx.recv().await {
      if writer.write_all(line.as_bytes()).await.is_err() {
        break;
      }
    }
  });

  let mut lines = BufReader::new(reader).lines();
  while let Ok(Some(line)) = lines.next_line().await {
    let Ok(request) = serde_json::from_str::<Value>(&line) else {
      continue;
    };
    let args = request["command"].as_array().cloned().unwrap_or_default();
    let request_id = request.get("request_id").cloned().unwrap_or(json!(0));
    let reply = match state.lock().apply(id, &args) {
      Ok(data) => json!({ "error": "success", "data": data, "request_id": request_id }),
      Err(e) => json!({ "error": e, "request_id": request_id }),
    };
    let _ = tx.send(format!("{}\n", reply));
  }

  state.lock().clients[id] = None;
  drop(tx);
  let _ = writer_task.await;
}
