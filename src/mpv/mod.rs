//! MPV IPC module - supervises an external MPV player and drives it via JSON IPC.
//!
//! Architecture:
//! - `process.rs` - MPV binary detection, argument building, spawning and teardown
//! - `ipc.rs` - Transient Unix socket connections (fire-and-forget and request/reply)
//! - `protocol.rs` - JSON command/response/event types and serialization
//! - `properties.rs` - Cached playlist properties with bounded waits
//! - `listener.rs` - Background event connection feeding the property cache
//! - `client.rs` - High-level player tying the pieces together

mod client;
#[cfg(test)]
pub(crate) mod fake;
mod ipc;
mod listener;
mod process;
mod properties;
mod protocol;

pub use client::{MpvError, Player, ProcessStatus};
pub use ipc::{IpcError, Transport};
pub use listener::EventObserver;
pub use process::{find_mpv, ProcessError};
pub use properties::{PropertyStore, TrackedProperty};
pub use protocol::{EventKind, LoadMode, MpvCommand, MpvEvent, MpvResponse, PropertyValue};
