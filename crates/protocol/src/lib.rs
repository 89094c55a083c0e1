//! Control Room Protocol
//!
//! Shared types for communication between the agent runtime's web API and
//! control-room clients. Stream events are JSON text frames over a single
//! WebSocket; entity types mirror the REST payloads under `/api/v1`.

use uuid::Uuid;

// Re-exports
pub mod client;
pub mod frame;
pub mod server;
pub mod types;

pub use client::ClientMessage;
pub use frame::{decode_frame, FrameError, WsEvent};
pub use server::{ServerEvent, Usage};
pub use types::*;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
