//! Control-room client core
//!
//! - `run_stream`: pure reducer folding stream events into per-run state
//! - `socket`: stream socket actor with reconnect backoff
//! - `api`: REST client for the control-room endpoints
//! - `data`: REST-backed caches and notices
//! - `control_room`: composes the data layer with the socket

pub mod api;
pub mod config;
pub mod control_room;
pub mod data;
pub mod run_stream;
pub mod socket;

#[cfg(test)]
mod test_support;

pub use api::{ApiClient, ApiError};
pub use config::{ClientConfig, ConfigError, ConfigOverrides};
pub use control_room::{select_runs_for_session, ControlRoom};
pub use data::{ControlRoomData, Notice, NoticeKind};
pub use run_stream::{reduce, RunAction, RunStatus, RunStreamState, StreamRun, ToolActivityStep};
pub use socket::{ConnectionState, SocketHandle, SocketManager, SocketNotice, SocketSnapshot};

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
