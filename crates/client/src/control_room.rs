//! Control-room state composer
//!
//! Ties the REST-backed data layer to the stream socket: selecting a
//! session loads its detail and subscribes, `session.updated` refreshes the
//! list, socket errors become notices.

use controlroom_protocol::SessionDetail;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::api::ApiError;
use crate::config::ClientConfig;
use crate::data::{ControlRoomData, Notice};
use crate::run_stream::{RunStreamState, StreamRun};
use crate::socket::{SocketError, SocketHandle, SocketManager, SocketNotice};

#[derive(Debug, Error)]
pub enum ControlRoomError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Socket(#[from] SocketError),
}

/// Runs of one session, in arrival order.
pub fn select_runs_for_session<'a>(state: &'a RunStreamState, session_key: &str) -> Vec<&'a StreamRun> {
    state
        .iter()
        .filter(|run| run.session_key == session_key)
        .collect()
}

pub struct ControlRoom {
    data: ControlRoomData,
    socket: SocketHandle,
}

impl ControlRoom {
    pub fn new(data: ControlRoomData, socket: SocketHandle) -> Self {
        Self { data, socket }
    }

    /// Build the data layer and spawn the socket for `config`.
    pub fn connect(
        config: &ClientConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SocketNotice>), ControlRoomError> {
        let data = ControlRoomData::new(config)?;
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let socket = SocketManager::spawn(config, notice_tx)?;
        Ok((Self::new(data, socket), notice_rx))
    }

    pub fn data(&self) -> &ControlRoomData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut ControlRoomData {
        &mut self.data
    }

    pub fn socket(&self) -> &SocketHandle {
        &self.socket
    }

    pub fn selected_session_key(&self) -> &str {
        self.data.selected_session_key()
    }

    pub fn session_detail(&self) -> Option<&SessionDetail> {
        self.data.session_detail()
    }

    /// Runs of the selected session from the latest socket snapshot.
    pub fn selected_runs(&self) -> Vec<StreamRun> {
        let snapshot = self.socket.snapshot();
        select_runs_for_session(&snapshot.runs, self.data.selected_session_key())
            .into_iter()
            .cloned()
            .collect()
    }

    // -- Selection --------------------------------------------------------

    pub async fn refresh_all(&mut self) {
        self.data.refresh_all().await;
        self.sync_selection().await;
    }

    pub async fn select_session(&mut self, key: impl Into<String>) -> bool {
        self.data.select_session(key);
        self.sync_selection().await
    }

    /// If the selected session is listed, load its detail and, once loaded,
    /// subscribe the socket to it. Returns whether detail was loaded.
    pub async fn sync_selection(&mut self) -> bool {
        let key = self.data.selected_session_key().to_string();
        if !self.data.has_session(&key) {
            return false;
        }
        if !self.data.load_session_detail(&key).await {
            return false;
        }
        if let Err(err) = self.socket.subscribe_session(key).await {
            self.data.push_notice(Notice::error(err.to_string()));
        }
        true
    }

    pub fn create_thread(&mut self) -> String {
        self.data.create_thread()
    }

    pub async fn delete_session(&mut self, key: &str) -> bool {
        let deleted = self.data.delete_session(key).await;
        if deleted {
            self.sync_selection().await;
        }
        deleted
    }

    // -- Socket notices ---------------------------------------------------

    pub async fn handle_notice(&mut self, notice: &SocketNotice) {
        match notice {
            SocketNotice::SessionUpdated { session_key } => {
                debug!(
                    component = "control_room",
                    event = "control_room.session_updated",
                    session_key = %session_key,
                    "Session updated, refreshing"
                );
                self.data.refresh_sessions().await;
                let synced = self.sync_selection().await;
                if !synced && session_key == self.data.selected_session_key() {
                    self.data.load_session_detail(session_key).await;
                }
            }
            SocketNotice::Error { message } => {
                self.data.push_notice(Notice::error(message.clone()));
            }
            SocketNotice::Connection { .. } | SocketNotice::Event(_) => {}
        }
    }

    // -- Intents ----------------------------------------------------------

    /// Send `content` to the selected session with the configured routing.
    pub async fn send_chat(&mut self, content: impl Into<String>) {
        let result = self
            .socket
            .send_chat(
                content,
                self.data.selected_session_key(),
                self.data.channel(),
                self.data.chat_id(),
            )
            .await;
        if let Err(err) = result {
            self.data.push_notice(Notice::error(err.to_string()));
        }
    }

    pub async fn cancel_run(&mut self, run_id: impl Into<String>) {
        if let Err(err) = self.socket.cancel_run(run_id).await {
            self.data.push_notice(Notice::error(err.to_string()));
        }
    }

    pub async fn shutdown(&self) {
        self.socket.shutdown().await;
    }
}
