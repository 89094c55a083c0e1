//! `controlroom events` - raw event tail.
//!
//! Events go to stdout as JSON lines; connection changes and errors go to
//! stderr so the output stays pipeable.

use anyhow::Result;
use controlroom_client::{ClientConfig, SocketManager, SocketNotice};
use tokio::sync::mpsc;

use crate::render;

pub async fn run(config: &ClientConfig, session: Option<String>) -> Result<()> {
    let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();
    let socket = SocketManager::spawn(config, notice_tx)?;
    if let Some(session_key) = session {
        socket.subscribe_session(session_key).await?;
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            notice = notice_rx.recv() => {
                let Some(notice) = notice else { break };
                match notice {
                    SocketNotice::Event(event) => println!("{}", serde_json::to_string(&event)?),
                    SocketNotice::Connection { state, reconnect_delay_ms } => {
                        eprintln!("{}", render::connection_line(state, reconnect_delay_ms));
                    }
                    SocketNotice::Error { message } => eprintln!("error: {message}"),
                    SocketNotice::SessionUpdated { .. } => {}
                }
            }
        }
    }

    socket.shutdown().await;
    let snapshot = socket.snapshot();
    eprintln!("{} events in log", snapshot.events.len());
    Ok(())
}
