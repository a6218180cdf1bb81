//! WebSocket signaling client
//!
//! Connects one [`PeerSession`] to the relay: outgoing signals are written as
//! text frames, incoming frames are parsed into signals, and session updates
//! are logged in place of a UI.

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{error, info, warn};

use crate::config::PeerConfig;
use crate::engine::rtc::RtcEngineFactory;
use crate::media::LocalMediaSource;
use crate::model::signal::Signal;
use crate::peer::session::{PeerSession, SessionCommand, SessionUpdate};

/// Runs a peer until the relay connection closes or Ctrl-C.
pub async fn run(config: PeerConfig) -> Result<()> {
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Signal>();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();

    tokio::spawn(present(updates_rx));

    let mut session = PeerSession::new(
        RtcEngineFactory::new(config.engine.clone()),
        LocalMediaSource,
        config.session.clone(),
        outbound_tx,
        updates_tx,
    );

    // The "Start" step: no call can begin without local media.
    session.start_media().await?;

    let (ws_stream, _) = connect_async(config.relay_url.as_str()).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    info!("Connected to signaling server at {}", config.relay_url);

    let writer = tokio::spawn(async move {
        while let Some(signal) = outbound_rx.recv().await {
            let text = match signal.to_json() {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode {}: {}", signal.kind(), e);
                    continue;
                }
            };
            if let Err(e) = ws_sender.send(Message::Text(text)).await {
                warn!("Failed to send to signaling server: {}", e);
                break;
            }
        }
    });

    let reader = tokio::spawn(async move {
        while let Some(frame) = ws_receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => match Signal::from_json(&text) {
                    Ok(signal) => {
                        if inbound_tx.send(signal).is_err() {
                            break;
                        }
                    }
                    // Malformed messages are forwarded by the relay; reject them here.
                    Err(e) => warn!("Failed to parse signaling message: {}", e),
                },
                Ok(Message::Close(_)) => {
                    info!("Signaling server closed the connection");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Signaling connection error: {}", e);
                    break;
                }
            }
        }
    });

    if config.call {
        command_tx.send(SessionCommand::Call)?;
    }

    let result = tokio::select! {
        result = session.run(inbound_rx, command_rx) => result.map_err(anyhow::Error::from),
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, hanging up");
            Ok(())
        }
    };

    // Keeps the command channel open while the session runs.
    drop(command_tx);
    writer.abort();
    reader.abort();
    result
}

/// Stand-in for the presentation layer.
async fn present(mut updates: UnboundedReceiver<SessionUpdate>) {
    while let Some(update) = updates.recv().await {
        match update {
            SessionUpdate::State(state) => info!("📨 Session is {}", state),
            SessionUpdate::LocalStream(stream) => {
                info!("🎥 Local stream {} ready ({} track(s))", stream.id, stream.tracks.len())
            }
            SessionUpdate::RemoteStream(stream) => {
                info!("📺 Remote stream {} ({} track(s))", stream.id, stream.tracks.len())
            }
            SessionUpdate::Error(message) => warn!("⚠️ {}", message),
        }
    }
}
