//! Relay process
//!
//! Accepts WebSocket connections, registers each one with the [`Relay`] and
//! forwards every frame it receives to all other participants. An optional
//! HTTP status server runs on its own thread.

use std::{net::SocketAddr, sync::Arc, thread};

use anyhow::{anyhow, Result};
use futures_util::{SinkExt, StreamExt};
use rouille::{router, Request, Response, Server};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::relay::Relay;

pub async fn run(config: RelayConfig) -> Result<()> {
    let relay = Arc::new(Relay::new());

    if let Some(addr) = config.status_listen {
        spawn_status_server(addr, relay.clone())?;
    }

    let listener = TcpListener::bind(config.listen).await?;
    serve(listener, relay).await
}

/// Accept loop. Runs until the listener fails.
pub async fn serve(listener: TcpListener, relay: Arc<Relay>) -> Result<()> {
    info!("Relay listening on ws://{}", listener.local_addr()?);

    loop {
        let (stream, addr) = listener.accept().await?;
        let relay = relay.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, addr, &relay).await {
                warn!("Connection {} ended with error: {}", addr, e);
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, addr: SocketAddr, relay: &Relay) -> Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (id, mut queue) = relay.connect();
    debug!("Participant {} is {}", id, addr);

    let writer = tokio::spawn(async move {
        while let Some(message) = queue.recv().await {
            if let Err(e) = ws_sender.send(message).await {
                debug!("Failed to write to participant: {}", e);
                break;
            }
        }
    });

    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(message @ (Message::Text(_) | Message::Binary(_))) => {
                info!("Received {} from: {}", event_label(&message), id);
                relay.forward(id, message);
            }
            Ok(Message::Close(_)) => break,
            // Pings are answered by tungstenite itself.
            Ok(_) => {}
            Err(e) => {
                debug!("Read from participant {} failed: {}", id, e);
                break;
            }
        }
    }

    relay.disconnect(id);
    writer.abort();
    Ok(())
}

#[derive(Deserialize)]
struct EventName {
    event: String,
}

/// Names the event of a frame for the log. The frame is forwarded whether
/// or not this succeeds.
fn event_label(message: &Message) -> String {
    message
        .to_text()
        .ok()
        .and_then(|text| serde_json::from_str::<EventName>(text).ok())
        .map(|name| name.event)
        .unwrap_or_else(|| "unrecognised frame".to_string())
}

#[derive(Serialize)]
struct Status {
    participants: usize,
}

fn spawn_status_server(addr: SocketAddr, relay: Arc<Relay>) -> Result<()> {
    let server = Server::new(addr, move |request| status_response(request, &relay))
        .map_err(|e| anyhow!("starting the status server: {e}"))?;

    info!("Status page on http://{}", server.server_addr());
    thread::spawn(move || {
        server.run();
    });
    Ok(())
}

fn status_response(request: &Request, relay: &Relay) -> Response {
    router!(request,
        (GET) (/) => {
            Response::text("rendezvous relay")
        },
        (GET) (/participants) => {
            Response::json(&Status { participants: relay.participant_count() })
        },
        _ => Response::empty_404()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_reports_participant_count() {
        let relay = Relay::new();
        let (_a, _rx_a) = relay.connect();
        let (_b, _rx_b) = relay.connect();

        let request = Request::fake_http("GET", "/participants", vec![], vec![]);
        let response = status_response(&request, &relay);
        assert_eq!(response.status_code, 200);

        let (mut body, _) = response.data.into_reader_and_size();
        let mut text = String::new();
        std::io::Read::read_to_string(&mut body, &mut text).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["participants"], 2);
    }

    #[test]
    fn unknown_paths_are_404() {
        let relay = Relay::new();
        let request = Request::fake_http("GET", "/nope", vec![], vec![]);
        assert_eq!(status_response(&request, &relay).status_code, 404);
    }

    #[test]
    fn labels_known_and_unknown_frames() {
        let offer = Message::Text(r#"{"event":"offer","data":{}}"#.into());
        assert_eq!(event_label(&offer), "offer");

        let junk = Message::Binary(vec![0xff]);
        assert_eq!(event_label(&junk), "unrecognised frame");
    }
}
