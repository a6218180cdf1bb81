//! Server-reflexive address discovery
//!
//! Before an engine starts driving its socket it asks each configured STUN
//! server which address its datagrams appear to come from (RFC 5389 binding
//! request, answered with XOR-MAPPED-ADDRESS). Peers behind a NAT can only be
//! reached on that address.

use std::fmt::Display;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{lookup_host, UdpSocket};
use tokio::time::{timeout_at, Instant};
use tracing::debug;
use webrtc_stun::message::{Getter, Message, BINDING_REQUEST, CLASS_SUCCESS_RESPONSE, METHOD_BINDING};
use webrtc_stun::xoraddr::XORMappedAddress;

use crate::error::EngineError;

/// Resolves a `host:port` server name to its first IPv4 address.
pub async fn resolve(server: &str) -> Result<SocketAddr, EngineError> {
    lookup_host(server)
        .await?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| EngineError::Stun(format!("{server} has no IPv4 address")))
}

/// Sends a binding request from `socket` to `server` and returns the mapped
/// address from its answer.
///
/// Must run before anything else reads from `socket`: datagrams that are
/// not the answer are consumed and dropped.
pub async fn reflexive_address(
    socket: &UdpSocket,
    server: SocketAddr,
    wait: Duration,
) -> Result<SocketAddr, EngineError> {
    let mut request = Message::new();
    request.typ = BINDING_REQUEST;
    request.new_transaction_id().map_err(stun_error)?;
    request.encode();
    socket.send_to(&request.raw, server).await?;

    let deadline = Instant::now() + wait;
    let mut buf = vec![0u8; 1500];

    loop {
        let (n, source) = timeout_at(deadline, socket.recv_from(&mut buf))
            .await
            .map_err(|_| EngineError::Stun(format!("no answer from {server} within {wait:?}")))??;
        if source != server {
            debug!("Ignoring datagram from {} while waiting on {}", source, server);
            continue;
        }

        let mut response = Message::new();
        response.raw = buf[..n].to_vec();
        if response.decode().is_err() || response.transaction_id != request.transaction_id {
            debug!("Ignoring unrelated datagram from {}", server);
            continue;
        }

        if response.typ.method != METHOD_BINDING || response.typ.class != CLASS_SUCCESS_RESPONSE {
            return Err(EngineError::Stun(format!("{server} refused the binding request")));
        }

        let mut mapped = XORMappedAddress::default();
        mapped.get_from(&response).map_err(stun_error)?;
        return Ok(SocketAddr::new(mapped.ip, mapped.port));
    }
}

fn stun_error(e: impl Display) -> EngineError {
    EngineError::Stun(e.to_string())
}

/// A one-socket STUN responder for tests. Answers every binding request with
/// `mapped`, or with the requester's own address when `mapped` is `None`.
#[cfg(test)]
pub(crate) async fn spawn_responder(bind: SocketAddr, mapped: Option<SocketAddr>) -> SocketAddr {
    use webrtc_stun::message::{MessageType, Setter};

    let socket = UdpSocket::bind(bind).await.unwrap();
    let addr = socket.local_addr().unwrap();

    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        while let Ok((n, source)) = socket.recv_from(&mut buf).await {
            let mut request = Message::new();
            request.raw = buf[..n].to_vec();
            if request.decode().is_err() || request.typ != BINDING_REQUEST {
                continue;
            }

            let reported = mapped.unwrap_or(source);
            let mut response = Message::new();
            response.typ = MessageType {
                method: METHOD_BINDING,
                class: CLASS_SUCCESS_RESPONSE,
            };
            response.transaction_id = request.transaction_id;
            XORMappedAddress {
                ip: reported.ip(),
                port: reported.port(),
            }
            .add_to(&mut response)
            .unwrap();
            response.encode();
            let _ = socket.send_to(&response.raw, source).await;
        }
    });

    addr
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn reports_the_address_the_server_saw() {
        let server = spawn_responder(loopback(), None).await;
        let client = UdpSocket::bind(loopback()).await.unwrap();

        let mapped = reflexive_address(&client, server, Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(mapped, client.local_addr().unwrap());
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let silent = UdpSocket::bind(loopback()).await.unwrap();
        let client = UdpSocket::bind(loopback()).await.unwrap();

        let result = reflexive_address(&client, silent.local_addr().unwrap(), Duration::from_millis(100)).await;

        assert!(matches!(result, Err(EngineError::Stun(_))));
    }

    #[tokio::test]
    async fn resolves_literal_addresses() {
        let addr = resolve("127.0.0.1:3478").await.unwrap();
        assert_eq!(addr, "127.0.0.1:3478".parse::<SocketAddr>().unwrap());
    }
}
