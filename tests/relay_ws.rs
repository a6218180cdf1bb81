use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};

use rendezvous_rtc::relay::Relay;
use rendezvous_rtc::server;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_relay() -> (SocketAddr, Arc<Relay>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let relay = Arc::new(Relay::new());
    tokio::spawn(server::serve(listener, relay.clone()));
    (addr, relay)
}

async fn join(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}")).await.unwrap();
    client
}

async fn wait_for_participants(relay: &Relay, count: usize) {
    for _ in 0..200 {
        if relay.participant_count() == count {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {} participants, have {}",
        count,
        relay.participant_count()
    );
}

async fn next_text(client: &mut Client) -> String {
    let frame = timeout(Duration::from_secs(5), client.next())
        .await
        .expect("no frame within 5s")
        .unwrap()
        .unwrap();
    frame.into_text().unwrap()
}

#[tokio::test]
async fn frames_reach_every_other_participant() {
    let (addr, relay) = start_relay().await;
    let mut a = join(addr).await;
    let mut b = join(addr).await;
    let mut c = join(addr).await;
    wait_for_participants(&relay, 3).await;

    let offer = r#"{"event":"offer","data":{"type":"offer","sdp":"v=0"}}"#;
    a.send(Message::Text(offer.to_string())).await.unwrap();

    assert_eq!(next_text(&mut b).await, offer);
    assert_eq!(next_text(&mut c).await, offer);

    // Nothing came back to the sender.
    assert!(timeout(Duration::from_millis(200), a.next()).await.is_err());
}

#[tokio::test]
async fn frames_from_one_sender_keep_their_order() {
    let (addr, relay) = start_relay().await;
    let mut a = join(addr).await;
    let mut b = join(addr).await;
    wait_for_participants(&relay, 2).await;

    let frames = [
        r#"{"event":"offer","data":{"type":"offer","sdp":"v=0"}}"#,
        r#"{"event":"candidate","data":{"candidate":"candidate:1"}}"#,
        r#"{"event":"candidate","data":{"candidate":"candidate:2"}}"#,
    ];
    for frame in frames {
        a.send(Message::Text(frame.to_string())).await.unwrap();
    }

    for frame in frames {
        assert_eq!(next_text(&mut b).await, frame);
    }
}

#[tokio::test]
async fn unparseable_frames_are_forwarded() {
    let (addr, relay) = start_relay().await;
    let mut a = join(addr).await;
    let mut b = join(addr).await;
    wait_for_participants(&relay, 2).await;

    a.send(Message::Text("not json".to_string())).await.unwrap();

    assert_eq!(next_text(&mut b).await, "not json");
}

#[tokio::test]
async fn closed_connections_leave_the_relay() {
    let (addr, relay) = start_relay().await;
    let mut a = join(addr).await;
    let mut b = join(addr).await;
    wait_for_participants(&relay, 2).await;

    a.close(None).await.unwrap();
    wait_for_participants(&relay, 1).await;

    // A lone participant has nobody to talk to.
    b.send(Message::Text(r#"{"event":"offer","data":{}}"#.to_string()))
        .await
        .unwrap();
    assert_eq!(relay.participant_count(), 1);
}
