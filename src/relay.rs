//! Participant registry and broadcast dispatch
//!
//! The relay hands every frame a participant sends to all *other* connected
//! participants, unchanged. It keeps no session state and never looks at the
//! payload, which limits it to one two-party session per relay instance.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

use crate::model::participant::ParticipantId;

/// Connected participants and their outgoing queues.
///
/// Each participant has its own unbounded queue, so frames from one sender
/// reach a given receiver in the order they were forwarded.
#[derive(Debug, Default)]
pub struct Relay {
    participants: RwLock<HashMap<ParticipantId, UnboundedSender<Message>>>,
}

impl Relay {
    pub fn new() -> Relay {
        Relay::default()
    }

    /// Registers a new participant and returns the queue of frames
    /// forwarded to it.
    pub fn connect(&self) -> (ParticipantId, UnboundedReceiver<Message>) {
        let id = ParticipantId::next();
        let (tx, rx) = mpsc::unbounded_channel();
        self.participants.write().insert(id, tx);
        info!("A participant connected: {}", id);
        (id, rx)
    }

    /// Delivers `message` to every connected participant except `sender`.
    ///
    /// Best effort: returns how many queues accepted the frame.
    pub fn forward(&self, sender: ParticipantId, message: Message) -> usize {
        let participants = self.participants.read();
        let mut delivered = 0;

        for (id, tx) in participants.iter() {
            if *id == sender {
                continue;
            }
            // A closed queue belongs to a connection that is tearing down.
            if tx.send(message.clone()).is_ok() {
                delivered += 1;
            }
        }

        debug!("Forwarded frame from {} to {} participant(s)", sender, delivered);
        delivered
    }

    /// Removes a participant from future broadcasts. Others are not told.
    pub fn disconnect(&self, id: ParticipantId) -> bool {
        let removed = self.participants.write().remove(&id).is_some();
        if removed {
            info!("A participant disconnected: {}", id);
        }
        removed
    }

    pub fn participant_count(&self) -> usize {
        self.participants.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(message: Option<Message>) -> Option<String> {
        message.and_then(|m| m.into_text().ok())
    }

    #[test]
    fn forwards_to_every_other_participant() {
        let relay = Relay::new();
        let (a, mut rx_a) = relay.connect();
        let (_b, mut rx_b) = relay.connect();
        let (_c, mut rx_c) = relay.connect();

        let delivered = relay.forward(a, Message::Text("hi".into()));

        assert_eq!(delivered, 2);
        assert_eq!(text(rx_b.try_recv().ok()).as_deref(), Some("hi"));
        assert_eq!(text(rx_c.try_recv().ok()).as_deref(), Some("hi"));
        assert!(rx_a.try_recv().is_err(), "sender must not get its own frame");
    }

    #[test]
    fn disconnected_participant_is_skipped() {
        let relay = Relay::new();
        let (a, _rx_a) = relay.connect();
        let (b, mut rx_b) = relay.connect();

        assert!(relay.disconnect(b));
        assert!(!relay.disconnect(b));
        assert_eq!(relay.participant_count(), 1);

        assert_eq!(relay.forward(a, Message::Text("after".into())), 0);
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn preserves_send_order_per_receiver() {
        let relay = Relay::new();
        let (a, _rx_a) = relay.connect();
        let (_b, mut rx_b) = relay.connect();

        for i in 0..20 {
            relay.forward(a, Message::Text(i.to_string()));
        }

        for i in 0..20 {
            assert_eq!(text(rx_b.try_recv().ok()), Some(i.to_string()));
        }
    }

    #[test]
    fn malformed_frames_are_forwarded_as_is() {
        let relay = Relay::new();
        let (a, _rx_a) = relay.connect();
        let (_b, mut rx_b) = relay.connect();

        relay.forward(a, Message::Text("{not json".into()));
        relay.forward(a, Message::Binary(vec![0xde, 0xad]));

        assert_eq!(text(rx_b.try_recv().ok()).as_deref(), Some("{not json"));
        assert_eq!(rx_b.try_recv().ok(), Some(Message::Binary(vec![0xde, 0xad])));
    }

    #[test]
    fn closed_queue_does_not_count_as_delivered() {
        let relay = Relay::new();
        let (a, _rx_a) = relay.connect();
        let (_b, rx_b) = relay.connect();
        drop(rx_b);

        assert_eq!(relay.forward(a, Message::Text("x".into())), 0);
    }
}
