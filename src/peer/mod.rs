//! Peer side of the signaling exchange
//!
//! [`PeerSession`] sequences the offer/answer exchange for one participant;
//! [`client`] wires it to a relay over WebSocket.

pub mod client;
mod session;


pub use session::{PeerSession, SessionCommand, SessionUpdate};
