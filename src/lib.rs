//! Rendezvous signaling for two-party WebRTC sessions
//!
//! A [`relay::Relay`] forwards `offer`/`answer`/`candidate` messages between
//! connected participants without looking at them. Each participant runs a
//! [`peer::PeerSession`] that sequences the offer/answer exchange against a
//! negotiation engine.

pub mod config;
pub mod engine;
pub mod error;
pub mod media;
pub mod model;
pub mod peer;
pub mod relay;
pub mod server;
pub mod util;
