//! Data models for signaling sessions
//!
//! This module contains the core data structures shared by the relay and the
//! peer sessions: participant identity, the signaling messages exchanged
//! through the relay, media stream handles and the negotiation state.

pub mod media;
pub mod participant;
pub mod signal;
pub mod state;
