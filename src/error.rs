//! Error types for peer sessions and their collaborators

use thiserror::Error;

use crate::model::{signal::SignalKind, state::SessionState};

/// Errors raised by a negotiation engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no usable host address for a local candidate")]
    NoHostAddress,

    #[error("malformed session description: {0}")]
    MalformedDescription(String),

    #[error("malformed candidate: {0}")]
    MalformedCandidate(String),

    #[error("description rejected: {0}")]
    Rejected(String),

    #[error("STUN: {0}")]
    Stun(String),

    #[error("nothing to negotiate")]
    NothingToNegotiate,

    #[error("no offer is pending")]
    NoPendingOffer,

    #[error("no remote offer to answer")]
    NoRemoteOffer,
}

/// Errors raised by a local media source.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("no media tracks were requested")]
    NothingRequested,

    #[error("media device unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by a peer session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("local media has not been acquired")]
    MediaNotAcquired,

    #[error("media acquisition failed: {0}")]
    Media(#[from] MediaError),

    #[error("negotiation engine failed: {0}")]
    Engine(#[from] EngineError),

    #[error("protocol violation: received {signal} while {state}")]
    ProtocolViolation {
        signal: SignalKind,
        state: SessionState,
    },

    #[error("a negotiation is already in progress ({0})")]
    AlreadyNegotiating(SessionState),

    #[error("signaling channel closed")]
    SignalingClosed,
}
