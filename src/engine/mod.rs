//! Negotiation engine seam
//!
//! A peer session drives connection establishment through
//! [`NegotiationEngine`]. Engines report asynchronous discoveries (local
//! candidates, remote tracks) as [`EngineEvent`]s through an
//! [`EngineEventSink`]; the owning session consumes them on its own task.

pub mod rtc;
pub mod stun;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::EngineError;
use crate::model::{
    media::MediaStream,
    signal::{CandidateDescriptor, Description, DescriptionKind},
};

/// Events an engine raises on its own schedule.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A local network path was discovered.
    LocalCandidate(CandidateDescriptor),
    /// The remote side started sending media.
    RemoteTrack(MediaStream),
    /// The peer-to-peer link is up.
    Established,
    /// The peer-to-peer link dropped.
    ConnectionLost,
}

/// Delivers [`EngineEvent`]s to the session that owns the engine.
///
/// Events carry the generation of the negotiation they belong to, so the
/// session can drop events from an engine it already tore down.
#[derive(Debug, Clone)]
pub struct EngineEventSink {
    generation: u64,
    tx: UnboundedSender<(u64, EngineEvent)>,
}

impl EngineEventSink {
    pub fn new(generation: u64, tx: UnboundedSender<(u64, EngineEvent)>) -> EngineEventSink {
        EngineEventSink { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn emit(&self, event: EngineEvent) {
        // The session is gone; nobody is left to care.
        let _ = self.tx.send((self.generation, event));
    }
}

/// The external collaborator that performs connection establishment.
#[async_trait]
pub trait NegotiationEngine: Send {
    /// Makes local media available to the remote side.
    fn attach_media(&mut self, stream: &MediaStream);

    async fn create_description(&mut self, kind: DescriptionKind) -> Result<Description, EngineError>;

    /// Must complete before the description is transmitted.
    async fn set_local_description(&mut self, description: Description) -> Result<(), EngineError>;

    async fn set_remote_description(&mut self, description: Description) -> Result<(), EngineError>;

    /// Fails independently per call.
    async fn add_candidate(&mut self, candidate: CandidateDescriptor) -> Result<(), EngineError>;

    /// Releases the engine. No events are emitted afterwards.
    fn close(&mut self);
}

/// Creates one engine per negotiation.
#[async_trait]
pub trait EngineFactory: Send {
    type Engine: NegotiationEngine;

    async fn create(&mut self, events: EngineEventSink) -> Result<Self::Engine, EngineError>;
}
