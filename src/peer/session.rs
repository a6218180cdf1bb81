//! Negotiation state machine for one local participant
//!
//! A [`PeerSession`] owns at most one negotiation at a time (an engine plus
//! the bookkeeping around it). Inbound signals, user commands and engine
//! events are all handled on the task that owns the session, so handlers run
//! one after another and never race on the negotiation.
//!
//! Ordering: a description is committed to the engine before the signal that
//! carries it is sent, and local candidates are sent only after that. Engine
//! events are queued while a handler runs and are looked at afterwards;
//! candidates that are somehow reported before the commit are held back and
//! flushed right after it.

use std::future;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::engine::{EngineEvent, EngineEventSink, EngineFactory, NegotiationEngine};
use crate::error::SessionError;
use crate::media::MediaSource;
use crate::model::{
    media::MediaStream,
    signal::{CandidateDescriptor, Description, DescriptionKind, Signal, SignalKind},
    state::SessionState,
};

/// User-triggered actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Start a call (the caller path).
    Call,
    /// Drop the current negotiation and go back to idle.
    HangUp,
}

/// What the presentation layer gets to see.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    State(SessionState),
    LocalStream(MediaStream),
    RemoteStream(MediaStream),
    /// A recoverable problem worth showing to the user.
    Error(String),
}

/// Local negotiation state. Dropping it closes the engine.
struct Negotiation<E: NegotiationEngine> {
    engine: E,
    generation: u64,
    local_committed: bool,
    remote_set: bool,
    pending_local: Vec<CandidateDescriptor>,
    pending_remote: Vec<CandidateDescriptor>,
}

impl<E: NegotiationEngine> Negotiation<E> {
    fn new(engine: E, generation: u64) -> Negotiation<E> {
        Negotiation {
            engine,
            generation,
            local_committed: false,
            remote_set: false,
            pending_local: vec![],
            pending_remote: vec![],
        }
    }
}

impl<E: NegotiationEngine> Drop for Negotiation<E> {
    fn drop(&mut self) {
        debug!("Closing negotiation {}", self.generation);
        self.engine.close();
    }
}

pub struct PeerSession<F: EngineFactory, M: MediaSource> {
    factory: F,
    media: M,
    config: SessionConfig,
    outbound: UnboundedSender<Signal>,
    updates: UnboundedSender<SessionUpdate>,
    events_tx: UnboundedSender<(u64, EngineEvent)>,
    events_rx: UnboundedReceiver<(u64, EngineEvent)>,
    state: SessionState,
    negotiation: Option<Negotiation<F::Engine>>,
    generation: u64,
    local_stream: Option<MediaStream>,
    remote_stream: Option<MediaStream>,
    deadline: Option<Instant>,
}

impl<F: EngineFactory, M: MediaSource> PeerSession<F, M> {
    /// Signals the session produces go to `outbound`, in the order they are
    /// issued. `updates` feeds the presentation layer.
    pub fn new(
        factory: F,
        media: M,
        config: SessionConfig,
        outbound: UnboundedSender<Signal>,
        updates: UnboundedSender<SessionUpdate>,
    ) -> PeerSession<F, M> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        PeerSession {
            factory,
            media,
            config,
            outbound,
            updates,
            events_tx,
            events_rx,
            state: SessionState::Idle,
            negotiation: None,
            generation: 0,
            local_stream: None,
            remote_stream: None,
            deadline: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn local_stream(&self) -> Option<&MediaStream> {
        self.local_stream.as_ref()
    }

    pub fn remote_stream(&self) -> Option<&MediaStream> {
        self.remote_stream.as_ref()
    }

    pub fn has_negotiation(&self) -> bool {
        self.negotiation.is_some()
    }

    /// Acquires the local media stream. Required before a call can start.
    pub async fn start_media(&mut self) -> Result<MediaStream, SessionError> {
        let stream = self.media.acquire(&self.config.constraints).await?;
        self.local_stream = Some(stream.clone());
        self.publish(SessionUpdate::LocalStream(stream.clone()));
        Ok(stream)
    }

    /// Starts the caller path: `Idle -> Initiating -> OfferSent`.
    ///
    /// Rejected while another negotiation is under way or connected; the
    /// running negotiation is left alone in that case.
    pub async fn initiate(&mut self) -> Result<(), SessionError> {
        if self.state.is_negotiating() {
            return Err(SessionError::AlreadyNegotiating(self.state));
        }
        let stream = self.local_stream.clone().ok_or(SessionError::MediaNotAcquired)?;

        self.teardown();
        self.transition(SessionState::Initiating);

        let result = self.send_offer(&stream).await;
        if result.is_err() {
            self.fail();
        }
        result
    }

    /// Drops the current negotiation, if any, and returns to `Idle`.
    pub fn hang_up(&mut self) {
        self.teardown();
        self.transition(SessionState::Idle);
    }

    pub async fn handle_signal(&mut self, signal: Signal) -> Result<(), SessionError> {
        info!("Received {} while {}", signal.kind(), self.state);
        match signal {
            Signal::Offer(offer) => self.on_offer(offer).await,
            Signal::Answer(answer) => self.on_answer(answer).await,
            Signal::Candidate(candidate) => self.on_candidate(candidate).await,
        }
    }

    pub fn handle_engine_event(&mut self, generation: u64, event: EngineEvent) -> Result<(), SessionError> {
        let Some(negotiation) = self.negotiation.as_mut() else {
            debug!("Dropping engine event, no negotiation: {:?}", event);
            return Ok(());
        };
        if negotiation.generation != generation {
            debug!("Dropping event from closed negotiation {}", generation);
            return Ok(());
        }

        match event {
            EngineEvent::LocalCandidate(candidate) => {
                if negotiation.local_committed {
                    send_signal(&self.outbound, Signal::Candidate(candidate))?;
                } else {
                    negotiation.pending_local.push(candidate);
                }
            }
            EngineEvent::RemoteTrack(stream) => {
                let remote = self
                    .remote_stream
                    .get_or_insert_with(|| MediaStream::new(stream.id.clone()));
                remote.merge(stream);
                let remote = remote.clone();
                info!("Remote stream {} has {} track(s)", remote.id, remote.tracks.len());
                self.publish(SessionUpdate::RemoteStream(remote));
            }
            EngineEvent::Established => {
                if self.state == SessionState::AnswerSent {
                    self.connected();
                }
            }
            EngineEvent::ConnectionLost => {
                warn!("Peer connection lost while {}", self.state);
                self.hang_up();
            }
        }

        Ok(())
    }

    /// Handles every engine event queued so far without waiting for more.
    pub fn process_engine_events(&mut self) -> Result<(), SessionError> {
        while let Ok((generation, event)) = self.events_rx.try_recv() {
            self.handle_engine_event(generation, event)?;
        }
        Ok(())
    }

    /// Drives the session until the inbound signaling channel closes.
    ///
    /// When several sources are ready at once they are served in a fixed
    /// order: user commands, then inbound signals, then engine events, then
    /// the negotiation deadline. A second offer queued behind the first is
    /// therefore always answered before the first engine's events are looked
    /// at, and those events are then dropped as stale.
    ///
    /// Returns an error only when the outbound signaling channel is gone;
    /// every other failure is reported through the updates channel.
    pub async fn run(
        mut self,
        mut inbound: UnboundedReceiver<Signal>,
        mut commands: UnboundedReceiver<SessionCommand>,
    ) -> Result<(), SessionError> {
        loop {
            let deadline = self.deadline;

            tokio::select! {
                biased;

                Some(command) = commands.recv() => {
                    let result = match command {
                        SessionCommand::Call => self.initiate().await,
                        SessionCommand::HangUp => {
                            self.hang_up();
                            Ok(())
                        }
                    };
                    self.report(result)?;
                }

                signal = inbound.recv() => match signal {
                    Some(signal) => {
                        let result = self.handle_signal(signal).await;
                        self.report(result)?;
                    }
                    None => {
                        info!("Signaling channel closed");
                        self.hang_up();
                        return Ok(());
                    }
                },

                Some((generation, event)) = self.events_rx.recv() => {
                    let result = self.handle_engine_event(generation, event);
                    self.report(result)?;
                }

                _ = wait_for(deadline) => self.expire_negotiation(),
            }
        }
    }

    async fn on_offer(&mut self, offer: Description) -> Result<(), SessionError> {
        if self.state == SessionState::Connected {
            self.hang_up();
            return Err(SessionError::ProtocolViolation {
                signal: SignalKind::Offer,
                state: SessionState::Connected,
            });
        }

        // Acquisition failure aborts this answer only; whatever ran before stays.
        let stream = match self.local_stream.clone() {
            Some(stream) => stream,
            None => self.start_media().await?,
        };

        // Latest offer wins.
        self.teardown();
        self.transition(SessionState::OfferReceived);

        let result = self.send_answer(offer, &stream).await;
        if result.is_err() {
            self.fail();
        }
        result
    }

    async fn on_answer(&mut self, answer: Description) -> Result<(), SessionError> {
        let violation = SessionError::ProtocolViolation {
            signal: SignalKind::Answer,
            state: self.state,
        };

        if self.state != SessionState::OfferSent {
            if self.negotiation.is_some() {
                self.fail();
            }
            return Err(violation);
        }
        let Some(negotiation) = self.negotiation.as_mut() else {
            self.fail();
            return Err(violation);
        };

        let applied = negotiation.engine.set_remote_description(answer).await;
        if let Err(e) = applied {
            self.fail();
            return Err(e.into());
        }
        negotiation.remote_set = true;

        self.apply_pending_remote().await;
        self.connected();
        Ok(())
    }

    async fn on_candidate(&mut self, candidate: CandidateDescriptor) -> Result<(), SessionError> {
        let Some(negotiation) = self.negotiation.as_mut() else {
            debug!("Ignoring candidate, no negotiation in progress");
            return Ok(());
        };

        if !negotiation.remote_set {
            debug!("Holding candidate until the remote description is set");
            negotiation.pending_remote.push(candidate);
            return Ok(());
        }

        apply_candidate(&mut negotiation.engine, candidate, &self.updates).await;
        Ok(())
    }

    async fn send_offer(&mut self, stream: &MediaStream) -> Result<(), SessionError> {
        let mut negotiation = self.open_negotiation().await?;

        negotiation.engine.attach_media(stream);
        let offer = negotiation
            .engine
            .create_description(DescriptionKind::Offer)
            .await?;
        negotiation.engine.set_local_description(offer.clone()).await?;
        negotiation.local_committed = true;
        self.negotiation = Some(negotiation);

        self.send(Signal::Offer(offer))?;
        self.transition(SessionState::OfferSent);
        self.flush_local_candidates()
    }

    async fn send_answer(&mut self, offer: Description, stream: &MediaStream) -> Result<(), SessionError> {
        let mut negotiation = self.open_negotiation().await?;

        negotiation.engine.set_remote_description(offer).await?;
        negotiation.remote_set = true;
        negotiation.engine.attach_media(stream);
        let answer = negotiation
            .engine
            .create_description(DescriptionKind::Answer)
            .await?;
        negotiation.engine.set_local_description(answer.clone()).await?;
        negotiation.local_committed = true;
        self.negotiation = Some(negotiation);

        self.send(Signal::Answer(answer))?;
        self.transition(SessionState::AnswerSent);
        self.flush_local_candidates()
    }

    async fn open_negotiation(&mut self) -> Result<Negotiation<F::Engine>, SessionError> {
        self.generation += 1;
        let sink = EngineEventSink::new(self.generation, self.events_tx.clone());
        let engine = self.factory.create(sink).await?;

        self.deadline = self.config.negotiation_timeout.map(|t| Instant::now() + t);
        debug!("Opened negotiation {}", self.generation);
        Ok(Negotiation::new(engine, self.generation))
    }

    async fn apply_pending_remote(&mut self) {
        let Some(negotiation) = self.negotiation.as_mut() else {
            return;
        };

        for candidate in std::mem::take(&mut negotiation.pending_remote) {
            apply_candidate(&mut negotiation.engine, candidate, &self.updates).await;
        }
    }

    fn flush_local_candidates(&mut self) -> Result<(), SessionError> {
        let Some(negotiation) = self.negotiation.as_mut() else {
            return Ok(());
        };

        for candidate in negotiation.pending_local.drain(..) {
            send_signal(&self.outbound, Signal::Candidate(candidate))?;
        }
        Ok(())
    }

    fn expire_negotiation(&mut self) {
        self.deadline = None;
        if self.negotiation.is_none() || self.state == SessionState::Connected {
            return;
        }

        warn!("Negotiation timed out while {}", self.state);
        self.publish(SessionUpdate::Error(format!(
            "negotiation timed out while {}",
            self.state
        )));
        self.fail();
    }

    fn connected(&mut self) {
        self.deadline = None;
        self.transition(SessionState::Connected);
    }

    fn fail(&mut self) {
        self.teardown();
        self.transition(SessionState::Failed);
    }

    fn teardown(&mut self) {
        self.negotiation = None;
        self.remote_stream = None;
        self.deadline = None;
    }

    fn transition(&mut self, state: SessionState) {
        info!("Session state: {} -> {}", self.state, state);
        self.state = state;
        self.publish(SessionUpdate::State(state));
    }

    fn send(&self, signal: Signal) -> Result<(), SessionError> {
        send_signal(&self.outbound, signal)
    }

    fn publish(&self, update: SessionUpdate) {
        // Nobody is rendering; the session keeps going regardless.
        let _ = self.updates.send(update);
    }

    fn report(&self, result: Result<(), SessionError>) -> Result<(), SessionError> {
        match result {
            Ok(()) => Ok(()),
            Err(SessionError::SignalingClosed) => Err(SessionError::SignalingClosed),
            Err(e) => {
                warn!("{}", e);
                self.publish(SessionUpdate::Error(e.to_string()));
                Ok(())
            }
        }
    }
}

fn send_signal(outbound: &UnboundedSender<Signal>, signal: Signal) -> Result<(), SessionError> {
    debug!("Sending {}", signal.kind());
    outbound.send(signal).map_err(|_| SessionError::SignalingClosed)
}

/// A candidate the engine refuses is reported and dropped; it never aborts
/// the negotiation.
async fn apply_candidate<E: NegotiationEngine>(
    engine: &mut E,
    candidate: CandidateDescriptor,
    updates: &UnboundedSender<SessionUpdate>,
) {
    if let Err(e) = engine.add_candidate(candidate).await {
        warn!("Error adding ICE candidate: {}", e);
        let _ = updates.send(SessionUpdate::Error(format!("candidate rejected: {e}")));
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => future::pending::<()>().await,
    }
}
