//! Negotiation engine backed by `str0m`
//!
//! `str0m` is sans-IO: an [`Rtc`] instance only changes when it is fed input.
//! Each engine therefore owns a UDP socket and a driver task that polls the
//! instance for output, transmits datagrams, feeds received datagrams and
//! timeouts back in, and turns the events a session cares about into
//! [`EngineEvent`]s.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use str0m::change::{SdpAnswer, SdpOffer, SdpPendingOffer};
use str0m::media::{Direction, MediaKind};
use str0m::net::{Protocol, Receive};
use str0m::{Candidate, Event, IceConnectionState, Input, Output, Rtc};
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::engine::{stun, EngineEvent, EngineEventSink, EngineFactory, NegotiationEngine};
use crate::error::EngineError;
use crate::model::{
    media::{MediaStream, TrackKind},
    signal::{CandidateDescriptor, Description, DescriptionKind},
};
use crate::util::select_host_address;

/// Label of the data channel offered when no media is attached.
const CHANNEL: &str = "signal";

/// Stream id under which remote tracks are exposed.
const REMOTE_STREAM: &str = "remote";

/// Creates one [`RtcEngine`] per negotiation.
#[derive(Debug, Clone, Default)]
pub struct RtcEngineFactory {
    config: EngineConfig,
}

impl RtcEngineFactory {
    pub fn new(config: EngineConfig) -> RtcEngineFactory {
        RtcEngineFactory { config }
    }
}

#[async_trait]
impl EngineFactory for RtcEngineFactory {
    type Engine = RtcEngine;

    async fn create(&mut self, events: EngineEventSink) -> Result<RtcEngine, EngineError> {
        RtcEngine::bind(&self.config, events).await
    }
}

pub struct RtcEngine {
    rtc: Arc<Mutex<Rtc>>,
    events: EngineEventSink,
    wake: Arc<Notify>,
    driver: JoinHandle<()>,
    local_candidates: Vec<Candidate>,
    stream_id: Option<String>,
    media: Vec<MediaKind>,
    pending_offer: Option<SdpPendingOffer>,
    pending_answer: Option<SdpAnswer>,
}

impl RtcEngine {
    /// Binds a UDP socket on the host address, gathers candidates and starts
    /// the driver task.
    ///
    /// A STUN server that does not answer costs `stun_timeout` and leaves the
    /// engine with host candidates only.
    pub async fn bind(config: &EngineConfig, events: EngineEventSink) -> Result<RtcEngine, EngineError> {
        let host = select_host_address(config.include_loopback).ok_or(EngineError::NoHostAddress)?;
        let socket = UdpSocket::bind(SocketAddr::new(host, 0)).await?;
        let addr = socket.local_addr()?;
        info!("Bound UDP port {} for negotiation {}", addr, events.generation());

        let mut local_candidates = vec![Candidate::host(addr, Protocol::Udp)
            .map_err(|e| EngineError::MalformedCandidate(e.to_string()))?];

        for server in &config.ice_servers {
            match server_reflexive(&socket, server, addr, config.stun_timeout).await {
                Ok(Some(candidate)) => local_candidates.push(candidate),
                Ok(None) => debug!("{} sees our host address, no NAT in between", server),
                Err(e) => warn!("No server-reflexive candidate from {}: {}", server, e),
            }
        }

        let mut rtc = Rtc::new();
        for candidate in &local_candidates {
            rtc.add_local_candidate(candidate.clone());
        }

        let rtc = Arc::new(Mutex::new(rtc));
        let wake = Arc::new(Notify::new());
        let driver = tokio::spawn(drive(rtc.clone(), socket, wake.clone(), events.clone()));

        Ok(RtcEngine {
            rtc,
            events,
            wake,
            driver,
            local_candidates,
            stream_id: None,
            media: vec![],
            pending_offer: None,
            pending_answer: None,
        })
    }
}

impl Drop for RtcEngine {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[async_trait]
impl NegotiationEngine for RtcEngine {
    fn attach_media(&mut self, stream: &MediaStream) {
        self.stream_id = Some(stream.id.clone());
        self.media = stream
            .kinds()
            .map(|kind| match kind {
                TrackKind::Audio => MediaKind::Audio,
                TrackKind::Video => MediaKind::Video,
            })
            .collect();
    }

    async fn create_description(&mut self, kind: DescriptionKind) -> Result<Description, EngineError> {
        let value = match kind {
            DescriptionKind::Offer => {
                let mut rtc = self.rtc.lock();
                let mut change = rtc.sdp_api();
                for media in &self.media {
                    change.add_media(*media, Direction::SendRecv, self.stream_id.clone(), None, None);
                }
                if self.media.is_empty() {
                    change.add_channel(CHANNEL.to_string());
                }

                let (offer, pending) = change.apply().ok_or(EngineError::NothingToNegotiate)?;
                self.pending_offer = Some(pending);
                serde_json::to_value(&offer)
            }
            DescriptionKind::Answer => {
                let answer = self.pending_answer.as_ref().ok_or(EngineError::NoRemoteOffer)?;
                serde_json::to_value(answer)
            }
        };

        value
            .map(Description::new)
            .map_err(|e| EngineError::MalformedDescription(e.to_string()))
    }

    async fn set_local_description(&mut self, description: Description) -> Result<(), EngineError> {
        // str0m applies a local change when it is created; committing it here
        // confirms which change goes out and starts trickling candidates.
        let expected = if self.pending_answer.is_some() {
            DescriptionKind::Answer
        } else if self.pending_offer.is_some() {
            DescriptionKind::Offer
        } else {
            return Err(EngineError::NothingToNegotiate);
        };

        if description.kind() != Some(expected) {
            return Err(EngineError::Rejected(format!(
                "local description is not the pending {:?}",
                expected
            )));
        }

        if expected == DescriptionKind::Answer {
            self.pending_answer = None;
        }

        for candidate in &self.local_candidates {
            self.events.emit(EngineEvent::LocalCandidate(CandidateDescriptor::from_sdp(
                candidate.to_sdp_string(),
                "0",
                0,
            )));
        }

        self.wake.notify_one();
        Ok(())
    }

    async fn set_remote_description(&mut self, description: Description) -> Result<(), EngineError> {
        match description.kind() {
            Some(DescriptionKind::Offer) => {
                let offer: SdpOffer = serde_json::from_value(description.into_value())
                    .map_err(|e| EngineError::MalformedDescription(e.to_string()))?;
                let answer = self
                    .rtc
                    .lock()
                    .sdp_api()
                    .accept_offer(offer)
                    .map_err(|e| EngineError::Rejected(e.to_string()))?;
                self.pending_answer = Some(answer);
            }
            Some(DescriptionKind::Answer) => {
                let answer: SdpAnswer = serde_json::from_value(description.into_value())
                    .map_err(|e| EngineError::MalformedDescription(e.to_string()))?;
                let pending = self.pending_offer.take().ok_or(EngineError::NoPendingOffer)?;
                self.rtc
                    .lock()
                    .sdp_api()
                    .accept_answer(pending, answer)
                    .map_err(|e| EngineError::Rejected(e.to_string()))?;
            }
            None => {
                return Err(EngineError::MalformedDescription(
                    "missing description type".to_string(),
                ))
            }
        }

        self.wake.notify_one();
        Ok(())
    }

    async fn add_candidate(&mut self, candidate: CandidateDescriptor) -> Result<(), EngineError> {
        if candidate.is_end_of_candidates() {
            return Ok(());
        }

        let line = candidate
            .candidate_line()
            .ok_or_else(|| EngineError::MalformedCandidate("missing candidate line".to_string()))?;
        let parsed =
            Candidate::from_sdp_string(line).map_err(|e| EngineError::MalformedCandidate(e.to_string()))?;

        self.rtc.lock().add_remote_candidate(parsed);
        self.wake.notify_one();
        Ok(())
    }

    fn close(&mut self) {
        self.driver.abort();
        self.rtc.lock().disconnect();
    }
}

/// Asks `server` for the mapped address of `base`. `None` when the server
/// sees the host address itself.
async fn server_reflexive(
    socket: &UdpSocket,
    server: &str,
    base: SocketAddr,
    wait: Duration,
) -> Result<Option<Candidate>, EngineError> {
    let server = stun::resolve(server).await?;
    let mapped = stun::reflexive_address(socket, server, wait).await?;
    if mapped == base {
        return Ok(None);
    }

    info!("Server-reflexive address {} via {}", mapped, server);
    Candidate::server_reflexive(mapped, base, Protocol::Udp)
        .map(Some)
        .map_err(|e| EngineError::MalformedCandidate(e.to_string()))
}

/// Drives the `Rtc` instance until it is disconnected.
async fn drive(rtc: Arc<Mutex<Rtc>>, socket: UdpSocket, wake: Arc<Notify>, events: EngineEventSink) {
    let Ok(destination) = socket.local_addr() else {
        return;
    };
    let mut buf = vec![0; 2000];

    loop {
        let Some(timeout) = poll_until_timeout(&rtc, &socket, &events) else {
            debug!("Rtc is no longer alive, driver exits");
            return;
        };

        // A zero sleep would spin; wait at least a millisecond.
        let duration = timeout
            .saturating_duration_since(Instant::now())
            .max(Duration::from_millis(1));

        tokio::select! {
            // Local API calls changed the instance; poll it again.
            _ = wake.notified() => {}

            _ = tokio::time::sleep(duration) => {
                handle_input(&rtc, Input::Timeout(Instant::now()), &events);
            }

            received = socket.recv_from(&mut buf) => match received {
                Ok((n, source)) => {
                    // STUN, DTLS and SRTP share this port; str0m sorts them out.
                    let Ok(contents) = buf[..n].try_into() else {
                        debug!("Dropping unrecognised datagram from {}", source);
                        continue;
                    };
                    let input = Input::Receive(
                        Instant::now(),
                        Receive {
                            proto: Protocol::Udp,
                            source,
                            destination,
                            contents,
                        },
                    );
                    handle_input(&rtc, input, &events);
                }
                Err(e) => warn!("UdpSocket read failed: {:?}", e),
            },
        }
    }
}

fn handle_input(rtc: &Mutex<Rtc>, input: Input, events: &EngineEventSink) {
    let mut rtc = rtc.lock();
    if !rtc.is_alive() {
        return;
    }

    if let Err(e) = rtc.handle_input(input) {
        warn!("Rtc rejected input, disconnecting: {:?}", e);
        rtc.disconnect();
        events.emit(EngineEvent::ConnectionLost);
    }
}

/// Poll all the output from the instance until it returns a timeout.
/// Transmit data on the socket and report events, return the timeout.
fn poll_until_timeout(rtc: &Mutex<Rtc>, socket: &UdpSocket, events: &EngineEventSink) -> Option<Instant> {
    let mut rtc = rtc.lock();

    loop {
        if !rtc.is_alive() {
            return None;
        }

        match rtc.poll_output() {
            Ok(Output::Timeout(t)) => return Some(t),
            Ok(Output::Transmit(transmit)) => {
                if let Err(e) = socket.try_send_to(&transmit.contents, transmit.destination) {
                    debug!("Dropping datagram to {}: {:?}", transmit.destination, e);
                }
            }
            Ok(Output::Event(event)) => handle_event(&mut rtc, event, events),
            Err(e) => {
                warn!("Rtc poll_output failed: {:?}", e);
                rtc.disconnect();
                events.emit(EngineEvent::ConnectionLost);
                return None;
            }
        }
    }
}

fn handle_event(rtc: &mut Rtc, event: Event, events: &EngineEventSink) {
    match event {
        Event::IceConnectionStateChange(state) => {
            info!("🔌 ICE Connection State: {:?}", state);
            if state == IceConnectionState::Disconnected {
                // Ice disconnect could result in trying to establish a new connection,
                // but this impl leaves that to a fresh negotiation.
                rtc.disconnect();
                events.emit(EngineEvent::ConnectionLost);
            }
        }
        Event::Connected => {
            info!("✅ Peer connection established");
            events.emit(EngineEvent::Established);
        }
        Event::MediaAdded(added) => {
            if matches!(added.direction, Direction::RecvOnly | Direction::SendRecv) {
                let kind = match added.kind {
                    MediaKind::Audio => TrackKind::Audio,
                    MediaKind::Video => TrackKind::Video,
                };
                let stream = MediaStream::new(REMOTE_STREAM).with_track(added.mid.to_string(), kind);
                events.emit(EngineEvent::RemoteTrack(stream));
            }
        }
        Event::ChannelOpen(id, label) => {
            info!("Data channel '{}' ({:?}) is open", label, id);
        }
        other => debug!("Event: {:?}", other),
    }
}
