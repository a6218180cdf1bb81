//! Media stream handles
//!
//! A [`MediaStream`] is the handle the presentation layer renders. The bytes
//! themselves travel on the peer-to-peer path owned by the negotiation engine.

use std::fmt;

/// The kind of media a track carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// One track within a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
}

/// A local or remote media stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
    pub id: String,
    pub tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>) -> MediaStream {
        MediaStream {
            id: id.into(),
            tracks: vec![],
        }
    }

    pub fn with_track(mut self, id: impl Into<String>, kind: TrackKind) -> MediaStream {
        self.tracks.push(MediaTrack {
            id: id.into(),
            kind,
        });
        self
    }

    pub fn kinds(&self) -> impl Iterator<Item = TrackKind> + '_ {
        self.tracks.iter().map(|t| t.kind)
    }

    /// Adds the tracks of `other` that this stream does not carry yet.
    pub fn merge(&mut self, other: MediaStream) {
        for track in other.tracks {
            if !self.tracks.iter().any(|t| t.id == track.id) {
                self.tracks.push(track);
            }
        }
    }
}

/// What to capture from the local devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        MediaConstraints {
            audio: true,
            video: true,
        }
    }
}
