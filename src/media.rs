//! Local media acquisition

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::info;

use crate::error::MediaError;
use crate::model::media::{MediaConstraints, MediaStream, TrackKind};

/// Source of the local camera/microphone stream.
#[async_trait]
pub trait MediaSource: Send {
    async fn acquire(&mut self, constraints: &MediaConstraints) -> Result<MediaStream, MediaError>;
}

/// Virtual capture device.
///
/// Hands out a stream carrying one track per requested kind. Device capture
/// and encoding are left to whatever actually feeds the engine.
#[derive(Debug, Default)]
pub struct LocalMediaSource;

#[async_trait]
impl MediaSource for LocalMediaSource {
    async fn acquire(&mut self, constraints: &MediaConstraints) -> Result<MediaStream, MediaError> {
        static STREAM_COUNTER: AtomicU64 = AtomicU64::new(0);

        if !constraints.audio && !constraints.video {
            return Err(MediaError::NothingRequested);
        }

        let id = STREAM_COUNTER.fetch_add(1, Ordering::SeqCst);
        let mut stream = MediaStream::new(format!("local-{id}"));
        if constraints.audio {
            stream = stream.with_track(format!("local-{id}-audio"), TrackKind::Audio);
        }
        if constraints.video {
            stream = stream.with_track(format!("local-{id}-video"), TrackKind::Video);
        }

        info!("Acquired local stream {} ({} track(s))", stream.id, stream.tracks.len());
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquires_requested_kinds() {
        let mut source = LocalMediaSource;
        let stream = source
            .acquire(&MediaConstraints {
                audio: true,
                video: false,
            })
            .await
            .unwrap();

        assert_eq!(stream.kinds().collect::<Vec<_>>(), vec![TrackKind::Audio]);
    }

    #[tokio::test]
    async fn refuses_empty_constraints() {
        let mut source = LocalMediaSource;
        let result = source
            .acquire(&MediaConstraints {
                audio: false,
                video: false,
            })
            .await;

        assert!(matches!(result, Err(MediaError::NothingRequested)));
    }
}
