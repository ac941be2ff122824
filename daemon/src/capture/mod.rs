//! Camera frame and microphone clip sources
//!
//! The platform capture layer hands media to the daemon; samplers only see
//! these traits.

mod spool;

use std::time::Duration;

use async_trait::async_trait;

pub use spool::SpoolDir;

/// Errors from a single capture attempt
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("no media available in {0}")]
    NoMedia(String),

    #[error("capture I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Captures one still frame from the camera
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn capture_frame(&self) -> Result<Vec<u8>, CaptureError>;
}

/// Records one audio clip of roughly `length`
#[async_trait]
pub trait ClipSource: Send + Sync {
    async fn record_clip(&self, length: Duration) -> Result<Vec<u8>, CaptureError>;
}

/// Source returning the same payload every time, recording in real time
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    payload: Vec<u8>,
}

impl StaticSource {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

#[async_trait]
impl FrameSource for StaticSource {
    async fn capture_frame(&self) -> Result<Vec<u8>, CaptureError> {
        Ok(self.payload.clone())
    }
}

#[async_trait]
impl ClipSource for StaticSource {
    async fn record_clip(&self, length: Duration) -> Result<Vec<u8>, CaptureError> {
        tokio::time::sleep(length).await;
        Ok(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_static_clip_takes_clip_length() {
        let source = StaticSource::new(b"clip".to_vec());
        let started = tokio::time::Instant::now();
        let clip = source.record_clip(Duration::from_secs(3)).await.unwrap();
        assert_eq!(clip, b"clip");
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[test]
    fn test_static_frame() {
        let source = StaticSource::new(vec![1, 2, 3]);
        let frame = tokio_test::block_on(source.capture_frame()).unwrap();
        assert_eq!(frame, vec![1, 2, 3]);
    }
}
