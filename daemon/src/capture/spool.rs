//! Spool-directory capture
//!
//! The platform camera/microphone layer writes frames and clips into a
//! directory; capturing consumes the newest file there.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tracing::debug;

use super::{CaptureError, ClipSource, FrameSource};

/// A directory the capture layer drops media files into
#[derive(Debug, Clone)]
pub struct SpoolDir {
    dir: PathBuf,
}

impl SpoolDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Newest regular file modified at or after `since`
    async fn newest(&self, since: Option<SystemTime>) -> Result<Option<PathBuf>, CaptureError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut newest: Option<(SystemTime, PathBuf)> = None;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified()?;
            if since.is_some_and(|since| modified < since) {
                continue;
            }
            if newest.as_ref().map_or(true, |(t, _)| modified > *t) {
                newest = Some((modified, entry.path()));
            }
        }

        Ok(newest.map(|(_, path)| path))
    }

    /// Read and remove the newest file
    async fn take(&self, since: Option<SystemTime>) -> Result<Vec<u8>, CaptureError> {
        let path = self
            .newest(since)
            .await?
            .ok_or_else(|| CaptureError::NoMedia(self.dir.display().to_string()))?;

        let data = tokio::fs::read(&path).await?;
        tokio::fs::remove_file(&path).await?;
        debug!(path = %path.display(), bytes = data.len(), "media taken from spool");
        Ok(data)
    }
}

#[async_trait]
impl FrameSource for SpoolDir {
    async fn capture_frame(&self) -> Result<Vec<u8>, CaptureError> {
        self.take(None).await
    }
}

#[async_trait]
impl ClipSource for SpoolDir {
    async fn record_clip(&self, length: Duration) -> Result<Vec<u8>, CaptureError> {
        let started = SystemTime::now();
        tokio::time::sleep(length).await;
        self.take(Some(started)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_dir_is_no_media() {
        let spool = SpoolDir::new("/nonexistent/call-genie/frames");
        let err = spool.capture_frame().await.unwrap_err();
        assert!(matches!(err, CaptureError::NoMedia(_)));
    }

    fn write_aged(path: &Path, data: &[u8], age: Duration) {
        std::fs::write(path, data).unwrap();
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[tokio::test]
    async fn test_takes_newest_frame() {
        let dir = tempfile::tempdir().unwrap();
        write_aged(&dir.path().join("a.jpg"), b"old", Duration::from_secs(20));
        write_aged(&dir.path().join("b.jpg"), b"new", Duration::from_secs(10));

        let spool = SpoolDir::new(dir.path());
        assert_eq!(spool.capture_frame().await.unwrap(), b"new");
        assert_eq!(spool.capture_frame().await.unwrap(), b"old");
        assert!(spool.capture_frame().await.is_err());
    }

    #[tokio::test]
    async fn test_clip_ignores_files_older_than_request() {
        let dir = tempfile::tempdir().unwrap();
        write_aged(&dir.path().join("stale.wav"), b"stale", Duration::from_secs(10));

        let spool = SpoolDir::new(dir.path());
        let err = spool.record_clip(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, CaptureError::NoMedia(_)));
    }
}
