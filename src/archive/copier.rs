// src/archive/copier.rs

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, warn};
use tokio::fs;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

use crate::config::ArchiveConfig;
use crate::core::{ArchiveError, ArchiveResult};

const PARTIAL_SUFFIX: &str = ".part";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedFile {
    pub destination: PathBuf,
    pub bytes: u64,
    /// Size samples taken before the copy, at least two.
    pub polls: u32,
}

/// Copies a file once its size has stopped changing between two polls.
/// Holds no state between calls; every `archive` call is independent.
#[derive(Debug, Clone)]
pub struct StabilityGatedCopier {
    poll_interval: Duration,
    max_wait: Option<Duration>,
}

impl StabilityGatedCopier {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            max_wait: None,
        }
    }

    /// `None` polls until the file stabilizes, however long that takes.
    pub fn with_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn from_config(cfg: &ArchiveConfig) -> Self {
        Self::new(cfg.poll_interval()).with_max_wait(cfg.max_stable_wait())
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub async fn archive(
        &self,
        source: &Path,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> ArchiveResult<ArchivedFile> {
        let (size, polls) = self.wait_until_stable(source, cancel).await?;
        debug!(
            "[archive] {} stable at {} bytes after {} polls",
            source.display(),
            size,
            polls
        );

        let bytes = copy_atomically(source, destination).await?;
        Ok(ArchivedFile {
            destination: destination.to_path_buf(),
            bytes,
            polls,
        })
    }

    async fn wait_until_stable(
        &self,
        source: &Path,
        cancel: &CancellationToken,
    ) -> ArchiveResult<(u64, u32)> {
        let started = Instant::now();
        let mut previous: Option<u64> = None;
        let mut polls = 0u32;

        loop {
            let size = fs::metadata(source)
                .await
                .map_err(|e| ArchiveError::source_unavailable(source, e))?
                .len();
            polls += 1;

            match previous {
                Some(prev) if prev == size => return Ok((size, polls)),
                Some(prev) if size < prev => {
                    return Err(ArchiveError::SegmentShrunk {
                        path: source.to_path_buf(),
                        previous: prev,
                        current: size,
                    });
                }
                _ => {}
            }
            previous = Some(size);

            if let Some(max_wait) = self.max_wait {
                if started.elapsed() >= max_wait {
                    return Err(ArchiveError::StabilityTimeout {
                        path: source.to_path_buf(),
                        waited: started.elapsed(),
                    });
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(ArchiveError::Cancelled),
                _ = sleep(self.poll_interval) => {}
            }
        }
    }
}

impl Default for StabilityGatedCopier {
    fn default() -> Self {
        Self::new(Self::DEFAULT_POLL_INTERVAL)
    }
}

/// `<dest>.part` next to the destination, so the rename stays on one
/// filesystem.
pub fn partial_path(destination: &Path) -> PathBuf {
    let mut name: OsString = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(PARTIAL_SUFFIX);
    destination.with_file_name(name)
}

async fn copy_atomically(source: &Path, destination: &Path) -> ArchiveResult<u64> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| ArchiveError::destination_write(parent, e))?;
    }

    let partial = partial_path(destination);
    let bytes = match fs::copy(source, &partial).await {
        Ok(bytes) => bytes,
        Err(e) => {
            discard_partial(&partial).await;
            // Vanishing between the last poll and the copy is a source fault.
            if e.kind() == std::io::ErrorKind::NotFound && fs::metadata(source).await.is_err() {
                return Err(ArchiveError::source_unavailable(source, e));
            }
            return Err(ArchiveError::destination_write(&partial, e));
        }
    };

    if let Err(e) = fs::rename(&partial, destination).await {
        discard_partial(&partial).await;
        return Err(ArchiveError::destination_write(destination, e));
    }

    Ok(bytes)
}

async fn discard_partial(partial: &Path) {
    if let Err(e) = fs::remove_file(partial).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("[archive] could not remove {}: {}", partial.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn copier() -> StabilityGatedCopier {
        StabilityGatedCopier::new(Duration::from_millis(20))
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/media/cctv/2024.03.09/07.04.59.mp4")),
            PathBuf::from("/media/cctv/2024.03.09/07.04.59.mp4.part")
        );
    }

    #[tokio::test]
    async fn test_unchanged_file_copies_on_second_poll() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("continuous000.mp4");
        std::fs::write(&source, b"segment bytes").unwrap();
        let destination = dir.path().join("archive/2024.03.09/07.04.59.mp4");

        let file = copier()
            .archive(&source, &destination, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(file.polls, 2);
        assert_eq!(file.bytes, 13);
        assert_eq!(std::fs::read(&destination).unwrap(), b"segment bytes");
        assert!(!partial_path(&destination).exists());
    }

    #[tokio::test]
    async fn test_growing_file_waits_until_stable() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("continuous001.mp4");
        std::fs::write(&source, b"a").unwrap();
        let destination = dir.path().join("out.mp4");

        let done = Arc::new(AtomicBool::new(false));
        let writer = {
            let source = source.clone();
            let done = done.clone();
            tokio::spawn(async move {
                for _ in 0..5 {
                    sleep(Duration::from_millis(25)).await;
                    let mut f = std::fs::OpenOptions::new().append(true).open(&source).unwrap();
                    f.write_all(b"more").unwrap();
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        let file = StabilityGatedCopier::new(Duration::from_millis(100))
            .archive(&source, &destination, &CancellationToken::new())
            .await
            .unwrap();
        writer.await.unwrap();

        assert!(done.load(Ordering::SeqCst));
        assert!(file.polls >= 2);
        assert_eq!(std::fs::read(&destination).unwrap(), std::fs::read(&source).unwrap());
        assert_eq!(file.bytes, 21);
    }

    #[tokio::test]
    async fn test_missing_source_is_stability_fault() {
        let dir = tempfile::tempdir().unwrap();
        let err = copier()
            .archive(
                &dir.path().join("gone.mp4"),
                &dir.path().join("out.mp4"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::SourceUnavailable { .. }));
        assert!(!dir.path().join("out.mp4").exists());
    }

    #[tokio::test]
    async fn test_source_removed_between_polls() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("continuous002.mp4");
        std::fs::write(&source, b"x").unwrap();

        let remover = {
            let source = source.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(50)).await;
                std::fs::remove_file(&source).unwrap();
            })
        };

        let err = StabilityGatedCopier::new(Duration::from_millis(200))
            .archive(&source, &dir.path().join("out.mp4"), &CancellationToken::new())
            .await
            .unwrap_err();
        remover.await.unwrap();
        assert!(matches!(err, ArchiveError::SourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_shrinking_source_is_reported_as_recycled() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("continuous003.mp4");
        std::fs::write(&source, vec![0u8; 4096]).unwrap();

        let truncater = {
            let source = source.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(50)).await;
                std::fs::write(&source, b"new").unwrap();
            })
        };

        let err = StabilityGatedCopier::new(Duration::from_millis(200))
            .archive(&source, &dir.path().join("out.mp4"), &CancellationToken::new())
            .await
            .unwrap_err();
        truncater.await.unwrap();
        match err {
            ArchiveError::SegmentShrunk {
                previous, current, ..
            } => {
                assert_eq!(previous, 4096);
                assert_eq!(current, 3);
            }
            other => panic!("expected SegmentShrunk, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_abandons_poll_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("continuous004.mp4");
        std::fs::write(&source, b"x").unwrap();
        let destination = dir.path().join("out.mp4");

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = StabilityGatedCopier::new(Duration::from_secs(60))
            .archive(&source, &destination, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Cancelled));
        assert!(!destination.exists());
        assert!(!partial_path(&destination).exists());
    }

    #[tokio::test]
    async fn test_max_wait_bounds_polling() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("continuous005.mp4");
        std::fs::write(&source, b"x").unwrap();

        let grower = {
            let source = source.clone();
            tokio::spawn(async move {
                for _ in 0..40 {
                    sleep(Duration::from_millis(5)).await;
                    let mut f = std::fs::OpenOptions::new().append(true).open(&source).unwrap();
                    f.write_all(b"y").unwrap();
                }
            })
        };

        let err = StabilityGatedCopier::new(Duration::from_millis(20))
            .with_max_wait(Some(Duration::from_millis(60)))
            .archive(&source, &dir.path().join("out.mp4"), &CancellationToken::new())
            .await
            .unwrap_err();
        grower.await.unwrap();
        assert!(matches!(err, ArchiveError::StabilityTimeout { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unwritable_destination_is_copy_fault() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("continuous006.mp4");
        std::fs::write(&source, b"x").unwrap();

        // A regular file where the day directory should go.
        let blocker = dir.path().join("2024.03.09");
        std::fs::write(&blocker, b"").unwrap();

        let err = copier()
            .archive(&source, &blocker.join("07.04.59.mp4"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::DestinationWrite { .. }));
    }
}
