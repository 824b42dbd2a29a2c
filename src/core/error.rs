use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type CaptureResult<T> = Result<T, CaptureError>;
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Faults of the capture process lifecycle. Only spawn-time faults reach
/// callers; runtime faults travel as `SegmentEvent`s.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture process already running")]
    AlreadyRunning,
    #[error("already recording")]
    AlreadyRecording,
    #[error("failed to spawn '{program}': {source}")]
    ProcessSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("capture process has no diagnostic stream")]
    MissingDiagnostics,
    #[error("working directory '{}' unusable: {source}", .path.display())]
    WorkingDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CaptureError {
    pub fn spawn(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::ProcessSpawn {
            program: program.into(),
            source,
        }
    }
}

/// Per-copy faults. None of them escalates beyond the copy that raised it.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("source '{}' unavailable: {source}", .path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("source '{}' shrank while polling ({previous} -> {current} bytes), segment recycled", .path.display())]
    SegmentShrunk {
        path: PathBuf,
        previous: u64,
        current: u64,
    },
    #[error("source '{}' reopened by the capture process before it was copied", .path.display())]
    SegmentReopened { path: PathBuf },
    #[error("source '{}' did not stabilize within {waited:?}", .path.display())]
    StabilityTimeout { path: PathBuf, waited: Duration },
    #[error("failed to write '{}': {source}", .path.display())]
    DestinationWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("archive cancelled")]
    Cancelled,
}

impl ArchiveError {
    pub fn source_unavailable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::SourceUnavailable {
            path: path.into(),
            source,
        }
    }

    pub fn destination_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DestinationWrite {
            path: path.into(),
            source,
        }
    }

    /// Stability faults come from the source side; everything else is a
    /// destination or lifecycle fault.
    pub fn is_stability_fault(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable { .. }
                | Self::SegmentShrunk { .. }
                | Self::SegmentReopened { .. }
                | Self::StabilityTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stability_fault_classification() {
        let shrunk = ArchiveError::SegmentShrunk {
            path: PathBuf::from("continuous000.mp4"),
            previous: 2048,
            current: 12,
        };
        assert!(shrunk.is_stability_fault());
        assert!(ArchiveError::SegmentReopened {
            path: PathBuf::from("continuous000.mp4")
        }
        .is_stability_fault());

        let write = ArchiveError::destination_write(
            "/media/cctv/x.mp4",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(!write.is_stability_fault());
        assert!(!ArchiveError::Cancelled.is_stability_fault());
    }

    #[test]
    fn test_error_messages_name_paths() {
        let err = ArchiveError::source_unavailable(
            "/tmp/continuous003.mp4",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("continuous003.mp4"));

        let err = CaptureError::spawn(
            "ffmpeg",
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        );
        assert!(err.to_string().contains("ffmpeg"));
    }
}
