// src/engine.rs

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::archive::{ArchivalWindow, ArchiveRequest, ArchivedFile, StabilityGatedCopier};
use crate::capture::{CaptureCommand, RestartPolicy, SegmentEvent, SegmentEventSource, SegmentHandle};
use crate::config::Config;
use crate::core::{
    ArchiveError, ArchiveResult, CaptureError, CaptureResult, archive_entry_path, format_event_time, lock_mutex,
    now_local,
};

/// Window plus the segment currently being written. Both change together
/// under one lock so a trigger never races a boundary.
struct ArchivalState {
    window: ArchivalWindow,
    current: Option<SegmentHandle>,
}

struct InFlightCopy {
    id: u64,
    cancel: CancellationToken,
    reopened: Arc<AtomicBool>,
}

#[derive(Default)]
struct EngineStats {
    segments_observed: AtomicU64,
    triggers: AtomicU64,
    archives_dispatched: AtomicU64,
    archives_completed: AtomicU64,
    archives_failed: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub recording: bool,
    pub window_open: bool,
    pub last_trigger: Option<String>,
    pub current_segment: Option<String>,
    pub segments_observed: u64,
    pub triggers: u64,
    pub archives_dispatched: u64,
    pub archives_completed: u64,
    pub archives_failed: u64,
    pub in_flight: usize,
}

struct EngineInner {
    working_dir: PathBuf,
    archive_root: PathBuf,
    extension: String,
    copier: StabilityGatedCopier,
    source: tokio::sync::Mutex<SegmentEventSource>,
    archival: Mutex<ArchivalState>,
    in_flight: Mutex<HashMap<PathBuf, InFlightCopy>>,
    session: Mutex<CancellationToken>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    recording: AtomicBool,
    next_copy_id: AtomicU64,
    stats: EngineStats,
}

/// Continuous capture into the rolling working directory, with triggered
/// archival of whole segments into the dated archive tree.
///
/// Cheap to clone; all clones drive the same engine.
#[derive(Clone)]
pub struct CaptureEngine {
    inner: Arc<EngineInner>,
}

impl CaptureEngine {
    pub fn new(cfg: &Config) -> Self {
        let command = CaptureCommand::ffmpeg(&cfg.capture);
        let source = SegmentEventSource::new(command, RestartPolicy::from_config(&cfg.restart));

        Self::with_parts(
            source,
            ArchivalWindow::new(cfg.capture.min_recording_time()),
            StabilityGatedCopier::from_config(&cfg.archive),
            cfg.archive.root_dir.clone(),
            cfg.archive.extension.clone(),
        )
    }

    /// Assembles an engine from explicit parts. The working directory is
    /// taken from the source's command.
    pub fn with_parts(
        source: SegmentEventSource,
        window: ArchivalWindow,
        copier: StabilityGatedCopier,
        archive_root: impl Into<PathBuf>,
        extension: impl Into<String>,
    ) -> Self {
        let working_dir = source.command().working_dir().to_path_buf();
        Self {
            inner: Arc::new(EngineInner {
                working_dir,
                archive_root: archive_root.into(),
                extension: extension.into(),
                copier,
                source: tokio::sync::Mutex::new(source),
                archival: Mutex::new(ArchivalState {
                    window,
                    current: None,
                }),
                in_flight: Mutex::new(HashMap::new()),
                session: Mutex::new(CancellationToken::new()),
                dispatcher: Mutex::new(None),
                recording: AtomicBool::new(false),
                next_copy_id: AtomicU64::new(1),
                stats: EngineStats::default(),
            }),
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.inner.working_dir
    }

    pub fn archive_root(&self) -> &Path {
        &self.inner.archive_root
    }

    pub fn is_recording(&self) -> bool {
        self.inner.recording.load(Ordering::SeqCst)
    }

    /// Starts continuous capture. Fails if already started or if the
    /// capture process cannot be spawned.
    pub async fn start_recording(&self) -> CaptureResult<()> {
        let mut source = self.inner.source.lock().await;
        if self.is_recording() {
            return Err(CaptureError::AlreadyRecording);
        }

        let working_dir = &self.inner.working_dir;
        tokio::fs::create_dir_all(working_dir)
            .await
            .map_err(|e| CaptureError::WorkingDirectory {
                path: working_dir.clone(),
                source: e,
            })?;

        let (tx, rx) = unbounded_channel();
        source.start(tx).map_err(|e| match e {
            CaptureError::AlreadyRunning => CaptureError::AlreadyRecording,
            other => other,
        })?;

        *lock_mutex(&self.inner.session, "engine.start.session") = CancellationToken::new();
        self.forget_current_segment("engine.start.current");
        self.inner.recording.store(true, Ordering::SeqCst);

        let engine = self.clone();
        let dispatcher = tokio::spawn(async move { engine.run_dispatcher(rx).await });
        *lock_mutex(&self.inner.dispatcher, "engine.start.dispatcher") = Some(dispatcher);

        info!("[engine] recording into {}", working_dir.display());
        Ok(())
    }

    /// Stops the capture process and abandons in-flight stability polls.
    /// Safe to call when not recording.
    pub async fn stop_recording(&self) {
        let mut source = self.inner.source.lock().await;
        // Cleared first so the draining dispatcher does not report a lost process.
        let was_recording = self.inner.recording.swap(false, Ordering::SeqCst);
        source.stop().await;

        let dispatcher = lock_mutex(&self.inner.dispatcher, "engine.stop.dispatcher").take();
        if let Some(dispatcher) = dispatcher {
            // Source senders are gone, the dispatcher drains and ends.
            if let Err(e) = dispatcher.await {
                error!("[engine] dispatcher task failed: {}", e);
            }
        }

        lock_mutex(&self.inner.session, "engine.stop.session").cancel();
        self.forget_current_segment("engine.stop.current");

        if was_recording {
            info!("[engine] recording stopped");
        }
    }

    /// Marks current footage for preservation. Never fails.
    pub fn trigger_save(&self) -> DateTime<Local> {
        let now = now_local();
        self.trigger_save_at(now);
        now
    }

    pub fn trigger_save_at(&self, now: DateTime<Local>) {
        let was_open = {
            let mut state = lock_mutex(&self.inner.archival, "engine.trigger");
            let was_open = state.window.is_open();
            state.window.on_trigger(now);
            was_open
        };
        self.inner.stats.triggers.fetch_add(1, Ordering::Relaxed);

        if was_open {
            info!("[engine] trigger at {}, window extended", format_event_time(&now));
        } else {
            info!("[engine] trigger at {}, window opened", format_event_time(&now));
        }
    }

    /// Applies one event from the segment source. Never waits on a copy.
    pub fn handle_event(&self, event: SegmentEvent) {
        match event {
            SegmentEvent::SegmentOpened(handle) => self.on_segment_opened(handle),
            SegmentEvent::ProcessExited { exit_code } => {
                warn!("[engine] capture process exited (code {:?})", exit_code);
            }
            SegmentEvent::ProcessError { cause } => {
                error!("[engine] capture process error: {}", cause);
            }
        }
    }

    pub fn status(&self) -> EngineStatus {
        let (window_open, last_trigger, current_segment) = {
            let state = lock_mutex(&self.inner.archival, "engine.status");
            (
                state.window.is_open(),
                state.window.last_trigger().map(|t| format_event_time(&t)),
                state.current.as_ref().map(|s| s.filename.clone()),
            )
        };
        let in_flight = lock_mutex(&self.inner.in_flight, "engine.status.in_flight").len();
        let stats = &self.inner.stats;

        EngineStatus {
            recording: self.is_recording(),
            window_open,
            last_trigger,
            current_segment,
            segments_observed: stats.segments_observed.load(Ordering::Relaxed),
            triggers: stats.triggers.load(Ordering::Relaxed),
            archives_dispatched: stats.archives_dispatched.load(Ordering::Relaxed),
            archives_completed: stats.archives_completed.load(Ordering::Relaxed),
            archives_failed: stats.archives_failed.load(Ordering::Relaxed),
            in_flight,
        }
    }

    async fn run_dispatcher(self, mut rx: UnboundedReceiver<SegmentEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle_event(event);
        }
        debug!("[engine] event stream closed");

        // Supervision ended without a stop.
        if self.inner.recording.swap(false, Ordering::SeqCst) {
            warn!("[engine] capture process gone, recording stopped");
        }
    }

    /// A new capture process starts numbering from scratch, so the last
    /// segment of a previous session is never the one it completes.
    fn forget_current_segment(&self, context: &str) {
        lock_mutex(&self.inner.archival, context).current = None;
    }

    fn on_segment_opened(&self, opened: SegmentHandle) {
        let source_path = self.inner.working_dir.join(&opened.filename);
        self.cancel_reopened_copy(&source_path);

        let now = opened.opened_at;
        let reused_name = opened.filename.clone();
        let request = {
            let mut state = lock_mutex(&self.inner.archival, "engine.segment_opened");
            let completed = state.current.replace(opened);
            completed.and_then(|completed| state.window.on_segment_boundary(&completed, now))
        };
        self.inner.stats.segments_observed.fetch_add(1, Ordering::Relaxed);
        debug!("[engine] boundary at {} -> {}", format_event_time(&now), source_path.display());

        let Some(request) = request else {
            return;
        };

        // The completed file was just truncated by the new segment.
        if request.segment.filename == reused_name {
            let destination =
                archive_entry_path(&self.inner.archive_root, &request.stamp, &self.inner.extension);
            self.inner.stats.archives_dispatched.fetch_add(1, Ordering::Relaxed);
            self.record_outcome(
                &source_path,
                &destination,
                Err(ArchiveError::SegmentReopened {
                    path: source_path.clone(),
                }),
            );
            return;
        }

        self.dispatch(request);
    }

    /// The capture process reusing a filename means any copy still polling
    /// that file would read the next segment's bytes.
    fn cancel_reopened_copy(&self, source_path: &Path) {
        let in_flight = lock_mutex(&self.inner.in_flight, "engine.reopened");
        if let Some(copy) = in_flight.get(source_path) {
            copy.reopened.store(true, Ordering::SeqCst);
            copy.cancel.cancel();
        }
    }

    fn dispatch(&self, request: ArchiveRequest) {
        let source = self.inner.working_dir.join(&request.segment.filename);
        let destination =
            archive_entry_path(&self.inner.archive_root, &request.stamp, &self.inner.extension);

        let id = self.inner.next_copy_id.fetch_add(1, Ordering::Relaxed);
        let cancel = lock_mutex(&self.inner.session, "engine.dispatch.session").child_token();
        let reopened = Arc::new(AtomicBool::new(false));
        lock_mutex(&self.inner.in_flight, "engine.dispatch").insert(
            source.clone(),
            InFlightCopy {
                id,
                cancel: cancel.clone(),
                reopened: reopened.clone(),
            },
        );
        self.inner.stats.archives_dispatched.fetch_add(1, Ordering::Relaxed);

        info!(
            "[engine] archiving {} -> {}",
            source.display(),
            destination.display()
        );

        let engine = self.clone();
        tokio::spawn(async move {
            let result = engine.inner.copier.archive(&source, &destination, &cancel).await;
            let result = match result {
                Err(ArchiveError::Cancelled) if reopened.load(Ordering::SeqCst) => {
                    Err(ArchiveError::SegmentReopened {
                        path: source.clone(),
                    })
                }
                other => other,
            };
            engine.record_outcome(&source, &destination, result);
            engine.finish_copy(&source, id);
        });
    }

    fn finish_copy(&self, source: &Path, id: u64) {
        let mut in_flight = lock_mutex(&self.inner.in_flight, "engine.finish_copy");
        if in_flight.get(source).is_some_and(|copy| copy.id == id) {
            in_flight.remove(source);
        }
    }

    fn record_outcome(
        &self,
        source: &Path,
        destination: &Path,
        result: ArchiveResult<ArchivedFile>,
    ) {
        let stats = &self.inner.stats;
        match result {
            Ok(file) => {
                stats.archives_completed.fetch_add(1, Ordering::Relaxed);
                info!(
                    "[archive] {} copied to {} ({} bytes)",
                    source.display(),
                    file.destination.display(),
                    file.bytes
                );
            }
            Err(ArchiveError::Cancelled) => {
                info!("[archive] abandoned {} (engine stopped)", source.display());
            }
            Err(e) => {
                stats.archives_failed.fetch_add(1, Ordering::Relaxed);
                if e.is_stability_fault() {
                    error!(
                        "[archive] {} -> {} stability fault: {}",
                        source.display(),
                        destination.display(),
                        e
                    );
                } else {
                    error!(
                        "[archive] {} -> {} copy fault: {}",
                        source.display(),
                        destination.display(),
                        e
                    );
                }
            }
        }
    }
}
