// src/capture/source.rs

use log::{debug, error, info, trace, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::parser::{self, DiagnosticLine};
use super::supervisor::{Backoff, RestartPolicy, wait_backoff};
use super::{CaptureCommand, SegmentEvent, SegmentHandle};
use crate::core::{CaptureError, CaptureResult, now_local};

/// Reads a diagnostic stream to EOF and emits one `SegmentOpened` per
/// rotation line. Returns the number of segments seen.
///
/// Lines that do not match the rotation pattern are dropped; a rotation
/// announced in an unexpected format is missed for good.
pub async fn pump_diagnostics<R>(
    reader: R,
    events: &UnboundedSender<SegmentEvent>,
) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(1024);
    let mut segments = 0;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(segments);
        }

        let chunk = String::from_utf8_lossy(&buf);
        for fragment in parser::fragments(&chunk) {
            match parser::parse_line(fragment) {
                DiagnosticLine::OutputOpened { path } => {
                    debug!("[capture] opened {}", path);
                    segments += 1;
                    let handle = SegmentHandle::new(path, now_local());
                    if events.send(SegmentEvent::SegmentOpened(handle)).is_err() {
                        // nobody listens any more
                        return Ok(segments);
                    }
                }
                DiagnosticLine::Other => trace!("[capture] {}", fragment),
            }
        }
    }
}

struct Running {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// Runs the capture process and turns its diagnostic output into
/// `SegmentEvent`s.
pub struct SegmentEventSource {
    command: CaptureCommand,
    policy: RestartPolicy,
    running: Option<Running>,
}

impl SegmentEventSource {
    pub fn new(command: CaptureCommand, policy: RestartPolicy) -> Self {
        Self {
            command,
            policy,
            running: None,
        }
    }

    pub fn command(&self) -> &CaptureCommand {
        &self.command
    }

    /// True while the supervisor task is alive, including backoff pauses
    /// between restarts.
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    /// Spawns the process and starts supervising it. A failed first spawn
    /// is returned to the caller and never retried.
    pub fn start(&mut self, events: UnboundedSender<SegmentEvent>) -> CaptureResult<()> {
        if self.is_running() {
            return Err(CaptureError::AlreadyRunning);
        }

        let child = self.command.spawn()?;
        info!(
            "[capture] started {} (pid {:?}) in {}",
            self.command.program(),
            child.id(),
            self.command.working_dir().display()
        );

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(supervise(
            self.command.clone(),
            self.policy,
            child,
            events,
            shutdown.clone(),
        ));

        self.running = Some(Running { shutdown, task });
        Ok(())
    }

    /// Kills the process and ends supervision. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.shutdown.cancel();
        if let Err(e) = running.task.await {
            error!("[capture] supervisor task failed: {}", e);
        }
        info!("[capture] stopped");
    }
}

enum RunOutcome {
    Stopped,
    Exited { segments: usize },
}

async fn supervise(
    command: CaptureCommand,
    policy: RestartPolicy,
    mut child: Child,
    events: UnboundedSender<SegmentEvent>,
    shutdown: CancellationToken,
) {
    let mut backoff = Backoff::new(policy);

    loop {
        match run_once(&mut child, &events, &shutdown).await {
            RunOutcome::Stopped => return,
            RunOutcome::Exited { segments } => {
                if segments > 0 {
                    backoff.reset();
                }
            }
        }

        child = loop {
            let Some(delay) = backoff.next_delay() else {
                info!("[capture] restart disabled, supervision ends");
                return;
            };

            info!("[capture] restarting {} in {:?}", command.program(), delay);
            if wait_backoff(delay, &shutdown).await {
                return;
            }

            match command.spawn() {
                Ok(child) => {
                    info!("[capture] restarted (pid {:?})", child.id());
                    break child;
                }
                Err(e) => {
                    error!("[capture] restart failed: {}", e);
                    let _ = events.send(SegmentEvent::ProcessError {
                        cause: e.to_string(),
                    });
                }
            }
        };
    }
}

async fn run_once(
    child: &mut Child,
    events: &UnboundedSender<SegmentEvent>,
    shutdown: &CancellationToken,
) -> RunOutcome {
    let Some(stderr) = child.stderr.take() else {
        let err = CaptureError::MissingDiagnostics;
        error!("[capture] {}", err);
        let _ = events.send(SegmentEvent::ProcessError {
            cause: err.to_string(),
        });
        let _ = child.kill().await;
        return RunOutcome::Exited { segments: 0 };
    };

    let pump_events = events.clone();
    let mut pump = tokio::spawn(async move { pump_diagnostics(stderr, &pump_events).await });

    tokio::select! {
        _ = shutdown.cancelled() => {
            if let Err(e) = child.kill().await {
                warn!("[capture] kill failed: {}", e);
            }
            pump.abort();
            RunOutcome::Stopped
        }
        status = child.wait() => {
            // Drain the rest of stderr so every rotation is reported before
            // the exit.
            let segments = tokio::select! {
                _ = shutdown.cancelled() => {
                    pump.abort();
                    0
                }
                joined = &mut pump => match joined {
                    Ok(Ok(segments)) => segments,
                    Ok(Err(e)) => {
                        warn!("[capture] diagnostic stream error: {}", e);
                        0
                    }
                    Err(_) => 0,
                },
            };

            match status {
                Ok(status) => {
                    warn!("[capture] process exited with {}", status);
                    let _ = events.send(SegmentEvent::ProcessExited {
                        exit_code: status.code(),
                    });
                }
                Err(e) => {
                    error!("[capture] wait failed: {}", e);
                    let _ = events.send(SegmentEvent::ProcessError {
                        cause: e.to_string(),
                    });
                }
            }

            if shutdown.is_cancelled() {
                RunOutcome::Stopped
            } else {
                RunOutcome::Exited { segments }
            }
        }
    }
}
