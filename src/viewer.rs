// src/viewer.rs

use std::process::Stdio;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::capture::supervisor::{Backoff, RestartPolicy, wait_backoff};
use crate::config::ViewerConfig;

pub fn viewer_args(cfg: &ViewerConfig, stream_url: &str) -> Vec<String> {
    let mut args = vec![stream_url.to_string()];
    if cfg.fullscreen {
        args.push("-f".into());
    }
    args
}

/// Keeps a live-preview player running until `shutdown`, restarting it a
/// fixed delay after every exit.
pub fn spawn_viewer(
    cfg: &ViewerConfig,
    stream_url: &str,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let program = cfg.program.clone();
    let args = viewer_args(cfg, stream_url);
    let policy = RestartPolicy::Fixed(Duration::from_millis(cfg.restart_delay_ms));

    tokio::spawn(async move {
        let mut backoff = Backoff::new(policy);

        loop {
            run_viewer_once(&program, &args, &shutdown).await;
            if shutdown.is_cancelled() {
                break;
            }

            let Some(delay) = backoff.next_delay() else {
                break;
            };
            if wait_backoff(delay, &shutdown).await {
                break;
            }
        }
        info!("[viewer] stopped");
    })
}

async fn run_viewer_once(program: &str, args: &[String], shutdown: &CancellationToken) {
    let mut child = match Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            error!("[viewer] spawn of '{}' failed: {}", program, e);
            return;
        }
    };
    info!("[viewer] started {} (pid {:?})", program, child.id());

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("[viewer] {}", line);
            }
        });
    }

    tokio::select! {
        _ = shutdown.cancelled() => {
            if let Err(e) = child.kill().await {
                warn!("[viewer] kill failed: {}", e);
            }
        }
        status = child.wait() => match status {
            Ok(status) => warn!("[viewer] process exited with {}", status),
            Err(e) => error!("[viewer] wait failed: {}", e),
        },
    }
}
