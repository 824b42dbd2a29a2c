// src/capture/command.rs

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::config::CaptureConfig;
use crate::core::{CaptureError, CaptureResult};

/// Command line of the capture process. Built from the capture config in
/// production; tests substitute any program that writes the same
/// diagnostic lines.
#[derive(Debug, Clone)]
pub struct CaptureCommand {
    program: String,
    args: Vec<String>,
    working_dir: PathBuf,
}

impl CaptureCommand {
    pub fn new(program: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// ffmpeg segment muxer writing into the rolling working directory.
    pub fn ffmpeg(cfg: &CaptureConfig) -> Self {
        let mut cmd = Self::new(&cfg.ffmpeg_path, &cfg.working_dir);

        if !cfg.rtsp_transport.is_empty() {
            cmd = cmd.args(["-rtsp_transport", cfg.rtsp_transport.as_str()]);
        }
        cmd = cmd
            .args(["-i", cfg.stream_url.as_str()])
            .args(["-c:v", cfg.video_codec.as_str()]);

        cmd = if cfg.audio_disabled() {
            cmd.arg("-an")
        } else {
            cmd.args(["-c:a", cfg.audio_codec.as_str()])
        };

        cmd.args(["-f", "segment"])
            .args(["-segment_time".to_string(), cfg.segment_time_secs.to_string()])
            .args(["-segment_wrap".to_string(), cfg.segment_wrap.to_string()])
            .args(["-segment_format", cfg.segment_format.as_str()])
            .args([
                "-reset_timestamps",
                if cfg.reset_timestamps { "1" } else { "0" },
            ])
            .arg(&cfg.segment_filename)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Spawns with stderr piped; everything else is discarded. The child is
    /// killed if its handle is dropped.
    pub fn spawn(&self) -> CaptureResult<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CaptureError::spawn(&self.program, e))
    }
}
