use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

// ---------- Capture ----------
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CaptureConfig {
    pub stream_url: String,
    pub working_dir: PathBuf,
    pub ffmpeg_path: String,
    pub rtsp_transport: String,
    pub segment_time_secs: u64,
    pub segment_wrap: u32,
    pub segment_filename: String,
    pub video_codec: String,
    /// `none` disables audio (`-an`).
    pub audio_codec: String,
    pub segment_format: String,
    pub reset_timestamps: bool,
    pub min_recording_time_secs: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            stream_url: String::new(),
            working_dir: PathBuf::from("/media/.cctv-tmp"),
            ffmpeg_path: "ffmpeg".into(),
            rtsp_transport: "tcp".into(),
            segment_time_secs: 60,
            segment_wrap: 10,
            segment_filename: "continuous%03d.mp4".into(),
            video_codec: "copy".into(),
            audio_codec: "aac".into(),
            segment_format: "mp4".into(),
            reset_timestamps: true,
            min_recording_time_secs: 30,
        }
    }
}

impl CaptureConfig {
    pub fn segment_duration(&self) -> Duration {
        Duration::from_secs(self.segment_time_secs)
    }

    pub fn min_recording_time(&self) -> Duration {
        Duration::from_secs(self.min_recording_time_secs)
    }

    /// Time a segment file survives in the rolling buffer before its name
    /// is reused.
    pub fn buffer_horizon(&self) -> Duration {
        self.segment_duration() * self.segment_wrap
    }

    pub fn audio_disabled(&self) -> bool {
        self.audio_codec.trim().is_empty() || self.audio_codec.eq_ignore_ascii_case("none")
    }
}

// ---------- Archive ----------
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ArchiveConfig {
    pub root_dir: PathBuf,
    pub poll_interval_ms: u64,
    pub max_stable_wait_secs: Option<u64>,
    pub extension: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("/media/cctv"),
            poll_interval_ms: 1000,
            max_stable_wait_secs: None,
            extension: "mp4".into(),
        }
    }
}

impl ArchiveConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_stable_wait(&self) -> Option<Duration> {
        self.max_stable_wait_secs.map(Duration::from_secs)
    }
}

// ---------- Restart ----------
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RestartConfig {
    pub enabled: bool,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
        }
    }
}

// ---------- HTTP ----------
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub username: String,
    pub password: String,
    pub allowed_origin: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".into(),
            username: String::new(),
            password: String::new(),
            allowed_origin: None,
        }
    }
}

impl HttpConfig {
    pub fn auth_enabled(&self) -> bool {
        !self.username.is_empty() || !self.password.is_empty()
    }
}

// ---------- Viewer ----------
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ViewerConfig {
    pub enabled: bool,
    pub program: String,
    pub fullscreen: bool,
    pub restart_delay_ms: u64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            program: "vlc".into(),
            fullscreen: false,
            restart_delay_ms: 5000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    pub capture: CaptureConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub restart: RestartConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub viewer: ViewerConfig,
}

impl Config {
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate().context("config validation failed")?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let capture = &self.capture;
        if capture.stream_url.trim().is_empty() {
            bail!("capture.stream_url must not be empty");
        }
        if capture.segment_time_secs == 0 {
            bail!("capture.segment_time_secs must be > 0");
        }
        if capture.segment_wrap < 2 {
            bail!("capture.segment_wrap must be >= 2");
        }
        if capture.segment_filename.trim().is_empty() {
            bail!("capture.segment_filename must not be empty");
        }

        if self.archive.poll_interval_ms == 0 {
            bail!("archive.poll_interval_ms must be > 0");
        }
        if self.archive.extension.trim().is_empty() {
            bail!("archive.extension must not be empty");
        }

        // A copy needs at least two polls; anything shorter guarantees the
        // segment is recycled before it stabilizes.
        let min_copy_latency = self.archive.poll_interval() * 2;
        if capture.buffer_horizon() <= min_copy_latency {
            bail!(
                "rolling buffer horizon {:?} (segment_wrap × segment_time) must exceed {:?}",
                capture.buffer_horizon(),
                min_copy_latency
            );
        }

        if self.restart.initial_backoff_ms > self.restart.max_backoff_ms {
            bail!("restart.initial_backoff_ms must be <= restart.max_backoff_ms");
        }

        self.http
            .bind
            .parse::<SocketAddr>()
            .with_context(|| format!("http.bind '{}' is not a socket address", self.http.bind))?;

        if self.viewer.enabled && self.viewer.program.trim().is_empty() {
            bail!("viewer.program must not be empty when the viewer is enabled");
        }

        Ok(())
    }
}

pub fn load(path: &str) -> anyhow::Result<Config> {
    let content = fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
    Config::from_toml(&content).with_context(|| format!("parsing {}", path))
}
