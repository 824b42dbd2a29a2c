// src/capture/mod.rs

use chrono::{DateTime, Local};

pub mod command;
pub mod parser;
pub mod source;
pub mod supervisor;

pub use command::CaptureCommand;
pub use parser::{DiagnosticLine, parse_line};
pub use source::{SegmentEventSource, pump_diagnostics};
pub use supervisor::{Backoff, RestartPolicy};

/// One rotating buffer file. The name repeats every `segment_wrap`
/// segments; `opened_at` tells two uses of the same name apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentHandle {
    pub filename: String,
    pub opened_at: DateTime<Local>,
}

impl SegmentHandle {
    pub fn new(filename: impl Into<String>, opened_at: DateTime<Local>) -> Self {
        Self {
            filename: filename.into(),
            opened_at,
        }
    }
}

/// Typed view of the capture process's lifecycle and diagnostic stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentEvent {
    /// The process rotated to a new file; the previous one is complete.
    SegmentOpened(SegmentHandle),
    ProcessExited { exit_code: Option<i32> },
    ProcessError { cause: String },
}
