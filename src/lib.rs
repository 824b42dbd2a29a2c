// src/lib.rs
pub mod archive;
pub mod capture;
pub mod config;
pub mod core;
pub mod engine;
pub mod viewer;
pub mod web;

pub use archive::{ArchivalWindow, ArchiveCatalog, StabilityGatedCopier};
pub use capture::{CaptureCommand, SegmentEvent, SegmentEventSource, SegmentHandle};
pub use config::Config;
pub use engine::{CaptureEngine, EngineStatus};
