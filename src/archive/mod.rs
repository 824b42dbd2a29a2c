// src/archive/mod.rs

pub mod catalog;
pub mod copier;
pub mod window;

pub use catalog::ArchiveCatalog;
pub use copier::{ArchivedFile, StabilityGatedCopier};
pub use window::{ArchivalWindow, ArchiveRequest, WindowState};
