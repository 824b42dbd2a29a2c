pub mod error;
pub mod lock;
pub mod timestamp;

pub use error::{ArchiveError, ArchiveResult, CaptureError, CaptureResult};
pub use lock::lock_mutex;
pub use timestamp::*;
