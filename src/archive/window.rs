// src/archive/window.rs

use std::time::Duration;

use chrono::{DateTime, Local};

use crate::capture::SegmentHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    Closed,
    /// `triggered_at` is the most recent trigger and anchors the closing
    /// deadline. `stamp` names the next archive entry; it starts at the
    /// trigger and moves to each boundary the window is extended past.
    Open {
        triggered_at: DateTime<Local>,
        stamp: DateTime<Local>,
    },
}

/// A completed segment selected for archival. `stamp` names the archive
/// entry: the trigger time, not the segment's own start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRequest {
    pub segment: SegmentHandle,
    pub stamp: DateTime<Local>,
}

/// Decides which completed segments are archived.
///
/// A trigger opens the window (or pushes its deadline). While open, every
/// segment boundary archives the segment that just completed, then closes
/// the window once `min_recording_time` has passed since the last trigger.
/// Retained footage is therefore whole segments, at least
/// `min_recording_time` long, including up to one segment of pre-roll
/// before the trigger.
#[derive(Debug, Clone)]
pub struct ArchivalWindow {
    min_recording_time: Duration,
    state: WindowState,
}

impl ArchivalWindow {
    pub fn new(min_recording_time: Duration) -> Self {
        Self {
            min_recording_time,
            state: WindowState::Closed,
        }
    }

    pub fn state(&self) -> WindowState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, WindowState::Open { .. })
    }

    pub fn last_trigger(&self) -> Option<DateTime<Local>> {
        match self.state {
            WindowState::Open { triggered_at, .. } => Some(triggered_at),
            WindowState::Closed => None,
        }
    }

    pub fn min_recording_time(&self) -> Duration {
        self.min_recording_time
    }

    pub fn on_trigger(&mut self, now: DateTime<Local>) {
        self.state = WindowState::Open {
            triggered_at: now,
            stamp: now,
        };
    }

    /// `completed` is the segment written up to this boundary.
    pub fn on_segment_boundary(
        &mut self,
        completed: &SegmentHandle,
        now: DateTime<Local>,
    ) -> Option<ArchiveRequest> {
        let WindowState::Open {
            triggered_at,
            stamp,
        } = self.state
        else {
            return None;
        };

        let request = ArchiveRequest {
            segment: completed.clone(),
            stamp,
        };

        // Clock steps backwards count as no time elapsed.
        let elapsed = now
            .signed_duration_since(triggered_at)
            .to_std()
            .unwrap_or(Duration::ZERO);

        self.state = if elapsed < self.min_recording_time {
            WindowState::Open {
                triggered_at,
                stamp: now,
            }
        } else {
            WindowState::Closed
        };

        Some(request)
    }
}
