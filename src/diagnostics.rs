//! Merge diagnostics.
//!
//! The controller reports what it decides through a [`MergeObserver`] handed
//! to it by the caller. [`LogObserver`] writes those events to the `log`
//! facade; [`RecordingObserver`] keeps them for inspection.

use crate::chunking::Window;
use crate::memory::MemorySnapshot;
use crate::planner::ChunkPlan;
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::Mutex;

/// Why the chunk size went down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShrinkCause {
    MemoryPressure { used_percent: f64 },
    WindowFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeEvent {
    Planned {
        tiles: usize,
        workers: usize,
        plan: ChunkPlan,
        memory: MemorySnapshot,
    },
    TileSkipped {
        path: PathBuf,
        reason: String,
    },
    ChunkShrunk {
        from: usize,
        to: usize,
        cause: ShrinkCause,
    },
    ChunkGrown {
        from: usize,
        to: usize,
        used_percent: f64,
    },
    TileReadFailed {
        path: PathBuf,
        window: Window,
        reason: String,
    },
    WindowCommitted {
        window: Window,
        chunk_size: usize,
        contributors: usize,
        progress: f64,
    },
    WindowFailed {
        window: Window,
        chunk_size: usize,
    },
    Finalized {
        path: PathBuf,
        distinct_values: Vec<u8>,
    },
    DegenerateOutput {
        nodata: u8,
    },
    Aborted {
        reason: String,
    },
}

pub trait MergeObserver: Sync {
    fn on_event(&self, event: &MergeEvent);
}

/// Forwards events to the `log` macros.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl MergeObserver for LogObserver {
    fn on_event(&self, event: &MergeEvent) {
        match event {
            MergeEvent::Planned {
                tiles,
                workers,
                plan,
                memory,
            } => info!(
                "Merging {} tiles | chunk {}x{} | {} read workers | {:.1}% memory in use",
                tiles,
                plan.chunk_size,
                plan.chunk_size,
                workers,
                memory.used_percent()
            ),
            MergeEvent::TileSkipped { path, reason } => {
                warn!("Skipping tile {}: {}", path.display(), reason)
            }
            MergeEvent::ChunkShrunk { from, to, cause } => match cause {
                ShrinkCause::MemoryPressure { used_percent } => warn!(
                    "Memory pressure ({:.1}%), chunk size {} → {}",
                    used_percent, from, to
                ),
                ShrinkCause::WindowFailed => {
                    warn!("Window failed, retrying with chunk size {} → {}", from, to)
                }
            },
            MergeEvent::ChunkGrown {
                from,
                to,
                used_percent,
            } => debug!(
                "Memory at {:.1}%, chunk size {} → {}",
                used_percent, from, to
            ),
            MergeEvent::TileReadFailed {
                path,
                window,
                reason,
            } => error!(
                "Tile {} failed for window ({}): {}",
                path.display(),
                window,
                reason
            ),
            MergeEvent::WindowCommitted {
                window,
                chunk_size,
                contributors,
                progress,
            } => debug!(
                "Committed window ({}) from {} tiles | chunk {} | {:.1}%",
                window,
                contributors,
                chunk_size,
                progress * 100.0
            ),
            MergeEvent::WindowFailed { window, chunk_size } => error!(
                "Window ({}) failed at chunk size {}",
                window, chunk_size
            ),
            MergeEvent::Finalized {
                path,
                distinct_values,
            } => info!(
                "Output {} validated, distinct values: {:?}",
                path.display(),
                distinct_values
            ),
            MergeEvent::DegenerateOutput { nodata } => {
                warn!("Output may be entirely nodata ({})", nodata)
            }
            MergeEvent::Aborted { reason } => error!("Merge aborted: {}", reason),
        }
    }
}

/// Logs every event and keeps a copy.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<MergeEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MergeEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl MergeObserver for RecordingObserver {
    fn on_event(&self, event: &MergeEvent) {
        LogObserver.on_event(event);
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}
