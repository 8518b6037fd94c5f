// Library exports for testing and reuse

pub mod chunking;
pub mod cli;
pub mod clip;
pub mod cog;
pub mod composite;
pub mod config;
pub mod controller;
pub mod diagnostics;
pub mod discover;
pub mod error;
pub mod in_memory;
pub mod io;
pub mod layout;
pub mod memory;
pub mod pipeline;
pub mod planner;
pub mod reader;
pub mod validate;
pub mod writer;

// Re-export commonly used types
pub use chunking::Window;
pub use clip::{BoundaryClipper, GdalWarpClipper};
pub use config::MergeConfig;
pub use controller::{MergeController, MergeOutcome, MergeWarning};
pub use diagnostics::{LogObserver, MergeEvent, MergeObserver, RecordingObserver};
pub use error::{MosaicError, Result};
pub use in_memory::InMemoryBackend;
#[cfg(feature = "gdal")]
pub use io::GdalBackend;
pub use io::{RasterBackend, RasterMetadata};
pub use memory::{MemorySampler, MemorySnapshot, SystemMemory};
pub use pipeline::{merge, BoundaryClip};
