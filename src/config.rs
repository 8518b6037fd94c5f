use crate::cog::CreationOptions;
use crate::error::{MosaicError, Result};
use crate::layout::{NodataPolicy, OutputExtent};
use crate::planner::{ChunkLimits, Watermarks};
use crate::reader::MAX_READ_WORKERS;

/// Filename suffix of classification map tiles.
pub const DEFAULT_TILE_SUFFIX: &str = "_Map.tif";

/// Settings for one merge run.
#[derive(Debug, Clone)]
pub struct MergeConfig {
    pub tile_suffix: String,
    /// Share of available memory one window may use, in (0, 1].
    pub safety_factor: f64,
    pub limits: ChunkLimits,
    pub watermarks: Watermarks,
    pub max_workers: usize,
    /// Nodata used when the first tile has none that fits a byte.
    pub fallback_nodata: u8,
    /// Forces the mosaic nodata, ignoring tile tags.
    pub output_nodata: Option<u8>,
    /// Input value read as nodata in every tile.
    pub input_nodata: Option<i32>,
    pub extent: OutputExtent,
    pub creation: CreationOptions,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            tile_suffix: DEFAULT_TILE_SUFFIX.to_string(),
            safety_factor: 0.6,
            limits: ChunkLimits::default(),
            watermarks: Watermarks::default(),
            max_workers: MAX_READ_WORKERS,
            fallback_nodata: 255,
            output_nodata: None,
            input_nodata: None,
            extent: OutputExtent::FirstTile,
            creation: CreationOptions::default(),
        }
    }
}

impl MergeConfig {
    pub fn nodata_policy(&self) -> NodataPolicy {
        match self.output_nodata {
            Some(value) => NodataPolicy::Fixed(value),
            None => NodataPolicy::FromTiles {
                fallback: self.fallback_nodata,
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.safety_factor > 0.0 && self.safety_factor <= 1.0) {
            return Err(MosaicError::InvalidConfig(format!(
                "safety factor must be in (0, 1], got {}",
                self.safety_factor
            )));
        }
        if self.max_workers == 0 {
            return Err(MosaicError::InvalidConfig(
                "at least one read worker is required".to_string(),
            ));
        }
        if self.tile_suffix.is_empty() {
            return Err(MosaicError::InvalidConfig(
                "tile suffix must not be empty".to_string(),
            ));
        }
        ChunkLimits::new(self.limits.min, self.limits.max)?;
        self.watermarks.validate()?;
        self.creation.validate()
    }
}
