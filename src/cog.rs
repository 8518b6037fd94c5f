use crate::error::{MosaicError, Result};

const VALID_COMPRESSION: [&str; 5] = ["LZW", "DEFLATE", "ZSTD", "PACKBITS", "NONE"];

/// GeoTIFF creation settings for the mosaic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationOptions {
    pub compression: String,
    pub block_size: usize,
    pub build_overviews: bool,
}

impl Default for CreationOptions {
    fn default() -> Self {
        Self {
            compression: "LZW".to_string(),
            block_size: 256,
            build_overviews: false,
        }
    }
}

impl CreationOptions {
    pub fn validate(&self) -> Result<()> {
        validate_compression(&self.compression)?;
        validate_tile_size(self.block_size)
    }

    /// Driver option strings (`KEY=VALUE`).
    pub fn to_driver_options(&self) -> Vec<String> {
        vec![
            format!("COMPRESS={}", self.compression),
            "TILED=YES".to_string(),
            format!("BLOCKXSIZE={}", self.block_size),
            format!("BLOCKYSIZE={}", self.block_size),
            "BIGTIFF=IF_SAFER".to_string(),
        ]
    }
}

pub fn validate_compression(compression: &str) -> Result<()> {
    if !VALID_COMPRESSION.contains(&compression) {
        return Err(MosaicError::InvalidCompression(compression.to_string()));
    }
    Ok(())
}

/// Tile size must be a positive multiple of 16.
pub fn validate_tile_size(tile_size: usize) -> Result<()> {
    if tile_size == 0 || tile_size % 16 != 0 {
        return Err(MosaicError::InvalidTileSize(tile_size));
    }
    Ok(())
}

/// Power-of-two overview factors down to a 256 pixel short side.
pub fn overview_levels(width: usize, height: usize) -> Vec<i32> {
    let min_dim = width.min(height);
    let mut levels = Vec::new();
    let mut level = 2;
    while min_dim / level >= 256 {
        levels.push(level as i32);
        level *= 2;
    }
    levels
}

/// Categories can't be averaged.
pub const OVERVIEW_RESAMPLING: &str = "NEAREST";
