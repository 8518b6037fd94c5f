use crate::cog::CreationOptions;
use crate::config::{MergeConfig, DEFAULT_TILE_SUFFIX};
use crate::error::Result;
use crate::layout::OutputExtent;
use crate::planner::{ChunkLimits, Watermarks, MAX_CHUNK, MIN_CHUNK};
use crate::reader::MAX_READ_WORKERS;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "categorical-mosaic")]
#[command(about = "Merge categorical raster tiles into one mode-composited mosaic")]
#[command(version)]
pub struct Args {
    /// Directory searched recursively for tiles
    #[arg(short, long, value_name = "DIR")]
    pub input: PathBuf,

    /// Output GeoTIFF path (single-band, 8-bit)
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    /// Vector boundary (.shp, .gpkg), or a directory of them, to clip the mosaic to
    #[arg(short, long, value_name = "PATH")]
    pub boundary: Option<PathBuf>,

    /// Filename suffix identifying tiles
    #[arg(long, default_value = DEFAULT_TILE_SUFFIX)]
    pub suffix: String,

    /// Share of available memory one window may use
    #[arg(long, default_value_t = 0.6)]
    pub safety_factor: f64,

    /// Memory usage (%) above which the chunk size is halved
    #[arg(long, default_value_t = 85.0)]
    pub high_watermark: f64,

    /// Memory usage (%) below which the chunk size is doubled
    #[arg(long, default_value_t = 60.0)]
    pub low_watermark: f64,

    /// Smallest chunk side in pixels
    #[arg(long, default_value_t = MIN_CHUNK)]
    pub min_chunk: usize,

    /// Largest chunk side in pixels
    #[arg(long, default_value_t = MAX_CHUNK)]
    pub max_chunk: usize,

    /// Maximum concurrent tile reads
    #[arg(short, long, value_name = "N", default_value_t = MAX_READ_WORKERS)]
    pub threads: usize,

    /// Nodata used when tiles don't define a byte nodata value
    #[arg(long, default_value_t = 255)]
    pub nodata: u8,

    /// Input value treated as nodata in every tile (e.g. 0)
    #[arg(long, value_name = "VALUE", allow_negative_numbers = true)]
    pub input_nodata: Option<i32>,

    /// Force the output nodata value, ignoring tile nodata tags
    #[arg(long, value_name = "VALUE")]
    pub output_nodata: Option<u8>,

    /// Cover the union of all tiles instead of the first tile's extent
    #[arg(long)]
    pub union_extent: bool,

    /// Compression (LZW, DEFLATE, ZSTD, PACKBITS, NONE)
    #[arg(long, default_value = "LZW")]
    pub compression: String,

    /// Internal tile size of the output (multiple of 16)
    #[arg(long, default_value_t = 256)]
    pub block_size: usize,

    /// Build internal overviews (nearest neighbour)
    #[arg(long)]
    pub overviews: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn to_config(&self) -> Result<MergeConfig> {
        let config = MergeConfig {
            tile_suffix: self.suffix.clone(),
            safety_factor: self.safety_factor,
            limits: ChunkLimits::new(self.min_chunk, self.max_chunk)?,
            watermarks: Watermarks {
                high: self.high_watermark,
                low: self.low_watermark,
            },
            max_workers: self.threads,
            fallback_nodata: self.nodata,
            output_nodata: self.output_nodata,
            input_nodata: self.input_nodata,
            extent: if self.union_extent {
                OutputExtent::Union
            } else {
                OutputExtent::FirstTile
            },
            creation: CreationOptions {
                compression: self.compression.to_uppercase(),
                block_size: self.block_size,
                build_overviews: self.overviews,
            },
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::NodataPolicy;

    #[test]
    fn test_defaults_match_merge_config() {
        let args = Args::parse_from(["categorical-mosaic", "-i", "tiles", "-o", "out.tif"]);
        let config = args.to_config().unwrap();
        let defaults = MergeConfig::default();
        assert_eq!(config.tile_suffix, defaults.tile_suffix);
        assert_eq!(config.limits, defaults.limits);
        assert_eq!(config.watermarks, defaults.watermarks);
        assert_eq!(config.creation, defaults.creation);
        assert_eq!(config.extent, OutputExtent::FirstTile);
        assert_eq!(config.input_nodata, None);
        assert_eq!(config.output_nodata, None);
        assert!(args.boundary.is_none());
    }

    #[test]
    fn test_flags() {
        let args = Args::parse_from([
            "categorical-mosaic",
            "-i",
            "tiles",
            "-o",
            "out.tif",
            "--boundary",
            "region.shp",
            "--union-extent",
            "--compression",
            "deflate",
            "--min-chunk",
            "512",
            "--input-nodata",
            "0",
            "--output-nodata",
            "255",
        ]);
        let config = args.to_config().unwrap();
        assert_eq!(config.extent, OutputExtent::Union);
        assert_eq!(config.creation.compression, "DEFLATE");
        assert_eq!(config.limits.min, 512);
        assert_eq!(config.input_nodata, Some(0));
        assert_eq!(config.nodata_policy(), NodataPolicy::Fixed(255));
        assert_eq!(args.boundary, Some(PathBuf::from("region.shp")));
    }

    #[test]
    fn test_inverted_watermarks_rejected() {
        let args = Args::parse_from([
            "categorical-mosaic",
            "-i",
            "tiles",
            "-o",
            "out.tif",
            "--high-watermark",
            "50",
            "--low-watermark",
            "70",
        ]);
        assert!(args.to_config().is_err());
    }
}
