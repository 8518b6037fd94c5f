use crate::chunking::Window;
use crate::error::{MosaicError, Result};
use crate::io::RasterMetadata;
use log::{debug, info, warn};
use std::path::PathBuf;

/// Which area the mosaic covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputExtent {
    /// The grid of the first readable tile.
    #[default]
    FirstTile,
    /// The bounding box of every tile, on the first tile's pixel grid.
    Union,
}

/// A source tile and where it sits in the output grid.
#[derive(Debug, Clone)]
pub struct TilePlacement {
    pub path: PathBuf,
    pub metadata: RasterMetadata,
    pub row_offset: i64,
    pub col_offset: i64,
}

impl TilePlacement {
    /// Part of `window` covered by this tile, as `(tile space, output space)`.
    pub fn overlap(&self, window: &Window) -> Option<(Window, Window)> {
        let tile_row_end = self.row_offset + self.metadata.height as i64;
        let tile_col_end = self.col_offset + self.metadata.width as i64;

        let r0 = self.row_offset.max(window.row as i64);
        let r1 = tile_row_end.min(window.row_end() as i64);
        let c0 = self.col_offset.max(window.col as i64);
        let c1 = tile_col_end.min(window.col_end() as i64);
        if r0 >= r1 || c0 >= c1 {
            return None;
        }

        let height = (r1 - r0) as usize;
        let width = (c1 - c0) as usize;
        let tile = Window::new(
            (r0 - self.row_offset) as usize,
            (c0 - self.col_offset) as usize,
            height,
            width,
        );
        let output = Window::new(r0 as usize, c0 as usize, height, width);
        Some((tile, output))
    }
}

/// Output grid plus the placement of every tile on it.
/// How the mosaic's nodata value is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodataPolicy {
    /// The first tile's nodata if it fits a byte, else `fallback`.
    FromTiles { fallback: u8 },
    /// Always this value.
    Fixed(u8),
}

#[derive(Debug, Clone)]
pub struct MosaicLayout {
    pub width: usize,
    pub height: usize,
    pub geotransform: [f64; 6],
    pub projection: String,
    pub nodata: u8,
    pub tiles: Vec<TilePlacement>,
}

impl MosaicLayout {
    /// Lay out described tiles. The first tile fixes the pixel grid and CRS.
    pub fn build(
        described: Vec<(PathBuf, RasterMetadata)>,
        extent: OutputExtent,
        nodata: NodataPolicy,
    ) -> Result<Self> {
        let Some((first_path, first)) = described.first().cloned() else {
            return Err(MosaicError::NoReadableTiles(0));
        };

        let grid_px = (first.pixel_width(), first.pixel_height());
        for (path, meta) in &described {
            let px = (meta.pixel_width(), meta.pixel_height());
            if !same_resolution(px, grid_px) {
                return Err(MosaicError::ResolutionMismatch {
                    path: path.clone(),
                    tile: px,
                    grid: grid_px,
                });
            }
            if meta.projection != first.projection {
                warn!(
                    "Tile {} has a different CRS than {}; placing it on the same grid",
                    path.display(),
                    first_path.display()
                );
            }
        }

        let nodata = match nodata {
            NodataPolicy::Fixed(value) => value,
            NodataPolicy::FromTiles { fallback } => {
                if first.nodata.is_some() && first.nodata_code().is_none() {
                    warn!(
                        "Tile nodata {:?} is not a byte value, using {}",
                        first.nodata, fallback
                    );
                }
                first.nodata_code().unwrap_or(fallback)
            }
        };

        let (geotransform, width, height) = match extent {
            OutputExtent::FirstTile => (first.geotransform, first.width, first.height),
            OutputExtent::Union => union_grid(&described),
        };

        let tiles = described
            .into_iter()
            .map(|(path, metadata)| {
                let col_offset =
                    ((metadata.geotransform[0] - geotransform[0]) / geotransform[1]).round() as i64;
                let row_offset =
                    ((metadata.geotransform[3] - geotransform[3]) / geotransform[5]).round() as i64;
                debug!(
                    "Tile {} placed at row {}, col {}",
                    path.display(),
                    row_offset,
                    col_offset
                );
                TilePlacement {
                    path,
                    metadata,
                    row_offset,
                    col_offset,
                }
            })
            .collect();

        info!("Mosaic grid: {}x{} pixels, nodata {}", width, height, nodata);

        Ok(Self {
            width,
            height,
            geotransform,
            projection: first.projection,
            nodata,
            tiles,
        })
    }

    pub fn max_band_count(&self) -> usize {
        self.tiles
            .iter()
            .map(|t| t.metadata.band_count)
            .max()
            .unwrap_or(1)
    }
}

fn same_resolution(a: (f64, f64), b: (f64, f64)) -> bool {
    let close = |x: f64, y: f64| (x - y).abs() <= 1e-9 * x.abs().max(y.abs()).max(1.0);
    close(a.0, b.0) && close(a.1, b.1)
}

/// Bounding grid of all tiles, anchored on the first tile's pixel size.
fn union_grid(described: &[(PathBuf, RasterMetadata)]) -> ([f64; 6], usize, usize) {
    let first = &described[0].1;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = first.bounds();
    for (_, meta) in &described[1..] {
        let (x0, y0, x1, y1) = meta.bounds();
        min_x = min_x.min(x0);
        min_y = min_y.min(y0);
        max_x = max_x.max(x1);
        max_y = max_y.max(y1);
    }

    let px = first.pixel_width();
    let py = first.pixel_height();
    let width = ((max_x - min_x) / px.abs()).round() as usize;
    let height = ((max_y - min_y) / py.abs()).round() as usize;

    let origin_x = if px > 0.0 { min_x } else { max_x };
    let origin_y = if py < 0.0 { max_y } else { min_y };
    let mut geotransform = first.geotransform;
    geotransform[0] = origin_x;
    geotransform[3] = origin_y;
    (geotransform, width, height)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FROM_TILES: NodataPolicy = NodataPolicy::FromTiles { fallback: 255 };

    fn meta(x0: f64, y0: f64, width: usize, height: usize, nodata: Option<f64>) -> RasterMetadata {
        RasterMetadata {
            width,
            height,
            band_count: 1,
            bytes_per_pixel: 1,
            geotransform: [x0, 10.0, 0.0, y0, 0.0, -10.0],
            projection: "EPSG:4326".to_string(),
            nodata,
        }
    }

    #[test]
    fn test_first_tile_extent() {
        let layout = MosaicLayout::build(
            vec![
                ("a.tif".into(), meta(0.0, 100.0, 10, 10, Some(0.0))),
                ("b.tif".into(), meta(50.0, 100.0, 10, 10, Some(0.0))),
            ],
            OutputExtent::FirstTile,
            FROM_TILES,
        )
        .unwrap();
        assert_eq!((layout.width, layout.height), (10, 10));
        assert_eq!(layout.nodata, 0);
        assert_eq!(layout.tiles[1].col_offset, 5);
        assert_eq!(layout.tiles[1].row_offset, 0);
    }

    #[test]
    fn test_union_extent() {
        let layout = MosaicLayout::build(
            vec![
                ("a.tif".into(), meta(0.0, 100.0, 10, 10, None)),
                ("b.tif".into(), meta(50.0, 50.0, 10, 10, None)),
            ],
            OutputExtent::Union,
            FROM_TILES,
        )
        .unwrap();
        assert_eq!((layout.width, layout.height), (15, 15));
        assert_eq!(layout.geotransform[0], 0.0);
        assert_eq!(layout.geotransform[3], 100.0);
        assert_eq!(layout.nodata, 255);
        assert_eq!((layout.tiles[1].row_offset, layout.tiles[1].col_offset), (5, 5));
    }

    #[test]
    fn test_non_byte_nodata_uses_fallback() {
        let layout = MosaicLayout::build(
            vec![("a.tif".into(), meta(0.0, 0.0, 4, 4, Some(-9999.0)))],
            OutputExtent::FirstTile,
            FROM_TILES,
        )
        .unwrap();
        assert_eq!(layout.nodata, 255);
    }

    #[test]
    fn test_fixed_nodata_overrides_tiles() {
        let layout = MosaicLayout::build(
            vec![("a.tif".into(), meta(0.0, 0.0, 4, 4, Some(0.0)))],
            OutputExtent::FirstTile,
            NodataPolicy::Fixed(255),
        )
        .unwrap();
        assert_eq!(layout.nodata, 255);
    }

    #[test]
    fn test_resolution_mismatch_rejected() {
        let mut coarse = meta(0.0, 0.0, 4, 4, None);
        coarse.geotransform[1] = 20.0;
        let err = MosaicLayout::build(
            vec![
                ("a.tif".into(), meta(0.0, 0.0, 4, 4, None)),
                ("b.tif".into(), coarse),
            ],
            OutputExtent::FirstTile,
            FROM_TILES,
        )
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_overlap_clips_to_tile_footprint() {
        let tile = TilePlacement {
            path: "b.tif".into(),
            metadata: meta(0.0, 0.0, 10, 10, None),
            row_offset: 5,
            col_offset: -3,
        };
        let (in_tile, in_output) = tile.overlap(&Window::new(0, 0, 8, 8)).unwrap();
        assert_eq!(in_output, Window::new(5, 0, 3, 7));
        assert_eq!(in_tile, Window::new(0, 3, 3, 7));
        assert!(tile.overlap(&Window::new(0, 0, 5, 5)).is_none());
    }
}
