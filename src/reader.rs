use crate::chunking::Window;
use crate::error::{MosaicError, Result};
use crate::io::RasterBackend;
use crate::layout::TilePlacement;
use log::debug;
use ndarray::{s, Array2};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::path::PathBuf;

/// Upper bound on concurrent tile reads.
pub const MAX_READ_WORKERS: usize = 8;

/// Marks layer pixels outside a tile's footprint. Not a byte category, so
/// the compositor ignores it.
pub const NO_COVERAGE: i32 = i32::MIN;

/// A tile that could not contribute to a window.
#[derive(Debug)]
pub struct TileFailure {
    pub path: PathBuf,
    pub error: MosaicError,
}

/// Result of reading one window from every tile.
#[derive(Debug)]
pub enum ReadOutcome {
    /// At least one tile was read. Layers keep tile order.
    Blocks {
        layers: Vec<Array2<i32>>,
        failures: Vec<TileFailure>,
    },
    /// Every tile touching the window failed.
    NoData { failures: Vec<TileFailure> },
    /// No tile footprint touches the window.
    Uncovered,
}

/// Pool size for `tile_count` tiles: `min(max_workers, tiles, cpus)`, at least 1.
pub fn pool_size(max_workers: usize, tile_count: usize) -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    max_workers.min(tile_count).min(cpus).max(1)
}

/// Reads a window from all tiles on a bounded thread pool.
pub struct ParallelBlockReader<'a, B: RasterBackend> {
    backend: &'a B,
    tiles: &'a [TilePlacement],
    nodata: i32,
    input_nodata: Option<i32>,
    pool: ThreadPool,
}

impl<'a, B: RasterBackend> ParallelBlockReader<'a, B> {
    pub fn new(
        backend: &'a B,
        tiles: &'a [TilePlacement],
        nodata: u8,
        max_workers: usize,
    ) -> Result<Self> {
        let workers = pool_size(max_workers, tiles.len());
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("tile-reader-{}", i))
            .build()?;
        debug!("Tile read pool: {} workers for {} tiles", workers, tiles.len());

        Ok(Self {
            backend,
            tiles,
            nodata: nodata as i32,
            input_nodata: None,
            pool,
        })
    }

    /// Treat `value` as nodata in every tile, whatever the tile's own tag says.
    pub fn with_input_nodata(mut self, value: Option<i32>) -> Self {
        self.input_nodata = value;
        self
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Read `window` (output space) from every overlapping tile and wait for
    /// all reads to finish. Individual failures are captured, never raised.
    pub fn read(&self, window: &Window) -> ReadOutcome {
        let dispatched: Vec<(&TilePlacement, Window, Window)> = self
            .tiles
            .iter()
            .filter_map(|tile| {
                tile.overlap(window)
                    .map(|(in_tile, in_output)| (tile, in_tile, in_output))
            })
            .collect();

        if dispatched.is_empty() {
            return ReadOutcome::Uncovered;
        }

        let results: Vec<(&TilePlacement, Result<Array2<i32>>)> = self.pool.install(|| {
            dispatched
                .par_iter()
                .map(|(tile, in_tile, in_output)| {
                    (*tile, self.read_tile(tile, window, in_tile, in_output))
                })
                .collect()
        });

        let mut layers = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for (tile, result) in results {
            match result {
                Ok(layer) => layers.push(layer),
                Err(error) => failures.push(TileFailure {
                    path: tile.path.clone(),
                    error,
                }),
            }
        }

        if layers.is_empty() {
            ReadOutcome::NoData { failures }
        } else {
            ReadOutcome::Blocks { layers, failures }
        }
    }

    /// Read one tile into a window-shaped layer. The tile's nodata (and the
    /// input nodata override) become the mosaic nodata; pixels outside the
    /// tile are [`NO_COVERAGE`].
    fn read_tile(
        &self,
        tile: &TilePlacement,
        window: &Window,
        in_tile: &Window,
        in_output: &Window,
    ) -> Result<Array2<i32>> {
        let mut data = self.backend.read_window(&tile.path, in_tile)?;
        if data.dim() != in_tile.shape() {
            return Err(MosaicError::BlockShape {
                window: *in_tile,
                got: data.dim(),
            });
        }

        let tile_nodata = tile.metadata.nodata;
        let input_nodata = self.input_nodata;
        if tile_nodata.is_some() || input_nodata.is_some() {
            let fill = self.nodata;
            data.mapv_inplace(|v| {
                if Some(v as f64) == tile_nodata || Some(v) == input_nodata {
                    fill
                } else {
                    v
                }
            });
        }

        if in_output == window {
            return Ok(data);
        }

        let mut layer = Array2::from_elem(window.shape(), NO_COVERAGE);
        let r = in_output.row - window.row;
        let c = in_output.col - window.col;
        layer
            .slice_mut(s![r..r + in_output.height, c..c + in_output.width])
            .assign(&data);
        Ok(layer)
    }
}
