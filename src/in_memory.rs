//! In-memory raster backend.
//!
//! Rasters live in a shared map keyed by path. Faults can be attached to
//! individual paths to simulate corrupt or flaky tiles.

use crate::chunking::Window;
use crate::error::{MosaicError, Result};
use crate::io::{BlockWriter, OutputSpec, RasterBackend, RasterMetadata};
use ndarray::{s, Array2};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq)]
pub struct MemRaster {
    pub metadata: RasterMetadata,
    pub data: Array2<i32>,
    pub overview_levels: Vec<i32>,
}

impl MemRaster {
    /// Single-band byte raster.
    pub fn tile(data: Array2<i32>, geotransform: [f64; 6], nodata: Option<f64>) -> Self {
        let (height, width) = data.dim();
        Self {
            metadata: RasterMetadata {
                width,
                height,
                band_count: 1,
                bytes_per_pixel: 1,
                geotransform,
                projection: String::new(),
                nodata,
            },
            data,
            overview_levels: Vec::new(),
        }
    }
}

/// Simulated failure attached to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Every open fails.
    Corrupt,
    /// Describing works but window reads fail.
    Unreadable,
    /// Reads fail when the window exceeds this many pixels on a side.
    FailWindowsLargerThan(usize),
}

#[derive(Debug, Default)]
struct Store {
    rasters: HashMap<PathBuf, MemRaster>,
    faults: HashMap<PathBuf, Fault>,
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    store: Arc<Mutex<Store>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, path: impl Into<PathBuf>, raster: MemRaster) {
        self.lock().rasters.insert(path.into(), raster);
    }

    pub fn set_fault(&self, path: impl Into<PathBuf>, fault: Fault) {
        self.lock().faults.insert(path.into(), fault);
    }

    pub fn get(&self, path: &Path) -> Option<MemRaster> {
        self.lock().rasters.get(path).cloned()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().rasters.contains_key(path)
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.lock().rasters.keys().cloned().collect();
        paths.sort();
        paths
    }

    fn check_fault(&self, store: &Store, path: &Path, window: Option<&Window>) -> Result<()> {
        let reason = match (store.faults.get(path), window) {
            (Some(Fault::Corrupt), _) => Some("corrupt raster header".to_string()),
            (Some(Fault::Unreadable), Some(_)) => Some("unreadable block".to_string()),
            (Some(Fault::FailWindowsLargerThan(limit)), Some(w))
                if w.height > *limit || w.width > *limit =>
            {
                Some(format!("cannot allocate {}x{} block", w.height, w.width))
            }
            _ => None,
        };
        match reason {
            Some(reason) => Err(MosaicError::TileRead {
                path: path.to_path_buf(),
                reason,
            }),
            None => Ok(()),
        }
    }
}

impl RasterBackend for InMemoryBackend {
    type Writer = InMemoryWriter;

    fn describe(&self, path: &Path) -> Result<RasterMetadata> {
        let store = self.lock();
        self.check_fault(&store, path, None)?;
        store
            .rasters
            .get(path)
            .map(|r| r.metadata.clone())
            .ok_or_else(|| MosaicError::RasterNotFound(path.to_path_buf()))
    }

    fn read_window(&self, path: &Path, window: &Window) -> Result<Array2<i32>> {
        let store = self.lock();
        self.check_fault(&store, path, Some(window))?;
        let raster = store
            .rasters
            .get(path)
            .ok_or_else(|| MosaicError::RasterNotFound(path.to_path_buf()))?;

        let (height, width) = raster.data.dim();
        if window.row_end() > height || window.col_end() > width {
            return Err(MosaicError::TileRead {
                path: path.to_path_buf(),
                reason: format!("window {} outside {}x{} raster", window, height, width),
            });
        }

        Ok(raster
            .data
            .slice(s![window.row..window.row_end(), window.col..window.col_end()])
            .to_owned())
    }

    fn create(&self, path: &Path, spec: &OutputSpec) -> Result<InMemoryWriter> {
        if spec.width == 0 || spec.height == 0 {
            return Err(MosaicError::InvalidDimensions(spec.width, spec.height));
        }
        let mut raster = MemRaster::tile(
            Array2::from_elem((spec.height, spec.width), spec.nodata as i32),
            spec.geotransform,
            Some(spec.nodata as f64),
        );
        raster.metadata.projection = spec.projection.clone();

        Ok(InMemoryWriter {
            backend: self.clone(),
            path: path.to_path_buf(),
            raster,
        })
    }

    fn persist(&self, from: &Path, to: &Path) -> Result<()> {
        let mut store = self.lock();
        let raster = store
            .rasters
            .remove(from)
            .ok_or_else(|| MosaicError::RasterNotFound(from.to_path_buf()))?;
        store.rasters.insert(to.to_path_buf(), raster);
        Ok(())
    }

    fn discard(&self, path: &Path) -> Result<()> {
        self.lock().rasters.remove(path);
        Ok(())
    }
}

/// Buffers the whole raster and publishes it to the store on `finish`.
pub struct InMemoryWriter {
    backend: InMemoryBackend,
    path: PathBuf,
    raster: MemRaster,
}

impl BlockWriter for InMemoryWriter {
    fn write_block(&mut self, window: &Window, block: &Array2<u8>) -> Result<()> {
        let (height, width) = self.raster.data.dim();
        if window.row_end() > height || window.col_end() > width {
            return Err(MosaicError::BlockShape {
                window: *window,
                got: block.dim(),
            });
        }
        self.raster
            .data
            .slice_mut(s![window.row..window.row_end(), window.col..window.col_end()])
            .assign(&block.mapv(i32::from));
        Ok(())
    }

    fn finish(mut self, overview_levels: &[i32]) -> Result<()> {
        self.raster.overview_levels = overview_levels.to_vec();
        self.backend.insert(self.path, self.raster);
        Ok(())
    }
}
