use crate::chunking::WindowGrid;
use crate::error::Result;
use crate::io::RasterBackend;
use log::{info, warn};
use std::collections::BTreeSet;
use std::path::Path;

const SCAN_CHUNK: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    /// Sorted distinct pixel values.
    pub distinct_values: Vec<u8>,
    pub nodata: u8,
}

impl ValidationReport {
    /// Every pixel is nodata: usually a wrong nodata constant or no coverage.
    pub fn is_degenerate(&self) -> bool {
        self.distinct_values.iter().all(|&v| v == self.nodata)
    }
}

/// Re-reads a finished mosaic and checks it isn't empty.
pub struct Validator<'a, B: RasterBackend> {
    backend: &'a B,
    scan_chunk: usize,
}

impl<'a, B: RasterBackend> Validator<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self {
            backend,
            scan_chunk: SCAN_CHUNK,
        }
    }

    pub fn with_scan_chunk(mut self, scan_chunk: usize) -> Self {
        self.scan_chunk = scan_chunk.max(1);
        self
    }

    pub fn validate(&self, path: &Path, nodata: u8) -> Result<ValidationReport> {
        let metadata = self.backend.describe(path)?;
        let grid = WindowGrid::new(metadata.width, metadata.height, self.scan_chunk);

        let mut values = BTreeSet::new();
        for window in grid.iter() {
            let block = self.backend.read_window(path, &window)?;
            values.extend(block.iter().filter_map(|&v| u8::try_from(v).ok()));
        }

        let report = ValidationReport {
            distinct_values: values.into_iter().collect(),
            nodata,
        };
        info!("Output validation - distinct values: {:?}", report.distinct_values);
        if report.is_degenerate() {
            warn!("Output {} may be entirely nodata!", path.display());
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::{InMemoryBackend, MemRaster};
    use ndarray::{arr2, Array2};

    const GT: [f64; 6] = [0.0, 1.0, 0.0, 0.0, 0.0, -1.0];

    #[test]
    fn test_distinct_values_across_scan_windows() {
        let backend = InMemoryBackend::new();
        let data = arr2(&[[1, 1, 255], [4, 255, 2], [2, 2, 2]]);
        backend.insert("out.tif", MemRaster::tile(data, GT, Some(255.0)));

        let report = Validator::new(&backend)
            .with_scan_chunk(2)
            .validate(Path::new("out.tif"), 255)
            .unwrap();
        assert_eq!(report.distinct_values, vec![1, 2, 4, 255]);
        assert!(!report.is_degenerate());
    }

    #[test]
    fn test_all_nodata_is_degenerate() {
        let backend = InMemoryBackend::new();
        let data = Array2::from_elem((5, 5), 255);
        backend.insert("out.tif", MemRaster::tile(data, GT, Some(255.0)));

        let report = Validator::new(&backend)
            .validate(Path::new("out.tif"), 255)
            .unwrap();
        assert_eq!(report.distinct_values, vec![255]);
        assert!(report.is_degenerate());
    }

    #[test]
    fn test_missing_output_is_error() {
        let backend = InMemoryBackend::new();
        assert!(Validator::new(&backend)
            .validate(Path::new("missing.tif"), 255)
            .is_err());
    }
}
