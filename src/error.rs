use crate::chunking::Window;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MosaicError {
    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Array shape error: {0}")]
    ShapeError(#[from] ndarray::ShapeError),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Input directory does not exist: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("No tiles matching '{suffix}' found under {}", .dir.display())]
    NoTilesFound { dir: PathBuf, suffix: String },

    #[error("None of the {0} discovered tiles could be opened")]
    NoReadableTiles(usize),

    #[error("Invalid output path {}: {reason}", .path.display())]
    InvalidOutputPath { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid compression type: {0}")]
    InvalidCompression(String),

    #[error("Invalid tile size: {0} (must be multiple of 16)")]
    InvalidTileSize(usize),

    #[error("Raster has invalid dimensions: {0}x{1}")]
    InvalidDimensions(usize, usize),

    #[error(
        "Tile {} has pixel size {tile:?}, mosaic grid uses {grid:?}",
        .path.display()
    )]
    ResolutionMismatch {
        path: PathBuf,
        tile: (f64, f64),
        grid: (f64, f64),
    },

    #[error("Failed to read tile {}: {reason}", .path.display())]
    TileRead { path: PathBuf, reason: String },

    #[error("Window {window} still failing at minimum chunk size {chunk_size}")]
    WindowExhausted { window: Window, chunk_size: usize },

    #[error("Block shape {got:?} does not match window {window}")]
    BlockShape { window: Window, got: (usize, usize) },

    #[error("Raster not found: {}", .0.display())]
    RasterNotFound(PathBuf),

    #[error("Boundary clipping failed: {0}")]
    ClipFailed(String),
}

impl MosaicError {
    /// Errors caused by the inputs or settings rather than by processing.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            MosaicError::InputNotFound(_)
                | MosaicError::NoTilesFound { .. }
                | MosaicError::NoReadableTiles(_)
                | MosaicError::InvalidOutputPath { .. }
                | MosaicError::InvalidConfig(_)
                | MosaicError::InvalidCompression(_)
                | MosaicError::InvalidTileSize(_)
                | MosaicError::ResolutionMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, MosaicError>;
