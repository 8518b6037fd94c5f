use crate::chunking::Window;
use crate::cog::CreationOptions;
use crate::error::Result;
use ndarray::Array2;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct RasterMetadata {
    pub width: usize,
    pub height: usize,
    pub band_count: usize,
    /// Size of one pixel of band 1 in bytes.
    pub bytes_per_pixel: usize,
    pub geotransform: [f64; 6],
    pub projection: String,
    pub nodata: Option<f64>,
}

impl RasterMetadata {
    pub fn pixel_width(&self) -> f64 {
        self.geotransform[1]
    }

    pub fn pixel_height(&self) -> f64 {
        self.geotransform[5]
    }

    /// Nodata as a category code, if it is an integer in 0..=255.
    pub fn nodata_code(&self) -> Option<u8> {
        self.nodata
            .filter(|v| v.fract() == 0.0 && (0.0..=255.0).contains(v))
            .map(|v| v as u8)
    }

    /// Georeferenced bounds as `(min_x, min_y, max_x, max_y)`.
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        let gt = &self.geotransform;
        let x0 = gt[0];
        let y0 = gt[3];
        let x1 = gt[0] + self.width as f64 * gt[1];
        let y1 = gt[3] + self.height as f64 * gt[5];
        (x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }
}

/// Everything needed to create the mosaic raster.
#[derive(Debug, Clone)]
pub struct OutputSpec {
    pub width: usize,
    pub height: usize,
    pub geotransform: [f64; 6],
    pub projection: String,
    pub nodata: u8,
    pub options: CreationOptions,
}

/// Destination raster opened for writing.
pub trait BlockWriter {
    fn write_block(&mut self, window: &Window, block: &Array2<u8>) -> Result<()>;

    /// Flush and close, building the given overview levels first.
    fn finish(self, overview_levels: &[i32]) -> Result<()>;
}

/// Raster I/O capability used by the merge.
///
/// Reads open the source on every call, so implementations can be shared
/// across the read pool without holding per-thread handles.
pub trait RasterBackend: Sync {
    type Writer: BlockWriter;

    fn describe(&self, path: &Path) -> Result<RasterMetadata>;

    /// Read band 1 of `path` at `window`, given in that raster's pixel space.
    fn read_window(&self, path: &Path, window: &Window) -> Result<Array2<i32>>;

    fn create(&self, path: &Path, spec: &OutputSpec) -> Result<Self::Writer>;

    /// Move a finished raster to its final location.
    fn persist(&self, from: &Path, to: &Path) -> Result<()>;

    /// Remove a raster that must not be used. Missing files are not an error.
    fn discard(&self, path: &Path) -> Result<()>;
}

#[cfg(feature = "gdal")]
pub use self::gdal_backend::{GdalBackend, GdalWriter};

#[cfg(feature = "gdal")]
mod gdal_backend {
    use super::*;
    use crate::cog::OVERVIEW_RESAMPLING;
    use crate::error::MosaicError;
    use gdal::cpl::CslStringList;
    use gdal::raster::{Buffer, RasterBand};
    use gdal::{Dataset, DriverManager};
    use log::{debug, info};

    /// GeoTIFF I/O through GDAL.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct GdalBackend;

    pub struct GdalWriter {
        dataset: Dataset,
    }

    impl RasterBackend for GdalBackend {
        type Writer = GdalWriter;

        fn describe(&self, path: &Path) -> Result<RasterMetadata> {
            let dataset = Dataset::open(path)?;
            let rasterband: RasterBand = dataset.rasterband(1)?;

            let (width, height) = dataset.raster_size();
            if width == 0 || height == 0 {
                return Err(MosaicError::InvalidDimensions(width, height));
            }

            Ok(RasterMetadata {
                width,
                height,
                band_count: dataset.raster_count() as usize,
                bytes_per_pixel: rasterband.band_type().bytes() as usize,
                geotransform: dataset.geo_transform()?,
                projection: dataset.projection(),
                nodata: rasterband.no_data_value(),
            })
        }

        fn read_window(&self, path: &Path, window: &Window) -> Result<Array2<i32>> {
            let dataset = Dataset::open(path)?;
            let rasterband = dataset.rasterband(1)?;

            debug!(
                "Reading {}: offset=({},{}), size=({},{})",
                path.display(),
                window.col,
                window.row,
                window.width,
                window.height
            );

            let buffer = rasterband.read_as::<i32>(
                (window.col as isize, window.row as isize),
                (window.width, window.height),
                (window.width, window.height),
                None,
            )?;

            let data_vec: Vec<i32> = buffer.into_iter().collect();
            Ok(Array2::from_shape_vec(window.shape(), data_vec)?)
        }

        fn create(&self, path: &Path, spec: &OutputSpec) -> Result<GdalWriter> {
            info!("Creating output dataset: {}", path.display());

            let driver = DriverManager::get_driver_by_name("GTiff")?;
            let mut gdal_options = CslStringList::new();
            for opt in spec.options.to_driver_options() {
                gdal_options.add_string(&opt)?;
            }

            let mut dataset = driver.create_with_band_type_with_options::<u8, _>(
                path,
                spec.width,
                spec.height,
                1,
                &gdal_options,
            )?;

            dataset.set_geo_transform(&spec.geotransform)?;
            if !spec.projection.is_empty() {
                dataset.set_projection(&spec.projection)?;
            }
            dataset
                .rasterband(1)?
                .set_no_data_value(Some(spec.nodata as f64))?;

            Ok(GdalWriter { dataset })
        }

        fn persist(&self, from: &Path, to: &Path) -> Result<()> {
            std::fs::rename(from, to)?;
            Ok(())
        }

        fn discard(&self, path: &Path) -> Result<()> {
            match std::fs::remove_file(path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        }
    }

    impl BlockWriter for GdalWriter {
        fn write_block(&mut self, window: &Window, block: &Array2<u8>) -> Result<()> {
            let mut raster_band = self.dataset.rasterband(1)?;
            let data: Vec<u8> = block.iter().copied().collect();
            let mut buffer = Buffer::new((window.width, window.height), data);

            raster_band.write(
                (window.col as isize, window.row as isize),
                (window.width, window.height),
                &mut buffer,
            )?;
            Ok(())
        }

        fn finish(mut self, overview_levels: &[i32]) -> Result<()> {
            if !overview_levels.is_empty() {
                info!("Creating overview levels: {:?}", overview_levels);
                self.dataset
                    .build_overviews(OVERVIEW_RESAMPLING, overview_levels, &[])?;
            }
            // Dropping the dataset flushes and closes it.
            drop(self.dataset);
            Ok(())
        }
    }
}
