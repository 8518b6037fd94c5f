use crate::error::{MosaicError, Result};
use log::info;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Crops a finished mosaic to a vector boundary.
pub trait BoundaryClipper {
    /// Write the part of `raster` inside `boundary` to `output`, keeping
    /// `nodata` outside the polygon.
    fn clip(&self, raster: &Path, boundary: &Path, output: &Path, nodata: u8) -> Result<PathBuf>;
}

/// `dir/merged.tif` → `dir/merged_clipped.tif`
pub fn clipped_path_for(raster: &Path) -> PathBuf {
    let stem = raster
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| OsString::from("mosaic"));
    let mut name = stem;
    name.push("_clipped.tif");
    raster.with_file_name(name)
}

/// `dir/merged.tif`, 2 → `dir/merged_clipped_2.tif`
pub fn numbered_clipped_path_for(raster: &Path, index: usize) -> PathBuf {
    let stem = raster
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mosaic".to_string());
    raster.with_file_name(format!("{}_clipped_{}.tif", stem, index))
}

/// Clips with the `gdalwarp` command-line tool.
#[derive(Debug, Clone)]
pub struct GdalWarpClipper {
    pub program: PathBuf,
    pub compression: String,
}

impl Default for GdalWarpClipper {
    fn default() -> Self {
        Self {
            program: PathBuf::from("gdalwarp"),
            compression: "LZW".to_string(),
        }
    }
}

impl GdalWarpClipper {
    pub fn warp_args(&self, raster: &Path, boundary: &Path, output: &Path, nodata: u8) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-overwrite".into(),
            "-cutline".into(),
            boundary.into(),
            "-crop_to_cutline".into(),
            "-dstnodata".into(),
            nodata.to_string().into(),
            "-wo".into(),
            "CUTLINE_ALL_TOUCHED=TRUE".into(),
        ];
        for opt in [
            format!("COMPRESS={}", self.compression),
            "BIGTIFF=YES".to_string(),
            "TILED=YES".to_string(),
        ] {
            args.push("-co".into());
            args.push(opt.into());
        }
        args.extend([
            "-multi".into(),
            "-wo".into(),
            "NUM_THREADS=ALL_CPUS".into(),
            raster.into(),
            output.into(),
        ]);
        args
    }
}

impl BoundaryClipper for GdalWarpClipper {
    fn clip(&self, raster: &Path, boundary: &Path, output: &Path, nodata: u8) -> Result<PathBuf> {
        if !boundary.is_file() {
            return Err(MosaicError::ClipFailed(format!(
                "boundary {} does not exist",
                boundary.display()
            )));
        }

        info!(
            "Clipping {} to {} with {}",
            raster.display(),
            boundary.display(),
            self.program.display()
        );

        let result = Command::new(&self.program)
            .args(self.warp_args(raster, boundary, output, nodata))
            .output()
            .map_err(|e| {
                MosaicError::ClipFailed(format!("could not run {}: {}", self.program.display(), e))
            })?;

        if result.status.success() {
            info!("Clipped output saved to {}", output.display());
            Ok(output.to_path_buf())
        } else {
            let stderr = String::from_utf8_lossy(&result.stderr);
            Err(MosaicError::ClipFailed(format!(
                "gdalwarp failed: {}",
                stderr.trim()
            )))
        }
    }
}
