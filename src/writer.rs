use crate::chunking::Window;
use crate::cog::overview_levels;
use crate::error::{MosaicError, Result};
use crate::io::{BlockWriter, OutputSpec, RasterBackend};
use log::{debug, info, warn};
use ndarray::Array2;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/// Owns the mosaic being written.
///
/// Blocks go to a temporary sibling of the final path. Only `finalize` moves
/// the raster into place; aborting or dropping the writer removes it.
pub struct OutputWriter<'a, B: RasterBackend> {
    backend: &'a B,
    writer: Option<B::Writer>,
    temp_path: PathBuf,
    final_path: PathBuf,
    overviews: Vec<i32>,
    committed: usize,
}

/// `dir/name.tif` → `dir/name.tif.partial`
pub fn temp_path_for(final_path: &Path) -> Result<PathBuf> {
    let name = final_path
        .file_name()
        .ok_or_else(|| MosaicError::InvalidOutputPath {
            path: final_path.to_path_buf(),
            reason: "no file name".to_string(),
        })?;
    let mut temp_name = OsString::from(name);
    temp_name.push(".partial");
    Ok(final_path.with_file_name(temp_name))
}

/// Reject output paths that can't take a GeoTIFF before any tile is opened:
/// a missing file name, an existing directory, an extension other than
/// `.tif`/`.tiff`, or a parent directory that is missing or read-only.
pub fn validate_output_path(path: &Path) -> Result<()> {
    let invalid = |reason: &str| MosaicError::InvalidOutputPath {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    if path.file_name().is_none() || path.is_dir() {
        return Err(invalid("not a file path"));
    }
    let is_tiff = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("tif") || ext.eq_ignore_ascii_case("tiff"));
    if !is_tiff {
        return Err(invalid("output must be a .tif file"));
    }

    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        None => Ok(()),
        Some(parent) => match fs::metadata(parent) {
            Ok(meta) if !meta.is_dir() => Err(invalid("parent is not a directory")),
            Ok(meta) if meta.permissions().readonly() => {
                Err(invalid("parent directory is read-only"))
            }
            Ok(_) => Ok(()),
            Err(_) => Err(invalid("parent directory does not exist")),
        },
    }
}

impl<'a, B: RasterBackend> OutputWriter<'a, B> {
    pub fn create(backend: &'a B, final_path: &Path, spec: &OutputSpec) -> Result<Self> {
        let temp_path = temp_path_for(final_path)?;
        let overviews = if spec.options.build_overviews {
            overview_levels(spec.width, spec.height)
        } else {
            Vec::new()
        };

        // A stale partial file from an earlier abort must not be reused.
        backend.discard(&temp_path)?;
        let writer = backend.create(&temp_path, spec)?;
        debug!(
            "Writing {}x{} mosaic to {}",
            spec.width,
            spec.height,
            temp_path.display()
        );

        Ok(Self {
            backend,
            writer: Some(writer),
            temp_path,
            final_path: final_path.to_path_buf(),
            overviews,
            committed: 0,
        })
    }

    pub fn commit(&mut self, window: &Window, block: &Array2<u8>) -> Result<()> {
        if block.dim() != window.shape() {
            return Err(MosaicError::BlockShape {
                window: *window,
                got: block.dim(),
            });
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| MosaicError::InvalidConfig("output already closed".to_string()))?;
        writer.write_block(window, block)?;
        self.committed += 1;
        Ok(())
    }

    /// Close the raster and move it to its final path.
    pub fn finalize(mut self) -> Result<PathBuf> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| MosaicError::InvalidConfig("output already closed".to_string()))?;
        let persisted = writer
            .finish(&self.overviews)
            .and_then(|()| self.backend.persist(&self.temp_path, &self.final_path));
        if let Err(e) = persisted {
            if let Err(cleanup) = self.backend.discard(&self.temp_path) {
                warn!(
                    "Could not remove partial output {}: {}",
                    self.temp_path.display(),
                    cleanup
                );
            }
            return Err(e);
        }
        info!(
            "Wrote {} blocks to {}",
            self.committed,
            self.final_path.display()
        );
        Ok(self.final_path.clone())
    }

    /// Drop everything written so far.
    pub fn abort(mut self) {
        self.discard();
    }

    fn discard(&mut self) {
        if self.writer.take().is_some() {
            if let Err(e) = self.backend.discard(&self.temp_path) {
                warn!(
                    "Could not remove partial output {}: {}",
                    self.temp_path.display(),
                    e
                );
            }
        }
    }
}

impl<B: RasterBackend> Drop for OutputWriter<'_, B> {
    fn drop(&mut self) {
        self.discard();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cog::CreationOptions;
    use crate::in_memory::InMemoryBackend;
    use ndarray::arr2;

    fn spec(width: usize, height: usize) -> OutputSpec {
        OutputSpec {
            width,
            height,
            geotransform: [0.0, 1.0, 0.0, 0.0, 0.0, -1.0],
            projection: String::new(),
            nodata: 255,
            options: CreationOptions::default(),
        }
    }

    #[test]
    fn test_temp_path() {
        assert_eq!(
            temp_path_for(Path::new("/data/out.tif")).unwrap(),
            PathBuf::from("/data/out.tif.partial")
        );
        assert!(temp_path_for(Path::new("/")).is_err());
    }

    #[test]
    fn test_output_path_checks() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_output_path(Path::new("mosaic.tif")).is_ok());
        assert!(validate_output_path(&dir.path().join("mosaic.TIFF")).is_ok());

        for bad in [
            PathBuf::from("mosaic.png"),
            PathBuf::from("mosaic"),
            dir.path().join("missing").join("mosaic.tif"),
            dir.path().to_path_buf(),
        ] {
            let err = validate_output_path(&bad).unwrap_err();
            assert!(matches!(err, MosaicError::InvalidOutputPath { .. }), "{:?}", bad);
            assert!(err.is_configuration());
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_read_only_parent_rejected() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        let result = validate_output_path(&locked.join("mosaic.tif"));
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        assert!(matches!(
            result,
            Err(MosaicError::InvalidOutputPath { ref reason, .. }) if reason.contains("read-only")
        ));
    }

    #[test]
    fn test_finalize_renames() {
        let backend = InMemoryBackend::new();
        let mut writer = OutputWriter::create(&backend, Path::new("out.tif"), &spec(2, 2)).unwrap();
        writer
            .commit(&Window::new(0, 0, 2, 2), &arr2(&[[1u8, 2], [3, 4]]))
            .unwrap();
        let path = writer.finalize().unwrap();

        assert_eq!(path, PathBuf::from("out.tif"));
        assert!(backend.contains(Path::new("out.tif")));
        assert!(!backend.contains(Path::new("out.tif.partial")));
    }

    #[test]
    fn test_abort_leaves_nothing() {
        let backend = InMemoryBackend::new();
        let mut writer = OutputWriter::create(&backend, Path::new("out.tif"), &spec(2, 2)).unwrap();
        writer
            .commit(&Window::new(0, 0, 1, 1), &arr2(&[[1u8]]))
            .unwrap();
        writer.abort();
        assert!(backend.paths().is_empty());
    }

    #[test]
    fn test_wrong_block_shape_rejected() {
        let backend = InMemoryBackend::new();
        let mut writer = OutputWriter::create(&backend, Path::new("out.tif"), &spec(4, 4)).unwrap();
        let err = writer
            .commit(&Window::new(0, 0, 2, 2), &arr2(&[[1u8, 2, 3]]))
            .unwrap_err();
        assert!(matches!(err, MosaicError::BlockShape { .. }));
    }

    #[test]
    fn test_overviews_requested_for_large_output() {
        let backend = InMemoryBackend::new();
        let mut s = spec(1024, 1024);
        s.options.build_overviews = true;
        let writer = OutputWriter::create(&backend, Path::new("big.tif"), &s).unwrap();
        writer.finalize().unwrap();
        let raster = backend.get(Path::new("big.tif")).unwrap();
        assert_eq!(raster.overview_levels, vec![2, 4]);
    }
}
