use crate::error::{MosaicError, Result};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Recursively collect files under `dir` whose name ends with `suffix`,
/// sorted by path.
pub fn discover_tiles(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(MosaicError::InputNotFound(dir.to_path_buf()));
    }

    let mut tiles = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", dir.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let matches = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.ends_with(suffix));
        if matches {
            debug!("Found tile {}", entry.path().display());
            tiles.push(entry.into_path());
        }
    }

    if tiles.is_empty() {
        return Err(MosaicError::NoTilesFound {
            dir: dir.to_path_buf(),
            suffix: suffix.to_string(),
        });
    }

    tiles.sort();
    info!("Found {} tiles under {}", tiles.len(), dir.display());
    Ok(tiles)
}

/// Boundaries to clip against: `path` itself if it is a file, otherwise every
/// `.shp` / `.gpkg` under it, sorted. An empty directory yields no boundaries.
pub fn discover_boundaries(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(MosaicError::InputNotFound(path.to_path_buf()));
    }

    let mut boundaries: Vec<PathBuf> = WalkDir::new(path)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("shp") || ext.eq_ignore_ascii_case("gpkg"))
        })
        .collect();
    boundaries.sort();
    debug!("Found {} boundaries under {}", boundaries.len(), path.display());
    Ok(boundaries)
}
