use crate::clip::{clipped_path_for, numbered_clipped_path_for, BoundaryClipper};
use crate::controller::{MergeController, MergeOutcome, MergeWarning};
use crate::discover::{discover_boundaries, discover_tiles};
use crate::error::Result;
use crate::io::RasterBackend;
use log::{info, warn};
use std::path::Path;

/// Optional crop applied to the finished mosaic.
pub struct BoundaryClip<'a> {
    /// A boundary file, or a directory searched for `.shp` / `.gpkg` files.
    pub boundary: &'a Path,
    pub clipper: &'a dyn BoundaryClipper,
}

/// Discover tiles under `input_dir`, merge them into `output`, and clip the
/// result to `clip.boundary` if one is given.
///
/// Clipping runs on the validated mosaic. A single boundary file produces
/// `<stem>_clipped.tif`; a boundary directory produces `<stem>_clipped_<n>.tif`
/// per boundary, numbered from 1. Clip failures are reported as warnings and
/// leave the mosaic in place.
pub fn merge<B: RasterBackend>(
    controller: &MergeController<'_, B>,
    input_dir: &Path,
    output: &Path,
    clip: Option<BoundaryClip<'_>>,
) -> Result<MergeOutcome> {
    let tiles = discover_tiles(input_dir, &controller.config().tile_suffix)?;
    let mut outcome = controller.run(&tiles, output)?;

    if let Some(clip) = clip {
        clip_outcome(&mut outcome, &clip);
    }

    Ok(outcome)
}

fn clip_outcome(outcome: &mut MergeOutcome, clip: &BoundaryClip<'_>) {
    let boundaries = match discover_boundaries(clip.boundary) {
        Ok(boundaries) if boundaries.is_empty() => {
            warn!(
                "No .shp or .gpkg boundaries under {}, skipping clip",
                clip.boundary.display()
            );
            outcome.warnings.push(MergeWarning::ClipFailed(format!(
                "no boundaries under {}",
                clip.boundary.display()
            )));
            return;
        }
        Ok(boundaries) => boundaries,
        Err(e) => {
            warn!("Clipping to {} failed: {}", clip.boundary.display(), e);
            outcome.warnings.push(MergeWarning::ClipFailed(e.to_string()));
            return;
        }
    };

    let single = clip.boundary.is_file();
    for (i, boundary) in boundaries.iter().enumerate() {
        let target = if single {
            clipped_path_for(&outcome.output)
        } else {
            numbered_clipped_path_for(&outcome.output, i + 1)
        };
        match clip
            .clipper
            .clip(&outcome.output, boundary, &target, outcome.nodata)
        {
            Ok(path) => {
                info!("Clipped mosaic written to {}", path.display());
                outcome.clipped.push(path);
            }
            Err(e) => {
                warn!("Clipping to {} failed: {}", boundary.display(), e);
                outcome
                    .warnings
                    .push(MergeWarning::ClipFailed(format!("{}: {}", boundary.display(), e)));
            }
        }
    }
}
