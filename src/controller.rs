//! Merge state machine.
//!
//! ```text
//! Planning → Iterating → WindowSucceeded → Iterating
//!                      → WindowFailed    → Iterating | Aborted
//!          Iterating (extent covered) → Validating → Done
//! ```
//!
//! Windows are processed one at a time. Memory is sampled before every window
//! (shrink above the high watermark) and after every commit (grow below the
//! low watermark). A window where no tile could be read is retried from the
//! same origin at half the size until the minimum size also fails.

use crate::chunking::{Window, WindowCursor};
use crate::composite::ModeCompositor;
use crate::config::MergeConfig;
use crate::diagnostics::{MergeEvent, MergeObserver, ShrinkCause};
use crate::error::{MosaicError, Result};
use crate::io::{OutputSpec, RasterBackend};
use crate::layout::MosaicLayout;
use crate::memory::MemorySampler;
use crate::planner::{overhead_for_bands, plan_from_snapshot, ChunkSizeState, TileCost};
use crate::reader::{ParallelBlockReader, ReadOutcome, TileFailure};
use crate::validate::{ValidationReport, Validator};
use crate::writer::{validate_output_path, OutputWriter};
use log::info;
use ndarray::Array2;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Non-fatal findings of a successful merge.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeWarning {
    /// The mosaic holds nothing but nodata.
    DegenerateOutput { nodata: u8 },
    /// Tiles that could not be opened at all.
    TilesSkipped(Vec<PathBuf>),
    /// Individual window reads that failed and were outvoted by other tiles.
    TileReadFailures(usize),
    ValidationFailed(String),
    ClipFailed(String),
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub output: PathBuf,
    pub nodata: u8,
    pub report: Option<ValidationReport>,
    pub warnings: Vec<MergeWarning>,
    pub windows: usize,
    pub final_chunk_size: usize,
    /// Clipped copies, one per boundary.
    pub clipped: Vec<PathBuf>,
}

impl MergeOutcome {
    pub fn is_degenerate(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, MergeWarning::DegenerateOutput { .. }))
    }
}

enum Phase {
    Iterating,
    WindowSucceeded {
        window: Window,
        block: Array2<u8>,
        contributors: usize,
    },
    WindowFailed {
        window: Window,
    },
    Validating,
    Done(MergeOutcome),
    Aborted(MosaicError),
}

/// Drives one merge from tile list to validated mosaic.
pub struct MergeController<'a, B: RasterBackend> {
    backend: &'a B,
    sampler: &'a dyn MemorySampler,
    observer: &'a dyn MergeObserver,
    config: MergeConfig,
}

impl<'a, B: RasterBackend> MergeController<'a, B> {
    pub fn new(
        backend: &'a B,
        sampler: &'a dyn MemorySampler,
        observer: &'a dyn MergeObserver,
        config: MergeConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            sampler,
            observer,
            config,
        })
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Merge `tiles` into a single-band byte raster at `output`.
    pub fn run(&self, tiles: &[PathBuf], output: &Path) -> Result<MergeOutcome> {
        let started = Instant::now();
        info!("Merging {} tiles into {}", tiles.len(), output.display());
        validate_output_path(output)?;

        let (layout, skipped) = self.describe_tiles(tiles)?;
        let memory = self.sampler.sample();
        let cost = TileCost {
            tile_count: layout.tiles.len(),
            bytes_per_pixel: layout.tiles[0].metadata.bytes_per_pixel.max(1),
            overhead: overhead_for_bands(layout.max_band_count()),
        };
        let plan = plan_from_snapshot(
            &memory,
            self.config.safety_factor,
            &cost,
            &self.config.limits,
        );

        let reader = ParallelBlockReader::new(
            self.backend,
            &layout.tiles,
            layout.nodata,
            self.config.max_workers,
        )?
        .with_input_nodata(self.config.input_nodata);
        let spec = OutputSpec {
            width: layout.width,
            height: layout.height,
            geotransform: layout.geotransform,
            projection: layout.projection.clone(),
            nodata: layout.nodata,
            options: self.config.creation.clone(),
        };
        let writer = OutputWriter::create(self.backend, output, &spec)?;

        self.observer.on_event(&MergeEvent::Planned {
            tiles: layout.tiles.len(),
            workers: reader.workers(),
            plan,
            memory,
        });

        let mut run = MergeRun {
            controller: self,
            nodata: layout.nodata,
            chunk: ChunkSizeState::new(plan.chunk_size, self.config.limits, self.config.watermarks),
            cursor: WindowCursor::new(layout.width, layout.height),
            reader,
            compositor: ModeCompositor::new(layout.nodata),
            writer: Some(writer),
            windows: 0,
            tile_failures: 0,
            skipped,
        };
        let outcome = run.drive();

        if outcome.is_ok() {
            info!("Merge finished in {:.1?}", started.elapsed());
        }
        outcome
    }

    /// Describe every tile, skipping the ones that can't be opened.
    fn describe_tiles(&self, tiles: &[PathBuf]) -> Result<(MosaicLayout, Vec<PathBuf>)> {
        let mut described = Vec::with_capacity(tiles.len());
        let mut skipped = Vec::new();

        for path in tiles {
            match self.backend.describe(path) {
                Ok(metadata) => described.push((path.clone(), metadata)),
                Err(e) => {
                    self.observer.on_event(&MergeEvent::TileSkipped {
                        path: path.clone(),
                        reason: e.to_string(),
                    });
                    skipped.push(path.clone());
                }
            }
        }

        if described.is_empty() {
            return Err(MosaicError::NoReadableTiles(tiles.len()));
        }
        let layout = MosaicLayout::build(described, self.config.extent, self.config.nodata_policy())?;
        Ok((layout, skipped))
    }
}

/// State of a merge in progress.
struct MergeRun<'c, 'a, B: RasterBackend> {
    controller: &'c MergeController<'a, B>,
    nodata: u8,
    chunk: ChunkSizeState,
    cursor: WindowCursor,
    reader: ParallelBlockReader<'c, B>,
    compositor: ModeCompositor,
    writer: Option<OutputWriter<'a, B>>,
    windows: usize,
    tile_failures: usize,
    skipped: Vec<PathBuf>,
}

impl<B: RasterBackend> MergeRun<'_, '_, B> {
    fn drive(&mut self) -> Result<MergeOutcome> {
        let mut phase = Phase::Iterating;
        loop {
            phase = match phase {
                Phase::Iterating => self.iterate(),
                Phase::WindowSucceeded {
                    window,
                    block,
                    contributors,
                } => self.window_succeeded(window, block, contributors),
                Phase::WindowFailed { window } => self.window_failed(window),
                Phase::Validating => self.validating(),
                Phase::Done(outcome) => return Ok(outcome),
                Phase::Aborted(error) => {
                    self.abort(&error);
                    return Err(error);
                }
            };
        }
    }

    fn emit(&self, event: MergeEvent) {
        self.controller.observer.on_event(&event);
    }

    fn iterate(&mut self) -> Phase {
        if self.cursor.is_finished() {
            return Phase::Validating;
        }

        let memory = self.controller.sampler.sample();
        if self.chunk.above_high(&memory) {
            if let Some((from, to)) = self.chunk.shrink() {
                self.emit(MergeEvent::ChunkShrunk {
                    from,
                    to,
                    cause: ShrinkCause::MemoryPressure {
                        used_percent: memory.used_percent(),
                    },
                });
            }
        }

        let Some(window) = self.cursor.next_window(self.chunk.size()) else {
            return Phase::Validating;
        };

        match self.reader.read(&window) {
            ReadOutcome::Blocks { layers, failures } => {
                self.report_failures(&window, failures);
                match self.compositor.composite(window.shape(), &layers) {
                    Ok(block) => Phase::WindowSucceeded {
                        window,
                        block,
                        contributors: layers.len(),
                    },
                    Err(e) => Phase::Aborted(e),
                }
            }
            ReadOutcome::NoData { failures } => {
                self.report_failures(&window, failures);
                Phase::WindowFailed { window }
            }
            ReadOutcome::Uncovered => Phase::WindowSucceeded {
                window,
                block: Array2::from_elem(window.shape(), self.nodata),
                contributors: 0,
            },
        }
    }

    fn report_failures(&mut self, window: &Window, failures: Vec<TileFailure>) {
        self.tile_failures += failures.len();
        for failure in failures {
            self.emit(MergeEvent::TileReadFailed {
                path: failure.path,
                window: *window,
                reason: failure.error.to_string(),
            });
        }
    }

    fn window_succeeded(&mut self, window: Window, block: Array2<u8>, contributors: usize) -> Phase {
        let committed = match self.writer.as_mut() {
            Some(writer) => writer.commit(&window, &block),
            None => Err(MosaicError::InvalidConfig("output already closed".to_string())),
        };
        if let Err(e) = committed {
            return Phase::Aborted(e);
        }

        self.cursor.complete(&window);
        self.windows += 1;
        self.emit(MergeEvent::WindowCommitted {
            window,
            chunk_size: self.chunk.size(),
            contributors,
            progress: self.cursor.progress(),
        });

        let memory = self.controller.sampler.sample();
        if self.chunk.below_low(&memory) {
            if let Some((from, to)) = self.chunk.grow() {
                self.emit(MergeEvent::ChunkGrown {
                    from,
                    to,
                    used_percent: memory.used_percent(),
                });
            }
        }
        Phase::Iterating
    }

    fn window_failed(&mut self, window: Window) -> Phase {
        self.emit(MergeEvent::WindowFailed {
            window,
            chunk_size: self.chunk.size(),
        });

        match self.chunk.shrink() {
            Some((from, to)) => {
                self.emit(MergeEvent::ChunkShrunk {
                    from,
                    to,
                    cause: ShrinkCause::WindowFailed,
                });
                Phase::Iterating
            }
            None => Phase::Aborted(MosaicError::WindowExhausted {
                window,
                chunk_size: self.chunk.size(),
            }),
        }
    }

    fn validating(&mut self) -> Phase {
        let Some(writer) = self.writer.take() else {
            return Phase::Aborted(MosaicError::InvalidConfig(
                "output already closed".to_string(),
            ));
        };
        let output = match writer.finalize() {
            Ok(path) => path,
            Err(e) => return Phase::Aborted(e),
        };

        let mut warnings = Vec::new();
        if !self.skipped.is_empty() {
            warnings.push(MergeWarning::TilesSkipped(std::mem::take(&mut self.skipped)));
        }
        if self.tile_failures > 0 {
            warnings.push(MergeWarning::TileReadFailures(self.tile_failures));
        }

        let validator = Validator::new(self.controller.backend);
        let report = match validator.validate(&output, self.nodata) {
            Ok(report) => {
                self.emit(MergeEvent::Finalized {
                    path: output.clone(),
                    distinct_values: report.distinct_values.clone(),
                });
                if report.is_degenerate() {
                    self.emit(MergeEvent::DegenerateOutput { nodata: self.nodata });
                    warnings.push(MergeWarning::DegenerateOutput { nodata: self.nodata });
                }
                Some(report)
            }
            Err(e) => {
                warnings.push(MergeWarning::ValidationFailed(e.to_string()));
                None
            }
        };

        Phase::Done(MergeOutcome {
            output,
            nodata: self.nodata,
            report,
            warnings,
            windows: self.windows,
            final_chunk_size: self.chunk.size(),
            clipped: Vec::new(),
        })
    }

    fn abort(&mut self, error: &MosaicError) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        self.emit(MergeEvent::Aborted {
            reason: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::RecordingObserver;
    use crate::in_memory::{Fault, InMemoryBackend, MemRaster};
    use crate::memory::MemorySnapshot;
    use crate::planner::ChunkLimits;

    const GT: [f64; 6] = [0.0, 1.0, 0.0, 0.0, 0.0, -1.0];
    const GIB: u64 = 1024 * 1024 * 1024;

    struct FixedUsage {
        total: u64,
        used_percent: f64,
    }

    impl MemorySampler for FixedUsage {
        fn sample(&self) -> MemorySnapshot {
            MemorySnapshot::at_usage(self.total, self.used_percent)
        }
    }

    fn small_config() -> MergeConfig {
        MergeConfig {
            limits: ChunkLimits::new(2, 16).unwrap(),
            ..MergeConfig::default()
        }
    }

    fn gradient(height: usize, width: usize) -> Array2<i32> {
        Array2::from_shape_fn((height, width), |(r, c)| ((r * 7 + c * 3) % 11) as i32)
    }

    fn merge(
        backend: &InMemoryBackend,
        sampler: &FixedUsage,
        observer: &RecordingObserver,
        tiles: &[&str],
    ) -> Result<MergeOutcome> {
        let controller = MergeController::new(backend, sampler, observer, small_config()).unwrap();
        let paths: Vec<PathBuf> = tiles.iter().map(PathBuf::from).collect();
        controller.run(&paths, Path::new("out.tif"))
    }

    #[test]
    fn test_high_pressure_shrinks_to_minimum() {
        let backend = InMemoryBackend::new();
        backend.insert("a_Map.tif", MemRaster::tile(gradient(32, 32), GT, None));
        let sampler = FixedUsage {
            total: 16 * GIB,
            used_percent: 95.0,
        };
        let observer = RecordingObserver::new();

        let outcome = merge(&backend, &sampler, &observer, &["a_Map.tif"]).unwrap();

        let shrinks: Vec<_> = observer
            .events()
            .into_iter()
            .filter_map(|e| match e {
                MergeEvent::ChunkShrunk { from, to, cause } => Some((from, to, cause)),
                _ => None,
            })
            .collect();
        assert_eq!(shrinks.len(), 3);
        for (from, to, cause) in &shrinks {
            assert!(to < from);
            assert!(*to >= 2);
            assert!(matches!(cause, ShrinkCause::MemoryPressure { .. }));
        }
        assert!(!observer
            .events()
            .iter()
            .any(|e| matches!(e, MergeEvent::ChunkGrown { .. })));
        assert_eq!(outcome.final_chunk_size, 2);
        let raster = backend.get(Path::new("out.tif")).unwrap();
        assert_eq!(raster.data, gradient(32, 32));
    }

    #[test]
    fn test_low_pressure_grows_to_maximum() {
        let backend = InMemoryBackend::new();
        backend.insert("a_Map.tif", MemRaster::tile(gradient(40, 40), GT, None));
        // Ten bytes of memory plans the minimum chunk; 30% usage lets it grow.
        let sampler = FixedUsage {
            total: 10,
            used_percent: 30.0,
        };
        let observer = RecordingObserver::new();

        let outcome = merge(&backend, &sampler, &observer, &["a_Map.tif"]).unwrap();

        let grows: Vec<_> = observer
            .events()
            .into_iter()
            .filter_map(|e| match e {
                MergeEvent::ChunkGrown { from, to, .. } => Some((from, to)),
                _ => None,
            })
            .collect();
        assert_eq!(grows, vec![(2, 4), (4, 8), (8, 16)]);
        assert_eq!(outcome.final_chunk_size, 16);
        assert_eq!(backend.get(Path::new("out.tif")).unwrap().data, gradient(40, 40));
    }

    #[test]
    fn test_failed_window_is_retried_smaller() {
        let backend = InMemoryBackend::new();
        backend.insert("a_Map.tif", MemRaster::tile(gradient(20, 20), GT, None));
        backend.set_fault("a_Map.tif", Fault::FailWindowsLargerThan(4));
        let sampler = FixedUsage {
            total: 16 * GIB,
            used_percent: 70.0,
        };
        let observer = RecordingObserver::new();

        let outcome = merge(&backend, &sampler, &observer, &["a_Map.tif"]).unwrap();

        let events = observer.events();
        let failed_shrinks = events
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    MergeEvent::ChunkShrunk {
                        cause: ShrinkCause::WindowFailed,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(failed_shrinks, 2);
        assert_eq!(outcome.final_chunk_size, 4);
        assert!(outcome.warnings.contains(&MergeWarning::TileReadFailures(2)));
        assert_eq!(backend.get(Path::new("out.tif")).unwrap().data, gradient(20, 20));
    }

    #[test]
    fn test_exhausted_window_aborts_without_output() {
        let backend = InMemoryBackend::new();
        backend.insert("a_Map.tif", MemRaster::tile(gradient(8, 8), GT, None));
        backend.set_fault("a_Map.tif", Fault::Unreadable);
        let sampler = FixedUsage {
            total: 16 * GIB,
            used_percent: 70.0,
        };
        let observer = RecordingObserver::new();

        let err = merge(&backend, &sampler, &observer, &["a_Map.tif"]).unwrap_err();

        match err {
            MosaicError::WindowExhausted { window, chunk_size } => {
                assert_eq!(chunk_size, 2);
                assert_eq!((window.row, window.col), (0, 0));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(!backend.contains(Path::new("out.tif")));
        assert!(!backend.contains(Path::new("out.tif.partial")));
        assert!(observer
            .events()
            .iter()
            .any(|e| matches!(e, MergeEvent::Aborted { .. })));
    }

    #[test]
    fn test_all_nodata_output_is_flagged() {
        let backend = InMemoryBackend::new();
        backend.insert(
            "a_Map.tif",
            MemRaster::tile(Array2::from_elem((6, 6), 0), GT, Some(0.0)),
        );
        let sampler = FixedUsage {
            total: 16 * GIB,
            used_percent: 70.0,
        };
        let observer = RecordingObserver::new();

        let outcome = merge(&backend, &sampler, &observer, &["a_Map.tif"]).unwrap();

        assert!(outcome.is_degenerate());
        assert_eq!(outcome.report.unwrap().distinct_values, vec![0]);
        assert!(backend.contains(Path::new("out.tif")));
    }

    #[test]
    fn test_unopenable_tile_is_skipped() {
        let backend = InMemoryBackend::new();
        backend.insert("a_Map.tif", MemRaster::tile(gradient(4, 4), GT, None));
        backend.insert("b_Map.tif", MemRaster::tile(gradient(4, 4), GT, None));
        backend.set_fault("a_Map.tif", Fault::Corrupt);
        let sampler = FixedUsage {
            total: 16 * GIB,
            used_percent: 70.0,
        };
        let observer = RecordingObserver::new();

        let outcome = merge(&backend, &sampler, &observer, &["a_Map.tif", "b_Map.tif"]).unwrap();

        assert_eq!(
            outcome.warnings,
            vec![MergeWarning::TilesSkipped(vec![PathBuf::from("a_Map.tif")])]
        );
        assert_eq!(backend.get(Path::new("out.tif")).unwrap().data, gradient(4, 4));
    }

    #[test]
    fn test_no_readable_tiles_is_configuration_error() {
        let backend = InMemoryBackend::new();
        backend.insert("a_Map.tif", MemRaster::tile(gradient(4, 4), GT, None));
        backend.set_fault("a_Map.tif", Fault::Corrupt);
        let sampler = FixedUsage {
            total: 16 * GIB,
            used_percent: 70.0,
        };
        let observer = RecordingObserver::new();

        let err = merge(&backend, &sampler, &observer, &["a_Map.tif"]).unwrap_err();
        assert!(err.is_configuration());
        assert!(backend.paths().iter().all(|p| p.as_path() != Path::new("out.tif")));
    }

    #[test]
    fn test_bad_output_path_rejected_before_reading_tiles() {
        let backend = InMemoryBackend::new();
        backend.insert("a_Map.tif", MemRaster::tile(gradient(4, 4), GT, None));
        backend.set_fault("a_Map.tif", Fault::Corrupt);
        let sampler = FixedUsage {
            total: 16 * GIB,
            used_percent: 70.0,
        };
        let observer = RecordingObserver::new();
        let controller = MergeController::new(&backend, &sampler, &observer, small_config()).unwrap();
        let tiles = vec![PathBuf::from("a_Map.tif")];

        for output in ["mosaic.png", "no/such/dir/mosaic.tif"] {
            let err = controller.run(&tiles, Path::new(output)).unwrap_err();
            assert!(matches!(err, MosaicError::InvalidOutputPath { .. }), "{}", output);
            assert!(err.is_configuration());
        }
        assert!(observer.events().is_empty());
        assert_eq!(backend.paths(), vec![PathBuf::from("a_Map.tif")]);
    }
}
