use crate::error::{MosaicError, Result};
use crate::memory::MemorySnapshot;
use log::info;

pub const MIN_CHUNK: usize = 256;
pub const MAX_CHUNK: usize = 4096;

/// Inclusive bounds on the chunk side length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLimits {
    pub min: usize,
    pub max: usize,
}

impl Default for ChunkLimits {
    fn default() -> Self {
        Self {
            min: MIN_CHUNK,
            max: MAX_CHUNK,
        }
    }
}

impl ChunkLimits {
    pub fn new(min: usize, max: usize) -> Result<Self> {
        if min == 0 || min > max {
            return Err(MosaicError::InvalidConfig(format!(
                "chunk limits must satisfy 0 < min <= max, got [{}, {}]",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    pub fn clamp(&self, size: usize) -> usize {
        size.clamp(self.min, self.max)
    }
}

/// Memory usage thresholds, in percent of total memory in use.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Watermarks {
    pub high: f64,
    pub low: f64,
}

impl Default for Watermarks {
    fn default() -> Self {
        Self {
            high: 85.0,
            low: 60.0,
        }
    }
}

impl Watermarks {
    pub fn validate(&self) -> Result<()> {
        let in_range = |v: f64| (0.0..=100.0).contains(&v);
        if !in_range(self.high) || !in_range(self.low) || self.low >= self.high {
            return Err(MosaicError::InvalidConfig(format!(
                "watermarks must satisfy 0 <= low < high <= 100, got low={} high={}",
                self.low, self.high
            )));
        }
        Ok(())
    }
}

/// What a single tile costs per output pixel.
#[derive(Debug, Clone, Copy)]
pub struct TileCost {
    pub tile_count: usize,
    pub bytes_per_pixel: usize,
    /// Buffer multiplier for metadata and intermediate copies.
    pub overhead: f64,
}

impl TileCost {
    pub fn new(tile_count: usize, bytes_per_pixel: usize, band_count: usize) -> Self {
        Self {
            tile_count,
            bytes_per_pixel,
            overhead: overhead_for_bands(band_count),
        }
    }
}

/// Multi-band tiles carry more per-pixel bookkeeping.
pub fn overhead_for_bands(band_count: usize) -> f64 {
    if band_count > 1 {
        2.2
    } else {
        1.8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub chunk_size: usize,
    /// Bytes held by one window's worth of tile reads.
    pub estimated_bytes: u64,
}

/// Derive a chunk side length from available memory.
///
/// `floor(sqrt(available × safety / (tiles × bytes_per_pixel × overhead)))`,
/// clamped into `limits` whatever the inputs.
pub fn plan_chunk_size(
    available_bytes: u64,
    safety_factor: f64,
    cost: &TileCost,
    limits: &ChunkLimits,
) -> ChunkPlan {
    let budget = available_bytes as f64 * safety_factor;
    let per_pixel = cost.tile_count as f64 * cost.bytes_per_pixel as f64 * cost.overhead;

    let raw = if per_pixel > 0.0 && budget.is_finite() {
        (budget / per_pixel).max(0.0).sqrt().floor()
    } else if per_pixel > 0.0 {
        0.0
    } else {
        // Nothing to read, so memory imposes no bound.
        f64::INFINITY
    };

    // NaN and infinities are resolved by the clamp.
    let chunk_size = if raw.is_nan() {
        limits.min
    } else if raw >= limits.max as f64 {
        limits.max
    } else {
        limits.clamp(raw as usize)
    };

    let estimated_bytes = (chunk_size as u64)
        .saturating_mul(chunk_size as u64)
        .saturating_mul(cost.tile_count as u64)
        .saturating_mul(cost.bytes_per_pixel as u64);

    ChunkPlan {
        chunk_size,
        estimated_bytes,
    }
}

/// Plan from a memory snapshot and record the decision.
pub fn plan_from_snapshot(
    memory: &MemorySnapshot,
    safety_factor: f64,
    cost: &TileCost,
    limits: &ChunkLimits,
) -> ChunkPlan {
    let plan = plan_chunk_size(memory.available_bytes, safety_factor, cost, limits);
    info!(
        "Memory plan | available: {:.1} MiB | chunk: {}x{} | estimated: {:.1} MiB",
        memory.available_bytes as f64 / (1024.0 * 1024.0),
        plan.chunk_size,
        plan.chunk_size,
        plan.estimated_bytes as f64 / (1024.0 * 1024.0)
    );
    plan
}

/// Mutable chunk size owned by the merge loop.
#[derive(Debug, Clone)]
pub struct ChunkSizeState {
    size: usize,
    limits: ChunkLimits,
    watermarks: Watermarks,
}

impl ChunkSizeState {
    pub fn new(initial: usize, limits: ChunkLimits, watermarks: Watermarks) -> Self {
        Self {
            size: limits.clamp(initial),
            limits,
            watermarks,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn above_high(&self, memory: &MemorySnapshot) -> bool {
        memory.used_percent() > self.watermarks.high
    }

    pub fn below_low(&self, memory: &MemorySnapshot) -> bool {
        memory.used_percent() < self.watermarks.low
    }

    /// Halve the size. Returns the old and new size if it changed.
    pub fn shrink(&mut self) -> Option<(usize, usize)> {
        let from = self.size;
        self.size = self.limits.clamp(from / 2);
        (self.size != from).then_some((from, self.size))
    }

    /// Double the size. Returns the old and new size if it changed.
    pub fn grow(&mut self) -> Option<(usize, usize)> {
        let from = self.size;
        self.size = self.limits.clamp(from.saturating_mul(2));
        (self.size != from).then_some((from, self.size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn test_plan_matches_formula() {
        // 1 GiB * 0.6 / (4 tiles * 1 byte * 1.8) → sqrt = 9,481.7 → clamped to 4096
        let cost = TileCost::new(4, 1, 1);
        let plan = plan_chunk_size(GIB, 0.6, &cost, &ChunkLimits::default());
        assert_eq!(plan.chunk_size, 4096);

        // 64 MiB * 0.6 / (100 * 1 * 1.8) → sqrt(223,696.2) = 472.9 → 472
        let cost = TileCost::new(100, 1, 1);
        let plan = plan_chunk_size(64 * 1024 * 1024, 0.6, &cost, &ChunkLimits::default());
        assert_eq!(plan.chunk_size, 472);
        assert_eq!(plan.estimated_bytes, 472 * 472 * 100);
    }

    #[test]
    fn test_plan_always_within_limits() {
        let limits = ChunkLimits::default();
        let memories = [0, 1, 1024, 64 * 1024 * 1024, 16 * GIB, u64::MAX];
        for tiles in [0usize, 1, 1000] {
            for &mem in &memories {
                for bpp in [1usize, 4, 8] {
                    let cost = TileCost::new(tiles, bpp, 1);
                    let plan = plan_chunk_size(mem, 0.6, &cost, &limits);
                    assert!(
                        (MIN_CHUNK..=MAX_CHUNK).contains(&plan.chunk_size),
                        "tiles={} mem={} bpp={} → {}",
                        tiles,
                        mem,
                        bpp,
                        plan.chunk_size
                    );
                }
            }
        }
    }

    #[test]
    fn test_plan_degenerate_factors() {
        let limits = ChunkLimits::default();
        let cost = TileCost::new(10, 1, 1);
        assert_eq!(plan_chunk_size(GIB, f64::NAN, &cost, &limits).chunk_size, MIN_CHUNK);
        assert_eq!(plan_chunk_size(GIB, -1.0, &cost, &limits).chunk_size, MIN_CHUNK);
        assert_eq!(plan_chunk_size(GIB, f64::INFINITY, &cost, &limits).chunk_size, MIN_CHUNK);
    }

    #[test]
    fn test_multiband_overhead_is_larger() {
        assert!(overhead_for_bands(3) > overhead_for_bands(1));
    }

    #[test]
    fn test_state_shrink_stops_at_minimum() {
        let mut state = ChunkSizeState::new(1024, ChunkLimits::default(), Watermarks::default());
        assert_eq!(state.shrink(), Some((1024, 512)));
        assert_eq!(state.shrink(), Some((512, 256)));
        assert_eq!(state.shrink(), None);
        assert_eq!(state.size(), 256);
    }

    #[test]
    fn test_state_grow_stops_at_maximum() {
        let mut state = ChunkSizeState::new(2048, ChunkLimits::default(), Watermarks::default());
        assert_eq!(state.grow(), Some((2048, 4096)));
        assert_eq!(state.grow(), None);
        assert_eq!(state.size(), MAX_CHUNK);
    }

    #[test]
    fn test_state_initial_size_is_clamped() {
        let state = ChunkSizeState::new(10, ChunkLimits::default(), Watermarks::default());
        assert_eq!(state.size(), MIN_CHUNK);
    }

    #[test]
    fn test_watermark_checks() {
        let state = ChunkSizeState::new(512, ChunkLimits::default(), Watermarks::default());
        assert!(state.above_high(&MemorySnapshot::at_usage(GIB, 90.0)));
        assert!(!state.above_high(&MemorySnapshot::at_usage(GIB, 70.0)));
        assert!(state.below_low(&MemorySnapshot::at_usage(GIB, 30.0)));
        assert!(!state.below_low(&MemorySnapshot::at_usage(GIB, 70.0)));
    }

    #[test]
    fn test_invalid_limits_and_watermarks() {
        assert!(ChunkLimits::new(0, 10).is_err());
        assert!(ChunkLimits::new(20, 10).is_err());
        assert!(Watermarks { high: 50.0, low: 60.0 }.validate().is_err());
        assert!(Watermarks::default().validate().is_ok());
    }
}
