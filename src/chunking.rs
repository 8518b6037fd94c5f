use log::debug;
use std::fmt;

/// A rectangle in output pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    pub row: usize,
    pub col: usize,
    pub height: usize,
    pub width: usize,
}

impl Window {
    pub fn new(row: usize, col: usize, height: usize, width: usize) -> Self {
        Self {
            row,
            col,
            height,
            width,
        }
    }

    pub fn row_end(&self) -> usize {
        self.row + self.height
    }

    pub fn col_end(&self) -> usize {
        self.col + self.width
    }

    pub fn area(&self) -> usize {
        self.height * self.width
    }

    pub fn is_empty(&self) -> bool {
        self.height == 0 || self.width == 0
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// The top-left corner of this window, at most `size` pixels on a side.
    pub fn head(&self, size: usize) -> Window {
        Window::new(self.row, self.col, size.min(self.height), size.min(self.width))
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rows {}..{}, cols {}..{}",
            self.row,
            self.row_end(),
            self.col,
            self.col_end()
        )
    }
}

/// Fixed-size grid over a raster, used for full scans.
pub struct WindowGrid {
    raster_width: usize,
    raster_height: usize,
    chunk_size: usize,
    pub num_chunks_x: usize,
    pub num_chunks_y: usize,
    pub total_chunks: usize,
}

impl WindowGrid {
    pub fn new(raster_width: usize, raster_height: usize, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let num_chunks_x = raster_width.div_ceil(chunk_size);
        let num_chunks_y = raster_height.div_ceil(chunk_size);
        let total_chunks = num_chunks_x * num_chunks_y;

        debug!(
            "WindowGrid: {}x{} raster, chunk_size={} → {}x{} chunks ({} total)",
            raster_width, raster_height, chunk_size, num_chunks_x, num_chunks_y, total_chunks
        );

        Self {
            raster_width,
            raster_height,
            chunk_size,
            num_chunks_x,
            num_chunks_y,
            total_chunks,
        }
    }

    pub fn iter(&self) -> WindowIterator<'_> {
        WindowIterator {
            grid: self,
            current_idx: 0,
        }
    }

    pub fn window(&self, chunk_idx: usize) -> Window {
        let chunk_y = chunk_idx / self.num_chunks_x;
        let chunk_x = chunk_idx % self.num_chunks_x;

        let col = chunk_x * self.chunk_size;
        let row = chunk_y * self.chunk_size;
        let col_end = ((chunk_x + 1) * self.chunk_size).min(self.raster_width);
        let row_end = ((chunk_y + 1) * self.chunk_size).min(self.raster_height);

        Window::new(row, col, row_end - row, col_end - col)
    }
}

pub struct WindowIterator<'a> {
    grid: &'a WindowGrid,
    current_idx: usize,
}

impl<'a> Iterator for WindowIterator<'a> {
    type Item = Window;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_idx < self.grid.total_chunks {
            let window = self.grid.window(self.current_idx);
            self.current_idx += 1;
            Some(window)
        } else {
            None
        }
    }
}

/// Walks the output extent with a chunk size that may change between windows.
///
/// The cursor keeps a stack of regions still to be covered. A window is always
/// carved from the top-left corner of the current region; completing it splits
/// the rest of that region into the remainder of the band to its right and
/// everything below the band. Any sequence of sizes therefore covers the extent
/// exactly once, and a constant size yields plain row-major order.
#[derive(Debug, Clone)]
pub struct WindowCursor {
    pending: Vec<Window>,
    total_area: usize,
    completed_area: usize,
}

impl WindowCursor {
    pub fn new(width: usize, height: usize) -> Self {
        let extent = Window::new(0, 0, height, width);
        let pending = if extent.is_empty() { Vec::new() } else { vec![extent] };
        Self {
            pending,
            total_area: extent.area(),
            completed_area: 0,
        }
    }

    /// Region the next window will be carved from, if any remains.
    pub fn region(&self) -> Option<&Window> {
        self.pending.last()
    }

    /// Next window at `chunk_size`, clipped to the current region.
    pub fn next_window(&self, chunk_size: usize) -> Option<Window> {
        self.region().map(|region| region.head(chunk_size.max(1)))
    }

    /// Mark `window` (as returned by `next_window`) as written.
    pub fn complete(&mut self, window: &Window) {
        let Some(region) = self.pending.pop() else {
            return;
        };
        debug_assert_eq!((region.row, region.col), (window.row, window.col));

        if region.height > window.height {
            self.pending.push(Window::new(
                region.row + window.height,
                region.col,
                region.height - window.height,
                region.width,
            ));
        }
        if region.width > window.width {
            self.pending.push(Window::new(
                region.row,
                region.col + window.width,
                window.height,
                region.width - window.width,
            ));
        }
        self.completed_area += window.area();
    }

    pub fn is_finished(&self) -> bool {
        self.pending.is_empty()
    }

    /// Fraction of the extent already completed.
    pub fn progress(&self) -> f64 {
        if self.total_area == 0 {
            1.0
        } else {
            self.completed_area as f64 / self.total_area as f64
        }
    }
}
