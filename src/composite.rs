use crate::error::Result;
use ndarray::{Array2, ErrorKind, ShapeError};
use rayon::prelude::*;

/// Per-pixel majority vote across overlapping tiles.
///
/// Nodata votes like any category. Values outside `0..=255`, including the
/// padding for pixels outside a tile's footprint, don't vote; a pixel with no
/// voters is nodata. Ties go to the smallest value, so the result does not
/// depend on tile order.
#[derive(Debug, Clone, Copy)]
pub struct ModeCompositor {
    nodata: u8,
}

impl ModeCompositor {
    pub fn new(nodata: u8) -> Self {
        Self { nodata }
    }

    /// Merge `layers` (all of `shape`) into one block of category codes.
    pub fn composite(&self, shape: (usize, usize), layers: &[Array2<i32>]) -> Result<Array2<u8>> {
        if layers.iter().any(|layer| layer.dim() != shape) {
            return Err(ShapeError::from_kind(ErrorKind::IncompatibleShape).into());
        }

        let Some(first) = layers.first() else {
            return Ok(Array2::from_elem(shape, self.nodata));
        };

        if layers[1..].iter().all(|layer| layer == first) {
            return Ok(first.mapv(|v| self.to_code(v)));
        }

        Ok(self.vote(shape, layers))
    }

    fn vote(&self, shape: (usize, usize), layers: &[Array2<i32>]) -> Array2<u8> {
        let (nrows, ncols) = shape;
        let rows: Vec<Vec<u8>> = (0..nrows)
            .into_par_iter()
            .map(|row| {
                let mut values = Vec::with_capacity(layers.len());
                (0..ncols)
                    .map(|col| {
                        values.clear();
                        values.extend(
                            layers
                                .iter()
                                .map(|layer| layer[[row, col]])
                                .filter(|&v| is_category(v)),
                        );
                        majority(&mut values).map_or(self.nodata, |v| self.to_code(v))
                    })
                    .collect()
            })
            .collect();

        let flat: Vec<u8> = rows.into_iter().flatten().collect();
        Array2::from_shape_vec(shape, flat).unwrap_or_else(|_| Array2::from_elem(shape, self.nodata))
    }

    /// Values that don't fit a byte category become nodata.
    fn to_code(&self, value: i32) -> u8 {
        u8::try_from(value).unwrap_or(self.nodata)
    }
}

fn is_category(value: i32) -> bool {
    (0..=255).contains(&value)
}

/// Most frequent value, smallest first on ties. Sorts `values` in place.
pub fn majority(values: &mut [i32]) -> Option<i32> {
    values.sort_unstable();

    let mut best: Option<(i32, usize)> = None;
    let mut i = 0;
    while i < values.len() {
        let value = values[i];
        let run = values[i..].iter().take_while(|&&v| v == value).count();
        if best.map_or(true, |(_, count)| run > count) {
            best = Some((value, run));
        }
        i += run;
    }
    best.map(|(value, _)| value)
}
