//! Fixed-size blocks of histogram rows, the unit of paging.
//!
//! Rows are stored as a Structure of Arrays: one reference-counted X vector
//! per row, and contiguous Y and E buffers of `rows * y_len` values. Rows that
//! use common bin boundaries hold clones of the same `Arc`, so a block costs a
//! single X allocation no matter how many rows it has.

use crate::{Error, Result};
use std::sync::Arc;

/// A contiguous run of spectra's X, Y and E vectors.
#[derive(Debug, Clone)]
pub struct DataBlock {
    start_index: usize,
    rows: usize,
    x_len: usize,
    y_len: usize,
    x: Vec<Arc<Vec<f64>>>,
    y: Vec<f64>,
    e: Vec<f64>,
    dirty: bool,
}

/// Mutable view of a block's buffers for sources and stores.
///
/// Writing through this view does not mark the block dirty.
pub struct BlockPartsMut<'a> {
    pub start_index: usize,
    pub x: &'a mut [Arc<Vec<f64>>],
    pub y: &'a mut [f64],
    pub e: &'a mut [f64],
}

impl DataBlock {
    /// Creates a zero-filled block whose rows share one zero X vector.
    #[must_use]
    pub fn new(start_index: usize, rows: usize, x_len: usize, y_len: usize) -> Self {
        Self {
            start_index,
            rows,
            x_len,
            y_len,
            x: vec![Arc::new(vec![0.0; x_len]); rows],
            y: vec![0.0; rows * y_len],
            e: vec![0.0; rows * y_len],
            dirty: false,
        }
    }

    /// Reuses this allocation for another block, zeroing its content.
    pub fn reset(&mut self, start_index: usize, rows: usize) {
        self.start_index = start_index;
        self.rows = rows;
        let zero_x = Arc::new(vec![0.0; self.x_len]);
        self.x.clear();
        self.x.resize(rows, zero_x);
        self.y.clear();
        self.y.resize(rows * self.y_len, 0.0);
        self.e.clear();
        self.e.resize(rows * self.y_len, 0.0);
        self.dirty = false;
    }

    /// Workspace index of the first row.
    #[must_use]
    pub fn start_index(&self) -> usize {
        self.start_index
    }

    /// Number of rows held.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Length of every X vector.
    #[must_use]
    pub fn x_len(&self) -> usize {
        self.x_len
    }

    /// Length of every Y and E vector.
    #[must_use]
    pub fn y_len(&self) -> usize {
        self.y_len
    }

    /// Returns true if workspace index `index` falls in this block.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        index >= self.start_index && index < self.start_index + self.rows
    }

    /// Returns true if a row has been handed out mutably since the last load or flush.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clears the dirty flag after the content has been persisted.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// X values of row `row`.
    ///
    /// # Panics
    /// Panics if `row >= self.rows()`.
    #[must_use]
    pub fn x(&self, row: usize) -> &[f64] {
        &self.x[row]
    }

    /// Shared handle to the X vector of row `row`.
    ///
    /// # Panics
    /// Panics if `row >= self.rows()`.
    #[must_use]
    pub fn x_shared(&self, row: usize) -> &Arc<Vec<f64>> {
        &self.x[row]
    }

    /// Y values of row `row`.
    ///
    /// # Panics
    /// Panics if `row >= self.rows()`.
    #[must_use]
    pub fn y(&self, row: usize) -> &[f64] {
        &self.y[self.span(row)]
    }

    /// E values of row `row`.
    ///
    /// # Panics
    /// Panics if `row >= self.rows()`.
    #[must_use]
    pub fn e(&self, row: usize) -> &[f64] {
        &self.e[self.span(row)]
    }

    /// Mutable X values of row `row`; detaches the row from any shared X.
    ///
    /// # Panics
    /// Panics if `row >= self.rows()`.
    pub fn x_mut(&mut self, row: usize) -> &mut [f64] {
        self.dirty = true;
        Arc::make_mut(&mut self.x[row]).as_mut_slice()
    }

    /// Mutable Y values of row `row`.
    ///
    /// # Panics
    /// Panics if `row >= self.rows()`.
    pub fn y_mut(&mut self, row: usize) -> &mut [f64] {
        self.dirty = true;
        let span = self.span(row);
        &mut self.y[span]
    }

    /// Mutable E values of row `row`.
    ///
    /// # Panics
    /// Panics if `row >= self.rows()`.
    pub fn e_mut(&mut self, row: usize) -> &mut [f64] {
        self.dirty = true;
        let span = self.span(row);
        &mut self.e[span]
    }

    /// Points row `row` at a shared X vector without copying it.
    ///
    /// # Errors
    /// Returns an error if the row is out of range or the vector has the wrong length.
    pub fn set_x(&mut self, row: usize, x: Arc<Vec<f64>>) -> Result<()> {
        if row >= self.rows {
            return Err(Error::IndexOutOfRange {
                index: row,
                len: self.rows,
            });
        }
        if x.len() != self.x_len {
            return Err(Error::InvalidInput(format!(
                "X vector has {} values, expected {}",
                x.len(),
                self.x_len
            )));
        }
        self.x[row] = x;
        self.dirty = true;
        Ok(())
    }

    /// Buffers for filling the block from a source or store.
    pub fn parts_mut(&mut self) -> BlockPartsMut<'_> {
        BlockPartsMut {
            start_index: self.start_index,
            x: &mut self.x,
            y: &mut self.y,
            e: &mut self.e,
        }
    }

    /// Approximate heap footprint, counting each run of shared X vectors once.
    #[must_use]
    pub fn memory_bytes(&self) -> usize {
        let f64_size = std::mem::size_of::<f64>();
        let distinct_x = self
            .x
            .iter()
            .enumerate()
            .filter(|&(i, x)| i == 0 || !Arc::ptr_eq(x, &self.x[i - 1]))
            .count();
        (self.y.len() + self.e.len() + distinct_x * self.x_len) * f64_size
    }

    fn span(&self, row: usize) -> std::ops::Range<usize> {
        assert!(row < self.rows, "row {row} out of range for block of {}", self.rows);
        row * self.y_len..(row + 1) * self.y_len
    }
}
