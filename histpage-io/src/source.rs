//! Read-only sources that populate clean blocks.
//!

use crate::{DataBlock, Error, Result};
use memmap2::Mmap;
use rayon::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Supplies the original content of a block of spectra.
///
/// Called whenever a block that has never been flushed must become resident,
/// so implementations must return the same data every time.
pub trait SpectrumSource: Send {
    /// Number of spectra the source provides.
    fn n_spectra(&self) -> usize;

    /// Fills `block` with the spectra starting at `block.start_index()`.
    ///
    /// The block arrives zeroed and sized; implementations write through
    /// [`DataBlock::parts_mut`] so the block stays clean.
    ///
    /// # Errors
    /// Returns an error if the data cannot be read.
    fn read_block(&mut self, block: &mut DataBlock) -> Result<()>;
}

/// A source of zero counts with common bin boundaries.
///
/// Backs workspaces that are created empty and filled by algorithms.
pub struct ZeroSource {
    n_spectra: usize,
    x: Arc<Vec<f64>>,
}

impl ZeroSource {
    /// Creates a source of `n_spectra` zero spectra with `x_len` zero bin boundaries.
    #[must_use]
    pub fn new(n_spectra: usize, x_len: usize) -> Self {
        Self {
            n_spectra,
            x: Arc::new(vec![0.0; x_len]),
        }
    }

    /// The X vector shared by every spectrum.
    #[must_use]
    pub fn common_x(&self) -> &Arc<Vec<f64>> {
        &self.x
    }
}

impl SpectrumSource for ZeroSource {
    fn n_spectra(&self) -> usize {
        self.n_spectra
    }

    fn read_block(&mut self, block: &mut DataBlock) -> Result<()> {
        let parts = block.parts_mut();
        for x in parts.x.iter_mut() {
            *x = Arc::clone(&self.x);
        }
        parts.y.fill(0.0);
        parts.e.fill(0.0);
        Ok(())
    }
}

/// Layout of a raw count file.
#[derive(Clone, Debug)]
pub struct RawLayout {
    /// Bytes to skip before the first count.
    pub header_bytes: usize,
    /// Number of spectra stored.
    pub n_spectra: usize,
    /// Time channels (counts) per spectrum.
    pub n_channels: usize,
    /// Time-channel boundaries shared by every spectrum.
    pub time_channels: Arc<Vec<f64>>,
}

impl RawLayout {
    /// Layout with unit-width time channels `0, 1, ..., n_channels`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(n_spectra: usize, n_channels: usize) -> Self {
        Self {
            header_bytes: 0,
            n_spectra,
            n_channels,
            time_channels: Arc::new((0..=n_channels).map(|c| c as f64).collect()),
        }
    }

    /// Sets the header size in bytes.
    #[must_use]
    pub fn with_header_bytes(mut self, bytes: usize) -> Self {
        self.header_bytes = bytes;
        self
    }

    /// Sets the time-channel boundaries.
    #[must_use]
    pub fn with_time_channels(mut self, boundaries: Vec<f64>) -> Self {
        self.time_channels = Arc::new(boundaries);
        self
    }

    /// Byte length of one spectrum's counts.
    #[must_use]
    pub fn spectrum_bytes(&self) -> usize {
        self.n_channels * std::mem::size_of::<u32>()
    }

    /// Minimum file size able to hold this layout.
    #[must_use]
    pub fn required_bytes(&self) -> usize {
        self.header_bytes + self.n_spectra * self.spectrum_bytes()
    }
}

/// A memory-mapped file of little-endian `u32` counts, spectrum-major.
///
/// Y is the raw count and E its square root; every spectrum shares the
/// layout's time-channel boundaries as X.
pub struct RawCountsFile {
    mmap: Arc<Mmap>,
    path: PathBuf,
    layout: RawLayout,
}

impl RawCountsFile {
    /// Opens and maps a raw count file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be mapped, the layout is empty, or
    /// the file is too short for the layout.
    pub fn open<P: AsRef<Path>>(path: P, layout: RawLayout) -> Result<Self> {
        if layout.n_spectra == 0 || layout.n_channels == 0 {
            return Err(Error::InvalidInput(
                "raw layout needs at least one spectrum and one channel".to_string(),
            ));
        }
        let x_len = layout.time_channels.len();
        if x_len != layout.n_channels && x_len != layout.n_channels + 1 {
            return Err(Error::InvalidInput(format!(
                "{x_len} time-channel boundaries do not fit {} channels",
                layout.n_channels
            )));
        }

        let file = File::open(&path)?;
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        // This is the standard safety contract for memory mapping.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        if mmap.len() < layout.required_bytes() {
            return Err(Error::InvalidFormat(format!(
                "file size {} is smaller than the {} bytes required (file: {})",
                mmap.len(),
                layout.required_bytes(),
                path.as_ref().display()
            )));
        }
        log::debug!(
            "mapped {} ({} spectra x {} channels)",
            path.as_ref().display(),
            layout.n_spectra,
            layout.n_channels
        );
        Ok(Self {
            mmap: Arc::new(mmap),
            path: path.as_ref().to_path_buf(),
            layout,
        })
    }

    /// The file layout.
    #[must_use]
    pub fn layout(&self) -> &RawLayout {
        &self.layout
    }

    /// Path of the mapped file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Length of the X vectors this source produces.
    #[must_use]
    pub fn x_len(&self) -> usize {
        self.layout.time_channels.len()
    }

    /// Raw counts of one spectrum.
    fn counts(&self, index: usize) -> &[u8] {
        let stride = self.layout.spectrum_bytes();
        let start = self.layout.header_bytes + index * stride;
        &self.mmap[start..start + stride]
    }
}

impl SpectrumSource for RawCountsFile {
    fn n_spectra(&self) -> usize {
        self.layout.n_spectra
    }

    fn read_block(&mut self, block: &mut DataBlock) -> Result<()> {
        if block.y_len() != self.layout.n_channels || block.x_len() != self.x_len() {
            return Err(Error::InvalidFormat(format!(
                "block shape ({} x, {} y) does not match {}",
                block.x_len(),
                block.y_len(),
                self.path.display()
            )));
        }
        let end = block.start_index() + block.rows();
        if end > self.layout.n_spectra {
            return Err(Error::IndexOutOfRange {
                index: end - 1,
                len: self.layout.n_spectra,
            });
        }

        let n_channels = self.layout.n_channels;
        let parts = block.parts_mut();
        let start = parts.start_index;
        for x in parts.x.iter_mut() {
            *x = Arc::clone(&self.layout.time_channels);
        }
        let this = &*self;
        parts
            .y
            .par_chunks_mut(n_channels)
            .zip(parts.e.par_chunks_mut(n_channels))
            .enumerate()
            .for_each(|(row, (y, e))| {
                let raw = this.counts(start + row);
                for ((y, e), bytes) in y.iter_mut().zip(e.iter_mut()).zip(raw.chunks_exact(4)) {
                    let mut word = [0u8; 4];
                    word.copy_from_slice(bytes);
                    let count = f64::from(u32::from_le_bytes(word));
                    *y = count;
                    *e = count.sqrt();
                }
            });
        Ok(())
    }
}
