//! Paging-transparent per-spectrum workspace.

use crate::cache::{BlockCache, CacheStats};
use crate::config::{MemoryConfig, PagingPlan};
use crate::source::{RawCountsFile, RawLayout, SpectrumSource, ZeroSource};
use crate::store::{BlockStore, TempBlockStore};
use crate::{Error, Result};
use histpage_core::{DetectorId, SpectraDetectorMap, SpectrumNumber};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// A histogram workspace whose spectra are paged in fixed-size blocks.
///
/// Callers address spectra by workspace index `0..get_number_histograms()`
/// and never see blocks. The `&mut self` accessors return slices into the
/// resident block; the `&self` accessors ([`Self::copy_y`],
/// [`Self::with_spectrum`]) lock the cache for the whole
/// residency check, load or eviction and read, and may be called from
/// several threads at once.
///
/// The spectra map is held behind an `Arc` and may be shared with other
/// workspaces; [`Self::mutable_spectra_map`] detaches a private copy first.
pub struct ManagedWorkspace {
    id: Uuid,
    plan: PagingPlan,
    x_len: usize,
    y_len: usize,
    cache: Mutex<BlockCache>,
    spectra_map: Arc<SpectraDetectorMap>,
    spectrum_numbers: Vec<SpectrumNumber>,
}

impl ManagedWorkspace {
    /// Creates a zero-filled workspace of `n_spectra` spectra.
    ///
    /// Block size and resident block count come from `config`.
    ///
    /// # Errors
    /// Returns an error if a dimension is 0 or the memory budget cannot be resolved.
    pub fn init(
        n_spectra: usize,
        x_len: usize,
        y_len: usize,
        config: &MemoryConfig,
    ) -> Result<Self> {
        let source = ZeroSource::new(n_spectra, x_len);
        Self::with_source(x_len, y_len, Box::new(source), config)
    }

    /// Creates a workspace over `source`, flushing modified blocks to a
    /// scratch file in the configured temporary directory.
    ///
    /// # Errors
    /// Returns an error if a dimension is 0 or the memory budget cannot be resolved.
    pub fn with_source(
        x_len: usize,
        y_len: usize,
        source: Box<dyn SpectrumSource>,
        config: &MemoryConfig,
    ) -> Result<Self> {
        let id = Uuid::new_v4();
        let plan = PagingPlan::for_shape(source.n_spectra(), x_len, y_len, config)?;
        let store = TempBlockStore::new(
            config.resolve_temp_dir(),
            id,
            plan.block_size,
            x_len,
            y_len,
        );
        Self::assemble(id, plan, x_len, y_len, source, Box::new(store))
    }

    /// Creates a workspace over `source` with a caller-supplied block store.
    ///
    /// # Errors
    /// Returns an error if a dimension is 0 or the memory budget cannot be resolved.
    pub fn with_store(
        x_len: usize,
        y_len: usize,
        source: Box<dyn SpectrumSource>,
        store: Box<dyn BlockStore>,
        config: &MemoryConfig,
    ) -> Result<Self> {
        let plan = PagingPlan::for_shape(source.n_spectra(), x_len, y_len, config)?;
        Self::assemble(Uuid::new_v4(), plan, x_len, y_len, source, store)
    }

    /// Opens a raw count file as a workspace.
    ///
    /// # Errors
    /// Returns an error if the file cannot be mapped or does not match `layout`.
    pub fn open_raw<P: AsRef<Path>>(
        path: P,
        layout: RawLayout,
        config: &MemoryConfig,
    ) -> Result<Self> {
        let source = RawCountsFile::open(path, layout)?;
        let x_len = source.x_len();
        let y_len = source.layout().n_channels;
        Self::with_source(x_len, y_len, Box::new(source), config)
    }

    fn assemble(
        id: Uuid,
        plan: PagingPlan,
        x_len: usize,
        y_len: usize,
        source: Box<dyn SpectrumSource>,
        store: Box<dyn BlockStore>,
    ) -> Result<Self> {
        let spectrum_numbers = (1..=plan.n_spectra)
            .map(SpectrumNumber::try_from)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| {
                Error::InvalidInput(format!(
                    "{} spectra exceed the spectrum number range",
                    plan.n_spectra
                ))
            })?;
        let cache = BlockCache::new(plan, x_len, y_len, source, store)?;
        log::debug!(
            "workspace {id}: {} spectra in {} blocks of {}, {} resident",
            plan.n_spectra,
            plan.n_blocks,
            plan.block_size,
            plan.max_resident_blocks
        );
        Ok(Self {
            id,
            plan,
            x_len,
            y_len,
            cache: Mutex::new(cache),
            spectra_map: Arc::new(SpectraDetectorMap::new()),
            spectrum_numbers,
        })
    }

    /// Identifier naming this workspace's scratch file.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Number of spectra.
    #[must_use]
    pub fn get_number_histograms(&self) -> usize {
        self.plan.n_spectra
    }

    /// Number of Y values per spectrum.
    #[must_use]
    pub fn blocksize(&self) -> usize {
        self.y_len
    }

    /// Number of X values per spectrum.
    #[must_use]
    pub fn x_len(&self) -> usize {
        self.x_len
    }

    /// Total number of Y values.
    #[must_use]
    pub fn size(&self) -> usize {
        self.plan.n_spectra * self.y_len
    }

    /// How the spectra are split into blocks.
    #[must_use]
    pub fn paging_plan(&self) -> &PagingPlan {
        &self.plan
    }

    /// Cache counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }

    /// Mutable X values of spectrum `index`. Marks its block dirty.
    ///
    /// If the row's X vector is shared it is copied first.
    ///
    /// # Errors
    /// Returns an error if `index` is out of range or paging fails.
    pub fn data_x(&mut self, index: usize) -> Result<&mut [f64]> {
        let block = self.cache.get_mut().block_for_spectrum_mut(index)?;
        let row = index - block.start_index();
        Ok(block.x_mut(row))
    }

    /// Mutable Y values of spectrum `index`. Marks its block dirty.
    ///
    /// # Errors
    /// Returns an error if `index` is out of range or paging fails.
    pub fn data_y(&mut self, index: usize) -> Result<&mut [f64]> {
        let block = self.cache.get_mut().block_for_spectrum_mut(index)?;
        let row = index - block.start_index();
        Ok(block.y_mut(row))
    }

    /// Mutable E values of spectrum `index`. Marks its block dirty.
    ///
    /// # Errors
    /// Returns an error if `index` is out of range or paging fails.
    pub fn data_e(&mut self, index: usize) -> Result<&mut [f64]> {
        let block = self.cache.get_mut().block_for_spectrum_mut(index)?;
        let row = index - block.start_index();
        Ok(block.e_mut(row))
    }

    /// X values of spectrum `index`.
    ///
    /// Takes `&mut self` because the read may page blocks in and out.
    ///
    /// # Errors
    /// Returns an error if `index` is out of range or paging fails.
    pub fn read_x(&mut self, index: usize) -> Result<&[f64]> {
        let block = self.cache.get_mut().block_for_spectrum(index)?;
        Ok(block.x(index - block.start_index()))
    }

    /// Y values of spectrum `index`.
    ///
    /// # Errors
    /// Returns an error if `index` is out of range or paging fails.
    pub fn read_y(&mut self, index: usize) -> Result<&[f64]> {
        let block = self.cache.get_mut().block_for_spectrum(index)?;
        Ok(block.y(index - block.start_index()))
    }

    /// E values of spectrum `index`.
    ///
    /// # Errors
    /// Returns an error if `index` is out of range or paging fails.
    pub fn read_e(&mut self, index: usize) -> Result<&[f64]> {
        let block = self.cache.get_mut().block_for_spectrum(index)?;
        Ok(block.e(index - block.start_index()))
    }

    /// Points spectrum `index` at a shared X vector.
    ///
    /// Spectra given clones of the same `Arc` keep sharing it across flushes
    /// and reloads.
    ///
    /// # Errors
    /// Returns an error if `index` is out of range, `x` has the wrong length,
    /// or paging fails.
    pub fn set_x(&mut self, index: usize, x: Arc<Vec<f64>>) -> Result<()> {
        let block = self.cache.get_mut().block_for_spectrum_mut(index)?;
        let row = index - block.start_index();
        block.set_x(row, x)
    }

    /// Shared X vector of spectrum `index`.
    ///
    /// # Errors
    /// Returns an error if `index` is out of range or paging fails.
    pub fn x_shared(&self, index: usize) -> Result<Arc<Vec<f64>>> {
        let mut cache = self.cache.lock();
        let block = cache.block_for_spectrum(index)?;
        Ok(Arc::clone(block.x_shared(index - block.start_index())))
    }

    /// Copy of the Y values of spectrum `index`.
    ///
    /// # Errors
    /// Returns an error if `index` is out of range or paging fails.
    pub fn copy_y(&self, index: usize) -> Result<Vec<f64>> {
        self.with_spectrum(index, |_, y, _| y.to_vec())
    }

    /// Calls `f` with the X, Y and E values of spectrum `index`.
    ///
    /// The cache stays locked while `f` runs, so `f` must not access this
    /// workspace.
    ///
    /// # Errors
    /// Returns an error if `index` is out of range or paging fails.
    pub fn with_spectrum<R>(
        &self,
        index: usize,
        f: impl FnOnce(&[f64], &[f64], &[f64]) -> R,
    ) -> Result<R> {
        let mut cache = self.cache.lock();
        let block = cache.block_for_spectrum(index)?;
        let row = index - block.start_index();
        Ok(f(block.x(row), block.y(row), block.e(row)))
    }

    /// Writes every modified resident block to the scratch store.
    ///
    /// # Errors
    /// Returns the first write failure.
    pub fn flush(&mut self) -> Result<()> {
        self.cache.get_mut().flush_all()
    }

    /// Spectrum number of workspace index `index`.
    ///
    /// # Errors
    /// Returns [`Error::IndexOutOfRange`] if `index` is out of range.
    pub fn spectrum_number(&self, index: usize) -> Result<SpectrumNumber> {
        self.spectrum_numbers
            .get(index)
            .copied()
            .ok_or(Error::IndexOutOfRange {
                index,
                len: self.spectrum_numbers.len(),
            })
    }

    /// Assigns the spectrum number of workspace index `index`.
    ///
    /// # Errors
    /// Returns [`Error::IndexOutOfRange`] if `index` is out of range.
    pub fn set_spectrum_number(&mut self, index: usize, spectrum: SpectrumNumber) -> Result<()> {
        let len = self.spectrum_numbers.len();
        let slot = self
            .spectrum_numbers
            .get_mut(index)
            .ok_or(Error::IndexOutOfRange { index, len })?;
        *slot = spectrum;
        Ok(())
    }

    /// Detectors contributing to workspace index `index`.
    ///
    /// # Errors
    /// Returns [`Error::IndexOutOfRange`] if `index` is out of range.
    pub fn detectors_for_index(&self, index: usize) -> Result<&[DetectorId]> {
        let spectrum = self.spectrum_number(index)?;
        Ok(self.spectra_map.detectors(spectrum))
    }

    /// The spectrum-detector map.
    #[must_use]
    pub fn spectra_map(&self) -> &SpectraDetectorMap {
        &self.spectra_map
    }

    /// Mutable spectrum-detector map, detached from any other workspace first.
    pub fn mutable_spectra_map(&mut self) -> &mut SpectraDetectorMap {
        if Arc::strong_count(&self.spectra_map) > 1 {
            log::trace!("workspace {}: detaching shared spectra map", self.id);
        }
        Arc::make_mut(&mut self.spectra_map)
    }

    /// A handle to the map, for sharing with another workspace.
    #[must_use]
    pub fn shared_spectra_map(&self) -> Arc<SpectraDetectorMap> {
        Arc::clone(&self.spectra_map)
    }

    /// Replaces the map, possibly with one shared with other workspaces.
    pub fn set_spectra_map(&mut self, map: Arc<SpectraDetectorMap>) {
        self.spectra_map = map;
    }

    /// Returns true if both workspaces hold the same map instance.
    #[must_use]
    pub fn shares_spectra_map_with(&self, other: &ManagedWorkspace) -> bool {
        Arc::ptr_eq(&self.spectra_map, &other.spectra_map)
    }
}
