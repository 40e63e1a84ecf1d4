//! Bounded cache of resident blocks.
//!
//! At most `max_resident_blocks` blocks are held. A miss loads the block from
//! the store if it was ever flushed there, otherwise from the source. When
//! the cache is full the least recently used block is evicted first, after
//! being flushed if it is dirty.

use crate::config::PagingPlan;
use crate::store::BlockStore;
use crate::{DataBlock, Error, LruOrder, Result, SharedXTable, SpectrumSource};
use std::collections::HashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Counters describing cache behaviour.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CacheStats {
    /// Accesses served by a resident block.
    pub hits: u64,
    /// Accesses that had to load a block.
    pub misses: u64,
    /// Blocks loaded from the original source.
    pub source_reads: u64,
    /// Blocks loaded from the scratch store.
    pub store_reads: u64,
    /// Dirty blocks written to the scratch store.
    pub flushes: u64,
    /// Blocks dropped from memory.
    pub evictions: u64,
}

/// LRU cache of [`DataBlock`]s over a source and a scratch store.
pub struct BlockCache {
    plan: PagingPlan,
    x_len: usize,
    y_len: usize,
    source: Box<dyn SpectrumSource>,
    store: Box<dyn BlockStore>,
    shared_x: SharedXTable,
    resident: HashMap<usize, DataBlock>,
    order: LruOrder,
    stats: CacheStats,
}

impl BlockCache {
    /// Creates an empty cache.
    ///
    /// # Errors
    /// Returns an error if the source does not provide `plan.n_spectra` spectra.
    pub fn new(
        plan: PagingPlan,
        x_len: usize,
        y_len: usize,
        source: Box<dyn SpectrumSource>,
        store: Box<dyn BlockStore>,
    ) -> Result<Self> {
        if source.n_spectra() != plan.n_spectra {
            return Err(Error::InvalidInput(format!(
                "source provides {} spectra, plan expects {}",
                source.n_spectra(),
                plan.n_spectra
            )));
        }
        Ok(Self {
            plan,
            x_len,
            y_len,
            source,
            store,
            shared_x: SharedXTable::new(),
            resident: HashMap::with_capacity(plan.max_resident_blocks),
            order: LruOrder::with_capacity(plan.max_resident_blocks),
            stats: CacheStats::default(),
        })
    }

    /// The paging geometry.
    #[must_use]
    pub fn plan(&self) -> &PagingPlan {
        &self.plan
    }

    /// Access counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Returns the block holding workspace index `index`, loading it if needed.
    ///
    /// The row within the block is `index - block.start_index()`.
    ///
    /// # Errors
    /// Returns an error if `index` is out of range, the block cannot be loaded,
    /// or a dirty block cannot be flushed to make room.
    pub fn block_for_spectrum(&mut self, index: usize) -> Result<&DataBlock> {
        let block = self.block_of(index)?;
        self.ensure_resident(block)?;
        self.resident.get(&block).ok_or(Error::NotResident(block))
    }

    /// Mutable variant of [`Self::block_for_spectrum`].
    ///
    /// Obtaining the block does not mark it dirty; its mutable row accessors do.
    ///
    /// # Errors
    /// See [`Self::block_for_spectrum`].
    pub fn block_for_spectrum_mut(&mut self, index: usize) -> Result<&mut DataBlock> {
        let block = self.block_of(index)?;
        self.ensure_resident(block)?;
        self.resident.get_mut(&block).ok_or(Error::NotResident(block))
    }

    /// Writes every dirty resident block to the store and marks it clean.
    ///
    /// # Errors
    /// Returns the first write failure; blocks not yet written stay dirty.
    pub fn flush_all(&mut self) -> Result<()> {
        let mut dirty = self.dirty_blocks();
        dirty.sort_unstable();
        for index in dirty {
            if let Some(block) = self.resident.get_mut(&index) {
                self.store
                    .write_block(index, block, &mut self.shared_x)
                    .map_err(|err| err.for_block(index))?;
                block.mark_clean();
                self.stats.flushes += 1;
            }
        }
        Ok(())
    }

    /// Block numbers currently resident, most recently used first.
    #[must_use]
    pub fn resident_blocks(&self) -> Vec<usize> {
        self.order.iter().collect()
    }

    /// Returns true if block `block` is in memory.
    #[must_use]
    pub fn is_resident(&self, block: usize) -> bool {
        self.resident.contains_key(&block)
    }

    /// Block numbers of resident blocks with unsaved changes.
    #[must_use]
    pub fn dirty_blocks(&self) -> Vec<usize> {
        self.resident
            .iter()
            .filter(|(_, block)| block.is_dirty())
            .map(|(&index, _)| index)
            .collect()
    }

    /// Shared X vectors referenced from the store.
    #[must_use]
    pub fn shared_x(&self) -> &SharedXTable {
        &self.shared_x
    }

    /// Returns true if block `block` has been written to the store.
    #[must_use]
    pub fn is_flushed(&self, block: usize) -> bool {
        self.store.contains(block)
    }

    fn block_of(&self, index: usize) -> Result<usize> {
        if index >= self.plan.n_spectra {
            return Err(Error::IndexOutOfRange {
                index,
                len: self.plan.n_spectra,
            });
        }
        Ok(self.plan.locate(index).0)
    }

    fn ensure_resident(&mut self, block: usize) -> Result<()> {
        if self.resident.contains_key(&block) {
            self.order.touch(block);
            self.stats.hits += 1;
            return Ok(());
        }
        self.stats.misses += 1;

        let recycled = if self.order.len() >= self.plan.max_resident_blocks {
            self.evict_least_recent()?
        } else {
            None
        };

        let (start, rows) = self.plan.block_span(block);
        let mut data = match recycled {
            Some(mut data) => {
                data.reset(start, rows);
                data
            }
            None => DataBlock::new(start, rows, self.x_len, self.y_len),
        };

        if self.store.contains(block) {
            self.store
                .read_block(block, &mut data, &self.shared_x)
                .map_err(|err| err.for_block(block))?;
            self.stats.store_reads += 1;
            log::trace!("loaded block {block} from scratch store");
        } else {
            self.source
                .read_block(&mut data)
                .map_err(|err| err.for_block(block))?;
            self.stats.source_reads += 1;
            log::trace!("loaded block {block} from source");
        }
        data.mark_clean();

        self.resident.insert(block, data);
        self.order.push_front(block);
        Ok(())
    }

    /// Evicts the least recently used block and returns its buffers for reuse.
    ///
    /// A dirty victim is flushed first; if that fails it stays resident and dirty.
    fn evict_least_recent(&mut self) -> Result<Option<DataBlock>> {
        let Some(victim) = self.order.least_recent() else {
            return Ok(None);
        };
        if let Some(block) = self.resident.get_mut(&victim) {
            if block.is_dirty() {
                if let Err(err) = self.store.write_block(victim, block, &mut self.shared_x) {
                    log::error!("failed to flush block {victim} before eviction: {err}");
                    return Err(err.for_block(victim));
                }
                block.mark_clean();
                self.stats.flushes += 1;
                log::debug!("flushed dirty block {victim}");
            }
        }
        self.order.remove(victim);
        self.stats.evictions += 1;
        log::trace!("evicted block {victim}");
        Ok(self.resident.remove(&victim))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::source::ZeroSource;
    use crate::store::TempBlockStore;
    use std::io;
    use std::sync::Arc;
    use uuid::Uuid;

    struct FailingStore {
        fail_writes: bool,
    }

    impl BlockStore for FailingStore {
        fn write_block(&mut self, _: usize, _: &DataBlock, _: &mut SharedXTable) -> Result<()> {
            if self.fail_writes {
                Err(io::Error::new(io::ErrorKind::Other, "disk full").into())
            } else {
                Ok(())
            }
        }

        fn read_block(&mut self, _: usize, _: &mut DataBlock, _: &SharedXTable) -> Result<()> {
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated").into())
        }

        fn contains(&self, _: usize) -> bool {
            !self.fail_writes
        }
    }

    struct BrokenSource(usize);

    impl SpectrumSource for BrokenSource {
        fn n_spectra(&self) -> usize {
            self.0
        }

        fn read_block(&mut self, _: &mut DataBlock) -> Result<()> {
            Err(io::Error::new(io::ErrorKind::NotFound, "source gone").into())
        }
    }

    fn plan(n: usize, block_size: usize, resident: usize) -> PagingPlan {
        let config = MemoryConfig::default()
            .with_block_size(block_size)
            .with_max_resident_blocks(resident);
        PagingPlan::for_shape(n, 3, 2, &config).unwrap()
    }

    fn zero_cache(dir: &std::path::Path, n: usize, block_size: usize, resident: usize) -> BlockCache {
        let plan = plan(n, block_size, resident);
        let store = TempBlockStore::new(dir, Uuid::new_v4(), block_size, 3, 2);
        BlockCache::new(
            plan,
            3,
            2,
            Box::new(ZeroSource::new(n, 3)),
            Box::new(store),
        )
        .unwrap()
    }

    #[test]
    fn test_lru_eviction_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = zero_cache(dir.path(), 8, 2, 2);

        cache.block_for_spectrum(0).unwrap();
        cache.block_for_spectrum(2).unwrap();
        cache.block_for_spectrum(1).unwrap(); // hit on block 0
        cache.block_for_spectrum(4).unwrap(); // evicts block 1

        assert_eq!(cache.resident_blocks(), vec![2, 0]);
        assert!(!cache.is_resident(1));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 3);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.flushes, 0);
    }

    #[test]
    fn test_dirty_block_survives_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = zero_cache(dir.path(), 6, 2, 1);

        cache.block_for_spectrum_mut(3).unwrap().y_mut(1)[0] = 42.0;
        cache.block_for_spectrum(0).unwrap();
        assert!(cache.is_flushed(1));

        let block = cache.block_for_spectrum(3).unwrap();
        assert_eq!(block.y(1), &[42.0, 0.0]);
        assert!(!block.is_dirty());
        let stats = cache.stats();
        assert_eq!(stats.flushes, 1);
        assert_eq!(stats.store_reads, 1);
    }

    #[test]
    fn test_flush_all_cleans_resident_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = zero_cache(dir.path(), 6, 2, 3);
        cache.block_for_spectrum_mut(0).unwrap().y_mut(0)[0] = 1.0;
        cache.block_for_spectrum_mut(5).unwrap().e_mut(1)[1] = 2.0;
        assert_eq!(cache.dirty_blocks().len(), 2);

        cache.flush_all().unwrap();
        assert!(cache.dirty_blocks().is_empty());
        assert!(cache.is_flushed(0));
        assert!(cache.is_flushed(2));
        assert!(!cache.is_flushed(1));
    }

    #[test]
    fn test_rewritten_shared_x_does_not_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = zero_cache(dir.path(), 4, 2, 1);

        for round in 0..1000 {
            let bins = Arc::new(vec![f64::from(round), 1.0, 2.0]);
            let block = cache.block_for_spectrum_mut(0).unwrap();
            block.set_x(0, Arc::clone(&bins)).unwrap();
            block.set_x(1, bins).unwrap();
            cache.block_for_spectrum(2).unwrap();
        }

        assert_eq!(cache.shared_x().len(), 1);
        let block = cache.block_for_spectrum(1).unwrap();
        assert_eq!(block.x(1), &[999.0, 1.0, 2.0]);
        assert!(Arc::ptr_eq(block.x_shared(0), block.x_shared(1)));
        assert_eq!(cache.stats().flushes, 1000);
    }

    #[test]
    fn test_failed_flush_keeps_dirty_block() {
        let plan = plan(4, 2, 1);
        let mut cache = BlockCache::new(
            plan,
            3,
            2,
            Box::new(ZeroSource::new(4, 3)),
            Box::new(FailingStore { fail_writes: true }),
        )
        .unwrap();

        cache.block_for_spectrum_mut(0).unwrap().y_mut(0)[1] = 5.0;
        let err = cache.block_for_spectrum(2).unwrap_err();
        assert!(matches!(err, Error::Storage { block: 0, .. }));

        assert!(cache.is_resident(0));
        assert!(!cache.is_resident(1));
        let block = cache.block_for_spectrum(0).unwrap();
        assert!(block.is_dirty());
        assert_eq!(block.y(0), &[0.0, 5.0]);
    }

    #[test]
    fn test_failed_read_leaves_block_absent() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan(4, 2, 2);
        let store = TempBlockStore::new(dir.path(), Uuid::new_v4(), 2, 3, 2);
        let mut cache =
            BlockCache::new(plan, 3, 2, Box::new(BrokenSource(4)), Box::new(store)).unwrap();

        let err = cache.block_for_spectrum(1).unwrap_err();
        assert!(matches!(err, Error::Storage { block: 0, .. }));
        assert!(!cache.is_resident(0));
        assert!(cache.resident_blocks().is_empty());
    }

    #[test]
    fn test_out_of_range_and_source_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = zero_cache(dir.path(), 4, 2, 1);
        assert!(matches!(
            cache.block_for_spectrum(4),
            Err(Error::IndexOutOfRange { index: 4, len: 4 })
        ));

        let store = TempBlockStore::new(dir.path(), Uuid::new_v4(), 2, 3, 2);
        let mismatched = BlockCache::new(
            plan(4, 2, 1),
            3,
            2,
            Box::new(ZeroSource::new(5, 3)),
            Box::new(store),
        );
        assert!(mismatched.is_err());
    }
}
