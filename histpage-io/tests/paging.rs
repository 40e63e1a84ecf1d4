#![allow(clippy::cast_precision_loss)]
use approx::assert_relative_eq;
use histpage_io::{
    BlockStore, DataBlock, Error, ManagedWorkspace, MemoryConfig, RawCountsFile, RawLayout,
    Result, SharedXTable, TempBlockStore,
};
use rayon::prelude::*;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::{NamedTempFile, TempDir};
use uuid::Uuid;

/// Counts writes per block before delegating to a scratch file.
struct CountingStore {
    inner: TempBlockStore,
    writes: Arc<Vec<AtomicUsize>>,
}

impl BlockStore for CountingStore {
    fn write_block(&mut self, index: usize, block: &DataBlock, shared: &mut SharedXTable) -> Result<()> {
        self.writes[index].fetch_add(1, Ordering::SeqCst);
        self.inner.write_block(index, block, shared)
    }

    fn read_block(&mut self, index: usize, block: &mut DataBlock, shared: &SharedXTable) -> Result<()> {
        self.inner.read_block(index, block, shared)
    }

    fn contains(&self, index: usize) -> bool {
        self.inner.contains(index)
    }
}

fn paged_config(dir: &TempDir, block_size: usize, resident: usize) -> MemoryConfig {
    MemoryConfig::default()
        .with_block_size(block_size)
        .with_max_resident_blocks(resident)
        .with_temp_dir(dir.path())
}

/// `n_spectra` spectra of `n_channels` counts, count = 100 * spectrum + channel.
fn raw_file(n_spectra: u32, n_channels: u32) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for s in 0..n_spectra {
        for c in 0..n_channels {
            file.write_all(&(100 * s + c).to_le_bytes()).unwrap();
        }
    }
    file.flush().unwrap();
    file
}

#[test]
fn test_dirty_block_round_trips_through_scratch_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = paged_config(&dir, 2, 2);
    let mut ws = ManagedWorkspace::init(20, 11, 10, &config).unwrap();

    ws.data_y(5).unwrap()[0] = 42.0;
    for i in [7, 9, 11, 13, 15, 17] {
        assert_eq!(ws.read_y(i).unwrap()[0], 0.0);
    }
    assert_eq!(ws.read_y(5).unwrap()[0], 42.0);

    let stats = ws.cache_stats();
    assert_eq!(stats.flushes, 1);
    assert_eq!(stats.store_reads, 1);
    assert_eq!(stats.evictions, 6);
}

#[test]
fn test_clean_eviction_never_writes() {
    let dir = tempfile::tempdir().unwrap();
    let file = raw_file(12, 4);
    let source = RawCountsFile::open(file.path(), RawLayout::new(12, 4)).unwrap();
    let writes: Arc<Vec<AtomicUsize>> = Arc::new((0..6).map(|_| AtomicUsize::new(0)).collect());
    let store = CountingStore {
        inner: TempBlockStore::new(dir.path(), Uuid::new_v4(), 2, 5, 4),
        writes: Arc::clone(&writes),
    };
    let config = paged_config(&dir, 2, 2);
    let mut ws =
        ManagedWorkspace::with_store(5, 4, Box::new(source), Box::new(store), &config).unwrap();

    assert_eq!(ws.read_y(3).unwrap(), &[300.0, 301.0, 302.0, 303.0]);
    for i in [4, 6, 8, 10] {
        ws.read_y(i).unwrap();
    }
    assert_eq!(ws.read_y(3).unwrap(), &[300.0, 301.0, 302.0, 303.0]);
    assert_relative_eq!(ws.read_e(3).unwrap()[1], 301.0_f64.sqrt());

    assert!(writes.iter().all(|w| w.load(Ordering::SeqCst) == 0));
    let stats = ws.cache_stats();
    assert_eq!(stats.flushes, 0);
    assert_eq!(stats.store_reads, 0);
    assert_eq!(stats.source_reads, 6);
}

#[test]
fn test_modified_raw_spectrum_reloads_from_scratch() {
    let dir = tempfile::tempdir().unwrap();
    let file = raw_file(8, 3);
    let config = paged_config(&dir, 2, 1);
    let mut ws = ManagedWorkspace::open_raw(file.path(), RawLayout::new(8, 3), &config).unwrap();
    assert_eq!(ws.get_number_histograms(), 8);
    assert_eq!(ws.blocksize(), 3);
    assert_eq!(ws.size(), 24);

    for v in ws.data_y(6).unwrap() {
        *v *= 2.0;
    }
    ws.read_y(0).unwrap();
    assert_eq!(ws.read_y(6).unwrap(), &[1200.0, 1202.0, 1204.0]);
    assert_eq!(ws.read_y(7).unwrap(), &[700.0, 701.0, 702.0]);
    assert_eq!(ws.read_x(7).unwrap(), &[0.0, 1.0, 2.0, 3.0]);
}

#[test]
fn test_shared_x_survives_paging() {
    let dir = tempfile::tempdir().unwrap();
    let config = paged_config(&dir, 2, 1);
    let mut ws = ManagedWorkspace::init(6, 3, 2, &config).unwrap();
    let bins = Arc::new(vec![0.5, 1.5, 2.5]);

    for i in 0..6 {
        ws.set_x(i, Arc::clone(&bins)).unwrap();
    }
    ws.data_y(5).unwrap()[1] = 7.0;
    ws.read_y(0).unwrap();

    for i in 0..6 {
        let x = ws.x_shared(i).unwrap();
        assert!(Arc::ptr_eq(&x, &bins), "spectrum {i} lost its shared X");
    }
    assert_eq!(ws.read_y(5).unwrap(), &[0.0, 7.0]);

    ws.data_x(2).unwrap()[0] = -1.0;
    assert_eq!(ws.read_x(2).unwrap(), &[-1.0, 1.5, 2.5]);
    assert_eq!(bins[0], 0.5);
    assert!(Arc::ptr_eq(&ws.x_shared(3).unwrap(), &bins));
}

#[test]
fn test_index_out_of_range() {
    let dir = tempfile::tempdir().unwrap();
    let mut ws = ManagedWorkspace::init(3, 2, 1, &paged_config(&dir, 2, 1)).unwrap();
    let err = ws.read_y(3).unwrap_err();
    assert!(matches!(err, Error::IndexOutOfRange { index: 3, len: 3 }));
    assert!(ws.data_x(usize::MAX).is_err());
    assert!(ws.with_spectrum(3, |_, y, _| y.len()).is_err());
}

#[test]
fn test_set_x_rejects_wrong_length() {
    let dir = tempfile::tempdir().unwrap();
    let mut ws = ManagedWorkspace::init(3, 2, 1, &paged_config(&dir, 2, 1)).unwrap();
    assert!(matches!(
        ws.set_x(0, Arc::new(vec![1.0; 3])),
        Err(Error::InvalidInput(_))
    ));
}

#[test]
fn test_parallel_readers_share_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let file = raw_file(64, 5);
    let config = paged_config(&dir, 4, 3);
    let ws = ManagedWorkspace::open_raw(file.path(), RawLayout::new(64, 5), &config).unwrap();

    let sums: Vec<f64> = (0..64)
        .into_par_iter()
        .map(|i| ws.with_spectrum(i, |_, y, _| y.iter().sum::<f64>()).unwrap())
        .collect();

    for (i, sum) in sums.iter().enumerate() {
        let base = 100.0 * i as f64;
        assert_relative_eq!(*sum, 5.0 * base + 10.0);
    }
    assert_eq!(ws.copy_y(63).unwrap(), vec![6300.0, 6301.0, 6302.0, 6303.0, 6304.0]);
    assert!(ws.cache_stats().evictions > 0);
}

#[test]
fn test_spectra_map_copy_on_write() {
    let dir = tempfile::tempdir().unwrap();
    let config = paged_config(&dir, 2, 1);
    let mut a = ManagedWorkspace::init(4, 2, 1, &config).unwrap();
    let mut b = ManagedWorkspace::init(4, 2, 1, &config).unwrap();

    a.mutable_spectra_map().populate_simple(1, 5);
    b.set_spectra_map(a.shared_spectra_map());
    assert!(a.shares_spectra_map_with(&b));

    b.mutable_spectra_map().add_spectrum_entries(1, &[900]);
    assert!(!a.shares_spectra_map_with(&b));
    assert_eq!(a.spectra_map().get_detectors(1), vec![1]);
    assert_eq!(b.spectra_map().get_detectors(1), vec![1, 900]);
    assert_eq!(a.spectra_map().n_elements(), 4);
    assert_eq!(b.spectra_map().n_elements(), 5);

    let before = a.shared_spectra_map();
    a.mutable_spectra_map().remap(2, 3);
    assert_eq!(before.get_detectors(2), vec![2]);
    assert!(a.spectra_map().get_detectors(2).is_empty());
}

#[test]
fn test_scratch_file_removed_with_workspace() {
    let dir = tempfile::tempdir().unwrap();
    let config = paged_config(&dir, 1, 1);
    let mut ws = ManagedWorkspace::init(2, 1, 1, &config).unwrap();
    ws.data_y(0).unwrap()[0] = 1.0;
    ws.read_y(1).unwrap();

    let prefix = format!("histpage-{}-", ws.id());
    let scratch = || {
        std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
            .count()
    };
    assert_eq!(scratch(), 1);
    drop(ws);
    assert_eq!(scratch(), 0);
}
