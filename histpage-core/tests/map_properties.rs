use histpage_core::{DetectorIndex, SpectraDetectorMap, NO_SPECTRUM};

fn assert_consistent(map: &SpectraDetectorMap, probe: &[i32]) {
    for &s in probe {
        assert_eq!(map.ndet(s), map.get_detectors(s).len(), "spectrum {s}");
    }
}

#[test]
fn test_populate_then_get_detectors() {
    let spectra: Vec<i32> = (1..=500).collect();
    let detectors: Vec<i32> = spectra.iter().map(|s| 1000 + s * 3).collect();

    let mut map = SpectraDetectorMap::new();
    map.populate(&spectra, &detectors).unwrap();

    assert_eq!(map.n_elements(), spectra.len());
    for (s, d) in spectra.iter().zip(&detectors) {
        assert!(map.get_detectors(*s).contains(d));
    }
    assert_consistent(&map, &[-1, 0, 1, 250, 500, 501]);
}

#[test]
fn test_contiguous_detectors_keep_insertion_order() {
    let mut map = SpectraDetectorMap::new();
    map.populate(&[1, 1, 1, 1], &[103, 100, 102, 101]).unwrap();
    map.add_spectrum_entries(1, &[104, 105]);
    assert_eq!(map.get_detectors(1), vec![103, 100, 102, 101, 104, 105]);
    assert_eq!(map.n_elements(), 6);
}

#[test]
fn test_remap_to_absent_target_is_noop() {
    let mut map = SpectraDetectorMap::new();
    map.populate(&[1, 2, 3], &[11, 12, 13]).unwrap();
    let before = map.clone();

    map.remap(1, 8);

    assert_eq!(map.n_elements(), before.n_elements());
    for s in 0..10 {
        assert_eq!(map.get_detectors(s), before.get_detectors(s));
    }
}

#[test]
fn test_remap_consolidates_detectors() {
    let mut map = SpectraDetectorMap::new();
    map.populate(&[1, 2], &[11, 12]).unwrap();

    map.remap(1, 2);

    assert_eq!(map.ndet(1), 0);
    let dets = map.get_detectors(2);
    assert!(dets.contains(&11));
    assert!(dets.contains(&12));
    assert_eq!(map.n_elements(), 2);
    assert_consistent(&map, &[1, 2]);
}

#[test]
fn test_clear_is_idempotent() {
    let mut map = SpectraDetectorMap::new();
    map.populate(&[4, 5], &[40, 50]).unwrap();

    map.clear();
    assert_eq!(map.n_elements(), 0);
    map.clear();
    assert_eq!(map.n_elements(), 0);

    map.populate(&[6], &[60]).unwrap();
    let mut fresh = SpectraDetectorMap::new();
    fresh.populate(&[6], &[60]).unwrap();
    assert_eq!(map, fresh);
    assert_eq!(map.get_spectra(&[40, 60]), vec![NO_SPECTRUM, 6]);
}

#[test]
fn test_populate_simple_inverse_lookup() {
    const N: i32 = 64;
    let mut map = SpectraDetectorMap::new();
    map.populate_simple(0, N);

    let query = DetectorIndex::from_range(0, N);
    let spectra = map.get_spectra(&query);
    assert_eq!(spectra, (0..N).collect::<Vec<_>>());
    assert_eq!(map.n_elements(), N as usize);

    map.populate_simple(10, 20);
    assert_eq!(map.get_spectra(&[10, 19, 20]), vec![10, 19, NO_SPECTRUM]);
}

#[test]
fn test_equality_ignores_insertion_order() {
    let mut a = SpectraDetectorMap::new();
    a.populate(&[1, 2, 1, 3], &[10, 20, 11, 30]).unwrap();
    let mut b = SpectraDetectorMap::new();
    b.populate(&[3, 1, 2, 1], &[30, 11, 20, 10]).unwrap();
    assert_eq!(a, b);

    b.add_spectrum_entries(3, &[31]);
    assert_ne!(a, b);
}

#[test]
fn test_large_instrument_lookup() {
    // 16 detectors summed into each of 8192 spectra.
    let n_det = 131_072;
    let detectors: Vec<i32> = (0..n_det).collect();
    let spectra: Vec<i32> = detectors.iter().map(|d| d / 16 + 1).collect();

    let mut map = SpectraDetectorMap::new();
    map.populate(&spectra, &detectors).unwrap();

    assert_eq!(map.n_spectra(), 8192);
    assert_eq!(map.ndet(8192), 16);
    let found = map.get_spectra(&[0, 15, 16, n_det - 1, n_det]);
    assert_eq!(found, vec![1, 1, 2, 8192, NO_SPECTRUM]);
}

#[cfg(feature = "serde")]
#[test]
fn test_serde_preserves_pairs() {
    let mut map = SpectraDetectorMap::new();
    map.populate(&[2, 2, 7], &[5, 6, 9]).unwrap();
    let json = serde_json::to_string(&map).unwrap();
    let back: SpectraDetectorMap = serde_json::from_str(&json).unwrap();
    assert_eq!(back, map);
    assert_eq!(back.get_spectra(&[9]), vec![7]);
    assert!(!json.contains("n_elements"));
}

#[cfg(feature = "serde")]
#[test]
fn test_deserialize_recounts_pairs_and_drops_empty_spectra() {
    let json = r#"{"entries":{"1":[10],"2":[]},"n_elements":7}"#;
    let mut map: SpectraDetectorMap = serde_json::from_str(json).unwrap();

    assert_eq!(map.n_elements(), 1);
    assert_eq!(map.ndet(2), 0);
    assert!(!map.contains_spectrum(2));
    assert!(map.try_remap(1, 2).is_err());

    let mut expected = SpectraDetectorMap::new();
    expected.populate(&[1], &[10]).unwrap();
    assert_eq!(map, expected);
    assert_eq!(map.get_spectra(&[10]), vec![1]);
}
