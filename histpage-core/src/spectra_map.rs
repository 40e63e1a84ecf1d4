//! Bidirectional spectrum-detector multimap.
//!
//! The relation is stored spectrum to detectors, keeping the insertion order of
//! detectors under each spectrum. Reverse lookups go through an inverted index
//! that is built on first use and dropped by every mutating operation.

use crate::{DetectorId, Error, Result, SpectrumNumber, NO_SPECTRUM};
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Many-to-many map between spectrum numbers and detector IDs.
///
/// Workspaces hold this behind an `Arc` and detach on write, so a clone is
/// only taken when a shared map is mutated.
///
/// Only the entries are serialized. Deserializing recounts the pairs and drops
/// spectra listed without detectors.
#[derive(Debug, Clone, Default)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(from = "MapEntries", into = "MapEntries")
)]
pub struct SpectraDetectorMap {
    entries: BTreeMap<SpectrumNumber, Vec<DetectorId>>,
    n_elements: usize,
    inverse: OnceLock<HashMap<DetectorId, SpectrumNumber>>,
}

/// Serialized form of [`SpectraDetectorMap`].
#[cfg(feature = "serde")]
#[derive(Serialize, Deserialize)]
struct MapEntries {
    entries: BTreeMap<SpectrumNumber, Vec<DetectorId>>,
}

#[cfg(feature = "serde")]
impl From<MapEntries> for SpectraDetectorMap {
    fn from(mut repr: MapEntries) -> Self {
        repr.entries.retain(|_, detectors| !detectors.is_empty());
        let n_elements = repr.entries.values().map(Vec::len).sum();
        Self {
            entries: repr.entries,
            n_elements,
            inverse: OnceLock::new(),
        }
    }
}

#[cfg(feature = "serde")]
impl From<SpectraDetectorMap> for MapEntries {
    fn from(map: SpectraDetectorMap) -> Self {
        Self {
            entries: map.entries,
        }
    }
}

impl SpectraDetectorMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the content with the pairs `(spectra[i], detectors[i])`.
    ///
    /// The map is cleared before the tables are checked, so a rejected call
    /// leaves it empty.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] if the tables are empty or differ in length.
    pub fn populate(&mut self, spectra: &[SpectrumNumber], detectors: &[DetectorId]) -> Result<()> {
        self.clear();
        if spectra.is_empty() {
            return Err(Error::InvalidInput(
                "populate requires at least one spectrum-detector pair".to_string(),
            ));
        }
        if spectra.len() != detectors.len() {
            return Err(Error::InvalidInput(format!(
                "spectrum table has {} entries but detector table has {}",
                spectra.len(),
                detectors.len()
            )));
        }

        for (&spectrum, &detector) in spectra.iter().zip(detectors) {
            self.entries.entry(spectrum).or_default().push(detector);
        }
        self.n_elements = spectra.len();
        log::debug!(
            "populated spectra-detector map with {} pairs over {} spectra",
            self.n_elements,
            self.entries.len()
        );
        Ok(())
    }

    /// Replaces the content with the identity mapping `d -> d` for every
    /// detector ID in `[start, end)`.
    pub fn populate_simple(&mut self, start: DetectorId, end: DetectorId) {
        self.clear();
        for id in start..end {
            self.entries.insert(id, vec![id]);
        }
        self.n_elements = self.entries.len();
    }

    /// Adds detectors under `spectrum`, after any it already has.
    pub fn add_spectrum_entries(&mut self, spectrum: SpectrumNumber, detectors: &[DetectorId]) {
        if detectors.is_empty() {
            return;
        }
        self.inverse.take();
        self.entries
            .entry(spectrum)
            .or_default()
            .extend_from_slice(detectors);
        self.n_elements += detectors.len();
    }

    /// Moves every detector of `old` onto `new` and removes `old`.
    ///
    /// `new` must already be present: this never introduces a spectrum number.
    /// When it is absent the failure is logged and the map is left unchanged.
    /// Use [`Self::try_remap`] to receive the failure as an error.
    pub fn remap(&mut self, old: SpectrumNumber, new: SpectrumNumber) {
        if let Err(err) = self.try_remap(old, new) {
            log::error!("cannot remap spectrum {old} to {new}: {err}");
        }
    }

    /// Strict variant of [`Self::remap`].
    ///
    /// # Errors
    /// Returns [`Error::MissingSpectrum`] if `new` has no detectors in the map.
    pub fn try_remap(&mut self, old: SpectrumNumber, new: SpectrumNumber) -> Result<()> {
        if old == new {
            return Ok(());
        }
        if !self.entries.contains_key(&new) {
            return Err(Error::MissingSpectrum(new));
        }
        let Some(moved) = self.entries.remove(&old) else {
            return Ok(());
        };
        self.inverse.take();
        if let Some(target) = self.entries.get_mut(&new) {
            target.extend(moved);
        }
        Ok(())
    }

    /// Removes every association.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.n_elements = 0;
        self.inverse.take();
    }

    /// Number of detectors contributing to `spectrum`; 0 if it is absent.
    #[must_use]
    pub fn ndet(&self, spectrum: SpectrumNumber) -> usize {
        self.entries.get(&spectrum).map_or(0, Vec::len)
    }

    /// Detectors contributing to `spectrum` in insertion order.
    #[must_use]
    pub fn get_detectors(&self, spectrum: SpectrumNumber) -> Vec<DetectorId> {
        self.entries.get(&spectrum).cloned().unwrap_or_default()
    }

    /// Borrowing variant of [`Self::get_detectors`].
    #[must_use]
    pub fn detectors(&self, spectrum: SpectrumNumber) -> &[DetectorId] {
        self.entries
            .get(&spectrum)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Spectrum containing each detector, aligned with the input.
    ///
    /// Detectors that are not mapped yield [`NO_SPECTRUM`]. A detector listed
    /// under more than one spectrum resolves to the lowest spectrum number.
    #[must_use]
    pub fn get_spectra<D>(&self, detectors: &D) -> Vec<SpectrumNumber>
    where
        D: AsRef<[DetectorId]> + ?Sized,
    {
        let inverse = self.inverse();
        detectors
            .as_ref()
            .iter()
            .map(|id| inverse.get(id).copied().unwrap_or(NO_SPECTRUM))
            .collect()
    }

    /// Spectrum containing a single detector.
    #[must_use]
    pub fn spectrum_for_detector(&self, detector: DetectorId) -> Option<SpectrumNumber> {
        self.inverse().get(&detector).copied()
    }

    /// Total number of (spectrum, detector) pairs.
    #[must_use]
    pub fn n_elements(&self) -> usize {
        self.n_elements
    }

    /// Number of distinct spectrum numbers.
    #[must_use]
    pub fn n_spectra(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the map holds no pairs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.n_elements == 0
    }

    /// Returns true if `spectrum` has at least one detector.
    #[must_use]
    pub fn contains_spectrum(&self, spectrum: SpectrumNumber) -> bool {
        self.entries.contains_key(&spectrum)
    }

    /// Distinct spectrum numbers in ascending order.
    pub fn spectra(&self) -> impl Iterator<Item = SpectrumNumber> + '_ {
        self.entries.keys().copied()
    }

    /// All `(spectrum, detector)` pairs, spectra ascending.
    pub fn iter(&self) -> impl Iterator<Item = (SpectrumNumber, DetectorId)> + '_ {
        self.entries
            .iter()
            .flat_map(|(&spectrum, dets)| dets.iter().map(move |&det| (spectrum, det)))
    }

    fn inverse(&self) -> &HashMap<DetectorId, SpectrumNumber> {
        self.inverse.get_or_init(|| {
            let mut inverse = HashMap::with_capacity(self.n_elements);
            // Ascending key order makes the first insert the lowest spectrum.
            for (&spectrum, dets) in &self.entries {
                for &det in dets {
                    inverse.entry(det).or_insert(spectrum);
                }
            }
            inverse
        })
    }
}

impl PartialEq for SpectraDetectorMap {
    fn eq(&self, other: &Self) -> bool {
        if self.n_elements != other.n_elements || self.entries.len() != other.entries.len() {
            return false;
        }
        self.entries
            .iter()
            .zip(&other.entries)
            .all(|((ls, ld), (rs, rd))| {
                if ls != rs || ld.len() != rd.len() {
                    return false;
                }
                let mut ld = ld.clone();
                let mut rd = rd.clone();
                ld.sort_unstable();
                rd.sort_unstable();
                ld == rd
            })
    }
}

impl Eq for SpectraDetectorMap {}

impl FromIterator<(SpectrumNumber, DetectorId)> for SpectraDetectorMap {
    fn from_iter<I: IntoIterator<Item = (SpectrumNumber, DetectorId)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (spectrum, detector) in iter {
            map.entries.entry(spectrum).or_default().push(detector);
            map.n_elements += 1;
        }
        map
    }
}
