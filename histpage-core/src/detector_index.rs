//! Ordered collections of detector IDs for multi-detector queries.

use crate::DetectorId;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An ordered list of detector IDs.
///
/// Insertion order is preserved and duplicates are allowed, so the result of
/// a bulk lookup lines up element-for-element with the index that produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct DetectorIndex {
    ids: Vec<DetectorId>,
}

impl DetectorIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty index with room for `capacity` IDs.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: Vec::with_capacity(capacity),
        }
    }

    /// Creates an index holding every ID in `[start, end)`.
    #[must_use]
    pub fn from_range(start: DetectorId, end: DetectorId) -> Self {
        (start..end).collect()
    }

    /// Appends an ID.
    pub fn push(&mut self, id: DetectorId) {
        self.ids.push(id);
    }

    /// Returns the number of IDs, counting duplicates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if the index holds no IDs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Returns true if `id` appears anywhere in the index.
    #[must_use]
    pub fn contains(&self, id: DetectorId) -> bool {
        self.ids.contains(&id)
    }

    /// Returns an iterator over the IDs in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, DetectorId> {
        self.ids.iter()
    }

    /// Returns the IDs as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[DetectorId] {
        &self.ids
    }

    /// Returns a sorted copy with duplicates removed.
    #[must_use]
    pub fn dedup_sorted(&self) -> Self {
        let mut ids = self.ids.clone();
        ids.sort_unstable();
        ids.dedup();
        Self { ids }
    }
}

impl AsRef<[DetectorId]> for DetectorIndex {
    fn as_ref(&self) -> &[DetectorId] {
        &self.ids
    }
}

impl From<Vec<DetectorId>> for DetectorIndex {
    fn from(ids: Vec<DetectorId>) -> Self {
        Self { ids }
    }
}

impl From<DetectorIndex> for Vec<DetectorId> {
    fn from(index: DetectorIndex) -> Self {
        index.ids
    }
}

impl FromIterator<DetectorId> for DetectorIndex {
    fn from_iter<I: IntoIterator<Item = DetectorId>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

impl Extend<DetectorId> for DetectorIndex {
    fn extend<I: IntoIterator<Item = DetectorId>>(&mut self, iter: I) {
        self.ids.extend(iter);
    }
}

impl IntoIterator for DetectorIndex {
    type Item = DetectorId;
    type IntoIter = std::vec::IntoIter<DetectorId>;

    fn into_iter(self) -> Self::IntoIter {
        self.ids.into_iter()
    }
}

impl<'a> IntoIterator for &'a DetectorIndex {
    type Item = &'a DetectorId;
    type IntoIter = std::slice::Iter<'a, DetectorId>;

    fn into_iter(self) -> Self::IntoIter {
        self.ids.iter()
    }
}
