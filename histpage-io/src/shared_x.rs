//! Registry of X vectors shared between rows and blocks.

use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug)]
struct Entry {
    x: Arc<Vec<f64>>,
    refs: usize,
}

/// Shared X vectors addressable by a stable id.
///
/// Stores record a shared row by its id instead of its values, and reloading
/// hands back a clone of the registered `Arc`, so rows that shared bins before
/// a flush share them again afterwards, across sibling blocks too.
///
/// Each id counts the stored rows that refer to it. Stores [`Self::retain`]
/// an id per row they write and [`Self::release`] the ids of a slot they
/// overwrite; an id whose count drops to zero is freed and may be reused.
#[derive(Debug, Default)]
pub struct SharedXTable {
    entries: Vec<Option<Entry>>,
    free: Vec<usize>,
    by_ptr: HashMap<usize, usize>,
}

impl SharedXTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one reference to `x` and returns its id, registering it first if
    /// this allocation is not yet known.
    pub fn retain(&mut self, x: &Arc<Vec<f64>>) -> usize {
        if let Some(id) = self.lookup(x) {
            if let Some(entry) = self.entries[id].as_mut() {
                entry.refs += 1;
            }
            return id;
        }
        let entry = Some(Entry {
            x: Arc::clone(x),
            refs: 1,
        });
        let id = if let Some(id) = self.free.pop() {
            self.entries[id] = entry;
            id
        } else {
            self.entries.push(entry);
            self.entries.len() - 1
        };
        self.by_ptr.insert(Self::key(x), id);
        id
    }

    /// Drops one reference to `id`, freeing the entry at zero.
    ///
    /// Unknown ids are ignored.
    pub fn release(&mut self, id: usize) {
        let Some(slot) = self.entries.get_mut(id) else {
            return;
        };
        let Some(entry) = slot.as_mut() else {
            return;
        };
        entry.refs -= 1;
        if entry.refs == 0 {
            if let Some(entry) = slot.take() {
                self.by_ptr.remove(&Self::key(&entry.x));
            }
            self.free.push(id);
        }
    }

    /// Id of `x` if this exact allocation is registered.
    #[must_use]
    pub fn lookup(&self, x: &Arc<Vec<f64>>) -> Option<usize> {
        self.by_ptr.get(&Self::key(x)).copied()
    }

    /// The vector registered under `id`.
    #[must_use]
    pub fn get(&self, id: usize) -> Option<&Arc<Vec<f64>>> {
        self.entries.get(id)?.as_ref().map(|entry| &entry.x)
    }

    /// Number of stored rows referring to `id`.
    #[must_use]
    pub fn refs(&self, id: usize) -> usize {
        self.entries
            .get(id)
            .and_then(Option::as_ref)
            .map_or(0, |entry| entry.refs)
    }

    /// Number of registered vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_ptr.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_ptr.is_empty()
    }

    // A registered Arc is kept alive by its entry, so the address stays unique
    // until the entry is freed.
    fn key(x: &Arc<Vec<f64>>) -> usize {
        Arc::as_ptr(x) as usize
    }
}
