//! Recency order of resident blocks.
//!
//! A doubly-linked list threaded through a slab of nodes, with a hash map
//! from block index to slot. Every operation is O(1); freed slots are reused.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
struct Node {
    key: usize,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Most-recently-used ordering over block indices.
#[derive(Debug, Default)]
pub struct LruOrder {
    nodes: Vec<Node>,
    free: Vec<usize>,
    slots: HashMap<usize, usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl LruOrder {
    /// Creates an empty order.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty order with room for `capacity` keys.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            free: Vec::new(),
            slots: HashMap::with_capacity(capacity),
            head: None,
            tail: None,
        }
    }

    /// Number of tracked keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if no key is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns true if `key` is tracked.
    #[must_use]
    pub fn contains(&self, key: usize) -> bool {
        self.slots.contains_key(&key)
    }

    /// Inserts `key` as most recent, or moves it there if already tracked.
    pub fn push_front(&mut self, key: usize) {
        if self.touch(key) {
            return;
        }
        let node = Node {
            key,
            prev: None,
            next: self.head,
        };
        let slot = if let Some(slot) = self.free.pop() {
            self.nodes[slot] = node;
            slot
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        };
        if let Some(head) = self.head {
            self.nodes[head].prev = Some(slot);
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
        self.slots.insert(key, slot);
    }

    /// Marks `key` as most recent. Returns false if it is not tracked.
    pub fn touch(&mut self, key: usize) -> bool {
        let Some(&slot) = self.slots.get(&key) else {
            return false;
        };
        if self.head != Some(slot) {
            self.unlink(slot);
            self.nodes[slot].prev = None;
            self.nodes[slot].next = self.head;
            if let Some(head) = self.head {
                self.nodes[head].prev = Some(slot);
            }
            self.head = Some(slot);
            if self.tail.is_none() {
                self.tail = Some(slot);
            }
        }
        true
    }

    /// The least recently used key.
    #[must_use]
    pub fn least_recent(&self) -> Option<usize> {
        self.tail.map(|slot| self.nodes[slot].key)
    }

    /// Stops tracking `key`. Returns false if it was not tracked.
    pub fn remove(&mut self, key: usize) -> bool {
        let Some(slot) = self.slots.remove(&key) else {
            return false;
        };
        self.unlink(slot);
        self.free.push(slot);
        true
    }

    /// Keys from most to least recent.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(self.head, move |&slot| self.nodes[slot].next)
            .map(move |slot| self.nodes[slot].key)
    }

    fn unlink(&mut self, slot: usize) {
        let Node { prev, next, .. } = self.nodes[slot];
        match prev {
            Some(prev) => self.nodes[prev].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.nodes[next].prev = prev,
            None => self.tail = prev,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_touch_order() {
        let mut order = LruOrder::new();
        order.push_front(1);
        order.push_front(2);
        order.push_front(3);
        assert_eq!(order.iter().collect::<Vec<_>>(), vec![3, 2, 1]);
        assert_eq!(order.least_recent(), Some(1));

        assert!(order.touch(1));
        assert_eq!(order.iter().collect::<Vec<_>>(), vec![1, 3, 2]);
        assert_eq!(order.least_recent(), Some(2));
        assert!(!order.touch(9));
    }

    #[test]
    fn test_remove_and_slot_reuse() {
        let mut order = LruOrder::with_capacity(4);
        for key in 0..4 {
            order.push_front(key);
        }
        assert!(order.remove(0));
        assert!(order.remove(2));
        assert!(!order.remove(2));
        assert_eq!(order.iter().collect::<Vec<_>>(), vec![3, 1]);

        order.push_front(7);
        order.push_front(8);
        assert_eq!(order.len(), 4);
        assert_eq!(order.nodes.len(), 4);
        assert_eq!(order.iter().collect::<Vec<_>>(), vec![8, 7, 3, 1]);
        assert_eq!(order.least_recent(), Some(1));
    }

    #[test]
    fn test_single_entry_and_empty() {
        let mut order = LruOrder::new();
        assert_eq!(order.least_recent(), None);
        order.push_front(5);
        assert!(order.touch(5));
        assert_eq!(order.least_recent(), Some(5));
        assert!(order.remove(5));
        assert!(order.is_empty());
        assert_eq!(order.iter().count(), 0);

        order.push_front(6);
        order.push_front(6);
        assert_eq!(order.len(), 1);
        assert_eq!(order.least_recent(), Some(6));
    }
}
