use std::collections::HashMap;
use std::hash::Hash;

/// Dictionary that also keeps its entries in an explicit order.
///
/// Entries live in a dense arena and are chained through `prev`/`next`
/// indices, with a hash map from key to arena slot. This gives:
///
/// - lookup / removal by key: O(1)
/// - push at the back, peek / pop at the front: O(1)
/// - sorted insertion: O(n), O(1) when the new entry sorts last
///
/// Freed slots are reused, so the arena never grows past the peak size.
#[derive(Debug, Clone)]
pub struct OrderedDict<K, V> {
    nodes: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    index: HashMap<K, usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

#[derive(Debug, Clone)]
struct Node<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

impl<K: Hash + Eq + Clone, V> Default for OrderedDict<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq + Clone, V> OrderedDict<K, V> {
    /// Create an empty dictionary.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the dictionary has no entries.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let slot = *self.index.get(key)?;
        Some(&self.node(slot).value)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let slot = *self.index.get(key)?;
        Some(&mut self.node_mut(slot).value)
    }

    /// Append an entry at the back. An existing entry with the same key is
    /// removed first and its value returned.
    pub fn push_back(&mut self, key: K, value: V) -> Option<V> {
        let old = self.remove(&key);
        let slot = self.alloc(key.clone(), value);
        self.link(slot, self.tail, None);
        self.index.insert(key, slot);
        old
    }

    /// Insert an entry keeping the order ascending by `sort_key`.
    ///
    /// The position is found by scanning from the back, and the entry is
    /// placed after every entry with an equal sort key, so appending in
    /// sorted order costs O(1).
    pub fn insert_sorted_by<S, F>(&mut self, key: K, value: V, sort_key: F) -> Option<V>
    where
        S: Ord,
        F: Fn(&V) -> S,
    {
        let old = self.remove(&key);
        let new_sort = sort_key(&value);

        let mut after = self.tail;
        while let Some(slot) = after {
            let node = self.node(slot);
            if sort_key(&node.value) <= new_sort {
                break;
            }
            after = node.prev;
        }
        let before = match after {
            Some(slot) => self.node(slot).next,
            None => self.head,
        };

        let slot = self.alloc(key.clone(), value);
        self.link(slot, after, before);
        self.index.insert(key, slot);
        old
    }

    /// The first entry, if any.
    pub fn front(&self) -> Option<(&K, &V)> {
        let node = self.node(self.head?);
        Some((&node.key, &node.value))
    }

    /// The last entry, if any.
    pub fn back(&self) -> Option<(&K, &V)> {
        let node = self.node(self.tail?);
        Some((&node.key, &node.value))
    }

    /// Remove and return the first entry.
    pub fn pop_front(&mut self) -> Option<(K, V)> {
        let slot = self.head?;
        self.unlink(slot);
        let node = self.release(slot);
        self.index.remove(&node.key);
        Some((node.key, node.value))
    }

    /// Remove the entry with the given key.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.index.remove(key)?;
        self.unlink(slot);
        Some(self.release(slot).value)
    }

    /// Remove all entries.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
    }

    /// Remove every entry, yielding them front to back.
    pub fn drain(&mut self) -> impl Iterator<Item = (K, V)> + '_ {
        std::iter::from_fn(move || self.pop_front())
    }

    /// Iterate front to back.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            dict: self,
            cursor: self.head,
        }
    }

    /// Iterate values front to back.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, v)| v)
    }

    fn alloc(&mut self, key: K, value: V) -> usize {
        let node = Node {
            key,
            value,
            prev: None,
            next: None,
        };
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, slot: usize) -> Node<K, V> {
        let node = self.nodes[slot]
            .take()
            .expect("released slot must be occupied");
        self.free.push(slot);
        node
    }

    fn node(&self, slot: usize) -> &Node<K, V> {
        self.nodes[slot]
            .as_ref()
            .expect("linked slot must be occupied")
    }

    fn node_mut(&mut self, slot: usize) -> &mut Node<K, V> {
        self.nodes[slot]
            .as_mut()
            .expect("linked slot must be occupied")
    }

    /// Splice `slot` between `prev` and `next`, which must be adjacent.
    fn link(&mut self, slot: usize, prev: Option<usize>, next: Option<usize>) {
        {
            let node = self.node_mut(slot);
            node.prev = prev;
            node.next = next;
        }
        match prev {
            Some(p) => self.node_mut(p).next = Some(slot),
            None => self.head = Some(slot),
        }
        match next {
            Some(n) => self.node_mut(n).prev = Some(slot),
            None => self.tail = Some(slot),
        }
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = {
            let node = self.node(slot);
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }
    }
}

/// Front-to-back iterator over an [`OrderedDict`].
pub struct Iter<'a, K, V> {
    dict: &'a OrderedDict<K, V>,
    cursor: Option<usize>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.cursor?;
        let node = self.dict.nodes[slot].as_ref()?;
        self.cursor = node.next;
        Some((&node.key, &node.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(d: &OrderedDict<u32, u64>) -> Vec<u32> {
        d.iter().map(|(k, _)| *k).collect()
    }

    #[test]
    fn push_back_keeps_insertion_order() {
        let mut d = OrderedDict::new();
        d.push_back(3, 30);
        d.push_back(1, 10);
        d.push_back(2, 20);

        assert_eq!(d.len(), 3);
        assert_eq!(keys(&d), vec![3, 1, 2]);
        assert_eq!(d.front(), Some((&3, &30)));
        assert_eq!(d.back(), Some((&2, &20)));
    }

    #[test]
    fn pop_front_in_order() {
        let mut d = OrderedDict::new();
        for i in 0..4u32 {
            d.push_back(i, u64::from(i) * 2);
        }

        assert_eq!(d.pop_front(), Some((0, 0)));
        assert_eq!(d.pop_front(), Some((1, 2)));
        assert_eq!(d.len(), 2);
        assert!(!d.contains_key(&1));
        assert_eq!(keys(&d), vec![2, 3]);
    }

    #[test]
    fn remove_from_middle_head_and_tail() {
        let mut d = OrderedDict::new();
        for i in 0..5u32 {
            d.push_back(i, u64::from(i));
        }

        assert_eq!(d.remove(&2), Some(2));
        assert_eq!(keys(&d), vec![0, 1, 3, 4]);
        assert_eq!(d.remove(&0), Some(0));
        assert_eq!(d.remove(&4), Some(4));
        assert_eq!(keys(&d), vec![1, 3]);
        assert_eq!(d.remove(&42), None);

        d.remove(&1);
        d.remove(&3);
        assert!(d.is_empty());
        assert_eq!(d.front(), None);
        assert_eq!(d.back(), None);
    }

    #[test]
    fn sorted_insert_orders_by_sort_key() {
        let mut d = OrderedDict::new();
        d.insert_sorted_by(1, 500, |v| *v);
        d.insert_sorted_by(2, 100, |v| *v);
        d.insert_sorted_by(3, 300, |v| *v);
        d.insert_sorted_by(4, 900, |v| *v);

        assert_eq!(keys(&d), vec![2, 3, 1, 4]);
        assert_eq!(d.front(), Some((&2, &100)));
    }

    #[test]
    fn sorted_insert_ties_go_after_existing() {
        let mut d = OrderedDict::new();
        d.insert_sorted_by(1, 100, |v| *v);
        d.insert_sorted_by(2, 100, |v| *v);
        d.insert_sorted_by(3, 50, |v| *v);

        assert_eq!(keys(&d), vec![3, 1, 2]);
    }

    #[test]
    fn reinserting_key_replaces_entry() {
        let mut d = OrderedDict::new();
        d.push_back(1, 10);
        d.push_back(2, 20);

        assert_eq!(d.push_back(1, 11), Some(10));
        assert_eq!(d.len(), 2);
        assert_eq!(keys(&d), vec![2, 1]);
        assert_eq!(d.get(&1), Some(&11));
    }

    #[test]
    fn slots_are_reused() {
        let mut d = OrderedDict::new();
        for round in 0..10u32 {
            d.push_back(round, 0);
            d.pop_front();
        }
        assert!(d.is_empty());
        assert_eq!(d.nodes.len(), 1);
    }

    #[test]
    fn get_mut_updates_value() {
        let mut d = OrderedDict::new();
        d.push_back("job", 1);
        *d.get_mut(&"job").unwrap() += 1;
        assert_eq!(d.get(&"job"), Some(&2));
    }

    #[test]
    fn drain_empties_in_order() {
        let mut d = OrderedDict::new();
        d.push_back(5, 1);
        d.push_back(6, 2);

        let drained: Vec<(u32, u64)> = d.drain().collect();
        assert_eq!(drained, vec![(5, 1), (6, 2)]);
        assert!(d.is_empty());
    }

    #[test]
    fn clear_resets() {
        let mut d = OrderedDict::new();
        d.push_back(1, 1);
        d.clear();
        assert!(d.is_empty());
        assert_eq!(d.iter().count(), 0);
        d.push_back(2, 2);
        assert_eq!(keys(&d), vec![2]);
    }
}
