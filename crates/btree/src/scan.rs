//! Ordered full scans over the leaf chain.

use codec::Record;
use common::{Offset, StoreResult};

use crate::BPlusTree;

/// Lazy iterator over every `(key, value)` entry in ascending key order.
///
/// Produced by [`BPlusTree::scan`]. One leaf is read and buffered at a
/// time, then the chain's `next` pointer is followed. The sequence is
/// finite and restartable (call `scan()` again); it is not a live view of
/// the tree. After yielding an I/O error the iterator is fused.
pub struct Scan<'a, K, V>
where
    K: Record + Ord + Clone,
    V: Record + Clone,
{
    tree: &'a mut BPlusTree<K, V>,
    buffered: std::vec::IntoIter<(K, V)>,
    next_leaf: Option<Offset>,
    done: bool,
}

impl<'a, K, V> Scan<'a, K, V>
where
    K: Record + Ord + Clone,
    V: Record + Clone,
{
    pub(crate) fn new(tree: &'a mut BPlusTree<K, V>, leftmost: Option<Offset>) -> Self {
        Self {
            tree,
            buffered: Vec::new().into_iter(),
            next_leaf: leftmost,
            done: false,
        }
    }
}

impl<K, V> Iterator for Scan<'_, K, V>
where
    K: Record + Ord + Clone,
    V: Record + Clone,
{
    type Item = StoreResult<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if let Some(entry) = self.buffered.next() {
                return Some(Ok(entry));
            }
            let Some(offset) = self.next_leaf else {
                self.done = true;
                return None;
            };
            match self.tree.read_node(offset) {
                Ok(leaf) => {
                    debug_assert!(leaf.is_leaf);
                    self.next_leaf = leaf.next;
                    self.buffered = leaf
                        .keys
                        .into_iter()
                        .zip(leaf.values)
                        .collect::<Vec<_>>()
                        .into_iter();
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
