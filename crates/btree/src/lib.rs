//! Disk-resident ordered B+Tree index.
//!
//! Fixed-capacity nodes stored as uniform fixed-size records, with leaves
//! chained in ascending key order for full scans. Splitting is top-down
//! and preemptive: a full child is split before the insert descends into
//! it, so the recursive insert never lands on a full node and no
//! post-insert rebalancing pass exists. There is no deletion and no node
//! merging; the only reclaim path is [`BPlusTree::clear`].

mod node;
mod scan;

pub use scan::Scan;

use std::marker::PhantomData;
use std::path::PathBuf;

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use codec::Record;
use common::{Offset, StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use storage::PagedFile;

use node::{record_size, Node};

fn bincode_config() -> impl Config {
    config::legacy()
}

/// Serialized width of [`TreeHeader`]: root + next_free + order.
const HEADER_LEN: usize = 8 + 8 + 4;

/// Header record at byte 0 of the index file.
///
/// Rewritten after every structural change (root move, node allocation)
/// and synced at shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TreeHeader {
    /// Offset of the root node, 0 while the tree is empty.
    root: u64,
    /// Bump-allocator cursor: offset of the next record to hand out.
    next_free: u64,
    /// Order the file was created with, persisted for validation.
    order: u32,
}

/// Construction parameters for [`BPlusTree`].
///
/// # Example
/// ```
/// use btree::TreeConfig;
/// use std::path::PathBuf;
///
/// let config = TreeConfig::builder()
///     .path(PathBuf::from("./users.idx"))
///     .order(64)
///     .build();
/// ```
#[derive(Clone, Debug, bon::Builder)]
pub struct TreeConfig {
    /// Backing file for this index.
    pub path: PathBuf,
    /// Maximum keys per node before it must split. Even, at least 4.
    #[builder(default = 32)]
    pub order: usize,
}

/// A persistent B+Tree index mapping fixed-width keys to fixed-width
/// values.
///
/// Keys are opaque to the tree beyond their ordering. Leaves persist both
/// key and value; the separator copied into a parent during a leaf split
/// also remains as leaf data, which is what makes the leaf chain
/// self-sufficient for ordered scans.
///
/// Duplicate keys are rejected: inserting a key that is already present
/// returns [`StoreError::DuplicateKey`] and stores nothing. The hashed
/// index is the overwrite path for mutable records.
///
/// The instance exclusively owns its file handle. The header is kept
/// current on disk after every structural change and the file is synced
/// when the tree is dropped.
#[derive(Debug)]
pub struct BPlusTree<K, V> {
    file: PagedFile,
    root: Option<Offset>,
    order: usize,
    record_size: usize,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> BPlusTree<K, V>
where
    K: Record + Ord + Clone,
    V: Record + Clone,
{
    /// Open an index file, creating and header-initializing it if absent.
    ///
    /// Reopening an existing file validates the persisted order against
    /// `config.order` and restores the root and allocation cursor.
    pub fn open(config: TreeConfig) -> StoreResult<Self> {
        if config.order < 4 || config.order % 2 != 0 {
            return Err(StoreError::Storage(format!(
                "order must be even and at least 4, got {}",
                config.order
            )));
        }

        let (file, created) = PagedFile::open_or_create(&config.path, HEADER_LEN)?;
        let mut tree = Self {
            file,
            root: None,
            order: config.order,
            record_size: record_size::<K, V>(config.order),
            _marker: PhantomData,
        };

        if created {
            tree.write_header()?;
        } else {
            let header = tree.read_header()?;
            if header.order as usize != config.order {
                return Err(StoreError::Storage(format!(
                    "index created with order {}, opened with {}",
                    header.order, config.order
                )));
            }
            tree.root = Offset::from_raw(header.root);
            tree.file.restore_next_free(header.next_free);
        }

        Ok(tree)
    }

    /// Maximum keys per node.
    pub fn order(&self) -> usize {
        self.order
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Insert a key-value pair.
    ///
    /// Returns [`StoreError::DuplicateKey`] if the key is already
    /// present; the stored mapping is unchanged in that case.
    pub fn insert(&mut self, key: K, value: V) -> StoreResult<()> {
        let Some(root) = self.root else {
            let mut leaf = Node::new_leaf();
            leaf.keys.push(key);
            leaf.values.push(value);
            let offset = self.allocate_node();
            self.write_node(offset, &leaf)?;
            self.root = Some(offset);
            self.write_header()?;
            return Ok(());
        };

        let mut current = root;
        if self.read_node(root)?.size() == self.order {
            // Grow the tree by one level: a fresh empty root adopts the
            // old root as its sole child, then the old root is split.
            let new_root = self.allocate_node();
            let promoted = Node {
                is_leaf: false,
                keys: Vec::new(),
                values: Vec::new(),
                children: vec![root],
                next: None,
            };
            self.write_node(new_root, &promoted)?;
            self.root = Some(new_root);
            self.write_header()?;
            self.split_child(new_root, 0)?;
            current = new_root;
        }

        self.insert_non_full(current, key, value)
    }

    /// Look up the value stored under `key`.
    pub fn find(&mut self, key: &K) -> StoreResult<Option<V>> {
        let Some(root) = self.root else {
            return Ok(None);
        };

        let mut current = root;
        loop {
            let node = self.read_node(current)?;
            if node.is_leaf {
                return Ok(match node.keys.binary_search(key) {
                    Ok(idx) => Some(node.values[idx].clone()),
                    Err(_) => None,
                });
            }
            let idx = node.keys.partition_point(|k| k <= key);
            current = node.children[idx];
        }
    }

    /// Ordered scan over every entry, ascending by key.
    ///
    /// Descends to the leftmost leaf, then follows the leaf chain. The
    /// returned iterator is lazy (one leaf in memory at a time), finite,
    /// and restartable by calling `scan()` again; it is not a live view.
    pub fn scan(&mut self) -> StoreResult<Scan<'_, K, V>> {
        let mut next_leaf = self.root;
        while let Some(offset) = next_leaf {
            let node = self.read_node(offset)?;
            if node.is_leaf {
                break;
            }
            next_leaf = Some(node.children[0]);
        }
        Ok(Scan::new(self, next_leaf))
    }

    /// Discard every entry and reinitialize the backing file.
    pub fn clear(&mut self) -> StoreResult<()> {
        self.file.clear()?;
        self.root = None;
        self.write_header()
    }

    // ---- Private helpers ----

    /// Recursive insert into a node known not to be full.
    fn insert_non_full(&mut self, offset: Offset, key: K, value: V) -> StoreResult<()> {
        let mut node = self.read_node(offset)?;

        if node.is_leaf {
            return match node.keys.binary_search(&key) {
                Ok(_) => Err(StoreError::DuplicateKey),
                Err(idx) => {
                    node.keys.insert(idx, key);
                    node.values.insert(idx, value);
                    self.write_node(offset, &node)
                }
            };
        }

        // children[i] holds keys < keys[i] <= children[i + 1].
        let mut idx = node.keys.partition_point(|k| *k <= key);
        let child = self.read_node(node.children[idx])?;
        if child.size() == self.order {
            self.split_child(offset, idx)?;
            node = self.read_node(offset)?;
            if key >= node.keys[idx] {
                idx += 1;
            }
        }
        self.insert_non_full(node.children[idx], key, value)
    }

    /// Split the full child at `parent.children[idx]`, lifting a
    /// separator into the parent.
    ///
    /// Leaf split: the right half keeps the old leaf's `next` pointer and
    /// its first key is copied (not removed) into the parent. Internal
    /// split: the median key moves up and the right half's children move
    /// with it.
    fn split_child(&mut self, parent_offset: Offset, idx: usize) -> StoreResult<()> {
        let mut parent = self.read_node(parent_offset)?;
        let child_offset = parent.children[idx];
        let mut child = self.read_node(child_offset)?;
        debug_assert_eq!(child.size(), self.order);
        debug_assert!(parent.size() < self.order);

        let mid = self.order / 2;
        let new_offset = self.allocate_node();

        let (separator, right) = if child.is_leaf {
            let right_keys = child.keys.split_off(mid);
            let right_values = child.values.split_off(mid);
            let separator = right_keys[0].clone();
            let right = Node {
                is_leaf: true,
                keys: right_keys,
                values: right_values,
                children: Vec::new(),
                next: child.next,
            };
            child.next = Some(new_offset);
            (separator, right)
        } else {
            let mut right_keys = child.keys.split_off(mid);
            let separator = right_keys.remove(0);
            let right_children = child.children.split_off(mid + 1);
            let right = Node {
                is_leaf: false,
                keys: right_keys,
                values: Vec::new(),
                children: right_children,
                next: None,
            };
            (separator, right)
        };

        parent.keys.insert(idx, separator);
        parent.children.insert(idx + 1, new_offset);

        self.write_node(child_offset, &child)?;
        self.write_node(new_offset, &right)?;
        self.write_node(parent_offset, &parent)?;
        // The allocation moved the cursor; keep the header current.
        self.write_header()
    }

    fn allocate_node(&mut self) -> Offset {
        self.file.allocate(self.record_size)
    }

    pub(crate) fn read_node(&mut self, offset: Offset) -> StoreResult<Node<K, V>> {
        let mut buf = vec![0u8; self.record_size];
        self.file.read_at(offset.0, &mut buf)?;
        Ok(Node::decode(self.order, &buf))
    }

    fn write_node(&mut self, offset: Offset, node: &Node<K, V>) -> StoreResult<()> {
        let mut buf = vec![0u8; self.record_size];
        node.encode(self.order, &mut buf);
        self.file.write_at(offset.0, &buf)
    }

    fn read_header(&mut self) -> StoreResult<TreeHeader> {
        let mut buf = [0u8; HEADER_LEN];
        self.file.read_header(&mut buf)?;
        let (header, read) = decode_from_slice(&buf, bincode_config())
            .map_err(|e| StoreError::Codec(format!("decode tree header: {e}")))?;
        debug_assert_eq!(read, HEADER_LEN);
        Ok(header)
    }

    fn write_header(&mut self) -> StoreResult<()> {
        let header = TreeHeader {
            root: Offset::to_raw(self.root),
            next_free: self.file.next_free(),
            order: self.order as u32,
        };
        let bytes = encode_to_vec(&header, bincode_config())
            .map_err(|e| StoreError::Codec(format!("encode tree header: {e}")))?;
        debug_assert_eq!(bytes.len(), HEADER_LEN);
        self.file.write_header(&bytes)
    }
}

impl<K, V> Drop for BPlusTree<K, V> {
    fn drop(&mut self) {
        // Header is already current; make the file durable on the way out.
        let _ = self.file.sync();
    }
}

#[cfg(test)]
mod tests;
