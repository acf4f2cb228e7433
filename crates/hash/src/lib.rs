//! Disk-resident hashed slot index using open addressing.
//!
//! A fixed-capacity array of slots with linear probing: collisions walk
//! forward through the table rather than chaining externally. Point
//! lookups and inserts are O(1) expected as long as the load factor stays
//! well under 1.0; linear probing degrades sharply near full. Only exact
//! key matches are supported (no range queries, no ordered scans).
//!
//! There is no deletion: `get` stops probing at the first unoccupied
//! slot, so clearing a slot mid-chain would hide every key probed past
//! it. A future implementation that needs deletes has to do
//! backward-shift deletion or a full-table rehash; nothing partial is
//! shipped here. The only reclaim path is [`HashedIndex::clear`].

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::path::PathBuf;

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use codec::Record;
use common::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use storage::PagedFile;

fn bincode_config() -> impl Config {
    config::legacy()
}

/// Serialized width of [`HashHeader`].
const HEADER_LEN: usize = 4;

/// Header record at byte 0 of the index file.
///
/// Capacity is implicit from construction but persisted for validation
/// on reopen.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HashHeader {
    capacity: u32,
}

/// Construction parameters for [`HashedIndex`].
///
/// # Example
/// ```
/// use hash::HashConfig;
/// use std::path::PathBuf;
///
/// let config = HashConfig::builder()
///     .path(PathBuf::from("./sessions.idx"))
///     .capacity(20_011)
///     .build();
/// ```
#[derive(Clone, Debug, bon::Builder)]
pub struct HashConfig {
    /// Backing file for this index.
    pub path: PathBuf,
    /// Fixed slot count, chosen comfortably above the expected key
    /// count.
    #[builder(default = 10_007)]
    pub capacity: u32,
}

/// A persistent open-addressed hash index mapping fixed-width keys to
/// fixed-width values.
///
/// `put` overwrites in place when the key already exists; this is the
/// upsert path of the storage layer. Capacity is fixed at construction —
/// a probe sequence that wraps all slots without finding room fails with
/// [`StoreError::CapacityExceeded`].
#[derive(Debug)]
pub struct HashedIndex<K, V> {
    file: PagedFile,
    capacity: u32,
    slot_size: usize,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> HashedIndex<K, V>
where
    K: Record + Eq + Hash,
    V: Record,
{
    /// Open an index file, creating and initializing all slots if absent.
    ///
    /// Reopening an existing file validates the persisted capacity
    /// against `config.capacity`.
    pub fn open(config: HashConfig) -> StoreResult<Self> {
        if config.capacity == 0 {
            return Err(StoreError::Storage("capacity must be nonzero".into()));
        }

        let (file, created) = PagedFile::open_or_create(&config.path, HEADER_LEN)?;
        let mut index = Self {
            file,
            capacity: config.capacity,
            // occupied flag + key + value
            slot_size: 1 + K::SIZE + V::SIZE,
            _marker: PhantomData,
        };

        if created {
            index.init_slots()?;
        } else {
            let header = index.read_header()?;
            if header.capacity != config.capacity {
                return Err(StoreError::Storage(format!(
                    "index created with capacity {}, opened with {}",
                    header.capacity, config.capacity
                )));
            }
        }

        Ok(index)
    }

    /// Fixed slot count.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Insert or overwrite the value stored under `key`.
    pub fn put(&mut self, key: K, value: V) -> StoreResult<()> {
        let start = self.probe_start(&key);
        for i in 0..self.capacity {
            let slot = self.wrap(start, i);
            match self.read_slot(slot)? {
                None => return self.write_slot(slot, &key, &value),
                Some((existing, _)) if existing == key => {
                    return self.write_slot(slot, &key, &value);
                }
                Some(_) => {}
            }
        }
        Err(StoreError::CapacityExceeded {
            capacity: self.capacity,
        })
    }

    /// Look up the value stored under `key`.
    ///
    /// Probing stops at the first unoccupied slot: a key hidden behind a
    /// cleared slot could never be found again, which is why deletion is
    /// unsupported.
    pub fn get(&mut self, key: &K) -> StoreResult<Option<V>> {
        let start = self.probe_start(key);
        for i in 0..self.capacity {
            let slot = self.wrap(start, i);
            match self.read_slot(slot)? {
                None => return Ok(None),
                Some((existing, value)) if existing == *key => return Ok(Some(value)),
                Some(_) => {}
            }
        }
        Ok(None)
    }

    pub fn exists(&mut self, key: &K) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Discard every entry and reinitialize all slots as unoccupied.
    pub fn clear(&mut self) -> StoreResult<()> {
        self.file.clear()?;
        self.init_slots()
    }

    // ---- Private helpers ----

    fn probe_start(&self, key: &K) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % u64::from(self.capacity)) as u32
    }

    fn wrap(&self, start: u32, step: u32) -> u32 {
        ((u64::from(start) + u64::from(step)) % u64::from(self.capacity)) as u32
    }

    fn slot_offset(&self, slot: u32) -> u64 {
        HEADER_LEN as u64 + u64::from(slot) * self.slot_size as u64
    }

    fn read_slot(&mut self, slot: u32) -> StoreResult<Option<(K, V)>> {
        let mut buf = vec![0u8; self.slot_size];
        self.file.read_at(self.slot_offset(slot), &mut buf)?;
        if buf[0] == 0 {
            return Ok(None);
        }
        let key = K::decode(&buf[1..1 + K::SIZE]);
        let value = V::decode(&buf[1 + K::SIZE..1 + K::SIZE + V::SIZE]);
        Ok(Some((key, value)))
    }

    fn write_slot(&mut self, slot: u32, key: &K, value: &V) -> StoreResult<()> {
        let mut buf = vec![0u8; self.slot_size];
        buf[0] = 1;
        key.encode(&mut buf[1..1 + K::SIZE]);
        value.encode(&mut buf[1 + K::SIZE..1 + K::SIZE + V::SIZE]);
        self.file.write_at(self.slot_offset(slot), &buf)
    }

    /// Write the header and one zeroed region covering every slot.
    fn init_slots(&mut self) -> StoreResult<()> {
        self.write_header()?;
        let empty = vec![0u8; self.capacity as usize * self.slot_size];
        self.file.write_at(HEADER_LEN as u64, &empty)
    }

    fn read_header(&mut self) -> StoreResult<HashHeader> {
        let mut buf = [0u8; HEADER_LEN];
        self.file.read_header(&mut buf)?;
        let (header, read) = decode_from_slice(&buf, bincode_config())
            .map_err(|e| StoreError::Codec(format!("decode hash header: {e}")))?;
        debug_assert_eq!(read, HEADER_LEN);
        Ok(header)
    }

    fn write_header(&mut self) -> StoreResult<()> {
        let header = HashHeader {
            capacity: self.capacity,
        };
        let bytes = encode_to_vec(&header, bincode_config())
            .map_err(|e| StoreError::Codec(format!("encode hash header: {e}")))?;
        debug_assert_eq!(bytes.len(), HEADER_LEN);
        self.file.write_header(&bytes)
    }
}

impl<K, V> Drop for HashedIndex<K, V> {
    fn drop(&mut self) {
        let _ = self.file.sync();
    }
}
