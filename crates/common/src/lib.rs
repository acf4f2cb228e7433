
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Byte offset of a record within an index file.
/// Examples:
/// - `let root = Offset(20); // first record after a 20-byte header`
/// - `let slot = Offset(4 + 3 * 56); // fourth slot of a hashed store`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Offset(pub u64);

impl Offset {
    /// On-disk sentinel for "no record". Byte 0 of every index file holds
    /// the header, so no record can ever live at offset 0.
    pub const NONE: u64 = 0;

    /// Decode a raw on-disk offset field, mapping the sentinel to `None`.
    pub fn from_raw(raw: u64) -> Option<Offset> {
        if raw == Self::NONE { None } else { Some(Offset(raw)) }
    }

    /// Encode an optional offset into its raw on-disk representation.
    pub fn to_raw(offset: Option<Offset>) -> u64 {
        offset.map_or(Self::NONE, |o| o.0)
    }
}

/// Canonical error type shared across the storage subsystems.
///
/// Key absence is not an error: lookups report it through their return
/// value (`Option` / `bool`). I/O failures are surfaced directly, never
/// retried or masked.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Ordered-index insert collided with an existing key.
    #[error("duplicate key")]
    DuplicateKey,
    /// A hashed store's probe sequence wrapped every slot without
    /// finding room.
    #[error("hashed index full: all {capacity} slots occupied")]
    CapacityExceeded { capacity: u32 },
    #[error("codec: {0}")]
    Codec(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias that carries a `StoreError`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{Offset, StoreError, StoreResult};
}
