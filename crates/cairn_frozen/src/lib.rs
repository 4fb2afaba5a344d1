//! Relocatable binary views over memory-mapped files.
//!
//! A frozen file is a little-endian byte blob whose internal references are
//! offsets relative to the location that stores them, so the blob is valid at
//! any load address and can be read straight out of a read-only mapping
//! without a parsing pass. [`FrozenBuilder`] writes such blobs from a single
//! forward-growing arena; [`FrozenView`] maps and validates them and hands out
//! bounds-checked [`Cursor`]s for typed reads.

#![warn(missing_docs)]

pub mod builder;
pub mod error;
pub mod magic;
pub mod view;

pub use builder::{FrozenBuilder, Written};
pub use error::FrozenError;
pub use magic::{magic, BASE_MAGIC, DAG_MAGIC, DIGEST_CACHE_MAGIC, SCAN_MAGIC, STATE_MAGIC};
pub use view::{Cursor, FrozenArray, FrozenFormat, FrozenRecord, FrozenView};

/// Size of an array header: `(count: u32, pointer: i32)`.
pub const ARRAY_SIZE: usize = 8;

/// Size of a string reference: `(pointer: i32, length: u32)`.
pub const STR_SIZE: usize = 8;

/// Size of a bare relative pointer.
pub const PTR_SIZE: usize = 4;
