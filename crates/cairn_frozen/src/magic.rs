//! Magic numbers framing every frozen file kind.
//!
//! Each format's constant is the shared [`BASE_MAGIC`] combined with a
//! per-format salt. Bumping a salt is how a schema change is versioned: old
//! files then fail validation instead of being misread.

/// Base constant shared by every frozen format.
pub const BASE_MAGIC: u32 = 0x7a1e_c0de;

/// Derives a format magic number from its salt.
pub const fn magic(salt: u32) -> u32 {
    BASE_MAGIC ^ salt
}

/// Build graph (`.dag`) files.
pub const DAG_MAGIC: u32 = magic(0x2b8e_0003);

/// Built-node state (`.state`) files.
pub const STATE_MAGIC: u32 = magic(0x1589_0002);

/// Include-scan cache (`.scancache`) files.
pub const SCAN_MAGIC: u32 = magic(0x1517_000f);

/// Content-digest cache (`.digestcache`) files.
pub const DIGEST_CACHE_MAGIC: u32 = magic(0x1779_0004);
