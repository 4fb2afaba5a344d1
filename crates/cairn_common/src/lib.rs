//! Shared foundational types used across the Cairn build core.
//!
//! This crate provides the identity/content [`Digest`], the cheap 32-bit
//! path hash used to pre-filter file lists, and file timestamp helpers.

#![warn(missing_docs)]

pub mod hash;
pub mod path;
pub mod time;

pub use hash::{Digest, DigestBuilder};
pub use path::{extension_hash, path_hash, FileAndHash};
pub use time::{file_timestamp, unix_now_secs, SECS_PER_DAY};
