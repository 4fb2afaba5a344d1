//! Write side: the arena builder and the publish token.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use cairn_common::Digest;
use lasso::{Key, Rodeo};

use crate::error::FrozenError;

/// Alignment of every arena allocation.
const ALIGN: usize = 8;

/// Builds one frozen blob in a single forward-growing arena.
///
/// Records are allocated zero-filled and then populated field by field with
/// the `put_*` methods, which take absolute arena offsets. Strings are
/// interned: writing the same string twice stores its bytes once and points
/// both references at the same location.
///
/// The arena is not safe for concurrent writers; callers aggregate results
/// from worker threads first and write from one thread.
pub struct FrozenBuilder {
    buf: Vec<u8>,
    strings: Rodeo,
    string_offsets: Vec<usize>,
}

impl FrozenBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            strings: Rodeo::default(),
            string_offsets: Vec::new(),
        }
    }

    /// Current arena length in bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if nothing has been allocated yet.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Allocates `size` zeroed bytes and returns their offset.
    pub fn alloc(&mut self, size: usize) -> usize {
        let start = self.buf.len().next_multiple_of(ALIGN);
        self.buf.resize(start + size, 0);
        start
    }

    /// Allocates `count` zeroed elements of `elem_size` bytes each.
    pub fn alloc_array(&mut self, count: usize, elem_size: usize) -> usize {
        self.alloc(count * elem_size)
    }

    fn write(&mut self, at: usize, bytes: &[u8]) {
        self.buf[at..at + bytes.len()].copy_from_slice(bytes);
    }

    /// Writes a `u8` at `at`.
    pub fn put_u8(&mut self, at: usize, v: u8) {
        self.write(at, &[v]);
    }

    /// Writes a little-endian `u16` at `at`.
    pub fn put_u16(&mut self, at: usize, v: u16) {
        self.write(at, &v.to_le_bytes());
    }

    /// Writes a little-endian `u32` at `at`.
    pub fn put_u32(&mut self, at: usize, v: u32) {
        self.write(at, &v.to_le_bytes());
    }

    /// Writes a little-endian `i32` at `at`.
    pub fn put_i32(&mut self, at: usize, v: i32) {
        self.write(at, &v.to_le_bytes());
    }

    /// Writes a little-endian `u64` at `at`.
    pub fn put_u64(&mut self, at: usize, v: u64) {
        self.write(at, &v.to_le_bytes());
    }

    /// Writes a digest at `at`.
    pub fn put_digest(&mut self, at: usize, d: &Digest) {
        self.write(at, d.as_bytes());
    }

    /// Writes a relative pointer at `at` referring to absolute offset `target`,
    /// or the null sentinel for `None`.
    pub fn put_ptr(&mut self, at: usize, target: Option<usize>) {
        let rel = target.map_or(0, |t| t as i64 - at as i64);
        self.put_i32(at, rel as i32);
    }

    /// Writes an array header at `at` for `count` elements starting at `first`.
    pub fn put_array(&mut self, at: usize, count: usize, first: usize) {
        self.put_u32(at, count as u32);
        self.put_ptr(at + 4, (count > 0).then_some(first));
    }

    /// Writes a string reference at `at`, interning the string bytes.
    pub fn put_str(&mut self, at: usize, s: &str) {
        let target = self.intern(s);
        self.put_ptr(at, Some(target));
        self.put_u32(at + 4, s.len() as u32);
    }

    /// Writes an optional string reference; `None` stores a null pointer.
    pub fn put_opt_str(&mut self, at: usize, s: Option<&str>) {
        match s {
            Some(s) => self.put_str(at, s),
            None => {
                self.put_ptr(at, None);
                self.put_u32(at + 4, 0);
            }
        }
    }

    fn intern(&mut self, s: &str) -> usize {
        let index = self.strings.get_or_intern(s).into_usize();
        if let Some(&offset) = self.string_offsets.get(index) {
            return offset;
        }
        let offset = self.buf.len();
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
        self.string_offsets.push(offset);
        offset
    }

    /// Allocates and fills a `u32` array, writing its header at `at`.
    pub fn put_u32_slice(&mut self, at: usize, values: &[u32]) {
        let first = self.alloc_array(values.len(), 4);
        for (i, v) in values.iter().enumerate() {
            self.put_u32(first + i * 4, *v);
        }
        self.put_array(at, values.len(), first);
    }

    /// Allocates and fills a `u64` array, writing its header at `at`.
    pub fn put_u64_slice(&mut self, at: usize, values: &[u64]) {
        let first = self.alloc_array(values.len(), 8);
        for (i, v) in values.iter().enumerate() {
            self.put_u64(first + i * 8, *v);
        }
        self.put_array(at, values.len(), first);
    }

    /// Allocates and fills a digest array, writing its header at `at`.
    pub fn put_digest_slice(&mut self, at: usize, values: &[Digest]) {
        let first = self.alloc_array(values.len(), Digest::SIZE);
        for (i, v) in values.iter().enumerate() {
            self.put_digest(first + i * Digest::SIZE, v);
        }
        self.put_array(at, values.len(), first);
    }

    /// Allocates and fills an array of string references, writing its header at `at`.
    pub fn put_str_slice<S: AsRef<str>>(&mut self, at: usize, values: &[S]) {
        let first = self.alloc_array(values.len(), crate::STR_SIZE);
        for (i, v) in values.iter().enumerate() {
            self.put_str(first + i * crate::STR_SIZE, v.as_ref());
        }
        self.put_array(at, values.len(), first);
    }

    /// Allocates `values.len()` records of `elem_size` bytes, writes the array
    /// header at `at` and calls `fill(builder, record_offset, value)` for each.
    pub fn put_records<T, F>(&mut self, at: usize, elem_size: usize, values: &[T], mut fill: F)
    where
        F: FnMut(&mut Self, usize, &T),
    {
        let first = self.alloc_array(values.len(), elem_size);
        self.put_array(at, values.len(), first);
        for (i, v) in values.iter().enumerate() {
            fill(self, first + i * elem_size, v);
        }
    }

    /// Closes the arena and returns the finished bytes, appending `trailer`
    /// as the final four bytes when given.
    pub fn into_bytes(mut self, trailer: Option<u32>) -> Vec<u8> {
        if let Some(magic) = trailer {
            let at = self.alloc(4);
            self.put_u32(at, magic);
        }
        self.buf
    }

    /// Writes the finished blob to `path` and flushes it to disk.
    ///
    /// The file at `path` should be a temporary name; the returned [`Written`]
    /// token is what allows it to be published over the live file.
    pub fn finish(self, path: &Path, trailer: Option<u32>) -> Result<Written, FrozenError> {
        let bytes = self.into_bytes(trailer);
        if bytes.len() > i32::MAX as usize {
            return Err(FrozenError::TooLarge { len: bytes.len() });
        }
        let io_err = |source| FrozenError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = File::create(path).map_err(io_err)?;
        file.write_all(&bytes).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "wrote frozen file");
        Ok(Written {
            path: path.to_path_buf(),
            len: bytes.len(),
        })
    }
}

impl Default for FrozenBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof that a frozen file was completely written and flushed.
///
/// Publishing renames the temporary file over its final name, so readers see
/// either the previous complete generation or this one, never a partial
/// write. Dropping the token without publishing leaves the live file as it
/// was.
#[must_use = "a written frozen file has no effect until it is published"]
#[derive(Debug)]
pub struct Written {
    path: PathBuf,
    len: usize,
}

impl Written {
    /// The temporary path that was written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the written file in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` for a zero-length file (never produced by [`FrozenBuilder::finish`]).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Atomically replaces `dest` with the written file.
    pub fn publish(self, dest: &Path) -> Result<(), FrozenError> {
        std::fs::rename(&self.path, dest).map_err(|source| FrozenError::Io {
            path: dest.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %dest.display(), bytes = self.len, "published frozen file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::{FrozenFormat, FrozenView};

    struct Sample;

    impl FrozenFormat for Sample {
        const NAME: &'static str = "sample";
        const MAGIC: u32 = 0x5a5a_0001;
        const HEADER_SIZE: usize = 40;
        const HAS_TRAILER: bool = true;
    }

    // root: magic u32, pad, name str, tags str[], values u32[], digests digest[]
    fn sample() -> FrozenBuilder {
        let mut b = FrozenBuilder::new();
        let root = b.alloc(Sample::HEADER_SIZE);
        b.put_u32(root, Sample::MAGIC);
        b.put_str(root + 8, "graph");
        b.put_str_slice(root + 16, &["a.c", "b.c", "a.c"]);
        b.put_u32_slice(root + 24, &[3, 1, 4, 1, 5]);
        b.put_digest_slice(root + 32, &[Digest::from_bytes(b"x")]);
        b
    }

    #[test]
    fn roundtrip_fields() {
        let bytes = sample().into_bytes(Some(Sample::MAGIC));
        let view = FrozenView::from_bytes::<Sample>(bytes).unwrap();
        let root = view.root();
        assert_eq!(root.str_at(8).unwrap(), "graph");
        let tags = root.array_at::<&str>(16).unwrap().to_vec().unwrap();
        assert_eq!(tags, vec!["a.c", "b.c", "a.c"]);
        let values = root.array_at::<u32>(24).unwrap().to_vec().unwrap();
        assert_eq!(values, vec![3, 1, 4, 1, 5]);
        let digests = root.array_at::<Digest>(32).unwrap();
        assert_eq!(digests.get(0).unwrap(), Digest::from_bytes(b"x"));
    }

    #[test]
    fn identical_strings_are_stored_once() {
        let bytes = sample().into_bytes(Some(Sample::MAGIC));
        let view = FrozenView::from_bytes::<Sample>(bytes).unwrap();
        let tags = view.root().array_at::<&str>(16).unwrap();
        let first = tags.get(0).unwrap();
        let third = tags.get(2).unwrap();
        assert_eq!(first.as_ptr(), third.as_ptr());
    }

    #[test]
    fn empty_array_has_null_pointer() {
        let mut b = FrozenBuilder::new();
        let root = b.alloc(Sample::HEADER_SIZE);
        b.put_u32(root, Sample::MAGIC);
        b.put_u32_slice(root + 24, &[]);
        let view = FrozenView::from_bytes::<Sample>(b.into_bytes(Some(Sample::MAGIC))).unwrap();
        assert!(view.root().ptr_at(28).unwrap().is_none());
        assert!(view.root().array_at::<u32>(24).unwrap().is_empty());
    }

    #[test]
    fn optional_string_none_is_null() {
        let mut b = FrozenBuilder::new();
        let root = b.alloc(Sample::HEADER_SIZE);
        b.put_u32(root, Sample::MAGIC);
        b.put_opt_str(root + 8, None);
        let view = FrozenView::from_bytes::<Sample>(b.into_bytes(Some(Sample::MAGIC))).unwrap();
        assert!(view.root().opt_str_at(8).unwrap().is_none());
    }

    #[test]
    fn allocations_are_aligned() {
        let mut b = FrozenBuilder::new();
        b.alloc(3);
        assert_eq!(b.alloc(1), 8);
        b.put_str(0, "odd");
        assert_eq!(b.alloc(4) % ALIGN, 0);
    }

    #[test]
    fn binary_search_sorted_array() {
        let mut b = FrozenBuilder::new();
        let root = b.alloc(Sample::HEADER_SIZE);
        b.put_u32(root, Sample::MAGIC);
        b.put_u32_slice(root + 24, &[2, 4, 8, 16]);
        let view = FrozenView::from_bytes::<Sample>(b.into_bytes(Some(Sample::MAGIC))).unwrap();
        let arr = view.root().array_at::<u32>(24).unwrap();
        assert_eq!(arr.binary_search_by(|v| v.cmp(&8)).unwrap(), Ok(2));
        assert_eq!(arr.binary_search_by(|v| v.cmp(&5)).unwrap(), Err(2));
    }

    #[test]
    fn finish_then_publish_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().join("out.sample.tmp");
        let dest = dir.path().join("out.sample");
        std::fs::write(&dest, b"previous generation").unwrap();

        let written = sample().finish(&tmp, Some(Sample::MAGIC)).unwrap();
        assert_eq!(written.path(), tmp.as_path());
        // the live file is untouched until publish
        assert_eq!(std::fs::read(&dest).unwrap(), b"previous generation");

        written.publish(&dest).unwrap();
        assert!(!tmp.exists());
        let view = FrozenView::load::<Sample>(&dest).unwrap();
        assert_eq!(view.root().str_at(8).unwrap(), "graph");
    }

    #[test]
    fn unpublished_write_leaves_live_file() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().join("out.tmp");
        let dest = dir.path().join("out.sample");
        sample()
            .finish(&tmp, Some(Sample::MAGIC))
            .unwrap()
            .publish(&dest)
            .unwrap();
        let before = std::fs::read(&dest).unwrap();

        let _abandoned = FrozenBuilder::new().finish(&tmp, None).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), before);
    }

    #[test]
    fn finish_into_missing_directory_fails() {
        let err = sample()
            .finish(Path::new("/nonexistent/dir/out.tmp"), None)
            .unwrap_err();
        assert!(matches!(err, FrozenError::Io { .. }));
    }
}
