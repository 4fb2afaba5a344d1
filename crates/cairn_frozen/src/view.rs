//! Read side: mapping, validation and typed access.

use std::cmp::Ordering;
use std::fs::File;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use cairn_common::Digest;
use memmap2::Mmap;

use crate::error::FrozenError;

/// Static description of one frozen file kind.
pub trait FrozenFormat {
    /// Human-readable name used in log messages.
    const NAME: &'static str;
    /// Magic number stored as the first `u32` of the file.
    const MAGIC: u32;
    /// Size of the root record at offset 0, magic included.
    const HEADER_SIZE: usize;
    /// Whether the file ends with a copy of [`Self::MAGIC`].
    const HAS_TRAILER: bool;
}

enum Blob {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Blob {
    fn bytes(&self) -> &[u8] {
        match self {
            Blob::Mapped(map) => &map[..],
            Blob::Owned(bytes) => &bytes[..],
        }
    }
}

/// A validated, immutable frozen file.
///
/// The bytes are either a read-only memory mapping or an owned buffer. A view
/// is never mutated after validation, so it can be shared across threads and
/// read concurrently without synchronization.
pub struct FrozenView {
    blob: Blob,
    path: PathBuf,
}

impl FrozenView {
    /// Maps `path` read-only and validates it as format `F`.
    pub fn load<F: FrozenFormat>(path: &Path) -> Result<Self, FrozenError> {
        let io_err = |source| FrozenError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(io_err)?;
        let len = file.metadata().map_err(io_err)?.len();

        // Zero-length mappings are rejected by some platforms; an empty file
        // is reported as truncated by `validate` instead.
        let blob = if len == 0 {
            Blob::Owned(Vec::new())
        } else {
            // SAFETY: the mapping is read-only and frozen files are only ever
            // replaced by renaming a new file over them, never rewritten in
            // place, so the mapped bytes do not change underneath the view.
            Blob::Mapped(unsafe { Mmap::map(&file) }.map_err(io_err)?)
        };

        let view = Self {
            blob,
            path: path.to_path_buf(),
        };
        view.validate::<F>()?;
        tracing::debug!(path = %path.display(), format = F::NAME, bytes = len, "mapped frozen file");
        Ok(view)
    }

    /// Validates an owned buffer as format `F`.
    pub fn from_bytes<F: FrozenFormat>(bytes: Vec<u8>) -> Result<Self, FrozenError> {
        let view = Self {
            blob: Blob::Owned(bytes),
            path: PathBuf::from("<memory>"),
        };
        view.validate::<F>()?;
        Ok(view)
    }

    fn validate<F: FrozenFormat>(&self) -> Result<(), FrozenError> {
        let bytes = self.bytes();
        let mut needed = F::HEADER_SIZE.max(4);
        if bytes.len() < needed {
            return Err(self.truncated(needed));
        }
        let found = le_u32(&bytes[..4]);
        if found != F::MAGIC {
            return Err(self.bad_magic::<F>(found));
        }
        if F::HAS_TRAILER {
            needed += 4;
            if bytes.len() < needed {
                return Err(self.truncated(needed));
            }
            let found = le_u32(&bytes[bytes.len() - 4..]);
            if found != F::MAGIC {
                return Err(self.bad_magic::<F>(found));
            }
        }
        Ok(())
    }

    fn truncated(&self, needed: usize) -> FrozenError {
        FrozenError::Truncated {
            path: self.path.clone(),
            len: self.bytes().len(),
            needed,
        }
    }

    fn bad_magic<F: FrozenFormat>(&self, found: u32) -> FrozenError {
        FrozenError::BadMagic {
            path: self.path.clone(),
            expected: F::MAGIC,
            found,
        }
    }

    /// Returns the raw bytes of the file.
    pub fn bytes(&self) -> &[u8] {
        self.blob.bytes()
    }

    /// Returns the path this view was loaded from (`<memory>` for owned buffers).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns a cursor positioned at the root record.
    pub fn root(&self) -> Cursor<'_> {
        Cursor::new(self.bytes(), 0)
    }
}

fn le_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(raw)
}

/// A position inside a frozen blob.
///
/// Field reads take an offset relative to the cursor and are bounds checked
/// against the whole blob, so a corrupt pointer yields
/// [`FrozenError::OutOfBounds`] instead of a panic or a wild read.
#[derive(Clone, Copy)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// Creates a cursor at absolute position `pos` of `buf`.
    pub fn new(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    /// Absolute position of this cursor in the blob.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Returns a cursor `delta` bytes further into the blob.
    pub fn offset(&self, delta: usize) -> Cursor<'a> {
        Cursor {
            buf: self.buf,
            pos: self.pos.saturating_add(delta),
        }
    }

    fn out_of_bounds(&self, offset: usize) -> FrozenError {
        FrozenError::OutOfBounds {
            offset,
            len: self.buf.len(),
        }
    }

    /// Returns `n` bytes starting at field offset `off`.
    pub fn bytes_at(&self, off: usize, n: usize) -> Result<&'a [u8], FrozenError> {
        let start = self
            .pos
            .checked_add(off)
            .ok_or_else(|| self.out_of_bounds(usize::MAX))?;
        let end = start
            .checked_add(n)
            .ok_or_else(|| self.out_of_bounds(start))?;
        self.buf
            .get(start..end)
            .ok_or_else(|| self.out_of_bounds(start))
    }

    fn fixed<const N: usize>(&self, off: usize) -> Result<[u8; N], FrozenError> {
        let mut raw = [0u8; N];
        raw.copy_from_slice(self.bytes_at(off, N)?);
        Ok(raw)
    }

    /// Reads a `u8` field.
    pub fn u8_at(&self, off: usize) -> Result<u8, FrozenError> {
        Ok(self.fixed::<1>(off)?[0])
    }

    /// Reads a little-endian `u16` field.
    pub fn u16_at(&self, off: usize) -> Result<u16, FrozenError> {
        self.fixed(off).map(u16::from_le_bytes)
    }

    /// Reads a little-endian `u32` field.
    pub fn u32_at(&self, off: usize) -> Result<u32, FrozenError> {
        self.fixed(off).map(u32::from_le_bytes)
    }

    /// Reads a little-endian `i32` field.
    pub fn i32_at(&self, off: usize) -> Result<i32, FrozenError> {
        self.fixed(off).map(i32::from_le_bytes)
    }

    /// Reads a little-endian `u64` field.
    pub fn u64_at(&self, off: usize) -> Result<u64, FrozenError> {
        self.fixed(off).map(u64::from_le_bytes)
    }

    /// Reads a 32-byte digest field.
    pub fn digest_at(&self, off: usize) -> Result<Digest, FrozenError> {
        self.fixed(off).map(Digest::from_raw)
    }

    /// Follows the relative pointer stored at `off`.
    ///
    /// Returns `None` for the null sentinel (offset `0`).
    pub fn ptr_at(&self, off: usize) -> Result<Option<Cursor<'a>>, FrozenError> {
        let rel = self.i32_at(off)?;
        if rel == 0 {
            return Ok(None);
        }
        let slot = (self.pos + off) as i64;
        let target = slot + i64::from(rel);
        if target < 0 || target as usize >= self.buf.len() {
            return Err(self.out_of_bounds(target.max(0) as usize));
        }
        Ok(Some(Cursor::new(self.buf, target as usize)))
    }

    /// Reads the string reference stored at `off`, `None` if it is null.
    pub fn opt_str_at(&self, off: usize) -> Result<Option<&'a str>, FrozenError> {
        let Some(target) = self.ptr_at(off)? else {
            return Ok(None);
        };
        let len = self.u32_at(off + 4)? as usize;
        let bytes = target.bytes_at(0, len)?;
        std::str::from_utf8(bytes)
            .map(Some)
            .map_err(|_| FrozenError::InvalidUtf8 { offset: target.pos })
    }

    /// Reads the string reference stored at `off`; a null string reads as `""`.
    pub fn str_at(&self, off: usize) -> Result<&'a str, FrozenError> {
        Ok(self.opt_str_at(off)?.unwrap_or(""))
    }

    /// Reads the array header stored at `off`.
    ///
    /// The whole element range is bounds checked here, once.
    pub fn array_at<T: FrozenRecord<'a> + 'a>(
        &self,
        off: usize,
    ) -> Result<FrozenArray<'a, T>, FrozenError> {
        let len = self.u32_at(off)? as usize;
        if len == 0 {
            return Ok(FrozenArray::new(Cursor::new(self.buf, 0), 0));
        }
        let first = self
            .ptr_at(off + 4)?
            .ok_or_else(|| self.out_of_bounds(self.pos + off + 4))?;
        let span = len
            .checked_mul(T::SIZE)
            .ok_or_else(|| self.out_of_bounds(first.pos))?;
        first.bytes_at(0, span)?;
        Ok(FrozenArray::new(first, len))
    }
}

/// A fixed-size element that can be read out of a frozen array.
///
/// Composite records implement this as a thin view that keeps the cursor and
/// decodes fields lazily.
pub trait FrozenRecord<'a>: Sized {
    /// Stride of one element in bytes.
    const SIZE: usize;

    /// Reads the element at `at`.
    fn read(at: Cursor<'a>) -> Result<Self, FrozenError>;
}

impl<'a> FrozenRecord<'a> for u32 {
    const SIZE: usize = 4;

    fn read(at: Cursor<'a>) -> Result<Self, FrozenError> {
        at.u32_at(0)
    }
}

impl<'a> FrozenRecord<'a> for u64 {
    const SIZE: usize = 8;

    fn read(at: Cursor<'a>) -> Result<Self, FrozenError> {
        at.u64_at(0)
    }
}

impl<'a> FrozenRecord<'a> for Digest {
    const SIZE: usize = Digest::SIZE;

    fn read(at: Cursor<'a>) -> Result<Self, FrozenError> {
        at.digest_at(0)
    }
}

impl<'a> FrozenRecord<'a> for &'a str {
    const SIZE: usize = crate::STR_SIZE;

    fn read(at: Cursor<'a>) -> Result<Self, FrozenError> {
        at.str_at(0)
    }
}

/// A length-prefixed array of `T` inside a frozen blob.
pub struct FrozenArray<'a, T> {
    first: Cursor<'a>,
    len: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for FrozenArray<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for FrozenArray<'_, T> {}

impl<'a, T: FrozenRecord<'a> + 'a> FrozenArray<'a, T> {
    fn new(first: Cursor<'a>, len: usize) -> Self {
        Self {
            first,
            len,
            _marker: PhantomData,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reads element `index`.
    pub fn get(&self, index: usize) -> Result<T, FrozenError> {
        if index >= self.len {
            return Err(FrozenError::IndexOutOfRange {
                index,
                len: self.len,
            });
        }
        T::read(self.first.offset(index * T::SIZE))
    }

    /// Iterates over the elements in storage order.
    pub fn iter(&self) -> impl Iterator<Item = Result<T, FrozenError>> + 'a {
        let this = *self;
        (0..this.len).map(move |i| this.get(i))
    }

    /// Decodes every element into a `Vec`.
    pub fn to_vec(&self) -> Result<Vec<T>, FrozenError> {
        self.iter().collect()
    }

    /// Binary searches an array sorted consistently with `cmp`.
    ///
    /// The inner result follows [`slice::binary_search_by`]: `Ok(index)` on a
    /// match, `Err(insertion_point)` otherwise.
    pub fn binary_search_by<F>(&self, mut cmp: F) -> Result<Result<usize, usize>, FrozenError>
    where
        F: FnMut(&T) -> Ordering,
    {
        let (mut lo, mut hi) = (0, self.len);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match cmp(&self.get(mid)?) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Ok(Ok(mid)),
            }
        }
        Ok(Err(lo))
    }
}
