//! Database lifecycle and the deduplicating arena.
//!
//! An [`Adb`] owns one arena in one of three shapes: a read-only mmap
//! subrange, a growable buffer with dedup buckets (writable), or a
//! fixed-capacity buffer without buckets (static). Offsets handed out by
//! the write path are stable; the arena only ever grows at the end.

use crate::error::{CoreError, CoreResult};
use crate::reader::ArenaView;
use crate::value::Val;
use memmap2::Mmap;

/// Container magic: `"ADB."` read as a little-endian `u32`.
pub const FORMAT_MAGIC: u32 = 0x2e42_4441;

/// Initial allocation for a growable arena.
const INITIAL_ARENA_CAPACITY: usize = 8192;

/// Bucket count used by [`Adb::new_writable`].
const DEFAULT_NUM_BUCKETS: usize = 256;

/// The 8-byte container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    /// Format magic; zeroed when the database is poisoned.
    pub magic: u32,
    /// Application-chosen schema tag.
    pub schema: u32,
}

impl ContainerHeader {
    /// Encoded size in bytes.
    pub const SIZE: usize = 8;

    /// Creates a header for the given schema tag.
    #[must_use]
    pub const fn new(schema: u32) -> Self {
        Self {
            magic: FORMAT_MAGIC,
            schema,
        }
    }

    /// Encodes the header to its on-disk form.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..].copy_from_slice(&self.schema.to_le_bytes());
        buf
    }

    /// Decodes a header from its on-disk form without validation.
    #[must_use]
    pub fn decode(bytes: [u8; Self::SIZE]) -> Self {
        Self {
            magic: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            schema: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    /// Whether the magic matches the format.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.magic == FORMAT_MAGIC
    }
}

#[derive(Debug)]
enum ArenaBuf {
    /// Read-only subrange of a mapped file.
    Mapped { map: Mmap, start: usize, len: usize },
    /// Owned bytes: streamed arenas and all write modes.
    Owned(Vec<u8>),
}

#[derive(Debug, Clone, Copy)]
struct BucketEntry {
    hash: u32,
    len: u32,
    offs: u32,
}

#[derive(Debug)]
struct DedupTable {
    buckets: Vec<Vec<BucketEntry>>,
}

impl DedupTable {
    fn new(num_buckets: usize) -> Self {
        Self {
            buckets: vec![Vec::new(); num_buckets],
        }
    }

    fn reset(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
    }
}

/// Hash used to bucket interned payloads: seed 5381, multiply by 33,
/// xor each byte.
pub(crate) fn hash_fragments(fragments: &[&[u8]]) -> u32 {
    let mut hash: u32 = 5381;
    for fragment in fragments {
        for &byte in *fragment {
            hash = hash.wrapping_mul(33) ^ u32::from(byte);
        }
    }
    hash
}

/// One ADB database: header plus value arena.
#[derive(Debug)]
pub struct Adb {
    hdr: ContainerHeader,
    arena: ArenaBuf,
    buckets: Option<DedupTable>,
    /// Capacity cap for static databases.
    limit: Option<usize>,
}

impl Adb {
    /// Creates an empty writable database with the default dedup table.
    #[must_use]
    pub fn new_writable(schema: u32) -> Self {
        Self::with_buckets(schema, DEFAULT_NUM_BUCKETS)
    }

    /// Creates an empty writable database with `num_buckets` dedup
    /// chains. Zero buckets disables interning.
    #[must_use]
    pub fn with_buckets(schema: u32, num_buckets: usize) -> Self {
        Self {
            hdr: ContainerHeader::new(schema),
            arena: ArenaBuf::Owned(Vec::new()),
            buckets: (num_buckets > 0).then(|| DedupTable::new(num_buckets)),
            limit: None,
        }
    }

    /// Creates a static database over a fixed-capacity buffer.
    ///
    /// Static databases never grow and never intern; appends past
    /// `capacity` fail with [`CoreError::TooLarge`].
    #[must_use]
    pub fn new_static(schema: u32, capacity: usize) -> Self {
        Self {
            hdr: ContainerHeader::new(schema),
            arena: ArenaBuf::Owned(Vec::with_capacity(capacity)),
            buckets: None,
            limit: Some(capacity),
        }
    }

    pub(crate) fn from_mapped(hdr: ContainerHeader, map: Mmap, start: usize, len: usize) -> Self {
        Self {
            hdr,
            arena: ArenaBuf::Mapped { map, start, len },
            buckets: None,
            limit: None,
        }
    }

    pub(crate) fn from_owned(hdr: ContainerHeader, bytes: Vec<u8>) -> Self {
        Self {
            hdr,
            arena: ArenaBuf::Owned(bytes),
            buckets: None,
            limit: None,
        }
    }

    /// Returns the container header.
    #[must_use]
    pub fn header(&self) -> ContainerHeader {
        self.hdr
    }

    /// Returns the schema tag.
    #[must_use]
    pub fn schema(&self) -> u32 {
        self.hdr.schema
    }

    /// Current arena length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.arena {
            ArenaBuf::Mapped { len, .. } => *len,
            ArenaBuf::Owned(buf) => buf.len(),
        }
    }

    /// Whether the arena is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the arena bytes.
    #[must_use]
    pub fn arena(&self) -> &[u8] {
        match &self.arena {
            ArenaBuf::Mapped { map, start, len } => &map[*start..*start + *len],
            ArenaBuf::Owned(buf) => buf,
        }
    }

    /// Returns a copyable read view over the arena.
    #[must_use]
    pub fn view(&self) -> ArenaView<'_> {
        ArenaView::new(self.arena())
    }

    /// Discards all written data, keeping the header and bucket table.
    pub fn reset(&mut self) {
        if let ArenaBuf::Owned(buf) = &mut self.arena {
            buf.clear();
        }
        if let Some(buckets) = &mut self.buckets {
            buckets.reset();
        }
    }

    /// Marks the database unserializable after a write failure.
    pub(crate) fn poison(&mut self) {
        self.hdr.magic = 0;
    }

    /// Whether a write failure has poisoned the database.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        !self.hdr.is_valid()
    }

    fn owned_arena(&mut self) -> CoreResult<&mut Vec<u8>> {
        match &mut self.arena {
            ArenaBuf::Owned(buf) => Ok(buf),
            ArenaBuf::Mapped { .. } => Err(CoreError::not_supported(
                "write on a read-only mapped database",
            )),
        }
    }

    /// Appends `fragments` at `alignment`, growing the arena as needed.
    ///
    /// Returns the offset of the first fragment byte. No interning.
    /// Mapped databases are read-only; writing into one is an error.
    pub(crate) fn write_raw(&mut self, fragments: &[&[u8]], alignment: usize) -> CoreResult<u32> {
        debug_assert!(alignment.is_power_of_two());
        let limit = self.limit;
        let buf = self.owned_arena()?;

        let pad = buf.len().wrapping_neg() & (alignment - 1);
        let data_len: usize = fragments.iter().map(|f| f.len()).sum();
        let needed = buf.len() + pad + data_len;

        if let Some(limit) = limit {
            if needed > limit {
                return Err(CoreError::TooLarge {
                    size: needed,
                    limit,
                });
            }
        }
        if needed > buf.capacity() {
            let mut cap = buf.capacity().max(INITIAL_ARENA_CAPACITY);
            while needed > cap {
                cap *= 2;
            }
            buf.reserve_exact(cap - buf.len());
        }

        buf.resize(buf.len() + pad, 0);
        let offs = buf.len();
        for fragment in fragments {
            buf.extend_from_slice(fragment);
        }

        if offs > Val::MAX_INLINE_INT as usize {
            return Err(CoreError::TooLarge {
                size: offs,
                limit: Val::MAX_INLINE_INT as usize,
            });
        }
        Ok(offs as u32)
    }

    /// Appends `fragments` at `alignment`, reusing an existing copy when
    /// an interned payload with identical bytes and compatible alignment
    /// exists.
    pub(crate) fn write_data(&mut self, fragments: &[&[u8]], alignment: usize) -> CoreResult<u32> {
        let num_buckets = match &self.buckets {
            Some(table) => table.buckets.len(),
            None => return self.write_raw(fragments, alignment),
        };

        let hash = hash_fragments(fragments);
        let len: usize = fragments.iter().map(|f| f.len()).sum();
        let bucketno = (hash as usize) % num_buckets;

        if let Some(table) = &self.buckets {
            for entry in &table.buckets[bucketno] {
                if entry.hash != hash || entry.len as usize != len {
                    continue;
                }
                if entry.offs as usize % alignment != 0 {
                    continue;
                }
                if fragments_match(self.arena(), entry.offs as usize, fragments) {
                    return Ok(entry.offs);
                }
            }
        }

        let offs = self.write_raw(fragments, alignment)?;
        if let Some(table) = &mut self.buckets {
            table.buckets[bucketno].push(BucketEntry {
                hash,
                len: len as u32,
                offs,
            });
        }
        Ok(offs)
    }
}

fn fragments_match(arena: &[u8], mut offs: usize, fragments: &[&[u8]]) -> bool {
    for fragment in fragments {
        let end = offs + fragment.len();
        if end > arena.len() || &arena[offs..end] != *fragment {
            return false;
        }
        offs = end;
    }
    true
}
