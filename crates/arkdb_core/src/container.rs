//! Container entry points: map, blob, stream, create, transform.
//!
//! A container is the 8-byte header followed by the block stream. The
//! read paths establish signature trust before any payload is handed to
//! the caller; the write path refuses to serialize a poisoned database.

use crate::block::{Block, BlockIter, BlockType, BLOCK_ALIGNMENT};
use crate::db::{Adb, ContainerHeader};
use crate::error::{CoreError, CoreResult};
use crate::reader::ArenaView;
use crate::sign::{sign_blocks, verify_signature, VerifyCtx};
use crate::stream::{copy_exact, read_exact_or_eof, skip, SegmentReader};
use arkdb_trust::Trust;
use memmap2::Mmap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::ops::Range;

static ZERO_PADDING: [u8; BLOCK_ALIGNMENT] = [0; BLOCK_ALIGNMENT];

/// Reads exactly `buf` bytes, mapping both short reads and clean end of
/// stream to a malformed-container error.
fn must_read<R: Read + ?Sized>(r: &mut R, buf: &mut [u8], what: &str) -> CoreResult<()> {
    match read_exact_or_eof(r, buf) {
        Ok(true) => Ok(()),
        Ok(false) => Err(CoreError::malformed(format!("truncated {what}"))),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(CoreError::malformed(format!("truncated {what}")))
        }
        Err(e) => Err(e.into()),
    }
}

/// Walks the blocks of `range`, verifying signatures, and returns the
/// arena's position.
///
/// The first block must be the ADB block. Later non-SIG blocks are
/// tolerated and ignored; this is the mapped read path, which never
/// touches bulk data.
fn parse_blocks(
    range: &[u8],
    hdr: &ContainerHeader,
    trust: Option<&Trust>,
) -> CoreResult<Range<usize>> {
    let mut arena: Option<Range<usize>> = None;
    let mut trusted = trust.is_none();
    let mut rejected = false;
    let mut vfy = VerifyCtx::new();

    for (index, entry) in BlockIter::new(range).enumerate() {
        let entry = entry?;
        match entry.block.block_type() {
            BlockType::Adb if index == 0 => {
                let start = entry.offset + Block::HEADER_SIZE;
                arena = Some(start..start + entry.payload.len());
            }
            _ if index == 0 => {
                return Err(CoreError::malformed("first block is not ADB"));
            }
            BlockType::Sig => {
                if trusted {
                    continue;
                }
                let Some(trust) = trust else { continue };
                let Some(arena_range) = &arena else { continue };
                let arena_bytes = &range[arena_range.clone()];
                match verify_signature(trust, hdr, Some(arena_bytes), &mut vfy, entry.payload) {
                    Ok(()) => trusted = true,
                    Err(CoreError::KeyRejected) => rejected = true,
                    Err(_) => {}
                }
            }
            _ => {}
        }
    }

    if !trusted {
        return Err(if rejected {
            CoreError::KeyRejected
        } else {
            CoreError::NoKey
        });
    }
    arena.ok_or_else(|| CoreError::malformed("missing ADB block"))
}

/// Opens a block-framed byte range (no container header) and returns a
/// view of its arena.
///
/// This is the entry point for nested containers stored as blobs. With
/// a trust store, at least one SIG block in the range must verify; the
/// signed-message header is taken as all zeroes, matching how such
/// ranges are produced.
///
/// # Errors
///
/// Framing failures map to `Malformed`; an unverifiable range with
/// trust required maps to `NoKey`.
pub fn arena_of_blocks<'a>(range: &'a [u8], trust: Option<&Trust>) -> CoreResult<ArenaView<'a>> {
    let hdr = ContainerHeader::decode([0; ContainerHeader::SIZE]);
    let arena = parse_blocks(range, &hdr, trust)?;
    Ok(ArenaView::new(&range[arena]))
}

impl Adb {
    /// Memory-maps a container file read-only.
    ///
    /// Validates the header, optionally the schema tag, and — when a
    /// trust store is supplied — requires one verifying signature
    /// before the arena is exposed.
    ///
    /// # Errors
    ///
    /// `Malformed` for framing and magic failures, `SchemaMismatch`
    /// when the tag differs from `expected_schema`, `NoKey` when no
    /// signature verifies, `Io` for map failures.
    pub fn map(file: File, expected_schema: Option<u32>, trust: Option<&Trust>) -> CoreResult<Adb> {
        let len = file.metadata()?.len() as usize;
        if len < ContainerHeader::SIZE {
            return Err(CoreError::malformed("file shorter than header"));
        }
        let map = unsafe { Mmap::map(&file)? };

        let mut hdr_bytes = [0u8; ContainerHeader::SIZE];
        hdr_bytes.copy_from_slice(&map[..ContainerHeader::SIZE]);
        let hdr = ContainerHeader::decode(hdr_bytes);
        if !hdr.is_valid() {
            return Err(CoreError::malformed("bad magic"));
        }
        if let Some(expected) = expected_schema {
            if expected != hdr.schema {
                return Err(CoreError::SchemaMismatch {
                    expected,
                    actual: hdr.schema,
                });
            }
        }

        let arena = parse_blocks(&map[ContainerHeader::SIZE..], &hdr, trust)?;
        let start = ContainerHeader::SIZE + arena.start;
        let len = arena.len();
        Ok(Adb::from_mapped(hdr, map, start, len))
    }

    /// Reads a container from a sequential stream.
    ///
    /// The stream is consumed whole and owned for the duration. The
    /// first block must be ADB; every SIG block is offered to the trust
    /// store; each DATA block requires prior trust and is handed to
    /// `datacb` with its payload length and a bounded segment reader.
    /// The callback may consume any portion; the remainder is
    /// discarded.
    ///
    /// # Errors
    ///
    /// `Malformed` for framing failures and unknown block types,
    /// `SchemaMismatch` for a wrong tag, `NoKey` when data arrives (or
    /// the stream ends) without a trusted signature.
    pub fn from_stream<R, F>(
        mut is: R,
        expected_schema: Option<u32>,
        trust: Option<&Trust>,
        mut datacb: F,
    ) -> CoreResult<Adb>
    where
        R: Read,
        F: FnMut(ArenaView<'_>, usize, &mut SegmentReader<'_, R>) -> CoreResult<()>,
    {
        let mut hdr_bytes = [0u8; ContainerHeader::SIZE];
        must_read(&mut is, &mut hdr_bytes, "header")?;
        let hdr = ContainerHeader::decode(hdr_bytes);
        if !hdr.is_valid() {
            return Err(CoreError::malformed("bad magic"));
        }
        if let Some(expected) = expected_schema {
            if expected != hdr.schema {
                return Err(CoreError::SchemaMismatch {
                    expected,
                    actual: hdr.schema,
                });
            }
        }

        let mut arena: Option<Vec<u8>> = None;
        let mut trusted = trust.is_none();
        let mut rejected = false;
        let mut vfy = VerifyCtx::new();
        let mut block_no = 0usize;

        loop {
            let mut blk_bytes = [0u8; Block::HEADER_SIZE];
            match read_exact_or_eof(&mut is, &mut blk_bytes) {
                Ok(true) => {}
                Ok(false) => {
                    if !trusted {
                        return Err(if rejected {
                            CoreError::KeyRejected
                        } else {
                            CoreError::NoKey
                        });
                    }
                    let Some(arena) = arena else {
                        return Err(CoreError::malformed("missing ADB block"));
                    };
                    return Ok(Adb::from_owned(hdr, arena));
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(CoreError::malformed("truncated block header"));
                }
                Err(e) => return Err(e.into()),
            }

            let blk = Block::from_raw(u32::from_le_bytes(blk_bytes));
            if blk.raw_size() < Block::HEADER_SIZE {
                return Err(CoreError::malformed("block size below header size"));
            }
            let first = block_no == 0;
            block_no += 1;
            if first != (blk.block_type() == BlockType::Adb) {
                return Err(CoreError::malformed("ADB block must come first, once"));
            }

            let padded_payload = blk.padded_size() - Block::HEADER_SIZE;
            match blk.block_type() {
                BlockType::Adb => {
                    let mut bytes = vec![0u8; padded_payload];
                    must_read(&mut is, &mut bytes, "ADB block")?;
                    bytes.truncate(blk.payload_len());
                    arena = Some(bytes);
                }
                BlockType::Sig => {
                    let mut bytes = vec![0u8; padded_payload];
                    must_read(&mut is, &mut bytes, "SIG block")?;
                    if trusted {
                        continue;
                    }
                    let Some(trust) = trust else { continue };
                    let arena_bytes = arena.as_deref();
                    match verify_signature(
                        trust,
                        &hdr,
                        arena_bytes,
                        &mut vfy,
                        &bytes[..blk.payload_len()],
                    ) {
                        Ok(()) => trusted = true,
                        Err(CoreError::KeyRejected) => rejected = true,
                        Err(_) => {}
                    }
                }
                BlockType::Data => {
                    if !trusted {
                        return Err(CoreError::NoKey);
                    }
                    let Some(arena_bytes) = &arena else {
                        return Err(CoreError::malformed("DATA block before ADB"));
                    };
                    let mut seg = SegmentReader::new(&mut is, padded_payload);
                    datacb(ArenaView::new(arena_bytes), blk.payload_len(), &mut seg)?;
                    seg.skip_remaining()?;
                }
                BlockType::Reserved => {
                    return Err(CoreError::malformed("unknown block type"));
                }
            }
        }
    }
}

/// Writes one framed block: header, payload, zero padding.
///
/// # Errors
///
/// Propagates output failures.
pub fn write_block<W: Write>(os: &mut W, block_type: BlockType, payload: &[u8]) -> CoreResult<()> {
    let blk = Block::new(block_type, payload.len());
    os.write_all(&blk.encode())?;
    os.write_all(payload)?;
    os.write_all(&ZERO_PADDING[..blk.padding()])?;
    Ok(())
}

/// Writes a DATA block whose payload is `header` followed by `size`
/// bytes pulled from `is`.
///
/// # Errors
///
/// Propagates stream failures; a short input stream is an error.
pub fn write_data_block<W: Write, R: Read>(
    os: &mut W,
    header: &[u8],
    size: usize,
    is: &mut R,
) -> CoreResult<()> {
    let blk = Block::new(BlockType::Data, header.len() + size);
    os.write_all(&blk.encode())?;
    os.write_all(header)?;
    copy_exact(is, os, size)?;
    os.write_all(&ZERO_PADDING[..blk.padding()])?;
    Ok(())
}

/// Serializes a database: header, ADB block, and one SIG block per
/// private key in `trust`.
///
/// # Errors
///
/// Refuses a poisoned database as `Malformed`; propagates signing and
/// output failures.
pub fn write_container<W: Write>(os: &mut W, db: &Adb, trust: Option<&Trust>) -> CoreResult<()> {
    if !db.header().is_valid() {
        return Err(CoreError::malformed("database header is invalid"));
    }
    os.write_all(&db.header().encode())?;
    write_block(os, BlockType::Adb, db.arena())?;
    if let Some(trust) = trust {
        let mut vfy = VerifyCtx::new();
        let hdr = db.header();
        sign_blocks(trust, &hdr, Some(db.arena()), &mut vfy, os)?;
    }
    Ok(())
}

/// Transform context handed to the rewrite callback.
#[derive(Debug)]
pub struct Xfrm<'o, W: Write> {
    /// Output stream, shared between the driver and the callback.
    pub os: &'o mut W,
    /// Header copied from the input container.
    pub hdr: ContainerHeader,
}

/// One input block offered to the rewrite callback.
#[derive(Debug)]
pub struct XfrmBlock<'s, 'p, R: Read> {
    /// The block header.
    pub block: Block,
    /// Bounded reader over the padded payload.
    pub payload: &'s mut SegmentReader<'p, R>,
}

/// Rewrites a container block by block.
///
/// The header is copied verbatim. For each block the callback decides:
/// consume nothing and the driver copies the block through unchanged;
/// consume some or all of the payload (writing a replacement to
/// [`Xfrm::os`], or nothing to drop the block) and the driver discards
/// the unread tail. After the last block the callback is invoked once
/// more with `None` so it can append blocks.
///
/// # Errors
///
/// Framing failures map to `Malformed`; the first callback error aborts
/// the pass, leaving the output stream to its owner's cancellation
/// handling.
pub fn transform<R, W, F>(is: &mut R, os: &mut W, mut cb: F) -> CoreResult<()>
where
    R: Read,
    W: Write,
    F: FnMut(&mut Xfrm<'_, W>, Option<XfrmBlock<'_, '_, R>>) -> CoreResult<()>,
{
    let mut hdr_bytes = [0u8; ContainerHeader::SIZE];
    must_read(is, &mut hdr_bytes, "header")?;
    let hdr = ContainerHeader::decode(hdr_bytes);
    if !hdr.is_valid() {
        return Err(CoreError::malformed("bad magic"));
    }
    os.write_all(&hdr_bytes)?;

    let mut block_no = 0usize;
    loop {
        let mut blk_bytes = [0u8; Block::HEADER_SIZE];
        match read_exact_or_eof(is, &mut blk_bytes) {
            Ok(true) => {}
            Ok(false) => {
                let mut x = Xfrm { os, hdr };
                return cb(&mut x, None);
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(CoreError::malformed("truncated block header"));
            }
            Err(e) => return Err(e.into()),
        }

        let blk = Block::from_raw(u32::from_le_bytes(blk_bytes));
        if blk.raw_size() < Block::HEADER_SIZE {
            return Err(CoreError::malformed("block size below header size"));
        }
        let first = block_no == 0;
        block_no += 1;
        if first != (blk.block_type() == BlockType::Adb) {
            return Err(CoreError::malformed("ADB block must come first, once"));
        }

        let sz = blk.padded_size() - Block::HEADER_SIZE;
        let left = {
            let mut seg = SegmentReader::new(is, sz);
            let mut x = Xfrm { os, hdr };
            cb(
                &mut x,
                Some(XfrmBlock {
                    block: blk,
                    payload: &mut seg,
                }),
            )?;
            seg.bytes_left()
        };

        if left == sz {
            os.write_all(&blk.encode())?;
            copy_exact(is, os, sz)?;
        } else if left > 0 {
            skip(is, left)?;
        }
    }
}
