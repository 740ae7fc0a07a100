//! Bounded stream helpers for block payloads.

use std::io::{self, Read};

/// A reader limited to one block payload within a parent stream.
///
/// Consumers may read any portion; the container layer discards what is
/// left with [`skip_remaining`](Self::skip_remaining) before moving to
/// the next block.
#[derive(Debug)]
pub struct SegmentReader<'a, R: Read + ?Sized> {
    inner: &'a mut R,
    bytes_left: usize,
}

impl<'a, R: Read + ?Sized> SegmentReader<'a, R> {
    /// Wraps `len` upcoming bytes of `inner`.
    pub fn new(inner: &'a mut R, len: usize) -> Self {
        Self {
            inner,
            bytes_left: len,
        }
    }

    /// Bytes not yet consumed from the segment.
    #[must_use]
    pub fn bytes_left(&self) -> usize {
        self.bytes_left
    }

    /// Reads and discards the unconsumed remainder of the segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent stream fails or ends early.
    pub fn skip_remaining(&mut self) -> io::Result<()> {
        let mut scratch = [0u8; 8192];
        while self.bytes_left > 0 {
            let want = self.bytes_left.min(scratch.len());
            self.inner.read_exact(&mut scratch[..want])?;
            self.bytes_left -= want;
        }
        Ok(())
    }
}

impl<R: Read + ?Sized> Read for SegmentReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.bytes_left == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(self.bytes_left);
        let n = self.inner.read(&mut buf[..want])?;
        self.bytes_left -= n;
        Ok(n)
    }
}

/// Fills `buf` completely, distinguishing a clean end of stream.
///
/// Returns `Ok(true)` when filled, `Ok(false)` when the stream ended
/// before the first byte. A partial read is an `UnexpectedEof` error.
pub(crate) fn read_exact_or_eof<R: Read + ?Sized>(r: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream ended inside a record",
            ));
        }
        filled += n;
    }
    Ok(true)
}

/// Reads and discards `n` bytes.
pub(crate) fn skip<R: Read + ?Sized>(r: &mut R, n: usize) -> io::Result<()> {
    let mut seg = SegmentReader::new(r, n);
    seg.skip_remaining()
}

/// Copies exactly `n` bytes from `r` to `w`.
pub(crate) fn copy_exact<R: Read + ?Sized, W: io::Write + ?Sized>(
    r: &mut R,
    w: &mut W,
    n: usize,
) -> io::Result<()> {
    let mut scratch = [0u8; 8192];
    let mut left = n;
    while left > 0 {
        let want = left.min(scratch.len());
        r.read_exact(&mut scratch[..want])?;
        w.write_all(&scratch[..want])?;
        left -= want;
    }
    Ok(())
}
