//! Buffered byte-level primitives used by every encoder and decoder.
//!
//! Wire conventions:
//! ```text
//! fixed integers   little-endian, explicit width (1, 2, 4 or 8 bytes)
//! unsigned varint  LEB128, 7 bits per byte, high bit = continuation
//! signed varint    zig-zag mapped, then LEB128
//! string           [unsigned varint byte length][UTF-8 bytes]
//! ```
//! There is no alignment or padding anywhere.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::error::{Result, YardlError};

/// Default size of the internal read/write buffers.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

const MAX_VARINT64_BYTES: usize = 10;

/// Maps a signed integer onto an unsigned one so small magnitudes stay short.
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`zigzag_encode`].
pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

// ── Output ────────────────────────────────────────────────────────────────────

/// A buffered byte sink with compact integer encodings.
///
/// Nothing reaches the underlying writer until the buffer fills up or
/// [`flush`](Self::flush) is called.
pub struct CodedOutputStream<W: Write> {
    inner: W,
    buffer: Vec<u8>,
    capacity: usize,
    position: u64,
}

impl<W: Write> CodedOutputStream<W> {
    /// Wraps `inner` with a [`DEFAULT_BUFFER_SIZE`] buffer.
    pub fn new(inner: W) -> Self {
        Self::with_buffer_size(inner, DEFAULT_BUFFER_SIZE)
    }

    /// Wraps `inner` with a buffer of `buffer_size` bytes (at least 10, so a
    /// varint always fits).
    pub fn with_buffer_size(inner: W, buffer_size: usize) -> Self {
        let capacity = buffer_size.max(MAX_VARINT64_BYTES);
        Self {
            inner,
            buffer: Vec::with_capacity(capacity),
            capacity,
            position: 0,
        }
    }

    pub fn write_byte(&mut self, value: u8) -> Result<()> {
        if self.buffer.len() == self.capacity {
            self.flush_buffer()?;
        }
        self.buffer.push(value);
        self.position += 1;
        Ok(())
    }

    /// Writes a block of raw bytes of known length.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        if self.buffer.len() + data.len() > self.capacity {
            self.flush_buffer()?;
            if data.len() >= self.capacity {
                // Large blocks bypass the buffer entirely.
                self.inner.write_all(data)?;
                self.position += data.len() as u64;
                return Ok(());
            }
        }
        self.buffer.extend_from_slice(data);
        self.position += data.len() as u64;
        Ok(())
    }

    /// Writes the low `width` bytes of `value`, little-endian.
    ///
    /// # Errors
    ///
    /// [`YardlError::TypeMismatch`] if `width` is not 1..=8 or `value` does not
    /// fit in `width` bytes.
    pub fn write_fixed_uint(&mut self, value: u64, width: usize) -> Result<()> {
        if !(1..=8).contains(&width) || (width < 8 && value >> (width * 8) != 0) {
            return Err(YardlError::type_mismatch(
                format!("{width}-byte unsigned integer"),
                value,
            ));
        }
        let bytes = value.to_le_bytes();
        self.write_bytes(&bytes[..width])
    }

    pub fn write_fixed_u32(&mut self, value: u32) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_unsigned_varint(&mut self, mut value: u64) -> Result<()> {
        let mut bytes = [0u8; MAX_VARINT64_BYTES];
        let mut len = 0;
        while value > 0x7F {
            bytes[len] = (value as u8 & 0x7F) | 0x80;
            value >>= 7;
            len += 1;
        }
        bytes[len] = value as u8;
        len += 1;
        self.write_bytes(&bytes[..len])
    }

    pub fn write_signed_varint(&mut self, value: i64) -> Result<()> {
        self.write_unsigned_varint(zigzag_encode(value))
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_unsigned_varint(value.len() as u64)?;
        self.write_bytes(value.as_bytes())
    }

    /// Pushes buffered bytes to the underlying writer and flushes it.
    pub fn flush(&mut self) -> Result<()> {
        self.flush_buffer()?;
        self.inner.flush()?;
        Ok(())
    }

    /// Total number of bytes written through this stream.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Flushes and returns the underlying writer.
    pub fn into_inner(mut self) -> Result<W> {
        self.flush()?;
        Ok(self.inner)
    }

    fn flush_buffer(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            self.inner.write_all(&self.buffer)?;
            self.buffer.clear();
        }
        Ok(())
    }
}

// ── Input ─────────────────────────────────────────────────────────────────────

/// A buffered byte source that reads what [`CodedOutputStream`] writes.
///
/// Running out of input in the middle of a value yields
/// [`YardlError::TruncatedData`]; nothing ever blocks waiting for more.
pub struct CodedInputStream<R: Read> {
    inner: R,
    buffer: Box<[u8]>,
    start: usize,
    end: usize,
    at_eof: bool,
    /// Stream offset of `buffer[0]`.
    buffer_offset: u64,
}

impl<R: Read> CodedInputStream<R> {
    pub fn new(inner: R) -> Self {
        Self::with_buffer_size(inner, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(inner: R, buffer_size: usize) -> Self {
        Self {
            inner,
            buffer: vec![0u8; buffer_size.max(1)].into_boxed_slice(),
            start: 0,
            end: 0,
            at_eof: false,
            buffer_offset: 0,
        }
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        if self.start == self.end && !self.fill_buffer()? {
            return Err(self.truncated());
        }
        let value = self.buffer[self.start];
        self.start += 1;
        Ok(value)
    }

    /// Fills `out` completely.
    pub fn read_bytes(&mut self, out: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < out.len() {
            if self.start == self.end && !self.fill_buffer()? {
                return Err(self.truncated());
            }
            let n = (out.len() - filled).min(self.end - self.start);
            out[filled..filled + n].copy_from_slice(&self.buffer[self.start..self.start + n]);
            self.start += n;
            filled += n;
        }
        Ok(())
    }

    /// Reads exactly `len` bytes into a new vector, growing it as data
    /// arrives so a corrupt length cannot trigger a huge allocation.
    pub fn read_byte_vec(&mut self, len: u64) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len.min(DEFAULT_BUFFER_SIZE as u64) as usize);
        let mut remaining = len;
        while remaining > 0 {
            if self.start == self.end && !self.fill_buffer()? {
                return Err(self.truncated());
            }
            let n = remaining.min((self.end - self.start) as u64) as usize;
            out.extend_from_slice(&self.buffer[self.start..self.start + n]);
            self.start += n;
            remaining -= n as u64;
        }
        Ok(out)
    }

    /// Discards exactly `len` bytes.
    pub fn skip_bytes(&mut self, len: u64) -> Result<()> {
        let mut remaining = len;
        while remaining > 0 {
            if self.start == self.end && !self.fill_buffer()? {
                return Err(self.truncated());
            }
            let n = remaining.min((self.end - self.start) as u64) as usize;
            self.start += n;
            remaining -= n as u64;
        }
        Ok(())
    }

    /// Reads a `width`-byte little-endian unsigned integer.
    pub fn read_fixed_uint(&mut self, width: usize) -> Result<u64> {
        if !(1..=8).contains(&width) {
            return Err(YardlError::Format(format!(
                "unsupported fixed integer width {width}"
            )));
        }
        let mut bytes = [0u8; 8];
        self.read_bytes(&mut bytes[..width])?;
        Ok(u64::from_le_bytes(bytes))
    }

    pub fn read_fixed_u32(&mut self) -> Result<u32> {
        let mut bytes = [0u8; 4];
        self.read_bytes(&mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        let mut bytes = [0u8; 4];
        self.read_bytes(&mut bytes)?;
        Ok(f32::from_le_bytes(bytes))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        let mut bytes = [0u8; 8];
        self.read_bytes(&mut bytes)?;
        Ok(f64::from_le_bytes(bytes))
    }

    pub fn read_unsigned_varint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_byte()?;
            if shift == 63 && byte > 1 {
                return Err(YardlError::Format(format!(
                    "varint exceeds 64 bits at byte {}",
                    self.position()
                )));
            }
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    pub fn read_signed_varint(&mut self) -> Result<i64> {
        self.read_unsigned_varint().map(zigzag_decode)
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_unsigned_varint()?;
        let bytes = self.read_byte_vec(len)?;
        String::from_utf8(bytes)
            .map_err(|e| YardlError::Format(format!("invalid UTF-8 in string: {e}")))
    }

    /// Skips a length-prefixed string without decoding it.
    pub fn skip_string(&mut self) -> Result<()> {
        let len = self.read_unsigned_varint()?;
        self.skip_bytes(len)
    }

    /// Returns `true` once every byte of the input has been consumed.
    pub fn is_at_end(&mut self) -> Result<bool> {
        if self.start < self.end {
            return Ok(false);
        }
        Ok(!self.fill_buffer()?)
    }

    /// Fails with [`YardlError::UnfinishedStream`] if unread input remains.
    pub fn verify_finished(&mut self) -> Result<()> {
        if self.is_at_end()? {
            Ok(())
        } else {
            Err(YardlError::UnfinishedStream(format!(
                "unread data remains at byte {}",
                self.position()
            )))
        }
    }

    /// Number of bytes logically consumed so far.
    pub fn position(&self) -> u64 {
        self.buffer_offset + self.start as u64
    }

    /// Returns the underlying reader.  Bytes already buffered are lost.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Refills an exhausted buffer.  Returns `false` at end of input.
    fn fill_buffer(&mut self) -> Result<bool> {
        debug_assert_eq!(self.start, self.end);
        if self.at_eof {
            return Ok(false);
        }
        self.buffer_offset += self.end as u64;
        self.start = 0;
        self.end = 0;
        loop {
            match self.inner.read(&mut self.buffer) {
                Ok(0) => {
                    self.at_eof = true;
                    return Ok(false);
                }
                Ok(n) => {
                    self.end = n;
                    return Ok(true);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn truncated(&self) -> YardlError {
        YardlError::TruncatedData {
            position: self.position(),
        }
    }
}

impl<R: Read + Seek> CodedInputStream<R> {
    /// Moves to absolute byte `offset`, discarding buffered input.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        self.reset_at(offset);
        Ok(())
    }

    /// Moves to `back` bytes before the end of the input and returns the new
    /// absolute position.
    pub fn seek_from_end(&mut self, back: u64) -> Result<u64> {
        let back = i64::try_from(back)
            .map_err(|_| YardlError::Format(format!("seek distance {back} is too large")))?;
        let offset = self.inner.seek(SeekFrom::End(-back))?;
        self.reset_at(offset);
        Ok(offset)
    }

    fn reset_at(&mut self, offset: u64) {
        self.buffer_offset = offset;
        self.start = 0;
        self.end = 0;
        self.at_eof = false;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
