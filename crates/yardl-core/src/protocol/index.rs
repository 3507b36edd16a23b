//! Offset index for random access into a binary protocol stream.
//!
//! An indexed writer appends a trailer after the last step:
//!
//! ```text
//! [10 bytes "yardlindex"][u32 LE version = 1]
//! [map step name -> varint byte offset]
//! [map stream name -> vector of varint item offsets]
//! [map stream name -> vector of varint block start positions]
//! [u64 LE byte offset of the trailer]
//! ```
//!
//! Maps are a varint count followed by `[string][value]` pairs; vectors are a
//! varint length followed by their items.  All offsets are absolute byte
//! positions from the start of the stream, header included.

use std::collections::BTreeMap;
use std::io::{Read, Seek, Write};

use crate::error::{Result, YardlError};
use crate::protocol::coded_stream::{CodedInputStream, CodedOutputStream};

pub const INDEX_MAGIC_BYTES: [u8; 10] = *b"yardlindex";
pub const INDEX_FORMAT_VERSION: u32 = 1;

const TRAILER_LEN: u64 = 8;

/// Byte offsets of steps and stream items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Index {
    step_offsets: BTreeMap<String, u64>,
    stream_offsets: BTreeMap<String, Vec<u64>>,
    /// Item position at which each stream block starts.
    stream_blocks: BTreeMap<String, Vec<u64>>,
}

/// Where a stream item lives and how many items its block still holds,
/// counting the item itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamItemLocation {
    pub offset: u64,
    pub remaining_in_block: u64,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records where `step` starts.  The first offset recorded wins.
    pub fn set_step_offset(&mut self, step: &str, offset: u64) {
        self.step_offsets.entry(step.to_string()).or_insert(offset);
    }

    /// Records the item offsets of one stream block.
    pub fn add_stream_offsets(&mut self, step: &str, offsets: &[u64]) {
        if offsets.is_empty() {
            return;
        }
        let items = self.stream_offsets.entry(step.to_string()).or_default();
        self.stream_blocks
            .entry(step.to_string())
            .or_default()
            .push(items.len() as u64);
        items.extend_from_slice(offsets);
    }

    pub fn step_offset(&self, step: &str) -> Option<u64> {
        self.step_offsets.get(step).copied()
    }

    /// Number of items recorded for `step`.
    pub fn stream_len(&self, step: &str) -> u64 {
        self.stream_offsets.get(step).map_or(0, |o| o.len() as u64)
    }

    /// Locates item `index` of `step`.
    ///
    /// An empty stream has a single position, 0, at the step's own offset
    /// with nothing left in the block; reading from there finds the end
    /// marker.  Returns `None` when `index` is out of range.
    pub fn find_stream_item(&self, step: &str, index: u64) -> Option<StreamItemLocation> {
        let Some(offsets) = self.stream_offsets.get(step) else {
            return self
                .step_offset(step)
                .filter(|_| index == 0)
                .map(|offset| StreamItemLocation {
                    offset,
                    remaining_in_block: 0,
                });
        };

        let offset = *offsets.get(usize::try_from(index).ok()?)?;
        let block_end = self
            .stream_blocks
            .get(step)
            .and_then(|starts| starts.iter().find(|&&start| start > index))
            .copied()
            .unwrap_or(offsets.len() as u64);
        Some(StreamItemLocation {
            offset,
            remaining_in_block: block_end - index,
        })
    }
}

/// Appends the index trailer at the current position.
pub fn write_index<W: Write>(out: &mut CodedOutputStream<W>, index: &Index) -> Result<()> {
    let start = out.position();
    out.write_bytes(&INDEX_MAGIC_BYTES)?;
    out.write_fixed_u32(INDEX_FORMAT_VERSION)?;

    out.write_unsigned_varint(index.step_offsets.len() as u64)?;
    for (step, offset) in &index.step_offsets {
        out.write_string(step)?;
        out.write_unsigned_varint(*offset)?;
    }
    write_offset_lists(out, &index.stream_offsets)?;
    write_offset_lists(out, &index.stream_blocks)?;

    out.write_fixed_uint(start, TRAILER_LEN as usize)
}

fn write_offset_lists<W: Write>(
    out: &mut CodedOutputStream<W>,
    lists: &BTreeMap<String, Vec<u64>>,
) -> Result<()> {
    out.write_unsigned_varint(lists.len() as u64)?;
    for (step, values) in lists {
        out.write_string(step)?;
        out.write_unsigned_varint(values.len() as u64)?;
        for v in values {
            out.write_unsigned_varint(*v)?;
        }
    }
    Ok(())
}

/// Locates and reads the index trailer, then returns to the current position.
///
/// # Errors
///
/// [`YardlError::Format`] when the input carries no index or a damaged one,
/// [`YardlError::UnsupportedVersion`] for an unknown index version.
pub fn read_index<R: Read + Seek>(input: &mut CodedInputStream<R>) -> Result<Index> {
    let resume = input.position();
    let not_found = || YardlError::Format("binary index not found in stream".to_string());

    let trailer_at = input.seek_from_end(TRAILER_LEN).map_err(|_| not_found())?;
    let index_at = input.read_fixed_uint(TRAILER_LEN as usize)?;
    if index_at < resume || index_at >= trailer_at {
        return Err(not_found());
    }
    input.seek(index_at)?;

    let mut magic = [0u8; INDEX_MAGIC_BYTES.len()];
    input.read_bytes(&mut magic).map_err(|_| not_found())?;
    if magic != INDEX_MAGIC_BYTES {
        return Err(not_found());
    }
    let index = read_index_body(input)?;
    if input.position() != trailer_at {
        return Err(YardlError::Format(format!(
            "binary index ends at byte {} but its trailer is at byte {trailer_at}",
            input.position()
        )));
    }

    input.seek(resume)?;
    Ok(index)
}

/// Consumes an index trailer that follows the last step, then requires the
/// input to be exhausted.  Readers that do not use the index call this in
/// place of a plain end-of-input check.
pub(crate) fn verify_finished_allowing_index<R: Read>(
    input: &mut CodedInputStream<R>,
) -> Result<()> {
    if input.is_at_end()? {
        return Ok(());
    }
    let start = input.position();
    let leftover = || YardlError::UnfinishedStream(format!("unread data remains at byte {start}"));

    let mut magic = [0u8; INDEX_MAGIC_BYTES.len()];
    input.read_bytes(&mut magic).map_err(|_| leftover())?;
    if magic != INDEX_MAGIC_BYTES {
        return Err(leftover());
    }
    read_index_body(input).map_err(|_| leftover())?;
    let trailer = input
        .read_fixed_uint(TRAILER_LEN as usize)
        .map_err(|_| leftover())?;
    if trailer != start {
        return Err(leftover());
    }
    input.verify_finished()
}

/// Reads everything after the magic bytes up to, not including, the trailer.
fn read_index_body<R: Read>(input: &mut CodedInputStream<R>) -> Result<Index> {
    let version = input.read_fixed_u32()?;
    if version != INDEX_FORMAT_VERSION {
        return Err(YardlError::UnsupportedVersion(version));
    }

    let mut index = Index::new();
    let steps = input.read_unsigned_varint()?;
    for _ in 0..steps {
        let step = input.read_string()?;
        let offset = input.read_unsigned_varint()?;
        index.step_offsets.insert(step, offset);
    }
    index.stream_offsets = read_offset_lists(input)?;
    index.stream_blocks = read_offset_lists(input)?;
    Ok(index)
}

fn read_offset_lists<R: Read>(
    input: &mut CodedInputStream<R>,
) -> Result<BTreeMap<String, Vec<u64>>> {
    let count = input.read_unsigned_varint()?;
    let mut lists = BTreeMap::new();
    for _ in 0..count {
        let step = input.read_string()?;
        let len = input.read_unsigned_varint()?;
        let mut values = Vec::with_capacity(len.min(4096) as usize);
        for _ in 0..len {
            values.push(input.read_unsigned_varint()?);
        }
        lists.insert(step, values);
    }
    Ok(lists)
}
