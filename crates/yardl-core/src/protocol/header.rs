//! Binary header codec and schema matching.
//!
//! Wire format:
//! ```text
//! [magic "yardl":5][version:4 little-endian][varint schema length][schema UTF-8]
//! ```
//! The header codec only extracts the schema text; resolving it against the
//! schemas a reader knows is the separate [`match_schema`] step.

use std::io::{Read, Write};

use tracing::debug;

use crate::error::{Result, YardlError};
use crate::protocol::coded_stream::{CodedInputStream, CodedOutputStream};

/// The fixed marker every binary yardl stream starts with.
pub const MAGIC_BYTES: [u8; 5] = *b"yardl";

/// The only binary format version this runtime reads or writes.
pub const BINARY_FORMAT_VERSION: u32 = 1;

/// Writes magic, version and schema, in that order.
pub fn write_header<W: Write>(out: &mut CodedOutputStream<W>, schema: &str) -> Result<()> {
    out.write_bytes(&MAGIC_BYTES)?;
    out.write_fixed_u32(BINARY_FORMAT_VERSION)?;
    out.write_string(schema)?;
    debug!(schema_len = schema.len(), "wrote binary header");
    Ok(())
}

/// Reads and validates magic and version, returning the raw schema text.
///
/// # Errors
///
/// - [`YardlError::Format`] if the first five bytes are not `"yardl"`.
/// - [`YardlError::UnsupportedVersion`] if the version is not
///   [`BINARY_FORMAT_VERSION`].
/// - [`YardlError::TruncatedData`] if the input ends inside the header.
///
/// # Examples
///
/// ```rust
/// use yardl_core::protocol::coded_stream::{CodedInputStream, CodedOutputStream};
/// use yardl_core::protocol::header::{read_header, write_header};
///
/// let mut out = CodedOutputStream::new(Vec::new());
/// write_header(&mut out, "{}").unwrap();
/// let bytes = out.into_inner().unwrap();
///
/// let mut input = CodedInputStream::new(bytes.as_slice());
/// assert_eq!(read_header(&mut input).unwrap(), "{}");
/// ```
pub fn read_header<R: Read>(input: &mut CodedInputStream<R>) -> Result<String> {
    let mut magic = [0u8; MAGIC_BYTES.len()];
    input.read_bytes(&mut magic)?;
    if magic != MAGIC_BYTES {
        return Err(YardlError::Format(
            "data does not start with the yardl magic bytes".to_string(),
        ));
    }

    let version = input.read_fixed_u32()?;
    if version != BINARY_FORMAT_VERSION {
        return Err(YardlError::UnsupportedVersion(version));
    }

    let schema = input.read_string()?;
    debug!(schema_len = schema.len(), "read binary header");
    Ok(schema)
}

/// Which known schema the data was written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaMatch {
    /// The current schema; values decode natively.
    Current,
    /// `previous_schemas[i]`; values decode through that revision's adapters.
    Previous(usize),
}

impl SchemaMatch {
    /// `-1` for the current schema, otherwise the previous-schema position.
    pub fn as_index(self) -> i32 {
        match self {
            SchemaMatch::Current => -1,
            SchemaMatch::Previous(i) => i32::try_from(i).unwrap_or(i32::MAX),
        }
    }
}

/// Resolves `actual` by exact string equality.
///
/// `current` wins over `previous`; among previous schemas the first match
/// wins.  Formatting differences are never ignored.
pub fn match_schema(
    protocol: &str,
    actual: &str,
    current: &str,
    previous: &[String],
) -> Result<SchemaMatch> {
    if actual == current {
        return Ok(SchemaMatch::Current);
    }
    previous
        .iter()
        .position(|p| p == actual)
        .map(SchemaMatch::Previous)
        .ok_or_else(|| YardlError::SchemaMismatch {
            protocol: protocol.to_string(),
        })
}
