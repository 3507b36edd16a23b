//! Table-driven protocol reader.
//!
//! Construction reads the header and resolves the wire schema against the
//! definition's current and previous schemas.  Data written under a previous
//! schema is decoded with that schema's wire types and passed through the
//! coercion plan built at that moment, so callers always see values in the
//! current shape.

use std::io::Read;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::coercion::{plan_protocol, StepAdapter};
use crate::error::{Result, YardlError};
use crate::protocol::coded_stream::{CodedInputStream, DEFAULT_BUFFER_SIZE};
use crate::protocol::header::{match_schema, read_header, SchemaMatch};
use crate::protocol::index::verify_finished_allowing_index;
use crate::protocol::state::{Completion, ProtocolCursor};
use crate::schema::serializers::{read_value, skip_value};
use crate::schema::types::{ProtocolDefinition, StepDef, StepKind};
use crate::schema::value::Value;

const VALUE_STEPS: &[StepKind] = &[StepKind::Scalar, StepKind::Optional, StepKind::Union];
const STREAM_STEPS: &[StepKind] = &[StepKind::Stream];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderOptions {
    pub completion: Completion,
    pub buffer_size: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            completion: Completion::Strict,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Reads one protocol instance from `R`.
pub struct ProtocolReader<R: Read> {
    input: Option<CodedInputStream<R>>,
    protocol: String,
    steps: Vec<StepDef>,
    schema_match: SchemaMatch,
    /// One adapter per step when the data uses a previous schema.
    adapters: Option<Vec<StepAdapter>>,
    cursor: ProtocolCursor,
    completion: Completion,
    /// Items left in the current stream block.
    block_remaining: u64,
}

impl<R: Read> ProtocolReader<R> {
    /// Reads the header from `source` and prepares to read `definition`.
    ///
    /// # Errors
    ///
    /// Header errors from [`read_header`], [`YardlError::SchemaMismatch`] for
    /// an unknown schema, and [`YardlError::UnsupportedCoercion`] when a
    /// previous schema cannot be adapted to the current one.
    pub fn new(source: R, definition: &ProtocolDefinition, options: ReaderOptions) -> Result<Self> {
        let mut input = CodedInputStream::with_buffer_size(source, options.buffer_size);
        let (schema_match, adapters) = open_protocol(&mut input, definition)?;
        debug!(
            protocol = definition.name(),
            schema_index = schema_match.as_index(),
            "opened protocol reader"
        );

        Ok(Self {
            input: Some(input),
            protocol: definition.name().to_string(),
            steps: definition.steps().to_vec(),
            schema_match,
            adapters,
            cursor: ProtocolCursor::new(),
            completion: options.completion,
            block_remaining: 0,
        })
    }

    /// `-1` for the current schema, `i` for `previous_schemas[i]`.
    pub fn schema_index(&self) -> i32 {
        self.schema_match.as_index()
    }

    pub fn schema_match(&self) -> SchemaMatch {
        self.schema_match
    }

    /// The current definition's steps, in order.
    pub fn steps(&self) -> &[StepDef] {
        &self.steps
    }

    /// Reads a scalar, optional or union step and advances.
    pub fn read(&mut self, step: &str) -> Result<Value> {
        let index = self.cursor.expect(&self.steps, step, VALUE_STEPS, "read")?;
        let value = self.read_item(index)?;
        self.cursor.advance();
        Ok(value)
    }

    /// Returns the next stream item, or `None` (and advances) at the end.
    pub fn read_stream(&mut self, step: &str) -> Result<Option<Value>> {
        let index = self.cursor.expect(&self.steps, step, STREAM_STEPS, "read")?;
        if !self.next_item_available(index)? {
            self.finish_stream(index);
            return Ok(None);
        }
        self.block_remaining -= 1;
        self.read_item(index).map(Some)
    }

    /// Reads up to `max` items (at least one), spanning blocks.
    ///
    /// The flag is `true` when the end marker was reached during this call,
    /// in which case the cursor has already moved to the next step and the
    /// returned items are the last of the stream.
    pub fn read_stream_batch(&mut self, step: &str, max: usize) -> Result<(Vec<Value>, bool)> {
        let index = self.cursor.expect(&self.steps, step, STREAM_STEPS, "read")?;
        let max = max.max(1);
        let mut items = Vec::with_capacity(max.min(4096));

        while items.len() < max {
            if !self.next_item_available(index)? {
                self.finish_stream(index);
                return Ok((items, true));
            }
            self.block_remaining -= 1;
            items.push(self.read_item(index)?);
        }
        Ok((items, false))
    }

    /// Skips up to `limit` items (all remaining when `None`) without
    /// decoding them.  Returns the number skipped and whether the end of
    /// the stream was reached, in which case the cursor has advanced.
    pub fn skip_stream(&mut self, step: &str, limit: Option<u64>) -> Result<(u64, bool)> {
        let index = self.cursor.expect(&self.steps, step, STREAM_STEPS, "skip")?;
        let mut skipped = 0;

        while limit.map_or(true, |l| skipped < l) {
            if !self.next_item_available(index)? {
                self.finish_stream(index);
                return Ok((skipped, true));
            }
            self.block_remaining -= 1;
            self.skip_item(index)?;
            skipped += 1;
        }
        Ok((skipped, false))
    }

    /// Finishes the session.
    ///
    /// Strict readers require every step to be consumed and the input to be
    /// exhausted.  Permissive readers first skip whatever is left.
    ///
    /// # Errors
    ///
    /// [`YardlError::UnfinishedStream`] on an incomplete strict reader or
    /// trailing bytes; [`YardlError::ProtocolState`] on a second call.
    pub fn close(&mut self) -> Result<()> {
        self.cursor.close()?;

        if !self.cursor.is_complete(&self.steps) {
            if self.completion == Completion::Strict {
                return Err(YardlError::UnfinishedStream(format!(
                    "protocol '{}' reader closed early: {}",
                    self.protocol,
                    self.cursor.describe(&self.steps)
                )));
            }
            warn!(
                protocol = %self.protocol,
                step = self.cursor.index(),
                "discarding unread protocol data"
            );
            self.discard_remaining()?;
        }

        verify_finished_allowing_index(self.input.as_mut().ok_or_else(detached)?)?;
        debug!(protocol = %self.protocol, position = self.position(), "closed protocol reader");
        Ok(())
    }

    /// `true` once every step has been read.
    pub fn is_complete(&self) -> bool {
        self.cursor.is_complete(&self.steps)
    }

    /// Bytes consumed so far, header included.
    pub fn position(&self) -> u64 {
        self.input.as_ref().map_or(0, CodedInputStream::position)
    }

    /// Returns the source without closing.  Buffered bytes are lost.
    pub fn into_inner(mut self) -> Result<R> {
        let input = self.input.take().ok_or_else(detached)?;
        Ok(input.into_inner())
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn read_item(&mut self, index: usize) -> Result<Value> {
        let input = self.input.as_mut().ok_or_else(detached)?;
        let adapter = self.adapters.as_ref().map(|adapters| &adapters[index]);
        read_step_value(input, &self.steps[index], adapter)
    }

    fn skip_item(&mut self, index: usize) -> Result<()> {
        let input = self.input.as_mut().ok_or_else(detached)?;
        let wire_type = match &self.adapters {
            Some(adapters) => &adapters[index].wire_type,
            None => &self.steps[index].ty,
        };
        skip_value(input, wire_type)
    }

    /// Ensures an item is ready in the current block, reading the next block
    /// count if needed.  Returns `false` at the end of the stream.
    fn next_item_available(&mut self, index: usize) -> Result<bool> {
        if self.block_remaining > 0 {
            return Ok(true);
        }
        let input = self.input.as_mut().ok_or_else(detached)?;
        let count = input.read_unsigned_varint()?;
        if count == 0 {
            return Ok(false);
        }
        trace!(step = %self.steps[index].name, count, "read stream block header");
        self.block_remaining = count;
        self.cursor.open_stream();
        Ok(true)
    }

    fn finish_stream(&mut self, index: usize) {
        debug!(step = %self.steps[index].name, "reached end of stream");
        self.block_remaining = 0;
        self.cursor.advance();
    }

    fn discard_remaining(&mut self) -> Result<()> {
        while !self.cursor.is_complete(&self.steps) {
            let index = self.cursor.index();
            if self.steps[index].kind == StepKind::Stream {
                while self.next_item_available(index)? {
                    self.block_remaining -= 1;
                    self.skip_item(index)?;
                }
                self.finish_stream(index);
            } else {
                self.skip_item(index)?;
                self.cursor.advance();
            }
        }
        Ok(())
    }
}

impl<R: Read> Drop for ProtocolReader<R> {
    fn drop(&mut self) {
        if self.input.is_none() || self.cursor.is_closed() {
            return;
        }
        if let Err(e) = self.close() {
            warn!(
                protocol = %self.protocol,
                error = %e,
                "implicit close of protocol reader failed"
            );
        }
    }
}

/// Reads the header and resolves it against `definition`, planning the
/// coercions when the data uses a previous schema.
pub(crate) fn open_protocol<R: Read>(
    input: &mut CodedInputStream<R>,
    definition: &ProtocolDefinition,
) -> Result<(SchemaMatch, Option<Vec<StepAdapter>>)> {
    let actual = read_header(input)?;
    let schema_match = match_schema(
        definition.name(),
        &actual,
        definition.schema(),
        definition.previous_schemas(),
    )?;

    let adapters = match schema_match {
        SchemaMatch::Current => None,
        SchemaMatch::Previous(i) => {
            let wire = ProtocolDefinition::parse(&definition.previous_schemas()[i])?;
            Some(plan_protocol(&wire, definition)?)
        }
    };
    Ok((schema_match, adapters))
}

/// Decodes one value (or stream item) of `step`, through `adapter` when the
/// data was written under a previous schema.
pub(crate) fn read_step_value<R: Read>(
    input: &mut CodedInputStream<R>,
    step: &StepDef,
    adapter: Option<&StepAdapter>,
) -> Result<Value> {
    match adapter {
        Some(adapter) => {
            let wire = read_value(input, &adapter.wire_type)?;
            adapter.apply(wire)
        }
        None => read_value(input, &step.ty),
    }
}

fn detached() -> YardlError {
    YardlError::ProtocolState("the reader no longer owns its input".to_string())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::protocol::writer::{ProtocolWriter, WriterOptions};
    use crate::schema::types::{PrimitiveType, TypeDesc};

    fn definition() -> ProtocolDefinition {
        ProtocolDefinition::new(
            "P",
            "schema-v1",
            vec![
                StepDef::value("id", TypeDesc::Primitive(PrimitiveType::Int64)),
                StepDef::stream("xs", TypeDesc::Primitive(PrimitiveType::Int32)),
                StepDef::value("name", TypeDesc::Primitive(PrimitiveType::String)),
            ],
        )
    }

    fn encoded(batches: &[&[i32]]) -> Vec<u8> {
        let def = definition();
        let mut writer = ProtocolWriter::new(Vec::new(), &def, WriterOptions::default()).unwrap();
        writer.write("id", &Value::Int64(42)).unwrap();
        for batch in batches {
            let items: Vec<_> = batch.iter().map(|&v| Value::Int32(v)).collect();
            writer.write_stream_batch("xs", &items).unwrap();
        }
        writer.end_stream("xs").unwrap();
        writer.write("name", &Value::String("done".into())).unwrap();
        writer.close().unwrap();
        writer.into_inner().unwrap()
    }

    fn permissive() -> ReaderOptions {
        ReaderOptions {
            completion: Completion::AllowPartial,
            ..ReaderOptions::default()
        }
    }

    #[test]
    fn test_reads_steps_in_order() {
        // Arrange
        let bytes = encoded(&[&[1, 2], &[3]]);
        let def = definition();

        // Act
        let mut reader =
            ProtocolReader::new(bytes.as_slice(), &def, ReaderOptions::default()).unwrap();
        let id = reader.read("id").unwrap();
        let mut xs = Vec::new();
        while let Some(v) = reader.read_stream("xs").unwrap() {
            xs.push(v);
        }
        let name = reader.read("name").unwrap();

        // Assert
        assert_eq!(reader.schema_index(), -1);
        assert_eq!(id, Value::Int64(42));
        assert_eq!(xs, vec![Value::Int32(1), Value::Int32(2), Value::Int32(3)]);
        assert_eq!(name, Value::String("done".into()));
        assert!(reader.is_complete());
        reader.close().unwrap();
        assert_eq!(reader.position(), bytes.len() as u64);
    }

    #[test]
    fn test_batch_spans_blocks_and_reports_end_with_last_items() {
        // Arrange
        let bytes = encoded(&[&[1], &[2], &[3, 4]]);
        let def = definition();
        let mut reader =
            ProtocolReader::new(bytes.as_slice(), &def, ReaderOptions::default()).unwrap();
        reader.read("id").unwrap();

        // Act
        let (first, first_ended) = reader.read_stream_batch("xs", 3).unwrap();
        let (second, second_ended) = reader.read_stream_batch("xs", 3).unwrap();

        // Assert
        assert_eq!(first, vec![Value::Int32(1), Value::Int32(2), Value::Int32(3)]);
        assert!(!first_ended);
        assert_eq!(second, vec![Value::Int32(4)]);
        assert!(second_ended);
        assert_eq!(reader.read("name").unwrap(), Value::String("done".into()));
        reader.close().unwrap();
    }

    #[test]
    fn test_short_batch_moves_on_to_next_step() {
        // Arrange
        let bytes = encoded(&[&[1, 2]]);
        let def = definition();
        let mut reader =
            ProtocolReader::new(bytes.as_slice(), &def, ReaderOptions::default()).unwrap();
        reader.read("id").unwrap();

        // Act
        let (items, ended) = reader.read_stream_batch("xs", 10).unwrap();

        // Assert
        assert_eq!(items, vec![Value::Int32(1), Value::Int32(2)]);
        assert!(ended);
        assert_eq!(reader.read("name").unwrap(), Value::String("done".into()));
        assert!(matches!(
            reader.read_stream_batch("xs", 10),
            Err(YardlError::ProtocolState(_))
        ));
        reader.close().unwrap();
    }

    #[test]
    fn test_full_batch_reports_end_on_following_call() {
        let bytes = encoded(&[&[1, 2]]);
        let def = definition();
        let mut reader =
            ProtocolReader::new(bytes.as_slice(), &def, ReaderOptions::default()).unwrap();
        reader.read("id").unwrap();

        assert!(!reader.read_stream_batch("xs", 2).unwrap().1);
        assert_eq!(reader.read_stream_batch("xs", 2).unwrap(), (vec![], true));
        assert!(reader.read("name").is_ok());
    }

    #[test]
    fn test_reading_ahead_is_a_state_error() {
        let bytes = encoded(&[]);
        let def = definition();
        let mut reader = ProtocolReader::new(bytes.as_slice(), &def, permissive()).unwrap();

        assert!(matches!(reader.read("name"), Err(YardlError::ProtocolState(_))));
        assert!(matches!(reader.read_stream("id"), Err(YardlError::ProtocolState(_))));
    }

    #[test]
    fn test_strict_close_after_one_step_fails() {
        let bytes = encoded(&[&[1, 2, 3]]);
        let def = definition();
        let mut reader =
            ProtocolReader::new(bytes.as_slice(), &def, ReaderOptions::default()).unwrap();
        reader.read("id").unwrap();

        assert!(matches!(reader.close(), Err(YardlError::UnfinishedStream(_))));
    }

    #[test]
    fn test_permissive_close_drains_input() {
        // Arrange
        let bytes = encoded(&[&[1, 2], &[3, 4, 5]]);
        let def = definition();
        let mut reader = ProtocolReader::new(bytes.as_slice(), &def, permissive()).unwrap();
        reader.read("id").unwrap();
        reader.read_stream("xs").unwrap();

        // Act
        reader.close().unwrap();

        // Assert
        assert!(reader.is_complete());
        assert_eq!(reader.position(), bytes.len() as u64);
    }

    #[test]
    fn test_skip_stream_with_limit() {
        let bytes = encoded(&[&[10, 11, 12, 13]]);
        let def = definition();
        let mut reader =
            ProtocolReader::new(bytes.as_slice(), &def, ReaderOptions::default()).unwrap();
        reader.read("id").unwrap();

        let (skipped, ended) = reader.skip_stream("xs", Some(3)).unwrap();
        let next = reader.read_stream("xs").unwrap();
        let (rest, rest_ended) = reader.skip_stream("xs", None).unwrap();

        assert_eq!((skipped, ended), (3, false));
        assert_eq!(next, Some(Value::Int32(13)));
        assert_eq!((rest, rest_ended), (0, true));
        reader.read("name").unwrap();
        reader.close().unwrap();
    }

    #[test]
    fn test_trailing_bytes_fail_strict_close() {
        let mut bytes = encoded(&[]);
        bytes.push(0);
        let def = definition();
        let mut reader =
            ProtocolReader::new(bytes.as_slice(), &def, ReaderOptions::default()).unwrap();
        reader.read("id").unwrap();
        reader.read_stream("xs").unwrap();
        reader.read("name").unwrap();

        assert!(matches!(reader.close(), Err(YardlError::UnfinishedStream(_))));
    }

    #[test]
    fn test_read_after_close_is_a_state_error() {
        let bytes = encoded(&[]);
        let def = definition();
        let mut reader = ProtocolReader::new(bytes.as_slice(), &def, permissive()).unwrap();
        reader.close().unwrap();

        assert!(matches!(reader.read("id"), Err(YardlError::ProtocolState(_))));
        assert!(matches!(reader.close(), Err(YardlError::ProtocolState(_))));
    }

    fn unbuffered(completion: Completion) -> ReaderOptions {
        ReaderOptions {
            completion,
            buffer_size: 1,
        }
    }

    #[test]
    fn test_dropped_permissive_reader_drains_transport() {
        // Arrange
        let bytes = encoded(&[&[1, 2], &[3, 4, 5]]);
        let def = definition();
        let mut transport = Cursor::new(bytes.clone());

        // Act
        {
            let mut reader =
                ProtocolReader::new(&mut transport, &def, unbuffered(Completion::AllowPartial))
                    .unwrap();
            reader.read("id").unwrap();
        }

        // Assert
        assert_eq!(transport.position(), bytes.len() as u64);
    }

    #[test]
    fn test_dropped_strict_reader_leaves_unread_data() {
        let bytes = encoded(&[&[1, 2, 3]]);
        let def = definition();
        let mut transport = Cursor::new(bytes.clone());

        {
            let mut reader =
                ProtocolReader::new(&mut transport, &def, unbuffered(Completion::Strict)).unwrap();
            reader.read("id").unwrap();
        }

        assert!(transport.position() < bytes.len() as u64);
    }

    #[test]
    fn test_drop_after_explicit_close_does_nothing() {
        // Arrange
        let bytes = encoded(&[&[1]]);
        let def = definition();
        let mut transport = Cursor::new(bytes.clone());

        // Act
        let mut reader =
            ProtocolReader::new(&mut transport, &def, unbuffered(Completion::AllowPartial))
                .unwrap();
        reader.read("id").unwrap();
        reader.close().unwrap();
        let position = reader.position();
        drop(reader);

        // Assert
        assert_eq!(position, bytes.len() as u64);
        assert_eq!(transport.position(), bytes.len() as u64);
    }

    #[test]
    fn test_unknown_schema_is_rejected() {
        let bytes = encoded(&[]);
        let other = ProtocolDefinition::new("P", "schema-v2", definition().steps().to_vec());

        let result = ProtocolReader::new(bytes.as_slice(), &other, ReaderOptions::default());

        assert!(matches!(result, Err(YardlError::SchemaMismatch { .. })));
    }
}
