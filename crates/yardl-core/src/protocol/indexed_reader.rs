//! Random-access reader for binary data written with an index.
//!
//! Unlike [`ProtocolReader`](super::reader::ProtocolReader), steps may be
//! read in any order and any number of times: every call seeks to the
//! offset the index recorded.

use std::io::{Read, Seek};

use tracing::{debug, trace};

use crate::coercion::StepAdapter;
use crate::error::{Result, YardlError};
use crate::protocol::coded_stream::CodedInputStream;
use crate::protocol::header::SchemaMatch;
use crate::protocol::index::{read_index, Index};
use crate::protocol::reader::{open_protocol, read_step_value, ReaderOptions};
use crate::schema::types::{ProtocolDefinition, StepDef, StepKind};
use crate::schema::value::Value;

/// Reads one indexed protocol instance from a seekable `R`.
pub struct IndexedReader<R: Read + Seek> {
    input: CodedInputStream<R>,
    protocol: String,
    steps: Vec<StepDef>,
    schema_match: SchemaMatch,
    adapters: Option<Vec<StepAdapter>>,
    index: Index,
}

impl<R: Read + Seek> IndexedReader<R> {
    /// Reads the header and the index trailer of `source`.
    ///
    /// # Errors
    ///
    /// Everything [`ProtocolReader::new`](super::reader::ProtocolReader::new)
    /// reports, plus [`YardlError::Format`] when the data carries no index.
    pub fn new(source: R, definition: &ProtocolDefinition, options: ReaderOptions) -> Result<Self> {
        let mut input = CodedInputStream::with_buffer_size(source, options.buffer_size);
        let (schema_match, adapters) = open_protocol(&mut input, definition)?;
        let index = read_index(&mut input)?;
        debug!(
            protocol = definition.name(),
            schema_index = schema_match.as_index(),
            "opened indexed protocol reader"
        );

        Ok(Self {
            input,
            protocol: definition.name().to_string(),
            steps: definition.steps().to_vec(),
            schema_match,
            adapters,
            index,
        })
    }

    /// `-1` for the current schema, `i` for `previous_schemas[i]`.
    pub fn schema_index(&self) -> i32 {
        self.schema_match.as_index()
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Reads a scalar, optional or union step.
    pub fn read(&mut self, step: &str) -> Result<Value> {
        let position = self.lookup(step, false)?;
        let offset = self.step_offset(step)?;
        self.input.seek(offset)?;
        self.decode(position)
    }

    /// Number of items in stream `step`.
    pub fn stream_len(&self, step: &str) -> Result<u64> {
        self.lookup(step, true)?;
        Ok(self.index.stream_len(step))
    }

    /// Reads item `item` of stream `step`, or `None` past its end.
    pub fn read_stream_item(&mut self, step: &str, item: u64) -> Result<Option<Value>> {
        let position = self.lookup(step, true)?;
        match self.index.find_stream_item(step, item) {
            Some(location) if location.remaining_in_block > 0 => {
                self.input.seek(location.offset)?;
                self.decode(position).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Reads up to `max` items (at least one) of stream `step` starting at
    /// item `start`, spanning blocks.  The flag is `true` when the returned
    /// items reach the end of the stream.
    pub fn read_stream_batch(
        &mut self,
        step: &str,
        start: u64,
        max: usize,
    ) -> Result<(Vec<Value>, bool)> {
        let position = self.lookup(step, true)?;
        let len = self.index.stream_len(step);
        let location = match self.index.find_stream_item(step, start) {
            Some(location) if start < len => location,
            _ => return Ok((Vec::new(), true)),
        };

        self.input.seek(location.offset)?;
        let max = max.max(1);
        let mut items = Vec::with_capacity(max.min(4096));
        let mut block_remaining = location.remaining_in_block;
        while items.len() < max {
            if block_remaining == 0 {
                block_remaining = self.input.read_unsigned_varint()?;
                if block_remaining == 0 {
                    return Ok((items, true));
                }
                trace!(step, count = block_remaining, "read stream block header");
            }
            items.push(self.decode(position)?);
            block_remaining -= 1;
        }

        let ended = start + items.len() as u64 >= len;
        Ok((items, ended))
    }

    /// Returns the source.  Buffered bytes are lost.
    pub fn into_inner(self) -> R {
        self.input.into_inner()
    }

    fn lookup(&self, step: &str, stream: bool) -> Result<usize> {
        let position = self
            .steps
            .iter()
            .position(|s| s.name == step)
            .ok_or_else(|| {
                YardlError::ProtocolState(format!(
                    "protocol '{}' has no step '{step}'",
                    self.protocol
                ))
            })?;
        let is_stream = self.steps[position].kind == StepKind::Stream;
        if is_stream != stream {
            return Err(YardlError::ProtocolState(format!(
                "cannot read '{step}' by position: it is a {:?} step",
                self.steps[position].kind
            )));
        }
        Ok(position)
    }

    fn step_offset(&self, step: &str) -> Result<u64> {
        self.index
            .step_offset(step)
            .ok_or_else(|| YardlError::Format(format!("step '{step}' is missing from the index")))
    }

    fn decode(&mut self, position: usize) -> Result<Value> {
        let adapter = self.adapters.as_ref().map(|adapters| &adapters[position]);
        read_step_value(&mut self.input, &self.steps[position], adapter)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::protocol::reader::ProtocolReader;
    use crate::protocol::writer::{ProtocolWriter, WriterOptions};
    use crate::schema::types::{PrimitiveType, TypeDesc};

    const TOTAL: u64 = 77 + 33 + 55;

    fn definition() -> ProtocolDefinition {
        ProtocolDefinition::new(
            "Indexed",
            "schema-v1",
            vec![
                StepDef::value("id", TypeDesc::Primitive(PrimitiveType::Int64)),
                StepDef::stream("samples", TypeDesc::Primitive(PrimitiveType::Int32)),
                StepDef::stream("empty", TypeDesc::Primitive(PrimitiveType::Int32)),
                StepDef::value("name", TypeDesc::Primitive(PrimitiveType::String)),
            ],
        )
    }

    fn sample(i: u64) -> Value {
        Value::Int32(i as i32 * 3 - 100)
    }

    /// One block of 77, then 33 single-item blocks, then a block of 55.
    fn indexed_bytes() -> Vec<u8> {
        let def = definition();
        let options = WriterOptions {
            indexed: true,
            ..WriterOptions::default()
        };
        let mut writer = ProtocolWriter::new(Vec::new(), &def, options).unwrap();
        writer.write("id", &Value::Int64(9)).unwrap();
        let first: Vec<_> = (0..77).map(sample).collect();
        writer.write_stream_batch("samples", &first).unwrap();
        for i in 77..110 {
            writer.write_stream("samples", &sample(i)).unwrap();
        }
        let last: Vec<_> = (110..TOTAL).map(sample).collect();
        writer.write_stream_batch("samples", &last).unwrap();
        writer.end_stream("samples").unwrap();
        writer.end_stream("empty").unwrap();
        writer.write("name", &Value::String("indexed".into())).unwrap();
        writer.close().unwrap();
        writer.into_inner().unwrap()
    }

    fn open() -> IndexedReader<Cursor<Vec<u8>>> {
        IndexedReader::new(
            Cursor::new(indexed_bytes()),
            &definition(),
            ReaderOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_steps_read_in_any_order() {
        let mut reader = open();

        assert_eq!(reader.read("name").unwrap(), Value::String("indexed".into()));
        assert_eq!(reader.read("id").unwrap(), Value::Int64(9));
        assert_eq!(reader.read("name").unwrap(), Value::String("indexed".into()));
        assert_eq!(reader.schema_index(), -1);
    }

    #[test]
    fn test_stream_items_read_in_shuffled_order() {
        // Arrange
        let mut reader = open();
        // 37 is coprime with the item count, so this visits every item once
        let order: Vec<u64> = (0..TOTAL).map(|i| i * 37 % TOTAL).collect();

        // Act
        let items: Vec<_> = order
            .iter()
            .map(|&i| reader.read_stream_item("samples", i).unwrap())
            .collect();

        // Assert
        assert_eq!(reader.stream_len("samples").unwrap(), TOTAL);
        for (&i, item) in order.iter().zip(items) {
            assert_eq!(item, Some(sample(i)), "item {i}");
        }
        assert_eq!(reader.read_stream_item("samples", TOTAL).unwrap(), None);
    }

    #[test]
    fn test_batch_from_the_middle_spans_blocks() {
        // Arrange
        let mut reader = open();

        // Act: starts inside the first block, runs through the singles
        let (items, ended) = reader.read_stream_batch("samples", 70, 50).unwrap();

        // Assert
        let expected: Vec<_> = (70..120).map(sample).collect();
        assert_eq!(items, expected);
        assert!(!ended);
    }

    #[test]
    fn test_batches_cover_the_whole_stream() {
        // Arrange
        let mut reader = open();
        let mut all = Vec::new();
        let mut ended = false;

        // Act
        while !ended {
            let (batch, last) = reader
                .read_stream_batch("samples", all.len() as u64, 40)
                .unwrap();
            all.extend(batch);
            ended = last;
        }

        // Assert
        let expected: Vec<_> = (0..TOTAL).map(sample).collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn test_empty_stream_has_no_items() {
        let mut reader = open();

        assert_eq!(reader.stream_len("empty").unwrap(), 0);
        assert_eq!(reader.read_stream_item("empty", 0).unwrap(), None);
        assert_eq!(
            reader.read_stream_batch("empty", 0, 10).unwrap(),
            (Vec::new(), true)
        );
    }

    #[test]
    fn test_wrong_step_kind_is_rejected() {
        let mut reader = open();

        assert!(matches!(
            reader.read("samples"),
            Err(YardlError::ProtocolState(_))
        ));
        assert!(matches!(
            reader.read_stream_item("id", 0),
            Err(YardlError::ProtocolState(_))
        ));
        assert!(matches!(
            reader.stream_len("missing"),
            Err(YardlError::ProtocolState(_))
        ));
    }

    #[test]
    fn test_data_without_index_is_rejected() {
        // Arrange
        let def = definition();
        let mut writer = ProtocolWriter::new(Vec::new(), &def, WriterOptions::default()).unwrap();
        writer.write("id", &Value::Int64(9)).unwrap();
        writer.end_stream("samples").unwrap();
        writer.end_stream("empty").unwrap();
        writer.write("name", &Value::String("plain".into())).unwrap();
        writer.close().unwrap();
        let bytes = writer.into_inner().unwrap();

        // Act
        let result = IndexedReader::new(Cursor::new(bytes), &def, ReaderOptions::default());

        // Assert
        assert!(matches!(result, Err(YardlError::Format(_))));
    }

    #[test]
    fn test_sequential_reader_skips_the_index() {
        // Arrange
        let bytes = indexed_bytes();
        let mut reader =
            ProtocolReader::new(bytes.as_slice(), &definition(), ReaderOptions::default()).unwrap();

        // Act
        reader.read("id").unwrap();
        let (samples, _) = reader.read_stream_batch("samples", 1000).unwrap();
        reader.read_stream_batch("empty", 1).unwrap();
        let name = reader.read("name").unwrap();

        // Assert
        assert_eq!(samples.len() as u64, TOTAL);
        assert_eq!(name, Value::String("indexed".into()));
        reader.close().unwrap();
    }
}
