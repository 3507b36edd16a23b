//! Table-driven protocol writer.
//!
//! One [`ProtocolWriter`] serves every protocol: the step table of a
//! [`ProtocolDefinition`] decides which operation is legal next.
//!
//! ```rust
//! use yardl_core::protocol::writer::{ProtocolWriter, WriterOptions};
//! use yardl_core::schema::{ProtocolDefinition, Value};
//!
//! let schema = r#"{"protocol":{"name":"P","sequence":[{"name":"id","type":"int64"},{"name":"xs","type":{"stream":{"items":"int32"}}}]},"types":null}"#;
//! let def = ProtocolDefinition::parse(schema).unwrap();
//!
//! let mut writer = ProtocolWriter::new(Vec::new(), &def, WriterOptions::default()).unwrap();
//! writer.write("id", &Value::Int64(7)).unwrap();
//! writer.write_stream_batch("xs", &[Value::Int32(1), Value::Int32(2)]).unwrap();
//! writer.end_stream("xs").unwrap();
//! writer.close().unwrap();
//! let bytes = writer.into_inner().unwrap();
//! assert!(bytes.starts_with(b"yardl"));
//! ```

use std::io::Write;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::{Result, YardlError};
use crate::protocol::coded_stream::{CodedOutputStream, DEFAULT_BUFFER_SIZE};
use crate::protocol::header::write_header;
use crate::protocol::index::{write_index, Index};
use crate::protocol::state::{Completion, ProtocolCursor};
use crate::schema::serializers::{check_value, write_value};
use crate::schema::types::{ProtocolDefinition, StepDef, StepKind};
use crate::schema::value::Value;

const VALUE_STEPS: &[StepKind] = &[StepKind::Scalar, StepKind::Optional, StepKind::Union];
const STREAM_STEPS: &[StepKind] = &[StepKind::Stream];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterOptions {
    pub completion: Completion,
    pub buffer_size: usize,
    /// Record step and item offsets and append them as an index on close.
    pub indexed: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            completion: Completion::Strict,
            buffer_size: DEFAULT_BUFFER_SIZE,
            indexed: false,
        }
    }
}

/// Writes one protocol instance to `W`.
///
/// The header is written on construction.  Dropping an unclosed writer
/// flushes what it can and logs a warning; call [`close`](Self::close) to
/// get the completion check and any flush error.
///
/// An indexed writer appends its index only from a successful `close` of a
/// complete protocol.
pub struct ProtocolWriter<W: Write> {
    output: Option<CodedOutputStream<W>>,
    protocol: String,
    steps: Vec<StepDef>,
    cursor: ProtocolCursor,
    completion: Completion,
    stream_items: u64,
    index: Option<Index>,
}

impl<W: Write> ProtocolWriter<W> {
    /// Wraps `sink` and writes the header for `definition`'s schema.
    pub fn new(sink: W, definition: &ProtocolDefinition, options: WriterOptions) -> Result<Self> {
        let mut output = CodedOutputStream::with_buffer_size(sink, options.buffer_size);
        write_header(&mut output, definition.schema())?;
        debug!(protocol = definition.name(), "opened protocol writer");

        Ok(Self {
            output: Some(output),
            protocol: definition.name().to_string(),
            steps: definition.steps().to_vec(),
            cursor: ProtocolCursor::new(),
            completion: options.completion,
            stream_items: 0,
            index: options.indexed.then(Index::new),
        })
    }

    /// Writes a scalar, optional or union step and advances.
    pub fn write(&mut self, step: &str, value: &Value) -> Result<()> {
        let index = self.cursor.expect(&self.steps, step, VALUE_STEPS, "write")?;
        let ty = &self.steps[index].ty;
        check_value(ty, value)?;

        let output = self.output.as_mut().ok_or_else(detached)?;
        if let Some(offsets_index) = &mut self.index {
            offsets_index.set_step_offset(step, output.position());
        }
        write_value(output, ty, value)?;
        self.cursor.advance();
        Ok(())
    }

    /// Appends one item to the current stream.
    pub fn write_stream(&mut self, step: &str, item: &Value) -> Result<()> {
        self.write_stream_batch(step, std::slice::from_ref(item))
    }

    /// Appends `items` to the current stream as a single block.
    ///
    /// Every item is validated before anything is written.  An empty batch
    /// writes nothing, since a zero count is the end-of-stream marker.
    pub fn write_stream_batch(&mut self, step: &str, items: &[Value]) -> Result<()> {
        let index = self.cursor.expect(&self.steps, step, STREAM_STEPS, "write")?;
        let ty = &self.steps[index].ty;
        items.iter().try_for_each(|item| check_value(ty, item))?;
        if items.is_empty() {
            return Ok(());
        }

        let output = self.output.as_mut().ok_or_else(detached)?;
        if let Some(offsets_index) = &mut self.index {
            offsets_index.set_step_offset(step, output.position());
        }
        output.write_unsigned_varint(items.len() as u64)?;
        let mut offsets = Vec::with_capacity(if self.index.is_some() { items.len() } else { 0 });
        for item in items {
            offsets.push(output.position());
            write_value(output, ty, item)?;
        }
        if let Some(offsets_index) = &mut self.index {
            offsets_index.add_stream_offsets(step, &offsets);
        }
        self.cursor.open_stream();
        self.stream_items += items.len() as u64;
        trace!(step, count = items.len(), "wrote stream block");
        Ok(())
    }

    /// Writes the end-of-stream marker and advances.
    pub fn end_stream(&mut self, step: &str) -> Result<()> {
        self.cursor.expect(&self.steps, step, STREAM_STEPS, "end")?;
        let output = self.output.as_mut().ok_or_else(detached)?;
        if let Some(offsets_index) = &mut self.index {
            offsets_index.set_step_offset(step, output.position());
        }
        output.write_unsigned_varint(0)?;
        debug!(step, items = self.stream_items, "ended stream");
        self.stream_items = 0;
        self.cursor.advance();
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.output.as_mut().ok_or_else(detached)?.flush()
    }

    /// Flushes and finishes the session.
    ///
    /// # Errors
    ///
    /// - [`YardlError::UnfinishedStream`] in strict mode when steps remain.
    ///   The bytes written so far are still flushed.
    /// - [`YardlError::ProtocolState`] when called a second time.
    pub fn close(&mut self) -> Result<()> {
        self.cursor.close()?;
        let complete = self.cursor.is_complete(&self.steps);
        let indexed = match (&self.index, complete) {
            (Some(offsets_index), true) => {
                write_index(self.output.as_mut().ok_or_else(detached)?, offsets_index)
            }
            _ => Ok(()),
        };
        let flushed = self.flush().and(indexed);

        if !complete {
            if self.completion == Completion::Strict {
                return Err(YardlError::UnfinishedStream(format!(
                    "protocol '{}' writer closed early: {}",
                    self.protocol,
                    self.cursor.describe(&self.steps)
                )));
            }
            debug!(
                protocol = %self.protocol,
                step = self.cursor.index(),
                "closed partial protocol writer"
            );
        } else {
            debug!(protocol = %self.protocol, "closed protocol writer");
        }
        flushed
    }

    /// `true` once every step has been written.
    pub fn is_complete(&self) -> bool {
        self.cursor.is_complete(&self.steps)
    }

    /// Flushes and returns the sink.  No completion check is made.
    pub fn into_inner(mut self) -> Result<W> {
        let output = self.output.take().ok_or_else(detached)?;
        output.into_inner()
    }
}

impl<W: Write> Drop for ProtocolWriter<W> {
    fn drop(&mut self) {
        let Some(output) = self.output.as_mut() else {
            return;
        };
        if !self.cursor.is_closed() {
            warn!(
                protocol = %self.protocol,
                complete = self.cursor.is_complete(&self.steps),
                "protocol writer dropped without close"
            );
            if let Err(e) = output.flush() {
                warn!(error = %e, "flush of dropped protocol writer failed");
            }
        }
    }
}

fn detached() -> YardlError {
    YardlError::ProtocolState("the writer no longer owns its output".to_string())
}
