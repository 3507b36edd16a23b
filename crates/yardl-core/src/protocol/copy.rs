//! Transcoding: drive a reader and a writer through the same step sequence.
//!
//! Values come out of the reader already coerced to the current shape and
//! go into the writer natively, so copying data written under a previous
//! schema re-encodes it under the writer's schema.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::protocol::reader::ProtocolReader;
use crate::protocol::writer::ProtocolWriter;

/// Bounds applied to every stream step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CopyOptions {
    /// Items dropped from the start of each stream.
    pub skip: u64,
    /// Most items copied per stream; the rest are skipped on the wire.
    pub max: Option<u64>,
    /// Items moved per read/write call.  Values of 0 and 1 copy item by item.
    pub batch_size: usize,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            skip: 0,
            max: None,
            batch_size: 1,
        }
    }
}

/// What a transcode did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CopyReport {
    pub steps: usize,
    pub items_copied: u64,
    pub items_skipped: u64,
}

/// Copies every step from `reader` to `writer`, then closes the reader and
/// then the writer.
///
/// Step names are taken from the reader's definition; the writer's
/// definition must declare the same names in the same order.
pub fn copy_protocol<R: Read, W: Write>(
    reader: &mut ProtocolReader<R>,
    writer: &mut ProtocolWriter<W>,
    options: &CopyOptions,
) -> Result<CopyReport> {
    let steps: Vec<(String, bool)> = reader
        .steps()
        .iter()
        .map(|s| (s.name.clone(), s.is_stream()))
        .collect();
    let mut report = CopyReport {
        steps: steps.len(),
        ..CopyReport::default()
    };

    for (name, is_stream) in &steps {
        if *is_stream {
            let (copied, skipped) = copy_stream(reader, writer, name, options)?;
            debug!(step = %name, copied, skipped, "copied stream");
            report.items_copied += copied;
            report.items_skipped += skipped;
        } else {
            let value = reader.read(name)?;
            writer.write(name, &value)?;
        }
    }

    reader.close()?;
    writer.close()?;
    info!(
        steps = report.steps,
        items_copied = report.items_copied,
        items_skipped = report.items_skipped,
        schema_index = reader.schema_index(),
        "transcode complete"
    );
    Ok(report)
}

fn copy_stream<R: Read, W: Write>(
    reader: &mut ProtocolReader<R>,
    writer: &mut ProtocolWriter<W>,
    step: &str,
    options: &CopyOptions,
) -> Result<(u64, u64)> {
    let (mut skipped, mut ended) = if options.skip > 0 {
        reader.skip_stream(step, Some(options.skip))?
    } else {
        (0, false)
    };
    let mut copied = 0u64;

    while !ended {
        let remaining = options.max.map(|m| m.saturating_sub(copied));
        if remaining == Some(0) {
            let (dropped, _) = reader.skip_stream(step, None)?;
            skipped += dropped;
            break;
        }

        if options.batch_size <= 1 {
            match reader.read_stream(step)? {
                Some(item) => {
                    writer.write_stream(step, &item)?;
                    copied += 1;
                }
                None => ended = true,
            }
        } else {
            let want = remaining.map_or(options.batch_size, |r| {
                options.batch_size.min(usize::try_from(r).unwrap_or(usize::MAX))
            });
            let (items, last) = reader.read_stream_batch(step, want)?;
            writer.write_stream_batch(step, &items)?;
            copied += items.len() as u64;
            ended = last;
        }
    }

    writer.end_stream(step)?;
    Ok((copied, skipped))
}
