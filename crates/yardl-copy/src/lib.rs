//! Library side of the `yardl-copy` tool: configuration loading and the
//! transcode entry point the binary drives.

pub mod config;

use std::io::{Read, Write};

use tracing::info;
use yardl_core::{
    copy_protocol, CopyOptions, CopyReport, ProtocolDefinition, ProtocolReader, ProtocolWriter,
    ReaderOptions, WriterOptions,
};

/// Reads `input` under `definition` (or one of its previous schemas) and
/// writes it to `output` under the current schema.
///
/// Both sides are closed by the copy, so an indexed output already carries
/// its index.  Returns the report and the output sink so the caller can
/// flush it.
pub fn transcode<R: Read, W: Write>(
    definition: &ProtocolDefinition,
    reader_options: ReaderOptions,
    writer_options: WriterOptions,
    copy: &CopyOptions,
    input: R,
    output: W,
) -> yardl_core::Result<(CopyReport, W)> {
    let mut reader = ProtocolReader::new(input, definition, reader_options)?;
    info!(
        protocol = definition.name(),
        schema_index = reader.schema_index(),
        "opened input"
    );

    let mut writer = ProtocolWriter::new(output, definition, writer_options)?;
    let report = copy_protocol(&mut reader, &mut writer, copy)?;
    Ok((report, writer.into_inner()?))
}
