//! Wire protocol: coded streams, headers, the step state machine and the
//! generic readers, writer and transcoder built on them.

pub mod coded_stream;
pub mod copy;
pub mod header;
pub mod index;
pub mod indexed_reader;
pub mod ndjson_header;
pub mod reader;
pub mod state;
pub mod writer;

pub use copy::{copy_protocol, CopyOptions, CopyReport};
pub use header::{
    match_schema, read_header, write_header, SchemaMatch, BINARY_FORMAT_VERSION, MAGIC_BYTES,
};
pub use index::{Index, StreamItemLocation, INDEX_FORMAT_VERSION, INDEX_MAGIC_BYTES};
pub use indexed_reader::IndexedReader;
pub use reader::{ProtocolReader, ReaderOptions};
pub use state::Completion;
pub use writer::{ProtocolWriter, WriterOptions};
