//! # yardl-core
//!
//! Runtime for yardl binary protocols: ordered sequences of named steps
//! (scalars, optionals, unions and unbounded streams) whose layout is
//! described by a schema string carried in every stream header.
//!
//! # Architecture overview
//!
//! - **`protocol`** – How bytes travel.  A 5-byte magic marker, a format
//!   version and the schema text open every stream; then each step is
//!   encoded in declaration order.  One generic [`ProtocolWriter`] and one
//!   generic [`ProtocolReader`] enforce that order from a step table, and
//!   [`copy_protocol`] transcodes between them.  An indexed writer appends
//!   step and item offsets so an [`IndexedReader`] can seek straight to any
//!   stream item.
//!
//! - **`schema`** – What the bytes mean.  The schema JSON is parsed into a
//!   [`ProtocolDefinition`]: a list of steps, each with a type tree.  Values
//!   are exchanged as dynamic [`Value`]s checked against those types.
//!
//! - **`coercion`** – How old data is read.  When a stream was written with
//!   a schema listed in the definition's previous schemas, the reader builds
//!   an adapter per step (widening, wrapping into optionals or unions,
//!   record field remapping) and returns values in the current shape.
//!
//! - **`error`** – One error enum, [`YardlError`], for every failure.

pub mod coercion;
pub mod error;
pub mod protocol;
pub mod schema;

pub use coercion::{Coercion, StepAdapter};
pub use error::{Result, YardlError};
pub use protocol::{
    copy_protocol, Completion, CopyOptions, CopyReport, Index, IndexedReader, ProtocolReader,
    ProtocolWriter, ReaderOptions, SchemaMatch, WriterOptions,
};
pub use schema::{ProtocolDefinition, StepDef, StepKind, TypeDesc, Value};
