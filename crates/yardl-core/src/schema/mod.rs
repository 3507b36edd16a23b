//! Schema model: type trees, the step table parsed from schema JSON, and the
//! dynamic values that flow through readers and writers.

pub mod parse;
pub mod serializers;
pub mod types;
pub mod value;

pub use types::{
    EnumDef, Field, PrimitiveType, ProtocolDefinition, RecordDef, StepDef, StepKind, TypeDesc,
    UnionCase,
};
pub use value::Value;
