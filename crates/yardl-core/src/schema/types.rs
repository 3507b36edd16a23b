//! Type trees, protocol steps and protocol definitions.
//!
//! A [`ProtocolDefinition`] is pure data: the exact schema text (the match
//! key), the ordered step table derived from it, and the schema texts of
//! earlier revisions that readers still accept.  One generic reader and one
//! generic writer are driven by this table; no per-protocol types exist.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Primitives ────────────────────────────────────────────────────────────────

/// Built-in scalar types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    Bool,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Size,
    Float32,
    Float64,
    ComplexFloat32,
    ComplexFloat64,
    String,
    Date,
    Time,
    DateTime,
}

impl PrimitiveType {
    /// Looks up a primitive by its schema name (`"int32"`, `"datetime"`, …).
    pub fn from_name(name: &str) -> Option<Self> {
        let primitive = match name {
            "bool" => Self::Bool,
            "int8" => Self::Int8,
            "uint8" => Self::Uint8,
            "int16" => Self::Int16,
            "uint16" => Self::Uint16,
            "int32" => Self::Int32,
            "uint32" => Self::Uint32,
            "int64" => Self::Int64,
            "uint64" => Self::Uint64,
            "size" => Self::Size,
            "float32" => Self::Float32,
            "float64" => Self::Float64,
            "complexfloat32" => Self::ComplexFloat32,
            "complexfloat64" => Self::ComplexFloat64,
            "string" => Self::String,
            "date" => Self::Date,
            "time" => Self::Time,
            "datetime" => Self::DateTime,
            _ => return None,
        };
        Some(primitive)
    }

    /// The schema name of this primitive.
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int8 => "int8",
            Self::Uint8 => "uint8",
            Self::Int16 => "int16",
            Self::Uint16 => "uint16",
            Self::Int32 => "int32",
            Self::Uint32 => "uint32",
            Self::Int64 => "int64",
            Self::Uint64 => "uint64",
            Self::Size => "size",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::ComplexFloat32 => "complexfloat32",
            Self::ComplexFloat64 => "complexfloat64",
            Self::String => "string",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime => "datetime",
        }
    }

    pub fn is_signed_integer(self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub fn is_unsigned_integer(self) -> bool {
        matches!(
            self,
            Self::Uint8 | Self::Uint16 | Self::Uint32 | Self::Uint64 | Self::Size
        )
    }

    pub fn is_integer(self) -> bool {
        self.is_signed_integer() || self.is_unsigned_integer()
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// Width in bits of integer and floating-point types.
    pub fn bits(self) -> Option<u32> {
        match self {
            Self::Int8 | Self::Uint8 => Some(8),
            Self::Int16 | Self::Uint16 => Some(16),
            Self::Int32 | Self::Uint32 | Self::Float32 => Some(32),
            Self::Int64 | Self::Uint64 | Self::Size | Self::Float64 => Some(64),
            _ => None,
        }
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Type trees ────────────────────────────────────────────────────────────────

/// One alternative of a union.  `ty == None` is the `null` case.
#[derive(Debug, Clone, PartialEq)]
pub struct UnionCase {
    pub label: String,
    pub ty: Option<TypeDesc>,
}

/// A named field of a record.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: TypeDesc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordDef {
    pub name: String,
    pub fields: Vec<Field>,
}

impl RecordDef {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// An enum (or flags) type; encoded as its base integer.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumDef {
    pub name: String,
    pub base: PrimitiveType,
    pub symbols: Vec<(String, i64)>,
}

/// The value-type tree of a step, field or item.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDesc {
    Primitive(PrimitiveType),
    Optional(Box<TypeDesc>),
    Union(Vec<UnionCase>),
    Vector {
        items: Box<TypeDesc>,
        /// Fixed-length vectors carry no length prefix on the wire.
        length: Option<u64>,
    },
    Map {
        keys: Box<TypeDesc>,
        values: Box<TypeDesc>,
    },
    Record(RecordDef),
    /// A named alias; representation-identical to its target.
    Alias {
        name: String,
        target: Box<TypeDesc>,
    },
    Enum(EnumDef),
}

impl TypeDesc {
    /// Follows aliases down to the first non-alias type.
    pub fn resolve_alias(&self) -> &TypeDesc {
        let mut ty = self;
        while let TypeDesc::Alias { target, .. } = ty {
            ty = target;
        }
        ty
    }

    /// Structural equality that ignores alias names.
    pub fn same_representation(&self, other: &TypeDesc) -> bool {
        match (self.resolve_alias(), other.resolve_alias()) {
            (TypeDesc::Primitive(a), TypeDesc::Primitive(b)) => a == b,
            (TypeDesc::Optional(a), TypeDesc::Optional(b)) => a.same_representation(b),
            (TypeDesc::Union(a), TypeDesc::Union(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b).all(|(x, y)| match (&x.ty, &y.ty) {
                        (None, None) => true,
                        (Some(x), Some(y)) => x.same_representation(y),
                        _ => false,
                    })
            }
            (
                TypeDesc::Vector { items: a, length: la },
                TypeDesc::Vector { items: b, length: lb },
            ) => la == lb && a.same_representation(b),
            (
                TypeDesc::Map { keys: ka, values: va },
                TypeDesc::Map { keys: kb, values: vb },
            ) => ka.same_representation(kb) && va.same_representation(vb),
            (TypeDesc::Record(a), TypeDesc::Record(b)) => {
                a.fields.len() == b.fields.len()
                    && a.fields
                        .iter()
                        .zip(&b.fields)
                        .all(|(x, y)| x.name == y.name && x.ty.same_representation(&y.ty))
            }
            (TypeDesc::Enum(a), TypeDesc::Enum(b)) => a.name == b.name && a.base == b.base,
            _ => false,
        }
    }

    /// Returns `true` for `[null, T]`-style optionals (through aliases).
    pub fn is_optional(&self) -> bool {
        matches!(self.resolve_alias(), TypeDesc::Optional(_))
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDesc::Primitive(p) => write!(f, "{p}"),
            TypeDesc::Optional(inner) => write!(f, "{inner}?"),
            TypeDesc::Union(cases) => {
                f.write_str("(")?;
                for (i, case) in cases.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    f.write_str(&case.label)?;
                }
                f.write_str(")")
            }
            TypeDesc::Vector { items, length: Some(n) } => write!(f, "{items}[{n}]"),
            TypeDesc::Vector { items, length: None } => write!(f, "{items}*"),
            TypeDesc::Map { keys, values } => write!(f, "{keys}->{values}"),
            TypeDesc::Record(r) => f.write_str(&r.name),
            TypeDesc::Alias { name, .. } => f.write_str(name),
            TypeDesc::Enum(e) => f.write_str(&e.name),
        }
    }
}

// ── Steps and protocols ───────────────────────────────────────────────────────

/// How a step is driven by readers and writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepKind {
    /// Exactly one value.
    Scalar,
    /// Presence flag plus value.
    Optional,
    /// Discriminant plus value of the selected alternative.
    Union,
    /// Zero or more items followed by an end-of-stream sentinel.
    Stream,
}

/// One named unit of protocol data.
///
/// For `Stream` steps `ty` is the item type; for every other kind it is the
/// full value type (an `Optional` step has a [`TypeDesc::Optional`] type).
#[derive(Debug, Clone, PartialEq)]
pub struct StepDef {
    pub name: String,
    pub kind: StepKind,
    pub ty: TypeDesc,
}

impl StepDef {
    /// Builds a non-stream step, deriving its kind from the type.
    pub fn value(name: impl Into<String>, ty: TypeDesc) -> Self {
        let kind = match ty.resolve_alias() {
            TypeDesc::Optional(_) => StepKind::Optional,
            TypeDesc::Union(_) => StepKind::Union,
            _ => StepKind::Scalar,
        };
        Self {
            name: name.into(),
            kind,
            ty,
        }
    }

    /// Builds a stream step with the given item type.
    pub fn stream(name: impl Into<String>, items: TypeDesc) -> Self {
        Self {
            name: name.into(),
            kind: StepKind::Stream,
            ty: items,
        }
    }

    pub fn is_stream(&self) -> bool {
        self.kind == StepKind::Stream
    }
}

/// A protocol: schema text, ordered steps and accepted previous schemas.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolDefinition {
    name: String,
    schema: String,
    steps: Vec<StepDef>,
    previous_schemas: Vec<String>,
}

impl ProtocolDefinition {
    /// Builds a definition from an explicit step table.
    ///
    /// `schema` is used verbatim as the header match key.
    pub fn new(name: impl Into<String>, schema: impl Into<String>, steps: Vec<StepDef>) -> Self {
        Self {
            name: name.into(),
            schema: schema.into(),
            steps,
            previous_schemas: Vec::new(),
        }
    }

    /// Registers earlier schema revisions that readers should still accept.
    /// Their order defines the schema index reported on a match.
    pub fn with_previous_schemas<I, S>(mut self, schemas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.previous_schemas = schemas.into_iter().map(Into::into).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn steps(&self) -> &[StepDef] {
        &self.steps
    }

    pub fn previous_schemas(&self) -> &[String] {
        &self.previous_schemas
    }

    pub fn step_index(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name == name)
    }
}
