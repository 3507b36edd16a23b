//! Adapters from an older wire representation to the current in-memory shape.
//!
//! A [`Coercion`] is built once per step by comparing the type a previous
//! schema put on the wire with the type the current schema declares.  Building
//! fails with [`YardlError::UnsupportedCoercion`] when no lossless adapter
//! exists, so a reader never discovers an impossible mapping halfway through
//! the data.  Applying a built coercion to a decoded wire value is pure.
//!
//! ```text
//! int8  -> int16/32/64          sign-extend
//! uintN -> uintM (M >= N)       zero-extend
//! intN  -> uintM (M >= N)       two's-complement reinterpretation (`as`)
//! int   -> float32/float64      numeric value
//! float32 -> float64            numeric value
//! number -> string              shortest round-trip decimal text
//! T     -> T?                   always present
//! T     -> (A | T | B)          fixed case index
//! alias -> target               pass-through
//! record -> record              by field name, recursively
//! ```

use tracing::debug;

use crate::error::{Result, YardlError};
use crate::schema::types::{
    EnumDef, PrimitiveType, ProtocolDefinition, RecordDef, StepDef, TypeDesc, UnionCase,
};
use crate::schema::value::Value;

/// One adapter from the fixed coercion taxonomy.
#[derive(Debug, Clone, PartialEq)]
pub enum Coercion {
    /// Representation-identical; the value passes through unchanged.
    Identity,
    /// Numeric widening or reinterpretation between primitives.
    Widen {
        from: PrimitiveType,
        to: PrimitiveType,
    },
    /// Number to its canonical decimal text.
    ToText,
    /// Bare value to an always-present optional.
    WrapOptional(Box<Coercion>),
    /// Bare value to a fixed union case.
    WrapUnion { index: u8, inner: Box<Coercion> },
    /// Optional to optional, adapting the present value.
    Optional(Box<Coercion>),
    /// `[null, T]` wire optional to a union that has a null case.
    OptionalToUnion {
        null_index: u8,
        value_index: u8,
        inner: Box<Coercion>,
    },
    /// Union to union: wire case `i` maps to `cases[i]`.
    Union(Vec<(u8, Coercion)>),
    Vector(Box<Coercion>),
    Map {
        keys: Box<Coercion>,
        values: Box<Coercion>,
    },
    /// One source per field of the current record.
    Record(Vec<FieldSource>),
}

/// Where a field of the current record comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldSource {
    /// The wire field at `index`, adapted.
    Wire { index: usize, coercion: Coercion },
    /// The field is new and optional: it is always absent.
    Absent,
}

fn unsupported(wire: &TypeDesc, current: &TypeDesc) -> YardlError {
    YardlError::UnsupportedCoercion(format!("cannot convert {wire} to {current}"))
}

impl Coercion {
    /// Builds the adapter turning values of `wire` into values of `current`.
    pub fn build(wire: &TypeDesc, current: &TypeDesc) -> Result<Self> {
        let (w, c) = (wire.resolve_alias(), current.resolve_alias());
        if w.same_representation(c) {
            return Ok(Coercion::Identity);
        }

        match (w, c) {
            (TypeDesc::Primitive(from), TypeDesc::Primitive(to)) => {
                primitive_coercion(*from, *to).ok_or_else(|| unsupported(wire, current))
            }
            (TypeDesc::Enum(from), TypeDesc::Enum(to)) => enum_coercion(from, to)
                .ok_or_else(|| unsupported(wire, current)),
            (TypeDesc::Optional(w_inner), TypeDesc::Optional(c_inner)) => {
                Ok(Coercion::Optional(Box::new(Self::build(w_inner, c_inner)?)))
            }
            (TypeDesc::Optional(w_inner), TypeDesc::Union(cases)) => {
                let null_index = cases
                    .iter()
                    .position(|case| case.ty.is_none())
                    .ok_or_else(|| unsupported(wire, current))?;
                let (value_index, inner) = wrap_into_union(w_inner, cases)
                    .ok_or_else(|| unsupported(wire, current))?;
                Ok(Coercion::OptionalToUnion {
                    null_index: null_index as u8,
                    value_index,
                    inner: Box::new(inner),
                })
            }
            (TypeDesc::Union(w_cases), TypeDesc::Union(c_cases)) => {
                union_coercion(w_cases, c_cases).ok_or_else(|| unsupported(wire, current))
            }
            (
                TypeDesc::Vector { items: w_items, length: w_len },
                TypeDesc::Vector { items: c_items, length: c_len },
            ) => {
                if c_len.is_some() && c_len != w_len {
                    return Err(unsupported(wire, current));
                }
                Ok(Coercion::Vector(Box::new(Self::build(w_items, c_items)?)))
            }
            (
                TypeDesc::Map { keys: wk, values: wv },
                TypeDesc::Map { keys: ck, values: cv },
            ) => Ok(Coercion::Map {
                keys: Box::new(Self::build(wk, ck)?),
                values: Box::new(Self::build(wv, cv)?),
            }),
            (TypeDesc::Record(w_rec), TypeDesc::Record(c_rec)) => record_coercion(w_rec, c_rec),
            (_, TypeDesc::Optional(c_inner)) => {
                Ok(Coercion::WrapOptional(Box::new(Self::build(w, c_inner)?)))
            }
            (_, TypeDesc::Union(cases)) => {
                let (index, inner) =
                    wrap_into_union(w, cases).ok_or_else(|| unsupported(wire, current))?;
                Ok(Coercion::WrapUnion {
                    index,
                    inner: Box::new(inner),
                })
            }
            _ => Err(unsupported(wire, current)),
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Coercion::Identity)
    }

    /// Converts one decoded wire value.
    pub fn apply(&self, value: Value) -> Result<Value> {
        match self {
            Coercion::Identity => Ok(value),
            Coercion::Widen { to, .. } => widen(value, *to),
            Coercion::ToText => to_text(value),
            Coercion::WrapOptional(inner) => Ok(Value::some(inner.apply(value)?)),
            Coercion::WrapUnion { index, inner } => Ok(Value::union(*index, inner.apply(value)?)),
            Coercion::Optional(inner) => match value {
                Value::Optional(None) => Ok(Value::none()),
                Value::Optional(Some(v)) => Ok(Value::some(inner.apply(*v)?)),
                other => Err(YardlError::type_mismatch("optional", other.kind_name())),
            },
            Coercion::OptionalToUnion {
                null_index,
                value_index,
                inner,
            } => match value {
                Value::Optional(None) => Ok(Value::union(*null_index, Value::Null)),
                Value::Optional(Some(v)) => Ok(Value::union(*value_index, inner.apply(*v)?)),
                other => Err(YardlError::type_mismatch("optional", other.kind_name())),
            },
            Coercion::Union(cases) => match value {
                Value::Union { index, value } => {
                    let (target, inner) = cases.get(usize::from(index)).ok_or_else(|| {
                        YardlError::type_mismatch(
                            format!("union with {} cases", cases.len()),
                            format!("case {index}"),
                        )
                    })?;
                    Ok(Value::union(*target, inner.apply(*value)?))
                }
                other => Err(YardlError::type_mismatch("union", other.kind_name())),
            },
            Coercion::Vector(inner) => match value {
                Value::Vector(items) => items
                    .into_iter()
                    .map(|v| inner.apply(v))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::Vector),
                other => Err(YardlError::type_mismatch("vector", other.kind_name())),
            },
            Coercion::Map { keys, values } => match value {
                Value::Map(entries) => entries
                    .into_iter()
                    .map(|(k, v)| Ok((keys.apply(k)?, values.apply(v)?)))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::Map),
                other => Err(YardlError::type_mismatch("map", other.kind_name())),
            },
            Coercion::Record(sources) => match value {
                Value::Record(wire_fields) => {
                    let mut wire_fields: Vec<Option<Value>> =
                        wire_fields.into_iter().map(Some).collect();
                    let mut fields = Vec::with_capacity(sources.len());
                    for source in sources {
                        let field = match source {
                            FieldSource::Absent => Value::none(),
                            FieldSource::Wire { index, coercion } => {
                                let wire = wire_fields
                                    .get_mut(*index)
                                    .and_then(Option::take)
                                    .ok_or_else(|| {
                                        YardlError::type_mismatch(
                                            format!("record field {index}"),
                                            "missing field",
                                        )
                                    })?;
                                coercion.apply(wire)?
                            }
                        };
                        fields.push(field);
                    }
                    Ok(Value::Record(fields))
                }
                other => Err(YardlError::type_mismatch("record", other.kind_name())),
            },
        }
    }
}

// ── Builders ──────────────────────────────────────────────────────────────────

fn primitive_coercion(from: PrimitiveType, to: PrimitiveType) -> Option<Coercion> {
    use PrimitiveType as P;

    if from == to {
        return Some(Coercion::Identity);
    }
    let widen = Some(Coercion::Widen { from, to });
    let (from_bits, to_bits) = (from.bits(), to.bits());

    if from.is_integer() && to.is_integer() {
        let wider_or_equal = from_bits <= to_bits;
        return match (from.is_signed_integer(), to.is_signed_integer()) {
            (true, true) if from_bits < to_bits => widen,
            (false, false) if wider_or_equal => widen,
            (true, false) if wider_or_equal => widen,
            _ => None,
        };
    }
    if from.is_integer() && to.is_float() {
        return widen;
    }
    match (from, to) {
        (P::Float32, P::Float64) | (P::ComplexFloat32, P::ComplexFloat64) => widen,
        (f, P::String) if f.is_integer() || f.is_float() => Some(Coercion::ToText),
        _ => None,
    }
}

fn enum_coercion(from: &EnumDef, to: &EnumDef) -> Option<Coercion> {
    if from.name != to.name {
        return None;
    }
    primitive_coercion(from.base, to.base)
}

fn union_coercion(wire: &[UnionCase], current: &[UnionCase]) -> Option<Coercion> {
    let mut mapping = Vec::with_capacity(wire.len());
    for w in wire {
        let by_label = current.iter().position(|c| c.label == w.label);
        let target = by_label.or_else(|| {
            current.iter().position(|c| match (&w.ty, &c.ty) {
                (None, None) => true,
                (Some(a), Some(b)) => a.same_representation(b),
                _ => false,
            })
        })?;
        let coercion = match (&w.ty, &current[target].ty) {
            (None, None) => Coercion::Identity,
            (Some(a), Some(b)) => Coercion::build(a, b).ok()?,
            _ => return None,
        };
        mapping.push((u8::try_from(target).ok()?, coercion));
    }
    Some(Coercion::Union(mapping))
}

/// Picks the union case a bare wire value lands in: an exact representation
/// match first, then the first case reachable without converting to text,
/// then any reachable case.
fn wrap_into_union(wire: &TypeDesc, cases: &[UnionCase]) -> Option<(u8, Coercion)> {
    let exact = cases.iter().position(|c| {
        c.ty.as_ref()
            .is_some_and(|t| t.same_representation(wire))
    });
    if let Some(index) = exact {
        return Some((u8::try_from(index).ok()?, Coercion::Identity));
    }

    let candidates: Vec<(u8, Coercion)> = cases
        .iter()
        .enumerate()
        .filter_map(|(index, case)| {
            let ty = case.ty.as_ref()?;
            let coercion = Coercion::build(wire, ty).ok()?;
            Some((u8::try_from(index).ok()?, coercion))
        })
        .collect();
    let preferred = candidates
        .iter()
        .position(|(_, c)| *c != Coercion::ToText)
        .unwrap_or(0);
    candidates.into_iter().nth(preferred)
}

fn record_coercion(wire: &RecordDef, current: &RecordDef) -> Result<Coercion> {
    let mut sources = Vec::with_capacity(current.fields.len());
    for field in &current.fields {
        let source = match wire.field_index(&field.name) {
            Some(index) => FieldSource::Wire {
                index,
                coercion: Coercion::build(&wire.fields[index].ty, &field.ty)?,
            },
            None if field.ty.is_optional() => FieldSource::Absent,
            None => {
                return Err(YardlError::UnsupportedCoercion(format!(
                    "field '{}.{}' is required but missing from the previous schema",
                    current.name, field.name
                )))
            }
        };
        sources.push(source);
    }
    Ok(Coercion::Record(sources))
}

// ── Appliers ──────────────────────────────────────────────────────────────────

fn widen(value: Value, to: PrimitiveType) -> Result<Value> {
    use PrimitiveType as P;

    match (value, to) {
        (Value::Float32(v), P::Float64) => return Ok(Value::Float64(v.into())),
        (Value::ComplexFloat32(re, im), P::ComplexFloat64) => {
            return Ok(Value::ComplexFloat64(re.into(), im.into()))
        }
        (value, _) => {
            let raw = integer_bits(&value)
                .ok_or_else(|| YardlError::type_mismatch(to, value.kind_name()))?;
            // Narrowing casts from i128 keep the low bits, which is exactly
            // the two's-complement reinterpretation for signed sources.
            let widened = match to {
                P::Int16 => Value::Int16(raw as i16),
                P::Int32 => Value::Int32(raw as i32),
                P::Int64 => Value::Int64(raw as i64),
                P::Uint8 => Value::Uint8(raw as u8),
                P::Uint16 => Value::Uint16(raw as u16),
                P::Uint32 => Value::Uint32(raw as u32),
                P::Uint64 => Value::Uint64(raw as u64),
                P::Size => Value::Size(raw as u64),
                P::Float32 => Value::Float32(raw as f32),
                P::Float64 => Value::Float64(raw as f64),
                other => return Err(YardlError::type_mismatch(other, value.kind_name())),
            };
            Ok(widened)
        }
    }
}

fn integer_bits(value: &Value) -> Option<i128> {
    let raw = match *value {
        Value::Int8(v) => v.into(),
        Value::Int16(v) => v.into(),
        Value::Int32(v) => v.into(),
        Value::Int64(v) => v.into(),
        Value::Uint8(v) => v.into(),
        Value::Uint16(v) => v.into(),
        Value::Uint32(v) => v.into(),
        Value::Uint64(v) | Value::Size(v) => v.into(),
        _ => return None,
    };
    Some(raw)
}

fn to_text(value: Value) -> Result<Value> {
    match value {
        Value::Int8(_)
        | Value::Int16(_)
        | Value::Int32(_)
        | Value::Int64(_)
        | Value::Uint8(_)
        | Value::Uint16(_)
        | Value::Uint32(_)
        | Value::Uint64(_)
        | Value::Size(_)
        | Value::Float32(_)
        | Value::Float64(_) => Ok(Value::String(value.to_string())),
        other => Err(YardlError::type_mismatch("number", other.kind_name())),
    }
}

// ── Protocol plans ────────────────────────────────────────────────────────────

/// How to read one step of data written under a previous schema.
#[derive(Debug, Clone, PartialEq)]
pub struct StepAdapter {
    /// The type the previous schema put on the wire (item type for streams).
    pub wire_type: TypeDesc,
    /// `None` when the wire value already has the current shape.
    pub coercion: Option<Coercion>,
}

impl StepAdapter {
    pub fn apply(&self, value: Value) -> Result<Value> {
        match &self.coercion {
            Some(c) => c.apply(value),
            None => Ok(value),
        }
    }
}

/// Builds one adapter per step of `current` for data written as `wire`.
///
/// Steps are paired by position and must agree on name and on being a stream.
pub fn plan_protocol(
    wire: &ProtocolDefinition,
    current: &ProtocolDefinition,
) -> Result<Vec<StepAdapter>> {
    if wire.steps().len() != current.steps().len() {
        return Err(YardlError::UnsupportedCoercion(format!(
            "previous schema has {} steps, protocol '{}' has {}",
            wire.steps().len(),
            current.name(),
            current.steps().len()
        )));
    }

    let plan = wire
        .steps()
        .iter()
        .zip(current.steps())
        .map(|(w, c)| plan_step(w, c))
        .collect::<Result<Vec<_>>>()?;

    debug!(
        protocol = current.name(),
        steps = plan.len(),
        adapted = plan.iter().filter(|s| s.coercion.is_some()).count(),
        "built coercion plan"
    );
    Ok(plan)
}

fn plan_step(wire: &StepDef, current: &StepDef) -> Result<StepAdapter> {
    if wire.name != current.name || wire.is_stream() != current.is_stream() {
        return Err(YardlError::UnsupportedCoercion(format!(
            "step '{}' ({:?}) cannot be read as step '{}' ({:?})",
            wire.name, wire.kind, current.name, current.kind
        )));
    }
    let coercion = Coercion::build(&wire.ty, &current.ty)
        .map_err(|e| match e {
            YardlError::UnsupportedCoercion(msg) => {
                YardlError::UnsupportedCoercion(format!("step '{}': {msg}", current.name))
            }
            other => other,
        })?;
    Ok(StepAdapter {
        wire_type: wire.ty.clone(),
        coercion: (!coercion.is_identity()).then_some(coercion),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::Field;

    fn prim(p: PrimitiveType) -> TypeDesc {
        TypeDesc::Primitive(p)
    }

    fn coerce(from: PrimitiveType, to: PrimitiveType, value: Value) -> Value {
        Coercion::build(&prim(from), &prim(to))
            .unwrap()
            .apply(value)
            .unwrap()
    }

    #[test]
    fn test_int8_min_sign_extends_to_wider_signed() {
        assert_eq!(
            coerce(PrimitiveType::Int8, PrimitiveType::Int64, Value::Int8(-128)),
            Value::Int64(-128)
        );
        assert_eq!(
            coerce(PrimitiveType::Int8, PrimitiveType::Int16, Value::Int8(-128)),
            Value::Int16(-128)
        );
    }

    #[test]
    fn test_int8_min_reinterprets_as_unsigned() {
        assert_eq!(
            coerce(PrimitiveType::Int8, PrimitiveType::Uint64, Value::Int8(-128)),
            Value::Uint64(0xFFFF_FFFF_FFFF_FF80)
        );
        assert_eq!(
            coerce(PrimitiveType::Int8, PrimitiveType::Uint8, Value::Int8(-128)),
            Value::Uint8(128)
        );
    }

    #[test]
    fn test_int8_min_to_float_and_text() {
        assert_eq!(
            coerce(PrimitiveType::Int8, PrimitiveType::Float64, Value::Int8(-128)),
            Value::Float64(-128.0)
        );
        let text = coerce(PrimitiveType::Int8, PrimitiveType::String, Value::Int8(-128));
        assert_eq!(text, Value::String("-128".into()));
        assert_eq!(text.as_str().unwrap().parse::<i8>().unwrap(), -128);
    }

    #[test]
    fn test_float_text_round_trips() {
        let text = coerce(PrimitiveType::Float64, PrimitiveType::String, Value::Float64(0.1));
        assert_eq!(text.as_str().unwrap().parse::<f64>().unwrap(), 0.1);
    }

    #[test]
    fn test_narrowing_is_rejected_at_build_time() {
        for (from, to) in [
            (PrimitiveType::Int64, PrimitiveType::Int32),
            (PrimitiveType::Uint16, PrimitiveType::Uint8),
            (PrimitiveType::Uint8, PrimitiveType::Int8),
            (PrimitiveType::Float64, PrimitiveType::Float32),
            (PrimitiveType::String, PrimitiveType::Int32),
        ] {
            let result = Coercion::build(&prim(from), &prim(to));
            assert!(
                matches!(result, Err(YardlError::UnsupportedCoercion(_))),
                "{from} -> {to} should be rejected"
            );
        }
    }

    #[test]
    fn test_bare_value_wraps_into_optional() {
        let c = Coercion::build(
            &prim(PrimitiveType::Int32),
            &TypeDesc::Optional(Box::new(prim(PrimitiveType::Int64))),
        )
        .unwrap();

        assert_eq!(c.apply(Value::Int32(4)).unwrap(), Value::some(Value::Int64(4)));
    }

    #[test]
    fn test_bare_value_wraps_into_matching_union_case() {
        // Arrange
        let union = TypeDesc::Union(vec![
            UnionCase { label: "null".into(), ty: None },
            UnionCase { label: "string".into(), ty: Some(prim(PrimitiveType::String)) },
            UnionCase { label: "int32".into(), ty: Some(prim(PrimitiveType::Int32)) },
        ]);

        // Act
        let c = Coercion::build(&prim(PrimitiveType::Int32), &union).unwrap();

        // Assert
        assert_eq!(c.apply(Value::Int32(9)).unwrap(), Value::union(2, Value::Int32(9)));
    }

    #[test]
    fn test_alias_is_identity() {
        let alias = TypeDesc::Alias {
            name: "Id".into(),
            target: Box::new(prim(PrimitiveType::Uint32)),
        };

        assert!(Coercion::build(&prim(PrimitiveType::Uint32), &alias)
            .unwrap()
            .is_identity());
    }

    #[test]
    fn test_record_remaps_fields_by_name() {
        // Arrange: old Header{subject, weight:int32}, new Header{weight:int64, subject, added?}
        let old = TypeDesc::Record(RecordDef {
            name: "Header".into(),
            fields: vec![
                Field { name: "subject".into(), ty: prim(PrimitiveType::String) },
                Field { name: "weight".into(), ty: prim(PrimitiveType::Int32) },
                Field { name: "dropped".into(), ty: prim(PrimitiveType::Bool) },
            ],
        });
        let new = TypeDesc::Record(RecordDef {
            name: "Header".into(),
            fields: vec![
                Field { name: "weight".into(), ty: prim(PrimitiveType::Int64) },
                Field { name: "subject".into(), ty: prim(PrimitiveType::String) },
                Field {
                    name: "added".into(),
                    ty: TypeDesc::Optional(Box::new(prim(PrimitiveType::String))),
                },
            ],
        });
        let wire = Value::Record(vec![
            Value::String("hello".into()),
            Value::Int32(-3),
            Value::Bool(true),
        ]);

        // Act
        let result = Coercion::build(&old, &new).unwrap().apply(wire).unwrap();

        // Assert
        assert_eq!(
            result,
            Value::Record(vec![
                Value::Int64(-3),
                Value::String("hello".into()),
                Value::none(),
            ])
        );
    }

    #[test]
    fn test_new_required_field_is_a_build_error() {
        let old = TypeDesc::Record(RecordDef { name: "R".into(), fields: vec![] });
        let new = TypeDesc::Record(RecordDef {
            name: "R".into(),
            fields: vec![Field { name: "x".into(), ty: prim(PrimitiveType::Int32) }],
        });

        let result = Coercion::build(&old, &new);

        assert!(matches!(result, Err(YardlError::UnsupportedCoercion(msg)) if msg.contains("R.x")));
    }

    #[test]
    fn test_optional_maps_into_union_with_null_case() {
        let opt = TypeDesc::Optional(Box::new(prim(PrimitiveType::Int32)));
        let union = TypeDesc::Union(vec![
            UnionCase { label: "null".into(), ty: None },
            UnionCase { label: "int64".into(), ty: Some(prim(PrimitiveType::Int64)) },
        ]);

        let c = Coercion::build(&opt, &union).unwrap();

        assert_eq!(c.apply(Value::none()).unwrap(), Value::union(0, Value::Null));
        assert_eq!(
            c.apply(Value::some(Value::Int32(1))).unwrap(),
            Value::union(1, Value::Int64(1))
        );
    }

    #[test]
    fn test_union_cases_follow_labels() {
        let old = TypeDesc::Union(vec![
            UnionCase { label: "a".into(), ty: Some(prim(PrimitiveType::Int32)) },
            UnionCase { label: "b".into(), ty: Some(prim(PrimitiveType::String)) },
        ]);
        let new = TypeDesc::Union(vec![
            UnionCase { label: "b".into(), ty: Some(prim(PrimitiveType::String)) },
            UnionCase { label: "c".into(), ty: Some(prim(PrimitiveType::Float32)) },
            UnionCase { label: "a".into(), ty: Some(prim(PrimitiveType::Int64)) },
        ]);

        let c = Coercion::build(&old, &new).unwrap();

        assert_eq!(
            c.apply(Value::union(0, Value::Int32(5))).unwrap(),
            Value::union(2, Value::Int64(5))
        );
        assert_eq!(
            c.apply(Value::union(1, Value::String("s".into()))).unwrap(),
            Value::union(0, Value::String("s".into()))
        );
    }

    fn enum_type(name: &str, base: PrimitiveType) -> TypeDesc {
        TypeDesc::Enum(EnumDef {
            name: name.into(),
            base,
            symbols: vec![("off".into(), 0), ("on".into(), 1)],
        })
    }

    #[test]
    fn test_enum_follows_its_name_and_base() {
        // Arrange
        let wire = enum_type("Switch", PrimitiveType::Int16);

        // Act
        let same = Coercion::build(&wire, &enum_type("Switch", PrimitiveType::Int16));
        let widened = Coercion::build(&wire, &enum_type("Switch", PrimitiveType::Int64));
        let renamed = Coercion::build(&wire, &enum_type("Toggle", PrimitiveType::Int16));

        // Assert
        assert_eq!(same.unwrap(), Coercion::Identity);
        assert!(matches!(widened.unwrap(), Coercion::Widen { .. }));
        assert!(matches!(renamed, Err(YardlError::UnsupportedCoercion(_))));
    }

    #[test]
    fn test_plan_rejects_stream_to_scalar() {
        let old = ProtocolDefinition::new(
            "P",
            "old",
            vec![StepDef::stream("s", prim(PrimitiveType::Int32))],
        );
        let new = ProtocolDefinition::new(
            "P",
            "new",
            vec![StepDef::value("s", prim(PrimitiveType::Int32))],
        );

        assert!(matches!(
            plan_protocol(&old, &new),
            Err(YardlError::UnsupportedCoercion(_))
        ));
    }

    #[test]
    fn test_plan_marks_identical_steps_as_native() {
        let old = ProtocolDefinition::new(
            "P",
            "old",
            vec![
                StepDef::value("a", prim(PrimitiveType::String)),
                StepDef::stream("s", prim(PrimitiveType::Int16)),
            ],
        );
        let new = ProtocolDefinition::new(
            "P",
            "new",
            vec![
                StepDef::value("a", prim(PrimitiveType::String)),
                StepDef::stream("s", prim(PrimitiveType::Int32)),
            ],
        );

        let plan = plan_protocol(&old, &new).unwrap();

        assert!(plan[0].coercion.is_none());
        assert_eq!(
            plan[1].coercion,
            Some(Coercion::Widen { from: PrimitiveType::Int16, to: PrimitiveType::Int32 })
        );
    }
}
