//! Type-directed encode, decode and skip of [`Value`]s.
//!
//! ```text
//! bool, int8, uint8         1 raw byte
//! uint16/32/64, size        unsigned varint
//! int16/32/64               zig-zag varint
//! float32, float64          fixed little-endian
//! complexfloat*             real then imaginary
//! string                    [varint len][UTF-8]
//! date / time / datetime    zig-zag varint (days / ns / ns)
//! optional                  [0|1][value?]
//! union                     [case index byte][value]
//! vector                    [varint len]? items   (no length when fixed)
//! map                       [varint count] key value ...
//! record                    fields in declaration order
//! enum                      its base integer
//! ```

use std::io::{Read, Write};

use crate::error::{Result, YardlError};
use crate::protocol::coded_stream::{CodedInputStream, CodedOutputStream};
use crate::schema::types::{PrimitiveType, TypeDesc, UnionCase};
use crate::schema::value::Value;

// ── Validation ────────────────────────────────────────────────────────────────

/// Verifies that `value` conforms to `ty` without encoding anything.
///
/// Writers call this before emitting a value so that a rejected value leaves
/// the output untouched.
pub fn check_value(ty: &TypeDesc, value: &Value) -> Result<()> {
    let mismatch = || YardlError::type_mismatch(ty, value.kind_name());

    match (ty.resolve_alias(), value) {
        (TypeDesc::Primitive(p), v) => {
            if primitive_matches(*p, v) {
                Ok(())
            } else {
                Err(mismatch())
            }
        }
        (TypeDesc::Enum(e), v) => {
            if primitive_matches(e.base, v) {
                Ok(())
            } else {
                Err(mismatch())
            }
        }
        (TypeDesc::Optional(_), Value::Optional(None)) => Ok(()),
        (TypeDesc::Optional(inner), Value::Optional(Some(v))) => check_value(inner, v),
        (TypeDesc::Union(cases), Value::Union { index, value }) => {
            let case = cases.get(usize::from(*index)).ok_or_else(|| {
                YardlError::type_mismatch(ty, format!("union case {index} of {}", cases.len()))
            })?;
            match (&case.ty, value.as_ref()) {
                (None, Value::Null) => Ok(()),
                (Some(case_ty), v) => check_value(case_ty, v),
                (None, _) => Err(mismatch()),
            }
        }
        (TypeDesc::Vector { items, length }, Value::Vector(values)) => {
            if let Some(n) = length {
                if values.len() as u64 != *n {
                    return Err(YardlError::type_mismatch(
                        ty,
                        format!("vector of length {}", values.len()),
                    ));
                }
            }
            values.iter().try_for_each(|v| check_value(items, v))
        }
        (TypeDesc::Map { keys, values }, Value::Map(entries)) => {
            entries.iter().try_for_each(|(k, v)| {
                check_value(keys, k)?;
                check_value(values, v)
            })
        }
        (TypeDesc::Record(r), Value::Record(fields)) => {
            if fields.len() != r.fields.len() {
                return Err(YardlError::type_mismatch(
                    ty,
                    format!("record with {} fields", fields.len()),
                ));
            }
            r.fields
                .iter()
                .zip(fields)
                .try_for_each(|(f, v)| check_value(&f.ty, v))
        }
        _ => Err(mismatch()),
    }
}

fn primitive_matches(p: PrimitiveType, value: &Value) -> bool {
    matches!(
        (p, value),
        (PrimitiveType::Bool, Value::Bool(_))
            | (PrimitiveType::Int8, Value::Int8(_))
            | (PrimitiveType::Uint8, Value::Uint8(_))
            | (PrimitiveType::Int16, Value::Int16(_))
            | (PrimitiveType::Uint16, Value::Uint16(_))
            | (PrimitiveType::Int32, Value::Int32(_))
            | (PrimitiveType::Uint32, Value::Uint32(_))
            | (PrimitiveType::Int64, Value::Int64(_))
            | (PrimitiveType::Uint64, Value::Uint64(_))
            | (PrimitiveType::Size, Value::Size(_))
            | (PrimitiveType::Float32, Value::Float32(_))
            | (PrimitiveType::Float64, Value::Float64(_))
            | (PrimitiveType::ComplexFloat32, Value::ComplexFloat32(..))
            | (PrimitiveType::ComplexFloat64, Value::ComplexFloat64(..))
            | (PrimitiveType::String, Value::String(_))
            | (PrimitiveType::Date, Value::Date(_))
            | (PrimitiveType::Time, Value::Time(_))
            | (PrimitiveType::DateTime, Value::DateTime(_))
    )
}

// ── Encode ────────────────────────────────────────────────────────────────────

/// Encodes `value` as `ty`.  The value must already satisfy [`check_value`].
pub fn write_value<W: Write>(
    out: &mut CodedOutputStream<W>,
    ty: &TypeDesc,
    value: &Value,
) -> Result<()> {
    match (ty.resolve_alias(), value) {
        (TypeDesc::Primitive(_), v) | (TypeDesc::Enum(_), v) => write_primitive(out, v),
        (TypeDesc::Optional(_), Value::Optional(None)) => out.write_byte(0),
        (TypeDesc::Optional(inner), Value::Optional(Some(v))) => {
            out.write_byte(1)?;
            write_value(out, inner, v)
        }
        (TypeDesc::Union(cases), Value::Union { index, value }) => {
            out.write_byte(*index)?;
            match case_type(cases, *index) {
                Some(case_ty) => write_value(out, case_ty, value),
                None => Ok(()),
            }
        }
        (TypeDesc::Vector { items, length }, Value::Vector(values)) => {
            if length.is_none() {
                out.write_unsigned_varint(values.len() as u64)?;
            }
            values.iter().try_for_each(|v| write_value(out, items, v))
        }
        (TypeDesc::Map { keys, values }, Value::Map(entries)) => {
            out.write_unsigned_varint(entries.len() as u64)?;
            entries.iter().try_for_each(|(k, v)| {
                write_value(out, keys, k)?;
                write_value(out, values, v)
            })
        }
        (TypeDesc::Record(r), Value::Record(fields)) => r
            .fields
            .iter()
            .zip(fields)
            .try_for_each(|(f, v)| write_value(out, &f.ty, v)),
        (ty, v) => Err(YardlError::type_mismatch(ty, v.kind_name())),
    }
}

fn write_primitive<W: Write>(out: &mut CodedOutputStream<W>, value: &Value) -> Result<()> {
    match *value {
        Value::Bool(v) => out.write_byte(u8::from(v)),
        Value::Int8(v) => out.write_byte(v as u8),
        Value::Uint8(v) => out.write_byte(v),
        Value::Int16(v) => out.write_signed_varint(v.into()),
        Value::Int32(v) => out.write_signed_varint(v.into()),
        Value::Int64(v) => out.write_signed_varint(v),
        Value::Uint16(v) => out.write_unsigned_varint(v.into()),
        Value::Uint32(v) => out.write_unsigned_varint(v.into()),
        Value::Uint64(v) | Value::Size(v) => out.write_unsigned_varint(v),
        Value::Float32(v) => out.write_f32(v),
        Value::Float64(v) => out.write_f64(v),
        Value::ComplexFloat32(re, im) => {
            out.write_f32(re)?;
            out.write_f32(im)
        }
        Value::ComplexFloat64(re, im) => {
            out.write_f64(re)?;
            out.write_f64(im)
        }
        Value::String(ref s) => out.write_string(s),
        Value::Date(v) | Value::Time(v) | Value::DateTime(v) => out.write_signed_varint(v),
        ref other => Err(YardlError::type_mismatch("primitive", other.kind_name())),
    }
}

fn case_type(cases: &[UnionCase], index: u8) -> Option<&TypeDesc> {
    cases.get(usize::from(index)).and_then(|c| c.ty.as_ref())
}

// ── Decode ────────────────────────────────────────────────────────────────────

/// Decodes one value of type `ty`.
pub fn read_value<R: Read>(input: &mut CodedInputStream<R>, ty: &TypeDesc) -> Result<Value> {
    match ty.resolve_alias() {
        TypeDesc::Primitive(p) => read_primitive(input, *p),
        TypeDesc::Enum(e) => read_primitive(input, e.base),
        TypeDesc::Optional(inner) => match read_flag(input)? {
            false => Ok(Value::Optional(None)),
            true => Ok(Value::some(read_value(input, inner)?)),
        },
        TypeDesc::Union(cases) => {
            let index = read_discriminant(input, cases)?;
            let value = match case_type(cases, index) {
                Some(case_ty) => read_value(input, case_ty)?,
                None => Value::Null,
            };
            Ok(Value::union(index, value))
        }
        TypeDesc::Vector { items, length } => {
            let len = match length {
                Some(n) => *n,
                None => input.read_unsigned_varint()?,
            };
            // Cap the preallocation; the length prefix is untrusted.
            let mut values = Vec::with_capacity(len.min(4096) as usize);
            for _ in 0..len {
                values.push(read_value(input, items)?);
            }
            Ok(Value::Vector(values))
        }
        TypeDesc::Map { keys, values } => {
            let count = input.read_unsigned_varint()?;
            let mut entries = Vec::with_capacity(count.min(4096) as usize);
            for _ in 0..count {
                let k = read_value(input, keys)?;
                let v = read_value(input, values)?;
                entries.push((k, v));
            }
            Ok(Value::Map(entries))
        }
        TypeDesc::Record(r) => {
            let mut fields = Vec::with_capacity(r.fields.len());
            for f in &r.fields {
                fields.push(read_value(input, &f.ty)?);
            }
            Ok(Value::Record(fields))
        }
        TypeDesc::Alias { target, .. } => read_value(input, target),
    }
}

fn read_primitive<R: Read>(input: &mut CodedInputStream<R>, p: PrimitiveType) -> Result<Value> {
    let value = match p {
        PrimitiveType::Bool => Value::Bool(read_flag(input)?),
        PrimitiveType::Int8 => Value::Int8(input.read_byte()? as i8),
        PrimitiveType::Uint8 => Value::Uint8(input.read_byte()?),
        PrimitiveType::Int16 => Value::Int16(narrow_signed(input, p)?),
        PrimitiveType::Int32 => Value::Int32(narrow_signed(input, p)?),
        PrimitiveType::Int64 => Value::Int64(input.read_signed_varint()?),
        PrimitiveType::Uint16 => Value::Uint16(narrow_unsigned(input, p)?),
        PrimitiveType::Uint32 => Value::Uint32(narrow_unsigned(input, p)?),
        PrimitiveType::Uint64 => Value::Uint64(input.read_unsigned_varint()?),
        PrimitiveType::Size => Value::Size(input.read_unsigned_varint()?),
        PrimitiveType::Float32 => Value::Float32(input.read_f32()?),
        PrimitiveType::Float64 => Value::Float64(input.read_f64()?),
        PrimitiveType::ComplexFloat32 => {
            Value::ComplexFloat32(input.read_f32()?, input.read_f32()?)
        }
        PrimitiveType::ComplexFloat64 => {
            Value::ComplexFloat64(input.read_f64()?, input.read_f64()?)
        }
        PrimitiveType::String => Value::String(input.read_string()?),
        PrimitiveType::Date => Value::Date(input.read_signed_varint()?),
        PrimitiveType::Time => Value::Time(input.read_signed_varint()?),
        PrimitiveType::DateTime => Value::DateTime(input.read_signed_varint()?),
    };
    Ok(value)
}

fn narrow_signed<R: Read, T: TryFrom<i64>>(
    input: &mut CodedInputStream<R>,
    p: PrimitiveType,
) -> Result<T> {
    let raw = input.read_signed_varint()?;
    T::try_from(raw).map_err(|_| YardlError::Format(format!("value {raw} does not fit in {p}")))
}

fn narrow_unsigned<R: Read, T: TryFrom<u64>>(
    input: &mut CodedInputStream<R>,
    p: PrimitiveType,
) -> Result<T> {
    let raw = input.read_unsigned_varint()?;
    T::try_from(raw).map_err(|_| YardlError::Format(format!("value {raw} does not fit in {p}")))
}

fn read_flag<R: Read>(input: &mut CodedInputStream<R>) -> Result<bool> {
    match input.read_byte()? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(YardlError::Format(format!(
            "invalid presence flag {other} at byte {}",
            input.position() - 1
        ))),
    }
}

fn read_discriminant<R: Read>(input: &mut CodedInputStream<R>, cases: &[UnionCase]) -> Result<u8> {
    let index = input.read_byte()?;
    if usize::from(index) >= cases.len() {
        return Err(YardlError::Format(format!(
            "union discriminant {index} out of range ({} cases)",
            cases.len()
        )));
    }
    Ok(index)
}

// ── Skip ──────────────────────────────────────────────────────────────────────

/// Consumes the bytes of one value of type `ty` without materialising it.
pub fn skip_value<R: Read>(input: &mut CodedInputStream<R>, ty: &TypeDesc) -> Result<()> {
    match ty.resolve_alias() {
        TypeDesc::Primitive(p) => skip_primitive(input, *p),
        TypeDesc::Enum(e) => skip_primitive(input, e.base),
        TypeDesc::Optional(inner) => {
            if read_flag(input)? {
                skip_value(input, inner)?;
            }
            Ok(())
        }
        TypeDesc::Union(cases) => {
            let index = read_discriminant(input, cases)?;
            match case_type(cases, index) {
                Some(case_ty) => skip_value(input, case_ty),
                None => Ok(()),
            }
        }
        TypeDesc::Vector { items, length } => {
            let len = match length {
                Some(n) => *n,
                None => input.read_unsigned_varint()?,
            };
            if let Some(width) = fixed_width(items) {
                return input.skip_bytes(len.saturating_mul(width));
            }
            for _ in 0..len {
                skip_value(input, items)?;
            }
            Ok(())
        }
        TypeDesc::Map { keys, values } => {
            let count = input.read_unsigned_varint()?;
            for _ in 0..count {
                skip_value(input, keys)?;
                skip_value(input, values)?;
            }
            Ok(())
        }
        TypeDesc::Record(r) => r.fields.iter().try_for_each(|f| skip_value(input, &f.ty)),
        TypeDesc::Alias { target, .. } => skip_value(input, target),
    }
}

fn skip_primitive<R: Read>(input: &mut CodedInputStream<R>, p: PrimitiveType) -> Result<()> {
    match p {
        PrimitiveType::String => input.skip_string(),
        _ => match fixed_width(&TypeDesc::Primitive(p)) {
            Some(width) => input.skip_bytes(width),
            None => input.read_unsigned_varint().map(|_| ()),
        },
    }
}

/// Byte width of types whose encoding never varies in size.
fn fixed_width(ty: &TypeDesc) -> Option<u64> {
    match ty.resolve_alias() {
        TypeDesc::Primitive(p) => match p {
            PrimitiveType::Bool | PrimitiveType::Int8 | PrimitiveType::Uint8 => Some(1),
            PrimitiveType::Float32 => Some(4),
            PrimitiveType::Float64 | PrimitiveType::ComplexFloat32 => Some(8),
            PrimitiveType::ComplexFloat64 => Some(16),
            _ => None,
        },
        TypeDesc::Enum(e) => fixed_width(&TypeDesc::Primitive(e.base)),
        _ => None,
    }
}
