//! Schema JSON → step table.
//!
//! The schema string written into every header doubles as the description of
//! the protocol's steps:
//!
//! ```json
//! {"protocol":{"name":"P","sequence":[{"name":"id","type":"int64"},
//!   {"name":"samples","type":{"stream":{"items":"Ns.Sample"}}}]},
//!  "types":[{"name":"Sample","fields":[{"name":"x","type":"int32"}]}]}
//! ```
//!
//! Named types are looked up in `types` by their unqualified name; the part
//! before the last `.` is the namespace and is ignored.

use std::collections::HashMap;

use serde_json::Value as Json;

use crate::error::{Result, YardlError};
use crate::schema::types::{
    EnumDef, Field, PrimitiveType, ProtocolDefinition, RecordDef, StepDef, TypeDesc, UnionCase,
};

fn invalid(msg: impl Into<String>) -> YardlError {
    YardlError::InvalidSchema(msg.into())
}

impl ProtocolDefinition {
    /// Parses a schema string into a protocol definition.
    ///
    /// The text is kept verbatim as the header match key; no normalisation
    /// happens here.
    pub fn parse(schema: &str) -> Result<Self> {
        let root: Json =
            serde_json::from_str(schema).map_err(|e| invalid(format!("not valid JSON: {e}")))?;

        let protocol = root
            .get("protocol")
            .ok_or_else(|| invalid("missing 'protocol' object"))?;
        let name = protocol
            .get("name")
            .and_then(Json::as_str)
            .ok_or_else(|| invalid("protocol has no name"))?;
        let sequence = protocol
            .get("sequence")
            .and_then(Json::as_array)
            .ok_or_else(|| invalid("protocol has no 'sequence' array"))?;

        let resolver = TypeResolver::new(root.get("types"))?;

        let mut steps = Vec::with_capacity(sequence.len());
        for step in sequence {
            let step_name = step
                .get("name")
                .and_then(Json::as_str)
                .ok_or_else(|| invalid("step has no name"))?;
            let ty = step
                .get("type")
                .ok_or_else(|| invalid(format!("step '{step_name}' has no type")))?;

            let def = match ty.get("stream") {
                Some(stream) => {
                    let items = stream
                        .get("items")
                        .ok_or_else(|| invalid(format!("stream '{step_name}' has no items")))?;
                    StepDef::stream(step_name, resolver.resolve(items)?)
                }
                None => StepDef::value(step_name, resolver.resolve(ty)?),
            };
            steps.push(def);
        }

        Ok(ProtocolDefinition::new(name, schema, steps))
    }
}

// ── Type resolution ───────────────────────────────────────────────────────────

struct TypeResolver<'a> {
    definitions: HashMap<&'a str, &'a Json>,
}

impl<'a> TypeResolver<'a> {
    fn new(types: Option<&'a Json>) -> Result<Self> {
        let mut definitions = HashMap::new();
        let list = match types {
            None | Some(Json::Null) => return Ok(Self { definitions }),
            Some(Json::Array(list)) => list,
            Some(_) => return Err(invalid("'types' must be an array or null")),
        };

        for entry in list {
            let (_, body) = unwrap_definition(entry);
            let name = body
                .get("name")
                .and_then(Json::as_str)
                .ok_or_else(|| invalid("type definition has no name"))?;
            if body.get("typeParameters").is_some() {
                // Stored so the error names the type when it is referenced.
                definitions.insert(name, entry);
                continue;
            }
            if definitions.insert(name, entry).is_some() {
                return Err(invalid(format!("type '{name}' is defined twice")));
            }
        }
        Ok(Self { definitions })
    }

    fn resolve(&self, expr: &Json) -> Result<TypeDesc> {
        self.resolve_in(expr, &mut Vec::new())
    }

    fn resolve_in(&self, expr: &Json, visiting: &mut Vec<String>) -> Result<TypeDesc> {
        match expr {
            Json::String(name) => self.resolve_name(name, visiting),
            Json::Array(cases) => self.resolve_union(cases, visiting),
            Json::Object(obj) => {
                if let Some(vector) = obj.get("vector") {
                    let items = vector
                        .get("items")
                        .ok_or_else(|| invalid("vector has no items"))?;
                    let length = match vector.get("length") {
                        None | Some(Json::Null) => None,
                        Some(n) => Some(n.as_u64().ok_or_else(|| {
                            invalid("vector length must be an unsigned integer")
                        })?),
                    };
                    return Ok(TypeDesc::Vector {
                        items: Box::new(self.resolve_in(items, visiting)?),
                        length,
                    });
                }
                if let Some(map) = obj.get("map") {
                    let keys = map.get("keys").ok_or_else(|| invalid("map has no keys"))?;
                    let values = map.get("values").ok_or_else(|| invalid("map has no values"))?;
                    return Ok(TypeDesc::Map {
                        keys: Box::new(self.resolve_in(keys, visiting)?),
                        values: Box::new(self.resolve_in(values, visiting)?),
                    });
                }
                if obj.contains_key("array") {
                    return Err(invalid("multi-dimensional arrays are not supported"));
                }
                if obj.contains_key("stream") {
                    return Err(invalid("streams are only allowed at protocol step level"));
                }
                if obj.contains_key("typeArguments") {
                    return Err(invalid("generic type instantiations are not supported"));
                }
                if let Some(Json::String(name)) = obj.get("name") {
                    return self.resolve_name(name, visiting);
                }
                Err(invalid(format!("unrecognised type expression: {expr}")))
            }
            other => Err(invalid(format!("unrecognised type expression: {other}"))),
        }
    }

    fn resolve_union(&self, cases: &[Json], visiting: &mut Vec<String>) -> Result<TypeDesc> {
        if cases.is_empty() {
            return Err(invalid("union has no cases"));
        }

        let mut resolved = Vec::with_capacity(cases.len());
        for case in cases {
            let union_case = match case {
                Json::Null => UnionCase {
                    label: "null".to_string(),
                    ty: None,
                },
                Json::Object(obj) if obj.contains_key("tag") || obj.contains_key("label") => {
                    let label = obj
                        .get("tag")
                        .or_else(|| obj.get("label"))
                        .and_then(Json::as_str)
                        .ok_or_else(|| invalid("union case label must be a string"))?;
                    let ty = match obj.get("type") {
                        None | Some(Json::Null) => None,
                        Some(t) => Some(self.resolve_in(t, visiting)?),
                    };
                    UnionCase {
                        label: label.to_string(),
                        ty,
                    }
                }
                other => {
                    let ty = self.resolve_in(other, visiting)?;
                    UnionCase {
                        label: ty.to_string(),
                        ty: Some(ty),
                    }
                }
            };
            resolved.push(union_case);
        }

        if resolved.len() == 2 && resolved[0].ty.is_none() {
            if let Some(inner) = resolved[1].ty.take() {
                return Ok(TypeDesc::Optional(Box::new(inner)));
            }
        }
        Ok(TypeDesc::Union(resolved))
    }

    fn resolve_name(&self, name: &str, visiting: &mut Vec<String>) -> Result<TypeDesc> {
        if let Some(primitive) = PrimitiveType::from_name(name) {
            return Ok(TypeDesc::Primitive(primitive));
        }

        let short = name.rsplit('.').next().unwrap_or(name);
        let entry = self
            .definitions
            .get(short)
            .ok_or_else(|| invalid(format!("unknown type '{name}'")))?;

        if visiting.iter().any(|v| v == short) {
            return Err(invalid(format!("recursive type '{name}' is not supported")));
        }
        visiting.push(short.to_string());
        let resolved = self.resolve_definition(entry, visiting);
        visiting.pop();
        resolved
    }

    fn resolve_definition(&self, entry: &Json, visiting: &mut Vec<String>) -> Result<TypeDesc> {
        let (kind, body) = unwrap_definition(entry);
        let name = body
            .get("name")
            .and_then(Json::as_str)
            .unwrap_or_default()
            .to_string();

        if body.get("typeParameters").is_some() {
            return Err(invalid(format!("generic type '{name}' is not supported")));
        }

        match kind {
            DefinitionKind::Record => {
                let fields_json = body
                    .get("fields")
                    .and_then(Json::as_array)
                    .ok_or_else(|| invalid(format!("record '{name}' has no fields")))?;
                let mut fields = Vec::with_capacity(fields_json.len());
                for field in fields_json {
                    let field_name = field
                        .get("name")
                        .and_then(Json::as_str)
                        .ok_or_else(|| invalid(format!("record '{name}' has an unnamed field")))?;
                    let ty = field.get("type").ok_or_else(|| {
                        invalid(format!("field '{name}.{field_name}' has no type"))
                    })?;
                    fields.push(Field {
                        name: field_name.to_string(),
                        ty: self.resolve_in(ty, visiting)?,
                    });
                }
                Ok(TypeDesc::Record(RecordDef { name, fields }))
            }
            DefinitionKind::Alias => {
                let target = body
                    .get("type")
                    .ok_or_else(|| invalid(format!("alias '{name}' has no type")))?;
                Ok(TypeDesc::Alias {
                    name,
                    target: Box::new(self.resolve_in(target, visiting)?),
                })
            }
            DefinitionKind::Enum { flags } => {
                let default_base = if flags {
                    PrimitiveType::Uint64
                } else {
                    PrimitiveType::Int32
                };
                let base = match body.get("base") {
                    None | Some(Json::Null) => default_base,
                    Some(Json::String(b)) => PrimitiveType::from_name(b)
                        .filter(|p| p.is_integer())
                        .ok_or_else(|| invalid(format!("enum '{name}' has invalid base '{b}'")))?,
                    Some(_) => return Err(invalid(format!("enum '{name}' base must be a string"))),
                };
                let mut symbols = Vec::new();
                if let Some(values) = body.get("values").and_then(Json::as_array) {
                    for v in values {
                        let symbol = v
                            .get("symbol")
                            .and_then(Json::as_str)
                            .ok_or_else(|| invalid(format!("enum '{name}' value has no symbol")))?;
                        let value = v
                            .get("value")
                            .and_then(Json::as_i64)
                            .ok_or_else(|| {
                                invalid(format!("enum '{name}.{symbol}' has no value"))
                            })?;
                        symbols.push((symbol.to_string(), value));
                    }
                }
                Ok(TypeDesc::Enum(EnumDef {
                    name,
                    base,
                    symbols,
                }))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DefinitionKind {
    Record,
    Alias,
    Enum { flags: bool },
}

/// Accepts both `{"record":{...}}` and the flat `{"name","fields"}` forms.
fn unwrap_definition(entry: &Json) -> (DefinitionKind, &Json) {
    for (key, kind) in [
        ("record", DefinitionKind::Record),
        ("alias", DefinitionKind::Alias),
        ("enum", DefinitionKind::Enum { flags: false }),
        ("flags", DefinitionKind::Enum { flags: true }),
    ] {
        if let Some(body) = entry.get(key).filter(|b| b.is_object()) {
            return (kind, body);
        }
    }
    if entry.get("fields").is_some() {
        (DefinitionKind::Record, entry)
    } else if entry.get("values").is_some() {
        (DefinitionKind::Enum { flags: false }, entry)
    } else {
        (DefinitionKind::Alias, entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::StepKind;

    const EVOLUTION_SCHEMA: &str = r#"{"protocol":{"name":"MyProtocol","sequence":[{"name":"header","type":"EvoTest.Header"},{"name":"id","type":"int64"},{"name":"samples","type":{"stream":{"items":"EvoTest.Sample"}}},{"name":"footer","type":[null,"EvoTest.Footer"]}]},"types":[{"name":"Footer","fields":[{"name":"signature","type":"string"}]},{"name":"Header","fields":[{"name":"subject","type":"string"},{"name":"weight","type":"int64"},{"name":"meta","type":{"map":{"keys":"string","values":{"vector":{"items":"string"}}}}}]},{"name":"Sample","fields":[{"name":"data","type":{"vector":{"items":"int32"}}},{"name":"timestamp","type":"datetime"}]}]}"#;

    #[test]
    fn test_parse_builds_step_table_in_order() {
        // Act
        let def = ProtocolDefinition::parse(EVOLUTION_SCHEMA).unwrap();

        // Assert
        assert_eq!(def.name(), "MyProtocol");
        let kinds: Vec<_> = def.steps().iter().map(|s| (s.name.as_str(), s.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                ("header", StepKind::Scalar),
                ("id", StepKind::Scalar),
                ("samples", StepKind::Stream),
                ("footer", StepKind::Optional),
            ]
        );
        assert_eq!(def.schema(), EVOLUTION_SCHEMA);
    }

    #[test]
    fn test_parse_resolves_qualified_record_names() {
        let def = ProtocolDefinition::parse(EVOLUTION_SCHEMA).unwrap();

        match &def.steps()[2].ty {
            TypeDesc::Record(r) => {
                assert_eq!(r.name, "Sample");
                assert_eq!(r.fields[1].ty, TypeDesc::Primitive(PrimitiveType::DateTime));
            }
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_tagged_union() {
        let schema = r#"{"protocol":{"name":"U","sequence":[{"name":"v","type":[null,{"tag":"int","type":"int32"},{"tag":"text","type":"string"}]}]},"types":null}"#;

        let def = ProtocolDefinition::parse(schema).unwrap();

        assert_eq!(def.steps()[0].kind, StepKind::Union);
        match &def.steps()[0].ty {
            TypeDesc::Union(cases) => {
                let labels: Vec<_> = cases.iter().map(|c| c.label.as_str()).collect();
                assert_eq!(labels, vec!["null", "int", "text"]);
            }
            other => panic!("expected union, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_enum_and_alias_definitions() {
        let schema = r#"{"protocol":{"name":"E","sequence":[{"name":"c","type":"Ns.Color"},{"name":"n","type":"Ns.Name"}]},"types":[{"name":"Color","base":"uint8","values":[{"symbol":"red","value":0},{"symbol":"green","value":1}]},{"alias":{"name":"Name","type":"string"}}]}"#;

        let def = ProtocolDefinition::parse(schema).unwrap();

        match &def.steps()[0].ty {
            TypeDesc::Enum(e) => {
                assert_eq!(e.base, PrimitiveType::Uint8);
                assert_eq!(e.symbols.len(), 2);
            }
            other => panic!("expected enum, got {other:?}"),
        }
        assert!(matches!(def.steps()[1].ty, TypeDesc::Alias { .. }));
    }

    #[test]
    fn test_parse_rejects_recursive_types() {
        let schema = r#"{"protocol":{"name":"R","sequence":[{"name":"t","type":"Tree"}]},"types":[{"name":"Tree","fields":[{"name":"left","type":[null,"Tree"]}]}]}"#;

        let result = ProtocolDefinition::parse(schema);

        assert!(matches!(result, Err(YardlError::InvalidSchema(msg)) if msg.contains("recursive")));
    }

    #[test]
    fn test_parse_rejects_arrays_and_unknown_types() {
        let array = r#"{"protocol":{"name":"A","sequence":[{"name":"d","type":{"array":{"items":"int32","dimensions":1}}}]},"types":null}"#;
        let unknown = r#"{"protocol":{"name":"A","sequence":[{"name":"d","type":"Nope"}]},"types":null}"#;

        assert!(matches!(ProtocolDefinition::parse(array), Err(YardlError::InvalidSchema(_))));
        assert!(matches!(ProtocolDefinition::parse(unknown), Err(YardlError::InvalidSchema(_))));
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(matches!(
            ProtocolDefinition::parse("not json"),
            Err(YardlError::InvalidSchema(_))
        ));
    }

    #[test]
    fn test_parse_empty_sequence() {
        let def = ProtocolDefinition::parse(
            r#"{"protocol":{"name":"HelloWorld","sequence":[]},"types":null}"#,
        )
        .unwrap();

        assert!(def.steps().is_empty());
    }
}
