//! Payload codec
//!
//! Converts between a definition's binary payload and the field-keyed value
//! tree. Field iteration follows the definition's (already sorted) wire
//! order; every scalar is little-endian with the width fixed by its
//! primitive type. Enum scalars travel as option strings in the tree and as
//! the option index on the wire.
//!
//! Numbers coming in from subscribers are generic JSON numbers: integer
//! targets truncate with wrapping two's-complement semantics, and a
//! fractional value aimed at an integer field is an error rather than being
//! rounded.

use crate::error::CodecError;
use crate::types::{Definition, FieldDefinition, FieldType, ObjectData};
use serde_json::Value;

/// Encode a value tree into a definition's binary payload.
pub fn map_to_wire(definition: &Definition, data: &ObjectData) -> Result<Vec<u8>, CodecError> {
    let mut wire = Vec::with_capacity(definition.byte_length());
    for field in &definition.fields {
        let value = data
            .get(&field.name)
            .ok_or_else(|| CodecError::MissingField(field.name.clone()))?;
        write_field(field, value, &mut wire)?;
    }
    Ok(wire)
}

/// Decode a definition's binary payload into a value tree.
pub fn wire_to_map(definition: &Definition, payload: &[u8]) -> Result<ObjectData, CodecError> {
    let mut cursor = payload;
    let mut data = ObjectData::new();
    for field in &definition.fields {
        data.insert(field.name.clone(), read_field(field, &mut cursor)?);
    }
    Ok(data)
}

fn write_field(field: &FieldDefinition, value: &Value, wire: &mut Vec<u8>) -> Result<(), CodecError> {
    match (&field.element_names, field.elements) {
        (None, 0 | 1) => write_scalar(field, value, wire),
        (None, elements) => {
            let items = value.as_array().ok_or(CodecError::WrongShape {
                field: field.name.clone(),
                expected: "a list of scalars",
            })?;
            if items.len() != elements {
                return Err(CodecError::WrongShape {
                    field: field.name.clone(),
                    expected: "a list with one entry per element",
                });
            }
            for item in items {
                write_scalar(field, item, wire)?;
            }
            Ok(())
        }
        (Some(names), _) => {
            let entries = value.as_object().ok_or(CodecError::WrongShape {
                field: field.name.clone(),
                expected: "a map keyed by element name",
            })?;
            for name in names {
                let item = entries.get(name).ok_or_else(|| CodecError::MissingElement {
                    field: field.name.clone(),
                    element: name.clone(),
                })?;
                write_scalar(field, item, wire)?;
            }
            Ok(())
        }
    }
}

fn read_field(field: &FieldDefinition, cursor: &mut &[u8]) -> Result<Value, CodecError> {
    match (&field.element_names, field.elements) {
        (None, 0 | 1) => read_scalar(field, cursor),
        (None, elements) => {
            let mut items = Vec::with_capacity(elements);
            for _ in 0..elements {
                items.push(read_scalar(field, cursor)?);
            }
            Ok(Value::Array(items))
        }
        (Some(names), _) => {
            let mut entries = ObjectData::new();
            for name in names {
                entries.insert(name.clone(), read_scalar(field, cursor)?);
            }
            Ok(Value::Object(entries))
        }
    }
}

fn write_scalar(field: &FieldDefinition, value: &Value, wire: &mut Vec<u8>) -> Result<(), CodecError> {
    match field.field_type {
        FieldType::Int8 => wire.push((integral(field, value)? as i8) as u8),
        FieldType::UInt8 => wire.push(integral(field, value)? as u8),
        FieldType::Int16 => wire.extend_from_slice(&(integral(field, value)? as i16).to_le_bytes()),
        FieldType::UInt16 => wire.extend_from_slice(&(integral(field, value)? as u16).to_le_bytes()),
        FieldType::Int32 => wire.extend_from_slice(&(integral(field, value)? as i32).to_le_bytes()),
        FieldType::UInt32 => wire.extend_from_slice(&(integral(field, value)? as u32).to_le_bytes()),
        FieldType::Float => {
            let number = value.as_f64().ok_or(CodecError::WrongShape {
                field: field.name.clone(),
                expected: "a number",
            })?;
            wire.extend_from_slice(&(number as f32).to_le_bytes());
        }
        FieldType::Enum => {
            let option = value.as_str().ok_or(CodecError::WrongShape {
                field: field.name.clone(),
                expected: "an option string",
            })?;
            let index = field
                .options
                .iter()
                .position(|o| o == option)
                .ok_or_else(|| CodecError::UnknownOption {
                    field: field.name.clone(),
                    option: option.to_string(),
                })?;
            wire.push(index as u8);
        }
    }
    Ok(())
}

fn read_scalar(field: &FieldDefinition, cursor: &mut &[u8]) -> Result<Value, CodecError> {
    let bytes = take(field, cursor, field.field_type.wire_size())?;
    let value = match field.field_type {
        FieldType::Int8 => Value::from(bytes[0] as i8),
        FieldType::UInt8 => Value::from(bytes[0]),
        FieldType::Int16 => Value::from(i16::from_le_bytes([bytes[0], bytes[1]])),
        FieldType::UInt16 => Value::from(u16::from_le_bytes([bytes[0], bytes[1]])),
        FieldType::Int32 => {
            Value::from(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        FieldType::UInt32 => {
            Value::from(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        FieldType::Float => {
            let raw = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            serde_json::Number::from_f64(f64::from(raw))
                .map(Value::Number)
                .ok_or(CodecError::NonFiniteFloat { field: field.name.clone() })?
        }
        FieldType::Enum => {
            let index = bytes[0];
            let option = field.options.get(index as usize).ok_or(
                CodecError::EnumOutOfRange { field: field.name.clone(), index },
            )?;
            Value::from(option.as_str())
        }
    };
    Ok(value)
}

/// Coerce a JSON number to an integer, keeping full width for the later
/// wrapping truncation. Fractional input is rejected, not rounded.
fn integral(field: &FieldDefinition, value: &Value) -> Result<i128, CodecError> {
    let number = match value {
        Value::Number(number) => number,
        _ => {
            return Err(CodecError::WrongShape {
                field: field.name.clone(),
                expected: "a number",
            })
        }
    };
    if let Some(v) = number.as_i64() {
        return Ok(i128::from(v));
    }
    if let Some(v) = number.as_u64() {
        return Ok(i128::from(v));
    }
    let v = number.as_f64().unwrap_or(f64::NAN);
    if !v.is_finite() || v.fract() != 0.0 {
        return Err(CodecError::NonIntegralValue { field: field.name.clone() });
    }
    Ok(v as i128)
}

fn take<'a>(
    field: &FieldDefinition,
    cursor: &mut &'a [u8],
    size: usize,
) -> Result<&'a [u8], CodecError> {
    if cursor.len() < size {
        return Err(CodecError::ShortPayload {
            field: field.name.clone(),
            wanted: size - cursor.len(),
        });
    }
    let (head, rest) = cursor.split_at(size);
    *cursor = rest;
    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::xml;
    use serde_json::json;
    use std::sync::Arc;

    fn definition(xml_text: &str) -> Arc<Definition> {
        let object = xml::parse_object("test.xml", xml_text).unwrap();
        let catalog = Catalog::from_objects(vec![object]).unwrap();
        let def = catalog.iter().next().unwrap().clone();
        def
    }

    fn mixed() -> Arc<Definition> {
        definition(
            r#"<object name="Mixed" singleinstance="true" settings="false">
                <field name="Mode" units="" type="enum" elements="1" options="Off,Manual,Auto"/>
                <field name="Trim" units="" type="int8" elements="1"/>
                <field name="Count" units="" type="uint16" elements="1"/>
                <field name="Rate" units="deg/s" type="float" elementnames="Roll,Pitch,Yaw"/>
                <field name="Raw" units="" type="uint8" elements="4"/>
            </object>"#,
        )
    }

    #[test]
    fn encodes_in_wire_order() {
        let def = mixed();
        let data = json!({
            "Mode": "Auto",
            "Trim": -2,
            "Count": 0x0201,
            "Rate": {"Roll": 1.0, "Pitch": 2.0, "Yaw": 3.0},
            "Raw": [1, 2, 3, 4],
        });
        let wire = map_to_wire(&def, data.as_object().unwrap()).unwrap();

        // Sorted order: Rate (float x3), Count (u16), Mode, Trim, Raw x4.
        let mut expected = Vec::new();
        expected.extend_from_slice(&1.0f32.to_le_bytes());
        expected.extend_from_slice(&2.0f32.to_le_bytes());
        expected.extend_from_slice(&3.0f32.to_le_bytes());
        expected.extend_from_slice(&[0x01, 0x02]);
        expected.push(2); // "Auto"
        expected.push(0xFE); // -2 as two's complement
        expected.extend_from_slice(&[1, 2, 3, 4]);
        assert_eq!(wire, expected);
    }

    #[test]
    fn round_trip_preserves_shape_and_enum_strings() {
        let def = mixed();
        let data = json!({
            "Mode": "Manual",
            "Trim": -128,
            "Count": 65535,
            "Rate": {"Roll": 0.5, "Pitch": -1.5, "Yaw": 100.0},
            "Raw": [0, 127, 128, 255],
        });
        let wire = map_to_wire(&def, data.as_object().unwrap()).unwrap();
        let decoded = wire_to_map(&def, &wire).unwrap();
        assert_eq!(Value::Object(decoded), data);
    }

    #[test]
    fn payload_length_is_stable() {
        let def = mixed();
        let wire = vec![0u8; def.byte_length()];
        let decoded = wire_to_map(&def, &wire).unwrap();
        let reencoded = map_to_wire(&def, &decoded).unwrap();
        assert_eq!(reencoded.len(), wire.len());
    }

    #[test]
    fn integers_truncate_wrapping() {
        let def = definition(
            r#"<object name="W" singleinstance="true" settings="false">
                <field name="a" units="" type="uint8" elements="1"/>
            </object>"#,
        );
        let wire = map_to_wire(&def, json!({"a": 0x1FF}).as_object().unwrap()).unwrap();
        assert_eq!(wire, vec![0xFF]);

        let wire = map_to_wire(&def, json!({"a": -1}).as_object().unwrap()).unwrap();
        assert_eq!(wire, vec![0xFF]);
    }

    #[test]
    fn fractional_value_for_integer_field_is_rejected() {
        let def = definition(
            r#"<object name="W" singleinstance="true" settings="false">
                <field name="a" units="" type="int16" elements="1"/>
            </object>"#,
        );
        let err = map_to_wire(&def, json!({"a": 1.5}).as_object().unwrap()).unwrap_err();
        assert!(matches!(err, CodecError::NonIntegralValue { .. }));
    }

    #[test]
    fn missing_map_element() {
        let def = mixed();
        let data = json!({
            "Mode": "Off",
            "Trim": 0,
            "Count": 0,
            "Rate": {"Roll": 1.0, "Yaw": 3.0},
            "Raw": [0, 0, 0, 0],
        });
        let err = map_to_wire(&def, data.as_object().unwrap()).unwrap_err();
        match err {
            CodecError::MissingElement { field, element } => {
                assert_eq!(field, "Rate");
                assert_eq!(element, "Pitch");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_enum_option() {
        let def = mixed();
        let data = json!({
            "Mode": "Sideways",
            "Trim": 0,
            "Count": 0,
            "Rate": {"Roll": 0.0, "Pitch": 0.0, "Yaw": 0.0},
            "Raw": [0, 0, 0, 0],
        });
        let err = map_to_wire(&def, data.as_object().unwrap()).unwrap_err();
        assert!(matches!(err, CodecError::UnknownOption { .. }));
    }

    #[test]
    fn enum_index_out_of_range_on_decode() {
        let def = definition(
            r#"<object name="E" singleinstance="true" settings="false">
                <field name="Mode" units="" type="enum" elements="1" options="A,B"/>
            </object>"#,
        );
        let err = wire_to_map(&def, &[9]).unwrap_err();
        assert!(matches!(err, CodecError::EnumOutOfRange { index: 9, .. }));
    }

    #[test]
    fn short_payload_on_decode() {
        let def = mixed();
        let err = wire_to_map(&def, &[0u8; 3]).unwrap_err();
        assert!(matches!(err, CodecError::ShortPayload { .. }));
    }
}
