//! XML object-definition parsing
//!
//! Reads one `<object>` element into a raw, un-normalized form. Attribute
//! spellings follow the Taulabs catalog: element names and enum options may
//! appear either as CSV attributes (`elementnames="X,Y,Z"`) or as child
//! nodes (`<elementnames><elementname>X</elementname>...`).

use crate::error::SchemaError;
use crate::types::{AccessInfo, LoggingInfo, TelemetryInfo};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// One `<field>` as written in the file, before normalization.
#[derive(Clone, Debug, Default)]
pub struct RawField {
    pub name: String,
    pub type_name: String,
    pub units: String,
    /// Declared element count; 0 when the attribute is absent.
    pub elements: usize,
    pub element_names_attr: String,
    pub element_names: Vec<String>,
    pub options_attr: String,
    pub options: Vec<String>,
    pub default_value: String,
    pub clone_of: String,
}

/// One `<object>` as written in the file, before normalization.
#[derive(Clone, Debug, Default)]
pub struct RawObject {
    pub name: String,
    pub description: String,
    pub single_instance: bool,
    pub settings: bool,
    pub category: String,
    pub access: AccessInfo,
    pub telemetry_gcs: TelemetryInfo,
    pub telemetry_flight: TelemetryInfo,
    pub logging: LoggingInfo,
    pub fields: Vec<RawField>,
}

/// Where the next text node lands while walking the tree.
enum TextTarget {
    Description,
    ElementName,
    OptionValue,
}

/// Parse the `<object>` element of one definition file. `file` labels
/// errors only.
pub fn parse_object(file: &str, xml: &str) -> Result<RawObject, SchemaError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut object: Option<RawObject> = None;
    let mut field: Option<RawField> = None;
    let mut text_target: Option<TextTarget> = None;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| SchemaError::Xml { file: file.to_string(), message: e.to_string() })?;

        match event {
            Event::Start(ref element) | Event::Empty(ref element) => {
                let empty = matches!(event, Event::Empty(_));
                match element.name().as_ref() {
                    b"object" => {
                        object = Some(object_from_attrs(file, element)?);
                    }
                    b"field" if object.is_some() => {
                        let parsed = field_from_attrs(file, element)?;
                        if empty {
                            push_field(&mut object, parsed);
                        } else {
                            field = Some(parsed);
                        }
                    }
                    b"description" if !empty => {
                        text_target = Some(TextTarget::Description);
                    }
                    b"elementname" if field.is_some() && !empty => {
                        text_target = Some(TextTarget::ElementName);
                    }
                    b"option" if field.is_some() && !empty => {
                        text_target = Some(TextTarget::OptionValue);
                    }
                    b"access" => {
                        if let Some(object) = object.as_mut() {
                            object.access = AccessInfo {
                                gcs: attr(file, element, b"gcs")?.unwrap_or_default(),
                                flight: attr(file, element, b"flight")?.unwrap_or_default(),
                            };
                        }
                    }
                    b"telemetrygcs" => {
                        if let Some(object) = object.as_mut() {
                            object.telemetry_gcs = telemetry_from_attrs(file, element)?;
                        }
                    }
                    b"telemetryflight" => {
                        if let Some(object) = object.as_mut() {
                            object.telemetry_flight = telemetry_from_attrs(file, element)?;
                        }
                    }
                    b"logging" => {
                        if let Some(object) = object.as_mut() {
                            object.logging = LoggingInfo {
                                update_mode: attr(file, element, b"updatemode")?.unwrap_or_default(),
                                period: attr(file, element, b"period")?.unwrap_or_default(),
                            };
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(ref text) => {
                let value = text
                    .unescape()
                    .map_err(|e| SchemaError::Xml { file: file.to_string(), message: e.to_string() })?
                    .into_owned();
                match (&text_target, field.as_mut(), object.as_mut()) {
                    (Some(TextTarget::ElementName), Some(field), _) => {
                        field.element_names.push(value);
                    }
                    (Some(TextTarget::OptionValue), Some(field), _) => {
                        field.options.push(value);
                    }
                    (Some(TextTarget::Description), _, Some(object)) => {
                        object.description = value;
                    }
                    _ => {}
                }
            }
            Event::End(ref end) => match end.name().as_ref() {
                b"field" => {
                    if let Some(done) = field.take() {
                        push_field(&mut object, done);
                    }
                }
                b"description" | b"elementname" | b"option" => {
                    text_target = None;
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    object.ok_or_else(|| SchemaError::MissingObject { file: file.to_string() })
}

fn push_field(object: &mut Option<RawObject>, field: RawField) {
    if let Some(object) = object.as_mut() {
        object.fields.push(field);
    }
}

fn object_from_attrs(file: &str, element: &BytesStart<'_>) -> Result<RawObject, SchemaError> {
    Ok(RawObject {
        name: attr(file, element, b"name")?.unwrap_or_default(),
        single_instance: parse_bool(attr(file, element, b"singleinstance")?.as_deref()),
        settings: parse_bool(attr(file, element, b"settings")?.as_deref()),
        category: attr(file, element, b"category")?.unwrap_or_default(),
        ..RawObject::default()
    })
}

fn field_from_attrs(file: &str, element: &BytesStart<'_>) -> Result<RawField, SchemaError> {
    Ok(RawField {
        name: attr(file, element, b"name")?.unwrap_or_default(),
        type_name: attr(file, element, b"type")?.unwrap_or_default(),
        units: attr(file, element, b"units")?.unwrap_or_default(),
        elements: attr(file, element, b"elements")?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        element_names_attr: attr(file, element, b"elementnames")?.unwrap_or_default(),
        options_attr: attr(file, element, b"options")?.unwrap_or_default(),
        default_value: attr(file, element, b"defaultvalue")?.unwrap_or_default(),
        clone_of: attr(file, element, b"cloneof")?.unwrap_or_default(),
        element_names: Vec::new(),
        options: Vec::new(),
    })
}

fn telemetry_from_attrs(file: &str, element: &BytesStart<'_>) -> Result<TelemetryInfo, SchemaError> {
    Ok(TelemetryInfo {
        acked: parse_bool(attr(file, element, b"acked")?.as_deref()),
        update_mode: attr(file, element, b"updatemode")?.unwrap_or_default(),
        period: attr(file, element, b"period")?.unwrap_or_default(),
    })
}

fn attr(file: &str, element: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, SchemaError> {
    element
        .try_get_attribute(key)
        .map_err(|e| SchemaError::Xml { file: file.to_string(), message: e.to_string() })?
        .map(|a| {
            a.unescape_value()
                .map(|v| v.into_owned())
                .map_err(|e| SchemaError::Xml { file: file.to_string(), message: e.to_string() })
        })
        .transpose()
}

fn parse_bool(value: Option<&str>) -> bool {
    matches!(value, Some("true") | Some("True") | Some("1"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GYRO_XML: &str = r#"<xml>
  <object name="GyroState" singleinstance="true" settings="false" category="State">
    <description>Gyroscope readings in the body frame.</description>
    <access gcs="readonly" flight="readwrite"/>
    <telemetryflight acked="false" updatemode="periodic" period="100"/>
    <telemetrygcs acked="false" updatemode="manual" period="0"/>
    <logging updatemode="periodic" period="1000"/>
    <field name="gyro" units="deg/s" type="float" elementnames="x,y,z"/>
    <field name="temperature" units="C" type="float" elements="1"/>
  </object>
</xml>"#;

    #[test]
    fn parses_attributes_and_children() {
        let object = parse_object("gyrostate.xml", GYRO_XML).unwrap();
        assert_eq!(object.name, "GyroState");
        assert!(object.single_instance);
        assert!(!object.settings);
        assert_eq!(object.category, "State");
        assert_eq!(object.description, "Gyroscope readings in the body frame.");
        assert_eq!(object.access.gcs, "readonly");
        assert_eq!(object.telemetry_flight.update_mode, "periodic");
        assert_eq!(object.logging.period, "1000");
        assert_eq!(object.fields.len(), 2);
        assert_eq!(object.fields[0].element_names_attr, "x,y,z");
        assert_eq!(object.fields[1].elements, 1);
    }

    #[test]
    fn element_names_and_options_as_child_nodes() {
        let xml = r#"<object name="ManualControl" singleinstance="true" settings="false">
            <field name="Channel" units="" type="enum" elements="1">
              <options>
                <option>None</option>
                <option>Throttle</option>
              </options>
            </field>
            <field name="Position" units="" type="float">
              <elementnames>
                <elementname>Roll</elementname>
                <elementname>Pitch</elementname>
              </elementnames>
            </field>
        </object>"#;
        let object = parse_object("manual.xml", xml).unwrap();
        assert_eq!(object.fields[0].options, vec!["None", "Throttle"]);
        assert_eq!(object.fields[1].element_names, vec!["Roll", "Pitch"]);
    }

    #[test]
    fn missing_object_element() {
        let err = parse_object("empty.xml", "<xml></xml>").unwrap_err();
        assert!(matches!(err, SchemaError::MissingObject { .. }));
    }

    #[test]
    fn malformed_xml_is_a_schema_error() {
        let err = parse_object("bad.xml", "<object name=\"X\"><field</object>").unwrap_err();
        assert!(matches!(err, SchemaError::Xml { .. }));
    }
}
