//! Core protocol types for the UAVTalk bridge
//!
//! Definitions are created once at catalog load and shared immutably across
//! every task; packets are short-lived and owned by whoever is processing
//! them. JSON field names follow the subscriber protocol, so a serialized
//! [`Definition`] is directly usable as a websocket `def` payload.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Field-keyed value tree carried by updates and object payloads.
///
/// Scalars are JSON numbers (enum options surface as their string), fields
/// with unnamed elements are arrays, fields with named elements are objects.
pub type ObjectData = serde_json::Map<String, serde_json::Value>;

/// 32-bit on-wire object identifier. The low bit is always clear on hashed
/// definitions; a primary's Meta companion is `id + 1`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u32);

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

// =============================================================================
// FIELD TYPES
// =============================================================================

/// The eight UAVTalk primitive field types.
///
/// The discriminant order is load-bearing: it is the enumeration index fed
/// into the ObjectID hash.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum FieldType {
    Int8 = 0,
    Int16 = 1,
    Int32 = 2,
    UInt8 = 3,
    UInt16 = 4,
    UInt32 = 5,
    Float = 6,
    Enum = 7,
}

impl FieldType {
    /// Size of one element on the wire, in bytes.
    pub const fn wire_size(self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 | Self::Enum => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float => 4,
        }
    }

    /// Enumeration index used by the ObjectID hash.
    pub const fn type_index(self) -> u32 {
        self as u32
    }

    /// Resolve a type name as it appears in the XML catalog.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "int8" => Some(Self::Int8),
            "int16" => Some(Self::Int16),
            "int32" => Some(Self::Int32),
            "uint8" => Some(Self::UInt8),
            "uint16" => Some(Self::UInt16),
            "uint32" => Some(Self::UInt32),
            "float" => Some(Self::Float),
            "enum" => Some(Self::Enum),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::Float => "float",
            Self::Enum => "enum",
        }
    }
}

// =============================================================================
// DEFINITIONS
// =============================================================================

/// One field of an object definition, fully normalized.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub units: String,
    /// Number of elements; 1 means scalar.
    pub elements: usize,
    /// Per-element names. Presence selects map-shaped encoding; the length
    /// always equals `elements`.
    #[serde(rename = "elementsName", default)]
    pub element_names: Option<Vec<String>>,
    /// Enum option strings; the index into this list is the wire value.
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(rename = "defaultValue", default)]
    pub default_value: String,
    /// Name of the sibling field this one was cloned from, if any.
    #[serde(rename = "cloneOf", default)]
    pub clone_of: String,
}

impl FieldDefinition {
    /// Wire footprint of the whole field.
    pub fn byte_length(&self) -> usize {
        self.field_type.wire_size() * self.elements
    }
}

/// `<access>` metadata block.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AccessInfo {
    pub gcs: String,
    pub flight: String,
}

/// `<telemetrygcs>` / `<telemetryflight>` metadata block.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TelemetryInfo {
    pub acked: bool,
    pub update_mode: String,
    pub period: String,
}

/// `<logging>` metadata block.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoggingInfo {
    pub update_mode: String,
    pub period: String,
}

/// A schema entry for one telemetry object.
///
/// Field order is the wire order: after normalization fields are stably
/// sorted by descending primitive size, which is not the XML declaration
/// order.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Definition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "singleInstance", default)]
    pub single_instance: bool,
    #[serde(default)]
    pub settings: bool,
    #[serde(default)]
    pub category: String,
    #[serde(rename = "id")]
    pub object_id: ObjectId,
    #[serde(skip)]
    pub access: AccessInfo,
    #[serde(skip)]
    pub telemetry_gcs: TelemetryInfo,
    #[serde(skip)]
    pub telemetry_flight: TelemetryInfo,
    #[serde(skip)]
    pub logging: LoggingInfo,
    /// Set on synthesized Meta companions: the primary's ObjectID.
    #[serde(skip)]
    pub meta_for: Option<ObjectId>,
    pub fields: Vec<FieldDefinition>,
}

impl Definition {
    /// Total payload size of one instance, in bytes.
    pub fn byte_length(&self) -> usize {
        self.fields.iter().map(FieldDefinition::byte_length).sum()
    }

    /// ObjectID of this definition's Meta companion.
    pub fn meta_id(&self) -> ObjectId {
        ObjectId(self.object_id.0 + 1)
    }

    pub fn is_meta(&self) -> bool {
        self.meta_for.is_some()
    }

    /// Locate a field by name, in wire order.
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }
}

// =============================================================================
// PACKETS
// =============================================================================

/// UAVTalk command byte, before the protocol-version mask is applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Cmd {
    /// Unsolicited object value.
    ObjectCmd = 0,
    /// Request for an object value.
    ObjectRequest = 1,
    /// Object value requiring an acknowledgement.
    ObjectCmdWithAck = 2,
    /// Acknowledgement, no payload.
    ObjectAck = 3,
    /// Negative acknowledgement, no payload.
    ObjectNack = 4,
}

impl Cmd {
    /// Whether frames with this command carry an object payload.
    pub const fn has_payload(self) -> bool {
        matches!(self, Self::ObjectCmd | Self::ObjectCmdWithAck)
    }
}

impl TryFrom<u8> for Cmd {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(Self::ObjectCmd),
            1 => Ok(Self::ObjectRequest),
            2 => Ok(Self::ObjectCmdWithAck),
            3 => Ok(Self::ObjectAck),
            4 => Ok(Self::ObjectNack),
            other => Err(other),
        }
    }
}

/// An in-flight unit on the controller link: a decoded frame, or one about
/// to be framed.
#[derive(Clone, Debug)]
pub struct Packet {
    pub definition: Arc<Definition>,
    pub cmd: Cmd,
    /// Absent on the wire when the definition is single-instance.
    pub instance_id: u16,
    /// Decoded payload; empty for bare request/ack/nack packets.
    pub data: ObjectData,
}

impl Packet {
    pub fn new(definition: Arc<Definition>, cmd: Cmd, instance_id: u16, data: ObjectData) -> Self {
        Self { definition, cmd, instance_id, data }
    }

    /// Value of the on-wire LENGTH field: sync byte through last payload
    /// byte, CRC excluded.
    pub fn frame_length(&self) -> u16 {
        let mut length = SHORT_HEADER_LENGTH;
        if !self.definition.single_instance {
            length += 2;
        }
        if self.cmd.has_payload() {
            length += self.definition.byte_length();
        }
        length as u16
    }
}

/// Bytes from the sync byte through the ObjectID (cmd, length, id).
pub const SHORT_HEADER_LENGTH: usize = 8;

// =============================================================================
// BUS MESSAGES
// =============================================================================

/// A typed object update travelling through the dispatcher.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Update {
    pub object_id: ObjectId,
    #[serde(default)]
    pub instance_id: u16,
    pub data: ObjectData,
}

/// A request for an object's current value, routed to the object's owner.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub object_id: ObjectId,
    #[serde(default)]
    pub instance_id: u16,
}

/// Adds an ObjectID to the sender's subscriptions.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub object_id: ObjectId,
}

/// Removes an ObjectID from the sender's subscriptions.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Unsubscription {
    pub object_id: ObjectId,
}

/// Everything a dispatcher connection can carry, in the subscriber
/// protocol's `{type, payload}` envelope.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum BusMessage {
    #[serde(rename = "update")]
    Update(Update),
    #[serde(rename = "req")]
    Request(Request),
    #[serde(rename = "sub")]
    Subscription(Subscription),
    #[serde(rename = "unsub")]
    Unsubscription(Unsubscription),
    #[serde(rename = "def")]
    Definition(Arc<Definition>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scalar(name: &str, field_type: FieldType) -> FieldDefinition {
        FieldDefinition {
            name: name.into(),
            field_type,
            units: String::new(),
            elements: 1,
            element_names: None,
            options: Vec::new(),
            default_value: String::new(),
            clone_of: String::new(),
        }
    }

    #[test]
    fn field_byte_lengths() {
        assert_eq!(scalar("a", FieldType::UInt8).byte_length(), 1);
        assert_eq!(scalar("b", FieldType::Float).byte_length(), 4);
        let mut multi = scalar("c", FieldType::Int16);
        multi.elements = 3;
        assert_eq!(multi.byte_length(), 6);
    }

    #[test]
    fn frame_length_excludes_crc_and_conditional_instance_id() {
        let def = Arc::new(Definition {
            name: "Gyro".into(),
            description: String::new(),
            single_instance: false,
            settings: false,
            category: String::new(),
            object_id: ObjectId(0x10),
            access: AccessInfo::default(),
            telemetry_gcs: TelemetryInfo::default(),
            telemetry_flight: TelemetryInfo::default(),
            logging: LoggingInfo::default(),
            meta_for: None,
            fields: vec![scalar("x", FieldType::Float)],
        });

        let update = Packet::new(def.clone(), Cmd::ObjectCmd, 0, ObjectData::new());
        assert_eq!(update.frame_length(), 8 + 2 + 4);

        // Bare acks carry no payload even on multi-instance objects.
        let ack = Packet::new(def, Cmd::ObjectAck, 0, ObjectData::new());
        assert_eq!(ack.frame_length(), 8 + 2);
    }

    #[test]
    fn bus_message_envelope_round_trip() {
        let msg = BusMessage::Update(Update {
            object_id: ObjectId(42),
            instance_id: 7,
            data: json!({"Status": "Connected"}).as_object().unwrap().clone(),
        });
        let text = serde_json::to_string(&msg).unwrap();
        assert!(text.contains("\"type\":\"update\""));
        assert!(text.contains("\"objectId\":42"));
        assert_eq!(serde_json::from_str::<BusMessage>(&text).unwrap(), msg);
    }

    #[test]
    fn definition_json_uses_the_subscriber_protocol_names() {
        let def = Definition {
            name: "Attitude".into(),
            description: "Orientation estimate".into(),
            single_instance: true,
            settings: false,
            category: "State".into(),
            object_id: ObjectId(0xD7E0_D964),
            access: AccessInfo::default(),
            telemetry_gcs: TelemetryInfo::default(),
            telemetry_flight: TelemetryInfo { acked: true, ..Default::default() },
            logging: LoggingInfo::default(),
            meta_for: None,
            fields: vec![FieldDefinition {
                name: "q".into(),
                field_type: FieldType::Float,
                units: String::new(),
                elements: 4,
                element_names: Some(vec!["q1".into(), "q2".into(), "q3".into(), "q4".into()]),
                options: Vec::new(),
                default_value: String::new(),
                clone_of: String::new(),
            }],
        };

        let value = serde_json::to_value(&def).unwrap();
        assert_eq!(value["singleInstance"], json!(true));
        assert_eq!(value["id"], json!(0xD7E0_D964u32));
        assert_eq!(value["fields"][0]["type"], json!("float"));
        assert_eq!(value["fields"][0]["elementsName"][2], json!("q3"));
        // Link-side metadata is not part of the subscriber protocol.
        assert!(value.get("telemetryFlight").is_none());

        let back: Definition = serde_json::from_value(value).unwrap();
        assert_eq!(back.object_id, def.object_id);
        assert_eq!(back.fields, def.fields);
        // Skipped fields come back as defaults.
        assert!(!back.telemetry_flight.acked);
    }

    #[test]
    fn unknown_envelope_type_is_rejected() {
        let err = serde_json::from_str::<BusMessage>(r#"{"type":"ping","payload":{}}"#);
        assert!(err.is_err());
    }

    #[test]
    fn cmd_round_trip() {
        for raw in 0u8..=4 {
            let cmd = Cmd::try_from(raw).unwrap();
            assert_eq!(cmd as u8, raw);
        }
        assert_eq!(Cmd::try_from(5), Err(5));
        assert!(Cmd::ObjectCmdWithAck.has_payload());
        assert!(!Cmd::ObjectAck.has_payload());
    }
}
